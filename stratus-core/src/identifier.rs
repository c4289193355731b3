//! Identifier - Resource Manager resource paths and composite association IDs
//!
//! A resource identifier is a hierarchical path of key/value segments:
//!
//! ```text
//! /subscriptions/{sub}/resourceGroups/{rg}/providers/{namespace}/{type}/{name}[/{type}/{name}...]
//! ```
//!
//! Segments are kept in their original order and spelling so that
//! `parse` followed by `to_string` reproduces the input exactly.

use std::fmt;

/// Separator joining the two halves of a composite identifier
pub const COMPOSITE_SEPARATOR: char = '|';

const SUBSCRIPTIONS: &str = "subscriptions";
const RESOURCE_GROUPS: &str = "resourceGroups";
const PROVIDERS: &str = "providers";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    #[error("resource ID is empty")]
    Empty,

    #[error("resource ID '{raw}' must start with '/'")]
    MissingLeadingSlash { raw: String },

    #[error("resource ID '{raw}' contains an empty segment")]
    EmptySegment { raw: String },

    #[error("resource ID '{raw}' has an odd number of segments, expected key/value pairs")]
    OddSegments { raw: String },

    #[error("resource ID '{raw}' must start with '/subscriptions/'")]
    MissingSubscription { raw: String },

    #[error("resource ID '{raw}' is missing the '{key}' segment")]
    MissingSegment { key: String, raw: String },

    #[error("composite ID '{raw}' has {count} segment(s), expected exactly 2 separated by '|'")]
    CompositeSegments { raw: String, count: usize },

    #[error("composite ID '{raw}' contains an empty segment")]
    EmptyCompositePart { raw: String },

    #[error("composite ID '{raw}': {inner}")]
    CompositePart {
        raw: String,
        inner: Box<IdentifierError>,
    },
}

/// Hierarchical Resource Manager identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceIdentifier {
    segments: Vec<(String, String)>,
}

impl ResourceIdentifier {
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        if raw.is_empty() {
            return Err(IdentifierError::Empty);
        }
        let Some(path) = raw.strip_prefix('/') else {
            return Err(IdentifierError::MissingLeadingSlash {
                raw: raw.to_string(),
            });
        };

        let parts: Vec<&str> = path.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(IdentifierError::EmptySegment {
                raw: raw.to_string(),
            });
        }
        if parts.len() % 2 != 0 {
            return Err(IdentifierError::OddSegments {
                raw: raw.to_string(),
            });
        }
        if !parts[0].eq_ignore_ascii_case(SUBSCRIPTIONS) {
            return Err(IdentifierError::MissingSubscription {
                raw: raw.to_string(),
            });
        }

        let segments = parts
            .chunks(2)
            .map(|pair| (pair[0].to_string(), pair[1].to_string()))
            .collect();
        Ok(Self { segments })
    }

    /// Start building an identifier at the subscription scope
    pub fn subscription(id: impl Into<String>) -> Self {
        Self {
            segments: vec![(SUBSCRIPTIONS.to_string(), id.into())],
        }
    }

    pub fn resource_group(self, name: impl Into<String>) -> Self {
        self.child(RESOURCE_GROUPS, name)
    }

    /// Append the `providers/{namespace}` segment
    pub fn provider(self, namespace: impl Into<String>) -> Self {
        self.child(PROVIDERS, namespace)
    }

    pub fn child(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.segments.push((key.into(), value.into()));
        self
    }

    /// Value of the first segment whose key matches case-insensitively
    pub fn get(&self, key: &str) -> Option<&str> {
        self.segments
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn require(&self, key: &str) -> Result<&str, IdentifierError> {
        self.get(key).ok_or_else(|| IdentifierError::MissingSegment {
            key: key.to_string(),
            raw: self.to_string(),
        })
    }

    pub fn subscription_id(&self) -> &str {
        // parse and the builder both guarantee the subscription segment comes first
        self.segments
            .first()
            .map(|(_, v)| v.as_str())
            .unwrap_or_default()
    }

    pub fn resource_group_name(&self) -> Option<&str> {
        self.get(RESOURCE_GROUPS)
    }

    pub fn namespace(&self) -> Option<&str> {
        self.get(PROVIDERS)
    }

    /// Name of the innermost resource
    pub fn name(&self) -> &str {
        self.segments
            .last()
            .map(|(_, v)| v.as_str())
            .unwrap_or_default()
    }

    /// Type key of the innermost resource (e.g. "networkInterfaces")
    pub fn kind(&self) -> &str {
        self.segments
            .last()
            .map(|(k, _)| k.as_str())
            .unwrap_or_default()
    }

    /// Identifier of the enclosing resource, or `None` at subscription scope
    pub fn parent(&self) -> Option<Self> {
        if self.segments.len() <= 1 {
            return None;
        }
        let mut segments = self.segments[..self.segments.len() - 1].to_vec();
        if segments
            .last()
            .is_some_and(|(k, _)| k.eq_ignore_ascii_case(PROVIDERS))
        {
            segments.pop();
        }
        Some(Self { segments })
    }

    pub fn segments(&self) -> &[(String, String)] {
        &self.segments
    }
}

impl fmt::Display for ResourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.segments {
            write!(f, "/{}/{}", key, value)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for ResourceIdentifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Two identifiers joined by `|`, naming a membership of `second` inside `first`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeIdentifier {
    pub first: ResourceIdentifier,
    pub second: ResourceIdentifier,
}

impl CompositeIdentifier {
    pub fn new(first: ResourceIdentifier, second: ResourceIdentifier) -> Self {
        Self { first, second }
    }

    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        let parts: Vec<&str> = raw.split(COMPOSITE_SEPARATOR).collect();
        if parts.len() != 2 {
            return Err(IdentifierError::CompositeSegments {
                raw: raw.to_string(),
                count: parts.len(),
            });
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err(IdentifierError::EmptyCompositePart {
                raw: raw.to_string(),
            });
        }

        let wrap = |inner| IdentifierError::CompositePart {
            raw: raw.to_string(),
            inner: Box::new(inner),
        };
        let first = ResourceIdentifier::parse(parts[0]).map_err(wrap)?;
        let second = ResourceIdentifier::parse(parts[1]).map_err(wrap)?;
        Ok(Self { first, second })
    }
}

impl fmt::Display for CompositeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.first, COMPOSITE_SEPARATOR, self.second)
    }
}

impl std::str::FromStr for CompositeIdentifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NIC: &str = "/subscriptions/0000/resourceGroups/rg1/providers/Microsoft.Network/networkInterfaces/nic1";
    const ASG: &str = "/subscriptions/0000/resourceGroups/rg1/providers/Microsoft.Network/applicationSecurityGroups/asg1";

    #[test]
    fn parse_round_trips() {
        let ids = [
            "/subscriptions/0000",
            "/subscriptions/0000/resourceGroups/rg1",
            NIC,
            "/subscriptions/0000/resourceGroups/rg1/providers/Microsoft.Compute/hostGroups/group1/hosts/host1",
            "/subscriptions/0000/resourceGroups/rg1/providers/Microsoft.Devices/ProvisioningServices/dps1",
        ];
        for raw in ids {
            let id = ResourceIdentifier::parse(raw).unwrap();
            assert_eq!(id.to_string(), raw);
        }
    }

    #[test]
    fn accessors() {
        let id = ResourceIdentifier::parse(
            "/subscriptions/0000/resourceGroups/rg1/providers/Microsoft.Compute/hostGroups/group1/hosts/host1",
        )
        .unwrap();

        assert_eq!(id.subscription_id(), "0000");
        assert_eq!(id.resource_group_name(), Some("rg1"));
        assert_eq!(id.namespace(), Some("Microsoft.Compute"));
        assert_eq!(id.get("hostgroups"), Some("group1"));
        assert_eq!(id.name(), "host1");
        assert_eq!(id.kind(), "hosts");
        assert!(matches!(
            id.require("automationAccounts"),
            Err(IdentifierError::MissingSegment { key, .. }) if key == "automationAccounts"
        ));
    }

    #[test]
    fn builder_matches_parse() {
        let built = ResourceIdentifier::subscription("0000")
            .resource_group("rg1")
            .provider("Microsoft.Network")
            .child("networkInterfaces", "nic1");
        assert_eq!(built, ResourceIdentifier::parse(NIC).unwrap());
    }

    #[test]
    fn parent_skips_provider_segment() {
        let host = ResourceIdentifier::subscription("0000")
            .resource_group("rg1")
            .provider("Microsoft.Compute")
            .child("hostGroups", "group1")
            .child("hosts", "host1");

        let group = host.parent().unwrap();
        assert_eq!(group.name(), "group1");

        let rg = group.parent().unwrap();
        assert_eq!(rg.to_string(), "/subscriptions/0000/resourceGroups/rg1");
        assert_eq!(
            rg.parent().unwrap().to_string(),
            "/subscriptions/0000"
        );
        assert!(rg.parent().unwrap().parent().is_none());
    }

    #[test]
    fn parse_rejects_malformed() {
        assert_eq!(ResourceIdentifier::parse(""), Err(IdentifierError::Empty));
        assert!(matches!(
            ResourceIdentifier::parse("subscriptions/0000"),
            Err(IdentifierError::MissingLeadingSlash { .. })
        ));
        assert!(matches!(
            ResourceIdentifier::parse("/subscriptions/0000/resourceGroups"),
            Err(IdentifierError::OddSegments { .. })
        ));
        assert!(matches!(
            ResourceIdentifier::parse("/subscriptions/0000/"),
            Err(IdentifierError::EmptySegment { .. })
        ));
        assert!(matches!(
            ResourceIdentifier::parse("/resourceGroups/rg1"),
            Err(IdentifierError::MissingSubscription { .. })
        ));
    }

    #[test]
    fn composite_round_trips() {
        let raw = format!("{}|{}", NIC, ASG);
        let composite = CompositeIdentifier::parse(&raw).unwrap();
        assert_eq!(composite.first.to_string(), NIC);
        assert_eq!(composite.second.to_string(), ASG);
        assert_eq!(composite.to_string(), raw);

        let joined = CompositeIdentifier::new(
            ResourceIdentifier::parse(NIC).unwrap(),
            ResourceIdentifier::parse(ASG).unwrap(),
        );
        assert_eq!(CompositeIdentifier::parse(&joined.to_string()).unwrap(), joined);
    }

    #[test]
    fn composite_requires_exactly_two_segments() {
        let inputs = [
            (String::new(), 1),
            (NIC.to_string(), 1),
            (format!("{}|{}|{}", NIC, ASG, ASG), 3),
            (format!("{}|{}|{}|{}", NIC, ASG, NIC, ASG), 4),
        ];
        for (raw, expected) in inputs {
            match CompositeIdentifier::parse(&raw) {
                Err(IdentifierError::CompositeSegments { count, .. }) => assert_eq!(count, expected),
                other => panic!("expected segment count error for '{}', got {:?}", raw, other),
            }
        }
    }

    #[test]
    fn composite_rejects_empty_or_malformed_halves() {
        assert!(matches!(
            CompositeIdentifier::parse(&format!("{}|", NIC)),
            Err(IdentifierError::EmptyCompositePart { .. })
        ));
        assert!(matches!(
            CompositeIdentifier::parse("|"),
            Err(IdentifierError::EmptyCompositePart { .. })
        ));
        assert!(matches!(
            CompositeIdentifier::parse(&format!("{}|asg1", NIC)),
            Err(IdentifierError::CompositePart { .. })
        ));
    }
}
