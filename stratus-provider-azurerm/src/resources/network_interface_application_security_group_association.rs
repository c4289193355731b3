//! Network Interface <-> Application Security Group association
//!
//! The association has no identity of its own: it is an entry in the
//! `applicationSecurityGroups` list of each of the NIC's IP configurations.
//! Its identifier is `{networkInterfaceId}|{applicationSecurityGroupId}`.

use std::collections::HashMap;

use serde_json::{Value as Json, json};
use stratus_core::identifier::{CompositeIdentifier, ResourceIdentifier};
use stratus_core::lock::LockKey;
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::resource::{Attributes, Resource, State, Value};
use stratus_core::schema::{AttributeSchema, ResourceSchema, types};

use crate::lifecycle::{AssociationKind, describe};
use crate::utils::ids_equal;

use super::{NETWORK_API_VERSION, NETWORK_INTERFACE_LOCK};

pub const TYPE_NAME: &str = "network_interface_application_security_group_association";

pub struct NetworkInterfaceAsgAssociation;

fn ip_configurations<'a>(nic: &'a Json, nic_id: &str) -> ProviderResult<&'a Vec<Json>> {
    let props = nic.get("properties").filter(|p| p.is_object()).ok_or_else(|| {
        ProviderError::api(format!("`properties` was nil for Network Interface {}", nic_id))
    })?;
    props
        .get("ipConfigurations")
        .and_then(Json::as_array)
        .ok_or_else(|| {
            ProviderError::api(format!(
                "`properties.ipConfigurations` was nil for Network Interface {}",
                nic_id
            ))
        })
}

fn ip_configurations_mut<'a>(nic: &'a mut Json, nic_id: &str) -> ProviderResult<&'a mut Vec<Json>> {
    nic.get_mut("properties")
        .and_then(|p| p.get_mut("ipConfigurations"))
        .and_then(Json::as_array_mut)
        .ok_or_else(|| {
            ProviderError::api(format!(
                "`properties.ipConfigurations` was nil for Network Interface {}",
                nic_id
            ))
        })
}

fn group_ids(ip_configuration: &Json) -> impl Iterator<Item = &str> {
    ip_configuration
        .pointer("/properties/applicationSecurityGroups")
        .and_then(Json::as_array)
        .into_iter()
        .flatten()
        .filter_map(|g| g.get("id").and_then(Json::as_str))
}

fn nic_id(nic: &Json) -> &str {
    nic.get("id").and_then(Json::as_str).unwrap_or("<unknown>")
}

impl AssociationKind for NetworkInterfaceAsgAssociation {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn parent_display_name(&self) -> &'static str {
        "Network Interface"
    }

    fn parent_api_version(&self) -> &'static str {
        NETWORK_API_VERSION
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(TYPE_NAME)
            .with_description("Associates an Application Security Group with every IP configuration of a Network Interface")
            .attribute(
                AttributeSchema::new("network_interface_id", types::resource_id())
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("application_security_group_id", types::resource_id())
                    .required()
                    .force_new(),
            )
    }

    fn schema_version(&self) -> u32 {
        1
    }

    fn parse_config(
        &self,
        resource: &Resource,
    ) -> ProviderResult<(ResourceIdentifier, ResourceIdentifier)> {
        let nic = ResourceIdentifier::parse(resource.require_str("network_interface_id")?)?;
        nic.require("networkInterfaces")?;
        let asg = ResourceIdentifier::parse(resource.require_str("application_security_group_id")?)?;
        Ok((nic, asg))
    }

    fn lock_key(&self, parent: &ResourceIdentifier) -> LockKey {
        LockKey::new(NETWORK_INTERFACE_LOCK, parent.name())
    }

    fn contains(&self, parent: &Json, member_id: &str) -> ProviderResult<bool> {
        let configs = ip_configurations(parent, nic_id(parent))?;
        Ok(configs
            .iter()
            .any(|c| group_ids(c).any(|id| ids_equal(id, member_id))))
    }

    fn add_member(&self, parent: &mut Json, member_id: &str) -> ProviderResult<()> {
        let id = nic_id(parent).to_string();
        for config in ip_configurations_mut(parent, &id)? {
            let Some(props) = config.get_mut("properties").and_then(Json::as_object_mut) else {
                continue;
            };
            let groups = props
                .entry("applicationSecurityGroups")
                .or_insert_with(|| json!([]));
            if !groups.is_array() {
                *groups = json!([]);
            }
            if let Some(groups) = groups.as_array_mut()
                && !groups
                    .iter()
                    .any(|g| g.get("id").and_then(Json::as_str).is_some_and(|id| ids_equal(id, member_id)))
            {
                groups.push(json!({ "id": member_id }));
            }
        }
        Ok(())
    }

    fn remove_member(&self, parent: &mut Json, member_id: &str) -> ProviderResult<bool> {
        let id = nic_id(parent).to_string();
        let mut changed = false;
        for config in ip_configurations_mut(parent, &id)? {
            if let Some(groups) = config
                .pointer_mut("/properties/applicationSecurityGroups")
                .and_then(Json::as_array_mut)
            {
                let before = groups.len();
                groups.retain(|g| {
                    !g.get("id")
                        .and_then(Json::as_str)
                        .is_some_and(|id| ids_equal(id, member_id))
                });
                changed |= groups.len() != before;
            }
        }
        Ok(changed)
    }

    fn flatten(&self, id: &CompositeIdentifier) -> HashMap<String, Value> {
        let mut attributes = HashMap::new();
        attributes.insert(
            "network_interface_id".to_string(),
            Value::String(id.first.to_string()),
        );
        attributes.insert(
            "application_security_group_id".to_string(),
            Value::String(id.second.to_string()),
        );
        attributes
    }

    /// Version 0 stored the IP configuration name and a different ID layout
    fn upgrade_state(&self, mut state: State, from_version: u32) -> ProviderResult<State> {
        if from_version >= 1 {
            return Ok(state);
        }

        let nic = ResourceIdentifier::parse(state.require_str("network_interface_id")?)?;
        let asg = ResourceIdentifier::parse(state.require_str("application_security_group_id")?)?;
        let composite = CompositeIdentifier::new(nic, asg);

        log::info!(
            "Upgrading {} state to version 1 ({})",
            TYPE_NAME,
            describe(self.parent_display_name(), &composite.first)
        );
        state.attributes.remove("ip_configuration_name");
        state.identifier = Some(composite.to_string());
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use stratus_core::provider::ErrorKind;
    use stratus_core::resource::ResourceId;

    use crate::lifecycle::{Association, ResourceHandler};
    use crate::testing::{FakeClient, context};

    const NIC: &str = "/subscriptions/0000/resourceGroups/rg1/providers/Microsoft.Network/networkInterfaces/nic1";
    const ASG1: &str = "/subscriptions/0000/resourceGroups/rg1/providers/Microsoft.Network/applicationSecurityGroups/asg1";
    const ASG2: &str = "/subscriptions/0000/resourceGroups/rg1/providers/Microsoft.Network/applicationSecurityGroups/asg2";

    fn nic(groups: &[&str]) -> Json {
        let groups: Vec<Json> = groups.iter().map(|g| json!({ "id": g })).collect();
        json!({
            "id": NIC,
            "name": "nic1",
            "location": "westeurope",
            "properties": {
                "ipConfigurations": [{
                    "name": "internal",
                    "properties": {
                        "privateIPAllocationMethod": "Dynamic",
                        "applicationSecurityGroups": groups
                    }
                }]
            }
        })
    }

    fn groups_of(body: &Json) -> Vec<String> {
        group_ids(&body["properties"]["ipConfigurations"][0])
            .map(str::to_string)
            .collect()
    }

    fn association(asg: &str) -> Resource {
        Resource::new(TYPE_NAME, "example")
            .with_attribute("network_interface_id", NIC)
            .with_attribute("application_security_group_id", asg)
    }

    fn handler() -> Association<NetworkInterfaceAsgAssociation> {
        Association(NetworkInterfaceAsgAssociation)
    }

    #[tokio::test]
    async fn create_appends_group_and_sets_composite_id() {
        let client = Arc::new(FakeClient::new());
        client.insert(NIC, nic(&[]));
        let ctx = context(client.clone());

        let state = handler().create(&ctx, &association(ASG1)).await.unwrap();

        assert!(state.exists);
        assert_eq!(state.identifier, Some(format!("{}|{}", NIC, ASG1)));
        assert_eq!(state.get_str("application_security_group_id"), Some(ASG1));
        assert_eq!(groups_of(&client.resource(NIC).unwrap()), vec![ASG1]);
        assert_eq!(client.puts().len(), 1);
    }

    #[tokio::test]
    async fn create_existing_membership_is_import_collision() {
        let client = Arc::new(FakeClient::new());
        client.insert(NIC, nic(&[ASG1]));
        let ctx = context(client.clone());

        let err = handler().create(&ctx, &association(ASG1)).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::ImportCollision);
        assert!(err.message.contains(&format!("{}|{}", NIC, ASG1)));
        assert!(client.puts().is_empty());
    }

    #[tokio::test]
    async fn create_without_nic_fails() {
        let client = Arc::new(FakeClient::new());
        let ctx = context(client.clone());

        let err = handler().create(&ctx, &association(ASG1)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(err.message.contains("Network Interface \"nic1\""));
        assert!(client.puts().is_empty());
    }

    #[tokio::test]
    async fn create_rejects_nic_without_ip_configurations() {
        let client = Arc::new(FakeClient::new());
        client.insert(NIC, json!({ "id": NIC, "properties": {} }));
        let ctx = context(client.clone());

        let err = handler().create(&ctx, &association(ASG1)).await.unwrap_err();
        assert!(err.message.contains("ipConfigurations"));
    }

    #[tokio::test]
    async fn create_rejects_malformed_ids() {
        let client = Arc::new(FakeClient::new());
        let ctx = context(client.clone());

        let err = handler()
            .create(&ctx, &association("asg1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedIdentifier);
        assert!(err.message.contains("application_security_group_id"));
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_only_this_group() {
        let client = Arc::new(FakeClient::new());
        client.insert(NIC, nic(&[ASG1, ASG2]));
        let ctx = context(client.clone());
        let id = ResourceId::new(TYPE_NAME, "example");
        let identifier = format!("{}|{}", NIC, ASG1);

        handler().delete(&ctx, &id, &identifier).await.unwrap();

        assert_eq!(groups_of(&client.resource(NIC).unwrap()), vec![ASG2]);
        assert!(ctx.locks.try_acquire(LockKey::new(NETWORK_INTERFACE_LOCK, "nic1")).is_some());
    }

    #[tokio::test]
    async fn delete_twice_succeeds() {
        let client = Arc::new(FakeClient::new());
        client.insert(NIC, nic(&[ASG1]));
        let ctx = context(client.clone());
        let id = ResourceId::new(TYPE_NAME, "example");
        let identifier = format!("{}|{}", NIC, ASG1);

        handler().delete(&ctx, &id, &identifier).await.unwrap();
        handler().delete(&ctx, &id, &identifier).await.unwrap();

        assert_eq!(client.puts().len(), 1);
    }

    #[tokio::test]
    async fn delete_with_missing_nic_succeeds() {
        let client = Arc::new(FakeClient::new());
        let ctx = context(client.clone());
        let id = ResourceId::new(TYPE_NAME, "example");

        handler()
            .delete(&ctx, &id, &format!("{}|{}", NIC, ASG1))
            .await
            .unwrap();
        assert!(client.puts().is_empty());
    }

    #[tokio::test]
    async fn read_after_remote_deletion_clears_state() {
        let client = Arc::new(FakeClient::new());
        let ctx = context(client.clone());
        let id = ResourceId::new(TYPE_NAME, "example");

        let state = handler()
            .read(&ctx, &id, &format!("{}|{}", NIC, ASG1))
            .await
            .unwrap();
        assert!(!state.exists);
        assert!(state.identifier.is_none());

        client.insert(NIC, nic(&[ASG2]));
        let state = handler()
            .read(&ctx, &id, &format!("{}|{}", NIC, ASG1))
            .await
            .unwrap();
        assert!(!state.exists);
    }

    #[tokio::test]
    async fn read_matches_ids_case_insensitively() {
        let client = Arc::new(FakeClient::new());
        let lowercase = ASG1.to_lowercase();
        client.insert(NIC, nic(&[lowercase.as_str()]));
        let ctx = context(client.clone());
        let id = ResourceId::new(TYPE_NAME, "example");

        let state = handler()
            .read(&ctx, &id, &format!("{}|{}", NIC, ASG1))
            .await
            .unwrap();
        assert!(state.exists);
    }

    #[tokio::test]
    async fn malformed_composite_is_rejected_without_calls() {
        let client = Arc::new(FakeClient::new());
        let ctx = context(client.clone());
        let id = ResourceId::new(TYPE_NAME, "example");

        for identifier in [NIC.to_string(), format!("{}|{}|{}", NIC, ASG1, ASG2)] {
            let err = handler().delete(&ctx, &id, &identifier).await.unwrap_err();
            assert_eq!(err.kind, ErrorKind::MalformedIdentifier);
        }
        assert!(client.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_creates_on_same_nic_keep_both_groups() {
        let client = Arc::new(FakeClient::new().with_put_delay(Duration::from_millis(50)));
        client.insert(NIC, nic(&[]));
        let ctx = Arc::new(context(client.clone()));

        let first = {
            let ctx = ctx.clone();
            tokio::spawn(async move { handler().create(&ctx, &association(ASG1)).await })
        };
        let second = {
            let ctx = ctx.clone();
            tokio::spawn(async move { handler().create(&ctx, &association(ASG2)).await })
        };
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let mut groups = groups_of(&client.resource(NIC).unwrap());
        groups.sort();
        assert_eq!(groups, vec![ASG1, ASG2]);

        // each read-modify-write saw the previous write
        let puts = client.puts();
        assert_eq!(puts.len(), 2);
        assert_eq!(groups_of(&puts[0].1).len(), 1);
        assert_eq!(groups_of(&puts[1].1).len(), 2);
    }

    #[test]
    fn upgrade_from_v0_rebuilds_identifier() {
        let mut attributes = HashMap::new();
        attributes.insert("network_interface_id".to_string(), Value::from(NIC));
        attributes.insert("application_security_group_id".to_string(), Value::from(ASG1));
        attributes.insert("ip_configuration_name".to_string(), Value::from("internal"));
        let state = State::existing(ResourceId::new(TYPE_NAME, "example"), attributes)
            .with_identifier(format!("{}/ipConfigurations/internal|{}", NIC, ASG1));

        let upgraded = handler().upgrade_state(state, 0).unwrap();

        assert_eq!(upgraded.identifier, Some(format!("{}|{}", NIC, ASG1)));
        assert!(!upgraded.attributes.contains_key("ip_configuration_name"));
        assert_eq!(handler().schema_version(), 1);
    }

    #[test]
    fn contains_checks_every_ip_configuration() {
        let mut body = nic(&[]);
        body["properties"]["ipConfigurations"]
            .as_array_mut()
            .unwrap()
            .push(json!({
                "name": "secondary",
                "properties": { "applicationSecurityGroups": [{ "id": ASG2 }] }
            }));

        assert!(NetworkInterfaceAsgAssociation.contains(&body, ASG2).unwrap());
        assert!(!NetworkInterfaceAsgAssociation.contains(&body, ASG1).unwrap());
    }
}
