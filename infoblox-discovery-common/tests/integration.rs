//! Integration tests for infoblox-discovery-common library.

use infoblox_discovery_common::{
    Category, Entity, Member, SdTarget, Zone, extensible_attributes,
};
use serde_json::json;

#[test]
fn test_member_payload_to_sd_records() {
    let payload = json!({
        "host_name": "gm.example.com",
        "enable_ha": true,
        "node_info": [
            {"lan_ha_port_setting": {"mgmt_lan": "192.168.1.10"}},
            {"lan_ha_port_setting": {"mgmt_lan": "192.168.1.11"}}
        ],
        "service_status": [{"service": "DNS", "status": "WORKING"}],
        "extattrs": {"site": {"value": "Stockholm"}}
    });

    let member = Member::from_payload(&payload, "ib1").expect("member");
    let nodes = member.nodes(&payload).expect("nodes");
    let dns = member.dns_server(&payload).expect("dns server");

    let mut entities: Vec<Entity> = vec![member.into()];
    entities.extend(nodes.into_iter().map(Entity::from));
    entities.push(dns.into());

    let categories: Vec<Category> = entities.iter().map(Entity::category).collect();
    assert_eq!(
        categories,
        vec![
            Category::Members,
            Category::Nodes,
            Category::Nodes,
            Category::DnsServers
        ]
    );

    let records: Vec<SdTarget> = entities.iter().map(Entity::to_sd_target).collect();
    assert_eq!(records[1].targets, vec!["192.168.1.10"]);
    assert_eq!(
        records[1].labels.get("__meta_infoblox_ha_node_of"),
        Some(&"gm.example.com".to_string())
    );

    // Records serialize as the file SD shape
    let json = serde_json::to_value(&records[0]).unwrap();
    assert_eq!(json["targets"], json!(["gm.example.com"]));
    assert_eq!(json["labels"]["__meta_infoblox_enable_ha"], json!("true"));

    assert_eq!(
        extensible_attributes(&payload).get("site").map(String::as_str),
        Some("Stockholm")
    );
}

#[test]
fn test_identity_ignores_attributes() {
    let a = Entity::from(Zone {
        name: "example.com".to_string(),
        source: "ib1".to_string(),
    });
    let b = Entity::from(Zone {
        name: "example.com".to_string(),
        source: "ib2".to_string(),
    });

    assert_eq!(a.id(), b.id());
    assert_ne!(a.labels(), b.labels());
}

#[test]
fn test_categories_in_config() {
    #[derive(serde::Deserialize)]
    struct Discovery {
        discovery: Vec<Category>,
    }

    let config: Discovery =
        json5::from_str(r#"{ discovery: ["members", "dhcp_ranges"] }"#).unwrap();
    assert_eq!(
        config.discovery,
        vec![Category::Members, Category::DhcpRanges]
    );

    let result: Result<Discovery, _> = json5::from_str(r#"{ discovery: ["printers"] }"#);
    assert!(result.is_err());
}
