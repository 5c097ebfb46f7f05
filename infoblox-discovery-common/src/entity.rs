//! Discovered inventory entities.
//!
//! Every entity has a stable identifier (the scrape target) and a label
//! projection. Entities are built by factories from raw WAPI payloads and
//! the name of the source they were discovered on.

use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::category::Category;
use crate::error::{Error, Result};

/// Prefix for labels published in service discovery records.
pub const META_LABEL_PREFIX: &str = "__meta_infoblox_";

/// Attribute carrying the name of the source an entity was discovered on.
pub const SOURCE_ATTRIBUTE: &str = "master";

/// Build the service discovery label name for an entity attribute.
pub fn meta_label_name(attribute: &str) -> String {
    format!("{}{}", META_LABEL_PREFIX, attribute)
}

/// A Prometheus service discovery record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdTarget {
    pub targets: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

/// An Infoblox grid member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub host_name: String,
    pub enable_ha: bool,
    pub source: String,
}

/// One node of an HA member, addressed by its management LAN IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub ip: String,
    pub ha_node_of: String,
    pub source: String,
}

/// An authoritative DNS zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    pub name: String,
    pub source: String,
}

/// A member serving DNS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsServer {
    pub host_name: String,
    pub source: String,
}

/// A DHCP range identified by its network CIDR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpRange {
    pub network: String,
    pub source: String,
}

/// A named web endpoint found in a monitored network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebEndpoint {
    pub alias: String,
    pub ip_address: String,
    pub network: String,
    pub source: String,
}

/// Any discovered entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    Member(Member),
    Node(Node),
    Zone(Zone),
    DnsServer(DnsServer),
    DhcpRange(DhcpRange),
    WebEndpoint(WebEndpoint),
}

impl Entity {
    /// The identifier used as scrape target and for set membership.
    pub fn id(&self) -> &str {
        match self {
            Entity::Member(m) => &m.host_name,
            Entity::Node(n) => &n.ip,
            Entity::Zone(z) => &z.name,
            Entity::DnsServer(d) => &d.host_name,
            Entity::DhcpRange(r) => &r.network,
            Entity::WebEndpoint(w) => &w.alias,
        }
    }

    /// The category this entity is cached under.
    pub fn category(&self) -> Category {
        match self {
            Entity::Member(_) => Category::Members,
            Entity::Node(_) => Category::Nodes,
            Entity::Zone(_) => Category::Zones,
            Entity::DnsServer(_) => Category::DnsServers,
            Entity::DhcpRange(_) => Category::DhcpRanges,
            Entity::WebEndpoint(_) => Category::WebEndpoints,
        }
    }

    /// Name of the source the entity was discovered on.
    pub fn source(&self) -> &str {
        match self {
            Entity::Member(m) => &m.source,
            Entity::Node(n) => &n.source,
            Entity::Zone(z) => &z.source,
            Entity::DnsServer(d) => &d.source,
            Entity::DhcpRange(r) => &r.source,
            Entity::WebEndpoint(w) => &w.source,
        }
    }

    /// Label projection, keyed by plain attribute name.
    pub fn attributes(&self) -> Vec<(&'static str, String)> {
        let mut attrs = vec![(SOURCE_ATTRIBUTE, self.source().to_string())];
        match self {
            Entity::Member(m) => attrs.push(("enable_ha", m.enable_ha.to_string())),
            Entity::Node(n) => attrs.push(("ha_node_of", n.ha_node_of.clone())),
            Entity::WebEndpoint(w) => {
                attrs.push(("ip_address", w.ip_address.clone()));
                attrs.push(("network", w.network.clone()));
            }
            Entity::Zone(_) | Entity::DnsServer(_) | Entity::DhcpRange(_) => {}
        }
        attrs
    }

    /// Service discovery labels.
    ///
    /// Zone records carry their attributes as plain labels; every other
    /// category uses the `__meta_infoblox_` prefix.
    pub fn labels(&self) -> BTreeMap<String, String> {
        let plain = matches!(self, Entity::Zone(_));
        self.attributes()
            .into_iter()
            .map(|(k, v)| {
                let name = if plain { k.to_string() } else { meta_label_name(k) };
                (name, v)
            })
            .collect()
    }

    /// Convert to a service discovery record.
    pub fn to_sd_target(&self) -> SdTarget {
        SdTarget {
            targets: vec![self.id().to_string()],
            labels: self.labels(),
        }
    }
}

macro_rules! impl_from_entity {
    ($($variant:ident),*) => {
        $(impl From<$variant> for Entity {
            fn from(value: $variant) -> Self {
                Entity::$variant(value)
            }
        })*
    };
}

impl_from_entity!(Member, Node, Zone, DnsServer, DhcpRange, WebEndpoint);

/// Extract the extensible attributes of a WAPI object as plain strings.
///
/// WAPI returns `extattrs` as `{"name": {"value": ...}}`. String values are
/// kept verbatim; other JSON values are kept in their JSON text form so that
/// a boolean `true` never equals the literal `"True"`.
pub fn extensible_attributes(payload: &Value) -> HashMap<String, String> {
    let Some(extattrs) = payload.get("extattrs").and_then(Value::as_object) else {
        return HashMap::new();
    };

    extattrs
        .iter()
        .filter_map(|(name, attr)| {
            let value = attr.get("value")?;
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some((name.clone(), text))
        })
        .collect()
}

fn required_str<'a>(payload: &'a Value, field: &str, kind: &'static str) -> Result<&'a str> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::payload(kind, format!("missing string field '{}'", field)))
}

impl Member {
    /// Build a member from a WAPI `member` object.
    pub fn from_payload(payload: &Value, source: &str) -> Result<Self> {
        let host_name = required_str(payload, "host_name", "member")?;
        let enable_ha = match payload.get("enable_ha") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        };

        Ok(Self {
            host_name: host_name.to_string(),
            enable_ha,
            source: source.to_string(),
        })
    }

    /// HA nodes listed in the member's `node_info`.
    ///
    /// Returns no nodes unless HA is enabled on the member.
    pub fn nodes(&self, payload: &Value) -> Result<Vec<Node>> {
        if !self.enable_ha {
            return Ok(Vec::new());
        }

        let Some(node_info) = payload.get("node_info").and_then(Value::as_array) else {
            return Ok(Vec::new());
        };

        node_info
            .iter()
            .map(|info| Node::from_payload(info, &self.host_name, &self.source))
            .collect()
    }

    /// The DNS server entry for this member, if it runs a working DNS service.
    pub fn dns_server(&self, payload: &Value) -> Option<DnsServer> {
        let services = payload.get("service_status")?.as_array()?;
        let serves_dns = services.iter().any(|s| {
            s.get("service").and_then(Value::as_str) == Some("DNS")
                && s.get("status").and_then(Value::as_str) == Some("WORKING")
        });

        serves_dns.then(|| DnsServer {
            host_name: self.host_name.clone(),
            source: self.source.clone(),
        })
    }
}

impl Node {
    /// Build a node from one `node_info` element of a member.
    pub fn from_payload(payload: &Value, member_host_name: &str, source: &str) -> Result<Self> {
        let ip = payload
            .get("lan_ha_port_setting")
            .and_then(|s| s.get("mgmt_lan"))
            .and_then(Value::as_str)
            .ok_or_else(|| Error::payload("node", "missing lan_ha_port_setting.mgmt_lan"))?;

        Ok(Self {
            ip: ip.to_string(),
            ha_node_of: member_host_name.to_string(),
            source: source.to_string(),
        })
    }
}

impl Zone {
    /// Build a zone from a WAPI `zone_auth` object.
    ///
    /// Reverse zones are stored by WAPI as a CIDR; they are published under
    /// their reverse-lookup name.
    pub fn from_payload(payload: &Value, source: &str) -> Result<Self> {
        let fqdn = required_str(payload, "fqdn", "zone")?;
        let name = if fqdn.contains('/') {
            reverse_zone_name(fqdn)?
        } else {
            fqdn.to_string()
        };

        Ok(Self {
            name,
            source: source.to_string(),
        })
    }

    /// Whether the zone is disabled upstream.
    pub fn is_disabled(payload: &Value) -> bool {
        payload
            .get("disable")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

impl DhcpRange {
    /// Build a range from a WAPI `range` object.
    pub fn from_payload(payload: &Value, source: &str) -> Result<Self> {
        let network = required_str(payload, "network", "dhcp range")?;
        Ok(Self {
            network: network.to_string(),
            source: source.to_string(),
        })
    }

    /// Prefix length of the range's network, if the CIDR is well formed.
    pub fn prefix_len(&self) -> Option<u8> {
        self.network.split_once('/')?.1.parse().ok()
    }
}

impl WebEndpoint {
    /// Build the endpoints of one WAPI `ipv4address` object.
    ///
    /// Every DNS name bound to the address becomes its own endpoint.
    pub fn from_payload(payload: &Value, network: &str, source: &str) -> Result<Vec<Self>> {
        let ip_address = required_str(payload, "ip_address", "web endpoint")?;
        let names = payload
            .get("names")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect::<Vec<_>>())
            .unwrap_or_default();

        Ok(names
            .into_iter()
            .map(|alias| Self {
                alias: alias.to_string(),
                ip_address: ip_address.to_string(),
                network: network.to_string(),
                source: source.to_string(),
            })
            .collect())
    }
}

/// Compute the reverse-lookup zone name of a CIDR network.
///
/// IPv4 networks that do not end on an octet boundary use the classless
/// `first-last` notation for the partial octet.
pub fn reverse_zone_name(cidr: &str) -> Result<String> {
    let invalid = || Error::payload("zone", format!("invalid network '{}'", cidr));

    let (addr, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
    let prefix: u32 = prefix.parse().map_err(|_| invalid())?;
    let addr: IpAddr = addr.parse().map_err(|_| invalid())?;

    match addr {
        IpAddr::V4(v4) if prefix <= 32 => Ok(reverse_v4(v4, prefix)),
        IpAddr::V6(v6) if prefix <= 128 => Ok(reverse_v6(v6, prefix)),
        _ => Err(invalid()),
    }
}

fn reverse_v4(addr: Ipv4Addr, prefix: u32) -> String {
    let octets = addr.octets();
    let full = (prefix / 8) as usize;
    let mut parts: Vec<String> = octets[..full].iter().map(|o| o.to_string()).collect();

    let rest = prefix % 8;
    if rest != 0 {
        let mask = 0xffu8 << (8 - rest);
        let first = octets[full] & mask;
        let last = first | !mask;
        parts.push(format!("{}-{}", first, last));
    }

    parts.reverse();
    parts.push("in-addr.arpa.".to_string());
    parts.join(".")
}

fn reverse_v6(addr: Ipv6Addr, prefix: u32) -> String {
    let nibbles: Vec<String> = addr
        .octets()
        .iter()
        .flat_map(|b| [b >> 4, b & 0x0f])
        .take((prefix / 4) as usize)
        .map(|n| format!("{:x}", n))
        .collect();

    let mut parts: Vec<String> = nibbles.into_iter().rev().collect();
    parts.push("ip6.arpa.".to_string());
    parts.join(".")
}
