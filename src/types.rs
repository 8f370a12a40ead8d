//! Typed views of EC2 response records.
//!
//! The raw response is the nested map a Query endpoint produces after XML
//! decoding. That shape has two habits every decoder here tolerates: empty
//! collections are omitted entirely, and list fields arrive wrapped as
//! `{"item": [...]}` with a lone element flattened to a bare object. Every
//! field is optional or defaulted so a sparse response never errors.

use crate::error::{self, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use snafu::ResultExt;

/// Unwraps AWS's list shapes at the `Value` level: a plain array, the
/// `{"item": ...}` set wrapper (single entry flattened to a bare object),
/// or nothing at all.
pub(crate) fn item_values(value: Option<&Value>) -> Vec<Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Object(map)) => match map.get("item") {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Null) | None => {
                // an object without the set wrapper is a single bare record
                if map.contains_key("item") {
                    Vec::new()
                } else {
                    vec![Value::Object(map.clone())]
                }
            }
            Some(single) => vec![single.clone()],
        },
        Some(_) => Vec::new(),
    }
}

/// serde adapter over [`item_values`] for list-valued record fields.
fn item_set<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    item_values(raw.as_ref())
        .into_iter()
        .map(|value| serde_json::from_value(value).map_err(serde::de::Error::custom))
        .collect()
}

/// Booleans arrive as the strings `"true"`/`"false"` after XML decoding.
fn string_bool<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Bool(value)) => Ok(Some(value)),
        Some(Value::String(value)) => Ok(Some(value == "true")),
        _ => Ok(None),
    }
}

/// Numbers likewise arrive as strings more often than not.
fn string_i64<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(value)) => Ok(value.as_i64()),
        Some(Value::String(value)) => Ok(value.parse().ok()),
        _ => Ok(None),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Tag {
    pub key: Option<String>,
    pub value: Option<String>,
}

/// A machine image.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Image {
    pub image_id: Option<String>,
    pub image_location: Option<String>,
    pub image_state: Option<String>,
    pub image_owner_id: Option<String>,
    #[serde(deserialize_with = "string_bool")]
    pub is_public: Option<bool>,
    pub architecture: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub root_device_type: Option<String>,
    pub root_device_name: Option<String>,
    #[serde(deserialize_with = "item_set")]
    pub tag_set: Vec<Tag>,
}

/// An elastic IP address.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Address {
    pub public_ip: Option<String>,
    pub allocation_id: Option<String>,
    pub association_id: Option<String>,
    pub domain: Option<String>,
    pub instance_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IpRange {
    pub cidr_ip: Option<String>,
}

/// A permission rule as it comes back from a describe call. Distinct from
/// the request-side [`IpPermission`](crate::IpPermission) composite, which
/// owns the wire encoding.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IpPermissionView {
    pub ip_protocol: Option<String>,
    #[serde(deserialize_with = "string_i64")]
    pub from_port: Option<i64>,
    #[serde(deserialize_with = "string_i64")]
    pub to_port: Option<i64>,
    #[serde(deserialize_with = "item_set")]
    pub ip_ranges: Vec<IpRange>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecurityGroup {
    pub owner_id: Option<String>,
    pub group_id: Option<String>,
    pub group_name: Option<String>,
    pub group_description: Option<String>,
    pub vpc_id: Option<String>,
    #[serde(deserialize_with = "item_set")]
    pub ip_permissions: Vec<IpPermissionView>,
    #[serde(deserialize_with = "item_set")]
    pub tag_set: Vec<Tag>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Route {
    pub destination_cidr_block: Option<String>,
    pub gateway_id: Option<String>,
    pub instance_id: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RouteTable {
    pub route_table_id: Option<String>,
    pub vpc_id: Option<String>,
    #[serde(rename = "routeSet", deserialize_with = "item_set")]
    pub routes: Vec<Route>,
    #[serde(deserialize_with = "item_set")]
    pub tag_set: Vec<Tag>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DhcpOptions {
    pub dhcp_options_id: Option<String>,
    #[serde(deserialize_with = "item_set")]
    pub tag_set: Vec<Tag>,
}

/// A reserved instance purchase.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReservedInstances {
    pub reserved_instances_id: Option<String>,
    pub instance_type: Option<String>,
    pub availability_zone: Option<String>,
    pub start: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "string_i64")]
    pub duration: Option<i64>,
    #[serde(deserialize_with = "string_i64")]
    pub instance_count: Option<i64>,
    pub state: Option<String>,
}

/// The closed set of record types a decode strategy can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Image,
    Address,
    SecurityGroup,
    RouteTable,
    DhcpOptions,
    ReservedInstances,
}

/// A decoded record, tagged by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Image(Image),
    Address(Address),
    SecurityGroup(SecurityGroup),
    RouteTable(RouteTable),
    DhcpOptions(DhcpOptions),
    ReservedInstances(ReservedInstances),
}

impl ResourceKind {
    /// Decodes one raw record into its typed form.
    pub fn decode(self, raw: &Value) -> Result<Resource> {
        match self {
            ResourceKind::Image => serde_json::from_value(raw.clone())
                .map(Resource::Image)
                .context(error::Decode { kind: "Image" }),
            ResourceKind::Address => serde_json::from_value(raw.clone())
                .map(Resource::Address)
                .context(error::Decode { kind: "Address" }),
            ResourceKind::SecurityGroup => serde_json::from_value(raw.clone())
                .map(Resource::SecurityGroup)
                .context(error::Decode {
                    kind: "SecurityGroup",
                }),
            ResourceKind::RouteTable => serde_json::from_value(raw.clone())
                .map(Resource::RouteTable)
                .context(error::Decode { kind: "RouteTable" }),
            ResourceKind::DhcpOptions => serde_json::from_value(raw.clone())
                .map(Resource::DhcpOptions)
                .context(error::Decode {
                    kind: "DhcpOptions",
                }),
            ResourceKind::ReservedInstances => serde_json::from_value(raw.clone())
                .map(Resource::ReservedInstances)
                .context(error::Decode {
                    kind: "ReservedInstances",
                }),
        }
    }
}

impl Resource {
    pub fn into_image(self) -> Option<Image> {
        match self {
            Resource::Image(image) => Some(image),
            _ => None,
        }
    }

    pub fn into_address(self) -> Option<Address> {
        match self {
            Resource::Address(address) => Some(address),
            _ => None,
        }
    }

    pub fn into_security_group(self) -> Option<SecurityGroup> {
        match self {
            Resource::SecurityGroup(group) => Some(group),
            _ => None,
        }
    }

    pub fn into_route_table(self) -> Option<RouteTable> {
        match self {
            Resource::RouteTable(table) => Some(table),
            _ => None,
        }
    }

    pub fn into_dhcp_options(self) -> Option<DhcpOptions> {
        match self {
            Resource::DhcpOptions(options) => Some(options),
            _ => None,
        }
    }

    pub fn into_reserved_instances(self) -> Option<ReservedInstances> {
        match self {
            Resource::ReservedInstances(reserved) => Some(reserved),
            _ => None,
        }
    }
}
