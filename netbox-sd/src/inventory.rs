//! Typed NetBox inventory records.
//!
//! Only the fields the exporter reads are modelled. Unknown fields are
//! ignored, optional fields default to `None`/empty, and a missing `id` or a
//! field of the wrong type fails deserialization of the whole page.

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// NetBox object type an item was fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Device,
    VirtualMachine,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Device => "device",
            ItemKind::VirtualMachine => "virtual_machine",
        }
    }

    /// List endpoint path, relative to the API root.
    pub fn api_path(&self) -> &'static str {
        match self {
            ItemKind::Device => "dcim/devices/",
            ItemKind::VirtualMachine => "virtualization/virtual_machines/",
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One page of a NetBox list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub next: Option<String>,
    pub results: Vec<T>,
}

/// Nested reference to another object (site, role, tenant, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedRef {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
}

impl NestedRef {
    /// Slug if present, otherwise name.
    pub fn key(&self) -> Option<&str> {
        self.slug.as_deref().or(self.name.as_deref())
    }
}

/// Choice field such as `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub value: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// Nested IP address; `address` is in CIDR notation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRef {
    pub address: String,
}

impl IpRef {
    /// Host part of the address, without the prefix length.
    pub fn ip(&self) -> Option<IpAddr> {
        let host = self.address.split('/').next().unwrap_or_default();
        host.trim().parse().ok()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manufacturer {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTypeRef {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<Manufacturer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRef {
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
}

impl TagRef {
    pub fn slug_or_name(&self) -> &str {
        self.slug.as_deref().unwrap_or(&self.name)
    }
}

/// A device or virtual machine as returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub primary_ip: Option<IpRef>,
    #[serde(default)]
    pub status: Option<Choice>,
    #[serde(default)]
    pub role: Option<NestedRef>,
    /// Devices on NetBox before 3.6.
    #[serde(default)]
    pub device_role: Option<NestedRef>,
    #[serde(default)]
    pub site: Option<NestedRef>,
    #[serde(default)]
    pub tenant: Option<NestedRef>,
    #[serde(default)]
    pub platform: Option<NestedRef>,
    #[serde(default)]
    pub cluster: Option<NestedRef>,
    #[serde(default)]
    pub device_type: Option<DeviceTypeRef>,
    #[serde(default)]
    pub tags: Vec<TagRef>,
    #[serde(default)]
    pub custom_fields: BTreeMap<String, Value>,
    /// Kept raw; parsed per item so one broken context only drops its item.
    #[serde(default)]
    pub config_context: Option<Value>,
}

impl InventoryRecord {
    pub fn role(&self) -> Option<&NestedRef> {
        self.role.as_ref().or(self.device_role.as_ref())
    }

    pub fn primary_address(&self) -> Option<IpAddr> {
        self.primary_ip.as_ref().and_then(IpRef::ip)
    }

    /// Prometheus settings from the rendered config context.
    pub fn prometheus_context(&self) -> Result<PrometheusContext, serde_json::Error> {
        match &self.config_context {
            None | Some(Value::Null) => Ok(PrometheusContext::default()),
            Some(value) => PrometheusContext::deserialize(value),
        }
    }
}

/// Prometheus keys of a NetBox config context.
///
/// ```json
/// {
///   "prom_labels": { "team": "network" },
///   "prom_targets": {
///     "snmp": { "targets": [":161"], "labels": { "module": "if_mib" } },
///     "node": false
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PrometheusContext {
    #[serde(default)]
    pub prom_labels: BTreeMap<String, Value>,
    #[serde(default)]
    pub prom_targets: BTreeMap<String, TargetTemplateEntry>,
}

/// A `prom_targets` entry: a template, or a boolean switch.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TargetTemplateEntry {
    /// `false` disables the list (overriding a tag-derived one); `true` uses defaults.
    Enabled(bool),
    Template(TargetTemplate),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TargetTemplate {
    /// Target patterns; absent means "the item address".
    #[serde(default)]
    pub targets: Option<Vec<String>>,
    #[serde(default)]
    pub labels: BTreeMap<String, Value>,
}

/// A record tagged with the endpoint it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryItem {
    pub kind: ItemKind,
    pub record: InventoryRecord,
}

impl InventoryItem {
    pub fn new(kind: ItemKind, record: InventoryRecord) -> Self {
        Self { kind, record }
    }

    /// Sort and dedup key.
    pub fn key(&self) -> (ItemKind, u64) {
        (self.kind, self.record.id)
    }

    /// Name for log messages.
    pub fn display_name(&self) -> String {
        match &self.record.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("{}#{}", self.kind, self.record.id),
        }
    }
}

/// Render a JSON scalar as a label value; `None` for null, empty and non-scalar values.
pub fn scalar_to_label(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
