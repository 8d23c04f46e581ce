//! Mapping from NetBox inventory items to Prometheus target groups.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, SocketAddr};

use netbox_sd_common::{DiscoveryDocument, TargetGroup, sanitize_label_name};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::config::{LabelConfig, TargetConfig};
use crate::inventory::{InventoryItem, TargetTemplateEntry, scalar_to_label};

/// Target patterns that are missing their host: blank, a bare scheme, a bare
/// port, or scheme plus port.
static INCOMPLETE_TARGET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?P<scheme>https?://)?\s*(?P<port>:\d{1,5})?\s*$")
        .expect("static regex is valid")
});

/// List name prefix for tag-derived lists in directory mode.
pub const TAG_LIST_PREFIX: &str = "_devices_tag_";

/// Host a target is derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetHost {
    Ip(IpAddr),
    Name(String),
}

impl TargetHost {
    /// Host as written in a URL or `host:port` pair.
    fn for_authority(&self) -> String {
        match self {
            TargetHost::Ip(IpAddr::V6(ip)) => format!("[{}]", ip),
            TargetHost::Ip(ip) => ip.to_string(),
            TargetHost::Name(name) => name.clone(),
        }
    }
}

impl std::fmt::Display for TargetHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetHost::Ip(ip) => write!(f, "{}", ip),
            TargetHost::Name(name) => f.write_str(name),
        }
    }
}

/// Complete a target pattern with the item host.
///
/// Patterns such as `""`, `"https://"`, `":9100"` or `"https://:8443"` get
/// the host inserted; anything else is returned unchanged.
pub fn complete_target(pattern: &str, host: &TargetHost) -> String {
    let Some(caps) = INCOMPLETE_TARGET.captures(pattern) else {
        return pattern.to_string();
    };

    let scheme = caps.name("scheme").map_or("", |m| m.as_str());
    let port = caps.name("port").map_or("", |m| m.as_str());

    if scheme.is_empty() && port.is_empty() {
        host.to_string()
    } else {
        format!("{}{}{}", scheme, host.for_authority(), port)
    }
}

/// Maps inventory items to target groups.
#[derive(Debug, Clone, Default)]
pub struct TargetMapper {
    targets: TargetConfig,
    labels: LabelConfig,
}

impl TargetMapper {
    pub fn new(targets: TargetConfig, labels: LabelConfig) -> Self {
        Self { targets, labels }
    }

    /// Host for an item: its primary IP, or its name when fallback is enabled.
    pub fn host(&self, item: &InventoryItem) -> Option<TargetHost> {
        if let Some(ip) = item.record.primary_address() {
            return Some(TargetHost::Ip(ip));
        }

        if self.targets.fallback_to_name {
            return item
                .record
                .name
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(|name| TargetHost::Name(name.to_string()));
        }

        None
    }

    /// Default scrape target for a host.
    pub fn target(&self, host: &TargetHost) -> String {
        match (self.targets.default_port, host) {
            (None, _) => host.to_string(),
            (Some(port), TargetHost::Ip(ip)) => SocketAddr::new(*ip, port).to_string(),
            (Some(port), TargetHost::Name(name)) => format!("{}:{}", name, port),
        }
    }

    /// Labels for an item.
    ///
    /// Config-context `prom_labels` are added unprefixed, then the derived
    /// labels are added with the configured prefix. Static labels fill in
    /// names that are still free. Empty values are dropped.
    pub fn labels(&self, item: &InventoryItem) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        let record = &item.record;

        match record.prometheus_context() {
            Ok(ctx) => {
                for (name, value) in &ctx.prom_labels {
                    let Some(value) = scalar_to_label(value) else {
                        continue;
                    };
                    match labels.entry(sanitize_label_name(name)) {
                        Entry::Vacant(slot) => {
                            slot.insert(value);
                        }
                        Entry::Occupied(slot) => {
                            warn!(
                                item = %item.display_name(),
                                key = %name,
                                label = %slot.key(),
                                "prom_labels key collides with another after sanitizing, keeping the first"
                            );
                        }
                    }
                }
            }
            Err(e) => {
                warn!(item = %item.display_name(), error = %e, "Ignoring invalid prom_labels");
            }
        }

        let mut set = |name: &str, value: Option<&str>| {
            if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
                labels.insert(
                    sanitize_label_name(&format!("{}{}", self.labels.prefix, name)),
                    value.to_string(),
                );
            }
        };

        set("id", Some(record.id.to_string().as_str()));
        if self.labels.include_kind {
            set("kind", Some(item.kind.as_str()));
        }
        set("name", record.name.as_deref());
        set("status", record.status.as_ref().map(|s| s.value.as_str()));
        set("role", record.role().and_then(|r| r.key()));
        set("site", record.site.as_ref().and_then(|s| s.name.as_deref()));
        set("site_slug", record.site.as_ref().and_then(|s| s.slug.as_deref()));
        set("tenant", record.tenant.as_ref().and_then(|t| t.key()));
        set("platform", record.platform.as_ref().and_then(|p| p.key()));
        set("cluster", record.cluster.as_ref().and_then(|c| c.name.as_deref()));

        if let Some(device_type) = &record.device_type {
            let manufacturer = device_type
                .manufacturer
                .as_ref()
                .and_then(|m| m.name.as_deref());
            let model = device_type.model.as_deref();
            set("manufacturer", manufacturer);
            set("device_type_model", model);
            let full = [manufacturer, model]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            set("device_type", Some(full.as_str()));
        }

        if !record.tags.is_empty() {
            let mut slugs: Vec<&str> = record.tags.iter().map(|t| t.slug_or_name()).collect();
            slugs.sort_unstable();
            slugs.dedup();
            set("tags", Some(format!(",{},", slugs.join(",")).as_str()));
        }

        if self.labels.custom_fields {
            let mut seen = BTreeSet::new();
            for (name, value) in &record.custom_fields {
                let Some(value) = scalar_to_label(value).filter(|v| !v.trim().is_empty()) else {
                    continue;
                };
                let field = format!("custom_field_{}", name);
                let label = sanitize_label_name(&format!("{}{}", self.labels.prefix, field));
                if !seen.insert(label.clone()) {
                    warn!(
                        item = %item.display_name(),
                        field = %name,
                        label = %label,
                        "Custom field collides with another after sanitizing, keeping the first"
                    );
                    continue;
                }
                set(&field, Some(value.as_str()));
            }
        }

        for (name, value) in &self.labels.static_labels {
            if !value.is_empty() {
                labels.entry(name.clone()).or_insert_with(|| value.clone());
            }
        }

        labels
    }

    /// Single target group for an item, or `None` when it has no usable host.
    pub fn target_group(&self, item: &InventoryItem) -> Option<TargetGroup> {
        let host = self.host(item)?;
        let mut group = TargetGroup::new(self.target(&host));
        group.labels = self.labels(item);
        Some(group)
    }

    /// One group per item, in item order.
    pub fn build_document(&self, items: &[InventoryItem]) -> DiscoveryDocument {
        let mut doc = DiscoveryDocument::new();

        for item in items {
            let Some(group) = self.target_group(item) else {
                debug!(item = %item.display_name(), "Item has no usable address, skipped");
                continue;
            };
            if let Err(e) = doc.push(group) {
                warn!(item = %item.display_name(), error = %e, "Target group rejected");
            }
        }

        doc
    }

    /// Named target groups for an item (directory mode).
    ///
    /// Every tag yields a list `_devices_tag_<tag>` with the default target;
    /// every `prom_targets` entry of the config context yields or overrides
    /// a list of that name. List names are percent-encoded.
    pub fn named_groups(&self, item: &InventoryItem) -> Vec<(String, TargetGroup)> {
        let Some(host) = self.host(item) else {
            return Vec::new();
        };

        let ctx = match item.record.prometheus_context() {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(
                    item = %item.display_name(),
                    error = %e,
                    "Ignoring item with invalid prom_targets or prom_labels in config context"
                );
                return Vec::new();
            }
        };

        let mut templates: BTreeMap<String, TargetTemplateEntry> = item
            .record
            .tags
            .iter()
            .map(|tag| {
                (
                    urlencoding::encode(&format!("{}{}", TAG_LIST_PREFIX, tag.name)).into_owned(),
                    TargetTemplateEntry::Enabled(true),
                )
            })
            .collect();
        templates.extend(
            ctx.prom_targets
                .into_iter()
                .map(|(name, entry)| (urlencoding::encode(&name).into_owned(), entry)),
        );

        let base_labels = self.labels(item);
        let mut groups = Vec::new();

        for (name, entry) in templates {
            let template = match entry {
                TargetTemplateEntry::Enabled(false) => continue,
                TargetTemplateEntry::Enabled(true) => Default::default(),
                TargetTemplateEntry::Template(template) => template,
            };

            let targets: Vec<String> = match &template.targets {
                None => vec![self.target(&host)],
                Some(patterns) => patterns
                    .iter()
                    .map(|p| complete_target(p, &host))
                    .collect(),
            };
            if targets.is_empty() {
                continue;
            }

            let mut group = TargetGroup::with_targets(targets);
            group.labels = base_labels.clone();
            for (label, value) in &template.labels {
                let label = sanitize_label_name(label);
                match scalar_to_label(value) {
                    Some(value) => {
                        group.labels.insert(label, value);
                    }
                    None => {
                        group.labels.remove(&label);
                    }
                }
            }

            groups.push((name, group));
        }

        groups
    }

    /// Named documents for all items (directory mode).
    pub fn build_directory(&self, items: &[InventoryItem]) -> BTreeMap<String, DiscoveryDocument> {
        let mut lists: BTreeMap<String, DiscoveryDocument> = BTreeMap::new();

        for item in items {
            let groups = self.named_groups(item);
            if groups.is_empty() {
                debug!(item = %item.display_name(), "Item produced no target lists");
            }
            for (name, group) in groups {
                if let Err(e) = lists.entry(name).or_default().push(group) {
                    warn!(item = %item.display_name(), error = %e, "Target group rejected");
                }
            }
        }

        lists.retain(|_, doc| !doc.is_empty());
        lists
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{InventoryRecord, ItemKind};
    use serde_json::json;

    fn item(kind: ItemKind, value: serde_json::Value) -> InventoryItem {
        let record: InventoryRecord = serde_json::from_value(value).unwrap();
        InventoryItem::new(kind, record)
    }

    fn mapper() -> TargetMapper {
        TargetMapper::default()
    }

    #[test]
    fn test_spec_example() {
        let item = item(
            ItemKind::Device,
            json!({
                "id": 7,
                "primary_ip": { "address": "10.0.0.5/32" },
                "role": { "name": "Router", "slug": "router" },
                "status": { "value": "active", "label": "Active" }
            }),
        );

        let doc = mapper().build_document(&[item]);
        let json: serde_json::Value =
            serde_json::from_slice(&doc.to_json_bytes().unwrap()).unwrap();

        assert_eq!(
            json,
            json!([{
                "targets": ["10.0.0.5"],
                "labels": { "role": "router", "status": "active", "id": "7" }
            }])
        );
    }

    #[test]
    fn test_full_label_set() {
        let item = item(
            ItemKind::Device,
            json!({
                "id": 12,
                "name": "core-rtr-01",
                "primary_ip": { "address": "10.0.0.5/24" },
                "status": { "value": "active" },
                "role": { "name": "Router", "slug": "router" },
                "site": { "name": "Amsterdam 1", "slug": "ams1" },
                "platform": { "name": "Junos", "slug": "junos" },
                "device_type": { "model": "MX204", "manufacturer": { "name": "Juniper" } },
                "tags": [ { "name": "Monitored", "slug": "monitored" }, { "name": "Core", "slug": "core" } ],
                "custom_fields": { "rack-unit": 12, "owner": null, "notes": "" },
                "config_context": { "prom_labels": { "team": "network" } }
            }),
        );

        let labels = mapper().labels(&item);

        assert_eq!(labels["id"], "12");
        assert_eq!(labels["name"], "core-rtr-01");
        assert_eq!(labels["site"], "Amsterdam 1");
        assert_eq!(labels["site_slug"], "ams1");
        assert_eq!(labels["platform"], "junos");
        assert_eq!(labels["manufacturer"], "Juniper");
        assert_eq!(labels["device_type_model"], "MX204");
        assert_eq!(labels["device_type"], "Juniper MX204");
        assert_eq!(labels["tags"], ",core,monitored,");
        assert_eq!(labels["custom_field_rack_unit"], "12");
        assert_eq!(labels["team"], "network");
        assert!(!labels.contains_key("custom_field_owner"));
        assert!(!labels.contains_key("custom_field_notes"));
        assert!(!labels.contains_key("tenant"));
    }

    #[test]
    fn test_sanitized_label_collision_keeps_first() {
        let item = item(
            ItemKind::Device,
            json!({
                "id": 4,
                "primary_ip": { "address": "10.0.0.4/24" },
                "custom_fields": { "rack-unit": 1, "rack_unit": 2 },
                "config_context": { "prom_labels": { "team": "network", "team!": "other" } }
            }),
        );

        let labels = mapper().labels(&item);

        assert_eq!(labels["team"], "network");
        assert_eq!(labels["custom_field_rack_unit"], "1");
        assert!(!labels.values().any(|v| v == "other"));
    }

    #[test]
    fn test_prefix_kind_and_static_labels() {
        let mut labels = LabelConfig {
            prefix: "__meta_netbox_".to_string(),
            include_kind: true,
            ..LabelConfig::default()
        };
        labels
            .static_labels
            .insert("environment".to_string(), "prod".to_string());
        labels
            .static_labels
            .insert("team".to_string(), "default".to_string());
        let mapper = TargetMapper::new(TargetConfig::default(), labels);

        let item = item(
            ItemKind::VirtualMachine,
            json!({
                "id": 3,
                "name": "web-01",
                "primary_ip": { "address": "192.0.2.10/24" },
                "config_context": { "prom_labels": { "team": "web" } }
            }),
        );
        let labels = mapper.labels(&item);

        assert_eq!(labels["__meta_netbox_id"], "3");
        assert_eq!(labels["__meta_netbox_name"], "web-01");
        assert_eq!(labels["__meta_netbox_kind"], "virtual_machine");
        assert_eq!(labels["environment"], "prod");
        assert_eq!(labels["team"], "web");
    }

    #[test]
    fn test_default_port_and_ipv6() {
        let mapper = TargetMapper::new(
            TargetConfig {
                default_port: Some(9100),
                fallback_to_name: false,
            },
            LabelConfig::default(),
        );

        let v4 = item(ItemKind::Device, json!({ "id": 1, "primary_ip": { "address": "10.0.0.1/24" } }));
        let v6 = item(ItemKind::Device, json!({ "id": 2, "primary_ip": { "address": "2001:db8::1/64" } }));

        assert_eq!(mapper.target_group(&v4).unwrap().targets, vec!["10.0.0.1:9100"]);
        assert_eq!(mapper.target_group(&v6).unwrap().targets, vec!["[2001:db8::1]:9100"]);
    }

    #[test]
    fn test_items_without_address_are_skipped() {
        let no_ip = item(ItemKind::Device, json!({ "id": 1, "name": "sw-01" }));
        let bad_ip = item(ItemKind::Device, json!({ "id": 2, "primary_ip": { "address": "garbage" } }));

        let doc = mapper().build_document(&[no_ip.clone(), bad_ip]);
        assert!(doc.is_empty());

        let fallback = TargetMapper::new(
            TargetConfig {
                default_port: Some(161),
                fallback_to_name: true,
            },
            LabelConfig::default(),
        );
        let doc = fallback.build_document(&[no_ip]);
        assert_eq!(doc.groups()[0].targets, vec!["sw-01:161"]);
    }

    #[test]
    fn test_complete_target() {
        let v4 = TargetHost::Ip("10.0.0.5".parse().unwrap());
        let v6 = TargetHost::Ip("2001:db8::1".parse().unwrap());

        assert_eq!(complete_target("", &v4), "10.0.0.5");
        assert_eq!(complete_target("  ", &v4), "10.0.0.5");
        assert_eq!(complete_target(":9100", &v4), "10.0.0.5:9100");
        assert_eq!(complete_target("https://", &v4), "https://10.0.0.5");
        assert_eq!(complete_target("https://:8443", &v4), "https://10.0.0.5:8443");
        assert_eq!(complete_target(":9100", &v6), "[2001:db8::1]:9100");
        assert_eq!(
            complete_target("snmp.example.com:161", &v4),
            "snmp.example.com:161"
        );
        assert_eq!(
            complete_target("https://example.com/health", &v4),
            "https://example.com/health"
        );
    }

    #[test]
    fn test_named_groups_from_tags_and_context() {
        let item = item(
            ItemKind::Device,
            json!({
                "id": 5,
                "name": "edge-01",
                "primary_ip": { "address": "10.1.0.1/24" },
                "tags": [ { "name": "node exporter", "slug": "node-exporter" }, { "name": "off", "slug": "off" } ],
                "config_context": {
                    "prom_labels": { "team": "edge" },
                    "prom_targets": {
                        "snmp": { "targets": [":161", "oob.example.com"], "labels": { "module": "if_mib", "team": null } },
                        "_devices_tag_off": false,
                        "empty": { "targets": [] }
                    }
                }
            }),
        );

        let groups: BTreeMap<String, TargetGroup> =
            mapper().named_groups(&item).into_iter().collect();

        assert_eq!(groups.len(), 2);

        let node = &groups["_devices_tag_node%20exporter"];
        assert_eq!(node.targets, vec!["10.1.0.1"]);
        assert_eq!(node.labels["team"], "edge");

        let snmp = &groups["snmp"];
        assert_eq!(snmp.targets, vec!["10.1.0.1:161", "oob.example.com"]);
        assert_eq!(snmp.labels["module"], "if_mib");
        assert_eq!(snmp.labels["name"], "edge-01");
        assert!(!snmp.labels.contains_key("team"));
    }

    #[test]
    fn test_named_groups_invalid_context_ignored() {
        let item = item(
            ItemKind::Device,
            json!({
                "id": 5,
                "primary_ip": { "address": "10.1.0.1/24" },
                "tags": [ { "name": "a" } ],
                "config_context": { "prom_targets": { "x": "not-a-template" } }
            }),
        );
        assert!(mapper().named_groups(&item).is_empty());
    }

    #[test]
    fn test_build_directory_merges_items() {
        let items = vec![
            item(ItemKind::Device, json!({ "id": 1, "primary_ip": { "address": "10.0.0.1/24" }, "tags": [ { "name": "web" } ] })),
            item(ItemKind::VirtualMachine, json!({ "id": 1, "primary_ip": { "address": "10.0.0.2/24" }, "tags": [ { "name": "web" } ] })),
            item(ItemKind::Device, json!({ "id": 2, "name": "no-ip", "tags": [ { "name": "web" } ] })),
        ];

        let lists = mapper().build_directory(&items);
        assert_eq!(lists.len(), 1);
        let web = &lists["_devices_tag_web"];
        assert_eq!(web.len(), 2);
        assert_eq!(web.groups()[0].targets, vec!["10.0.0.1"]);
        assert_eq!(web.groups()[1].targets, vec!["10.0.0.2"]);
    }
}
