//! NetBox REST client.
//!
//! A [`NetBoxClient`] is built for one run and owns its HTTP connection pool.
//! List endpoints are paginated through the `next` link of each page.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{StatusCode, Url};
use tracing::{debug, info, warn};

use crate::config::{ConfigError, NetBoxConfig};
use crate::error::ExporterError;
use crate::inventory::{InventoryItem, InventoryRecord, ItemKind, Page};

/// Longest response body excerpt quoted in errors.
const BODY_EXCERPT_LEN: usize = 200;

/// HTTP client for the NetBox API.
#[derive(Debug, Clone)]
pub struct NetBoxClient {
    http: reqwest::Client,
    api_root: Url,
    page_size: u32,
    filters: BTreeMap<String, String>,
    require_primary_ip: bool,
}

impl NetBoxClient {
    /// Create a client from the NetBox settings.
    ///
    /// `require_primary_ip` adds `has_primary_ip=true` to every list query.
    pub fn new(config: &NetBoxConfig, require_primary_ip: bool) -> Result<Self, ExporterError> {
        let api_root = api_root(&config.url)?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if !config.token.is_empty() {
            let mut value =
                HeaderValue::from_str(&format!("{} {}", config.auth_scheme.trim(), config.token))
                    .map_err(|_| {
                        ConfigError::Validation(
                            "API token contains characters not allowed in a header".to_string(),
                        )
                    })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("netbox-sd/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.tls_insecure)
            .build()
            .map_err(|e| ExporterError::Network {
                url: api_root.to_string(),
                source: e,
            })?;

        Ok(Self {
            http,
            api_root,
            page_size: config.page_size,
            filters: config.filters.clone(),
            require_primary_ip,
        })
    }

    /// API root, always ending in `/api/`.
    pub fn api_root(&self) -> &Url {
        &self.api_root
    }

    /// URL of the first page of a list endpoint.
    pub fn list_url(&self, kind: ItemKind) -> Result<Url, ExporterError> {
        let mut url = self.api_root.join(kind.api_path()).map_err(|e| {
            ConfigError::Validation(format!("Cannot build {} endpoint URL: {}", kind, e))
        })?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &self.page_size.to_string());
            if self.require_primary_ip {
                query.append_pair("has_primary_ip", "true");
            }
            for (key, value) in &self.filters {
                query.append_pair(key, value);
            }
        }

        Ok(url)
    }

    /// Fetch every item of one kind, following pagination.
    ///
    /// Items are returned sorted by id; an id seen on an earlier page wins.
    pub async fn fetch_kind(&self, kind: ItemKind) -> Result<Vec<InventoryItem>, ExporterError> {
        let mut url = self.list_url(kind)?;
        let mut visited = HashSet::new();
        let mut records: BTreeMap<u64, InventoryRecord> = BTreeMap::new();
        let mut expected = None;
        let mut pages = 0usize;

        loop {
            if !visited.insert(url.clone()) {
                return Err(ExporterError::bad_response(
                    &url,
                    "pagination loops back to an already fetched page",
                ));
            }

            let page = self.get_page(&url).await?;
            pages += 1;
            expected = expected.or(page.count);

            for record in page.results {
                let id = record.id;
                if records.contains_key(&id) {
                    debug!(kind = %kind, id, "Duplicate item across pages ignored");
                    continue;
                }
                records.insert(id, record);
            }

            match page.next.as_deref().map(str::trim) {
                None | Some("") => break,
                Some(next) => {
                    url = url.join(next).map_err(|e| {
                        ExporterError::bad_response(&url, format!("invalid next link '{}': {}", next, e))
                    })?;
                }
            }
        }

        if let Some(count) = expected
            && count != records.len() as u64
        {
            warn!(
                kind = %kind,
                count,
                received = records.len(),
                "Item count changed while paginating"
            );
        }

        info!(kind = %kind, items = records.len(), pages, "Fetched inventory");

        Ok(records
            .into_values()
            .map(|record| InventoryItem::new(kind, record))
            .collect())
    }

    /// Fetch all requested kinds, devices first.
    pub async fn fetch_inventory(
        &self,
        kinds: &[ItemKind],
    ) -> Result<Vec<InventoryItem>, ExporterError> {
        let mut items = Vec::new();
        for &kind in kinds {
            items.extend(self.fetch_kind(kind).await?);
        }
        items.sort_by_key(InventoryItem::key);
        Ok(items)
    }

    async fn get_page(&self, url: &Url) -> Result<Page<InventoryRecord>, ExporterError> {
        debug!(url = %url, "GET");

        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ExporterError::Network {
                url: url.to_string(),
                source: e,
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ExporterError::Auth {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| ExporterError::Network {
            url: url.to_string(),
            source: e,
        })?;

        if !status.is_success() {
            return Err(ExporterError::BadResponse {
                url: url.to_string(),
                status: Some(status.as_u16()),
                reason: format!("HTTP {}: {}", status, excerpt(&body)),
            });
        }

        serde_json::from_slice(&body).map_err(|e| ExporterError::BadResponse {
            url: url.to_string(),
            status: Some(status.as_u16()),
            reason: format!("unexpected body ({}): {}", e, excerpt(&body)),
        })
    }
}

/// Normalize a user-supplied NetBox URL to its `/api/` root.
///
/// Accepts the instance URL with or without a trailing slash or `/api`
/// suffix, including instances served under a path prefix.
pub fn api_root(base: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(base.trim())
        .map_err(|e| ConfigError::Validation(format!("Invalid NetBox URL '{}': {}", base, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Validation(format!(
            "NetBox URL must use http or https, got '{}'",
            url.scheme()
        )));
    }

    let path = url.path().trim_end_matches('/');
    let path = path.strip_suffix("/api").unwrap_or(path);
    let path = format!("{}/api/", path);
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);

    Ok(url)
}

fn excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    match text.char_indices().nth(BODY_EXCERPT_LEN) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> NetBoxConfig {
        NetBoxConfig {
            url: url.to_string(),
            token: "abc".to_string(),
            ..NetBoxConfig::default()
        }
    }

    #[test]
    fn test_api_root_normalization() {
        for base in [
            "https://netbox.example.com",
            "https://netbox.example.com/",
            "https://netbox.example.com/api",
            "https://netbox.example.com/api/",
        ] {
            assert_eq!(
                api_root(base).unwrap().as_str(),
                "https://netbox.example.com/api/",
                "base: {}",
                base
            );
        }

        assert_eq!(
            api_root("http://tools.example.com/netbox/").unwrap().as_str(),
            "http://tools.example.com/netbox/api/"
        );
    }

    #[test]
    fn test_api_root_rejects_bad_urls() {
        assert!(api_root("netbox.example.com").is_err());
        assert!(api_root("file:///etc/passwd").is_err());
    }

    #[test]
    fn test_list_url_query() {
        let mut cfg = config("https://netbox.example.com");
        cfg.page_size = 50;
        cfg.filters.insert("status".into(), "active".into());
        cfg.filters.insert("tag".into(), "monitored".into());

        let client = NetBoxClient::new(&cfg, true).unwrap();
        let url = client.list_url(ItemKind::Device).unwrap();
        assert_eq!(
            url.as_str(),
            "https://netbox.example.com/api/dcim/devices/?limit=50&has_primary_ip=true&status=active&tag=monitored"
        );

        let client = NetBoxClient::new(&cfg, false).unwrap();
        let url = client.list_url(ItemKind::VirtualMachine).unwrap();
        assert_eq!(
            url.as_str(),
            "https://netbox.example.com/api/virtualization/virtual_machines/?limit=50&status=active&tag=monitored"
        );
    }

    #[test]
    fn test_token_with_newline_is_config_error() {
        let mut cfg = config("https://netbox.example.com");
        cfg.token = "abc\ndef".to_string();
        let err = NetBoxClient::new(&cfg, true).unwrap_err();
        assert!(matches!(err, ExporterError::Config(_)));
    }

    #[test]
    fn test_excerpt_truncates() {
        let long = "x".repeat(500);
        let short = excerpt(long.as_bytes());
        assert_eq!(short.len(), BODY_EXCERPT_LEN + 3);
        assert!(short.ends_with("..."));
        assert_eq!(excerpt(b"  oops \n"), "oops");
    }
}
