//! One discovery run: fetch, transform, write.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::client::NetBoxClient;
use crate::config::{ConfigError, ExporterConfig, OutputMode, SourcesConfig};
use crate::error::ExporterError;
use crate::inventory::ItemKind;
use crate::mapping::TargetMapper;
use crate::writer::{self, WriteOutcome};

/// Result of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Items fetched from NetBox.
    pub items: usize,
    /// Target groups written across all files.
    pub groups: usize,
    /// Targets written across all files.
    pub targets: usize,
    pub files_written: usize,
    pub files_unchanged: usize,
    pub files_removed: usize,
}

/// The discovery exporter.
///
/// Holds the HTTP client for its lifetime; build one per run or reuse it for
/// successive runs from the same process.
#[derive(Debug)]
pub struct Exporter {
    client: NetBoxClient,
    mapper: TargetMapper,
    kinds: Vec<ItemKind>,
    mode: OutputMode,
    output: PathBuf,
}

impl Exporter {
    /// Validate the configuration and build the client.
    pub fn new(config: ExporterConfig) -> Result<Self, ExporterError> {
        config.validate()?;

        let output = config
            .output
            .path
            .clone()
            .ok_or_else(|| ConfigError::Validation("Output path is required".to_string()))?;

        let client = NetBoxClient::new(&config.netbox, !config.targets.fallback_to_name)?;

        Ok(Self {
            client,
            mapper: TargetMapper::new(config.targets, config.labels),
            kinds: kinds(config.netbox.sources),
            mode: config.output.mode,
            output,
        })
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Run once.
    ///
    /// Nothing is written unless the whole inventory was fetched.
    pub async fn run(&self) -> Result<RunSummary, ExporterError> {
        info!(
            api = %self.client.api_root(),
            output = %self.output.display(),
            mode = ?self.mode,
            "Starting discovery run"
        );

        let items = self.client.fetch_inventory(&self.kinds).await?;
        let mut summary = RunSummary {
            items: items.len(),
            ..RunSummary::default()
        };

        match self.mode {
            OutputMode::File => {
                let doc = self.mapper.build_document(&items);
                summary.groups = doc.len();
                summary.targets = doc.target_count();

                match writer::write_document(&self.output, &doc)? {
                    WriteOutcome::Written => summary.files_written = 1,
                    WriteOutcome::Unchanged => summary.files_unchanged = 1,
                }
            }
            OutputMode::Directory => {
                let lists = self.mapper.build_directory(&items);
                summary.groups = lists.values().map(|d| d.len()).sum();
                summary.targets = lists.values().map(|d| d.target_count()).sum();

                let outcome = writer::write_directory(&self.output, &lists)?;
                summary.files_written = outcome.written.len();
                summary.files_unchanged = outcome.unchanged.len();
                summary.files_removed = outcome.removed.len();
            }
        }

        info!(
            items = summary.items,
            groups = summary.groups,
            targets = summary.targets,
            written = summary.files_written,
            unchanged = summary.files_unchanged,
            removed = summary.files_removed,
            "Discovery run complete"
        );

        Ok(summary)
    }
}

fn kinds(sources: SourcesConfig) -> Vec<ItemKind> {
    let mut kinds = Vec::with_capacity(2);
    if sources.devices {
        kinds.push(ItemKind::Device);
    }
    if sources.virtual_machines {
        kinds.push(ItemKind::VirtualMachine);
    }
    kinds
}

/// Run once with default settings: query `source_url` with `auth_token` and
/// write a single file-SD document to `destination`.
pub async fn run(
    source_url: &str,
    auth_token: &str,
    destination: impl AsRef<Path>,
) -> Result<RunSummary, ExporterError> {
    let config = ExporterConfig::for_destination(
        source_url,
        auth_token,
        destination.as_ref().to_path_buf(),
    );
    Exporter::new(config)?.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_from_sources() {
        assert_eq!(
            kinds(SourcesConfig::default()),
            vec![ItemKind::Device, ItemKind::VirtualMachine]
        );
        assert_eq!(
            kinds(SourcesConfig {
                devices: false,
                virtual_machines: true
            }),
            vec![ItemKind::VirtualMachine]
        );
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = ExporterConfig::for_destination("netbox.example.com", "t", "/tmp/x.json");
        let err = Exporter::new(config).unwrap_err();
        assert!(matches!(err, ExporterError::Config(_)));
        assert_eq!(err.exit_code(), 6);
    }

    #[tokio::test]
    async fn test_run_with_bad_url_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("netbox.json");
        std::fs::write(&dst, b"previous").unwrap();

        let err = run("ftp://netbox.example.com", "t", &dst).await.unwrap_err();
        assert!(matches!(err, ExporterError::Config(_)));
        assert_eq!(std::fs::read(&dst).unwrap(), b"previous");
    }
}
