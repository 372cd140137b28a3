//! # Pipeline Configuration
//!
//! Configuration for the distribution pipeline: schedule, catalog source,
//! render layout, terminal list.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     PRICENET_AGENT_ID=store-042                                        │
//! │     PRICENET_SOURCE_KIND=file                                          │
//! │                                                                         │
//! │  2. TOML Config Document                                               │
//! │     loaded once per process, passed by value into components;          │
//! │     never mutated in place                                             │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! automation_interval_minutes = 15
//! reconcile_interval_minutes = 60
//!
//! [agent]
//! id = "store-042"
//! store_code = "S042"
//! store_name = "Downtown Branch"
//!
//! [registry]
//! database_path = "pricenet.db"
//!
//! [source]
//! kind = "file"   # file | api | database
//!
//! [source.file]
//! path = "/srv/catalog"
//! delimiter = ";"
//! fields = ["barcode", "name", "price"]
//!
//! [render]
//! field_separator = ";"
//! exported_fields = ["barcode", "name", "price"]
//! include_header = false
//! price_decimals = 2
//!
//! [[terminals]]
//! descriptor = "till-1"
//! address = "192.168.1.21"
//! port = 21
//! method = "ftp_push"
//! username = "pos"
//! password = "pos"
//! remote_path = "PRICES.TXT"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use pricenet_core::render::RenderLayout;

use crate::error::{PipelineError, PipelineResult};

// =============================================================================
// Source Kind
// =============================================================================

/// Which catalog source adapter feeds the pipeline.
///
/// An unrecognized kind is a configuration fault - the only error class that
/// is fatal to a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Flat file or directory of product files.
    #[default]
    File,
    /// Remote read API.
    Api,
    /// External relational database.
    Database,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::File => write!(f, "file"),
            SourceKind::Api => write!(f, "api"),
            SourceKind::Database => write!(f, "database"),
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(SourceKind::File),
            "api" => Ok(SourceKind::Api),
            "database" | "db" => Ok(SourceKind::Database),
            other => Err(PipelineError::InvalidConfig(format!(
                "Unknown source kind: '{}'. Valid options: file, api, database",
                other
            ))),
        }
    }
}

// =============================================================================
// Agent Identity
// =============================================================================

/// Identity this agent process reports under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Agent identifier (normalized by the registry on every write).
    /// Auto-generated on first run if not provided.
    pub id: String,

    /// Display store code.
    #[serde(default)]
    pub store_code: Option<String>,

    /// Display store name.
    #[serde(default)]
    pub store_name: Option<String>,
}

impl Default for AgentIdentity {
    fn default() -> Self {
        AgentIdentity {
            id: Uuid::new_v4().to_string(),
            store_code: None,
            store_name: None,
        }
    }
}

// =============================================================================
// Registry Settings
// =============================================================================

/// Registry storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Path to the registry SQLite file.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("pricenet.db")
}

impl Default for RegistrySettings {
    fn default() -> Self {
        RegistrySettings {
            database_path: default_database_path(),
        }
    }
}

// =============================================================================
// Source Settings
// =============================================================================

/// File source parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSourceConfig {
    /// A product file, or a directory to pick the newest matching file from.
    #[serde(default)]
    pub path: PathBuf,

    /// Field delimiter inside the product file.
    #[serde(default = "default_delimiter")]
    pub delimiter: String,

    /// Field layout of the product file, in column order.
    #[serde(default = "default_fields")]
    pub fields: Vec<String>,

    /// Filename prefix recognized in directory mode (case-insensitive).
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// Filename extension recognized in directory mode (case-insensitive).
    #[serde(default = "default_file_extension")]
    pub file_extension: String,
}

fn default_delimiter() -> String {
    ";".to_string()
}

fn default_fields() -> Vec<String> {
    vec!["barcode".into(), "name".into(), "price".into()]
}

fn default_file_prefix() -> String {
    "price".to_string()
}

fn default_file_extension() -> String {
    ".txt".to_string()
}

impl Default for FileSourceConfig {
    fn default() -> Self {
        FileSourceConfig {
            path: PathBuf::new(),
            delimiter: default_delimiter(),
            fields: default_fields(),
            file_prefix: default_file_prefix(),
            file_extension: default_file_extension(),
        }
    }
}

/// API source parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiSourceConfig {
    /// Read endpoint returning the product catalog.
    #[serde(default)]
    pub url: String,

    /// Bearer token; takes precedence over basic auth when both are set.
    #[serde(default)]
    pub bearer_token: Option<String>,

    /// Basic auth username.
    #[serde(default)]
    pub username: Option<String>,

    /// Basic auth password.
    #[serde(default)]
    pub password: Option<String>,

    /// Request timeout (seconds).
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
}

fn default_api_timeout() -> u64 {
    10
}

/// Database source parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbSourceConfig {
    /// Connection URL; the scheme selects the engine
    /// (sqlite:// postgres:// mysql://).
    #[serde(default)]
    pub url: String,

    /// Catalog query. Column names map to product fields: barcode, name,
    /// price, promo - alias columns accordingly.
    #[serde(default)]
    pub query: String,
}

/// Catalog source selection plus per-kind parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceSettings {
    /// Which adapter feeds the pipeline.
    #[serde(default)]
    pub kind: SourceKind,

    /// File source parameters (used when kind = "file").
    #[serde(default)]
    pub file: FileSourceConfig,

    /// API source parameters (used when kind = "api").
    #[serde(default)]
    pub api: ApiSourceConfig,

    /// Database source parameters (used when kind = "database").
    #[serde(default)]
    pub database: DbSourceConfig,
}

// =============================================================================
// Render Settings
// =============================================================================

/// Legacy price file rendering settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderSettings {
    /// Field separator in the rendered file.
    #[serde(default = "default_delimiter")]
    pub field_separator: String,

    /// Exported fields, in output order.
    #[serde(default = "default_fields")]
    pub exported_fields: Vec<String>,

    /// Emit the field labels as the first line.
    #[serde(default)]
    pub include_header: bool,

    /// Decimal places for rendered prices.
    #[serde(default = "default_price_decimals")]
    pub price_decimals: u8,
}

fn default_price_decimals() -> u8 {
    2
}

impl Default for RenderSettings {
    fn default() -> Self {
        RenderSettings {
            field_separator: default_delimiter(),
            exported_fields: default_fields(),
            include_header: false,
            price_decimals: default_price_decimals(),
        }
    }
}

impl RenderSettings {
    /// Builds the core render layout from these settings.
    pub fn layout(&self) -> PipelineResult<RenderLayout> {
        RenderLayout::from_config(
            &self.exported_fields,
            &self.field_separator,
            self.include_header,
            self.price_decimals,
        )
        .map_err(Into::into)
    }
}

// =============================================================================
// Dispatch Settings
// =============================================================================

/// Terminal transfer method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMethod {
    /// Push over the terminal's file transfer service.
    #[default]
    FtpPush,
    /// Raw TCP stream copy into a listening terminal port.
    RawStream,
    /// Copy into a locally mounted terminal path.
    FileCopy,
}

impl std::fmt::Display for TransferMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferMethod::FtpPush => write!(f, "ftp_push"),
            TransferMethod::RawStream => write!(f, "raw_stream"),
            TransferMethod::FileCopy => write!(f, "file_copy"),
        }
    }
}

/// One configured legacy terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// Display descriptor; doubles as the device id for delivery stamping
    /// unless `device_id` overrides it.
    pub descriptor: String,

    /// Terminal network address.
    pub address: String,

    /// Terminal port (probe + transfer target).
    pub port: u16,

    /// Transfer method for this terminal.
    #[serde(default)]
    pub method: TransferMethod,

    /// Transfer credentials (FTP).
    #[serde(default)]
    pub username: Option<String>,

    /// Transfer credentials (FTP).
    #[serde(default)]
    pub password: Option<String>,

    /// Remote filename (FTP) or local target path (file copy).
    #[serde(default)]
    pub remote_path: Option<String>,

    /// Registry device id owning this terminal; defaults to the descriptor.
    #[serde(default)]
    pub device_id: Option<String>,
}

impl TerminalConfig {
    /// The registry device id this terminal stamps deliveries on.
    pub fn device_id(&self) -> &str {
        self.device_id.as_deref().unwrap_or(&self.descriptor)
    }

    /// address:port for probes and logs.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Dispatch phase settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Reachability probe timeout (seconds).
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Per-terminal transfer timeout (seconds).
    #[serde(default = "default_transfer_timeout")]
    pub transfer_timeout_secs: u64,

    /// Deadline for the whole dispatch phase (seconds). Terminals still
    /// unfinished at the deadline are recorded unreachable for the cycle.
    #[serde(default = "default_phase_timeout")]
    pub phase_timeout_secs: u64,
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_transfer_timeout() -> u64 {
    30
}

fn default_phase_timeout() -> u64 {
    120
}

impl Default for DispatchSettings {
    fn default() -> Self {
        DispatchSettings {
            probe_timeout_secs: default_probe_timeout(),
            transfer_timeout_secs: default_transfer_timeout(),
            phase_timeout_secs: default_phase_timeout(),
        }
    }
}

impl DispatchSettings {
    /// Probe timeout as a Duration.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Transfer timeout as a Duration.
    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }

    /// Phase deadline as a Duration.
    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.phase_timeout_secs)
    }
}

// =============================================================================
// History Settings
// =============================================================================

/// Rolling delivery history settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySettings {
    /// Maximum retained outcomes; oldest entries evict beyond this.
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

fn default_history_capacity() -> usize {
    500
}

impl Default for HistorySettings {
    fn default() -> Self {
        HistorySettings {
            capacity: default_history_capacity(),
        }
    }
}

// =============================================================================
// Main Pipeline Configuration
// =============================================================================

/// Complete pipeline configuration.
///
/// Loaded once per process and passed by value into each component at
/// construction; the on-disk document is never mutated by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Minutes between heartbeat cycles.
    #[serde(default = "default_automation_interval")]
    pub automation_interval_minutes: u64,

    /// Minutes between reconciliation passes.
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_minutes: u64,

    /// Identity this agent reports under.
    #[serde(default)]
    pub agent: AgentIdentity,

    /// Registry storage settings.
    #[serde(default)]
    pub registry: RegistrySettings,

    /// Catalog source selection + parameters.
    #[serde(default)]
    pub source: SourceSettings,

    /// Render layout settings.
    #[serde(default)]
    pub render: RenderSettings,

    /// Dispatch phase settings.
    #[serde(default)]
    pub dispatch: DispatchSettings,

    /// Delivery history settings.
    #[serde(default)]
    pub history: HistorySettings,

    /// Configured legacy terminals.
    #[serde(default)]
    pub terminals: Vec<TerminalConfig>,
}

fn default_automation_interval() -> u64 {
    15
}

fn default_reconcile_interval() -> u64 {
    60
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            automation_interval_minutes: default_automation_interval(),
            reconcile_interval_minutes: default_reconcile_interval(),
            agent: AgentIdentity::default(),
            registry: RegistrySettings::default(),
            source: SourceSettings::default(),
            render: RenderSettings::default(),
            dispatch: DispatchSettings::default(),
            history: HistorySettings::default(),
            terminals: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config document (TOML)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> PipelineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path {
            if path.exists() {
                info!(?path, "Loading pipeline config from file");
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| PipelineError::ConfigLoadFailed(e.to_string()))?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// Configuration faults are the only fatal error class: everything
    /// checked here fails the process at startup instead of mid-cycle.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.automation_interval_minutes == 0 {
            return Err(PipelineError::InvalidConfig(
                "automation_interval_minutes must be greater than 0".into(),
            ));
        }

        if self.agent.id.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "agent.id must not be empty".into(),
            ));
        }

        // Render layout must resolve (field names, separator).
        self.render.layout()?;

        match self.source.kind {
            SourceKind::File => {
                if self.source.file.path.as_os_str().is_empty() {
                    return Err(PipelineError::InvalidConfig(
                        "source.file.path is required for the file source".into(),
                    ));
                }
                if self.source.file.fields.is_empty() {
                    return Err(PipelineError::InvalidConfig(
                        "source.file.fields must not be empty".into(),
                    ));
                }
            }
            SourceKind::Api => {
                let parsed = url::Url::parse(&self.source.api.url).map_err(|e| {
                    PipelineError::InvalidConfig(format!("source.api.url: {e}"))
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(PipelineError::InvalidConfig(format!(
                        "source.api.url must be http(s), got: {}",
                        parsed.scheme()
                    )));
                }
            }
            SourceKind::Database => {
                if self.source.database.url.trim().is_empty() {
                    return Err(PipelineError::InvalidConfig(
                        "source.database.url is required for the database source".into(),
                    ));
                }
                if self.source.database.query.trim().is_empty() {
                    return Err(PipelineError::InvalidConfig(
                        "source.database.query is required for the database source".into(),
                    ));
                }
            }
        }

        for terminal in &self.terminals {
            if terminal.address.trim().is_empty() {
                return Err(PipelineError::InvalidConfig(format!(
                    "terminal '{}' has an empty address",
                    terminal.descriptor
                )));
            }
            if terminal.port == 0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "terminal '{}' has port 0",
                    terminal.descriptor
                )));
            }
            if terminal.method == TransferMethod::FileCopy && terminal.remote_path.is_none() {
                return Err(PipelineError::InvalidConfig(format!(
                    "terminal '{}' uses file_copy but has no remote_path",
                    terminal.descriptor
                )));
            }
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("PRICENET_AGENT_ID") {
            debug!(agent_id = %id, "Overriding agent id from environment");
            self.agent.id = id;
        }

        if let Ok(kind) = std::env::var("PRICENET_SOURCE_KIND") {
            match kind.parse() {
                Ok(parsed) => {
                    debug!(kind = %kind, "Overriding source kind from environment");
                    self.source.kind = parsed;
                }
                Err(_) => warn!(kind = %kind, "Unknown source kind in environment"),
            }
        }

        if let Ok(path) = std::env::var("PRICENET_DATABASE_PATH") {
            self.registry.database_path = PathBuf::from(path);
        }

        if let Ok(minutes) = std::env::var("PRICENET_INTERVAL_MINUTES") {
            if let Ok(m) = minutes.parse::<u64>() {
                debug!(minutes = m, "Overriding automation interval from environment");
                self.automation_interval_minutes = m;
            }
        }
    }

    /// Heartbeat interval as a Duration.
    pub fn automation_interval(&self) -> Duration {
        Duration::from_secs(self.automation_interval_minutes * 60)
    }

    /// Reconciliation interval as a Duration.
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_minutes * 60)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_parsing() {
        assert_eq!("file".parse::<SourceKind>().unwrap(), SourceKind::File);
        assert_eq!("API".parse::<SourceKind>().unwrap(), SourceKind::Api);
        assert_eq!("db".parse::<SourceKind>().unwrap(), SourceKind::Database);
        assert!("spreadsheet".parse::<SourceKind>().is_err());
    }

    #[test]
    fn test_unknown_source_kind_is_config_fault() {
        let err = "spreadsheet".parse::<SourceKind>().unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_default_config_validates_with_file_path() {
        let mut config = PipelineConfig::default();
        config.source.file.path = PathBuf::from("/srv/catalog");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = PipelineConfig::default();
        config.source.file.path = PathBuf::from("/srv/catalog");
        config.automation_interval_minutes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_source_requires_http_url() {
        let mut config = PipelineConfig::default();
        config.source.kind = SourceKind::Api;
        config.source.api.url = "ftp://example.test/products".into();
        assert!(config.validate().is_err());

        config.source.api.url = "https://example.test/products".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_copy_terminal_requires_remote_path() {
        let mut config = PipelineConfig::default();
        config.source.file.path = PathBuf::from("/srv/catalog");
        config.terminals.push(TerminalConfig {
            descriptor: "till-1".into(),
            address: "10.0.0.9".into(),
            port: 9100,
            method: TransferMethod::FileCopy,
            username: None,
            password: None,
            remote_path: None,
            device_id: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = PipelineConfig::default();
        let doc = toml::to_string_pretty(&config).unwrap();
        assert!(doc.contains("[agent]"));
        assert!(doc.contains("[source]"));
        let parsed: PipelineConfig = toml::from_str(&doc).unwrap();
        assert_eq!(parsed.automation_interval_minutes, 15);
    }

    #[test]
    fn test_unknown_kind_in_document_fails_at_parse() {
        let doc = r#"
            [source]
            kind = "spreadsheet"
        "#;
        assert!(toml::from_str::<PipelineConfig>(doc).is_err());
    }

    #[test]
    fn test_terminal_device_id_defaults_to_descriptor() {
        let terminal = TerminalConfig {
            descriptor: "till-1".into(),
            address: "10.0.0.9".into(),
            port: 2121,
            method: TransferMethod::default(),
            username: None,
            password: None,
            remote_path: None,
            device_id: None,
        };
        assert_eq!(terminal.device_id(), "till-1");
        assert_eq!(terminal.endpoint(), "10.0.0.9:2121");
    }
}
