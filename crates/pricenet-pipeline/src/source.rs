//! # Catalog Source Adapter
//!
//! Pulls a normalized product list from one of three source kinds, selected
//! by configuration at pipeline start.
//!
//! ## Failure Containment
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Catalog Source Contract                             │
//! │                                                                         │
//! │  ┌────────────┐   ┌────────────┐   ┌──────────────┐                    │
//! │  │ FileSource │   │ ApiSource  │   │DatabaseSource│                    │
//! │  │            │   │            │   │              │                    │
//! │  │ newest     │   │ GET + auth │   │ query via    │                    │
//! │  │ matching   │   │ + timeout  │   │ sqlx::Any    │                    │
//! │  │ file,      │   │ JSON body  │   │ column-name  │                    │
//! │  │ delimited  │   │            │   │ mapping      │                    │
//! │  └─────┬──────┘   └─────┬──────┘   └──────┬───────┘                    │
//! │        └────────────────┼─────────────────┘                            │
//! │                         ▼                                               │
//! │               CatalogFetch { products, failure }                        │
//! │                                                                         │
//! │  Source-specific errors are caught HERE and reported as zero           │
//! │  products with a reason - never propagated as a pipeline-halting       │
//! │  fault. Downstream consumes only the normalized product sequence.      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! API payloads are resolved once at this boundary through a tagged union
//! (bare list / wrapper object / invalid); nothing duck-typed leaks out.

use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Duration;

use serde::Deserialize;
use sqlx::any::AnyPoolOptions;
use sqlx::{Column, Row};
use tracing::{debug, info, warn};

use pricenet_core::render::{self, RenderLayout};
use pricenet_core::types::Product;

use crate::config::{ApiSourceConfig, DbSourceConfig, FileSourceConfig, SourceKind, SourceSettings};

// =============================================================================
// Fetch Result
// =============================================================================

/// Result of one catalog fetch.
///
/// `failure` distinguishes "the source broke" from "the source is genuinely
/// empty"; the heartbeat loop treats both as a skipped render but annotates
/// them differently.
#[derive(Debug, Clone, Default)]
pub struct CatalogFetch {
    /// Normalized products, possibly empty.
    pub products: Vec<Product>,

    /// Reason the source failed, when it did.
    pub failure: Option<String>,
}

impl CatalogFetch {
    /// A successful fetch.
    pub fn ok(products: Vec<Product>) -> Self {
        CatalogFetch {
            products,
            failure: None,
        }
    }

    /// A failed fetch: zero products, with a reason.
    pub fn failed(reason: impl Into<String>) -> Self {
        CatalogFetch {
            products: Vec::new(),
            failure: Some(reason.into()),
        }
    }
}

// =============================================================================
// Catalog Source
// =============================================================================

/// Polymorphic catalog source, selected by configuration at pipeline start.
#[derive(Debug, Clone)]
pub enum CatalogSource {
    /// Flat file or directory of product files.
    File(FileSourceConfig),
    /// Remote read API.
    Api(ApiSourceConfig),
    /// External relational database.
    Database(DbSourceConfig),
}

impl CatalogSource {
    /// Builds the configured source variant.
    pub fn from_settings(settings: &SourceSettings) -> Self {
        match settings.kind {
            SourceKind::File => CatalogSource::File(settings.file.clone()),
            SourceKind::Api => CatalogSource::Api(settings.api.clone()),
            SourceKind::Database => CatalogSource::Database(settings.database.clone()),
        }
    }

    /// The configured kind, for logs and cycle annotations.
    pub fn kind(&self) -> SourceKind {
        match self {
            CatalogSource::File(_) => SourceKind::File,
            CatalogSource::Api(_) => SourceKind::Api,
            CatalogSource::Database(_) => SourceKind::Database,
        }
    }

    /// Fetches the catalog.
    ///
    /// Never errors: source failures come back as zero products with a
    /// reason, and the next cycle retries.
    pub async fn fetch(&self) -> CatalogFetch {
        let fetch = match self {
            CatalogSource::File(config) => fetch_file(config).await,
            CatalogSource::Api(config) => fetch_api(config).await,
            CatalogSource::Database(config) => fetch_database(config).await,
        };

        match &fetch.failure {
            Some(reason) => warn!(kind = %self.kind(), reason = %reason, "Catalog fetch failed"),
            None => info!(
                kind = %self.kind(),
                products = fetch.products.len(),
                "Catalog fetch complete"
            ),
        }

        fetch
    }
}

// =============================================================================
// File Source
// =============================================================================

async fn fetch_file(config: &FileSourceConfig) -> CatalogFetch {
    let path = match resolve_product_file(config).await {
        Ok(path) => path,
        Err(reason) => return CatalogFetch::failed(reason),
    };

    let raw = match tokio::fs::read(&path).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            return CatalogFetch::failed(format!("read {}: {e}", path.display()));
        }
    };

    let layout = match RenderLayout::from_config(&config.fields, &config.delimiter, false, 2) {
        Ok(layout) => layout,
        Err(e) => return CatalogFetch::failed(format!("file layout: {e}")),
    };

    let header = layout.header_line().to_lowercase();
    let mut products = Vec::new();
    let mut skipped = 0usize;
    let mut header_seen = false;

    for line in raw.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        // One leading row matching the header labels is skipped.
        if !header_seen && products.is_empty() && line.trim().to_lowercase() == header {
            header_seen = true;
            continue;
        }
        match render::parse_line(line, &layout) {
            Ok(product) => products.push(product),
            Err(e) => {
                debug!(line, error = %e, "Skipping malformed product row");
                skipped += 1;
            }
        }
    }

    if skipped > 0 {
        warn!(
            path = %path.display(),
            skipped,
            accepted = products.len(),
            "Product file contained malformed rows"
        );
    }

    CatalogFetch::ok(products)
}

/// Resolves the product file: the path itself, or the newest matching file
/// when the path is a directory.
async fn resolve_product_file(config: &FileSourceConfig) -> Result<PathBuf, String> {
    let path = &config.path;
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| format!("stat {}: {e}", path.display()))?;

    if meta.is_file() {
        return Ok(path.clone());
    }

    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    let mut entries = tokio::fs::read_dir(path)
        .await
        .map_err(|e| format!("read dir {}: {e}", path.display()))?;

    while let Ok(Some(entry)) = entries.next_entry().await {
        let entry_path = entry.path();
        let Ok(entry_meta) = entry.metadata().await else {
            continue;
        };
        if !entry_meta.is_file() || !matches_pattern(&entry_path, config) {
            continue;
        }
        let modified = entry_meta
            .modified()
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        if newest
            .as_ref()
            .map(|(best, _)| modified > *best)
            .unwrap_or(true)
        {
            newest = Some((modified, entry_path));
        }
    }

    newest.map(|(_, p)| p).ok_or_else(|| {
        format!(
            "no file matching '{}*{}' in {}",
            config.file_prefix,
            config.file_extension,
            path.display()
        )
    })
}

/// Case-insensitive prefix + extension match on the file name.
fn matches_pattern(path: &Path, config: &FileSourceConfig) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let name = name.to_lowercase();
    name.starts_with(&config.file_prefix.to_lowercase())
        && name.ends_with(&config.file_extension.to_lowercase())
}

// =============================================================================
// API Source
// =============================================================================

/// The shapes a catalog endpoint may answer with, resolved once here.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CatalogPayload {
    /// Bare product array.
    List(Vec<ApiProduct>),
    /// Wrapper object containing the array.
    Wrapper { products: Vec<ApiProduct> },
}

/// One product record as the API presents it.
#[derive(Debug, Deserialize)]
struct ApiProduct {
    barcode: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    price: Option<RawPrice>,
    #[serde(default)]
    promo: Option<String>,
}

/// Price as delivered by the remote side: decimal number or decimal text.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPrice {
    Number(f64),
    Text(String),
}

impl RawPrice {
    /// Converts to integer cents; `None` when the value is unusable.
    fn to_cents(&self) -> Option<i64> {
        match self {
            RawPrice::Number(n) if n.is_finite() => Some((n * 100.0).round() as i64),
            RawPrice::Number(_) => None,
            RawPrice::Text(s) => render::parse_price_cents(s).ok(),
        }
    }
}

impl ApiProduct {
    fn into_product(self) -> Option<Product> {
        let price_cents = match &self.price {
            Some(raw) => match raw.to_cents() {
                Some(cents) => cents,
                None => {
                    warn!(barcode = %self.barcode, price = ?self.price, "Skipping product with unusable price");
                    return None;
                }
            },
            None => 0,
        };

        Some(Product {
            barcode: self.barcode,
            name: self.name.unwrap_or_default(),
            price_cents,
            promo: self.promo,
        })
    }
}

async fn fetch_api(config: &ApiSourceConfig) -> CatalogFetch {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
    {
        Ok(client) => client,
        Err(e) => return CatalogFetch::failed(format!("http client: {e}")),
    };

    let mut request = client.get(&config.url);
    if let Some(token) = &config.bearer_token {
        request = request.bearer_auth(token);
    } else if let Some(username) = &config.username {
        request = request.basic_auth(username, config.password.as_deref());
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => return CatalogFetch::failed(format!("request: {e}")),
    };

    if !response.status().is_success() {
        return CatalogFetch::failed(format!("endpoint answered {}", response.status()));
    }

    // Any shape other than a product list or a wrapper around one is a
    // source failure, not a crash.
    let payload: CatalogPayload = match response.json().await {
        Ok(payload) => payload,
        Err(e) => return CatalogFetch::failed(format!("unexpected payload shape: {e}")),
    };

    let records = match payload {
        CatalogPayload::List(records) => records,
        CatalogPayload::Wrapper { products } => products,
    };

    let products = records
        .into_iter()
        .filter_map(ApiProduct::into_product)
        .collect();

    CatalogFetch::ok(products)
}

// =============================================================================
// Database Source
// =============================================================================

static INSTALL_DRIVERS: Once = Once::new();

async fn fetch_database(config: &DbSourceConfig) -> CatalogFetch {
    INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);

    let pool = match AnyPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => return CatalogFetch::failed(format!("connect: {e}")),
    };

    let rows = match sqlx::query(&config.query).fetch_all(&pool).await {
        Ok(rows) => rows,
        Err(e) => {
            pool.close().await;
            return CatalogFetch::failed(format!("query: {e}"));
        }
    };

    let mut products = Vec::new();
    for row in &rows {
        match row_to_product(row) {
            Some(product) => products.push(product),
            None => {
                warn!("Skipping catalog row that does not map to a product");
            }
        }
    }

    pool.close().await;
    CatalogFetch::ok(products)
}

/// Maps a result row to a Product using the query's column names.
///
/// Expected columns (alias in the query as needed): barcode, name, price,
/// promo. Price columns may be decimal, integer currency units, or text.
fn row_to_product(row: &sqlx::any::AnyRow) -> Option<Product> {
    let barcode: String = row.try_get("barcode").ok()?;

    let name: String = row.try_get("name").unwrap_or_default();

    let price_cents = read_price(row)?;

    let has_promo = row.columns().iter().any(|c| c.name() == "promo");
    let promo: Option<String> = if has_promo {
        row.try_get("promo").ok()
    } else {
        None
    };

    Some(Product {
        barcode,
        name,
        price_cents,
        promo,
    })
}

fn read_price(row: &sqlx::any::AnyRow) -> Option<i64> {
    if let Ok(value) = row.try_get::<f64, _>("price") {
        return value.is_finite().then(|| (value * 100.0).round() as i64);
    }
    if let Ok(value) = row.try_get::<i64, _>("price") {
        return Some(value * 100);
    }
    if let Ok(value) = row.try_get::<String, _>("price") {
        return render::parse_price_cents(&value).ok();
    }
    None
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn file_config(path: &Path) -> FileSourceConfig {
        FileSourceConfig {
            path: path.to_path_buf(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_file_source_parses_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prices.txt");
        std::fs::write(&path, "111;Cola;0.99\n222;Water;0.49\n").unwrap();

        let fetch = fetch_file(&file_config(&path)).await;
        assert!(fetch.failure.is_none());
        assert_eq!(fetch.products.len(), 2);
        assert_eq!(fetch.products[0].price_cents, 99);
    }

    #[tokio::test]
    async fn test_file_source_skips_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prices.txt");
        std::fs::write(&path, "barcode;name;price\n111;Cola;0.99\n").unwrap();

        let fetch = fetch_file(&file_config(&path)).await;
        assert_eq!(fetch.products.len(), 1);
        assert_eq!(fetch.products[0].barcode, "111");
    }

    #[tokio::test]
    async fn test_file_source_skips_malformed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prices.txt");
        // Second row has the wrong field count, third has a broken price.
        std::fs::write(&path, "111;Cola;0.99\nbroken-row\n333;Pen;abc\n444;Water;0.49\n")
            .unwrap();

        let fetch = fetch_file(&file_config(&path)).await;
        assert!(fetch.failure.is_none());
        let barcodes: Vec<_> = fetch.products.iter().map(|p| p.barcode.as_str()).collect();
        assert_eq!(barcodes, vec!["111", "444"]);
    }

    #[tokio::test]
    async fn test_file_source_directory_picks_newest_matching() {
        let dir = tempfile::tempdir().unwrap();

        let old = dir.path().join("prices_old.txt");
        std::fs::write(&old, "111;Old;1.00\n").unwrap();
        let ignored = dir.path().join("readme.md");
        std::fs::write(&ignored, "not a product file").unwrap();

        // Newest matching file wins.
        std::thread::sleep(std::time::Duration::from_millis(20));
        let new = dir.path().join("PRICES_NEW.TXT");
        let mut f = std::fs::File::create(&new).unwrap();
        writeln!(f, "222;New;2.00").unwrap();
        drop(f);

        let fetch = fetch_file(&file_config(dir.path())).await;
        assert_eq!(fetch.products.len(), 1);
        assert_eq!(fetch.products[0].barcode, "222");
    }

    #[tokio::test]
    async fn test_file_source_missing_path_is_failure_not_crash() {
        let fetch = fetch_file(&file_config(Path::new("/nonexistent/catalog"))).await;
        assert!(fetch.products.is_empty());
        assert!(fetch.failure.is_some());
    }

    #[test]
    fn test_payload_shapes() {
        let list: CatalogPayload =
            serde_json::from_str(r#"[{"barcode": "111", "name": "Cola", "price": 0.99}]"#).unwrap();
        assert!(matches!(list, CatalogPayload::List(ref v) if v.len() == 1));

        let wrapper: CatalogPayload = serde_json::from_str(
            r#"{"products": [{"barcode": "111", "price": "0.99"}, {"barcode": "222"}]}"#,
        )
        .unwrap();
        assert!(matches!(wrapper, CatalogPayload::Wrapper { ref products } if products.len() == 2));

        // Any other shape is invalid - a source failure, not a crash.
        assert!(serde_json::from_str::<CatalogPayload>(r#"{"error": "nope"}"#).is_err());
    }

    #[test]
    fn test_raw_price_conversion() {
        assert_eq!(RawPrice::Number(0.99).to_cents(), Some(99));
        assert_eq!(RawPrice::Number(10.005).to_cents(), Some(1001));
        assert_eq!(RawPrice::Text("1.49".into()).to_cents(), Some(149));
        assert_eq!(RawPrice::Text("garbage".into()).to_cents(), None);
        assert_eq!(RawPrice::Number(f64::NAN).to_cents(), None);
    }

    #[tokio::test]
    async fn test_database_source_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("catalog.db");

        // Seed a catalog with plain sqlite.
        {
            use sqlx::sqlite::SqliteConnectOptions;
            use std::str::FromStr;
            let options =
                SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))
                    .unwrap()
                    .create_if_missing(true);
            let pool = sqlx::SqlitePool::connect_with(options).await.unwrap();
            sqlx::query(
                "CREATE TABLE items (ean TEXT, label TEXT, unit_price REAL, offer TEXT)",
            )
            .execute(&pool)
            .await
            .unwrap();
            sqlx::query(
                "INSERT INTO items VALUES ('111', 'Cola', 0.99, NULL), ('222', 'Water', 0.49, '2 for 1')",
            )
            .execute(&pool)
            .await
            .unwrap();
            pool.close().await;
        }

        let config = DbSourceConfig {
            url: format!("sqlite://{}", db_path.display()),
            query: "SELECT ean AS barcode, label AS name, unit_price AS price, offer AS promo \
                    FROM items ORDER BY ean"
                .into(),
        };

        let fetch = fetch_database(&config).await;
        assert!(fetch.failure.is_none(), "failure: {:?}", fetch.failure);
        assert_eq!(fetch.products.len(), 2);
        assert_eq!(fetch.products[0].price_cents, 99);
        assert_eq!(fetch.products[1].promo.as_deref(), Some("2 for 1"));
    }

    #[tokio::test]
    async fn test_database_source_bad_url_is_failure() {
        let config = DbSourceConfig {
            url: "sqlite:///nonexistent/dir/catalog.db".into(),
            query: "SELECT 1".into(),
        };
        let fetch = fetch_database(&config).await;
        assert!(fetch.products.is_empty());
        assert!(fetch.failure.is_some());
    }
}
