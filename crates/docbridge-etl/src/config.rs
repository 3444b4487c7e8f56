//! Run configuration
//!
//! Read once at startup from the environment (a `.env` file is honoured)
//! and then overridden by command-line flags.

use crate::catalog::Catalog;
use docbridge_common::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default document store URL.
pub const DEFAULT_MONGO_URL: &str = "mongodb://localhost:27017";

/// Default document store database.
pub const DEFAULT_MONGO_DATABASE: &str = "LoyaltyData";

/// Default relational store URL.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/collect";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 60;

/// Default rows per batch (extraction) and page (import).
pub const DEFAULT_BATCH_SIZE: usize = 5000;

/// Largest accepted batch size.
pub const MAX_BATCH_SIZE: usize = 100_000;

/// Default bulk load statement timeout in seconds.
pub const DEFAULT_BULK_TIMEOUT_SECS: u64 = 600;

/// Default staging table read by the importer.
pub const DEFAULT_SOURCE_TABLE: &str = "raw_data.from_stratech_transaction_loyalty";

/// Default discriminator column of the staging table.
pub const DEFAULT_DISCRIMINATOR: &str = "SourceEntityName";

/// Relational store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Everything a run needs besides the catalog contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlConfig {
    pub mongo_url: String,
    pub mongo_database: String,
    pub database: DatabaseConfig,
    pub batch_size: usize,
    pub truncate_on_first_batch: bool,
    pub bulk_timeout_secs: u64,
    pub source_table: String,
    pub discriminator: String,
    /// Catalog file; the embedded catalog is used when unset
    pub catalog_path: Option<PathBuf>,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl EtlConfig {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back to
    /// the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
            value.and_then(|s| s.trim().parse().ok()).unwrap_or(default)
        }

        Self {
            mongo_url: lookup("DOCBRIDGE_MONGO_URL").unwrap_or_else(|| DEFAULT_MONGO_URL.to_string()),
            mongo_database: lookup("DOCBRIDGE_MONGO_DATABASE")
                .unwrap_or_else(|| DEFAULT_MONGO_DATABASE.to_string()),
            database: DatabaseConfig {
                url: lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
                max_connections: parsed(
                    lookup("DATABASE_MAX_CONNECTIONS"),
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                connect_timeout_secs: parsed(
                    lookup("DATABASE_CONNECT_TIMEOUT"),
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
            },
            batch_size: parsed(lookup("DOCBRIDGE_BATCH_SIZE"), DEFAULT_BATCH_SIZE),
            truncate_on_first_batch: parsed(lookup("DOCBRIDGE_TRUNCATE"), false),
            bulk_timeout_secs: parsed(lookup("DOCBRIDGE_BULK_TIMEOUT"), DEFAULT_BULK_TIMEOUT_SECS),
            source_table: lookup("DOCBRIDGE_SOURCE_TABLE")
                .unwrap_or_else(|| DEFAULT_SOURCE_TABLE.to_string()),
            discriminator: lookup("DOCBRIDGE_DISCRIMINATOR")
                .unwrap_or_else(|| DEFAULT_DISCRIMINATOR.to_string()),
            catalog_path: lookup("DOCBRIDGE_CATALOG")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(BridgeError::config(format!(
                "batch size must be between 1 and {}, got {}",
                MAX_BATCH_SIZE, self.batch_size
            )));
        }

        check_url("DOCBRIDGE_MONGO_URL", &self.mongo_url, &["mongodb", "mongodb+srv"])?;
        check_url("DATABASE_URL", &self.database.url, &["postgres", "postgresql"])?;

        if self.mongo_database.trim().is_empty() {
            return Err(BridgeError::config("document store database name cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(BridgeError::config(
                "database max_connections must be greater than 0",
            ));
        }

        if self.bulk_timeout_secs == 0 {
            return Err(BridgeError::config("bulk load timeout must be greater than 0"));
        }

        let parts: Vec<&str> = self.source_table.split('.').collect();
        if parts.len() > 2 || !parts.iter().all(|p| is_plain_identifier(p)) {
            return Err(BridgeError::config(format!(
                "source table '{}' is not a valid table name",
                self.source_table
            )));
        }

        if !is_plain_identifier(&self.discriminator) {
            return Err(BridgeError::config(format!(
                "discriminator column '{}' is not a valid column name",
                self.discriminator
            )));
        }

        Ok(())
    }

    pub fn bulk_timeout(&self) -> Duration {
        Duration::from_secs(self.bulk_timeout_secs)
    }

    /// The configured catalog file, or the embedded catalog
    pub fn load_catalog(&self) -> Result<Catalog> {
        match &self.catalog_path {
            Some(path) => Catalog::from_file(path),
            None => Catalog::builtin(),
        }
    }
}

fn check_url(name: &str, value: &str, schemes: &[&str]) -> Result<()> {
    if value.trim().is_empty() {
        return Err(BridgeError::config(format!("{} cannot be empty", name)));
    }
    let url = Url::parse(value)
        .map_err(|e| BridgeError::config(format!("{} is not a valid URL: {}", name, e)))?;
    if !schemes.contains(&url.scheme()) {
        return Err(BridgeError::config(format!(
            "{} must use one of the schemes {:?}, got '{}'",
            name,
            schemes,
            url.scheme()
        )));
    }
    Ok(())
}

/// Letters, digits and underscores, not starting with a digit, at most 63
/// bytes. Such names are safe to splice into SQL unquoted.
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= crate::sink::MAX_IDENTIFIER_LEN
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> EtlConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EtlConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = EtlConfig::default();
        assert_eq!(config.mongo_url, DEFAULT_MONGO_URL);
        assert_eq!(config.mongo_database, "LoyaltyData");
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.batch_size, 5000);
        assert!(!config.truncate_on_first_batch);
        assert_eq!(config.bulk_timeout(), Duration::from_secs(600));
        assert_eq!(config.source_table, DEFAULT_SOURCE_TABLE);
        assert_eq!(config.discriminator, "SourceEntityName");
        assert!(config.catalog_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("DOCBRIDGE_BATCH_SIZE", "250"),
            ("DOCBRIDGE_TRUNCATE", "true"),
            ("DOCBRIDGE_CATALOG", "/etc/docbridge/catalog.toml"),
            ("DATABASE_CONNECT_TIMEOUT", "not-a-number"),
        ]);
        assert_eq!(config.batch_size, 250);
        assert!(config.truncate_on_first_batch);
        assert_eq!(
            config.catalog_path,
            Some(PathBuf::from("/etc/docbridge/catalog.toml"))
        );
        assert_eq!(
            config.database.connect_timeout_secs,
            DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS
        );
    }

    #[test]
    fn test_validation_failures() {
        assert!(config_from(&[("DOCBRIDGE_BATCH_SIZE", "0")]).validate().is_err());
        assert!(config_from(&[("DOCBRIDGE_BATCH_SIZE", "100001")]).validate().is_err());
        assert!(config_from(&[("DATABASE_URL", "mysql://localhost/collect")])
            .validate()
            .is_err());
        assert!(config_from(&[("DOCBRIDGE_MONGO_URL", "")]).validate().is_err());
        assert!(config_from(&[("DOCBRIDGE_SOURCE_TABLE", "raw_data.rows;drop")])
            .validate()
            .is_err());
        assert!(config_from(&[("DOCBRIDGE_DISCRIMINATOR", "1col")])
            .validate()
            .is_err());
    }

    #[test]
    fn test_plain_identifier() {
        assert!(is_plain_identifier("SourceEntityName"));
        assert!(is_plain_identifier("_staging2"));
        assert!(!is_plain_identifier(""));
        assert!(!is_plain_identifier("a-b"));
        assert!(!is_plain_identifier(&"a".repeat(64)));
    }

    #[test]
    fn test_load_catalog() {
        assert_eq!(EtlConfig::default().load_catalog().unwrap().len(), 9);

        let missing = config_from(&[("DOCBRIDGE_CATALOG", "/nonexistent/catalog.toml")]);
        assert!(missing.load_catalog().is_err());
    }
}
