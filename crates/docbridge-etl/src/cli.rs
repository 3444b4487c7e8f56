//! Command-line surface of the `docbridge` binary

use crate::catalog::Catalog;
use crate::config::EtlConfig;
use crate::extract::{ExtractOptions, Extractor};
use crate::import::{DocumentSink, ImportOptions, Importer, RowSource};
use crate::progress::{BarProgress, LogProgress, ProgressReporter};
use crate::sink::RelationalSink;
use crate::stores::memory::{MemoryDocumentSink, MemorySink};
use crate::stores::mongo::{self, MongoDocumentSink, MongoSource};
use crate::stores::postgres::{create_pool, PgRowSource, PgSink};
use crate::summary::RunSummary;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};

/// Docbridge - move loyalty records between MongoDB and PostgreSQL
#[derive(Parser, Debug)]
#[command(name = "docbridge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Field catalog (TOML); the embedded catalog is used when omitted
    #[arg(long, env = "DOCBRIDGE_CATALOG", global = true)]
    pub catalog: Option<PathBuf>,

    /// Only process these entity types (repeatable)
    #[arg(short, long = "entity", global = true)]
    pub entities: Vec<String>,

    /// Read from the real source but write to an in-memory store
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Show a progress bar when attached to a terminal
    #[arg(long, global = true)]
    pub progress: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Copy document collections into relational tables
    Extract {
        /// Documents per batch
        #[arg(short, long, env = "DOCBRIDGE_BATCH_SIZE")]
        batch_size: Option<usize>,

        /// Truncate existing tables before their first batch
        #[arg(long)]
        truncate: bool,
    },

    /// Turn staged relational rows into document collections
    Import {
        /// Rows per page
        #[arg(short, long, env = "DOCBRIDGE_BATCH_SIZE")]
        page_size: Option<usize>,

        /// Staging table, optionally schema-qualified
        #[arg(long, env = "DOCBRIDGE_SOURCE_TABLE")]
        source_table: Option<String>,

        /// Column naming each row's entity type
        #[arg(long, env = "DOCBRIDGE_DISCRIMINATOR")]
        discriminator: Option<String>,
    },

    /// Validate the catalog and list its entity types
    Catalog,
}

impl Cli {
    /// Environment configuration with this invocation's flags applied
    pub fn resolve_config(&self, mut config: EtlConfig) -> anyhow::Result<EtlConfig> {
        if let Some(path) = &self.catalog {
            config.catalog_path = Some(path.clone());
        }

        match &self.command {
            Commands::Extract {
                batch_size,
                truncate,
            } => {
                if let Some(size) = batch_size {
                    config.batch_size = *size;
                }
                config.truncate_on_first_batch |= *truncate;
            }
            Commands::Import {
                page_size,
                source_table,
                discriminator,
            } => {
                if let Some(size) = page_size {
                    config.batch_size = *size;
                }
                if let Some(table) = source_table {
                    config.source_table = table.clone();
                }
                if let Some(column) = discriminator {
                    config.discriminator = column.clone();
                }
            }
            Commands::Catalog => {}
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    fn entity_filter(&self) -> Option<Vec<String>> {
        (!self.entities.is_empty()).then(|| self.entities.clone())
    }

    fn progress_reporter(&self) -> Arc<dyn ProgressReporter> {
        if self.progress && std::io::stdout().is_terminal() {
            Arc::new(BarProgress::new())
        } else {
            Arc::new(LogProgress)
        }
    }
}

/// Run the selected command. `Ok(None)` for commands that do not move data.
pub async fn execute(cli: &Cli, cancel: Arc<AtomicBool>) -> anyhow::Result<Option<RunSummary>> {
    let env_config = EtlConfig::load().context("Failed to load configuration")?;
    let config = cli.resolve_config(env_config)?;

    match &cli.command {
        Commands::Extract { .. } => extract(cli, &config, cancel).await.map(Some),
        Commands::Import { .. } => import(cli, &config, cancel).await.map(Some),
        Commands::Catalog => {
            let catalog = config.load_catalog().context("Failed to load catalog")?;
            print_catalog(&catalog);
            Ok(None)
        }
    }
}

async fn extract(cli: &Cli, config: &EtlConfig, cancel: Arc<AtomicBool>) -> anyhow::Result<RunSummary> {
    let catalog = config.load_catalog().context("Failed to load catalog")?;
    info!(entities = catalog.len(), "Catalog loaded");

    let database = mongo::connect(&config.mongo_url, &config.mongo_database)
        .await
        .context("Failed to connect to document store")?;
    let source = Arc::new(MongoSource::new(database));

    let sink: Arc<dyn RelationalSink> = if cli.dry_run {
        warn!("Dry run: rows are loaded into memory and discarded");
        Arc::new(MemorySink::new())
    } else {
        let pool = create_pool(&config.database)
            .await
            .context("Failed to connect to relational store")?;
        Arc::new(PgSink::new(pool, config.bulk_timeout()))
    };

    let options = ExtractOptions::builder()
        .batch_size(config.batch_size)
        .truncate_on_first_batch(config.truncate_on_first_batch)
        .entity_filter(cli.entity_filter())
        .build();

    let summary = Extractor::new(Arc::new(catalog), source, sink, options)
        .with_progress(cli.progress_reporter())
        .with_cancel_flag(cancel)
        .run()
        .await
        .context("Extraction failed")?;
    Ok(summary)
}

async fn import(cli: &Cli, config: &EtlConfig, cancel: Arc<AtomicBool>) -> anyhow::Result<RunSummary> {
    let pool = create_pool(&config.database)
        .await
        .context("Failed to connect to relational store")?;
    let source: Arc<dyn RowSource> = Arc::new(
        PgRowSource::new(pool, &config.source_table, &config.discriminator)
            .context("Invalid import source")?,
    );

    let sink: Arc<dyn DocumentSink> = if cli.dry_run {
        warn!("Dry run: documents are inserted into memory and discarded");
        Arc::new(MemoryDocumentSink::new())
    } else {
        let database = mongo::connect(&config.mongo_url, &config.mongo_database)
            .await
            .context("Failed to connect to document store")?;
        Arc::new(MongoDocumentSink::new(database))
    };

    let options = ImportOptions {
        page_size: config.batch_size,
        entity_filter: cli.entity_filter(),
        ..ImportOptions::default()
    };

    let summary = Importer::new(source, sink, options)
        .with_progress(cli.progress_reporter())
        .with_cancel_flag(cancel)
        .run()
        .await
        .context("Import failed")?;
    Ok(summary)
}

fn print_catalog(catalog: &Catalog) {
    println!("{:<32} {:>6}  DESCRIPTION", "ENTITY TYPE", "FIELDS");
    for name in catalog.entity_names() {
        if let Some(mapping) = catalog.get(name) {
            println!(
                "{:<32} {:>6}  {}",
                mapping.name,
                mapping.fields.len(),
                mapping.description
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "docbridge",
            "extract",
            "--batch-size",
            "200",
            "--truncate",
            "--entity",
            "GiftCardPayment",
            "-e",
            "CardActivation",
        ])
        .unwrap();

        let config = cli.resolve_config(EtlConfig::default()).unwrap();
        assert_eq!(config.batch_size, 200);
        assert!(config.truncate_on_first_batch);
        assert_eq!(
            cli.entity_filter(),
            Some(vec!["GiftCardPayment".to_string(), "CardActivation".to_string()])
        );
    }

    #[test]
    fn test_import_flags() {
        let cli = Cli::try_parse_from([
            "docbridge",
            "import",
            "--source-table",
            "staging.rows",
            "--discriminator",
            "Kind",
            "--dry-run",
        ])
        .unwrap();

        let config = cli.resolve_config(EtlConfig::default()).unwrap();
        assert_eq!(config.source_table, "staging.rows");
        assert_eq!(config.discriminator, "Kind");
        assert!(cli.dry_run);
        assert!(cli.entity_filter().is_none());
    }

    #[test]
    fn test_invalid_override_rejected() {
        let cli = Cli::try_parse_from(["docbridge", "import", "--source-table", "a.b.c"]).unwrap();
        assert!(cli.resolve_config(EtlConfig::default()).is_err());
    }
}
