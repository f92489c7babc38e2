//! Home Assistant history migration CLI
//!
//! Copies recorder history from the SQLite database into InfluxDB.
//! Pedantic lints relaxed for CLI ergonomics.

// CLI tool - relax pedantic lints for ergonomics
#![allow(clippy::pedantic)]

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use hass_migrate::config::ConnectionSettings;
use hass_migrate::connectors::create_source;
use hass_migrate::{planner, MigrationConfig, Pipeline, POLICY_VERSION};

#[derive(Parser)]
#[command(name = "hass-migrate")]
#[command(version)]
#[command(about = "Migrate Home Assistant recorder history into InfluxDB", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    connection: ConnectionArgs,

    /// Dry run mode (convert rows, don't write to InfluxDB)
    #[arg(long, global = true)]
    dry_run: bool,

    /// Verbose output
    #[arg(
        short,
        long,
        global = true,
        env = "DEBUG_MODE",
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    verbose: bool,

    /// Batch size override
    #[arg(long, global = true, env = "BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Hide the progress bar
    #[arg(long, global = true)]
    no_progress: bool,
}

/// Connection settings; each one overrides the configuration file.
#[derive(Args)]
struct ConnectionArgs {
    /// Recorder database path
    #[arg(long, global = true, env = "SQLITE_DB", value_name = "PATH")]
    sqlite_db: Option<PathBuf>,

    /// InfluxDB URL
    #[arg(long, global = true, env = "INFLUXDB_URL")]
    influx_url: Option<String>,

    /// InfluxDB API token
    #[arg(long, global = true, env = "INFLUXDB_TOKEN", hide_env_values = true)]
    influx_token: Option<String>,

    /// InfluxDB organization
    #[arg(long, global = true, env = "INFLUXDB_ORG")]
    influx_org: Option<String>,

    /// InfluxDB bucket
    #[arg(long, global = true, env = "INFLUXDB_BUCKET")]
    influx_bucket: Option<String>,
}

impl ConnectionArgs {
    fn settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            sqlite_db: self.sqlite_db.clone(),
            influx_url: self.influx_url.clone(),
            influx_token: self.influx_token.clone(),
            influx_org: self.influx_org.clone(),
            influx_bucket: self.influx_bucket.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the migration
    Run,

    /// Validate the configuration
    Validate,

    /// Show what the recorder database holds
    Schema,

    /// Generate an example configuration
    Init {
        /// Output file path
        #[arg(short, long, default_value = "hass-migrate.yaml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Some(Commands::Run) | None => run_migration(&cli).await?,
        Some(Commands::Validate) => validate_config(&cli)?,
        Some(Commands::Schema) => show_schema(&cli).await?,
        Some(Commands::Init { ref output }) => generate_config(output)?,
    }

    Ok(())
}

/// Builds the run configuration from the file (if any), then flags and
/// environment variables.
fn load_config(cli: &Cli) -> anyhow::Result<MigrationConfig> {
    let settings = cli.connection.settings();

    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            let mut config = MigrationConfig::from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            if let Some(v) = settings.sqlite_db {
                config.source.path = v;
            }
            if let Some(v) = settings.influx_url {
                config.destination.url = v;
            }
            if let Some(v) = settings.influx_token {
                config.destination.token = v;
            }
            if let Some(v) = settings.influx_org {
                config.destination.org = v;
            }
            if let Some(v) = settings.influx_bucket {
                config.destination.bucket = v;
            }
            config
        }
        None => settings.into_config()?,
    };

    if cli.dry_run {
        config.options.dry_run = true;
    }
    if let Some(bs) = cli.batch_size {
        config.options.batch_size = bs;
    }
    if cli.no_progress {
        config.options.progress = false;
    }

    config.validate()?;
    Ok(config)
}

async fn run_migration(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let dry_run = config.options.dry_run;

    info!("Starting migration...");

    let mut pipeline = Pipeline::new(config);
    let stats = pipeline.run().await?;

    if dry_run {
        println!("\n✅ Dry run complete (nothing written)");
    } else {
        println!("\n✅ Migration Complete!");
    }
    println!(
        "   Watermark:  {}",
        stats
            .watermark
            .map_or("none (full history)".to_string(), |w| w.to_rfc3339())
    );
    println!("   Rows read:  {}", stats.rows_read);
    println!("   Written:    {}", stats.points_written);
    println!(
        "   Skipped:    {} (unavailable {}, missing state {}, invalid timestamp {})",
        stats.rows_skipped,
        stats.skipped.unavailable,
        stats.skipped.missing_state,
        stats.skipped.invalid_timestamp
    );
    println!(
        "   Fields dropped: {} non-numeric, {} reserved name, {} name collision",
        stats.field_conversion, stats.reserved_name, stats.name_collision
    );
    println!("   Malformed attributes: {}", stats.malformed_attributes);
    println!(
        "   Batches:    {} ({} failed, {} points lost)",
        stats.batches, stats.failed_batches, stats.points_failed
    );
    if stats.partial_batches > 0 {
        println!(
            "   Partially stored: {} batches ({} points sent, type conflicts dropped)",
            stats.partial_batches, stats.points_partial
        );
    }
    println!("   Duration:   {:.2}s", stats.duration_secs);
    println!("   Throughput: {:.0} rows/sec", stats.throughput());

    Ok(())
}

fn validate_config(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;

    println!("✅ Configuration is valid!");
    println!("   Source:      {}", config.source.path.display());
    println!("   Destination: {}", config.destination.url);
    println!("   Org/bucket:  {}/{}", config.destination.org, config.destination.bucket);
    println!("   Batch size:  {}", config.options.batch_size);
    println!(
        "   Naming:      v{} ({} / {} / *{})",
        POLICY_VERSION,
        config.options.naming.numeric_state_field,
        config.options.naming.text_state_field,
        config.options.naming.text_suffix
    );

    Ok(())
}

async fn show_schema(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let mut connector = create_source(&config.source);

    connector.connect().await?;
    let schema = connector.inspect().await?;
    let query = planner::plan(schema.layout, None);
    connector.close().await?;

    let fmt_time = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map_or("unknown".to_string(), |t| t.to_rfc3339())
    };

    println!("\n📊 Recorder Database:");
    println!("   Path:     {}", config.source.path.display());
    println!("   Layout:   {:?}", schema.layout);
    println!("   Rows:     {}", schema.total_rows);
    println!("   Entities: {}", schema.entities);
    println!("   Oldest:   {}", fmt_time(schema.oldest));
    println!("   Newest:   {}", fmt_time(schema.newest));
    info!(sql = %query.sql, "extraction query");

    Ok(())
}

fn generate_config(output: &Path) -> anyhow::Result<()> {
    std::fs::write(output, CONFIG_TEMPLATE)?;
    println!("✅ Generated configuration: {:?}", output);
    println!(
        "   Edit the file and run: hass-migrate run --config {:?}",
        output
    );

    Ok(())
}

const CONFIG_TEMPLATE: &str = r#"# Home Assistant -> InfluxDB migration
source:
  path: /config/home-assistant_v2.db

destination:
  url: http://localhost:8086
  token: your-influxdb-token
  org: home
  bucket: home_assistant

options:
  batch_size: 10000
  dry_run: false
  # Rows older than the oldest point in this measurement are migrated.
  watermark_measurement: units
  skip_unavailable: true
  unavailable_states: [unknown, unavailable]
  source_tag: HA
  default_measurement: default_measurement
  default_friendly_name: unnamed
  ignored_attributes: [id, id_str, update_available]
  numeric_attributes: [temperature, humidity]
  # Changing these after a first run creates new field names in InfluxDB.
  naming:
    numeric_state_field: value
    text_state_field: state
    text_suffix: _str
  max_retries: 3
  progress: true
"#;
