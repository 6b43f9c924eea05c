//! Metroid command-line client.
//!
//! Tracks single records and queries stored ones against the configured
//! backend.
//!
//! # Configuration
//!
//! Configuration can be provided through multiple sources, in order of precedence:
//!
//! 1. Command-line arguments (highest precedence)
//! 2. Environment variables (prefixed with `METROID_`, `__` between section and key)
//! 3. User-specified configuration file (via `--config`)
//! 4. `config/local.toml` and `config/default.toml` in the working directory
//! 5. Default configuration (embedded in binary)
//!
//! A `.env` file in the working directory is loaded first.
//!
//! # Examples
//!
//! ```bash
//! # Track a record in a DuckDB file
//! metroid --engine duckdb --connection metroids.db \
//!   track --subject 123 --category 1 --attr SubscriptionLevel=Full --attr Price=129.99
//!
//! # Everything of category 1 tracked on two days
//! metroid --engine duckdb --connection metroids.db \
//!   range --category 1 --start 2026-10-15 --end 2026-10-16
//!
//! # A subject's latest records
//! metroid --engine duckdb --connection metroids.db recent --subject 123 --limit 5
//! ```

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveTime, TimeZone};
use clap::{Parser, Subcommand};
use metroid::{AttributeValue, ConfigArgs, Metroid, MetroidClient, Settings};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Track one record and flush it
    Track {
        /// Subject the record belongs to
        #[arg(long)]
        subject: i64,
        /// Record category
        #[arg(long)]
        category: i64,
        /// Attribute (KEY=VALUE, can be repeated); numeric values are stored as numbers
        #[arg(long = "attr", value_name = "KEY=VAL")]
        attrs: Vec<String>,
    },
    /// Print records of a category tracked between two dates, inclusive
    Range {
        #[arg(long)]
        category: i64,
        /// First day (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,
        /// Last day (YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,
    },
    /// Print a subject's most recent records, newest first
    Recent {
        #[arg(long)]
        subject: i64,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Delete the table and everything in it
    Destroy,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::new(&cli.config)?;
    info!(
        engine = %settings.backend.engine,
        table = %settings.table.name,
        "starting metroid client"
    );
    let client = MetroidClient::initialize(&settings).await?;

    match cli.command {
        Command::Track {
            subject,
            category,
            attrs,
        } => {
            let mut metroid = Metroid::new(subject, category);
            for attr in &attrs {
                let (name, value) = parse_attribute(attr)?;
                metroid.set_attribute(name, value);
            }
            println!("{}", metroid);
            client.track(metroid);
            let stats = client.shutdown().await;
            if stats.records_dropped > 0 {
                return Err("record could not be written".into());
            }
        }
        Command::Range {
            category,
            start,
            end,
        } => {
            let found = client
                .retrieve(category, local_date(start)?, local_date(end)?)
                .await;
            client.shutdown().await;
            for metroid in found? {
                println!("{}", metroid);
            }
        }
        Command::Recent { subject, limit } => {
            let found = client.retrieve_most_recent_for_subject(subject, limit).await;
            client.shutdown().await;
            for metroid in found? {
                println!("{}", metroid);
            }
        }
        Command::Destroy => {
            client.destroy().await?;
        }
    }

    Ok(())
}

fn parse_attribute(raw: &str) -> Result<(String, AttributeValue), Box<dyn std::error::Error>> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    let value = match value.parse::<f64>() {
        Ok(number) => AttributeValue::Number(number),
        Err(_) => AttributeValue::Text(value.to_string()),
    };
    Ok((name.to_string(), value))
}

fn local_date(date: NaiveDate) -> Result<DateTime<Local>, Box<dyn std::error::Error>> {
    let midnight = date.and_time(NaiveTime::MIN);
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .or_else(|| Local.from_local_datetime(&(midnight + Duration::hours(1))).earliest())
        .ok_or_else(|| format!("{} has no local midnight", date).into())
}
