use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use top100_index::config::{CacheBackendKind, Config, ConfigOverrides};
use top100_index::error::{check_range, parse_date, Lookup};
use top100_index::index::IndexCalculator;
use top100_index::output::csv::{
    acquisition_to_csv, build_to_csv, change_log_to_csv, changes_to_csv, composition_to_csv, performance_to_csv,
};
use top100_index::output::json::render_json;
use top100_index::output::table::{
    render_acquisition_table, render_build_table, render_change_log_table, render_changes_table,
    render_composition_table, render_performance_table,
};
use top100_index::server::run_server;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Debug, Parser)]
#[command(
    name = "top100-index",
    about = "Equal-weighted index over the top 100 US equities"
)]
struct Cli {
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(long)]
    db: Option<String>,
    #[arg(long, value_enum)]
    cache: Option<CacheBackendKind>,
    #[arg(long = "redis-url")]
    redis_url: Option<String>,
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
    /// Overrides RUST_LOG.
    #[arg(long = "log-level")]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Compute and store daily returns for a date range.
    Build {
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
    },
    Performance {
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
    },
    Composition {
        #[arg(long)]
        date: String,
    },
    Changes {
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        /// Read the change log written during acquisition instead of diffing snapshots.
        #[arg(long)]
        recorded: bool,
    },
    /// Fetch listings and quotes and store one day at a time.
    Acquire {
        #[arg(long, default_value_t = 30, conflicts_with_all = ["start", "end"])]
        days: u32,
        #[arg(long, requires = "end")]
        start: Option<String>,
        #[arg(long, requires = "start")]
        end: Option<String>,
    },
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    Config {
        #[arg(long)]
        init: bool,
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(Some(&config_path))?;
    config.apply_overrides(ConfigOverrides {
        db_path: cli.db.clone(),
        cache_backend: cli.cache,
        redis_url: cli.redis_url.clone(),
    });

    match &cli.command {
        Commands::Config { init, show } => {
            handle_config_command(*init, *show, &config, &config_path)?;
        }
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host.clone();
            }
            if let Some(port) = port {
                config.server.port = *port;
            }
            let addr = config.bind_address()?;
            run_server(config, addr).await?;
        }
        Commands::Build { start, end } => {
            let (start, end) = parse_range(start, end)?;
            let result = config.open_calculator()?.build_index(start, end).await?;
            match cli.output {
                OutputFormat::Table => println!("{}", render_build_table(&result)),
                OutputFormat::Json => println!("{}", render_json(&result)?),
                OutputFormat::Csv => print!("{}", build_to_csv(&result)?),
            }
        }
        Commands::Performance { start, end } => {
            let (start, end) = parse_range(start, end)?;
            let lookup = config.open_calculator()?.get_performance(start, end).await?;
            let Lookup::Found(report) = lookup else {
                warn!("no performance data between {start} and {end}");
                return Ok(());
            };
            match cli.output {
                OutputFormat::Table => println!("{}", render_performance_table(&report)),
                OutputFormat::Json => println!("{}", render_json(&report)?),
                OutputFormat::Csv => print!("{}", performance_to_csv(&report)?),
            }
        }
        Commands::Composition { date } => {
            let date = parse_date(date)?;
            let lookup = config.open_calculator()?.get_composition_for_date(date).await?;
            let Lookup::Found(rows) = lookup else {
                warn!("no composition stored for {date}");
                return Ok(());
            };
            match cli.output {
                OutputFormat::Table => println!("{}", render_composition_table(&rows)),
                OutputFormat::Json => println!("{}", render_json(&rows)?),
                OutputFormat::Csv => print!("{}", composition_to_csv(&rows)?),
            }
        }
        Commands::Changes {
            start,
            end,
            recorded: true,
        } => {
            let (start, end) = parse_range(start, end)?;
            let log = config.open_store()?.changes_between(start, end)?;
            match cli.output {
                OutputFormat::Table => println!("{}", render_change_log_table(&log)),
                OutputFormat::Json => println!("{}", render_json(&log)?),
                OutputFormat::Csv => print!("{}", change_log_to_csv(&log)?),
            }
        }
        Commands::Changes { start, end, .. } => {
            let (start, end) = parse_range(start, end)?;
            let changes = config
                .open_calculator()?
                .get_composition_changes(start, end)
                .await?;
            match cli.output {
                OutputFormat::Table => println!("{}", render_changes_table(&changes)),
                OutputFormat::Json => println!("{}", render_json(&changes)?),
                OutputFormat::Csv => print!("{}", changes_to_csv(&changes)?),
            }
        }
        Commands::Acquire { days, start, end } => {
            let calculator = config.open_calculator()?;
            run_acquisition(&config, &calculator, *days, start.as_deref(), end.as_deref(), cli.output)
                .await?;
        }
    }

    Ok(())
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn handle_config_command(init: bool, show: bool, config: &Config, config_path: &Path) -> Result<()> {
    if init {
        Config::write_template(config_path)?;
        println!("Wrote config template to {}", config_path.display());
    }
    if show || !init {
        println!("{}", render_json(config)?);
    }
    Ok(())
}

fn parse_range(start: &str, end: &str) -> Result<(NaiveDate, NaiveDate)> {
    let start = parse_date(start)?;
    let end = parse_date(end)?;
    check_range(start, end)?;
    Ok((start, end))
}

async fn run_acquisition(
    config: &Config,
    calculator: &IndexCalculator,
    days: u32,
    start: Option<&str>,
    end: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let pipeline = config.acquisition_pipeline(calculator);
    let summary = match (start, end) {
        (Some(start), Some(end)) => {
            let (start, end) = parse_range(start, end)?;
            pipeline.run(start, end).await
        }
        (None, None) => {
            let today = Utc::now().date_naive();
            info!("acquiring the {days} days before {today}");
            pipeline.run_recent(today, days).await
        }
        _ => return Err(anyhow!("--start and --end must be given together")),
    };
    match format {
        OutputFormat::Table => println!("{}", render_acquisition_table(&summary)),
        OutputFormat::Json => println!("{}", render_json(&summary.days)?),
        OutputFormat::Csv => print!("{}", acquisition_to_csv(&summary)?),
    }
    Ok(())
}
