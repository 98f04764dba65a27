use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use skyvault::acquisition::{Acquirer, CaptureRequest, SyntheticSource};
use skyvault::parser::{self, Command, Selection};
use skyvault::query::RecordSummary;
use skyvault::{ImageRecord, ImageStore, MetricsSnapshot, Quality, Region, Source, StoreConfig};

type BoxError = Box<dyn Error + Send + Sync>;

const MB: f64 = 1024.0 * 1024.0;

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about = "Local store for generated satellite imagery", long_about = None)]
struct Args {
    /// JSON config file; flags below override it
    #[clap(long)]
    config: Option<PathBuf>,

    /// Log file backing the store
    #[clap(long)]
    data: Option<PathBuf>,

    /// Skip fsync after each write
    #[clap(long)]
    relaxed: bool,

    #[clap(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Clone, Debug)]
enum Cmd {
    /// Run acquisition bursts with the synthetic generator
    Generate {
        #[clap(long, default_value = "landsat")]
        source: String,
        #[clap(long, default_value = "amazon")]
        region: String,
        #[clap(long, default_value = "standard")]
        quality: String,
        /// Concurrent bursts to run
        #[clap(long, default_value = "1")]
        bursts: usize,
        /// Shrink payloads by this factor (1 = realistic sizes)
        #[clap(long, default_value = "64")]
        scale: u64,
    },
    /// List stored images
    List {
        #[clap(long)]
        region: Option<String>,
        #[clap(long)]
        source: Option<String>,
    },
    /// Run one query, e.g. "SELECT FROM IMAGES WHERE REGION = 'sahara'"
    Query { command: String },
    /// Print aggregate statistics
    Stats {
        #[clap(long)]
        json: bool,
    },
    /// Delete every stored image
    Clear,
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,skyvault=info")),
        )
        .with_target(false)
        .with_level(true)
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(async_main(args)) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn load_config(args: &Args) -> Result<StoreConfig, BoxError> {
    let mut config = match &args.config {
        Some(path) => StoreConfig::from_json_file(path)?,
        None => StoreConfig::default(),
    };
    if let Some(data) = &args.data {
        config.data_path = Some(data.clone());
    }
    if config.data_path.is_none() {
        config.data_path = Some(PathBuf::from("skyvault_images.log"));
    }
    if args.relaxed {
        config.strict_durability = false;
    }
    Ok(config)
}

async fn async_main(args: Args) -> Result<(), BoxError> {
    let config = load_config(&args)?;
    let store = Arc::new(ImageStore::open(&config)?);

    match args.command {
        Cmd::Generate { source, region, quality, bursts, scale } => {
            let request = CaptureRequest {
                source: label_or_default("source", &source, Source::from_label, Source::default()),
                region: label_or_default("region", &region, Region::from_label, Region::default()),
                quality: label_or_default("quality", &quality, Quality::from_label, Quality::default()),
            };
            generate(store, request, bursts.max(1), scale).await?;
        }
        Cmd::List { region, source } => {
            let records = match (region, source) {
                (Some(r), _) => {
                    store.records_for_region(label_or_default("region", &r, Region::from_label, Region::default()))?
                }
                (None, Some(s)) => {
                    store.records_for_source(label_or_default("source", &s, Source::from_label, Source::default()))?
                }
                (None, None) => store.get_all()?,
            };
            print_records(&records);
        }
        Cmd::Query { command } => {
            let cmd = parser::parse_command(&command)?;
            execute(&store, cmd)?;
        }
        Cmd::Stats { json } => {
            store.get_all()?;
            let snapshot = store.snapshot()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_stats(&snapshot);
            }
        }
        Cmd::Clear => {
            store.clear()?;
            println!("Store cleared.");
        }
    }
    Ok(())
}

fn label_or_default<T: Copy>(what: &str, label: &str, parse: fn(&str) -> Option<T>, default: T) -> T {
    parse(label).unwrap_or_else(|| {
        warn!("unknown {} '{}', using default", what, label);
        default
    })
}

/// Bursts run as blocking tasks while a refresh task keeps taking the timed
/// retrieval + snapshot path, the way a UI would poll during generation.
async fn generate(store: Arc<ImageStore>, request: CaptureRequest, bursts: usize, scale: u64) -> Result<(), BoxError> {
    let acquirer = Arc::new(Acquirer::new());

    let refresher = {
        let store = store.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(250));
            loop {
                ticker.tick().await;
                let s = store.clone();
                match tokio::task::spawn_blocking(move || s.get_all().and_then(|_| s.snapshot())).await {
                    Ok(Ok(snap)) => info!(
                        images = snap.record_count,
                        total_bytes = snap.total_bytes,
                        "refresh"
                    ),
                    Ok(Err(e)) => warn!("refresh failed: {}", e),
                    Err(e) => warn!("refresh task panicked: {}", e),
                }
            }
        })
    };

    let mut handles = Vec::with_capacity(bursts);
    for _ in 0..bursts {
        let store = store.clone();
        let acquirer = acquirer.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let mut source = SyntheticSource::new(scale);
            acquirer.acquire_burst(&store, &mut source, &request)
        }));
    }

    let mut stored = 0;
    let mut failure: Option<BoxError> = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(ids)) => stored += ids.len(),
            Ok(Err(e)) => {
                error!("burst failed: {}", e);
                failure.get_or_insert_with(|| e.into());
            }
            Err(e) => {
                error!("burst task panicked: {}", e);
                failure.get_or_insert_with(|| e.into());
            }
        }
    }
    refresher.abort();

    println!("Stored {} image(s).", stored);
    store.get_all()?;
    print_stats(&store.snapshot()?);

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn execute(store: &ImageStore, cmd: Command) -> Result<(), BoxError> {
    match cmd {
        Command::Help => print_help(),
        Command::Get { id } => match store.get_by_id(&id)? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&RecordSummary::from(record.as_ref()))?),
            None => println!("(not found)"),
        },
        Command::Select(selection) => {
            let records = match selection {
                Selection::All => store.get_all()?,
                Selection::Region(region) => store.records_for_region(region)?,
                Selection::Source(source) => store.records_for_source(source)?,
                Selection::TimeRange { from, to } => store.records_between(from, to)?,
            };
            print_records(&records);
        }
        Command::Stats => {
            store.get_all()?;
            print_stats(&store.snapshot()?);
        }
        Command::Clear => {
            store.clear()?;
            println!("Store cleared.");
        }
    }
    Ok(())
}

fn print_help() {
    println!("\n--- Available Commands ---");
    println!("1. GET:     GET 'id'");
    println!("2. SELECT:  SELECT FROM IMAGES [WHERE REGION = 'amazon' | SOURCE = 'landsat' | TIME BETWEEN 0 AND 1700000000000]");
    println!("3. STATS:   STATS");
    println!("4. CLEAR:   CLEAR\n");
}

fn print_records(records: &[Arc<ImageRecord>]) {
    if records.is_empty() {
        println!("No images stored. Run `skyvault generate` to begin.");
        return;
    }
    for r in records {
        println!(
            "{:<48} {} - {} | {} | {} | {:.2} MB | cloud {:.1}% | {:.4}, {:.4}",
            r.id,
            r.source.label().to_uppercase(),
            r.region.label().replace('-', " "),
            r.quality,
            r.resolution,
            r.size_bytes as f64 / MB,
            r.cloud_cover_percent,
            r.coordinates.latitude,
            r.coordinates.longitude,
        );
    }
}

fn print_stats(s: &MetricsSnapshot) {
    println!("Images:            {}", s.record_count);
    println!("Total size:        {:.2} MB", s.total_bytes as f64 / MB);
    match s.average_latency_ms {
        Some(ms) => println!("Avg load time:     {}ms", ms.round()),
        None => println!("Avg load time:     -"),
    }
    println!("Compression ratio: {:.1}%", s.compression_ratio_percent);
    if s.storage_warning {
        println!("Warning: stored imagery exceeds the configured size threshold.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_filter_label_falls_back_to_default() {
        assert_eq!(label_or_default("region", "sahara", Region::from_label, Region::default()), Region::Sahara);
        assert_eq!(label_or_default("region", "atlantis", Region::from_label, Region::default()), Region::Amazon);
        assert_eq!(label_or_default("source", "", Source::from_label, Source::default()), Source::Landsat);
    }
}
