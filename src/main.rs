use anyhow::{bail, Context, Result};
use blobstor::benchmark::{print_results, run_benchmark, BenchmarkConfig};
use blobstor::data_gen::{DataGenConfig, DataGenerator, IconSize};
use blobstor::{BlobStore, ContentStore, HashId, LookupMode, ReconcileOutcome, StoreConfig};
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "blobstor")]
#[command(about = "Content-addressed blob store with a self-healing index")]
struct Cli {
    /// Directory holding the store files
    #[arg(short, long, env = "BLOBSTOR_ROOT", global = true)]
    root: Option<PathBuf>,

    /// JSON config file; command-line flags take precedence
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Store name
    #[arg(short, long, default_value = "icons", global = true)]
    store: String,

    /// Key lookups by 8-byte fingerprint only, without collision checks
    #[arg(long, global = true)]
    fingerprint: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Store(StoreCommand),

    /// Measure put/get latency on a scratch store
    Bench(BenchArgs),
}

/// Commands that operate on the store named by `--store`.
#[derive(Subcommand)]
enum StoreCommand {
    /// Store files and print their ids
    Put {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Fetch a blob by id or by hex prefix of its full hash
    Get {
        id: String,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Exit with status 1 if the id is not stored
    Contains { id: HashId },

    /// Delete the store's log and index
    Delete,

    /// List stored ids with their sizes
    List,

    /// Show store size statistics
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Re-hash every stored blob
    Verify,

    /// Discard the index and rebuild it from the log
    Rebuild,
}

#[derive(Args)]
struct BenchArgs {
    /// Icons per size category
    #[arg(short, long, default_value = "500")]
    entries: usize,

    /// Fraction of icons that repeat an earlier one
    #[arg(short, long, default_value = "0.25")]
    duplicates: f64,

    /// Number of random lookups per size category
    #[arg(short, long, default_value = "10000")]
    lookups: usize,

    /// Random seed for data generation and lookups
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Print results as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Bench(args) => run_bench(&config, &args),
        Commands::Store(command) => {
            let mut store = BlobStore::open(&config, &cli.store)
                .with_context(|| format!("Failed to open store {:?}", cli.store))?;
            run_command(&mut store, command)
        }
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let default = if verbose { "blobstor=debug" } else { "blobstor=info" };
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::new("warn").add_directive(default.parse()?),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn load_config(cli: &Cli) -> Result<StoreConfig> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::from_json_file(path)?,
        None => StoreConfig::default(),
    };
    if let Some(root) = &cli.root {
        config.root = root.clone();
    }
    if cli.fingerprint {
        config.lookup = LookupMode::Fingerprint;
    }
    Ok(config)
}

fn run_command(store: &mut BlobStore, command: StoreCommand) -> Result<()> {
    match command {
        StoreCommand::Put { files } => {
            for file in files {
                let content = std::fs::read(&file)
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                let id = store.put(&content)?;
                println!("{}  {}", id, file.display());
            }
        }
        StoreCommand::Get { id, output } => {
            let content = lookup(store, &id)?;
            match output {
                Some(path) => std::fs::write(&path, content)
                    .with_context(|| format!("Failed to write {}", path.display()))?,
                None => std::io::stdout().write_all(&content)?,
            }
        }
        StoreCommand::Contains { id } => {
            if !store.contains(id)? {
                println!("{} not found", id);
                std::process::exit(1);
            }
            println!("{} present", id);
        }
        StoreCommand::Delete => {
            store.delete_store()?;
            println!("Deleted store {}", store.name());
        }
        StoreCommand::List => {
            for desc in store.descriptors()? {
                println!("{}  {:>10}  {}", desc.hash_id(), desc.length, desc.hash);
            }
        }
        StoreCommand::Stats { json } => {
            let stats = store.stats()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Store:        {}", stats.name);
                println!("Blobs:        {}", stats.blobs);
                println!("Distinct ids: {}", stats.distinct_ids);
                println!("Content:      {:.2} MB", stats.content_bytes as f64 / 1_048_576.0);
                println!("Log file:     {:.2} MB", stats.log_bytes as f64 / 1_048_576.0);
                println!("Index file:   {:.2} KB", stats.index_bytes as f64 / 1024.0);
            }
        }
        StoreCommand::Verify => {
            let report = store.verify()?;
            println!("Checked {} blobs", report.checked);
            if !report.is_clean() {
                for id in &report.mismatched {
                    eprintln!("  mismatch: {}", id);
                }
                bail!("{} blobs failed verification", report.mismatched.len());
            }
        }
        StoreCommand::Rebuild => match store.rebuild_index()? {
            ReconcileOutcome::NotInitialized => println!("Store {} has no log", store.name()),
            ReconcileOutcome::Initialized { scanned, .. } => {
                println!("Rebuilt index with {} records", scanned)
            }
        },
    }
    Ok(())
}

/// Resolve a 16-digit id first, then fall back to a full-hash prefix.
fn lookup(store: &mut BlobStore, id: &str) -> Result<Vec<u8>> {
    if id.len() == 16 {
        if let Ok(parsed) = id.parse::<HashId>() {
            if let Some(content) = store.get(parsed)? {
                return Ok(content);
            }
        }
    }
    match store.resolve_prefix(id)? {
        Some(desc) => Ok(store.read(&desc)?),
        None => bail!("No blob matches {:?}", id),
    }
}

fn run_bench(config: &StoreConfig, args: &BenchArgs) -> Result<()> {
    let BenchArgs {
        entries,
        duplicates,
        lookups,
        seed,
        json,
    } = *args;
    if !(0.0..=1.0).contains(&duplicates) {
        bail!("--duplicates must be between 0 and 1, got {}", duplicates);
    }

    let mut entries_override = std::collections::HashMap::new();
    entries_override.insert(IconSize::Jumbo, std::cmp::min(entries, 50));
    let generator = DataGenerator::new(DataGenConfig {
        entries_per_size: entries,
        entries_override,
        duplicate_ratio: duplicates,
        seed,
    });
    let data = generator.generate_all_with_logging();

    let scratch = format!("bench-{}", std::process::id());
    let mut store = BlobStore::open(config, &scratch)?;
    let bench_config = BenchmarkConfig {
        num_lookups: lookups,
        seed,
    };

    let results = run_benchmark(&mut store, &data, &bench_config, !json);
    let stats = store.stats();
    store.delete_store()?;
    let results = results?;
    let stats = stats?;

    if json {
        let summaries: Vec<_> = results.iter().map(|r| r.summary()).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "store": stats,
                "results": summaries,
            }))?
        );
    } else {
        print_results(&results);
        println!(
            "Stored {} blobs ({:.2} MB log) from {} inputs",
            stats.blobs,
            stats.log_bytes as f64 / 1_048_576.0,
            data.len()
        );
    }
    Ok(())
}
