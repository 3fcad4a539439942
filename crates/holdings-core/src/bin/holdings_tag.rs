//! Tag newline-delimited JSON records with the institutions licensed to
//! show them.
//!
//! ```bash
//! holdings-tag -c tagger.json records.ldj > tagged.ldj
//! holdings-tag -c tagger.json --freeze tagger.bin
//! holdings-tag --unfreeze tagger.bin -w 8 < records.ldj
//! ```

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

use holdings_core::filter::freeze::{freeze_to_path, unfreeze_from_path};
use holdings_core::pipeline::processor::DEFAULT_BATCH_SIZE;
use holdings_core::{Processor, RunStats, Tagger};

#[derive(Parser, Debug)]
#[clap(name = "holdings-tag", version)]
#[clap(about = "Attach institution labels to newline-delimited JSON records")]
struct Args {
    /// Tagger configuration, inline JSON or a path to a JSON file
    #[clap(short = 'c', long, env = "HOLDINGS_TAG_CONFIG", value_name = "JSON|FILE")]
    config: Option<String>,

    /// Records per batch handed to a worker
    #[clap(short = 'b', long, env = "HOLDINGS_TAG_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Worker threads (default: number of CPUs)
    #[clap(short = 'w', long, env = "HOLDINGS_TAG_WORKERS")]
    workers: Option<usize>,

    /// Write the configured tagger in frozen form to FILE and exit
    #[clap(long, value_name = "FILE", conflicts_with = "unfreeze")]
    freeze: Option<PathBuf>,

    /// Load a frozen tagger from FILE instead of a configuration
    #[clap(long, env = "HOLDINGS_TAG_UNFREEZE", value_name = "FILE", conflicts_with = "config")]
    unfreeze: Option<PathBuf>,

    /// Log failing records and pass them through instead of aborting
    #[clap(long, env = "HOLDINGS_TAG_BEST_EFFORT")]
    best_effort: bool,

    /// Input files (default: stdin)
    files: Vec<PathBuf>,
}

fn load_tagger(args: &Args) -> Result<Tagger> {
    if let Some(path) = &args.unfreeze {
        return unfreeze_from_path(path)
            .with_context(|| format!("cannot unfreeze tagger from {}", path.display()));
    }
    match &args.config {
        Some(config) => Tagger::load(config).context("cannot configure tagger"),
        None => bail!("either --config or --unfreeze is required"),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let tagger = load_tagger(&args)?;

    if let Some(path) = &args.freeze {
        freeze_to_path(&tagger, path)
            .with_context(|| format!("cannot freeze tagger to {}", path.display()))?;
        return Ok(());
    }

    let mut processor = Processor::new()
        .with_batch_size(args.batch_size)
        .with_best_effort(args.best_effort);
    if let Some(workers) = args.workers {
        processor = processor.with_workers(workers);
    }
    info!(
        labels = tagger.len(),
        workers = processor.workers(),
        batch_size = processor.batch_size(),
        "tagging records"
    );

    let tag = |_seq: u64, line: &[u8]| tagger.tag_json(line);
    let stdout = io::stdout();
    let mut output = BufWriter::new(stdout.lock());
    let mut total = RunStats::default();

    if args.files.is_empty() {
        total = processor.run(io::stdin().lock(), &mut output, tag)?;
    } else {
        for path in &args.files {
            let file =
                File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
            let stats = processor
                .run(BufReader::new(file), &mut output, tag)
                .with_context(|| format!("while tagging {}", path.display()))?;
            total.records += stats.records;
            total.skipped += stats.skipped;
            total.batches += stats.batches;
        }
    }

    info!(
        records = total.records,
        passed_through = total.skipped,
        "done"
    );
    Ok(())
}
