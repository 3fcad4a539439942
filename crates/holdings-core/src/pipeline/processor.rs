//! Batch processing with Rayon workers and ordered output.
//!
//! The calling thread reads fixed-size batches of lines and spawns one job per
//! batch on a dedicated pool. Finished batches come back over a channel in any
//! order and are written only once every earlier batch has been written.

use std::io::{BufRead, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::errors::{HoldingsError, HoldingsResult};
use crate::pipeline::reorder::Reorder;

pub const DEFAULT_BATCH_SIZE: usize = 20_000;

/// Counters for a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Non-blank input lines handed to the record function.
    pub records: u64,
    /// Records that failed and were passed through in best-effort mode.
    pub skipped: u64,
    pub batches: u64,
}

#[derive(Debug, Clone)]
pub struct Processor {
    batch_size: usize,
    workers: usize,
    best_effort: bool,
}

impl Default for Processor {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

struct Batch {
    first_seq: u64,
    lines: Vec<Vec<u8>>,
}

#[derive(Default)]
struct BatchOutput {
    bytes: Vec<u8>,
    records: u64,
    skipped: u64,
}

struct BatchReader<R> {
    input: R,
    batch_size: usize,
    next_seq: u64,
    done: bool,
}

impl<R: BufRead> BatchReader<R> {
    fn next_batch(&mut self) -> HoldingsResult<Option<Batch>> {
        if self.done {
            return Ok(None);
        }
        let first_seq = self.next_seq;
        let mut lines = Vec::with_capacity(self.batch_size.min(1024));
        while lines.len() < self.batch_size {
            let mut line = Vec::new();
            if self.input.read_until(b'\n', &mut line)? == 0 {
                self.done = true;
                break;
            }
            if line.last() == Some(&b'\n') {
                line.pop();
            }
            lines.push(line);
            self.next_seq += 1;
        }
        if lines.is_empty() {
            return Ok(None);
        }
        Ok(Some(Batch { first_seq, lines }))
    }
}

fn process_batch<F>(f: &F, batch: Batch, best_effort: bool) -> HoldingsResult<BatchOutput>
where
    F: Fn(u64, &[u8]) -> HoldingsResult<Vec<u8>>,
{
    let mut out = BatchOutput::default();
    for (seq, line) in (batch.first_seq..).zip(&batch.lines) {
        if line.iter().all(u8::is_ascii_whitespace) {
            out.bytes.extend_from_slice(line);
            out.bytes.push(b'\n');
            continue;
        }
        out.records += 1;
        match f(seq, line) {
            Ok(mut bytes) => {
                if bytes.last() != Some(&b'\n') {
                    bytes.push(b'\n');
                }
                out.bytes.extend_from_slice(&bytes);
            }
            Err(e) if best_effort => {
                warn!(seq, error = %e, "record failed, passing it through unchanged");
                out.skipped += 1;
                out.bytes.extend_from_slice(line);
                out.bytes.push(b'\n');
            }
            Err(e) => {
                return Err(match e {
                    HoldingsError::Worker { .. } => e,
                    other => HoldingsError::Worker {
                        seq,
                        message: other.to_string(),
                    },
                })
            }
        }
    }
    Ok(out)
}

/// [`process_batch`] with a panic in `f` reported as a worker error at the
/// batch's first sequence number.
fn process_batch_guarded<F>(
    f: &F,
    batch: Batch,
    best_effort: bool,
) -> HoldingsResult<BatchOutput>
where
    F: Fn(u64, &[u8]) -> HoldingsResult<Vec<u8>>,
{
    let first_seq = batch.first_seq;
    panic::catch_unwind(AssertUnwindSafe(|| process_batch(f, batch, best_effort)))
        .unwrap_or_else(|_| {
            Err(HoldingsError::Worker {
                seq: first_seq,
                message: "worker panicked".to_string(),
            })
        })
}

// ---------------------------------------------------------------------------
// Ordered sink
// ---------------------------------------------------------------------------

struct Collector<W> {
    output: W,
    reorder: Reorder<BatchOutput>,
    stats: RunStats,
    // Batch number and error of the earliest failure seen so far.
    failure: Option<(u64, HoldingsError)>,
}

impl<W: Write> Collector<W> {
    fn new(output: W) -> Self {
        Self {
            output,
            reorder: Reorder::new(),
            stats: RunStats::default(),
            failure: None,
        }
    }

    fn failed(&self) -> bool {
        self.failure.is_some()
    }

    fn fail(&mut self, batch_no: u64, err: HoldingsError) {
        match &self.failure {
            Some((earliest, _)) if *earliest <= batch_no => {}
            _ => self.failure = Some((batch_no, err)),
        }
    }

    fn settle(&mut self, batch_no: u64, result: HoldingsResult<BatchOutput>) {
        let out = match result {
            Ok(out) => out,
            Err(e) => return self.fail(batch_no, e),
        };
        if matches!(&self.failure, Some((earliest, _)) if *earliest < batch_no) {
            return;
        }
        self.reorder.push(batch_no, out);
        while let Some(ready) = self.reorder.pop_ready() {
            let no = self.reorder.next_seq() - 1;
            if matches!(&self.failure, Some((earliest, _)) if *earliest <= no) {
                break;
            }
            if let Err(e) = self.output.write_all(&ready.bytes) {
                self.fail(no, e.into());
                break;
            }
            self.stats.records += ready.records;
            self.stats.skipped += ready.skipped;
            self.stats.batches += 1;
        }
    }

    fn finish(mut self) -> HoldingsResult<RunStats> {
        if let Some((_, err)) = self.failure {
            let _ = self.output.flush();
            return Err(err);
        }
        self.output.flush()?;
        debug_assert_eq!(self.reorder.pending(), 0);
        Ok(self.stats)
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

impl Processor {
    /// Default batch size, one worker per available CPU, fail on first error.
    pub fn new() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            workers: thread::available_parallelism().map_or(1, |n| n.get()),
            best_effort: false,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Pass failing records through unchanged instead of aborting.
    pub fn with_best_effort(mut self, best_effort: bool) -> Self {
        self.best_effort = best_effort;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Apply `f` to every line of `input` and write the results to `output`
    /// in input order. `f` receives the zero-based line number.
    ///
    /// Whitespace-only lines are copied through without calling `f`.
    pub fn run<R, W, F>(&self, input: R, output: W, f: F) -> HoldingsResult<RunStats>
    where
        R: BufRead,
        W: Write,
        F: Fn(u64, &[u8]) -> HoldingsResult<Vec<u8>> + Sync,
    {
        let started = Instant::now();
        let reader = BatchReader {
            input,
            batch_size: self.batch_size,
            next_seq: 0,
            done: false,
        };
        let collector = Collector::new(output);

        let result = if self.workers <= 1 {
            self.run_sequential(reader, collector, &f)
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.workers)
                .thread_name(|i| format!("holdings-worker-{i}"))
                .build();
            match pool {
                Ok(pool) => self.run_parallel(&pool, reader, collector, &f),
                Err(e) => {
                    warn!(error = %e, "cannot build worker pool, processing sequentially");
                    self.run_sequential(reader, collector, &f)
                }
            }
        };

        if let Ok(stats) = &result {
            info!(
                records = stats.records,
                skipped = stats.skipped,
                batches = stats.batches,
                workers = self.workers,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "run complete"
            );
        }
        result
    }

    fn run_sequential<R, W, F>(
        &self,
        mut reader: BatchReader<R>,
        mut collector: Collector<W>,
        f: &F,
    ) -> HoldingsResult<RunStats>
    where
        R: BufRead,
        W: Write,
        F: Fn(u64, &[u8]) -> HoldingsResult<Vec<u8>>,
    {
        let mut batch_no = 0u64;
        while !collector.failed() {
            match reader.next_batch() {
                Ok(Some(batch)) => {
                    let result = process_batch_guarded(f, batch, self.best_effort);
                    collector.settle(batch_no, result);
                    batch_no += 1;
                }
                Ok(None) => break,
                Err(e) => collector.fail(batch_no, e),
            }
        }
        collector.finish()
    }

    fn run_parallel<R, W, F>(
        &self,
        pool: &rayon::ThreadPool,
        mut reader: BatchReader<R>,
        mut collector: Collector<W>,
        f: &F,
    ) -> HoldingsResult<RunStats>
    where
        R: BufRead,
        W: Write,
        F: Fn(u64, &[u8]) -> HoldingsResult<Vec<u8>> + Sync,
    {
        let best_effort = self.best_effort;
        let max_in_flight = self.workers * 2;
        let (tx, rx) = mpsc::channel::<(u64, HoldingsResult<BatchOutput>)>();

        pool.in_place_scope(|scope| {
            let mut batch_no = 0u64;
            let mut in_flight = 0usize;

            while !collector.failed() {
                while in_flight >= max_in_flight {
                    let Ok((no, result)) = rx.recv() else { break };
                    in_flight -= 1;
                    collector.settle(no, result);
                }
                if collector.failed() {
                    break;
                }
                let batch = match reader.next_batch() {
                    Ok(Some(batch)) => batch,
                    Ok(None) => break,
                    Err(e) => {
                        collector.fail(batch_no, e);
                        break;
                    }
                };
                let tx = tx.clone();
                let no = batch_no;
                debug!(
                    batch = no,
                    first_seq = batch.first_seq,
                    lines = batch.lines.len(),
                    "dispatching batch"
                );
                scope.spawn(move |_| {
                    let result = process_batch_guarded(f, batch, best_effort);
                    let _ = tx.send((no, result));
                });
                batch_no += 1;
                in_flight += 1;
            }

            // Drain outstanding work before reporting.
            while in_flight > 0 {
                let Ok((no, result)) = rx.recv() else { break };
                in_flight -= 1;
                collector.settle(no, result);
            }
        });

        collector.finish()
    }
}
