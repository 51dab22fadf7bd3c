//! Chunk scheduling and the worker pool.
//!
//! The record list is split into fixed-size [`Chunk`]s. A fixed pool of
//! tokio tasks pops chunk indices from a shared FIFO queue and resolves
//! each chunk's addresses in order, reporting `(chunk index, rows)` over
//! a channel. Workers exit when the queue is empty.
//!
//! A panic while resolving one address is caught, retried with
//! exponential backoff, and finally turned into a failure row for that
//! address alone. The chunk and the worker carry on.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use address_geocoder::fallback::{FallbackResolver, Resolution};
use address_geocoder_models::{AddressRecord, Chunk, EnrichedResult, GeocodeResult};
use address_geocoder_spatial::ZoneIndex;
use futures::{FutureExt as _, StreamExt as _};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::progress::ProgressCallback;

/// Rows produced for one chunk, tagged with its index.
pub type ChunkOutput = (usize, Vec<EnrichedResult>);

/// How often an address is retried after an unexpected failure.
///
/// Provider errors are not retried here; the fallback chain handles
/// those. This only covers a panic inside the resolver or a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per address, at least 1.
    pub max_attempts: usize,
    /// Delay before the second attempt; doubled after each retry.
    pub initial_delay: Duration,
}

/// Splits `records` into chunks of at most `chunk_size`, preserving
/// order. Chunk `k` holds records `[k * chunk_size, (k + 1) * chunk_size)`.
///
/// A `chunk_size` of zero is treated as one.
#[must_use]
pub fn split_chunks(records: Vec<AddressRecord>, chunk_size: usize) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(records.len().div_ceil(chunk_size));
    let mut records = records.into_iter().peekable();

    while records.peek().is_some() {
        let index = chunks.len();
        chunks.push(Chunk {
            index,
            records: records.by_ref().take(chunk_size).collect(),
        });
    }

    chunks
}

/// Resolves and enriches the records of one chunk.
#[derive(Debug, Clone)]
pub struct ChunkWorker {
    resolver: FallbackResolver,
    zones: Option<Arc<ZoneIndex>>,
    chunk_concurrency: usize,
    retry: RetryPolicy,
}

impl ChunkWorker {
    /// Creates a worker. `zones` enables enrichment; `chunk_concurrency`
    /// bounds how many addresses of one chunk are in flight at once.
    #[must_use]
    pub fn new(
        resolver: FallbackResolver,
        zones: Option<Arc<ZoneIndex>>,
        chunk_concurrency: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            resolver,
            zones,
            chunk_concurrency: chunk_concurrency.max(1),
            retry: RetryPolicy {
                max_attempts: retry.max_attempts.max(1),
                ..retry
            },
        }
    }

    /// Processes `chunk`, returning one row per record in record order.
    pub async fn process(
        &self,
        chunk: &Chunk,
        progress: &Arc<dyn ProgressCallback>,
    ) -> Vec<EnrichedResult> {
        let pending: Vec<_> = chunk
            .records
            .iter()
            .map(|record| self.process_record(record, progress))
            .collect();

        futures::stream::iter(pending)
            .buffered(self.chunk_concurrency)
            .collect()
            .await
    }

    async fn process_record(
        &self,
        record: &AddressRecord,
        progress: &Arc<dyn ProgressCallback>,
    ) -> EnrichedResult {
        let max = self.retry.max_attempts;
        let mut delay = self.retry.initial_delay;

        for attempt in 1..=max {
            let resolved = AssertUnwindSafe(self.resolver.resolve(&record.raw_address))
                .catch_unwind()
                .await;

            match resolved {
                Ok(resolution) => {
                    log_resolution(&record.id, &resolution);
                    progress.inc(1);
                    return self.enrich(resolution);
                }
                Err(panic) => {
                    log::warn!(
                        "[{}] unexpected error during attempt {attempt}/{max}: {}",
                        record.id,
                        panic_message(panic.as_ref())
                    );
                    if attempt < max {
                        log::info!("[{}] retrying in {delay:?}", record.id);
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        log::error!("[{}] giving up after {max} attempts", record.id);
        progress.inc(1);
        EnrichedResult::bare(GeocodeResult::unresolved(record.raw_address.as_str()))
    }

    fn enrich(&self, resolution: Resolution) -> EnrichedResult {
        match &self.zones {
            Some(zones) => zones.enrich(resolution.result),
            None => EnrichedResult::bare(resolution.result),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("panic")
}

fn log_resolution(id: &str, resolution: &Resolution) {
    let n = resolution.provider_count;
    if resolution.result.is_resolved() {
        log::info!(
            "[{id}] attempt {}/{n} succeeded with {}",
            resolution.attempts.len(),
            resolution.result.encoder
        );
    } else if let Some(err) = resolution.last_error() {
        log::warn!(
            "[{id}] all {n} providers failed for '{}', last error: {err}",
            resolution.result.raw_address
        );
    } else {
        log::warn!("[{id}] no provider was tried");
    }
}

/// Runs `chunks` through `max_workers` concurrent workers.
///
/// Returns whatever chunk outputs were reported, in completion order.
/// Per-address panics are absorbed by [`ChunkWorker`]; a chunk only goes
/// missing if its task is aborted outright.
pub async fn run_pool(
    chunks: Arc<[Chunk]>,
    worker: Arc<ChunkWorker>,
    max_workers: usize,
    progress: Arc<dyn ProgressCallback>,
) -> Vec<ChunkOutput> {
    let queue: Arc<Mutex<VecDeque<usize>>> = Arc::new(Mutex::new((0..chunks.len()).collect()));
    let worker_count = max_workers.max(1).min(chunks.len());
    let (tx, mut rx) = mpsc::unbounded_channel::<ChunkOutput>();
    let completed = Arc::new(AtomicUsize::new(0));

    let mut workers = JoinSet::new();
    for worker_id in 0..worker_count {
        let queue = Arc::clone(&queue);
        let chunks = Arc::clone(&chunks);
        let worker = Arc::clone(&worker);
        let progress = Arc::clone(&progress);
        let completed = Arc::clone(&completed);
        let tx = tx.clone();

        workers.spawn(async move {
            loop {
                let next = queue
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .pop_front();
                let Some(index) = next else {
                    break;
                };

                let chunk = &chunks[index];
                log::debug!(
                    "Worker {worker_id} processing chunk {index} ({} addresses)",
                    chunk.records.len()
                );
                let rows = worker.process(chunk, &progress).await;
                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                log::info!("Chunk {} done ({done}/{} complete)", index + 1, chunks.len());
                progress.set_message(format!("chunk {done}/{}", chunks.len()));

                if tx.send((index, rows)).is_err() {
                    break;
                }
            }
        });
    }
    drop(tx);

    let mut outputs = Vec::with_capacity(chunks.len());
    while let Some(output) = rx.recv().await {
        outputs.push(output);
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            log::error!("Geocoding worker failed: {e}");
        }
    }

    outputs
}
