//! Emission Pipeline (spec §4.H): a bounded, drop-when-full event queue, a
//! single dispatcher enforcing a 300ms floor between external dispatches, a
//! rotating JSON-line journal, and a rate-limited remote sink. Grounded in
//! `market-streaming/src/stream_client.rs`'s `reqwest`-less-but-retry-shaped
//! dispatch loop, with the HTTP sink itself grounded in the other example
//! repos' fire-and-forget POST idiom (the teacher has no HTTP client, per
//! SPEC_FULL.md §4.H).

use crate::error::EmissionError;
use crossbeam_queue::ArrayQueue;
use pool_codec::PoolEvent;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, warn};

const QUEUE_CAPACITY: usize = 500;
const DISPATCH_FLOOR: Duration = Duration::from_millis(300);
const SINK_RATE_LIMIT: Duration = Duration::from_secs(2);
const JOURNAL_ROTATE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_ROTATED_FILES: usize = 3;

/// A bounded FIFO of pending emissions. `crossbeam_queue::ArrayQueue` is a
/// lock-free bounded ring buffer: pushing past capacity fails instead of
/// blocking, matching spec §4.H's "new events are dropped" contract exactly.
pub struct EmissionQueue {
    queue: ArrayQueue<PoolEvent>,
    dropped: AtomicU64,
}

impl EmissionQueue {
    pub fn new() -> Self {
        Self { queue: ArrayQueue::new(QUEUE_CAPACITY), dropped: AtomicU64::new(0) }
    }

    /// Returns `true` if the event was enqueued, `false` if the queue was
    /// full and the event was dropped (spec §4.H backpressure).
    pub fn push(&self, event: PoolEvent) -> bool {
        match self.queue.push(event) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn pop(&self) -> Option<PoolEvent> {
        self.queue.pop()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Default for EmissionQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Size-rotated JSON-line journal (spec §4.H point 1).
pub struct Journal {
    path: PathBuf,
    file: Mutex<File>,
}

impl Journal {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, EmissionError> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file: Mutex::new(file) })
    }

    /// Appends one JSON-line record, rotating first if the journal already
    /// exceeds 10 MiB.
    pub async fn append(&self, event: &PoolEvent, now_ms: u64) -> Result<(), EmissionError> {
        self.rotate_if_needed(now_ms).await?;
        let line = serde_json::to_string(event).map_err(|e| EmissionError::Sink(e.to_string()))?;
        let mut file = self.file.lock().await;
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }

    async fn rotate_if_needed(&self, now_ms: u64) -> Result<(), EmissionError> {
        let metadata = fs::metadata(&self.path);
        let Ok(metadata) = metadata else { return Ok(()) };
        if metadata.len() <= JOURNAL_ROTATE_BYTES {
            return Ok(());
        }

        let mut file = self.file.lock().await;
        let date = chrono::DateTime::from_timestamp_millis(now_ms as i64)
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| now_ms.to_string());
        let mut rotated_name = format!("{}.{date}", self.path.display());
        // Same-day rotation already has a file at that name: disambiguate
        // with a numeric suffix rather than clobbering the earlier one.
        let mut suffix = 1u32;
        while Path::new(&rotated_name).exists() {
            rotated_name = format!("{}.{date}.{suffix}", self.path.display());
            suffix += 1;
        }
        fs::rename(&self.path, &rotated_name)?;
        *file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        drop(file);
        self.prune_rotated_files()?;
        Ok(())
    }

    /// Keeps only the `MAX_ROTATED_FILES` most recent rotated journals
    /// (spec §4.H "at most 3 rotated files are retained"), oldest-first by
    /// filesystem modification time.
    fn prune_rotated_files(&self) -> Result<(), EmissionError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let stem = self.path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
        let prefix = format!("{stem}.");
        let mut rotated: Vec<(std::time::SystemTime, PathBuf)> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_str()?.to_string();
                if !name.starts_with(&prefix) {
                    return None;
                }
                let modified = entry.metadata().ok()?.modified().ok()?;
                Some((modified, entry.path()))
            })
            .collect();
        rotated.sort_by_key(|(modified, _)| *modified);
        while rotated.len() > MAX_ROTATED_FILES {
            let (_, path) = rotated.remove(0);
            let _ = fs::remove_file(path);
        }
        Ok(())
    }
}

/// Fire-and-forget remote sink with its own 2-second rate limit (spec §4.H:
/// "at most one POST per 2 seconds").
pub struct Sink {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    last_sent: Mutex<Option<tokio::time::Instant>>,
}

impl Sink {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("reqwest client builds with static config"),
            url: url.into(),
            token,
            last_sent: Mutex::new(None),
        }
    }

    async fn wait_for_rate_limit(&self) {
        let mut last_sent = self.last_sent.lock().await;
        if let Some(last) = *last_sent {
            let elapsed = last.elapsed();
            if elapsed < SINK_RATE_LIMIT {
                tokio::time::sleep(SINK_RATE_LIMIT - elapsed).await;
            }
        }
        *last_sent = Some(tokio::time::Instant::now());
    }

    /// Single-event dispatch. Errors are logged and swallowed — the
    /// pipeline must never fail because of the remote sink (spec §4.H).
    pub async fn post(&self, event: &PoolEvent) {
        self.wait_for_rate_limit().await;
        self.post_now(event).await;
    }

    async fn post_now(&self, event: &PoolEvent) {
        let mut req = self.client.post(&self.url).json(event);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        if let Err(e) = req.send().await {
            warn!(error = %e, "sink POST failed");
        }
    }

    /// Batch dispatch: a single POST carrying N alerts (spec §4.H, used by
    /// consumers that must atomically commit a set of correlated messages).
    pub async fn post_batch(&self, events: &[PoolEvent]) {
        self.wait_for_rate_limit().await;
        let mut req = self.client.post(&self.url).json(events);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        if let Err(e) = req.send().await {
            warn!(error = %e, "sink batch POST failed");
        }
    }
}

pub struct EmissionPipeline {
    queue: Arc<EmissionQueue>,
    journal: Arc<Journal>,
    sink: Option<Arc<Sink>>,
}

impl EmissionPipeline {
    pub fn new(queue: Arc<EmissionQueue>, journal: Arc<Journal>, sink: Option<Arc<Sink>>) -> Self {
        Self { queue, journal, sink }
    }

    pub fn enqueue(&self, event: PoolEvent) -> bool {
        self.queue.push(event)
    }

    /// The dispatcher: drains the queue forever with at least `DISPATCH_FLOOR`
    /// between successive external dispatches. Runs as its own task.
    pub async fn run(&self, now_ms_fn: impl Fn() -> u64) {
        loop {
            let Some(event) = self.queue.pop() else {
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            };
            self.dispatch_one(&event, now_ms_fn()).await;
            tokio::time::sleep(DISPATCH_FLOOR).await;
        }
    }

    async fn dispatch_one(&self, event: &PoolEvent, now_ms: u64) {
        if let Err(e) = self.journal.append(event, now_ms).await {
            error!(error = %e, "journal write failed");
        }
        if let Some(sink) = &self.sink {
            sink.post(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pool_codec::{Address, DexKind, EnrichedData, PoolEventKind, PoolSnapshot};
    use tempfile::tempdir;

    fn event() -> PoolEvent {
        PoolEvent {
            kind: PoolEventKind::NewPool,
            pool_snapshot: PoolSnapshot {
                dex: DexKind::PumpFun,
                pool_address: Address([1; 32]),
                base_mint: Some(Address([2; 32])),
                quote_mint: Some(Address([3; 32])),
                slot: 1,
                observed_at_ms: 0,
                enriched: EnrichedData::default(),
            },
            token_name: None,
            token_symbol: None,
            graduated_from: None,
            bonding_curve_duration_ms: None,
        }
    }

    #[test]
    fn queue_drops_past_capacity() {
        let queue = EmissionQueue::new();
        for _ in 0..QUEUE_CAPACITY {
            assert!(queue.push(event()));
        }
        assert!(!queue.push(event()));
        assert_eq!(queue.dropped_count(), 1);
    }

    #[tokio::test]
    async fn journal_append_writes_one_line_per_event() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let journal = Journal::open(&path).unwrap();
        journal.append(&event(), 1).await.unwrap();
        journal.append(&event(), 2).await.unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
