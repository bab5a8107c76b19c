//! Bridge event scanner.
//!
//! The EventScanner is responsible for:
//! - Polling the chain head on a fixed interval and fetching
//!   `TeleportInitialized` logs for newly settled blocks (live fetch)
//! - Reconstructing events older than the scan start once at startup
//!   (backfill)
//! - Decoding logs, suppressing duplicates and emitting `ScannedEvent`s
//!
//! Both routines share one output channel, one deduper and one scan start
//! block. The live routine scans everything above the start block, the
//! backfill scans the prefetch window up to and including it, so together they
//! cover the chain exactly once.

pub mod cursor;
pub mod dedup;
pub mod teleport;

pub use cursor::{BlockRange, BlockRangeCursor};
pub use dedup::EventDeduper;
pub use teleport::{DecodeError, decode_log, teleport_topic};

use crate::chain::{ChainClient, LogFilter, RpcError};
use crate::config::ScannerConfig;
use crate::events::{ScannedEvent, ScannedEventSender};
use crate::utils::shutdown::shutdown_requested;
use alloy_primitives::B256;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{OnceCell, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Errors that can occur while scanning.
#[derive(Debug, Error)]
pub enum ScanError {
    /// A chain client call failed.
    #[error("chain client error: {0}")]
    Rpc(#[from] RpcError),

    /// Shutdown was requested while waiting.
    #[error("scan cancelled")]
    Cancelled,

    /// The event receiver was dropped.
    #[error("event channel closed")]
    ChannelClosed,

    /// The scanner cannot run with this configuration.
    #[error("invalid scanner configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Event scanner over a chain client.
pub struct EventScanner {
    client: Arc<dyn ChainClient>,
    config: ScannerConfig,
    live: bool,
    backfill: bool,
}

impl EventScanner {
    /// Create a scanner with both routines enabled.
    pub fn new(client: Arc<dyn ChainClient>, config: ScannerConfig) -> Result<Self, ScanError> {
        if config.addresses.is_empty() {
            return Err(ScanError::InvalidConfig(
                "at least one contract address is required",
            ));
        }
        if config.block_limit == 0 {
            return Err(ScanError::InvalidConfig("block limit must be positive"));
        }
        if config.interval.is_zero() {
            return Err(ScanError::InvalidConfig("interval must be positive"));
        }
        Ok(Self {
            client,
            config,
            live: true,
            backfill: true,
        })
    }

    pub fn without_live_fetch(mut self) -> Self {
        self.live = false;
        self
    }

    pub fn without_backfill(mut self) -> Self {
        self.backfill = false;
        self
    }

    /// Spawn the enabled routines. They run until `shutdown_rx` is set, its
    /// sender is dropped, or the event receiver is dropped.
    pub fn start(
        self,
        events: ScannedEventSender,
        shutdown_rx: watch::Receiver<bool>,
    ) -> ScannerHandle {
        let prefetch_target = prefetch_target(OffsetDateTime::now_utc(), &self.config);
        let context = Arc::new(ScanContext {
            client: self.client,
            topic: teleport_topic(),
            deduper: EventDeduper::new(),
            scan_start: OnceCell::new(),
            events,
            config: self.config,
        });
        let backfill_complete = Arc::new(AtomicBool::new(false));

        info!(
            addresses = context.config.addresses.len(),
            live = self.live,
            backfill = self.backfill,
            "EventScanner starting"
        );

        let live = self.live.then(|| {
            tokio::spawn(
                LiveFetch {
                    context: Arc::clone(&context),
                    cursor: None,
                    shutdown_rx: shutdown_rx.clone(),
                }
                .run(),
            )
        });

        let backfill = self.backfill.then(|| {
            tokio::spawn(
                Backfill {
                    context: Arc::clone(&context),
                    progress: BackfillProgress::Pending,
                    prefetch_target,
                    complete: Arc::clone(&backfill_complete),
                    shutdown_rx,
                }
                .run(),
            )
        });

        ScannerHandle {
            live,
            backfill,
            backfill_complete,
        }
    }
}

/// Handle to the running scanner routines.
pub struct ScannerHandle {
    live: Option<JoinHandle<()>>,
    backfill: Option<JoinHandle<()>>,
    backfill_complete: Arc<AtomicBool>,
}

impl ScannerHandle {
    /// Whether the backfill reached the scan start block. Always `false` when
    /// the backfill is disabled.
    pub fn is_backfill_complete(&self) -> bool {
        self.backfill_complete.load(Ordering::Acquire)
    }

    /// Wait for every routine to exit.
    pub async fn join(self) {
        for handle in [self.live, self.backfill].into_iter().flatten() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Scanner routine ended abnormally");
            }
        }
    }
}

/// Unix time, in seconds, the backfill must reach back to.
fn prefetch_target(now: OffsetDateTime, config: &ScannerConfig) -> i64 {
    let period = i64::try_from(config.prefetch_period.as_secs()).unwrap_or(i64::MAX);
    now.unix_timestamp().saturating_sub(period)
}

/// State shared by both routines.
struct ScanContext {
    client: Arc<dyn ChainClient>,
    config: ScannerConfig,
    topic: B256,
    deduper: EventDeduper,
    /// Highest block the backfill covers; the live routine starts above it.
    scan_start: OnceCell<u64>,
    events: ScannedEventSender,
}

impl ScanContext {
    /// Await a chain call, giving up if shutdown is requested first.
    async fn call<T>(
        &self,
        shutdown_rx: &mut watch::Receiver<bool>,
        request: impl Future<Output = Result<T, RpcError>>,
    ) -> Result<T, ScanError> {
        tokio::select! {
            biased;

            _ = shutdown_requested(shutdown_rx) => Err(ScanError::Cancelled),

            result = request => result.map_err(ScanError::from),
        }
    }

    fn safe_height(&self, head: u64) -> u64 {
        head.saturating_sub(self.config.block_confirmations)
    }

    /// The shared scan start, initialized by whichever routine asks first.
    async fn scan_start(&self, safe_height: u64) -> u64 {
        *self
            .scan_start
            .get_or_init(|| async move { safe_height })
            .await
    }

    /// Fetch, decode and emit the events of one chunk.
    async fn scan_range(
        &self,
        range: BlockRange,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<usize, ScanError> {
        let filter = LogFilter {
            addresses: self.config.addresses.clone(),
            topics: vec![self.topic],
            from_block: range.from,
            to_block: range.to,
        };
        let logs = self.call(shutdown_rx, self.client.filter_logs(&filter)).await?;
        let fetched = logs.len();

        let mut emitted = 0;
        for log in logs {
            let event = match decode_log(&log) {
                Ok(event) => event,
                Err(e) => {
                    // Malformed logs never become valid, so they are not retried.
                    warn!(
                        tx_hash = %log.tx_hash,
                        log_index = log.log_index,
                        error = %e,
                        "Skipping undecodable log"
                    );
                    continue;
                }
            };

            if !self.deduper.first_seen(event.tx_hash, event.log_index) {
                debug!(
                    tx_hash = %event.tx_hash,
                    log_index = event.log_index,
                    "Skipping already emitted event"
                );
                continue;
            }

            self.emit(event, shutdown_rx).await?;
            emitted += 1;
        }

        debug!(
            from_block = range.from,
            to_block = range.to,
            fetched,
            emitted,
            "Scanned block range"
        );
        Ok(emitted)
    }

    async fn emit(
        &self,
        event: ScannedEvent,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<(), ScanError> {
        tokio::select! {
            biased;

            _ = shutdown_requested(shutdown_rx) => Err(ScanError::Cancelled),

            result = self.events.send(event) => result.map_err(|_| ScanError::ChannelClosed),
        }
    }
}

/// Live fetch routine: scans newly settled blocks on every tick.
struct LiveFetch {
    context: Arc<ScanContext>,
    /// `None` until the first tick has fixed the scan start.
    cursor: Option<BlockRangeCursor>,
    shutdown_rx: watch::Receiver<bool>,
}

impl LiveFetch {
    async fn run(mut self) {
        info!("Live fetch started");

        let mut ticker = tokio::time::interval(self.context.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let stop = tokio::select! {
                biased;

                _ = shutdown_requested(&mut self.shutdown_rx) => true,

                _ = ticker.tick() => false,
            };
            if stop {
                break;
            }

            match self.tick().await {
                Ok(()) => {}
                Err(ScanError::Cancelled) => break,
                Err(ScanError::ChannelClosed) => {
                    warn!("Event channel closed, stopping live fetch");
                    break;
                }
                Err(e) => {
                    warn!(
                        last_processed = ?self.cursor.and_then(|cursor| cursor.last_processed()),
                        error = %e,
                        "Live fetch failed, retrying next tick"
                    );
                }
            }
        }

        info!("Live fetch stopped");
    }

    /// Scan everything between the cursor and the safe height, one chunk at a
    /// time. The cursor only moves past chunks that were fully emitted.
    async fn tick(&mut self) -> Result<(), ScanError> {
        let context = Arc::clone(&self.context);
        let head = context
            .call(&mut self.shutdown_rx, context.client.height())
            .await?;

        if self.cursor.is_none() {
            let start = context.scan_start(context.safe_height(head)).await;
            debug!(head, start, "Live fetch initialized");
            self.cursor = Some(BlockRangeCursor::new(
                start,
                context.config.block_confirmations,
                context.config.block_limit,
            ));
        }
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(());
        };

        for range in cursor.ranges(head) {
            context.scan_range(range, &mut self.shutdown_rx).await?;
            cursor.advance(range);
        }
        Ok(())
    }
}

/// Where the backfill is. Every state keeps what earlier steps learned, so a
/// failed step is retried without repeating them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackfillProgress {
    /// The scan start is not known yet.
    Pending,
    /// Walking backward from the scan start in `block_limit` strides,
    /// looking for a block at or before the prefetch target.
    Locating { start: u64, candidate: u64 },
    /// Scanning `[boundary, start]` forward. The boundary block itself is
    /// included, block 0 too.
    Scanning { start: u64, cursor: BlockRangeCursor },
}

/// Backfill routine: covers the prefetch window once, then exits.
struct Backfill {
    context: Arc<ScanContext>,
    progress: BackfillProgress,
    prefetch_target: i64,
    complete: Arc<AtomicBool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Backfill {
    async fn run(mut self) {
        info!(prefetch_target = self.prefetch_target, "Backfill started");

        loop {
            match self.step().await {
                Ok(false) => {}
                Ok(true) => {
                    self.complete.store(true, Ordering::Release);
                    info!("Backfill complete");
                    break;
                }
                Err(ScanError::Cancelled) => {
                    info!("Backfill cancelled");
                    break;
                }
                Err(ScanError::ChannelClosed) => {
                    warn!("Event channel closed, stopping backfill");
                    break;
                }
                Err(e) => {
                    let retry_in = self.context.config.interval;
                    warn!(
                        progress = ?self.progress,
                        retry_in = ?retry_in,
                        error = %e,
                        "Backfill step failed"
                    );
                    let stop = tokio::select! {
                        biased;

                        _ = shutdown_requested(&mut self.shutdown_rx) => true,

                        _ = tokio::time::sleep(retry_in) => false,
                    };
                    if stop {
                        info!("Backfill cancelled");
                        break;
                    }
                }
            }
        }
    }

    /// Perform one network round trip. Returns `true` once the backfill has
    /// reached the scan start.
    async fn step(&mut self) -> Result<bool, ScanError> {
        let context = Arc::clone(&self.context);
        let limit = context.config.block_limit;

        match self.progress {
            BackfillProgress::Pending => {
                let head = context
                    .call(&mut self.shutdown_rx, context.client.height())
                    .await?;
                let start = context.scan_start(context.safe_height(head)).await;
                debug!(head, start, "Backfill located scan start");
                self.progress = BackfillProgress::Locating {
                    start,
                    candidate: start,
                };
            }
            BackfillProgress::Locating { start, candidate } => {
                let block = context
                    .call(&mut self.shutdown_rx, context.client.block_by_number(candidate))
                    .await?;
                let timestamp = i64::try_from(block.timestamp).unwrap_or(i64::MAX);

                if timestamp <= self.prefetch_target || candidate == 0 {
                    debug!(
                        boundary = candidate,
                        timestamp,
                        start,
                        "Backfill boundary found"
                    );
                    self.progress = BackfillProgress::Scanning {
                        start,
                        cursor: BlockRangeCursor::starting_at(candidate, 0, limit),
                    };
                } else {
                    self.progress = BackfillProgress::Locating {
                        start,
                        candidate: candidate.saturating_sub(limit),
                    };
                }
            }
            BackfillProgress::Scanning { start, mut cursor } => {
                let Some(range) = cursor.ranges_to(start).next() else {
                    return Ok(true);
                };
                context.scan_range(range, &mut self.shutdown_rx).await?;
                cursor.advance(range);
                self.progress = BackfillProgress::Scanning { start, cursor };
            }
        }
        Ok(false)
    }
}
