//! Relay decision engine.
//!
//! The RelayEngine is responsible for:
//! - Registering asset pairs and owning their price buffers
//! - Accepting price readings from feeders (`collect`)
//! - Running a periodic tick that decides, per pair, whether the buffered
//!   readings justify an on-chain update, and submitting them if so
//! - Forwarding successes and errors to optional observer channels
//!
//! The registry lock guards in-memory state only. A tick copies what it needs
//! under the lock, performs the network round trips on the copy, then
//! re-acquires the lock briefly to commit the result. A pair with an attempt
//! in flight is not handed to a second one until the first has committed or
//! been dropped.

mod decision;
mod pair;

pub use pair::Pair;

use crate::chain::{RpcError, TxHash};
use crate::config::{RelayConfig, RetentionPolicy};
use crate::events::{RelayErrorSender, RelaySuccessSender};
use crate::price::{PriceBuffer, PriceError, PricePoint};
use crate::utils::shutdown::shutdown_requested;
use compact_str::CompactString;
use kanau::processor::Processor;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Errors and skips reported by the relay engine.
#[derive(Debug, Clone, Error)]
pub enum RelayError {
    /// A reading was rejected.
    #[error(transparent)]
    Price(#[from] PriceError),

    /// A reading or relay request named a pair that was never registered.
    #[error("unknown asset pair: {0}")]
    UnknownPair(CompactString),

    /// The on-chain price is still fresh.
    #[error("unable to update {asset_pair} oracle, price is not expired yet (last update {last_update})")]
    NotYetExpired {
        asset_pair: CompactString,
        last_update: OffsetDateTime,
    },

    /// Not enough buffered readings for the contract's quorum.
    #[error("unable to update {asset_pair} oracle, {available} of {required} prices required for a quorum")]
    InsufficientQuorum {
        asset_pair: CompactString,
        available: usize,
        required: usize,
    },

    /// The new median is too close to the on-chain price.
    #[error("unable to update {asset_pair} oracle, spread {spread:.4}% is below {threshold}%")]
    SpreadTooLow {
        asset_pair: CompactString,
        spread: f64,
        threshold: f64,
    },

    /// A contract read failed.
    #[error("{asset_pair} oracle call failed: {source}")]
    Oracle {
        asset_pair: CompactString,
        #[source]
        source: RpcError,
    },

    /// The update transaction failed.
    #[error("{asset_pair} oracle update failed: {source}")]
    Submission {
        asset_pair: CompactString,
        #[source]
        source: RpcError,
    },

    /// Another relay attempt for the pair has not finished yet.
    #[error("relay for {0} is already in progress")]
    InProgress(CompactString),

    #[error("relay engine already started")]
    AlreadyStarted,
}

impl RelayError {
    /// Business-rule skips are intentional no-ops, retried on the next tick.
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            RelayError::NotYetExpired { .. }
                | RelayError::InsufficientQuorum { .. }
                | RelayError::SpreadTooLow { .. }
                | RelayError::InProgress(_)
        )
    }

    /// The asset pair this error concerns, if any.
    pub fn asset_pair(&self) -> Option<&str> {
        match self {
            RelayError::Price(PriceError::InvalidReading { asset_pair })
            | RelayError::UnknownPair(asset_pair)
            | RelayError::InProgress(asset_pair)
            | RelayError::NotYetExpired { asset_pair, .. }
            | RelayError::InsufficientQuorum { asset_pair, .. }
            | RelayError::SpreadTooLow { asset_pair, .. }
            | RelayError::Oracle { asset_pair, .. }
            | RelayError::Submission { asset_pair, .. } => Some(asset_pair.as_str()),
            RelayError::AlreadyStarted => None,
        }
    }
}

/// A registered pair and its readings.
struct PairSlot {
    pair: Pair,
    buffer: PriceBuffer,
    /// Changes whenever the pair is re-registered, so a commit never lands on
    /// a buffer that replaced the one it relayed.
    generation: u64,
    in_flight: bool,
}

#[derive(Default)]
struct Registry {
    slots: HashMap<CompactString, PairSlot>,
    next_generation: u64,
}

/// A private copy of one pair's state, taken under the registry lock.
///
/// The pair stays marked in flight until the job is dropped.
struct RelayJob<'a> {
    pair: Pair,
    buffer: PriceBuffer,
    generation: u64,
    /// Number of readings copied; they are the oldest in the live buffer.
    taken: usize,
    _in_flight: InFlight<'a>,
}

/// Clears a slot's in-flight mark on drop, unless the slot was replaced.
struct InFlight<'a> {
    shared: &'a Shared,
    asset_pair: CompactString,
    generation: u64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut registry = self.shared.registry.lock();
        match registry.slots.get_mut(self.asset_pair.as_str()) {
            Some(slot) if slot.generation == self.generation => slot.in_flight = false,
            _ => {}
        }
    }
}

/// State shared between the engine handle and its ticker task.
struct Shared {
    registry: Mutex<Registry>,
    retention: RetentionPolicy,
}

/// Relay decision engine.
///
/// Owns the pair registry. Callers hold the engine by reference (or in an
/// `Arc`) and feed it with [`collect`](RelayEngine::collect).
pub struct RelayEngine {
    shared: Arc<Shared>,
    tick_interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    started: AtomicBool,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl RelayEngine {
    /// Create an engine with no pairs.
    pub fn new(config: RelayConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::default()),
                retention: config.retention,
            }),
            tick_interval: config.tick_interval,
            shutdown_tx,
            started: AtomicBool::new(false),
            ticker: Mutex::new(None),
        }
    }

    /// Register a pair with an empty buffer, replacing any pair with the same
    /// identifier.
    pub fn add_pair(&self, pair: Pair) {
        let asset_pair = pair.asset_pair().clone();
        let buffer = PriceBuffer::new(asset_pair.clone(), pair.config().price_expiration);

        let mut registry = self.shared.registry.lock();
        let generation = registry.next_generation;
        registry.next_generation += 1;
        let replaced = registry
            .slots
            .insert(
                asset_pair.clone(),
                PairSlot {
                    pair,
                    buffer,
                    generation,
                    in_flight: false,
                },
            )
            .is_some();

        debug!(asset_pair = %asset_pair, replaced, "Registered asset pair");
    }

    /// Add a feeder's reading to its pair's buffer.
    pub fn collect(&self, point: PricePoint) -> Result<(), RelayError> {
        point.validate()?;

        let mut registry = self.shared.registry.lock();
        let slot = registry
            .slots
            .get_mut(point.asset_pair.as_str())
            .ok_or_else(|| RelayError::UnknownPair(point.asset_pair.clone()))?;
        slot.buffer.add(point)?;
        Ok(())
    }

    /// Number of readings buffered for `asset_pair`, `None` if unregistered.
    pub fn buffered(&self, asset_pair: &str) -> Option<usize> {
        self.shared
            .registry
            .lock()
            .slots
            .get(asset_pair)
            .map(|slot| slot.buffer.len())
    }

    /// Run the relay transition for one pair right now, outside the ticker.
    ///
    /// Fails with [`RelayError::InProgress`] while the ticker or another
    /// caller is relaying the same pair.
    pub async fn relay(&self, asset_pair: &str) -> Result<TxHash, RelayError> {
        let now = OffsetDateTime::now_utc();
        let mut job = self.shared.snapshot(asset_pair, now)?;
        let result = decision::relay(&job.pair, &mut job.buffer, now).await;
        self.shared.commit(&job, &result);
        result
    }

    /// Start the periodic tick on a background task.
    ///
    /// Each tick relays every pair with buffered readings. Successes are
    /// forwarded as the asset pair identifier, failures and skips as the
    /// error; a `None` observer discards its output.
    pub fn start(
        &self,
        on_success: Option<RelaySuccessSender>,
        on_error: Option<RelayErrorSender>,
    ) -> Result<(), RelayError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(RelayError::AlreadyStarted);
        }

        let shared = Arc::clone(&self.shared);
        let shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(shared.run(
            self.tick_interval,
            shutdown_rx,
            on_success,
            on_error,
        ));
        *self.ticker.lock() = Some(handle);

        info!(tick_interval = ?self.tick_interval, "RelayEngine started");
        Ok(())
    }

    /// Stop the ticker and wait for an in-flight tick to finish.
    ///
    /// Safe to call before [`start`](RelayEngine::start); a later start then
    /// exits immediately.
    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);

        let handle = self.ticker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "RelayEngine ticker ended abnormally");
            }
            info!("RelayEngine shutdown complete");
        }
    }
}

impl Processor<PricePoint> for RelayEngine {
    type Output = ();
    type Error = RelayError;

    async fn process(&self, point: PricePoint) -> Result<(), RelayError> {
        self.collect(point)
    }
}

impl Shared {
    /// Copy one pair's state, dropping expired readings first.
    fn snapshot(
        &self,
        asset_pair: &str,
        now: OffsetDateTime,
    ) -> Result<RelayJob<'_>, RelayError> {
        let mut registry = self.registry.lock();
        let slot = registry
            .slots
            .get_mut(asset_pair)
            .ok_or_else(|| RelayError::UnknownPair(asset_pair.into()))?;
        if slot.in_flight {
            return Err(RelayError::InProgress(slot.pair.asset_pair().clone()));
        }
        slot.buffer.clear_expired(now);
        Ok(self.take_job(slot))
    }

    /// Copies of every idle pair that still has readings, in identifier order.
    fn snapshot_all(&self, now: OffsetDateTime) -> Vec<RelayJob<'_>> {
        let mut registry = self.registry.lock();
        let mut jobs: Vec<RelayJob> = registry
            .slots
            .values_mut()
            .filter(|slot| !slot.in_flight)
            .filter_map(|slot| {
                slot.buffer.clear_expired(now);
                (!slot.buffer.is_empty()).then(|| self.take_job(slot))
            })
            .collect();
        jobs.sort_by(|a, b| a.pair.asset_pair().cmp(b.pair.asset_pair()));
        jobs
    }

    /// Mark `slot` in flight and copy it. The caller holds the registry lock.
    fn take_job(&self, slot: &mut PairSlot) -> RelayJob<'_> {
        slot.in_flight = true;
        RelayJob {
            pair: slot.pair.clone(),
            buffer: slot.buffer.clone(),
            generation: slot.generation,
            taken: slot.buffer.len(),
            _in_flight: InFlight {
                shared: self,
                asset_pair: slot.pair.asset_pair().clone(),
                generation: slot.generation,
            },
        }
    }

    /// Remove the relayed readings from the live buffer when the outcome and
    /// retention policy call for it.
    fn commit(&self, job: &RelayJob, result: &Result<TxHash, RelayError>) {
        let discard = match result {
            Ok(_) => true,
            Err(RelayError::Submission { .. }) => self.retention == RetentionPolicy::ClearAlways,
            Err(_) => false,
        };
        if !discard {
            return;
        }

        let mut registry = self.registry.lock();
        match registry.slots.get_mut(job.pair.asset_pair().as_str()) {
            Some(slot) if slot.generation == job.generation => {
                slot.buffer.discard_front(job.taken);
            }
            _ => {
                debug!(
                    asset_pair = %job.pair.asset_pair(),
                    "Pair was replaced during relay, nothing to commit"
                );
            }
        }
    }

    /// Ticker loop. Exits when the shutdown signal is set or its sender is
    /// gone.
    async fn run(
        self: Arc<Self>,
        tick_interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
        on_success: Option<RelaySuccessSender>,
        on_error: Option<RelayErrorSender>,
    ) {
        let mut ticker = tokio::time::interval_at(Instant::now() + tick_interval, tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let stop = tokio::select! {
                biased;

                _ = shutdown_requested(&mut shutdown_rx) => true,

                _ = ticker.tick() => false,
            };
            if stop {
                info!("RelayEngine received shutdown signal");
                break;
            }

            self.tick(&mut shutdown_rx, on_success.as_ref(), on_error.as_ref())
                .await;
        }
    }

    async fn tick(
        &self,
        shutdown_rx: &mut watch::Receiver<bool>,
        on_success: Option<&RelaySuccessSender>,
        on_error: Option<&RelayErrorSender>,
    ) {
        let now = OffsetDateTime::now_utc();
        let jobs = self.snapshot_all(now);
        debug!(pairs = jobs.len(), "Relay tick");

        for mut job in jobs {
            let result = tokio::select! {
                biased;

                _ = shutdown_requested(shutdown_rx) => None,

                result = decision::relay(&job.pair, &mut job.buffer, now) => Some(result),
            };
            // Dropping the remaining jobs releases their pairs.
            let Some(result) = result else {
                debug!(
                    asset_pair = %job.pair.asset_pair(),
                    "Relay attempt cancelled by shutdown"
                );
                return;
            };
            self.commit(&job, &result);

            match result {
                Ok(tx_hash) => {
                    info!(
                        asset_pair = %job.pair.asset_pair(),
                        tx_hash = %tx_hash,
                        "Oracle updated"
                    );
                    forward(on_success, job.pair.asset_pair().clone(), shutdown_rx).await;
                }
                Err(e) => {
                    debug!(
                        asset_pair = %job.pair.asset_pair(),
                        skip = e.is_skip(),
                        error = %e,
                        "Relay attempt did not update the oracle"
                    );
                    forward(on_error, e, shutdown_rx).await;
                }
            }
        }
    }
}

/// Hand `value` to an optional observer, giving up if shutdown is requested
/// first.
async fn forward<T>(
    sender: Option<&mpsc::Sender<T>>,
    value: T,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    let Some(sender) = sender else {
        return;
    };
    tokio::select! {
        biased;

        _ = shutdown_requested(shutdown_rx) => {}

        result = sender.send(value) => {
            if result.is_err() {
                debug!("Relay observer channel closed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MedianOracle;
    use crate::config::PairConfig;
    use crate::events::{relay_error_channel, relay_success_channel};
    use async_trait::async_trait;
    use num_bigint::BigInt;
    use tokio::sync::Notify;

    struct MockState {
        age: OffsetDateTime,
        quorum: usize,
        price: BigInt,
        fail_submit: bool,
        quorum_calls: usize,
        submissions: Vec<Vec<BigInt>>,
        /// When set, `submit` waits for a notification after recording.
        submit_gate: Option<Arc<Notify>>,
    }

    struct MockMedian {
        state: Mutex<MockState>,
    }

    impl MockMedian {
        fn new(quorum: usize, price: i64) -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(MockState {
                    age: OffsetDateTime::now_utc() - time::Duration::hours(2),
                    quorum,
                    price: BigInt::from(price),
                    fail_submit: false,
                    quorum_calls: 0,
                    submissions: Vec::new(),
                    submit_gate: None,
                }),
            })
        }

        fn submissions(&self) -> Vec<Vec<BigInt>> {
            self.state.lock().submissions.clone()
        }

        fn gate_submissions(&self) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            self.state.lock().submit_gate = Some(gate.clone());
            gate
        }

        async fn wait_for_submission(&self) {
            while self.submissions().is_empty() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }
    }

    #[async_trait]
    impl MedianOracle for MockMedian {
        async fn age(&self) -> Result<OffsetDateTime, RpcError> {
            Ok(self.state.lock().age)
        }

        async fn required_quorum(&self) -> Result<usize, RpcError> {
            let mut state = self.state.lock();
            state.quorum_calls += 1;
            Ok(state.quorum)
        }

        async fn current_price(&self) -> Result<BigInt, RpcError> {
            Ok(self.state.lock().price.clone())
        }

        async fn submit(&self, values: &[PricePoint]) -> Result<TxHash, RpcError> {
            let gate = {
                let mut state = self.state.lock();
                state
                    .submissions
                    .push(values.iter().map(|point| point.value.clone()).collect());
                state.submit_gate.clone()
            };
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if self.state.lock().fail_submit {
                return Err(RpcError::Node {
                    code: -32000,
                    message: "execution reverted".into(),
                });
            }
            Ok(TxHash::repeat_byte(0xab))
        }
    }

    fn pair_config(asset_pair: &str) -> PairConfig {
        PairConfig {
            asset_pair: asset_pair.into(),
            oracle_spread: 2.0,
            oracle_expiration: time::Duration::hours(1),
            price_expiration: time::Duration::hours(1),
        }
    }

    fn engine_with(median: &Arc<MockMedian>, retention: RetentionPolicy) -> RelayEngine {
        let engine = RelayEngine::new(RelayConfig {
            tick_interval: Duration::from_millis(10),
            retention,
        });
        engine.add_pair(Pair::new(pair_config("ETHUSD"), median.clone()));
        engine
    }

    fn feed(engine: &RelayEngine, values: &[i64]) {
        for value in values {
            engine
                .collect(PricePoint::new("ETHUSD", *value, OffsetDateTime::now_utc()))
                .unwrap();
        }
    }

    #[test]
    fn test_collect_unknown_pair() {
        let median = MockMedian::new(1, 100);
        let engine = engine_with(&median, RetentionPolicy::ClearAlways);
        let result = engine.collect(PricePoint::new("BTCUSD", 1, OffsetDateTime::now_utc()));
        assert!(matches!(result, Err(RelayError::UnknownPair(pair)) if pair == "BTCUSD"));
        assert_eq!(engine.buffered("BTCUSD"), None);
    }

    #[test]
    fn test_collect_rejects_zero() {
        let median = MockMedian::new(1, 100);
        let engine = engine_with(&median, RetentionPolicy::ClearAlways);
        feed(&engine, &[100]);
        let result = engine.collect(PricePoint::new("ETHUSD", 0, OffsetDateTime::now_utc()));
        assert!(matches!(
            result,
            Err(RelayError::Price(PriceError::InvalidReading { .. }))
        ));
        assert_eq!(engine.buffered("ETHUSD"), Some(1));
    }

    #[test]
    fn test_add_pair_replaces_buffer() {
        let median = MockMedian::new(1, 100);
        let engine = engine_with(&median, RetentionPolicy::ClearAlways);
        feed(&engine, &[100, 101]);
        engine.add_pair(Pair::new(pair_config("ETHUSD"), median.clone()));
        assert_eq!(engine.buffered("ETHUSD"), Some(0));
    }

    #[tokio::test]
    async fn test_not_yet_expired_keeps_buffer() {
        let median = MockMedian::new(1, 100);
        median.state.lock().age = OffsetDateTime::now_utc();
        let engine = engine_with(&median, RetentionPolicy::ClearAlways);
        feed(&engine, &[150]);

        let result = engine.relay("ETHUSD").await;

        assert!(matches!(result, Err(RelayError::NotYetExpired { .. })));
        assert_eq!(median.state.lock().quorum_calls, 0);
        assert!(median.submissions().is_empty());
        assert_eq!(engine.buffered("ETHUSD"), Some(1));
    }

    #[tokio::test]
    async fn test_insufficient_quorum() {
        let median = MockMedian::new(3, 100);
        let engine = engine_with(&median, RetentionPolicy::ClearAlways);
        feed(&engine, &[150, 151]);

        let result = engine.relay("ETHUSD").await;

        assert!(matches!(
            result,
            Err(RelayError::InsufficientQuorum {
                available: 2,
                required: 3,
                ..
            })
        ));
        assert!(result.as_ref().is_err_and(RelayError::is_skip));
        assert!(median.submissions().is_empty());
        assert_eq!(engine.buffered("ETHUSD"), Some(2));
    }

    #[tokio::test]
    async fn test_spread_too_low() {
        let median = MockMedian::new(3, 100);
        let engine = engine_with(&median, RetentionPolicy::ClearAlways);
        feed(&engine, &[100, 101, 102]);

        let result = engine.relay("ETHUSD").await;

        match result {
            Err(RelayError::SpreadTooLow { spread, threshold, .. }) => {
                assert_eq!(spread, 1.0);
                assert_eq!(threshold, 2.0);
            }
            other => panic!("expected SpreadTooLow, got {other:?}"),
        }
        assert!(median.submissions().is_empty());
        assert_eq!(engine.buffered("ETHUSD"), Some(3));
    }

    #[tokio::test]
    async fn test_price_drop_counts_as_spread() {
        let median = MockMedian::new(1, 100);
        let engine = engine_with(&median, RetentionPolicy::ClearAlways);
        feed(&engine, &[90]);

        assert!(engine.relay("ETHUSD").await.is_ok());
        assert_eq!(median.submissions(), vec![vec![BigInt::from(90)]]);
    }

    #[tokio::test]
    async fn test_submits_truncated_quorum_and_clears() {
        let median = MockMedian::new(3, 100);
        let engine = engine_with(&median, RetentionPolicy::ClearAlways);
        feed(&engine, &[104, 300, 105, 106]);

        let result = engine.relay("ETHUSD").await;

        assert_eq!(result.unwrap(), TxHash::repeat_byte(0xab));
        let mut submitted = median.submissions().remove(0);
        submitted.sort();
        assert_eq!(
            submitted,
            vec![BigInt::from(104), BigInt::from(105), BigInt::from(106)]
        );
        assert_eq!(engine.buffered("ETHUSD"), Some(0));
    }

    #[tokio::test]
    async fn test_failed_submission_clears_by_default() {
        let median = MockMedian::new(3, 100);
        median.state.lock().fail_submit = true;
        let engine = engine_with(&median, RetentionPolicy::ClearAlways);
        feed(&engine, &[104, 105, 106]);

        let result = engine.relay("ETHUSD").await;

        assert!(matches!(result, Err(RelayError::Submission { .. })));
        assert!(!result.as_ref().is_err_and(RelayError::is_skip));
        assert_eq!(median.submissions().len(), 1);
        assert_eq!(engine.buffered("ETHUSD"), Some(0));
    }

    #[tokio::test]
    async fn test_failed_submission_retains_when_configured() {
        let median = MockMedian::new(3, 100);
        median.state.lock().fail_submit = true;
        let engine = engine_with(&median, RetentionPolicy::RetainOnFailure);
        feed(&engine, &[104, 105, 106, 300]);

        let result = engine.relay("ETHUSD").await;

        assert!(matches!(result, Err(RelayError::Submission { .. })));
        assert_eq!(engine.buffered("ETHUSD"), Some(4));
    }

    #[tokio::test]
    async fn test_readings_collected_during_submission_survive() {
        let median = MockMedian::new(2, 100);
        let gate = median.gate_submissions();
        let engine = engine_with(&median, RetentionPolicy::ClearAlways);
        feed(&engine, &[150, 151]);

        let (first, ()) = tokio::join!(engine.relay("ETHUSD"), async {
            median.wait_for_submission().await;
            feed(&engine, &[160, 161]);

            let second = engine.relay("ETHUSD").await;
            assert!(matches!(&second, Err(RelayError::InProgress(pair)) if pair.as_str() == "ETHUSD"));
            assert!(second.as_ref().is_err_and(RelayError::is_skip));

            gate.notify_one();
        });

        assert!(first.is_ok());
        assert_eq!(
            median.submissions(),
            vec![vec![BigInt::from(150), BigInt::from(151)]]
        );
        assert_eq!(engine.buffered("ETHUSD"), Some(2));

        // The pair is free again and relays only the newer readings.
        median.state.lock().submit_gate = None;
        assert!(engine.relay("ETHUSD").await.is_ok());
        assert_eq!(
            median.submissions()[1],
            vec![BigInt::from(160), BigInt::from(161)]
        );
        assert_eq!(engine.buffered("ETHUSD"), Some(0));
    }

    #[tokio::test]
    async fn test_failed_submission_keeps_readings_collected_meanwhile() {
        let median = MockMedian::new(2, 100);
        median.state.lock().fail_submit = true;
        let gate = median.gate_submissions();
        let engine = engine_with(&median, RetentionPolicy::ClearAlways);
        feed(&engine, &[150, 151]);

        let (first, ()) = tokio::join!(engine.relay("ETHUSD"), async {
            median.wait_for_submission().await;
            feed(&engine, &[160]);
            gate.notify_one();
        });

        assert!(matches!(first, Err(RelayError::Submission { .. })));
        assert_eq!(engine.buffered("ETHUSD"), Some(1));
    }

    #[tokio::test]
    async fn test_cancelled_tick_releases_pair() {
        let median = MockMedian::new(2, 100);
        median.gate_submissions();
        let engine = engine_with(&median, RetentionPolicy::ClearAlways);
        feed(&engine, &[150, 151]);
        engine.start(None, None).unwrap();

        tokio::time::timeout(Duration::from_secs(2), median.wait_for_submission())
            .await
            .unwrap();
        assert!(matches!(
            engine.relay("ETHUSD").await,
            Err(RelayError::InProgress(_))
        ));
        tokio::time::timeout(Duration::from_secs(2), engine.stop())
            .await
            .unwrap();

        // The cancelled attempt committed nothing and left the pair idle.
        assert_eq!(engine.buffered("ETHUSD"), Some(2));
        median.state.lock().submit_gate = None;
        assert!(engine.relay("ETHUSD").await.is_ok());
        assert_eq!(engine.buffered("ETHUSD"), Some(0));
    }

    #[tokio::test]
    async fn test_relay_unknown_pair() {
        let median = MockMedian::new(1, 100);
        let engine = engine_with(&median, RetentionPolicy::ClearAlways);
        assert!(matches!(
            engine.relay("BTCUSD").await,
            Err(RelayError::UnknownPair(_))
        ));
    }

    #[tokio::test]
    async fn test_processor_collects() {
        let median = MockMedian::new(1, 100);
        let engine = engine_with(&median, RetentionPolicy::ClearAlways);
        engine
            .process(PricePoint::new("ETHUSD", 7, OffsetDateTime::now_utc()))
            .await
            .unwrap();
        assert_eq!(engine.buffered("ETHUSD"), Some(1));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let median = MockMedian::new(1, 100);
        let engine = engine_with(&median, RetentionPolicy::ClearAlways);
        engine.start(None, None).unwrap();
        assert!(matches!(
            engine.start(None, None),
            Err(RelayError::AlreadyStarted)
        ));
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_stop_before_start_does_not_block() {
        let median = MockMedian::new(1, 100);
        let engine = engine_with(&median, RetentionPolicy::ClearAlways);
        tokio::time::timeout(Duration::from_secs(1), engine.stop())
            .await
            .unwrap();

        // The signal stays set, so a late start winds down immediately.
        engine.start(None, None).unwrap();
        tokio::time::timeout(Duration::from_secs(1), engine.stop())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_ticker_forwards_outcomes() {
        let eth = MockMedian::new(1, 100);
        let btc = MockMedian::new(5, 100);
        let engine = engine_with(&eth, RetentionPolicy::ClearAlways);
        engine.add_pair(Pair::new(pair_config("BTCUSD"), btc.clone()));
        feed(&engine, &[150]);
        engine
            .collect(PricePoint::new("BTCUSD", 150, OffsetDateTime::now_utc()))
            .unwrap();

        let (success_tx, mut success_rx) = relay_success_channel();
        let (error_tx, mut error_rx) = relay_error_channel();
        engine.start(Some(success_tx), Some(error_tx)).unwrap();

        let relayed = tokio::time::timeout(Duration::from_secs(2), success_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(relayed, "ETHUSD");

        let error = tokio::time::timeout(Duration::from_secs(2), error_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(error.is_skip());
        assert_eq!(error.asset_pair(), Some("BTCUSD"));

        tokio::time::timeout(Duration::from_secs(2), engine.stop())
            .await
            .unwrap();
        assert_eq!(engine.buffered("ETHUSD"), Some(0));
        assert_eq!(engine.buffered("BTCUSD"), Some(1));
    }

    #[tokio::test]
    async fn test_ticker_skips_empty_pairs() {
        let median = MockMedian::new(1, 100);
        let engine = engine_with(&median, RetentionPolicy::ClearAlways);
        let (error_tx, mut error_rx) = relay_error_channel();
        engine.start(None, Some(error_tx)).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.stop().await;

        assert!(error_rx.try_recv().is_err());
        assert_eq!(median.state.lock().quorum_calls, 0);
    }
}
