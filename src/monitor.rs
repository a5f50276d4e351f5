//! `PoolMonitor`: the object that owns every shared-state component as a
//! field (spec §9 design note: "never globals") and drives the single
//! cooperative event loop described in spec §5. Grounded in
//! `market-streaming/src/stream_client.rs`'s `PoolStreamClient`, generalized
//! from "decode one protocol and print" to the full discovery → correlate →
//! score → emit pipeline.

use crate::config::Config;
use crate::correlator::{
    CorrelationOutcome, DasFallback, MetadataCache, MetadataCorrelator, MetadataFallback, DEFAULT_DAS_ENDPOINT,
};
use crate::emission::{EmissionPipeline, EmissionQueue, Journal, Sink};
use crate::subscription::{
    metadata_program_id, owner_kind, selector_key, spl_token_program_id, token2022_program_id, ManagerEvent,
    OwnerKind, RawAccountUpdate, SubscriptionManager,
};
use crate::tracker::PoolTracker;
use pool_codec::{decode, decode_legacy_pda, decode_token2022_extension, Address, DexKind, PoolEvent, TokenMetadata};
use pool_risk::{evaluate_gate, FeatureInputs, RiskScorer};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Conventional on-disk location for the ternary scorer weights (spec §9:
/// "a static weights file with a fixed schema"), mirroring the teacher's
/// `dex-idl-parser/idls/*.json` fixed-relative-path loading convention. No
/// env var names this path (spec §6's configuration surface is silent on
/// it), so it isn't user-configurable — its absence is the expected
/// fallback-to-rule-based path (spec §7), not a configuration error.
const SCORER_WEIGHTS_PATH: &str = "weights/scorer_weights.json";

/// How often `PoolTracker::prune_pending_curves` sweeps buffered bonding-curve
/// accounts whose mint was never observed (spec §5's 30s pending-curve max
/// age) — modeled on the keepalive ticker in `subscription.rs`.
const PENDING_CURVE_PRUNE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(10);

/// Approximate SOL/USD conversion rate used only when a pool's liquidity is
/// SOL-denominated; a stablecoin-quoted pool's `liquiditySol` is already
/// USD-equivalent (spec §4.A: "quoteReserve/1e6... approximately 1 SOL per
/// dollar for scale") and must not be multiplied again.
const SOL_USD_RATE: f64 = 150.0;

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

pub struct PoolMonitor {
    subscription: Arc<SubscriptionManager>,
    tracker: Arc<PoolTracker>,
    correlator: Arc<MetadataCorrelator>,
    emission: Arc<EmissionPipeline>,
    scorer: Arc<RiskScorer>,
    learner: Arc<crate::learner::OutcomeLearner>,
    events_rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<ManagerEvent>>>,
}

impl PoolMonitor {
    pub fn new(config: Config) -> Result<Self, crate::error::EmissionError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let initial_owners: Vec<Address> = config
            .enabled_dexs
            .iter()
            .map(|d| d.program_id())
            .chain([metadata_program_id(), token2022_program_id()])
            .collect();

        let subscription = Arc::new(SubscriptionManager::new(
            config.stream_endpoint.clone(),
            Some(config.stream_token.clone()),
            initial_owners,
            events_tx,
        ));

        let queue = Arc::new(EmissionQueue::new());
        let journal = Arc::new(Journal::open(&config.journal_path)?);
        let sink = config.sink_url.clone().map(|url| Arc::new(Sink::new(url, config.sink_token.clone())));
        let emission = Arc::new(EmissionPipeline::new(queue, journal, sink));

        let cache = Arc::new(MetadataCache::new());
        let fallback: Option<Arc<dyn MetadataFallback>> = config
            .metadata_fallback_key
            .clone()
            .map(|key| Arc::new(DasFallback::new(DEFAULT_DAS_ENDPOINT, key)) as Arc<dyn MetadataFallback>);
        let correlator = Arc::new(MetadataCorrelator::new(cache, fallback));

        let tracker = Arc::new(PoolTracker::new(DexKind::PumpFun.program_id()));
        let scorer = Arc::new(RiskScorer::load(Path::new(SCORER_WEIGHTS_PATH)));
        let learner = Arc::new(crate::learner::OutcomeLearner::new());

        Ok(Self {
            subscription,
            tracker,
            correlator,
            emission,
            scorer,
            learner,
            events_rx: tokio::sync::Mutex::new(Some(events_rx)),
        })
    }

    pub fn stop(&self) {
        self.subscription.stop();
    }

    pub fn learner(&self) -> &Arc<crate::learner::OutcomeLearner> {
        &self.learner
    }

    /// Runs the cooperating tasks forever (spec §5): the subscription
    /// manager's reconnect loop, the emission dispatcher, and the main
    /// event-processing loop draining `ManagerEvent`s plus correlator
    /// retries. Returns only after `stop()`.
    pub async fn run(&self) {
        let subscription = Arc::clone(&self.subscription);
        let sub_task = tokio::spawn(async move { subscription.start().await });

        let emission = Arc::clone(&self.emission);
        let emit_task = tokio::spawn(async move { emission.run(now_ms).await });

        self.process_events().await;

        emit_task.abort();
        let _ = sub_task.await;
    }

    async fn process_events(&self) {
        let mut events_rx = self.events_rx.lock().await.take().expect("run() called once");
        let mut prune_tick = tokio::time::interval(PENDING_CURVE_PRUNE_INTERVAL);
        prune_tick.tick().await; // first tick fires immediately

        loop {
            let next_retry = self.correlator.next_due().await;
            let sleep = async {
                match next_retry {
                    Some(when) => tokio::time::sleep_until(when).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                event = events_rx.recv() => {
                    match event {
                        Some(ManagerEvent::Account(update)) => self.on_account_update(update).await,
                        Some(ManagerEvent::Connected) => info!("subscription connected"),
                        Some(ManagerEvent::Disconnected) => warn!("subscription disconnected"),
                        Some(ManagerEvent::Error(e)) => warn!(error = %e, "subscription error"),
                        None => break,
                    }
                }
                _ = sleep => {
                    for event in self.correlator.drain_due().await {
                        self.score_and_forward(event).await;
                    }
                }
                _ = prune_tick.tick() => {
                    self.tracker.prune_pending_curves(now_ms());
                }
            }
        }
    }

    async fn on_account_update(&self, update: RawAccountUpdate) {
        let Some(kind) = owner_kind(&update.owner) else { return };
        let now = now_ms();

        match kind {
            OwnerKind::Pool(dex) => self.on_pool_account(dex, update, now).await,
            OwnerKind::Metadata => {
                if let Some((mint, name, symbol)) = decode_legacy_pda(&update.data) {
                    self.on_metadata_decoded(mint, name, symbol, now).await;
                }
            }
            OwnerKind::Token2022 => {
                for event in self.tracker.on_mint_observed(update.pubkey, now) {
                    self.score_and_forward(event).await;
                }
                if let Some((mint, name, symbol)) = decode_token2022_extension(&update.data) {
                    self.on_metadata_decoded(mint, name, symbol, now).await;
                }
            }
            OwnerKind::SplToken => {
                if let Some((pool, liquidity)) = self.tracker.on_vault_update(update.pubkey, &update.data) {
                    info!(pool = %pool, liquidity, "vault update recomputed liquidity");
                }
            }
        }
    }

    async fn on_pool_account(&self, dex: DexKind, update: RawAccountUpdate, now: u64) {
        let Some(snapshot) = decode(dex, &update.data, update.slot, now, update.pubkey) else { return };

        if self.tracker.positions.is_tracked(&snapshot.pool_address) {
            if let Some(event) = self.tracker.on_position_snapshot(snapshot.clone()) {
                self.score_and_forward(event).await;
            }
        }

        let event = if dex == DexKind::PumpFun {
            self.tracker.on_pumpfun_snapshot(snapshot, now)
        } else {
            self.tracker.on_amm_snapshot(snapshot, now)
        };

        let Some(event) = event else { return };

        if let (Some(base_vault), Some(quote_vault)) =
            (event.pool_snapshot.enriched.base_vault, event.pool_snapshot.enriched.quote_vault)
        {
            let quote_is_sol = event.pool_snapshot.quote_mint.map(|q| q.is_wrapped_sol()).unwrap_or(false);
            let quote_is_stable = event.pool_snapshot.quote_mint.map(|q| q.is_stable()).unwrap_or(false);
            let selector = self.tracker.register_vaults(
                event.pool_snapshot.pool_address,
                base_vault,
                quote_vault,
                quote_is_sol,
                quote_is_stable,
                now,
            );
            let key = selector_key("vault", &event.pool_snapshot.pool_address);
            self.subscription.subscribe_additional(key, vec![spl_token_program_id()], selector.accounts);
        }

        self.correlate_and_forward(event).await;
    }

    async fn on_metadata_decoded(&self, mint: Address, name: String, symbol: String, now: u64) {
        let metadata = TokenMetadata { mint, name, symbol, cached_at_ms: now };
        if let Some(event) = self.correlator.on_metadata_cached(metadata).await {
            self.score_and_forward(event).await;
        }
    }

    async fn correlate_and_forward(&self, event: PoolEvent) {
        match self.correlator.on_event(event).await {
            CorrelationOutcome::Forward(event) => self.score_and_forward(event).await,
            CorrelationOutcome::Buffered => {}
        }
    }

    /// Scores the event's snapshot, records a prediction (spec §4.I), and
    /// enqueues for emission unless the gate rejects it (spec §4.D: "any
    /// `CRITICAL` flag causes the consumer in §4.H to reject the sample").
    async fn score_and_forward(&self, event: PoolEvent) {
        let liquidity_sol = event.pool_snapshot.enriched.liquidity_sol.unwrap_or(0.0);
        let quote_is_stable = event.pool_snapshot.quote_mint.map(|q| q.is_stable()).unwrap_or(false);
        let liquidity_usd = if quote_is_stable { liquidity_sol } else { liquidity_sol * SOL_USD_RATE };

        let inputs = FeatureInputs { liquidity_usd, ..FeatureInputs::default() };
        let features = pool_risk::extract(&inputs);
        let report = self.scorer.score(&inputs, &features);
        let patterns = self.scorer.match_patterns(&features);
        let decision = evaluate_gate(&report, &patterns);

        self.learner.record_prediction(
            event.pool_snapshot.base_mint.map(|m| m.to_base58()).unwrap_or_default(),
            event.pool_snapshot.observed_at_ms,
            report.risk_score as f32 / 100.0,
            report.risk_level,
            report.confidence as f32 / 100.0,
            features,
            patterns.iter().map(|p| p.pattern_id.clone()).collect(),
        );

        // The gate decision feeds the paper-trading collaborator (spec §4.D);
        // it does not withhold the detection event itself from the emission
        // pipeline, which reports every discovery regardless of risk.
        if let pool_risk::GateDecision::Reject(reason) = &decision {
            warn!(pool = %event.pool_snapshot.pool_address, reason = %reason, "pool gated from paper-trading");
        }

        if !self.emission.enqueue(event) {
            warn!("emission queue full, dropping event");
        }
    }
}
