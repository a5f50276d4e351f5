//! Pool Tracker (spec §4.F): dedup, launchpad-mint registration, graduation
//! detection, vault subscription/update bookkeeping, and position-tracking
//! mode. Generalizes the teacher's `PoolStateCache` (stale-entry cleanup,
//! `CacheStats`) from a single borsh-decoded state enum to the five-DEX
//! `PoolSnapshot`, via `pool-risk`'s `PositionCache`.

use crate::bounded::{AgeBoundedMap, BoundedSet};
use crate::subscription::Selector;
use parking_lot::Mutex;
use pool_codec::{amm_liquidity_sol, Address, DexKind, MintAddress, PoolAddress, PoolEvent, PoolEventKind, PoolSnapshot, VaultAddress};
use pool_risk::position_cache::PositionCache;
use std::collections::HashMap;
use tracing::debug;

const DEDUP_CAPACITY: usize = 50_000;
const LAUNCHPAD_MINT_CAPACITY: usize = 10_000;
const LAUNCHPAD_MINT_MAX_AGE_MS: u64 = 2 * 60 * 60 * 1000;
const VAULT_MAP_CAPACITY: usize = 10_000;
const VAULT_MAP_EVICT_ON_OVERFLOW: usize = 1_000;
const PENDING_CURVE_MAX_AGE_MS: u64 = 30_000;

#[derive(Clone, Copy, Debug)]
pub enum VaultSide {
    Base,
    Quote,
}

#[derive(Clone, Debug)]
struct VaultEntry {
    pool: PoolAddress,
    side: VaultSide,
    quote_is_sol: bool,
    quote_is_stable: bool,
}

#[derive(Clone, Debug, Default)]
struct PoolReserves {
    base: Option<u64>,
    quote: Option<u64>,
}

struct PendingCurve {
    snapshot: PoolSnapshot,
    queued_at_ms: u64,
}

pub struct PoolTracker {
    pumpfun_program: Address,
    seen_keys: Mutex<BoundedSet<(DexKind, MintAddress, Option<MintAddress>)>>,
    launchpad_mints: Mutex<AgeBoundedMap<MintAddress, u64>>,
    bonding_curve_to_mint: Mutex<HashMap<PoolAddress, MintAddress>>,
    pending_curves: Mutex<HashMap<PoolAddress, PendingCurve>>,
    vault_map: Mutex<AgeBoundedMap<VaultAddress, VaultEntry>>,
    pool_reserves: Mutex<HashMap<PoolAddress, PoolReserves>>,
    pub positions: PositionCache,
}

impl PoolTracker {
    pub fn new(pumpfun_program: Address) -> Self {
        Self {
            pumpfun_program,
            seen_keys: Mutex::new(BoundedSet::new(DEDUP_CAPACITY)),
            launchpad_mints: Mutex::new(AgeBoundedMap::new(LAUNCHPAD_MINT_CAPACITY)),
            bonding_curve_to_mint: Mutex::new(HashMap::new()),
            pending_curves: Mutex::new(HashMap::new()),
            vault_map: Mutex::new(AgeBoundedMap::new(VAULT_MAP_CAPACITY)),
            pool_reserves: Mutex::new(HashMap::new()),
            positions: PositionCache::new(),
        }
    }

    /// Bonding-curve PDA for `mint` under the launchpad program (spec §4.A:
    /// "the mint is derived separately as the `[\"bonding-curve\", mint]`
    /// PDA under the launchpad program").
    pub fn bonding_curve_pda(&self, mint: &MintAddress) -> Address {
        let mint_pk = solana_program::pubkey::Pubkey::new_from_array(mint.0);
        let program_pk = solana_program::pubkey::Pubkey::new_from_array(self.pumpfun_program.0);
        let (pda, _bump) =
            solana_program::pubkey::Pubkey::find_program_address(&[b"bonding-curve", mint_pk.as_ref()], &program_pk);
        Address(pda.to_bytes())
    }

    fn check_dedup(&self, dex: DexKind, base_mint: MintAddress, quote_mint: Option<MintAddress>) -> bool {
        self.seen_keys.lock().insert((dex, base_mint, quote_mint))
    }

    /// A non-launchpad (AMM) account decoded (spec §4.F). Returns `None` for
    /// a duplicate `(dex, baseMint, quoteMint)` key; otherwise a `NewPool` or
    /// (if this mint graduated from the launchpad) a `Graduation` event.
    pub fn on_amm_snapshot(&self, snapshot: PoolSnapshot, now_ms: u64) -> Option<PoolEvent> {
        let base_mint = snapshot.base_mint?;
        if !self.check_dedup(snapshot.dex, base_mint, snapshot.quote_mint) {
            debug!(pool = %snapshot.pool_address, "duplicate pool key, dropping");
            return None;
        }

        if let Some(&first_seen) = self.launchpad_mints.lock().get(&base_mint) {
            let duration_ms = now_ms.saturating_sub(first_seen);
            return Some(PoolEvent {
                kind: PoolEventKind::Graduation,
                pool_snapshot: snapshot,
                token_name: None,
                token_symbol: None,
                graduated_from: Some(DexKind::PumpFun),
                bonding_curve_duration_ms: Some(duration_ms),
            });
        }

        Some(PoolEvent {
            kind: PoolEventKind::NewPool,
            pool_snapshot: snapshot,
            token_name: None,
            token_symbol: None,
            graduated_from: None,
            bonding_curve_duration_ms: None,
        })
    }

    /// A pump-fun bonding-curve account decoded. The layout never carries
    /// the mint (spec §4.A), so this either completes immediately (mint
    /// already registered) or buffers until it is (spec §5: "strict
    /// happens-before... otherwise it is buffered").
    pub fn on_pumpfun_snapshot(&self, snapshot: PoolSnapshot, now_ms: u64) -> Option<PoolEvent> {
        let bonding_curve = snapshot.pool_address;
        if let Some(&mint) = self.bonding_curve_to_mint.lock().get(&bonding_curve) {
            return self.complete_pumpfun_event(snapshot, mint, now_ms);
        }
        self.pending_curves
            .lock()
            .insert(bonding_curve, PendingCurve { snapshot, queued_at_ms: now_ms });
        None
    }

    fn complete_pumpfun_event(&self, mut snapshot: PoolSnapshot, mint: MintAddress, now_ms: u64) -> Option<PoolEvent> {
        snapshot.base_mint = Some(mint);
        if !self.check_dedup(snapshot.dex, mint, snapshot.quote_mint) {
            return None;
        }
        self.launchpad_mints.lock().insert_if_absent(mint, now_ms, LAUNCHPAD_MINT_MAX_AGE_MS, now_ms);
        Some(PoolEvent {
            kind: PoolEventKind::NewPool,
            pool_snapshot: snapshot,
            token_name: None,
            token_symbol: None,
            graduated_from: None,
            bonding_curve_duration_ms: None,
        })
    }

    /// A Token-2022 mint account update arrived (spec §4.F "Launchpad mint
    /// registration"). Registers the bonding-curve -> mint mapping and
    /// completes any bonding-curve account that was buffered before its
    /// mint was known, discarding anything buffered more than 30 seconds
    /// ago (spec §5).
    pub fn on_mint_observed(&self, mint: MintAddress, now_ms: u64) -> Vec<PoolEvent> {
        let bonding_curve = self.bonding_curve_pda(&mint);
        self.bonding_curve_to_mint.lock().insert(bonding_curve, mint);

        let pending = self.pending_curves.lock().remove(&bonding_curve);
        let Some(pending) = pending else { return Vec::new() };
        if now_ms.saturating_sub(pending.queued_at_ms) > PENDING_CURVE_MAX_AGE_MS {
            return Vec::new();
        }
        self.complete_pumpfun_event(pending.snapshot, mint, now_ms).into_iter().collect()
    }

    /// Drops any bonding-curve account still buffered more than 30 seconds
    /// after it was first observed (spec §5). Call this periodically.
    pub fn prune_pending_curves(&self, now_ms: u64) {
        self.pending_curves
            .lock()
            .retain(|_, p| now_ms.saturating_sub(p.queued_at_ms) <= PENDING_CURVE_MAX_AGE_MS);
    }

    /// Registers both vaults of a newly discovered AMM pool and returns the
    /// selector the caller should hand to the Subscription Manager (spec
    /// §4.F "Vault subscription").
    pub fn register_vaults(
        &self,
        pool: PoolAddress,
        base_vault: VaultAddress,
        quote_vault: VaultAddress,
        quote_is_sol: bool,
        quote_is_stable: bool,
        now_ms: u64,
    ) -> Selector {
        let mut map = self.vault_map.lock();
        map.insert_capped(
            base_vault,
            VaultEntry { pool, side: VaultSide::Base, quote_is_sol, quote_is_stable },
            now_ms,
            VAULT_MAP_EVICT_ON_OVERFLOW,
        );
        map.insert_capped(
            quote_vault,
            VaultEntry { pool, side: VaultSide::Quote, quote_is_sol, quote_is_stable },
            now_ms,
            VAULT_MAP_EVICT_ON_OVERFLOW,
        );
        Selector { owners: vec![crate::subscription::spl_token_program_id()], accounts: vec![base_vault, quote_vault] }
    }

    /// An SPL-token vault account update (spec §4.F "Vault update
    /// handling"): `amount` lives at byte offset 64. Recomputes the pool's
    /// `liquiditySol` with the same rules as the decoder (spec §4.A) and
    /// returns the pool address plus the new liquidity, if the vault is one
    /// we're tracking.
    pub fn on_vault_update(&self, vault: VaultAddress, data: &[u8]) -> Option<(PoolAddress, f64)> {
        let amount = data.get(64..72).map(|s| u64::from_le_bytes(s.try_into().unwrap()))?;
        let entry = self.vault_map.lock().get(&vault).cloned()?;

        let mut reserves = self.pool_reserves.lock();
        let slot = reserves.entry(entry.pool).or_default();
        match entry.side {
            VaultSide::Base => slot.base = Some(amount),
            VaultSide::Quote => slot.quote = Some(amount),
        }
        let base = slot.base.unwrap_or(0);
        let quote = slot.quote.unwrap_or(0);
        drop(reserves);

        let liquidity = amm_liquidity_sol(entry.quote_is_sol, entry.quote_is_stable, quote, base, quote);
        Some((entry.pool, liquidity))
    }

    /// `addPositionTracking` (spec §4.F).
    pub fn add_position_tracking(&self, pool: PoolAddress, token: Address, dex: DexKind) -> Selector {
        self.positions.add_position(pool, token, dex);
        Selector { owners: Vec::new(), accounts: vec![pool] }
    }

    /// `removePositionTracking` (spec §4.F): no explicit upstream
    /// unsubscribe is required.
    pub fn remove_position_tracking(&self, pool: &PoolAddress) {
        self.positions.remove_position(pool);
    }

    /// The decoder has been re-invoked for a tracked pool's own account
    /// update; emits a `PriceUpdate` iff the move clears the 0.1% gate
    /// (spec §4.F, testable property 5).
    pub fn on_position_snapshot(&self, snapshot: PoolSnapshot) -> Option<PoolEvent> {
        let price = snapshot.enriched.price_sol_per_token?;
        let pool = snapshot.pool_address;
        if !self.positions.is_tracked(&pool) {
            return None;
        }
        if self.positions.record_price_if_moved(&pool, price) {
            Some(PoolEvent {
                kind: PoolEventKind::PriceUpdate,
                pool_snapshot: snapshot,
                token_name: None,
                token_symbol: None,
                graduated_from: None,
                bonding_curve_duration_ms: None,
            })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pool_codec::EnrichedData;

    fn pumpfun_program() -> Address {
        DexKind::PumpFun.program_id()
    }

    fn base_snapshot(dex: DexKind, pool: Address, base: Address, quote: Address) -> PoolSnapshot {
        PoolSnapshot {
            dex,
            pool_address: pool,
            base_mint: Some(base),
            quote_mint: Some(quote),
            slot: 1,
            observed_at_ms: 0,
            enriched: EnrichedData::default(),
        }
    }

    #[test]
    fn duplicate_new_pool_key_is_dropped() {
        let tracker = PoolTracker::new(pumpfun_program());
        let pool = Address([1; 32]);
        let base = Address([2; 32]);
        let quote = Address([3; 32]);
        let first = tracker.on_amm_snapshot(base_snapshot(DexKind::RaydiumCpmm, pool, base, quote), 0);
        assert!(first.is_some());
        let second = tracker.on_amm_snapshot(base_snapshot(DexKind::RaydiumCpmm, pool, base, quote), 1);
        assert!(second.is_none());
    }

    #[test]
    fn graduation_requires_prior_launchpad_sighting() {
        let tracker = PoolTracker::new(pumpfun_program());
        let mint = Address([9; 32]);
        let sol = Address([4; 32]);

        // Register the launchpad mint via a completed pump-fun event.
        tracker.bonding_curve_to_mint.lock().insert(Address([5; 32]), mint);
        let pumpfun_snapshot = base_snapshot(DexKind::PumpFun, Address([5; 32]), mint, sol);
        let event = tracker.on_pumpfun_snapshot(pumpfun_snapshot, 0).unwrap();
        assert_eq!(event.kind, PoolEventKind::NewPool);

        // 37 minutes later, an AMM pool for the same mint graduates.
        let amm_pool = Address([6; 32]);
        let amm_snapshot = base_snapshot(DexKind::RaydiumAmmV4, amm_pool, mint, sol);
        let graduation = tracker.on_amm_snapshot(amm_snapshot, 37 * 60 * 1000).unwrap();
        assert_eq!(graduation.kind, PoolEventKind::Graduation);
        assert_eq!(graduation.bonding_curve_duration_ms, Some(37 * 60 * 1000));
    }

    #[test]
    fn pumpfun_snapshot_buffers_until_mint_registered() {
        let tracker = PoolTracker::new(pumpfun_program());
        let mint = Address([7; 32]);
        let curve = tracker.bonding_curve_pda(&mint);
        let snapshot = base_snapshot(DexKind::PumpFun, curve, Address([0; 32]), Address([0; 32]));

        assert!(tracker.on_pumpfun_snapshot(snapshot, 0).is_none());
        let events = tracker.on_mint_observed(mint, 1_000);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pool_snapshot.base_mint, Some(mint));
    }

    #[test]
    fn pending_curve_older_than_30s_is_discarded() {
        let tracker = PoolTracker::new(pumpfun_program());
        let mint = Address([8; 32]);
        let curve = tracker.bonding_curve_pda(&mint);
        let snapshot = base_snapshot(DexKind::PumpFun, curve, Address([0; 32]), Address([0; 32]));
        tracker.on_pumpfun_snapshot(snapshot, 0);
        let events = tracker.on_mint_observed(mint, 31_000);
        assert!(events.is_empty());
    }

    #[test]
    fn vault_update_recomputes_liquidity() {
        let tracker = PoolTracker::new(pumpfun_program());
        let pool = Address([1; 32]);
        let base_vault = Address([2; 32]);
        let quote_vault = Address([3; 32]);
        tracker.register_vaults(pool, base_vault, quote_vault, true, false, 0);

        let mut data = vec![0u8; 72];
        data[64..72].copy_from_slice(&5_000_000_000u64.to_le_bytes());
        let (p, liquidity) = tracker.on_vault_update(quote_vault, &data).unwrap();
        assert_eq!(p, pool);
        assert_eq!(liquidity, 5.0);
    }
}
