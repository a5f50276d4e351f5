//! Subscription Manager (spec §4.E): the single long-lived bidirectional
//! gRPC stream, per-program demultiplexing, additive subscriptions,
//! keepalive, and reconnection. Grounded in `market-streaming`'s
//! `PoolStreamClient::start` (gRPC connect, build `SubscribeRequestFilterAccounts`,
//! `subscribe_tx.send`, drain `stream.next()`) from the teacher pack,
//! generalized from a fixed pool/protocol list to the five-DEX + metadata +
//! token-2022 owner set this spec requires.

use futures::{SinkExt, StreamExt};
use pool_codec::{Address, DexKind};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};
use yellowstone_grpc_client::GeyserGrpcClient;
use yellowstone_grpc_proto::prelude::*;

use crate::error::SubscriptionError;

/// The legacy Token Metadata program (Metaplex) — owns the PDA layout in
/// spec §4.B.
const METADATA_PROGRAM_ID: &str = "metaqbxxUerdq28cj1RbAWkYQm3ybzjb6a8bt518x1s";
const SPL_TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
const TOKEN_2022_PROGRAM_ID: &str = "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OwnerKind {
    Pool(DexKind),
    Metadata,
    Token2022,
    SplToken,
}

/// The one static table the demultiplexer consults per incoming update
/// (spec §4.E "Demultiplexing"): owner program id -> what it is.
pub fn owner_kind(owner: &Address) -> Option<OwnerKind> {
    for dex in DexKind::all() {
        if dex.program_id() == *owner {
            return Some(OwnerKind::Pool(dex));
        }
    }
    if Address::from_base58(METADATA_PROGRAM_ID).map(|a| a == *owner).unwrap_or(false) {
        return Some(OwnerKind::Metadata);
    }
    if Address::from_base58(TOKEN_2022_PROGRAM_ID).map(|a| a == *owner).unwrap_or(false) {
        return Some(OwnerKind::Token2022);
    }
    if Address::from_base58(SPL_TOKEN_PROGRAM_ID).map(|a| a == *owner).unwrap_or(false) {
        return Some(OwnerKind::SplToken);
    }
    None
}

#[derive(Clone, Debug)]
pub struct RawAccountUpdate {
    pub pubkey: Address,
    pub owner: Address,
    pub data: Vec<u8>,
    pub slot: u64,
    pub lamports: u64,
}

/// Events the manager hands to `PoolMonitor`'s run loop — the Rust-idiomatic
/// shape of spec §4.E's callback registration (`onPoolEvent`, `onError`,
/// `onConnect`, `onDisconnect`): a single ordered channel instead of
/// out-of-band callback invocations, consumed by one `tokio::select!` loop
/// (spec §5: "a multithreaded runtime with queues").
#[derive(Clone, Debug)]
pub enum ManagerEvent {
    Account(RawAccountUpdate),
    Connected,
    Disconnected,
    Error(String),
}

enum Command {
    AddSelector { key: String, owners: Vec<Address>, accounts: Vec<Address> },
    Stop,
}

/// A named additive subscription request (spec §4.E: `vault_<first8ofPool>`,
/// `position_<first8ofPool>`).
pub struct Selector {
    pub owners: Vec<Address>,
    pub accounts: Vec<Address>,
}

pub struct SubscriptionManager {
    endpoint: String,
    token: Option<String>,
    initial_owners: Vec<Address>,
    commands_tx: mpsc::UnboundedSender<Command>,
    commands_rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    events_tx: mpsc::UnboundedSender<ManagerEvent>,
    running: Arc<AtomicBool>,
    next_ping_id: AtomicI64,
}

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Max decoded message size for the subscription channel (spec §4.E).
const MAX_DECODING_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

impl SubscriptionManager {
    /// `initial_owners` is the owner-filter set built once at construction:
    /// the five DEX programs plus the metadata and token-2022 programs
    /// (spec §4.E "Initial subscription").
    pub fn new(
        endpoint: String,
        token: Option<String>,
        initial_owners: Vec<Address>,
        events_tx: mpsc::UnboundedSender<ManagerEvent>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        Self {
            endpoint,
            token,
            initial_owners,
            commands_tx,
            commands_rx: Mutex::new(Some(commands_rx)),
            events_tx,
            running: Arc::new(AtomicBool::new(false)),
            next_ping_id: AtomicI64::new(0),
        }
    }

    /// `subscribeAdditional` (spec §4.E): queue a named selector to be
    /// folded into the live subscription request. A no-op once `stop()` has
    /// been called.
    pub fn subscribe_additional(&self, key: impl Into<String>, owners: Vec<Address>, accounts: Vec<Address>) {
        let _ = self.commands_tx.send(Command::AddSelector { key: key.into(), owners, accounts });
    }

    /// `stop()` (spec §5 cancellation): sets the running flag false. Any
    /// in-flight handler completes; the reconnect loop observes the flag and
    /// exits instead of reconnecting.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.commands_tx.send(Command::Stop);
    }

    fn build_request(&self, selectors: &HashMap<String, Selector>) -> SubscribeRequest {
        let mut accounts = HashMap::new();
        accounts.insert(
            "initial".to_string(),
            SubscribeRequestFilterAccounts {
                owner: self.initial_owners.iter().map(|a| a.to_base58()).collect(),
                ..Default::default()
            },
        );
        for (key, sel) in selectors {
            accounts.insert(
                key.clone(),
                SubscribeRequestFilterAccounts {
                    owner: sel.owners.iter().map(|a| a.to_base58()).collect(),
                    account: sel.accounts.iter().map(|a| a.to_base58()).collect(),
                    ..Default::default()
                },
            );
        }
        SubscribeRequest {
            accounts,
            commitment: Some(CommitmentLevel::Confirmed as i32),
            ..Default::default()
        }
    }

    /// `start()` (spec §4.E): connect, issue the initial subscription, and
    /// run the reconnect loop forever (until `stop()`). Returns once the
    /// manager has been stopped — it never returns `Err` on a transient
    /// upstream problem (spec §7: "the stream must never fail the process
    /// once it has started").
    pub async fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        let mut commands_rx = self.commands_rx.lock().await.take().expect("start() called once");
        // Additive selectors are not reissued across a reconnect (spec §4.E);
        // dedup in the Pool Tracker and re-subscription on next observation
        // are adequate, so this map is local to a connection attempt but
        // re-populated by any `AddSelector` commands that arrive meanwhile.
        let mut selectors: HashMap<String, Selector> = HashMap::new();

        while self.running.load(Ordering::SeqCst) {
            match self.run_one_connection(&mut commands_rx, &mut selectors).await {
                Ok(()) => {}
                Err(e) => {
                    warn!(error = %e, "subscription stream ended, reconnecting");
                    let _ = self.events_tx.send(ManagerEvent::Error(e.to_string()));
                }
            }
            let _ = self.events_tx.send(ManagerEvent::Disconnected);
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn run_one_connection(
        &self,
        commands_rx: &mut mpsc::UnboundedReceiver<Command>,
        selectors: &mut HashMap<String, Selector>,
    ) -> Result<(), SubscriptionError> {
        let mut builder = GeyserGrpcClient::build_from_shared(self.endpoint.clone())
            .map_err(|e| SubscriptionError::ClientBuild(e.to_string()))?
            .max_decoding_message_size(MAX_DECODING_MESSAGE_SIZE);
        if let Some(token) = &self.token {
            builder = builder
                .x_token(Some(token.clone()))
                .map_err(|e| SubscriptionError::ClientBuild(e.to_string()))?;
        }
        let mut client = builder
            .connect()
            .await
            .map_err(|e| SubscriptionError::Connect(e.to_string()))?;

        let (mut subscribe_tx, mut stream) = client
            .subscribe()
            .await
            .map_err(|e| SubscriptionError::Connect(e.to_string()))?;
        subscribe_tx
            .send(self.build_request(selectors))
            .await
            .map_err(|e| SubscriptionError::Send(e.to_string()))?;

        info!(endpoint = %self.endpoint, "subscription stream connected");
        let _ = self.events_tx.send(ManagerEvent::Connected);

        let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
        keepalive.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                msg = stream.next() => {
                    match msg {
                        Some(Ok(update)) => {
                            if let Some(update_msg) = update.update_oneof {
                                self.dispatch(update_msg);
                            }
                            // updates with no `account` payload (e.g. pongs) are ignored.
                        }
                        Some(Err(e)) => return Err(SubscriptionError::StreamError(e.to_string())),
                        None => return Err(SubscriptionError::StreamEnded),
                    }
                }
                _ = keepalive.tick() => {
                    let id = self.next_ping_id.fetch_add(1, Ordering::SeqCst);
                    let ping = SubscribeRequest { ping: Some(SubscribeRequestPing { id: id as i32 }), ..Default::default() };
                    if let Err(e) = subscribe_tx.send(ping).await {
                        return Err(SubscriptionError::Send(e.to_string()));
                    }
                }
                cmd = commands_rx.recv() => {
                    match cmd {
                        Some(Command::AddSelector { key, owners, accounts }) => {
                            selectors.insert(key, Selector { owners, accounts });
                            if let Err(e) = subscribe_tx.send(self.build_request(selectors)).await {
                                return Err(SubscriptionError::Send(e.to_string()));
                            }
                        }
                        Some(Command::Stop) | None => return Ok(()),
                    }
                }
            }
            if !self.running.load(Ordering::SeqCst) {
                return Ok(());
            }
        }
    }

    fn dispatch(&self, update: subscribe_update::UpdateOneof) {
        if let subscribe_update::UpdateOneof::Account(account_update) = update {
            let Some(info) = account_update.account else { return };
            let (Some(pubkey), Some(owner)) =
                (Address::from_bytes(&info.pubkey), Address::from_bytes(&info.owner))
            else {
                return;
            };
            let update = RawAccountUpdate {
                pubkey,
                owner,
                data: info.data,
                slot: account_update.slot,
                lamports: info.lamports,
            };
            let _ = self.events_tx.send(ManagerEvent::Account(update));
        }
        // Pong and other variants require no action (spec §4.E).
    }
}

/// Derives the `vault_<first8ofPool>` / `position_<first8ofPool>` selector
/// key (spec §4.E, §4.F).
pub fn selector_key(prefix: &str, pool: &Address) -> String {
    format!("{prefix}_{}", &pool.to_base58()[..8.min(pool.to_base58().len())])
}

/// The SPL Token program id, used by the Pool Tracker to build the vault
/// selector's owner filter (spec §4.F "Vault subscription").
pub fn spl_token_program_id() -> Address {
    Address::from_base58(SPL_TOKEN_PROGRAM_ID).expect("static program id is valid base58")
}

/// The legacy Metaplex Token Metadata program id (spec §4.E "Initial
/// subscription").
pub fn metadata_program_id() -> Address {
    Address::from_base58(METADATA_PROGRAM_ID).expect("static program id is valid base58")
}

/// The Token-2022 program id (spec §4.E "Initial subscription").
pub fn token2022_program_id() -> Address {
    Address::from_base58(TOKEN_2022_PROGRAM_ID).expect("static program id is valid base58")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_kind_maps_each_dex_program_id() {
        for dex in DexKind::all() {
            assert_eq!(owner_kind(&dex.program_id()), Some(OwnerKind::Pool(dex)));
        }
    }

    #[test]
    fn unknown_owner_is_none() {
        assert_eq!(owner_kind(&Address([0xAB; 32])), None);
    }

    #[test]
    fn selector_key_uses_first_eight_base58_chars() {
        let pool = DexKind::PumpFun.program_id();
        let key = selector_key("vault", &pool);
        assert!(key.starts_with("vault_"));
        assert_eq!(key.len(), "vault_".len() + 8);
    }
}
