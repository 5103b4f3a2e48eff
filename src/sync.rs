//! Chain replication for MeshLedger
//!
//! Two independent drivers keep a node converging on the reference node:
//! - the broadcast listener applies `BLOCK` and `TRANSACTION` messages, and
//!   falls back to a full-chain fetch when a block does not extend the tip;
//! - the poller fetches the reference chain on a fixed interval regardless
//!   of broadcast activity.
//!
//! Both funnel mutation through [`SharedLedger`]. Network fetches happen
//! before the ledger lock is taken. Every failure is logged and the driver
//! waits for its next trigger; nothing is retried in between.

use crate::blockchain::{Block, ChainReplacement};
use crate::error::ChainError;
use crate::ledger::SharedLedger;
use crate::pubsub::{BusMessage, Channel};
use crate::shutdown::ShutdownSignal;
use crate::transaction::Transaction;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Path of the full-chain endpoint on every node.
pub const BLOCKCHAIN_PATH: &str = "/api/blockchain";

/// Default timeout for a chain fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default connection timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client for the reference node's `/api/blockchain` endpoint.
#[derive(Debug, Clone)]
pub struct ChainClient {
    http_client: reqwest::Client,
    url: String,
}

impl ChainClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ChainError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT.min(timeout))
            .build()
            .map_err(|e| ChainError::NetworkError(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http_client,
            url: format!("{}{}", base_url.trim_end_matches('/'), BLOCKCHAIN_PATH),
        })
    }

    pub fn for_host(host: &str, port: u16, timeout: Duration) -> Result<Self, ChainError> {
        Self::new(&format!("http://{}:{}", host, port), timeout)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// `GET /api/blockchain`, decoded into blocks.
    pub async fn fetch_chain(&self) -> Result<Vec<Block>, ChainError> {
        let response = self.http_client.get(&self.url).send().await?;

        if !response.status().is_success() {
            return Err(ChainError::NetworkError(format!(
                "{} returned HTTP {}",
                self.url,
                response.status()
            )));
        }

        Ok(response.json::<Vec<Block>>().await?)
    }
}

/// Sync state tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncState {
    Idle,
    Syncing,
    Synced,
    Failed,
}

/// What a single reconciliation attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Replaced { length: usize },
    AlreadyCurrent { local_length: usize, remote_length: usize },
    Rejected(ChainError),
    FetchFailed(ChainError),
}

/// Replication counters, served by `/api/sync/status`.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStats {
    pub state: SyncState,
    pub polls: u64,
    pub blocks_received: u64,
    pub transactions_received: u64,
    pub replacements: u64,
    pub already_current: u64,
    pub rejected: u64,
    pub fetch_failures: u64,
    pub last_error: Option<String>,
}

impl Default for SyncStats {
    fn default() -> Self {
        Self {
            state: SyncState::Idle,
            polls: 0,
            blocks_received: 0,
            transactions_received: 0,
            replacements: 0,
            already_current: 0,
            rejected: 0,
            fetch_failures: 0,
            last_error: None,
        }
    }
}

impl SyncStats {
    fn record(&mut self, outcome: &SyncOutcome) {
        match outcome {
            SyncOutcome::Replaced { .. } => {
                self.replacements += 1;
                self.state = SyncState::Synced;
            }
            SyncOutcome::AlreadyCurrent { .. } => {
                self.already_current += 1;
                self.state = SyncState::Synced;
            }
            SyncOutcome::Rejected(e) => {
                self.rejected += 1;
                self.state = SyncState::Failed;
                self.last_error = Some(e.to_string());
            }
            SyncOutcome::FetchFailed(e) => {
                self.fetch_failures += 1;
                self.state = SyncState::Failed;
                self.last_error = Some(e.to_string());
            }
        }
    }
}

/// Listener and poller state shared by both replication drivers.
pub struct Replicator {
    ledger: SharedLedger,
    client: ChainClient,
    node_id: String,
    stats: Arc<RwLock<SyncStats>>,
}

impl Replicator {
    pub fn new(ledger: SharedLedger, client: ChainClient, node_id: impl Into<String>) -> Self {
        Self {
            ledger,
            client,
            node_id: node_id.into(),
            stats: Arc::new(RwLock::new(SyncStats::default())),
        }
    }

    pub async fn stats(&self) -> SyncStats {
        self.stats.read().await.clone()
    }

    /// Fetches the reference chain and offers it to the ledger.
    pub async fn reconcile(&self) -> SyncOutcome {
        self.stats.write().await.state = SyncState::Syncing;

        let outcome = match self.client.fetch_chain().await {
            Err(e) => SyncOutcome::FetchFailed(e),
            Ok(remote) => {
                let remote_length = remote.len();
                match self.ledger.replace_chain(remote).await {
                    ChainReplacement::Replaced { .. } => SyncOutcome::Replaced {
                        length: remote_length,
                    },
                    ChainReplacement::AlreadyCurrent { local_length, .. } => {
                        SyncOutcome::AlreadyCurrent {
                            local_length,
                            remote_length,
                        }
                    }
                    ChainReplacement::Invalid(e) => SyncOutcome::Rejected(e),
                }
            }
        };

        match &outcome {
            SyncOutcome::Replaced { length } => {
                info!(url = %self.client.url(), length, "sync.replaced")
            }
            SyncOutcome::AlreadyCurrent {
                local_length,
                remote_length,
            } => debug!(local_length, remote_length, "sync.already_current"),
            SyncOutcome::Rejected(e) => warn!(url = %self.client.url(), error = %e, "sync.rejected"),
            SyncOutcome::FetchFailed(e) => {
                warn!(url = %self.client.url(), error = %e, "sync.fetch_failed")
            }
        }

        self.stats.write().await.record(&outcome);
        outcome
    }

    /// Applies one broadcast message. Messages from this node are ignored.
    pub async fn handle_message(&self, message: BusMessage) {
        if message.origin == self.node_id {
            return;
        }
        debug!(channel = %message.channel, origin = %message.origin, "sync.message");

        match message.channel {
            Channel::Block => self.handle_block(message.payload).await,
            Channel::Transaction => self.handle_transaction(message.payload).await,
        }
    }

    async fn handle_block(&self, payload: serde_json::Value) {
        self.stats.write().await.blocks_received += 1;

        let block: Block = match serde_json::from_value(payload) {
            Ok(block) => block,
            Err(e) => {
                warn!(error = %e, "sync.bad_block_payload");
                return;
            }
        };

        let mut candidate = self.ledger.snapshot().await.as_ref().clone();
        candidate.push(block);

        match self.ledger.replace_chain(candidate).await {
            ChainReplacement::Replaced { .. } => {
                let length = self.ledger.chain_len().await;
                info!(length, "sync.block_applied");
                self.stats
                    .write()
                    .await
                    .record(&SyncOutcome::Replaced { length });
            }
            other => {
                debug!(outcome = ?other, "sync.block_not_applicable");
                self.reconcile().await;
            }
        }
    }

    async fn handle_transaction(&self, payload: serde_json::Value) {
        self.stats.write().await.transactions_received += 1;

        let tx: Transaction = match serde_json::from_value(payload) {
            Ok(tx) => tx,
            Err(e) => {
                warn!(error = %e, "sync.bad_transaction_payload");
                return;
            }
        };

        let id = tx.id.clone();
        match self.ledger.set_transaction(tx).await {
            Ok(()) => debug!(id = %id, "sync.transaction_pooled"),
            Err(e) => warn!(id = %id, error = %e, "sync.transaction_rejected"),
        }
    }

    /// Runs the broadcast listener until unsubscribed, shut down, or the bus closes.
    pub fn spawn_listener(
        self: &Arc<Self>,
        mut rx: broadcast::Receiver<BusMessage>,
        mut shutdown: ShutdownSignal,
    ) -> ListenerHandle {
        let replicator = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    received = rx.recv() => match received {
                        Ok(message) => tokio::select! {
                            _ = shutdown.recv() => break,
                            _ = replicator.handle_message(message) => {}
                        },
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(missed = n, "sync.listener_lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("sync.bus_closed");
                            break;
                        }
                    },
                }
            }
            info!("sync.listener_stopped");
        });
        ListenerHandle { task: Some(task) }
    }

    /// Polls the reference node every `interval` until shutdown. Shutdown
    /// cuts short both an in-flight fetch and the wait between polls.
    pub async fn run_poller(self: Arc<Self>, interval: Duration, mut shutdown: ShutdownSignal) {
        info!(url = %self.client.url(), interval_secs = interval.as_secs(), "sync.poller_started");

        while !shutdown.is_shutdown() {
            self.stats.write().await.polls += 1;
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = self.reconcile() => {}
            }

            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!("sync.poller_stopped");
    }

    pub fn spawn_poller(self: &Arc<Self>, interval: Duration, shutdown: ShutdownSignal) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run_poller(interval, shutdown))
    }
}

/// Handle to a running listener task.
#[derive(Debug, Default)]
pub struct ListenerHandle {
    task: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    pub fn is_subscribed(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stops delivery. Safe to call repeatedly or with no active subscription.
    pub fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Blockchain;
    use crate::pubsub::{LocalBus, MessageBus};
    use crate::shutdown::ShutdownController;
    use crate::wallet::Wallet;

    // Nothing listens on port 9 (discard) on loopback, so fetches fail fast.
    fn unreachable_client() -> ChainClient {
        ChainClient::for_host("127.0.0.1", 9, Duration::from_millis(500)).unwrap()
    }

    // Accepts connections and never answers, so a fetch hangs until its timeout.
    async fn silent_client(timeout: Duration) -> (ChainClient, JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        let client = ChainClient::new(&format!("http://{}", addr), timeout).unwrap();
        (client, server)
    }

    fn block_message(block: &Block, origin: &str) -> BusMessage {
        BusMessage {
            channel: Channel::Block,
            origin: origin.to_string(),
            payload: serde_json::to_value(block).unwrap(),
        }
    }

    #[test]
    fn test_client_url() {
        let client = ChainClient::new("http://localhost:5050/", DEFAULT_FETCH_TIMEOUT).unwrap();
        assert_eq!(client.url(), "http://localhost:5050/api/blockchain");

        let client = ChainClient::for_host("10.0.0.7", 3000, Duration::from_secs(1)).unwrap();
        assert_eq!(client.url(), "http://10.0.0.7:3000/api/blockchain");
    }

    #[tokio::test]
    async fn test_block_extending_tip_is_applied() {
        tokio::time::timeout(Duration::from_secs(10), async {
            let ledger = SharedLedger::new();
            let replicator = Replicator::new(ledger.clone(), unreachable_client(), "node-b");

            let tx = Transaction::new(&Wallet::new(), 1000, "r", 1).unwrap();
            ledger.set_transaction(tx.clone()).await.unwrap();

            let block = Block::mine(&Block::genesis(), vec![tx]);
            replicator.handle_message(block_message(&block, "node-a")).await;

            let chain = ledger.snapshot().await;
            assert_eq!(chain.as_slice(), &[Block::genesis(), block]);
            assert!(ledger.pending_transactions().await.is_empty());
            assert_eq!(replicator.stats().await.replacements, 1);
        })
        .await
        .expect("test_block_extending_tip_is_applied timed out");
    }

    #[tokio::test]
    async fn test_unlinkable_block_falls_back_and_survives() {
        tokio::time::timeout(Duration::from_secs(10), async {
            let ledger = SharedLedger::new();
            let replicator = Replicator::new(ledger.clone(), unreachable_client(), "node-b");

            let mut remote = Blockchain::new();
            remote.add_block(Vec::new());
            remote.add_block(Vec::new());
            let orphan = remote.tip().clone();

            replicator.handle_message(block_message(&orphan, "node-a")).await;

            assert_eq!(ledger.chain_len().await, 1);
            let stats = replicator.stats().await;
            assert_eq!(stats.fetch_failures, 1);
            assert_eq!(stats.state, SyncState::Failed);
        })
        .await
        .expect("test_unlinkable_block_falls_back_and_survives timed out");
    }

    #[tokio::test]
    async fn test_own_messages_are_ignored() {
        let ledger = SharedLedger::new();
        let replicator = Replicator::new(ledger.clone(), unreachable_client(), "node-a");
        let block = Block::mine(&Block::genesis(), Vec::new());

        replicator.handle_message(block_message(&block, "node-a")).await;

        assert_eq!(ledger.chain_len().await, 1);
        assert_eq!(replicator.stats().await.blocks_received, 0);
    }

    #[tokio::test]
    async fn test_transaction_message_is_verified_before_pooling() {
        let ledger = SharedLedger::new();
        let replicator = Replicator::new(ledger.clone(), unreachable_client(), "node-b");
        let sender = Wallet::new();

        let good = Transaction::new(&sender, 1000, "r", 10).unwrap();
        let mut forged = Transaction::new(&Wallet::new(), 1000, "r", 10).unwrap();
        forged.output.insert("r".to_string(), 999);

        for tx in [&good, &forged] {
            replicator
                .handle_message(BusMessage {
                    channel: Channel::Transaction,
                    origin: "node-a".to_string(),
                    payload: serde_json::to_value(tx).unwrap(),
                })
                .await;
        }

        assert_eq!(ledger.pending_transactions().await, vec![good]);
        assert_eq!(replicator.stats().await.transactions_received, 2);
    }

    #[tokio::test]
    async fn test_late_transaction_after_its_block_is_not_repooled() {
        let ledger = SharedLedger::new();
        let replicator = Replicator::new(ledger.clone(), unreachable_client(), "node-b");

        let tx = Transaction::new(&Wallet::new(), 1000, "r", 10).unwrap();
        let block = Block::mine(&Block::genesis(), vec![tx.clone()]);

        // The block overtakes the transaction broadcast.
        replicator.handle_message(block_message(&block, "node-a")).await;
        replicator
            .handle_message(BusMessage {
                channel: Channel::Transaction,
                origin: "node-a".to_string(),
                payload: serde_json::to_value(&tx).unwrap(),
            })
            .await;

        assert!(ledger.pending_transactions().await.is_empty());
        let (_, data) = ledger.mining_template().await;
        assert!(data.iter().all(|pending| pending.id != tx.id));
        assert_eq!(replicator.stats().await.transactions_received, 1);
    }

    #[tokio::test]
    async fn test_garbage_payload_is_ignored() {
        let ledger = SharedLedger::new();
        let replicator = Replicator::new(ledger.clone(), unreachable_client(), "node-b");
        replicator
            .handle_message(BusMessage {
                channel: Channel::Block,
                origin: "node-a".to_string(),
                payload: serde_json::json!({"not": "a block"}),
            })
            .await;
        assert_eq!(ledger.chain_len().await, 1);
    }

    #[tokio::test]
    async fn test_poller_stops_promptly_mid_interval() {
        let replicator = Arc::new(Replicator::new(
            SharedLedger::new(),
            unreachable_client(),
            "node-b",
        ));
        let controller = ShutdownController::new();
        let poller = replicator.spawn_poller(Duration::from_secs(3600), controller.subscribe());

        tokio::time::sleep(Duration::from_millis(50)).await;
        controller.shutdown();

        tokio::time::timeout(Duration::from_secs(2), poller)
            .await
            .expect("poller did not stop within the shutdown window")
            .unwrap();
        assert!(replicator.stats().await.polls >= 1);
    }

    #[tokio::test]
    async fn test_poller_stops_promptly_during_fetch() {
        let (client, server) = silent_client(Duration::from_secs(10)).await;
        let replicator = Arc::new(Replicator::new(SharedLedger::new(), client, "node-b"));
        let controller = ShutdownController::new();
        let poller = replicator.spawn_poller(Duration::from_secs(3600), controller.subscribe());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(replicator.stats().await.state, SyncState::Syncing);
        controller.shutdown();

        tokio::time::timeout(Duration::from_secs(2), poller)
            .await
            .expect("poller did not stop while its fetch was pending")
            .unwrap();
        assert_eq!(replicator.stats().await.fetch_failures, 0);
        server.abort();
    }

    #[tokio::test]
    async fn test_listener_stops_promptly_during_fallback_fetch() {
        let (client, server) = silent_client(Duration::from_secs(10)).await;
        let ledger = SharedLedger::new();
        let replicator = Arc::new(Replicator::new(ledger.clone(), client, "node-b"));
        let bus = LocalBus::default();
        let controller = ShutdownController::new();
        let handle = replicator.spawn_listener(bus.subscribe(), controller.subscribe());

        // Does not extend genesis, so the listener falls back to a fetch.
        let mut remote = Blockchain::new();
        remote.add_block(Vec::new());
        remote.add_block(Vec::new());
        bus.publish(block_message(remote.tip(), "node-a")).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        controller.shutdown();

        tokio::time::timeout(Duration::from_secs(2), async {
            while handle.is_subscribed() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("listener did not stop while its fetch was pending");
        assert_eq!(ledger.chain_len().await, 1);
        server.abort();
    }

    #[tokio::test]
    async fn test_listener_receives_and_unsubscribes() {
        let ledger = SharedLedger::new();
        let replicator = Arc::new(Replicator::new(ledger.clone(), unreachable_client(), "node-b"));
        let bus = LocalBus::default();
        let controller = ShutdownController::new();

        let mut handle = replicator.spawn_listener(bus.subscribe(), controller.subscribe());
        assert!(handle.is_subscribed());

        let block = Block::mine(&Block::genesis(), Vec::new());
        bus.publish(block_message(&block, "node-a")).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while ledger.chain_len().await < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("listener never applied the block");

        handle.unsubscribe();
        handle.unsubscribe();
        assert!(!handle.is_subscribed());
        ListenerHandle::default().unsubscribe();
    }
}
