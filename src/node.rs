//! Node orchestration: one wallet, one ledger, one bus identity
//!
//! Startup order is fixed: subscribe to the bus, sync with the reference
//! node (peers only), seed demo data if asked, start the poller, then serve
//! the API. Shutdown reverses it.

use crate::api;
use crate::blockchain::Block;
use crate::config::Config;
use crate::error::ChainError;
use crate::ledger::SharedLedger;
use crate::pubsub::{MessageBus, PubSub};
use crate::shutdown::ShutdownController;
use crate::sync::{ChainClient, ListenerHandle, Replicator, SyncOutcome};
use crate::transaction::Transaction;
use crate::wallet::Wallet;
use rand::Rng;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Times a freshly mined block may lose the race for the tip before
/// `mine_next_block` gives up.
const MAX_MINING_ATTEMPTS: usize = 8;

/// How long shutdown waits for each background task.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeState {
    Booting,
    Syncing,
    Ready,
    /// Serving, but the startup sync with the reference node failed.
    Degraded,
}

pub struct Node {
    config: Config,
    ledger: SharedLedger,
    wallet: Wallet,
    pubsub: PubSub,
    replicator: Arc<Replicator>,
    state: RwLock<NodeState>,
    shutdown: ShutdownController,
    listener: Mutex<ListenerHandle>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    pub fn new(config: Config, bus: Arc<dyn MessageBus>) -> Result<Self, ChainError> {
        let node_id = config
            .node
            .node_id
            .clone()
            .unwrap_or_else(|| format!("node-{}", hex::encode(rand::random::<[u8; 4]>())));

        let ledger = SharedLedger::new();
        let client = ChainClient::new(&config.root_url(), config.fetch_timeout())?;
        let replicator = Arc::new(Replicator::new(ledger.clone(), client, node_id.clone()));

        Ok(Self {
            pubsub: PubSub::new(bus, node_id),
            ledger,
            wallet: Wallet::new(),
            replicator,
            state: RwLock::new(NodeState::Booting),
            shutdown: ShutdownController::new(),
            listener: Mutex::new(ListenerHandle::default()),
            tasks: Mutex::new(Vec::new()),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    pub fn node_id(&self) -> &str {
        self.pubsub.node_id()
    }

    pub fn replicator(&self) -> &Arc<Replicator> {
        &self.replicator
    }

    pub fn shutdown_controller(&self) -> &ShutdownController {
        &self.shutdown
    }

    pub async fn state(&self) -> NodeState {
        *self.state.read().await
    }

    async fn set_state(&self, state: NodeState) {
        *self.state.write().await = state;
    }

    /// Binds the configured API port and starts the node.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr, ChainError> {
        let port = self.config.listen_port();
        let listener = TcpListener::bind(("0.0.0.0", port)).await.map_err(|e| {
            ChainError::NetworkError(format!("API port {} unavailable: {}", port, e))
        })?;
        self.start_with_listener(listener).await
    }

    /// Starts the node serving its API on an already bound listener.
    pub async fn start_with_listener(
        self: &Arc<Self>,
        listener: TcpListener,
    ) -> Result<SocketAddr, ChainError> {
        let addr = listener.local_addr()?;
        self.set_state(NodeState::Syncing).await;

        // Subscribe before the startup sync so nothing broadcast meanwhile is lost.
        *self.listener.lock().await = self
            .replicator
            .spawn_listener(self.pubsub.subscribe(), self.shutdown.subscribe());

        let mut healthy = true;
        if self.config.network.peer {
            healthy = !matches!(
                self.sync_with_root().await,
                SyncOutcome::FetchFailed(_) | SyncOutcome::Rejected(_)
            );
        }

        if self.config.node.seed_data {
            self.seed_data().await?;
        }

        let mut tasks = self.tasks.lock().await;
        if self.config.sync.poll_root {
            tasks.push(
                self.replicator
                    .spawn_poller(self.config.poll_interval(), self.shutdown.subscribe()),
            );
        }

        let router = api::build_api_router(Arc::clone(self));
        let mut signal = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { signal.recv().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "node.api_failed");
            }
        }));
        drop(tasks);

        let state = if healthy {
            NodeState::Ready
        } else {
            NodeState::Degraded
        };
        self.set_state(state).await;
        info!(
            node_id = %self.node_id(),
            %addr,
            peer = self.config.network.peer,
            poll_root = self.config.sync.poll_root,
            address = %self.wallet.address(),
            "node.started"
        );
        Ok(addr)
    }

    /// One full-chain fetch from the reference node.
    pub async fn sync_with_root(&self) -> SyncOutcome {
        let outcome = self.replicator.reconcile().await;
        match &outcome {
            SyncOutcome::Replaced { length } => {
                info!(length, "node.synchronized_with_root")
            }
            SyncOutcome::AlreadyCurrent { .. } => info!("node.chain_already_current"),
            SyncOutcome::Rejected(e) | SyncOutcome::FetchFailed(e) => {
                warn!(error = %e, "node.sync_with_root_failed")
            }
        }
        outcome
    }

    /// Mines the pending pool plus a reward to this node's wallet, appends
    /// the block and broadcasts it.
    ///
    /// Proof-of-work runs on a blocking thread without the ledger lock. If
    /// the tip moved while mining, the block is discarded and re-mined.
    pub async fn mine_next_block(&self) -> Result<Block, ChainError> {
        for attempt in 1..=MAX_MINING_ATTEMPTS {
            let (tip, mut data) = self.ledger.mining_template().await;
            data.push(Transaction::reward_transaction(&self.wallet));
            let block = self.mine_blocking(tip, data).await?;

            match self.ledger.append_block(block.clone()).await {
                Ok(()) => {
                    info!(
                        index = block.index,
                        hash = %block.hash,
                        difficulty = block.difficulty,
                        transactions = block.data.len(),
                        "node.block_mined"
                    );
                    self.pubsub.broadcast_block(&block);
                    return Ok(block);
                }
                Err(ChainError::InvalidBlockLinkage) => {
                    debug!(attempt, "node.tip_moved_while_mining");
                }
                Err(e) => return Err(e),
            }
        }
        Err(ChainError::InvalidBlock(format!(
            "tip kept moving for {} mining attempts",
            MAX_MINING_ATTEMPTS
        )))
    }

    async fn mine_blocking(&self, tip: Block, data: Vec<Transaction>) -> Result<Block, ChainError> {
        tokio::task::spawn_blocking(move || Block::mine(&tip, data))
            .await
            .map_err(|e| ChainError::InvalidBlock(format!("mining task failed: {}", e)))
    }

    /// Pays `amount` to `recipient` from this node's wallet. A pending
    /// transaction from the wallet is amended; otherwise a new one is built
    /// against the chain balance. The result is pooled, then broadcast.
    pub async fn submit_transaction(
        &self,
        recipient: &str,
        amount: u64,
    ) -> Result<Transaction, ChainError> {
        let tx = {
            let mut state = self.ledger.write().await;
            let tx = match state.pool.existing_transaction(self.wallet.address()).cloned() {
                Some(mut pending) => {
                    pending.update(&self.wallet, recipient, amount)?;
                    pending
                }
                None => self
                    .wallet
                    .create_transaction(recipient, amount, state.blockchain.chain())?,
            };
            state.pool.set_transaction(tx.clone())?;
            tx
        };

        debug!(id = %tx.id, recipient, amount, "node.transaction_submitted");
        self.pubsub.broadcast_transaction(&tx);
        Ok(tx)
    }

    /// This wallet's chain-derived balance.
    pub async fn wallet_balance(&self) -> u64 {
        self.wallet.balance(&self.ledger.snapshot().await)
    }

    /// Fills the chain with ten blocks of transactions between throwaway
    /// wallets, then stages and broadcasts three more.
    pub async fn seed_data(&self) -> Result<(), ChainError> {
        for _ in 0..10 {
            let data = vec![seed_transaction()?, seed_transaction()?];
            let (tip, _) = self.ledger.mining_template().await;
            let block = self.mine_blocking(tip, data).await?;
            self.ledger.append_block(block).await?;
        }

        for _ in 0..3 {
            let tx = seed_transaction()?;
            self.ledger.set_transaction(tx.clone()).await?;
            self.pubsub.broadcast_transaction(&tx);
        }

        info!(length = self.ledger.chain_len().await, "node.seeded");
        Ok(())
    }

    /// Stops the listener, the poller and the API server.
    pub async fn shutdown(&self) {
        self.shutdown.shutdown();
        self.listener.lock().await.unsubscribe();

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                warn!("node.task_shutdown_timeout");
            }
        }
        info!(node_id = %self.node_id(), "node.stopped");
    }
}

fn seed_transaction() -> Result<Transaction, ChainError> {
    let amount = rand::thread_rng().gen_range(2..=50);
    Transaction::new(
        &Wallet::new(),
        crate::economics::STARTING_BALANCE,
        Wallet::new().address(),
        amount,
    )
}
