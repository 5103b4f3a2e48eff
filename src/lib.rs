//! MeshLedger - a toy proof-of-work ledger replicated across nodes
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Ledger
//! - [`blockchain`] - Blocks, mining, chain validation and replacement
//! - [`transaction`] - Signed transfers and mining rewards
//! - [`mempool`] - Pending transaction pool
//! - [`economics`] - Mining rate, rewards and difficulty adjustment
//!
//! ## Cryptography
//! - [`crypto`] - Keys, addresses and signatures (secp256k1)
//!
//! ## State Management
//! - [`wallet`] - Keypair wallet with chain-derived balance
//! - [`ledger`] - Chain and pool behind a single lock
//!
//! ## Networking & Replication
//! - [`pubsub`] - Block and transaction broadcast
//! - [`sync`] - Broadcast listener, chain poller and reconciliation
//! - [`api`] - HTTP endpoints
//! - [`node`] - Node orchestration
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`logging`] - Tracing setup
//! - [`shutdown`] - Graceful shutdown
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod blockchain;
pub mod economics;
pub mod mempool;
pub mod transaction;

// ============================================================================
// Cryptography
// ============================================================================
pub mod crypto;

// ============================================================================
// State Management
// ============================================================================
pub mod ledger;
pub mod wallet;

// ============================================================================
// Networking & Replication
// ============================================================================
pub mod api;
pub mod node;
pub mod pubsub;
pub mod sync;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
pub mod logging;
pub mod shutdown;
