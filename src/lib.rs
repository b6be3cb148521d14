//! aplledger - the ledger-access core of a blockchain node
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Ledger
//! - [`blockchain`] - Blocks, the last-block pointer, reference blocks and the `Blockchain` facade
//! - [`transaction`] - Transaction types, prunable payloads and the builder
//! - [`pending`] - Expected transactions not yet in the chain
//!
//! ## Concurrency
//! - [`lock`] - Three-tier (read / update / write) reentrant ledger lock
//!
//! ## Cryptography
//! - [`crypto`] - Identifiers, signing identities and verification (secp256k1)
//!
//! ## Storage
//! - [`persistence`] - SQLite tables, reader pool and streaming cursors
//! - [`cache`] - Caching utilities
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types
//! - [`node`] - Logging setup and ledger lifecycle

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod blockchain;
pub mod pending;
pub mod transaction;

// ============================================================================
// Concurrency
// ============================================================================
pub mod lock;

// ============================================================================
// Cryptography
// ============================================================================
pub mod crypto;

// ============================================================================
// Storage
// ============================================================================
pub mod cache;
pub mod persistence;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
pub mod node;
