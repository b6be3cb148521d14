use crate::blockchain::Blockchain;
use crate::config::{load_config, LedgerConfig};
use crate::error::{ChainError, Result};
use crate::persistence::{LedgerStore, StoreOptions};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Booting,
    Ready,
    ShuttingDown,
    Stopped,
}

/// Installs the global fmt subscriber. `RUST_LOG` wins over `filter`; a
/// subscriber installed earlier (by a test harness, say) is left alone.
pub fn init_logging(filter: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    if tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init()
        .is_err()
    {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Owns the ledger for the lifetime of the process: logging comes up first,
/// then the store, then the facade every other component borrows.
pub struct Node {
    pub config: LedgerConfig,
    pub blockchain: Arc<Blockchain>,
    state: RwLock<NodeState>,
}

impl Node {
    /// Loads the config at `config_path` (defaults when absent) and opens the ledger.
    pub fn init(config_path: impl AsRef<Path>) -> Result<Self> {
        let config = load_config(config_path)?;
        Self::init_with_config(config)
    }

    pub fn init_with_config(config: LedgerConfig) -> Result<Self> {
        config.validate()?;
        init_logging(&config.logging.filter);
        info!("Starting ledger node (database = {})", config.database.path);

        let store = LedgerStore::open(&config.database.path, StoreOptions::from_config(&config))?;
        Self::with_store(config, store)
    }

    /// Brings a node up over an already opened store.
    pub fn with_store(config: LedgerConfig, store: LedgerStore) -> Result<Self> {
        let node = Node {
            blockchain: Arc::new(Blockchain::open(store, &config.chain)?),
            config,
            state: RwLock::new(NodeState::Booting),
        };
        *node.state.write() = NodeState::Ready;
        info!("Node ready at height {:?}", node.blockchain.height());
        Ok(node)
    }

    pub fn state(&self) -> NodeState {
        *self.state.read()
    }

    /// Drains locked sections and closes storage. Safe to call twice.
    pub fn shutdown(&self) -> Result<()> {
        let previous = {
            let mut state = self.state.write();
            match *state {
                NodeState::Stopped => return Ok(()),
                NodeState::ShuttingDown => {
                    return Err(ChainError::InvariantViolation(
                        "shutdown already in progress".to_string(),
                    ))
                }
                _ => std::mem::replace(&mut *state, NodeState::ShuttingDown),
            }
        };
        if let Err(e) = self.blockchain.shutdown() {
            warn!("Ledger shutdown failed: {}", e);
            *self.state.write() = previous;
            return Err(e);
        }
        *self.state.write() = NodeState::Stopped;
        info!("Node stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Block;

    #[test]
    fn test_lifecycle_over_temporary_store() {
        let store = LedgerStore::temporary(StoreOptions::default()).unwrap();
        let node = Node::with_store(LedgerConfig::default(), store).unwrap();
        assert_eq!(node.state(), NodeState::Ready);

        {
            let guard = node.blockchain.write_lock().unwrap();
            node.blockchain
                .set_last_block(&guard, Block::genesis(0, 1, vec![]))
                .unwrap();
        }
        assert_eq!(node.blockchain.height(), Some(0));

        node.shutdown().unwrap();
        assert_eq!(node.state(), NodeState::Stopped);
        node.shutdown().unwrap();
        assert!(node.blockchain.get_block_at_height(0).is_err());
    }

    #[test]
    fn test_failed_shutdown_can_be_retried() {
        let store = LedgerStore::temporary(StoreOptions::default()).unwrap();
        let node = Node::with_store(LedgerConfig::default(), store).unwrap();

        // A reader on this thread cannot take the write lock shutdown needs.
        let reading = node.blockchain.read_lock();
        assert!(node.shutdown().is_err());
        assert_eq!(node.state(), NodeState::Ready);
        assert!(!node.blockchain.is_closed());
        drop(reading);

        node.shutdown().unwrap();
        assert_eq!(node.state(), NodeState::Stopped);
    }

    #[test]
    fn test_init_from_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let db_path = dir.path().join("data").join("ledger.db");
        let config_path = dir.path().join("ledger.toml");
        std::fs::write(
            &config_path,
            format!(
                "[database]\npath = {:?}\n\n[logging]\nfilter = \"warn\"\n",
                db_path.display().to_string()
            ),
        )
        .unwrap();

        let node = Node::init(&config_path).unwrap();
        assert_eq!(node.config.logging.filter, "warn");
        assert!(db_path.exists());
        node.shutdown().unwrap();
    }
}
