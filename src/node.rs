//! Node orchestration
//!
//! Wires config, store, ledger, chain, and listener together with a
//! deterministic startup order: hash self-test first (fatal on mismatch),
//! then the store, then the chain cache, then the listener. There is no
//! in-memory fallback when the database cannot be opened; a node that
//! cannot persist must not accept mutations.

use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::chain::ChainState;
use crate::config::Config;
use crate::crypto;
use crate::error::{NodeError, Result};
use crate::ledger::Ledger;
use crate::persistence::{Database, Store};
use crate::router::Router;
use crate::server;

pub struct Node {
    pub config: Config,
    pub ledger: Arc<Ledger>,
    pub chain: Arc<ChainState>,
}

impl Node {
    /// Initialize against the SQLite store named in the config.
    pub fn init(config: Config) -> Result<Self> {
        let db_path = std::path::Path::new(&config.database.path);
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    NodeError::Store(format!("Failed to create data dir {:?}: {}", parent, e))
                })?;
            }
        }
        let store: Arc<dyn Store> = Arc::new(Database::open(&config.database.path)?);
        Self::init_with_store(config, store)
    }

    /// Initialize against an injected store. Used by tests and tooling.
    pub fn init_with_store(config: Config, store: Arc<dyn Store>) -> Result<Self> {
        crypto::self_test()?;
        info!("Hash self-test passed");

        let ledger = Arc::new(Ledger::new(store.clone(), config.ledger.fee_basis_points));
        let chain = Arc::new(ChainState::load(store)?);

        Ok(Node { config, ledger, chain })
    }

    /// Bind the listener and serve until the shutdown channel flips.
    pub async fn start(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<()> {
        let bind = format!("{}:{}", self.config.network.listen_addr, self.config.network.port);
        let listener = TcpListener::bind(&bind)
            .await
            .map_err(|e| NodeError::Io(format!("Port {} unavailable: {}", bind, e)))?;
        info!("Listening on {}", bind);

        let router = Arc::new(Router::new(
            self.ledger.clone(),
            self.chain.clone(),
            self.config.admin.enabled,
        ));
        server::run(listener, router, shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;

    #[test]
    fn test_init_runs_self_test_and_loads_chain() {
        let node = Node::init_with_store(Config::default(), Arc::new(MemoryStore::new())).unwrap();
        assert_eq!(node.chain.height(), 0);
        assert_eq!(node.chain.difficulty(), crate::difficulty::INITIAL_DIFFICULTY);
    }

    #[test]
    fn test_init_creates_database_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.database.path = dir
            .path()
            .join("nested/vanillachain.db")
            .to_string_lossy()
            .into_owned();

        let node = Node::init(config).unwrap();
        assert_eq!(node.ledger.balance("nobody").unwrap(), crate::amount::Amount::ZERO);
        assert!(dir.path().join("nested/vanillachain.db").exists());
    }
}
