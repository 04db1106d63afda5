//! Deploy-once, fork-per-test contract harness
//!
//! The session world (one account per identity plus the contracts under
//! test) is built once, encoded into a [`CacheStore`] and decoded at most
//! once per process. Every test then takes its own [`ForkContext`], a
//! private copy of that world with handles bound to the copy.
//!
//! ```no_run
//! use chain_harness::{FileCacheStore, Harness, HarnessConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> chain_harness::HarnessResult<()> {
//! let store = Arc::new(FileCacheStore::new("target/harness-cache"));
//! let harness = Harness::new(HarnessConfig::default(), store)?;
//! let ctx = harness.factory().await?.fork();
//!
//! let contract = ctx.contract("contract")?.contract_address();
//! ctx.execute("alice", contract, "initialize", &[]).await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod bundle;
pub mod cache;
pub mod config;
pub mod error;
pub mod fork;
pub mod session;
pub mod signer;

pub use builder::WorldBuilder;
pub use bundle::{SessionBundle, CACHE_FORMAT_VERSION};
pub use cache::{CacheStore, FileCacheStore, MemoryCacheStore};
pub use config::{ContractConfig, HarnessConfig, IdentityConfig, DEFAULT_CACHE_KEY};
pub use error::{HarnessError, HarnessResult};
pub use fork::{ForkContext, ForkFactory};
pub use session::SessionCache;
pub use signer::Signer;

use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Entry point tying configuration, cache store and fork factory together
#[derive(Debug)]
pub struct Harness {
    cache: SessionCache,
}

impl Harness {
    /// Create a harness; nothing is built until [`Harness::factory`]
    pub fn new(config: HarnessConfig, store: Arc<dyn CacheStore>) -> HarnessResult<Self> {
        config.validate()?;
        Ok(Self {
            cache: SessionCache::new(WorldBuilder::new(config), store),
        })
    }

    /// Fork factory over the session bundle
    pub async fn factory(&self) -> HarnessResult<ForkFactory> {
        let bundle = self.cache.get_or_build().await?;
        Ok(ForkFactory::new(bundle))
    }

    /// Underlying session cache
    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }
}

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
