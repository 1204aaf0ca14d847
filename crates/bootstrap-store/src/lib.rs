//! Bootstrap object store
//!
//! Read and write access to the two kinds of objects the etcdadm bootstrap
//! controller touches: `EtcdadmConfig` resources (and their status
//! subresource) and the `Secret`s that carry rendered bootstrap data.
//!
//! # Example
//!
//! ```no_run
//! use bootstrap_store::{BootstrapStoreTrait, KubeBootstrapStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let store = KubeBootstrapStore::new(client);
//!
//! let config = store.get_config("default", "etcd-0").await?;
//! println!("format: {}", config.spec.format);
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **test-util**: in-memory `MockBootstrapStore` with write counters and
//!   fault injection for reconciler tests

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubeBootstrapStore;
pub use error::StoreError;
pub use store_trait::BootstrapStoreTrait;
#[cfg(feature = "test-util")]
pub use mock::{CallCounts, MockBootstrapStore};
