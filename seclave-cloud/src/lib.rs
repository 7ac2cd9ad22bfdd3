//! Control-plane client for Seclave key management.
//!
//! Client-side orchestration over the zero-knowledge crypto core:
//! - API client for the key-escrow control plane (wrapped keys in, wrapped
//!   keys out — the server never sees plaintext)
//! - Team key cache with soft TTL eviction
//! - Background distribution engine (periodic + event-triggered passes)
//! - Emergency-access grant flows

pub mod api_client;
pub mod config;
pub mod error;
pub mod grants;
pub mod scheduler;
pub mod team_keys;
pub mod types;

pub use api_client::ApiClient;
pub use config::CloudConfig;
pub use error::{CloudError, CloudResult};
pub use grants::EmergencyAccessManager;
pub use scheduler::{create_distribution_engine, DistributionEngine, DistributionHandle};
pub use team_keys::TeamKeyService;
pub use types::*;
