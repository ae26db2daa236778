//! Edgepass - edge-deployed tunneling proxies
//!
//! Two tunneling cores behind one HTTP listener:
//! - **LessPass**: VLESS-over-WebSocket, proxying TCP to any host:port
//!   and UDP-for-DNS via DoH, with a relay fallback for targets that
//!   accept a connection and then go silent.
//! - **TwoPass**: HTTP TCP tunnels, either one bidirectional POST (V1)
//!   or a POST upload paired with a GET download by session id (V2).
//!
//! # Architecture
//!
//! ```text
//!                  +-----------------+
//!                  | inbound/ (HTTP) |
//!                  +--------+--------+
//!                           |
//!          +----------------+----------------+
//!          |                |                |
//!   +------v------+  +------v------+  +------v------+
//!   |   vless/    |  |  session/   |  |   config/   |
//!   | (LessPass)  |  | (V2 pairs)  |  +-------------+
//!   +------+------+  +------+------+
//!          |                |
//!   +------v------+  +------v------+  +-------------+
//!   |  outbound/  |  |   tunnel/   |  |    dns/     |
//!   |  (probe)    |  |  (splicer)  |  |   (DoH)     |
//!   +-------------+  +------+------+  +-------------+
//!                           |
//!                    +------v------+
//!                    | transport/  |
//!                    | (chunk I/O) |
//!                    +-------------+
//! ```

pub mod common;
pub mod config;
pub mod dns;
pub mod inbound;
pub mod outbound;
pub mod session;
pub mod transport;
pub mod tunnel;
pub mod vless;

pub use common::error::{Error, Result};
pub use config::Config;

use dns::DohClient;
use inbound::AppState;
use session::SessionRegistry;
use std::sync::Arc;
use tracing::info;

/// Crate version
pub const VERSION: &str = "0.1.0";

/// Gateway instance managing all components
pub struct Gateway {
    config: Arc<Config>,
    registry: Arc<SessionRegistry>,
    doh: DohClient,
}

impl Gateway {
    /// Create a new Gateway from configuration
    pub fn new(config: Config) -> Result<Self> {
        info!("Initializing edgepass v{}", VERSION);

        let registry = Arc::new(SessionRegistry::new(config.session_ttl));
        let doh = DohClient::new()?;
        info!("DoH upstream: {}", config.doh_url);

        Ok(Gateway {
            config: Arc::new(config),
            registry,
            doh,
        })
    }

    /// Start serving until a shutdown signal arrives
    pub async fn run(&self) -> Result<()> {
        self.registry.start_sweeper();

        let state = self.app_state();
        let listen = self.config.listen;
        let server = tokio::spawn(async move {
            if let Err(e) = inbound::serve(state, listen).await {
                tracing::warn!("server error: {}", e);
            }
        });

        tokio::signal::ctrl_c().await?;
        info!("Received shutdown signal");

        server.abort();
        info!("Gateway stopped");
        Ok(())
    }

    /// Shared handler state
    pub fn app_state(&self) -> AppState {
        AppState::new(self.config.clone(), self.registry.clone(), self.doh.clone())
    }

    /// Get current configuration
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Get session registry reference
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }
}
