//! Two-room track relay
//!
//! Joins two rooms on the same conferencing server and republishes every
//! audio and video track from each room into the other one.

pub mod config;
pub mod echo;
pub mod error;
pub mod manager;
pub mod registry;
pub mod relay;
pub mod room;
pub mod rtc;
pub mod shutdown;
pub mod token;

use std::future::Future;
use std::sync::Arc;

pub use crate::config::Settings;
pub use crate::error::{BridgeError, Result};
pub use crate::manager::{RoomTarget, SessionManager};
pub use crate::shutdown::{ShutdownCoordinator, ShutdownReport};

/// Bridge both rooms until `signal` resolves, then shut down
pub async fn run<F>(
    settings: &Settings,
    connector: Arc<dyn room::RoomConnector>,
    signal: F,
) -> Result<ShutdownReport>
where
    F: Future<Output = ()>,
{
    let targets = settings.room_targets()?;
    let manager = SessionManager::new(
        connector,
        settings.relay_settings(),
        settings.destination_wait(),
    );

    let mut coordinator = ShutdownCoordinator::new(settings.shutdown_timeout());
    for target in targets {
        tracing::info!(
            "Starting session for room {} (side {}) on {}",
            target.name,
            target.side,
            target.host
        );
        coordinator.track(manager.spawn_session(target, coordinator.token()));
    }

    Ok(coordinator.run_until(signal).await)
}
