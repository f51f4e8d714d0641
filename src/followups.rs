use crate::traits::FollowUps;
use tracing::info;

/// Follow-up jobs for a headless install, where both reduce to log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingFollowUps;

impl FollowUps for LoggingFollowUps {
    fn update_shortcuts(&self) {
        info!("🔗 Library shortcuts refreshed");
    }

    fn run_extension_updates(&self) {
        info!("🧩 Running deferred extension update check");
    }
}
