pub mod attitude;
pub mod config;
pub mod mission;
pub mod serial;
pub mod session;

use config::LinkSettings;
use serial::unified::{UnifiedSerialBuilder, UnifiedSerialHandle};

/// Spawn the link task with `settings` on the current tokio runtime.
///
/// Logging goes through the `log` facade; the embedding application picks
/// the backend and should apply `settings.log_level_filter()`.
pub fn start(settings: LinkSettings) -> anyhow::Result<UnifiedSerialHandle> {
    settings.validate()?;
    log::set_max_level(settings.log_level_filter());
    let handle = UnifiedSerialBuilder::new(settings).build();
    log::info!("Groundlink started");
    Ok(handle)
}
