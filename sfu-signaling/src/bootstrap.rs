//! Process start-up for an embedding server: configuration first, then
//! logging, before any room exists

use crate::config::SfuConfig;
use crate::logging::init_logging;
use anyhow::Context;
use tracing::info;

/// Load configuration from `config_file` and the environment, then install
/// the global subscriber it describes
///
/// Call once per process.
pub fn init(config_file: Option<&str>) -> anyhow::Result<SfuConfig> {
    let config = SfuConfig::load(config_file).context("failed to load configuration")?;
    init_logging(&config.logging)?;

    info!(
        config_file,
        level = %config.logging.level,
        format = ?config.logging.format,
        codecs = config.room.codecs.len(),
        "SFU signaling initialized"
    );

    Ok(config)
}
