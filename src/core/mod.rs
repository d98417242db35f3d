//! Core plumbing shared by every engine task: logging, channels, scheduling
//!
//! This module uses **explicit re-exports** instead of glob exports
//! (`pub use module::*`) so the public API only changes on purpose.

pub mod channels;
pub mod logging;
pub mod schedule;

pub use channels::{ChannelBundle, DEFAULT_CHANNEL_CAPACITY};

pub use logging::{
    init_logging, init_logging_with_config, init_test_logging, sanitize_signature,
    LoggingConfig, SanitizedValue, DEFAULT_LOG_LEVEL,
};

pub use schedule::{sleep_or_shutdown, JitteredInterval, JitteredTicker};
