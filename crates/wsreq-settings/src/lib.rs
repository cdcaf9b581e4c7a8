//! # wsreq-settings
//!
//! Configuration for wsreq servers, clients and logging.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`WsreqSettings::default()`]
//! 2. **Settings file**: `~/.wsreq/settings.json` or an explicit path
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `WSREQ_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{ClientSettings, LoggingSettings, ServerSettings, WsreqSettings};
