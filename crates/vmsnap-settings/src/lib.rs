//! # vmsnap-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`VmSnapSettings::default()`]
//! 2. **User file**: `~/.vmsnap/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `VMSNAP_*` overrides (highest priority)
//!
//! ```no_run
//! use vmsnap_settings::load_settings;
//!
//! let settings = load_settings().unwrap_or_default();
//! println!("host broker: {}", settings.host.host_ip);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_dir, settings_path};
pub use types::*;
