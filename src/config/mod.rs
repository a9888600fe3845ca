//! Configuration
//!
//! - [`Config`] - Layered user settings (defaults → TOML → environment)

mod settings;

pub use settings::*;
