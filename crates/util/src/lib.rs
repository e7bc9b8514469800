//! Cross-cutting helpers for the Stepwise runtime: secret redaction for
//! free-form error text, runtime settings, and the blocking bridge used by
//! the dispatcher's slot pool.

pub mod async_runtime;
pub mod path_processing;
pub mod redaction;
pub mod settings;

pub use async_runtime::block_on_future;
pub use path_processing::expand_tilde;
pub use redaction::redact_sensitive;
pub use settings::{RuntimeSettings, SettingsError};
