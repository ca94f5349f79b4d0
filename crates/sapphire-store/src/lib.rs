//! Key/value persistence consumed by every other component: runtime settings
//! with hot-reload, credentials with env-var fallback, and the content-opaque
//! prompt and spice stores.

mod credentials;
mod error;
mod prompts;
mod settings;
mod spice;

pub use credentials::{CredentialsManager, PROVIDER_ENV_VARS};
pub use error::{Result, StoreError};
pub use prompts::PromptStore;
pub use settings::SettingsStore;
pub use spice::SpiceStore;

use std::path::Path;

/// Replace `path` with `bytes` as a single operation (write-temp + rename).
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}
