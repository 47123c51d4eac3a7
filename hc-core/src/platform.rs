//! Per-user application directories.

use std::path::PathBuf;

use crate::constants::APP_NAME;
use crate::error::{HcError, HcResult};

/// Per-user application directories.
pub struct Platform;

impl Platform {
    /// Get the platform-specific application data directory.
    ///
    /// Key material and logs live here unless configured otherwise.
    pub fn data_dir() -> HcResult<PathBuf> {
        let base = dirs::data_dir()
            .ok_or_else(|| HcError::Config("could not determine data directory".into()))?;
        Ok(base.join(APP_NAME))
    }

    /// Get the platform-specific configuration directory.
    pub fn config_dir() -> HcResult<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| HcError::Config("could not determine config directory".into()))?;
        Ok(base.join(APP_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirs_are_app_scoped() {
        if let Ok(dir) = Platform::data_dir() {
            assert!(dir.ends_with(APP_NAME));
        }
    }
}
