//! Desktop integration steps run after an AppImage is installed.

use crate::config::EffectiveAppConfig;
use crate::error::Result;
use std::path::Path;

/// Post-install integration. Failures are logged by the caller and never abort
/// an update.
pub trait InstallHooks: Send + Sync {
    fn setup_icon(&self, _app: &EffectiveAppConfig, _installed: &Path) -> Result<()> {
        Ok(())
    }

    fn update_desktop_entry(&self, _app: &EffectiveAppConfig, _installed: &Path) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl InstallHooks for NoopHooks {}
