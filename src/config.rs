use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::cache::key::{Stage, StageMask};
use crate::foundation::error::{SeqCacheError, SeqCacheResult};

const MIB: u64 = 1024 * 1024;

/// Cache settings of one editing session.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Stages retained permanently unless a strip overrides them. Final output is always retained
    /// when listed here, regardless of strip overrides.
    pub stored_stages: StageMask,
    /// Keep frames the running prefetch job is about to need when recycling.
    pub prefetch: bool,
    /// Budget compared against the memory monitor's figure.
    pub memory_budget_mb: u64,
    /// Optional disk tier.
    pub disk: Option<DiskCacheConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stored_stages: Stage::Raw | Stage::FinalOut,
            prefetch: false,
            memory_budget_mb: 4096,
            disk: None,
        }
    }
}

impl CacheConfig {
    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> SeqCacheResult<Self> {
        let cfg: Self =
            serde_json::from_str(json).map_err(|e| SeqCacheError::serde(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_json_file(path: &Path) -> SeqCacheResult<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read cache config '{}'", path.display()))?;
        Self::from_json_str(&text)
    }

    /// Reject zero budgets and an empty disk directory.
    pub fn validate(&self) -> SeqCacheResult<()> {
        if self.memory_budget_mb == 0 {
            return Err(SeqCacheError::config("memory_budget_mb must be > 0"));
        }
        if let Some(disk) = &self.disk {
            if disk.size_limit_mb == 0 {
                return Err(SeqCacheError::config("disk.size_limit_mb must be > 0"));
            }
            if disk.dir.as_os_str().is_empty() {
                return Err(SeqCacheError::config("disk.dir must be non-empty"));
            }
        }
        Ok(())
    }

    /// Memory budget in bytes.
    pub fn memory_budget_bytes(&self) -> u64 {
        self.memory_budget_mb.saturating_mul(MIB)
    }

    /// Stages retained for a strip: its override if set, the session-wide stages otherwise, plus
    /// final output whenever the session retains it.
    pub fn effective_stages(&self, strip_override: Option<StageMask>) -> StageMask {
        let base = strip_override.unwrap_or(self.stored_stages);
        base.union(self.stored_stages.intersection(StageMask::FINAL_OUT))
    }
}

/// PNG compression effort for disk-tier files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskCompression {
    /// Fast encoding, larger files.
    #[default]
    Fast,
    /// Smallest files, slow encoding.
    Best,
}

/// Disk tier settings.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiskCacheConfig {
    /// Root directory; each scene gets a subdirectory.
    pub dir: PathBuf,
    /// Size the tier is trimmed to after each write.
    #[serde(default = "default_disk_limit_mb")]
    pub size_limit_mb: u64,
    /// PNG compression effort.
    #[serde(default)]
    pub compression: DiskCompression,
}

fn default_disk_limit_mb() -> u64 {
    100
}

impl DiskCacheConfig {
    /// Size limit in bytes.
    pub fn size_limit_bytes(&self) -> u64 {
        self.size_limit_mb.saturating_mul(MIB)
    }
}

#[cfg(test)]
#[path = "../tests/unit/config.rs"]
mod tests;
