use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::activity::ProcessProbe;
use crate::copy::{DEFAULT_FAILURE_THRESHOLD, ExternalCopy, NativeCopy, TreeCopy};
use crate::error::{Error, Result};

/// Immutable settings snapshot consumed by the monitor and restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Holds `<world>/<save>` live directories.
    pub save_root: PathBuf,
    /// Holds `<world>/<save>/<slot>` backups, the fingerprint document and `log.log`.
    pub backup_root: PathBuf,
    /// Minimum age of the newest slot before another one is written.
    pub save_frequency_minutes: u64,
    /// Monitor sleep between ticks; the save frequency when unset.
    pub poll_interval_minutes: Option<u64>,
    /// Numbered slots kept per save.
    pub save_count: u32,
    pub tracked_files: Vec<String>,
    /// Copy result codes at or above this fail.
    pub failure_threshold: i32,
    /// Process names that mean the game is running.
    pub game_processes: Vec<String>,
    pub copy: CopyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            save_root: PathBuf::from("saves"),
            backup_root: PathBuf::from("backups"),
            save_frequency_minutes: 10,
            poll_interval_minutes: None,
            save_count: 5,
            tracked_files: ["map.dat", "stats.dat", "vehicles.db", "players.db"].map(String::from).to_vec(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            game_processes: Vec::new(),
            copy: CopyConfig::default(),
        }
    }
}

impl Config {
    pub fn save_frequency(&self) -> Duration { Duration::from_secs(self.save_frequency_minutes.saturating_mul(60)) }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval_minutes.map(|m| Duration::from_secs(m.saturating_mul(60))).unwrap_or_else(|| self.save_frequency())
    }

    pub fn copy_succeeded(&self, code: i32) -> bool { code < self.failure_threshold }

    pub fn validate(&self) -> Result<()> {
        if self.save_root.as_os_str().is_empty() {
            return Err(Error::Config("save_root is empty".into()));
        }
        if self.backup_root.as_os_str().is_empty() {
            return Err(Error::Config("backup_root is empty".into()));
        }
        if overlapping(&self.save_root, &self.backup_root) {
            return Err(Error::Config("save_root and backup_root must not contain each other".into()));
        }
        if self.save_count == 0 {
            return Err(Error::Config("save_count must be at least 1".into()));
        }
        if self.tracked_files.iter().all(|f| f.trim().is_empty()) {
            return Err(Error::Config("tracked_files is empty".into()));
        }
        if self.failure_threshold <= 0 {
            return Err(Error::Config("failure_threshold must be positive".into()));
        }
        if let CopyConfig::External { program, .. } = &self.copy
            && program.trim().is_empty()
        {
            return Err(Error::Config("external copy program is empty".into()));
        }
        Ok(())
    }

    pub fn activity_probe(&self) -> ProcessProbe { ProcessProbe::new(&self.game_processes) }
}

/// True when either path equals or lies inside the other, as written or once resolved.
fn overlapping(a: &Path, b: &Path) -> bool {
    let nested = |x: &Path, y: &Path| x.starts_with(y) || y.starts_with(x);
    if nested(a, b) {
        return true;
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(x), Ok(y)) => nested(&x, &y),
        _ => false,
    }
}

/// Which tree-copy implementation to use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CopyConfig {
    Native { threads: usize },
    External { program: String, args: Vec<String> },
}

impl Default for CopyConfig {
    fn default() -> Self { CopyConfig::Native { threads: 4 } }
}

impl CopyConfig {
    pub fn build(&self) -> Arc<dyn TreeCopy> {
        match self {
            CopyConfig::Native { threads } => Arc::new(NativeCopy::new(*threads)),
            CopyConfig::External { program, args } => Arc::new(ExternalCopy::new(program.clone(), args.clone())),
        }
    }
}
