use std::fmt::Display;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{info, warn};

pub const JOURNAL_FILE: &str = "log.log";

/// Append-only, human-readable event log at `<backup_root>/log.log`.
///
/// Every entry is also forwarded to the `log` facade. Failing to append never
/// fails the operation being recorded.
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn in_backup_root(backup_root: &Path) -> Self { Self { path: backup_root.join(JOURNAL_FILE) } }

    pub fn path(&self) -> &Path { &self.path }

    pub fn record(&self, msg: impl Display) {
        info!("{}", msg);
        self.append(&msg);
    }

    /// Like [`record`](Self::record) but logged at warn level.
    pub fn problem(&self, msg: impl Display) {
        warn!("{}", msg);
        self.append(&msg);
    }

    fn append(&self, msg: &dyn Display) {
        let ts = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let res = (|| -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut f = OpenOptions::new().create(true).append(true).open(&self.path)?;
            writeln!(f, "[{}] {}", ts, msg)
        })();
        if let Err(e) = res {
            warn!("cannot append to {}: {}", self.path.display(), e);
        }
    }
}
