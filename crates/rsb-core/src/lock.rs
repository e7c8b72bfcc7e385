use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use log::debug;

use crate::error::{Error, Result};

pub const LOCK_FILE: &str = ".rsb.lock";

/// Exclusive advisory lock over a backup root, shared by the monitor and restore.
/// Released when dropped.
#[derive(Debug)]
pub struct BackupLock {
    file: File,
    path: PathBuf,
}

impl BackupLock {
    /// Fails with [`Error::Locked`] instead of waiting when someone else holds it.
    pub fn try_acquire(backup_root: &Path) -> Result<Self> {
        fs::create_dir_all(backup_root)?;
        let path = backup_root.join(LOCK_FILE);
        let file = OpenOptions::new().create(true).truncate(false).write(true).open(&path)?;
        // Explicit trait call; std grew inherent File::try_lock_* with other signatures.
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                debug!("acquired {}", path.display());
                Ok(Self { file, path })
            }
            Err(e) if is_contended(&e) => Err(Error::Locked(path)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path { &self.path }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || (e.raw_os_error().is_some() && e.raw_os_error() == fs2::lock_contended_error().raw_os_error())
}

impl Drop for BackupLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
