//! Protect-then-overwrite restore of a backup slot into the live save.
//!
//! The live save is first copied into the recovery slot, then renamed aside
//! and replaced by a fresh directory that receives the chosen slot. The
//! renamed copy is only deleted once the slot copy succeeded.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::warn;

use crate::activity::ActivityProbe;
use crate::config::Config;
use crate::copy::{CODE_FATAL, TreeCopy};
use crate::error::{Error, Result};
use crate::journal::Journal;
use crate::lock::BackupLock;
use crate::saves::{RECOVERY_SLOT_NAME, SaveInstance, parse_slot_index};

/// Slot index the recovery slot is parked under while it is being restored.
pub const PLACEHOLDER_SLOT: u32 = 0;

const TEMP_SUFFIX: &str = ".restore-tmp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreReport {
    /// False when there was no live save to protect.
    pub recovery_written: bool,
    /// Result code of the slot -> live copy.
    pub code: i32,
}

/// Sibling the live directory is renamed to during a restore.
pub fn temp_live_dir(live: &Path) -> PathBuf {
    let mut name = live.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(TEMP_SUFFIX);
    live.with_file_name(name)
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(x), Ok(y)) => x == y,
        _ => a == b,
    }
}

/// True when `chosen` is the recovery slot or a numbered slot of `instance`.
pub fn is_slot_of(backup_root: &Path, instance: &SaveInstance, chosen: &Path) -> bool {
    let (Ok(dir), Ok(backup_dir)) = (fs::canonicalize(chosen), fs::canonicalize(instance.backup_dir(backup_root))) else {
        return false;
    };
    if dir.parent() != Some(backup_dir.as_path()) {
        return false;
    }
    match dir.file_name().and_then(|n| n.to_str()) {
        Some(RECOVERY_SLOT_NAME) => true,
        Some(name) => parse_slot_index(name).is_some(),
        None => false,
    }
}

pub struct Restorer {
    config: Config,
    copier: Arc<dyn TreeCopy>,
    probe: Arc<dyn ActivityProbe>,
    journal: Journal,
}

impl Restorer {
    pub fn new(config: Config, copier: Arc<dyn TreeCopy>, probe: Arc<dyn ActivityProbe>) -> Result<Self> {
        config.validate()?;
        Ok(Self { journal: Journal::in_backup_root(&config.backup_root), config, copier, probe })
    }

    pub fn from_config(config: Config) -> Result<Self> {
        let copier = config.copy.build();
        let probe: Arc<dyn ActivityProbe> = Arc::new(config.activity_probe());
        Self::new(config, copier, probe)
    }

    /// Replaces the live save of `instance` with the contents of `chosen`.
    ///
    /// `chosen` must be one of the instance's own slots. Refuses to run while
    /// the game is active or while a previous restore's
    /// temporary directory or placeholder is still around. On a failed final
    /// copy the pre-restore live save stays in [`temp_live_dir`] and is
    /// reported through [`Error::CopyFailed`].
    pub fn restore(&self, instance: &SaveInstance, chosen: &Path) -> Result<RestoreReport> {
        if self.probe.is_game_active() {
            return Err(Error::GameActive);
        }
        let cfg = &self.config;
        if !chosen.is_dir() || !is_slot_of(&cfg.backup_root, instance, chosen) {
            return Err(Error::SlotNotFound(chosen.to_path_buf()));
        }
        let _lock = BackupLock::try_acquire(&cfg.backup_root)?;

        let live = instance.live_dir(&cfg.save_root);
        let temp = temp_live_dir(&live);
        let recovery = instance.recovery_dir(&cfg.backup_root);
        let placeholder = instance.slot_dir(&cfg.backup_root, PLACEHOLDER_SLOT);
        if placeholder.exists() {
            return Err(Error::PlaceholderExists(placeholder));
        }
        if temp.exists() {
            return Err(Error::StaleTemp(temp));
        }

        // 1. park the recovery slot so protecting the live save cannot clobber it
        let relocated = same_dir(chosen, &recovery);
        let source = if relocated {
            fs::rename(&recovery, &placeholder)?;
            placeholder.clone()
        } else {
            chosen.to_path_buf()
        };
        let undo_relocation = || {
            if !relocated {
                return;
            }
            if recovery.exists()
                && let Err(e) = fs::remove_dir_all(&recovery)
            {
                warn!("cannot clear {}: {}", recovery.display(), e);
                return;
            }
            if let Err(e) = fs::rename(&placeholder, &recovery) {
                warn!("cannot move {} back: {}", placeholder.display(), e);
            }
        };

        // 2. protect the live save
        let recovery_written = if live.is_dir() {
            let code = self.copier.copy(&live, &recovery);
            if !cfg.copy_succeeded(code) {
                self.journal.problem(format!("{}: restore aborted, protecting live save failed, code {}", instance, code));
                undo_relocation();
                return Err(Error::CopyFailed { code, preserved: None });
            }
            true
        } else {
            self.journal.record(format!("{}: no live save to protect, skipping recovery copy", instance));
            false
        };

        // 3. move the live save aside and give the copy a fresh target
        if live.exists()
            && let Err(e) = fs::rename(&live, &temp)
        {
            undo_relocation();
            return Err(e.into());
        }
        if let Err(e) = fs::create_dir_all(&live) {
            if temp.exists() && fs::rename(&temp, &live).is_err() {
                self.journal.problem(format!("{}: live save left at {}", instance, temp.display()));
            }
            undo_relocation();
            return Err(e.into());
        }

        // 4. restore
        // a vanished source must not count as restoring an empty save
        let code = if source.is_dir() { self.copier.copy(&source, &live) } else { CODE_FATAL };
        if !cfg.copy_succeeded(code) {
            let preserved = temp.exists().then(|| temp.clone());
            match &preserved {
                Some(p) => self.journal.problem(format!(
                    "{}: restore from {} failed, code {}; previous live save kept at {}",
                    instance,
                    chosen.display(),
                    code,
                    p.display()
                )),
                None => self.journal.problem(format!("{}: restore from {} failed, code {}", instance, chosen.display(), code)),
            }
            return Err(Error::CopyFailed { code, preserved });
        }
        if temp.exists()
            && let Err(e) = fs::remove_dir_all(&temp)
        {
            warn!("cannot remove {}: {}", temp.display(), e);
        }

        // 5.
        if placeholder.exists()
            && let Err(e) = fs::remove_dir_all(&placeholder)
        {
            warn!("cannot remove {}: {}", placeholder.display(), e);
        }

        self.journal.record(format!("{}: restored from {}, code {}", instance, chosen.display(), code));
        Ok(RestoreReport { recovery_written, code })
    }
}
