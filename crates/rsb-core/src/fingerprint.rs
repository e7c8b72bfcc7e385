use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default file name of the fingerprint document under the backup root.
pub const FINGERPRINT_FILE: &str = "fingerprints.json";

/// Tracked file name -> modification time in nanoseconds since the epoch, `0` when absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub BTreeMap<String, u64>);

impl Fingerprint {
    pub fn get(&self, file: &str) -> Option<u64> { self.0.get(file).copied() }

    pub fn insert(&mut self, file: impl Into<String>, stamp: u64) { self.0.insert(file.into(), stamp); }

    /// True when every tracked file was missing.
    pub fn is_empty_save(&self) -> bool { self.0.values().all(|&t| t == 0) }
}

impl<S: Into<String>> FromIterator<(S, u64)> for Fingerprint {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        Fingerprint(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Instance key (`"world/save"`) -> fingerprint.
pub type Fingerprints = BTreeMap<String, Fingerprint>;

fn stamp(t: SystemTime) -> u64 {
    // pre-epoch clocks collapse onto 1 so they never read as "absent"
    t.duration_since(UNIX_EPOCH).map(|d| d.as_nanos().min(u64::MAX as u128) as u64).unwrap_or(1).max(1)
}

/// Reads the modification time of each tracked file under `dir`.
///
/// Missing files (or a missing `dir`) record `0`. Any other I/O failure is
/// returned so the caller can treat the instance as unreadable this cycle.
pub fn compute_signature(dir: &Path, tracked_files: &[String]) -> io::Result<Fingerprint> {
    let mut fp = Fingerprint::default();
    for name in tracked_files {
        let t = match fs::metadata(dir.join(name)) {
            Ok(m) => stamp(m.modified()?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e),
        };
        fp.insert(name.clone(), t);
    }
    Ok(fp)
}

/// Symmetric comparison over the union of both key sets.
pub fn has_changed(old: Option<&Fingerprint>, new: &Fingerprint) -> bool {
    let Some(old) = old else { return true };
    let keys: BTreeSet<&String> = old.0.keys().chain(new.0.keys()).collect();
    keys.into_iter().any(|k| old.0.get(k) != new.0.get(k))
}

/// Whole-document JSON store. Performs no locking of its own.
#[derive(Debug, Clone)]
pub struct FingerprintStore {
    path: PathBuf,
}

impl FingerprintStore {
    pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }

    pub fn in_backup_root(backup_root: &Path) -> Self { Self::new(backup_root.join(FINGERPRINT_FILE)) }

    pub fn path(&self) -> &Path { &self.path }

    /// Missing or unreadable documents load as an empty map.
    pub fn load(&self) -> Fingerprints {
        let data = match fs::read(&self.path) {
            Ok(d) => d,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("cannot read {}: {}; starting without fingerprints", self.path.display(), e);
                }
                return Fingerprints::new();
            }
        };
        match serde_json::from_slice(&data) {
            Ok(fps) => fps,
            Err(e) => {
                warn!("ignoring corrupt fingerprint document {}: {}", self.path.display(), e);
                Fingerprints::new()
            }
        }
    }

    /// Writes a sibling temp file and renames it over the document.
    pub fn save(&self, fps: &Fingerprints) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let s = serde_json::to_string_pretty(fps)?;
        fs::write(&tmp, s)?;
        fs::rename(&tmp, &self.path)?;
        debug!("saved {} fingerprint(s) to {}", fps.len(), self.path.display());
        Ok(())
    }
}
