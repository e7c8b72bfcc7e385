use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Directory name of the per-instance recovery slot.
pub const RECOVERY_SLOT_NAME: &str = "latest recovered";

/// A `(world, save)` pair discovered under the save root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SaveInstance {
    pub world: String,
    pub save: String,
}

impl SaveInstance {
    pub fn new(world: impl Into<String>, save: impl Into<String>) -> Self {
        Self { world: world.into(), save: save.into() }
    }

    /// Fingerprint store key, `"world/save"`.
    pub fn key(&self) -> String { format!("{}/{}", self.world, self.save) }

    pub fn live_dir(&self, save_root: &Path) -> PathBuf { save_root.join(&self.world).join(&self.save) }

    pub fn backup_dir(&self, backup_root: &Path) -> PathBuf { backup_root.join(&self.world).join(&self.save) }

    pub fn slot_dir(&self, backup_root: &Path, index: u32) -> PathBuf {
        self.backup_dir(backup_root).join(index.to_string())
    }

    pub fn recovery_dir(&self, backup_root: &Path) -> PathBuf {
        self.backup_dir(backup_root).join(RECOVERY_SLOT_NAME)
    }
}

impl fmt::Display for SaveInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}/{}", self.world, self.save) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Recovery,
    Numbered(u32),
}

/// One backup slot as shown to an operator.
#[derive(Debug, Clone)]
pub struct SlotEntry {
    pub kind: SlotKind,
    pub label: String,
    pub path: PathBuf,
    pub modified: Option<SystemTime>,
}

fn subdirs(dir: &Path) -> Vec<(String, PathBuf)> {
    let mut out = Vec::new();
    if let Ok(rd) = fs::read_dir(dir) {
        for e in rd.flatten() {
            let p = e.path();
            if !p.is_dir() { continue; }
            if let Some(name) = p.file_name().and_then(|s| s.to_str()) { out.push((name.to_string(), p)); }
        }
    }
    out.sort(); out
}

fn dir_mtime(p: &Path) -> Option<SystemTime> { fs::metadata(p).and_then(|m| m.modified()).ok() }

/// Parses a rotation slot directory name. Index 0 is reserved for the restore placeholder.
pub fn parse_slot_index(name: &str) -> Option<u32> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) { return None; }
    name.parse::<u32>().ok().filter(|&n| n >= 1)
}

/// Worlds are the immediate subdirectories of `save_root`, saves are theirs. Nothing deeper.
pub fn list_save_instances(save_root: &Path) -> Vec<SaveInstance> {
    let mut out = Vec::new();
    for (world, wpath) in subdirs(save_root) {
        for (save, _) in subdirs(&wpath) {
            out.push(SaveInstance::new(world.clone(), save));
        }
    }
    out
}

/// Numbered slots of an instance with their mtimes, in index order.
pub fn numbered_slots(backup_root: &Path, instance: &SaveInstance) -> Vec<(u32, PathBuf)> {
    let mut out: Vec<(u32, PathBuf)> = subdirs(&instance.backup_dir(backup_root))
        .into_iter()
        .filter_map(|(name, p)| parse_slot_index(&name).map(|n| (n, p)))
        .collect();
    out.sort_by_key(|(n, _)| *n);
    out
}

/// Recovery slot first (if any), then numbered slots newest first.
pub fn list_slots(backup_root: &Path, instance: &SaveInstance) -> Vec<SlotEntry> {
    let mut out = Vec::new();
    let recovery = instance.recovery_dir(backup_root);
    if recovery.is_dir() {
        out.push(SlotEntry {
            kind: SlotKind::Recovery,
            label: RECOVERY_SLOT_NAME.to_string(),
            modified: dir_mtime(&recovery),
            path: recovery,
        });
    }
    let mut numbered: Vec<SlotEntry> = numbered_slots(backup_root, instance)
        .into_iter()
        .map(|(n, p)| SlotEntry { kind: SlotKind::Numbered(n), label: n.to_string(), modified: dir_mtime(&p), path: p })
        .collect();
    // newest first, lower index on equal mtime
    numbered.sort_by(|a, b| {
        b.modified.cmp(&a.modified).then_with(|| match (a.kind, b.kind) {
            (SlotKind::Numbered(x), SlotKind::Numbered(y)) => x.cmp(&y),
            _ => std::cmp::Ordering::Equal,
        })
    });
    out.extend(numbered);
    out
}

/// Resolves an operator's slot choice (`latest`, the recovery label, or an index).
pub fn resolve_slot(backup_root: &Path, instance: &SaveInstance, choice: &str) -> Option<PathBuf> {
    let choice = choice.trim();
    if choice.eq_ignore_ascii_case("latest") || choice == RECOVERY_SLOT_NAME {
        return Some(instance.recovery_dir(backup_root));
    }
    parse_slot_index(choice).map(|n| instance.slot_dir(backup_root, n))
}
