use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::saves::{SaveInstance, numbered_slots};

/// Rotation input for one numbered slot. `modified` is `None` for a reserved,
/// still empty slot directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotInfo {
    pub index: u32,
    pub modified: Option<SystemTime>,
}

impl SlotInfo {
    pub fn filled(index: u32, modified: SystemTime) -> Self { Self { index, modified: Some(modified) } }

    pub fn reserved(index: u32) -> Self { Self { index, modified: None } }
}

/// Picks the slot to write next.
///
/// In order: the lowest reserved empty slot, the lowest free index while the
/// instance holds fewer than `capacity` slots, the slot with the oldest mtime
/// (lowest index on ties). Slots numbered above `capacity` are never chosen.
pub fn choose_slot(slots: &[SlotInfo], capacity: u32) -> u32 {
    let capacity = capacity.max(1);
    let mut in_range: Vec<SlotInfo> = slots.iter().copied().filter(|s| (1..=capacity).contains(&s.index)).collect();
    in_range.sort_by_key(|s| s.index);
    in_range.dedup_by_key(|s| s.index);

    if let Some(s) = in_range.iter().find(|s| s.modified.is_none()) {
        return s.index;
    }
    if (in_range.len() as u32) < capacity {
        let mut next = 1;
        for s in &in_range {
            if s.index != next { break; }
            next += 1;
        }
        return next;
    }
    in_range
        .iter()
        .min_by(|a, b| a.modified.cmp(&b.modified).then(a.index.cmp(&b.index)))
        .map(|s| s.index)
        .unwrap_or(1)
}

/// Newest write time across filled slots.
pub fn newest_write(slots: &[SlotInfo]) -> Option<SystemTime> { slots.iter().filter_map(|s| s.modified).max() }

/// True while the newest filled slot is younger than `frequency`.
pub fn is_rate_limited(slots: &[SlotInfo], now: SystemTime, frequency: Duration) -> bool {
    match newest_write(slots) {
        Some(newest) => now.duration_since(newest).unwrap_or(Duration::ZERO) < frequency,
        None => false,
    }
}

fn is_empty_dir(p: &Path) -> bool { fs::read_dir(p).map(|mut rd| rd.next().is_none()).unwrap_or(false) }

/// Reads the numbered slots of `instance` from disk as rotation input.
pub fn scan_slots(backup_root: &Path, instance: &SaveInstance) -> Vec<SlotInfo> {
    numbered_slots(backup_root, instance)
        .into_iter()
        .map(|(index, p)| {
            if is_empty_dir(&p) { return SlotInfo::reserved(index); }
            match fs::metadata(&p).and_then(|m| m.modified()) {
                Ok(t) => SlotInfo::filled(index, t),
                // unreadable slot: oldest possible, first to be replaced
                Err(_) => SlotInfo::filled(index, SystemTime::UNIX_EPOCH),
            }
        })
        .collect()
}
