//! rsb-core: Change detection, slot rotation and safe restore for save backups
//!
//! This crate focuses on a small, well-factored surface:
//! - Save/backup enumeration over the `<root>/<world>/<save>` layout
//! - Fingerprints of tracked files and a persisted fingerprint store
//! - Fixed-capacity slot rotation with oldest-first eviction
//! - A background monitor loop and a recoverable restore protocol
//! - Pluggable tree-copy and game-activity collaborators
//!
pub mod activity;
pub mod archive;
pub mod config;
pub mod copy;
pub mod error;
pub mod fingerprint;
pub mod journal;
pub mod lock;
pub mod monitor;
pub mod restore;
pub mod rotation;
pub mod saves;

pub use activity::{ActivityProbe, ProcessProbe};
pub use config::{Config, CopyConfig};
pub use copy::{ExternalCopy, NativeCopy, TreeCopy};
pub use error::{Error, Result};
pub use fingerprint::{Fingerprint, FingerprintStore, Fingerprints, compute_signature, has_changed};
pub use monitor::{InstanceOutcome, Monitor, MonitorHandle, MonitorState, Shutdown, Stopper};
pub use restore::{RestoreReport, Restorer};
pub use rotation::{SlotInfo, choose_slot};
pub use saves::{RECOVERY_SLOT_NAME, SaveInstance, SlotEntry, SlotKind, list_save_instances, list_slots};
