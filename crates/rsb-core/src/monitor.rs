//! Background backup loop.
//!
//! While the game is active, every tick walks all save instances, compares
//! their tracked-file fingerprints with the stored ones and copies changed
//! saves into the next rotation slot. A tick runs under the backup-root lock
//! and persists each fingerprint only after its copy succeeded.

use std::cell::Cell;
use std::fs;
use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use filetime::FileTime;
use log::{debug, info, warn};

use crate::activity::ActivityProbe;
use crate::config::Config;
use crate::copy::TreeCopy;
use crate::error::Result;
use crate::fingerprint::{FingerprintStore, Fingerprints, compute_signature, has_changed};
use crate::journal::Journal;
use crate::lock::BackupLock;
use crate::rotation::{choose_slot, is_rate_limited, scan_slots};
use crate::saves::{SaveInstance, list_save_instances};

/// Lower bound for the sleep between ticks.
const MIN_POLL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Game not running; nothing is copied.
    Idle,
    Scanning,
}

/// What one tick did for one save instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceOutcome {
    Unchanged,
    /// Tracked files could not be read; retried next tick.
    Unreadable,
    /// Changed, but the newest slot is younger than the save frequency. `slot` is reserved.
    RateLimited { slot: u32 },
    BackedUp { slot: u32, code: i32 },
    CopyFailed { slot: u32, code: i32 },
}

/// Sending half of a shutdown signal. Dropping it also stops the loop.
#[derive(Debug, Clone)]
pub struct Stopper {
    tx: Sender<()>,
}

impl Stopper {
    pub fn stop(&self) { let _ = self.tx.send(()); }
}

/// Cooperative cancellation, checked between instances and used as the loop's sleep.
#[derive(Debug)]
pub struct Shutdown {
    rx: Option<Receiver<()>>,
    fired: Cell<bool>,
}

impl Shutdown {
    pub fn channel() -> (Stopper, Shutdown) {
        let (tx, rx) = mpsc::channel();
        (Stopper { tx }, Shutdown { rx: Some(rx), fired: Cell::new(false) })
    }

    /// A signal that never fires.
    pub fn never() -> Self { Shutdown { rx: None, fired: Cell::new(false) } }

    pub fn is_cancelled(&self) -> bool {
        if self.fired.get() { return true; }
        let Some(rx) = &self.rx else { return false };
        match rx.try_recv() {
            Err(TryRecvError::Empty) => false,
            Ok(()) | Err(TryRecvError::Disconnected) => {
                self.fired.set(true);
                true
            }
        }
    }

    /// Sleeps up to `d`; returns true if cancelled meanwhile.
    pub fn wait(&self, d: Duration) -> bool {
        if self.fired.get() { return true; }
        let Some(rx) = &self.rx else {
            thread::sleep(d);
            return false;
        };
        match rx.recv_timeout(d) {
            Err(RecvTimeoutError::Timeout) => false,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                self.fired.set(true);
                true
            }
        }
    }
}

pub struct Monitor {
    config: Config,
    copier: Arc<dyn TreeCopy>,
    probe: Arc<dyn ActivityProbe>,
    store: FingerprintStore,
    journal: Journal,
    state: MonitorState,
}

impl Monitor {
    pub fn new(config: Config, copier: Arc<dyn TreeCopy>, probe: Arc<dyn ActivityProbe>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store: FingerprintStore::in_backup_root(&config.backup_root),
            journal: Journal::in_backup_root(&config.backup_root),
            config,
            copier,
            probe,
            state: MonitorState::Idle,
        })
    }

    /// Builds the configured tree copy and process probe.
    pub fn from_config(config: Config) -> Result<Self> {
        let copier = config.copy.build();
        let probe: Arc<dyn ActivityProbe> = Arc::new(config.activity_probe());
        Self::new(config, copier, probe)
    }

    /// Same collaborators under a new configuration snapshot. The copier and
    /// probe are rebuilt only when their settings changed.
    pub fn with_config(self, config: Config) -> Result<Self> {
        let copier = if config.copy != self.config.copy { config.copy.build() } else { self.copier };
        let probe: Arc<dyn ActivityProbe> = if config.game_processes != self.config.game_processes {
            Arc::new(config.activity_probe())
        } else {
            self.probe
        };
        Self::new(config, copier, probe)
    }

    pub fn config(&self) -> &Config { &self.config }

    pub fn state(&self) -> MonitorState { self.state }

    pub fn store(&self) -> &FingerprintStore { &self.store }

    /// Checks the game once; ticks when it is running.
    pub fn poll(&mut self, shutdown: &Shutdown) -> Option<Result<Vec<(SaveInstance, InstanceOutcome)>>> {
        let next = if self.probe.is_game_active() { MonitorState::Scanning } else { MonitorState::Idle };
        if next != self.state {
            info!("monitor {:?} -> {:?}", self.state, next);
            self.state = next;
        }
        match self.state {
            MonitorState::Scanning => Some(self.tick(shutdown)),
            MonitorState::Idle => None,
        }
    }

    /// One pass over every save instance. Does not consult the activity probe.
    pub fn tick(&mut self, shutdown: &Shutdown) -> Result<Vec<(SaveInstance, InstanceOutcome)>> {
        let _lock = BackupLock::try_acquire(&self.config.backup_root)?;
        let mut fps = self.store.load();
        let mut out = Vec::new();
        for instance in list_save_instances(&self.config.save_root) {
            if shutdown.is_cancelled() {
                info!("monitor cancelled before {}", instance);
                break;
            }
            let outcome = self.backup_instance(&instance, &mut fps);
            out.push((instance, outcome));
        }
        Ok(out)
    }

    fn backup_instance(&self, instance: &SaveInstance, fps: &mut Fingerprints) -> InstanceOutcome {
        let cfg = &self.config;
        let live = instance.live_dir(&cfg.save_root);
        let key = instance.key();

        let current = match compute_signature(&live, &cfg.tracked_files) {
            Ok(fp) => fp,
            Err(e) => {
                warn!("{}: cannot read tracked files: {}", instance, e);
                return InstanceOutcome::Unreadable;
            }
        };
        if !has_changed(fps.get(&key), &current) {
            debug!("{}: unchanged", instance);
            return InstanceOutcome::Unchanged;
        }
        if !live.is_dir() {
            self.journal.problem(format!("{}: live directory {} is missing", instance, live.display()));
        }

        let slots = scan_slots(&cfg.backup_root, instance);
        let slot = choose_slot(&slots, cfg.save_count);
        let slot_dir = instance.slot_dir(&cfg.backup_root, slot);

        if is_rate_limited(&slots, SystemTime::now(), cfg.save_frequency()) {
            if !slot_dir.exists()
                && let Err(e) = fs::create_dir_all(&slot_dir)
            {
                warn!("{}: cannot reserve slot {}: {}", instance, slot, e);
            }
            debug!("{}: changed, newest slot younger than {:?}; slot {} reserved", instance, cfg.save_frequency(), slot);
            return InstanceOutcome::RateLimited { slot };
        }

        let code = self.copier.copy(&live, &slot_dir);
        if !cfg.copy_succeeded(code) {
            self.journal.problem(format!("{}: backup to slot {} failed, code {}", instance, slot, code));
            return InstanceOutcome::CopyFailed { slot, code };
        }
        // delta copies may leave the directory mtime alone
        if let Err(e) = filetime::set_file_mtime(&slot_dir, FileTime::now()) {
            warn!("{}: cannot stamp slot {}: {}", instance, slot, e);
        }
        self.journal.record(format!("{}: backed up to slot {}, code {}", instance, slot, code));

        fps.insert(key, current);
        if let Err(e) = self.store.save(fps) {
            self.journal.problem(format!("{}: cannot persist fingerprints: {}", instance, e));
        }
        InstanceOutcome::BackedUp { slot, code }
    }

    /// Polls until `shutdown` fires. Errors are logged, never fatal.
    pub fn run(mut self, shutdown: Shutdown) -> Self {
        info!(
            "monitor started: {} -> {}, every {:?}",
            self.config.save_root.display(),
            self.config.backup_root.display(),
            self.config.poll_interval()
        );
        while !shutdown.is_cancelled() {
            if let Some(Err(e)) = self.poll(&shutdown) {
                warn!("monitor tick skipped: {}", e);
            }
            if shutdown.wait(self.config.poll_interval().max(MIN_POLL)) {
                break;
            }
        }
        self.state = MonitorState::Idle;
        info!("monitor stopped");
        self
    }
}

/// A monitor running on its own thread.
pub struct MonitorHandle {
    stopper: Stopper,
    thread: JoinHandle<Monitor>,
}

impl MonitorHandle {
    pub fn spawn(monitor: Monitor) -> io::Result<Self> {
        let (stopper, shutdown) = Shutdown::channel();
        let thread = thread::Builder::new().name("rsb-monitor".into()).spawn(move || monitor.run(shutdown))?;
        Ok(Self { stopper, thread })
    }

    /// Signals the loop and waits for the in-flight copy, if any, to finish.
    /// `None` if the monitor thread panicked.
    pub fn stop(self) -> Option<Monitor> {
        self.stopper.stop();
        self.thread.join().ok()
    }

    /// Blocks until the loop ends on its own, without signalling it.
    pub fn wait(self) -> Option<Monitor> {
        let Self { stopper, thread } = self;
        let monitor = thread.join().ok();
        drop(stopper);
        monitor
    }

    /// Stops the loop, rebuilds it from `config` and starts it again.
    pub fn restart(self, config: Config) -> Result<Self> {
        let monitor = match self.stop() {
            Some(old) => old.with_config(config)?,
            None => Monitor::from_config(config)?,
        };
        Ok(Self::spawn(monitor)?)
    }
}
