use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use filetime::{FileTime, set_file_mtime};
use rsb_core::lock::BackupLock;
use rsb_core::{
    ActivityProbe, Config, Error, FingerprintStore, InstanceOutcome, Monitor, MonitorHandle, MonitorState,
    NativeCopy, SaveInstance, Shutdown, TreeCopy,
};

struct Env {
    _dir: tempfile::TempDir,
    save_root: PathBuf,
    backup_root: PathBuf,
}

fn env() -> Env {
    let dir = tempfile::tempdir().unwrap();
    let save_root = dir.path().join("saves");
    let backup_root = dir.path().join("backups");
    fs::create_dir_all(save_root.join("w/s")).unwrap();
    fs::write(save_root.join("w/s/a.bin"), "a1").unwrap();
    fs::write(save_root.join("w/s/b.bin"), "b1").unwrap();
    Env { _dir: dir, save_root, backup_root }
}

fn config(env: &Env, save_count: u32, frequency_minutes: u64) -> Config {
    Config {
        save_root: env.save_root.clone(),
        backup_root: env.backup_root.clone(),
        save_frequency_minutes: frequency_minutes,
        save_count,
        tracked_files: vec!["a.bin".into(), "b.bin".into()],
        ..Config::default()
    }
}

fn always_active() -> Arc<dyn ActivityProbe> { Arc::new(|| true) }

fn native() -> Arc<dyn TreeCopy> { Arc::new(NativeCopy::default()) }

fn age(p: &Path, secs_ago: u64) {
    let t = SystemTime::now() - Duration::from_secs(secs_ago);
    set_file_mtime(p, FileTime::from_system_time(t)).unwrap();
}

fn slot_dirs(backup_root: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(backup_root.join("w/s"))
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn only_outcome(res: rsb_core::Result<Vec<(SaveInstance, InstanceOutcome)>>) -> InstanceOutcome {
    let mut v = res.unwrap();
    assert_eq!(v.len(), 1);
    v.remove(0).1
}

/// Fails every copy after creating the target, like a copy tool that gave up.
struct FailingCopy {
    code: i32,
    calls: AtomicUsize,
}

impl TreeCopy for FailingCopy {
    fn copy(&self, _src: &Path, dst: &Path) -> i32 {
        self.calls.fetch_add(1, Ordering::SeqCst);
        fs::create_dir_all(dst).unwrap();
        self.code
    }
}

#[test]
fn four_cycle_rotation_scenario() {
    let env = env();
    let mut m = Monitor::new(config(&env, 2, 0), native(), always_active()).unwrap();
    let never = Shutdown::never();
    let live = env.save_root.join("w/s");
    age(&live.join("a.bin"), 1000);
    age(&live.join("b.bin"), 1000);

    // 1: both files new
    assert_eq!(only_outcome(m.tick(&never)), InstanceOutcome::BackedUp { slot: 1, code: 1 });
    assert!(m.store().load().contains_key("w/s"));
    assert_eq!(fs::read_to_string(env.backup_root.join("w/s/1/a.bin")).unwrap(), "a1");

    // 2: only b.bin changed, capacity not reached
    fs::write(live.join("b.bin"), "b2").unwrap();
    age(&live.join("b.bin"), 500);
    assert!(matches!(only_outcome(m.tick(&never)), InstanceOutcome::BackedUp { slot: 2, .. }));
    assert_eq!(fs::read_to_string(env.backup_root.join("w/s/2/b.bin")).unwrap(), "b2");

    // 3: nothing changed
    let stored = m.store().load();
    assert_eq!(only_outcome(m.tick(&never)), InstanceOutcome::Unchanged);
    assert_eq!(m.store().load(), stored);

    // 4: capacity reached, oldest slot is overwritten
    age(&env.backup_root.join("w/s/1"), 300);
    age(&env.backup_root.join("w/s/2"), 200);
    fs::write(live.join("a.bin"), "a3").unwrap();
    age(&live.join("a.bin"), 100);
    assert!(matches!(only_outcome(m.tick(&never)), InstanceOutcome::BackedUp { slot: 1, .. }));
    assert_eq!(fs::read_to_string(env.backup_root.join("w/s/1/a.bin")).unwrap(), "a3");
    assert_eq!(fs::read_to_string(env.backup_root.join("w/s/2/a.bin")).unwrap(), "a1");
    assert_eq!(slot_dirs(&env.backup_root), vec!["1", "2"]);
}

#[test]
fn rotation_never_exceeds_capacity() {
    let env = env();
    let mut m = Monitor::new(config(&env, 3, 0), native(), always_active()).unwrap();
    let live = env.save_root.join("w/s/a.bin");
    for i in 0..8u64 {
        fs::write(&live, format!("rev {}", i)).unwrap();
        age(&live, 10_000 - i * 10);
        let InstanceOutcome::BackedUp { slot, .. } = only_outcome(m.tick(&Shutdown::never())) else {
            panic!("cycle {} did not back up", i);
        };
        // strictly increasing slot ages so eviction order is well defined
        let written = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000 + i);
        set_file_mtime(env.backup_root.join("w/s").join(slot.to_string()), FileTime::from_system_time(written)).unwrap();
        // round robin once full
        assert_eq!(slot, (i % 3) as u32 + 1);
    }
    assert_eq!(slot_dirs(&env.backup_root), vec!["1", "2", "3"]);
}

#[test]
fn failed_copy_keeps_fingerprint_and_retries() {
    let env = env();
    let failing = Arc::new(FailingCopy { code: 8, calls: AtomicUsize::new(0) });
    let mut m = Monitor::new(config(&env, 2, 0), failing.clone(), always_active()).unwrap();
    assert_eq!(only_outcome(m.tick(&Shutdown::never())), InstanceOutcome::CopyFailed { slot: 1, code: 8 });
    assert!(m.store().load().is_empty());

    // still considered changed on the next cycle
    assert_eq!(only_outcome(m.tick(&Shutdown::never())), InstanceOutcome::CopyFailed { slot: 1, code: 8 });
    assert_eq!(failing.calls.load(Ordering::SeqCst), 2);

    let mut m = Monitor::new(config(&env, 2, 0), native(), always_active()).unwrap();
    assert!(matches!(only_outcome(m.tick(&Shutdown::never())), InstanceOutcome::BackedUp { slot: 1, .. }));
    assert!(m.store().load().contains_key("w/s"));
}

#[test]
fn rate_limit_reserves_slot_and_skips_copy() {
    let env = env();
    let mut m = Monitor::new(config(&env, 3, 60), native(), always_active()).unwrap();
    let live = env.save_root.join("w/s/a.bin");
    age(&live, 1000);
    assert!(matches!(only_outcome(m.tick(&Shutdown::never())), InstanceOutcome::BackedUp { slot: 1, .. }));
    let first = m.store().load();

    fs::write(&live, "a2").unwrap();
    age(&live, 10);
    assert_eq!(only_outcome(m.tick(&Shutdown::never())), InstanceOutcome::RateLimited { slot: 2 });
    let reserved = env.backup_root.join("w/s/2");
    assert!(reserved.is_dir());
    assert_eq!(fs::read_dir(&reserved).unwrap().count(), 0);
    assert_eq!(m.store().load(), first);

    // newest filled slot is old enough now; the reserved slot gets filled
    age(&env.backup_root.join("w/s/1"), 2 * 3600);
    assert!(matches!(only_outcome(m.tick(&Shutdown::never())), InstanceOutcome::BackedUp { slot: 2, .. }));
    assert_eq!(fs::read_to_string(reserved.join("a.bin")).unwrap(), "a2");
}

#[test]
fn missing_tracked_files_still_back_up() {
    let env = env();
    fs::create_dir_all(env.save_root.join("w/empty")).unwrap();
    let mut m = Monitor::new(config(&env, 2, 0), native(), always_active()).unwrap();
    let outcomes = m.tick(&Shutdown::never()).unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|(_, o)| matches!(o, InstanceOutcome::BackedUp { slot: 1, .. })));
    assert!(env.backup_root.join("w/empty/1").is_dir());
    let again = m.tick(&Shutdown::never()).unwrap();
    assert!(again.iter().all(|(_, o)| *o == InstanceOutcome::Unchanged));
}

#[test]
fn tick_is_skipped_while_backup_root_is_locked() {
    let env = env();
    let mut m = Monitor::new(config(&env, 2, 0), native(), always_active()).unwrap();
    let held = BackupLock::try_acquire(&env.backup_root).unwrap();
    assert!(matches!(m.tick(&Shutdown::never()), Err(Error::Locked(_))));
    assert!(!env.backup_root.join("w/s/1").exists());
    drop(held);
    assert!(matches!(only_outcome(m.tick(&Shutdown::never())), InstanceOutcome::BackedUp { .. }));
}

#[test]
fn poll_only_scans_while_game_is_active() {
    let env = env();
    let active = Arc::new(AtomicBool::new(false));
    let flag = active.clone();
    let probe: Arc<dyn ActivityProbe> = Arc::new(move || flag.load(Ordering::SeqCst));
    let mut m = Monitor::new(config(&env, 2, 0), native(), probe).unwrap();

    assert!(m.poll(&Shutdown::never()).is_none());
    assert_eq!(m.state(), MonitorState::Idle);
    assert!(!env.backup_root.join("w/s/1").exists());

    active.store(true, Ordering::SeqCst);
    assert!(m.poll(&Shutdown::never()).unwrap().is_ok());
    assert_eq!(m.state(), MonitorState::Scanning);
    assert!(env.backup_root.join("w/s/1/a.bin").exists());

    active.store(false, Ordering::SeqCst);
    assert!(m.poll(&Shutdown::never()).is_none());
    assert_eq!(m.state(), MonitorState::Idle);
}

#[test]
fn cancelled_tick_stops_between_instances() {
    let env = env();
    fs::create_dir_all(env.save_root.join("w/t")).unwrap();
    let mut m = Monitor::new(config(&env, 2, 0), native(), always_active()).unwrap();
    let (stopper, shutdown) = Shutdown::channel();
    stopper.stop();
    assert!(m.tick(&shutdown).unwrap().is_empty());
    assert!(shutdown.is_cancelled());
    assert!(shutdown.wait(Duration::from_secs(60)));
}

#[test]
fn dropping_the_stopper_cancels() {
    let (stopper, shutdown) = Shutdown::channel();
    assert!(!shutdown.is_cancelled());
    assert!(!shutdown.wait(Duration::from_millis(10)));
    drop(stopper);
    assert!(shutdown.is_cancelled());
    assert!(!Shutdown::never().is_cancelled());
}

fn wait_for(p: &Path) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !p.exists() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", p.display());
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn restart_swaps_in_a_new_config() {
    let env = env();
    let mut first = config(&env, 2, 0);
    first.poll_interval_minutes = Some(60);
    let handle = MonitorHandle::spawn(Monitor::new(first.clone(), native(), always_active()).unwrap()).unwrap();
    wait_for(&env.backup_root.join("w/s/1/a.bin"));

    let other_root = env.backup_root.with_file_name("backups-2");
    let second = Config { backup_root: other_root.clone(), ..first };
    let handle = handle.restart(second).unwrap();
    wait_for(&other_root.join("w/s/1/a.bin"));

    let m = handle.stop().unwrap();
    assert_eq!(m.config().backup_root, other_root);
    assert_eq!(m.state(), MonitorState::Idle);
    assert!(FingerprintStore::in_backup_root(&other_root).load().contains_key("w/s"));
}
