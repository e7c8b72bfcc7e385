use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use filetime::FileTime;
use log::{debug, warn};
use walkdir::WalkDir;

// Result codes, robocopy style: bits below 8 are success flags.
pub const CODE_NOTHING: i32 = 0;
pub const CODE_COPIED: i32 = 1;
pub const CODE_EXTRAS: i32 = 2;
pub const CODE_FAILED: i32 = 8;
pub const CODE_FATAL: i32 = 16;

pub const DEFAULT_FAILURE_THRESHOLD: i32 = CODE_FAILED;

/// Bulk directory copy. Blocking; creates `dst` when absent.
pub trait TreeCopy: Send + Sync {
    fn copy(&self, src: &Path, dst: &Path) -> i32;
}

/// In-process mirror copy. Unchanged files (same size and mtime) are skipped;
/// a missing source leaves `dst` empty.
#[derive(Debug, Clone)]
pub struct NativeCopy {
    threads: usize,
}

impl Default for NativeCopy {
    fn default() -> Self { Self { threads: 4 } }
}

impl NativeCopy {
    pub fn new(threads: usize) -> Self { Self { threads: threads.max(1) } }
}

fn up_to_date(src: &fs::Metadata, dst: &Path) -> bool {
    match fs::metadata(dst) {
        Ok(d) => {
            d.is_file()
                && d.len() == src.len()
                && FileTime::from_last_modification_time(&d) == FileTime::from_last_modification_time(src)
        }
        Err(_) => false,
    }
}

fn copy_file(src: &Path, dst: &Path) -> io::Result<()> {
    let meta = fs::metadata(src)?;
    fs::copy(src, dst)?;
    filetime::set_file_mtime(dst, FileTime::from_last_modification_time(&meta))
}

fn remove_entry(p: &Path) -> io::Result<()> {
    if fs::symlink_metadata(p)?.is_dir() { fs::remove_dir_all(p) } else { fs::remove_file(p) }
}

type SourceTree = (HashSet<PathBuf>, Vec<(PathBuf, fs::Metadata)>, usize);

/// Relative directories and files under `src`, plus the number of entries that could not be read.
fn scan_source(src: &Path) -> SourceTree {
    let mut failed = 0usize;
    let mut dirs = HashSet::new();
    let mut files = Vec::new();
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("walk {}: {}", src.display(), e);
                failed += 1;
                continue;
            }
        };
        let Ok(rel) = entry.path().strip_prefix(src) else { continue };
        if entry.file_type().is_dir() {
            dirs.insert(rel.to_path_buf());
        } else {
            match entry.metadata() {
                Ok(m) => files.push((rel.to_path_buf(), m)),
                Err(e) => {
                    warn!("stat {}: {}", entry.path().display(), e);
                    failed += 1;
                }
            }
        }
    }
    (dirs, files, failed)
}

impl TreeCopy for NativeCopy {
    fn copy(&self, src: &Path, dst: &Path) -> i32 {
        if let Err(e) = fs::create_dir_all(dst) {
            warn!("cannot create {}: {}", dst.display(), e);
            return CODE_FATAL;
        }

        let (dirs, files, mut failed) = if src.is_dir() {
            scan_source(src)
        } else {
            // mirrors as an empty source
            warn!("copy source {} is missing; emptying target", src.display());
            (HashSet::new(), Vec::new(), 0)
        };
        let file_set: HashSet<&Path> = files.iter().map(|(p, _)| p.as_path()).collect();

        // Mirror: drop anything in dst that src no longer has (or has as another type).
        let mut extras = 0usize;
        let mut stale = Vec::new();
        let mut walker = WalkDir::new(dst).min_depth(1).into_iter();
        while let Some(entry) = walker.next() {
            let Ok(entry) = entry else { continue };
            let Ok(rel) = entry.path().strip_prefix(dst) else { continue };
            let keep = if entry.file_type().is_dir() { dirs.contains(rel) } else { file_set.contains(rel) };
            if !keep {
                stale.push(entry.path().to_path_buf());
                if entry.file_type().is_dir() { walker.skip_current_dir(); }
            }
        }
        for p in stale {
            match remove_entry(&p) {
                Ok(()) => extras += 1,
                Err(e) => {
                    warn!("cannot remove extra {}: {}", p.display(), e);
                    failed += 1;
                }
            }
        }

        let mut dir_list: Vec<&PathBuf> = dirs.iter().collect();
        dir_list.sort();
        for rel in dir_list {
            if let Err(e) = fs::create_dir_all(dst.join(rel)) {
                warn!("cannot create {}: {}", dst.join(rel).display(), e);
                failed += 1;
            }
        }

        let pending: Vec<&PathBuf> =
            files.iter().filter(|(rel, meta)| !up_to_date(meta, &dst.join(rel))).map(|(rel, _)| rel).collect();
        let copied = AtomicUsize::new(0);
        let copy_failures = AtomicUsize::new(0);
        if !pending.is_empty() {
            let chunk = pending.len().div_ceil(self.threads).max(1);
            thread::scope(|s| {
                for part in pending.chunks(chunk) {
                    let (copied, copy_failures) = (&copied, &copy_failures);
                    s.spawn(move || {
                        for rel in part {
                            match copy_file(&src.join(rel), &dst.join(rel)) {
                                Ok(()) => {
                                    copied.fetch_add(1, Ordering::Relaxed);
                                }
                                Err(e) => {
                                    warn!("copy {}: {}", src.join(rel).display(), e);
                                    copy_failures.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                        }
                    });
                }
            });
        }
        let copied = copied.into_inner();
        failed += copy_failures.into_inner();
        debug!(
            "{} -> {}: {} copied, {} unchanged, {} extra removed, {} failed",
            src.display(),
            dst.display(),
            copied,
            files.len() - pending.len(),
            extras,
            failed
        );

        let mut code = CODE_NOTHING;
        if copied > 0 { code |= CODE_COPIED; }
        if extras > 0 { code |= CODE_EXTRAS; }
        if failed > 0 { code |= CODE_FAILED; }
        code
    }
}

/// Runs an external copy program, e.g. `robocopy {src} {dst} /MIR /MT:8`.
///
/// `{src}` and `{dst}` inside arguments are replaced with the paths; the exit
/// code is the result code.
#[derive(Debug, Clone)]
pub struct ExternalCopy {
    program: String,
    args: Vec<String>,
}

impl ExternalCopy {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self { Self { program: program.into(), args } }
}

impl TreeCopy for ExternalCopy {
    fn copy(&self, src: &Path, dst: &Path) -> i32 {
        if let Err(e) = fs::create_dir_all(dst) {
            warn!("cannot create {}: {}", dst.display(), e);
            return CODE_FATAL;
        }
        let (s, d) = (src.to_string_lossy(), dst.to_string_lossy());
        let args: Vec<String> = self.args.iter().map(|a| a.replace("{src}", &s).replace("{dst}", &d)).collect();
        match Command::new(&self.program).args(&args).status() {
            Ok(status) => status.code().unwrap_or(CODE_FATAL),
            Err(e) => {
                warn!("cannot run {}: {}", self.program, e);
                CODE_FATAL
            }
        }
    }
}
