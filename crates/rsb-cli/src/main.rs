use anyhow::{Context, Result, bail};
use clap::{Args as ClapArgs, Parser, Subcommand};
use rsb_core::monitor::InstanceOutcome;
use rsb_core::saves::resolve_slot;
use rsb_core::{Monitor, MonitorHandle, Restorer, SaveInstance, Shutdown};
use std::io::BufRead;
use std::path::{Path, PathBuf};

mod config;

#[derive(Parser, Debug)]
#[command(
    name = "rsb",
    about = "Rotating backups of game saves with recoverable restore",
    version
)]
struct Cli {
    /// Config file (defaults to <config dir>/rsb/config.toml)
    #[arg(long, global = true, value_name = "TOML")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the backup monitor until `q`; `r` reloads the config
    Watch,
    /// Run one backup pass now, whether or not the game is running
    Backup,
    /// List saves and their backup slots
    List,
    /// Restore a slot into the live save (game must not be running)
    Restore(SlotArgs),
    /// Zip a slot for safekeeping
    Archive(ArchiveArgs),
    /// Write a default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

#[derive(ClapArgs, Debug)]
struct SlotArgs {
    world: String,
    save: String,
    /// Slot number, or `latest` for the recovery slot
    slot: String,
}

#[derive(ClapArgs, Debug)]
struct ArchiveArgs {
    #[command(flatten)]
    slot: SlotArgs,
    /// Output directory (defaults to <backup root>/archives)
    #[arg(long, value_name = "DIR")]
    out: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let res = config::resolve_path(cli.config.as_deref()).and_then(|path| match cli.cmd.unwrap_or(Cmd::List) {
        Cmd::Watch => cmd_watch(&path),
        Cmd::Backup => cmd_backup(&path),
        Cmd::List => cmd_list(&path),
        Cmd::Restore(a) => cmd_restore(&path, a),
        Cmd::Archive(a) => cmd_archive(&path, a),
        Cmd::InitConfig { force } => cmd_init_config(&path, force),
    });
    if let Err(e) = res {
        eprintln!("error: {:#}", e);
        std::process::exit(2);
    }
}

fn cmd_watch(config_path: &Path) -> Result<()> {
    let cfg = config::load(config_path)?;
    let handle = MonitorHandle::spawn(Monitor::from_config(cfg)?).context("Failed to start monitor")?;
    eprintln!("monitoring; enter `r` to reload {}, `q` to quit", config_path.display());
    let stdin = std::io::stdin();
    let stopped = match drive(handle, stdin.lock(), || config::load(config_path))? {
        None => true,
        // no console (service, redirected stdin): keep watching until killed
        Some(handle) => {
            eprintln!("input closed; monitoring continues");
            handle.wait().is_some()
        }
    };
    if !stopped {
        bail!("monitor thread panicked");
    }
    Ok(())
}

/// Feeds console commands to a running monitor. Returns the still-running
/// handle when `input` ends, `None` once `q` stopped the monitor.
fn drive<R: BufRead>(
    mut handle: MonitorHandle,
    input: R,
    mut reload: impl FnMut() -> Result<rsb_core::Config>,
) -> Result<Option<MonitorHandle>> {
    for line in input.lines() {
        let line = line.context("Failed to read stdin")?;
        match line.trim() {
            "q" | "quit" => {
                if handle.stop().is_none() {
                    bail!("monitor thread panicked");
                }
                return Ok(None);
            }
            "r" | "reload" => match reload() {
                Ok(cfg) => {
                    handle = handle.restart(cfg).context("Failed to restart monitor")?;
                    eprintln!("monitor restarted with reloaded config");
                }
                Err(e) => eprintln!("keeping previous config: {:#}", e),
            },
            "" => {}
            other => eprintln!("unknown input {:?}", other),
        }
    }
    Ok(Some(handle))
}

fn cmd_backup(config_path: &Path) -> Result<()> {
    let cfg = config::load(config_path)?;
    let mut monitor = Monitor::from_config(cfg)?;
    let outcomes = monitor.tick(&Shutdown::never())?;
    if outcomes.is_empty() {
        println!("no saves found under {}", monitor.config().save_root.display());
    }
    for (instance, outcome) in outcomes {
        let what = match outcome {
            InstanceOutcome::Unchanged => "unchanged".to_string(),
            InstanceOutcome::Unreadable => "unreadable, skipped".to_string(),
            InstanceOutcome::RateLimited { slot } => format!("changed, too soon (slot {} reserved)", slot),
            InstanceOutcome::BackedUp { slot, code } => format!("backed up to slot {} (code {})", slot, code),
            InstanceOutcome::CopyFailed { slot, code } => format!("FAILED to back up to slot {} (code {})", slot, code),
        };
        println!("{}\t{}", instance, what);
    }
    Ok(())
}

fn cmd_list(config_path: &Path) -> Result<()> {
    let cfg = config::load(config_path)?;
    let instances = rsb_core::list_save_instances(&cfg.save_root);
    if instances.is_empty() {
        println!("no saves found under {}", cfg.save_root.display());
    }
    for instance in instances {
        println!("{}", instance);
        for slot in rsb_core::list_slots(&cfg.backup_root, &instance) {
            let when = slot
                .modified
                .map(|t| chrono::DateTime::<chrono::Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "?".into());
            println!("\t{}\t{}", slot.label, when);
        }
    }
    Ok(())
}

fn slot_path(cfg: &rsb_core::Config, args: &SlotArgs) -> Result<(SaveInstance, PathBuf)> {
    let instance = SaveInstance::new(args.world.clone(), args.save.clone());
    let Some(path) = resolve_slot(&cfg.backup_root, &instance, &args.slot) else {
        bail!("invalid slot {:?}; use a slot number or `latest`", args.slot);
    };
    Ok((instance, path))
}

fn cmd_restore(config_path: &Path, args: SlotArgs) -> Result<()> {
    let cfg = config::load(config_path)?;
    let (instance, path) = slot_path(&cfg, &args)?;
    let restorer = Restorer::from_config(cfg)?;
    let report = restorer
        .restore(&instance, &path)
        .with_context(|| format!("Failed to restore {} from {}", instance, path.display()))?;
    if report.recovery_written {
        println!("restored {} from slot {}; previous live save kept as `latest recovered`", instance, args.slot);
    } else {
        println!("restored {} from slot {}", instance, args.slot);
    }
    Ok(())
}

fn cmd_archive(config_path: &Path, args: ArchiveArgs) -> Result<()> {
    let cfg = config::load(config_path)?;
    let (instance, path) = slot_path(&cfg, &args.slot)?;
    let out = args.out.unwrap_or_else(|| cfg.backup_root.join("archives"));
    let zip = rsb_core::archive::archive_slot(&instance, &path, &out)
        .with_context(|| format!("Failed to archive {}", path.display()))?;
    println!("{}", zip.display());
    Ok(())
}

fn cmd_init_config(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", config_path.display());
    }
    config::save(config_path, &rsb_core::Config::default())?;
    println!("{}", config_path.display());
    Ok(())
}
