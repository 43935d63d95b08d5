//! # NetStash — Unattended Network Configuration Backup
//!
//! Logs into heterogeneous network devices over SSH/Telnet, retrieves
//! their running configuration, and stores fingerprinted artifacts.
//!
//! Usage:
//!   netstash daemon                          # Scheduler + queue, runs until ctrl-c
//!   netstash run --all                       # Back up every enabled device now
//!   netstash run --tag core --tag edge       # Back up devices matching any tag
//!   netstash device add --hostname r1 ...    # Registry administration
//!   netstash retention apply                 # Prune old artifacts per schedule

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use netstash_core::config::NetStashConfig;
use netstash_core::traits::{AuditSink, DeviceRegistry, ScheduleStore};
use netstash_core::types::{Protocol, RunTarget, TargetMode, tags_intersect};
use netstash_runner::{BackupExecutor, JobQueue, NetworkConnector, RunDeps, Scheduler, retention};
use netstash_store::{NewDevice, NewSchedule, SqliteStore};

#[derive(Parser)]
#[command(
    name = "netstash",
    version,
    about = "🗄️ NetStash — unattended configuration backup for network devices"
)]
struct Cli {
    /// Config file (default: ~/.netstash/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler daemon until interrupted (SIGHUP reloads schedules)
    Daemon,
    /// Admit a manual backup run and wait for it to finish
    Run {
        /// Every enabled device
        #[arg(long)]
        all: bool,
        /// Enabled devices carrying any of these tags (repeatable)
        #[arg(long)]
        tag: Vec<String>,
        /// One device by id
        #[arg(long)]
        device: Option<i64>,
    },
    /// Device registry administration
    #[command(subcommand)]
    Device(DeviceCmd),
    /// Recurring schedule administration
    #[command(subcommand)]
    Schedule(ScheduleCmd),
    /// Inspect backup runs
    #[command(subcommand)]
    Job(JobCmd),
    /// Inspect stored artifacts
    #[command(subcommand)]
    Backup(BackupCmd),
    /// Artifact retention
    #[command(subcommand)]
    Retention(RetentionCmd),
    /// Configuration file management
    #[command(subcommand)]
    Config(ConfigCmd),
}

#[derive(Subcommand)]
enum DeviceCmd {
    /// Register a device
    Add {
        #[arg(long)]
        hostname: String,
        #[arg(long)]
        address: String,
        /// Free-form vendor string, e.g. "Cisco (IOS Router/Switch)"
        #[arg(long, default_value = "")]
        vendor: String,
        #[arg(long, default_value = "ssh")]
        protocol: Protocol,
        /// Defaults to the protocol's standard port
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        /// Privileged-mode (enable) secret
        #[arg(long)]
        secret: Option<String>,
        /// Comma-separated tag list
        #[arg(long, default_value = "")]
        tags: String,
    },
    /// List registered devices
    List,
    /// Delete a device (its backups are kept)
    Remove { id: i64 },
    /// Include a device in future runs
    Enable { id: i64 },
    /// Exclude a device from future runs
    Disable { id: i64 },
}

#[derive(Subcommand)]
enum ScheduleCmd {
    /// Create a recurring schedule
    Add {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "7")]
        interval_days: u32,
        /// Time-of-day anchor "HH:MM" (UTC)
        #[arg(long, default_value = "02:00")]
        run_at: String,
        #[arg(long, default_value = "all")]
        mode: TargetMode,
        /// Comma-separated tags (mode: tag)
        #[arg(long, default_value = "")]
        tags: String,
        /// Device id (mode: device)
        #[arg(long)]
        device: Option<i64>,
        /// Artifacts to keep per host when retention is applied
        #[arg(long, default_value = "10")]
        retention: u32,
    },
    /// List schedules
    List,
    /// Delete a schedule
    Remove { name: String },
    Enable { name: String },
    Disable { name: String },
}

#[derive(Subcommand)]
enum JobCmd {
    /// Most recent jobs first
    List {
        #[arg(long, default_value = "20")]
        limit: u32,
    },
    /// Full transcript of one job
    Show { id: i64 },
}

#[derive(Subcommand)]
enum BackupCmd {
    /// Stored artifacts, newest first
    List {
        /// Restrict to one device id
        #[arg(long)]
        device: Option<i64>,
    },
}

#[derive(Subcommand)]
enum RetentionCmd {
    /// Delete artifacts beyond a schedule's keep-last-N, per host
    Apply {
        #[arg(long, default_value = "weekly-all")]
        schedule: String,
    },
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Write the default config file if none exists
    Init,
    /// Print the effective configuration
    Show,
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

fn load_config(cli: &Cli) -> Result<NetStashConfig> {
    let mut config = match &cli.config {
        Some(path) => NetStashConfig::load_from(Path::new(&expand_path(path)))?,
        None => NetStashConfig::load()?,
    };
    config.backup_root = expand_path(&config.backup_root);
    config.db_path = expand_path(&config.db_path);
    Ok(config)
}

fn open_store(config: &NetStashConfig) -> Result<Arc<SqliteStore>> {
    let db_path = PathBuf::from(&config.db_path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    Ok(Arc::new(SqliteStore::open(&db_path)?))
}

fn build_queue(store: Arc<SqliteStore>, config: &NetStashConfig) -> JobQueue {
    let connector = NetworkConnector::new(config.session.clone(), config.normalizer.clone());
    JobQueue::new(RunDeps {
        registry: store.clone(),
        store: store.clone(),
        audit: store,
        executor: BackupExecutor::new(Arc::new(connector), config),
        runner_cfg: config.runner.clone(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "netstash=debug,netstash_session=debug,netstash_runner=debug,netstash_store=debug"
    } else {
        "netstash=info,netstash_runner=info,netstash_store=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = load_config(&cli)?;

    match cli.command {
        Command::Daemon => daemon(&config).await,
        Command::Run { all, tag, device } => run_now(&config, all, tag, device).await,
        Command::Device(cmd) => device_cmd(&config, cmd).await,
        Command::Schedule(cmd) => schedule_cmd(&config, cmd).await,
        Command::Job(cmd) => job_cmd(&config, cmd),
        Command::Backup(cmd) => backup_cmd(&config, cmd),
        Command::Retention(RetentionCmd::Apply { schedule }) => {
            retention_apply(&config, &schedule).await
        }
        Command::Config(ref cmd) => config_cmd(&cli, cmd),
    }
}

async fn daemon(config: &NetStashConfig) -> Result<()> {
    let store = open_store(config)?;
    let queue = build_queue(store.clone(), config);
    let mut scheduler = Scheduler::new(
        store.clone(),
        store.clone(),
        store,
        queue.clone(),
        config.scheduler.tick(),
    );
    scheduler.reload().await?;
    scheduler.start();

    println!("🗄️ NetStash v{}", env!("CARGO_PKG_VERSION"));
    println!("   🗃️ Database:    {}", config.db_path);
    println!("   📂 Backup root: {}", config.backup_root);
    for (name, fire_at) in scheduler.armed() {
        println!("   ⏰ {} → {}", name, fire_at.format("%Y-%m-%d %H:%M UTC"));
    }
    println!();

    #[cfg(unix)]
    {
        let mut hup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())?;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = hup.recv() => {
                    tracing::info!("🔁 SIGHUP — reloading schedules");
                    if let Err(e) = scheduler.reload().await {
                        tracing::error!("🛑 Reload failed: {e}");
                    }
                }
            }
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    tracing::info!("👋 Shutting down — waiting for the active run to finish");
    scheduler.stop().await;
    queue.wait_idle().await;
    Ok(())
}

async fn run_now(
    config: &NetStashConfig,
    all: bool,
    tags: Vec<String>,
    device: Option<i64>,
) -> Result<()> {
    let store = open_store(config)?;
    let targets = resolve_manual_targets(store.as_ref(), all, &tags, device).await?;
    if targets.is_empty() {
        println!("No matching enabled devices.");
        return Ok(());
    }
    println!("📡 Backing up {} device(s)...", targets.len());

    let queue = build_queue(store.clone(), config);
    let job_id = queue.submit("manual", targets).await?;
    queue.wait_idle().await;

    let job = store
        .get_job(job_id)?
        .context("job record vanished during run")?;
    println!("\nJob {} [{}] — {}", job.id, job.triggered_by, job.status);
    print!("{}", job.log);
    if job.status == netstash_core::types::JobStatus::Failed {
        bail!("run failed");
    }
    Ok(())
}

/// Manual target selection: --device picks exactly one (and refuses a
/// disabled one explicitly), otherwise enabled devices filtered by tags.
async fn resolve_manual_targets(
    store: &SqliteStore,
    all: bool,
    tags: &[String],
    device: Option<i64>,
) -> Result<Vec<RunTarget>> {
    if let Some(id) = device {
        let d = store
            .get_device(id)
            .await?
            .with_context(|| format!("no device with id {id}"))?;
        if !d.enabled {
            bail!("device {} ({}) is disabled", id, d.hostname);
        }
        return Ok(vec![RunTarget::from(&d)]);
    }
    if !all && tags.is_empty() {
        bail!("pick targets: --all, --tag <TAG>, or --device <ID>");
    }
    let wanted: Vec<String> = tags
        .iter()
        .flat_map(|t| t.split(','))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    let targets = store
        .list_devices()
        .await?
        .iter()
        .filter(|d| d.enabled)
        .filter(|d| all || tags_intersect(&d.tags, &wanted))
        .map(RunTarget::from)
        .collect();
    Ok(targets)
}

async fn device_cmd(config: &NetStashConfig, cmd: DeviceCmd) -> Result<()> {
    let store = open_store(config)?;
    match cmd {
        DeviceCmd::Add {
            hostname,
            address,
            vendor,
            protocol,
            port,
            username,
            password,
            secret,
            tags,
        } => {
            let id = store.add_device(&NewDevice {
                hostname: hostname.clone(),
                address,
                vendor,
                protocol,
                port: port.unwrap_or_else(|| protocol.default_port()),
                username,
                password,
                enable_secret: secret,
                tags: tags.split(',').map(str::to_string).collect(),
            })?;
            store
                .emit("cli", "device_create", &format!("device:{id}"), "ok")
                .await;
            println!("✅ Device {hostname} registered (id {id})");
        }
        DeviceCmd::List => {
            let devices = store.list_devices().await?;
            if devices.is_empty() {
                println!("No devices registered.");
            }
            for d in devices {
                println!(
                    "{:>4}  {:<20} {:<16} {:<8} {:<30} {}  {}",
                    d.id,
                    d.hostname,
                    d.address,
                    d.protocol.to_string(),
                    d.vendor,
                    d.tags.join(","),
                    if d.enabled { "✅" } else { "🚫" },
                );
            }
        }
        DeviceCmd::Remove { id } => {
            if store.remove_device(id)? {
                store
                    .emit("cli", "device_delete", &format!("device:{id}"), "ok")
                    .await;
                println!("🗑️ Device {id} removed (backups kept)");
            } else {
                bail!("no device with id {id}");
            }
        }
        DeviceCmd::Enable { id } => {
            if !store.set_device_enabled(id, true)? {
                bail!("no device with id {id}");
            }
            println!("✅ Device {id} enabled");
        }
        DeviceCmd::Disable { id } => {
            if !store.set_device_enabled(id, false)? {
                bail!("no device with id {id}");
            }
            println!("🚫 Device {id} disabled");
        }
    }
    Ok(())
}

async fn schedule_cmd(config: &NetStashConfig, cmd: ScheduleCmd) -> Result<()> {
    let store = open_store(config)?;
    match cmd {
        ScheduleCmd::Add {
            name,
            interval_days,
            run_at,
            mode,
            tags,
            device,
            retention,
        } => {
            if mode == TargetMode::Device && device.is_none() {
                bail!("--mode device requires --device <ID>");
            }
            store.add_schedule(&NewSchedule {
                name: name.clone(),
                interval_days,
                run_at,
                target_mode: mode,
                target_tags: tags.split(',').map(str::to_string).collect(),
                target_device: device,
                retention,
            })?;
            store
                .emit("cli", "schedule_create", &format!("schedule:{name}"), "ok")
                .await;
            println!("✅ Schedule '{name}' created (reload the daemon to arm it)");
        }
        ScheduleCmd::List => {
            for s in store.list_schedules().await? {
                let target = match s.target_mode {
                    TargetMode::All => "all devices".to_string(),
                    TargetMode::Tag => format!("tags [{}]", s.target_tags.join(",")),
                    TargetMode::Device => format!("device {}", s.target_device.unwrap_or(0)),
                };
                println!(
                    "{:>4}  {:<20} every {:>2}d at {} UTC  {:<24} keep {:>3}  {}",
                    s.id,
                    s.name,
                    s.interval_days,
                    s.run_at,
                    target,
                    s.retention,
                    if s.enabled { "✅" } else { "🚫" },
                );
            }
        }
        ScheduleCmd::Remove { name } => {
            if store.remove_schedule(&name)? {
                store
                    .emit("cli", "schedule_delete", &format!("schedule:{name}"), "ok")
                    .await;
                println!("🗑️ Schedule '{name}' removed");
            } else {
                bail!("no schedule named '{name}'");
            }
        }
        ScheduleCmd::Enable { name } => {
            if !store.set_schedule_enabled(&name, true)? {
                bail!("no schedule named '{name}'");
            }
            println!("✅ Schedule '{name}' enabled");
        }
        ScheduleCmd::Disable { name } => {
            if !store.set_schedule_enabled(&name, false)? {
                bail!("no schedule named '{name}'");
            }
            println!("🚫 Schedule '{name}' disabled");
        }
    }
    Ok(())
}

fn job_cmd(config: &NetStashConfig, cmd: JobCmd) -> Result<()> {
    let store = open_store(config)?;
    match cmd {
        JobCmd::List { limit } => {
            for j in store.list_jobs(limit)? {
                println!(
                    "{:>5}  {:<22} {:<8} {} devices  started {}",
                    j.id,
                    j.triggered_by,
                    j.status.to_string(),
                    j.devices,
                    j.started_at.format("%Y-%m-%d %H:%M:%S"),
                );
            }
        }
        JobCmd::Show { id } => {
            let job = store
                .get_job(id)?
                .with_context(|| format!("no job with id {id}"))?;
            println!("Job {} [{}] — {}", job.id, job.triggered_by, job.status);
            println!("Started:  {}", job.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
            if let Some(fin) = job.finished_at {
                println!("Finished: {}", fin.format("%Y-%m-%d %H:%M:%S UTC"));
            }
            println!();
            print!("{}", job.log);
        }
    }
    Ok(())
}

fn backup_cmd(config: &NetStashConfig, cmd: BackupCmd) -> Result<()> {
    let store = open_store(config)?;
    let BackupCmd::List { device } = cmd;
    for b in store.list_backups(device)? {
        println!(
            "{:>5}  device {:>4}  {:>8} bytes  {}  {}  {}",
            b.id,
            b.device_id,
            b.size_bytes,
            b.fingerprint,
            b.timestamp.format("%Y-%m-%d %H:%M:%S"),
            b.path,
        );
    }
    Ok(())
}

/// Group the backup root's artifacts per host (filenames are
/// `{host}_{fingerprint}.cfg`) and keep the newest N per the schedule's
/// retention count.
async fn retention_apply(config: &NetStashConfig, schedule_name: &str) -> Result<()> {
    let store = open_store(config)?;
    let schedule = store
        .get_schedule(schedule_name)?
        .with_context(|| format!("no schedule named '{schedule_name}'"))?;
    let keep = schedule.retention as usize;

    let root = PathBuf::from(&config.backup_root);
    if !root.is_dir() {
        println!("Backup root {} does not exist; nothing to prune.", root.display());
        return Ok(());
    }

    let mut per_host: HashMap<String, Vec<PathBuf>> = HashMap::new();
    for entry in std::fs::read_dir(&root)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.ends_with(".cfg") {
            continue;
        }
        let Some(host) = name.trim_end_matches(".cfg").rsplit_once('_').map(|(h, _)| h) else {
            continue;
        };
        per_host.entry(host.to_string()).or_default().push(path);
    }

    let mut total = 0;
    for (host, paths) in per_host {
        let removed = retention::prune(paths, keep);
        if removed > 0 {
            println!("🧹 {host}: removed {removed} old artifact(s)");
        }
        total += removed;
    }
    store
        .emit(
            "cli",
            "retention_apply",
            &format!("schedule:{schedule_name}"),
            &format!("{total} removed"),
        )
        .await;
    println!("Done: {total} artifact(s) removed (keeping last {keep} per host).");
    Ok(())
}

fn config_cmd(cli: &Cli, cmd: &ConfigCmd) -> Result<()> {
    match cmd {
        ConfigCmd::Init => {
            let path = NetStashConfig::default_path();
            if path.exists() {
                println!("⚠️ Config already exists at {}", path.display());
            } else {
                NetStashConfig::default().save()?;
                println!("✅ Wrote default config to {}", path.display());
            }
        }
        ConfigCmd::Show => {
            let config = load_config(cli)?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }
    Ok(())
}
