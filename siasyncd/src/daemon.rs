use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use sia_core::SiaClient;
use tokio::sync::mpsc;

use crate::sync::engine::{EngineConfig, SyncEngine};
use crate::sync::retry::{DaemonProbeRecovery, RetryPolicy, run_with_recovery};
use crate::sync::scheduler::{SyncTask, TaskQueue, WorkerPool, spawn_periodic};
use crate::sync::store::RecordStore;
use crate::sync::watcher::{ChangeTracker, WatchEvent, start_notify_watcher};

const DEFAULT_SYNC_DIR_NAME: &str = "Sia Sync";
const DEFAULT_REMOTE_ROOT: &str = "sync";
const DEFAULT_SCAN_SECS: u64 = 30;
const DEFAULT_POLL_SECS: u64 = 5;
const DEFAULT_QUIET_MS: u64 = 1000;
const DEFAULT_TICK_MS: u64 = 250;
const DEFAULT_WORKERS: u64 = 4;
const DEFAULT_DATA_PIECES: u64 = 10;
const DEFAULT_PARITY_PIECES: u64 = 20;
const DB_FILE_NAME: &str = "siasync.db";

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub sync_root: PathBuf,
    pub data_root: PathBuf,
    pub api_addr: Option<String>,
    pub api_password: Option<String>,
    pub remote_root: String,
    pub scan_interval: Duration,
    pub poll_interval: Duration,
    pub quiet_period: Duration,
    pub tick_interval: Duration,
    pub workers: usize,
    pub data_pieces: u32,
    pub parity_pieces: u32,
    pub conflict_user: String,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        let default_sync = home.join(DEFAULT_SYNC_DIR_NAME);
        let sync_root = std::env::var("SIASYNC_DIR")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or(default_sync);
        let data_root = std::env::var("SIASYNC_DATA_DIR")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(default_data_root);
        let api_addr = std::env::var("SIASYNC_API_ADDR").ok();
        let api_password = std::env::var("SIASYNC_API_PASSWORD").ok();
        let remote_root =
            std::env::var("SIASYNC_REMOTE_ROOT").unwrap_or_else(|_| DEFAULT_REMOTE_ROOT.to_string());
        let scan_interval =
            Duration::from_secs(read_u64_env("SIASYNC_SCAN_SECS", DEFAULT_SCAN_SECS));
        let poll_interval =
            Duration::from_secs(read_u64_env("SIASYNC_POLL_SECS", DEFAULT_POLL_SECS));
        let quiet_period = Duration::from_millis(read_u64_env("SIASYNC_QUIET_MS", DEFAULT_QUIET_MS));
        let tick_interval = Duration::from_millis(read_u64_env("SIASYNC_TICK_MS", DEFAULT_TICK_MS));
        let workers = read_u64_env("SIASYNC_WORKERS", DEFAULT_WORKERS) as usize;
        let data_pieces = read_u64_env("SIASYNC_DATA_PIECES", DEFAULT_DATA_PIECES) as u32;
        let parity_pieces = read_u64_env("SIASYNC_PARITY_PIECES", DEFAULT_PARITY_PIECES) as u32;
        let conflict_user = std::env::var("SIASYNC_CONFLICT_USER")
            .or_else(|_| std::env::var("USER"))
            .unwrap_or_else(|_| "local".to_string());

        Ok(Self {
            sync_root,
            data_root,
            api_addr,
            api_password,
            remote_root,
            scan_interval,
            poll_interval,
            quiet_period,
            tick_interval,
            workers,
            data_pieces,
            parity_pieces,
            conflict_user,
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_root.join(DB_FILE_NAME)
    }

    pub fn staging_root(&self) -> PathBuf {
        self.data_root.join("staging")
    }
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    engine: Arc<SyncEngine>,
    client: SiaClient,
    task_rx: mpsc::UnboundedReceiver<SyncTask>,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.sync_root)
            .await
            .with_context(|| format!("failed to create sync root at {:?}", config.sync_root))?;
        tokio::fs::create_dir_all(config.staging_root())
            .await
            .with_context(|| format!("failed to create staging root at {:?}", config.staging_root()))?;

        let client = match &config.api_addr {
            Some(addr) => SiaClient::with_base_url(addr, config.api_password.clone())?,
            None => SiaClient::new(config.api_password.clone())?,
        };
        let store = RecordStore::open(&config.db_path())
            .await
            .context("failed to open record store")?;
        let (queue, task_rx) = TaskQueue::new();
        let engine_config = EngineConfig {
            sync_root: config.sync_root.clone(),
            staging_root: config.staging_root(),
            remote_root: config.remote_root.clone(),
            data_pieces: config.data_pieces,
            parity_pieces: config.parity_pieces,
            conflict_user: config.conflict_user.clone(),
        };
        let engine = Arc::new(SyncEngine::new(client.clone(), store, engine_config, queue));

        Ok(Self {
            config,
            engine,
            client,
            task_rx,
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        eprintln!(
            "[siasyncd] started: sync_root={}, remote_root={}, workers={}",
            self.config.sync_root.display(),
            self.config.remote_root,
            self.config.workers
        );

        let resumed = self.engine.resume_pending().await?;
        if resumed > 0 {
            eprintln!("[siasyncd] resumed {resumed} pending transfers");
        }

        let pool_engine = Arc::clone(&self.engine);
        let pool = WorkerPool::start(self.config.workers, self.task_rx, move |task| {
            let engine = Arc::clone(&pool_engine);
            async move { engine.execute(task).await }
        });

        let policy = RetryPolicy::default();
        let recovery = Arc::new(DaemonProbeRecovery::new(self.client.clone(), policy));
        let scan_engine = Arc::clone(&self.engine);
        let scan_handle = spawn_periodic(Duration::ZERO, self.config.scan_interval, move || {
            let engine = Arc::clone(&scan_engine);
            let recovery = Arc::clone(&recovery);
            async move {
                let result = run_with_recovery(policy, recovery.as_ref(), || {
                    let engine = Arc::clone(&engine);
                    async move { engine.reconcile_once().await }
                })
                .await;
                match result {
                    Ok(0) => {}
                    Ok(changed) => eprintln!("[siasyncd] reconcile: {changed} records changed"),
                    Err(err) => eprintln!("[siasyncd] reconcile failed: {err}"),
                }
            }
        });

        // The two poll cycles are phase-shifted against each other and the
        // reconciler scan.
        let uploads_engine = Arc::clone(&self.engine);
        let uploads_handle = spawn_periodic(
            self.config.poll_interval / 3,
            self.config.poll_interval,
            move || {
                let engine = Arc::clone(&uploads_engine);
                async move {
                    if let Err(err) = engine.check_uploads().await {
                        eprintln!("[siasyncd] upload poll failed: {err}");
                    }
                }
            },
        );
        let downloads_engine = Arc::clone(&self.engine);
        let downloads_handle = spawn_periodic(
            self.config.poll_interval * 2 / 3,
            self.config.poll_interval,
            move || {
                let engine = Arc::clone(&downloads_engine);
                async move {
                    if let Err(err) = engine.check_downloads().await {
                        eprintln!("[siasyncd] download poll failed: {err}");
                    }
                }
            },
        );

        let (watcher, mut events) = start_notify_watcher(&self.config.sync_root)
            .context("failed to start filesystem watcher")?;
        let watch_engine = Arc::clone(&self.engine);
        let quiet_period = self.config.quiet_period;
        let tick_interval = self.config.tick_interval;
        let watch_handle = tokio::spawn(async move {
            let mut tracker = ChangeTracker::default();
            let mut ticker = tokio::time::interval(tick_interval);
            loop {
                tokio::select! {
                    event = events.recv() => {
                        let Some(event) = event else { break };
                        match event {
                            WatchEvent::Changed { name } => tracker.touch(&name, Instant::now()),
                            WatchEvent::Removed { name } => {
                                tracker.forget(&name);
                                if let Err(err) = watch_engine.mark_removed(&name).await {
                                    eprintln!("[siasyncd] watcher remove error: name={name} err={err}");
                                }
                            }
                        }
                    }
                    _ = ticker.tick() => {
                        for name in tracker.drain_quiet(quiet_period, Instant::now()) {
                            if let Err(err) = watch_engine.mark_modified(&name).await {
                                eprintln!("[siasyncd] watcher change error: name={name} err={err}");
                            }
                        }
                    }
                }
            }
        });

        let _watcher = watcher;
        tokio::signal::ctrl_c()
            .await
            .context("failed waiting for shutdown signal")?;
        eprintln!("[siasyncd] shutting down");

        scan_handle.abort();
        uploads_handle.abort();
        downloads_handle.abort();
        watch_handle.abort();
        pool.abort();

        Ok(())
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn default_data_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("siasync")
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_with_home_handles_tilde_forms() {
        let home = PathBuf::from("/home/user");
        assert_eq!(expand_with_home("~", &home), PathBuf::from("/home/user"));
        assert_eq!(
            expand_with_home("~/Sync", &home),
            PathBuf::from("/home/user/Sync")
        );
        assert_eq!(
            expand_with_home("/abs/path", &home),
            PathBuf::from("/abs/path")
        );
    }

    #[test]
    fn read_u64_env_falls_back_on_garbage() {
        // Values come from a variable that is certainly unset.
        assert_eq!(read_u64_env("SIASYNC_TEST_UNSET_U64", 7), 7);
    }

    #[test]
    fn db_and_staging_paths_live_under_the_data_root() {
        let config = DaemonConfig {
            sync_root: PathBuf::from("/s"),
            data_root: PathBuf::from("/d"),
            api_addr: None,
            api_password: None,
            remote_root: "sync".into(),
            scan_interval: Duration::from_secs(30),
            poll_interval: Duration::from_secs(5),
            quiet_period: Duration::from_millis(1000),
            tick_interval: Duration::from_millis(250),
            workers: 4,
            data_pieces: 10,
            parity_pieces: 20,
            conflict_user: "local".into(),
        };
        assert_eq!(config.db_path(), PathBuf::from("/d/siasync.db"));
        assert_eq!(config.staging_root(), PathBuf::from("/d/staging"));
    }
}
