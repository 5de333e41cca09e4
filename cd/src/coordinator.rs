//! Coordinator - wires the stores, channels and background loops together

use std::sync::Arc;

use eyre::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::autoscaler::{Autoscaler, ChannelInventory, PoolRegistry};
use crate::channel::ChannelManager;
use crate::config::{Config, StorageBackend, StorageConfig};
use crate::dispatcher::{CommandDispatcher, ErrorSink, LoggingErrorSink, ProcessDispatcher};
use crate::domain::{CommandStore, MemoryStore, QueueStore, SqliteStore, UnionWaitReader, WaitStore};
use crate::watchdog::{QueueResumer, SignalBoard, Watchdog, builtin_handlers};

/// The store ports the coordinator runs against
#[derive(Clone)]
pub struct Stores {
    pub queue: Arc<dyn QueueStore>,
    pub waits: Arc<dyn WaitStore>,
    pub commands: Arc<dyn CommandStore>,
}

impl Stores {
    /// All three ports backed by one in-memory store
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            queue: store.clone(),
            waits: store.clone(),
            commands: store,
        }
    }

    /// All three ports backed by one SQLite database
    pub fn sqlite(store: Arc<SqliteStore>) -> Self {
        Self {
            queue: store.clone(),
            waits: store.clone(),
            commands: store,
        }
    }

    /// Open the stores described by the storage section
    ///
    /// With `legacy-wait-path` set, wait records are read from both databases
    /// and written to the current one only.
    pub fn open(config: &StorageConfig) -> Result<Self> {
        debug!(backend = ?config.backend, path = %config.path.display(), "Stores::open: called");
        let mut stores = match config.backend {
            StorageBackend::Memory => Self::memory(),
            StorageBackend::Sqlite => {
                if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).context("Failed to create storage directory")?;
                }
                let store = SqliteStore::open(&config.path)
                    .context(format!("Failed to open queue database {}", config.path.display()))?;
                Self::sqlite(Arc::new(store))
            }
        };

        if let Some(legacy_path) = &config.legacy_wait_path {
            let legacy = SqliteStore::open(legacy_path)
                .context(format!("Failed to open legacy wait database {}", legacy_path.display()))?;
            info!(legacy = %legacy_path.display(), "Reading wait records through the legacy union");
            stores.waits = Arc::new(UnionWaitReader::new(Arc::new(legacy), stores.waits));
        }
        Ok(stores)
    }
}

/// Builds the components; `start` spawns their loops
pub struct Coordinator {
    config: Config,
    stores: Stores,
    channels: Arc<ChannelManager>,
    signals: Arc<SignalBoard>,
    registry: Arc<PoolRegistry>,
    sink: Arc<dyn ErrorSink>,
}

impl Coordinator {
    pub fn new(config: Config, stores: Stores) -> Self {
        debug!("Coordinator::new: called");
        let channels = Arc::new(ChannelManager::new(config.channels.clone()));
        Self {
            config,
            stores,
            channels,
            signals: Arc::new(SignalBoard::new()),
            registry: Arc::new(PoolRegistry::new()),
            sink: Arc::new(LoggingErrorSink),
        }
    }

    /// Send requirement errors somewhere other than the log
    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn channels(&self) -> &Arc<ChannelManager> {
        &self.channels
    }

    pub fn signals(&self) -> &Arc<SignalBoard> {
        &self.signals
    }

    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.registry
    }

    /// Spawn the dispatcher, command dispatcher, watchdog and autoscaler loops
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> CoordinatorHandle {
        info!(
            pools = self.config.autoscaler.pools.len(),
            "Starting coordinator loops"
        );
        let mut handle = CoordinatorHandle {
            channels: self.channels.clone(),
            signals: self.signals.clone(),
            registry: self.registry.clone(),
            loops: Vec::new(),
        };

        let dispatcher = ProcessDispatcher::new(
            self.stores.queue.clone(),
            self.channels.clone(),
            self.sink.clone(),
            self.config.dispatcher.clone(),
        );
        handle.spawn("process-dispatcher", |rx| dispatcher.run(rx));

        let commands = CommandDispatcher::new(
            self.stores.commands.clone(),
            self.channels.clone(),
            self.config.dispatcher.clone(),
        );
        handle.spawn("command-dispatcher", |rx| commands.run(rx));

        let watchdog = Watchdog::new(
            self.stores.waits.clone(),
            builtin_handlers(
                self.stores.queue.clone(),
                self.signals.clone(),
                self.config.watchdog.status_query_limit,
            ),
            Arc::new(QueueResumer::new(self.stores.queue.clone())),
            self.config.watchdog.clone(),
        )
        .with_signals(self.signals.clone());
        handle.spawn("watchdog", |rx| watchdog.run(rx));

        let autoscaler = Autoscaler::new(
            self.config.autoscaler.clone(),
            Arc::new(ChannelInventory::new(self.channels.clone())),
            self.stores.queue.clone(),
            self.registry.clone(),
        );
        handle.spawn("autoscaler", |rx| autoscaler.run(rx));

        handle
    }
}

struct LoopTask {
    name: &'static str,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

/// Running coordinator; shuts every loop down on request
pub struct CoordinatorHandle {
    channels: Arc<ChannelManager>,
    signals: Arc<SignalBoard>,
    registry: Arc<PoolRegistry>,
    loops: Vec<LoopTask>,
}

impl CoordinatorHandle {
    fn spawn<F, Fut>(&mut self, name: &'static str, run: F)
    where
        F: FnOnce(mpsc::Receiver<()>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let task = tokio::spawn(run(shutdown_rx));
        debug!(%name, "CoordinatorHandle::spawn: loop started");
        self.loops.push(LoopTask {
            name,
            shutdown_tx,
            task,
        });
    }

    pub fn channels(&self) -> &Arc<ChannelManager> {
        &self.channels
    }

    pub fn signals(&self) -> &Arc<SignalBoard> {
        &self.signals
    }

    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.registry
    }

    /// Names of the loops still running
    pub fn running(&self) -> Vec<&'static str> {
        self.loops.iter().filter(|l| !l.task.is_finished()).map(|l| l.name).collect()
    }

    /// Stop every loop, then close all channels
    ///
    /// Safe to call more than once; later calls do nothing.
    pub async fn shutdown(&mut self) {
        if self.loops.is_empty() {
            debug!("CoordinatorHandle::shutdown: already stopped");
            return;
        }
        info!("Shutting down coordinator");

        let loops = std::mem::take(&mut self.loops);
        for l in &loops {
            // A loop that already exited has dropped its receiver
            let _ = l.shutdown_tx.send(()).await;
        }
        for l in loops {
            if let Err(e) = l.task.await {
                warn!(name = l.name, error = %e, "Loop ended abnormally");
            }
        }

        let closed = self.channels.shutdown();
        info!(channels_closed = closed, "Coordinator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Message, MessageType};
    use crate::domain::{Capabilities, NewEntry};
    use std::time::Duration;

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::Memory;
        config.dispatcher.poll_interval_ms = 10;
        config.watchdog.period_ms = 10;
        config.autoscaler.interval_ms = 10;
        config
    }

    #[tokio::test]
    async fn test_start_dispatches_and_shuts_down() {
        let stores = Stores::memory();
        let queue = stores.queue.clone();
        let entry = queue.insert(NewEntry::new()).await.unwrap();

        let mut handle = Coordinator::new(fast_config(), stores).start();
        assert_eq!(handle.running().len(), 4);

        let channel = handle.channels().connect("worker-1", None).unwrap();
        assert!(channel.submit(Message::process_request(Capabilities::new())));

        let response = channel
            .poll(MessageType::ProcessResponse, Duration::from_secs(5))
            .await
            .expect("dispatcher should answer");
        match response {
            Message::ProcessResponse { process_key, .. } => assert_eq!(process_key, entry.key),
            other => panic!("Unexpected message: {:?}", other),
        }

        handle.shutdown().await;
        assert!(handle.running().is_empty());
        assert!(handle.channels().is_closed());
        // Second call is a no-op
        handle.shutdown().await;
    }

    #[test]
    fn test_open_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            backend: StorageBackend::Sqlite,
            path: dir.path().join("nested").join("queue.db"),
            legacy_wait_path: Some(dir.path().join("legacy.db")),
        };
        assert!(Stores::open(&config).is_ok());
        assert!(config.path.exists());
    }
}
