//! BLE HAL Service
//!
//! [`BleHal`] is the host-facing handle. It owns the channel into the engine
//! task and, when no runtime is supplied, the dedicated thread that drives
//! it.

use crate::domain::config::HalConfig;
use crate::domain::error::HalError;
use crate::domain::models::{BusKind, InitStatus};
use crate::infrastructure::bluez::dbus::DbusTransport;
use crate::infrastructure::bluez::engine::Engine;
use crate::infrastructure::bluez::notifier::EventNotifier;
use crate::infrastructure::bluez::transport::{BusTransport, EngineMessage, EngineSender};
use std::future::Future;
use std::sync::Arc;
use std::thread;
use tokio::runtime::{Builder, Handle, RuntimeFlavor};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

const WORKER_THREAD_NAME: &str = "ble-hal";

struct Running {
    tx: EngineSender,
    /// Present when the HAL runs its own event loop.
    worker: Option<thread::JoinHandle<()>>,
}

/// Handle to one HAL instance. Several may coexist; each has its own
/// connection and engine.
#[derive(Default)]
pub struct BleHal {
    running: Option<Running>,
}

/// Engine side of a starting HAL: the channel into it, the startup result
/// and the future that runs it.
struct Startup<Boot> {
    tx: EngineSender,
    ready: oneshot::Receiver<Result<(), HalError>>,
    bootstrap: Boot,
}

fn prepare<B, F, Fut>(
    config: HalConfig,
    connect: F,
) -> Result<Startup<impl Future<Output = ()> + Send + 'static>, HalError>
where
    B: BusTransport,
    F: FnOnce(BusKind, String) -> Fut + Send + 'static,
    Fut: Future<Output = Result<B, HalError>> + Send + 'static,
{
    config.validate()?;
    info!(bus = ?config.bus, service = %config.service_name, "Initializing BLE HAL");

    let (tx, rx) = mpsc::unbounded_channel();
    let (ready_tx, ready) = oneshot::channel::<Result<(), HalError>>();
    let notifier = EventNotifier::new(config.on_event.clone());
    let engine_tx = tx.clone();

    let bootstrap = async move {
        let started = async {
            let bus = connect(config.bus, config.service_name).await?;
            Engine::start(Arc::new(bus), engine_tx, notifier).await
        }
        .await;

        match started {
            Ok(engine) => {
                let _ = ready_tx.send(Ok(()));
                engine.run(rx).await;
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
            }
        }
    };

    Ok(Startup {
        tx,
        ready,
        bootstrap,
    })
}

fn startup_result(
    ready: Result<Result<(), HalError>, oneshot::error::RecvError>,
) -> Result<(), HalError> {
    ready.unwrap_or_else(|_| {
        Err(HalError::Connection(
            "HAL event loop stopped during startup".to_string(),
        ))
    })
}

impl BleHal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to the bus and start watching the management service.
    ///
    /// With `Some(handle)` the engine is spawned on that multi-thread
    /// runtime; otherwise a current-thread runtime is started on a dedicated
    /// `ble-hal` thread. Blocks until the connection attempt has completed.
    ///
    /// Returns [`HalError::InvalidConfig`] without blocking when called from
    /// within a tokio runtime, or when `handle` belongs to a current-thread
    /// runtime that nothing would drive while `init` waits. Use
    /// [`BleHal::init_async`] from async code.
    pub fn init(
        &mut self,
        config: HalConfig,
        runtime: Option<Handle>,
    ) -> Result<InitStatus, HalError> {
        self.init_with(config, runtime, DbusTransport::connect)
    }

    /// Like [`BleHal::init`], but runs the engine on the current runtime and
    /// awaits the connection attempt instead of blocking.
    pub async fn init_async(&mut self, config: HalConfig) -> Result<InitStatus, HalError> {
        self.init_async_with(config, DbusTransport::connect).await
    }

    pub(crate) fn init_with<B, F, Fut>(
        &mut self,
        config: HalConfig,
        runtime: Option<Handle>,
        connect: F,
    ) -> Result<InitStatus, HalError>
    where
        B: BusTransport,
        F: FnOnce(BusKind, String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<B, HalError>> + Send + 'static,
    {
        if self.running.is_some() {
            info!("HAL already initialized");
            return Ok(InitStatus::AlreadyInitialized);
        }

        if Handle::try_current().is_ok() {
            error!("Blocking init called from within a tokio runtime");
            return Err(HalError::InvalidConfig(
                "init cannot block inside a tokio runtime, use init_async".to_string(),
            ));
        }
        if let Some(handle) = &runtime {
            if handle.runtime_flavor() == RuntimeFlavor::CurrentThread {
                error!("Blocking init given a current-thread runtime handle");
                return Err(HalError::InvalidConfig(
                    "a current-thread runtime is not driven while init blocks, use init_async"
                        .to_string(),
                ));
            }
        }

        let Startup {
            tx,
            ready,
            bootstrap,
        } = prepare(config, connect)?;

        let worker = match runtime {
            Some(handle) => {
                handle.spawn(bootstrap);
                None
            }
            None => {
                let rt = Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(|e| HalError::Connection(format!("failed to build runtime: {e}")))?;
                let worker = thread::Builder::new()
                    .name(WORKER_THREAD_NAME.to_string())
                    .spawn(move || rt.block_on(bootstrap))
                    .map_err(|e| {
                        HalError::Connection(format!("failed to spawn HAL thread: {e}"))
                    })?;
                Some(worker)
            }
        };

        if let Err(e) = startup_result(ready.blocking_recv()) {
            error!("Failed to initialize BLE HAL: {}", e);
            if let Some(worker) = worker {
                let _ = worker.join();
            }
            return Err(e);
        }

        self.running = Some(Running { tx, worker });
        info!("BLE HAL initialized");
        Ok(InitStatus::Initialized)
    }

    pub(crate) async fn init_async_with<B, F, Fut>(
        &mut self,
        config: HalConfig,
        connect: F,
    ) -> Result<InitStatus, HalError>
    where
        B: BusTransport,
        F: FnOnce(BusKind, String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<B, HalError>> + Send + 'static,
    {
        if self.running.is_some() {
            info!("HAL already initialized");
            return Ok(InitStatus::AlreadyInitialized);
        }

        let Startup {
            tx,
            ready,
            bootstrap,
        } = prepare(config, connect)?;
        tokio::spawn(bootstrap);

        if let Err(e) = startup_result(ready.await) {
            error!("Failed to initialize BLE HAL: {}", e);
            return Err(e);
        }

        self.running = Some(Running { tx, worker: None });
        info!("BLE HAL initialized");
        Ok(InitStatus::Initialized)
    }

    /// Send the shutdown request. `None` when there was nothing running.
    fn request_shutdown(&mut self) -> Option<(Running, Option<oneshot::Receiver<()>>)> {
        let Some(running) = self.running.take() else {
            debug!("HAL not initialized, nothing to deinit");
            return None;
        };

        info!("Deinitializing BLE HAL");
        let (done_tx, done_rx) = oneshot::channel();
        if running
            .tx
            .send(EngineMessage::Shutdown { done: done_tx })
            .is_err()
        {
            warn!("HAL engine already stopped");
            return Some((running, None));
        }
        Some((running, Some(done_rx)))
    }

    /// Stop the engine, cancel its outstanding bus calls and release the
    /// connection. Pending operations are completed with
    /// [`HalError::Aborted`]. Safe to call when not initialized, and called
    /// again on drop.
    ///
    /// When the engine lives on a caller-supplied runtime and `deinit` runs
    /// inside that runtime, shutdown finishes asynchronously after return;
    /// use [`BleHal::deinit_async`] there to wait for it.
    pub fn deinit(&mut self) {
        let Some((running, done)) = self.request_shutdown() else {
            return;
        };

        if let Some(done) = done {
            if running.worker.is_none() && Handle::try_current().is_err() {
                let _ = done.blocking_recv();
            }
        }

        if let Some(worker) = running.worker {
            if worker.join().is_err() {
                error!("HAL worker thread panicked");
            }
        }
        info!("BLE HAL deinitialized");
    }

    /// [`BleHal::deinit`] for async callers: waits for the engine to finish
    /// shutting down without blocking the runtime.
    pub async fn deinit_async(&mut self) {
        let Some((running, done)) = self.request_shutdown() else {
            return;
        };

        if let Some(done) = done {
            let _ = done.await;
        }

        if let Some(worker) = running.worker {
            let joined = tokio::task::spawn_blocking(move || worker.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                error!("HAL worker thread panicked");
            }
        }
        info!("BLE HAL deinitialized");
    }

    pub fn is_initialized(&self) -> bool {
        self.running.is_some()
    }

    /// Request the adapter at `path` to be powered on or off.
    ///
    /// `Ok(())` means the request is pending and `callback` will be invoked
    /// exactly once, on the HAL's event loop. On `Err` the callback has
    /// already been invoked with the same error and the bus was not touched.
    pub fn set_adapter_power<F>(&self, path: &str, on: bool, callback: F) -> Result<(), HalError>
    where
        F: FnOnce(Result<(), HalError>) + Send + 'static,
    {
        let Some(running) = &self.running else {
            error!("HAL not initialized, cannot set adapter power");
            callback(Err(HalError::NotInitialized));
            return Err(HalError::NotInitialized);
        };

        if path.is_empty() {
            error!("Adapter path cannot be empty for set_adapter_power");
            let err = HalError::InvalidParams("adapter path cannot be empty".to_string());
            callback(Err(err.clone()));
            return Err(err);
        }

        let msg = EngineMessage::SetPower {
            path: path.to_string(),
            on,
            callback: Box::new(callback),
        };
        if let Err(mpsc::error::SendError(msg)) = running.tx.send(msg) {
            error!("HAL engine is gone, cannot set adapter power");
            if let EngineMessage::SetPower { callback, .. } = msg {
                callback(Err(HalError::NotInitialized));
            }
            return Err(HalError::NotInitialized);
        }
        Ok(())
    }
}

impl Drop for BleHal {
    fn drop(&mut self) {
        self.deinit();
    }
}
