//! Device update loop.
//!
//! [`DeviceRunner`] plays the host scheduler for a single device. It owns a
//! tokio task that calls [`Device::update`] with the elapsed wall-clock time,
//! runs the registered [`AfterUpdate`] hooks, then sleeps until the device's
//! requested `call_at`. Adapters wake the loop early through an
//! [`Interrupt`], e.g. after a REST command changed the device state.
//!
//! Updates never overlap: the device sits behind an async mutex and the loop
//! holds the lock for the whole update-plus-hooks step.

use sim_core::{Device, SimTime};
use std::mem;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Device shared between the runner and protocol adapters.
pub type SharedDevice<D> = Arc<Mutex<D>>;

/// Hook run with the device still locked, straight after every update.
pub trait AfterUpdate<D>: Send {
    fn after_update(&mut self, device: &mut D);
}

/// Wakes the runner for an immediate update.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<Notify>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an update. Raising while an update is running schedules
    /// another one straight after it.
    pub fn raise(&self) {
        self.0.notify_one();
    }

    async fn raised(&self) {
        self.0.notified().await;
    }
}

/// Pending device inputs, consumed by the next update.
pub struct InputHandle<I> {
    inputs: Arc<parking_lot::Mutex<I>>,
    interrupt: Interrupt,
}

impl<I> Clone for InputHandle<I> {
    fn clone(&self) -> Self {
        Self {
            inputs: self.inputs.clone(),
            interrupt: self.interrupt.clone(),
        }
    }
}

impl<I: Default> InputHandle<I> {
    /// Modify the pending inputs and wake the runner.
    pub fn set(&self, change: impl FnOnce(&mut I)) {
        change(&mut self.inputs.lock());
        self.interrupt.raise();
    }

    fn take(&self) -> I {
        mem::take(&mut *self.inputs.lock())
    }
}

/// Builder and owner of the update loop for one device.
pub struct DeviceRunner<D: Device> {
    device: SharedDevice<D>,
    inputs: InputHandle<D::Inputs>,
    interrupt: Interrupt,
    hooks: Vec<Box<dyn AfterUpdate<D>>>,
}

impl<D: Device> DeviceRunner<D> {
    pub fn new(device: D) -> Self {
        Self::with_shared(Arc::new(Mutex::new(device)))
    }

    pub fn with_shared(device: SharedDevice<D>) -> Self {
        let interrupt = Interrupt::new();
        Self {
            device,
            inputs: InputHandle {
                inputs: Arc::new(parking_lot::Mutex::new(D::Inputs::default())),
                interrupt: interrupt.clone(),
            },
            interrupt,
            hooks: Vec::new(),
        }
    }

    pub fn device(&self) -> SharedDevice<D> {
        self.device.clone()
    }

    pub fn interrupt(&self) -> Interrupt {
        self.interrupt.clone()
    }

    pub fn inputs(&self) -> InputHandle<D::Inputs> {
        self.inputs.clone()
    }

    pub fn add_hook(&mut self, hook: impl AfterUpdate<D> + 'static) {
        self.hooks.push(Box::new(hook));
    }

    /// Spawn the update loop. The first update runs immediately.
    pub fn spawn(self) -> RunnerHandle<D> {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let device = self.device.clone();
        let interrupt = self.interrupt.clone();
        let inputs = self.inputs.clone();
        let task = tokio::spawn(self.run(shutdown_rx));
        RunnerHandle {
            device,
            interrupt,
            inputs,
            shutdown_tx: Some(shutdown_tx),
            task,
        }
    }

    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        let start = Instant::now();
        tracing::debug!("Device runner started");

        loop {
            let now = SimTime::from_nanos(start.elapsed().as_nanos() as u64);
            let inputs = self.inputs.take();
            let call_at = {
                let mut device = self.device.lock().await;
                let update = device.update(now, &inputs);
                for hook in &mut self.hooks {
                    hook.after_update(&mut device);
                }
                update.call_at
            };

            let wake = async {
                match call_at {
                    Some(at) => {
                        let deadline = start + at.as_duration();
                        tokio::time::sleep_until(deadline).await;
                    }
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = wake => {}
                _ = self.interrupt.raised() => {}
                _ = &mut shutdown => {
                    tracing::debug!("Device runner stopped");
                    return;
                }
            }
        }
    }
}

/// Handle to a running update loop. Dropping it stops the loop.
pub struct RunnerHandle<D: Device> {
    device: SharedDevice<D>,
    interrupt: Interrupt,
    inputs: InputHandle<D::Inputs>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl<D: Device> RunnerHandle<D> {
    pub fn device(&self) -> SharedDevice<D> {
        self.device.clone()
    }

    pub fn interrupt(&self) -> Interrupt {
        self.interrupt.clone()
    }

    pub fn inputs(&self) -> InputHandle<D::Inputs> {
        self.inputs.clone()
    }

    /// Stop the loop and wait for the task to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::warn!("Device runner task failed: {}", e);
        }
    }
}

impl<D: Device> Drop for RunnerHandle<D> {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
