use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::{timeout, Duration};

use super::types::{CurrentChanged, PollerState};
use crate::device::{PowerSupply, Result as DeviceResult};
use crate::serial::READ_TIMEOUT_MS;

/// Something the monitor can sample current from.
#[async_trait::async_trait]
pub trait CurrentSource: Send + Sync {
    async fn is_open(&self) -> bool;

    async fn read_current(&self) -> DeviceResult<f64>;
}

#[async_trait::async_trait]
impl CurrentSource for PowerSupply {
    async fn is_open(&self) -> bool {
        PowerSupply::is_open(self).await
    }

    async fn read_current(&self) -> DeviceResult<f64> {
        PowerSupply::read_current(self).await
    }
}

/// Background sampling of the supply's output current.
///
/// At most one loop runs at a time. The loop only holds a weak reference to
/// its source and ends on its own once the source is dropped.
pub struct CurrentMonitor {
    session: Mutex<Option<MonitoringSession>>,
    events_tx: broadcast::Sender<CurrentChanged>,
}

/// A running monitoring loop
struct MonitoringSession {
    task_handle: tokio::task::JoinHandle<()>,
    stop_tx: mpsc::Sender<()>,
    running: Arc<AtomicBool>,
}

impl CurrentMonitor {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(super::EVENT_CAPACITY);
        Self {
            session: Mutex::new(None),
            events_tx,
        }
    }

    /// Receive a [`CurrentChanged`] for every change the loop observes.
    pub fn subscribe(&self) -> broadcast::Receiver<CurrentChanged> {
        self.events_tx.subscribe()
    }

    /// Start sampling `source` every `interval`. A loop that is already
    /// running is stopped first.
    pub async fn start<S>(&self, source: &Arc<S>, interval: Duration)
    where
        S: CurrentSource + 'static,
    {
        let mut session = self.session.lock().await;
        if let Some(previous) = session.take() {
            log::info!("Restarting current monitor");
            previous.stop().await;
        }

        let source: Arc<dyn CurrentSource> = source.clone();
        let weak_source = Arc::downgrade(&source);
        drop(source);

        let (stop_tx, stop_rx) = mpsc::channel(1);
        let running = Arc::new(AtomicBool::new(true));

        let task_handle = tokio::spawn(monitoring_loop(
            weak_source,
            PollerState::new(interval),
            running.clone(),
            self.events_tx.clone(),
            stop_rx,
        ));

        *session = Some(MonitoringSession {
            task_handle,
            stop_tx,
            running,
        });
    }

    /// Stop the loop and wait for it to finish. A sample already being read
    /// is allowed to complete, but nothing is reported once this call returns.
    pub async fn stop(&self) {
        let session = self.session.lock().await.take();
        match session {
            Some(session) => session.stop().await,
            None => log::debug!("Current monitor not running"),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .map_or(false, |s| s.running.load(Ordering::SeqCst))
    }
}

impl Default for CurrentMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitoringSession {
    async fn stop(self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.stop_tx.send(()).await;

        // An in-flight read ends within the transport timeout.
        let grace = Duration::from_millis(READ_TIMEOUT_MS + 500);
        let abort_handle = self.task_handle.abort_handle();
        if timeout(grace, self.task_handle).await.is_err() {
            log::warn!("Current monitor did not stop within {:?}, aborting it", grace);
            abort_handle.abort();
        }
    }
}

async fn monitoring_loop(
    source: Weak<dyn CurrentSource>,
    mut state: PollerState,
    running: Arc<AtomicBool>,
    events_tx: broadcast::Sender<CurrentChanged>,
    mut stop_rx: mpsc::Receiver<()>,
) {
    let start_time = Instant::now();
    log::info!("Starting current monitor, sampling every {:?}", state.interval);

    loop {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        match stop_rx.try_recv() {
            Err(TryRecvError::Empty) => {}
            Ok(()) | Err(TryRecvError::Disconnected) => break,
        }

        let Some(supply) = source.upgrade() else {
            log::info!("Power supply dropped, ending current monitor");
            break;
        };
        sample(supply.as_ref(), &mut state, &running, &events_tx).await;
        drop(supply);

        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = tokio::time::sleep(state.interval) => {}
        }
    }

    running.store(false, Ordering::SeqCst);
    log::info!(
        "Stopped current monitor (ran for {:?}, {} samples)",
        start_time.elapsed(),
        state.samples
    );
}

/// One cycle: read the current and report it if it changed.
async fn sample(
    source: &dyn CurrentSource,
    state: &mut PollerState,
    running: &AtomicBool,
    events_tx: &broadcast::Sender<CurrentChanged>,
) {
    state.samples += 1;

    if !source.is_open().await {
        log::debug!("Port not open, skipping current sample");
        return;
    }

    let current = match source.read_current().await {
        Ok(current) => current,
        Err(e) => {
            log::warn!("Failed to get current: {}", e);
            return;
        }
    };

    if let Some(changed) = state.observe(current) {
        if !running.load(Ordering::SeqCst) {
            return;
        }
        log::debug!("Current changed to {}A", changed);
        if events_tx.send(CurrentChanged::now(changed)).is_err() {
            log::debug!("No subscribers for current change");
        }
    }
}
