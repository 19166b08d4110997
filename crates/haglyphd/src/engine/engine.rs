//! Engine run loop: keeps the hub subscription and the display pipeline up,
//! and pushes a freshly mapped frame whenever a watched state changes.
//!
//! Both sides recover independently. A dead subscription is re-dialed with
//! capped backoff and reconciled through a full state snapshot; a dead
//! display is reopened the same way while state changes keep landing in the
//! store, so the first frame after reopen already reflects everything missed.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{Config, ConfigError};
use crate::display::{DisplayDriver, DriverError, GlyphSurface};
use crate::hub::{Dial, EventStream, HubClient, HubError};
use crate::render::{map_all, Frame, WatchRule};
use crate::state::StateStore;

use super::status::{EngineState, StatusHandle};
use super::Backoff;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Produces fresh display surfaces, one per (re)open attempt
pub type SurfaceFactory = Box<dyn FnMut() -> Box<dyn GlyphSurface> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Credential rejected; retrying cannot help
    #[error("hub authentication failed: {0}")]
    Auth(String),

    /// Configuration that can only be checked against the live device,
    /// e.g. sprite dimensions
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// The state-sync engine. Construct with [`SyncEngine::new`], then [`start`]
/// it onto the runtime.
///
/// [`start`]: SyncEngine::start
pub struct SyncEngine {
    config: Config,
    hub: HubClient,
    surfaces: SurfaceFactory,
}

impl SyncEngine {
    pub fn new(config: Config, dialer: Box<dyn Dial>, surfaces: SurfaceFactory) -> Self {
        let hub = HubClient::new(
            dialer,
            config.hub.url.clone(),
            config.hub.access_token.clone(),
            config.watch_patterns(),
        );
        Self {
            config,
            hub,
            surfaces,
        }
    }

    /// Spawn the run loop and return its handle.
    pub fn start(self) -> EngineHandle {
        let (engine_tx, engine_rx) = watch::channel(EngineState::Idle);
        let (render_tx, render_rx) = watch::channel(None);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let status = StatusHandle::new(engine_rx, self.hub.connection_state(), render_rx);

        let runner = Runner {
            config: self.config,
            hub: self.hub,
            surfaces: self.surfaces,
            engine_tx,
            render_tx,
            shutdown_rx,
        };
        let task = tokio::spawn(runner.run());

        EngineHandle {
            shutdown_tx,
            task: Some(task),
            status,
        }
    }
}

/// Handle to a started engine.
pub struct EngineHandle {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<Result<(), EngineError>>>,
    status: StatusHandle,
}

impl EngineHandle {
    pub fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    /// Resolves once the run loop has exited, e.g. on a fatal error.
    pub async fn finished(&mut self) -> Result<(), EngineError> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        match task.await {
            Ok(result) => result,
            Err(e) => {
                error!("Engine task failed: {}", e);
                Ok(())
            }
        }
    }

    /// Orderly shutdown: display released before the hub connection so the
    /// matrix never outlives its data source.
    pub async fn stop(mut self) -> Result<(), EngineError> {
        let _ = self.shutdown_tx.send(true);
        self.finished().await
    }
}

/// An open display pipeline with its capability-compiled rules.
struct Display {
    driver: DisplayDriver,
    rules: Vec<WatchRule>,
    last_pushed: Option<Frame>,
}

enum OpenFailure {
    Retry(DriverError),
    Fatal(ConfigError),
}

/// Resolves when the open display's pacing task has failed permanently;
/// pending while there is no display to watch.
async fn display_failed(display: &mut Option<Display>) {
    match display.as_mut() {
        Some(d) => d.driver.failed().await,
        None => std::future::pending().await,
    }
}

struct Runner {
    config: Config,
    hub: HubClient,
    surfaces: SurfaceFactory,
    engine_tx: watch::Sender<EngineState>,
    render_tx: watch::Sender<Option<u64>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Runner {
    async fn run(mut self) -> Result<(), EngineError> {
        let mut store = StateStore::new(self.config.watch_patterns());
        let mut display_backoff = Backoff::new(BACKOFF_BASE, BACKOFF_CAP);
        let mut hub_backoff = Backoff::new(BACKOFF_BASE, BACKOFF_CAP);
        let mut display: Option<Display> = None;
        let mut stream: Option<EventStream> = None;

        let result = loop {
            if *self.shutdown_rx.borrow() {
                break Ok(());
            }

            if display.is_none() {
                match self.open_display().await {
                    Ok(mut opened) => {
                        display_backoff.reset();
                        // Catch-up render: everything that changed while the
                        // display was down is already in the store
                        self.render(&mut opened, &store, true).await;
                        display = Some(opened);
                    }
                    Err(OpenFailure::Fatal(e)) => break Err(EngineError::Config(e)),
                    Err(OpenFailure::Retry(e)) => {
                        let delay = display_backoff.next_delay();
                        warn!("Display open failed ({}), retrying in {:?}", e, delay);
                        self.engine_tx.send_replace(EngineState::Reconnecting);
                        if self.wait(delay, &mut stream, &mut store).await {
                            break Ok(());
                        }
                        continue;
                    }
                }
            }

            if stream.is_none() {
                match self.sync_and_subscribe(&mut store).await {
                    Ok(events) => {
                        hub_backoff.reset();
                        stream = Some(events);
                        if let Some(d) = display.as_mut() {
                            // Resynced from a full snapshot; render it
                            // unconditionally
                            if !self.render(d, &store, true).await {
                                display = None;
                                continue;
                            }
                        }
                    }
                    Err(e) if e.is_auth() => {
                        break Err(EngineError::Auth(e.to_string()));
                    }
                    Err(e) => {
                        let delay = hub_backoff.next_delay();
                        warn!("Hub connection failed ({}), retrying in {:?}", e, delay);
                        self.engine_tx.send_replace(EngineState::Reconnecting);
                        if self.wait(delay, &mut stream, &mut store).await {
                            break Ok(());
                        }
                        continue;
                    }
                }
            }

            self.engine_tx.send_replace(EngineState::Running);

            let Some(events) = stream.as_mut() else {
                continue;
            };
            tokio::select! {
                _ = self.shutdown_rx.changed() => break Ok(()),
                // A fatal pacing failure must be noticed even when the hub
                // goes quiet, not just on the next push
                _ = display_failed(&mut display) => {
                    warn!("Display pipeline failed; reopening");
                    if let Some(mut d) = display.take() {
                        d.driver.close().await;
                    }
                    self.engine_tx.send_replace(EngineState::Reconnecting);
                }
                event = events.next() => match event {
                    Some(Ok(state)) => {
                        if store.apply(state) {
                            if let Some(mut d) = display.take() {
                                if self.render(&mut d, &store, false).await {
                                    display = Some(d);
                                } else {
                                    self.engine_tx.send_replace(EngineState::Reconnecting);
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Hub subscription lost: {}", e);
                        self.engine_tx.send_replace(EngineState::Reconnecting);
                        stream = None;
                    }
                    None => {
                        self.engine_tx.send_replace(EngineState::Reconnecting);
                        stream = None;
                    }
                },
            }
        };

        // Display first, then the hub connection
        if let Some(mut d) = display.take() {
            d.driver.close().await;
        }
        self.hub.close().await;
        self.engine_tx.send_replace(EngineState::Stopped);
        info!("Engine stopped");
        result
    }

    /// Claim a fresh surface and compile the watch rules against its
    /// capability. Dimension mismatches are configuration errors, not
    /// transient faults.
    async fn open_display(&mut self) -> Result<Display, OpenFailure> {
        let surface = (self.surfaces)();
        let floor = self
            .config
            .display
            .min_frame_interval_ms
            .map(Duration::from_millis);

        let mut driver = DisplayDriver::open(surface, floor, self.render_tx.clone())
            .map_err(OpenFailure::Retry)?;

        let rules: Result<Vec<WatchRule>, ConfigError> = self
            .config
            .watch
            .iter()
            .map(|cfg| WatchRule::from_config(cfg, driver.capability()))
            .collect();

        match rules {
            Ok(rules) => {
                info!(
                    "Display open: {}x{} grid",
                    driver.capability().rows,
                    driver.capability().cols
                );
                Ok(Display {
                    driver,
                    rules,
                    last_pushed: None,
                })
            }
            Err(e) => {
                driver.close().await;
                Err(OpenFailure::Fatal(e))
            }
        }
    }

    /// Connect, reconcile the store from a full snapshot, subscribe. The
    /// snapshot-then-subscribe order can miss changes in the gap; the next
    /// event for the entity repairs it.
    async fn sync_and_subscribe(&mut self, store: &mut StateStore) -> Result<EventStream, HubError> {
        self.hub.connect().await?;
        let states = self.hub.get_states().await?;
        let count = states.len();
        for state in states {
            store.apply(state);
        }
        info!("Reconciled {} watched entity states from hub", count);
        self.hub.subscribe().await
    }

    /// Map the store through the rules and push the result. Returns false if
    /// the display has failed and needs reopening.
    ///
    /// Identical consecutive frames are suppressed unless forced (or
    /// configured otherwise); a full re-render after an outage always goes
    /// through so the matrix provably matches the store.
    async fn render(&self, display: &mut Display, store: &StateStore, force: bool) -> bool {
        let frame = map_all(
            &display.rules,
            store.snapshot(),
            display.driver.capability(),
            self.config.display.composition,
        );

        if !force
            && !self.config.display.render_on_duplicate
            && display.last_pushed.as_ref() == Some(&frame)
        {
            return true;
        }

        match display.driver.push(frame.clone()) {
            Ok(()) => {
                display.last_pushed = Some(frame);
                true
            }
            Err(e) => {
                warn!("Display pipeline failed: {}", e);
                display.driver.close().await;
                false
            }
        }
    }

    /// Sleep with shutdown and event handling: state changes arriving while
    /// a backoff delay runs still land in the store. Returns true on
    /// shutdown.
    async fn wait(
        &mut self,
        delay: Duration,
        stream: &mut Option<EventStream>,
        store: &mut StateStore,
    ) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            match stream.as_mut() {
                Some(events) => {
                    tokio::select! {
                        _ = &mut sleep => return false,
                        _ = self.shutdown_rx.changed() => return true,
                        event = events.next() => match event {
                            Some(Ok(state)) => {
                                store.apply(state);
                            }
                            Some(Err(e)) => {
                                warn!("Hub subscription lost: {}", e);
                                *stream = None;
                            }
                            None => *stream = None,
                        },
                    }
                }
                None => {
                    tokio::select! {
                        _ = &mut sleep => return false,
                        _ = self.shutdown_rx.changed() => return true,
                    }
                }
            }
        }
    }
}
