//! Display delivery pipeline.
//!
//! `DisplayDriver` owns the connection to the physical matrix capability,
//! serializes frame pushes, and enforces the minimum inter-frame spacing.
//! Pushes never block the caller: frames land in a latest-only slot and a
//! pacing task draws the most recent one each time the interval opens, so a
//! burst of N frames inside one window produces a single draw of the last
//! frame (coalesce to latest).

mod surface;

pub use surface::Capability;
pub use surface::DriverError;
pub use surface::GlyphSurface;
pub use surface::SimulatedSurface;

#[cfg(test)]
pub(crate) use surface::mock;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::render::Frame;

/// Transient draw failures are retried this many times before the driver
/// gives up and closes.
const DRAW_RETRIES: u32 = 3;

/// Initial delay between draw retries; doubles per attempt
const DRAW_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Paced, coalescing frame pipeline on top of a [`GlyphSurface`].
pub struct DisplayDriver {
    frame_tx: watch::Sender<Option<Frame>>,
    shutdown_tx: watch::Sender<bool>,
    fatal_rx: watch::Receiver<bool>,
    capability: Capability,
    task: Option<JoinHandle<()>>,
}

impl DisplayDriver {
    /// Claim the surface and start the pacing task.
    ///
    /// `interval_floor` optionally raises the device's minimum frame interval.
    /// `render_tx` receives the unix timestamp of each successful draw, for
    /// status reporting.
    pub fn open(
        mut surface: Box<dyn GlyphSurface>,
        interval_floor: Option<Duration>,
        render_tx: watch::Sender<Option<u64>>,
    ) -> Result<Self, DriverError> {
        let capability = surface.open()?;
        let interval = capability
            .min_frame_interval
            .max(interval_floor.unwrap_or(Duration::ZERO));

        let (frame_tx, frame_rx) = watch::channel(None);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (fatal_tx, fatal_rx) = watch::channel(false);

        let task = tokio::spawn(pace(
            surface, interval, frame_rx, shutdown_rx, fatal_tx, render_tx,
        ));

        Ok(Self {
            frame_tx,
            shutdown_tx,
            fatal_rx,
            capability,
            task: Some(task),
        })
    }

    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    /// Queue one frame for delivery. Never blocks; a frame still waiting for
    /// the interval to open is superseded. Fails once the driver has closed,
    /// which is the fatal signal the engine acts on.
    pub fn push(&self, frame: Frame) -> Result<(), DriverError> {
        if *self.fatal_rx.borrow() {
            return Err(DriverError::Closed);
        }
        self.frame_tx
            .send(Some(frame))
            .map_err(|_| DriverError::Closed)
    }

    /// Resolves once the pacing task has failed permanently. Pending forever
    /// while the driver is healthy or after a clean close.
    pub async fn failed(&mut self) {
        loop {
            if *self.fatal_rx.borrow_and_update() {
                return;
            }
            if self.fatal_rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Release the capability. Idempotent; unblocks an in-flight interval
    /// wait promptly.
    pub async fn close(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

enum DrawOutcome {
    Drawn,
    Shutdown,
    Failed(DriverError),
}

async fn pace(
    mut surface: Box<dyn GlyphSurface>,
    interval: Duration,
    mut frame_rx: watch::Receiver<Option<Frame>>,
    mut shutdown_rx: watch::Receiver<bool>,
    fatal_tx: watch::Sender<bool>,
    render_tx: watch::Sender<Option<u64>>,
) {
    loop {
        tokio::select! {
            changed = frame_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = shutdown_rx.changed() => break,
        }

        let Some(frame) = frame_rx.borrow_and_update().clone() else {
            continue;
        };

        match draw_with_retry(surface.as_mut(), &frame, &mut shutdown_rx).await {
            DrawOutcome::Drawn => {
                let _ = render_tx.send(Some(unix_now()));
            }
            DrawOutcome::Shutdown => break,
            DrawOutcome::Failed(e) => {
                error!("Display draw failed after {} retries: {}", DRAW_RETRIES, e);
                let _ = fatal_tx.send(true);
                break;
            }
        }

        // Minimum inter-frame spacing; frames arriving during the wait
        // overwrite the slot and are picked up as one draw afterwards.
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown_rx.changed() => break,
        }
    }

    surface.close();
}

async fn draw_with_retry(
    surface: &mut dyn GlyphSurface,
    frame: &Frame,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> DrawOutcome {
    let mut delay = DRAW_RETRY_DELAY;
    let mut attempt = 0;

    loop {
        match surface.draw(frame) {
            Ok(()) => return DrawOutcome::Drawn,
            Err(e) if attempt < DRAW_RETRIES => {
                attempt += 1;
                warn!("Display draw failed (attempt {}): {}", attempt, e);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown_rx.changed() => return DrawOutcome::Shutdown,
                }
                delay *= 2;
            }
            Err(e) => return DrawOutcome::Failed(e),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::mock::{MockRecorder, MockSurface};
    use super::*;
    use crate::render::Frame;

    fn frame_with_level(value: u8) -> Frame {
        Frame::from_pixels(2, 2, vec![value; 4])
    }

    fn open_driver(recorder: &MockRecorder) -> DisplayDriver {
        let (render_tx, _render_rx) = watch::channel(None);
        DisplayDriver::open(
            Box::new(MockSurface::new(recorder.clone(), 2, 2)),
            None,
            render_tx,
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_push_draws_once() {
        let recorder = MockRecorder::default();
        let mut driver = open_driver(&recorder);

        driver.push(frame_with_level(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(recorder.draws(), vec![frame_with_level(1)]);
        driver.close().await;
        assert!(recorder.closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_to_latest() {
        let recorder = MockRecorder::default();
        let mut driver = open_driver(&recorder);

        // First frame draws immediately
        driver.push(frame_with_level(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Burst inside the 100ms interval: only the last survives
        driver.push(frame_with_level(2)).unwrap();
        driver.push(frame_with_level(3)).unwrap();
        driver.push(frame_with_level(4)).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(
            recorder.draws(),
            vec![frame_with_level(1), frame_with_level(4)]
        );
        driver.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_draw_failures_are_retried() {
        let recorder = MockRecorder::default();
        recorder.fail_next_draws(2);
        let mut driver = open_driver(&recorder);

        driver.push(frame_with_level(7)).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(recorder.draws(), vec![frame_with_level(7)]);
        driver.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_failure_closes_driver() {
        let recorder = MockRecorder::default();
        recorder.fail_next_draws(DRAW_RETRIES + 1);
        let mut driver = open_driver(&recorder);

        driver.push(frame_with_level(7)).unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(recorder.draws().is_empty());
        assert!(recorder.closed());
        // The fatal state is surfaced on the next push
        assert!(matches!(
            driver.push(frame_with_level(8)),
            Err(DriverError::Closed)
        ));
        driver.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent_and_prompt() {
        let recorder = MockRecorder::default();
        let mut driver = open_driver(&recorder);

        driver.push(frame_with_level(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Close while the pacing task sits in its interval wait
        driver.close().await;
        assert!(recorder.closed());
        driver.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_failure_propagates() {
        let recorder = MockRecorder::default();
        recorder.fail_next_opens(1);
        let (render_tx, _render_rx) = watch::channel(None);
        let result = DisplayDriver::open(
            Box::new(MockSurface::new(recorder.clone(), 2, 2)),
            None,
            render_tx,
        );
        assert!(matches!(result, Err(DriverError::DeviceUnavailable(_))));
    }
}
