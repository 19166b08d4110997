//! The display capability contract.
//!
//! The vendor glyph-matrix SDK is an external collaborator; the core only
//! depends on this trait. A binding claims the hardware in `open`, reports
//! the grid dimensions and minimum frame interval, and accepts synchronous
//! frame draws until `close`.

use std::time::Duration;

use tracing::debug;

use crate::render::Frame;

/// Grid dimensions and pacing limit reported by the display at `open`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub rows: usize,
    pub cols: usize,

    /// Minimum time the device needs between consecutive frames
    pub min_frame_interval: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The capability could not be claimed (e.g. held by another process)
    #[error("display capability unavailable: {0}")]
    DeviceUnavailable(String),

    /// A fault while pushing a frame
    #[error("display fault: {0}")]
    Device(String),

    #[error("display driver closed")]
    Closed,
}

/// Exclusive handle to a glyph-matrix display.
pub trait GlyphSurface: Send + 'static {
    /// Claim the display and report its capability
    fn open(&mut self) -> Result<Capability, DriverError>;

    /// Send one frame to the hardware. Synchronous; expected to be fast.
    fn draw(&mut self, frame: &Frame) -> Result<(), DriverError>;

    /// Release the capability; idempotent
    fn close(&mut self);
}

/// Software stand-in for the hardware binding: a 25x25 matrix logged as
/// ASCII. Lets the daemon run end-to-end on machines without the device.
#[derive(Debug, Default)]
pub struct SimulatedSurface {
    open: bool,
}

impl SimulatedSurface {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GlyphSurface for SimulatedSurface {
    fn open(&mut self) -> Result<Capability, DriverError> {
        self.open = true;
        Ok(Capability {
            rows: 25,
            cols: 25,
            min_frame_interval: Duration::from_millis(100),
        })
    }

    fn draw(&mut self, frame: &Frame) -> Result<(), DriverError> {
        if !self.open {
            return Err(DriverError::Closed);
        }
        debug!(
            animation = %frame.animation,
            "simulated frame:\n{}",
            frame.to_ascii()
        );
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Debug, Default)]
    struct MockState {
        draws: Vec<Frame>,
        closed: bool,
        open_failures: u32,
        draw_failures: u32,
    }

    /// Shared view into a mock surface, usable after the surface itself has
    /// been moved into the driver.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct MockRecorder(Arc<Mutex<MockState>>);

    impl MockRecorder {
        pub fn draws(&self) -> Vec<Frame> {
            self.0.lock().unwrap().draws.clone()
        }

        pub fn closed(&self) -> bool {
            self.0.lock().unwrap().closed
        }

        pub fn fail_next_draws(&self, count: u32) {
            self.0.lock().unwrap().draw_failures = count;
        }

        pub fn fail_next_opens(&self, count: u32) {
            self.0.lock().unwrap().open_failures = count;
        }
    }

    /// Mock display surface recording draws into a shared recorder
    #[derive(Debug)]
    pub(crate) struct MockSurface {
        recorder: MockRecorder,
        capability: Capability,
    }

    impl MockSurface {
        pub fn new(recorder: MockRecorder, rows: usize, cols: usize) -> Self {
            Self {
                recorder,
                capability: Capability {
                    rows,
                    cols,
                    min_frame_interval: Duration::from_millis(100),
                },
            }
        }
    }

    impl GlyphSurface for MockSurface {
        fn open(&mut self) -> Result<Capability, DriverError> {
            let mut state = self.recorder.0.lock().unwrap();
            if state.open_failures > 0 {
                state.open_failures -= 1;
                return Err(DriverError::DeviceUnavailable("held elsewhere".into()));
            }
            state.closed = false;
            Ok(self.capability.clone())
        }

        fn draw(&mut self, frame: &Frame) -> Result<(), DriverError> {
            let mut state = self.recorder.0.lock().unwrap();
            if state.draw_failures > 0 {
                state.draw_failures -= 1;
                return Err(DriverError::Device("transient fault".into()));
            }
            state.draws.push(frame.clone());
            Ok(())
        }

        fn close(&mut self) {
            self.recorder.0.lock().unwrap().closed = true;
        }
    }
}
