use anyhow::Result;

use crate::Frame;

/// Supplies raw camera frames on demand.
pub trait FrameSource: Send {
    /// Grab the next frame. Returns `None` when no frame is available right now;
    /// the caller simply tries again on its next cycle.
    fn read(&mut self) -> Option<Frame>;

    /// Whether further frames can be expected. A source that is no longer open
    /// ends the control session.
    fn is_open(&self) -> bool {
        true
    }

    /// Release the underlying device. Called exactly once, on shutdown.
    fn release(&mut self) {}
}

/// Two-channel analog output driving the platform actuators.
pub trait ActuatorSink: Send {
    /// Write both channel voltages and latch them together. Inputs are already
    /// clamped to the actuator range by the caller.
    fn set(&mut self, channel_a: f64, channel_b: f64) -> Result<()>;
}
