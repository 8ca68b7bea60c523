use std::{
    fmt, thread,
    time::{Duration, Instant},
};

use anyhow::{bail, Result};
use balance_control::{DualAxisController, PositionFilter, Voltages};
use balance_core::{
    ActuatorSink, ControllerSettings, FilterSettings, FrameSource, LoopSettings, Position,
};
use balance_logger::SessionRecorder;
use balance_vision::DetectorBackend;
use tokio::sync::broadcast::{self, error::TryRecvError};

#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    pub filter: FilterSettings,
    pub controller: ControllerSettings,
    pub loop_settings: LoopSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Running,
    ShuttingDown,
    Terminated,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// A stop was requested (interrupt or quit key).
    Stopped,
    /// The frame source has no more frames.
    SourceClosed,
    /// The detector backend failed.
    BackendFailure,
    /// Writing to the actuator failed.
    HardwareFailure,
    /// The executor was dropped without being run to completion.
    Dropped,
}

impl ShutdownReason {
    /// Whether the session ended without a failure.
    pub fn is_clean(&self) -> bool {
        matches!(self, ShutdownReason::Stopped | ShutdownReason::SourceClosed)
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShutdownReason::Stopped => "stopped",
            ShutdownReason::SourceClosed => "frame source closed",
            ShutdownReason::BackendFailure => "backend failure",
            ShutdownReason::HardwareFailure => "hardware failure",
            ShutdownReason::Dropped => "dropped",
        };
        write!(f, "{}", s)
    }
}

/// Counters of a control session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub cycles: u64,
    pub detections: u64,
    pub misses: u64,
    pub unavailable_frames: u64,
}

/// What one control cycle did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleReport {
    /// Position reported by the backend, if any.
    pub raw: Option<Position>,
    /// Smoothed position fed to the controller.
    pub position: Position,
    pub voltages: Voltages,
}

#[derive(Debug)]
enum CycleError {
    Backend(anyhow::Error),
    Hardware(anyhow::Error),
}

/// Runs the control loop: frame, detection, smoothing, control, actuation and
/// optional recording, once per cycle.
///
/// The executor owns the frame source, backend, actuator and recorder for the
/// whole session and releases them exactly once when it shuts down, whichever
/// way the session ends. If it is dropped while still running, the shutdown
/// sequence runs from `Drop`.
pub struct Executor {
    source: Box<dyn FrameSource>,
    backend: Box<dyn DetectorBackend>,
    actuator: Box<dyn ActuatorSink>,
    recorder: Option<SessionRecorder>,
    filter: PositionFilter,
    controller: DualAxisController,
    cycle_delay: Duration,
    state: ExecutorState,
    stats: SessionStats,
    shutdown_reason: Option<ShutdownReason>,
}

impl Executor {
    pub fn new(
        config: ExecutorConfig,
        source: Box<dyn FrameSource>,
        backend: Box<dyn DetectorBackend>,
        actuator: Box<dyn ActuatorSink>,
        recorder: Option<SessionRecorder>,
    ) -> Self {
        Self {
            source,
            backend,
            actuator,
            recorder,
            filter: PositionFilter::new(config.filter.alpha),
            controller: DualAxisController::new(&config.controller),
            cycle_delay: Duration::from_millis(config.loop_settings.min_cycle_delay_ms),
            state: ExecutorState::Running,
            stats: SessionStats::default(),
            shutdown_reason: None,
        }
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn shutdown_reason(&self) -> Option<ShutdownReason> {
        self.shutdown_reason
    }

    /// Run cycles until a stop is requested on `stop_rx`, the frame source
    /// closes or a stage fails, then shut down.
    ///
    /// Returns the reason the session ended. A backend failure ends the session
    /// but is reported through the reason; an actuator failure is returned as an
    /// error after the neutral voltages have been attempted.
    pub fn run(&mut self, mut stop_rx: broadcast::Receiver<()>) -> Result<ShutdownReason> {
        if self.state != ExecutorState::Running {
            bail!("Executor is not running");
        }
        log::info!(
            "Starting control loop with the {} backend, setpoint {:?}",
            self.backend.name(),
            self.controller.setpoint()
        );

        let (reason, failure) = loop {
            if stop_requested(&mut stop_rx) {
                log::info!("Stop requested");
                break (ShutdownReason::Stopped, None);
            }
            if !self.source.is_open() {
                log::info!("Frame source closed");
                break (ShutdownReason::SourceClosed, None);
            }

            let start = Instant::now();
            match self.cycle() {
                Ok(_) => {}
                Err(CycleError::Backend(err)) => {
                    log::error!("Detector backend failed: {:?}", err);
                    break (ShutdownReason::BackendFailure, None);
                }
                Err(CycleError::Hardware(err)) => {
                    log::error!("Failed to write actuator voltages: {:?}", err);
                    break (ShutdownReason::HardwareFailure, Some(err));
                }
            }

            let elapsed = start.elapsed();
            if elapsed < self.cycle_delay {
                thread::sleep(self.cycle_delay - elapsed);
            }
        };

        let shutdown = self.shutdown(reason);
        match failure {
            Some(err) => Err(err),
            None => shutdown.map(|_| reason),
        }
    }

    /// Run a single control cycle.
    fn cycle(&mut self) -> Result<CycleReport, CycleError> {
        let frame = self.source.read();
        let raw = match &frame {
            Some(frame) => {
                let raw = self
                    .backend
                    .get_position(frame)
                    .map_err(CycleError::Backend)?;
                if raw.is_some() {
                    self.stats.detections += 1;
                } else {
                    log::trace!("No ball detected");
                    self.stats.misses += 1;
                }
                raw
            }
            None => {
                log::debug!("No frame available");
                self.backend.frame_unavailable();
                self.stats.unavailable_frames += 1;
                None
            }
        };

        let position = self.filter.update(raw);
        let voltages = self.controller.step(position);
        self.actuator
            .set(voltages.a, voltages.b)
            .map_err(CycleError::Hardware)?;
        log::debug!(
            "X = {:.2}, Y = {:.2} | VCh1 = {:.2} V, VCh2 = {:.2} V",
            position.x,
            position.y,
            voltages.a,
            voltages.b
        );

        if frame.is_some() {
            self.record(voltages);
        }
        self.stats.cycles += 1;

        Ok(CycleReport {
            raw,
            position,
            voltages,
        })
    }

    fn record(&mut self, voltages: Voltages) {
        let Some(recorder) = self.recorder.as_mut() else {
            return;
        };
        let Some(frame) = self.backend.get_last_frame() else {
            return;
        };
        if let Err(err) = recorder.record(frame, self.backend.get_bbox(), (voltages.a, voltages.b))
        {
            log::error!("Failed to record frame, recording stopped: {:?}", err);
            self.recorder = None;
        }
    }

    /// Drive the actuator to neutral and release every resource. Runs at most
    /// once; later calls do nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the neutral voltages could not be written. All other
    /// resources are still released in that case.
    pub fn shutdown(&mut self, reason: ShutdownReason) -> Result<()> {
        if self.state != ExecutorState::Running {
            return Ok(());
        }
        self.state = ExecutorState::ShuttingDown;
        self.shutdown_reason = Some(reason);
        log::info!("Shutting down ({})", reason);

        let neutral = self.controller.neutral();
        let neutral_res = self.actuator.set(neutral.a, neutral.b);
        if let Err(err) = &neutral_res {
            log::error!("Failed to set neutral voltages: {:?}", err);
        }

        self.source.release();
        self.backend.release();
        if let Some(mut recorder) = self.recorder.take() {
            if let Err(err) = recorder.finish() {
                log::error!("Failed to finish recording: {:?}", err);
            }
        }

        self.state = ExecutorState::Terminated;
        let SessionStats {
            cycles,
            detections,
            misses,
            unavailable_frames,
        } = self.stats;
        log::info!(
            "Session ended ({}): {} cycles, {} detections, {} misses, {} unavailable frames",
            reason,
            cycles,
            detections,
            misses,
            unavailable_frames
        );
        neutral_res
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown(ShutdownReason::Dropped) {
            log::error!("Shutdown on drop failed: {:?}", err);
        }
    }
}

fn stop_requested(stop_rx: &mut broadcast::Receiver<()>) -> bool {
    match stop_rx.try_recv() {
        Ok(()) => true,
        Err(TryRecvError::Empty) => false,
        Err(TryRecvError::Lagged(_)) => true,
        // Nobody can ask us to stop anymore
        Err(TryRecvError::Closed) => false,
    }
}
