use std::time::Instant;

/// Single-axis PID controller.
///
/// The error is `setpoint - input`. Without a setpoint the controller is idle
/// and outputs zero.
#[derive(Debug, Clone)]
pub struct PID {
    kp: f64,
    ki: f64,
    kd: f64,
    setpoint: Option<f64>,
    integral: f64,
    last_error: Option<f64>,
    last_time: Option<Instant>,
}

impl PID {
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            setpoint: None,
            integral: 0.0,
            last_error: None,
            last_time: None,
        }
    }

    pub fn set_setpoint(&mut self, setpoint: f64) {
        self.setpoint = Some(setpoint);
    }

    pub fn setpoint(&self) -> Option<f64> {
        self.setpoint
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    /// Update using the wall-clock time since the previous update. The first
    /// update after construction or [`PID::reset`] has no elapsed time, so only
    /// the proportional term contributes.
    pub fn update(&mut self, input: f64) -> f64 {
        let now = Instant::now();
        let dt = self
            .last_time
            .map(|last| now.duration_since(last).as_secs_f64())
            .unwrap_or(0.0);
        self.last_time = Some(now);
        self.update_with_dt(input, dt)
    }

    /// Update with an explicit time step in seconds.
    pub fn update_with_dt(&mut self, input: f64, dt: f64) -> f64 {
        let Some(setpoint) = self.setpoint else {
            return 0.0;
        };
        let error = setpoint - input;

        if dt > 0.0 {
            self.integral += error * dt;
        }

        let last_error = self.last_error.unwrap_or(error);
        let derivative = if dt > 0.0 {
            (error - last_error) / dt
        } else {
            0.0
        };
        self.last_error = Some(error);

        error * self.kp + self.integral * self.ki + derivative * self.kd
    }

    /// Clear the integral and derivative history, keeping gains and setpoint.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_error = None;
        self.last_time = None;
    }
}
