use balance_core::{ControllerSettings, Position};

use crate::pid::PID;

/// Voltages for the two actuator channels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Voltages {
    pub a: f64,
    pub b: f64,
}

/// Two PID loops (one per image axis) followed by a differential mix onto
/// two actuator channels.
///
/// Each PID output is divided by its axis scale, then
///
/// ```text
/// a = neutral + half_range * x - half_range * y
/// b = neutral + half_range * x + half_range * y
/// ```
///
/// and both channels are clamped to `[min_voltage, max_voltage]`.
#[derive(Debug, Clone)]
pub struct DualAxisController {
    pid_x: PID,
    pid_y: PID,
    settings: ControllerSettings,
}

impl DualAxisController {
    pub fn new(settings: &ControllerSettings) -> Self {
        let mut pid_x = PID::new(settings.kp, settings.ki, settings.kd);
        pid_x.set_setpoint(settings.x_setpoint);
        let mut pid_y = PID::new(settings.kp, settings.ki, settings.kd);
        pid_y.set_setpoint(settings.y_setpoint);
        Self {
            pid_x,
            pid_y,
            settings: settings.clone(),
        }
    }

    pub fn setpoint(&self) -> Position {
        Position::new(self.settings.x_setpoint, self.settings.y_setpoint)
    }

    /// Run one control step against the wall clock.
    pub fn step(&mut self, position: Position) -> Voltages {
        let x_signal = self.pid_x.update(position.x) / self.settings.x_scale;
        let y_signal = self.pid_y.update(position.y) / self.settings.y_scale;
        self.mix(x_signal, y_signal)
    }

    /// Run one control step with an explicit time step in seconds.
    pub fn step_with_dt(&mut self, position: Position, dt: f64) -> Voltages {
        let x_signal = self.pid_x.update_with_dt(position.x, dt) / self.settings.x_scale;
        let y_signal = self.pid_y.update_with_dt(position.y, dt) / self.settings.y_scale;
        self.mix(x_signal, y_signal)
    }

    /// Map normalized axis signals onto clamped channel voltages.
    pub fn mix(&self, x_signal: f64, y_signal: f64) -> Voltages {
        let neutral = self.settings.neutral_voltage;
        let half_range = self.settings.half_range;
        Voltages {
            a: self.clamp(neutral + half_range * x_signal - half_range * y_signal),
            b: self.clamp(neutral + half_range * x_signal + half_range * y_signal),
        }
    }

    /// Voltages for zero control effort.
    pub fn neutral(&self) -> Voltages {
        let neutral = self.clamp(self.settings.neutral_voltage);
        Voltages {
            a: neutral,
            b: neutral,
        }
    }

    /// Clear integral and derivative history of both axes.
    pub fn reset(&mut self) {
        self.pid_x.reset();
        self.pid_y.reset();
    }

    fn clamp(&self, voltage: f64) -> f64 {
        let (min, max) = (self.settings.min_voltage, self.settings.max_voltage);
        if voltage.is_nan() {
            log::warn!("Controller produced NaN voltage, using neutral");
            return self.settings.neutral_voltage.clamp(min, max);
        }
        voltage.clamp(min, max)
    }
}
