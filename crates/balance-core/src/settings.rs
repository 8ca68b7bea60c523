use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Which corner of the raw frame a mask is anchored to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

/// A rectangle painted over one corner of the rotated raw frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CornerMask {
    pub corner: Corner,
    /// Height of the masked area in pixels.
    pub rows: u32,
    /// Width of the masked area in pixels.
    pub cols: u32,
}

/// Border cropped off the masked frame, in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropBorders {
    pub top: u32,
    pub bottom: u32,
    pub left: u32,
    pub right: u32,
}

/// Settings for turning a raw camera frame into the normalized frame every
/// detector and the recorder work on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationSettings {
    /// The camera is mounted upside down.
    pub rotate_180: bool,
    /// Gray level painted over masked corners.
    pub mask_value: u8,
    pub corner_masks: Vec<CornerMask>,
    pub crop: CropBorders,
}

impl Default for NormalizationSettings {
    fn default() -> Self {
        Self {
            rotate_180: true,
            mask_value: 128,
            corner_masks: vec![
                CornerMask {
                    corner: Corner::TopLeft,
                    rows: 90,
                    cols: 180,
                },
                CornerMask {
                    corner: Corner::BottomLeft,
                    rows: 95,
                    cols: 170,
                },
                CornerMask {
                    corner: Corner::TopRight,
                    rows: 100,
                    cols: 150,
                },
                CornerMask {
                    corner: Corner::BottomRight,
                    rows: 95,
                    cols: 165,
                },
            ],
            crop: CropBorders {
                top: 0,
                bottom: 0,
                left: 86,
                right: 70,
            },
        }
    }
}

/// Settings for the classical ROI ball tracker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    /// Half the side of the local search window around the last position, in px.
    pub roi_half_extent: u32,
    /// Margin dropped on every side for a full-frame search, in px.
    pub search_margin: u32,
    /// Time after the last detection during which the previous ROI is reused, in seconds.
    pub roi_reset_timeout: f64,
    /// Standard deviation of the Gaussian blur.
    pub blur_sigma: f32,
    pub canny_low: f32,
    pub canny_high: f32,
    /// Radius of the elliptical kernel used to dilate the edge map (2 gives 5x5).
    pub dilate_radius: u8,
    /// Minimum number of points of an accepted contour.
    pub min_contour_points: usize,
    /// An accepted contour must enclose strictly more than this many px².
    pub min_contour_area: f64,
    /// Minimum side of a synthesized bounding box, in px.
    pub min_bbox_size: f64,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            roi_half_extent: 120,
            search_margin: 50,
            roi_reset_timeout: 0.5,
            blur_sigma: 2.0,
            canny_low: 100.0,
            canny_high: 200.0,
            dilate_radius: 2,
            min_contour_points: 5,
            min_contour_area: 150.0,
            min_bbox_size: 20.0,
        }
    }
}

/// Settings for the position smoother.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    /// Weight of a new sample in the exponential blend.
    pub alpha: f64,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self { alpha: 0.3 }
    }
}

/// Settings for the dual-axis PID controller and the voltage mapping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Target x position in px.
    pub x_setpoint: f64,
    /// Target y position in px.
    pub y_setpoint: f64,
    /// Divisor bringing the x PID output into a unitless range.
    pub x_scale: f64,
    /// Divisor bringing the y PID output into a unitless range.
    pub y_scale: f64,
    /// Output voltage for zero control effort.
    pub neutral_voltage: f64,
    /// Voltage swing for a unit control signal.
    pub half_range: f64,
    pub min_voltage: f64,
    pub max_voltage: f64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            kp: 0.4,
            ki: 0.2,
            kd: 0.1,
            x_setpoint: 315.0,
            y_setpoint: 300.0,
            x_scale: 315.0,
            y_scale: 300.0,
            neutral_voltage: 2.5,
            half_range: 2.5,
            min_voltage: 0.0,
            max_voltage: 5.0,
        }
    }
}

/// Settings for the control loop itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopSettings {
    /// Lower bound on the duration of one cycle, in milliseconds.
    pub min_cycle_delay_ms: u64,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            min_cycle_delay_ms: 10,
        }
    }
}

/// Settings for session recording.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderSettings {
    pub enabled: bool,
    /// Directory in which `recording_<timestamp>` folders are created.
    pub output_root: PathBuf,
    /// Frame rate written to the sequence description.
    pub frame_rate: u32,
    /// Camera identifier written to the sequence description.
    pub camera_id: u32,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            output_root: PathBuf::from("."),
            frame_rate: 25,
            camera_id: 1,
        }
    }
}

/// Settings for the learned detector's inference worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceSettings {
    /// Interpreter used to launch the worker.
    pub python: String,
    /// Worker script. Relative paths are resolved against the working directory.
    pub script: PathBuf,
    /// Model weights handed to the worker.
    pub model_path: PathBuf,
    /// How long to wait for the worker to connect, in milliseconds.
    pub connect_timeout_ms: u64,
    /// How long a single inference may take before the worker is considered dead.
    pub response_timeout_ms: u64,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            script: PathBuf::from("py/ball_detector.py"),
            model_path: PathBuf::from("best_yolov5_ball_model.pt"),
            connect_timeout_ms: 5000,
            response_timeout_ms: 5000,
        }
    }
}

/// Settings for the live camera, captured through an external command that
/// writes raw RGB24 frames of `width` x `height` to its stdout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Program and arguments of the capture command.
    pub command: Vec<String>,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        let command = [
            "ffmpeg",
            "-loglevel",
            "error",
            "-f",
            "v4l2",
            "-video_size",
            "800x600",
            "-i",
            "/dev/video0",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgb24",
            "-",
        ];
        Self {
            command: command.iter().map(|s| s.to_string()).collect(),
            width: 800,
            height: 600,
        }
    }
}

/// Settings for the DAC bridge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorSettings {
    pub baud_rate: u32,
    /// External reference voltage of the DAC channels.
    pub vref: f64,
}

impl Default for ActuatorSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115200,
            vref: 5.1,
        }
    }
}

/// All settings of a balancing session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceSettings {
    pub normalization: NormalizationSettings,
    pub tracker: TrackerSettings,
    pub filter: FilterSettings,
    pub controller: ControllerSettings,
    pub loop_settings: LoopSettings,
    pub recorder: RecorderSettings,
    pub camera: CameraSettings,
    pub inference: InferenceSettings,
    pub actuator: ActuatorSettings,
}

impl BalanceSettings {
    /// Load the settings from a file, or store the default settings if the file does
    /// not exist. A file that exists but cannot be parsed is reported and the defaults
    /// are used instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, or if writing the
    /// default settings fails.
    pub fn load_or_insert(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(settings) => Ok(settings),
                Err(err) => {
                    log::warn!(
                        "Failed to parse settings from {}: {}. Using defaults.",
                        path.display(),
                        err
                    );
                    Ok(Self::default())
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let settings = Self::default();
                settings.store(path)?;
                log::info!("Wrote default settings to {}", path.display());
                Ok(settings)
            }
            Err(err) => {
                Err(err).with_context(|| format!("Failed to read settings {}", path.display()))
            }
        }
    }

    /// Store the settings in the given file.
    pub fn store(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write settings {}", path.display()))
    }
}
