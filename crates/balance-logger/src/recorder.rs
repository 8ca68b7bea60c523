use anyhow::{bail, Context, Result};
use balance_core::{BBox, Frame, RecorderSettings};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

const FALLBACK_SIZE: (u32, u32) = (800, 600);

/// One labelled frame in `labels.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub frame: String,
    pub bbox: [u32; 4],
    pub vx: f64,
    pub vy: f64,
}

/// Writes the frames of a session and their labels to disk, for building
/// datasets later.
///
/// Layout of a recording directory:
///
/// - `img/000000.jpg`, ...: every recorded frame
/// - `labels.txt`: `frame, x1, y1, w, h` for each frame with a ball, written as
///   frames arrive
/// - `labels.json`: the same labels plus voltages, written on [`SessionRecorder::finish`]
/// - `seqinfo.ini`: sequence description, written on [`SessionRecorder::finish`]
pub struct SessionRecorder {
    dir: PathBuf,
    img_dir: PathBuf,
    timestamp: String,
    frame_rate: u32,
    camera_id: u32,
    labels: Vec<Label>,
    labels_txt: Option<BufWriter<File>>,
    frame_count: usize,
    frame_size: Option<(u32, u32)>,
}

impl SessionRecorder {
    /// Start a recording in `recording_<timestamp>` under the configured root.
    pub fn create(settings: &RecorderSettings) -> Result<Self> {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        Self::create_at(&settings.output_root, &timestamp, settings)
    }

    /// Start a recording in `<root>/recording_<timestamp>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the recording directory already exists or cannot be
    /// created.
    pub fn create_at(root: &Path, timestamp: &str, settings: &RecorderSettings) -> Result<Self> {
        let dir = root.join(format!("recording_{}", timestamp));
        if dir.exists() {
            bail!("Recording directory already exists: {}", dir.display());
        }
        let img_dir = dir.join("img");
        fs::create_dir_all(&img_dir)
            .with_context(|| format!("Failed to create {}", img_dir.display()))?;

        let labels_txt_path = dir.join("labels.txt");
        let labels_txt = File::create(&labels_txt_path)
            .with_context(|| format!("Failed to create {}", labels_txt_path.display()))?;

        log::info!("Recording session to {}", dir.display());
        Ok(Self {
            dir,
            img_dir,
            timestamp: timestamp.to_string(),
            frame_rate: settings.frame_rate,
            camera_id: settings.camera_id,
            labels: Vec::new(),
            labels_txt: Some(BufWriter::new(labels_txt)),
            frame_count: 0,
            frame_size: None,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn is_finished(&self) -> bool {
        self.labels_txt.is_none()
    }

    /// Save a frame, and its label if the ball was found.
    pub fn record(&mut self, frame: &Frame, bbox: Option<BBox>, voltages: (f64, f64)) -> Result<()> {
        let Some(labels_txt) = self.labels_txt.as_mut() else {
            bail!("Recording already finished");
        };

        let frame_id = format!("{:06}", self.frame_count);
        let frame_path = self.img_dir.join(format!("{}.jpg", frame_id));
        frame
            .save(&frame_path)
            .with_context(|| format!("Failed to save {}", frame_path.display()))?;

        if let Some(bbox) = bbox {
            let [x, y, w, h] = bbox.to_array();
            writeln!(labels_txt, "{}, {}, {}, {}, {}", frame_id, x, y, w, h)?;
            self.labels.push(Label {
                frame: frame_id,
                bbox: bbox.to_array(),
                vx: round2(voltages.0),
                vy: round2(voltages.1),
            });
        }

        self.frame_size.get_or_insert(frame.dimensions());
        self.frame_count += 1;
        Ok(())
    }

    /// Close `labels.txt` and write `labels.json` and `seqinfo.ini`. Only the
    /// first call has any effect.
    pub fn finish(&mut self) -> Result<()> {
        let Some(mut labels_txt) = self.labels_txt.take() else {
            return Ok(());
        };
        labels_txt.flush().context("Failed to flush labels.txt")?;

        let seqinfo_path = self.dir.join("seqinfo.ini");
        fs::write(&seqinfo_path, self.seqinfo())
            .with_context(|| format!("Failed to write {}", seqinfo_path.display()))?;

        let labels_path = self.dir.join("labels.json");
        let labels = serde_json::to_string_pretty(&self.labels)?;
        fs::write(&labels_path, labels)
            .with_context(|| format!("Failed to write {}", labels_path.display()))?;

        log::info!(
            "Recording finished: {} frames, {} labels in {}",
            self.frame_count,
            self.labels.len(),
            self.dir.display()
        );
        Ok(())
    }

    fn seqinfo(&self) -> String {
        let (width, height) = self.frame_size.unwrap_or(FALLBACK_SIZE);
        [
            "[Sequence]".to_string(),
            format!("name=circle_tracking_{}", self.timestamp),
            format!("imDir={}", self.img_dir.display()),
            format!("frameRate={}", self.frame_rate),
            format!("seqLength={}", self.frame_count),
            format!("imWidth={}", width),
            format!("imHeight={}", height),
            "imExt=.jpg".to_string(),
            format!("cameraID={}", self.camera_id),
        ]
        .join("\n")
    }
}

impl Drop for SessionRecorder {
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            log::error!("Failed to finish recording: {}", err);
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
