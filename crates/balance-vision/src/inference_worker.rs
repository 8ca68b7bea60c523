use anyhow::{bail, Context, Result};
use balance_core::{Frame, InferenceSettings};
use image::codecs::jpeg::JpegEncoder;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::BufWriter,
    path::PathBuf,
    process::{Child, Command, Stdio},
    thread,
    time::{Duration, Instant},
};
use tempfile::TempDir;

use crate::{
    ipc::{IpcListener, IpcReceiver, IpcSender},
    learned::{BallModel, Candidate},
    process::own_process_group,
};

const FRAME_JPEG_QUALITY: u8 = 95;
const EXIT_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// A message to the inference worker.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum WorkerMsg {
    /// Run the model on the JPEG stored at `path`
    Infer {
        path: String,
        width: u32,
        height: u32,
    },
    /// Terminates the worker process
    Term,
}

/// A message from the inference worker.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerEvent {
    /// Model output, one `[x1, y1, x2, y2, confidence, class]` row per box
    Detections { boxes: Vec<[f64; 6]> },
    /// The worker failed and is exiting
    Crash { msg: String },
}

/// Client for a child process running the ball detection model.
///
/// The child is started with `BALANCE_IPC_HOST` and `BALANCE_IPC_PORT` set and
/// must connect back within the connect timeout. Frames are handed over as
/// JPEG files in a scratch directory owned by the client.
pub struct InferenceWorker {
    child: Option<Child>,
    sender: IpcSender,
    receiver: IpcReceiver,
    scratch: TempDir,
    closed: bool,
}

impl InferenceWorker {
    /// Launch the worker and wait for it to connect.
    pub fn spawn(settings: &InferenceSettings) -> Result<InferenceWorker> {
        let listener = IpcListener::new()?;
        let host = listener.host().to_owned();
        let port = listener.port();

        log::info!(
            "Running {} {}",
            settings.python,
            settings.script.display()
        );
        let mut command = Command::new(&settings.python);
        command
            .arg(&settings.script)
            .arg("--model")
            .arg(&settings.model_path)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .stdin(Stdio::null())
            .env("BALANCE_IPC_HOST", host)
            .env("BALANCE_IPC_PORT", port.to_string());
        let mut child = own_process_group(&mut command)
            .spawn()
            .with_context(|| format!("Failed to launch {}", settings.python))?;

        let conn = listener.wait_for_conn(Duration::from_millis(settings.connect_timeout_ms));
        let (sender, receiver) = match conn {
            Ok(conn) => conn,
            Err(err) => {
                if let Err(kill_err) = child.kill() {
                    log::error!("Failed to kill inference worker: {}", kill_err);
                }
                return Err(err.context("Inference worker did not connect"));
            }
        };
        log::debug!("Inference worker connected");

        let mut worker = Self::with_connection(sender, receiver)?;
        worker
            .receiver
            .set_read_timeout(Some(Duration::from_millis(settings.response_timeout_ms)))?;
        worker.child = Some(child);
        Ok(worker)
    }

    fn with_connection(sender: IpcSender, receiver: IpcReceiver) -> Result<InferenceWorker> {
        let scratch = tempfile::Builder::new()
            .prefix("balance-frames")
            .tempdir()
            .context("Failed to create the frame scratch directory")?;
        Ok(InferenceWorker {
            child: None,
            sender,
            receiver,
            scratch,
            closed: false,
        })
    }

    pub fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => is_proc_alive(child),
            None => !self.closed,
        }
    }

    fn send(&mut self, msg: &WorkerMsg) -> Result<()> {
        let data = serde_json::to_string(msg)?;
        self.sender.send(&data)
    }

    fn recv(&mut self) -> Result<WorkerEvent> {
        if !self.is_alive() {
            bail!("Inference worker exited unexpectedly");
        }
        let line = self.receiver.recv()?;
        serde_json::from_str(line.trim())
            .with_context(|| format!("Malformed message from inference worker: {}", line.trim()))
    }

    fn write_frame(&self, frame: &Frame) -> Result<PathBuf> {
        let path = self.scratch.path().join("frame.jpg");
        let file = File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let mut encoder = JpegEncoder::new_with_quality(BufWriter::new(file), FRAME_JPEG_QUALITY);
        encoder.encode_image(frame)?;
        Ok(path)
    }
}

impl BallModel for InferenceWorker {
    fn infer(&mut self, frame: &Frame) -> Result<Vec<Candidate>> {
        if self.closed {
            bail!("Inference worker already closed");
        }
        let path = self.write_frame(frame)?;
        let (width, height) = frame.dimensions();
        self.send(&WorkerMsg::Infer {
            path: path.to_string_lossy().into_owned(),
            width,
            height,
        })?;

        match self.recv()? {
            WorkerEvent::Detections { boxes } => Ok(boxes
                .iter()
                .map(|[x1, y1, x2, y2, confidence, class]| Candidate {
                    x1: *x1,
                    y1: *y1,
                    x2: *x2,
                    y2: *y2,
                    confidence: *confidence,
                    class_id: class.max(0.0) as u32,
                })
                .collect()),
            WorkerEvent::Crash { msg } => bail!("Inference worker crashed: {}", msg),
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = self.send(&WorkerMsg::Term) {
            log::debug!("Failed to send Term to inference worker: {}", err);
        }

        let Some(mut child) = self.child.take() else {
            return;
        };
        let start = Instant::now();
        while is_proc_alive(&mut child) {
            if start.elapsed() > EXIT_GRACE_PERIOD {
                log::warn!("Inference worker did not exit, killing it");
                if let Err(err) = child.kill() {
                    log::error!("Failed to kill inference worker: {}", err);
                }
                let _ = child.wait();
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Drop for InferenceWorker {
    fn drop(&mut self) {
        self.close();
    }
}

fn is_proc_alive(proc: &mut Child) -> bool {
    match proc.try_wait() {
        Ok(Some(_)) => false,
        Ok(None) => true,
        Err(_) => false,
    }
}
