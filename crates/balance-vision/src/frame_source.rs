use anyhow::{bail, Context, Result};
use balance_core::{CameraSettings, Frame, FrameSource};
use std::{
    fs,
    io::{BufReader, ErrorKind, Read},
    path::{Path, PathBuf},
    process::{Child, ChildStdout, Command, Stdio},
};

use crate::process::own_process_group;

const EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Replays the images of a directory as if they came from a camera.
///
/// Files are played in lexicographic order, so the zero-padded names written
/// by the session recorder come back in capture order.
#[derive(Debug)]
pub struct DirectoryFrameSource {
    files: Vec<PathBuf>,
    next: usize,
    looping: bool,
    released: bool,
}

impl DirectoryFrameSource {
    pub fn open(dir: impl AsRef<Path>, looping: bool) -> Result<Self> {
        let dir = dir.as_ref();
        let mut files = fs::read_dir(dir)
            .with_context(|| format!("Failed to read frame directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && has_image_extension(path))
            .collect::<Vec<_>>();
        if files.is_empty() {
            bail!("No images found in {}", dir.display());
        }
        files.sort();
        log::info!("Replaying {} frames from {}", files.len(), dir.display());

        Ok(Self {
            files,
            next: 0,
            looping,
            released: false,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for DirectoryFrameSource {
    fn read(&mut self) -> Option<Frame> {
        if !self.is_open() {
            return None;
        }
        let path = &self.files[self.next];
        self.next += 1;
        if self.looping && self.next == self.files.len() {
            self.next = 0;
        }

        match image::open(path) {
            Ok(img) => Some(img.to_rgb8()),
            Err(err) => {
                log::debug!("Failed to read frame {}: {}", path.display(), err);
                None
            }
        }
    }

    fn is_open(&self) -> bool {
        !self.released && self.next < self.files.len()
    }

    fn release(&mut self) {
        self.released = true;
    }
}

/// Reads raw RGB24 frames from the stdout of a capture command, e.g. `ffmpeg`
/// grabbing a V4L2 device.
pub struct CommandFrameSource {
    child: Child,
    stdout: BufReader<ChildStdout>,
    width: u32,
    height: u32,
    buf: Vec<u8>,
    open: bool,
}

impl CommandFrameSource {
    pub fn spawn(settings: &CameraSettings) -> Result<Self> {
        let Some((program, args)) = settings.command.split_first() else {
            bail!("Camera command is empty");
        };
        if settings.width == 0 || settings.height == 0 {
            bail!(
                "Invalid camera frame size {}x{}",
                settings.width,
                settings.height
            );
        }

        log::info!("Starting camera: {}", settings.command.join(" "));
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        let mut child = own_process_group(&mut command)
            .spawn()
            .with_context(|| format!("Failed to start camera command {}", program))?;
        let Some(stdout) = child.stdout.take() else {
            bail!("Camera command has no stdout");
        };

        Ok(Self {
            child,
            stdout: BufReader::new(stdout),
            width: settings.width,
            height: settings.height,
            buf: vec![0; settings.width as usize * settings.height as usize * 3],
            open: true,
        })
    }
}

impl FrameSource for CommandFrameSource {
    fn read(&mut self) -> Option<Frame> {
        if !self.open {
            return None;
        }
        match self.stdout.read_exact(&mut self.buf) {
            Ok(()) => Frame::from_raw(self.width, self.height, self.buf.clone()),
            Err(err) => {
                if err.kind() == ErrorKind::UnexpectedEof {
                    log::info!("Camera stream ended");
                } else {
                    log::error!("Failed to read from camera: {}", err);
                }
                self.open = false;
                None
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn release(&mut self) {
        self.open = false;
        if let Ok(None) = self.child.try_wait() {
            if let Err(err) = self.child.kill() {
                log::error!("Failed to stop camera command: {}", err);
            }
        }
        let _ = self.child.wait();
    }
}

impl Drop for CommandFrameSource {
    fn drop(&mut self) {
        self.release();
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_frames(dir: &Path, names: &[&str]) {
        for (i, name) in names.iter().enumerate() {
            RgbImage::from_pixel(8, 6, Rgb([i as u8 * 10, 0, 0]))
                .save(dir.join(name))
                .unwrap();
        }
    }

    #[test]
    fn test_replays_in_name_order_then_closes() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), &["000001.png", "000000.png", "000002.png"]);
        fs::write(dir.path().join("labels.txt"), "ignored").unwrap();

        let mut source = DirectoryFrameSource::open(dir.path(), false).unwrap();
        assert_eq!(source.len(), 3);

        let reds: Vec<u8> = std::iter::from_fn(|| source.read())
            .map(|frame| frame.get_pixel(0, 0)[0])
            .collect();
        assert_eq!(reds, vec![10, 0, 20]);
        assert!(!source.is_open());
        assert!(source.read().is_none());
    }

    #[test]
    fn test_looping_source_stays_open() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), &["a.png", "b.png"]);

        let mut source = DirectoryFrameSource::open(dir.path(), true).unwrap();
        for _ in 0..5 {
            assert!(source.read().is_some());
        }
        assert!(source.is_open());

        source.release();
        assert!(!source.is_open());
        assert!(source.read().is_none());
    }

    #[test]
    fn test_unreadable_file_is_unavailable_frame() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), &["b.png"]);
        fs::write(dir.path().join("a.jpg"), b"not a jpeg").unwrap();

        let mut source = DirectoryFrameSource::open(dir.path(), false).unwrap();
        assert!(source.read().is_none());
        assert!(source.is_open());
        assert!(source.read().is_some());
        assert!(!source.is_open());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_source_splits_stream_into_frames() {
        let dir = tempfile::tempdir().unwrap();
        let stream = dir.path().join("stream.raw");
        // Two 2x2 frames and a truncated third
        let mut bytes = vec![7u8; 12];
        bytes.extend(vec![9u8; 12]);
        bytes.extend(vec![1u8; 5]);
        fs::write(&stream, bytes).unwrap();

        let settings = CameraSettings {
            command: vec!["cat".to_string(), stream.to_string_lossy().into_owned()],
            width: 2,
            height: 2,
        };
        let mut source = CommandFrameSource::spawn(&settings).unwrap();
        assert_eq!(source.read().unwrap().get_pixel(1, 1)[0], 7);
        assert_eq!(source.read().unwrap().get_pixel(0, 0)[2], 9);
        assert!(source.is_open());
        assert!(source.read().is_none());
        assert!(!source.is_open());
        source.release();
    }

    #[test]
    fn test_empty_camera_command_is_an_error() {
        let settings = CameraSettings {
            command: vec![],
            ..Default::default()
        };
        assert!(CommandFrameSource::spawn(&settings).is_err());
    }

    #[test]
    fn test_empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DirectoryFrameSource::open(dir.path(), false).is_err());
    }
}
