use anyhow::Result;
use balance_core::{BBox, Frame, NormalizationSettings, Position, TrackerSettings};

use crate::{normalize::FrameNormalizer, region_tracker::RegionTracker};

/// A source of ball positions.
///
/// Implementations normalize the raw frame themselves so that every position,
/// box and frame they hand out lives in the same normalized coordinate space.
pub trait DetectorBackend: Send {
    /// Short human readable name, used in logs.
    fn name(&self) -> &str;

    /// Locate the ball in a raw frame.
    ///
    /// `Ok(None)` is an ordinary miss. `Err` means the backend itself failed and
    /// its state can no longer be trusted.
    fn get_position(&mut self, raw: &Frame) -> Result<Option<Position>>;

    /// Record a cycle in which no frame was available.
    fn frame_unavailable(&mut self) {}

    /// Bounding box of the most recent detection.
    fn get_bbox(&self) -> Option<BBox>;

    /// The most recent frame, after normalization.
    fn get_last_frame(&self) -> Option<&Frame>;

    /// Free any resources held by the backend. Called once on shutdown.
    fn release(&mut self) {}
}

/// Classical computer-vision backend backed by a [`RegionTracker`].
#[derive(Debug)]
pub struct ClassicalBackend {
    tracker: RegionTracker,
}

impl ClassicalBackend {
    pub fn new(normalization: NormalizationSettings, tracker: TrackerSettings) -> Self {
        Self {
            tracker: RegionTracker::new(tracker, FrameNormalizer::new(normalization)),
        }
    }

    pub fn tracker(&self) -> &RegionTracker {
        &self.tracker
    }
}

impl DetectorBackend for ClassicalBackend {
    fn name(&self) -> &str {
        "cv"
    }

    fn get_position(&mut self, raw: &Frame) -> Result<Option<Position>> {
        Ok(self.tracker.detect(raw))
    }

    fn frame_unavailable(&mut self) {
        self.tracker.record_missing_frame();
    }

    fn get_bbox(&self) -> Option<BBox> {
        self.tracker.last_bbox()
    }

    fn get_last_frame(&self) -> Option<&Frame> {
        self.tracker.last_frame()
    }
}
