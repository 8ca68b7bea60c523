use std::time::{Duration, Instant};

use balance_core::{BBox, Frame, Position, Roi, TrackerSettings};
use image::{imageops, GrayImage};
use imageproc::{
    contours::{find_contours, BorderType, Contour},
    filter::gaussian_blur_f32,
};

use crate::{
    edges::{canny_l1, dilate_elliptical},
    ellipse::fit_ellipse,
    normalize::FrameNormalizer,
};

/// Mutable state carried by [`RegionTracker`] from one frame to the next.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerState {
    /// Position found in the most recent frame, if any.
    pub ball: Option<Position>,
    /// ROI in which the ball was last found.
    pub last_roi: Option<Roi>,
    /// When the ball was last found.
    pub last_detection: Option<Instant>,
    /// Full major and minor axis lengths of the last fitted ellipse.
    pub ellipse_size: Option<(f64, f64)>,
}

/// Classical ball detector.
///
/// Searches a window around the last known position. After a miss, the window
/// in which the ball was last seen is searched again until the reset timeout
/// expires; after that the whole (inset) frame is searched. Within the window
/// the frame goes through blur, Canny edges and dilation, and an ellipse is
/// fitted to the largest external contour.
#[derive(Debug)]
pub struct RegionTracker {
    settings: TrackerSettings,
    normalizer: FrameNormalizer,
    state: TrackerState,
    last_frame: Option<Frame>,
}

impl RegionTracker {
    pub fn new(settings: TrackerSettings, normalizer: FrameNormalizer) -> Self {
        Self {
            settings,
            normalizer,
            state: TrackerState::default(),
            last_frame: None,
        }
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    /// Normalized version of the last raw frame passed to [`RegionTracker::detect`].
    pub fn last_frame(&self) -> Option<&Frame> {
        self.last_frame.as_ref()
    }

    /// Normalize a raw frame and locate the ball in it.
    pub fn detect(&mut self, raw: &Frame) -> Option<Position> {
        let frame = self.normalizer.normalize(raw);
        let position = self.detect_normalized(&frame, Instant::now());
        self.last_frame = Some(frame);
        position
    }

    /// Record a cycle in which no frame could be obtained.
    pub fn record_missing_frame(&mut self) {
        self.clear_detection();
    }

    /// Locate the ball in an already normalized frame captured at `now`.
    pub fn detect_normalized(&mut self, frame: &Frame, now: Instant) -> Option<Position> {
        let (width, height) = frame.dimensions();
        let Some(roi) = self.roi_at(width, height, now) else {
            log::debug!("Frame {}x{} too small to search", width, height);
            self.clear_detection();
            return None;
        };

        match self.locate_in(frame, roi) {
            Some((position, size)) => {
                self.state.ball = Some(position);
                self.state.ellipse_size = Some(size);
                self.state.last_roi = Some(roi);
                self.state.last_detection = Some(now);
                Some(position)
            }
            None => {
                log::trace!("No ball in {:?}", roi);
                self.clear_detection();
                None
            }
        }
    }

    /// The window the next search in a `width` x `height` frame will use.
    pub fn roi_at(&self, width: u32, height: u32, now: Instant) -> Option<Roi> {
        if let Some(ball) = self.state.ball {
            if let Some(roi) = Roi::around(ball, self.settings.roi_half_extent, width, height) {
                return Some(roi);
            }
        }

        let timeout = Duration::try_from_secs_f64(self.settings.roi_reset_timeout.max(0.0))
            .unwrap_or(Duration::ZERO);
        let recent = self
            .state
            .last_detection
            .is_some_and(|last| now.saturating_duration_since(last) <= timeout);
        if recent {
            let last_roi = self.state.last_roi.and_then(|roi| {
                Roi::clipped(
                    roi.top_left.0 as i64,
                    roi.top_left.1 as i64,
                    roi.bottom_right.0 as i64,
                    roi.bottom_right.1 as i64,
                    width,
                    height,
                )
            });
            if last_roi.is_some() {
                return last_roi;
            }
        }

        self.search_roi(width, height)
    }

    /// Full-frame search window.
    pub fn search_roi(&self, width: u32, height: u32) -> Option<Roi> {
        Roi::inset(self.settings.search_margin, width, height)
            .or_else(|| Roi::clipped(0, 0, width as i64, height as i64, width, height))
    }

    /// Box around the last detection, each side at least the minimum box size.
    pub fn last_bbox(&self) -> Option<BBox> {
        let ball = self.state.ball?;
        let (width, height) = self.state.ellipse_size?;
        Some(BBox::centered(
            ball,
            width,
            height,
            self.settings.min_bbox_size,
        ))
    }

    fn clear_detection(&mut self) {
        self.state.ball = None;
        self.state.ellipse_size = None;
    }

    fn locate_in(&self, frame: &Frame, roi: Roi) -> Option<(Position, (f64, f64))> {
        let patch =
            imageops::crop_imm(frame, roi.x(), roi.y(), roi.width(), roi.height()).to_image();
        let gray = imageops::grayscale(&patch);
        let edges = self.edge_map(&gray);

        let contours = find_contours::<i32>(&edges);
        let contour = largest_external_contour(&contours)?;
        let area = polygon_area(&contour.points);
        if contour.points.len() < self.settings.min_contour_points
            || area <= self.settings.min_contour_area
        {
            log::trace!(
                "Largest contour rejected: {} points, area {:.1}",
                contour.points.len(),
                area
            );
            return None;
        }

        let points: Vec<[f64; 2]> = contour
            .points
            .iter()
            .map(|p| [p.x as f64, p.y as f64])
            .collect();
        let ellipse = fit_ellipse(&points)?;

        let position = Position::new(
            ellipse.center.x + roi.x() as f64,
            ellipse.center.y + roi.y() as f64,
        );
        if !roi.contains(position) {
            log::trace!("Fitted center {:?} outside {:?}", position, roi);
            return None;
        }
        Some((position, ellipse.axis_lengths()))
    }

    fn edge_map(&self, gray: &GrayImage) -> GrayImage {
        let blurred = if self.settings.blur_sigma > 0.0 {
            gaussian_blur_f32(gray, self.settings.blur_sigma)
        } else {
            gray.clone()
        };
        let edges = canny_l1(&blurred, self.settings.canny_low, self.settings.canny_high);
        dilate_elliptical(&edges, self.settings.dilate_radius)
    }
}

/// Largest outermost contour. On equal areas the first one found wins.
fn largest_external_contour(contours: &[Contour<i32>]) -> Option<&Contour<i32>> {
    contours
        .iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .fold(None, |best: Option<(&Contour<i32>, f64)>, contour| {
            let area = polygon_area(&contour.points);
            match best {
                Some((_, best_area)) if best_area >= area => best,
                _ => Some((contour, area)),
            }
        })
        .map(|(contour, _)| contour)
}

/// Area enclosed by a closed polygon (shoelace formula).
fn polygon_area(points: &[imageproc::point::Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice_area: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(p, q)| p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64)
        .sum();
    twice_area.abs() as f64 / 2.0
}
