use anyhow::Result;
use balance_core::{BBox, Frame, NormalizationSettings, Position};
use serde::{Deserialize, Serialize};

use crate::{backend::DetectorBackend, normalize::FrameNormalizer};

/// One box proposed by a detection model, in normalized frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub confidence: f64,
    pub class_id: u32,
}

impl Candidate {
    pub fn area(&self) -> f64 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn center(&self) -> Position {
        Position::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn is_finite(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// A pretrained single-class ball detector.
pub trait BallModel: Send {
    /// Run the model over a normalized frame.
    fn infer(&mut self, frame: &Frame) -> Result<Vec<Candidate>>;

    /// Shut the model down. Further calls to `infer` may fail.
    fn close(&mut self) {}
}

/// Pick the candidate with the largest area. Among equal areas the one that
/// comes first wins.
pub fn select_largest(candidates: &[Candidate]) -> Option<&Candidate> {
    candidates
        .iter()
        .filter(|c| c.is_finite())
        .fold(None, |best: Option<&Candidate>, c| match best {
            Some(b) if b.area() >= c.area() => Some(b),
            _ => Some(c),
        })
}

/// Backend that asks a [`BallModel`] for the ball.
pub struct LearnedBackend {
    normalizer: FrameNormalizer,
    model: Box<dyn BallModel>,
    last_frame: Option<Frame>,
    last_detection: Option<Candidate>,
}

impl LearnedBackend {
    pub fn new(normalization: NormalizationSettings, model: Box<dyn BallModel>) -> Self {
        Self {
            normalizer: FrameNormalizer::new(normalization),
            model,
            last_frame: None,
            last_detection: None,
        }
    }
}

impl DetectorBackend for LearnedBackend {
    fn name(&self) -> &str {
        "dl"
    }

    fn get_position(&mut self, raw: &Frame) -> Result<Option<Position>> {
        let frame = self.normalizer.normalize(raw);
        let candidates = self.model.infer(&frame);
        self.last_frame = Some(frame);
        let candidates = candidates?;

        self.last_detection = select_largest(&candidates).copied();
        if self.last_detection.is_none() {
            log::trace!("Model returned {} usable boxes", candidates.len());
        }
        Ok(self.last_detection.map(|c| c.center()))
    }

    fn frame_unavailable(&mut self) {
        self.last_detection = None;
    }

    fn get_bbox(&self) -> Option<BBox> {
        self.last_detection
            .map(|c| BBox::from_corners(c.x1, c.y1, c.x2, c.y2))
    }

    fn get_last_frame(&self) -> Option<&Frame> {
        self.last_frame.as_ref()
    }

    fn release(&mut self) {
        self.model.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use approx::assert_relative_eq;
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
    };

    fn candidate(x1: f64, y1: f64, x2: f64, y2: f64) -> Candidate {
        Candidate {
            x1,
            y1,
            x2,
            y2,
            confidence: 0.9,
            class_id: 0,
        }
    }

    struct ScriptedModel {
        replies: VecDeque<Result<Vec<Candidate>>>,
        frame_sizes: Vec<(u32, u32)>,
        closed: Arc<AtomicBool>,
    }

    impl BallModel for ScriptedModel {
        fn infer(&mut self, frame: &Frame) -> Result<Vec<Candidate>> {
            self.frame_sizes.push(frame.dimensions());
            self.replies.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn backend(replies: Vec<Result<Vec<Candidate>>>) -> (LearnedBackend, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        let model = ScriptedModel {
            replies: replies.into(),
            frame_sizes: Vec::new(),
            closed: Arc::clone(&closed),
        };
        (
            LearnedBackend::new(NormalizationSettings::default(), Box::new(model)),
            closed,
        )
    }

    fn raw() -> Frame {
        Frame::new(800, 600)
    }

    #[test]
    fn test_select_largest() {
        let boxes = [
            candidate(0.0, 0.0, 10.0, 10.0),
            candidate(100.0, 100.0, 140.0, 130.0),
            candidate(50.0, 50.0, 60.0, 60.0),
        ];
        assert_eq!(select_largest(&boxes), Some(&boxes[1]));
        assert_eq!(select_largest(&[]), None);
    }

    #[test]
    fn test_equal_areas_first_wins() {
        let boxes = [
            candidate(0.0, 0.0, 20.0, 20.0),
            candidate(200.0, 200.0, 220.0, 220.0),
        ];
        assert_eq!(select_largest(&boxes), Some(&boxes[0]));
    }

    #[test]
    fn test_non_finite_candidates_ignored() {
        let boxes = [candidate(0.0, 0.0, f64::NAN, 20.0), candidate(0.0, 0.0, 5.0, 5.0)];
        assert_eq!(select_largest(&boxes), Some(&boxes[1]));
    }

    #[test]
    fn test_position_is_center_of_largest_box() {
        let (mut backend, _) = backend(vec![Ok(vec![
            candidate(10.0, 10.0, 20.0, 20.0),
            candidate(300.5, 200.0, 341.5, 240.0),
        ])]);

        let position = backend.get_position(&raw()).unwrap().unwrap();
        assert_relative_eq!(position.x, 321.0);
        assert_relative_eq!(position.y, 220.0);
        assert_eq!(backend.get_bbox(), Some(BBox::new(300, 200, 41, 40)));
        assert_eq!(backend.get_last_frame().unwrap().dimensions(), (644, 600));
    }

    #[test]
    fn test_empty_output_is_a_miss() {
        let (mut backend, _) = backend(vec![
            Ok(vec![candidate(10.0, 10.0, 40.0, 40.0)]),
            Ok(vec![]),
        ]);
        assert!(backend.get_position(&raw()).unwrap().is_some());
        assert!(backend.get_position(&raw()).unwrap().is_none());
        assert!(backend.get_bbox().is_none());
    }

    #[test]
    fn test_model_error_is_backend_failure() {
        let (mut backend, _) = backend(vec![Err(anyhow!("inference crashed"))]);
        assert!(backend.get_position(&raw()).is_err());
        assert!(backend.get_last_frame().is_some());
    }

    #[test]
    fn test_release_closes_model() {
        let (mut backend, closed) = backend(vec![]);
        backend.release();
        assert!(closed.load(Ordering::SeqCst));
    }
}
