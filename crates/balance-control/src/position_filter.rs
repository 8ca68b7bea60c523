use balance_core::Position;

/// First-order exponential smoother for ball positions.
///
/// A present sample is blended in as `alpha * raw + (1 - alpha) * previous`.
/// A missing sample leaves the output unchanged. The state starts at the
/// origin, so the first real detection only moves the output `alpha` of the way
/// towards it.
#[derive(Debug, Clone)]
pub struct PositionFilter {
    /// Weight of a new sample, in `[0, 1]`.
    alpha: f64,
    /// Last smoothed position.
    last: Position,
}

impl PositionFilter {
    /// Creates a new filter. `alpha` is clamped to `[0, 1]`.
    pub fn new(alpha: f64) -> Self {
        let clamped = if alpha.is_finite() {
            alpha.clamp(0.0, 1.0)
        } else {
            1.0
        };
        if clamped != alpha {
            log::warn!("Filter alpha {} out of range, using {}", alpha, clamped);
        }
        Self {
            alpha: clamped,
            last: Position::default(),
        }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Last smoothed position.
    pub fn last(&self) -> Position {
        self.last
    }

    /// Updates the filter with an optional raw detection and returns the smoothed position.
    pub fn update(&mut self, raw: Option<Position>) -> Position {
        match raw {
            Some(raw) if raw.is_finite() => {
                self.last = Position::new(
                    self.alpha * raw.x + (1.0 - self.alpha) * self.last.x,
                    self.alpha * raw.y + (1.0 - self.alpha) * self.last.y,
                );
            }
            Some(raw) => log::debug!("Ignoring non-finite sample {:?}", raw),
            None => {}
        }
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assert_position_eq(actual: Position, x: f64, y: f64) {
        assert_relative_eq!(actual.x, x, epsilon = 1e-9);
        assert_relative_eq!(actual.y, y, epsilon = 1e-9);
    }

    #[test]
    fn test_cold_start_blends_from_origin() {
        let mut filter = PositionFilter::new(0.3);
        assert_position_eq(filter.update(Some(Position::new(100.0, 100.0))), 30.0, 30.0);
    }

    #[test]
    fn test_hold_last_value_is_idempotent() {
        let mut filter = PositionFilter::new(0.3);
        let first = filter.update(Some(Position::new(50.0, 80.0)));
        for _ in 0..10 {
            assert_eq!(filter.update(None), first);
        }
    }

    #[test]
    fn test_hold_then_resume_sequence() {
        let mut filter = PositionFilter::new(0.3);
        // warm the filter up at (100, 100)
        for _ in 0..200 {
            filter.update(Some(Position::new(100.0, 100.0)));
        }
        assert_position_eq(filter.last(), 100.0, 100.0);

        assert_position_eq(filter.update(Some(Position::new(110.0, 100.0))), 103.0, 100.0);
        assert_position_eq(filter.update(None), 103.0, 100.0);
        assert_position_eq(filter.update(None), 103.0, 100.0);
        assert_position_eq(
            filter.update(Some(Position::new(300.0, 100.0))),
            0.3 * 300.0 + 0.7 * 103.0,
            100.0,
        );
    }

    #[test]
    fn test_never_overshoots_raw_sample() {
        let mut filter = PositionFilter::new(0.3);
        let samples = [
            Some(Position::new(10.0, 400.0)),
            Some(Position::new(500.0, 0.0)),
            None,
            Some(Position::new(250.0, 250.0)),
            Some(Position::new(0.0, 600.0)),
            None,
            Some(Position::new(640.0, 1.0)),
        ];

        let mut previous = filter.last();
        for sample in samples {
            let smoothed = filter.update(sample);
            if let Some(raw) = sample {
                assert!(smoothed.distance(&previous) <= raw.distance(&previous) + 1e-9);
                assert!((smoothed.x - previous.x).abs() <= (raw.x - previous.x).abs() + 1e-9);
                assert!((smoothed.y - previous.y).abs() <= (raw.y - previous.y).abs() + 1e-9);
            } else {
                assert_eq!(smoothed, previous);
            }
            previous = smoothed;
        }
    }

    #[test]
    fn test_non_finite_sample_is_held() {
        let mut filter = PositionFilter::new(0.5);
        let first = filter.update(Some(Position::new(10.0, 10.0)));
        assert_eq!(filter.update(Some(Position::new(f64::NAN, 3.0))), first);
    }

    #[test]
    fn test_alpha_is_clamped() {
        assert_eq!(PositionFilter::new(1.5).alpha(), 1.0);
        assert_eq!(PositionFilter::new(-0.5).alpha(), 0.0);
    }
}
