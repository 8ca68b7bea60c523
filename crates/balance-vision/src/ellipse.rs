//! Direct least-squares ellipse fitting (Fitzgibbon, Pilu & Fisher, 1999).
//!
//! The fit minimizes the algebraic distance of the points to a general conic
//! `A x² + B xy + C y² + D x + E y + F = 0` under the constraint
//! `4AC - B² = 1`, which guarantees that the result is an ellipse.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI, SQRT_2};

use balance_core::Position;
use nalgebra::{Matrix3, Matrix6, Vector3, Vector6};

/// Geometric ellipse parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipse {
    pub center: Position,
    /// Semi-axis along `angle`. Never smaller than `semi_minor`.
    pub semi_major: f64,
    pub semi_minor: f64,
    /// Rotation of the major axis from +x, in radians, in (−π/2, π/2].
    pub angle: f64,
}

impl Ellipse {
    /// Full lengths of the major and minor axes.
    pub fn axis_lengths(&self) -> (f64, f64) {
        (2.0 * self.semi_major, 2.0 * self.semi_minor)
    }

    /// Sample `n` points evenly spaced in parameter along the boundary.
    pub fn sample_points(&self, n: usize) -> Vec<[f64; 2]> {
        let (sin, cos) = self.angle.sin_cos();
        (0..n)
            .map(|i| {
                let t = 2.0 * PI * i as f64 / n as f64;
                let px = self.semi_major * t.cos();
                let py = self.semi_minor * t.sin();
                [
                    self.center.x + cos * px - sin * py,
                    self.center.y + sin * px + cos * py,
                ]
            })
            .collect()
    }

    fn is_valid(&self) -> bool {
        self.center.is_finite()
            && self.semi_major.is_finite()
            && self.semi_minor.is_finite()
            && self.angle.is_finite()
            && self.semi_minor > 0.0
    }
}

/// Fit an ellipse to at least six points. Returns `None` when the points are
/// degenerate (collinear, too few, ...) or the best conic is not a proper ellipse.
pub fn fit_ellipse(points: &[[f64; 2]]) -> Option<Ellipse> {
    if points.len() < 6 {
        return None;
    }

    // Shift to the centroid and scale so the mean distance is √2.
    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p[0]).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p[1]).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p[0] - mean_x).powi(2) + (p[1] - mean_y).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist < 1e-12 {
        return None;
    }
    let scale = SQRT_2 / mean_dist;

    // Scatter matrix S = Σ d dᵀ with d = [x², xy, y², x, y, 1]
    let mut scatter = Matrix6::<f64>::zeros();
    for p in points {
        let x = (p[0] - mean_x) * scale;
        let y = (p[1] - mean_y) * scale;
        let d = Vector6::new(x * x, x * y, y * y, x, y, 1.0);
        scatter += d * d.transpose();
    }

    let s11 = scatter.fixed_view::<3, 3>(0, 0).into_owned();
    let s12 = scatter.fixed_view::<3, 3>(0, 3).into_owned();
    let s22 = scatter.fixed_view::<3, 3>(3, 3).into_owned();

    // Eliminate the linear part: (S11 - S12 S22⁻¹ S21) a1 = λ C1 a1
    if s22.determinant().abs() < 1e-12 * s22.norm().powi(3) {
        return None;
    }
    let s22_inv = s22.try_inverse()?;
    let reduced = s11 - s12 * s22_inv * s12.transpose();

    // C1⁻¹ for C1 = [[0, 0, 2], [0, -1, 0], [2, 0, 0]]
    let c1_inv = Matrix3::new(0.0, 0.0, 0.5, 0.0, -1.0, 0.0, 0.5, 0.0, 0.0);
    let quadratic = constrained_eigenvector(&(c1_inv * reduced))?;
    let linear = -s22_inv * s12.transpose() * quadratic;

    let coeffs = denormalize(
        [
            quadratic[0],
            quadratic[1],
            quadratic[2],
            linear[0],
            linear[1],
            linear[2],
        ],
        mean_x,
        mean_y,
        scale,
    );

    conic_to_ellipse(coeffs).filter(Ellipse::is_valid)
}

/// Eigenvector of `system` whose conic satisfies `4AC - B² > 0`.
fn constrained_eigenvector(system: &Matrix3<f64>) -> Option<Vector3<f64>> {
    let m = system;
    let trace = m.trace();
    let minors = m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)] + m[(0, 0)] * m[(2, 2)]
        - m[(0, 2)] * m[(2, 0)]
        + m[(1, 1)] * m[(2, 2)]
        - m[(1, 2)] * m[(2, 1)];
    let det = m.determinant();

    let mut best: Option<(f64, Vector3<f64>)> = None;
    for eigenvalue in real_cubic_roots(-trace, minors, -det) {
        let Some(v) = null_vector(&(m - Matrix3::identity() * eigenvalue)) else {
            continue;
        };
        if 4.0 * v[0] * v[2] - v[1] * v[1] <= 0.0 {
            continue;
        }
        if best.map_or(true, |(ev, _)| eigenvalue.abs() < ev) {
            best = Some((eigenvalue.abs(), v));
        }
    }
    best.map(|(_, v)| v)
}

/// Null vector of a rank-2 matrix: the largest row of its adjugate.
fn null_vector(m: &Matrix3<f64>) -> Option<Vector3<f64>> {
    let rows = [
        m.row(1).transpose().cross(&m.row(2).transpose()),
        m.row(2).transpose().cross(&m.row(0).transpose()),
        m.row(0).transpose().cross(&m.row(1).transpose()),
    ];
    let best = rows
        .iter()
        .max_by(|a, b| a.norm_squared().total_cmp(&b.norm_squared()))?;
    let norm = best.norm();
    if norm < 1e-15 {
        return None;
    }
    Some(best / norm)
}

/// Real roots of `x³ + b x² + c x + d = 0`.
fn real_cubic_roots(b: f64, c: f64, d: f64) -> Vec<f64> {
    // Depressed cubic t³ + p t + q = 0 with x = t - b / 3
    let p = c - b * b / 3.0;
    let q = 2.0 * b * b * b / 27.0 - b * c / 3.0 + d;
    let shift = -b / 3.0;

    let disc = -4.0 * p * p * p - 27.0 * q * q;
    if disc >= 0.0 {
        let r = (-p / 3.0).max(0.0).sqrt();
        if r < 1e-15 {
            return vec![shift];
        }
        let theta = (-q / (2.0 * r * r * r)).clamp(-1.0, 1.0).acos();
        (0..3)
            .map(|k| 2.0 * r * ((theta + 2.0 * PI * k as f64) / 3.0).cos() + shift)
            .collect()
    } else {
        let root = (q * q / 4.0 + p * p * p / 27.0).sqrt();
        vec![(-q / 2.0 + root).cbrt() + (-q / 2.0 - root).cbrt() + shift]
    }
}

/// Map conic coefficients found for `x' = s (x - mx)`, `y' = s (y - my)` back to
/// the original coordinates.
fn denormalize(c: [f64; 6], mx: f64, my: f64, s: f64) -> [f64; 6] {
    let [a, b, cc, d, e, f] = c;
    let s2 = s * s;
    [
        a * s2,
        b * s2,
        cc * s2,
        -2.0 * a * s2 * mx - b * s2 * my + d * s,
        -b * s2 * mx - 2.0 * cc * s2 * my + e * s,
        a * s2 * mx * mx + b * s2 * mx * my + cc * s2 * my * my - d * s * mx - e * s * my + f,
    ]
}

fn conic_to_ellipse(coeffs: [f64; 6]) -> Option<Ellipse> {
    let [a, b, c, d, e, f] = coeffs;

    let denom = 4.0 * a * c - b * b;
    if denom <= 0.0 {
        return None;
    }
    let cx = (b * e - 2.0 * c * d) / denom;
    let cy = (b * d - 2.0 * a * e) / denom;

    // Direction of the eigenvector of the larger eigenvalue
    let angle = if (a - c).abs() < 1e-15 {
        if b > 0.0 {
            FRAC_PI_4
        } else if b < 0.0 {
            -FRAC_PI_4
        } else {
            0.0
        }
    } else {
        0.5 * b.atan2(a - c)
    };

    let sum = a + c;
    let diff = ((a - c).powi(2) + b * b).sqrt();
    let lambda1 = (sum + diff) / 2.0;
    let lambda2 = (sum - diff) / 2.0;

    // Conic value at the center
    let f_center = a * cx * cx + b * cx * cy + c * cy * cy + d * cx + e * cy + f;
    if f_center.abs() < 1e-15 {
        return None;
    }
    let axis1 = -f_center / lambda1;
    let axis2 = -f_center / lambda2;
    if axis1 <= 0.0 || axis2 <= 0.0 {
        return None;
    }
    let (axis1, axis2) = (axis1.sqrt(), axis2.sqrt());

    let (semi_major, semi_minor, angle) = if axis1 >= axis2 {
        (axis1, axis2, angle)
    } else {
        (axis2, axis1, angle + FRAC_PI_2)
    };

    Some(Ellipse {
        center: Position::new(cx, cy),
        semi_major,
        semi_minor,
        angle: normalize_angle(angle),
    })
}

fn normalize_angle(mut angle: f64) -> f64 {
    while angle > FRAC_PI_2 {
        angle -= PI;
    }
    while angle <= -FRAC_PI_2 {
        angle += PI;
    }
    angle
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ellipse(cx: f64, cy: f64, a: f64, b: f64, angle: f64) -> Ellipse {
        Ellipse {
            center: Position::new(cx, cy),
            semi_major: a,
            semi_minor: b,
            angle,
        }
    }

    #[test]
    fn test_too_few_points() {
        assert!(fit_ellipse(&[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]).is_none());
    }

    #[test]
    fn test_collinear_points() {
        let points: Vec<_> = (0..20).map(|i| [i as f64, 2.0 * i as f64]).collect();
        assert!(fit_ellipse(&points).is_none());
    }

    #[test]
    fn test_fit_circle() {
        let truth = ellipse(120.0, 80.0, 25.0, 25.0, 0.0);
        let fit = fit_ellipse(&truth.sample_points(64)).unwrap();
        assert_relative_eq!(fit.center.x, 120.0, epsilon = 1e-6);
        assert_relative_eq!(fit.center.y, 80.0, epsilon = 1e-6);
        assert_relative_eq!(fit.semi_major, 25.0, epsilon = 1e-6);
        assert_relative_eq!(fit.semi_minor, 25.0, epsilon = 1e-6);
    }

    #[test]
    fn test_fit_rotated_ellipse() {
        let truth = ellipse(100.0, 80.0, 30.0, 15.0, 0.3);
        let fit = fit_ellipse(&truth.sample_points(50)).unwrap();
        assert_relative_eq!(fit.center.x, 100.0, epsilon = 1e-6);
        assert_relative_eq!(fit.center.y, 80.0, epsilon = 1e-6);
        assert_relative_eq!(fit.semi_major, 30.0, epsilon = 1e-6);
        assert_relative_eq!(fit.semi_minor, 15.0, epsilon = 1e-6);
        assert_relative_eq!(fit.angle, 0.3, epsilon = 1e-6);
    }

    #[test]
    fn test_axis_lengths_ignore_rotation() {
        let (major, minor) = ellipse(0.0, 0.0, 30.0, 10.0, 0.0).axis_lengths();
        assert_relative_eq!(major, 60.0);
        assert_relative_eq!(minor, 20.0);

        let rotated = ellipse(0.0, 0.0, 30.0, 10.0, FRAC_PI_2).axis_lengths();
        assert_eq!(rotated, (major, minor));
    }
}
