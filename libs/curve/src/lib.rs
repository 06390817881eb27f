//! Piecewise curve evaluator mapping elapsed time to a scalar.
//!
//! Behavior curves describe how a quantity (response time, error rate, network
//! latency, drop rate) changes over the lifetime of a running behavior. A curve
//! is a sequence of control points on the unit square; segments between two
//! `curve` points are interpolated with a monotone cubic Hermite spline
//! (Fritsch-Carlson), segments touching a `break` point fall back to linear
//! interpolation. This mirrors a Photoshop-style curve editor: smooth, monotone
//! drags by default, hard corners where the author explicitly asked for one.

use serde::{Deserialize, Serialize, de::Deserializer, ser::Serializer};

/// Whether a control point smooths into its neighbors or forms a hard corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointKind {
    Curve,
    Break,
}

/// A single control point on the unit square, `x` and `y` both in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BehaviorPoint {
    pub x: f64,
    pub y: f64,
    pub kind: PointKind,
}

impl BehaviorPoint {
    pub fn curve(x: f64, y: f64) -> Self {
        Self { x, y, kind: PointKind::Curve }
    }

    pub fn brk(x: f64, y: f64) -> Self {
        Self { x, y, kind: PointKind::Break }
    }
}

// Wire format is `{x, y, type: "curve" | "break"}`; any other `type` value
// ingests as `curve` rather than rejecting the point.
#[derive(Serialize, Deserialize)]
struct WirePoint {
    x: f64,
    y: f64,
    #[serde(rename = "type")]
    kind: String,
}

impl Serialize for BehaviorPoint {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        WirePoint {
            x: self.x,
            y: self.y,
            kind: match self.kind {
                PointKind::Curve => "curve".to_string(),
                PointKind::Break => "break".to_string(),
            },
        }
        .serialize(s)
    }
}

impl<'de> Deserialize<'de> for BehaviorPoint {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = WirePoint::deserialize(d)?;
        let kind = match raw.kind.as_str() {
            "break" => PointKind::Break,
            _ => PointKind::Curve,
        };
        Ok(BehaviorPoint { x: raw.x, y: raw.y, kind })
    }
}

/// The axis range a curve's normalized `[0, 1]` domain and range map onto.
#[derive(Debug, Clone, Copy)]
pub struct Bounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

/// A constructed, evaluable curve over `Bounds`.
///
/// Construction normalizes the first point's `x` to `0` and the last point's
/// `x` to `1`, then precomputes monotone Hermite tangents for every interior
/// point so that `eval` is a cheap segment lookup plus a single cubic.
#[derive(Debug, Clone)]
pub struct CurveFn {
    bounds: Bounds,
    points: Vec<BehaviorPoint>,
    tangents: Vec<f64>,
}

impl CurveFn {
    pub fn new(bounds: Bounds, mut points: Vec<BehaviorPoint>) -> Self {
        if let Some(first) = points.first_mut() {
            first.x = 0.0;
        }
        if points.len() > 1 {
            let last = points.len() - 1;
            points[last].x = 1.0;
        }
        let tangents = fritsch_carlson_tangents(&points);
        Self { bounds, points, tangents }
    }

    /// Evaluates the curve at an elapsed time in milliseconds, denormalized
    /// back into `[min_y, max_y]`.
    pub fn eval(&self, x_ms: f64) -> f64 {
        if self.points.len() < 2 {
            return self.bounds.min_y;
        }
        let span = self.bounds.max_x - self.bounds.min_x;
        let nx = if span == 0.0 {
            0.0
        } else {
            ((x_ms - self.bounds.min_x) / span).clamp(0.0, 1.0)
        };
        let ny = self.eval_normalized(nx).clamp(0.0, 1.0);
        self.bounds.min_y + ny * (self.bounds.max_y - self.bounds.min_y)
    }

    fn eval_normalized(&self, nx: f64) -> f64 {
        let n = self.points.len();
        // Largest index i such that points[i].x <= nx, clamped so a full
        // segment [i, i+1] always exists.
        let i = match self
            .points
            .partition_point(|p| p.x <= nx)
            .saturating_sub(1)
        {
            idx if idx >= n - 1 => n - 2,
            idx => idx,
        };

        let p0 = self.points[i];
        let p1 = self.points[i + 1];
        let h = p1.x - p0.x;
        if h <= 0.0 {
            return p0.y;
        }
        let t = (nx - p0.x) / h;

        let linear = matches!(p0.kind, PointKind::Break) || matches!(p1.kind, PointKind::Break);
        if linear {
            return p0.y + t * (p1.y - p0.y);
        }

        let m0 = self.tangents[i];
        let m1 = self.tangents[i + 1];
        hermite(p0.y, p1.y, m0, m1, h, t)
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn points(&self) -> &[BehaviorPoint] {
        &self.points
    }
}

fn hermite(y0: f64, y1: f64, m0: f64, m1: f64, h: f64, t: f64) -> f64 {
    let t2 = t * t;
    let t3 = t2 * t;
    let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let h10 = t3 - 2.0 * t2 + t;
    let h01 = -2.0 * t3 + 3.0 * t2;
    let h11 = t3 - t2;
    h00 * y0 + h10 * h * m0 + h01 * y1 + h11 * h * m1
}

/// Computes Fritsch-Carlson tangents that keep the spline monotone on every
/// segment. Segments bordering a `break` point still get a tangent here (it
/// is simply unused at eval time, since that segment falls back to linear).
fn fritsch_carlson_tangents(points: &[BehaviorPoint]) -> Vec<f64> {
    let n = points.len();
    if n < 2 {
        return vec![0.0; n];
    }

    let secants: Vec<f64> = (0..n - 1)
        .map(|k| {
            let dx = points[k + 1].x - points[k].x;
            if dx == 0.0 { 0.0 } else { (points[k + 1].y - points[k].y) / dx }
        })
        .collect();

    let mut m = vec![0.0; n];
    m[0] = secants[0];
    m[n - 1] = secants[n - 2];
    for k in 1..n - 1 {
        m[k] = (secants[k - 1] + secants[k]) / 2.0;
    }

    for k in 0..n - 1 {
        let d = secants[k];
        if d == 0.0 {
            m[k] = 0.0;
            m[k + 1] = 0.0;
            continue;
        }
        let alpha = m[k] / d;
        let beta = m[k + 1] / d;
        if alpha < 0.0 {
            m[k] = 0.0;
        }
        if beta < 0.0 {
            m[k + 1] = 0.0;
        }
        let alpha = m[k] / d;
        let beta = m[k + 1] / d;
        let sq = alpha * alpha + beta * beta;
        if sq > 9.0 {
            let tau = 3.0 / sq.sqrt();
            m[k] = tau * alpha * d;
            m[k + 1] = tau * beta * d;
        }
    }

    m
}
