// trajectory.rs — Polyline container, simplification, closure and area
//
// All geometry runs on LocalPoint in meters. Insufficient geometry is not an
// error: area is 0 below three points and closure leaves the input unchanged.

use serde::{Deserialize, Serialize};

use crate::types::LocalPoint;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrajectoryConfig {
    /// Minimum spacing between appended points once `spacing_after` points exist
    pub min_point_spacing_m: f64,
    pub spacing_after: usize,
    /// Ramer–Douglas–Peucker tolerance
    pub rdp_epsilon_m: f64,
    /// Simplification downsamples to this many points first
    pub max_points: usize,
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            min_point_spacing_m: 0.3,
            spacing_after: 10,
            rdp_epsilon_m: 0.5,
            max_points: 1000,
        }
    }
}

// ─── Trajectory ──────────────────────────────────────────────────────────────

/// Growing polyline for one session. The first point is the session origin.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Trajectory {
    points: Vec<LocalPoint>,
    min_spacing_m: f64,
    spacing_after: usize,
}

impl Trajectory {
    pub fn new(config: &TrajectoryConfig) -> Self {
        Self {
            points: Vec::new(),
            min_spacing_m: config.min_point_spacing_m,
            spacing_after: config.spacing_after,
        }
    }

    /// Append `point` unless it is jitter next to the previous point.
    /// Returns whether it was kept.
    pub fn push(&mut self, point: LocalPoint) -> bool {
        if self.points.len() > self.spacing_after {
            if let Some(last) = self.points.last() {
                if last.distance_to(&point) < self.min_spacing_m {
                    return false;
                }
            }
        }
        self.points.push(point);
        true
    }

    pub fn points(&self) -> &[LocalPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&LocalPoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&LocalPoint> {
        self.points.last()
    }

    pub fn path_length(&self) -> f64 {
        path_length(&self.points)
    }

    /// True once the walk has come back within `threshold_m` of its start.
    pub fn is_enclosed(&self, threshold_m: f64) -> bool {
        const MIN_ENCLOSING_POINTS: usize = 5;
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) if self.points.len() >= MIN_ENCLOSING_POINTS => {
                first.distance_to(last) < threshold_m
            }
            _ => false,
        }
    }

    /// Start over with `origin` as the only point.
    pub fn reset(&mut self, origin: LocalPoint) {
        self.points.clear();
        self.points.push(origin);
    }
}

// ─── Optimizer ───────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct TrajectoryOptimizer {
    epsilon: f64,
    max_points: usize,
}

impl TrajectoryOptimizer {
    pub fn new(config: &TrajectoryConfig) -> Self {
        Self {
            epsilon: config.rdp_epsilon_m,
            max_points: config.max_points.max(3),
        }
    }

    /// Downsample long inputs, then Ramer–Douglas–Peucker. Endpoints are
    /// always kept.
    pub fn simplify(&self, points: &[LocalPoint]) -> Vec<LocalPoint> {
        if points.len() <= 2 {
            return points.to_vec();
        }
        let points = if points.len() > self.max_points {
            downsample(points, self.max_points)
        } else {
            points.to_vec()
        };

        let mut keep = vec![false; points.len()];
        keep[0] = true;
        keep[points.len() - 1] = true;
        rdp_mark(&points, 0, points.len() - 1, self.epsilon, &mut keep);

        points
            .into_iter()
            .zip(keep)
            .filter_map(|(p, k)| k.then_some(p))
            .collect()
    }

    /// Append a copy of the first point when the ends are within `threshold_m`.
    pub fn close_if_needed(&self, points: &[LocalPoint], threshold_m: f64) -> Vec<LocalPoint> {
        let mut out = points.to_vec();
        if let (Some(first), Some(last)) = (points.first(), points.last()) {
            if points.len() >= 3 && first.distance_to(last) <= threshold_m {
                out.push(*first);
            }
        }
        out
    }

    pub fn polygon_area(&self, points: &[LocalPoint]) -> f64 {
        polygon_area(points)
    }
}

impl Default for TrajectoryOptimizer {
    fn default() -> Self {
        Self::new(&TrajectoryConfig::default())
    }
}

/// Keep the first and last point and `target - 2` evenly strided points.
fn downsample(points: &[LocalPoint], target: usize) -> Vec<LocalPoint> {
    let n = points.len();
    if n <= target {
        return points.to_vec();
    }
    let step = (n - 2) as f64 / (target - 2) as f64;
    let mut out = Vec::with_capacity(target);
    out.push(points[0]);
    for i in 1..target - 1 {
        let idx = ((i as f64 * step).floor() as usize + 1).min(n - 2);
        out.push(points[idx]);
    }
    out.push(points[n - 1]);
    out
}

fn rdp_mark(points: &[LocalPoint], start: usize, end: usize, epsilon: f64, keep: &mut [bool]) {
    if end <= start + 1 {
        return;
    }
    let mut max_dist = 0.0;
    let mut farthest = start;
    for (i, p) in points.iter().enumerate().take(end).skip(start + 1) {
        let d = segment_distance(p, &points[start], &points[end]);
        if d > max_dist {
            max_dist = d;
            farthest = i;
        }
    }
    if max_dist > epsilon {
        keep[farthest] = true;
        rdp_mark(points, start, farthest, epsilon, keep);
        rdp_mark(points, farthest, end, epsilon, keep);
    }
}

/// Distance from `p` to the segment `a`–`b`; point distance when `a == b`.
pub fn segment_distance(p: &LocalPoint, a: &LocalPoint, b: &LocalPoint) -> f64 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len2 = dx * dx + dy * dy;
    if len2 == 0.0 {
        return p.distance_to(a);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len2).clamp(0.0, 1.0);
    p.distance_to(&LocalPoint::new(a.x + t * dx, a.y + t * dy))
}

/// Shoelace area, indices wrapped. 0 for fewer than three points.
pub fn polygon_area(points: &[LocalPoint]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let twice: f64 = (0..n)
        .map(|i| {
            let (p1, p2) = (&points[i], &points[(i + 1) % n]);
            p1.x * p2.y - p2.x * p1.y
        })
        .sum();
    twice.abs() / 2.0
}

pub fn path_length(points: &[LocalPoint]) -> f64 {
    points.windows(2).map(|w| w[0].distance_to(&w[1])).sum()
}
