//! Host-side mirror of the accumulated path.
//!
//! Path-building commands are recorded into the frame buffer for the
//! renderer, but hit-test queries (`is_point_in_path`, `is_point_in_stroke`)
//! must answer synchronously without a round trip. This module keeps a
//! flattened polyline copy of the current path for that purpose. Queries
//! operate in user space.

const ARC_SEGMENTS_PER_RADIAN: f64 = 8.0;
const CURVE_SEGMENTS: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// One subpath: a polyline plus a closed flag.
#[derive(Debug, Clone, Default)]
struct SubPath {
    points: Vec<Point>,
    closed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PathMirror {
    subpaths: Vec<SubPath>,
    exists: bool,
}

impl PathMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once `begin_path` has been called, until the next `begin_path`.
    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn begin(&mut self) {
        self.subpaths.clear();
        self.exists = true;
    }

    pub fn move_to(&mut self, x: f64, y: f64) {
        self.subpaths.push(SubPath { points: vec![Point { x, y }], closed: false });
    }

    pub fn line_to(&mut self, x: f64, y: f64) {
        match self.subpaths.last_mut() {
            Some(sp) => sp.points.push(Point { x, y }),
            // line_to without move_to starts a subpath at the target
            None => self.move_to(x, y),
        }
    }

    pub fn close(&mut self) {
        if let Some(sp) = self.subpaths.last_mut() {
            sp.closed = true;
        }
    }

    pub fn rect(&mut self, x: f64, y: f64, w: f64, h: f64) {
        self.subpaths.push(SubPath {
            points: vec![
                Point { x, y },
                Point { x: x + w, y },
                Point { x: x + w, y: y + h },
                Point { x, y: y + h },
            ],
            closed: true,
        });
    }

    pub fn arc(&mut self, cx: f64, cy: f64, radius: f64, start: f64, end: f64, ccw: bool) {
        let sweep = arc_sweep(start, end, ccw);
        let steps = ((sweep.abs() * ARC_SEGMENTS_PER_RADIAN).ceil() as usize).max(2);
        let first = Point { x: cx + radius * start.cos(), y: cy + radius * start.sin() };
        // Arc connects to the current subpath if one is open, as on the 2D context
        if self.subpaths.last().is_none() {
            self.move_to(first.x, first.y);
        } else {
            self.line_to(first.x, first.y);
        }
        for i in 1..=steps {
            let t = start + sweep * (i as f64 / steps as f64);
            self.line_to(cx + radius * t.cos(), cy + radius * t.sin());
        }
    }

    pub fn ellipse(
        &mut self,
        cx: f64,
        cy: f64,
        rx: f64,
        ry: f64,
        rotation: f64,
        start: f64,
        end: f64,
        ccw: bool,
    ) {
        let sweep = arc_sweep(start, end, ccw);
        let steps = ((sweep.abs() * ARC_SEGMENTS_PER_RADIAN).ceil() as usize).max(2);
        let (sin_r, cos_r) = rotation.sin_cos();
        let at = |t: f64| {
            let (px, py) = (rx * t.cos(), ry * t.sin());
            Point { x: cx + px * cos_r - py * sin_r, y: cy + px * sin_r + py * cos_r }
        };
        let first = at(start);
        if self.subpaths.last().is_none() {
            self.move_to(first.x, first.y);
        } else {
            self.line_to(first.x, first.y);
        }
        for i in 1..=steps {
            let p = at(start + sweep * (i as f64 / steps as f64));
            self.line_to(p.x, p.y);
        }
    }

    pub fn arc_to(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, _radius: f64) {
        // Flattened approximation: corner point then tangent target. Exact
        // tangent-circle geometry is the renderer's job; the mirror only
        // needs a hit-testable outline.
        self.line_to(x1, y1);
        self.line_to(x2, y2);
    }

    pub fn bezier_curve_to(&mut self, cp1x: f64, cp1y: f64, cp2x: f64, cp2y: f64, x: f64, y: f64) {
        let start = match self.current_point() {
            Some(p) => p,
            None => {
                self.move_to(x, y);
                return;
            }
        };
        for i in 1..=CURVE_SEGMENTS {
            let t = i as f64 / CURVE_SEGMENTS as f64;
            let u = 1.0 - t;
            let px = u * u * u * start.x
                + 3.0 * u * u * t * cp1x
                + 3.0 * u * t * t * cp2x
                + t * t * t * x;
            let py = u * u * u * start.y
                + 3.0 * u * u * t * cp1y
                + 3.0 * u * t * t * cp2y
                + t * t * t * y;
            self.line_to(px, py);
        }
    }

    pub fn quadratic_curve_to(&mut self, cpx: f64, cpy: f64, x: f64, y: f64) {
        let start = match self.current_point() {
            Some(p) => p,
            None => {
                self.move_to(x, y);
                return;
            }
        };
        for i in 1..=CURVE_SEGMENTS {
            let t = i as f64 / CURVE_SEGMENTS as f64;
            let u = 1.0 - t;
            let px = u * u * start.x + 2.0 * u * t * cpx + t * t * x;
            let py = u * u * start.y + 2.0 * u * t * cpy + t * t * y;
            self.line_to(px, py);
        }
    }

    fn current_point(&self) -> Option<Point> {
        self.subpaths.last().and_then(|sp| sp.points.last().copied())
    }

    /// Nonzero-winding containment test against the accumulated path.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let mut winding = 0i32;
        for sp in &self.subpaths {
            if sp.points.len() < 2 {
                continue;
            }
            let n = sp.points.len();
            // Fill treats every subpath as implicitly closed
            for i in 0..n {
                let a = sp.points[i];
                let b = sp.points[(i + 1) % n];
                if a.y <= y {
                    if b.y > y && cross(a, b, x, y) > 0.0 {
                        winding += 1;
                    }
                } else if b.y <= y && cross(a, b, x, y) < 0.0 {
                    winding -= 1;
                }
            }
        }
        winding != 0
    }

    /// True when the point lies within `line_width / 2` of any path segment.
    pub fn hits_stroke(&self, x: f64, y: f64, line_width: f64) -> bool {
        let half = (line_width / 2.0).max(0.0);
        for sp in &self.subpaths {
            if sp.points.len() == 1 {
                let p = sp.points[0];
                if (p.x - x).hypot(p.y - y) <= half {
                    return true;
                }
                continue;
            }
            let n = sp.points.len();
            let segs = if sp.closed { n } else { n - 1 };
            for i in 0..segs {
                let a = sp.points[i];
                let b = sp.points[(i + 1) % n];
                if segment_distance(a, b, x, y) <= half {
                    return true;
                }
            }
        }
        false
    }
}

fn arc_sweep(start: f64, end: f64, ccw: bool) -> f64 {
    use std::f64::consts::TAU;
    let mut sweep = end - start;
    if ccw {
        if sweep > 0.0 {
            sweep -= TAU * (sweep / TAU).ceil();
        }
        if sweep == 0.0 && end != start {
            sweep = -TAU;
        }
        sweep.max(-TAU)
    } else {
        if sweep < 0.0 {
            sweep += TAU * (-sweep / TAU).ceil();
        }
        sweep.min(TAU)
    }
}

fn cross(a: Point, b: Point, x: f64, y: f64) -> f64 {
    (b.x - a.x) * (y - a.y) - (x - a.x) * (b.y - a.y)
}

fn segment_distance(a: Point, b: Point, x: f64, y: f64) -> f64 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len_sq = dx * dx + dy * dy;
    if len_sq == 0.0 {
        return (a.x - x).hypot(a.y - y);
    }
    let t = (((x - a.x) * dx + (y - a.y) * dy) / len_sq).clamp(0.0, 1.0);
    let (px, py) = (a.x + t * dx, a.y + t * dy);
    (px - x).hypot(py - y)
}
