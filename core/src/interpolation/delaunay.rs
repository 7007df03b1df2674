//! Bowyer-Watson Delaunay triangulation of planar points.
//!
//! Inputs are expected in a unit-scale frame (the interpolator normalises
//! before calling in) and free of duplicates. The hull is closed with ghost
//! triangles sharing one vertex at infinity, so thin slivers along a track
//! survive no matter how large their circumcircle grows.

use std::collections::HashSet;

pub type Point = [f64; 2];

/// Vertex at infinity closing every hull edge.
const GHOST: usize = usize::MAX;

/// Slack on barycentric coordinates when locating points on shared edges.
pub const LOCATE_TOLERANCE: f64 = 1e-9;

fn orient(a: Point, b: Point, c: Point) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

/// Positive when `p` lies inside the circumcircle of counter-clockwise `(a, b, c)`.
fn incircle(a: Point, b: Point, c: Point, p: Point) -> f64 {
    let (adx, ady) = (a[0] - p[0], a[1] - p[1]);
    let (bdx, bdy) = (b[0] - p[0], b[1] - p[1]);
    let (cdx, cdy) = (c[0] - p[0], c[1] - p[1]);
    (adx * adx + ady * ady) * (bdx * cdy - cdx * bdy)
        + (bdx * bdx + bdy * bdy) * (cdx * ady - adx * cdy)
        + (cdx * cdx + cdy * cdy) * (adx * bdy - bdx * ady)
}

/// Whether inserting `p` invalidates triangle `tri`.
///
/// A ghost triangle `(u, v, GHOST)` stands for the outside of hull edge
/// `u -> v`. It conflicts with points strictly beyond that edge, or lying
/// on the open segment itself.
fn conflicts(points: &[Point], tri: [usize; 3], p: Point) -> bool {
    match tri.iter().position(|&v| v == GHOST) {
        None => incircle(points[tri[0]], points[tri[1]], points[tri[2]], p) > 0.0,
        Some(g) => {
            let u = points[tri[(g + 1) % 3]];
            let v = points[tri[(g + 2) % 3]];
            let side = orient(u, v, p);
            if side != 0.0 {
                return side > 0.0;
            }
            let along = (p[0] - u[0]) * (v[0] - u[0]) + (p[1] - u[1]) * (v[1] - u[1]);
            let length_sq = (v[0] - u[0]).powi(2) + (v[1] - u[1]).powi(2);
            along > 0.0 && along < length_sq
        }
    }
}

/// Seed triangle: the first point, the one farthest from it, and the one
/// farthest off their line. `None` when every point is collinear.
fn seed(points: &[Point]) -> Option<[usize; 3]> {
    let dist_sq = |a: Point, b: Point| (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2);
    let first = 0;
    let far = (1..points.len())
        .max_by(|&i, &j| dist_sq(points[first], points[i]).total_cmp(&dist_sq(points[first], points[j])))?;
    let apex = (1..points.len())
        .filter(|&k| k != far)
        .max_by(|&i, &j| {
            orient(points[first], points[far], points[i])
                .abs()
                .total_cmp(&orient(points[first], points[far], points[j]).abs())
        })?;
    let side = orient(points[first], points[far], points[apex]);
    if side == 0.0 {
        return None;
    }
    Some(if side > 0.0 {
        [first, far, apex]
    } else {
        [first, apex, far]
    })
}

/// Barycentric coordinates of `p` in triangle `(a, b, c)`.
pub fn barycentric(p: Point, a: Point, b: Point, c: Point) -> Option<[f64; 3]> {
    let det = (b[1] - c[1]) * (a[0] - c[0]) + (c[0] - b[0]) * (a[1] - c[1]);
    if det == 0.0 {
        return None;
    }
    let l0 = ((b[1] - c[1]) * (p[0] - c[0]) + (c[0] - b[0]) * (p[1] - c[1])) / det;
    let l1 = ((c[1] - a[1]) * (p[0] - c[0]) + (a[0] - c[0]) * (p[1] - c[1])) / det;
    Some([l0, l1, 1.0 - l0 - l1])
}

#[derive(Debug, Clone)]
pub struct Triangulation {
    pub points: Vec<Point>,
    /// Counter-clockwise vertex indices into `points`.
    pub triangles: Vec<[usize; 3]>,
    bounds: Vec<[f64; 4]>,
}

impl Triangulation {
    pub fn build(points: &[Point]) -> Triangulation {
        let Some(first) = seed(points) else {
            return Triangulation {
                points: points.to_vec(),
                triangles: Vec::new(),
                bounds: Vec::new(),
            };
        };
        let [a, b, c] = first;
        let mut triangles = vec![first, [b, a, GHOST], [c, b, GHOST], [a, c, GHOST]];

        for (index, &p) in points.iter().enumerate() {
            if first.contains(&index) {
                continue;
            }
            let mut cavity: HashSet<(usize, usize)> = HashSet::new();
            triangles.retain(|&tri| {
                if !conflicts(points, tri, p) {
                    return true;
                }
                for k in 0..3 {
                    cavity.insert((tri[k], tri[(k + 1) % 3]));
                }
                false
            });
            // Cavity edges whose twin was not removed bound the star around `p`.
            let boundary: Vec<(usize, usize)> = cavity
                .iter()
                .copied()
                .filter(|&(u, v)| !cavity.contains(&(v, u)))
                .collect();
            for (u, v) in boundary {
                triangles.push([u, v, index]);
            }
        }

        let triangles: Vec<[usize; 3]> = triangles
            .into_iter()
            .filter(|tri| !tri.contains(&GHOST))
            .collect();
        let bounds = triangles
            .iter()
            .map(|tri| {
                let xs = tri.map(|v| points[v][0]);
                let ys = tri.map(|v| points[v][1]);
                [
                    xs.iter().copied().fold(f64::INFINITY, f64::min),
                    xs.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    ys.iter().copied().fold(f64::INFINITY, f64::min),
                    ys.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                ]
            })
            .collect();

        Triangulation {
            points: points.to_vec(),
            triangles,
            bounds,
        }
    }

    /// Triangle containing `p` and its barycentric coordinates.
    pub fn locate(&self, p: Point) -> Option<(usize, [f64; 3])> {
        let slack = LOCATE_TOLERANCE;
        self.triangles.iter().enumerate().find_map(|(t, tri)| {
            let [x0, x1, y0, y1] = self.bounds[t];
            if p[0] < x0 - slack || p[0] > x1 + slack || p[1] < y0 - slack || p[1] > y1 + slack {
                return None;
            }
            let weights = barycentric(
                p,
                self.points[tri[0]],
                self.points[tri[1]],
                self.points[tri[2]],
            )?;
            weights
                .iter()
                .all(|&w| w >= -slack)
                .then_some((t, weights))
        })
    }

    /// Distinct neighbours of each vertex along triangulation edges.
    pub fn neighbours(&self) -> Vec<Vec<usize>> {
        let mut adjacency = vec![Vec::new(); self.points.len()];
        for tri in &self.triangles {
            for k in 0..3 {
                let (a, b) = (tri[k], tri[(k + 1) % 3]);
                if !adjacency[a].contains(&b) {
                    adjacency[a].push(b);
                }
                if !adjacency[b].contains(&a) {
                    adjacency[b].push(a);
                }
            }
        }
        adjacency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area(t: &Triangulation, tri: [usize; 3]) -> f64 {
        orient(t.points[tri[0]], t.points[tri[1]], t.points[tri[2]]) / 2.0
    }

    #[test]
    fn square_splits_into_two_triangles() {
        let t = Triangulation::build(&[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]);
        assert_eq!(t.triangles.len(), 2);
        let total: f64 = t.triangles.iter().map(|&tri| area(&t, tri)).sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert!(t.triangles.iter().all(|&tri| area(&t, tri) > 0.0));
    }

    #[test]
    fn triangles_satisfy_empty_circle_property() {
        let points: Vec<Point> = (0..25)
            .map(|i| {
                let x = ((i * 7) % 25) as f64 / 25.0;
                let y = ((i * 11) % 25) as f64 / 25.0 + 0.013 * (i % 3) as f64;
                [x, y]
            })
            .collect();
        let t = Triangulation::build(&points);
        assert!(!t.triangles.is_empty());
        for tri in &t.triangles {
            let [a, b, c] = tri.map(|v| points[v]);
            for (i, &p) in points.iter().enumerate() {
                if !tri.contains(&i) {
                    assert!(incircle(a, b, c, p) <= 1e-12);
                }
            }
        }
    }

    #[test]
    fn thin_sliver_keeps_its_triangle() {
        // Circumradius near 2500 in the unit frame.
        let t = Triangulation::build(&[[0.0, 0.0], [0.5, 5e-5], [1.0, 0.0]]);
        assert_eq!(t.triangles.len(), 1);
        assert!(area(&t, t.triangles[0]) > 0.0);
        assert!(t.locate([0.5, 1e-5]).is_some());
    }

    #[test]
    fn gently_curved_track_covers_its_hull() {
        let points: Vec<Point> = (0..12)
            .map(|i| {
                let x = i as f64 / 11.0;
                [x, 1e-4 * x * (1.0 - x)]
            })
            .collect();
        let t = Triangulation::build(&points);
        assert_eq!(t.triangles.len(), points.len() - 2);
        let total: f64 = t.triangles.iter().map(|&tri| area(&t, tri)).sum();
        let hull: f64 = points
            .windows(2)
            .map(|w| (w[1][0] - w[0][0]) * (w[0][1] + w[1][1]) / 2.0)
            .sum();
        assert!((total - hull).abs() < 1e-12);
    }

    #[test]
    fn collinear_points_yield_no_triangles() {
        let t = Triangulation::build(&[[0.0, 0.0], [0.5, 0.5], [1.0, 1.0]]);
        assert!(t.triangles.is_empty());
        assert!(t.locate([0.5, 0.5]).is_none());
    }

    #[test]
    fn locate_finds_interior_and_rejects_outside() {
        let t = Triangulation::build(&[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]);
        let (_, w) = t.locate([0.25, 0.25]).unwrap();
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(t.locate([1.0, 1.0]).is_none());
        assert!(t.locate([0.5, 0.5]).is_some());
    }

    #[test]
    fn neighbours_follow_edges() {
        let t = Triangulation::build(&[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]);
        let adjacency = t.neighbours();
        assert!(adjacency.iter().all(|n| n.len() == 2));
    }
}
