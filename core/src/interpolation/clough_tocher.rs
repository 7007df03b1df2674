//! Piecewise-cubic C1 interpolant on a Delaunay triangulation.
//!
//! Each triangle is split at its centroid into three cubic Bezier patches
//! (the Clough-Tocher macro element). Vertex gradients come from a weighted
//! least-squares fit over neighbouring vertices, so linear data is
//! reproduced exactly.

use super::delaunay::{Point, Triangulation};

type Gradient = [f64; 2];

fn sub(a: Point, b: Point) -> [f64; 2] {
    [a[0] - b[0], a[1] - b[1]]
}

fn dot(a: [f64; 2], b: [f64; 2]) -> f64 {
    a[0] * b[0] + a[1] * b[1]
}

/// Gradient at every vertex, fitted with inverse-square-distance weights.
/// Vertices whose neighbourhood is degenerate get a zero gradient.
pub fn estimate_gradients(mesh: &Triangulation, values: &[f64]) -> Vec<Gradient> {
    mesh.neighbours()
        .iter()
        .enumerate()
        .map(|(i, neighbours)| {
            let (mut sxx, mut sxy, mut syy, mut rx, mut ry) = (0.0, 0.0, 0.0, 0.0, 0.0);
            for &j in neighbours {
                let d = sub(mesh.points[j], mesh.points[i]);
                let dist_sq = dot(d, d);
                if dist_sq == 0.0 {
                    continue;
                }
                let w = 1.0 / dist_sq;
                let df = values[j] - values[i];
                sxx += w * d[0] * d[0];
                sxy += w * d[0] * d[1];
                syy += w * d[1] * d[1];
                rx += w * d[0] * df;
                ry += w * d[1] * df;
            }
            let det = sxx * syy - sxy * sxy;
            let scale = (sxx + syy) * (sxx + syy);
            if scale == 0.0 || det.abs() <= 1e-12 * scale {
                return [0.0, 0.0];
            }
            [(syy * rx - sxy * ry) / det, (sxx * ry - sxy * rx) / det]
        })
        .collect()
}

/// Control net of one macro triangle.
#[derive(Debug, Clone)]
struct MacroPatch {
    vertices: [Point; 3],
    values: [f64; 3],
    gradients: [Gradient; 3],
    /// Inner control point next to each vertex on its spoke to the centroid.
    spoke: [f64; 3],
    /// Edge-interior control point of each sub-triangle, by opposite vertex.
    edge: [f64; 3],
    /// Control point next to the centroid on each spoke.
    inner: [f64; 3],
    centre: f64,
}

impl MacroPatch {
    fn new(vertices: [Point; 3], values: [f64; 3], gradients: [Gradient; 3]) -> Self {
        let centroid = [
            (vertices[0][0] + vertices[1][0] + vertices[2][0]) / 3.0,
            (vertices[0][1] + vertices[1][1] + vertices[2][1]) / 3.0,
        ];
        let spoke: [f64; 3] = std::array::from_fn(|i| {
            values[i] + dot(gradients[i], sub(centroid, vertices[i])) / 3.0
        });

        let edge: [f64; 3] = std::array::from_fn(|k| {
            let (i, j) = ((k + 1) % 3, (k + 2) % 3);
            let (a, b) = (vertices[i], vertices[j]);
            let b210 = values[i] + dot(gradients[i], sub(b, a)) / 3.0;
            let b120 = values[j] + dot(gradients[j], sub(a, b)) / 3.0;

            // Cross-edge direction in sub-triangle barycentrics: the edge normal.
            let tangent = sub(b, a);
            let normal = [-tangent[1], tangent[0]];
            let (ac, bc) = (sub(a, centroid), sub(b, centroid));
            let det = ac[0] * bc[1] - ac[1] * bc[0];
            if det == 0.0 {
                return (b210 + b120) / 2.0;
            }
            let du = (normal[0] * bc[1] - normal[1] * bc[0]) / det;
            let dv = (ac[0] * normal[1] - ac[1] * normal[0]) / det;
            let dw = -du - dv;

            // Keep the normal derivative linear along the edge.
            let d20 = du * values[i] + dv * b210 + dw * spoke[i];
            let d02 = du * b120 + dv * values[j] + dw * spoke[j];
            ((d20 + d02) / 2.0 - du * b210 - dv * b120) / dw
        });

        let inner: [f64; 3] = std::array::from_fn(|i| {
            (spoke[i] + edge[(i + 1) % 3] + edge[(i + 2) % 3]) / 3.0
        });
        let centre = (inner[0] + inner[1] + inner[2]) / 3.0;

        MacroPatch {
            vertices,
            values,
            gradients,
            spoke,
            edge,
            inner,
            centre,
        }
    }

    /// Evaluates at macro barycentric coordinates `lambda`.
    fn evaluate(&self, lambda: [f64; 3]) -> f64 {
        let k = (0..3)
            .min_by(|&a, &b| lambda[a].total_cmp(&lambda[b]))
            .unwrap_or(0);
        let (i, j) = ((k + 1) % 3, (k + 2) % 3);
        let u = lambda[i] - lambda[k];
        let v = lambda[j] - lambda[k];
        let w = 3.0 * lambda[k];

        let (a, b) = (self.vertices[i], self.vertices[j]);
        let b300 = self.values[i];
        let b030 = self.values[j];
        let b003 = self.centre;
        let b210 = self.values[i] + dot(self.gradients[i], sub(b, a)) / 3.0;
        let b120 = self.values[j] + dot(self.gradients[j], sub(a, b)) / 3.0;
        let b201 = self.spoke[i];
        let b021 = self.spoke[j];
        let b102 = self.inner[i];
        let b012 = self.inner[j];
        let b111 = self.edge[k];

        b300 * u * u * u
            + b030 * v * v * v
            + b003 * w * w * w
            + 3.0 * b210 * u * u * v
            + 3.0 * b120 * u * v * v
            + 3.0 * b201 * u * u * w
            + 3.0 * b021 * v * v * w
            + 3.0 * b102 * u * w * w
            + 3.0 * b012 * v * w * w
            + 6.0 * b111 * u * v * w
    }
}

/// Clough-Tocher interpolant over a fixed triangulation.
pub struct CloughTocher<'a> {
    mesh: &'a Triangulation,
    patches: Vec<MacroPatch>,
}

impl<'a> CloughTocher<'a> {
    pub fn new(mesh: &'a Triangulation, values: &[f64]) -> Self {
        let gradients = estimate_gradients(mesh, values);
        let patches = mesh
            .triangles
            .iter()
            .map(|tri| {
                MacroPatch::new(
                    tri.map(|v| mesh.points[v]),
                    tri.map(|v| values[v]),
                    tri.map(|v| gradients[v]),
                )
            })
            .collect();
        CloughTocher { mesh, patches }
    }

    /// Estimate at `p`, `None` outside the triangulated hull.
    pub fn evaluate(&self, p: Point) -> Option<f64> {
        let (t, lambda) = self.mesh.locate(p)?;
        Some(self.patches[t].evaluate(lambda))
    }
}
