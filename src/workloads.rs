//! Sample workloads expressed as maps on an [`AptBuilder`]
//!
//! Used by the CLI and as realistic inputs for the scheduling tests.

use crate::apt::AptBuilder;
use crate::data::ElementKind;
use crate::error::Result;
use crate::pattern::{Element, MapFunctor, PatternIndexInfo};
use crate::view::View;

// ============================================================================
// Jacobi iteration
// ============================================================================

/// One Jacobi sweep: `x[i] = (b[i] - sum_{j != i} A[i][j] * x_[j]) / A[i][i]`.
pub struct JacobiFunctor {
    a: View,
    b: View,
    x_prev: View,
}

impl MapFunctor for JacobiFunctor {
    fn execute(&self, index: usize, element: &mut Element) {
        let n = self.a.shape()[0];
        for j in 0..n {
            if j != index {
                element.op(2);
            }
        }
        element.op(1);
    }

    fn consumes(&self) -> Vec<View> {
        vec![self.a.clone(), self.b.clone(), self.x_prev.clone()]
    }

    fn touch(&self, _index: usize, info: &mut PatternIndexInfo) -> bool {
        let n = self.a.shape()[0] as f64;
        // loop check and increment, comparison and update, division
        info.flops = 2.0 * n + 3.0 * n + 1.0;
        true
    }
}

/// `iterations` Jacobi sweeps on an `n`×`n` system, alternating `x` and `x_`.
pub fn jacobi(builder: &mut AptBuilder, n: usize, iterations: usize) -> Result<()> {
    let a = builder.data("A", ElementKind::F64, &[n, n])?;
    let b = builder.data("b", ElementKind::F64, &[n])?;
    let mut x = builder.data("x", ElementKind::F64, &[n])?;
    let mut x_prev = builder.data("x_", ElementKind::F64, &[n])?;

    for _ in 0..iterations {
        let functor = JacobiFunctor {
            a: a.clone(),
            b: b.clone(),
            x_prev: x_prev.clone(),
        };
        builder.map_named("jacobi", functor, &x)?;
        std::mem::swap(&mut x, &mut x_prev);
    }
    Ok(())
}

// ============================================================================
// Matrix-vector product
// ============================================================================

/// `res[i] = sum_j M[i][j] * x[j]`, costed by execution.
pub struct MxvFunctor {
    m: View,
    x: View,
}

impl MapFunctor for MxvFunctor {
    fn execute(&self, _index: usize, element: &mut Element) {
        for _ in 0..self.m.shape()[1] {
            element.op(2);
        }
    }

    fn consumes(&self) -> Vec<View> {
        vec![self.m.clone(), self.x.clone()]
    }
}

pub fn mxv(builder: &mut AptBuilder, n: usize) -> Result<()> {
    let m = builder.data("M", ElementKind::F64, &[n, n])?;
    let x = builder.data("x", ElementKind::F64, &[n])?;
    let res = builder.data("res", ElementKind::F64, &[n])?;
    builder.map_named("mxv", MxvFunctor { m, x }, &res)?;
    Ok(())
}

// ============================================================================
// k-means
// ============================================================================

/// Assign each point to its nearest centroid.
pub struct KMeansAssignFunctor {
    points: View,
    centroids: View,
}

impl MapFunctor for KMeansAssignFunctor {
    fn execute(&self, _index: usize, element: &mut Element) {
        for _ in 0..self.centroids.shape()[0] {
            element.op(6);
        }
    }

    fn consumes(&self) -> Vec<View> {
        vec![self.points.clone(), self.centroids.clone()]
    }

    fn touch(&self, _index: usize, info: &mut PatternIndexInfo) -> bool {
        info.flops = 6.0 * self.centroids.shape()[0] as f64;
        true
    }
}

/// Recompute one centroid from the points assigned to it.
pub struct KMeansUpdateFunctor {
    points: View,
    assignment: View,
}

impl MapFunctor for KMeansUpdateFunctor {
    fn execute(&self, _index: usize, element: &mut Element) {
        for _ in 0..self.points.shape()[0] {
            element.add_flops(6.0);
        }
        element.add_flops(2.0);
    }

    fn consumes(&self) -> Vec<View> {
        vec![self.points.clone(), self.assignment.clone()]
    }

    fn touch(&self, _index: usize, info: &mut PatternIndexInfo) -> bool {
        let n = self.points.shape()[0] as f64;
        info.flops = n * (2.0 + 1.0 + 1.0 + 2.0) + 2.0;
        true
    }
}

/// `iterations` rounds of assignment and update over `points` 2-D points
/// and `clusters` centroids.
pub fn kmeans(builder: &mut AptBuilder, points: usize, clusters: usize, iterations: usize) -> Result<()> {
    let coordinates = builder.data("points", ElementKind::F64, &[points, 2])?;
    let centroids = builder.data("centroids", ElementKind::F64, &[clusters, 2])?;
    let assignment = builder.data("assignment", ElementKind::I32, &[points])?;

    for _ in 0..iterations {
        let assign = KMeansAssignFunctor {
            points: coordinates.clone(),
            centroids: centroids.clone(),
        };
        builder.map_named("kmeans-assign", assign, &assignment)?;

        let update = KMeansUpdateFunctor {
            points: coordinates.clone(),
            assignment: assignment.clone(),
        };
        builder.map_named("kmeans-update", update, &centroids)?;
    }
    Ok(())
}

// ============================================================================
// Mandelbrot
// ============================================================================

const MANDELBROT_MAX_ITERATIONS: usize = 100;

/// Escape-time iteration count of the pixel at `index` in an `n`×`n` image.
fn escape_iterations(index: usize, n: usize) -> usize {
    let n = n as f64;
    let x0 = (index as f64 % n) / n * 3.5 - 1.0;
    let y0 = (index as f64 / n) / n * 2.0 - 1.0;
    let (mut x, mut y) = (0.0f64, 0.0f64);
    let mut iteration = 0;
    while x * x + y * y <= 4.0 && iteration < MANDELBROT_MAX_ITERATIONS {
        let xtemp = x * x - y * y + x0;
        y = 2.0 * x * y + y0;
        x = xtemp;
        iteration += 1;
    }
    iteration
}

pub struct MandelbrotFunctor {
    dim: usize,
}

impl MapFunctor for MandelbrotFunctor {
    fn execute(&self, index: usize, element: &mut Element) {
        for _ in 0..escape_iterations(index, self.dim) {
            element.op(15);
        }
    }

    fn touch(&self, index: usize, info: &mut PatternIndexInfo) -> bool {
        // 7 flops for the bound check, 8 for the update
        info.flops = 15.0 * escape_iterations(index, self.dim) as f64;
        true
    }
}

/// One map over an `n`×`n` image stored as a flat block.
pub fn mandelbrot(builder: &mut AptBuilder, n: usize) -> Result<()> {
    let set = builder.data("set", ElementKind::F64, &[n * n])?;
    builder.map_named("mandelbrot", MandelbrotFunctor { dim: n }, &set)?;
    Ok(())
}
