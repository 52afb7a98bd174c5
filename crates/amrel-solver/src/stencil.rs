//! Finite-difference stencils on nodal data.
//!
//! First derivatives are centered where both neighbors exist and one-sided
//! (first order, denominator `Δx`) at the edge of the available region.
//! Second derivatives are always centered; the mixed ones use the four
//! diagonal neighbors.

use crate::field::BaseFab;
use crate::grid::{IntVect, shifted};
use amrel_model::{Matrix, Matrix3, Vector};

/// Which neighbors a first derivative may read along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StencilType {
    Central,
    /// Lower neighbor missing: forward difference
    Lo,
    /// Upper neighbor missing: backward difference
    Hi,
}

/// The `D` components of a nodal vector field at `p`.
#[inline]
pub fn vector_at<const D: usize>(fab: &BaseFab<f64, D>, p: &IntVect<D>) -> Vector<D> {
    Vector::<D>::from_fn(|i, _| fab.get(p, i))
}

/// `∇u` at `p`, with `grad[(i, j)] = ∂u_i/∂x_j`.
pub fn gradient<const D: usize>(
    fab: &BaseFab<f64, D>,
    p: &IntVect<D>,
    dx: &[f64; D],
    sten: &[StencilType; D],
) -> Matrix<D> {
    let mut grad = Matrix::<D>::zeros();
    for j in 0..D {
        let (hi, lo, h) = match sten[j] {
            StencilType::Central => (shifted(p, j, 1), shifted(p, j, -1), 2.0 * dx[j]),
            StencilType::Lo => (shifted(p, j, 1), *p, dx[j]),
            StencilType::Hi => (*p, shifted(p, j, -1), dx[j]),
        };
        for i in 0..D {
            grad[(i, j)] = (fab.get(&hi, i) - fab.get(&lo, i)) / h;
        }
    }
    grad
}

/// Second gradient at `p`: `g[k][(l, j)] = ∂²u_k/∂x_l∂x_j`.
pub fn hessian<const D: usize>(fab: &BaseFab<f64, D>, p: &IntVect<D>, dx: &[f64; D]) -> Matrix3<D> {
    let mut g = [Matrix::<D>::zeros(); D];
    for l in 0..D {
        let pl = shifted(p, l, 1);
        let ml = shifted(p, l, -1);
        for k in 0..D {
            g[k][(l, l)] = (fab.get(&pl, k) - 2.0 * fab.get(p, k) + fab.get(&ml, k)) / (dx[l] * dx[l]);
        }
        for j in l + 1..D {
            let pp = shifted(&pl, j, 1);
            let mm = shifted(&ml, j, -1);
            let pm = shifted(&pl, j, -1);
            let mp = shifted(&ml, j, 1);
            for k in 0..D {
                let v = (fab.get(&pp, k) + fab.get(&mm, k) - fab.get(&pm, k) - fab.get(&mp, k))
                    / (4.0 * dx[l] * dx[j]);
                g[k][(l, j)] = v;
                g[k][(j, l)] = v;
            }
        }
    }
    g
}

/// Gradient produced by a unit value of component `comp` at the stencil's
/// own node, all neighbors zero.
pub fn impulse_gradient<const D: usize>(comp: usize, dx: &[f64; D], sten: &[StencilType; D]) -> Matrix<D> {
    let mut grad = Matrix::<D>::zeros();
    for j in 0..D {
        grad[(comp, j)] = match sten[j] {
            StencilType::Central => 0.0,
            StencilType::Lo => -1.0 / dx[j],
            StencilType::Hi => 1.0 / dx[j],
        };
    }
    grad
}

/// Second gradient produced by a unit value of component `comp` at the
/// stencil's own node.
pub fn impulse_hessian<const D: usize>(comp: usize, dx: &[f64; D]) -> Matrix3<D> {
    let mut g = [Matrix::<D>::zeros(); D];
    for l in 0..D {
        g[comp][(l, l)] = -2.0 / (dx[l] * dx[l]);
    }
    g
}
