//! The constitutive model contract.
//!
//! A [`Solid`] exposes three pure functions of one kinematic tensor `X`:
//!
//! - `W(X)`: strain energy density
//! - `DW(X)`: first derivative (stress-like)
//! - `DDW(X)`: second derivative (stiffness)
//!
//! The helpers at the bottom of this module check `DW` and `DDW` against
//! centered finite differences of `W` and `DW`.

use crate::kinematics::KinematicVariable;
use crate::tensor::{Matrix, Stiffness, Symmetry};
#[cfg(test)]
use rand::Rng;
use std::fmt::Debug;

/// Stress and stiffness of a model evaluated at one displacement gradient,
/// both expressed with respect to `∇u`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Linearization<const D: usize> {
    pub stress: Matrix<D>,
    pub stiffness: Stiffness<D>,
}

#[cold]
fn not_implemented(what: &str, model: &str) -> ! {
    panic!("{what} is not implemented for model {model}")
}

/// Constitutive model interface.
///
/// `w`, `dw` and `ddw` default to a fatal "not implemented" panic so that a
/// partially registered model fails loudly the first time it is used.
pub trait Solid<const D: usize>: Clone + Debug + Send + Sync {
    /// Short family name used in diagnostics.
    fn name(&self) -> &'static str;

    fn kinematic_variable(&self) -> KinematicVariable;

    fn symmetry(&self) -> Symmetry;

    fn w(&self, x: &Matrix<D>) -> f64 {
        let _ = x;
        not_implemented("W", self.name())
    }

    fn dw(&self, x: &Matrix<D>) -> Matrix<D> {
        let _ = x;
        not_implemented("DW", self.name())
    }

    fn ddw(&self, x: &Matrix<D>) -> Stiffness<D> {
        let _ = x;
        not_implemented("DDW", self.name())
    }

    /// Energy density at a displacement gradient.
    fn energy(&self, gradu: &Matrix<D>) -> f64 {
        self.w(&self.kinematic_variable().from_gradu(gradu))
    }

    /// `∂W/∂(∇u)` at a displacement gradient.
    fn stress(&self, gradu: &Matrix<D>) -> Matrix<D> {
        let kv = self.kinematic_variable();
        kv.stress_wrt_gradu(self.dw(&kv.from_gradu(gradu)))
    }

    /// Stress and stiffness at a displacement gradient, both w.r.t. `∇u`.
    fn linearize(&self, gradu: &Matrix<D>) -> Linearization<D> {
        let kv = self.kinematic_variable();
        let x = kv.from_gradu(gradu);
        Linearization {
            stress: kv.stress_wrt_gradu(self.dw(&x)),
            stiffness: kv.stiffness_wrt_gradu(self.ddw(&x)),
        }
    }
}

/// Uniform random matrix with entries in `[-1, 1)`.
#[cfg(test)]
pub fn random_matrix<const D: usize, R: Rng + ?Sized>(rng: &mut R) -> Matrix<D> {
    Matrix::<D>::from_fn(|_, _| rng.gen_range(-1.0..1.0))
}

/// Relative error between `DW(x)` and a centered difference of `W`.
pub fn dw_relative_error<const D: usize, M: Solid<D>>(model: &M, x: &Matrix<D>, dx: f64) -> f64 {
    let analytic = model.dw(x);
    let numeric = Matrix::<D>::from_fn(|i, j| {
        let mut dxm = Matrix::<D>::zeros();
        dxm[(i, j)] = dx;
        (model.w(&(x + dxm)) - model.w(&(x - dxm))) / (2.0 * dx)
    });
    (numeric - analytic).norm() / numeric.norm()
}

/// Relative error between `DDW(x)` and a centered difference of `DW`.
pub fn ddw_relative_error<const D: usize, M: Solid<D>>(model: &M, x: &Matrix<D>, dx: f64) -> f64 {
    let analytic = model.ddw(x);
    let mut numeric = Stiffness::<D>::zero();
    for k in 0..D {
        for l in 0..D {
            let mut dxm = Matrix::<D>::zeros();
            dxm[(k, l)] = dx;
            let diff = (model.dw(&(x + dxm)) - model.dw(&(x - dxm))) / (2.0 * dx);
            for i in 0..D {
                for j in 0..D {
                    numeric.set(i, j, k, l, diff[(i, j)]);
                }
            }
        }
    }
    (numeric - analytic).norm() / numeric.norm()
}

/// Run `trials` derivative checks on models produced by `make`; returns the
/// worst relative error seen for `DW` and for `DDW`.
#[cfg(test)]
pub fn derivative_test<const D: usize, M, R>(
    rng: &mut R,
    trials: usize,
    mut make: impl FnMut(&mut R) -> M,
) -> (f64, f64)
where
    M: Solid<D>,
    R: Rng,
{
    let dx = 1e-8;
    let mut worst = (0.0_f64, 0.0_f64);
    for _ in 0..trials {
        let model = make(rng);
        let x = random_matrix::<D, R>(rng);
        let e1 = dw_relative_error(&model, &x, dx);
        let e2 = ddw_relative_error(&model, &x, dx);
        // NaN must surface as a failure, so no f64::max here
        worst.0 = if e1.is_nan() || e1 > worst.0 { e1 } else { worst.0 };
        worst.1 = if e2.is_nan() || e2 > worst.1 { e2 } else { worst.1 };
    }
    worst
}
