//! Vector Laplacian: `C_ijkl = α δ_ik δ_jl`, so `σ = α ∇u` and
//! `f_i = α u_{i,jj}`.

use crate::kinematics::KinematicVariable;
use crate::solid::Solid;
use crate::tensor::{Matrix, Stiffness, Symmetry};
use std::ops::{Add, Div, Mul, Sub};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Laplacian {
    pub alpha: f64,
}

impl Laplacian {
    pub fn new(alpha: f64) -> Self {
        Self { alpha }
    }
}

impl Default for Laplacian {
    fn default() -> Self {
        Self { alpha: 1.0 }
    }
}

impl<const D: usize> Solid<D> for Laplacian {
    fn name(&self) -> &'static str {
        "laplacian"
    }

    fn kinematic_variable(&self) -> KinematicVariable {
        KinematicVariable::Gradu
    }

    fn symmetry(&self) -> Symmetry {
        Symmetry::Diagonal
    }

    fn w(&self, gradu: &Matrix<D>) -> f64 {
        0.5 * self.alpha * gradu.norm_squared()
    }

    fn dw(&self, gradu: &Matrix<D>) -> Matrix<D> {
        gradu * self.alpha
    }

    fn ddw(&self, _gradu: &Matrix<D>) -> Stiffness<D> {
        Stiffness::diagonal(&Matrix::<D>::from_element(self.alpha))
    }
}

impl Add for Laplacian {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.alpha + rhs.alpha)
    }
}

impl Sub for Laplacian {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.alpha - rhs.alpha)
    }
}

impl Mul<f64> for Laplacian {
    type Output = Self;
    fn mul(self, alpha: f64) -> Self {
        Self::new(self.alpha * alpha)
    }
}

impl Div<f64> for Laplacian {
    type Output = Self;
    fn div(self, alpha: f64) -> Self {
        Self::new(self.alpha / alpha)
    }
}
