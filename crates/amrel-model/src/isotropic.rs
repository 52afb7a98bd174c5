//! Isotropic linear elasticity and its affine (eigenstrain) variant.

use crate::error::{ModelError, Result};
use crate::kinematics::KinematicVariable;
use crate::solid::Solid;
#[cfg(test)]
use crate::solid::random_matrix;
use crate::tensor::{Matrix, Stiffness, Symmetry};
#[cfg(test)]
use rand::Rng;
use std::ops::{Add, Div, Mul, Sub};

/// Convert Young's modulus and Poisson ratio to `(λ, μ)`.
pub fn lame_from_youngs(youngs: f64, nu: f64) -> Result<(f64, f64)> {
    if !(youngs.is_finite() && youngs > 0.0) {
        return Err(ModelError::InvalidParameter(format!(
            "Young's modulus must be positive, got {youngs}"
        )));
    }
    if !(nu > -1.0 && nu < 0.5) {
        return Err(ModelError::InvalidParameter(format!(
            "Poisson ratio must lie in (-1, 0.5), got {nu}"
        )));
    }
    let lambda = youngs * nu / ((1.0 + nu) * (1.0 - 2.0 * nu));
    let mu = youngs / (2.0 * (1.0 + nu));
    Ok((lambda, mu))
}

/// `σ = λ tr(∇u) I + μ (∇u + ∇uᵀ)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearIsotropic {
    /// First Lamé parameter
    pub lambda: f64,
    /// Shear modulus
    pub mu: f64,
}

impl LinearIsotropic {
    pub fn new(lambda: f64, mu: f64) -> Self {
        Self { lambda, mu }
    }

    pub fn from_youngs(youngs: f64, nu: f64) -> Result<Self> {
        let (lambda, mu) = lame_from_youngs(youngs, nu)?;
        Ok(Self { lambda, mu })
    }

    #[cfg(test)]
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::new(rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0))
    }

    pub fn stiffness<const D: usize>(&self) -> Stiffness<D> {
        Stiffness::isotropic(self.lambda, self.mu)
    }
}

impl<const D: usize> Solid<D> for LinearIsotropic {
    fn name(&self) -> &'static str {
        "isotropic"
    }

    fn kinematic_variable(&self) -> KinematicVariable {
        KinematicVariable::Gradu
    }

    fn symmetry(&self) -> Symmetry {
        Symmetry::Isotropic
    }

    fn w(&self, x: &Matrix<D>) -> f64 {
        0.5 * self.stiffness::<D>().contract(x, x)
    }

    fn dw(&self, x: &Matrix<D>) -> Matrix<D> {
        Matrix::<D>::identity() * (self.lambda * x.trace()) + (x + x.transpose()) * self.mu
    }

    fn ddw(&self, _x: &Matrix<D>) -> Stiffness<D> {
        self.stiffness()
    }
}

impl Add for LinearIsotropic {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.lambda + rhs.lambda, self.mu + rhs.mu)
    }
}

impl Sub for LinearIsotropic {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.lambda - rhs.lambda, self.mu - rhs.mu)
    }
}

impl Mul<f64> for LinearIsotropic {
    type Output = Self;
    fn mul(self, alpha: f64) -> Self {
        Self::new(self.lambda * alpha, self.mu * alpha)
    }
}

impl Div<f64> for LinearIsotropic {
    type Output = Self;
    fn div(self, alpha: f64) -> Self {
        Self::new(self.lambda / alpha, self.mu / alpha)
    }
}

/// Isotropic model evaluated at `X - F0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineIsotropic<const D: usize> {
    pub base: LinearIsotropic,
    /// Eigenstrain offset
    pub f0: Matrix<D>,
}

impl<const D: usize> AffineIsotropic<D> {
    pub fn new(lambda: f64, mu: f64, f0: Matrix<D>) -> Self {
        Self {
            base: LinearIsotropic::new(lambda, mu),
            f0,
        }
    }

    #[cfg(test)]
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let base = LinearIsotropic::random(rng);
        Self {
            base,
            f0: random_matrix(rng),
        }
    }
}

impl<const D: usize> Solid<D> for AffineIsotropic<D> {
    fn name(&self) -> &'static str {
        "affine-isotropic"
    }

    fn kinematic_variable(&self) -> KinematicVariable {
        KinematicVariable::Gradu
    }

    fn symmetry(&self) -> Symmetry {
        Symmetry::Isotropic
    }

    fn w(&self, x: &Matrix<D>) -> f64 {
        self.base.w(&(x - self.f0))
    }

    fn dw(&self, x: &Matrix<D>) -> Matrix<D> {
        self.base.dw(&(x - self.f0))
    }

    fn ddw(&self, x: &Matrix<D>) -> Stiffness<D> {
        self.base.ddw(&(x - self.f0))
    }
}

impl<const D: usize> Add for AffineIsotropic<D> {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self {
            base: self.base + rhs.base,
            f0: self.f0 + rhs.f0,
        }
    }
}

impl<const D: usize> Sub for AffineIsotropic<D> {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self {
            base: self.base - rhs.base,
            f0: self.f0 - rhs.f0,
        }
    }
}

impl<const D: usize> Mul<f64> for AffineIsotropic<D> {
    type Output = Self;
    fn mul(self, alpha: f64) -> Self {
        Self {
            base: self.base * alpha,
            f0: self.f0 * alpha,
        }
    }
}

impl<const D: usize> Div<f64> for AffineIsotropic<D> {
    type Output = Self;
    fn div(self, alpha: f64) -> Self {
        Self {
            base: self.base / alpha,
            f0: self.f0 / alpha,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solid::derivative_test;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn lame_conversion() {
        let (lambda, mu) = lame_from_youngs(210.0, 0.3).unwrap();
        assert_relative_eq!(lambda, 210.0 * 0.3 / (1.3 * 0.4), epsilon = 1e-12);
        assert_relative_eq!(mu, 210.0 / 2.6, epsilon = 1e-12);
        assert!(lame_from_youngs(1.0, 0.5).is_err());
        assert!(lame_from_youngs(-1.0, 0.2).is_err());
    }

    #[test]
    fn linear_derivatives_are_consistent() {
        let mut rng = StdRng::seed_from_u64(11);
        let (e1, e2) = derivative_test::<2, _, _>(&mut rng, 10, |r| LinearIsotropic::random(r));
        assert!(e1 < 1e-6, "DW relative error {e1}");
        assert!(e2 < 1e-6, "DDW relative error {e2}");
        let (e1, e2) = derivative_test::<3, _, _>(&mut rng, 10, |r| LinearIsotropic::random(r));
        assert!(e1 < 1e-6 && e2 < 1e-6);
    }

    #[test]
    fn affine_derivatives_are_consistent() {
        let mut rng = StdRng::seed_from_u64(12);
        let (e1, e2) = derivative_test::<3, _, _>(&mut rng, 10, |r| AffineIsotropic::random(r));
        assert!(e1 < 1e-6, "DW relative error {e1}");
        assert!(e2 < 1e-6, "DDW relative error {e2}");
    }

    #[test]
    fn affine_stress_vanishes_at_eigenstrain() {
        let f0 = Matrix::<2>::new(0.01, 0.0, 0.0, 0.01);
        let model = AffineIsotropic::new(1.0, 1.0, f0);
        assert_relative_eq!(model.dw(&f0).norm(), 0.0);
        assert_relative_eq!(model.w(&f0), 0.0);
    }
}
