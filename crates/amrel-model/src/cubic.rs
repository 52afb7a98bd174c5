//! Cubic anisotropic elasticity, optionally with an eigenstrain offset.
//!
//! The crystal-frame constants `C11`, `C12`, `C44` are rotated into the lab
//! frame with Bunge (z-x-z) Euler angles. In 2D only in-plane rotations are
//! meaningful, so `Phi` must be zero there.

use crate::error::{ModelError, Result};
use crate::kinematics::KinematicVariable;
use crate::solid::Solid;
#[cfg(test)]
use crate::solid::random_matrix;
use crate::tensor::{Matrix, Stiffness, Symmetry};
#[cfg(test)]
use rand::Rng;
use std::f64::consts::PI;
use std::ops::{Add, Div, Mul, Sub};

/// Active rotation `Rz(phi1) Rx(Phi) Rz(phi2)`, truncated to `D` dimensions.
pub fn bunge_rotation<const D: usize>(phi1: f64, phi: f64, phi2: f64) -> Result<Matrix<D>> {
    if D != 2 && D != 3 {
        return Err(ModelError::InvalidParameter(format!(
            "rotations are defined for 2D and 3D only, got {D}D"
        )));
    }
    if D == 2 && phi != 0.0 {
        return Err(ModelError::InvalidParameter(format!(
            "Phi must be 0 in 2D (out-of-plane rotation), got {phi}"
        )));
    }
    let rz = |a: f64| nalgebra::Matrix3::new(a.cos(), -a.sin(), 0.0, a.sin(), a.cos(), 0.0, 0.0, 0.0, 1.0);
    let rx = |a: f64| nalgebra::Matrix3::new(1.0, 0.0, 0.0, 0.0, a.cos(), -a.sin(), 0.0, a.sin(), a.cos());
    let r = rz(phi1) * rx(phi) * rz(phi2);
    Ok(Matrix::<D>::from_fn(|i, j| r[(i, j)]))
}

/// Linear cubic model; stores the rotated stiffness directly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearCubic<const D: usize> {
    pub ddw: Stiffness<D>,
}

impl<const D: usize> LinearCubic<D> {
    pub fn new(c11: f64, c12: f64, c44: f64, rotation: &Matrix<D>) -> Self {
        Self {
            ddw: Stiffness::cubic(c11, c12, c44, rotation),
        }
    }

    pub fn from_euler(c11: f64, c12: f64, c44: f64, phi1: f64, phi: f64, phi2: f64) -> Result<Self> {
        let rotation = bunge_rotation::<D>(phi1, phi, phi2)?;
        Ok(Self::new(c11, c12, c44, &rotation))
    }

    #[cfg(test)]
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let c11 = rng.gen_range(0.0..1.0);
        let c12 = rng.gen_range(0.0..1.0);
        let c44 = rng.gen_range(0.0..1.0);
        let phi1 = rng.gen_range(0.0..2.0 * PI);
        let phi = if D == 3 { rng.gen_range(0.0..PI) } else { 0.0 };
        let phi2 = rng.gen_range(0.0..2.0 * PI);
        // D is 2 or 3 and Phi is zero in 2D, so the rotation always exists
        let rotation = bunge_rotation::<D>(phi1, phi, phi2).unwrap_or_else(|_| Matrix::<D>::identity());
        Self::new(c11, c12, c44, &rotation)
    }
}

impl<const D: usize> Solid<D> for LinearCubic<D> {
    fn name(&self) -> &'static str {
        "cubic"
    }

    fn kinematic_variable(&self) -> KinematicVariable {
        KinematicVariable::Gradu
    }

    fn symmetry(&self) -> Symmetry {
        Symmetry::MajorMinor
    }

    fn w(&self, x: &Matrix<D>) -> f64 {
        0.5 * self.ddw.contract(x, x)
    }

    fn dw(&self, x: &Matrix<D>) -> Matrix<D> {
        self.ddw.apply(x)
    }

    fn ddw(&self, _x: &Matrix<D>) -> Stiffness<D> {
        self.ddw
    }
}

impl<const D: usize> Add for LinearCubic<D> {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self { ddw: self.ddw + rhs.ddw }
    }
}

impl<const D: usize> Sub for LinearCubic<D> {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self { ddw: self.ddw - rhs.ddw }
    }
}

impl<const D: usize> Mul<f64> for LinearCubic<D> {
    type Output = Self;
    fn mul(self, alpha: f64) -> Self {
        Self { ddw: self.ddw * alpha }
    }
}

impl<const D: usize> Div<f64> for LinearCubic<D> {
    type Output = Self;
    fn div(self, alpha: f64) -> Self {
        Self { ddw: self.ddw / alpha }
    }
}

/// Cubic model evaluated at `X - F0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineCubic<const D: usize> {
    pub base: LinearCubic<D>,
    pub f0: Matrix<D>,
}

impl<const D: usize> AffineCubic<D> {
    pub fn new(base: LinearCubic<D>, f0: Matrix<D>) -> Self {
        Self { base, f0 }
    }

    #[cfg(test)]
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let base = LinearCubic::random(rng);
        Self {
            base,
            f0: random_matrix(rng),
        }
    }
}

impl<const D: usize> Solid<D> for AffineCubic<D> {
    fn name(&self) -> &'static str {
        "affine-cubic"
    }

    fn kinematic_variable(&self) -> KinematicVariable {
        KinematicVariable::Gradu
    }

    fn symmetry(&self) -> Symmetry {
        Symmetry::MajorMinor
    }

    fn w(&self, x: &Matrix<D>) -> f64 {
        self.base.w(&(x - self.f0))
    }

    fn dw(&self, x: &Matrix<D>) -> Matrix<D> {
        self.base.dw(&(x - self.f0))
    }

    fn ddw(&self, _x: &Matrix<D>) -> Stiffness<D> {
        self.base.ddw
    }
}

impl<const D: usize> Add for AffineCubic<D> {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.base + rhs.base, self.f0 + rhs.f0)
    }
}

impl<const D: usize> Sub for AffineCubic<D> {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.base - rhs.base, self.f0 - rhs.f0)
    }
}

impl<const D: usize> Mul<f64> for AffineCubic<D> {
    type Output = Self;
    fn mul(self, alpha: f64) -> Self {
        Self::new(self.base * alpha, self.f0 * alpha)
    }
}

impl<const D: usize> Div<f64> for AffineCubic<D> {
    type Output = Self;
    fn div(self, alpha: f64) -> Self {
        Self::new(self.base / alpha, self.f0 / alpha)
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
    fn rotation_is_orthogonal() {
        let r = bunge_rotation::<3>(0.3, 1.1, -0.7).unwrap();
        assert_relative_eq!(r * r.transpose(), Matrix::<3>::identity(), epsilon = 1e-12);
    }

    #[test]
    fn out_of_plane_rotation_rejected_in_2d() {
        assert!(bunge_rotation::<2>(0.1, 0.2, 0.0).is_err());
        assert!(bunge_rotation::<2>(0.1, 0.0, 0.3).is_ok());
    }

    #[test]
    fn rotated_stiffness_keeps_symmetry() {
        let model = LinearCubic::<3>::from_euler(3.0, 1.5, 0.8, 0.2, 0.9, 1.4).unwrap();
        assert!(model.ddw.satisfies(Symmetry::MajorMinor, 1e-12));
    }

    #[test]
    fn derivatives_are_consistent() {
        let mut rng = StdRng::seed_from_u64(21);
        let (e1, e2) = derivative_test::<3, _, _>(&mut rng, 10, |r| LinearCubic::<3>::random(r));
        assert!(e1 < 1e-6 && e2 < 1e-6, "cubic errors {e1} {e2}");
        let (e1, e2) = derivative_test::<2, _, _>(&mut rng, 10, |r| AffineCubic::<2>::random(r));
        assert!(e1 < 1e-6 && e2 < 1e-6, "affine cubic errors {e1} {e2}");
    }
}
