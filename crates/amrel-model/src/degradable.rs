//! Isotropic small-strain model whose moduli can be degraded by a damage
//! variable `η ∈ [0, 1]`.

use crate::error::{ModelError, Result};
use crate::kinematics::KinematicVariable;
use crate::solid::Solid;
use crate::tensor::{Matrix, Stiffness, Symmetry};
#[cfg(test)]
use rand::Rng;
use std::ops::{Add, Div, Mul, Sub};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DegradableIsotropic {
    /// Current first Lamé parameter
    pub lambda: f64,
    /// Current shear modulus
    pub mu: f64,
    /// Undamaged first Lamé parameter
    pub lambda0: f64,
    /// Undamaged shear modulus
    pub mu0: f64,
}

fn check_eta(eta: f64) -> Result<()> {
    if eta.is_nan() {
        return Err(ModelError::InvalidDegradation("NaN in eta".to_string()));
    }
    if eta.is_infinite() {
        return Err(ModelError::InvalidDegradation("Inf in eta".to_string()));
    }
    if !(0.0..=1.0).contains(&eta) {
        return Err(ModelError::InvalidDegradation(format!(
            "eta must lie in [0, 1], got {eta}"
        )));
    }
    Ok(())
}

impl DegradableIsotropic {
    pub fn new(lambda: f64, mu: f64) -> Self {
        Self {
            lambda,
            mu,
            lambda0: lambda,
            mu0: mu,
        }
    }

    /// Scale the undamaged moduli by `1 - η`.
    ///
    /// One value degrades both moduli; two values degrade `λ` and `μ`
    /// separately. An empty slice leaves the model untouched.
    pub fn degrade(&mut self, eta: &[f64]) -> Result<()> {
        match eta {
            [] => {}
            [e] => {
                check_eta(*e)?;
                self.lambda = self.lambda0 * (1.0 - e);
                self.mu = self.mu0 * (1.0 - e);
            }
            [e_lambda, e_mu] => {
                check_eta(*e_lambda)?;
                check_eta(*e_mu)?;
                self.lambda = self.lambda0 * (1.0 - e_lambda);
                self.mu = self.mu0 * (1.0 - e_mu);
            }
            _ => {
                return Err(ModelError::InvalidDegradation(format!(
                    "expected at most two eta values, got {}",
                    eta.len()
                )));
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let (lambda0, mu0) = (rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0));
        let (e_lambda, e_mu): (f64, f64) = (rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0));
        Self {
            lambda: lambda0 * (1.0 - e_lambda),
            mu: mu0 * (1.0 - e_mu),
            lambda0,
            mu0,
        }
    }
}

impl<const D: usize> Solid<D> for DegradableIsotropic {
    fn name(&self) -> &'static str {
        "degradable-isotropic"
    }

    fn kinematic_variable(&self) -> KinematicVariable {
        KinematicVariable::Epsilon
    }

    fn symmetry(&self) -> Symmetry {
        Symmetry::Isotropic
    }

    fn w(&self, eps: &Matrix<D>) -> f64 {
        0.5 * eps.dot(&<Self as Solid<D>>::dw(self, eps))
    }

    fn dw(&self, eps: &Matrix<D>) -> Matrix<D> {
        (eps + eps.transpose()) * self.mu + Matrix::<D>::identity() * (self.lambda * eps.trace())
    }

    fn ddw(&self, _eps: &Matrix<D>) -> Stiffness<D> {
        Stiffness::isotropic(self.lambda, self.mu)
    }
}

impl Add for DegradableIsotropic {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self {
            lambda: self.lambda + rhs.lambda,
            mu: self.mu + rhs.mu,
            lambda0: self.lambda0 + rhs.lambda0,
            mu0: self.mu0 + rhs.mu0,
        }
    }
}

impl Sub for DegradableIsotropic {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self {
            lambda: self.lambda - rhs.lambda,
            mu: self.mu - rhs.mu,
            lambda0: self.lambda0 - rhs.lambda0,
            mu0: self.mu0 - rhs.mu0,
        }
    }
}

impl Mul<f64> for DegradableIsotropic {
    type Output = Self;
    fn mul(self, alpha: f64) -> Self {
        Self {
            lambda: self.lambda * alpha,
            mu: self.mu * alpha,
            lambda0: self.lambda0 * alpha,
            mu0: self.mu0 * alpha,
        }
    }
}

impl Div<f64> for DegradableIsotropic {
    type Output = Self;
    fn div(self, alpha: f64) -> Self {
        self * (1.0 / alpha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solid::derivative_test;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn single_eta_scales_both_moduli() {
        let mut m = DegradableIsotropic::new(2.0, 4.0);
        m.degrade(&[0.25]).unwrap();
        assert_eq!(m.lambda, 1.5);
        assert_eq!(m.mu, 3.0);
        // degradation is always relative to the undamaged state
        m.degrade(&[0.5]).unwrap();
        assert_eq!(m.lambda, 1.0);
    }

    #[test]
    fn two_etas_scale_separately() {
        let mut m = DegradableIsotropic::new(2.0, 4.0);
        m.degrade(&[0.5, 0.0]).unwrap();
        assert_eq!(m.lambda, 1.0);
        assert_eq!(m.mu, 4.0);
    }

    #[test]
    fn rejects_out_of_range_eta() {
        let mut m = DegradableIsotropic::new(1.0, 1.0);
        assert!(m.degrade(&[1.5]).is_err());
        assert!(m.degrade(&[0.1, f64::NAN]).is_err());
        assert!(m.degrade(&[f64::INFINITY]).is_err());
        assert!(m.degrade(&[0.1, 0.2, 0.3]).is_err());
        assert_eq!(m.lambda, 1.0);
    }

    #[test]
    fn random_models_are_degraded_copies() {
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..20 {
            let m = DegradableIsotropic::random(&mut rng);
            assert!(m.lambda0 >= 0.0 && m.lambda <= m.lambda0, "{m:?}");
            assert!(m.mu0 >= 0.0 && m.mu <= m.mu0, "{m:?}");
            // the degraded moduli come back from degrade() on the undamaged copy
            let eta = [1.0 - m.lambda / m.lambda0, 1.0 - m.mu / m.mu0];
            let mut again = DegradableIsotropic::new(m.lambda0, m.mu0);
            again.degrade(&eta).unwrap();
            assert!((again.lambda - m.lambda).abs() < 1e-12);
            assert!((again.mu - m.mu).abs() < 1e-12);
        }
    }

    #[test]
    fn derivatives_are_consistent() {
        let mut rng = StdRng::seed_from_u64(31);
        let (e1, e2) = derivative_test::<2, _, _>(&mut rng, 10, |r| DegradableIsotropic::random(r));
        assert!(e1 < 1e-6 && e2 < 1e-6, "degradable errors {e1} {e2}");
    }
}
