//! The closed set of model families the solver dispatches on per node.
//!
//! [`Model`] is a tagged variant over every family in this crate. Models of
//! the same family can be added, subtracted and scaled; [`Model::combine`]
//! blends several models by phase fraction (diffuse interfaces).
//!
//! [`ModelConfig`] is the serde front end: it accepts either
//! `shear`/`lame` or `E`/`nu`, plus an optional `F0` eigenstrain given
//! row-major.

use crate::cubic::{AffineCubic, LinearCubic, bunge_rotation};
use crate::degradable::DegradableIsotropic;
use crate::error::{ModelError, Result};
use crate::isotropic::{AffineIsotropic, LinearIsotropic, lame_from_youngs};
use crate::kinematics::KinematicVariable;
use crate::laplacian::Laplacian;
use crate::solid::Solid;
use crate::tensor::{Matrix, Stiffness, Symmetry};
use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Model<const D: usize> {
    IsotropicLinear(LinearIsotropic),
    IsotropicAffine(AffineIsotropic<D>),
    CubicLinear(LinearCubic<D>),
    CubicAffine(AffineCubic<D>),
    DegradableIsotropic(DegradableIsotropic),
    Laplacian(Laplacian),
}

macro_rules! dispatch {
    ($self:expr, $m:ident => $body:expr) => {
        match $self {
            Model::IsotropicLinear($m) => $body,
            Model::IsotropicAffine($m) => $body,
            Model::CubicLinear($m) => $body,
            Model::CubicAffine($m) => $body,
            Model::DegradableIsotropic($m) => $body,
            Model::Laplacian($m) => $body,
        }
    };
}

impl<const D: usize> Solid<D> for Model<D> {
    fn name(&self) -> &'static str {
        dispatch!(self, m => Solid::<D>::name(m))
    }

    fn kinematic_variable(&self) -> KinematicVariable {
        dispatch!(self, m => Solid::<D>::kinematic_variable(m))
    }

    fn symmetry(&self) -> Symmetry {
        dispatch!(self, m => Solid::<D>::symmetry(m))
    }

    #[inline]
    fn w(&self, x: &Matrix<D>) -> f64 {
        dispatch!(self, m => Solid::<D>::w(m, x))
    }

    #[inline]
    fn dw(&self, x: &Matrix<D>) -> Matrix<D> {
        dispatch!(self, m => Solid::<D>::dw(m, x))
    }

    #[inline]
    fn ddw(&self, x: &Matrix<D>) -> Stiffness<D> {
        dispatch!(self, m => Solid::<D>::ddw(m, x))
    }
}

/// `Σ w_n m_n / Σ w_n` for one family; `models` must be nonempty.
fn weighted<T>(models: &[T], weights: &[f64], total: f64) -> T
where
    T: Copy + Add<Output = T> + Mul<f64, Output = T>,
{
    let first = models[0] * (weights[0] / total);
    models[1..]
        .iter()
        .zip(&weights[1..])
        .fold(first, |acc, (m, w)| acc + *m * (*w / total))
}

impl<const D: usize> Model<D> {
    fn family_mismatch(&self, other: &Self) -> ModelError {
        ModelError::Combine(format!(
            "model families differ ({} vs {})",
            Solid::<D>::name(self),
            Solid::<D>::name(other)
        ))
    }

    /// Weighted average of models of one family, normalized by the sum of weights.
    pub fn combine(models: &[Self], weights: &[f64]) -> Result<Self> {
        if models.is_empty() {
            return Err(ModelError::Combine("no models given".to_string()));
        }
        if models.len() != weights.len() {
            return Err(ModelError::Combine(format!(
                "{} models but {} weights",
                models.len(),
                weights.len()
            )));
        }
        let total: f64 = weights.iter().sum();
        if !total.is_finite() || total == 0.0 {
            return Err(ModelError::Combine(format!(
                "sum of weights must be finite and nonzero, got {total}"
            )));
        }

        macro_rules! blend {
            ($variant:ident) => {{
                let family = models
                    .iter()
                    .map(|m| match m {
                        Model::$variant(inner) => Ok(*inner),
                        other => Err(models[0].family_mismatch(other)),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Model::$variant(weighted(&family, weights, total))
            }};
        }

        Ok(match models[0] {
            Model::IsotropicLinear(_) => blend!(IsotropicLinear),
            Model::IsotropicAffine(_) => blend!(IsotropicAffine),
            Model::CubicLinear(_) => blend!(CubicLinear),
            Model::CubicAffine(_) => blend!(CubicAffine),
            Model::DegradableIsotropic(_) => blend!(DegradableIsotropic),
            Model::Laplacian(_) => blend!(Laplacian),
        })
    }

    /// `self + other` for models of the same family.
    pub fn checked_add(&self, other: &Self) -> Result<Self> {
        Self::combine(&[*self, *other], &[1.0, 1.0]).map(|m| m * 2.0)
    }

    /// `self - other` for models of the same family.
    pub fn checked_sub(&self, other: &Self) -> Result<Self> {
        self.checked_add(&(*other * -1.0))
    }

    /// Eigenstrain offset, zero for purely linear families.
    pub fn f0(&self) -> Matrix<D> {
        match self {
            Model::IsotropicAffine(m) => m.f0,
            Model::CubicAffine(m) => m.f0,
            _ => Matrix::<D>::zeros(),
        }
    }

    /// Stiffness at the undeformed state, w.r.t. `∇u`.
    pub fn reference_stiffness(&self) -> Stiffness<D> {
        self.linearize(&Matrix::<D>::zeros()).stiffness
    }
}

impl<const D: usize> Mul<f64> for Model<D> {
    type Output = Self;
    fn mul(self, alpha: f64) -> Self {
        match self {
            Model::IsotropicLinear(m) => Model::IsotropicLinear(m * alpha),
            Model::IsotropicAffine(m) => Model::IsotropicAffine(m * alpha),
            Model::CubicLinear(m) => Model::CubicLinear(m * alpha),
            Model::CubicAffine(m) => Model::CubicAffine(m * alpha),
            Model::DegradableIsotropic(m) => Model::DegradableIsotropic(m * alpha),
            Model::Laplacian(m) => Model::Laplacian(m * alpha),
        }
    }
}

impl<const D: usize> Div<f64> for Model<D> {
    type Output = Self;
    fn div(self, alpha: f64) -> Self {
        self * (1.0 / alpha)
    }
}

/// Elastic constants given either as `shear`/`lame` or as `E`/`nu`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IsotropicConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shear: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lame: Option<f64>,
    #[serde(rename = "E", default, skip_serializing_if = "Option::is_none")]
    pub youngs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nu: Option<f64>,
    /// Row-major eigenstrain, `D*D` entries
    #[serde(rename = "F0", default, skip_serializing_if = "Option::is_none")]
    pub f0: Option<Vec<f64>>,
}

impl IsotropicConfig {
    /// `(λ, μ)` from whichever pair is present.
    pub fn lame_pair(&self) -> Result<(f64, f64)> {
        match (self.lame, self.shear, self.youngs, self.nu) {
            (Some(lambda), Some(mu), _, _) => Ok((lambda, mu)),
            (_, _, Some(e), Some(nu)) => lame_from_youngs(e, nu),
            _ => Err(ModelError::InvalidParameter(
                "expected either (shear, lame) or (E, nu)".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CubicConfig {
    #[serde(rename = "C11")]
    pub c11: f64,
    #[serde(rename = "C12")]
    pub c12: f64,
    #[serde(rename = "C44")]
    pub c44: f64,
    /// Bunge Euler angles in radians
    #[serde(default)]
    pub phi1: f64,
    #[serde(rename = "Phi", default)]
    pub phi: f64,
    #[serde(default)]
    pub phi2: f64,
    #[serde(rename = "F0", default, skip_serializing_if = "Option::is_none")]
    pub f0: Option<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradableConfig {
    #[serde(flatten)]
    pub elastic: IsotropicConfig,
    #[serde(default)]
    pub eta: Vec<f64>,
}

/// Model selection as it appears in configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelConfig {
    Isotropic(IsotropicConfig),
    AffineIsotropic(IsotropicConfig),
    Cubic(CubicConfig),
    AffineCubic(CubicConfig),
    Degradable(DegradableConfig),
    Laplacian {
        #[serde(default = "default_alpha")]
        alpha: f64,
    },
}

fn default_alpha() -> f64 {
    1.0
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig::Isotropic(IsotropicConfig {
            shear: Some(1.0),
            lame: Some(1.0),
            ..IsotropicConfig::default()
        })
    }
}

fn parse_f0<const D: usize>(f0: &Option<Vec<f64>>) -> Result<Matrix<D>> {
    match f0 {
        None => Ok(Matrix::<D>::zeros()),
        Some(values) if values.len() == D * D => Ok(Matrix::<D>::from_row_slice(values)),
        Some(values) => Err(ModelError::InvalidParameter(format!(
            "F0 expects {} entries, got {}",
            D * D,
            values.len()
        ))),
    }
}

impl ModelConfig {
    pub fn build<const D: usize>(&self) -> Result<Model<D>> {
        match self {
            ModelConfig::Isotropic(cfg) => {
                let (lambda, mu) = cfg.lame_pair()?;
                if cfg.f0.is_some() {
                    Ok(Model::IsotropicAffine(AffineIsotropic::new(
                        lambda,
                        mu,
                        parse_f0::<D>(&cfg.f0)?,
                    )))
                } else {
                    Ok(Model::IsotropicLinear(LinearIsotropic::new(lambda, mu)))
                }
            }
            ModelConfig::AffineIsotropic(cfg) => {
                let (lambda, mu) = cfg.lame_pair()?;
                Ok(Model::IsotropicAffine(AffineIsotropic::new(
                    lambda,
                    mu,
                    parse_f0::<D>(&cfg.f0)?,
                )))
            }
            ModelConfig::Cubic(cfg) | ModelConfig::AffineCubic(cfg) => {
                let rotation = bunge_rotation::<D>(cfg.phi1, cfg.phi, cfg.phi2)?;
                let base = LinearCubic::new(cfg.c11, cfg.c12, cfg.c44, &rotation);
                if matches!(self, ModelConfig::AffineCubic(_)) || cfg.f0.is_some() {
                    Ok(Model::CubicAffine(AffineCubic::new(base, parse_f0::<D>(&cfg.f0)?)))
                } else {
                    Ok(Model::CubicLinear(base))
                }
            }
            ModelConfig::Degradable(cfg) => {
                if cfg.elastic.f0.is_some() {
                    return Err(ModelError::InvalidParameter(
                        "F0 is not supported by the degradable model".to_string(),
                    ));
                }
                let (lambda, mu) = cfg.elastic.lame_pair()?;
                let mut model = DegradableIsotropic::new(lambda, mu);
                model.degrade(&cfg.eta)?;
                Ok(Model::DegradableIsotropic(model))
            }
            ModelConfig::Laplacian { alpha } => Ok(Model::Laplacian(Laplacian::new(*alpha))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solid::random_matrix;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn random_models(rng: &mut StdRng) -> Vec<Model<3>> {
        vec![
            Model::IsotropicLinear(LinearIsotropic::random(rng)),
            Model::IsotropicAffine(AffineIsotropic::random(rng)),
            Model::CubicLinear(LinearCubic::random(rng)),
            Model::CubicAffine(AffineCubic::random(rng)),
            Model::DegradableIsotropic(DegradableIsotropic::random(rng)),
        ]
    }

    #[test]
    fn blends_affine_isotropic_by_weight() {
        let f0a = Matrix::<2>::new(0.1, 0.0, 0.0, 0.2);
        let f0b = Matrix::<2>::new(-0.3, 0.05, 0.05, 0.4);
        let a = Model::IsotropicAffine(AffineIsotropic::new(1.0, 2.0, f0a));
        let b = Model::IsotropicAffine(AffineIsotropic::new(3.0, 5.0, f0b));
        let mix = Model::combine(&[a, b], &[0.3, 0.7]).unwrap();

        let expected = a.reference_stiffness() * 0.3 + b.reference_stiffness() * 0.7;
        let got = mix.reference_stiffness();
        for i in 0..2 {
            for j in 0..2 {
                for k in 0..2 {
                    for l in 0..2 {
                        assert_relative_eq!(got.get(i, j, k, l), expected.get(i, j, k, l), epsilon = 1e-12);
                    }
                }
            }
        }
        assert_relative_eq!(mix.f0(), f0a * 0.3 + f0b * 0.7, epsilon = 1e-12);
    }

    #[test]
    fn weights_are_normalized() {
        let a = Model::<2>::Laplacian(Laplacian::new(1.0));
        let b = Model::<2>::Laplacian(Laplacian::new(3.0));
        let mix = Model::combine(&[a, b], &[2.0, 2.0]).unwrap();
        assert_eq!(mix, Model::Laplacian(Laplacian::new(2.0)));
    }

    #[test]
    fn combine_rejects_mixed_families_and_bad_weights() {
        let a = Model::<2>::Laplacian(Laplacian::new(1.0));
        let b = Model::<2>::IsotropicLinear(LinearIsotropic::new(1.0, 1.0));
        assert!(Model::combine(&[a, b], &[0.5, 0.5]).is_err());
        assert!(Model::combine(&[a, a], &[0.5]).is_err());
        assert!(Model::combine(&[a, a], &[1.0, -1.0]).is_err());
        assert!(Model::<2>::combine(&[], &[]).is_err());
    }

    #[test]
    fn checked_algebra_matches_parameters() {
        let a = Model::<2>::IsotropicLinear(LinearIsotropic::new(1.0, 2.0));
        let b = Model::<2>::IsotropicLinear(LinearIsotropic::new(0.5, 0.25));
        let sum = a.checked_add(&b).unwrap();
        let diff = a.checked_sub(&b).unwrap();
        match (sum, diff) {
            (Model::IsotropicLinear(s), Model::IsotropicLinear(d)) => {
                assert_relative_eq!(s.lambda, 1.5, epsilon = 1e-14);
                assert_relative_eq!(s.mu, 2.25, epsilon = 1e-14);
                assert_relative_eq!(d.lambda, 0.5, epsilon = 1e-14);
                assert_relative_eq!(d.mu, 1.75, epsilon = 1e-14);
            }
            other => panic!("unexpected families {other:?}"),
        }
        assert!(a.checked_add(&Model::Laplacian(Laplacian::new(1.0))).is_err());
    }

    #[test]
    fn minor_symmetry_of_stress() {
        let mut rng = StdRng::seed_from_u64(51);
        for _ in 0..20 {
            for model in random_models(&mut rng) {
                if !model.symmetry().has_minor() {
                    continue;
                }
                let eps1: Matrix<3> = random_matrix(&mut rng);
                let eps2 = eps1.transpose();
                let sig1 = model.ddw(&eps1).apply(&eps1);
                let sig2 = model.ddw(&eps2).apply(&eps2);
                let rel = (sig1 - sig2).norm() / (0.5 * sig1.norm() + 0.5 * sig2.norm());
                assert!(rel < 1e-8, "{} fails stress(eps) = stress(epsT): {rel}", model.name());
                let rel = (sig1 - sig1.transpose()).norm() / sig1.norm();
                assert!(rel < 1e-8, "{} stress is not symmetric: {rel}", model.name());
            }
        }
    }

    #[test]
    fn major_symmetry_energy_reciprocity() {
        let mut rng = StdRng::seed_from_u64(52);
        for _ in 0..20 {
            for model in random_models(&mut rng) {
                let eps1: Matrix<3> = random_matrix(&mut rng);
                let eps2: Matrix<3> = random_matrix(&mut rng);
                let c = model.ddw(&eps1);
                let e1 = eps1.dot(&c.apply(&eps2));
                let e2 = eps2.dot(&c.apply(&eps1));
                let rel = (e1 - e2).abs() / (e1.abs() + e2.abs()).max(1.0);
                assert!(rel < 1e-8, "{} violates major symmetry: {rel}", model.name());
            }
        }
    }

    #[test]
    fn builds_from_json() {
        let cfg: ModelConfig =
            serde_json::from_str(r#"{"type": "isotropic", "E": 1.0, "nu": 0.25}"#).unwrap();
        let model = cfg.build::<2>().unwrap();
        match model {
            Model::IsotropicLinear(m) => {
                assert_relative_eq!(m.lambda, 0.4, epsilon = 1e-12);
                assert_relative_eq!(m.mu, 0.4, epsilon = 1e-12);
            }
            other => panic!("unexpected model {other:?}"),
        }

        let cfg: ModelConfig = serde_json::from_str(
            r#"{"type": "isotropic", "shear": 1.0, "lame": 2.0, "F0": [0.01, 0.0, 0.0, 0.01]}"#,
        )
        .unwrap();
        assert!(matches!(cfg.build::<2>().unwrap(), Model::IsotropicAffine(_)));
        assert!(cfg.build::<3>().is_err(), "F0 with 4 entries is not a 3x3 matrix");

        let cfg: ModelConfig = serde_json::from_str(
            r#"{"type": "degradable", "shear": 1.0, "lame": 1.0, "eta": [1.2]}"#,
        )
        .unwrap();
        assert!(cfg.build::<2>().is_err());

        let cfg: ModelConfig =
            serde_json::from_str(r#"{"type": "cubic", "C11": 3.0, "C12": 1.0, "C44": 1.0, "phi1": 0.3}"#)
                .unwrap();
        assert!(matches!(cfg.build::<2>().unwrap(), Model::CubicLinear(_)));
    }
}
