//! Kinematic variable conventions.
//!
//! Models declare which strain-like tensor their `W`/`DW`/`DDW` expect. The
//! solver always works with the displacement gradient, so this module maps
//! `∇u` to the model's input and pulls derivatives back to `∇u`.

use crate::tensor::{Matrix, Stiffness};
use serde::{Deserialize, Serialize};

/// Input convention of a constitutive model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KinematicVariable {
    /// Displacement gradient `∇u`
    Gradu,
    /// Small strain `(∇u + ∇uᵀ) / 2`
    Epsilon,
    /// Deformation gradient `∇u + I`
    F,
}

impl KinematicVariable {
    /// Map a displacement gradient to this variable.
    pub fn from_gradu<const D: usize>(self, gradu: &Matrix<D>) -> Matrix<D> {
        match self {
            KinematicVariable::Gradu => *gradu,
            KinematicVariable::Epsilon => (gradu + gradu.transpose()) * 0.5,
            KinematicVariable::F => gradu + Matrix::<D>::identity(),
        }
    }

    /// Pull `DW` (taken with respect to this variable) back to `∂W/∂(∇u)`.
    pub fn stress_wrt_gradu<const D: usize>(self, dw: Matrix<D>) -> Matrix<D> {
        match self {
            KinematicVariable::Epsilon => (dw + dw.transpose()) * 0.5,
            KinematicVariable::Gradu | KinematicVariable::F => dw,
        }
    }

    /// Pull `DDW` back to `∂²W/∂(∇u)²`.
    pub fn stiffness_wrt_gradu<const D: usize>(self, ddw: Stiffness<D>) -> Stiffness<D> {
        match self {
            KinematicVariable::Epsilon => ddw.minor_symmetrized(),
            KinematicVariable::Gradu | KinematicVariable::F => ddw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_gradient_to_each_variable() {
        let g = Matrix::<2>::new(1.0, 2.0, 0.0, 3.0);
        assert_eq!(KinematicVariable::Gradu.from_gradu(&g), g);
        assert_eq!(
            KinematicVariable::Epsilon.from_gradu(&g),
            Matrix::<2>::new(1.0, 1.0, 1.0, 3.0)
        );
        assert_eq!(
            KinematicVariable::F.from_gradu(&g),
            Matrix::<2>::new(2.0, 2.0, 0.0, 4.0)
        );
    }

    #[test]
    fn epsilon_stress_is_symmetrized() {
        let dw = Matrix::<2>::new(1.0, 4.0, 0.0, 2.0);
        let s = KinematicVariable::Epsilon.stress_wrt_gradu(dw);
        assert_eq!(s, s.transpose());
        assert_eq!(s[(0, 1)], 2.0);
    }

    #[test]
    fn parses_lowercase_names() {
        let kv: KinematicVariable = serde_json::from_str("\"epsilon\"").unwrap();
        assert_eq!(kv, KinematicVariable::Epsilon);
        let kv: KinematicVariable = serde_json::from_str("\"f\"").unwrap();
        assert_eq!(kv, KinematicVariable::F);
    }
}
