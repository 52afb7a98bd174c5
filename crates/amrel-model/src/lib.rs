//! Constitutive models for nodal AMR elasticity.
//!
//! Every model is a strain energy density `W` with first and second
//! derivatives `DW` and `DDW` (see [`Solid`]). The solver only ever sees the
//! closed [`Model`] enum, built from a [`ModelConfig`] read from JSON.
//!
//! ```
//! use amrel_model::{Matrix, Model, ModelConfig, Solid};
//!
//! let cfg: ModelConfig = serde_json::from_str(r#"{"type": "isotropic", "shear": 1.0, "lame": 2.0}"#)?;
//! let model: Model<2> = cfg.build()?;
//! let sigma = model.stress(&Matrix::<2>::identity());
//! assert_eq!(sigma[(0, 0)], 6.0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cubic;
pub mod degradable;
pub mod error;
pub mod isotropic;
pub mod kinematics;
pub mod laplacian;
pub mod model;
pub mod solid;
pub mod tensor;

pub use cubic::{AffineCubic, LinearCubic, bunge_rotation};
pub use degradable::DegradableIsotropic;
pub use error::{ModelError, Result};
pub use isotropic::{AffineIsotropic, LinearIsotropic, lame_from_youngs};
pub use kinematics::KinematicVariable;
pub use laplacian::Laplacian;
pub use model::{CubicConfig, DegradableConfig, IsotropicConfig, Model, ModelConfig};
pub use solid::{Linearization, Solid};
pub use tensor::{Matrix, Matrix3, Stiffness, Symmetry, Vector};
