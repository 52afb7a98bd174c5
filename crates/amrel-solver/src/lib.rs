//! Nodal AMR elasticity: grids, fields, boundary conditions, the elastic
//! operator, composite multigrid and a Newton driver.
//!
//! Unknowns live on nodes. Level `l + 1` refines level `l` by a factor of
//! two, so coarse node `c` coincides with fine node `2c`. A typical solve:
//!
//! 1. Build an [`AmrHierarchy`] and an [`ElasticOperator`] over it
//! 2. Set boundary conditions with [`ElasticOperator::set_bc`]
//! 3. Write the boundary targets into the right-hand side with
//!    [`ElasticOperator::init_rhs`]
//! 4. Run [`Newton::solve`] with a model field per level

pub mod bc;
pub mod blend;
pub mod config;
pub mod error;
pub mod field;
pub mod grid;
pub mod interpolator;
pub mod multigrid;
pub mod newton;
pub mod operator;
pub mod stencil;
pub mod transfer;

pub use bc::{BcType, ElasticBc, Location, Side};
pub use blend::blend_models;
pub use config::{BcConfig, load_json, save_json};
pub use error::{Result, SolverError};
pub use field::{BaseFab, FabArray, MultiFab};
pub use grid::{AmrHierarchy, BoxArray, DistributionMapping, Geometry, IntVect, Level, NodeBox, NodeKind};
pub use interpolator::LinearInterpolator;
pub use multigrid::{Multigrid, MultigridConfig, NodalOperator, SolveInfo, sync_levels};
pub use newton::{Newton, NewtonConfig, NewtonResults};
pub use operator::{ElasticOperator, OperatorInfo};
pub use stencil::StencilType;
