//! Problem files for `amrel-cli solve`.
//!
//! ```json
//! {
//!   "dim": 2,
//!   "ncells": [32, 32],
//!   "refine": [{"lo": [16, 16], "hi": [48, 48]}],
//!   "matrix": {"type": "affine_isotropic", "shear": 1.0, "lame": 1.0},
//!   "inclusion": {
//!     "model": {"type": "affine_isotropic", "shear": 3.0, "lame": 3.0, "F0": [0.001, 0, 0, 0.001]},
//!     "center": [0.5, 0.5], "radius": [0.2, 0.1], "eps": 0.02
//!   },
//!   "bc": {"type": {"xlo": ["disp", "disp"], "xhi": ["trac", "trac"]}},
//!   "newton": {"nriters": 2, "nr_tolerance": 1e-8}
//! }
//! ```

use amrel_model::{Model, ModelConfig};
use amrel_solver::{
    AmrHierarchy, BcConfig, ElasticBc, ElasticOperator, FabArray, Geometry, MultiFab, NewtonConfig,
    Newton, NodalOperator, NodeBox, OperatorInfo, Result, SolverError, blend_models, load_json,
};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A refined patch in the node indices of the level it creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefineConfig {
    pub lo: Vec<i64>,
    pub hi: Vec<i64>,
}

/// Ellipsoidal inclusion with a `tanh` transition of width `eps`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InclusionConfig {
    pub model: ModelConfig,
    pub center: Vec<f64>,
    pub radius: Vec<f64>,
    #[serde(default = "default_eps")]
    pub eps: f64,
}

fn default_eps() -> f64 {
    0.01
}

impl InclusionConfig {
    /// Inclusion fraction at `x`: 1 inside, 0 outside.
    pub fn indicator(&self, x: &[f64]) -> f64 {
        let r = x
            .iter()
            .zip(&self.center)
            .zip(&self.radius)
            .map(|((x, c), r)| ((x - c) / r).powi(2))
            .sum::<f64>()
            .sqrt();
        0.5 * (1.0 - ((r - 1.0) / self.eps).tanh())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProblemConfig {
    pub dim: usize,
    pub ncells: Vec<usize>,
    pub prob_lo: Vec<f64>,
    pub prob_hi: Vec<f64>,
    pub periodic: Vec<bool>,
    pub max_grid_size: usize,
    pub refine: Vec<RefineConfig>,
    pub matrix: ModelConfig,
    /// Blended into `matrix`; both must be the same model family
    pub inclusion: Option<InclusionConfig>,
    pub bc: BcConfig,
    /// Body force `f` in `div σ + f = 0`
    pub body_force: Vec<f64>,
    /// Time at which boundary values are evaluated
    pub time: f64,
    pub newton: NewtonConfig,
}

impl Default for ProblemConfig {
    fn default() -> Self {
        Self {
            dim: 2,
            ncells: vec![32, 32],
            prob_lo: vec![0.0, 0.0],
            prob_hi: vec![1.0, 1.0],
            periodic: vec![false, false],
            max_grid_size: 32,
            refine: Vec::new(),
            matrix: ModelConfig::default(),
            inclusion: None,
            bc: BcConfig::default(),
            body_force: Vec::new(),
            time: 0.0,
            newton: NewtonConfig::default(),
        }
    }
}

/// Outcome of one solve, printed as text or JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub dim: usize,
    pub levels: usize,
    pub nodes: usize,
    pub newton_iterations: usize,
    pub relnorm_history: Vec<f64>,
    pub multigrid_iterations: Vec<usize>,
    pub converged_early: bool,
    pub final_residual: f64,
    pub total_energy: f64,
    pub max_displacement: f64,
}

fn array<T: Copy, const D: usize>(values: &[T], what: &str) -> Result<[T; D]> {
    <[T; D]>::try_from(values)
        .map_err(|_| SolverError::Config(format!("{what} needs {D} entries, got {}", values.len())))
}

/// Trapezoidal weight of node `p` times the cell volume.
fn quadrature_weight<const D: usize>(geom: &Geometry<D>, p: &[i64; D]) -> f64 {
    let dx = geom.cell_size();
    let domain = geom.domain();
    (0..D)
        .map(|d| {
            let half = p[d] == domain.lo[d] || p[d] == domain.hi[d];
            if half { 0.5 * dx[d] } else { dx[d] }
        })
        .product()
}

impl ProblemConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        load_json(path)
    }

    pub fn geometry<const D: usize>(&self) -> Result<Geometry<D>> {
        Geometry::new(
            array(&self.ncells, "ncells")?,
            array(&self.prob_lo, "prob_lo")?,
            array(&self.prob_hi, "prob_hi")?,
            array(&self.periodic, "periodic")?,
        )
    }

    pub fn hierarchy<const D: usize>(&self, geom: Geometry<D>) -> Result<AmrHierarchy<D>> {
        let mut amr = AmrHierarchy::new(geom, self.max_grid_size)?;
        for region in &self.refine {
            amr.refine(NodeBox::new(array(&region.lo, "refine.lo")?, array(&region.hi, "refine.hi")?))?;
        }
        Ok(amr)
    }

    fn body_force<const D: usize>(&self) -> Result<[f64; D]> {
        if self.body_force.is_empty() {
            Ok([0.0; D])
        } else {
            array(&self.body_force, "body_force")
        }
    }

    fn model_field<const D: usize>(&self, op: &ElasticOperator<D>, amrlev: usize) -> Result<FabArray<Model<D>, D>> {
        let level = op.level(amrlev, 0);
        let matrix: Model<D> = self.matrix.build()?;
        let Some(inclusion) = &self.inclusion else {
            let mut field = FabArray::new(&level.ba, &level.dm, 1, 1, matrix);
            field.fill_boundary(&level.geom);
            return Ok(field);
        };
        if inclusion.center.len() != D || inclusion.radius.len() != D {
            return Err(SolverError::Config(format!("inclusion center and radius need {D} entries")));
        }
        let particle: Model<D> = inclusion.model.build()?;
        let mut eta = MultiFab::new(&level.ba, &level.dm, 1, 1, 0.0);
        let geom = &level.geom;
        eta.fill_valid(|p, _| inclusion.indicator(&geom.node_position(p)));
        blend_models(&[matrix, particle], &eta, geom)
    }

    /// Build and solve the problem in `D` dimensions.
    pub fn run<const D: usize>(&self) -> Result<Report> {
        let geom = self.geometry::<D>()?;
        let amr = self.hierarchy(geom.clone())?;
        let mut op = ElasticOperator::new(&amr, OperatorInfo::default())?;
        op.set_bc(ElasticBc::from_config(&self.bc, geom.periodic())?)?;
        op.set_time(self.time);

        let force = self.body_force::<D>()?;
        let mut u = Vec::with_capacity(amr.num_levels());
        let mut b = Vec::with_capacity(amr.num_levels());
        let mut models = Vec::with_capacity(amr.num_levels());
        for l in 0..amr.num_levels() {
            let level = op.level(l, 0);
            u.push(MultiFab::new(&level.ba, &level.dm, D, 1, 0.0));
            let mut rhs = MultiFab::new(&level.ba, &level.dm, D, 1, 0.0);
            rhs.fill_valid(|_, comp| -force[comp]);
            op.init_rhs(l, &mut rhs)?;
            b.push(rhs);
            models.push(self.model_field(&op, l)?);
            debug!("level {l}: {} boxes, {} nodes", level.ba.len(), level.ba.num_points());
        }

        let mut newton = Newton::new(&mut op, self.newton.clone());
        let results = newton.solve(&mut u, &b, &mut models)?;
        let residual = newton
            .comp_residual(&mut u, &b, &mut models)?
            .iter()
            .map(|r| r.norm0_all())
            .fold(0.0, f64::max);

        let w = newton.w(0, &u[0], &models[0])?;
        let mut total_energy = 0.0;
        for fab in w.fabs() {
            for p in fab.valid_box().iter() {
                total_energy += fab.get(&p, 0) * quadrature_weight(&geom, &p);
            }
        }
        let max_displacement = u.iter().map(|x| x.norm0_all()).fold(0.0, f64::max);
        info!("solved in {} Newton iterations, residual {residual:.3e}", results.iterations);

        Ok(Report {
            dim: D,
            levels: amr.num_levels(),
            nodes: amr.levels().iter().map(|l| l.ba.num_points()).sum(),
            newton_iterations: results.iterations,
            relnorm_history: results.relnorm_history.clone(),
            multigrid_iterations: results.linear_solves.iter().map(|s| s.iterations).collect(),
            converged_early: results.converged_early,
            final_residual: residual,
            total_energy,
            max_displacement,
        })
    }

    /// Dispatch on `dim`.
    pub fn solve(&self) -> Result<Report> {
        match self.dim {
            2 => self.run::<2>(),
            3 => self.run::<3>(),
            d => Err(SolverError::Config(format!("dim must be 2 or 3, got {d}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn stretched_bar() -> ProblemConfig {
        serde_json::from_str(
            r#"{"ncells": [8, 8], "periodic": [false, true],
                "matrix": {"type": "isotropic", "shear": 1.0, "lame": 1.0},
                "bc": {"type": {"xlo": ["disp", "disp"], "xhi": ["disp", "disp"]},
                       "val": {"xhi": [0.1, 0.0]}},
                "newton": {"tol_rel": 1e-12, "tol_abs": 1e-10, "max_iter": 500}}"#,
        )
        .unwrap()
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let cfg: ProblemConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, ProblemConfig::default());
        assert_eq!(cfg.newton.nriters, 1);
    }

    #[test]
    fn stretched_bar_energy() {
        let report = stretched_bar().solve().unwrap();
        assert_eq!(report.dim, 2);
        assert_eq!(report.levels, 1);
        assert_eq!(report.nodes, 81);
        assert_eq!(report.newton_iterations, 1);
        assert!(report.final_residual < 1e-8);
        assert_relative_eq!(report.max_displacement, 0.1, epsilon = 1e-8);
        // W = (λ/2 + μ) ε_xx² over the unit square
        assert_relative_eq!(report.total_energy, 1.5 * 0.01, epsilon = 1e-8);
    }

    #[test]
    fn inclusion_indicator_is_one_inside() {
        let inc = InclusionConfig {
            model: ModelConfig::default(),
            center: vec![0.5, 0.5],
            radius: vec![0.2, 0.1],
            eps: 0.01,
        };
        assert_relative_eq!(inc.indicator(&[0.5, 0.5]), 1.0, epsilon = 1e-12);
        assert_relative_eq!(inc.indicator(&[0.7, 0.5]), 0.5, epsilon = 1e-12);
        assert!(inc.indicator(&[0.5, 0.9]) < 1e-12);
    }

    #[test]
    fn bad_dimensions_are_config_errors() {
        let cfg = ProblemConfig {
            dim: 4,
            ..ProblemConfig::default()
        };
        assert!(matches!(cfg.solve(), Err(SolverError::Config(_))));
        let cfg = ProblemConfig {
            dim: 3,
            ..ProblemConfig::default()
        };
        assert!(matches!(cfg.solve(), Err(SolverError::Config(_))));
    }

    #[test]
    fn geometry_needs_one_entry_per_axis() {
        let cfg = ProblemConfig {
            ncells: vec![4, 4],
            ..ProblemConfig::default()
        };
        assert_eq!(cfg.geometry::<2>().unwrap().ncells(1), 4);
        assert!(matches!(cfg.geometry::<3>(), Err(SolverError::Config(_))));
    }
}
