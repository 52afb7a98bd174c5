//! Newton iteration for nonlinear elasticity on top of nodal multigrid.
//!
//! # Algorithm
//!
//! For `nriters` iterations:
//!
//! 1. Evaluate `∇u` at every node and linearize the model there, giving the
//!    stress `DW` and stiffness `DDW`
//! 2. Bind the stiffness to the operator and assemble `b − A(u)`: boundary
//!    rows from the boundary conditions, interior rows from the discrete
//!    divergence of `DW`
//! 3. Solve `A' Δu = b − A(u)` with multigrid
//! 4. `u += Δu`, reporting `‖Δu‖∞ / ‖u‖∞`
//!
//! The interior residual is
//!
//! ```text
//! DDW(m) ⋮ ∇∇u + Σ_j (DW_{m+e_j}(∇u_m) − DW_{m−e_j}(∇u_m)) / (2Δx_j)
//! ```
//!
//! whose derivative for a linear model is exactly the operator, so linear
//! problems converge in a single iteration.

use crate::bc::Location;
use crate::error::{Result, SolverError};
use crate::field::{FabArray, MultiFab};
use crate::grid::{NodeKind, shifted};
use crate::multigrid::{Multigrid, MultigridConfig, NodalOperator, SolveInfo, sync_levels};
use crate::operator::{ElasticOperator, level_gradient};
use crate::stencil;
use amrel_model::{Matrix, Solid, Stiffness, Vector};
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Newton and linear-solve controls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonConfig {
    /// Newton iterations to run
    pub nriters: usize,
    /// Relative tolerance of every linear solve
    pub tol_rel: f64,
    /// Absolute tolerance of every linear solve
    pub tol_abs: f64,
    pub verbose: u32,
    /// Fixed multigrid cycle count per linear solve
    pub fixed_iter: Option<usize>,
    /// Multigrid cycle limit per linear solve
    pub max_iter: usize,
    /// Stop once `‖Δu‖∞ / ‖u‖∞` drops below this
    pub nr_tolerance: Option<f64>,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            nriters: 1,
            tol_rel: 1e-8,
            tol_abs: 1e-8,
            verbose: 0,
            fixed_iter: None,
            max_iter: 200,
            nr_tolerance: None,
        }
    }
}

impl NewtonConfig {
    /// Multigrid settings for the inner solves.
    pub fn multigrid(&self) -> MultigridConfig {
        MultigridConfig {
            verbose: self.verbose.saturating_sub(1),
            max_iter: self.max_iter,
            fixed_iter: self.fixed_iter,
            ..MultigridConfig::default()
        }
    }
}

/// Per-iteration history of a Newton solve.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewtonResults {
    pub iterations: usize,
    pub relnorm_history: Vec<f64>,
    pub linear_solves: Vec<SolveInfo>,
    /// True when `nr_tolerance` ended the loop
    pub converged_early: bool,
}

impl NewtonResults {
    pub fn final_relnorm(&self) -> Option<f64> {
        self.relnorm_history.last().copied()
    }
}

struct Assembly<const D: usize> {
    rhs: MultiFab<D>,
    stiffness: FabArray<Stiffness<D>, D>,
}

fn non_finite<const D: usize>(field: &'static str, amrlev: usize, p: &[i64; D]) -> SolverError {
    SolverError::NonFinite {
        field,
        amrlev,
        mglev: 0,
        index: p.to_vec(),
        component: 0,
    }
}

/// Residual `b − A(u)` and stiffness at `u` on one level. `u` and `models`
/// must have their ghosts filled.
fn assemble<const D: usize, M: Solid<D> + Copy>(
    op: &ElasticOperator<D>,
    amrlev: usize,
    u: &MultiFab<D>,
    b: &MultiFab<D>,
    models: &FabArray<M, D>,
) -> Result<Assembly<D>> {
    let level = op.level(amrlev, 0);
    let dx = level.geom.cell_size();
    let mut rhs = MultiFab::like(u, D, 0, 0.0);
    let mut stiffness = FabArray::like(u, 1, 1, Stiffness::zero());
    rhs.fabs_mut()
        .par_iter_mut()
        .zip(stiffness.fabs_mut().par_iter_mut())
        .enumerate()
        .try_for_each(|(i, (rfab, cfab))| {
            let (ufab, bfab, mfab) = (u.fab(i), b.fab(i), models.fab(i));
            let valid = *rfab.valid_box();
            for p in valid.iter() {
                let gradu = level_gradient(level, ufab, &p, &dx);
                let lin = mfab.get(&p, 0).linearize(&gradu);
                if !lin.stiffness.is_finite() {
                    return Err(non_finite("stiffness", amrlev, &p));
                }
                if lin.stress.iter().any(|v| !v.is_finite()) {
                    return Err(non_finite("stress", amrlev, &p));
                }
                cfab.set(&p, 0, lin.stiffness);

                let value = if let Some(loc) = Location::of(&p, &level.geom) {
                    let row = op.bc().evaluate(&loc, &stencil::vector_at(ufab, &p), &gradu, &lin.stress);
                    stencil::vector_at(bfab, &p) - row
                } else if level.node_kind(&p) == NodeKind::CoarseFine {
                    Vector::<D>::zeros()
                } else {
                    let hess = stencil::hessian(ufab, &p, &dx);
                    let mut div = lin.stiffness.apply_gradient(&hess);
                    for j in 0..D {
                        let hi = mfab.get(&shifted(&p, j, 1), 0).stress(&gradu);
                        let lo = mfab.get(&shifted(&p, j, -1), 0).stress(&gradu);
                        let dsig = (hi - lo) / (2.0 * dx[j]);
                        for k in 0..D {
                            div[k] += dsig[(k, j)];
                        }
                    }
                    stencil::vector_at(bfab, &p) - div
                };
                for d in 0..D {
                    rfab.set(&p, d, value[d]);
                }
            }
            Ok(())
        })?;
    Ok(Assembly { rhs, stiffness })
}

fn max_norm<const D: usize>(fields: &[MultiFab<D>]) -> f64 {
    fields.iter().map(|f| f.norm0_all()).fold(0.0, f64::max)
}

pub struct Newton<'a, const D: usize> {
    op: &'a mut ElasticOperator<D>,
    config: NewtonConfig,
}

impl<'a, const D: usize> Newton<'a, D> {
    pub fn new(op: &'a mut ElasticOperator<D>, config: NewtonConfig) -> Self {
        Self { op, config }
    }

    pub fn config(&self) -> &NewtonConfig {
        &self.config
    }

    pub fn operator(&self) -> &ElasticOperator<D> {
        &*self.op
    }

    fn check_inputs<M: Solid<D> + Copy>(
        &self,
        u: &[MultiFab<D>],
        b: &[MultiFab<D>],
        models: &[FabArray<M, D>],
    ) -> Result<()> {
        let nlev = self.op.num_amr_levels();
        if u.len() != nlev || b.len() != nlev || models.len() != nlev {
            return Err(SolverError::LayoutMismatch(format!(
                "expected {nlev} levels, got {} displacements, {} right-hand sides, {} model fields",
                u.len(),
                b.len(),
                models.len()
            )));
        }
        for l in 0..nlev {
            let ba = &self.op.level(l, 0).ba;
            if u[l].box_array() != ba || b[l].box_array() != ba || models[l].box_array() != ba {
                return Err(SolverError::LayoutMismatch(format!("level {l} does not match the operator")));
            }
            if u[l].ngrow() < 1 || models[l].ngrow() < 1 || u[l].ncomp() != D || b[l].ncomp() != D {
                return Err(SolverError::LayoutMismatch(format!(
                    "level {l}: displacement and models need one ghost node, fields need {D} components"
                )));
            }
            u[l].check_finite("u", l, 0)?;
            b[l].check_finite("b", l, 0)?;
        }
        Ok(())
    }

    fn prepare<M: Solid<D> + Copy>(&self, u: &mut [MultiFab<D>], models: &mut [FabArray<M, D>]) {
        for (l, m) in models.iter_mut().enumerate() {
            m.fill_boundary(&self.op.level(l, 0).geom);
        }
        sync_levels(&*self.op, u);
    }

    /// Run the Newton loop, updating `u` in place.
    pub fn solve<M: Solid<D> + Copy>(
        &mut self,
        u: &mut [MultiFab<D>],
        b: &[MultiFab<D>],
        models: &mut [FabArray<M, D>],
    ) -> Result<NewtonResults> {
        self.check_inputs(u, b, models)?;
        self.prepare(u, models);
        let mg_config = self.config.multigrid();
        let nriters = self.config.nriters;
        let mut results = NewtonResults::default();

        for iter in 0..nriters {
            if self.config.verbose > 0 {
                info!("Newton iteration {} of {nriters}", iter + 1);
            }
            sync_levels(&*self.op, u);
            let mut rhs = Vec::with_capacity(u.len());
            for l in 0..u.len() {
                let Assembly { rhs: r, stiffness } = assemble(&*self.op, l, &u[l], &b[l], &models[l])?;
                self.op.set_stiffness(l, stiffness)?;
                rhs.push(r);
            }
            self.op.prepare_for_solve()?;

            let mut dsol: Vec<MultiFab<D>> = u.iter().map(|x| MultiFab::like(x, D, x.ngrow(), 0.0)).collect();
            let solve = Multigrid::new(&*self.op, mg_config.clone()).solve(
                &mut dsol,
                &rhs,
                self.config.tol_rel,
                self.config.tol_abs,
            )?;

            let cornorm = max_norm(&dsol);
            let solnorm = max_norm(u);
            let relnorm = if solnorm == 0.0 { cornorm } else { cornorm / solnorm };
            for (x, d) in u.iter_mut().zip(&dsol) {
                x.saxpy(1.0, d)?;
            }
            results.iterations += 1;
            results.relnorm_history.push(relnorm);
            results.linear_solves.push(solve);
            if self.config.verbose > 1 {
                info!("NR relative norm(ddisp) = {relnorm:.6e}");
            } else {
                debug!("NR relative norm(ddisp) = {relnorm:.6e}");
            }

            if let Some(tol) = self.config.nr_tolerance
                && relnorm < tol
            {
                results.converged_early = true;
                break;
            }
        }
        sync_levels(&*self.op, u);
        Ok(results)
    }

    /// Nonlinear residual `b − A(u)` on every level, interface rows zero.
    pub fn comp_residual<M: Solid<D> + Copy>(
        &self,
        u: &mut [MultiFab<D>],
        b: &[MultiFab<D>],
        models: &mut [FabArray<M, D>],
    ) -> Result<Vec<MultiFab<D>>> {
        self.check_inputs(u, b, models)?;
        self.prepare(u, models);
        (0..u.len())
            .map(|l| assemble(&*self.op, l, &u[l], &b[l], &models[l]).map(|a| a.rhs))
            .collect()
    }

    fn node_map<M: Solid<D> + Copy>(
        &self,
        amrlev: usize,
        u: &MultiFab<D>,
        models: &FabArray<M, D>,
        ncomp: usize,
        f: impl Fn(&M, &Matrix<D>) -> Vec<f64> + Sync,
    ) -> Result<MultiFab<D>> {
        let level = self.op.level(amrlev, 0);
        if u.box_array() != &level.ba || models.box_array() != &level.ba || u.ngrow() < 1 {
            return Err(SolverError::LayoutMismatch(format!(
                "fields on AMR level {amrlev} do not match the level layout"
            )));
        }
        u.check_finite("u", amrlev, 0)?;
        let mut u = u.clone();
        u.fill_boundary(&level.geom);
        let dx = level.geom.cell_size();
        let mut out = MultiFab::like(&u, ncomp, 0, 0.0);
        out.fabs_mut().par_iter_mut().enumerate().for_each(|(i, ofab)| {
            let (ufab, mfab) = (u.fab(i), models.fab(i));
            let valid = *ofab.valid_box();
            for p in valid.iter() {
                let gradu = level_gradient(level, ufab, &p, &dx);
                for (n, v) in f(&mfab.get(&p, 0), &gradu).into_iter().enumerate() {
                    ofab.set(&p, n, v);
                }
            }
        });
        Ok(out)
    }

    /// Strain energy density of the models at `u`.
    pub fn w<M: Solid<D> + Copy>(&self, amrlev: usize, u: &MultiFab<D>, models: &FabArray<M, D>) -> Result<MultiFab<D>> {
        self.node_map(amrlev, u, models, 1, |m, g| vec![m.energy(g)])
    }

    /// `∂W/∂(∇u)` of the models at `u`, row-major.
    pub fn dw<M: Solid<D> + Copy>(&self, amrlev: usize, u: &MultiFab<D>, models: &FabArray<M, D>) -> Result<MultiFab<D>> {
        self.node_map(amrlev, u, models, D * D, |m, g| {
            let s = m.stress(g);
            (0..D * D).map(|n| s[(n / D, n % D)]).collect()
        })
    }
}
