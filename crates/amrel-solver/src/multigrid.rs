//! Geometric multigrid for nodal operators on an AMR hierarchy.
//!
//! # Algorithm
//!
//! Every cycle works on the correction equation `A e = r` of the composite
//! system:
//!
//! 1. Down sweep over refined levels: smooth the fine correction, then move
//!    what is left of the fine residual onto the coarse nodes it covers
//! 2. V-cycle on AMR level 0 through its multigrid levels, with a dense LU
//!    solve (or extra smoothing) on the coarsest one
//! 3. Up sweep: interpolate the coarse correction into each refined level
//!    and post-smooth with the coarse-fine interface held
//! 4. Add the corrections and inject fine solutions into covered coarse nodes
//!
//! Smoothing is damped Jacobi; identity rows take the full update.
//!
//! # Convergence
//!
//! The cycle stops once `‖r‖∞ ≤ max(tol_rel·‖r₀‖∞, tol_abs)` over the
//! composite residual, or after `max_iter` cycles.

use crate::error::{Result, SolverError};
use crate::field::MultiFab;
use crate::grid::{AmrHierarchy, IntVect, Level, NodeKind};
use crate::transfer::{self, BoundaryRule};
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector, Dyn, LU};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// What multigrid needs from a discrete operator.
pub trait NodalOperator<const D: usize>: Sync {
    fn num_amr_levels(&self) -> usize;

    fn num_mg_levels(&self, amrlev: usize) -> usize;

    fn level(&self, amrlev: usize, mglev: usize) -> &Level<D>;

    /// `f = A u` on valid nodes. Ghosts of `u` must already be filled.
    fn fapply(&self, amrlev: usize, mglev: usize, f: &mut MultiFab<D>, u: &MultiFab<D>) -> Result<()>;

    fn diagonal(&self, amrlev: usize, mglev: usize, diag: &mut MultiFab<D>) -> Result<()>;

    /// Rows of the form `u(p) = b(p)`.
    fn is_identity_row(&self, amrlev: usize, mglev: usize, p: &IntVect<D>, comp: usize) -> bool;

    /// Correct the coarse residual under AMR level `crse_amrlev + 1` from the
    /// fine residual and the solutions on both sides of the interface.
    fn reflux(
        &self,
        crse_amrlev: usize,
        crse_res: &mut MultiFab<D>,
        crse_sol: &MultiFab<D>,
        crse_rhs: &MultiFab<D>,
        fine_res: &MultiFab<D>,
        fine_sol: &MultiFab<D>,
    ) -> Result<()>;
}

/// Multigrid controls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultigridConfig {
    /// 0 is silent, 1 prints a summary, 2 prints every cycle
    pub verbose: u32,
    pub max_iter: usize,
    /// Run exactly this many cycles regardless of the tolerances
    pub fixed_iter: Option<usize>,
    pub pre_smooth: usize,
    pub post_smooth: usize,
    /// Jacobi damping on rows that are not identity rows
    pub omega: f64,
    /// Largest coarsest-level system handed to the dense LU
    pub bottom_max_unknowns: usize,
    /// Jacobi sweeps on the coarsest level when the LU is not used
    pub bottom_smooth: usize,
}

impl Default for MultigridConfig {
    fn default() -> Self {
        Self {
            verbose: 0,
            max_iter: 200,
            fixed_iter: None,
            pre_smooth: 2,
            post_smooth: 2,
            omega: 2.0 / 3.0,
            bottom_max_unknowns: 1024,
            bottom_smooth: 50,
        }
    }
}

/// Outcome of [`Multigrid::solve`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveInfo {
    pub iterations: usize,
    pub initial_residual: f64,
    pub final_residual: f64,
    pub converged: bool,
}

struct Workspace<const D: usize> {
    diag: Vec<Vec<MultiFab<D>>>,
    bottom: Option<LU<f64, Dyn, Dyn>>,
}

/// Write `value(p, comp)` at the coarse-fine interface nodes of `level`.
pub(crate) fn set_interface<const D: usize>(
    level: &Level<D>,
    field: &mut MultiFab<D>,
    value: impl Fn(&IntVect<D>, usize) -> Option<f64> + Sync,
) {
    if level.is_full_domain() {
        return;
    }
    let ncomp = field.ncomp().min(D);
    field.fabs_mut().par_iter_mut().for_each(|fab| {
        let valid = *fab.valid_box();
        for p in valid.iter().filter(|p| level.node_kind(p) == NodeKind::CoarseFine) {
            for comp in 0..ncomp {
                if let Some(v) = value(&p, comp) {
                    fab.set(&p, comp, v);
                }
            }
        }
    });
}

/// Make a multilevel solution consistent: covered coarse nodes take the
/// fine values, interface nodes take the coarse interpolant, ghosts are filled.
pub fn sync_levels<const D: usize, O: NodalOperator<D> + ?Sized>(op: &O, sol: &mut [MultiFab<D>]) {
    for l in (1..sol.len()).rev() {
        let (coarse, fine) = sol.split_at_mut(l);
        transfer::inject(&fine[0], &mut coarse[l - 1]);
    }
    for l in 1..sol.len() {
        let (coarse, fine) = sol.split_at_mut(l);
        let crse = &coarse[l - 1];
        let cgeom = &op.level(l - 1, 0).geom;
        set_interface(op.level(l, 0), &mut fine[0], |p, comp| {
            transfer::interpolate(crse, cgeom, p, comp)
        });
    }
    for (l, s) in sol.iter_mut().enumerate() {
        s.fill_boundary(&op.level(l, 0).geom);
    }
}

fn max_norm<const D: usize>(fields: &[MultiFab<D>]) -> f64 {
    fields.iter().map(|f| f.norm0_all()).fold(0.0, f64::max)
}

fn gather<const D: usize>(field: &MultiFab<D>) -> DVector<f64> {
    let mut v = Vec::with_capacity(field.box_array().num_points() * D);
    for fab in field.fabs() {
        for p in fab.valid_box().iter() {
            for comp in 0..D {
                v.push(fab.get(&p, comp));
            }
        }
    }
    DVector::from_vec(v)
}

fn scatter<const D: usize>(x: &DVector<f64>, field: &mut MultiFab<D>) {
    let mut k = 0;
    for fab in field.fabs_mut() {
        let valid = *fab.valid_box();
        for p in valid.iter() {
            for comp in 0..D {
                fab.set(&p, comp, x[k]);
                k += 1;
            }
        }
    }
}

pub struct Multigrid<'a, const D: usize, O: NodalOperator<D>> {
    op: &'a O,
    config: MultigridConfig,
}

impl<'a, const D: usize, O: NodalOperator<D>> Multigrid<'a, D, O> {
    pub fn new(op: &'a O, config: MultigridConfig) -> Self {
        Self { op, config }
    }

    pub fn config(&self) -> &MultigridConfig {
        &self.config
    }

    fn check_inputs(&self, sol: &[MultiFab<D>], rhs: &[MultiFab<D>]) -> Result<()> {
        let nlev = self.op.num_amr_levels();
        if sol.len() != nlev || rhs.len() != nlev {
            return Err(SolverError::LayoutMismatch(format!(
                "expected {nlev} levels, got {} solutions and {} right-hand sides",
                sol.len(),
                rhs.len()
            )));
        }
        for l in 0..nlev {
            let ba = &self.op.level(l, 0).ba;
            if sol[l].box_array() != ba || rhs[l].box_array() != ba {
                return Err(SolverError::LayoutMismatch(format!("level {l} does not match the operator")));
            }
            if sol[l].ngrow() < 1 || sol[l].ncomp() != D || rhs[l].ncomp() != D {
                return Err(SolverError::LayoutMismatch(format!(
                    "level {l}: solution needs {D} components and one ghost node"
                )));
            }
            rhs[l].check_finite("rhs", l, 0)?;
            sol[l].check_finite("solution", l, 0)?;
        }
        Ok(())
    }

    /// Solve `A sol = rhs` on every AMR level, starting from `sol`.
    pub fn solve(&self, sol: &mut [MultiFab<D>], rhs: &[MultiFab<D>], tol_rel: f64, tol_abs: f64) -> Result<SolveInfo> {
        self.check_inputs(sol, rhs)?;
        let ws = self.workspace()?;
        sync_levels(self.op, sol);

        let mut res = self.composite_residual(sol, rhs)?;
        let initial = max_norm(&res);
        let target = (tol_rel * initial).max(tol_abs);
        let mut norm = initial;
        if self.config.verbose > 0 {
            info!("MG: initial residual {initial:.6e}, target {target:.6e}");
        }

        let mut iterations = 0;
        loop {
            let done = match self.config.fixed_iter {
                Some(n) => iterations >= n,
                None => norm <= target || iterations >= self.config.max_iter,
            };
            if done {
                break;
            }
            self.cycle(&ws, sol, &mut res)?;
            iterations += 1;
            res = self.composite_residual(sol, rhs)?;
            norm = max_norm(&res);
            if !norm.is_finite() {
                return Err(SolverError::LinearSolve(format!(
                    "residual is not finite after {iterations} cycles"
                )));
            }
            if self.config.verbose > 1 {
                info!("MG: iteration {iterations:3}, residual {norm:.6e}");
            } else {
                debug!("MG: iteration {iterations:3}, residual {norm:.6e}");
            }
        }

        let converged = norm <= target;
        if !converged && self.config.fixed_iter.is_none() {
            warn!("MG: not converged after {iterations} iterations (residual {norm:.6e}, target {target:.6e})");
        } else if self.config.verbose > 0 {
            info!("MG: {iterations} iterations, final residual {norm:.6e}");
        }
        Ok(SolveInfo {
            iterations,
            initial_residual: initial,
            final_residual: norm,
            converged,
        })
    }

    /// `rhs - A sol` on every level. Fine interface rows compare against the
    /// coarse interpolant. Covered coarse nodes carry the refluxed fine
    /// residual, or a stress balance across the interface on its edge.
    pub fn composite_residual(&self, sol: &mut [MultiFab<D>], rhs: &[MultiFab<D>]) -> Result<Vec<MultiFab<D>>> {
        let mut res = Vec::with_capacity(sol.len());
        for l in 0..sol.len() {
            let mut r = self.level_residual(l, 0, &mut sol[l], &rhs[l])?;
            if l > 0 {
                let (crse, fine) = (&sol[l - 1], &sol[l]);
                let cgeom = &self.op.level(l - 1, 0).geom;
                set_interface(self.op.level(l, 0), &mut r, |p, comp| {
                    Some(transfer::interpolate(crse, cgeom, p, comp)? - fine.value_at(p, comp)?)
                });
            }
            res.push(r);
        }
        for l in (1..res.len()).rev() {
            let (coarse, fine) = res.split_at_mut(l);
            self.restrict_residual(l - 1, &mut coarse[l - 1], &sol[l - 1], &rhs[l - 1], &fine[0], &sol[l])?;
        }
        Ok(res)
    }

    fn level_residual(&self, amrlev: usize, mglev: usize, x: &mut MultiFab<D>, rhs: &MultiFab<D>) -> Result<MultiFab<D>> {
        x.fill_boundary(&self.op.level(amrlev, mglev).geom);
        let mut ax = MultiFab::like(x, D, 0, 0.0);
        self.op.fapply(amrlev, mglev, &mut ax, x)?;
        let mut r = rhs.clone();
        r.minus_valid(&ax)?;
        Ok(r)
    }

    /// Zero the coarse residual under the fine level, then reflux.
    fn restrict_residual(
        &self,
        crse_amrlev: usize,
        crse: &mut MultiFab<D>,
        crse_sol: &MultiFab<D>,
        crse_rhs: &MultiFab<D>,
        fine: &MultiFab<D>,
        fine_sol: &MultiFab<D>,
    ) -> Result<()> {
        let flevel = self.op.level(crse_amrlev + 1, 0);
        crse.fabs_mut().par_iter_mut().for_each(|fab| {
            let valid = *fab.valid_box();
            for c in valid.iter() {
                if flevel.ba.contains(&c.map(|v| v * AmrHierarchy::<D>::REF_RATIO)) {
                    for comp in 0..D {
                        fab.set(&c, comp, 0.0);
                    }
                }
            }
        });
        self.op.reflux(crse_amrlev, crse, crse_sol, crse_rhs, fine, fine_sol)
    }

    fn workspace(&self) -> Result<Workspace<D>> {
        let mut diag = Vec::with_capacity(self.op.num_amr_levels());
        for l in 0..self.op.num_amr_levels() {
            let mut per_level = Vec::with_capacity(self.op.num_mg_levels(l));
            for m in 0..self.op.num_mg_levels(l) {
                let level = self.op.level(l, m);
                let mut d = MultiFab::new(&level.ba, &level.dm, D, 0, 0.0);
                self.op.diagonal(l, m, &mut d)?;
                per_level.push(d);
            }
            diag.push(per_level);
        }
        Ok(Workspace {
            diag,
            bottom: self.build_bottom()?,
        })
    }

    /// Dense LU of the coarsest level, assembled by applying the operator to
    /// unit vectors.
    fn build_bottom(&self) -> Result<Option<LU<f64, Dyn, Dyn>>> {
        let mglev = self.op.num_mg_levels(0) - 1;
        let level = self.op.level(0, mglev);
        let n = level.ba.num_points() * D;
        if n > self.config.bottom_max_unknowns {
            debug!("MG: {n} coarsest unknowns, bottom solve by smoothing");
            return Ok(None);
        }
        let zero = MultiFab::new(&level.ba, &level.dm, D, 1, 0.0);
        let columns = (0..n)
            .into_par_iter()
            .map(|k| {
                let mut e = DVector::zeros(n);
                e[k] = 1.0;
                let mut u = zero.clone();
                scatter(&e, &mut u);
                u.fill_boundary(&level.geom);
                let mut f = MultiFab::like(&u, D, 0, 0.0);
                self.op.fapply(0, mglev, &mut f, &u)?;
                Ok(gather(&f))
            })
            .collect::<Result<Vec<_>>>()?;
        let lu = DMatrix::from_columns(&columns).lu();
        if !lu.is_invertible() {
            warn!("MG: coarsest-level matrix ({n} unknowns) is singular; bottom solve falls back to smoothing");
            return Ok(None);
        }
        debug!("MG: factored {n} coarsest unknowns");
        Ok(Some(lu))
    }

    fn smooth(
        &self,
        amrlev: usize,
        mglev: usize,
        cor: &mut MultiFab<D>,
        rhs: &MultiFab<D>,
        diag: &MultiFab<D>,
        sweeps: usize,
    ) -> Result<()> {
        let level = self.op.level(amrlev, mglev);
        let op = self.op;
        let omega = self.config.omega;
        let mut ax = MultiFab::like(cor, D, 0, 0.0);
        for _ in 0..sweeps {
            cor.fill_boundary(&level.geom);
            op.fapply(amrlev, mglev, &mut ax, cor)?;
            cor.fabs_mut().par_iter_mut().enumerate().for_each(|(i, fab)| {
                let (a, b, d) = (ax.fab(i), rhs.fab(i), diag.fab(i));
                let valid = *fab.valid_box();
                for p in valid.iter() {
                    for comp in 0..D {
                        let dv = d.get(&p, comp);
                        if dv == 0.0 {
                            continue;
                        }
                        let w = if op.is_identity_row(amrlev, mglev, &p, comp) { 1.0 } else { omega };
                        *fab.get_mut(&p, comp) += w * (b.get(&p, comp) - a.get(&p, comp)) / dv;
                    }
                }
            });
        }
        cor.fill_boundary(&level.geom);
        Ok(())
    }

    fn bottom_solve(&self, ws: &Workspace<D>, mglev: usize, cor: &mut MultiFab<D>, rhs: &MultiFab<D>) -> Result<()> {
        if let Some(lu) = &ws.bottom {
            if let Some(x) = lu.solve(&gather(rhs)) {
                scatter(&x, cor);
                cor.fill_boundary(&self.op.level(0, mglev).geom);
                return Ok(());
            }
            warn!("MG: bottom LU solve failed; smoothing instead");
        }
        self.smooth(0, mglev, cor, rhs, &ws.diag[0][mglev], self.config.bottom_smooth)
    }

    fn vcycle(&self, ws: &Workspace<D>, mglev: usize, cor: &mut MultiFab<D>, rhs: &MultiFab<D>) -> Result<()> {
        if mglev + 1 == self.op.num_mg_levels(0) {
            return self.bottom_solve(ws, mglev, cor, rhs);
        }
        let diag = &ws.diag[0][mglev];
        self.smooth(0, mglev, cor, rhs, diag, self.config.pre_smooth)?;

        let r = self.level_residual(0, mglev, cor, rhs)?;
        let fine = self.op.level(0, mglev);
        let coarse = self.op.level(0, mglev + 1);
        let mut crhs = MultiFab::new(&coarse.ba, &coarse.dm, D, 0, 0.0);
        transfer::restrict(&r, &fine.geom, &mut crhs, &coarse.geom, BoundaryRule::Inject);
        let mut ccor = MultiFab::new(&coarse.ba, &coarse.dm, D, 1, 0.0);
        self.vcycle(ws, mglev + 1, &mut ccor, &crhs)?;

        transfer::prolong_add(&ccor, &coarse.geom, cor, |_| true);
        self.smooth(0, mglev, cor, rhs, diag, self.config.post_smooth)
    }

    fn cycle(&self, ws: &Workspace<D>, sol: &mut [MultiFab<D>], res: &mut [MultiFab<D>]) -> Result<()> {
        let nlev = sol.len();
        let mut cor: Vec<MultiFab<D>> = sol.iter().map(|s| MultiFab::like(s, D, 1, 0.0)).collect();

        for l in (1..nlev).rev() {
            let level = self.op.level(l, 0);
            let mut rhs = res[l].clone();
            set_interface(level, &mut rhs, |_, _| Some(0.0));
            self.smooth(l, 0, &mut cor[l], &rhs, &ws.diag[l][0], self.config.pre_smooth)?;
            let r = self.level_residual(l, 0, &mut cor[l], &rhs)?;
            // the coarse correction is still zero here
            let crse_rhs = res[l - 1].clone();
            self.restrict_residual(l - 1, &mut res[l - 1], &cor[l - 1], &crse_rhs, &r, &cor[l])?;
        }

        self.vcycle(ws, 0, &mut cor[0], &res[0])?;

        for l in 1..nlev {
            let (coarse, fine) = cor.split_at_mut(l);
            let fcor = &mut fine[0];
            transfer::prolong_add(&coarse[l - 1], &self.op.level(l - 1, 0).geom, fcor, |_| true);
            let level = self.op.level(l, 0);
            fcor.fill_boundary(&level.geom);
            let mut rhs = res[l].clone();
            set_interface(level, &mut rhs, |p, comp| fcor.value_at(p, comp));
            self.smooth(l, 0, fcor, &rhs, &ws.diag[l][0], self.config.post_smooth)?;
        }

        for (s, c) in sol.iter_mut().zip(&cor) {
            s.saxpy(1.0, c)?;
        }
        sync_levels(self.op, sol);
        Ok(())
    }
}
