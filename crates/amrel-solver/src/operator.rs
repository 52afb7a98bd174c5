//! Node-centered finite-difference elasticity operator.
//!
//! # Discretization
//!
//! At an interior node `m` with stiffness `C(m)`:
//!
//! ```text
//! f(m) = C(m) ⋮ ∇∇u(m) + Σ_j [(C(m+e_j) − C(m−e_j)) / (2Δx_j)] : ∇u(m) e_j
//! ```
//!
//! At domain-boundary nodes the row comes from the boundary condition table
//! with `σ = C(m) : ∇u(m)` and one-sided gradients across the bound. On fine
//! AMR levels the nodes on the edge of the refined region are identity rows
//! driven from the coarse level.
//!
//! # Levels
//!
//! The operator keeps one stiffness field per (AMR level, multigrid level).
//! Level 0 is coarsened by two while the domain allows it, each coarse
//! level being one box; refined AMR levels carry a single multigrid level.

use crate::bc::{BcType, ElasticBc, Location};
use crate::error::{Result, SolverError};
use crate::field::{BaseFab, FabArray, MultiFab};
use crate::grid::{AmrHierarchy, IntVect, Level, NodeKind, neighborhood, offset_by, shifted};
use crate::multigrid::NodalOperator;
use crate::stencil::{self, StencilType};
use crate::transfer::{self, BoundaryRule};
use amrel_model::{Matrix, Solid, Stiffness, Vector};
use log::{debug, warn};
use rayon::prelude::*;

/// Setup options for [`ElasticOperator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorInfo {
    /// Maximum number of coarsenings of AMR level 0
    pub max_coarsening_level: usize,
}

impl Default for OperatorInfo {
    fn default() -> Self {
        Self {
            max_coarsening_level: 30,
        }
    }
}

pub struct ElasticOperator<const D: usize> {
    levels: Vec<Vec<Level<D>>>,
    stiffness: Vec<Vec<FabArray<Stiffness<D>, D>>>,
    model_set: Vec<bool>,
    bc: ElasticBc<D>,
    bc_set: bool,
    homogeneous: bool,
    info: OperatorInfo,
}

/// `∇u` at `p` with stencils chosen by what the level covers.
pub(crate) fn level_gradient<const D: usize>(
    level: &Level<D>,
    fab: &BaseFab<f64, D>,
    p: &IntVect<D>,
    dx: &[f64; D],
) -> Matrix<D> {
    stencil::gradient(fab, p, dx, &level.stencil(p))
}

/// `∇u` at `p` read from the valid nodes of the whole level; `None` when a
/// stencil node is missing.
fn gradient_on_level<const D: usize>(
    u: &MultiFab<D>,
    level: &Level<D>,
    p: &IntVect<D>,
    sten: &[StencilType; D],
) -> Option<Matrix<D>> {
    let dx = level.geom.cell_size();
    let mut grad = Matrix::<D>::zeros();
    for j in 0..D {
        let (hi, lo, h) = match sten[j] {
            StencilType::Central => (shifted(p, j, 1), shifted(p, j, -1), 2.0 * dx[j]),
            StencilType::Lo => (shifted(p, j, 1), *p, dx[j]),
            StencilType::Hi => (*p, shifted(p, j, -1), dx[j]),
        };
        for i in 0..D {
            let (vh, vl) = (u.value_at_wrapped(&level.geom, &hi, i)?, u.value_at_wrapped(&level.geom, &lo, i)?);
            grad[(i, j)] = (vh - vl) / h;
        }
    }
    Some(grad)
}

/// Component order of the Voigt layout.
pub fn voigt_pairs<const D: usize>() -> Vec<(usize, usize)> {
    match D {
        2 => vec![(0, 0), (1, 1), (0, 1)],
        3 => vec![(0, 0), (1, 1), (2, 2), (1, 2), (2, 0), (0, 1)],
        _ => (0..D).map(|i| (i, i)).collect(),
    }
}

fn matrix_components<const D: usize>(m: &Matrix<D>, voigt: bool) -> Vec<f64> {
    if voigt {
        voigt_pairs::<D>().iter().map(|&(i, j)| m[(i, j)]).collect()
    } else {
        (0..D * D).map(|n| m[(n / D, n % D)]).collect()
    }
}

impl<const D: usize> ElasticOperator<D> {
    pub fn new(hierarchy: &AmrHierarchy<D>, info: OperatorInfo) -> Result<Self> {
        let mut op = Self {
            levels: Vec::new(),
            stiffness: Vec::new(),
            model_set: Vec::new(),
            bc: ElasticBc::default(),
            bc_set: false,
            homogeneous: false,
            info,
        };
        op.define(hierarchy)?;
        Ok(op)
    }

    /// (Re)allocate every level for `hierarchy`. Models must be set again.
    pub fn define(&mut self, hierarchy: &AmrHierarchy<D>) -> Result<()> {
        let mut levels = Vec::with_capacity(hierarchy.num_levels());
        for (amrlev, base) in hierarchy.levels().iter().enumerate() {
            let mut mg = vec![base.clone()];
            if amrlev == 0 {
                while mg.len() <= self.info.max_coarsening_level {
                    let last = &mg[mg.len() - 1];
                    if !last.geom.can_coarsen(AmrHierarchy::<D>::REF_RATIO) {
                        break;
                    }
                    let next = last.coarsen(AmrHierarchy::<D>::REF_RATIO)?;
                    mg.push(next);
                }
            }
            debug!("amrlev {amrlev}: {} multigrid levels", mg.len());
            levels.push(mg);
        }
        if self.bc_set {
            self.bc.validate(&levels[0][0].geom)?;
        }
        self.stiffness = levels
            .iter()
            .map(|mg| {
                mg.iter()
                    .map(|l| FabArray::new(&l.ba, &l.dm, 1, 1, Stiffness::zero()))
                    .collect()
            })
            .collect();
        self.model_set = vec![false; levels.len()];
        self.levels = levels;
        Ok(())
    }

    pub fn info(&self) -> &OperatorInfo {
        &self.info
    }

    pub fn stiffness(&self, amrlev: usize, mglev: usize) -> &FabArray<Stiffness<D>, D> {
        &self.stiffness[amrlev][mglev]
    }

    fn check_amrlev(&self, amrlev: usize) -> Result<()> {
        if amrlev < self.levels.len() {
            Ok(())
        } else {
            Err(SolverError::InvalidGrid(format!(
                "AMR level {amrlev} does not exist ({} defined)",
                self.levels.len()
            )))
        }
    }

    /// Bind a model field on `amrlev`, linearized at zero displacement gradient.
    pub fn set_model<M: Solid<D> + Copy>(&mut self, amrlev: usize, models: &FabArray<M, D>) -> Result<()> {
        self.check_amrlev(amrlev)?;
        let level = &self.levels[amrlev][0];
        if models.box_array() != &level.ba {
            return Err(SolverError::LayoutMismatch(format!(
                "model field on AMR level {amrlev} does not match the level's boxes"
            )));
        }
        let zero = Matrix::<D>::zeros();
        let stiffness = &mut self.stiffness[amrlev][0];
        stiffness
            .fabs_mut()
            .par_iter_mut()
            .zip(models.fabs().par_iter())
            .try_for_each(|(cfab, mfab)| {
                let valid = *cfab.valid_box();
                for p in valid.iter() {
                    let c = mfab.get(&p, 0).linearize(&zero).stiffness;
                    if !c.is_finite() {
                        return Err(SolverError::NonFinite {
                            field: "stiffness",
                            amrlev,
                            mglev: 0,
                            index: p.to_vec(),
                            component: 0,
                        });
                    }
                    cfab.set(&p, 0, c);
                }
                Ok(())
            })?;
        stiffness.fill_boundary(&level.geom);
        self.model_set[amrlev] = true;
        Ok(())
    }

    /// Same model at every node of every level.
    pub fn set_uniform_model<M: Solid<D>>(&mut self, model: &M) {
        let c = model.linearize(&Matrix::<D>::zeros()).stiffness;
        for mg in &mut self.stiffness {
            for field in mg {
                field.set_val(c);
            }
        }
        self.model_set.fill(true);
    }

    /// Bind precomputed stiffness tensors (a linearization) on `amrlev`.
    pub fn set_stiffness(&mut self, amrlev: usize, stiffness: FabArray<Stiffness<D>, D>) -> Result<()> {
        self.check_amrlev(amrlev)?;
        let level = &self.levels[amrlev][0];
        if stiffness.box_array() != &level.ba || stiffness.ngrow() < 1 || stiffness.ncomp() != 1 {
            return Err(SolverError::LayoutMismatch(format!(
                "stiffness field on AMR level {amrlev} needs the level's boxes, 1 component and 1 ghost"
            )));
        }
        let mut stiffness = stiffness;
        stiffness.fill_boundary(&level.geom);
        self.stiffness[amrlev][0] = stiffness;
        self.model_set[amrlev] = true;
        Ok(())
    }

    pub fn set_bc(&mut self, bc: ElasticBc<D>) -> Result<()> {
        bc.validate(&self.levels[0][0].geom)?;
        self.bc = bc;
        self.bc_set = true;
        Ok(())
    }

    pub fn bc(&self) -> &ElasticBc<D> {
        &self.bc
    }

    pub fn set_time(&mut self, time: f64) {
        self.bc.set_time(time);
    }

    /// Whether [`ElasticOperator::init_rhs`] writes zero displacement targets.
    pub fn set_homogeneous(&mut self, homogeneous: bool) {
        self.homogeneous = homogeneous;
    }

    pub fn is_homogeneous(&self) -> bool {
        self.homogeneous
    }

    /// Write boundary targets into `rhs` on `amrlev`.
    pub fn init_rhs(&self, amrlev: usize, rhs: &mut MultiFab<D>) -> Result<()> {
        self.check_amrlev(amrlev)?;
        self.bc.init(rhs, &self.levels[amrlev][0].geom, self.homogeneous);
        Ok(())
    }

    /// Check that every level has a model and build the coarse coefficients.
    pub fn prepare_for_solve(&mut self) -> Result<()> {
        if let Some(amrlev) = self.model_set.iter().position(|set| !set) {
            return Err(SolverError::ModelNotSet(amrlev));
        }
        if !self.bc_set {
            warn!("no boundary conditions set; using displacement = 0 everywhere");
            self.bc_set = true;
        }
        self.average_down_coeffs();
        Ok(())
    }

    /// Push stiffness from fine AMR levels onto the coarse nodes they cover,
    /// then restrict level 0 down its multigrid levels.
    pub fn average_down_coeffs(&mut self) {
        for amrlev in (1..self.levels.len()).rev() {
            let (coarse, fine) = self.stiffness.split_at_mut(amrlev);
            let crse = &mut coarse[amrlev - 1][0];
            transfer::inject(&fine[0][0], crse);
            crse.fill_boundary(&self.levels[amrlev - 1][0].geom);
        }
        let levels = &self.levels[0];
        let mg = &mut self.stiffness[0];
        for mglev in 1..mg.len() {
            let (fine, coarse) = mg.split_at_mut(mglev);
            let crse = &mut coarse[0];
            transfer::restrict(
                &fine[mglev - 1],
                &levels[mglev - 1].geom,
                crse,
                &levels[mglev].geom,
                BoundaryRule::Average,
            );
            crse.fill_boundary(&levels[mglev].geom);
        }
    }

    fn check_model(&self, amrlev: usize) -> Result<()> {
        self.check_amrlev(amrlev)?;
        if self.model_set[amrlev] {
            Ok(())
        } else {
            Err(SolverError::ModelNotSet(amrlev))
        }
    }

    fn check_operands(&self, amrlev: usize, mglev: usize, out: &MultiFab<D>, u: &MultiFab<D>) -> Result<()> {
        self.check_model(amrlev)?;
        let c = &self.stiffness[amrlev][mglev];
        if out.box_array() != c.box_array() || u.box_array() != c.box_array() {
            return Err(SolverError::LayoutMismatch(format!(
                "operands do not match amrlev {amrlev}, mglev {mglev}"
            )));
        }
        if u.ngrow() < 1 || out.ncomp() < D || u.ncomp() < D {
            return Err(SolverError::LayoutMismatch(format!(
                "operands need {D} components and one ghost node"
            )));
        }
        Ok(())
    }

    /// Row of the discrete operator at `p`.
    fn apply_at(
        &self,
        level: &Level<D>,
        ufab: &BaseFab<f64, D>,
        cfab: &BaseFab<Stiffness<D>, D>,
        p: &IntVect<D>,
        dx: &[f64; D],
    ) -> Vector<D> {
        if let Some(loc) = Location::of(p, &level.geom) {
            let gradu = level_gradient(level, ufab, p, dx);
            let sigma = cfab.get(p, 0).apply(&gradu);
            return self.bc.evaluate(&loc, &stencil::vector_at(ufab, p), &gradu, &sigma);
        }
        if level.node_kind(p) == NodeKind::CoarseFine {
            return stencil::vector_at(ufab, p);
        }
        let gradu = stencil::gradient(ufab, p, dx, &[StencilType::Central; D]);
        let hess = stencil::hessian(ufab, p, dx);
        let mut f = cfab.get(p, 0).apply_gradient(&hess);
        for j in 0..D {
            let hi = cfab.get(&shifted(p, j, 1), 0).apply(&gradu);
            let lo = cfab.get(&shifted(p, j, -1), 0).apply(&gradu);
            let dsig = (hi - lo) / (2.0 * dx[j]);
            for i in 0..D {
                f[i] += dsig[(i, j)];
            }
        }
        f
    }

    /// Per-node matrix diagnostics share this shape: gradient at every
    /// valid node, `ncomp` values out.
    fn map_gradient(
        &self,
        amrlev: usize,
        u: &MultiFab<D>,
        ncomp: usize,
        f: impl Fn(&Matrix<D>, &Stiffness<D>) -> Vec<f64> + Sync,
    ) -> Result<MultiFab<D>> {
        self.check_model(amrlev)?;
        let level = &self.levels[amrlev][0];
        let c = &self.stiffness[amrlev][0];
        if u.box_array() != &level.ba || u.ngrow() < 1 {
            return Err(SolverError::LayoutMismatch(format!(
                "displacement on AMR level {amrlev} does not match the level layout"
            )));
        }
        u.check_finite("u", amrlev, 0)?;
        let mut u = u.clone();
        u.fill_boundary(&level.geom);
        let dx = level.geom.cell_size();
        let mut out = MultiFab::like(&u, ncomp, 0, 0.0);
        out.fabs_mut().par_iter_mut().enumerate().for_each(|(i, ofab)| {
            let ufab = u.fab(i);
            let cfab = c.fab(i);
            let valid = *ofab.valid_box();
            for p in valid.iter() {
                let gradu = level_gradient(level, ufab, &p, &dx);
                for (n, v) in f(&gradu, &cfab.get(&p, 0)).into_iter().enumerate() {
                    ofab.set(&p, n, v);
                }
            }
        });
        Ok(out)
    }

    /// Small strain `ε = sym ∇u`; Voigt order `xx, yy, (zz,) (yz, zx,) xy`,
    /// otherwise row-major.
    pub fn strain(&self, amrlev: usize, u: &MultiFab<D>, voigt: bool) -> Result<MultiFab<D>> {
        let ncomp = if voigt { D * (D + 1) / 2 } else { D * D };
        self.map_gradient(amrlev, u, ncomp, |g, _| {
            matrix_components(&((g + g.transpose()) * 0.5), voigt)
        })
    }

    /// `σ = C : ∇u` with the bound stiffness; same layouts as [`Self::strain`].
    pub fn stress(&self, amrlev: usize, u: &MultiFab<D>, voigt: bool) -> Result<MultiFab<D>> {
        let ncomp = if voigt { D * (D + 1) / 2 } else { D * D };
        self.map_gradient(amrlev, u, ncomp, |g, c| matrix_components(&c.apply(g), voigt))
    }

    /// Energy density `½ ∇u : C : ∇u`.
    pub fn energy(&self, amrlev: usize, u: &MultiFab<D>) -> Result<MultiFab<D>> {
        self.map_gradient(amrlev, u, 1, |g, c| vec![0.5 * c.contract(g, g)])
    }

    /// `C : ∇u` on AMR level `amrlev` at `p`.
    fn stress_at(&self, amrlev: usize, u: &MultiFab<D>, p: &IntVect<D>, sten: &[StencilType; D]) -> Option<Matrix<D>> {
        let level = &self.levels[amrlev][0];
        let c = self.stiffness[amrlev][0].value_at_wrapped(&level.geom, p, 0)?;
        Some(c.apply(&gradient_on_level(u, level, p, sten)?))
    }

    /// `∇·σ` at coarse node `c` on the edge of AMR level `crse_amrlev + 1`.
    ///
    /// Along an axis that crosses the edge, the dual cell of `c` is half a
    /// coarse cell outside the fine level and half a fine cell inside it:
    ///
    /// ```text
    /// (∇·σ)_i += s (σ_fine(2c) − σ_crse(c))_ia / ((Δx_c + Δx_f) / 2)
    /// ```
    ///
    /// with `s = ±1` pointing into the fine level, `σ_fine` from one-sided
    /// fine differences into the fine level and `σ_crse` from one-sided
    /// coarse differences away from it. Along the edge the fine stresses of
    /// the neighboring edge nodes are differenced.
    fn interface_divergence(
        &self,
        crse_amrlev: usize,
        c: &IntVect<D>,
        crse_sol: &MultiFab<D>,
        fine_sol: &MultiFab<D>,
    ) -> Option<Vector<D>> {
        let fine_amrlev = crse_amrlev + 1;
        let coarse = &self.levels[crse_amrlev][0];
        let fine = &self.levels[fine_amrlev][0];
        let f = c.map(|v| v * AmrHierarchy::<D>::REF_RATIO);
        let (cdx, fdx) = (coarse.geom.cell_size(), fine.geom.cell_size());
        let fine_stress = |p: &IntVect<D>| self.stress_at(fine_amrlev, fine_sol, p, &fine.stencil(p));

        // +1 / -1: the fine level lies on that side only; 0: along the edge
        let mut inward = [0.0; D];
        let mut csten = coarse.stencil(c);
        for a in 0..D {
            match (fine.covers(&shifted(&f, a, -1)), fine.covers(&shifted(&f, a, 1))) {
                (false, true) => {
                    inward[a] = 1.0;
                    csten[a] = StencilType::Hi;
                }
                (true, false) => {
                    inward[a] = -1.0;
                    csten[a] = StencilType::Lo;
                }
                _ => {}
            }
        }
        let sigma_f = fine_stress(&f)?;
        let sigma_c = self.stress_at(crse_amrlev, crse_sol, c, &csten)?;
        let mut div = Vector::<D>::zeros();
        for a in 0..D {
            if inward[a] != 0.0 {
                let w = 0.5 * (cdx[a] + fdx[a]);
                for i in 0..D {
                    div[i] += inward[a] * (sigma_f[(i, a)] - sigma_c[(i, a)]) / w;
                }
            } else {
                let hi = fine_stress(&shifted(&f, a, 1))?;
                let lo = fine_stress(&shifted(&f, a, -1))?;
                for i in 0..D {
                    div[i] += (hi[(i, a)] - lo[(i, a)]) / (2.0 * fdx[a]);
                }
            }
        }
        Some(div)
    }

    /// Face fluxes. Nodal elasticity keeps none, so these are zero.
    pub fn fflux(&self, amrlev: usize) -> Result<Vec<MultiFab<D>>> {
        self.check_amrlev(amrlev)?;
        let level = &self.levels[amrlev][0];
        Ok((0..D).map(|_| MultiFab::new(&level.ba, &level.dm, D, 0, 0.0)).collect())
    }
}

impl<const D: usize> NodalOperator<D> for ElasticOperator<D> {
    fn num_amr_levels(&self) -> usize {
        self.levels.len()
    }

    fn num_mg_levels(&self, amrlev: usize) -> usize {
        self.levels[amrlev].len()
    }

    fn level(&self, amrlev: usize, mglev: usize) -> &Level<D> {
        &self.levels[amrlev][mglev]
    }

    fn fapply(&self, amrlev: usize, mglev: usize, f: &mut MultiFab<D>, u: &MultiFab<D>) -> Result<()> {
        self.check_operands(amrlev, mglev, f, u)?;
        u.check_finite("u", amrlev, mglev)?;
        let level = &self.levels[amrlev][mglev];
        let c = &self.stiffness[amrlev][mglev];
        let dx = level.geom.cell_size();
        f.fabs_mut().par_iter_mut().enumerate().for_each(|(i, ffab)| {
            let ufab = u.fab(i);
            let cfab = c.fab(i);
            let valid = *ffab.valid_box();
            for p in valid.iter() {
                let v = self.apply_at(level, ufab, cfab, &p, &dx);
                for d in 0..D {
                    ffab.set(&p, d, v[d]);
                }
            }
        });
        Ok(())
    }

    fn diagonal(&self, amrlev: usize, mglev: usize, diag: &mut MultiFab<D>) -> Result<()> {
        self.check_model(amrlev)?;
        let level = &self.levels[amrlev][mglev];
        let c = &self.stiffness[amrlev][mglev];
        if diag.box_array() != c.box_array() || diag.ncomp() < D {
            return Err(SolverError::LayoutMismatch(format!(
                "diagonal does not match amrlev {amrlev}, mglev {mglev}"
            )));
        }
        let dx = level.geom.cell_size();
        diag.fabs_mut().par_iter_mut().enumerate().for_each(|(i, dfab)| {
            let cfab = c.fab(i);
            let valid = *dfab.valid_box();
            for p in valid.iter() {
                let cm = cfab.get(&p, 0);
                let loc = Location::of(&p, &level.geom);
                let interface = loc.is_none() && level.node_kind(&p) == NodeKind::CoarseFine;
                let sten = level.stencil(&p);
                for comp in 0..D {
                    let value = if let Some(loc) = &loc {
                        let g = stencil::impulse_gradient(comp, &dx, &sten);
                        let u = Vector::<D>::from_fn(|d, _| if d == comp { 1.0 } else { 0.0 });
                        self.bc.evaluate(loc, &u, &g, &cm.apply(&g))[comp]
                    } else if interface {
                        1.0
                    } else {
                        cm.apply_gradient(&stencil::impulse_hessian(comp, &dx))[comp]
                    };
                    dfab.set(&p, comp, value);
                }
            }
        });
        Ok(())
    }

    fn is_identity_row(&self, amrlev: usize, mglev: usize, p: &IntVect<D>, comp: usize) -> bool {
        let level = &self.levels[amrlev][mglev];
        match Location::of(p, &level.geom) {
            Some(loc) => self.bc.bc_type(&loc, comp) == BcType::Displacement,
            None => level.node_kind(p) == NodeKind::CoarseFine,
        }
    }

    /// Coarse nodes under the fine level take a composite residual. Where
    /// the whole fine neighborhood is interior to the fine level it is the
    /// `(1, 2, 4)/16` average of the fine residual; on the edge of the fine
    /// level it is `rhs − ∇·σ` over a dual cell split between the levels.
    fn reflux(
        &self,
        crse_amrlev: usize,
        crse_res: &mut MultiFab<D>,
        crse_sol: &MultiFab<D>,
        crse_rhs: &MultiFab<D>,
        fine_res: &MultiFab<D>,
        fine_sol: &MultiFab<D>,
    ) -> Result<()> {
        if D == 3 {
            return Err(SolverError::NotImplemented3D("reflux"));
        }
        self.check_model(crse_amrlev)?;
        self.check_model(crse_amrlev + 1)?;
        let coarse = &self.levels[crse_amrlev][0];
        let fine = &self.levels[crse_amrlev + 1][0];
        if crse_sol.box_array() != &coarse.ba || crse_rhs.box_array() != &coarse.ba || fine_sol.box_array() != &fine.ba
        {
            return Err(SolverError::LayoutMismatch(format!(
                "reflux operands do not match AMR levels {crse_amrlev} and {}",
                crse_amrlev + 1
            )));
        }
        let ncomp = crse_res.ncomp().min(fine_res.ncomp()).min(D);
        crse_res.fabs_mut().par_iter_mut().for_each(|cfab| {
            let valid = *cfab.valid_box();
            for c in valid.iter() {
                let center = c.map(|v| v * AmrHierarchy::<D>::REF_RATIO);
                if !fine.ba.contains(&center) {
                    continue;
                }
                if fine.node_kind(&center) == NodeKind::CoarseFine {
                    let Some(div) = self.interface_divergence(crse_amrlev, &c, crse_sol, fine_sol) else {
                        continue;
                    };
                    for comp in 0..ncomp {
                        let rhs = crse_rhs.value_at(&c, comp).unwrap_or(0.0);
                        cfab.set(&c, comp, rhs - div[comp]);
                    }
                    continue;
                }
                let interior = neighborhood::<D>().all(|o| {
                    let q = offset_by(&center, &o);
                    fine.ba.contains(&q) && fine.node_kind(&q) == NodeKind::Interior
                });
                if !interior {
                    continue;
                }
                for comp in 0..ncomp {
                    let mut sum = 0.0;
                    let mut total = 0.0;
                    for o in neighborhood::<D>() {
                        let w: f64 = o.iter().map(|&k| if k == 0 { 2.0 } else { 1.0 }).product();
                        if let Some(v) = fine_res.value_at(&offset_by(&center, &o), comp) {
                            sum += w * v;
                            total += w;
                        }
                    }
                    cfab.set(&c, comp, sum / total);
                }
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Geometry, NodeBox};
    use crate::interpolator::LinearInterpolator;
    use amrel_model::{LinearIsotropic, Model};
    use approx::assert_relative_eq;

    fn hierarchy(n: usize, max_grid: usize) -> AmrHierarchy<2> {
        let geom = Geometry::new([n, n], [0.0; 2], [1.0; 2], [false; 2]).unwrap();
        AmrHierarchy::new(geom, max_grid).unwrap()
    }

    fn field(op: &ElasticOperator<2>, ncomp: usize) -> MultiFab<2> {
        let l = op.level(0, 0);
        MultiFab::new(&l.ba, &l.dm, ncomp, 1, 0.0)
    }

    #[test]
    fn interior_rows_match_divergence_of_stress() {
        let amr = hierarchy(8, 4);
        let mut op = ElasticOperator::new(&amr, OperatorInfo::default()).unwrap();
        op.set_uniform_model(&LinearIsotropic::new(1.0, 1.0));
        op.prepare_for_solve().unwrap();
        let geom = op.level(0, 0).geom.clone();
        // u = (x², xy): div σ = ((λ+2μ)·2 + (λ+μ), 0) = (8, 0)
        let mut u = field(&op, 2);
        u.fill_valid(|p, c| {
            let [x, y] = geom.node_position(p);
            if c == 0 { x * x } else { x * y }
        });
        u.fill_boundary(&geom);
        let mut f = field(&op, 2);
        op.fapply(0, 0, &mut f, &u).unwrap();
        for p in geom.domain().iter() {
            let [x, y] = geom.node_position(&p);
            let (fx, fy) = (f.value_at(&p, 0).unwrap(), f.value_at(&p, 1).unwrap());
            if geom.on_domain_boundary(&p) {
                assert_relative_eq!(fx, x * x, epsilon = 1e-12);
                assert_relative_eq!(fy, x * y, epsilon = 1e-12);
            } else {
                assert_relative_eq!(fx, 8.0, epsilon = 1e-9);
                assert_relative_eq!(fy, 0.0, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn diagonal_matches_unit_perturbations() {
        let amr = hierarchy(8, 4);
        let mut op = ElasticOperator::new(&amr, OperatorInfo::default()).unwrap();
        let level = op.level(0, 0).clone();
        let mut models = FabArray::new(&level.ba, &level.dm, 1, 1, Model::<2>::IsotropicLinear(LinearIsotropic::new(1.0, 1.0)));
        models.fill_valid(|p, _| {
            let s = 1.0 + 0.1 * (p[0] + 2 * p[1]) as f64;
            Model::IsotropicLinear(LinearIsotropic::new(2.0 * s, s))
        });
        op.set_model(0, &models).unwrap();
        let mut bc = ElasticBc::<2>::default();
        let xhi: Location<2> = "xhi".parse().unwrap();
        bc.set(&xhi, 0, BcType::Traction, LinearInterpolator::default());
        bc.set(&xhi, 1, BcType::Traction, LinearInterpolator::default());
        op.set_bc(bc).unwrap();
        op.prepare_for_solve().unwrap();

        let mut diag = field(&op, 2);
        op.diagonal(0, 0, &mut diag).unwrap();
        for p in [[3, 4], [0, 5], [8, 3], [8, 8], [1, 1]] {
            for comp in 0..2 {
                let mut u = field(&op, 2);
                u.fill_valid(|q, c| if *q == p && c == comp { 1.0 } else { 0.0 });
                u.fill_boundary(&level.geom);
                let mut f = field(&op, 2);
                op.fapply(0, 0, &mut f, &u).unwrap();
                assert_relative_eq!(
                    diag.value_at(&p, comp).unwrap(),
                    f.value_at(&p, comp).unwrap(),
                    epsilon = 1e-9
                );
            }
        }
        assert_eq!(diag.value_at(&[0, 5], 0), Some(1.0));
        assert!(op.is_identity_row(0, 0, &[0, 5], 1));
        assert!(!op.is_identity_row(0, 0, &[8, 3], 0));
    }

    #[test]
    fn apply_is_linear_in_u() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let amr = hierarchy(8, 4);
        let mut op = ElasticOperator::new(&amr, OperatorInfo::default()).unwrap();
        op.set_uniform_model(&LinearIsotropic::new(3.0, 0.7));
        op.set_bc(ElasticBc::uniform(BcType::Traction, 0.0)).unwrap();
        op.prepare_for_solve().unwrap();
        let geom = op.level(0, 0).geom.clone();

        let mut rng = StdRng::seed_from_u64(7);
        let mut random_field = || {
            let mut u = field(&op, 2);
            let values: Vec<f64> = (0..81 * 2).map(|_| rng.gen_range(-1.0..1.0)).collect();
            u.fill_valid(|p, c| values[(p[0] * 9 + p[1]) as usize * 2 + c]);
            u.fill_boundary(&geom);
            u
        };
        let (u, v) = (random_field(), random_field());
        let mut w = v.clone();
        w.saxpy(2.0, &u).unwrap();
        w.fill_boundary(&geom);

        let apply = |x: &MultiFab<2>| {
            let mut f = field(&op, 2);
            op.fapply(0, 0, &mut f, x).unwrap();
            f
        };
        let (au, av, aw) = (apply(&u), apply(&v), apply(&w));
        for p in geom.domain().iter() {
            for c in 0..2 {
                let expected = 2.0 * au.value_at(&p, c).unwrap() + av.value_at(&p, c).unwrap();
                assert_relative_eq!(aw.value_at(&p, c).unwrap(), expected, epsilon = 1e-9, max_relative = 1e-12);
            }
        }
    }

    #[test]
    fn solve_preconditions() {
        let amr = hierarchy(4, 8);
        let mut op = ElasticOperator::new(&amr, OperatorInfo::default()).unwrap();
        assert!(matches!(op.prepare_for_solve(), Err(SolverError::ModelNotSet(0))));

        op.set_uniform_model(&LinearIsotropic::new(1.0, 1.0));
        let mut u = field(&op, 2);
        u.fab_mut(0).set(&[2, 2], 1, f64::INFINITY);
        let mut f = field(&op, 2);
        match op.fapply(0, 0, &mut f, &u) {
            Err(SolverError::NonFinite { field, index, component, .. }) => {
                assert_eq!(field, "u");
                assert_eq!(index, vec![2, 2]);
                assert_eq!(component, 1);
            }
            other => panic!("unexpected {other:?}"),
        }

        let mut periodic = ElasticBc::<2>::default();
        let ylo: Location<2> = "ylo".parse().unwrap();
        periodic.set(&ylo, 0, BcType::Periodic, LinearInterpolator::default());
        assert!(matches!(op.set_bc(periodic), Err(SolverError::InvalidBc(_))));
    }

    #[test]
    fn zero_displacement_boundary_rows_have_no_residual() {
        let amr = hierarchy(8, 4);
        let mut op = ElasticOperator::new(&amr, OperatorInfo::default()).unwrap();
        op.set_uniform_model(&LinearIsotropic::new(1.0, 1.0));
        op.set_bc(ElasticBc::uniform(BcType::Displacement, 0.3)).unwrap();
        op.set_homogeneous(true);
        op.prepare_for_solve().unwrap();
        let geom = op.level(0, 0).geom.clone();

        let mut u = field(&op, 2);
        u.fill_valid(|p, c| if geom.on_domain_boundary(p) { 0.0 } else { 1.0 + c as f64 });
        u.fill_boundary(&geom);
        let mut f = field(&op, 2);
        op.fapply(0, 0, &mut f, &u).unwrap();
        let mut rhs = field(&op, 2);
        op.init_rhs(0, &mut rhs).unwrap();
        rhs.minus_valid(&f).unwrap();

        let mut boundary = 0;
        for p in geom.domain().iter().filter(|p| geom.on_domain_boundary(p)) {
            for c in 0..2 {
                assert_eq!(f.value_at(&p, c), Some(0.0), "{p:?}");
                assert_eq!(rhs.value_at(&p, c), Some(0.0), "{p:?}");
            }
            boundary += 1;
        }
        assert_eq!(boundary, 4 * 8);
    }

    #[test]
    fn rows_and_diagnostics_need_a_model() {
        use crate::multigrid::{Multigrid, MultigridConfig};

        let mut amr = hierarchy(8, 8);
        amr.refine(NodeBox::new([4, 4], [12, 12])).unwrap();
        let mut op = ElasticOperator::new(&amr, OperatorInfo::default()).unwrap();
        let u = field(&op, 2);
        let mut f = field(&op, 2);
        let not_set = |r: Result<()>| matches!(r, Err(SolverError::ModelNotSet(0)));
        assert!(not_set(op.fapply(0, 0, &mut f, &u)));
        assert!(not_set(op.diagonal(0, 0, &mut f)));
        assert!(not_set(op.strain(0, &u, true).map(drop)));
        assert!(not_set(op.stress(0, &u, false).map(drop)));
        assert!(not_set(op.energy(0, &u).map(drop)));

        let fine = op.level(1, 0).clone();
        let mut sol = vec![u.clone(), MultiFab::new(&fine.ba, &fine.dm, 2, 1, 0.0)];
        let rhs = vec![f.clone(), MultiFab::new(&fine.ba, &fine.dm, 2, 1, 0.0)];
        let info = Multigrid::new(&op, MultigridConfig::default()).solve(&mut sol, &rhs, 1e-8, 1e-10);
        assert!(matches!(info, Err(SolverError::ModelNotSet(0))), "{info:?}");

        // a model on the coarse level only leaves the fine level unusable
        let base = op.level(0, 0).clone();
        op.set_model(0, &FabArray::new(&base.ba, &base.dm, 1, 1, LinearIsotropic::new(1.0, 1.0)))
            .unwrap();
        assert!(op.fapply(0, 0, &mut f, &u).is_ok());
        let mut ffine = MultiFab::new(&fine.ba, &fine.dm, 2, 0, 0.0);
        assert!(matches!(op.diagonal(1, 0, &mut ffine), Err(SolverError::ModelNotSet(1))));
        let info = Multigrid::new(&op, MultigridConfig::default()).solve(&mut sol, &rhs, 1e-8, 1e-10);
        assert!(matches!(info, Err(SolverError::ModelNotSet(1))), "{info:?}");
    }

    #[test]
    fn coarsens_level_zero_and_averages_stiffness() {
        let amr = hierarchy(16, 8);
        let mut op = ElasticOperator::new(&amr, OperatorInfo::default()).unwrap();
        assert_eq!(op.num_mg_levels(0), 4);
        let capped = ElasticOperator::new(&amr, OperatorInfo { max_coarsening_level: 1 }).unwrap();
        assert_eq!(capped.num_mg_levels(0), 2);

        let c = Stiffness::<2>::isotropic(3.0, 2.0);
        op.set_uniform_model(&LinearIsotropic::new(3.0, 2.0));
        op.prepare_for_solve().unwrap();
        for mglev in 1..4 {
            let coarse = op.stiffness(0, mglev);
            let geom = &op.level(0, mglev).geom;
            for p in geom.domain().iter() {
                assert_relative_eq!((coarse.value_at(&p, 0).unwrap() - c).norm(), 0.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn fine_stiffness_is_injected_under_the_fine_level() {
        let mut amr = hierarchy(8, 8);
        amr.refine(NodeBox::new([4, 4], [12, 12])).unwrap();
        let mut op = ElasticOperator::new(&amr, OperatorInfo::default()).unwrap();
        let soft = Model::<2>::IsotropicLinear(LinearIsotropic::new(1.0, 1.0));
        let stiff = Model::<2>::IsotropicLinear(LinearIsotropic::new(5.0, 5.0));
        for (amrlev, m) in [(0, soft), (1, stiff)] {
            let l = op.level(amrlev, 0).clone();
            op.set_model(amrlev, &FabArray::new(&l.ba, &l.dm, 1, 1, m)).unwrap();
        }
        op.prepare_for_solve().unwrap();
        let c0 = op.stiffness(0, 0);
        assert_relative_eq!(c0.value_at(&[3, 3], 0).unwrap().get(0, 0, 0, 0), 15.0);
        assert_relative_eq!(c0.value_at(&[1, 1], 0).unwrap().get(0, 0, 0, 0), 3.0);
    }

    #[test]
    fn reflux_averages_interior_fine_residual() {
        let mut amr = hierarchy(8, 8);
        amr.refine(NodeBox::new([4, 4], [12, 12])).unwrap();
        let mut op = ElasticOperator::new(&amr, OperatorInfo::default()).unwrap();
        op.set_uniform_model(&LinearIsotropic::new(1.0, 1.0));
        let mut crse = field(&op, 2);
        crse.set_val(-1.0);
        let (csol, crhs) = (field(&op, 2), field(&op, 2));
        let fl = op.level(1, 0).clone();
        let fsol = MultiFab::new(&fl.ba, &fl.dm, 2, 1, 0.0);
        let mut fine = MultiFab::new(&fl.ba, &fl.dm, 2, 1, 0.0);
        fine.fill_valid(|p, _| p[0] as f64);
        op.reflux(0, &mut crse, &csol, &crhs, &fine, &fsol).unwrap();
        // (1,2,1) weights keep a linear fine field
        assert_relative_eq!(crse.value_at(&[4, 4], 0).unwrap(), 8.0, epsilon = 1e-12);
        assert_relative_eq!(crse.value_at(&[3, 5], 1).unwrap(), 6.0, epsilon = 1e-12);
        // edge nodes balance stresses, none for a zero solution
        assert_eq!(crse.value_at(&[2, 4], 0), Some(0.0));
        assert_eq!(crse.value_at(&[6, 6], 1), Some(0.0));
        assert_eq!(crse.value_at(&[0, 0], 0), Some(-1.0));
        assert_eq!(crse.value_at(&[1, 4], 0), Some(-1.0));
    }

    #[test]
    fn interface_residual_balances_fine_and_coarse_stress() {
        use crate::multigrid::{Multigrid, MultigridConfig};

        let mut amr = hierarchy(8, 8);
        amr.refine(NodeBox::new([4, 4], [12, 12])).unwrap();
        let mut op = ElasticOperator::new(&amr, OperatorInfo::default()).unwrap();
        op.set_uniform_model(&LinearIsotropic::new(1.0, 1.0));
        op.prepare_for_solve().unwrap();
        let (cg, fl) = (op.level(0, 0).geom.clone(), op.level(1, 0).clone());
        let (alpha, beta) = (0.1, 0.2);

        let mut csol = field(&op, 2);
        csol.fill_valid(|p, c| if c == 0 { beta * cg.node_position(p)[0] } else { 0.0 });
        let rhs = vec![field(&op, 2), MultiFab::new(&fl.ba, &fl.dm, 2, 1, 0.0)];
        let fine_with = |kink: f64| {
            let mut f = MultiFab::new(&fl.ba, &fl.dm, 2, 1, 0.0);
            f.fill_valid(|p, c| {
                let x = fl.geom.node_position(p)[0];
                if c == 0 { beta * x + kink * (x - 0.25) } else { 0.0 }
            });
            f
        };
        let mg = Multigrid::new(&op, MultigridConfig::default());

        // one linear field across both levels balances exactly
        let mut sol = vec![csol.clone(), fine_with(0.0)];
        let res = mg.composite_residual(&mut sol, &rhs).unwrap();
        for c in [[2, 4], [2, 2], [4, 6], [6, 2]] {
            for comp in 0..2 {
                assert_relative_eq!(res[0].value_at(&c, comp).unwrap(), 0.0, epsilon = 1e-12);
            }
        }

        // a kink on x = 1/4: fine σ_xx = 3(α + β), σ_yy = α + β, coarse
        // σ_xx = 3β, σ_yy = β, over a dual cell (1/8 + 1/16)/2 wide
        let mut sol = vec![csol, fine_with(alpha)];
        let res = mg.composite_residual(&mut sol, &rhs).unwrap();
        let w = 0.5 * (1.0 / 8.0 + 1.0 / 16.0);
        assert_relative_eq!(res[0].value_at(&[2, 4], 0).unwrap(), -3.0 * alpha / w, epsilon = 1e-9);
        assert_relative_eq!(res[0].value_at(&[2, 4], 1).unwrap(), 0.0, epsilon = 1e-9);
        // the corner also crosses y = 1/4
        assert_relative_eq!(res[0].value_at(&[2, 2], 0).unwrap(), -3.0 * alpha / w, epsilon = 1e-9);
        assert_relative_eq!(res[0].value_at(&[2, 2], 1).unwrap(), -alpha / w, epsilon = 1e-9);
        // the lower edge sees the jump in σ_yy
        assert_relative_eq!(res[0].value_at(&[4, 2], 1).unwrap(), -alpha / w, epsilon = 1e-9);
    }

    #[test]
    fn strain_stress_and_energy() {
        let amr = hierarchy(4, 8);
        let mut op = ElasticOperator::new(&amr, OperatorInfo::default()).unwrap();
        op.set_uniform_model(&LinearIsotropic::new(1.0, 2.0));
        let geom = op.level(0, 0).geom.clone();
        let mut u = field(&op, 2);
        u.fill_valid(|p, c| if c == 0 { 0.01 * geom.node_position(p)[0] } else { 0.0 });

        let eps = op.strain(0, &u, true).unwrap();
        assert_eq!(eps.ncomp(), 3);
        assert_relative_eq!(eps.value_at(&[0, 0], 0).unwrap(), 0.01, epsilon = 1e-12);
        assert_relative_eq!(eps.value_at(&[2, 3], 2).unwrap(), 0.0, epsilon = 1e-12);

        let sig = op.stress(0, &u, false).unwrap();
        assert_eq!(sig.ncomp(), 4);
        // σ_xx = (λ + 2μ) ε_xx, σ_yy = λ ε_xx
        assert_relative_eq!(sig.value_at(&[4, 2], 0).unwrap(), 0.05, epsilon = 1e-12);
        assert_relative_eq!(sig.value_at(&[4, 2], 3).unwrap(), 0.01, epsilon = 1e-12);

        let w = op.energy(0, &u).unwrap();
        assert_relative_eq!(w.value_at(&[1, 1], 0).unwrap(), 0.5 * 0.01 * 0.05, epsilon = 1e-14);

        let fluxes = op.fflux(0).unwrap();
        assert_eq!(fluxes.len(), 2);
        assert_eq!(fluxes[1].norm0_all(), 0.0);
    }
}
