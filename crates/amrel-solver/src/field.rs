//! Distributed nodal fields.
//!
//! A [`BaseFab`] is one box of data (valid nodes plus a ghost layer); a
//! [`FabArray`] holds one fab per box of a [`BoxArray`]. Fabs are processed
//! in parallel with rayon. [`MultiFab`] is the `f64` specialization used for
//! displacements, residuals and right-hand sides.

use crate::error::{Result, SolverError};
use crate::grid::{BoxArray, DistributionMapping, Geometry, IntVect, NodeBox};
use rayon::prelude::*;

/// Data on one box: `ncomp` components over the valid box grown by `ngrow`.
#[derive(Debug, Clone)]
pub struct BaseFab<T, const D: usize> {
    valid: NodeBox<D>,
    grown: NodeBox<D>,
    ncomp: usize,
    npts: usize,
    data: Vec<T>,
}

impl<T: Copy, const D: usize> BaseFab<T, D> {
    pub fn new(valid: NodeBox<D>, ngrow: usize, ncomp: usize, init: T) -> Self {
        let grown = valid.grow(ngrow as i64);
        let npts = grown.num_points();
        Self {
            valid,
            grown,
            ncomp,
            npts,
            data: vec![init; npts * ncomp],
        }
    }

    pub fn valid_box(&self) -> &NodeBox<D> {
        &self.valid
    }

    pub fn grown_box(&self) -> &NodeBox<D> {
        &self.grown
    }

    pub fn ncomp(&self) -> usize {
        self.ncomp
    }

    #[inline]
    fn index(&self, p: &IntVect<D>, comp: usize) -> usize {
        debug_assert!(comp < self.ncomp);
        comp * self.npts + self.grown.offset(p)
    }

    #[inline]
    pub fn get(&self, p: &IntVect<D>, comp: usize) -> T {
        self.data[self.index(p, comp)]
    }

    #[inline]
    pub fn set(&mut self, p: &IntVect<D>, comp: usize, value: T) {
        let idx = self.index(p, comp);
        self.data[idx] = value;
    }

    #[inline]
    pub fn get_mut(&mut self, p: &IntVect<D>, comp: usize) -> &mut T {
        let idx = self.index(p, comp);
        &mut self.data[idx]
    }

    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

/// One [`BaseFab`] per box of a [`BoxArray`].
#[derive(Debug, Clone)]
pub struct FabArray<T, const D: usize> {
    ba: BoxArray<D>,
    dm: DistributionMapping,
    ncomp: usize,
    ngrow: usize,
    fabs: Vec<BaseFab<T, D>>,
}

/// Nodal `f64` field.
pub type MultiFab<const D: usize> = FabArray<f64, D>;

impl<T: Copy + Send + Sync, const D: usize> FabArray<T, D> {
    pub fn new(ba: &BoxArray<D>, dm: &DistributionMapping, ncomp: usize, ngrow: usize, init: T) -> Self {
        let fabs = ba
            .boxes()
            .iter()
            .map(|b| BaseFab::new(*b, ngrow, ncomp, init))
            .collect();
        Self {
            ba: ba.clone(),
            dm: dm.clone(),
            ncomp,
            ngrow,
            fabs,
        }
    }

    /// Same layout as `other`, with its own component count and ghost width.
    pub fn like<U>(other: &FabArray<U, D>, ncomp: usize, ngrow: usize, init: T) -> Self {
        Self::new(&other.ba, &other.dm, ncomp, ngrow, init)
    }

    pub fn box_array(&self) -> &BoxArray<D> {
        &self.ba
    }

    pub fn dist_map(&self) -> &DistributionMapping {
        &self.dm
    }

    pub fn ncomp(&self) -> usize {
        self.ncomp
    }

    pub fn ngrow(&self) -> usize {
        self.ngrow
    }

    pub fn len(&self) -> usize {
        self.fabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fabs.is_empty()
    }

    pub fn fab(&self, i: usize) -> &BaseFab<T, D> {
        &self.fabs[i]
    }

    pub fn fab_mut(&mut self, i: usize) -> &mut BaseFab<T, D> {
        &mut self.fabs[i]
    }

    pub fn fabs(&self) -> &[BaseFab<T, D>] {
        &self.fabs
    }

    pub fn fabs_mut(&mut self) -> &mut [BaseFab<T, D>] {
        &mut self.fabs
    }

    /// Same boxes and distribution.
    pub fn same_layout<U>(&self, other: &FabArray<U, D>) -> bool {
        self.ba == other.ba && self.dm == other.dm
    }

    pub fn check_layout<U>(&self, other: &FabArray<U, D>, what: &str) -> Result<()> {
        if self.same_layout(other) {
            Ok(())
        } else {
            Err(SolverError::LayoutMismatch(format!(
                "{what}: {} boxes vs {} boxes",
                self.ba.len(),
                other.ba.len()
            )))
        }
    }

    pub fn set_val(&mut self, value: T) {
        self.fabs.par_iter_mut().for_each(|fab| fab.fill(value));
    }

    /// Copy valid and ghost data from `src`.
    pub fn copy_from(&mut self, src: &Self) -> Result<()> {
        self.check_layout(src, "copy")?;
        if self.ncomp != src.ncomp || self.ngrow != src.ngrow {
            return Err(SolverError::LayoutMismatch(format!(
                "copy: ({} comps, {} ghosts) vs ({} comps, {} ghosts)",
                self.ncomp, self.ngrow, src.ncomp, src.ngrow
            )));
        }
        self.fabs
            .par_iter_mut()
            .zip(src.fabs.par_iter())
            .for_each(|(dst, s)| dst.data.copy_from_slice(&s.data));
        Ok(())
    }

    /// Set every valid node from `f(p, comp)`.
    pub fn fill_valid(&mut self, f: impl Fn(&IntVect<D>, usize) -> T + Sync) {
        let ncomp = self.ncomp;
        self.fabs.par_iter_mut().for_each(|fab| {
            let valid = fab.valid;
            for p in valid.iter() {
                for c in 0..ncomp {
                    fab.set(&p, c, f(&p, c));
                }
            }
        });
    }

    /// Valid value at `p`, wherever it lives.
    pub fn value_at(&self, p: &IntVect<D>, comp: usize) -> Option<T> {
        self.ba.find(p).map(|i| self.fabs[i].get(p, comp))
    }

    /// Valid value at the periodic image of `p`.
    pub fn value_at_wrapped(&self, geom: &Geometry<D>, p: &IntVect<D>, comp: usize) -> Option<T> {
        geom.wrap(p).and_then(|q| self.value_at(&q, comp))
    }

    /// Fill ghost nodes from the valid nodes of neighboring boxes, including
    /// periodic images. Ghosts with no source are left untouched.
    pub fn fill_boundary(&mut self, geom: &Geometry<D>) {
        if self.ngrow == 0 {
            return;
        }
        let ncomp = self.ncomp;
        let this = &*self;
        // gather from the valid regions first, then write ghosts
        let updates: Vec<(Vec<usize>, Vec<T>)> = this
            .fabs
            .par_iter()
            .map(|fab| {
                let mut offsets = Vec::new();
                let mut values = Vec::new();
                for p in fab.grown.iter().filter(|p| !fab.valid.contains(p)) {
                    let Some(q) = geom.wrap(&p) else { continue };
                    let Some(src) = this.ba.find(&q) else { continue };
                    offsets.push(fab.grown.offset(&p));
                    values.extend((0..ncomp).map(|c| this.fabs[src].get(&q, c)));
                }
                (offsets, values)
            })
            .collect();

        self.fabs
            .par_iter_mut()
            .zip(updates.into_par_iter())
            .for_each(|(fab, (offsets, values))| {
                for (n, off) in offsets.iter().enumerate() {
                    for c in 0..ncomp {
                        fab.data[c * fab.npts + off] = values[n * ncomp + c];
                    }
                }
            });
    }
}

impl<const D: usize> FabArray<f64, D> {
    /// `self += a * x` over valid and ghost nodes.
    pub fn saxpy(&mut self, a: f64, x: &Self) -> Result<()> {
        self.check_layout(x, "saxpy")?;
        if self.ncomp != x.ncomp || self.ngrow != x.ngrow {
            return Err(SolverError::LayoutMismatch(format!(
                "saxpy: {} comps vs {} comps",
                self.ncomp, x.ncomp
            )));
        }
        self.fabs.par_iter_mut().zip(x.fabs.par_iter()).for_each(|(y, x)| {
            for (yv, xv) in y.data.iter_mut().zip(&x.data) {
                *yv += a * xv;
            }
        });
        Ok(())
    }

    /// `self[valid] -= x[valid]`, leaving ghosts alone.
    pub fn minus_valid(&mut self, x: &Self) -> Result<()> {
        self.check_layout(x, "minus")?;
        let ncomp = self.ncomp.min(x.ncomp);
        self.fabs.par_iter_mut().zip(x.fabs.par_iter()).for_each(|(y, x)| {
            for p in y.valid.iter() {
                for c in 0..ncomp {
                    *y.get_mut(&p, c) -= x.get(&p, c);
                }
            }
        });
        Ok(())
    }

    /// Max norm of one component over valid nodes.
    pub fn norm0(&self, comp: usize) -> f64 {
        self.fabs
            .par_iter()
            .map(|fab| fab.valid.iter().map(|p| fab.get(&p, comp).abs()).fold(0.0, f64::max))
            .reduce(|| 0.0, f64::max)
    }

    /// Max norm over all components.
    pub fn norm0_all(&self) -> f64 {
        (0..self.ncomp).map(|c| self.norm0(c)).fold(0.0, f64::max)
    }

    /// Fail with [`SolverError::NonFinite`] at the first NaN or Inf valid value.
    pub fn check_finite(&self, field: &'static str, amrlev: usize, mglev: usize) -> Result<()> {
        for fab in &self.fabs {
            for p in fab.valid.iter() {
                for c in 0..self.ncomp {
                    if !fab.get(&p, c).is_finite() {
                        return Err(SolverError::NonFinite {
                            field,
                            amrlev,
                            mglev,
                            index: p.to_vec(),
                            component: c,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
