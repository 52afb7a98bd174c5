//! Per-node model fields from phase indicators.

use crate::error::{Result, SolverError};
use crate::field::{FabArray, MultiFab};
use crate::grid::Geometry;
use amrel_model::Model;
use rayon::prelude::*;

/// Blend `models` at every node of `eta` with [`Model::combine`].
///
/// `eta` carries one weight per model, or a single fraction `η` when two
/// models are given, read as weights `(1 − η, η)`. The result has one ghost
/// node, filled.
pub fn blend_models<const D: usize>(
    models: &[Model<D>],
    eta: &MultiFab<D>,
    geom: &Geometry<D>,
) -> Result<FabArray<Model<D>, D>> {
    let Some(first) = models.first() else {
        return Err(SolverError::Config("no models to blend".to_string()));
    };
    let two_phase = eta.ncomp() == 1 && models.len() == 2;
    if !two_phase && eta.ncomp() != models.len() {
        return Err(SolverError::LayoutMismatch(format!(
            "{} models but {} phase fields",
            models.len(),
            eta.ncomp()
        )));
    }
    eta.check_finite("eta", 0, 0)?;

    let mut out = FabArray::like(eta, 1, 1, *first);
    out.fabs_mut()
        .par_iter_mut()
        .zip(eta.fabs().par_iter())
        .try_for_each(|(mfab, efab)| -> Result<()> {
            let valid = *mfab.valid_box();
            let mut weights = vec![0.0; models.len()];
            for p in valid.iter() {
                if two_phase {
                    let e = efab.get(&p, 0);
                    weights[0] = 1.0 - e;
                    weights[1] = e;
                } else {
                    for (n, w) in weights.iter_mut().enumerate() {
                        *w = efab.get(&p, n);
                    }
                }
                mfab.set(&p, 0, Model::combine(models, &weights)?);
            }
            Ok(())
        })?;
    out.fill_boundary(geom);
    Ok(out)
}
