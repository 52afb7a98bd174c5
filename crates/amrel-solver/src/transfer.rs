//! Transfers between a level and the level coarsened by two.
//!
//! Coarse node `c` coincides with fine node `2c`. Restriction averages the
//! fine neighborhood `2c + {-1, 0, 1}^D` with tensor-product `(1, 2, 1)`
//! weights; prolongation is multilinear interpolation.

use crate::field::{FabArray, MultiFab};
use crate::grid::{Geometry, IntVect, neighborhood, offset_by};
use rayon::prelude::*;
use std::ops::{Add, Mul};

const RATIO: i64 = 2;

/// What restriction does at coarse nodes on a non-periodic domain face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryRule {
    /// Take the coincident fine value
    Inject,
    /// Average over the in-domain part of the neighborhood
    Average,
}

#[inline]
fn weight<const D: usize>(o: &IntVect<D>) -> f64 {
    o.iter().map(|&k| if k == 0 { 2.0 } else { 1.0 }).product()
}

#[inline]
fn fine_image<const D: usize>(c: &IntVect<D>) -> IntVect<D> {
    c.map(|v| v * RATIO)
}

/// Full-weighting restriction of every valid coarse node.
///
/// The weights of fine neighbors outside the domain (or missing from the
/// fine layout) are dropped and the rest renormalized.
pub fn restrict<T, const D: usize>(
    fine: &FabArray<T, D>,
    fgeom: &Geometry<D>,
    coarse: &mut FabArray<T, D>,
    cgeom: &Geometry<D>,
    rule: BoundaryRule,
) where
    T: Copy + Send + Sync + Add<Output = T> + Mul<f64, Output = T>,
{
    let ncomp = coarse.ncomp().min(fine.ncomp());
    coarse.fabs_mut().par_iter_mut().for_each(|fab| {
        let valid = *fab.valid_box();
        for c in valid.iter() {
            let center = fine_image(&c);
            let inject = rule == BoundaryRule::Inject && cgeom.on_domain_boundary(&c);
            for comp in 0..ncomp {
                let value = if inject {
                    fine.value_at_wrapped(fgeom, &center, comp)
                } else {
                    let mut acc: Option<T> = None;
                    let mut total = 0.0;
                    for o in neighborhood::<D>() {
                        let q = offset_by(&center, &o);
                        if let Some(v) = fine.value_at_wrapped(fgeom, &q, comp) {
                            let w = weight(&o);
                            total += w;
                            acc = Some(match acc {
                                Some(a) => a + v * w,
                                None => v * w,
                            });
                        }
                    }
                    acc.map(|a| a * (1.0 / total))
                };
                if let Some(v) = value {
                    fab.set(&c, comp, v);
                }
            }
        }
    });
}

/// Multilinear interpolation of a coarse field at fine node `p`.
pub fn interpolate<const D: usize>(
    coarse: &MultiFab<D>,
    cgeom: &Geometry<D>,
    p: &IntVect<D>,
    comp: usize,
) -> Option<f64> {
    let base: IntVect<D> = p.map(|v| v.div_euclid(RATIO));
    let odd: [bool; D] = std::array::from_fn(|d| p[d].rem_euclid(RATIO) != 0);
    let ncorner = 1usize << odd.iter().filter(|&&o| o).count();
    let mut sum = 0.0;
    for corner in 0..ncorner {
        let mut q = base;
        let mut bit = 0;
        for d in 0..D {
            if odd[d] {
                q[d] += ((corner >> bit) & 1) as i64;
                bit += 1;
            }
        }
        sum += coarse.value_at_wrapped(cgeom, &q, comp)?;
    }
    Some(sum / ncorner as f64)
}

/// `fine += P coarse` at the valid fine nodes selected by `filter`.
pub fn prolong_add<const D: usize>(
    coarse: &MultiFab<D>,
    cgeom: &Geometry<D>,
    fine: &mut MultiFab<D>,
    filter: impl Fn(&IntVect<D>) -> bool + Sync,
) {
    let ncomp = fine.ncomp().min(coarse.ncomp());
    fine.fabs_mut().par_iter_mut().for_each(|fab| {
        let valid = *fab.valid_box();
        for p in valid.iter().filter(|p| filter(p)) {
            for comp in 0..ncomp {
                if let Some(v) = interpolate(coarse, cgeom, &p, comp) {
                    *fab.get_mut(&p, comp) += v;
                }
            }
        }
    });
}

/// Overwrite every coarse node that coincides with a fine valid node.
pub fn inject<T, const D: usize>(fine: &FabArray<T, D>, coarse: &mut FabArray<T, D>)
where
    T: Copy + Send + Sync,
{
    let ncomp = coarse.ncomp().min(fine.ncomp());
    coarse.fabs_mut().par_iter_mut().for_each(|fab| {
        let valid = *fab.valid_box();
        for c in valid.iter() {
            let f = fine_image(&c);
            for comp in 0..ncomp {
                if let Some(v) = fine.value_at(&f, comp) {
                    fab.set(&c, comp, v);
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{BoxArray, DistributionMapping, NodeBox};
    use approx::assert_relative_eq;

    fn fine_and_coarse(n: usize) -> (Geometry<2>, MultiFab<2>, Geometry<2>, MultiFab<2>) {
        let fgeom = Geometry::new([n, n], [0.0; 2], [1.0; 2], [false; 2]).unwrap();
        let cgeom = fgeom.coarsen(2).unwrap();
        let fba = BoxArray::chop(fgeom.domain(), 4);
        let cba = BoxArray::single(*cgeom.domain());
        let fine = MultiFab::new(&fba, &DistributionMapping::for_boxes(fba.len()), 2, 1, 0.0);
        let coarse = MultiFab::new(&cba, &DistributionMapping::for_boxes(1), 2, 1, 0.0);
        (fgeom, fine, cgeom, coarse)
    }

    #[test]
    fn restriction_preserves_linear_fields() {
        let (fgeom, mut fine, cgeom, mut coarse) = fine_and_coarse(8);
        fine.fill_valid(|p, c| 1.0 + p[0] as f64 - 0.5 * p[1] as f64 + c as f64);
        restrict(&fine, &fgeom, &mut coarse, &cgeom, BoundaryRule::Inject);
        for p in cgeom.domain().iter() {
            let expected = 1.0 + 2.0 * p[0] as f64 - p[1] as f64;
            assert_relative_eq!(coarse.value_at(&p, 0).unwrap(), expected, epsilon = 1e-12);
            assert_relative_eq!(coarse.value_at(&p, 1).unwrap(), expected + 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn boundary_rule_injects() {
        let (fgeom, mut fine, cgeom, mut coarse) = fine_and_coarse(8);
        fine.fill_valid(|p, _| (p[0] * p[0]) as f64);
        restrict(&fine, &fgeom, &mut coarse, &cgeom, BoundaryRule::Inject);
        // on the face: the coincident fine value
        assert_eq!(coarse.value_at(&[2, 0], 0), Some(16.0));
        // inside: (1,2,1) average of x² around x = 4, i.e. 16 + 1/2
        assert_relative_eq!(coarse.value_at(&[2, 2], 0).unwrap(), 16.5, epsilon = 1e-12);
    }

    #[test]
    fn prolongation_is_exact_for_bilinear_fields() {
        let (fgeom, mut fine, cgeom, mut coarse) = fine_and_coarse(8);
        let f = |x: f64, y: f64| 2.0 + x - 3.0 * y + 0.5 * x * y;
        coarse.fill_valid(|p, _| f(2.0 * p[0] as f64, 2.0 * p[1] as f64));
        fine.set_val(1.0);
        prolong_add(&coarse, &cgeom, &mut fine, |_| true);
        for p in fgeom.domain().iter() {
            let expected = 1.0 + f(p[0] as f64, p[1] as f64);
            assert_relative_eq!(fine.value_at(&p, 0).unwrap(), expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn injection_only_touches_covered_nodes() {
        let geom = Geometry::new([8, 8], [0.0; 2], [1.0; 2], [false; 2]).unwrap();
        let cba = BoxArray::single(*geom.domain());
        let mut coarse = MultiFab::new(&cba, &DistributionMapping::for_boxes(1), 1, 0, -1.0);
        let fba = BoxArray::single(NodeBox::new([4, 4], [10, 10]));
        let mut fine = MultiFab::new(&fba, &DistributionMapping::for_boxes(1), 1, 0, 0.0);
        fine.fill_valid(|p, _| p[0] as f64);
        inject(&fine, &mut coarse);
        assert_eq!(coarse.value_at(&[2, 3], 0), Some(4.0));
        assert_eq!(coarse.value_at(&[5, 5], 0), Some(10.0));
        assert_eq!(coarse.value_at(&[1, 3], 0), Some(-1.0));
        assert_eq!(coarse.value_at(&[6, 3], 0), Some(-1.0));
    }
}
