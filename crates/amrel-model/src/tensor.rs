//! Fixed-size tensors used by the constitutive models.
//!
//! - [`Matrix`] / [`Vector`]: `nalgebra` fixed-size aliases
//! - [`Matrix3`]: third-order tensor, stored as `g[k][(l, j)]`
//! - [`Stiffness`]: dense fourth-order tensor `C_ijkl`
//! - [`Symmetry`]: symmetry class of a stiffness tensor

use nalgebra::{SMatrix, SVector};
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub};

/// Second-order tensor in `D` dimensions.
pub type Matrix<const D: usize> = SMatrix<f64, D, D>;

/// Vector in `D` dimensions.
pub type Vector<const D: usize> = SVector<f64, D>;

/// Third-order tensor; `g[k][(l, j)]` holds `u_{k,lj}` for a second gradient.
pub type Matrix3<const D: usize> = [Matrix<D>; D];

#[inline]
fn delta(i: usize, j: usize) -> f64 {
    if i == j { 1.0 } else { 0.0 }
}

/// Symmetry class of a stiffness tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Symmetry {
    /// No symmetry assumed
    None,
    /// `C_ijkl = C_klij`
    Major,
    /// `C_ijkl = C_jikl = C_ijlk`
    Minor,
    /// Major and minor symmetry
    MajorMinor,
    /// Only `C_ijij` is nonzero
    Diagonal,
    /// Invariant under any index permutation
    Full,
    /// Two constants (λ, μ)
    Isotropic,
}

impl Symmetry {
    /// Number of independent components stored for this class in `dim` dimensions.
    pub fn num_components(self, dim: usize) -> usize {
        let d2 = dim * dim;
        let voigt = dim * (dim + 1) / 2;
        match self {
            Symmetry::None => d2 * d2,
            Symmetry::Major => d2 * (d2 + 1) / 2,
            Symmetry::Minor => voigt * voigt,
            Symmetry::MajorMinor => voigt * (voigt + 1) / 2,
            Symmetry::Diagonal => d2,
            Symmetry::Full => (dim..dim + 4).product::<usize>() / 24,
            Symmetry::Isotropic => 2,
        }
    }

    /// True when a tensor of this class has minor symmetry.
    pub fn has_minor(self) -> bool {
        matches!(
            self,
            Symmetry::Minor | Symmetry::MajorMinor | Symmetry::Full | Symmetry::Isotropic
        )
    }

    /// True when a tensor of this class has major symmetry.
    pub fn has_major(self) -> bool {
        !matches!(self, Symmetry::None | Symmetry::Minor)
    }
}

/// Dense fourth-order stiffness tensor `C_ijkl`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stiffness<const D: usize> {
    c: [[[[f64; D]; D]; D]; D],
}

impl<const D: usize> Stiffness<D> {
    pub fn zero() -> Self {
        Self {
            c: [[[[0.0; D]; D]; D]; D],
        }
    }

    pub fn from_fn(mut f: impl FnMut(usize, usize, usize, usize) -> f64) -> Self {
        let mut c = [[[[0.0; D]; D]; D]; D];
        for (i, ci) in c.iter_mut().enumerate() {
            for (j, cij) in ci.iter_mut().enumerate() {
                for (k, cijk) in cij.iter_mut().enumerate() {
                    for (l, v) in cijk.iter_mut().enumerate() {
                        *v = f(i, j, k, l);
                    }
                }
            }
        }
        Self { c }
    }

    /// `C_ijkl = λ δ_ij δ_kl + μ (δ_ik δ_jl + δ_il δ_jk)`
    pub fn isotropic(lambda: f64, mu: f64) -> Self {
        Self::from_fn(|i, j, k, l| {
            lambda * delta(i, j) * delta(k, l)
                + mu * (delta(i, k) * delta(j, l) + delta(i, l) * delta(j, k))
        })
    }

    /// Cubic stiffness in the crystal frame, then rotated into the lab frame.
    pub fn cubic(c11: f64, c12: f64, c44: f64, rotation: &Matrix<D>) -> Self {
        let crystal = Self::from_fn(|i, j, k, l| {
            if i == j && k == l {
                if i == k { c11 } else { c12 }
            } else if (i == k && j == l) || (i == l && j == k) {
                c44
            } else {
                0.0
            }
        });
        crystal.rotate(rotation)
    }

    /// `C_ijkl = α_ij δ_ik δ_jl`
    pub fn diagonal(alpha: &Matrix<D>) -> Self {
        Self::from_fn(|i, j, k, l| alpha[(i, j)] * delta(i, k) * delta(j, l))
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize, l: usize) -> f64 {
        self.c[i][j][k][l]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, k: usize, l: usize, value: f64) {
        self.c[i][j][k][l] = value;
    }

    /// `σ_ij = C_ijkl x_kl`
    pub fn apply(&self, x: &Matrix<D>) -> Matrix<D> {
        Matrix::<D>::from_fn(|i, j| {
            let mut s = 0.0;
            for k in 0..D {
                for l in 0..D {
                    s += self.c[i][j][k][l] * x[(k, l)];
                }
            }
            s
        })
    }

    /// `f_i = C_ijkl g_{k,lj}`, the stiffness applied to a second gradient.
    pub fn apply_gradient(&self, g: &Matrix3<D>) -> Vector<D> {
        Vector::<D>::from_fn(|i, _| {
            let mut s = 0.0;
            for j in 0..D {
                for k in 0..D {
                    for l in 0..D {
                        s += self.c[i][j][k][l] * g[k][(l, j)];
                    }
                }
            }
            s
        })
    }

    /// `a : C : b`
    pub fn contract(&self, a: &Matrix<D>, b: &Matrix<D>) -> f64 {
        a.dot(&self.apply(b))
    }

    /// `C'_ijkl = R_ip R_jq R_kr R_ls C_pqrs`
    pub fn rotate(&self, r: &Matrix<D>) -> Self {
        // Contract one index at a time to keep this at D^5 work.
        let mut a = *self;
        for slot in 0..4 {
            let prev = a;
            a = Self::from_fn(|i, j, k, l| {
                let idx = [i, j, k, l];
                let mut s = 0.0;
                for p in 0..D {
                    let mut src = idx;
                    src[slot] = p;
                    s += r[(idx[slot], p)] * prev.c[src[0]][src[1]][src[2]][src[3]];
                }
                s
            });
        }
        a
    }

    /// Symmetrize over both minor index pairs.
    pub fn minor_symmetrized(&self) -> Self {
        Self::from_fn(|i, j, k, l| {
            0.25 * (self.c[i][j][k][l]
                + self.c[j][i][k][l]
                + self.c[i][j][l][k]
                + self.c[j][i][l][k])
        })
    }

    /// Frobenius norm.
    pub fn norm(&self) -> f64 {
        self.c
            .iter()
            .flatten()
            .flatten()
            .flatten()
            .map(|v| v * v)
            .sum::<f64>()
            .sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.c.iter().flatten().flatten().flatten().all(|v| v.is_finite())
    }

    pub fn has_major_symmetry(&self, tol: f64) -> bool {
        let scale = self.norm().max(f64::MIN_POSITIVE);
        self.all_indices()
            .all(|(i, j, k, l)| (self.c[i][j][k][l] - self.c[k][l][i][j]).abs() <= tol * scale)
    }

    pub fn has_minor_symmetry(&self, tol: f64) -> bool {
        let scale = self.norm().max(f64::MIN_POSITIVE);
        self.all_indices().all(|(i, j, k, l)| {
            (self.c[i][j][k][l] - self.c[j][i][k][l]).abs() <= tol * scale
                && (self.c[i][j][k][l] - self.c[i][j][l][k]).abs() <= tol * scale
        })
    }

    /// Check that the stored tensor respects `symmetry` to within `tol` (relative).
    pub fn satisfies(&self, symmetry: Symmetry, tol: f64) -> bool {
        (!symmetry.has_major() || self.has_major_symmetry(tol))
            && (!symmetry.has_minor() || self.has_minor_symmetry(tol))
    }

    fn all_indices(&self) -> impl Iterator<Item = (usize, usize, usize, usize)> {
        (0..D).flat_map(|i| {
            (0..D).flat_map(move |j| (0..D).flat_map(move |k| (0..D).map(move |l| (i, j, k, l))))
        })
    }

    fn zip_with(&self, other: &Self, f: impl Fn(f64, f64) -> f64) -> Self {
        Self::from_fn(|i, j, k, l| f(self.c[i][j][k][l], other.c[i][j][k][l]))
    }

    fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self::from_fn(|i, j, k, l| f(self.c[i][j][k][l]))
    }
}

impl<const D: usize> Default for Stiffness<D> {
    fn default() -> Self {
        Self::zero()
    }
}

impl<const D: usize> Add for Stiffness<D> {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        self.zip_with(&rhs, |a, b| a + b)
    }
}

impl<const D: usize> AddAssign for Stiffness<D> {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl<const D: usize> Sub for Stiffness<D> {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        self.zip_with(&rhs, |a, b| a - b)
    }
}

impl<const D: usize> Neg for Stiffness<D> {
    type Output = Self;
    fn neg(self) -> Self {
        self.map(|a| -a)
    }
}

impl<const D: usize> Mul<f64> for Stiffness<D> {
    type Output = Self;
    fn mul(self, alpha: f64) -> Self {
        self.map(|a| a * alpha)
    }
}

impl<const D: usize> Div<f64> for Stiffness<D> {
    type Output = Self;
    fn div(self, alpha: f64) -> Self {
        self.map(|a| a / alpha)
    }
}
