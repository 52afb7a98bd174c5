//! Per-location, per-direction boundary conditions for the elastic operator.
//!
//! A boundary node is classified by which non-periodic domain bounds it
//! sits on: one axis gives a face, two an edge (or a 2D corner), three a
//! 3D corner. Each of the `3^D - 1` locations carries a [`BcType`] and a
//! time-dependent target value per displacement direction.
//!
//! Rows supplied for a boundary node, direction `d`:
//!
//! | type         | row          |
//! |--------------|--------------|
//! | Displacement | `u_d`        |
//! | Traction     | `(σ·n)_d`    |
//! | Neumann      | `(∇u·n)_d`   |
//! | Periodic     | `0`          |

use crate::config::BcConfig;
use crate::error::{Result, SolverError};
use crate::field::MultiFab;
use crate::grid::{Geometry, IntVect};
use crate::interpolator::LinearInterpolator;
use amrel_model::{Matrix, Vector};
use log::warn;
use rayon::prelude::*;
use std::fmt;
use std::str::FromStr;

const AXES: [char; 3] = ['x', 'y', 'z'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BcType {
    #[default]
    Displacement,
    Traction,
    Neumann,
    Periodic,
}

impl FromStr for BcType {
    type Err = SolverError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "displacement" | "disp" => Ok(BcType::Displacement),
            "traction" | "trac" => Ok(BcType::Traction),
            "neumann" => Ok(BcType::Neumann),
            "periodic" => Ok(BcType::Periodic),
            other => Err(SolverError::InvalidBc(format!("unknown boundary type '{other}'"))),
        }
    }
}

impl fmt::Display for BcType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BcType::Displacement => "displacement",
            BcType::Traction => "traction",
            BcType::Neumann => "neumann",
            BcType::Periodic => "periodic",
        };
        f.write_str(s)
    }
}

/// Position of a node relative to the domain along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Interior,
    Lo,
    Hi,
}

impl Side {
    fn code(self) -> usize {
        match self {
            Side::Interior => 0,
            Side::Lo => 1,
            Side::Hi => 2,
        }
    }
}

/// A boundary feature: face, edge or corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location<const D: usize> {
    sides: [Side; D],
}

impl<const D: usize> Location<D> {
    pub const COUNT: usize = 3usize.pow(D as u32);

    pub fn new(sides: [Side; D]) -> Self {
        Self { sides }
    }

    /// Location of node `p`, or `None` for nodes off the non-periodic bounds.
    pub fn of(p: &IntVect<D>, geom: &Geometry<D>) -> Option<Self> {
        let dom = geom.domain();
        let sides = std::array::from_fn(|d| {
            if geom.is_periodic(d) {
                Side::Interior
            } else if p[d] == dom.lo[d] {
                Side::Lo
            } else if p[d] == dom.hi[d] {
                Side::Hi
            } else {
                Side::Interior
            }
        });
        let loc = Self { sides };
        (!loc.is_interior()).then_some(loc)
    }

    /// Every boundary location, faces first.
    pub fn all() -> Vec<Self> {
        let mut locs: Vec<Self> = (1..Self::COUNT).map(Self::from_index).collect();
        locs.sort_by_key(|l| l.order());
        locs
    }

    fn from_index(mut index: usize) -> Self {
        let sides = std::array::from_fn(|_| {
            let s = match index % 3 {
                0 => Side::Interior,
                1 => Side::Lo,
                _ => Side::Hi,
            };
            index /= 3;
            s
        });
        Self { sides }
    }

    pub fn index(&self) -> usize {
        self.sides.iter().rev().fold(0, |acc, s| acc * 3 + s.code())
    }

    pub fn sides(&self) -> &[Side; D] {
        &self.sides
    }

    pub fn is_interior(&self) -> bool {
        self.order() == 0
    }

    /// Number of axes at a bound.
    pub fn order(&self) -> usize {
        self.sides.iter().filter(|s| **s != Side::Interior).count()
    }

    /// True when this location can occur on a domain with the given periodicity.
    pub fn reachable(&self, periodic: &[bool; D]) -> bool {
        (0..D).all(|d| !periodic[d] || self.sides[d] == Side::Interior)
    }

    /// Outward unit normal: normalized sum of the adjoining face normals.
    pub fn normal(&self) -> Vector<D> {
        let k = self.order();
        if k == 0 {
            return Vector::<D>::zeros();
        }
        let s = (k as f64).sqrt().recip();
        Vector::<D>::from_fn(|d, _| match self.sides[d] {
            Side::Interior => 0.0,
            Side::Lo => -s,
            Side::Hi => s,
        })
    }

    /// Axes at a bound, in the order their names are written.
    fn named_axes(&self) -> Vec<usize> {
        let axes: Vec<usize> = (0..D).filter(|&d| self.sides[d] != Side::Interior).collect();
        // z-x edges are written z first
        if axes == [0, 2] { vec![2, 0] } else { axes }
    }
}

impl<const D: usize> fmt::Display for Location<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_interior() {
            return f.write_str("interior");
        }
        for d in self.named_axes() {
            let side = if self.sides[d] == Side::Lo { "lo" } else { "hi" };
            write!(f, "{}{side}", AXES[d])?;
        }
        Ok(())
    }
}

impl<const D: usize> FromStr for Location<D> {
    type Err = SolverError;

    /// Accepts any order of `<axis><lo|hi>` tokens, e.g. `xlo`, `yhixlo`, `zloxhi`.
    fn from_str(s: &str) -> Result<Self> {
        let bad = || SolverError::InvalidBc(format!("unknown boundary location '{s}' for {D}D"));
        let name = s.trim().to_ascii_lowercase();
        let mut sides = [Side::Interior; D];
        let mut rest = name.as_str();
        while !rest.is_empty() {
            let mut chars = rest.chars();
            let axis = chars
                .next()
                .and_then(|c| AXES.iter().position(|&a| a == c))
                .filter(|&a| a < D)
                .ok_or_else(bad)?;
            let side = match rest.get(1..3) {
                Some("lo") => Side::Lo,
                Some("hi") => Side::Hi,
                _ => return Err(bad()),
            };
            if sides[axis] != Side::Interior {
                return Err(bad());
            }
            sides[axis] = side;
            rest = &rest[3..];
        }
        let loc = Self { sides };
        if loc.is_interior() { Err(bad()) } else { Ok(loc) }
    }
}

/// Boundary condition table.
#[derive(Debug, Clone)]
pub struct ElasticBc<const D: usize> {
    types: Vec<[BcType; D]>,
    values: Vec<[LinearInterpolator; D]>,
    time: f64,
}

impl<const D: usize> Default for ElasticBc<D> {
    /// Homogeneous displacement everywhere.
    fn default() -> Self {
        Self {
            types: vec![[BcType::Displacement; D]; Location::<D>::COUNT],
            values: (0..Location::<D>::COUNT)
                .map(|_| std::array::from_fn(|_| LinearInterpolator::default()))
                .collect(),
            time: 0.0,
        }
    }
}

impl<const D: usize> ElasticBc<D> {
    /// Same type and value for every direction of every location.
    pub fn uniform(bc_type: BcType, value: f64) -> Self {
        let mut bc = Self::default();
        for loc in Location::<D>::all() {
            for dir in 0..D {
                bc.set(&loc, dir, bc_type, LinearInterpolator::constant(value));
            }
        }
        bc
    }

    /// Build from a configuration, defaulting missing locations to
    /// homogeneous displacement. Locations unreachable under `periodic`
    /// are not reported as defaulted.
    pub fn from_config(cfg: &BcConfig, periodic: &[bool; D]) -> Result<Self> {
        let mut bc = Self::default();
        let mut typed = vec![false; Location::<D>::COUNT];

        for (name, list) in &cfg.types {
            let loc: Location<D> = name.parse()?;
            if list.len() != D {
                return Err(SolverError::InvalidBc(format!(
                    "type.{name}: expected {D} entries, got {}",
                    list.len()
                )));
            }
            for (dir, t) in list.iter().enumerate() {
                bc.types[loc.index()][dir] = t.parse()?;
            }
            typed[loc.index()] = true;
        }

        for (name, list) in &cfg.val {
            let loc: Location<D> = name.parse()?;
            if list.len() != D {
                return Err(SolverError::InvalidBc(format!(
                    "val.{name}: expected {D} entries, got {}",
                    list.len()
                )));
            }
            for (dir, v) in list.iter().enumerate() {
                bc.values[loc.index()][dir] = v.clone();
            }
        }

        let defaulted: Vec<String> = Location::<D>::all()
            .into_iter()
            .filter(|l| l.reachable(periodic) && !typed[l.index()])
            .map(|l| l.to_string())
            .collect();
        if !defaulted.is_empty() {
            warn!(
                "no boundary type given for {}; using displacement = 0",
                defaulted.join(", ")
            );
        }
        Ok(bc)
    }

    pub fn set(&mut self, loc: &Location<D>, dir: usize, bc_type: BcType, value: LinearInterpolator) {
        self.types[loc.index()][dir] = bc_type;
        self.values[loc.index()][dir] = value;
    }

    pub fn bc_type(&self, loc: &Location<D>, dir: usize) -> BcType {
        self.types[loc.index()][dir]
    }

    /// Target value at the current time.
    pub fn value(&self, loc: &Location<D>, dir: usize) -> f64 {
        self.values[loc.index()][dir].eval(self.time)
    }

    pub fn set_time(&mut self, time: f64) {
        self.time = time;
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Reject periodic entries on locations a non-periodic domain can reach.
    pub fn validate(&self, geom: &Geometry<D>) -> Result<()> {
        for loc in Location::<D>::all() {
            if !loc.reachable(geom.periodic()) {
                continue;
            }
            if let Some(dir) = (0..D).find(|&d| self.bc_type(&loc, d) == BcType::Periodic) {
                return Err(SolverError::InvalidBc(format!(
                    "{loc} direction {dir} is periodic but the domain is not periodic there"
                )));
            }
        }
        Ok(())
    }

    /// Boundary row for a node at `loc`.
    pub fn evaluate(&self, loc: &Location<D>, u: &Vector<D>, gradu: &Matrix<D>, sigma: &Matrix<D>) -> Vector<D> {
        let n = loc.normal();
        let types = &self.types[loc.index()];
        let mut f = Vector::<D>::zeros();
        for d in 0..D {
            f[d] = match types[d] {
                BcType::Displacement => u[d],
                BcType::Traction => (sigma * n)[d],
                BcType::Neumann => (gradu * n)[d],
                BcType::Periodic => 0.0,
            };
        }
        f
    }

    /// Write boundary targets into the boundary nodes of `rhs`.
    ///
    /// With `homogeneous`, displacement targets are zero.
    pub fn init(&self, rhs: &mut MultiFab<D>, geom: &Geometry<D>, homogeneous: bool) {
        rhs.fabs_mut().par_iter_mut().for_each(|fab| {
            let valid = *fab.valid_box();
            for p in valid.iter() {
                let Some(loc) = Location::of(&p, geom) else { continue };
                for dir in 0..D {
                    let v = match self.bc_type(&loc, dir) {
                        BcType::Periodic => continue,
                        BcType::Displacement if homogeneous => 0.0,
                        _ => self.value(&loc, dir),
                    };
                    fab.set(&p, dir, v);
                }
            }
        });
    }
}
