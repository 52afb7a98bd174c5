//! Node-centered grid hierarchy.
//!
//! - [`NodeBox`]: inclusive box of node indices
//! - [`Geometry`]: domain nodes, physical extents and periodicity of one level
//! - [`BoxArray`]: disjoint node boxes that partition a level's region
//! - [`DistributionMapping`]: box ownership across worker threads
//! - [`Level`] / [`AmrHierarchy`]: one resolution tier and the nested stack of them
//!
//! Node `n` of an axis with `N` cells sits at `prob_lo + n * dx`, so the
//! domain of a level with `N` cells holds nodes `0..=N`. Fine levels are
//! refined by [`AmrHierarchy::REF_RATIO`] and every other fine node
//! coincides with a coarse node.

use crate::error::{Result, SolverError};
use crate::stencil::StencilType;
use log::debug;

/// Integer node index.
pub type IntVect<const D: usize> = [i64; D];

/// `p + delta * e_axis`
#[inline]
pub fn shifted<const D: usize>(p: &IntVect<D>, axis: usize, delta: i64) -> IntVect<D> {
    let mut q = *p;
    q[axis] += delta;
    q
}

/// `p + o`
#[inline]
pub fn offset_by<const D: usize>(p: &IntVect<D>, o: &IntVect<D>) -> IntVect<D> {
    let mut q = *p;
    for d in 0..D {
        q[d] += o[d];
    }
    q
}

/// All offsets in `{-1, 0, 1}^D`, axis 0 fastest.
pub fn neighborhood<const D: usize>() -> impl Iterator<Item = IntVect<D>> {
    NodeBox::new([-1; D], [1; D]).iter()
}

/// Inclusive box of node indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeBox<const D: usize> {
    pub lo: IntVect<D>,
    pub hi: IntVect<D>,
}

impl<const D: usize> NodeBox<D> {
    pub fn new(lo: IntVect<D>, hi: IntVect<D>) -> Self {
        Self { lo, hi }
    }

    pub fn is_empty(&self) -> bool {
        (0..D).any(|d| self.hi[d] < self.lo[d])
    }

    /// Number of nodes along `axis`.
    pub fn len(&self, axis: usize) -> usize {
        (self.hi[axis] - self.lo[axis] + 1).max(0) as usize
    }

    pub fn num_points(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (0..D).map(|d| self.len(d)).product()
        }
    }

    pub fn contains(&self, p: &IntVect<D>) -> bool {
        (0..D).all(|d| p[d] >= self.lo[d] && p[d] <= self.hi[d])
    }

    pub fn contains_box(&self, other: &Self) -> bool {
        other.is_empty() || (self.contains(&other.lo) && self.contains(&other.hi))
    }

    pub fn grow(&self, n: i64) -> Self {
        let mut b = *self;
        for d in 0..D {
            b.lo[d] -= n;
            b.hi[d] += n;
        }
        b
    }

    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let mut b = *self;
        for d in 0..D {
            b.lo[d] = b.lo[d].max(other.lo[d]);
            b.hi[d] = b.hi[d].min(other.hi[d]);
        }
        (!b.is_empty()).then_some(b)
    }

    pub fn refine(&self, ratio: i64) -> Self {
        let mut b = *self;
        for d in 0..D {
            b.lo[d] *= ratio;
            b.hi[d] *= ratio;
        }
        b
    }

    /// Coarse nodes that coincide with a node of this box.
    pub fn coarsen(&self, ratio: i64) -> Self {
        let mut b = *self;
        for d in 0..D {
            b.lo[d] = -((-self.lo[d]).div_euclid(ratio));
            b.hi[d] = self.hi[d].div_euclid(ratio);
        }
        b
    }

    /// Linear offset of `p` inside this box, axis 0 fastest.
    #[inline]
    pub fn offset(&self, p: &IntVect<D>) -> usize {
        debug_assert!(self.contains(p), "{p:?} outside {self:?}");
        let mut off = 0usize;
        let mut stride = 1usize;
        for d in 0..D {
            off += (p[d] - self.lo[d]) as usize * stride;
            stride *= self.len(d);
        }
        off
    }

    pub fn iter(&self) -> NodeIter<D> {
        NodeIter {
            bx: *self,
            cur: self.lo,
            done: self.is_empty(),
        }
    }
}

/// Iterator over the nodes of a [`NodeBox`], axis 0 fastest.
pub struct NodeIter<const D: usize> {
    bx: NodeBox<D>,
    cur: IntVect<D>,
    done: bool,
}

impl<const D: usize> Iterator for NodeIter<D> {
    type Item = IntVect<D>;

    fn next(&mut self) -> Option<IntVect<D>> {
        if self.done {
            return None;
        }
        let out = self.cur;
        let mut d = 0;
        loop {
            if d == D {
                self.done = true;
                break;
            }
            if self.cur[d] < self.bx.hi[d] {
                self.cur[d] += 1;
                break;
            }
            self.cur[d] = self.bx.lo[d];
            d += 1;
        }
        Some(out)
    }
}

/// Geometry of one level.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry<const D: usize> {
    domain: NodeBox<D>,
    prob_lo: [f64; D],
    prob_hi: [f64; D],
    periodic: [bool; D],
}

impl<const D: usize> Geometry<D> {
    pub fn new(ncells: [usize; D], prob_lo: [f64; D], prob_hi: [f64; D], periodic: [bool; D]) -> Result<Self> {
        for d in 0..D {
            if ncells[d] < 2 {
                return Err(SolverError::InvalidGrid(format!(
                    "axis {d} needs at least 2 cells, got {}",
                    ncells[d]
                )));
            }
            if !(prob_hi[d] > prob_lo[d]) {
                return Err(SolverError::InvalidGrid(format!(
                    "axis {d}: prob_hi ({}) must exceed prob_lo ({})",
                    prob_hi[d], prob_lo[d]
                )));
            }
        }
        let hi = ncells.map(|n| n as i64);
        Ok(Self {
            domain: NodeBox::new([0; D], hi),
            prob_lo,
            prob_hi,
            periodic,
        })
    }

    /// Node box of the whole domain.
    pub fn domain(&self) -> &NodeBox<D> {
        &self.domain
    }

    pub fn ncells(&self, axis: usize) -> i64 {
        self.domain.hi[axis] - self.domain.lo[axis]
    }

    pub fn cell_size(&self) -> [f64; D] {
        std::array::from_fn(|d| (self.prob_hi[d] - self.prob_lo[d]) / self.ncells(d) as f64)
    }

    pub fn prob_lo(&self) -> &[f64; D] {
        &self.prob_lo
    }

    pub fn prob_hi(&self) -> &[f64; D] {
        &self.prob_hi
    }

    pub fn periodic(&self) -> &[bool; D] {
        &self.periodic
    }

    pub fn is_periodic(&self, axis: usize) -> bool {
        self.periodic[axis]
    }

    pub fn node_position(&self, p: &IntVect<D>) -> [f64; D] {
        let dx = self.cell_size();
        std::array::from_fn(|d| self.prob_lo[d] + (p[d] - self.domain.lo[d]) as f64 * dx[d])
    }

    /// True when the domain can be coarsened by `ratio` and keep two cells per axis.
    pub fn can_coarsen(&self, ratio: i64) -> bool {
        (0..D).all(|d| {
            let n = self.ncells(d);
            n % ratio == 0 && n / ratio >= 2
        })
    }

    pub fn coarsen(&self, ratio: i64) -> Result<Self> {
        if !self.can_coarsen(ratio) {
            return Err(SolverError::InvalidGrid(format!(
                "domain {:?} cannot be coarsened by {ratio}",
                self.domain
            )));
        }
        Ok(Self {
            domain: self.domain.coarsen(ratio),
            ..self.clone()
        })
    }

    pub fn refine(&self, ratio: i64) -> Self {
        Self {
            domain: self.domain.refine(ratio),
            ..self.clone()
        }
    }

    /// Map `p` into the domain through periodic images; `None` when it lies
    /// outside along a non-periodic axis.
    pub fn wrap(&self, p: &IntVect<D>) -> Option<IntVect<D>> {
        let mut q = *p;
        for d in 0..D {
            if q[d] >= self.domain.lo[d] && q[d] <= self.domain.hi[d] {
                continue;
            }
            if !self.periodic[d] {
                return None;
            }
            let n = self.ncells(d);
            q[d] = self.domain.lo[d] + (q[d] - self.domain.lo[d]).rem_euclid(n);
        }
        Some(q)
    }

    /// True when `p` lies on a domain face along some non-periodic axis.
    pub fn on_domain_boundary(&self, p: &IntVect<D>) -> bool {
        (0..D).any(|d| !self.periodic[d] && (p[d] == self.domain.lo[d] || p[d] == self.domain.hi[d]))
    }
}

/// Disjoint node boxes making up one level.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxArray<const D: usize> {
    boxes: Vec<NodeBox<D>>,
}

impl<const D: usize> BoxArray<D> {
    pub fn new(boxes: Vec<NodeBox<D>>) -> Result<Self> {
        if let Some(b) = boxes.iter().find(|b| b.is_empty()) {
            return Err(SolverError::InvalidGrid(format!("empty box {b:?}")));
        }
        for (i, a) in boxes.iter().enumerate() {
            for b in &boxes[i + 1..] {
                if a.intersect(b).is_some() {
                    return Err(SolverError::InvalidGrid(format!("boxes {a:?} and {b:?} overlap")));
                }
            }
        }
        Ok(Self { boxes })
    }

    pub fn single(bx: NodeBox<D>) -> Self {
        Self { boxes: vec![bx] }
    }

    /// Split `region` into boxes of at most `max_grid_size` nodes per axis.
    pub fn chop(region: &NodeBox<D>, max_grid_size: usize) -> Self {
        let max = max_grid_size.max(1);
        let segments: Vec<Vec<(i64, i64)>> = (0..D)
            .map(|d| {
                let len = region.len(d);
                let nseg = len.div_ceil(max).max(1);
                let base = len / nseg;
                let extra = len % nseg;
                let mut lo = region.lo[d];
                (0..nseg)
                    .map(|s| {
                        let n = (base + usize::from(s < extra)) as i64;
                        let seg = (lo, lo + n - 1);
                        lo += n;
                        seg
                    })
                    .collect()
            })
            .collect();

        let counts: [i64; D] = std::array::from_fn(|d| segments[d].len() as i64 - 1);
        let boxes = NodeBox::new([0; D], counts)
            .iter()
            .map(|s| {
                NodeBox::new(
                    std::array::from_fn(|d| segments[d][s[d] as usize].0),
                    std::array::from_fn(|d| segments[d][s[d] as usize].1),
                )
            })
            .collect();
        Self { boxes }
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn boxes(&self) -> &[NodeBox<D>] {
        &self.boxes
    }

    pub fn get(&self, i: usize) -> &NodeBox<D> {
        &self.boxes[i]
    }

    pub fn find(&self, p: &IntVect<D>) -> Option<usize> {
        self.boxes.iter().position(|b| b.contains(p))
    }

    pub fn contains(&self, p: &IntVect<D>) -> bool {
        self.find(p).is_some()
    }

    /// Coarse boxes holding the coarse nodes that coincide with fine ones.
    pub fn coarsen(&self, ratio: i64) -> Self {
        Self {
            boxes: self
                .boxes
                .iter()
                .map(|b| b.coarsen(ratio))
                .filter(|b| !b.is_empty())
                .collect(),
        }
    }

    pub fn num_points(&self) -> usize {
        self.boxes.iter().map(NodeBox::num_points).sum()
    }

    pub fn bounding_box(&self) -> Option<NodeBox<D>> {
        let first = *self.boxes.first()?;
        Some(self.boxes[1..].iter().fold(first, |mut acc, b| {
            for d in 0..D {
                acc.lo[d] = acc.lo[d].min(b.lo[d]);
                acc.hi[d] = acc.hi[d].max(b.hi[d]);
            }
            acc
        }))
    }
}

/// Owner worker of every box in a [`BoxArray`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionMapping {
    owners: Vec<usize>,
    nworkers: usize,
}

impl DistributionMapping {
    pub fn round_robin(nboxes: usize, nworkers: usize) -> Self {
        let nworkers = nworkers.max(1);
        Self {
            owners: (0..nboxes).map(|i| i % nworkers).collect(),
            nworkers,
        }
    }

    /// Round robin over the current rayon pool.
    pub fn for_boxes(nboxes: usize) -> Self {
        Self::round_robin(nboxes, rayon::current_num_threads())
    }

    pub fn owner(&self, box_index: usize) -> usize {
        self.owners[box_index]
    }

    pub fn num_workers(&self) -> usize {
        self.nworkers
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn boxes_of(&self, worker: usize) -> Vec<usize> {
        (0..self.owners.len()).filter(|&i| self.owners[i] == worker).collect()
    }
}

/// How a node takes part in the discrete system of its level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Full interior stencil
    Interior,
    /// Row supplied by the boundary condition evaluator
    DomainBoundary,
    /// Fine-level node on the edge of the refined region, driven from the coarse level
    CoarseFine,
}

/// One resolution tier: geometry, box layout and distribution mapping.
#[derive(Debug, Clone)]
pub struct Level<const D: usize> {
    pub geom: Geometry<D>,
    pub ba: BoxArray<D>,
    pub dm: DistributionMapping,
    full_domain: bool,
}

impl<const D: usize> Level<D> {
    pub fn new(geom: Geometry<D>, ba: BoxArray<D>) -> Result<Self> {
        if let Some(b) = ba.boxes().iter().find(|b| !geom.domain().contains_box(b)) {
            return Err(SolverError::InvalidGrid(format!(
                "box {b:?} lies outside the domain {:?}",
                geom.domain()
            )));
        }
        let full_domain = ba.num_points() == geom.domain().num_points();
        let dm = DistributionMapping::for_boxes(ba.len());
        Ok(Self {
            geom,
            ba,
            dm,
            full_domain,
        })
    }

    /// True when the boxes cover the whole domain.
    pub fn is_full_domain(&self) -> bool {
        self.full_domain
    }

    /// True when `p` (after periodic wrapping) is a node of this level.
    pub fn covers(&self, p: &IntVect<D>) -> bool {
        match self.geom.wrap(p) {
            Some(q) => self.full_domain || self.ba.contains(&q),
            None => false,
        }
    }

    /// Centered where both neighbors exist, one-sided otherwise.
    pub fn stencil(&self, p: &IntVect<D>) -> [StencilType; D] {
        std::array::from_fn(|d| {
            if !self.covers(&shifted(p, d, -1)) {
                StencilType::Lo
            } else if !self.covers(&shifted(p, d, 1)) {
                StencilType::Hi
            } else {
                StencilType::Central
            }
        })
    }

    pub fn node_kind(&self, p: &IntVect<D>) -> NodeKind {
        if self.geom.on_domain_boundary(p) {
            NodeKind::DomainBoundary
        } else if !self.full_domain && neighborhood::<D>().any(|o| !self.covers(&offset_by(p, &o))) {
            NodeKind::CoarseFine
        } else {
            NodeKind::Interior
        }
    }

    /// Next multigrid level: the coarsened domain as one box.
    pub fn coarsen(&self, ratio: i64) -> Result<Self> {
        if !self.full_domain {
            return Err(SolverError::InvalidGrid(
                "only levels covering the whole domain can be coarsened".to_string(),
            ));
        }
        let geom = self.geom.coarsen(ratio)?;
        let ba = BoxArray::single(*geom.domain());
        Self::new(geom, ba)
    }
}

/// Nested levels refined by [`AmrHierarchy::REF_RATIO`].
#[derive(Debug, Clone)]
pub struct AmrHierarchy<const D: usize> {
    levels: Vec<Level<D>>,
    max_grid_size: usize,
}

impl<const D: usize> AmrHierarchy<D> {
    pub const REF_RATIO: i64 = 2;

    /// Base level covering the whole domain, chopped into boxes of at most
    /// `max_grid_size` nodes per axis.
    pub fn new(geom: Geometry<D>, max_grid_size: usize) -> Result<Self> {
        let ba = BoxArray::chop(geom.domain(), max_grid_size);
        debug!("level 0: {} boxes over {:?}", ba.len(), geom.domain());
        Ok(Self {
            levels: vec![Level::new(geom, ba)?],
            max_grid_size,
        })
    }

    /// Add a finer level over `region`, given in the new level's node indices.
    ///
    /// The region must align with coarse nodes, span at least four fine
    /// cells per axis and, once coarsened and grown by one node, stay inside
    /// the current finest level.
    pub fn refine(&mut self, region: NodeBox<D>) -> Result<()> {
        let coarse = self.finest();
        let geom = coarse.geom.refine(Self::REF_RATIO);
        if !geom.domain().contains_box(&region) || region.is_empty() {
            return Err(SolverError::InvalidGrid(format!(
                "refined region {region:?} is not inside {:?}",
                geom.domain()
            )));
        }
        for d in 0..D {
            if region.lo[d] % Self::REF_RATIO != 0 || region.hi[d] % Self::REF_RATIO != 0 {
                return Err(SolverError::InvalidGrid(format!(
                    "refined region {region:?} does not align with coarse nodes"
                )));
            }
            if region.len(d) < 5 {
                return Err(SolverError::InvalidGrid(format!(
                    "refined region {region:?} needs at least 4 cells along axis {d}"
                )));
            }
        }
        let halo = region.coarsen(Self::REF_RATIO).grow(1);
        let nested = halo
            .iter()
            .filter(|p| coarse.geom.domain().contains(p))
            .all(|p| coarse.covers(&p));
        if !nested {
            return Err(SolverError::InvalidGrid(format!(
                "refined region {region:?} is not properly nested in level {}",
                self.levels.len() - 1
            )));
        }

        let ba = BoxArray::chop(&region, self.max_grid_size);
        debug!("level {}: {} boxes over {region:?}", self.levels.len(), ba.len());
        self.levels.push(Level::new(geom, ba)?);
        Ok(())
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn finest_level(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn level(&self, lev: usize) -> &Level<D> {
        &self.levels[lev]
    }

    pub fn levels(&self) -> &[Level<D>] {
        &self.levels
    }

    fn finest(&self) -> &Level<D> {
        &self.levels[self.levels.len() - 1]
    }
}
