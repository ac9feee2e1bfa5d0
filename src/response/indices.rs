use crate::response::{FragmentTable, Occupations, ResponseError, Spin};
use itertools::iproduct;
use std::ops::Range;

/// Which virtual orbitals are paired with the occupied orbitals of a fragment.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PairScope {
    /// Local occupied x local virtual orbitals of the same fragment.
    LocalVirtual,
    /// Local occupied x all virtual orbitals of the system.
    AllVirtual,
}

/// Sorted set of active occupied-virtual rotations. The rotation `ia` is flattened as
/// `i * nvirt + a`, i.e. the virtual index runs fastest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveSpace {
    dim: usize,
    indices: Vec<usize>,
}

impl ActiveSpace {
    /// Active set from arbitrary indices; duplicates are removed.
    pub fn new(dim: usize, mut indices: Vec<usize>) -> Self {
        indices.sort_unstable();
        indices.dedup();
        debug_assert!(indices.last().map_or(true, |&idx| idx < dim));
        Self { dim, indices }
    }

    /// Every rotation is active.
    pub fn full(dim: usize) -> Self {
        Self {
            dim,
            indices: (0..dim).collect(),
        }
    }

    /// Dimension of the full rotation space.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn contains(&self, idx: usize) -> bool {
        self.indices.binary_search(&idx).is_ok()
    }

    /// Boolean mask over the full rotation space.
    pub fn mask(&self) -> Vec<bool> {
        let mut mask: Vec<bool> = vec![false; self.dim];
        self.indices.iter().for_each(|&idx| mask[idx] = true);
        mask
    }
}

/// Running offsets of the fragment blocks inside the occupied and the virtual space.
#[derive(Copy, Clone, Default)]
struct OrbitalOffsets {
    occs: usize,
    virts: usize,
}

impl OrbitalOffsets {
    fn occ_range(&self, n_occ: usize) -> Range<usize> {
        self.occs..(self.occs + n_occ)
    }

    fn virt_range(&self, n_virt: usize) -> Range<usize> {
        self.virts..(self.virts + n_virt)
    }

    fn add(&mut self, n_occ: usize, n_virt: usize) {
        self.occs += n_occ;
        self.virts += n_virt;
    }
}

/// The active rotations of every fragment, one group per fragment in table order.
pub fn make_indices_mo_restricted(
    fragments: &FragmentTable,
    spin: Spin,
    scope: PairScope,
) -> Vec<ActiveSpace> {
    let nocc_frgm: Vec<usize> = fragments.nocc(spin);
    let nvirt_frgm: Vec<usize> = fragments.nvirt(spin);
    let nvirt: usize = nvirt_frgm.iter().sum();
    let nov: usize = nocc_frgm.iter().sum::<usize>() * nvirt;

    let mut offsets = OrbitalOffsets::default();
    let mut groups: Vec<ActiveSpace> = Vec::with_capacity(fragments.len());
    for (n_occ, n_virt) in nocc_frgm.into_iter().zip(nvirt_frgm.into_iter()) {
        let virts: Range<usize> = match scope {
            PairScope::LocalVirtual => offsets.virt_range(n_virt),
            PairScope::AllVirtual => 0..nvirt,
        };
        let indices: Vec<usize> = iproduct!(offsets.occ_range(n_occ), virts)
            .map(|(i, a)| i * nvirt + a)
            .collect();
        groups.push(ActiveSpace::new(nov, indices));
        offsets.add(n_occ, n_virt);
    }
    groups
}

/// Union of the fragment groups.
pub fn pooled(groups: &[ActiveSpace], dim: usize) -> ActiveSpace {
    let indices: Vec<usize> = groups
        .iter()
        .flat_map(|group| group.indices().iter().copied())
        .collect();
    ActiveSpace::new(dim, indices)
}

/// The active space of one spin channel used by the orchestrator: `frgm_response_idx > 0`
/// selects the local-occupied x all-virtual rotations of that (one-based) fragment, `0`
/// pools these rotations of all fragments. Without fragments every rotation is active.
pub fn select_active_space(
    fragments: &FragmentTable,
    occ: &Occupations,
    spin: Spin,
    frgm_response_idx: usize,
) -> Result<ActiveSpace, ResponseError> {
    if frgm_response_idx > fragments.len() {
        return Err(ResponseError::FragmentOutOfRange {
            index: frgm_response_idx,
            n_fragments: fragments.len(),
        });
    }
    let nov: usize = occ.nov(spin);
    if fragments.is_empty() {
        return Ok(ActiveSpace::full(nov));
    }
    let mut groups = make_indices_mo_restricted(fragments, spin, PairScope::AllVirtual);
    match frgm_response_idx {
        0 => Ok(pooled(&groups, nov)),
        k => Ok(groups.swap_remove(k - 1)),
    }
}
