use crate::response::{ResponseError, Spin};

/// Number of occupied and virtual orbitals for both spin channels.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Occupations {
    nocc: [usize; 2],
    nvirt: [usize; 2],
}

impl Occupations {
    /// Build the occupations from `[nocc_alph, nvirt_alph, nocc_beta, nvirt_beta]` and
    /// check them against the number of MOs. The beta entries are checked even for a
    /// restricted reference.
    pub fn new(occupations: &[usize], norb: usize) -> Result<Self, ResponseError> {
        if occupations.len() != 4 {
            return Err(ResponseError::MalformedOccupations(occupations.len()));
        }
        let occ = Self {
            nocc: [occupations[0], occupations[2]],
            nvirt: [occupations[1], occupations[3]],
        };
        for spin in [Spin::Alpha, Spin::Beta] {
            if occ.norb(spin) != norb {
                return Err(ResponseError::InconsistentOrbitalCount {
                    spin,
                    norb,
                    nocc: occ.nocc(spin),
                    nvirt: occ.nvirt(spin),
                });
            }
        }
        if occ.nocc[0] == occ.nocc[1] && occ.nov(Spin::Alpha) != occ.nov(Spin::Beta) {
            return Err(ResponseError::MismatchedRotationSpace {
                nov_alpha: occ.nov(Spin::Alpha),
                nov_beta: occ.nov(Spin::Beta),
            });
        }
        Ok(occ)
    }

    pub fn nocc(&self, spin: Spin) -> usize {
        self.nocc[spin.index()]
    }

    pub fn nvirt(&self, spin: Spin) -> usize {
        self.nvirt[spin.index()]
    }

    pub fn norb(&self, spin: Spin) -> usize {
        self.nocc(spin) + self.nvirt(spin)
    }

    /// Dimension of the occupied-virtual rotation space.
    pub fn nov(&self, spin: Spin) -> usize {
        self.nocc(spin) * self.nvirt(spin)
    }
}

/// One row of the fragment occupation table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FragmentOccupation {
    pub id: usize,
    pub norb: usize,
    nocc: [usize; 2],
}

impl FragmentOccupation {
    pub fn nocc(&self, spin: Spin) -> usize {
        self.nocc[spin.index()]
    }

    pub fn nvirt(&self, spin: Spin) -> usize {
        self.norb - self.nocc(spin)
    }
}

/// Occupations of the molecular fragments, one row `[id, norb, nocc_alph, nocc_beta]`
/// per fragment. The MOs are expected to be ordered fragment-wise inside the occupied
/// and inside the virtual space.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FragmentTable {
    fragments: Vec<FragmentOccupation>,
}

impl FragmentTable {
    /// A table without fragments: the whole rotation space is active.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: &[[usize; 4]]) -> Result<Self, ResponseError> {
        let mut fragments: Vec<FragmentOccupation> = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            if row[2] > row[1] || row[3] > row[1] {
                return Err(ResponseError::InconsistentFragments(format!(
                    "fragment {} has {} orbitals but {}/{} occupied orbitals",
                    row[0], row[1], row[2], row[3]
                )));
            }
            fragments.push(FragmentOccupation {
                id: row[0],
                norb: row[1],
                nocc: [row[2], row[3]],
            });
        }
        Ok(Self { fragments })
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FragmentOccupation> {
        self.fragments.iter()
    }

    /// Occupied orbitals per fragment for one spin channel.
    pub fn nocc(&self, spin: Spin) -> Vec<usize> {
        self.fragments.iter().map(|frag| frag.nocc(spin)).collect()
    }

    /// Virtual orbitals per fragment for one spin channel.
    pub fn nvirt(&self, spin: Spin) -> Vec<usize> {
        self.fragments.iter().map(|frag| frag.nvirt(spin)).collect()
    }

    /// The fragment orbitals have to add up to the orbitals of the whole system.
    pub fn check(&self, occ: &Occupations) -> Result<(), ResponseError> {
        if self.is_empty() {
            return Ok(());
        }
        for spin in [Spin::Alpha, Spin::Beta] {
            let nocc: usize = self.nocc(spin).iter().sum();
            let nvirt: usize = self.nvirt(spin).iter().sum();
            if nocc != occ.nocc(spin) || nvirt != occ.nvirt(spin) {
                return Err(ResponseError::InconsistentFragments(format!(
                    "{} channel: fragments sum to {} occupied / {} virtual orbitals, the reference has {} / {}",
                    spin,
                    nocc,
                    nvirt,
                    occ.nocc(spin),
                    occ.nvirt(spin)
                )));
            }
        }
        Ok(())
    }
}
