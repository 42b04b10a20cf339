use nalgebra::Vector3;

/// A directed bond `(i, j, n)`: sublattice `i` in the home cell to sublattice
/// `j` in cell offset `n` (spec.md §3, GLOSSARY).
///
/// `reverse(i, j, n) = (j, i, -n)` is the equivalent bond seen from the other
/// end; of each unordered pair exactly one is "canonical" (not culled).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bond {
    pub i: usize,
    pub j: usize,
    pub n: Vector3<i32>,
}

impl Bond {
    pub fn new(i: usize, j: usize, n: Vector3<i32>) -> Self {
        Bond { i, j, n }
    }

    pub fn reverse(&self) -> Bond {
        Bond {
            i: self.j,
            j: self.i,
            n: -self.n,
        }
    }

    /// `true` if this bond is the lexicographically-first of `{self,
    /// reverse(self)}`, i.e. it is the non-culled representative.
    pub fn is_canonical(&self) -> bool {
        let rev = self.reverse();
        Self::order_key(self) <= Self::order_key(&rev)
    }

    /// Returns the canonical representative of `{self, reverse(self)}`
    /// together with `+1` if `self` already was canonical, `-1` otherwise.
    pub fn canonical_with_sign(&self) -> (Bond, i32) {
        if self.is_canonical() {
            (*self, 1)
        } else {
            (self.reverse(), -1)
        }
    }

    fn order_key(b: &Bond) -> (usize, usize, i32, i32, i32) {
        (b.i, b.j, b.n.x, b.n.y, b.n.z)
    }

    /// Does any component of `n` reach or exceed `latsize` in magnitude
    /// (spec.md §4.4's `BondWrapsSystem` check)?
    pub fn wraps_system(&self, latsize: (usize, usize, usize)) -> bool {
        self.n.x.unsigned_abs() as usize >= latsize.0
            || self.n.y.unsigned_abs() as usize >= latsize.1
            || self.n.z.unsigned_abs() as usize >= latsize.2
    }
}
