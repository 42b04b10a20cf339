//! A simple row-major `3 x L1 x L2 x L3 x n_sublattice`-style field grid
//! (spec.md §9: "the physical layout chosen ... is free so long as §5
//! locality and cache assumptions are preserved").

/// A field defined over every (cell, sublattice) pair of a `System`.
#[derive(Debug, Clone)]
pub struct Grid<T> {
    data: Vec<T>,
    pub latsize: (usize, usize, usize),
    pub nsub: usize,
}

impl<T: Clone> Grid<T> {
    pub fn filled(latsize: (usize, usize, usize), nsub: usize, value: T) -> Self {
        let n = latsize.0 * latsize.1 * latsize.2 * nsub;
        Grid {
            data: vec![value; n],
            latsize,
            nsub,
        }
    }
}

impl<T> Grid<T> {
    pub fn from_fn(
        latsize: (usize, usize, usize),
        nsub: usize,
        mut f: impl FnMut(usize, usize, usize, usize) -> T,
    ) -> Self {
        let mut data = Vec::with_capacity(latsize.0 * latsize.1 * latsize.2 * nsub);
        for c0 in 0..latsize.0 {
            for c1 in 0..latsize.1 {
                for c2 in 0..latsize.2 {
                    for sub in 0..nsub {
                        data.push(f(c0, c1, c2, sub));
                    }
                }
            }
        }
        Grid {
            data,
            latsize,
            nsub,
        }
    }

    #[inline]
    pub fn index(&self, cell: (usize, usize, usize), sub: usize) -> usize {
        debug_assert!(cell.0 < self.latsize.0 && cell.1 < self.latsize.1 && cell.2 < self.latsize.2);
        debug_assert!(sub < self.nsub);
        (((cell.0 * self.latsize.1 + cell.1) * self.latsize.2 + cell.2) * self.nsub) + sub
    }

    #[inline]
    pub fn get(&self, cell: (usize, usize, usize), sub: usize) -> &T {
        &self.data[self.index(cell, sub)]
    }

    #[inline]
    pub fn get_mut(&mut self, cell: (usize, usize, usize), sub: usize) -> &mut T {
        let idx = self.index(cell, sub);
        &mut self.data[idx]
    }

    pub fn ncells(&self) -> usize {
        self.latsize.0 * self.latsize.1 * self.latsize.2
    }

    /// Wrap a possibly out-of-range integer cell offset back into
    /// `[0, latsize)` under periodic boundary conditions.
    #[inline]
    pub fn wrap(&self, cell: (i64, i64, i64)) -> (usize, usize, usize) {
        let wrap1 = |x: i64, l: usize| -> usize { x.rem_euclid(l as i64) as usize };
        (
            wrap1(cell.0, self.latsize.0),
            wrap1(cell.1, self.latsize.1),
            wrap1(cell.2, self.latsize.2),
        )
    }

    pub fn iter_sites(&self) -> impl Iterator<Item = (usize, usize, usize, usize)> + '_ {
        let (l0, l1, l2) = self.latsize;
        let nsub = self.nsub;
        (0..l0).flat_map(move |c0| {
            (0..l1).flat_map(move |c1| {
                (0..l2).flat_map(move |c2| (0..nsub).map(move |sub| (c0, c1, c2, sub)))
            })
        })
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}
