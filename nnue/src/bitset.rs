#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Bitset<const N: usize>([u64; N]);

impl<const N: usize> Bitset<N> {
    /// Set a bit at the given index.
    #[inline(always)]
    pub fn set(&mut self, idx: usize) {
        self.0[idx / 64] |= 1u64 << (idx % 64);
    }

    /// Check if a bit is set at the given index.
    #[inline(always)]
    pub fn get(&self, idx: usize) -> bool {
        (self.0[idx / 64] & (1u64 << (idx % 64))) != 0
    }

    /// Calls `f` with every index whose bit differs between `self` and `other`.
    #[inline(always)]
    pub fn for_each_diff<F: FnMut(usize)>(&self, other: &Self, mut f: F) {
        for (word_idx, (a, b)) in self.0.iter().zip(other.0.iter()).enumerate() {
            let mut changes = a ^ b;
            while changes != 0 {
                let bit_idx = changes.trailing_zeros() as usize;
                f(word_idx * 64 + bit_idx);
                changes &= changes - 1;
            }
        }
    }
}

impl<const N: usize> Default for Bitset<N> {
    fn default() -> Self {
        Self([0; N])
    }
}

impl<const N: usize> FromIterator<usize> for Bitset<N> {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut bitset = Self::default();
        for idx in iter {
            bitset.set(idx);
        }
        bitset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_each_diff_visits_changed_bits_only() {
        let a: Bitset<2> = [1, 5, 64, 100].into_iter().collect();
        let b: Bitset<2> = [1, 6, 100, 127].into_iter().collect();

        let mut diff = Vec::new();
        a.for_each_diff(&b, |idx| diff.push(idx));

        assert_eq!(diff, vec![5, 6, 64, 127]);
    }

    #[test]
    fn test_set_and_get() {
        let mut bits = Bitset::<1>::default();
        bits.set(3);
        bits.set(63);
        assert!(bits.get(3) && bits.get(63));
        assert!(!bits.get(4));
    }
}
