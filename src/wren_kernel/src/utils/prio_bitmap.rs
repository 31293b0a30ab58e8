//! Provides `OneWordBitmap`, a bit array structure supporting constant-time
//! bit scan operations, used to locate the highest occupied ready level.
use core::{fmt, mem};

use num_traits::{PrimInt, Zero};

use super::Init;

/// A bit array supporting constant-time scan for the *most significant* set
/// bit. The scheduler's selection rule is "maximal key wins", so the scan
/// direction is fixed accordingly.
///
/// All methods panic when the given bit position is out of range.
pub trait PrioBitmap: Init + Send + Sync + Clone + Copy + fmt::Debug + 'static {
    /// The number of representable bit positions.
    const LEN: usize;

    /// Get the bit at the specified position.
    fn get(&self, i: usize) -> bool;

    /// Clear the bit at the specified position.
    fn clear(&mut self, i: usize);

    /// Set the bit at the specified position.
    fn set(&mut self, i: usize);

    /// Get the position of the highest set bit, if any.
    fn find_last_set(&self) -> Option<usize>;

    /// Get the position of the lowest set bit, if any.
    fn find_first_set(&self) -> Option<usize>;
}

/// Single-word [`PrioBitmap`] implementation. The word type bounds the
/// number of priority levels (`u32` ⇒ 32 levels).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct OneWordBitmap<W>(W);

impl<W: Init> Init for OneWordBitmap<W> {
    const INIT: Self = Self(W::INIT);
}

impl<W: PrimInt + fmt::Binary> fmt::Debug for OneWordBitmap<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OneWordBitmap({:#b})", self.0)
    }
}

impl<W> OneWordBitmap<W> {
    const BITS: usize = mem::size_of::<W>() * 8;
}

impl<W> PrioBitmap for OneWordBitmap<W>
where
    W: PrimInt + Init + Send + Sync + fmt::Binary + 'static,
{
    const LEN: usize = Self::BITS;

    #[inline]
    fn get(&self, i: usize) -> bool {
        assert!(i < Self::BITS);
        !(self.0 >> i & W::one()).is_zero()
    }

    #[inline]
    fn clear(&mut self, i: usize) {
        assert!(i < Self::BITS);
        self.0 = self.0 & !(W::one() << i);
    }

    #[inline]
    fn set(&mut self, i: usize) {
        assert!(i < Self::BITS);
        self.0 = self.0 | (W::one() << i);
    }

    #[inline]
    fn find_last_set(&self) -> Option<usize> {
        if self.0.is_zero() {
            None
        } else {
            Some(Self::BITS - 1 - self.0.leading_zeros() as usize)
        }
    }

    #[inline]
    fn find_first_set(&self) -> Option<usize> {
        if self.0.is_zero() {
            None
        } else {
            Some(self.0.trailing_zeros() as usize)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn empty_scan() {
        let bitmap: OneWordBitmap<u32> = Init::INIT;
        assert_eq!(bitmap.find_last_set(), None);
    }

    #[test]
    fn set_clear_get() {
        let mut bitmap: OneWordBitmap<u32> = Init::INIT;
        bitmap.set(3);
        bitmap.set(17);
        assert!(bitmap.get(3));
        assert!(bitmap.get(17));
        assert!(!bitmap.get(4));
        assert_eq!(bitmap.find_last_set(), Some(17));
        assert_eq!(bitmap.find_first_set(), Some(3));
        bitmap.clear(17);
        assert_eq!(bitmap.find_last_set(), Some(3));
        bitmap.clear(3);
        assert_eq!(bitmap.find_last_set(), None);
    }

    #[quickcheck]
    fn scan_matches_reference(mut bits: Vec<u8>) -> bool {
        bits.iter_mut().for_each(|b| *b %= 32);
        let mut bitmap: OneWordBitmap<u32> = Init::INIT;
        for &b in &bits {
            bitmap.set(b as usize);
        }
        bitmap.find_last_set() == bits.iter().max().map(|&b| b as usize)
    }
}
