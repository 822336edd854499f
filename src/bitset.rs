//! Pending-slot bitset threaded through forwarded source objects.
//!
//! The traversal parks the set of not-yet-visited reference slots of an
//! object inside the object's abandoned source payload. The first word
//! holds offsets `0..BITS_PER_WORD-1` inline; its top bit flags a spill
//! area layered over the following payload words:
//!
//! ```text
//! word 0:  inline bits | extension flag (top bit)
//! word 1:  scan cursor into the spill bits
//! word 2:  spill length in words
//! word 3…: spill bits, offset i at spill bit i - (BITS_PER_WORD - 1)
//! ```
//!
//! Spill words start out as payload garbage; [`clear_range`] zeroes them
//! lazily as the walker's offset frontier first reaches each word, so a
//! word is always clean before the first bit is set in it.

use crate::{BITS_PER_WORD, bit_index, bit_of, word_of};

pub(crate) const EXTENSION_BIT: usize = 1 << (BITS_PER_WORD - 1);

/// # Safety
/// `p` must point to the bitset word of a forwarded source object.
pub(crate) unsafe fn init(p: *mut usize) {
    // SAFETY: per contract
    unsafe { *p = 0 };
}

/// Zero the spill words the offset frontier crossed between `start` and
/// `end`. Inline bits need no clearing; `init` zeroed them.
///
/// # Safety
/// As [`init`], with enough payload words behind `p` to cover `end`.
pub(crate) unsafe fn clear_range(p: *mut usize, start: usize, end: usize) {
    if end < BITS_PER_WORD - 1 {
        // still inline
    } else if start < BITS_PER_WORD - 1 {
        // SAFETY: the spill area covers the frontier per contract
        unsafe {
            p.add(1).write_bytes(0, word_of(end + BITS_PER_WORD * 2 + 1));
        }
    } else {
        let start_word = word_of(start + BITS_PER_WORD * 2 + 1);
        let end_word = word_of(end + BITS_PER_WORD * 2 + 1);
        if end_word > start_word {
            // SAFETY: as above
            unsafe {
                p.add(start_word + 1).write_bytes(0, end_word - start_word);
            }
        }
    }
}

/// # Safety
/// As [`clear_range`]; the word holding `i` must already be clean.
pub(crate) unsafe fn set(p: *mut usize, mut i: usize, v: bool) {
    if i >= BITS_PER_WORD - 1 {
        i += BITS_PER_WORD * 2 + 1;
        if v {
            // SAFETY: per contract
            unsafe {
                *p |= EXTENSION_BIT;
                if *p.add(2) <= word_of(i) - 3 {
                    *p.add(2) = word_of(i) - 2;
                }
            }
        }
    }

    // SAFETY: per contract
    unsafe {
        if v {
            *p.add(word_of(i)) |= 1 << bit_of(i);
        } else {
            *p.add(word_of(i)) &= !(1 << bit_of(i));
        }
    }
}

/// True when a set bit remains. Advances the spill scan cursor past empty
/// words as a side effect; [`next`] depends on that positioning.
///
/// # Safety
/// As [`init`].
pub(crate) unsafe fn has_more(p: *mut usize) -> bool {
    // SAFETY: per contract
    unsafe {
        match *p {
            0 => false,
            w if w == EXTENSION_BIT => {
                let length = *p.add(2);
                let mut word = word_of(*p.add(1));
                while word < length {
                    if *p.add(word + 3) != 0 {
                        *p.add(1) = bit_index(word, 0);
                        return true;
                    }
                    word += 1;
                }
                *p.add(1) = bit_index(word, 0);
                false
            }
            _ => true,
        }
    }
}

/// Pop the lowest remaining offset, inline bits before spilled ones.
///
/// # Safety
/// As [`init`]; a set bit must remain.
pub(crate) unsafe fn next(p: *mut usize) -> usize {
    // the cursor side effect is required even when the assert compiles out
    let more = unsafe { has_more(p) };
    debug_assert!(more);

    // SAFETY: per contract
    unsafe {
        match *p {
            0 => unreachable!("empty pending-slot bitset"),
            w if w == EXTENSION_BIT => {
                let i = *p.add(1);
                let word = word_of(i);
                debug_assert!(word < *p.add(2));
                for bit in bit_of(i)..BITS_PER_WORD {
                    if *p.add(word + 3) & (1 << bit) != 0 {
                        *p.add(1) = bit_index(word, bit) + 1;
                        let offset = *p.add(1) + BITS_PER_WORD - 2;
                        set(p, offset, false);
                        return offset;
                    }
                }
                unreachable!("scan cursor past the last spilled bit")
            }
            _ => {
                for i in 0..BITS_PER_WORD - 1 {
                    if *p & (1 << i) != 0 {
                        set(p, i, false);
                        return i;
                    }
                }
                unreachable!("inline bitset word empty")
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(p: *mut usize) -> Vec<usize> {
        let mut out = Vec::new();
        unsafe {
            while has_more(p) {
                out.push(next(p));
            }
        }
        out
    }

    #[test]
    fn inline_bits_round_trip_in_ascending_order() {
        let mut backing = vec![0usize; 8];
        let p = backing.as_mut_ptr();
        unsafe {
            init(p);
            for &i in &[5, 0, 40, 17] {
                set(p, i, true);
            }
            assert_eq!(*p & EXTENSION_BIT, 0);
        }
        assert_eq!(drain(p), vec![0, 5, 17, 40]);
        assert!(!unsafe { has_more(p) });
    }

    #[test]
    fn spill_sets_the_extension_flag_and_keeps_order() {
        let mut backing = vec![0usize; 16];
        let p = backing.as_mut_ptr();
        unsafe {
            init(p);
            set(p, 0, true);
            set(p, 5, true);
            set(p, 40, true);
            assert_eq!(*p & EXTENSION_BIT, 0);
            set(p, 100, true);
            assert_ne!(*p & EXTENSION_BIT, 0);
        }
        assert_eq!(drain(p), vec![0, 5, 40, 100]);
        assert!(!unsafe { has_more(p) });
    }

    #[test]
    fn distinct_offsets_come_back_exactly_once() {
        let offsets = [
            1usize,
            2,
            3,
            BITS_PER_WORD - 2,
            BITS_PER_WORD - 1,
            BITS_PER_WORD,
            2 * BITS_PER_WORD - 1,
            2 * BITS_PER_WORD,
            500,
        ];
        let mut backing = vec![0usize; 16];
        let p = backing.as_mut_ptr();
        unsafe {
            init(p);
            for &i in &offsets {
                set(p, i, true);
            }
        }
        assert_eq!(drain(p), offsets.to_vec());
        assert!(!unsafe { has_more(p) });
    }

    #[test]
    fn clear_range_scrubs_garbage_spill_words() {
        // payload garbage everywhere but the inline word
        let mut backing = vec![!0usize; 16];
        let p = backing.as_mut_ptr();
        unsafe {
            init(p);
            // frontier crosses into the spill: words up to the frontier are
            // zeroed before the first spilled set
            clear_range(p, 0, 100);
            set(p, 100, true);
            clear_range(p, 100, 300);
            set(p, 300, true);
        }
        assert_eq!(drain(p), vec![100, 300]);
        assert!(!unsafe { has_more(p) });
    }

    #[test]
    fn clearing_a_bit_is_observable() {
        let mut backing = vec![0usize; 8];
        let p = backing.as_mut_ptr();
        unsafe {
            init(p);
            set(p, 3, true);
            set(p, 9, true);
            set(p, 3, false);
        }
        assert_eq!(drain(p), vec![9]);
    }
}
