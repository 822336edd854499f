//! Bump-allocated word segments with co-located hierarchical bit maps.
//!
//! A segment's backing is a single allocation: `capacity` words of object
//! data followed by the backing bits of its map hierarchy. Each map level
//! records `bits_per_record` bits per `scale`-word slice of the segment;
//! levels compose through `child`, finer levels first in memory, so a
//! coarse level always summarizes the finer ones below it.

use std::ptr::{self, NonNull};

use crate::system::System;
use crate::{BITS_PER_WORD, BYTES_PER_WORD, avg, bit_index, bit_of, word_of};

// ── Map ───────────────────────────────────────────────────────────────

pub(crate) struct Map {
    pub(crate) child: Option<Box<Map>>,
    pub(crate) bits_per_record: usize,
    pub(crate) scale: usize,
    clear_on_init: bool,
    data: *mut usize,
}

impl Map {
    pub(crate) fn new(
        bits_per_record: usize,
        scale: usize,
        child: Option<Box<Map>>,
        clear_on_init: bool,
    ) -> Map {
        debug_assert!(bits_per_record > 0);
        debug_assert!(scale.is_power_of_two());
        Map {
            child,
            bits_per_record,
            scale,
            clear_on_init,
            data: ptr::null_mut(),
        }
    }

    /// Word offset of this level's backing within the map region, i.e. the
    /// combined footprint of the finer levels stored before it.
    fn offset(&self, capacity: usize) -> usize {
        self.child.as_ref().map_or(0, |c| c.footprint(capacity))
    }

    /// Backing words this level needs for a segment of `capacity` words.
    pub(crate) fn size(&self, capacity: usize) -> usize {
        (capacity.div_ceil(self.scale) * self.bits_per_record).div_ceil(BITS_PER_WORD)
    }

    /// Backing words for this level and everything below it.
    pub(crate) fn footprint(&self, capacity: usize) -> usize {
        self.size(capacity) + self.offset(capacity)
    }

    /// Point every level at its slice of the map region that follows the
    /// data area of a fresh segment allocation.
    ///
    /// # Safety
    /// `base` must be the start of an allocation of at least
    /// `capacity + footprint(capacity)` words.
    unsafe fn assign(&mut self, base: *mut usize, capacity: usize) {
        // SAFETY: per contract, the map region starts at base + capacity
        self.data = unsafe { base.add(capacity + self.offset(capacity)) };
        if let Some(child) = &mut self.child {
            // SAFETY: same allocation
            unsafe { child.assign(base, capacity) };
        }
    }

    /// # Safety
    /// Backing must have been assigned for at least `capacity` words.
    unsafe fn init(&mut self, capacity: usize) {
        if self.clear_on_init {
            // SAFETY: the backing covers size(capacity) words
            unsafe { ptr::write_bytes(self.data, 0, self.size(capacity)) };
        }
        if let Some(child) = &mut self.child {
            // SAFETY: per contract
            unsafe { child.init(capacity) };
        }
    }

    /// First bit index of the record covering segment word `segment_index`.
    fn index_of(&self, segment_index: usize) -> usize {
        (segment_index / self.scale) * self.bits_per_record
    }

    #[inline(always)]
    unsafe fn clear_bit(&mut self, i: usize) {
        // SAFETY: caller keeps i within the assigned backing
        unsafe { *self.data.add(word_of(i)) &= !(1 << bit_of(i)) };
    }

    #[inline(always)]
    unsafe fn set_bit(&mut self, i: usize) {
        // SAFETY: caller keeps i within the assigned backing
        unsafe { *self.data.add(word_of(i)) |= 1 << bit_of(i) };
    }

    /// Clear the record covering `segment_index` at this level only.
    ///
    /// # Safety
    /// Backing must be assigned and the index within the mapped capacity.
    pub(crate) unsafe fn clear_only(&mut self, segment_index: usize) {
        let index = self.index_of(segment_index);
        for i in index..index + self.bits_per_record {
            // SAFETY: per contract
            unsafe { self.clear_bit(i) };
        }
    }

    /// Clear the record covering `segment_index` through the hierarchy.
    ///
    /// # Safety
    /// As [`Map::clear_only`].
    pub(crate) unsafe fn clear(&mut self, segment_index: usize) {
        // SAFETY: per contract
        unsafe { self.clear_only(segment_index) };
        if let Some(child) = &mut self.child {
            // SAFETY: per contract
            unsafe { child.clear(segment_index) };
        }
    }

    /// Write `v` into the record covering `segment_index` at this level
    /// only, least-significant bit at the highest bit index.
    ///
    /// # Safety
    /// As [`Map::clear_only`]; `v` must fit `bits_per_record` bits.
    pub(crate) unsafe fn set_only(&mut self, segment_index: usize, mut v: usize) {
        let index = self.index_of(segment_index);
        let mut i = index + self.bits_per_record - 1;
        loop {
            if v & 1 != 0 {
                // SAFETY: per contract
                unsafe { self.set_bit(i) };
            } else {
                // SAFETY: per contract
                unsafe { self.clear_bit(i) };
            }
            v >>= 1;
            if i == index {
                break;
            }
            i -= 1;
        }
    }

    /// Write `v` into the record covering `segment_index` at every level, so
    /// coarse levels keep summarizing fine ones.
    ///
    /// # Safety
    /// As [`Map::set_only`].
    pub(crate) unsafe fn set(&mut self, segment_index: usize, v: usize) {
        // SAFETY: per contract
        unsafe { self.set_only(segment_index, v) };
        debug_assert_eq!(unsafe { self.get(segment_index) }, v);
        if let Some(child) = &mut self.child {
            // SAFETY: per contract
            unsafe { child.set(segment_index, v) };
        }
    }

    /// Read the record covering `segment_index`.
    ///
    /// # Safety
    /// As [`Map::clear_only`].
    pub(crate) unsafe fn get(&self, segment_index: usize) -> usize {
        let index = self.index_of(segment_index);
        let mut v = 0;
        for i in index..index + self.bits_per_record {
            let bit = bit_of(i);
            v <<= 1;
            // SAFETY: per contract
            v |= unsafe { (*self.data.add(word_of(i)) >> bit) & 1 };
        }
        v
    }

    /// Migrate the live record prefix into a new map region when the
    /// segment's backing is replaced mid-flight.
    ///
    /// # Safety
    /// `new_map_base` must be the start of a map region sized for
    /// `new_capacity >=` the old capacity; the old backing must still be
    /// readable.
    pub(crate) unsafe fn update(
        &mut self,
        new_map_base: *mut usize,
        new_capacity: usize,
        position: usize,
    ) {
        // SAFETY: the new region holds footprint(new_capacity) words
        let p = unsafe { new_map_base.add(self.offset(new_capacity)) };
        let copied = if position > 0 { self.size(position) } else { 0 };
        // SAFETY: the live prefix fits both backings
        unsafe { ptr::copy_nonoverlapping(self.data, p, copied) };
        if self.clear_on_init {
            // SAFETY: the remainder of the new level backing
            unsafe { ptr::write_bytes(p.add(copied), 0, self.size(new_capacity) - copied) };
        }
        self.data = p;
        if let Some(child) = &mut self.child {
            // SAFETY: per contract
            unsafe { child.update(new_map_base, new_capacity, position) };
        }
    }

    /// Steal `m`'s backing, level by level, leaving `m` detached.
    pub(crate) fn replace_with(&mut self, m: &mut Map) {
        debug_assert_eq!(self.bits_per_record, m.bits_per_record);
        debug_assert_eq!(self.scale, m.scale);
        self.data = m.data;
        m.data = ptr::null_mut();
        if let (Some(a), Some(b)) = (&mut self.child, &mut m.child) {
            a.replace_with(b);
        }
    }
}

// ── Map iterator ──────────────────────────────────────────────────────

/// Yields segment word indices whose single-bit records are set within a
/// bounded range, skipping all-zero backing words. Tolerates bits being
/// cleared or set behind it while iterating.
pub(crate) struct MapIter {
    map: *const Map,
    index: usize,
    limit: usize,
}

impl MapIter {
    /// `start` and `end` are segment word indices; `end` is clamped to
    /// `position`.
    ///
    /// # Safety
    /// `map` must outlive the iterator and have assigned backing.
    pub(crate) unsafe fn new(
        map: *const Map,
        position: usize,
        start: usize,
        mut end: usize,
    ) -> MapIter {
        // SAFETY: map is live per contract
        let m = unsafe { &*map };
        debug_assert_eq!(m.bits_per_record, 1);
        debug_assert!(start <= position);

        if end > position {
            end = position;
        }

        let index = m.index_of(start);
        let mut limit = m.index_of(end);
        if (end - start) % m.scale != 0 {
            limit += 1;
        }

        MapIter { map, index, limit }
    }

    /// # Safety
    /// As [`MapIter::new`].
    pub(crate) unsafe fn has_more(&mut self) -> bool {
        // SAFETY: map is live per contract
        let map = unsafe { &*self.map };
        let mut word = word_of(self.index);
        let mut bit = bit_of(self.index);
        let word_limit = word_of(self.limit);
        let bit_limit = bit_of(self.limit);

        while word <= word_limit && (word < word_limit || bit < bit_limit) {
            // SAFETY: word stays below the backing size for limit
            if unsafe { *map.data.add(word) } != 0 {
                while bit < BITS_PER_WORD && (word < word_limit || bit < bit_limit) {
                    // SAFETY: as above
                    if unsafe { *map.data.add(word) } & (1 << bit) != 0 {
                        self.index = bit_index(word, bit);
                        return true;
                    }
                    bit += 1;
                }
            }
            bit = 0;
            word += 1;
        }

        self.index = self.limit;
        false
    }

    /// Segment word index of the next set record.
    ///
    /// # Safety
    /// [`MapIter::has_more`] must have returned true.
    pub(crate) unsafe fn next(&mut self) -> usize {
        debug_assert!(unsafe { self.has_more() });
        // SAFETY: map is live per contract
        let scale = unsafe { (*self.map).scale };
        let i = self.index;
        self.index += 1;
        i * scale
    }
}

// ── Segment ───────────────────────────────────────────────────────────

pub(crate) struct Segment {
    data: *mut usize,
    position: usize,
    capacity: usize,
    /// Total words allocated, data area plus map backing.
    allocated: usize,
    pub(crate) map: Option<Box<Map>>,
}

impl Segment {
    /// Allocate a segment of `desired` capacity words plus the map
    /// footprint, halving toward `minimum` on allocation failure. Failing to
    /// meet `minimum` is fatal. `desired == 0` creates an empty, unbacked
    /// segment.
    pub(crate) fn new(
        system: &dyn System,
        map: Option<Box<Map>>,
        desired: usize,
        minimum: usize,
    ) -> Segment {
        let mut s = Segment {
            data: ptr::null_mut(),
            position: 0,
            capacity: 0,
            allocated: 0,
            map,
        };

        if desired == 0 {
            return s;
        }
        debug_assert!(desired >= minimum);

        s.capacity = desired;
        loop {
            let footprint = s.map.as_ref().map_or(0, |m| m.footprint(s.capacity));
            let words = s.capacity + footprint;
            match system.try_allocate(words * BYTES_PER_WORD) {
                Some(p) => {
                    s.data = p.as_ptr().cast();
                    s.allocated = words;
                    break;
                }
                None => {
                    if s.capacity > minimum {
                        s.capacity = avg(minimum, s.capacity);
                    } else {
                        panic!("OOM: segment of {minimum} words unavailable");
                    }
                }
            }
        }

        if let Some(m) = &mut s.map {
            // SAFETY: the allocation holds capacity + footprint words
            unsafe {
                m.assign(s.data, s.capacity);
                m.init(s.capacity);
            }
        }

        s
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn position(&self) -> usize {
        self.position
    }

    pub(crate) fn remaining(&self) -> usize {
        self.capacity - self.position
    }

    pub(crate) fn contains(&self, p: *const usize) -> bool {
        let a = p as usize;
        let base = self.data as usize;
        self.position != 0 && a >= base && a < base + self.position * BYTES_PER_WORD
    }

    /// Like [`Segment::contains`], but admits the one-past-end address.
    pub(crate) fn almost_contains(&self, p: *const usize) -> bool {
        self.contains(p)
            || (self.data as usize != 0
                && p as usize == self.data as usize + self.position * BYTES_PER_WORD)
    }

    /// Word offset of `p` within the segment.
    pub(crate) fn index_of(&self, p: *const usize) -> usize {
        debug_assert!(self.almost_contains(p));
        (p as usize - self.data as usize) / BYTES_PER_WORD
    }

    /// Address of the word at `offset`.
    ///
    /// # Safety
    /// The segment must be backed.
    pub(crate) unsafe fn get(&self, offset: usize) -> *mut usize {
        debug_assert!(offset <= self.position);
        // SAFETY: offset is within the data area per the assert
        unsafe { self.data.add(offset) }
    }

    /// Bump-allocate `size` words. The destination sizing done before a
    /// collection guarantees room; running out here is an invariant
    /// violation.
    ///
    /// # Safety
    /// The segment must be backed.
    pub(crate) unsafe fn allocate(&mut self, size: usize) -> *mut usize {
        debug_assert!(size > 0);
        debug_assert!(self.position + size <= self.capacity);

        // SAFETY: the data area covers position + size words
        let p = unsafe { self.data.add(self.position) };
        self.position += size;
        p
    }

    /// Free the current backing and steal `s`'s storage and map backing,
    /// leaving `s` empty.
    pub(crate) fn replace_with(&mut self, system: &dyn System, s: &mut Segment) {
        if let Some(p) = NonNull::new(self.data.cast::<u8>()) {
            system.free(p, self.allocated * BYTES_PER_WORD);
        }

        self.data = s.data;
        s.data = ptr::null_mut();

        self.position = s.position;
        s.position = 0;

        self.capacity = s.capacity;
        s.capacity = 0;

        self.allocated = s.allocated;
        s.allocated = 0;

        let stolen = s.map.take();
        match (&mut self.map, stolen) {
            (Some(m), Some(mut sm)) => m.replace_with(&mut sm),
            (_, None) => self.map = None,
            (None, Some(_)) => panic!("segment map mismatch during replace"),
        }
    }

    /// Reallocate the backing to `desired` capacity words, migrating the
    /// data area and the live map prefix. The collection driver pre-sizes
    /// destinations instead; this is the resize path for hosts that must
    /// widen a segment between cycles.
    #[allow(dead_code)]
    pub(crate) fn grow(&mut self, system: &dyn System, desired: usize) {
        debug_assert!(!self.data.is_null());
        debug_assert!(desired >= self.capacity);

        let footprint = self.map.as_ref().map_or(0, |m| m.footprint(desired));
        let words = desired + footprint;
        let Some(new_data) = system.try_allocate(words * BYTES_PER_WORD) else {
            panic!("OOM: segment growth to {desired} words failed");
        };
        let new_data = new_data.as_ptr().cast::<usize>();

        // SAFETY: both backings cover the live prefix; the map region of the
        // new allocation starts after the new data area
        unsafe {
            if self.position > 0 {
                ptr::copy_nonoverlapping(self.data, new_data, self.position);
            }
            if let Some(m) = &mut self.map {
                m.update(new_data.add(desired), desired, self.position);
            }
        }

        if let Some(p) = NonNull::new(self.data.cast::<u8>()) {
            system.free(p, self.allocated * BYTES_PER_WORD);
        }
        self.data = new_data;
        self.capacity = desired;
        self.allocated = words;
    }

    pub(crate) fn dispose(&mut self, system: &dyn System) {
        if let Some(p) = NonNull::new(self.data.cast::<u8>()) {
            system.free(p, self.allocated * BYTES_PER_WORD);
        }
        self.data = ptr::null_mut();
        self.position = 0;
        self.capacity = 0;
        self.allocated = 0;
        self.map = None;
    }

    // ── Map access by slot address ────────────────────────────────────

    /// Read the top-level record covering `p`.
    ///
    /// # Safety
    /// `p` must lie within the segment and the map must be backed.
    pub(crate) unsafe fn map_get(&self, p: *const usize) -> usize {
        let index = self.index_of(p);
        let m = self.map.as_ref().expect("segment has no map");
        // SAFETY: index is within the mapped capacity
        unsafe { m.get(index) }
    }

    /// Write the record covering `p` at the top level only.
    ///
    /// # Safety
    /// As [`Segment::map_get`]; `v` must fit the record.
    pub(crate) unsafe fn map_set_only(&mut self, p: *const usize, v: usize) {
        let index = self.index_of(p);
        let m = self.map.as_mut().expect("segment has no map");
        // SAFETY: per contract
        unsafe { m.set_only(index, v) };
    }

    /// Write the record covering `p` through the whole hierarchy.
    ///
    /// # Safety
    /// As [`Segment::map_set_only`].
    pub(crate) unsafe fn map_set(&mut self, p: *const usize, v: usize) {
        let index = self.index_of(p);
        let m = self.map.as_mut().expect("segment has no map");
        // SAFETY: per contract
        unsafe { m.set(index, v) };
    }

    /// Clear the record covering `p` through the whole hierarchy.
    ///
    /// # Safety
    /// As [`Segment::map_get`].
    pub(crate) unsafe fn map_clear(&mut self, p: *const usize) {
        let index = self.index_of(p);
        let m = self.map.as_mut().expect("segment has no map");
        // SAFETY: per contract
        unsafe { m.clear(index) };
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::HostSystem;
    use std::cell::Cell;

    fn age_map() -> Box<Map> {
        Box::new(Map::new(2, 1, None, false))
    }

    fn card_maps() -> Box<Map> {
        let pointer = Box::new(Map::new(1, 1, None, true));
        let page = Box::new(Map::new(1, 8, Some(pointer), true));
        Box::new(Map::new(1, 8 * 64, Some(page), true))
    }

    #[test]
    fn footprint_sums_the_hierarchy() {
        let m = card_maps();
        let capacity: usize = 10_000;
        let pointer_words = capacity.div_ceil(64);
        let page_words = capacity.div_ceil(8).div_ceil(64);
        let heap_words = capacity.div_ceil(8 * 64).div_ceil(64);
        assert_eq!(
            m.footprint(capacity),
            pointer_words + page_words + heap_words
        );

        let age = age_map();
        assert_eq!(age.footprint(capacity), (capacity * 2).div_ceil(64));
    }

    #[test]
    fn bump_allocation_and_pointer_queries() {
        let mut s = Segment::new(&HostSystem, Some(age_map()), 128, 128);
        assert_eq!(s.capacity(), 128);
        assert_eq!(s.position(), 0);
        assert_eq!(s.remaining(), 128);

        let a = unsafe { s.allocate(4) };
        let b = unsafe { s.allocate(6) };
        assert_eq!(s.position(), 10);
        assert_eq!(s.remaining(), 118);

        assert!(s.contains(a));
        assert!(s.contains(b));
        assert_eq!(s.index_of(a), 0);
        assert_eq!(s.index_of(b), 4);

        let end = unsafe { s.get(10) };
        assert!(!s.contains(end));
        assert!(s.almost_contains(end));

        s.dispose(&HostSystem);
    }

    #[test]
    fn multi_bit_records_do_not_bleed() {
        let mut s = Segment::new(&HostSystem, Some(age_map()), 64, 64);
        unsafe {
            let p0 = s.allocate(1);
            let p1 = s.allocate(1);
            let p2 = s.allocate(1);

            s.map_set_only(p0, 3);
            s.map_set_only(p1, 1);
            s.map_set_only(p2, 2);

            assert_eq!(s.map_get(p0), 3);
            assert_eq!(s.map_get(p1), 1);
            assert_eq!(s.map_get(p2), 2);

            // overwrite shrinks cleanly
            s.map_set_only(p0, 0);
            assert_eq!(s.map_get(p0), 0);
            assert_eq!(s.map_get(p1), 1);
        }
        s.dispose(&HostSystem);
    }

    #[test]
    fn set_propagates_through_the_hierarchy() {
        let mut s = Segment::new(&HostSystem, Some(card_maps()), 4096, 4096);
        unsafe {
            for _ in 0..100 {
                s.allocate(8);
            }
            let p = s.get(70);
            s.map_set(p, 1);

            let heap = s.map.as_ref().unwrap();
            let page = heap.child.as_ref().unwrap();
            let pointer = page.child.as_ref().unwrap();
            assert_eq!(heap.get(70), 1);
            assert_eq!(page.get(70), 1);
            assert_eq!(pointer.get(70), 1);

            // clearing only the leaf leaves the coarse summary stale, which
            // iteration tolerates
            let p70 = s.get(70);
            let pointer =
                s.map.as_mut().unwrap().child.as_mut().unwrap().child.as_mut().unwrap();
            pointer.clear_only(70);
            assert_eq!(s.map.as_ref().unwrap().get(70), 1);

            s.map_clear(p70);
            let heap = s.map.as_ref().unwrap();
            assert_eq!(heap.get(70), 0);
            assert_eq!(heap.child.as_ref().unwrap().get(70), 0);
        }
        s.dispose(&HostSystem);
    }

    #[test]
    fn iterator_yields_set_records_in_range() {
        let mut s = Segment::new(&HostSystem, Some(card_maps()), 4096, 4096);
        unsafe {
            for _ in 0..75 {
                s.allocate(8);
            }
            for &i in &[0usize, 63, 64, 500, 599] {
                let p = s.get(i);
                s.map_set(p, 1);
            }

            let pointer: *const Map = &**s
                .map
                .as_ref()
                .unwrap()
                .child
                .as_ref()
                .unwrap()
                .child
                .as_ref()
                .unwrap();

            let mut found = Vec::new();
            let mut it = MapIter::new(pointer, s.position(), 0, s.position());
            while it.has_more() {
                found.push(it.next());
            }
            assert_eq!(found, vec![0, 63, 64, 500, 599]);

            // bounded range, and end clamps to position
            let mut found = Vec::new();
            let mut it = MapIter::new(pointer, s.position(), 64, 10_000);
            while it.has_more() {
                found.push(it.next());
            }
            assert_eq!(found, vec![64, 500, 599]);

            // coarse level narrows to covered slices
            let heap: *const Map = &**s.map.as_ref().unwrap();
            let mut found = Vec::new();
            let mut it = MapIter::new(heap, s.position(), 0, s.position());
            while it.has_more() {
                found.push(it.next());
            }
            assert_eq!(found, vec![0, 512]);
        }
        s.dispose(&HostSystem);
    }

    struct ShortSystem {
        limit: usize,
        attempts: Cell<usize>,
    }

    impl System for ShortSystem {
        fn try_allocate(&self, size: usize) -> Option<std::ptr::NonNull<u8>> {
            self.attempts.set(self.attempts.get() + 1);
            if size > self.limit {
                None
            } else {
                HostSystem.try_allocate(size)
            }
        }

        fn free(&self, ptr: std::ptr::NonNull<u8>, size: usize) {
            HostSystem.free(ptr, size);
        }
    }

    #[test]
    fn construction_halves_toward_minimum_on_failure() {
        let system = ShortSystem {
            limit: 5000,
            attempts: Cell::new(0),
        };
        let mut s = Segment::new(&system, Some(age_map()), 1000, 100);
        // 1000 + 32 map words is over the limit; avg(100, 1000) fits.
        assert_eq!(s.capacity(), 550);
        assert_eq!(system.attempts.get(), 2);
        s.dispose(&system);
    }

    #[test]
    #[should_panic(expected = "OOM")]
    fn construction_below_minimum_is_fatal() {
        let system = ShortSystem {
            limit: 16,
            attempts: Cell::new(0),
        };
        let _ = Segment::new(&system, Some(age_map()), 100, 100);
    }

    #[test]
    fn replace_with_steals_storage_and_map_backing() {
        let mut live = Segment::new(&HostSystem, Some(age_map()), 64, 64);
        let mut next = Segment::new(&HostSystem, Some(age_map()), 256, 256);
        unsafe {
            let p = next.allocate(4);
            *p = 0xfeed;
            next.map_set_only(p, 2);

            live.replace_with(&HostSystem, &mut next);

            assert_eq!(live.capacity(), 256);
            assert_eq!(live.position(), 4);
            assert_eq!(next.capacity(), 0);
            assert_eq!(next.position(), 0);

            let p = live.get(0);
            assert_eq!(*p, 0xfeed);
            assert_eq!(live.map_get(p), 2);
        }
        live.dispose(&HostSystem);
    }

    #[test]
    fn grow_preserves_data_and_map_prefix() {
        let mut s = Segment::new(&HostSystem, Some(age_map()), 64, 64);
        unsafe {
            let p = s.allocate(2);
            *p = 7;
            *p.add(1) = 9;
            s.map_set_only(p, 3);
            s.map_set_only(p.add(1), 1);

            s.grow(&HostSystem, 1024);

            assert_eq!(s.capacity(), 1024);
            assert_eq!(s.position(), 2);
            let p = s.get(0);
            assert_eq!(*p, 7);
            assert_eq!(*p.add(1), 9);
            assert_eq!(s.map_get(p), 3);
            assert_eq!(s.map_get(p.add(1)), 1);

            // room actually grew
            s.allocate(512);
        }
        s.dispose(&HostSystem);
    }
}
