//! The collector: generations, copier, traversal, card scan, and driver.
//!
//! Four segments make up the heap: `gen1`/`gen2` are the live young and old
//! generations, `next_gen1`/`next_gen2` their destinations during a cycle.
//! A minor collection copies young survivors into `next_gen1` (or `gen2`
//! once their age reaches the tenure threshold) and swaps; a major
//! collection additionally evacuates `gen2` into `next_gen2`.
//!
//! The traversal is depth-first but allocates nothing: once an object has
//! been copied, its abandoned source payload doubles as the traversal
//! stack. Word 0 holds the forwarding pointer, word 1 the parent link, and
//! word 2 onward a bitset of reference slots still to visit.

use std::ptr;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::bitset;
use crate::segment::{Map, MapIter, Segment};
use crate::system::{HostSystem, System};
use crate::{BYTES_PER_WORD, POINTER_MASK, log2_ceil};

/// A heap object, opaque to the collector: a word-aligned region whose
/// first word is a type descriptor or, during collection, a forwarding
/// pointer. The first three words double as traversal scratch once the
/// object has been copied.
pub type Object = *mut usize;

const TOP: usize = usize::MAX;

// ── Client capabilities ───────────────────────────────────────────────

/// Receives one reference-slot word offset per call; returning `false`
/// stops the walk.
pub trait Walker {
    fn visit(&mut self, offset: usize) -> bool;
}

/// Receives the address of one root slot per call.
pub trait Visitor {
    fn visit(&mut self, slot: *mut Object);
}

/// Capabilities the host runtime provides to the collector. The collector
/// is layout-agnostic; everything layout-dependent is delegated here.
///
/// Methods take `&self` because the collector re-enters the client while a
/// walk is in progress: updating a slot may copy the referent, which asks
/// the client for its size.
///
/// # Safety
///
/// Implementations must describe object layout faithfully: `copy` must
/// transfer exactly `copied_size_in_words(src)` words, `walk` must visit
/// every reference-slot offset of a live object in increasing order and
/// honor a `false` return by stopping, and `visit_roots` must present
/// every root slot. The collector dereferences and rewrites raw memory on
/// the strength of these answers.
pub unsafe trait Client {
    /// Copy the object at `src` into `dst`; the size is implied by the
    /// object's type.
    fn copy(&self, src: Object, dst: Object);

    /// Number of words the destination copy of `o` occupies.
    fn copied_size_in_words(&self, o: Object) -> usize;

    /// Call `walker.visit(offset)` for each reference-slot word offset of
    /// `o`, in increasing order, stopping early on a `false` return.
    fn walk(&self, o: Object, walker: &mut dyn Walker);

    /// Call `visitor.visit(slot)` for every root slot.
    fn visit_roots(&self, visitor: &mut dyn Visitor);
}

// ── Public types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionType {
    /// Collect the young generation only.
    Minor,
    /// Collect both generations.
    Major,
}

/// Where an object stands relative to the current (or just-finished)
/// collection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Null,
    Reachable,
    Tenured,
    Unreachable,
}

/// Collector tuning. `Default` matches the constants the collector was
/// designed around.
#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Collections an object's age may reach before it is copied into the
    /// old generation instead of the next young space. `threshold + 1`
    /// must be a power of two so ages `0..=threshold` fill the age map's
    /// bit records exactly.
    pub tenure_threshold: usize,
    /// Page granule of the old-space card table, in bytes.
    pub likely_page_size: usize,
    /// Lower bound on a fresh old-generation allocation, in bytes.
    pub initial_gen2_capacity: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            tenure_threshold: 3,
            likely_page_size: 4096,
            initial_gen2_capacity: 4 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("tenure threshold {0} does not fill whole age records (need 2^n - 1)")]
    InvalidTenureThreshold(usize),
    #[error("page size {0} must be a power of two of at least one word")]
    InvalidPageSize(usize),
    #[error("initial old-generation capacity must be nonzero")]
    ZeroGen2Capacity,
}

impl HeapConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tenure_threshold == 0 || !(self.tenure_threshold + 1).is_power_of_two() {
            return Err(ConfigError::InvalidTenureThreshold(self.tenure_threshold));
        }
        if !self.likely_page_size.is_power_of_two() || self.likely_page_size < BYTES_PER_WORD {
            return Err(ConfigError::InvalidPageSize(self.likely_page_size));
        }
        if self.initial_gen2_capacity == 0 {
            return Err(ConfigError::ZeroGen2Capacity);
        }
        Ok(())
    }

    fn age_bits(&self) -> usize {
        log2_ceil(self.tenure_threshold).max(1)
    }

    fn page_scale(&self) -> usize {
        self.likely_page_size / BYTES_PER_WORD
    }
}

/// Timing counters accumulated across collections.
#[derive(Debug, Clone, Copy)]
pub struct HeapStats {
    pub collections: u64,
    pub last_pause: Duration,
    pub total_pause: Duration,
    /// Mutator time between collections.
    pub total_run: Duration,
}

// ── Context ───────────────────────────────────────────────────────────

struct Context {
    system: Box<dyn System>,
    config: HeapConfig,

    gen1: Segment,
    next_gen1: Segment,
    gen2: Segment,
    next_gen2: Segment,

    /// Position of `gen2` when the first object of the cycle tenured;
    /// everything at or above it is freshly tenured.
    gen2_base: usize,
    /// Words that will move into `gen2` next cycle (survivors whose age
    /// just reached the threshold).
    tenure_footprint: usize,
    gen1_padding: usize,
    gen2_padding: usize,
    mode: CollectionType,

    collections: u64,
    last_collection: Instant,
    last_pause: Duration,
    total_pause: Duration,
    total_time: Duration,
}

fn age_map(config: &HeapConfig) -> Box<Map> {
    Box::new(Map::new(config.age_bits(), 1, None, false))
}

fn card_maps(config: &HeapConfig) -> Box<Map> {
    let pointer = Box::new(Map::new(1, 1, None, true));
    let page = Box::new(Map::new(1, config.page_scale(), Some(pointer), true));
    Box::new(Map::new(
        1,
        config.page_scale() * 1024,
        Some(page),
        true,
    ))
}

impl Context {
    fn new(system: Box<dyn System>, config: HeapConfig) -> Context {
        let gen1 = Segment::new(&*system, Some(age_map(&config)), 0, 0);
        let next_gen1 = Segment::new(&*system, Some(age_map(&config)), 0, 0);
        let gen2 = Segment::new(&*system, Some(card_maps(&config)), 0, 0);
        let next_gen2 = Segment::new(&*system, Some(card_maps(&config)), 0, 0);

        Context {
            system,
            config,
            gen1,
            next_gen1,
            gen2,
            next_gen2,
            gen2_base: 0,
            tenure_footprint: 0,
            gen1_padding: 0,
            gen2_padding: 0,
            mode: CollectionType::Minor,
            collections: 0,
            last_collection: Instant::now(),
            last_pause: Duration::ZERO,
            total_pause: Duration::ZERO,
            total_time: Duration::ZERO,
        }
    }

    /// True when `o` lives in a destination space of the current cycle:
    /// either `next_*` segment, or `gen2` at or above the fresh-tenure
    /// boundary.
    fn fresh(&self, o: Object) -> bool {
        self.next_gen1.contains(o)
            || self.next_gen2.contains(o)
            || (self.gen2.contains(o) && self.gen2.index_of(o) >= self.gen2_base)
    }

    /// An already-copied source object: not itself fresh, but its first
    /// word forwards into fresh space.
    unsafe fn was_collected(&self, o: Object) -> bool {
        // SAFETY: o is a live source object when non-null
        !o.is_null() && !self.fresh(o) && self.fresh(unsafe { get(o, 0) })
    }

    /// # Safety
    /// `o` must have been collected this cycle.
    unsafe fn forwarded(&self, o: Object) -> Object {
        debug_assert!(unsafe { self.was_collected(o) });
        // SAFETY: per contract
        unsafe { get(o, 0) }
    }

    /// Parent link of a collected source object.
    ///
    /// # Safety
    /// As [`Context::forwarded`].
    unsafe fn parent_slot(&self, o: Object) -> *mut Object {
        debug_assert!(unsafe { self.was_collected(o) });
        // SAFETY: the source payload has at least two words
        unsafe { slot_at(o, 1) }
    }

    /// Pending-slot bitset of a collected source object.
    ///
    /// # Safety
    /// As [`Context::forwarded`].
    unsafe fn bitset_slot(&self, o: Object) -> *mut usize {
        debug_assert!(unsafe { self.was_collected(o) });
        // SAFETY: the source payload has at least three words
        unsafe { o.add(2) }
    }
}

// ── Word and tag projections ──────────────────────────────────────────

#[inline(always)]
fn mask(o: Object) -> Object {
    ((o as usize) & POINTER_MASK) as Object
}

#[inline(always)]
fn mask_slot_ptr(p: *mut Object) -> *mut Object {
    ((p as usize) & POINTER_MASK) as *mut Object
}

/// Read the word at `offset`, projected to its pointer part.
#[inline(always)]
unsafe fn get(o: Object, offset: usize) -> Object {
    // SAFETY: caller keeps offset within the object
    mask(unsafe { *o.add(offset) } as Object)
}

#[inline(always)]
unsafe fn slot_at(o: Object, offset: usize) -> *mut Object {
    // SAFETY: as above
    unsafe { o.add(offset) as *mut Object }
}

/// Store `value` into `*p`, preserving the mutator's tag bits there.
#[inline(always)]
unsafe fn set_slot(p: *mut Object, value: Object) {
    // SAFETY: caller passes a live slot
    unsafe {
        let tags = (*p) as usize & !POINTER_MASK;
        *p = ((value as usize) | tags) as Object;
    }
}

#[inline(always)]
unsafe fn set_field(o: Object, offset: usize, value: Object) {
    // SAFETY: as above
    unsafe { set_slot(slot_at(o, offset), value) };
}

// ── Copier ────────────────────────────────────────────────────────────

unsafe fn copy_into(
    segment: &mut Segment,
    client: &dyn Client,
    o: Object,
    size: usize,
) -> Object {
    debug_assert!(segment.remaining() >= size);
    // SAFETY: the destination sizing reserved room
    let dst = unsafe { segment.allocate(size) };
    client.copy(o, dst);
    dst
}

unsafe fn copy2(c: &mut Context, client: &dyn Client, o: Object) -> Object {
    let size = client.copied_size_in_words(o);
    let threshold = c.config.tenure_threshold;

    if c.gen2.contains(o) {
        debug_assert_eq!(c.mode, CollectionType::Major);

        // SAFETY: o is live and the destination was pre-sized
        unsafe { copy_into(&mut c.next_gen2, client, o, size) }
    } else if c.gen1.contains(o) {
        // SAFETY: gen1 residents are covered by the age map
        let age = unsafe { c.gen1.map_get(o) };
        if age == threshold {
            if c.mode == CollectionType::Minor {
                debug_assert!(c.gen2.remaining() >= size);

                if c.gen2_base == TOP {
                    c.gen2_base = c.gen2.position();
                }

                // SAFETY: as above
                unsafe { copy_into(&mut c.gen2, client, o, size) }
            } else {
                // SAFETY: as above
                unsafe { copy_into(&mut c.next_gen2, client, o, size) }
            }
        } else {
            // SAFETY: as above
            let o = unsafe { copy_into(&mut c.next_gen1, client, o, size) };

            // SAFETY: o now lives in next_gen1
            unsafe { c.next_gen1.map_set_only(o, age + 1) };
            if age + 1 == threshold {
                c.tenure_footprint += size;
            }

            o
        }
    } else {
        debug_assert!(!c.next_gen1.contains(o));
        debug_assert!(!c.next_gen2.contains(o));

        // SAFETY: as above
        let o = unsafe { copy_into(&mut c.next_gen1, client, o, size) };

        // SAFETY: o now lives in next_gen1
        unsafe { c.next_gen1.map_clear(o) };

        o
    }
}

unsafe fn copy(c: &mut Context, client: &dyn Client, o: Object) -> Object {
    // SAFETY: per caller
    let r = unsafe { copy2(c, client, o) };

    // leave a pointer to the copy in the original
    // SAFETY: the source's first word is scratch from here on
    unsafe { *o = r as usize };

    r
}

// ── Reference update ──────────────────────────────────────────────────

unsafe fn update3(
    c: &mut Context,
    client: &dyn Client,
    o: Object,
    needs_visit: &mut bool,
) -> Object {
    // SAFETY: per caller
    unsafe {
        if c.was_collected(o) {
            *needs_visit = false;
            c.forwarded(o)
        } else {
            *needs_visit = true;
            copy(c, client, o)
        }
    }
}

unsafe fn update2(
    c: &mut Context,
    client: &dyn Client,
    o: Object,
    needs_visit: &mut bool,
) -> Object {
    if c.mode == CollectionType::Minor && c.gen2.contains(o) {
        *needs_visit = false;
        return o;
    }

    // SAFETY: per caller
    unsafe { update3(c, client, o, needs_visit) }
}

/// Update the reference slot at `p`: null referents stay null, referents
/// outside the collected region stay put, forwarded referents resolve to
/// their copy, and everything else is copied now. Reports whether the
/// referent's own slots still need visiting, and keeps the old-to-young
/// card hierarchy in sync with the slot's new target.
unsafe fn update(
    c: &mut Context,
    client: &dyn Client,
    p: *mut Object,
    needs_visit: &mut bool,
) -> Object {
    // SAFETY: p is a live slot per caller
    let referent = mask(unsafe { *p });
    if referent.is_null() {
        *needs_visit = false;
        return ptr::null_mut();
    }

    // SAFETY: as above
    let r = unsafe { update2(c, client, referent, needs_visit) };

    if !r.is_null() {
        if c.mode == CollectionType::Minor {
            if c.gen2.contains(p as *const usize) && !c.gen2.contains(r) {
                // SAFETY: p lies in gen2, which carries the card maps
                unsafe { c.gen2.map_set(p as *const usize, 1) };
            }
        } else if c.next_gen2.contains(p as *const usize) && !c.next_gen2.contains(r) {
            // SAFETY: p lies in next_gen2, which carries the card maps
            unsafe { c.next_gen2.map_set(p as *const usize, 1) };
        }
    }

    r
}

// ── Graph traversal ───────────────────────────────────────────────────

/// First pass over a freshly copied object: update every slot, note the
/// first two that still need visiting, and spill the rest into the
/// in-source bitset.
struct DescendWalker<'a> {
    c: &'a mut Context,
    client: &'a dyn Client,
    copy: Object,
    bits: *mut usize,
    first: usize,
    second: usize,
    last: usize,
    visits: usize,
    total: usize,
}

impl Walker for DescendWalker<'_> {
    fn visit(&mut self, offset: usize) -> bool {
        // SAFETY: the client reports live slot offsets of the copy
        unsafe {
            let mut needs_visit = false;
            let child_copy = update(
                self.c,
                self.client,
                slot_at(self.copy, offset),
                &mut needs_visit,
            );

            self.total += 1;

            if self.total == 3 {
                bitset::init(self.bits);
            }

            if needs_visit {
                self.visits += 1;

                if self.visits == 1 {
                    self.first = offset;
                } else if self.visits == 2 {
                    self.second = offset;
                }
            } else {
                set_field(self.copy, offset, child_copy);
            }

            if self.visits > 1 && self.total > 2 && (self.second != 0 || needs_visit) {
                bitset::clear_range(self.bits, self.last, offset);
                self.last = offset;

                if self.second != 0 {
                    bitset::set(self.bits, self.second, true);
                    self.second = 0;
                }

                if needs_visit {
                    bitset::set(self.bits, offset, true);
                }
            }
        }

        true
    }
}

/// Re-walk of a parent's copy on the way back up: slot one is skipped, a
/// two-slot object hands over its second slot, anything wider pops the
/// next pending offset from the bitset and stops the walk.
struct AscendWalker {
    bits: *mut usize,
    next: usize,
    total: usize,
}

impl Walker for AscendWalker {
    fn visit(&mut self, offset: usize) -> bool {
        self.total += 1;
        match self.total {
            1 => true,
            2 => {
                self.next = offset;
                true
            }
            3 => {
                // SAFETY: a pushed parent with three or more slots has an
                // initialized bitset with a bit remaining
                self.next = unsafe { bitset::next(self.bits) };
                false
            }
            _ => unreachable!("walk continued after abort"),
        }
    }
}

/// Update the slot at `p` and exhaustively traverse everything newly
/// reachable through it. Depth-first, with the stack threaded through the
/// first three words of already-forwarded source objects; only objects
/// with two or more unvisited children occupy a stack slot.
unsafe fn collect_slot(c: &mut Context, client: &dyn Client, p: *mut Object) {
    let p = mask_slot_ptr(p);

    // SAFETY: p is a live root or heap slot per caller
    let mut original = mask(unsafe { *p });
    let mut parent: Object = ptr::null_mut();

    let mut needs_visit = false;
    // SAFETY: as above
    let updated = unsafe { update(c, client, p, &mut needs_visit) };
    // SAFETY: as above
    unsafe { set_slot(p, updated) };

    if !needs_visit {
        return;
    }

    loop {
        // descend: sweep the copy's slots, remembering pending children
        // SAFETY: original was copied this cycle, so its scratch words and
        // its copy are live
        let (visits, first) = unsafe {
            let copy = c.forwarded(original);
            let bits = c.bitset_slot(original);
            let mut walker = DescendWalker {
                c: &mut *c,
                client,
                copy,
                bits,
                first: 0,
                second: 0,
                last: 0,
                visits: 0,
                total: 0,
            };
            client.walk(copy, &mut walker);
            (walker.visits, walker.first)
        };

        if visits > 0 {
            // SAFETY: as above
            unsafe {
                if visits > 1 {
                    *c.parent_slot(original) = parent;
                    parent = original;
                }

                let copy = c.forwarded(original);
                let child = get(copy, first);
                set_field(copy, first, c.forwarded(child));
                original = child;
            }
            continue;
        }

        // ascend: no pending children here, climb toward the root
        original = parent;
        if original.is_null() {
            return;
        }

        // SAFETY: pushed parents were collected this cycle
        unsafe {
            let copy = c.forwarded(original);
            let bits = c.bitset_slot(original);
            let mut walker = AscendWalker {
                bits,
                next: 0,
                total: 0,
            };
            client.walk(copy, &mut walker);
            debug_assert!(walker.total > 1);

            // pop the parent once its last pending child is dispatched
            if !(walker.total == 3 && bitset::has_more(bits)) {
                parent = *c.parent_slot(original);
            }

            let child = get(copy, walker.next);
            set_field(copy, walker.next, c.forwarded(child));
            original = child;
        }
    }
}

// ── Card-table scan ───────────────────────────────────────────────────

/// Walk the dirty-card hierarchy over `[start, end)` of gen2. Each visited
/// bit is cleared, the slice beneath it rescanned, and the bit restored
/// when an old-to-young reference survives there.
///
/// # Safety
/// `c` and `map` must be live; `map` must belong to gen2's hierarchy. The
/// scan and the slot updates it triggers alias that hierarchy, so all
/// access goes through raw pointers.
unsafe fn collect_cards(
    c: *mut Context,
    client: &dyn Client,
    map: *mut Map,
    start: usize,
    end: usize,
    dirty: &mut bool,
    expect_dirty: bool,
) {
    let mut was_dirty = false;

    // SAFETY: per contract; tenuring can grow gen2 behind the iterator,
    // which clamps to the position seen here
    let mut it = unsafe { MapIter::new(map, (*c).gen2.position(), start, end) };

    // SAFETY: per contract
    unsafe {
        while it.has_more() {
            was_dirty = true;

            if (*map).child.is_some() {
                debug_assert!((*map).scale > 1);
                let s = it.next();
                let e = s + (*map).scale;

                (*map).clear_only(s);

                let child: *mut Map =
                    &mut **(*map).child.as_mut().expect("non-leaf card level");
                let mut child_dirty = false;
                collect_cards(c, client, child, s, e, &mut child_dirty, true);
                if child_dirty {
                    (*map).set_only(s, 1);
                    *dirty = true;
                }
            } else {
                debug_assert_eq!((*map).scale, 1);
                let index = it.next();
                let p = (*c).gen2.get(index) as *mut Object;

                (*map).clear_only(index);
                if (*c).next_gen1.contains(*p) {
                    // already updated to a young copy earlier this cycle
                    (*map).set_only(index, 1);
                    *dirty = true;
                } else {
                    collect_slot(&mut *c, client, p);

                    if !(*c).gen2.contains(*p) {
                        (*map).set_only(index, 1);
                        *dirty = true;
                    }
                }
            }
        }
    }

    debug_assert!(was_dirty || !expect_dirty);
}

// ── Collection driver ─────────────────────────────────────────────────

fn init_next_gen1(c: &mut Context, footprint: usize) {
    debug_assert_eq!(c.next_gen1.capacity(), 0);

    let minimum =
        (c.gen1.position() - c.tenure_footprint) + footprint + c.gen1_padding;
    let desired = minimum;

    c.next_gen1 = Segment::new(&*c.system, Some(age_map(&c.config)), desired, minimum);

    tracing::debug!(
        target: "umzug::heap",
        bytes = c.next_gen1.capacity() * BYTES_PER_WORD,
        "sized next young space"
    );
}

fn init_next_gen2(c: &mut Context) {
    debug_assert_eq!(c.next_gen2.capacity(), 0);

    let minimum = c.gen2.position() + c.tenure_footprint + c.gen2_padding;
    let desired = (minimum * 2).max(c.config.initial_gen2_capacity / BYTES_PER_WORD);

    c.next_gen2 = Segment::new(&*c.system, Some(card_maps(&c.config)), desired, minimum);

    tracing::debug!(
        target: "umzug::heap",
        bytes = c.next_gen2.capacity() * BYTES_PER_WORD,
        "sized next old space"
    );
}

fn collect2(c: &mut Context, client: &dyn Client) {
    c.gen2_base = TOP;
    c.tenure_footprint = 0;
    c.gen1_padding = 0;
    c.gen2_padding = 0;

    if c.mode == CollectionType::Minor && c.gen2.position() > 0 {
        let end = c.gen2.position();
        let map: *mut Map = &mut **c.gen2.map.as_mut().expect("gen2 card maps");
        let cp: *mut Context = &mut *c;
        let mut dirty = false;
        // SAFETY: map is gen2's hierarchy, live for the whole scan
        unsafe {
            collect_cards(cp, client, map, 0, end, &mut dirty, false);
        }
    }

    struct RootVisitor<'a> {
        c: &'a mut Context,
        client: &'a dyn Client,
    }

    impl Visitor for RootVisitor<'_> {
        fn visit(&mut self, slot: *mut Object) {
            // SAFETY: the client presents live root slots
            unsafe { collect_slot(self.c, self.client, slot) };
        }
    }

    client.visit_roots(&mut RootVisitor { c, client });
}

fn collect_inner(c: &mut Context, client: &dyn Client, footprint: usize) {
    if c.tenure_footprint > c.gen2.remaining() {
        c.mode = CollectionType::Major;
    }

    tracing::debug!(
        target: "umzug::heap",
        mode = ?c.mode,
        footprint_words = footprint,
        tenure_footprint_words = c.tenure_footprint,
        "collection starting"
    );

    let then = Instant::now();

    init_next_gen1(c, footprint);
    if c.mode == CollectionType::Major {
        init_next_gen2(c);
    }

    collect2(c, client);

    c.gen1.replace_with(&*c.system, &mut c.next_gen1);
    if c.mode == CollectionType::Major {
        c.gen2.replace_with(&*c.system, &mut c.next_gen2);
    }

    let now = Instant::now();
    let pause = now - then;
    let run = then - c.last_collection;
    c.collections += 1;
    c.last_pause = pause;
    c.total_pause += pause;
    c.total_time += pause + run;
    c.last_collection = now;

    tracing::info!(
        target: "umzug::heap",
        mode = ?c.mode,
        collection = c.collections,
        pause_us = pause.as_micros() as u64,
        total_pause_us = c.total_pause.as_micros() as u64,
        run_us = run.as_micros() as u64,
        gen1_words = c.gen1.position(),
        gen2_words = c.gen2.position(),
        "collection complete"
    );
}

// ── Heap ──────────────────────────────────────────────────────────────

/// The collector. One per managed heap, owned by the host runtime.
pub struct Heap {
    c: Context,
}

impl Heap {
    /// Create a collector with the default anonymous-mmap [`System`].
    pub fn new(config: HeapConfig) -> Heap {
        Heap::with_system(config, Box::new(HostSystem))
    }

    pub fn with_system(config: HeapConfig, system: Box<dyn System>) -> Heap {
        config.validate().expect("invalid heap config");
        Heap {
            c: Context::new(system, config),
        }
    }

    /// Run a collection. `kind` is an advisory lower bound: a Minor request
    /// is promoted to Major when the pending tenure footprint no longer
    /// fits the old generation. `footprint` is the worst-case word count of
    /// objects living outside the collector's segments that the cycle may
    /// copy in.
    pub fn collect(&mut self, kind: CollectionType, client: &dyn Client, footprint: usize) {
        self.c.mode = kind;
        collect_inner(&mut self.c, client, footprint);
    }

    /// True when storing through `slot` would create an old-to-young
    /// reference the next minor collection must know about.
    ///
    /// # Safety
    /// `slot` must be a live word-aligned slot.
    pub unsafe fn needs_mark(&self, slot: *mut Object) -> bool {
        // SAFETY: per contract
        unsafe {
            !(*slot).is_null()
                && self.c.gen2.contains(slot as *const usize)
                && !self.c.gen2.contains(*slot)
        }
    }

    /// Record an old-to-young store through `slot` in the card hierarchy.
    ///
    /// # Safety
    /// `slot` must be a live slot inside the old generation.
    pub unsafe fn mark(&mut self, slot: *mut Object) {
        // SAFETY: per contract
        unsafe { self.c.gen2.map_set(slot as *const usize, 1) };
    }

    /// Resolve `p` through its forwarding pointer if it was moved this
    /// cycle; otherwise `p` itself.
    ///
    /// # Safety
    /// `p` must be null or point to a live object or collected source.
    pub unsafe fn follow(&self, p: Object) -> Object {
        // SAFETY: per contract
        unsafe {
            if self.c.was_collected(p) {
                self.c.forwarded(p)
            } else {
                p
            }
        }
    }

    /// Pre-declare that `p` may grow by `extra` words before the next
    /// collection; the space is reserved when destinations are sized.
    ///
    /// # Safety
    /// `p` must point to a live object.
    pub unsafe fn pad(&mut self, p: Object, extra: usize) {
        if self.c.gen1.contains(p) {
            // SAFETY: gen1 residents are covered by the age map
            if unsafe { self.c.gen1.map_get(p) } == self.c.config.tenure_threshold {
                self.c.gen2_padding += extra;
            } else {
                self.c.gen1_padding += extra;
            }
        } else if self.c.gen2.contains(p) {
            self.c.gen2_padding += extra;
        } else {
            self.c.gen1_padding += extra;
        }
    }

    /// Where `p` stands relative to the current cycle.
    ///
    /// # Safety
    /// As [`Heap::follow`].
    pub unsafe fn status(&self, p: Object) -> Status {
        let p = mask(p);

        if p.is_null() {
            Status::Null
        } else if self.c.next_gen1.contains(p) {
            Status::Reachable
        } else if self.c.next_gen2.contains(p)
            || (self.c.gen2.contains(p)
                && (self.c.mode == CollectionType::Minor
                    || self.c.gen2.index_of(p) >= self.c.gen2_base))
        {
            Status::Tenured
        } else if unsafe { self.c.was_collected(p) } {
            Status::Reachable
        } else {
            Status::Unreachable
        }
    }

    /// The kind of collection that last ran (or is running).
    pub fn collection_type(&self) -> CollectionType {
        self.c.mode
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            collections: self.c.collections,
            last_pause: self.c.last_pause,
            total_pause: self.c.total_pause,
            total_run: self.c.total_time - self.c.total_pause,
        }
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        self.c.gen1.dispose(&*self.c.system);
        self.c.next_gen1.dispose(&*self.c.system);
        self.c.gen2.dispose(&*self.c.system);
        self.c.next_gen2.dispose(&*self.c.system);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
