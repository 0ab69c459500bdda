//! A high-performance hash table using Robin Hood open addressing.
//!
//! The table is a power-of-two array of slots with a parallel array of
//! one-byte metadata tags. A tag of `0x00` marks an empty slot; an occupied
//! slot's tag carries the top seven bits of the entry's hash with the high
//! bit set. Lookups scan the tags in 32-byte blocks, comparing all 32 tags
//! against both the probe tag and the empty sentinel with a couple of SIMD
//! instructions, so probe cost is dominated by block transitions rather
//! than per-slot work.
//!
//! [`HashTable<V>`] stores values of type `V` and provides fast insertion,
//! lookup, and removal operations. This is a fairly low-level structure that
//! requires you to provide both the hash value and an equality predicate for
//! each operation. Prefer using the [`HashMap<K, V>`] or [`HashSet<V>`]
//! wrappers for a more convenient key-value or set interface unless you are
//! implementing your own Map or Set structure.
//!
//! ## Design
//!
//! Every entry caches its full 64-bit hash next to the value. The cached
//! hash drives three things: growth reinserts entries without re-invoking
//! the hash function, lookups skip the user's equality predicate unless the
//! full hash matches, and Robin Hood placement can recompute any resident's
//! probe distance from its slot alone.
//!
//! An entry's home bucket is `hash & (capacity - 1)`. Insertion walks
//! forward from the home bucket and applies the Robin Hood rule: whenever
//! the incoming entry is further from its home than the resident it is
//! standing on, the two swap and the walk continues with the displaced
//! resident. This bounds the variance of probe lengths, so the worst case
//! stays close to the mean even at high load.
//!
//! Removal uses backward-shift deletion: the cluster following the removed
//! slot is walked forward, and every entry that is not already in its home
//! bucket is pulled one slot back. The table never accumulates tombstones,
//! and an empty tag always terminates a probe.
//!
//! Tags are derived from the top 7 bits of the hash value. It is important
//! that tags are not derived from the lower bits of the hash, as those bits
//! select the home bucket; reusing them would correlate tags with their
//! position in the table, leading to significantly more tag collisions and
//! greatly increased scan times.
//!
//! All data is stored in one contiguous type-erased allocation.
//! `[ Tags | Slots ]`
//!
//! The tag array is 32-byte aligned and carries a 31-byte tail that mirrors
//! the first 31 tags, so a 32-tag load starting at any in-range index stays
//! inside the allocation (virtual wrap-around). Every tag store below index
//! 31 also stores its mirror byte.
//!
//! Sizes are always powers of two (at least 32, the probe block width) so
//! that home buckets can be computed with a mask instead of a modulo, which
//! has a significant performance impact.
//!
//! ## Safety Invariants
//!
//! The implementation relies on the following key invariants:
//!
//! 1. **Index Bounds**: every slot index is reduced with
//!    `index & (capacity - 1)` before use, and probe blocks start at
//!    multiples of 32 below the capacity, so 32-byte tag loads stay inside
//!    the tag array.
//!
//! 2. **Initialization**: a tag value of `EMPTY` indicates an uninitialized
//!    slot; any other tag value indicates the slot contains an initialized
//!    `Slot<V>` whose tag equals `0x80 | (hash >> 57)`.
//!
//! 3. **Robin Hood ordering**: walking any cluster from an empty slot, an
//!    occupied slot's probe distance is at most one greater than its
//!    predecessor's. Insertion preserves this by displacement, removal by
//!    backward-shifting.
//!
//! 4. **Occupancy**: `populated` equals the number of non-`EMPTY` logical
//!    tags and is kept strictly below the growth threshold, which itself is
//!    strictly below the capacity. A probe therefore always terminates at
//!    an empty tag.
//!
//! [`HashMap<K, V>`]: crate::hash_map::HashMap
//! [`HashSet<V>`]: crate::hash_set::HashSet

use alloc::alloc::handle_alloc_error;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::alloc::Layout;
#[cfg(target_arch = "x86")]
use core::arch::x86::*;
#[cfg(target_arch = "x86_64")]
use core::arch::x86_64::*;
use core::fmt::Debug;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ptr::NonNull;

use cfg_if::cfg_if;

use crate::TryReserveError;

cfg_if! {
    if #[cfg(feature = "load-seventy")] {
        const DEFAULT_LOAD: f32 = 0.70;
    } else {
        const DEFAULT_LOAD: f32 = 0.875;
    }
}

/// Width of one probe block: the number of tags examined per scan step.
const GROUP: usize = 32;

/// Smallest non-zero table capacity. Matches the probe block width so a
/// block scan never covers the same slot twice.
const MIN_CAPACITY: usize = 32;

/// Tag value marking an empty slot.
///
/// Occupied tags always have the high bit set, so zero can never collide
/// with a live entry and zeroed metadata is an empty table.
const EMPTY: u8 = 0x00;

#[inline(always)]
fn hashtag(hash: u64) -> u8 {
    0x80 | (hash >> 57) as u8
}

/// Applies the 64-bit murmur finalizer to a hash value.
///
/// Weak hash functions (the identity on integers being the common case)
/// alias badly against a power-of-two bucket count. Passing their output
/// through this mixer redistributes the entropy across all 64 bits. The
/// [`HashMap`] and [`HashSet`] wrappers apply it to every hash they
/// compute; use the [`HashTable`] directly to opt out.
///
/// [`HashMap`]: crate::hash_map::HashMap
/// [`HashSet`]: crate::hash_set::HashSet
#[inline(always)]
#[must_use]
pub fn mix(mut hash: u64) -> u64 {
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xff51afd7ed558ccd);
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xc4ceb9fe1a85ec53);
    hash ^= hash >> 33;
    hash
}

/// Number of elements the table may hold at `capacity` slots before it must
/// grow. Strictly less than `capacity`, so a probe always finds an empty
/// slot.
#[inline(always)]
fn load_limit(capacity: usize, load_factor: f32) -> usize {
    if capacity == 0 {
        return 0;
    }
    ((capacity as f64 * load_factor as f64) as usize).min(capacity - 1)
}

/// Smallest valid table capacity whose load limit covers `required`
/// elements.
fn capacity_for(required: usize, load_factor: f32) -> Result<usize, TryReserveError> {
    if required == 0 {
        return Ok(0);
    }
    let mut capacity = MIN_CAPACITY;
    while load_limit(capacity, load_factor) < required {
        capacity = capacity
            .checked_mul(2)
            .ok_or(TryReserveError::CapacityOverflow)?;
    }
    Ok(capacity)
}

#[cold]
fn infallible(err: TryReserveError) -> ! {
    match err {
        TryReserveError::CapacityOverflow => panic!("hash table capacity overflow"),
        TryReserveError::AllocError { layout } => handle_alloc_error(layout),
    }
}

struct Slot<V> {
    hash: u64,
    value: V,
}

#[derive(Debug, Clone, Copy)]
struct DataLayout {
    layout: Layout,
    tags_offset: usize,
    slots_offset: usize,
}

impl DataLayout {
    fn try_new<V>(capacity: usize) -> Result<Self, TryReserveError> {
        debug_assert!(capacity == 0 || (capacity.is_power_of_two() && capacity >= MIN_CAPACITY));

        let tags_len = if capacity == 0 { 0 } else { capacity + GROUP - 1 };
        let tags_layout = Layout::from_size_align(tags_len, GROUP)
            .map_err(|_| TryReserveError::CapacityOverflow)?;
        let slots_layout =
            Layout::array::<Slot<V>>(capacity).map_err(|_| TryReserveError::CapacityOverflow)?;

        let (layout, tags_offset) = Layout::new::<()>()
            .extend(tags_layout)
            .map_err(|_| TryReserveError::CapacityOverflow)?;
        let (layout, slots_offset) = layout
            .extend(slots_layout)
            .map_err(|_| TryReserveError::CapacityOverflow)?;

        Ok(DataLayout {
            layout,
            tags_offset,
            slots_offset,
        })
    }
}

/// Allocates backing storage for `layout` with all tags zeroed (empty).
///
/// The slot region is left uninitialized; occupancy is tracked entirely by
/// the tags.
fn allocate(layout: &DataLayout) -> Result<NonNull<u8>, TryReserveError> {
    if layout.layout.size() == 0 {
        return Ok(NonNull::dangling());
    }

    // SAFETY: We have validated that the layout size is non-zero. A null
    // return is reported to the caller instead of being dereferenced.
    unsafe {
        let raw = alloc::alloc::alloc(layout.layout);
        if raw.is_null() {
            return Err(TryReserveError::AllocError {
                layout: layout.layout,
            });
        }

        core::ptr::write_bytes(
            raw.add(layout.tags_offset),
            EMPTY,
            layout.slots_offset - layout.tags_offset,
        );

        Ok(NonNull::new_unchecked(raw))
    }
}

/// Debug statistics for hash table analysis.
#[cfg(feature = "stats")]
#[derive(Debug, Clone)]
pub struct DebugStats {
    /// Number of elements currently in the table
    pub populated: usize,
    /// Maximum load capacity before resize
    pub capacity: usize,
    /// Total number of slots allocated
    pub total_slots: usize,
    /// Load factor (populated / capacity)
    pub load_factor: f64,
    /// Slot utilization (populated / total_slots)
    pub slot_utilization: f64,
    /// Total memory in bytes used by the table
    pub total_bytes: usize,
    /// Estimated wasted memory in bytes
    pub wasted_bytes: usize,
}

#[cfg(feature = "stats")]
impl DebugStats {
    /// Pretty-print the debug statistics.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        println!("=== Hash Table Debug Statistics ===");
        println!(
            "Population: {}/{} ({:.2}% load factor)",
            self.populated,
            self.capacity,
            self.load_factor * 100.0
        );
        println!(
            "Slot Usage: {}/{} ({:.2}% utilization)",
            self.populated,
            self.total_slots,
            self.slot_utilization * 100.0
        );
        println!("Total Allocated: {} bytes", self.total_bytes);
        println!(
            "Memory: {} bytes wasted ({:.02}%)",
            self.wasted_bytes,
            if self.total_bytes == 0 {
                0.0
            } else {
                (self.wasted_bytes as f64 / self.total_bytes as f64) * 100.0
            }
        );
    }
}

/// Number of probe distances tracked individually by [`ProbeHistogram`];
/// longer distances land in the overflow bucket.
#[cfg(feature = "stats")]
pub const TRACKED_DISTANCES: usize = 16;

/// Probe-distance histogram for analyzing table health.
#[cfg(feature = "stats")]
pub struct ProbeHistogram {
    #[cfg_attr(not(feature = "std"), allow(dead_code))]
    populated: usize,
    /// The largest probe distance of any occupied slot.
    pub max_distance: usize,
    /// Count of occupied slots by probe distance. The final bucket counts
    /// entries at distance `TRACKED_DISTANCES` or more.
    pub distance_counts: [usize; TRACKED_DISTANCES + 1],
}

#[cfg(feature = "stats")]
impl ProbeHistogram {
    /// Pretty-print the probe histogram.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        let max = *self.distance_counts.iter().max().unwrap_or(&0);
        if max == 0 {
            println!("probe histogram: empty");
            return;
        }

        let max_bar = 60usize;
        println!(
            "probe distances ({} entries, max distance {}):",
            self.populated, self.max_distance
        );
        for (distance, &count) in self.distance_counts.iter().enumerate() {
            let bar = "█".repeat(((count * max_bar).div_ceil(max)).min(max_bar));
            if distance < TRACKED_DISTANCES {
                println!("{:>3} | {} ({})", distance, bar, count);
            } else {
                println!(" >= | {} ({})", bar, count);
            }
        }
    }
}

/// A high-performance hash table using Robin Hood open addressing.
///
/// `HashTable<V>` stores values of type `V` and provides fast insertion,
/// lookup, and removal operations. Unlike standard hash maps, this
/// implementation requires you to provide the hash value for every
/// operation and an equality predicate for probes; the hash is cached next
/// to the value and is never recomputed by the table.
///
/// Hashes are used as given. Callers with weak hash functions should pass
/// them through [`mix`] first, which is what the map and set wrappers do.
///
/// ## Performance Characteristics
///
/// - **Memory**: 9 bytes per slot overhead (tag + cached hash), plus the
///   size of `V`.
pub struct HashTable<V> {
    layout: DataLayout,
    alloc: NonNull<u8>,

    populated: usize,
    max_pop: usize,
    mask: usize,
    load_factor: f32,

    _phantom: PhantomData<V>,
}

// SAFETY: The table uniquely owns its allocation; moving or sharing the
// table moves or shares exactly the stored values.
unsafe impl<V: Send> Send for HashTable<V> {}
// SAFETY: Shared references to the table only permit reads of the stored
// values.
unsafe impl<V: Sync> Sync for HashTable<V> {}

impl<V> Debug for HashTable<V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use alloc::format;
        use alloc::string::ToString;

        if self.is_empty() {
            return f
                .debug_struct("HashTable")
                .field("metadata", &"empty")
                .field("populated", &self.populated)
                .field("capacity", &self.max_pop)
                .finish();
        }

        // SAFETY: A non-empty table has a valid allocation matching
        // `self.layout`, so `tags_ptr` yields a live slice.
        unsafe {
            f.debug_struct("HashTable")
                .field(
                    "metadata",
                    &self.tags_ptr().as_ref()[..self.capacity_slots()]
                        .chunks(GROUP)
                        .map(|block| {
                            let mut items = Vec::new();
                            for tag in block {
                                if *tag == EMPTY {
                                    items.push("..".to_string());
                                } else {
                                    items.push(format!("{:02x}", tag));
                                }
                            }
                            items.join(", ")
                        })
                        .collect::<Vec<_>>(),
                )
                .field("populated", &self.populated)
                .field("capacity", &self.max_pop)
                .finish()
        }
    }
}

impl<V> Default for HashTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Clone for HashTable<V>
where
    V: Clone,
{
    fn clone(&self) -> Self {
        let mut new_table = Self {
            layout: self.layout,
            alloc: allocate(&self.layout).unwrap_or_else(|err| infallible(err)),
            populated: 0,
            max_pop: self.max_pop,
            mask: self.mask,
            load_factor: self.load_factor,
            _phantom: PhantomData,
        };

        // SAFETY: Both tables have the same capacity. Every occupied slot
        // in the source is initialized (non-`EMPTY` tag), so cloning its
        // value and replaying the insertion from the cached hash is safe.
        // `populated` is incremented per element, which keeps the clone
        // valid to drop even if a `V::clone` call panics midway.
        unsafe {
            for index in 0..self.capacity_slots() {
                if *self.tags_ptr().as_ref().get_unchecked(index) != EMPTY {
                    let slot = self
                        .slots_ptr()
                        .as_ref()
                        .get_unchecked(index)
                        .assume_init_ref();
                    new_table.insert_unique(slot.hash, slot.value.clone());
                    new_table.populated += 1;
                }
            }
        }

        debug_assert!(new_table.populated == self.populated);

        new_table
    }
}

impl<V> Drop for HashTable<V> {
    fn drop(&mut self) {
        // SAFETY: Occupied tags mark initialized slots; those values are
        // dropped exactly once before the allocation is released.
        unsafe {
            if core::mem::needs_drop::<V>() && self.populated > 0 {
                for index in 0..self.capacity_slots() {
                    if *self.tags_ptr().as_ref().get_unchecked(index) != EMPTY {
                        self.slots_ptr()
                            .as_mut()
                            .get_unchecked_mut(index)
                            .assume_init_drop();
                    }
                }
            }

            if self.layout.layout.size() != 0 {
                alloc::alloc::dealloc(self.alloc.as_ptr(), self.layout.layout);
            }
        }
    }
}

impl<V> HashTable<V> {
    /// Creates a new, empty hash table.
    ///
    /// No memory is allocated until the first insertion.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates a new hash table with room for at least `capacity` elements.
    ///
    /// The slot count chosen is the smallest power of two whose growth
    /// threshold covers `capacity`, so inserting up to `capacity` elements
    /// will not trigger a resize.
    ///
    /// # Panics
    ///
    /// Panics on capacity overflow; aborts on allocation failure. Use
    /// [`try_with_capacity`](Self::try_with_capacity) to handle these.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::try_with_capacity(capacity).unwrap_or_else(|err| infallible(err))
    }

    /// Fallible version of [`with_capacity`](Self::with_capacity).
    pub fn try_with_capacity(capacity: usize) -> Result<Self, TryReserveError> {
        let slots = capacity_for(capacity, DEFAULT_LOAD)?;
        let layout = DataLayout::try_new::<V>(slots)?;
        let alloc = allocate(&layout)?;

        Ok(Self {
            layout,
            alloc,
            populated: 0,
            max_pop: load_limit(slots, DEFAULT_LOAD),
            mask: slots.wrapping_sub(1),
            load_factor: DEFAULT_LOAD,
            _phantom: PhantomData,
        })
    }

    /// Number of slots in the current table, zero before the first
    /// allocation.
    #[inline(always)]
    fn capacity_slots(&self) -> usize {
        self.mask.wrapping_add(1)
    }

    fn tags_ptr(&self) -> NonNull<[u8]> {
        // SAFETY: `self.alloc` points to a valid allocation described by
        // `self.layout` (or dangles with length zero), and the tag length
        // is derived from the same capacity the layout was built from.
        unsafe {
            NonNull::slice_from_raw_parts(
                self.alloc.add(self.layout.tags_offset).cast(),
                if self.layout.layout.size() == 0 {
                    0
                } else {
                    self.capacity_slots() + GROUP - 1
                },
            )
        }
    }

    fn slots_ptr(&self) -> NonNull<[MaybeUninit<Slot<V>>]> {
        // SAFETY: Same reasoning as `tags_ptr`; the slot region begins at
        // `slots_offset` and spans exactly `capacity_slots` entries.
        unsafe {
            NonNull::slice_from_raw_parts(
                self.alloc.add(self.layout.slots_offset).cast(),
                if self.layout.layout.size() == 0 {
                    0
                } else {
                    self.capacity_slots()
                },
            )
        }
    }

    /// Distance of `index` from the home bucket of `hash`, modulo the
    /// capacity.
    #[inline(always)]
    fn probe_distance(&self, index: usize, hash: u64) -> usize {
        index.wrapping_sub(hash as usize) & self.mask
    }

    /// Store a tag, replicating it into the 31-byte tail mirror when the
    /// index falls in the first block.
    ///
    /// # Safety
    ///
    /// The table must have nonzero capacity and `index` must be below it.
    #[inline(always)]
    unsafe fn set_tag(&mut self, index: usize, tag: u8) {
        // SAFETY: Caller ensures `index < capacity`; the mirror byte at
        // `capacity + index` exists for all `index < GROUP - 1`.
        unsafe {
            *self.tags_ptr().as_mut().get_unchecked_mut(index) = tag;
            if index < GROUP - 1 {
                let capacity = self.capacity_slots();
                *self.tags_ptr().as_mut().get_unchecked_mut(capacity + index) = tag;
            }
        }
    }

    /// Scan the 32 tags starting at `base`, returning a bitmask of tags
    /// equal to `tag` and a bitmask of empty tags.
    ///
    /// # Safety
    ///
    /// `base + 32` must not exceed the tag array (mirror included).
    #[inline(always)]
    unsafe fn scan_group(&self, base: usize, tag: u8) -> (u32, u32) {
        if (cfg!(target_arch = "x86") || cfg!(target_arch = "x86_64"))
            && cfg!(target_feature = "avx2")
        {
            // SAFETY: Caller validated bounds, and we are on x86/x86_64
            // with AVX2 support.
            unsafe { self.scan_group_avx2(base, tag) }
        } else if (cfg!(target_arch = "x86") || cfg!(target_arch = "x86_64"))
            && cfg!(target_feature = "sse2")
        {
            // SAFETY: Caller validated bounds, and we are on x86/x86_64
            // with SSE2 support.
            unsafe { self.scan_group_sse2(base, tag) }
        } else {
            let mut matches = 0u32;
            let mut empties = 0u32;
            for i in 0..GROUP {
                // SAFETY: Caller ensures `base + i` is within the tag array.
                let t = unsafe { *self.tags_ptr().as_ref().get_unchecked(base + i) };
                if t == tag {
                    matches |= 1 << i;
                }
                if t == EMPTY {
                    empties |= 1 << i;
                }
            }
            (matches, empties)
        }
    }

    /// AVX2 version of `scan_group`: one 256-bit load covers the block.
    ///
    /// # Safety
    ///
    /// As for `scan_group`, and the CPU must support AVX2.
    #[inline(always)]
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    unsafe fn scan_group_avx2(&self, base: usize, tag: u8) -> (u32, u32) {
        // SAFETY: Caller validated that 32 bytes starting at `base` are in
        // bounds. The load tolerates unaligned addresses.
        unsafe {
            let ptr = self.tags_ptr().as_ref().as_ptr().add(base);
            let data = _mm256_loadu_si256(ptr as *const __m256i);

            let matches = _mm256_cmpeq_epi8(data, _mm256_set1_epi8(tag as i8));
            let empties = _mm256_cmpeq_epi8(data, _mm256_setzero_si256());

            (
                _mm256_movemask_epi8(matches) as u32,
                _mm256_movemask_epi8(empties) as u32,
            )
        }
    }

    /// SSE2 version of `scan_group`: two 128-bit loads cover the block.
    ///
    /// # Safety
    ///
    /// As for `scan_group`, and the CPU must support SSE2.
    #[inline(always)]
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    unsafe fn scan_group_sse2(&self, base: usize, tag: u8) -> (u32, u32) {
        // SAFETY: Caller validated that 32 bytes starting at `base` are in
        // bounds.
        unsafe {
            let ptr = self.tags_ptr().as_ref().as_ptr().add(base);
            let tag_vec = _mm_set1_epi8(tag as i8);
            let zero = _mm_setzero_si128();

            let lo = _mm_loadu_si128(ptr as *const __m128i);
            let hi = _mm_loadu_si128(ptr.add(16) as *const __m128i);

            let matches = (_mm_movemask_epi8(_mm_cmpeq_epi8(lo, tag_vec)) as u32)
                | ((_mm_movemask_epi8(_mm_cmpeq_epi8(hi, tag_vec)) as u32) << 16);
            let empties = (_mm_movemask_epi8(_mm_cmpeq_epi8(lo, zero)) as u32)
                | ((_mm_movemask_epi8(_mm_cmpeq_epi8(hi, zero)) as u32) << 16);

            (matches, empties)
        }
    }

    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    unsafe fn scan_group_avx2(&self, _base: usize, _tag: u8) -> (u32, u32) {
        unreachable!()
    }

    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    unsafe fn scan_group_sse2(&self, _base: usize, _tag: u8) -> (u32, u32) {
        unreachable!()
    }

    /// Find the slot holding a matching value, probing in 32-tag blocks.
    #[inline]
    fn find_index(&self, hash: u64, eq: impl Fn(&V) -> bool) -> Option<usize> {
        if self.populated == 0 {
            return None;
        }

        let tag = hashtag(hash);
        let home = (hash as usize) & self.mask;
        let mut base = home & !(GROUP - 1);
        // Empty bits below the home offset belong to the preceding cluster
        // and must not terminate the scan of the first block.
        let mut empty_cutoff: u32 = !0u32 << (home & (GROUP - 1));

        loop {
            // SAFETY: `base` is a multiple of 32 below the capacity, so the
            // 32-byte load is in bounds.
            let (mut matches, empties) = unsafe { self.scan_group(base, tag) };

            while matches != 0 {
                let index = base + matches.trailing_zeros() as usize;
                matches &= matches - 1;

                // SAFETY: `index < base + 32 <= capacity`, and a matching
                // tag implies the slot is initialized.
                let slot =
                    unsafe { self.slots_ptr().as_ref().get_unchecked(index).assume_init_ref() };
                if slot.hash == hash && eq(&slot.value) {
                    return Some(index);
                }
            }

            if empties & empty_cutoff != 0 {
                return None;
            }

            base = (base + GROUP) & self.mask;
            empty_cutoff = !0;
        }
    }

    /// Place an entry known to be absent, applying the Robin Hood rule.
    ///
    /// Returns the index where the incoming entry landed (displaced
    /// residents may keep moving further along the cluster).
    ///
    /// # Safety
    ///
    /// The table must have nonzero capacity with at least one empty slot,
    /// and no occupied slot may hold a value equal to the incoming one.
    unsafe fn insert_unique(&mut self, hash: u64, value: V) -> usize {
        let mut index = (hash as usize) & self.mask;
        let mut distance = 0usize;
        let mut incoming = Slot { hash, value };
        let mut landed = None;

        loop {
            // SAFETY: `index` is masked into bounds.
            let tag = unsafe { *self.tags_ptr().as_ref().get_unchecked(index) };

            if tag == EMPTY {
                // SAFETY: The slot is empty and in bounds; writing the slot
                // and its tag transfers ownership of `incoming`.
                unsafe {
                    self.set_tag(index, hashtag(incoming.hash));
                    self.slots_ptr()
                        .as_mut()
                        .get_unchecked_mut(index)
                        .write(incoming);
                }
                return landed.unwrap_or(index);
            }

            // SAFETY: An occupied tag implies the slot is initialized.
            let resident = unsafe {
                self.slots_ptr()
                    .as_mut()
                    .get_unchecked_mut(index)
                    .assume_init_mut()
            };
            let resident_distance = self.probe_distance(index, resident.hash);

            if resident_distance < distance {
                // Robin Hood steal: the entry further from home takes the
                // slot, the displaced resident continues probing.
                core::mem::swap(resident, &mut incoming);
                let stolen_hash = resident.hash;
                // SAFETY: `index` is in bounds and the slot stays occupied.
                unsafe { self.set_tag(index, hashtag(stolen_hash)) };
                if landed.is_none() {
                    landed = Some(index);
                }
                distance = resident_distance;
            }

            index = (index + 1) & self.mask;
            distance += 1;
        }
    }

    /// Remove the entry at `index` and backward-shift the cluster behind it
    /// so probe chains stay closed.
    ///
    /// # Safety
    ///
    /// `index` must be an occupied slot.
    unsafe fn remove_at(&mut self, index: usize) -> V {
        self.populated -= 1;

        // SAFETY: Caller guarantees the slot is occupied, hence
        // initialized; the read takes ownership of the value.
        let slot = unsafe { self.slots_ptr().as_ref().get_unchecked(index).assume_init_read() };
        // SAFETY: `index` is in bounds.
        unsafe { self.set_tag(index, EMPTY) };

        let mut hole = index;
        let mut next = (index + 1) & self.mask;
        loop {
            // SAFETY: `next` is masked into bounds.
            let tag = unsafe { *self.tags_ptr().as_ref().get_unchecked(next) };
            if tag == EMPTY {
                break;
            }

            // SAFETY: An occupied tag implies the slot is initialized.
            let hash = unsafe {
                self.slots_ptr()
                    .as_ref()
                    .get_unchecked(next)
                    .assume_init_ref()
                    .hash
            };
            if self.probe_distance(next, hash) == 0 {
                // Already home; shifting it would place it before its home
                // bucket and break lookups.
                break;
            }

            // SAFETY: `next` is initialized and `hole` is empty; the
            // bitwise copy moves ownership, and both tags are updated
            // before either slot is observed again.
            unsafe {
                let slots = self.slots_ptr().as_mut().as_mut_ptr();
                core::ptr::copy_nonoverlapping(slots.add(next), slots.add(hole), 1);
                self.set_tag(hole, tag);
                self.set_tag(next, EMPTY);
            }

            hole = next;
            next = (next + 1) & self.mask;
        }

        slot.value
    }

    /// Returns an iterator over all values in the table.
    ///
    /// The iterator yields `&V` references in an arbitrary order.
    /// The iteration order is not specified and may change between versions.
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            table: self,
            index: 0,
        }
    }

    /// Returns an iterator over all values in the table, yielding mutable
    /// references in an arbitrary order.
    pub fn iter_mut(&mut self) -> IterMut<'_, V> {
        IterMut {
            tags: self.tags_ptr(),
            slots: self.slots_ptr(),
            capacity: self.capacity_slots(),
            index: 0,
            _marker: PhantomData,
        }
    }

    /// Returns an iterator that removes and yields all values from the
    /// table.
    ///
    /// After calling `drain()`, the table will be empty but keeps its
    /// capacity. Dropping the iterator drops any unyielded values;
    /// `mem::forget`-ing it leaks them.
    pub fn drain(&mut self) -> Drain<'_, V> {
        let capacity = self.capacity_slots();
        let occupied: Box<[u8]> = if capacity == 0 {
            Box::new([])
        } else {
            // SAFETY: A non-zero-capacity table has live tag storage. The
            // snapshot records which slots hold values; clearing the live
            // tags afterwards hands ownership of those values to the
            // iterator, so nothing is double-dropped.
            unsafe {
                let snapshot = self.tags_ptr().as_ref()[..capacity]
                    .to_vec()
                    .into_boxed_slice();
                core::ptr::write_bytes(
                    self.alloc.as_ptr().add(self.layout.tags_offset),
                    EMPTY,
                    self.layout.slots_offset - self.layout.tags_offset,
                );
                snapshot
            }
        };

        self.populated = 0;

        Drain {
            table: self,
            occupied,
            index: 0,
        }
    }

    /// Retains only the values for which the predicate returns `true`.
    ///
    /// Removed values are dropped and their clusters backward-shifted, so
    /// the table stays probe-correct throughout. Each surviving value is
    /// visited exactly once.
    pub fn retain(&mut self, mut f: impl FnMut(&mut V) -> bool) {
        if self.populated == 0 {
            return;
        }

        let capacity = self.capacity_slots();
        let mask = self.mask;

        // Anchor the walk at an empty slot. Backward shifts never move an
        // entry across an empty slot, so every displaced survivor lands on
        // a position the cursor has not passed yet.
        let mut anchor = 0;
        // SAFETY: The load limit keeps at least one slot empty, so the
        // search terminates below `capacity`.
        unsafe {
            while *self.tags_ptr().as_ref().get_unchecked(anchor) != EMPTY {
                anchor += 1;
            }
        }

        let mut step = 1;
        while step <= capacity {
            let index = (anchor + step) & mask;
            // SAFETY: `index` is masked into bounds; occupied tags imply
            // initialized slots, which is what `remove_at` requires.
            unsafe {
                if *self.tags_ptr().as_ref().get_unchecked(index) != EMPTY {
                    let keep = f(&mut self
                        .slots_ptr()
                        .as_mut()
                        .get_unchecked_mut(index)
                        .assume_init_mut()
                        .value);
                    if !keep {
                        self.remove_at(index);
                        // The shift may have pulled the next cluster entry
                        // into this slot; examine it again.
                        continue;
                    }
                }
            }
            step += 1;
        }
    }

    /// Returns `true` if the table contains no elements.
    pub fn is_empty(&self) -> bool {
        self.populated == 0
    }

    /// Returns the number of elements in the table.
    pub fn len(&self) -> usize {
        self.populated
    }

    /// Removes all elements from the table.
    ///
    /// This operation preserves the table's allocated capacity. All values
    /// are properly dropped if they implement `Drop`.
    pub fn clear(&mut self) {
        // SAFETY: Occupied tags mark initialized values; they are dropped
        // once and then the metadata (mirror included) is zeroed.
        unsafe {
            if core::mem::needs_drop::<V>() && self.populated > 0 {
                for index in 0..self.capacity_slots() {
                    if *self.tags_ptr().as_ref().get_unchecked(index) != EMPTY {
                        self.slots_ptr()
                            .as_mut()
                            .get_unchecked_mut(index)
                            .assume_init_drop();
                    }
                }
            }

            if self.layout.layout.size() != 0 {
                core::ptr::write_bytes(
                    self.alloc.as_ptr().add(self.layout.tags_offset),
                    EMPTY,
                    self.layout.slots_offset - self.layout.tags_offset,
                );
            }
        }

        self.populated = 0;
    }

    /// Shrinks the capacity of the hash table as much as possible.
    ///
    /// If the table is empty, it is completely deallocated and reset to the
    /// zero-capacity state.
    pub fn shrink_to_fit(&mut self) {
        if self.populated == 0 {
            if self.layout.layout.size() != 0 {
                // SAFETY: The allocation is live and matches `self.layout`.
                unsafe {
                    alloc::alloc::dealloc(self.alloc.as_ptr(), self.layout.layout);
                }
                self.alloc = NonNull::dangling();
                self.layout = DataLayout::try_new::<V>(0).expect("zero layout cannot overflow");
                self.mask = usize::MAX;
                self.max_pop = 0;
            }
            return;
        }

        let target = capacity_for(self.populated, self.load_factor)
            .expect("current capacity already covers the occupancy");
        if target < self.capacity_slots() {
            if let Err(err) = self.resize_to(target) {
                infallible(err);
            }
        }
    }

    /// Reserves capacity for at least `additional` more elements.
    ///
    /// The collection may reserve more space to speculatively avoid
    /// frequent reallocations. Does nothing if capacity is already
    /// sufficient.
    ///
    /// # Panics
    ///
    /// Panics on capacity overflow; aborts on allocation failure.
    pub fn reserve(&mut self, additional: usize) {
        if let Err(err) = self.try_reserve(additional) {
            infallible(err);
        }
    }

    /// Fallible version of [`reserve`](Self::reserve).
    ///
    /// On failure the table is left exactly as it was: the replacement
    /// arrays are allocated and filled before the old allocation is
    /// released, so an error cannot lose or corrupt entries.
    pub fn try_reserve(&mut self, additional: usize) -> Result<(), TryReserveError> {
        let required = self
            .populated
            .checked_add(additional)
            .ok_or(TryReserveError::CapacityOverflow)?;
        if required > self.max_pop {
            let target = capacity_for(required, self.load_factor)?;
            self.resize_to(target)?;
        }
        Ok(())
    }

    /// Returns the maximum load factor, the occupancy fraction at which the
    /// table grows.
    pub fn max_load_factor(&self) -> f32 {
        self.load_factor
    }

    /// Sets the maximum load factor.
    ///
    /// Accepts values in `(0, 1]`; the growth threshold is always clamped
    /// strictly below the capacity, since a completely full table would
    /// probe forever. Lowering the factor below the current occupancy grows
    /// the table immediately.
    ///
    /// # Panics
    ///
    /// Panics if `load_factor` is not in `(0, 1]`.
    pub fn set_max_load_factor(&mut self, load_factor: f32) {
        assert!(
            load_factor > 0.0 && load_factor <= 1.0,
            "load factor must be in (0, 1]"
        );

        self.load_factor = load_factor;
        self.max_pop = load_limit(self.capacity_slots(), load_factor);

        if self.capacity_slots() != 0 && self.populated >= self.max_pop {
            self.grow();
        }
    }

    /// Removes and returns a value from the table.
    ///
    /// The value is identified by its hash and an equality predicate. If
    /// the value is found it is removed, the cluster behind it is
    /// backward-shifted, and the value is returned. Otherwise `None` is
    /// returned.
    ///
    /// # Arguments
    ///
    /// * `hash` - The hash value of the entry to remove
    /// * `eq` - A predicate function that returns `true` for the value to
    ///   remove
    pub fn remove(&mut self, hash: u64, eq: impl Fn(&V) -> bool) -> Option<V> {
        let index = self.find_index(hash, eq)?;
        // SAFETY: `find_index` only returns occupied slots.
        Some(unsafe { self.remove_at(index) })
    }

    /// Finds a value in the table by hash and equality predicate.
    ///
    /// Returns a reference to the value if found, or `None` if no matching
    /// value exists. This method does not modify the table and can be
    /// called on shared references.
    ///
    /// # Arguments
    ///
    /// * `hash` - The hash value to search for
    /// * `eq` - A predicate function that returns `true` for the desired value
    #[inline]
    pub fn find(&self, hash: u64, eq: impl Fn(&V) -> bool) -> Option<&V> {
        let index = self.find_index(hash, eq)?;
        // SAFETY: `find_index` only returns occupied, initialized slots.
        Some(unsafe {
            &self
                .slots_ptr()
                .as_ref()
                .get_unchecked(index)
                .assume_init_ref()
                .value
        })
    }

    /// Finds a value in the table by hash and equality predicate, returning
    /// a mutable reference.
    ///
    /// This method allows modification of values in-place without removing
    /// and re-inserting them.
    #[inline]
    pub fn find_mut(&mut self, hash: u64, eq: impl Fn(&V) -> bool) -> Option<&mut V> {
        let index = self.find_index(hash, eq)?;
        // SAFETY: `find_index` only returns occupied, initialized slots.
        Some(unsafe {
            &mut self
                .slots_ptr()
                .as_mut()
                .get_unchecked_mut(index)
                .assume_init_mut()
                .value
        })
    }

    /// Gets an entry for the given hash and equality predicate.
    ///
    /// This method returns an [`Entry`] enum that allows for efficient
    /// insertion or modification of values. If the table is at its growth
    /// threshold it is grown before the probe, so a subsequent
    /// [`VacantEntry::insert`] cannot fail.
    ///
    /// # Arguments
    ///
    /// * `hash` - The hash value for the entry
    /// * `eq` - A predicate function that returns `true` for matching values
    #[inline(always)]
    pub fn entry(&mut self, hash: u64, eq: impl Fn(&V) -> bool) -> Entry<'_, V> {
        if self.populated >= self.max_pop {
            self.grow();
        }
        self.entry_impl(hash, eq)
    }

    /// Fallible version of [`entry`](Self::entry): reports allocation
    /// failure from the growth step instead of aborting.
    pub fn try_entry(
        &mut self,
        hash: u64,
        eq: impl Fn(&V) -> bool,
    ) -> Result<Entry<'_, V>, TryReserveError> {
        if self.populated >= self.max_pop {
            self.try_grow()?;
        }
        Ok(self.entry_impl(hash, eq))
    }

    #[inline]
    fn entry_impl(&mut self, hash: u64, eq: impl Fn(&V) -> bool) -> Entry<'_, V> {
        match self.find_index(hash, eq) {
            Some(index) => Entry::Occupied(OccupiedEntry { table: self, index }),
            None => Entry::Vacant(VacantEntry { table: self, hash }),
        }
    }

    #[cold]
    #[inline(never)]
    fn grow(&mut self) {
        if let Err(err) = self.try_grow() {
            infallible(err);
        }
    }

    fn try_grow(&mut self) -> Result<(), TryReserveError> {
        let mut target = match self.capacity_slots() {
            0 => MIN_CAPACITY,
            capacity => capacity
                .checked_mul(2)
                .ok_or(TryReserveError::CapacityOverflow)?,
        };
        // Small load factors can leave a doubled table still at threshold.
        while load_limit(target, self.load_factor) <= self.populated {
            target = target
                .checked_mul(2)
                .ok_or(TryReserveError::CapacityOverflow)?;
        }
        self.resize_to(target)
    }

    /// Replace the backing arrays with freshly sized ones and reinsert
    /// every entry from its cached hash.
    ///
    /// The new allocation is fully populated before the old one is
    /// released, so on error the table is untouched.
    fn resize_to(&mut self, new_capacity: usize) -> Result<(), TryReserveError> {
        debug_assert!(new_capacity.is_power_of_two() && new_capacity >= MIN_CAPACITY);
        debug_assert!(load_limit(new_capacity, self.load_factor) >= self.populated);

        let new_layout = DataLayout::try_new::<V>(new_capacity)?;
        let new_alloc = allocate(&new_layout)?;

        let old_capacity = self.capacity_slots();
        let old_layout = core::mem::replace(&mut self.layout, new_layout);
        let old_alloc = core::mem::replace(&mut self.alloc, new_alloc);
        self.mask = new_capacity - 1;
        self.max_pop = load_limit(new_capacity, self.load_factor);

        if old_capacity == 0 {
            return Ok(());
        }

        // SAFETY: The old allocation is still live and its tags describe
        // which slots hold initialized values. Each value is moved out
        // exactly once and reinserted from its cached hash; the new table
        // was sized so reinsertion always finds an empty slot. The old
        // allocation is released without running destructors because
        // ownership of its contents was transferred.
        unsafe {
            let old_tags: NonNull<[u8]> = NonNull::slice_from_raw_parts(
                old_alloc.add(old_layout.tags_offset).cast(),
                old_capacity,
            );
            let old_slots: NonNull<[MaybeUninit<Slot<V>>]> = NonNull::slice_from_raw_parts(
                old_alloc.add(old_layout.slots_offset).cast(),
                old_capacity,
            );

            for index in 0..old_capacity {
                if *old_tags.as_ref().get_unchecked(index) == EMPTY {
                    continue;
                }
                let slot = old_slots.as_ref().get_unchecked(index).assume_init_read();
                self.insert_unique(slot.hash, slot.value);
            }

            if old_layout.layout.size() != 0 {
                alloc::alloc::dealloc(old_alloc.as_ptr(), old_layout.layout);
            }
        }

        Ok(())
    }

    /// Returns the current capacity of the table.
    ///
    /// The capacity represents the maximum number of elements the table can
    /// hold before it needs to resize, i.e. the load threshold of the
    /// current slot array.
    pub fn capacity(&self) -> usize {
        self.max_pop
    }

    /// Computes a histogram of probe distances for the current table state.
    ///
    /// This method is intended for debugging and performance analysis. With
    /// Robin Hood placement the distribution should stay tight even at high
    /// load; a long tail here usually means a weak hash reached the table
    /// unmixed.
    #[cfg(feature = "stats")]
    pub fn probe_histogram(&self) -> ProbeHistogram {
        let mut histogram = ProbeHistogram {
            populated: self.populated,
            max_distance: 0,
            distance_counts: [0; TRACKED_DISTANCES + 1],
        };

        // SAFETY: Indices stay below the capacity and occupied tags imply
        // initialized slots.
        unsafe {
            for index in 0..self.capacity_slots() {
                if *self.tags_ptr().as_ref().get_unchecked(index) == EMPTY {
                    continue;
                }
                let hash = self
                    .slots_ptr()
                    .as_ref()
                    .get_unchecked(index)
                    .assume_init_ref()
                    .hash;
                let distance = self.probe_distance(index, hash);
                histogram.max_distance = histogram.max_distance.max(distance);
                histogram.distance_counts[distance.min(TRACKED_DISTANCES)] += 1;
            }
        }

        histogram
    }

    /// Returns detailed memory and utilization statistics for debugging.
    #[cfg(feature = "stats")]
    pub fn debug_stats(&self) -> DebugStats {
        let total_slots = self.capacity_slots();

        DebugStats {
            populated: self.populated,
            capacity: self.max_pop,
            total_slots,
            load_factor: if self.max_pop == 0 {
                0.0
            } else {
                self.populated as f64 / self.max_pop as f64
            },
            slot_utilization: if total_slots == 0 {
                0.0
            } else {
                self.populated as f64 / total_slots as f64
            },
            total_bytes: self.layout.layout.size(),
            wasted_bytes: (total_slots - self.populated) * (core::mem::size_of::<Slot<V>>() + 1),
        }
    }

    /// Largest probe distance of any occupied slot.
    #[cfg(test)]
    pub(crate) fn max_probe_distance(&self) -> usize {
        let mut max = 0;
        // SAFETY: Indices stay below the capacity and occupied tags imply
        // initialized slots.
        unsafe {
            for index in 0..self.capacity_slots() {
                if *self.tags_ptr().as_ref().get_unchecked(index) == EMPTY {
                    continue;
                }
                let hash = self
                    .slots_ptr()
                    .as_ref()
                    .get_unchecked(index)
                    .assume_init_ref()
                    .hash;
                max = max.max(self.probe_distance(index, hash));
            }
        }
        max
    }

    /// Audits the structural invariants: the occupancy count, the tag
    /// derivation, the tail mirror, and Robin Hood ordering along every
    /// cluster.
    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        let capacity = self.capacity_slots();
        if capacity == 0 {
            assert_eq!(self.populated, 0);
            return;
        }

        // SAFETY: Indices stay below the tag array length (mirror
        // included), and occupied tags imply initialized slots.
        unsafe {
            let tags = self.tags_ptr().as_ref();
            let slots = self.slots_ptr().as_ref();

            let occupied = tags[..capacity].iter().filter(|&&t| t != EMPTY).count();
            assert_eq!(occupied, self.populated, "size must match occupied tags");
            assert!(self.populated <= self.max_pop);
            assert!(self.max_pop < capacity);

            for index in 0..GROUP - 1 {
                assert_eq!(
                    tags[capacity + index],
                    tags[index],
                    "tail mirror out of sync at {index}"
                );
            }

            for index in 0..capacity {
                if tags[index] == EMPTY {
                    continue;
                }
                let slot = slots.get_unchecked(index).assume_init_ref();
                assert_eq!(
                    tags[index],
                    hashtag(slot.hash),
                    "tag must be derived from the cached hash"
                );

                let distance = self.probe_distance(index, slot.hash);
                let prev = index.wrapping_sub(1) & self.mask;
                if tags[prev] == EMPTY {
                    assert_eq!(distance, 0, "cluster head must be in its home bucket");
                } else {
                    let prev_hash = slots.get_unchecked(prev).assume_init_ref().hash;
                    let prev_distance = self.probe_distance(prev, prev_hash);
                    assert!(
                        distance <= prev_distance + 1,
                        "robin hood ordering violated at {index}"
                    );
                }
            }
        }
    }
}

/// A view into a single entry in the hash table, which may be vacant or
/// occupied.
///
/// This enum is constructed from the [`entry`] method on [`HashTable`].
/// It provides efficient APIs for insertion and modification operations.
///
/// [`entry`]: HashTable::entry
pub enum Entry<'a, V> {
    /// A vacant entry - the key is not present in the table
    Vacant(VacantEntry<'a, V>),
    /// An occupied entry - the key is present in the table
    Occupied(OccupiedEntry<'a, V>),
}

impl<'a, V> Entry<'a, V> {
    /// Inserts a default value if the entry is vacant and returns a mutable
    /// reference.
    ///
    /// If the entry is occupied, returns a mutable reference to the
    /// existing value.
    pub fn or_insert(self, default: V) -> &'a mut V {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(default),
        }
    }

    /// Inserts a value computed from a closure if the entry is vacant and
    /// returns a mutable reference.
    ///
    /// If the entry is occupied, the closure is never called and a mutable
    /// reference to the existing value is returned.
    pub fn or_insert_with(self, default: impl FnOnce() -> V) -> &'a mut V {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(default()),
        }
    }

    /// Provides in-place mutable access to an occupied entry before any
    /// potential inserts into the table.
    ///
    /// If the entry is vacant, returns `None` without inserting anything.
    pub fn and_modify(self, f: impl FnOnce(&mut V)) -> Option<&'a mut V> {
        match self {
            Entry::Occupied(entry) => {
                let value = entry.into_mut();
                f(value);
                Some(value)
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Inserts the default value if the entry is vacant and returns a
    /// mutable reference.
    pub fn or_default(self) -> &'a mut V
    where
        V: Default,
    {
        self.or_insert_with(Default::default)
    }
}

/// A view into a vacant entry in the hash table.
///
/// This struct is created by the [`entry`] method on [`HashTable`] when no
/// matching value is present. It records the probed hash so insertion does
/// not search again.
///
/// [`entry`]: HashTable::entry
pub struct VacantEntry<'a, V> {
    table: &'a mut HashTable<V>,
    hash: u64,
}

impl<'a, V> VacantEntry<'a, V> {
    /// Inserts a value into the table and returns a mutable reference to
    /// it.
    ///
    /// The slot is chosen by the Robin Hood placement walk; residents
    /// closer to their homes may be displaced to keep probe lengths
    /// bounded.
    pub fn insert(self, value: V) -> &'a mut V {
        self.table.populated += 1;

        // SAFETY: A `VacantEntry` is only constructed by `entry`/`try_entry`
        // after the growth check, so the capacity is nonzero and below
        // threshold, and the probe found no equal value for this hash.
        // `insert_unique` returns the in-bounds, initialized slot where the
        // value landed.
        unsafe {
            let index = self.table.insert_unique(self.hash, value);
            &mut self
                .table
                .slots_ptr()
                .as_mut()
                .get_unchecked_mut(index)
                .assume_init_mut()
                .value
        }
    }
}

/// A view into an occupied entry in the hash table.
///
/// This struct is created by the [`entry`] method on [`HashTable`] when the
/// requested value is present. It provides methods to access, modify, or
/// remove the existing value.
///
/// [`entry`]: HashTable::entry
pub struct OccupiedEntry<'a, V> {
    table: &'a mut HashTable<V>,
    index: usize,
}

// Safety invariant for OccupiedEntry methods:
// An `OccupiedEntry` is only created after `find_index` located an occupied
// slot, so `index` is in bounds and the slot holds an initialized value for
// the entry's entire lifetime (the entry borrows the table mutably, so no
// other operation can move or remove it).
impl<'a, V> OccupiedEntry<'a, V> {
    /// Gets a reference to the value in the entry.
    pub fn get(&self) -> &V {
        // SAFETY: See safety invariant comment above `impl` block.
        unsafe {
            &self
                .table
                .slots_ptr()
                .as_ref()
                .get_unchecked(self.index)
                .assume_init_ref()
                .value
        }
    }

    /// Gets a mutable reference to the value in the entry.
    pub fn get_mut(&mut self) -> &mut V {
        // SAFETY: See safety invariant comment above `impl` block.
        unsafe {
            &mut self
                .table
                .slots_ptr()
                .as_mut()
                .get_unchecked_mut(self.index)
                .assume_init_mut()
                .value
        }
    }

    /// Converts the entry into a mutable reference to the value with the
    /// lifetime of the table borrow.
    pub fn into_mut(self) -> &'a mut V {
        // SAFETY: See safety invariant comment above `impl` block.
        unsafe {
            &mut self
                .table
                .slots_ptr()
                .as_mut()
                .get_unchecked_mut(self.index)
                .assume_init_mut()
                .value
        }
    }

    /// Removes the entry from the table and returns the value.
    ///
    /// The cluster behind the slot is backward-shifted to keep probe chains
    /// closed.
    pub fn remove(self) -> V {
        // SAFETY: See safety invariant comment above `impl` block.
        unsafe { self.table.remove_at(self.index) }
    }
}

/// An iterator over the values in a [`HashTable`].
///
/// This struct is created by the [`iter`] method on [`HashTable`].
/// It yields `&V` references in an arbitrary order.
///
/// [`iter`]: HashTable::iter
pub struct Iter<'a, V> {
    table: &'a HashTable<V>,
    index: usize,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        // SAFETY: `self.index` stays below the capacity, and occupied tags
        // imply initialized slots.
        unsafe {
            let capacity = self.table.capacity_slots();
            while self.index < capacity {
                let index = self.index;
                self.index += 1;
                if *self.table.tags_ptr().as_ref().get_unchecked(index) != EMPTY {
                    return Some(
                        &self
                            .table
                            .slots_ptr()
                            .as_ref()
                            .get_unchecked(index)
                            .assume_init_ref()
                            .value,
                    );
                }
            }
            None
        }
    }
}

/// A mutable iterator over the values in a [`HashTable`].
///
/// This struct is created by the [`iter_mut`] method on [`HashTable`].
///
/// [`iter_mut`]: HashTable::iter_mut
pub struct IterMut<'a, V> {
    tags: NonNull<[u8]>,
    slots: NonNull<[MaybeUninit<Slot<V>>]>,
    capacity: usize,
    index: usize,
    _marker: PhantomData<&'a mut HashTable<V>>,
}

impl<'a, V> Iterator for IterMut<'a, V> {
    type Item = &'a mut V;

    fn next(&mut self) -> Option<Self::Item> {
        // SAFETY: The iterator holds the table's unique borrow for 'a, the
        // index stays below the capacity, occupied tags imply initialized
        // slots, and each slot is yielded at most once.
        unsafe {
            while self.index < self.capacity {
                let index = self.index;
                self.index += 1;
                if *self.tags.as_ref().get_unchecked(index) != EMPTY {
                    return Some(
                        &mut self
                            .slots
                            .as_mut()
                            .get_unchecked_mut(index)
                            .assume_init_mut()
                            .value,
                    );
                }
            }
            None
        }
    }
}

/// A draining iterator over the values in a [`HashTable`].
///
/// This struct is created by the [`drain`] method on [`HashTable`].
/// It yields owned `V` values and empties the table as it iterates.
///
/// [`drain`]: HashTable::drain
pub struct Drain<'a, V> {
    table: &'a mut HashTable<V>,
    occupied: Box<[u8]>,
    index: usize,
}

impl<V> Drop for Drain<'_, V> {
    fn drop(&mut self) {
        for _ in &mut *self {}
    }
}

impl<V> Iterator for Drain<'_, V> {
    type Item = V;

    fn next(&mut self) -> Option<Self::Item> {
        // SAFETY: The snapshot records which slots held initialized values
        // when the drain began; the table's own tags were cleared at that
        // point, so each value is read out exactly once by this iterator.
        unsafe {
            while self.index < self.occupied.len() {
                let index = self.index;
                self.index += 1;
                if *self.occupied.get_unchecked(index) != EMPTY {
                    return Some(
                        self.table
                            .slots_ptr()
                            .as_ref()
                            .get_unchecked(index)
                            .assume_init_read()
                            .value,
                    );
                }
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::string::String;
    use alloc::string::ToString;
    use alloc::vec;
    use alloc::vec::Vec;
    use core::hash::Hasher;

    use rand::TryRngCore;
    use rand::rngs::OsRng;
    use siphasher::sip::SipHasher;

    use super::*;

    struct HashState {
        k0: u64,
        k1: u64,
    }

    impl HashState {
        fn default() -> Self {
            let mut rng = OsRng;
            Self {
                k0: rng.try_next_u64().unwrap(),
                k1: rng.try_next_u64().unwrap(),
            }
        }

        fn build_hasher(&self) -> SipHasher {
            SipHasher::new_with_keys(self.k0, self.k1)
        }
    }

    #[derive(Debug, PartialEq, Eq, Clone)]
    struct Item {
        key: u64,
        value: i32,
    }

    fn hash_key(state: &HashState, key: u64) -> u64 {
        let mut h = state.build_hasher();
        h.write_u64(key);
        h.finish()
    }

    #[test]
    fn insert_and_find() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(0);
        for k in 0..32u64 {
            let hash = hash_key(&state, k);
            match table.entry(hash, |v: &Item| v.key == k) {
                Entry::Vacant(v) => {
                    v.insert(Item {
                        key: k,
                        value: (k as i32) * 2,
                    });
                    assert_eq!(
                        table.find(hash, |v| v.key == k),
                        Some(&Item {
                            key: k,
                            value: (k as i32) * 2
                        }),
                        "{:#?}",
                        table
                    );
                }
                Entry::Occupied(_) => panic!("unexpected occupied on first insert: {:#?}", table),
            }
        }
        assert_eq!(table.len(), 32);
        table.assert_invariants();
        for k in 0..32u64 {
            let hash = hash_key(&state, k);
            assert_eq!(
                table.find(hash, |v| v.key == k),
                Some(&Item {
                    key: k,
                    value: (k as i32) * 2
                }),
                "{:#?}",
                table
            );
        }

        let miss_hash = hash_key(&state, 999);
        assert!(table.find(miss_hash, |v| v.key == 999).is_none());
    }

    #[test]
    fn duplicate_entry_is_occupied() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(0);
        let k = 42u64;
        let hash = hash_key(&state, k);

        match table.entry(hash, |v| v.key == k) {
            Entry::Vacant(v) => {
                v.insert(Item { key: k, value: 7 });
            }
            Entry::Occupied(_) => panic!("should be vacant first time"),
        }

        match table.entry(hash, |v| v.key == k) {
            Entry::Occupied(mut occ) => {
                let prev_value = occ.get().value;
                *occ.get_mut() = Item { key: k, value: 11 };
                assert_eq!(prev_value, 7, "{:#?}", table);
            }
            Entry::Vacant(_) => panic!("should be occupied: {}#{:02X} in {:#?}", k, hash, table),
        }
        let found = table.find(hash, |v| v.key == k).unwrap();
        assert_eq!(found.value, 11);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn find_mut_and_modify() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(0);
        for k in 0..5u64 {
            let hash = hash_key(&state, k);
            match table.entry(hash, |v| v.key == k) {
                Entry::Vacant(v) => {
                    v.insert(Item { key: k, value: 1 });
                }
                _ => unreachable!(),
            }
        }

        for k in 0..5u64 {
            let hash = hash_key(&state, k);
            if let Some(v) = table.find_mut(hash, |v| v.key == k) {
                v.value += 9;
            }
        }
        for k in 0..5u64 {
            let hash = hash_key(&state, k);
            let v = table.find(hash, |v| v.key == k).unwrap();
            assert_eq!(v.value, 10);
        }
    }

    #[test]
    fn remove_items() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(0);
        for k in 0..8u64 {
            let hash = hash_key(&state, k);
            match table.entry(hash, |v| v.key == k) {
                Entry::Vacant(v) => {
                    v.insert(Item {
                        key: k,
                        value: k as i32,
                    });
                }
                _ => unreachable!(),
            }
        }
        assert_eq!(table.len(), 8);
        for k in [0u64, 3, 7] {
            let hash = hash_key(&state, k);
            let removed = table.remove(hash, |v| v.key == k).expect("should remove");
            assert_eq!(removed.key, k);
        }
        assert_eq!(table.len(), 5);
        table.assert_invariants();

        let hash = hash_key(&state, 1000);
        assert!(table.remove(hash, |v| v.key == 1000).is_none());
    }

    #[test]
    fn erased_key_stays_absent() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(0);
        for k in 0..64u64 {
            let hash = hash_key(&state, k);
            table.entry(hash, |v| v.key == k).or_insert(Item {
                key: k,
                value: k as i32,
            });
        }

        let hash = hash_key(&state, 17);
        assert!(table.remove(hash, |v| v.key == 17).is_some());
        assert!(table.find(hash, |v| v.key == 17).is_none());
        assert!(table.remove(hash, |v| v.key == 17).is_none());

        table.entry(hash, |v| v.key == 17).or_insert(Item {
            key: 17,
            value: -1,
        });
        assert_eq!(table.find(hash, |v| v.key == 17).unwrap().value, -1);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn insert_many() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(0);
        for k in 0..100000u64 {
            let hash = hash_key(&state, k);
            match table.entry(hash, |v| v.key == k) {
                Entry::Vacant(v) => {
                    v.insert(Item {
                        key: k,
                        value: k as i32,
                    });
                }
                _ => unreachable!(),
            }
        }

        assert_eq!(table.len(), 100000);
        table.assert_invariants();
        for k in 0..100000u64 {
            let hash = hash_key(&state, k);

            assert_eq!(
                table.find(hash, |v| v.key == k),
                Some(&Item {
                    key: k,
                    value: k as i32
                })
            );
        }
    }

    #[test]
    fn explicit_collision() {
        // Pathological constant hash: one cluster of 40 entries. Lookups
        // degrade to a linear scan but stay correct.
        let mut table: HashTable<Item> = HashTable::with_capacity(0);
        let hash = 1;
        for k in 0..40u64 {
            match table.entry(hash, |v| v.key == k) {
                Entry::Vacant(v) => {
                    v.insert(Item {
                        key: k,
                        value: k as i32,
                    });
                }
                _ => unreachable!(),
            }
        }

        assert_eq!(table.len(), 40);
        table.assert_invariants();
        for k in 0..40u64 {
            assert_eq!(
                table.find(hash, |v| v.key == k),
                Some(&Item {
                    key: k,
                    value: k as i32
                }),
                "{:#?}",
                table
            );
        }

        assert!(table.remove(hash, |v| v.key == 16).is_some());
        assert_eq!(table.len(), 39);
        table.assert_invariants();
        assert!(table.find(hash, |v| v.key == 16).is_none());
        assert_eq!(table.find(hash, |v| v.key == 17).unwrap().value, 17);
    }

    #[test]
    fn backward_shift_preserves_chains() {
        // Identity hashes: keys 1, 2, 3 occupy adjacent home buckets.
        // Removing the first must not break the probes for the other two.
        let mut table: HashTable<Item> = HashTable::with_capacity(8);
        for k in [1u64, 2, 3] {
            table.entry(k, |v| v.key == k).or_insert(Item {
                key: k,
                value: k as i32,
            });
        }

        assert!(table.remove(1, |v| v.key == 1).is_some());
        table.assert_invariants();

        let remaining: Vec<u64> = {
            let mut keys: Vec<u64> = table.iter().map(|v| v.key).collect();
            keys.sort_unstable();
            keys
        };
        assert_eq!(remaining, vec![2, 3]);
        assert_eq!(table.find(2, |v| v.key == 2).unwrap().value, 2);
        assert_eq!(table.find(3, |v| v.key == 3).unwrap().value, 3);
    }

    #[test]
    fn growth_preserves_content() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(0);
        for k in 0..1000u64 {
            let hash = hash_key(&state, k);
            table.entry(hash, |v| v.key == k).or_insert(Item {
                key: k,
                value: k as i32,
            });
        }

        assert_eq!(table.len(), 1000);
        table.assert_invariants();
        let sum: i64 = table.iter().map(|v| v.value as i64).sum();
        assert_eq!(sum, 999 * 1000 / 2);
    }

    #[test]
    fn probe_distances_stay_bounded() {
        // Sequential identity hashes at 0.7 load are the adversarial case
        // for an unmixed power-of-two table; Robin Hood placement must keep
        // the worst probe short anyway.
        let mut table: HashTable<Item> = HashTable::with_capacity(0);
        table.set_max_load_factor(0.7);
        for k in 0..1000u64 {
            table.entry(k, |v| v.key == k).or_insert(Item {
                key: k,
                value: k as i32,
            });
        }

        assert_eq!(table.len(), 1000);
        table.assert_invariants();
        assert!(table.max_probe_distance() <= 64);
    }

    #[test]
    fn permutation_insensitive() {
        let state = HashState::default();
        let forward: Vec<u64> = (0..200).collect();
        let mut reversed = forward.clone();
        reversed.reverse();

        let build = |keys: &[u64]| {
            let mut table: HashTable<Item> = HashTable::with_capacity(0);
            for &k in keys {
                let hash = hash_key(&state, k);
                table.entry(hash, |v| v.key == k).or_insert(Item {
                    key: k,
                    value: k as i32,
                });
            }
            table
        };

        let a = build(&forward);
        let b = build(&reversed);
        assert_eq!(a.len(), b.len());
        for &k in &forward {
            let hash = hash_key(&state, k);
            assert_eq!(
                a.find(hash, |v| v.key == k).map(|v| v.value),
                b.find(hash, |v| v.key == k).map(|v| v.value),
            );
        }
    }

    #[test]
    fn reserve_avoids_growth() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(0);
        table.reserve(100);
        let capacity = table.capacity();
        assert!(capacity >= 100);

        for k in 0..100u64 {
            let hash = hash_key(&state, k);
            table
                .entry(hash, |v| v.key == k)
                .or_insert(Item { key: k, value: 0 });
        }
        assert_eq!(table.capacity(), capacity);

        table.try_reserve(10).unwrap();
        assert_eq!(
            table.capacity(),
            capacity,
            "reserve within capacity is a no-op"
        );
    }

    #[test]
    fn set_max_load_factor_rebuilds() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(0);
        for k in 0..100u64 {
            let hash = hash_key(&state, k);
            table.entry(hash, |v| v.key == k).or_insert(Item {
                key: k,
                value: k as i32,
            });
        }

        let before = table.capacity();
        table.set_max_load_factor(0.25);
        assert!(table.capacity() >= before);
        assert!(table.len() < table.capacity());
        table.assert_invariants();
        for k in 0..100u64 {
            let hash = hash_key(&state, k);
            assert!(table.find(hash, |v| v.key == k).is_some());
        }
    }

    #[test]
    #[should_panic(expected = "load factor must be in (0, 1]")]
    fn zero_load_factor_is_rejected() {
        let mut table: HashTable<Item> = HashTable::new();
        table.set_max_load_factor(0.0);
    }

    #[test]
    fn iter_and_drain() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(0);
        for k in 10..20u64 {
            let hash = hash_key(&state, k);
            match table.entry(hash, |v| v.key == k) {
                Entry::Vacant(v) => {
                    v.insert(Item {
                        key: k,
                        value: (k as i32) + 1,
                    });
                }
                _ => unreachable!(),
            }
        }
        let collected: Vec<u64> = table.iter().map(|v| v.key).collect();
        assert_eq!(collected.len(), 10, "{:#?}", table);
        for k in 10..20u64 {
            assert!(collected.contains(&k));
        }

        let drained: Vec<Item> = table.drain().collect();
        assert_eq!(drained.len(), 10);
        assert_eq!(table.len(), 0);

        for k in 10..20u64 {
            let hash = hash_key(&state, k);
            assert!(table.find(hash, |v| v.key == k).is_none());
        }
    }

    #[test]
    fn iter_mut_updates_in_place() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(0);
        for k in 0..10u64 {
            let hash = hash_key(&state, k);
            table
                .entry(hash, |v| v.key == k)
                .or_insert(Item { key: k, value: 1 });
        }

        for v in table.iter_mut() {
            v.value *= 3;
        }

        for k in 0..10u64 {
            let hash = hash_key(&state, k);
            assert_eq!(table.find(hash, |v| v.key == k).unwrap().value, 3);
        }
    }

    #[test]
    fn retain_keeps_probes_valid() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(0);
        for k in 0..500u64 {
            let hash = hash_key(&state, k);
            table.entry(hash, |v| v.key == k).or_insert(Item {
                key: k,
                value: k as i32,
            });
        }

        table.retain(|v| v.key % 3 == 0);
        table.assert_invariants();

        let expected = (0..500u64).filter(|k| k % 3 == 0).count();
        assert_eq!(table.len(), expected);
        for k in 0..500u64 {
            let hash = hash_key(&state, k);
            assert_eq!(table.find(hash, |v| v.key == k).is_some(), k % 3 == 0);
        }
    }

    #[test]
    fn retain_with_constant_hash() {
        let mut table: HashTable<Item> = HashTable::with_capacity(0);
        for k in 0..40u64 {
            table.entry(7, |v| v.key == k).or_insert(Item {
                key: k,
                value: k as i32,
            });
        }

        table.retain(|v| v.key % 2 == 0);
        table.assert_invariants();
        assert_eq!(table.len(), 20);
        for k in 0..40u64 {
            assert_eq!(table.find(7, |v| v.key == k).is_some(), k % 2 == 0);
        }
    }

    #[test]
    fn clear_then_reuse() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(64);
        for k in 0..50u64 {
            let hash = hash_key(&state, k);
            table.entry(hash, |v| v.key == k).or_insert(Item {
                key: k,
                value: k as i32,
            });
        }
        let capacity = table.capacity();

        table.clear();
        assert_eq!(table.len(), 0);
        assert_eq!(table.capacity(), capacity);
        table.assert_invariants();

        let hash = hash_key(&state, 3);
        assert!(table.find(hash, |v| v.key == 3).is_none());
        table
            .entry(hash, |v| v.key == 3)
            .or_insert(Item { key: 3, value: 33 });
        assert_eq!(table.find(hash, |v| v.key == 3).unwrap().value, 33);
    }

    #[test]
    fn shrink_to_fit_releases_memory() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(10000);
        for k in 0..10u64 {
            let hash = hash_key(&state, k);
            table.entry(hash, |v| v.key == k).or_insert(Item {
                key: k,
                value: k as i32,
            });
        }

        let before = table.capacity();
        table.shrink_to_fit();
        assert!(table.capacity() < before);
        table.assert_invariants();
        for k in 0..10u64 {
            let hash = hash_key(&state, k);
            assert!(table.find(hash, |v| v.key == k).is_some());
        }

        table.clear();
        table.shrink_to_fit();
        assert_eq!(table.capacity(), 0);
        assert!(table.is_empty());
    }

    #[test]
    fn clone_is_independent() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(0);
        for k in 0..100u64 {
            let hash = hash_key(&state, k);
            table.entry(hash, |v| v.key == k).or_insert(Item {
                key: k,
                value: k as i32,
            });
        }

        let mut cloned = table.clone();
        cloned.assert_invariants();
        assert_eq!(cloned.len(), table.len());

        let hash = hash_key(&state, 5);
        cloned.remove(hash, |v| v.key == 5);
        assert!(cloned.find(hash, |v| v.key == 5).is_none());
        assert!(table.find(hash, |v| v.key == 5).is_some());
    }

    #[test]
    fn empty_table_operations() {
        let mut table: HashTable<Item> = HashTable::new();
        assert!(table.is_empty());
        assert_eq!(table.len(), 0);
        assert_eq!(table.capacity(), 0);
        assert_eq!(table.iter().count(), 0);
        assert!(table.find(12345, |_| true).is_none());
        assert!(table.remove(12345, |_| true).is_none());
        table.clear();
        table.retain(|_| false);
        assert_eq!(table.drain().count(), 0);
        table.assert_invariants();
    }

    #[test]
    fn mix_spreads_low_entropy() {
        // Sequential inputs must not produce sequential outputs, and the
        // tag bits must vary.
        let mut tags = vec![];
        for k in 0..64u64 {
            tags.push(hashtag(mix(k)));
        }
        tags.sort_unstable();
        tags.dedup();
        assert!(tags.len() > 16, "mixer left tag bits degenerate");

        assert_eq!(mix(0x1234_5678_9abc_def0), mix(0x1234_5678_9abc_def0));
        assert_ne!(mix(1), 1);
    }

    #[derive(Debug, PartialEq, Eq, Clone)]
    struct StringItem {
        key: String,
        value: i32,
    }

    fn hash_string_key(state: &HashState, key: &str) -> u64 {
        let mut h = state.build_hasher();
        h.write(key.as_bytes());
        h.finish()
    }

    #[test]
    fn insert_and_find_string_keys() {
        let state = HashState::default();
        let mut table: HashTable<StringItem> = HashTable::with_capacity(0);
        let keys = ["hello", "world", "foo", "bar", "baz"];

        for (i, k) in keys.iter().enumerate() {
            let hash = hash_string_key(&state, k);
            match table.entry(hash, |v: &StringItem| v.key == *k) {
                Entry::Vacant(v) => {
                    v.insert(StringItem {
                        key: k.to_string(),
                        value: i as i32,
                    });
                }
                Entry::Occupied(_) => panic!("unexpected occupied on first insert"),
            }
        }

        assert_eq!(table.len(), keys.len());

        for (i, k) in keys.iter().enumerate() {
            let hash = hash_string_key(&state, k);
            assert_eq!(
                table.find(hash, |v| v.key == *k),
                Some(&StringItem {
                    key: k.to_string(),
                    value: i as i32
                })
            );
        }

        let miss_hash = hash_string_key(&state, "not found");
        assert!(table.find(miss_hash, |v| v.key == "not found").is_none());
    }
}
