#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

use core::alloc::Layout;
use core::fmt;

/// A HashMap implementation using Robin Hood hashing.
///
/// This module provides a `HashMap` that wraps the `HashTable` and provides
/// a standard key-value map interface with configurable hashers.
pub mod hash_map;

pub mod hash_table;

/// A hash set implementation using Robin Hood hashing.
///
/// This module provides a `HashSet` that wraps the `HashTable` and provides
/// a standard set interface with configurable hashers.
pub mod hash_set;

pub use hash_map::Entry;
pub use hash_map::HashMap;
pub use hash_set::HashSet;
pub use hash_table::HashTable;

/// The error type for fallible allocation, returned by `try_with_capacity`,
/// `try_reserve`, and `try_entry`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TryReserveError {
    /// The computed capacity exceeded the table's maximum size.
    CapacityOverflow,

    /// The allocator refused the request.
    AllocError {
        /// The layout of the allocation that failed.
        layout: Layout,
    },
}

impl fmt::Display for TryReserveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryReserveError::CapacityOverflow => {
                f.write_str("capacity overflow while growing hash table")
            }
            TryReserveError::AllocError { layout } => write!(
                f,
                "allocation of {} bytes failed while growing hash table",
                layout.size()
            ),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for TryReserveError {}

/// The error type returned by [`HashMap::at`] and [`HashMap::at_mut`] when
/// the requested key is not present.
///
/// A plain lookup miss is not an error; use [`HashMap::get`] for that. This
/// type exists for callers that treat a missing key as a failure to
/// propagate.
///
/// [`HashMap::at`]: hash_map::HashMap::at
/// [`HashMap::at_mut`]: hash_map::HashMap::at_mut
/// [`HashMap::get`]: hash_map::HashMap::get
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NotFoundError;

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("key not found in map")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for NotFoundError {}
