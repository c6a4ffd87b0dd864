//! Opaque handles
//!
//! The VM hands out loaders, classes and methods as raw addresses, and the
//! shared cache identifies descriptors by byte offsets. All of them are kept
//! as plain `usize` newtypes here; the tables never dereference them.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(usize);

        impl $name {
            /// Create a handle from its raw value
            pub const fn from_raw(raw: usize) -> Self {
                $name(raw)
            }

            /// Get the raw value
            pub const fn as_raw(self) -> usize {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }
    };
}

handle_type!(
    /// A class loader, identified by its address in the VM
    LoaderId
);

handle_type!(
    /// A loaded runtime class
    ClassId
);

handle_type!(
    /// A method of a loaded class
    MethodId
);

handle_type!(
    /// Offset of a validation chain in the shared cache
    CacheOffset
);

handle_type!(
    /// Offset of the class descriptor a validation chain starts with.
    ///
    /// Different chains that start at the same class share one `ClassOffset`,
    /// which makes it the canonical key of the dependency table.
    ClassOffset
);

handle_type!(
    /// A resolved address inside the shared cache
    CachePointer
);

/// Flag bit for dependencies that need the class initialized, not just loaded
const NEEDS_INIT_BIT: usize = 1;

/// One dependency of an AOT body, encoded in a single word.
///
/// Bit 0 is the needs-initialization flag; the remaining bits are the
/// validation chain offset (chain offsets are always word aligned).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency(usize);

impl Dependency {
    /// Encode a dependency on the class whose chain starts at `chain`
    pub fn new(chain: CacheOffset, needs_init: bool) -> Self {
        debug_assert_eq!(chain.as_raw() & NEEDS_INIT_BIT, 0, "misaligned chain offset");
        let flag = if needs_init { NEEDS_INIT_BIT } else { 0 };
        Dependency(chain.as_raw() | flag)
    }

    /// Wrap an encoded dependency word as stored with the AOT body
    pub const fn from_word(word: usize) -> Self {
        Dependency(word)
    }

    /// Get the encoded word
    pub const fn word(self) -> usize {
        self.0
    }

    /// Split into the chain offset and the needs-initialization flag
    pub fn decode(self) -> (CacheOffset, bool) {
        (
            CacheOffset::from_raw(self.0 & !NEEDS_INIT_BIT),
            self.0 & NEEDS_INIT_BIT != 0,
        )
    }
}
