//! Strongly-typed identifiers.
//!
//! Every handle crossing the client/engine boundary is a small integer wrapped
//! in its own newtype so a body id can never be passed where a shape id is
//! expected.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to define a strongly-typed integer id newtype.
///
/// Generates: struct, `new()`, `get()`, Display, Serialize, Deserialize.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            pub const fn get(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

define_id!(
    /// Registry slot id handed out by `connect`.
    ClientId,
    "client"
);
define_id!(
    /// Engine-side body (multi-body model) handle.
    BodyId,
    "body"
);
define_id!(
    /// Collision or visual shape handle.
    ShapeId,
    "shape"
);
define_id!(
    /// User data entry handle.
    UserDataId,
    "user-data"
);

impl ClientId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}
