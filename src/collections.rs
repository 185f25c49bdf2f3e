//! Hash collections used for name and content-hash lookups during tree
//! building, diffing and sharing statistics. With the `gxhash` feature the
//! faster gxhash maps are used; otherwise the std collections.
//!
//! Construct with `Default` or `collect`, which both variants support.

#[cfg(feature = "gxhash")]
pub use gxhash::{HashMap, HashSet};

#[cfg(not(feature = "gxhash"))]
pub use std::collections::{HashMap, HashSet};
