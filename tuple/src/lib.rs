//! Galena tuple encoding.
//!
//! This library contains the canonical tuple layer used to build Galena keys
//! out of typed elements. The encoding is order-preserving: comparing two
//! packed tuples byte-wise gives the same result as comparing the tuples
//! element-wise, which is what makes packed tuples usable as database keys.
//!
//! ```rust
//! use galena_tuple::{pack, unpack, Element};
//!
//! let tuple = vec![Element::String("stack".into()), Element::Int(7)];
//! let bytes = pack(&tuple);
//! assert_eq!(unpack(&bytes).unwrap(), tuple);
//! ```

mod element;
mod error;
mod pack;

pub use element::{Element, ElementKind};
pub use error::Error;
pub use pack::{child_range, pack, pack_element, unpack};
