//! Storage engine backends implementing the binding surface.
//!
//! Only the hermetic in-memory engine lives here today; a backend speaking
//! to a real cluster would slot in beside it.

pub mod mem;
