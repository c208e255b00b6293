//! Plugin client handles
//!
//! [`compose`] builds the effective option list and [`ClientHandle`] owns the
//! connection a generated stub runs over.

mod compose;
mod handle;

pub use compose::compose;
pub use handle::ClientHandle;
