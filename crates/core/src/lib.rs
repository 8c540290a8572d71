//! `fieldbook-core`: primitives shared by the session and authorization crates.
//!
//! No IO, no async runtime.

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::IdError;
pub use id::SessionId;
