//! Built-in format definitions
//!
//! Ready-made [`Format`](crate::decode::Format) descriptors for a couple of
//! well known container formats. They double as the reference examples for
//! writing new specs: every combinator the engine offers shows up in here
//! somewhere.

mod png;
pub use png::*;

mod zip;
pub use zip::*;
