//! Small utilities shared across the binscan workspace

mod ascii_display;
pub use ascii_display::*;

mod hex;
pub use hex::*;

pub type AnyResult<T = (), E = anyhow::Error> = anyhow::Result<T, E>;

/// Shorthand for `Ok(())`, cause it looks ugly
pub const fn ok<E>() -> Result<(), E> {
    Ok(())
}
