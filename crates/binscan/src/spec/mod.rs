//! The declarative format-spec tree
//!
//! A format is described as a composition of [`FormatSpec`] nodes: leaf
//! attributes that read single values, and combinators that sequence, repeat,
//! branch over, or re-encode them. Every node answers the same five
//! questions: how many prefix bytes it needs to probe, whether a buffer
//! probes positively, whether its size is static, how to decode at a
//! position, and how to render a decoded span.

use crate::{
    decode::DecodeState,
    input::Endian,
    render::{RenderError, Renderer, RenderView},
    result::ResultBuilder,
};
use std::io;
use thiserror::Error;

mod attribute;
pub use attribute::*;

mod composite;
pub use composite::*;

mod array;
pub use array::*;

mod branch;
pub use branch::*;

mod encoded;
pub use encoded::*;

/// What kind of result a result-producing spec opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultType {
    /// A recognized format region.
    Format,
    /// A region whose bytes hide a nested input behind a codec.
    EncodedInput,
    /// A nested input itself (decoded stream or verbatim slice).
    Input,
}

/// Errors surfacing out of [`FormatSpec::spec_decode`].
///
/// `Fatal` is the only variant the drivers absorb; it turns into a
/// [`DecodeStatus`](crate::result::DecodeStatus) on the nearest enclosing
/// result. I/O errors and cancellation always propagate to the caller.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("undecodable data: {0}")]
    Fatal(String),
    #[error("input read failed: {0}")]
    Io(#[from] io::Error),
    #[error("decode cancelled")]
    Cancelled,
}

impl DecodeError {
    pub fn fatal(msg: impl Into<String>) -> Self {
        DecodeError::Fatal(msg.into())
    }
}

/// Reads exactly `len` bytes for a decoding spec. Running out of input means
/// the bytes cannot be interpreted, which is a decode failure, not an I/O
/// failure.
pub(crate) fn read_exact_or_fatal(
    input: &crate::input::Input,
    pos: u64,
    len: usize,
) -> Result<Vec<u8>, DecodeError> {
    match input.read_exact_at(pos, len) {
        Ok(buf) => Ok(buf),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(DecodeError::Fatal(format!(
            "unexpected end of {} at position {pos}",
            input.path()
        ))),
        Err(e) => Err(DecodeError::Io(e)),
    }
}

/// A node of the format description.
///
/// Implementations must keep two promises:
/// - `match_size() == 0` means the spec opts out of prefix probing entirely,
/// - `is_fixed_size()` implies a successful `spec_decode` consumes exactly
///   `match_size()` bytes.
pub trait FormatSpec: Send + Sync + std::fmt::Debug {
    /// Prefix bytes needed for [`FormatSpec::matches`].
    fn match_size(&self) -> u64;

    /// Probes a candidate prefix. `buf` holds at least `match_size` bytes
    /// unless the input ends early; must not mutate anything.
    fn matches(&self, buf: &[u8], order: Endian) -> bool;

    fn is_fixed_size(&self) -> bool;

    /// Decodes into `builder` starting at `pos`, returning bytes consumed.
    fn spec_decode(
        &self,
        st: &mut DecodeState,
        builder: &mut ResultBuilder,
        pos: u64,
    ) -> Result<u64, DecodeError>;

    /// Renders this spec's contribution over the span in `view`.
    fn spec_render(&self, view: &RenderView<'_>, out: &mut dyn Renderer)
        -> Result<(), RenderError>;

    /// `Some` iff decoding this spec opens a new child result.
    fn result_type(&self) -> Option<ResultType> {
        None
    }

    /// Whether an enclosing composite should record a render section for this
    /// spec. Composites return `false`: their children record themselves.
    fn records_section(&self) -> bool {
        true
    }

    /// Display name used for section labels and provisional result titles.
    fn label(&self) -> &str {
        ""
    }
}
