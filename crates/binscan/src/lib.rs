//! Nested binary format scanning engine
//!
//! binscan decodes binary formats described declaratively: a format is a
//! tree of [`spec::FormatSpec`] combinators (attributes, structs, arrays,
//! unions, conditionals, encoded sections), the decode driver walks that tree
//! over an [`input::Input`] and builds a hierarchical [`result::ScanResult`]
//! labelling every decoded byte range, and the render driver turns any frozen
//! result into a styled document through an abstract [`render::Renderer`].
//!
//! Encoded regions (compressed payloads and the like) surface as nested
//! inputs through the [`codec`] bridge, ready to be scanned again by whatever
//! drives the engine. The engine itself never schedules scans, owns no
//! concrete codec, and never mutates an input.

pub mod codec;
pub mod context;
pub mod decode;
pub mod formats;
pub mod input;
pub mod render;
pub mod result;
pub mod spec;

pub use decode::{decode_format, probe, CancelToken, Format, FormatRegistry};
pub use input::{Endian, Input};
pub use render::{render_result, RenderMode, Renderer, TextRenderer};
pub use result::{DecodeStatus, ScanResult};
pub use spec::{DecodeError, FormatSpec, ResultType};
