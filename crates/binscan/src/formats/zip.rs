//! ZIP local file headers and entry payloads

use crate::{
    codec::DecoderFactory,
    context::ValueExpression,
    decode::Format,
    input::Endian,
    spec::{
        ArraySpec, DecodeParams, EncodedFormatSpec, NumberAttribute, RangeSpec, StructSpec,
        SymbolAttribute,
    },
};
use bitflags::bitflags;
use std::sync::Arc;

/// Local file header magic, `50 4B 03 04` read little endian.
pub const ZIP_LOCAL_MAGIC: u32 = 0x0403_4B50;

bitflags! {
    /// General purpose bit flags of a local file header.
    pub struct ZipGpFlags: u16 {
        const ENCRYPTED = 0x0001;
        const DATA_DESCRIPTOR = 0x0008;
        const UTF8_NAMES = 0x0800;
    }
}

/// One ZIP local file header followed by its entry payload.
///
/// Stored entries slice the payload verbatim; deflated entries go through
/// `deflate` when one is supplied, and fall back to a verbatim slice of the
/// compressed bytes when not.
pub fn zip_local_file(deflate: Option<DecoderFactory>) -> Format {
    Format::new("ZIP archive", Endian::Little, entry_spec(deflate))
}

/// A run of consecutive local file entries, each its own nested result.
///
/// The run has no fixed prefix of its own (entry probing happens per
/// element), so this format is decode-only; use [`zip_local_file`] for
/// prefix identification.
pub fn zip_archive(deflate: Option<DecoderFactory>) -> Format {
    let root = StructSpec::new("ZIP archive").append(ArraySpec::sentinel(
        "entries",
        entry_spec(deflate).as_result(),
    ));
    Format::new("ZIP archive", Endian::Little, root)
}

fn entry_spec(deflate: Option<DecoderFactory>) -> StructSpec {
    let method = Arc::new(
        SymbolAttribute::<u16>::new("compression method")
            .symbol(0, "stored")
            .symbol(8, "deflated")
            .bind(),
    );
    let compressed_size = Arc::new(NumberAttribute::<u32>::new("compressed size").bind());
    let name_length = Arc::new(NumberAttribute::<u16>::new("file name length").bind());
    let extra_length = Arc::new(NumberAttribute::<u16>::new("extra field length").bind());

    let params = {
        let method = method.clone();
        let compressed_size = compressed_size.clone();
        ValueExpression::thunk(move |scope| {
            let decoder = match method.get(scope)? {
                8 => deflate.clone(),
                _ => None,
            };
            Some(DecodeParams {
                name: "entry data".into(),
                size: i64::from(compressed_size.get(scope)?),
                decoder,
                path: "entry data".into(),
            })
        })
    };

    let name_size = {
        let name_length = name_length.clone();
        ValueExpression::thunk(move |scope| name_length.get(scope).map(u64::from))
    };
    let extra_size = {
        let extra_length = extra_length.clone();
        ValueExpression::thunk(move |scope| extra_length.get(scope).map(u64::from))
    };

    StructSpec::new("local file header")
        .append(NumberAttribute::<u32>::new("signature").with_final(ZIP_LOCAL_MAGIC))
        .append(NumberAttribute::<u16>::new("version needed"))
        .append(
            NumberAttribute::<u16>::new("flags")
                .with_renderer(|v| format!("{:?}", ZipGpFlags::from_bits_truncate(v))),
        )
        .append_arc(method)
        .append(NumberAttribute::<u16>::new("last modified time"))
        .append(NumberAttribute::<u16>::new("last modified date"))
        .append(NumberAttribute::<u32>::new("crc-32"))
        .append_arc(compressed_size)
        .append(NumberAttribute::<u32>::new("uncompressed size"))
        .append_arc(name_length)
        .append_arc(extra_length)
        .append(RangeSpec::new("file name", name_size))
        .append(RangeSpec::new("extra field", extra_size))
        .append(EncodedFormatSpec::new("entry data", params))
}
