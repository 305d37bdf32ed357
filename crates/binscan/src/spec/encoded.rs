//! Encoded sections: regions hiding a nested input

use crate::{
    codec::DecoderFactory,
    context::ValueExpression,
    decode::DecodeState,
    input::Endian,
    render::{RenderError, RenderMode, Renderer, RenderView},
    result::{DecodeStatus, ResultBuilder},
    spec::{DecodeError, FormatSpec, ResultType},
};
use log::warn;

/// Marks an encoded size as unknown until the decoder has run.
pub const UNKNOWN_SIZE: i64 = -1;

/// Everything an encoded section needs to know about itself, produced by
/// evaluating the section's parameter expression against the bound attributes
/// of the surrounding format.
#[derive(Debug, Clone)]
pub struct DecodeParams {
    /// Display name of the encoded region.
    pub name: String,
    /// Declared encoded byte count, or [`UNKNOWN_SIZE`].
    pub size: i64,
    /// `None` means the bytes are stored verbatim and are sliced, not
    /// decoded.
    pub decoder: Option<DecoderFactory>,
    /// Path given to the nested input.
    pub path: String,
}

/// A spec whose span holds a nested input, either compressed behind a codec
/// or stored verbatim. Always opens an ENCODED_INPUT result with the nested
/// input attached as an INPUT child.
#[derive(Debug)]
pub struct EncodedFormatSpec {
    label: String,
    params: ValueExpression<DecodeParams>,
}

impl EncodedFormatSpec {
    pub fn new(
        label: impl Into<String>,
        params: impl Into<ValueExpression<DecodeParams>>,
    ) -> Self {
        Self {
            label: label.into(),
            params: params.into(),
        }
    }
}

impl FormatSpec for EncodedFormatSpec {
    fn match_size(&self) -> u64 {
        0
    }

    fn matches(&self, _buf: &[u8], _order: Endian) -> bool {
        false
    }

    fn is_fixed_size(&self) -> bool {
        false
    }

    fn spec_decode(
        &self,
        st: &mut DecodeState,
        builder: &mut ResultBuilder,
        pos: u64,
    ) -> Result<u64, DecodeError> {
        let params = self.params.eval(st.scope()).ok_or_else(|| {
            DecodeError::fatal(format!("{}: unresolved decode parameters", self.label))
        })?;
        builder.set_title(params.name.clone());

        match &params.decoder {
            Some(factory) => {
                let (decoded, total_in) = st
                    .cache()
                    .decode_input(builder.input(), pos, factory, &params.path)
                    .map_err(|e| {
                        DecodeError::Fatal(format!("{}: decoder failed: {e:#}", params.name))
                    })?;
                builder.add_input(decoded);

                if params.size >= 0 {
                    let declared = params.size as u64;
                    if total_in > declared {
                        let msg = format!(
                            "{}: encoded stream used {total_in} bytes where {declared} were declared",
                            params.name
                        );
                        warn!("{msg}");
                        builder.add_status(DecodeStatus::Warning(msg));
                    }
                    Ok(total_in.max(declared))
                } else {
                    Ok(total_in)
                }
            }
            None => {
                if params.size < 0 {
                    return Err(DecodeError::fatal(format!(
                        "{}: stored data needs a declared size",
                        params.name
                    )));
                }
                let size = params.size as u64;
                if pos + size > builder.input().len() {
                    return Err(DecodeError::Fatal(format!(
                        "{}: {size} stored bytes run past the end of {}",
                        params.name,
                        builder.input().path()
                    )));
                }
                let stored = builder.input().slice(pos, pos + size, params.path.as_str());
                builder.add_input(stored);
                Ok(size)
            }
        }
    }

    fn spec_render(
        &self,
        view: &RenderView<'_>,
        out: &mut dyn Renderer,
    ) -> Result<(), RenderError> {
        out.write_ref_text(RenderMode::Label, view.result.title(), view.start)?;
        out.write_text(
            RenderMode::Comment,
            &format!(" // {} bytes encoded", view.end - view.start),
        )?;
        out.write_break()
    }

    fn result_type(&self) -> Option<ResultType> {
        Some(ResultType::EncodedInput)
    }

    fn label(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use super::{DecodeParams, EncodedFormatSpec, UNKNOWN_SIZE};
    use crate::{
        codec::{DecodeCache, Decoder, DecoderFactory},
        decode::{decode_format, CancelToken, Format},
        input::{Endian, Input},
        spec::{ResultType, StructSpec},
    };
    use binscan_utils::AnyResult;
    use std::{io::Write, sync::Arc};

    /// Copies everything from its position to the end of the input.
    struct TakeAll {
        total_in: u64,
    }

    impl Decoder for TakeAll {
        fn decode(&mut self, src: &Input, pos: u64, sink: &mut dyn Write) -> AnyResult<u64> {
            let encoded = src.read_exact_at(pos, (src.len() - pos) as usize)?;
            sink.write_all(&encoded)?;
            self.total_in = encoded.len() as u64;
            Ok(self.total_in)
        }

        fn total_in(&self) -> u64 {
            self.total_in
        }
    }

    #[test]
    fn unknown_size_consumes_what_the_decoder_reads() {
        let factory = DecoderFactory::new("takeall", || Box::new(TakeAll { total_in: 0 }));
        let spec = StructSpec::new("wrap").append(EncodedFormatSpec::new(
            "body",
            DecodeParams {
                name: "body".into(),
                size: UNKNOWN_SIZE,
                decoder: Some(factory),
                path: "body".into(),
            },
        ));
        let format = Format::new("wrap", Endian::Little, spec);

        let input = Input::from_bytes("w.bin", Endian::Little, vec![1, 2, 3, 4, 5, 6]);
        let result = decode_format(
            &format,
            &input,
            0,
            Arc::new(DecodeCache::new()),
            CancelToken::new(),
        )
        .unwrap();

        assert!(!result.has_fatal());
        let body = &result.children()[0];
        assert_eq!(body.ty(), ResultType::EncodedInput);
        // No declared size, so no mismatch to warn about
        assert!(body.statuses().is_empty());
        assert_eq!(body.size(), 6);
        assert_eq!(body.children()[0].size(), 6);
    }
}
