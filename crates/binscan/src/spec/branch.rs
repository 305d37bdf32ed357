//! Branching specs: first-match unions and context conditionals

use crate::{
    context::ValueLookup,
    decode::{decode_child, DecodeState},
    input::Endian,
    render::{render_sections, RenderError, Renderer, RenderView},
    result::ResultBuilder,
    spec::{DecodeError, FormatSpec},
};
use std::{fmt, sync::Arc};

/// Tries alternatives in declaration order and decodes the first whose
/// prefix matches. No hit is a fatal decode.
#[derive(Debug)]
pub struct UnionSpec {
    name: String,
    alternatives: Vec<Arc<dyn FormatSpec>>,
}

impl UnionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alternatives: Vec::new(),
        }
    }

    /// ## Panics
    /// Panics on an alternative without a prefix; unions select by probing.
    pub fn variant(self, spec: impl FormatSpec + 'static) -> Self {
        self.variant_arc(Arc::new(spec))
    }

    pub fn variant_arc(mut self, spec: Arc<dyn FormatSpec>) -> Self {
        assert!(spec.match_size() > 0, "union alternatives must probe");
        self.alternatives.push(spec);
        self
    }
}

impl FormatSpec for UnionSpec {
    fn match_size(&self) -> u64 {
        self.alternatives
            .iter()
            .map(|a| a.match_size())
            .max()
            .unwrap_or(0)
    }

    fn matches(&self, buf: &[u8], order: Endian) -> bool {
        self.alternatives.iter().any(|alt| {
            let size = alt.match_size() as usize;
            buf.len() >= size && alt.matches(&buf[..size], order)
        })
    }

    fn is_fixed_size(&self) -> bool {
        let mut sizes = self.alternatives.iter().map(|a| a.match_size());
        let first = match sizes.next() {
            Some(size) => size,
            None => return false,
        };
        self.alternatives.iter().all(|a| a.is_fixed_size()) && sizes.all(|s| s == first)
    }

    fn spec_decode(
        &self,
        st: &mut DecodeState,
        builder: &mut ResultBuilder,
        pos: u64,
    ) -> Result<u64, DecodeError> {
        let probe_size = self.match_size() as usize;
        let mut buf = vec![0; probe_size];
        let available = builder.input().read_at(pos, &mut buf)?;
        buf.truncate(available);

        let chosen = self.alternatives.iter().find(|alt| {
            let size = alt.match_size() as usize;
            buf.len() >= size && alt.matches(&buf[..size], builder.order())
        });

        match chosen {
            Some(alt) => {
                let step = decode_child(alt, st, builder, pos)?;
                builder.update_end(pos + step.consumed);
                Ok(step.consumed)
            }
            None => Err(DecodeError::Fatal(format!(
                "{}: no alternative matches at position {pos}",
                self.name
            ))),
        }
    }

    fn spec_render(
        &self,
        view: &RenderView<'_>,
        out: &mut dyn Renderer,
    ) -> Result<(), RenderError> {
        render_sections(view, out)
    }

    fn records_section(&self) -> bool {
        false
    }

    fn label(&self) -> &str {
        &self.name
    }
}

type Predicate = Arc<dyn Fn(&dyn ValueLookup) -> bool + Send + Sync>;

/// Decodes its inner spec only when a context predicate holds; an optional
/// else-spec covers the other branch. With neither, it decodes to nothing.
pub struct ConditionalSpec {
    name: String,
    predicate: Predicate,
    then_spec: Arc<dyn FormatSpec>,
    else_spec: Option<Arc<dyn FormatSpec>>,
}

impl ConditionalSpec {
    pub fn new(
        name: impl Into<String>,
        predicate: impl Fn(&dyn ValueLookup) -> bool + Send + Sync + 'static,
        then_spec: impl FormatSpec + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
            then_spec: Arc::new(then_spec),
            else_spec: None,
        }
    }

    pub fn or_else(mut self, spec: impl FormatSpec + 'static) -> Self {
        self.else_spec = Some(Arc::new(spec));
        self
    }
}

impl fmt::Debug for ConditionalSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalSpec")
            .field("name", &self.name)
            .field("then_spec", &self.then_spec)
            .field("else_spec", &self.else_spec)
            .finish()
    }
}

impl FormatSpec for ConditionalSpec {
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
        let spec = if (self.predicate)(st.scope()) {
            Some(&self.then_spec)
        } else {
            self.else_spec.as_ref()
        };

        match spec {
            Some(spec) => {
                let step = decode_child(spec, st, builder, pos)?;
                builder.update_end(pos + step.consumed);
                Ok(step.consumed)
            }
            None => Ok(0),
        }
    }

    fn spec_render(
        &self,
        view: &RenderView<'_>,
        out: &mut dyn Renderer,
    ) -> Result<(), RenderError> {
        render_sections(view, out)
    }

    fn records_section(&self) -> bool {
        false
    }

    fn label(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::ConditionalSpec;
    use crate::{
        codec::DecodeCache,
        context::ValueLookup,
        decode::{decode_format, CancelToken, Format},
        input::{Endian, Input},
        spec::{NumberAttribute, StructSpec},
    };
    use std::sync::Arc;

    #[test]
    fn conditional_switches_on_a_bound_flag() {
        let flags = Arc::new(NumberAttribute::<u8>::new("flags").bind());
        let has_trailer = {
            let flags = flags.clone();
            move |scope: &dyn ValueLookup| flags.get(scope).map_or(false, |v| v & 1 != 0)
        };
        let spec = StructSpec::new("framed").append_arc(flags).append(
            ConditionalSpec::new("trailer", has_trailer, NumberAttribute::<u32>::new("extra"))
                .or_else(NumberAttribute::<u8>::new("pad")),
        );
        let format = Format::new("framed", Endian::Little, spec);

        let decode = |bytes: Vec<u8>| {
            let input = Input::from_bytes("f.bin", Endian::Little, bytes);
            decode_format(
                &format,
                &input,
                0,
                Arc::new(DecodeCache::new()),
                CancelToken::new(),
            )
            .unwrap()
        };

        let with_trailer = decode(vec![0x01, 1, 2, 3, 4]);
        assert!(!with_trailer.has_fatal());
        assert_eq!(with_trailer.size(), 5);

        let with_padding = decode(vec![0x00, 0xFF]);
        assert!(!with_padding.has_fatal());
        assert_eq!(with_padding.size(), 2);
    }
}
