//! Repetition of a spec

use crate::{
    context::ValueExpression,
    decode::{decode_child, DecodeState},
    input::Endian,
    render::{render_sections, RenderError, Renderer, RenderView},
    result::ResultBuilder,
    spec::{DecodeError, FormatSpec},
};
use std::sync::Arc;

/// How an [`ArraySpec`] knows when to stop.
#[derive(Debug)]
enum ArrayLength {
    /// A fixed or late-bound element count.
    Count(ValueExpression<u64>),
    /// Keep going while the upcoming bytes still probe as an element.
    Sentinel,
}

/// Repeats one element spec.
#[derive(Debug)]
pub struct ArraySpec {
    name: String,
    element: Arc<dyn FormatSpec>,
    length: ArrayLength,
}

impl ArraySpec {
    pub fn counted(
        name: impl Into<String>,
        element: impl FormatSpec + 'static,
        count: impl Into<ValueExpression<u64>>,
    ) -> Self {
        Self {
            name: name.into(),
            element: Arc::new(element),
            length: ArrayLength::Count(count.into()),
        }
    }

    /// Repeats until the element no longer matches the upcoming bytes.
    ///
    /// ## Panics
    /// Panics on an element that opted out of prefix matching; without a
    /// probe there is no sentinel to see.
    pub fn sentinel(name: impl Into<String>, element: impl FormatSpec + 'static) -> Self {
        let element: Arc<dyn FormatSpec> = Arc::new(element);
        assert!(
            element.match_size() > 0,
            "sentinel arrays need a probing element"
        );
        Self {
            name: name.into(),
            element,
            length: ArrayLength::Sentinel,
        }
    }

    /// Probes whether another element starts at `pos`.
    fn next_matches(
        &self,
        builder: &ResultBuilder,
        pos: u64,
    ) -> Result<bool, DecodeError> {
        let size = self.element.match_size() as usize;
        let mut buf = vec![0; size];
        let n = builder.input().read_at(pos, &mut buf)?;
        if n < size {
            return Ok(false);
        }
        Ok(self.element.matches(&buf, builder.order()))
    }
}

impl FormatSpec for ArraySpec {
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
        let start = pos;
        let mut pos = pos;

        match &self.length {
            ArrayLength::Count(count) => {
                let count = count.eval(st.scope()).ok_or_else(|| {
                    DecodeError::fatal(format!("{}: unresolved element count", self.name))
                })?;
                for _ in 0..count {
                    let step = decode_child(&self.element, st, builder, pos)?;
                    pos += step.consumed;
                    builder.update_end(pos);
                    // A zero-size element would repeat at the same position
                    if step.halt || step.consumed == 0 {
                        break;
                    }
                }
            }
            ArrayLength::Sentinel => {
                while self.next_matches(builder, pos)? {
                    let step = decode_child(&self.element, st, builder, pos)?;
                    pos += step.consumed;
                    builder.update_end(pos);
                    if step.halt || step.consumed == 0 {
                        break;
                    }
                }
            }
        }

        Ok(pos - start)
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
    use super::ArraySpec;
    use crate::{
        codec::DecodeCache,
        context::ValueExpression,
        decode::{decode_format, CancelToken, Format},
        input::{Endian, Input},
        spec::{NumberAttribute, StructSpec},
    };
    use std::sync::Arc;

    fn decode(format: &Format, bytes: Vec<u8>) -> crate::result::ScanResult {
        let input = Input::from_bytes("arr.bin", Endian::Little, bytes);
        decode_format(
            format,
            &input,
            0,
            Arc::new(DecodeCache::new()),
            CancelToken::new(),
        )
        .unwrap()
    }

    #[test]
    fn counted_array_reads_its_length_from_context() {
        let count = Arc::new(NumberAttribute::<u8>::new("count").bind());
        let length = {
            let count = count.clone();
            ValueExpression::thunk(move |scope| count.get(scope).map(u64::from))
        };
        let spec = StructSpec::new("list").append_arc(count).append(
            ArraySpec::counted("items", NumberAttribute::<u16>::new("item"), length),
        );
        let format = Format::new("list", Endian::Little, spec);

        let result = decode(&format, vec![3, 1, 0, 2, 0, 3, 0, 9, 9]);
        assert!(!result.has_fatal());
        assert_eq!(result.size(), 7);
        // One section for the count, one per element
        assert_eq!(result.sections().len(), 4);
    }

    #[test]
    fn unresolved_count_is_fatal() {
        let spec = StructSpec::new("list").append(ArraySpec::counted(
            "items",
            NumberAttribute::<u16>::new("item"),
            ValueExpression::<u64>::thunk(|_| None),
        ));
        let format = Format::new("list", Endian::Little, spec);

        let result = decode(&format, vec![1, 0, 2, 0]);
        assert!(result.has_fatal());
        assert_eq!(result.size(), 0);
    }
}
