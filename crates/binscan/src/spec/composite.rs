//! Consecutive composition of specs

use crate::{
    decode::{decode_child, DecodeState},
    input::Endian,
    render::{render_sections, RenderError, Renderer, RenderView},
    result::ResultBuilder,
    spec::{DecodeError, FormatSpec, ResultType},
};
use std::sync::Arc;

/// An ordered run of child specs decoded back to back.
///
/// Probing only looks at the fixed-size prefix: `match_size` accumulates
/// child sizes up to and including the first non-fixed-size child and stops
/// there, and `matches` checks the fixed-size children before that point.
/// Downstream formats rely on exactly this probing behavior.
#[derive(Debug)]
pub struct StructSpec {
    name: String,
    children: Vec<Arc<dyn FormatSpec>>,
    is_result: bool,
}

impl StructSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
            is_result: false,
        }
    }

    pub fn append(self, spec: impl FormatSpec + 'static) -> Self {
        self.append_arc(Arc::new(spec))
    }

    pub fn append_arc(mut self, spec: Arc<dyn FormatSpec>) -> Self {
        self.children.push(spec);
        self
    }

    /// Marks this struct as opening its own FORMAT child result when nested
    /// inside another spec.
    pub fn as_result(mut self) -> Self {
        self.is_result = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl FormatSpec for StructSpec {
    fn match_size(&self) -> u64 {
        let mut total = 0;
        for child in &self.children {
            total += child.match_size();
            if !child.is_fixed_size() {
                break;
            }
        }
        total
    }

    fn matches(&self, buf: &[u8], order: Endian) -> bool {
        let mut pos = 0usize;
        for child in &self.children {
            let size = child.match_size() as usize;
            if size == 0 || !child.is_fixed_size() {
                break;
            }
            if buf.len() < pos + size {
                return false;
            }
            if !child.matches(&buf[pos..pos + size], order) {
                return false;
            }
            pos += size;
        }
        true
    }

    fn is_fixed_size(&self) -> bool {
        self.children.iter().all(|c| c.is_fixed_size())
    }

    fn spec_decode(
        &self,
        st: &mut DecodeState,
        builder: &mut ResultBuilder,
        pos: u64,
    ) -> Result<u64, DecodeError> {
        // A fixed-size struct knows its whole extent up front; against a
        // short input it fails before consuming anything.
        if self.is_fixed_size() {
            let needed = self.match_size();
            if builder.input().len().saturating_sub(pos) < needed {
                return Err(DecodeError::Fatal(format!(
                    "{}: {needed} bytes needed at position {pos}, input ends early",
                    self.name
                )));
            }
        }

        let start = pos;
        let mut pos = pos;

        for child in &self.children {
            let step = decode_child(child, st, builder, pos)?;
            pos += step.consumed;
            builder.update_end(pos);
            if step.halt {
                break;
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

    fn result_type(&self) -> Option<ResultType> {
        self.is_result.then_some(ResultType::Format)
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
    use super::StructSpec;
    use crate::{
        context::ValueExpression,
        input::Endian,
        spec::{FormatSpec, NumberAttribute, RangeSpec},
    };

    fn fixed_u32(name: &str) -> NumberAttribute<u32> {
        NumberAttribute::new(name)
    }

    fn open_range(name: &str) -> RangeSpec {
        RangeSpec::new(name, ValueExpression::<u64>::thunk(|_| None))
    }

    #[test]
    fn match_size_stops_after_first_unfixed_child() {
        let spec = StructSpec::new("s")
            .append(fixed_u32("a"))
            .append(fixed_u32("b"))
            .append(open_range("rest"))
            .append(fixed_u32("never counted"));

        // 4 + 4, plus the non-fixed child's own (zero) match size
        assert_eq!(spec.match_size(), 8);
        assert!(!spec.is_fixed_size());
    }

    #[test]
    fn fully_fixed_struct_sums_all_children() {
        let spec = StructSpec::new("s")
            .append(fixed_u32("a"))
            .append(NumberAttribute::<u16>::new("b"))
            .append(NumberAttribute::<u8>::new("c"));
        assert_eq!(spec.match_size(), 7);
        assert!(spec.is_fixed_size());
    }

    #[test]
    fn matches_checks_fixed_prefix_only() {
        let spec = StructSpec::new("s")
            .append(NumberAttribute::<u16>::new("magic").with_final(0x4D42))
            .append(open_range("rest"));

        assert!(spec.matches(&[0x42, 0x4D], Endian::Little));
        assert!(!spec.matches(&[0x00, 0x4D], Endian::Little));
        // Too short for the fixed prefix
        assert!(!spec.matches(&[0x42], Endian::Little));
    }
}
