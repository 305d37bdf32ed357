//! Leaf specs: typed attributes and raw byte ranges

use crate::{
    context::{AttrId, Value, ValueExpression, ValueLookup},
    decode::DecodeState,
    input::Endian,
    render::{RenderError, RenderMode, Renderer, RenderView},
    result::ResultBuilder,
    spec::{read_exact_or_fatal, DecodeError, FormatSpec},
};
use ahash::AHashMap;
use binscan_utils::AsciiDisplay;
use std::{fmt, hash::Hash, io, sync::Arc};

/// Fixed-width numbers an attribute can decode.
pub trait NumberType:
    Copy + PartialEq + fmt::Display + fmt::Debug + Send + Sync + 'static
{
    const SIZE: u64;

    fn read(buf: &[u8], order: Endian) -> Self;
    fn into_value(self) -> Value;
    fn from_value(value: Value) -> Option<Self>;
}

macro_rules! impl_number {
    ($ty:ty, $variant:ident, $size:expr, |$buf:ident, $order:ident| $read:expr) => {
        impl NumberType for $ty {
            const SIZE: u64 = $size;

            fn read($buf: &[u8], $order: Endian) -> Self {
                $read
            }

            fn into_value(self) -> Value {
                Value::$variant(self)
            }

            fn from_value(value: Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

impl_number!(u8, U8, 1, |buf, _order| buf[0]);
impl_number!(i8, I8, 1, |buf, _order| buf[0] as i8);
impl_number!(u16, U16, 2, |buf, order| order.read_u16(buf));
impl_number!(i16, I16, 2, |buf, order| order.read_u16(buf) as i16);
impl_number!(u32, U32, 4, |buf, order| order.read_u32(buf));
impl_number!(i32, I32, 4, |buf, order| order.read_u32(buf) as i32);
impl_number!(u64, U64, 8, |buf, order| order.read_u64(buf));
impl_number!(i64, I64, 8, |buf, order| order.read_u64(buf) as i64);

type ExtraRenderer<T> = Arc<dyn Fn(T) -> String + Send + Sync>;

/// A named fixed-size numeric leaf.
///
/// Plain attributes just consume their bytes. A *final* attribute only
/// matches and decodes its one expected value, which is how magic numbers are
/// declared. A *bound* attribute publishes its decoded value into the active
/// scope so later specs and render callbacks can read it back through
/// [`NumberAttribute::get`].
pub struct NumberAttribute<T: NumberType> {
    id: AttrId,
    name: String,
    final_value: Option<T>,
    bound: bool,
    extra: Vec<ExtraRenderer<T>>,
}

impl<T: NumberType> NumberAttribute<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: AttrId::next(),
            name: name.into(),
            final_value: None,
            bound: false,
            extra: Vec::new(),
        }
    }

    /// Requires the decoded value to equal `value` for both probing and
    /// decoding.
    pub fn with_final(mut self, value: T) -> Self {
        self.final_value = Some(value);
        self
    }

    /// Publishes the decoded value into the enclosing result's scope.
    pub fn bind(mut self) -> Self {
        self.bound = true;
        self
    }

    /// Attaches an extra renderer; its output lands in a comment span after
    /// the raw value.
    pub fn with_renderer(mut self, f: impl Fn(T) -> String + Send + Sync + 'static) -> Self {
        self.extra.push(Arc::new(f));
        self
    }

    pub fn id(&self) -> AttrId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolves the bound value against `scope`.
    ///
    /// ## Panics
    /// Panics when called on an unbound attribute; reading a value nobody
    /// stored is a broken spec.
    pub fn get(&self, scope: &dyn ValueLookup) -> Option<T> {
        assert!(self.bound, "attribute {:?} was never bound", self.name);
        scope.lookup(self.id).and_then(T::from_value)
    }

    /// The value to show for `view`: bound attributes read their scope,
    /// everything else re-reads the frozen input. `None` means the value is
    /// unavailable, which renders as an inline warning.
    fn resolve(&self, view: &RenderView<'_>) -> Result<Option<T>, RenderError> {
        if self.bound {
            return Ok(view.context().lookup(self.id).and_then(T::from_value));
        }
        match view.input().read_exact_at(view.start, T::SIZE as usize) {
            Ok(buf) => Ok(Some(T::read(&buf, view.order()))),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(RenderError::Io(e)),
        }
    }

    fn render_line(
        &self,
        view: &RenderView<'_>,
        out: &mut dyn Renderer,
        symbol: Option<&AHashMap<T, String>>,
    ) -> Result<(), RenderError>
    where
        T: Eq + Hash,
    {
        out.write_ref_text(RenderMode::Normal, &self.name, view.start)?;
        out.write_text(RenderMode::Operator, " = ")?;
        match self.resolve(view)? {
            Some(value) => {
                out.write_text(RenderMode::Value, &value.to_string())?;
                if let Some(symbols) = symbol {
                    let name = symbols.get(&value).map(String::as_str).unwrap_or("?");
                    out.write_text(RenderMode::Comment, &format!(" // {name}"))?;
                }
                for extra in &self.extra {
                    out.write_text(RenderMode::Comment, &format!(" // {}", extra(value)))?;
                }
            }
            None => out.write_text(RenderMode::Error, "<unavailable>")?,
        }
        out.write_break()
    }
}

impl<T: NumberType> fmt::Debug for NumberAttribute<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NumberAttribute")
            .field("name", &self.name)
            .field("final_value", &self.final_value)
            .field("bound", &self.bound)
            .finish()
    }
}

impl<T: NumberType + Eq + Hash> FormatSpec for NumberAttribute<T> {
    fn match_size(&self) -> u64 {
        T::SIZE
    }

    fn matches(&self, buf: &[u8], order: Endian) -> bool {
        if buf.len() < T::SIZE as usize {
            return false;
        }
        match self.final_value {
            Some(expected) => T::read(buf, order) == expected,
            None => true,
        }
    }

    fn is_fixed_size(&self) -> bool {
        true
    }

    fn spec_decode(
        &self,
        st: &mut DecodeState,
        builder: &mut ResultBuilder,
        pos: u64,
    ) -> Result<u64, DecodeError> {
        let buf = read_exact_or_fatal(builder.input(), pos, T::SIZE as usize)?;
        let value = T::read(&buf, builder.order());

        if let Some(expected) = self.final_value {
            if value != expected {
                return Err(DecodeError::Fatal(format!(
                    "{}: expected {expected}, found {value}",
                    self.name
                )));
            }
        }

        if self.bound {
            st.scope_mut().bind(self.id, value.into_value());
        }
        Ok(T::SIZE)
    }

    fn spec_render(
        &self,
        view: &RenderView<'_>,
        out: &mut dyn Renderer,
    ) -> Result<(), RenderError> {
        self.render_line(view, out, None)
    }

    fn label(&self) -> &str {
        &self.name
    }
}

/// A numeric attribute whose values have symbolic names, shown next to the
/// raw number. Unknown values render as `?`.
pub struct SymbolAttribute<T: NumberType + Eq + Hash> {
    attr: NumberAttribute<T>,
    symbols: AHashMap<T, String>,
}

impl<T: NumberType + Eq + Hash> SymbolAttribute<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            attr: NumberAttribute::new(name),
            symbols: AHashMap::new(),
        }
    }

    pub fn symbol(mut self, value: T, name: impl Into<String>) -> Self {
        self.symbols.insert(value, name.into());
        self
    }

    pub fn bind(mut self) -> Self {
        self.attr = self.attr.bind();
        self
    }

    pub fn with_final(mut self, value: T) -> Self {
        self.attr = self.attr.with_final(value);
        self
    }

    pub fn id(&self) -> AttrId {
        self.attr.id()
    }

    pub fn get(&self, scope: &dyn ValueLookup) -> Option<T> {
        self.attr.get(scope)
    }

    pub fn symbol_of(&self, value: T) -> Option<&str> {
        self.symbols.get(&value).map(String::as_str)
    }
}

impl<T: NumberType + Eq + Hash> fmt::Debug for SymbolAttribute<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolAttribute")
            .field("attr", &self.attr)
            .field("symbols", &self.symbols.len())
            .finish()
    }
}

impl<T: NumberType + Eq + Hash> FormatSpec for SymbolAttribute<T> {
    fn match_size(&self) -> u64 {
        self.attr.match_size()
    }

    fn matches(&self, buf: &[u8], order: Endian) -> bool {
        self.attr.matches(buf, order)
    }

    fn is_fixed_size(&self) -> bool {
        true
    }

    fn spec_decode(
        &self,
        st: &mut DecodeState,
        builder: &mut ResultBuilder,
        pos: u64,
    ) -> Result<u64, DecodeError> {
        self.attr.spec_decode(st, builder, pos)
    }

    fn spec_render(
        &self,
        view: &RenderView<'_>,
        out: &mut dyn Renderer,
    ) -> Result<(), RenderError> {
        self.attr.render_line(view, out, Some(&self.symbols))
    }

    fn label(&self) -> &str {
        self.attr.name()
    }
}

/// An unstructured byte range with a possibly late-bound size, rendered as an
/// escaped ASCII preview. Covers name fields, padding, and anything the
/// format treats as opaque.
#[derive(Debug)]
pub struct RangeSpec {
    name: String,
    size: ValueExpression<u64>,
}

impl RangeSpec {
    pub fn new(name: impl Into<String>, size: impl Into<ValueExpression<u64>>) -> Self {
        Self {
            name: name.into(),
            size: size.into(),
        }
    }
}

const RANGE_PREVIEW: usize = 16;

impl FormatSpec for RangeSpec {
    fn match_size(&self) -> u64 {
        match self.size {
            ValueExpression::Literal(n) => n,
            ValueExpression::Thunk(_) => 0,
        }
    }

    fn matches(&self, _buf: &[u8], _order: Endian) -> bool {
        // Any bytes are acceptable; probing only confirms availability
        matches!(self.size, ValueExpression::Literal(_))
    }

    fn is_fixed_size(&self) -> bool {
        matches!(self.size, ValueExpression::Literal(_))
    }

    fn spec_decode(
        &self,
        st: &mut DecodeState,
        builder: &mut ResultBuilder,
        pos: u64,
    ) -> Result<u64, DecodeError> {
        let size = self
            .size
            .eval(st.scope())
            .ok_or_else(|| DecodeError::fatal(format!("{}: unresolved range size", self.name)))?;
        if pos + size > builder.input().len() {
            return Err(DecodeError::Fatal(format!(
                "{}: {size} byte range runs past the end of {}",
                self.name,
                builder.input().path()
            )));
        }
        Ok(size)
    }

    fn spec_render(
        &self,
        view: &RenderView<'_>,
        out: &mut dyn Renderer,
    ) -> Result<(), RenderError> {
        let total = (view.end - view.start) as usize;
        let preview = view
            .input()
            .read_exact_at(view.start, total.min(RANGE_PREVIEW))?;

        out.write_ref_text(RenderMode::Normal, &self.name, view.start)?;
        out.write_text(RenderMode::Operator, " = ")?;
        out.write_text(
            RenderMode::Value,
            &format!("\"{}\"", AsciiDisplay::new(&preview)),
        )?;
        if total > RANGE_PREVIEW {
            out.write_text(RenderMode::Comment, &format!(" // {total} bytes"))?;
        }
        out.write_break()
    }

    fn label(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::{NumberAttribute, RangeSpec};
    use crate::{
        decode::DecodeState,
        input::{Endian, Input},
        result::ResultBuilder,
        spec::{DecodeError, FormatSpec, ResultType},
    };

    fn harness(bytes: Vec<u8>) -> (DecodeState, ResultBuilder) {
        let input = Input::from_bytes("attr.bin", Endian::Little, bytes);
        let mut st = DecodeState::for_tests();
        st.scope_mut().push();
        let builder = ResultBuilder::new(ResultType::Format, "t", input, Endian::Little, 0);
        (st, builder)
    }

    #[test]
    fn fixed_size_decode_consumes_match_size() {
        let attr = NumberAttribute::<u32>::new("field");
        let (mut st, mut builder) = harness(vec![0x78, 0x56, 0x34, 0x12, 0xFF]);
        let consumed = attr.spec_decode(&mut st, &mut builder, 0).unwrap();
        assert_eq!(consumed, attr.match_size());
    }

    #[test]
    fn bound_value_lands_in_scope() {
        let attr = NumberAttribute::<u16>::new("len").bind();
        let (mut st, mut builder) = harness(vec![0x05, 0x00]);
        attr.spec_decode(&mut st, &mut builder, 0).unwrap();
        assert_eq!(attr.get(st.scope()), Some(5u16));
    }

    #[test]
    fn final_value_gates_match_and_decode() {
        let magic = NumberAttribute::<u16>::new("magic").with_final(0xCAFE);
        assert!(magic.matches(&[0xFE, 0xCA], Endian::Little));
        assert!(!magic.matches(&[0x00, 0xCA], Endian::Little));

        let (mut st, mut builder) = harness(vec![0x00, 0x00]);
        match magic.spec_decode(&mut st, &mut builder, 0) {
            Err(DecodeError::Fatal(_)) => {}
            other => panic!("expected fatal, got {other:?}"),
        }
    }

    #[test]
    fn truncated_read_is_fatal_not_io() {
        let attr = NumberAttribute::<u64>::new("wide");
        let (mut st, mut builder) = harness(vec![1, 2, 3]);
        assert!(matches!(
            attr.spec_decode(&mut st, &mut builder, 0),
            Err(DecodeError::Fatal(_))
        ));
    }

    #[test]
    fn range_bounds_are_checked() {
        let range = RangeSpec::new("payload", 8u64);
        assert_eq!(range.match_size(), 8);
        assert!(range.is_fixed_size());

        let (mut st, mut builder) = harness(vec![0; 4]);
        assert!(matches!(
            range.spec_decode(&mut st, &mut builder, 0),
            Err(DecodeError::Fatal(_))
        ));
    }
}
