//! The decode driver
//!
//! Walks a format's spec tree over an input, threading a scope stack aligned
//! with the result builder tree, and freezes the outcome into a
//! [`ScanResult`]. Failure policy: a fatal halts the result it surfaced in
//! and never unwinds past the enclosing result boundary; I/O errors always
//! unwind; cancellation unwinds the walk and surfaces as a fatal status on
//! the partial root.

use crate::{
    codec::DecodeCache,
    context::ScopeStack,
    input::{Endian, Input},
    result::{DecodeStatus, ResultBuilder, ScanResult},
    spec::{DecodeError, FormatSpec, ResultType},
};
use log::{debug, trace};
use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Shared cancellation flag. Cloning shares the flag; any holder can trip it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> Result<(), DecodeError> {
        if self.is_cancelled() {
            Err(DecodeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Everything a running decode threads through the spec walk besides the
/// builder itself.
#[derive(Debug)]
pub struct DecodeState {
    scope: ScopeStack,
    cancel: CancelToken,
    cache: Arc<DecodeCache>,
}

impl DecodeState {
    pub fn new(cache: Arc<DecodeCache>, cancel: CancelToken) -> Self {
        Self {
            scope: ScopeStack::new(),
            cancel,
            cache,
        }
    }

    pub fn scope(&self) -> &ScopeStack {
        &self.scope
    }

    pub fn scope_mut(&mut self) -> &mut ScopeStack {
        &mut self.scope
    }

    pub fn cache(&self) -> &DecodeCache {
        &self.cache
    }

    pub fn check_cancelled(&self) -> Result<(), DecodeError> {
        self.cancel.check()
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::new(Arc::new(DecodeCache::new()), CancelToken::new())
    }
}

/// One step of a composite decode.
pub(crate) struct ChildStep {
    pub consumed: u64,
    /// The enclosing composite must stop iterating.
    pub halt: bool,
}

/// Decodes one child spec at `pos`, applying the shared status policy.
///
/// Result-producing specs get their own builder, scope frame, and title; a
/// fatal inside stays on the child and is echoed onto `builder` as a warning.
/// In-place specs decode straight into `builder`, where a fatal is recorded
/// and halts the caller; successful in-place leaves record a render section.
pub(crate) fn decode_child(
    spec: &Arc<dyn FormatSpec>,
    st: &mut DecodeState,
    builder: &mut ResultBuilder,
    pos: u64,
) -> Result<ChildStep, DecodeError> {
    st.check_cancelled()?;

    if let Some(ty) = spec.result_type() {
        let mut child = ResultBuilder::new(
            ty,
            spec.label(),
            builder.input().clone(),
            builder.order(),
            pos,
        );
        child.set_renderable(spec.clone());

        st.scope_mut().push();
        let outcome = spec.spec_decode(st, &mut child, pos);
        let context = st.scope_mut().pop();
        child.set_context(context);

        let consumed = match outcome {
            Ok(consumed) => consumed,
            Err(DecodeError::Fatal(msg)) => {
                trace!("nested decode of {:?} failed: {msg}", child.title());
                child.add_status(DecodeStatus::Fatal(msg));
                0
            }
            Err(e) => {
                // Keep what was built; I/O errors and cancellation unwind
                builder.add_result(child);
                return Err(e);
            }
        };
        child.update_end(pos + consumed);

        if child.has_fatal() {
            builder.add_status(DecodeStatus::Warning(format!(
                "nested decode of {:?} failed",
                child.title()
            )));
        }
        builder.add_result(child);
        Ok(ChildStep {
            consumed,
            halt: false,
        })
    } else {
        let consumed = match spec.spec_decode(st, builder, pos) {
            Ok(consumed) => consumed,
            Err(DecodeError::Fatal(msg)) => {
                builder.add_status(DecodeStatus::Fatal(msg));
                return Ok(ChildStep {
                    consumed: 0,
                    halt: true,
                });
            }
            Err(e) => return Err(e),
        };
        if consumed > 0 && spec.records_section() {
            builder.add_section(spec.clone(), pos, pos + consumed);
        }
        Ok(ChildStep {
            consumed,
            // A nested composite may have recorded a fatal on this builder
            halt: builder.has_fatal(),
        })
    }
}

/// External descriptor of one recognizable format: a name, a byte order, and
/// the spec tree that decodes and renders it.
#[derive(Debug, Clone)]
pub struct Format {
    name: String,
    order: Endian,
    root: Arc<dyn FormatSpec>,
}

impl Format {
    pub fn new(name: impl Into<String>, order: Endian, root: impl FormatSpec + 'static) -> Self {
        Self {
            name: name.into(),
            order,
            root: Arc::new(root),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn order(&self) -> Endian {
        self.order
    }

    /// The spec rendered for results of this format.
    pub fn decodable(&self) -> &Arc<dyn FormatSpec> {
        &self.root
    }

    pub fn match_size(&self) -> u64 {
        self.root.match_size()
    }

    /// Probes a prefix buffer. Formats whose root opted out of prefix
    /// matching never match here and are decode-only.
    pub fn matches(&self, prefix: &[u8]) -> bool {
        self.root.match_size() > 0 && self.root.matches(prefix, self.order)
    }
}

/// The set of formats a scan recognizes.
#[derive(Debug, Default)]
pub struct FormatRegistry {
    formats: Vec<Format>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, format: Format) -> &mut Self {
        self.formats.push(format);
        self
    }

    pub fn formats(&self) -> &[Format] {
        &self.formats
    }

    /// Returns the first registered format whose prefix matches at `pos`.
    pub fn identify(&self, input: &Input, pos: u64) -> io::Result<Option<&Format>> {
        let probe_size = self
            .formats
            .iter()
            .map(Format::match_size)
            .max()
            .unwrap_or(0) as usize;
        let mut buf = vec![0; probe_size];
        let available = input.read_at(pos, &mut buf)?;
        buf.truncate(available);

        Ok(self.formats.iter().find(|f| f.matches(&buf)))
    }
}

/// Probes whether `format` plausibly starts at `pos` of `input`.
pub fn probe(format: &Format, input: &Input, pos: u64) -> io::Result<bool> {
    let size = format.match_size() as usize;
    if size == 0 {
        return Ok(false);
    }
    let mut buf = vec![0; size];
    let available = input.read_at(pos, &mut buf)?;
    buf.truncate(available);
    Ok(format.matches(&buf))
}

/// Decodes `format` at `pos` of `input` and freezes the outcome.
///
/// Undecodable bytes and observed cancellation both come back as a fatal
/// status on the (possibly partial) returned tree; only I/O errors surface
/// as `Err`.
pub fn decode_format(
    format: &Format,
    input: &Input,
    pos: u64,
    cache: Arc<DecodeCache>,
    cancel: CancelToken,
) -> Result<ScanResult, DecodeError> {
    let mut st = DecodeState::new(cache, cancel);
    let mut root = ResultBuilder::new(
        ResultType::Format,
        format.name(),
        input.clone(),
        format.order(),
        pos,
    );
    root.set_renderable(format.decodable().clone());

    st.scope_mut().push();
    let outcome = format.decodable().spec_decode(&mut st, &mut root, pos);
    let context = st.scope_mut().pop();
    root.set_context(context);

    match outcome {
        Ok(consumed) => root.update_end(pos + consumed),
        Err(DecodeError::Fatal(msg)) => root.add_status(DecodeStatus::Fatal(msg)),
        Err(DecodeError::Cancelled) => {
            root.add_status(DecodeStatus::Fatal("decode cancelled".into()))
        }
        Err(e @ DecodeError::Io(_)) => return Err(e),
    }

    let result = root.to_result();
    debug!(
        "decoded {} at {}:{pos}: {} bytes, {} statuses",
        format.name(),
        input.path(),
        result.size(),
        result.statuses().len()
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::{decode_format, probe, CancelToken, Format, FormatRegistry};
    use crate::{
        codec::DecodeCache,
        input::{Endian, Input},
        spec::{NumberAttribute, StructSpec, UnionSpec},
    };
    use std::sync::Arc;

    fn fixed_struct() -> StructSpec {
        // Four u32 fields, 16 bytes overall
        StructSpec::new("block")
            .append(NumberAttribute::<u32>::new("a"))
            .append(NumberAttribute::<u32>::new("b"))
            .append(NumberAttribute::<u32>::new("c"))
            .append(NumberAttribute::<u32>::new("d"))
    }

    fn decode(format: &Format, input: &Input) -> crate::result::ScanResult {
        decode_format(
            format,
            input,
            0,
            Arc::new(DecodeCache::new()),
            CancelToken::new(),
        )
        .unwrap()
    }

    #[test]
    fn truncated_input_fails_fatally_at_the_root() {
        let format = Format::new("block", Endian::Little, fixed_struct());
        let input = Input::from_bytes("short.bin", Endian::Little, vec![0; 10]);

        let result = decode(&format, &input);
        assert!(result.has_fatal());
        assert!(result.children().is_empty());
        assert!(result.sections().is_empty());
        assert_eq!(result.start(), result.end());
    }

    #[test]
    fn union_picks_by_leading_byte() {
        let variant = |name: &str, first: u8| {
            StructSpec::new(name)
                .append(NumberAttribute::<u8>::new("tag").with_final(first))
                .append(NumberAttribute::<u8>::new("x"))
                .append(NumberAttribute::<u16>::new("y"))
        };
        let spec = StructSpec::new("record").append(
            UnionSpec::new("body")
                .variant(variant("v1", 0x01))
                .variant(variant("v2", 0x02)),
        );
        let format = Format::new("record", Endian::Little, spec);

        let first = decode(
            &format,
            &Input::from_bytes("a", Endian::Little, vec![0x01, 0, 0, 0]),
        );
        assert!(!first.has_fatal());
        assert_eq!(first.size(), 4);

        let second = decode(
            &format,
            &Input::from_bytes("b", Endian::Little, vec![0x02, 0, 0, 0]),
        );
        assert!(!second.has_fatal());
        assert_eq!(second.size(), 4);

        // Neither alternative matches: the enclosing struct records a fatal
        let neither = decode(
            &format,
            &Input::from_bytes("c", Endian::Little, vec![0x03, 0, 0, 0]),
        );
        assert!(neither.has_fatal());
        assert_eq!(neither.size(), 0);
    }

    #[test]
    fn cancellation_keeps_the_partial_tree() {
        let format = Format::new("block", Endian::Little, fixed_struct());
        let input = Input::from_bytes("c.bin", Endian::Little, vec![0; 16]);

        let cancel = CancelToken::new();
        cancel.cancel();
        let result = decode_format(
            &format,
            &input,
            0,
            Arc::new(DecodeCache::new()),
            cancel,
        )
        .unwrap();
        assert!(result.has_fatal());
    }

    #[test]
    fn registry_identifies_by_prefix() {
        let magic = |name: &str, byte: u8| {
            Format::new(
                name,
                Endian::Little,
                StructSpec::new(name)
                    .append(NumberAttribute::<u8>::new("magic").with_final(byte))
                    .append(NumberAttribute::<u8>::new("rest")),
            )
        };

        let mut registry = FormatRegistry::new();
        registry.register(magic("alpha", 0xAA));
        registry.register(magic("beta", 0xBB));

        let input = Input::from_bytes("x", Endian::Little, vec![0xBB, 0x00]);
        let found = registry.identify(&input, 0).unwrap().unwrap();
        assert_eq!(found.name(), "beta");

        assert!(probe(found, &input, 0).unwrap());
        let other = Input::from_bytes("y", Endian::Little, vec![0xCC]);
        assert!(registry.identify(&other, 0).unwrap().is_none());
    }
}
