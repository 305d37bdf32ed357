//! The mutable-then-immutable result tree
//!
//! Decoding populates a [`ResultBuilder`] tree; [`ResultBuilder::to_result`]
//! freezes it into a [`ScanResult`] tree that viewers can hold on to and
//! render any number of times. Builders are never exposed to renderers.

use crate::{
    context::ResultContext,
    input::{Endian, Input},
    spec::{FormatSpec, ResultType},
};
use std::{fmt, sync::Arc};

/// Outcome annotation attached to a result. Statuses are data once recorded;
/// only the decode drivers decide what halts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeStatus {
    /// Anomaly worth showing, decoding continued normally.
    Warning(String),
    /// The bytes could not be interpreted; the owning result's sequence was
    /// cut short.
    Fatal(String),
}

impl DecodeStatus {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DecodeStatus::Fatal(_))
    }
}

impl fmt::Display for DecodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeStatus::Warning(msg) => write!(f, "warning: {msg}"),
            DecodeStatus::Fatal(msg) => write!(f, "error: {msg}"),
        }
    }
}

/// Span a non-result spec decoded, kept so rendering can revisit it.
#[derive(Debug, Clone)]
pub struct ResultSection {
    pub spec: Arc<dyn FormatSpec>,
    pub start: u64,
    pub end: u64,
}

/// Mutable decode-phase accumulator for one result node.
#[derive(Debug)]
pub struct ResultBuilder {
    ty: ResultType,
    title: String,
    input: Input,
    order: Endian,
    start: u64,
    end: u64,
    statuses: Vec<DecodeStatus>,
    children: Vec<ResultBuilder>,
    sections: Vec<ResultSection>,
    renderable: Option<Arc<dyn FormatSpec>>,
    context: Option<Arc<ResultContext>>,
}

impl ResultBuilder {
    /// ## Panics
    /// INPUT builders are only ever created through [`ResultBuilder::add_input`].
    pub fn new(
        ty: ResultType,
        title: impl Into<String>,
        input: Input,
        order: Endian,
        start: u64,
    ) -> Self {
        assert!(ty != ResultType::Input, "INPUT results come from add_input");
        Self {
            ty,
            title: title.into(),
            input,
            order,
            start,
            end: start,
            statuses: Vec::new(),
            children: Vec::new(),
            sections: Vec::new(),
            renderable: None,
            context: None,
        }
    }

    pub fn ty(&self) -> ResultType {
        self.ty
    }

    pub fn input(&self) -> &Input {
        &self.input
    }

    pub fn order(&self) -> Endian {
        self.order
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    /// Grows the span. The effective end also covers every same-input child.
    ///
    /// ## Panics
    /// Panics when asked to end before the start.
    pub fn update_end(&mut self, end: u64) {
        assert!(end >= self.start, "result cannot end before it starts");
        self.end = self.end.max(end);
    }

    pub fn add_status(&mut self, status: DecodeStatus) {
        self.statuses.push(status);
    }

    pub fn has_fatal(&self) -> bool {
        self.statuses.iter().any(DecodeStatus::is_fatal)
    }

    /// Attaches a nested FORMAT or ENCODED_INPUT child.
    ///
    /// ## Panics
    /// Panics on an INPUT parent, on a child of a different input, or on a
    /// child starting before this builder or before its previous sibling.
    pub fn add_result(&mut self, child: ResultBuilder) {
        assert!(self.ty != ResultType::Input, "INPUT results have no format children");
        assert!(
            Input::ptr_eq(&self.input, &child.input),
            "format child decoded from a foreign input"
        );
        assert!(child.start >= self.start, "child starts before its parent");
        if let Some(last) = self.last_same_input_child() {
            assert!(child.start >= last.start, "children must be added in position order");
        }
        self.children.push(child);
    }

    /// Attaches a derived input (decoded stream or verbatim slice) as an INPUT
    /// child spanning all of it.
    pub fn add_input(&mut self, input: Input) {
        let end = input.len();
        self.children.push(ResultBuilder {
            ty: ResultType::Input,
            title: input.path().to_owned(),
            order: input.order(),
            input,
            start: 0,
            end,
            statuses: Vec::new(),
            children: Vec::new(),
            sections: Vec::new(),
            renderable: None,
            context: None,
        });
    }

    pub fn add_section(&mut self, spec: Arc<dyn FormatSpec>, start: u64, end: u64) {
        assert!(start <= end, "inverted section span");
        self.sections.push(ResultSection { spec, start, end });
    }

    pub fn set_renderable(&mut self, spec: Arc<dyn FormatSpec>) {
        self.renderable = Some(spec);
    }

    pub fn set_context(&mut self, context: Arc<ResultContext>) {
        self.context = Some(context);
    }

    fn last_same_input_child(&self) -> Option<&ResultBuilder> {
        self.children
            .iter()
            .rev()
            .find(|c| Input::ptr_eq(&c.input, &self.input))
    }

    fn effective_end(&self) -> u64 {
        let child_end = self
            .children
            .iter()
            .filter(|c| Input::ptr_eq(&c.input, &self.input))
            .map(ResultBuilder::effective_end)
            .max()
            .unwrap_or(0);
        self.end.max(child_end)
    }

    /// Freezes this builder tree into an immutable result tree. Zero-size
    /// children are dropped; the node itself is always kept so a failed root
    /// still reports its status.
    pub fn to_result(&self) -> ScanResult {
        let children: Vec<ScanResult> = self
            .children
            .iter()
            .filter(|c| c.effective_end() > c.start)
            .map(ResultBuilder::to_result)
            .collect();

        debug_assert!(
            children
                .windows(2)
                .filter(|w| Input::ptr_eq(&w[0].input, &w[1].input))
                .all(|w| w[0].start < w[1].start),
            "frozen children out of order"
        );

        ScanResult {
            ty: self.ty,
            title: self.title.clone(),
            input: self.input.clone(),
            order: self.order,
            start: self.start,
            end: self.effective_end(),
            statuses: self.statuses.clone(),
            children,
            sections: self.sections.clone(),
            renderable: self.renderable.clone(),
            context: self.context.clone().unwrap_or_default(),
        }
    }
}

/// One frozen, decoded region. Owns its children and context, references its
/// input.
#[derive(Debug, Clone)]
pub struct ScanResult {
    ty: ResultType,
    title: String,
    input: Input,
    order: Endian,
    start: u64,
    end: u64,
    statuses: Vec<DecodeStatus>,
    children: Vec<ScanResult>,
    sections: Vec<ResultSection>,
    renderable: Option<Arc<dyn FormatSpec>>,
    context: Arc<ResultContext>,
}

impl ScanResult {
    pub fn ty(&self) -> ResultType {
        self.ty
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn input(&self) -> &Input {
        &self.input
    }

    pub fn order(&self) -> Endian {
        self.order
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    pub fn statuses(&self) -> &[DecodeStatus] {
        &self.statuses
    }

    pub fn has_fatal(&self) -> bool {
        self.statuses.iter().any(DecodeStatus::is_fatal)
    }

    pub fn children(&self) -> &[ScanResult] {
        &self.children
    }

    pub fn sections(&self) -> &[ResultSection] {
        &self.sections
    }

    pub fn renderable(&self) -> Option<&Arc<dyn FormatSpec>> {
        self.renderable.as_ref()
    }

    pub fn context(&self) -> &ResultContext {
        &self.context
    }

    /// Structural equality over the decoded data: spans, titles, statuses and
    /// children, ignoring spec/context identity.
    pub fn structural_eq(&self, other: &ScanResult) -> bool {
        self.ty == other.ty
            && self.title == other.title
            && self.start == other.start
            && self.end == other.end
            && self.statuses == other.statuses
            && self.children.len() == other.children.len()
            && self
                .children
                .iter()
                .zip(&other.children)
                .all(|(a, b)| a.structural_eq(b))
    }
}
