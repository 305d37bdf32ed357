//! The rendering walk
//!
//! Rendering is a read-only pass over a frozen [`ScanResult`]: the driver
//! re-enters the result's context, hands the renderable spec a [`RenderView`]
//! of the span, and the spec emits styled output through the abstract
//! [`Renderer`] sink. A result that renders nothing falls back to a hex
//! dump; decode statuses always come last.

use crate::{
    codec::StreamHandler,
    context::ResultContext,
    decode::CancelToken,
    input::{Endian, Input},
    result::ScanResult,
};
use binscan_utils::{ok, HexLine, HEX_LINE_WIDTH};
use std::io;
use thiserror::Error;

/// Styling applied to a rendered span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Normal,
    Keyword,
    Operator,
    Value,
    Comment,
    Label,
    Error,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render output failed: {0}")]
    Io(#[from] io::Error),
    #[error("render cancelled")]
    Cancelled,
    /// Renderer implementations live outside this crate; whatever they throw
    /// travels through here.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The span a spec is asked to render, with access to the frozen result it
/// belongs to.
#[derive(Clone, Copy)]
pub struct RenderView<'a> {
    pub result: &'a ScanResult,
    pub start: u64,
    pub end: u64,
    pub cancel: &'a CancelToken,
}

impl<'a> RenderView<'a> {
    pub fn context(&self) -> &'a ResultContext {
        self.result.context()
    }

    pub fn input(&self) -> &'a Input {
        self.result.input()
    }

    pub fn order(&self) -> Endian {
        self.result.order()
    }
}

/// Abstract styled-output sink.
///
/// Only text, references, and breaks are required; media methods default to
/// anchored placeholders because upstream behavior for referenced media is
/// undefined, and concrete renderers that can embed media override them.
pub trait Renderer {
    fn write_preamble(&mut self) -> Result<(), RenderError> {
        ok()
    }

    fn write_epilogue(&mut self) -> Result<(), RenderError> {
        ok()
    }

    /// Opens an explicit styling run. Plain sinks can ignore this; markup
    /// sinks emit their opening tag here.
    fn write_begin_mode(&mut self, mode: RenderMode) -> Result<(), RenderError> {
        let _ = mode;
        ok()
    }

    fn write_end_mode(&mut self, mode: RenderMode) -> Result<(), RenderError> {
        let _ = mode;
        ok()
    }

    fn write_text(&mut self, mode: RenderMode, text: &str) -> Result<(), RenderError>;

    /// Text that links back to an absolute input position.
    fn write_ref_text(
        &mut self,
        mode: RenderMode,
        text: &str,
        anchor: u64,
    ) -> Result<(), RenderError>;

    fn write_break(&mut self) -> Result<(), RenderError>;

    fn write_image(
        &mut self,
        mode: RenderMode,
        stream: &dyn StreamHandler,
    ) -> Result<(), RenderError> {
        let _ = stream;
        self.write_text(mode, "[image]")
    }

    fn write_video(
        &mut self,
        mode: RenderMode,
        stream: &dyn StreamHandler,
    ) -> Result<(), RenderError> {
        let _ = stream;
        self.write_text(mode, "[video]")
    }

    fn write_ref_image(
        &mut self,
        mode: RenderMode,
        stream: &dyn StreamHandler,
        anchor: u64,
    ) -> Result<(), RenderError> {
        let _ = stream;
        self.write_ref_text(mode, "[image]", anchor)
    }

    fn write_ref_video(
        &mut self,
        mode: RenderMode,
        stream: &dyn StreamHandler,
        anchor: u64,
    ) -> Result<(), RenderError> {
        let _ = stream;
        self.write_ref_text(mode, "[video]", anchor)
    }

    /// Whether anything has been written yet.
    fn has_output(&self) -> bool;

    fn close(&mut self) -> Result<(), RenderError> {
        ok()
    }
}

/// Deterministic plain-text renderer. References render as `text@0xPOS` so
/// anchors stay visible and testable.
#[derive(Debug, Default)]
pub struct TextRenderer {
    buf: String,
}

impl TextRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(&self) -> &str {
        &self.buf
    }

    pub fn into_output(self) -> String {
        self.buf
    }
}

impl Renderer for TextRenderer {
    fn write_text(&mut self, _mode: RenderMode, text: &str) -> Result<(), RenderError> {
        self.buf.push_str(text);
        ok()
    }

    fn write_ref_text(
        &mut self,
        _mode: RenderMode,
        text: &str,
        anchor: u64,
    ) -> Result<(), RenderError> {
        self.buf.push_str(text);
        self.buf.push_str(&format!("@{anchor:#x}"));
        ok()
    }

    fn write_break(&mut self) -> Result<(), RenderError> {
        self.buf.push('\n');
        ok()
    }

    fn has_output(&self) -> bool {
        !self.buf.is_empty()
    }
}

/// Renders every recorded section falling inside `view`'s span, in decode
/// order. This is the whole render body of the composite specs.
pub(crate) fn render_sections(
    view: &RenderView<'_>,
    out: &mut dyn Renderer,
) -> Result<(), RenderError> {
    for section in view.result.sections() {
        if view.cancel.is_cancelled() {
            return Err(RenderError::Cancelled);
        }
        if section.start >= view.start && section.end <= view.end {
            let sub = RenderView {
                start: section.start,
                end: section.end,
                ..*view
            };
            section.spec.spec_render(&sub, out)?;
        }
    }
    ok()
}

/// How many bytes [`render_default`] shows before summarizing the rest.
const DEFAULT_VIEW_CAP: u64 = 512;

/// Hex dump fallback for results whose specs render nothing themselves.
pub fn render_default(
    result: &ScanResult,
    out: &mut dyn Renderer,
    cancel: &CancelToken,
) -> Result<(), RenderError> {
    let shown = result.size().min(DEFAULT_VIEW_CAP);
    let mut offset = 0;

    while offset < shown {
        if cancel.is_cancelled() {
            return Err(RenderError::Cancelled);
        }
        let line_len = (shown - offset).min(HEX_LINE_WIDTH as u64) as usize;
        let pos = result.start() + offset;
        let bytes = result.input().read_exact_at(pos, line_len)?;
        out.write_text(RenderMode::Normal, &HexLine::new(pos, &bytes).to_string())?;
        out.write_break()?;
        offset += line_len as u64;
    }

    if shown < result.size() {
        out.write_text(
            RenderMode::Comment,
            &format!("... {} more bytes", result.size() - shown),
        )?;
        out.write_break()?;
    }
    ok()
}

/// Renders one frozen result: preamble, the renderable's output (or the hex
/// fallback when it emitted nothing), decode statuses, epilogue.
pub fn render_result(
    result: &ScanResult,
    out: &mut dyn Renderer,
    cancel: &CancelToken,
) -> Result<(), RenderError> {
    out.write_preamble()?;

    if let Some(renderable) = result.renderable() {
        let view = RenderView {
            result,
            start: result.start(),
            end: result.end(),
            cancel,
        };
        renderable.spec_render(&view, out)?;
    }

    if !out.has_output() {
        render_default(result, out, cancel)?;
    }

    for status in result.statuses() {
        let mode = if status.is_fatal() {
            RenderMode::Error
        } else {
            RenderMode::Comment
        };
        out.write_begin_mode(mode)?;
        out.write_text(mode, &status.to_string())?;
        out.write_end_mode(mode)?;
        out.write_break()?;
    }

    out.write_epilogue()
}
