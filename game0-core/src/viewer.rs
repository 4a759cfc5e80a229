//! Live code viewer: highlighted, auto-scrolling view over the streamed text.
//!
//! Highlighting runs over raw text, never a parsed DOM, so partial or
//! malformed markup is fine. Inputs over 512 KiB or 10 000 retained lines, an
//! unknown theme, or a highlighter error all fall back to unstyled spans.

use once_cell::sync::Lazy;
use syntect::easy::HighlightLines;
use syntect::highlighting::{FontStyle, Style, Theme, ThemeSet};
use syntect::parsing::{SyntaxReference, SyntaxSet};
use syntect::util::{as_24_bit_terminal_escaped, LinesWithEndings};

use crate::buffer::{IncrementalBuffer, Progress};
use crate::config::ViewerCfg;
use crate::extract::FenceState;
use crate::generation::{AttemptInfo, GenerationObserver};

static SYNTAX_SET: Lazy<SyntaxSet> = Lazy::new(SyntaxSet::load_defaults_newlines);
static THEME_SET: Lazy<ThemeSet> = Lazy::new(ThemeSet::load_defaults);

const MAX_HIGHLIGHT_BYTES: usize = 512 * 1024;
const MAX_HIGHLIGHT_LINES: usize = 10_000;
const FALLBACK_THEME: &str = "InspiredGitHub";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledSpan {
    pub text: String,
    /// 24-bit foreground; `None` for unstyled fallback output.
    pub fg: Option<(u8, u8, u8)>,
    pub bold: bool,
    pub italic: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StyledLine {
    pub spans: Vec<StyledSpan>,
}

impl StyledLine {
    pub fn plain_text(&self) -> String {
        self.spans.iter().map(|s| s.text.as_str()).collect()
    }
}

fn find_syntax(language: &str) -> &'static SyntaxReference {
    SYNTAX_SET
        .find_syntax_by_token(language)
        .unwrap_or_else(|| SYNTAX_SET.find_syntax_plain_text())
}

fn find_theme(name: &str) -> Option<&'static Theme> {
    THEME_SET
        .themes
        .get(name)
        .or_else(|| THEME_SET.themes.get(FALLBACK_THEME))
}

pub struct CodeViewer {
    buffer: IncrementalBuffer,
    language: String,
    theme: String,
    viewport_lines: usize,
    auto_scroll: bool,
    top_line: usize,
}

impl CodeViewer {
    pub fn new(cfg: &ViewerCfg) -> Self {
        Self {
            buffer: IncrementalBuffer::new(cfg.max_lines),
            language: cfg.language.clone(),
            theme: cfg.theme.clone(),
            viewport_lines: cfg.viewport_lines.max(1),
            auto_scroll: cfg.auto_scroll,
            top_line: 0,
        }
    }

    pub fn append(&mut self, chunk: &str) {
        let dropped_before = self.buffer.dropped_lines();
        self.buffer.append(chunk);
        let dropped = (self.buffer.dropped_lines() - dropped_before) as usize;
        self.top_line = self.top_line.saturating_sub(dropped);
        if self.auto_scroll {
            self.scroll_to_bottom();
        } else {
            self.top_line = self.top_line.min(self.max_top_line());
        }
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.top_line = 0;
    }

    pub fn set_auto_scroll(&mut self, enabled: bool) {
        self.auto_scroll = enabled;
        if enabled {
            self.scroll_to_bottom();
        }
    }

    pub fn auto_scroll(&self) -> bool {
        self.auto_scroll
    }

    /// Move the viewport so `line` is the first visible line (clamped).
    pub fn scroll_to(&mut self, line: usize) {
        self.top_line = line.min(self.max_top_line());
    }

    pub fn scroll_to_bottom(&mut self) {
        self.top_line = self.max_top_line();
    }

    fn max_top_line(&self) -> usize {
        self.line_count().saturating_sub(self.viewport_lines)
    }

    pub fn line_count(&self) -> usize {
        self.buffer.line_count()
    }

    pub fn fence_state(&self) -> FenceState {
        self.buffer.fence_state()
    }

    pub fn top_line(&self) -> usize {
        self.top_line
    }

    pub fn text(&self) -> &str {
        self.buffer.text()
    }

    pub fn progress(&self) -> Progress {
        self.buffer.progress()
    }

    fn window(&self) -> std::ops::Range<usize> {
        let end = (self.top_line + self.viewport_lines).min(self.line_count());
        self.top_line.min(end)..end
    }

    pub fn visible_text(&self) -> Vec<&str> {
        let w = self.window();
        self.buffer
            .text()
            .lines()
            .skip(w.start)
            .take(w.len())
            .collect()
    }

    /// Highlight everything up to the bottom of the viewport so parser state is
    /// right, keeping only the visible lines.
    fn highlight_window(&self) -> Option<Vec<Vec<(Style, String)>>> {
        let text = self.buffer.text();
        if text.len() > MAX_HIGHLIGHT_BYTES || self.line_count() > MAX_HIGHLIGHT_LINES {
            return None;
        }
        let theme = find_theme(&self.theme)?;
        let mut h = HighlightLines::new(find_syntax(&self.language), theme);
        let w = self.window();
        let mut out = Vec::with_capacity(w.len());
        for (i, line) in LinesWithEndings::from(text).enumerate() {
            if i >= w.end {
                break;
            }
            let ranges = match h.highlight_line(line, &SYNTAX_SET) {
                Ok(r) => r,
                Err(e) => {
                    tracing::debug!(error = %e, "highlighting failed, falling back to plain text");
                    return None;
                }
            };
            if i >= w.start {
                out.push(
                    ranges
                        .into_iter()
                        .map(|(style, piece)| {
                            (style, piece.trim_end_matches(['\n', '\r']).to_string())
                        })
                        .filter(|(_, piece)| !piece.is_empty())
                        .collect(),
                );
            }
        }
        Some(out)
    }

    pub fn render_lines(&self) -> Vec<StyledLine> {
        match self.highlight_window() {
            Some(lines) => lines
                .into_iter()
                .map(|ranges| StyledLine {
                    spans: ranges
                        .into_iter()
                        .map(|(style, text)| StyledSpan {
                            text,
                            fg: Some((style.foreground.r, style.foreground.g, style.foreground.b)),
                            bold: style.font_style.contains(FontStyle::BOLD),
                            italic: style.font_style.contains(FontStyle::ITALIC),
                        })
                        .collect(),
                })
                .collect(),
            None => self
                .visible_text()
                .into_iter()
                .map(|line| StyledLine {
                    spans: vec![StyledSpan {
                        text: line.to_string(),
                        fg: None,
                        bold: false,
                        italic: false,
                    }],
                })
                .collect(),
        }
    }

    /// Visible lines as 24-bit terminal escapes, one entry per line.
    pub fn render_ansi(&self) -> Vec<String> {
        match self.highlight_window() {
            Some(lines) => lines
                .iter()
                .map(|ranges| {
                    let borrowed: Vec<(Style, &str)> =
                        ranges.iter().map(|(s, t)| (*s, t.as_str())).collect();
                    let mut line = as_24_bit_terminal_escaped(&borrowed, false);
                    line.push_str("\x1b[0m");
                    line
                })
                .collect(),
            None => self.visible_text().into_iter().map(str::to_string).collect(),
        }
    }
}

impl GenerationObserver for CodeViewer {
    fn on_start(&mut self, _attempt: &AttemptInfo) {
        self.clear();
    }

    fn on_delta(&mut self, delta: &str) {
        self.append(delta);
    }
}
