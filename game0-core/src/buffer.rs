use crate::extract::{self, Extraction, ExtractionKind, FenceState, HTML_FENCE_CLOSE, HTML_FENCE_OPEN};

/// How far back a resumed fence search starts, so a fence split across
/// fragments is still seen whole.
const FENCE_TAIL: usize = 32;

/// Byte and line counters, for progress display only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub bytes: u64,
    pub lines: u64,
}

/// Progress of the search for the first `html` block. Offsets index `text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceScan {
    Absent { from: usize },
    Open { body: usize, from: usize },
    Closed,
}

impl Default for FenceScan {
    fn default() -> Self {
        Self::Absent { from: 0 }
    }
}

/// Growing text accumulator for one generation attempt.
///
/// With a line cap configured, only the trailing `max_lines` lines are kept.
/// The first complete `html` block is captured before any truncation, and
/// truncation is held off while a fence is open or the text reads as a raw
/// document, so the cap never costs the extraction its input. Each append
/// only scans the new tail for fences.
#[derive(Debug, Clone, Default)]
pub struct IncrementalBuffer {
    text: String,
    max_lines: Option<usize>,
    held_newlines: usize,
    dropped_lines: u64,
    progress: Progress,
    fence: FenceScan,
    captured: Option<Extraction>,
}

impl IncrementalBuffer {
    pub fn new(max_lines: Option<usize>) -> Self {
        Self {
            max_lines: max_lines.filter(|n| *n > 0),
            ..Self::default()
        }
    }

    pub fn append(&mut self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        let newlines = fragment.bytes().filter(|b| *b == b'\n').count();
        self.text.push_str(fragment);
        self.held_newlines += newlines;
        self.progress.bytes += fragment.len() as u64;
        self.progress.lines += newlines as u64;

        self.scan_fence();
        self.apply_line_cap();
    }

    /// Reset for the next attempt.
    pub fn clear(&mut self) {
        let max_lines = self.max_lines;
        *self = Self::new(max_lines);
    }

    fn scan_fence(&mut self) {
        loop {
            match self.fence {
                FenceScan::Absent { from } => {
                    let Some(m) = HTML_FENCE_OPEN.find(&self.text[from..]) else {
                        self.fence = FenceScan::Absent {
                            from: resume_at(&self.text, from),
                        };
                        return;
                    };
                    let body = from + m.end();
                    self.fence = FenceScan::Open { body, from: body };
                }
                FenceScan::Open { body, from } => {
                    let Some(m) = HTML_FENCE_CLOSE.find(&self.text[from..]) else {
                        self.fence = FenceScan::Open {
                            body,
                            from: resume_at(&self.text, from),
                        };
                        return;
                    };
                    let inner = self.text[body..from + m.start()].trim();
                    if !inner.is_empty() {
                        self.captured = Some(Extraction {
                            kind: ExtractionKind::Fenced,
                            content: inner.to_string(),
                        });
                    }
                    self.fence = FenceScan::Closed;
                    return;
                }
                FenceScan::Closed => return,
            }
        }
    }

    fn capture_pending(&self) -> bool {
        match self.fence {
            FenceScan::Open { .. } => true,
            FenceScan::Absent { .. } => extract::looks_like_document(&self.text),
            FenceScan::Closed => false,
        }
    }

    fn apply_line_cap(&mut self) {
        let Some(max) = self.max_lines else {
            return;
        };
        let segments = self.held_newlines + 1;
        if segments <= max || self.capture_pending() {
            return;
        }
        let drop = segments - max;
        if let Some((idx, _)) = self.text.match_indices('\n').nth(drop - 1) {
            self.text.drain(..=idx);
            self.held_newlines -= drop;
            self.dropped_lines += drop as u64;
            if let FenceScan::Absent { from } = self.fence {
                self.fence = FenceScan::Absent {
                    from: from.saturating_sub(idx + 1),
                };
            }
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Retained lines, counted like `str::lines`.
    pub fn line_count(&self) -> usize {
        let partial = !self.text.is_empty() && !self.text.ends_with('\n');
        self.held_newlines + usize::from(partial)
    }

    pub fn bytes(&self) -> u64 {
        self.progress.bytes
    }

    pub fn lines(&self) -> u64 {
        self.progress.lines
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    /// Lines discarded from the front by the cap.
    pub fn dropped_lines(&self) -> u64 {
        self.dropped_lines
    }

    pub fn fence_state(&self) -> FenceState {
        match self.fence {
            FenceScan::Absent { .. } => FenceState::Absent,
            FenceScan::Open { .. } => FenceState::Open,
            FenceScan::Closed => FenceState::Closed,
        }
    }

    pub fn captured(&self) -> Option<&Extraction> {
        self.captured.as_ref()
    }

    /// The captured block if one was seen, otherwise whatever the current text yields.
    pub fn extract(&self) -> Option<Extraction> {
        self.captured
            .clone()
            .or_else(|| extract::extract(&self.text))
    }
}

fn resume_at(text: &str, from: usize) -> usize {
    let mut at = text.len().saturating_sub(FENCE_TAIL).max(from);
    while !text.is_char_boundary(at) {
        at -= 1;
    }
    at
}
