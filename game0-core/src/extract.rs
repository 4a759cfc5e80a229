use once_cell::sync::Lazy;
use regex::Regex;

/// Opening fence tagged `html` through the first closing fence line. The
/// newline before the closing fence is optional, but the fence itself must end
/// its line, so backticks inside script text do not close the block.
static HTML_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)```html[ \t]*\r?\n(.*?)(?:\r?\n)?```[ \t]*(?:\r?\n|$)").expect("static fence regex")
});

pub(crate) static HTML_FENCE_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)```html[ \t]*\r?\n").expect("static fence regex"));

/// A closing fence whose line has already ended. Used while the reply is
/// still arriving, where a fence at the very end may yet be followed by more text.
pub(crate) static HTML_FENCE_CLOSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```[ \t]*\r?\n").expect("static fence regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionKind {
    /// Interior of a fenced `html` block; still needs wrapping.
    Fenced,
    /// The whole reply was already a document.
    Document,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub kind: ExtractionKind,
    pub content: String,
}

/// Where the first `html` fence stands in a partially received reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceState {
    Absent,
    Open,
    Closed,
}

/// Pull the game markup out of a model reply.
///
/// Returns `None` while nothing extractable is present; the caller decides
/// whether that is final (stream ended) or just incomplete.
pub fn extract(buffer: &str) -> Option<Extraction> {
    if let Some(caps) = HTML_FENCE.captures(buffer) {
        let inner = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        if inner.is_empty() {
            return None;
        }
        return Some(Extraction {
            kind: ExtractionKind::Fenced,
            content: inner.to_string(),
        });
    }
    if HTML_FENCE_OPEN.is_match(buffer) {
        // An unterminated fence is never a document, even if it began with one.
        return None;
    }
    let trimmed = buffer.trim();
    looks_like_document(trimmed).then(|| Extraction {
        kind: ExtractionKind::Document,
        content: trimmed.to_string(),
    })
}

/// True when `text` starts with a doctype or an `<html` root tag, ignoring
/// case and leading whitespace.
pub fn looks_like_document(text: &str) -> bool {
    let head: String = text
        .trim_start()
        .chars()
        .take(9)
        .flat_map(char::to_lowercase)
        .collect();
    head.starts_with("<!doctype") || head.starts_with("<html")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fenced(s: &str) -> Option<String> {
        extract(s).map(|e| {
            assert_eq!(e.kind, ExtractionKind::Fenced);
            e.content
        })
    }

    #[test]
    fn extracts_simple_block() {
        assert_eq!(fenced("```html\nHELLO\n```").as_deref(), Some("HELLO"));
    }

    #[test]
    fn ignores_trailing_text_and_later_fences() {
        let reply = "Here you go:\n```html\n<canvas></canvas>\n<script>go()</script>\n```\nEnjoy!\n```html\n<p>second</p>\n```";
        assert_eq!(
            fenced(reply).as_deref(),
            Some("<canvas></canvas>\n<script>go()</script>")
        );
    }

    #[test]
    fn tag_is_case_insensitive_and_crlf_tolerated() {
        assert_eq!(fenced("```HTML\r\n<b>x</b>\r\n```").as_deref(), Some("<b>x</b>"));
        assert_eq!(fenced("```Html  \n<i>y</i>\n```\n").as_deref(), Some("<i>y</i>"));
    }

    #[test]
    fn closing_fence_without_newline() {
        assert_eq!(fenced("```html\n<p>a</p>```").as_deref(), Some("<p>a</p>"));
    }

    #[test]
    fn backticks_inside_script_do_not_close() {
        let reply = "```html\n<script>const md = \"```\";</script>\n```\nbye";
        assert_eq!(
            fenced(reply).as_deref(),
            Some("<script>const md = \"```\";</script>")
        );
        assert_eq!(extract("```html\n<script>let s = '```js';\n"), None);
    }

    #[test]
    fn interior_is_trimmed() {
        assert_eq!(fenced("```html\n\n   <div></div>  \n\n```").as_deref(), Some("<div></div>"));
    }

    #[test]
    fn other_languages_do_not_match() {
        assert_eq!(extract("```js\nalert(1)\n```"), None);
        assert_eq!(extract("```htmlx\n<p></p>\n```"), None);
    }

    #[test]
    fn missing_closing_fence_is_none() {
        assert_eq!(extract("```html\n<p>partial"), None);
        assert_eq!(extract("```html\n<!DOCTYPE html><html><body>"), None);
    }

    #[test]
    fn empty_interior_is_none() {
        assert_eq!(extract("```html\n\n```"), None);
    }

    #[test]
    fn raw_document_fallback() {
        let doc = "  \n<!DOCTYPE html><html><body>hi</body></html>\n";
        let e = extract(doc).expect("document");
        assert_eq!(e.kind, ExtractionKind::Document);
        assert_eq!(e.content, "<!DOCTYPE html><html><body>hi</body></html>");

        let e = extract("<HTML><body></body></HTML>").expect("document");
        assert_eq!(e.kind, ExtractionKind::Document);
    }

    #[test]
    fn prose_is_none() {
        assert_eq!(extract("I will build a snake game with <canvas>."), None);
        assert_eq!(extract(""), None);
    }

    #[test]
    fn chunked_arrival_extracts_once_complete() {
        let mut buf = String::new();
        let mut seen = Vec::new();
        for chunk in ["```htm", "l\nfoo", "\n```"] {
            buf.push_str(chunk);
            seen.push(extract(&buf).map(|e| e.content));
        }
        assert_eq!(seen, vec![None, None, Some("foo".to_string())]);
    }

    #[test]
    fn document_detection_is_case_insensitive() {
        assert!(looks_like_document("<!doctype html>"));
        assert!(looks_like_document("\t<Html lang=\"en\">"));
        assert!(!looks_like_document("<head></head>"));
        assert!(!looks_like_document("<!DOC"));
    }
}
