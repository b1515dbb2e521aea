//! Post-processing of model-generated legal drafts.
//!
//! A draft must carry structural markup and the mandated disclaimer. Whatever the model
//! left out is repaired here, and the plain-text body is always derived from the final
//! HTML so the two never disagree.

use crate::error::AssistError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

const STRUCTURE_MARKERS: [&str; 9] = [
    "<html", "<body", "<p", "<h1", "<h2", "<h3", "<h4", "<h5", "<h6",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repair {
    WrappedInHeading,
    AppendedDisclaimer,
}

impl fmt::Display for Repair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Repair::WrappedInHeading => write!(f, "missing structure, wrapped in heading"),
            Repair::AppendedDisclaimer => write!(f, "missing disclaimer, appended"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedBody {
    pub html: String,
    pub text: String,
    pub repairs: Vec<Repair>,
}

impl NormalizedBody {
    /// The repairs as an error value, for callers that log them.
    pub fn malformed(&self) -> Option<AssistError> {
        if self.repairs.is_empty() {
            return None;
        }
        let details = self
            .repairs
            .iter()
            .map(Repair::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Some(AssistError::MalformedGeneration(details))
    }
}

/// Disclaimer requirements for one artifact kind.
#[derive(Debug, Clone)]
pub struct DisclaimerRule<'a> {
    pub text: &'a str,
    /// Phrases whose presence counts as "disclaimer already there". Empty means the full
    /// text must appear.
    pub markers: &'a [&'a str],
}

impl DisclaimerRule<'_> {
    pub fn is_present(&self, html: &str) -> bool {
        let haystack = html.to_lowercase();
        if self.markers.is_empty() {
            return haystack.contains(&self.text.to_lowercase())
                || haystack.contains(&escape_html(self.text).to_lowercase());
        }
        self.markers
            .iter()
            .any(|marker| haystack.contains(&marker.to_lowercase()))
    }
}

pub fn has_structure(html: &str) -> bool {
    let lowered = html.to_lowercase();
    STRUCTURE_MARKERS.iter().any(|marker| {
        lowered.match_indices(marker).any(|(at, _)| {
            // `<p` must be a paragraph tag, not `<pre>` or `<param>`.
            lowered[at + marker.len()..]
                .chars()
                .next()
                .map_or(false, |next| next == '>' || next.is_whitespace() || *marker != "<p")
        })
    })
}

pub fn normalize_generation(raw: &str, label: &str, disclaimer: &DisclaimerRule<'_>) -> NormalizedBody {
    let mut repairs = Vec::new();
    let mut html = raw.trim().to_string();

    if !has_structure(&html) {
        html = format!("<h1>{}</h1>\n{}", escape_html(label), html);
        repairs.push(Repair::WrappedInHeading);
    }

    if !disclaimer.is_present(&html) {
        html.push_str(&format!(
            "\n<hr><p><em>{}</em></p>",
            escape_html(disclaimer.text)
        ));
        repairs.push(Repair::AppendedDisclaimer);
    }

    let text = html_to_text(&html);
    NormalizedBody {
        html,
        text,
        repairs,
    }
}

pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

static STYLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<style[^>]*>.*?</style>").expect("style pattern"));
static SCRIPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script[^>]*>.*?</script>").expect("script pattern"));
static MAJOR_HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<h[12](?:\s[^>]*)?>(.*?)</h[12]>").expect("heading pattern"));
static MINOR_HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<h[3-6](?:\s[^>]*)?>(.*?)</h[3-6]>").expect("heading pattern"));
static PARAGRAPH_GAP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</p>\s*<p(?:\s[^>]*)?>").expect("paragraph pattern"));
static PARAGRAPH_OPEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<p(?:\s[^>]*)?>").expect("paragraph pattern"));
static BREAK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</(?:p|ul|ol|div)>|<br\s*/?>|<hr\s*/?>").expect("break pattern"));
static LIST_ITEM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<li(?:\s[^>]*)?>").expect("list pattern"));
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("tag pattern"));
static SPACES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\u{a0}]+").expect("space pattern"));

pub fn html_to_text(html: &str) -> String {
    let text = STYLE_RE.replace_all(html, "");
    let text = SCRIPT_RE.replace_all(&text, "");
    let text = MAJOR_HEADING_RE.replace_all(&text, "$1\n\n");
    let text = MINOR_HEADING_RE.replace_all(&text, "$1\n");
    let text = PARAGRAPH_GAP_RE.replace_all(&text, "\n\n");
    let text = PARAGRAPH_OPEN_RE.replace_all(&text, "");
    let text = BREAK_RE.replace_all(&text, "\n");
    let text = LIST_ITEM_RE.replace_all(&text, "\n- ");
    let text = TAG_RE.replace_all(&text, " ");

    let decoded = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    collapse_whitespace(&decoded)
}

fn collapse_whitespace(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    for line in text.lines() {
        let line = SPACES_RE.replace_all(line, " ").trim().to_string();
        let previous_blank = lines.last().map_or(true, |last| last.is_empty());
        if line.is_empty() && previous_blank {
            continue;
        }
        lines.push(line);
    }
    while lines.last().is_some_and(|last| last.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}
