use aho_corasick::{AhoCorasick, Input, MatchKind};
use std::sync::OnceLock;

pub const RESULT_BEGIN: &str = "<execute_result>";
pub const RESULT_END: &str = "</execute_result>";

/// Argument key of an inline invocation such as `{"code": "..."}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKey {
    Code,
    Command,
}

impl ToolKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Command => "command",
        }
    }

    /// Fence label used when rendering the argument.
    pub fn language_label(self) -> &'static str {
        match self {
            Self::Code => "python",
            Self::Command => "shell",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text {
        body: String,
    },
    /// `raw_argument` is the JSON string body exactly as written, escapes included.
    Invocation {
        tool: ToolKey,
        raw_argument: String,
        complete: bool,
    },
    Result {
        body: String,
        complete: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Key(ToolKey),
    ResultBegin,
    ResultEnd,
}

const TOKENS: [(Token, &str); 4] = [
    (Token::Key(ToolKey::Code), "\"code\""),
    (Token::Key(ToolKey::Command), "\"command\""),
    (Token::ResultBegin, RESULT_BEGIN),
    (Token::ResultEnd, RESULT_END),
];

fn token_automaton() -> &'static AhoCorasick {
    static AUTOMATON: OnceLock<AhoCorasick> = OnceLock::new();
    AUTOMATON.get_or_init(|| {
        AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostFirst)
            .build(TOKENS.iter().map(|(_, pattern)| *pattern))
            .expect("token patterns are valid")
    })
}

struct TokenMatch {
    token: Token,
    start: usize,
    end: usize,
}

fn next_token(text: &str, from: usize) -> Option<TokenMatch> {
    token_automaton()
        .find(Input::new(text).range(from..))
        .map(|m| TokenMatch {
            token: TOKENS[m.pattern().as_usize()].0,
            start: m.start(),
            end: m.end(),
        })
}

/// Byte span of one inline invocation, from its `{` to just past its `}`
/// (or to the end of the text while it is still streaming).
#[derive(Debug)]
struct InvocationSpan {
    start: usize,
    end: usize,
    tool: ToolKey,
    raw_argument: String,
    complete: bool,
}

/// Splits flattened message text into ordered segments.
///
/// A new chunk starts right before every invocation opener (`{`, optional
/// whitespace, a known quoted key, optional whitespace, `:`). Prose before
/// the first opener forms its own chunk. Each chunk yields its invocation,
/// then its result blocks, then the leftover prose.
pub fn parse_segments(content: &str) -> Vec<Segment> {
    let spans = scan_invocations(content);
    let mut segments = Vec::new();

    let leading_end = spans.first().map_or(content.len(), |span| span.start);
    push_region_segments(&content[..leading_end], &mut segments);

    for (index, span) in spans.iter().enumerate() {
        let chunk_end = spans
            .get(index + 1)
            .map_or(content.len(), |next| next.start);
        segments.push(Segment::Invocation {
            tool: span.tool,
            raw_argument: span.raw_argument.clone(),
            complete: span.complete,
        });
        push_region_segments(&content[span.end..chunk_end], &mut segments);
    }

    segments
}

fn scan_invocations(text: &str) -> Vec<InvocationSpan> {
    let mut spans = Vec::new();
    let mut cursor = 0;

    while let Some(found) = next_token(text, cursor) {
        cursor = match found.token {
            // Result output is opaque: nothing inside it opens an invocation.
            Token::ResultBegin => text[found.end..]
                .find(RESULT_END)
                .map_or(text.len(), |offset| found.end + offset + RESULT_END.len()),
            Token::ResultEnd => found.end,
            Token::Key(tool) => match parse_invocation(text, &found, tool) {
                Some(span) => {
                    let next = span.end.max(found.end);
                    spans.push(span);
                    next
                }
                None => found.end,
            },
        };
    }

    spans
}

fn parse_invocation(text: &str, key: &TokenMatch, tool: ToolKey) -> Option<InvocationSpan> {
    let before = text[..key.start].trim_end();
    if !before.ends_with('{') {
        return None;
    }
    let start = before.len() - 1;

    let after_key = skip_whitespace(text, key.end);
    if !text[after_key..].starts_with(':') {
        return None;
    }
    let value_start = skip_whitespace(text, after_key + 1);

    if value_start >= text.len() {
        return Some(InvocationSpan {
            start,
            end: text.len(),
            tool,
            raw_argument: String::new(),
            complete: false,
        });
    }
    if !text[value_start..].starts_with('"') {
        return None;
    }

    let argument_start = value_start + 1;
    let Some(quote) = closing_quote(text, argument_start) else {
        return Some(InvocationSpan {
            start,
            end: text.len(),
            tool,
            raw_argument: text[argument_start..].to_string(),
            complete: false,
        });
    };

    let raw_argument = text[argument_start..quote].to_string();
    let after_value = skip_whitespace(text, quote + 1);
    let (end, complete) = if text[after_value..].starts_with('}') {
        (after_value + 1, true)
    } else {
        (quote + 1, false)
    };

    Some(InvocationSpan {
        start,
        end,
        tool,
        raw_argument,
        complete,
    })
}

/// Index of the first unescaped `"` at or after `from`.
fn closing_quote(text: &str, from: usize) -> Option<usize> {
    let mut escaped = false;
    for (offset, byte) in text.as_bytes()[from..].iter().enumerate() {
        match *byte {
            _ if escaped => escaped = false,
            b'\\' => escaped = true,
            b'"' => return Some(from + offset),
            _ => {}
        }
    }
    None
}

fn skip_whitespace(text: &str, from: usize) -> usize {
    let rest = &text[from..];
    from + (rest.len() - rest.trim_start().len())
}

/// Result blocks of a chunk region followed by its trimmed leftover prose.
fn push_region_segments(region: &str, segments: &mut Vec<Segment>) {
    let mut leftover = String::new();
    let mut cursor = 0;

    while let Some(offset) = region[cursor..].find(RESULT_BEGIN) {
        leftover.push_str(&region[cursor..cursor + offset]);
        let body_start = cursor + offset + RESULT_BEGIN.len();
        match region[body_start..].find(RESULT_END) {
            Some(body_len) => {
                segments.push(Segment::Result {
                    body: strip_terminal_escapes(&region[body_start..body_start + body_len]),
                    complete: true,
                });
                cursor = body_start + body_len + RESULT_END.len();
            }
            None => {
                segments.push(Segment::Result {
                    body: strip_terminal_escapes(&region[body_start..]),
                    complete: false,
                });
                cursor = region.len();
            }
        }
    }
    leftover.push_str(&region[cursor..]);

    let leftover = leftover.replace(RESULT_END, "");
    let leftover = leftover.trim();
    if !leftover.is_empty() {
        segments.push(Segment::Text {
            body: leftover.to_string(),
        });
    }
}

/// Removes ANSI CSI/OSC sequences emitted by terminals and REPLs.
pub fn strip_terminal_escapes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '\u{1b}' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('[') => {
                // CSI: parameter and intermediate bytes, then one final byte.
                for next in chars.by_ref() {
                    if ('\u{40}'..='\u{7e}').contains(&next) {
                        break;
                    }
                }
            }
            Some(']') => {
                // OSC: terminated by BEL or ESC '\'.
                while let Some(next) = chars.next() {
                    if next == '\u{07}' {
                        break;
                    }
                    if next == '\u{1b}' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            _ => {}
        }
    }

    out
}

/// Decodes JSON string escapes in an invocation argument for display.
pub fn unescape_argument(raw: &str) -> String {
    if let Ok(decoded) = serde_json::from_str::<String>(&format!("\"{raw}\"")) {
        return decoded;
    }
    // Partial arguments may end mid-escape; decode the common escapes only.
    let mut decoded = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            decoded.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => decoded.push('\n'),
            Some('t') => decoded.push('\t'),
            Some('"') => decoded.push('"'),
            Some('\\') => decoded.push('\\'),
            Some(other) => {
                decoded.push('\\');
                decoded.push(other);
            }
            None => decoded.push('\\'),
        }
    }
    decoded
}
