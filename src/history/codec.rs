use super::segment::{parse_segments, unescape_argument, Segment, RESULT_BEGIN, RESULT_END};
use crate::types::{Message, Role};

const CONTINUE_PROMPT: &str = "continue";

/// Joins an assistant message with the tool result that answered it into the
/// single text the segment parser works on: prose, then the call arguments,
/// then the result output.
pub fn flatten_assistant(assistant: &Message, result: Option<&Message>) -> String {
    let mut flattened = assistant.text().to_string();
    if let Some(call) = &assistant.function_call {
        flattened.push_str(&call.arguments);
    }
    if let Some(result) = result {
        flattened.push_str(result.text());
    }
    flattened
}

/// Keeps the last `max_chars` characters of `text`.
pub fn truncate_tail(text: &str, max_chars: usize) -> &str {
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }
    let skip = total - max_chars;
    match text.char_indices().nth(skip) {
        Some((offset, _)) => &text[offset..],
        None => "",
    }
}

/// Compact form of flattened assistant text for re-submission. Invocations
/// become one `{"key": "argument"}` line, results keep only their trailing
/// `max_result_chars` characters, prose passes through.
pub fn compact_for_prompt(content: &str, max_result_chars: usize) -> String {
    parse_segments(content)
        .iter()
        .map(|segment| match segment {
            Segment::Text { body } => body.clone(),
            Segment::Invocation {
                tool, raw_argument, ..
            } => format!("{{\"{}\": \"{}\"}}", tool.as_str(), raw_argument),
            Segment::Result { body, .. } => format!(
                "{RESULT_BEGIN}{}{RESULT_END}",
                truncate_tail(body, max_result_chars)
            ),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Markdown for display: fenced argument with its language label, fenced
/// result output, then the remaining prose.
pub fn render_markdown(content: &str) -> String {
    let mut rendered = String::new();
    for segment in parse_segments(content) {
        match segment {
            Segment::Text { body } => {
                rendered.push_str(&body);
                rendered.push('\n');
            }
            Segment::Invocation {
                tool, raw_argument, ..
            } => {
                rendered.push_str("```");
                rendered.push_str(tool.language_label());
                rendered.push('\n');
                rendered.push_str(unescape_argument(&raw_argument).trim_end());
                rendered.push_str("\n```\n");
            }
            Segment::Result { body, .. } => {
                let body = body.trim_end();
                if body.is_empty() {
                    continue;
                }
                rendered.push_str("```\n");
                rendered.push_str(body);
                rendered.push_str("\n```\n");
            }
        }
    }
    rendered
}

/// Renders the assistant side of the turn that starts at `start`, stopping
/// before the next user message.
pub fn render_turn(messages: &[Message], start: usize) -> String {
    let mut rendered = String::new();
    let mut index = start;

    while let Some(message) = messages.get(index) {
        if message.role == Role::User && index > start {
            break;
        }
        match message.role {
            Role::Assistant => {
                let result = paired_result(messages, index);
                rendered.push_str(&render_markdown(&flatten_assistant(message, result)));
                index += if result.is_some() { 2 } else { 1 };
            }
            Role::Function => {
                rendered.push_str(&render_markdown(message.text()));
                index += 1;
            }
            Role::User | Role::System => index += 1,
        }
    }

    rendered
}

/// History as sent to the completion endpoint. Assistant messages are merged
/// with their tool results and compacted; if the history ends on the
/// assistant side a `continue` user prompt is appended.
pub fn build_request_messages(messages: &[Message], max_result_chars: usize) -> Vec<Message> {
    let mut outgoing = Vec::with_capacity(messages.len() + 1);
    let mut index = 0;

    while let Some(message) = messages.get(index) {
        match message.role {
            Role::Assistant => {
                let result = paired_result(messages, index);
                let flattened = flatten_assistant(message, result);
                outgoing.push(Message::assistant_text(compact_for_prompt(
                    &flattened,
                    max_result_chars,
                )));
                index += if result.is_some() { 2 } else { 1 };
            }
            Role::Function => {
                outgoing.push(Message::assistant_text(compact_for_prompt(
                    message.text(),
                    max_result_chars,
                )));
                index += 1;
            }
            Role::User | Role::System => {
                outgoing.push(message.clone());
                index += 1;
            }
        }
    }

    if outgoing
        .last()
        .is_some_and(|message| message.role == Role::Assistant)
    {
        outgoing.push(Message::user(CONTINUE_PROMPT));
    }

    outgoing
}

fn paired_result(messages: &[Message], assistant_index: usize) -> Option<&Message> {
    messages
        .get(assistant_index + 1)
        .filter(|next| next.role == Role::Function)
}
