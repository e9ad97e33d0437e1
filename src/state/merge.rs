use crate::types::{FunctionCall, Message, MessageDelta};

/// Folds one stream fragment into the message being assembled for a turn.
///
/// Content stays `None` until some fragment actually carries text, so a
/// message that never received text is distinguishable from one that
/// received an empty string. The tool name is taken from the first fragment
/// that carries a non-empty one and is never replaced afterwards; argument
/// chunks are appended in arrival order.
pub fn merge_delta<'a>(accumulated: &'a mut Message, fragment: &MessageDelta) -> &'a mut Message {
    let has_text = accumulated
        .content
        .as_deref()
        .is_some_and(|content| !content.is_empty());
    if has_text {
        if let Some(content) = accumulated.content.as_mut() {
            content.push_str(fragment.content.as_deref().unwrap_or(""));
        }
    } else if let Some(text) = &fragment.content {
        accumulated.content = Some(text.clone());
    }

    let Some(incoming) = &fragment.function_call else {
        return accumulated;
    };

    match accumulated.function_call.as_mut() {
        Some(call) => {
            call.arguments
                .push_str(incoming.arguments.as_deref().unwrap_or_default());
            if call.resolved_name().is_none() {
                if let Some(name) = incoming.name.as_deref().filter(|n| !n.is_empty()) {
                    call.name = Some(name.to_string());
                }
            }
        }
        None => {
            accumulated.function_call = Some(FunctionCall {
                name: incoming.name.clone().filter(|n| !n.is_empty()),
                arguments: incoming.arguments.clone().unwrap_or_default(),
            });
        }
    }

    accumulated
}
