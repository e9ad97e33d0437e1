pub mod codec;
pub mod segment;

pub use codec::{
    build_request_messages, compact_for_prompt, flatten_assistant, render_markdown, render_turn,
    truncate_tail,
};
pub use segment::{parse_segments, Segment, ToolKey, RESULT_BEGIN, RESULT_END};
