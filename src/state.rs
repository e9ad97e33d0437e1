pub mod conversation;
pub mod merge;

pub use conversation::{
    ConversationManager, ConversationUpdate, TurnLimits, TurnOutcome, TurnPhase,
};
pub use merge::merge_delta;
