mod core;
mod history;
mod state;
mod streaming;
mod tools;

#[cfg(test)]
mod tests;

pub use history::TurnLimits;
pub use state::{ConversationManager, ConversationUpdate, TurnOutcome, TurnPhase};

#[cfg(test)]
use tools::*;
