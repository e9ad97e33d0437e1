mod message;
mod wire;

pub use message::*;
pub use wire::*;
