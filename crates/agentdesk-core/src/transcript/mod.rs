//! Conversation transcript model and the reducer that builds it from stream
//! events.

pub mod delegation;
pub mod reducer;
pub mod tools;
mod turn;

pub use delegation::{Attribution, Delegation, DelegationStatus, DelegationTracker};
pub use reducer::{TurnOutcome, TurnReducer, TurnReport};
pub use tools::{ToolCall, ToolEnd, ToolStatus, ToolTrackError, ToolTracker};
pub use turn::{ChatMessage, ERROR_FALLBACK_TEXT, Role, Segment, ToolData};
