//! Generation sessions: locks, turns, and the coordinator state machine.

pub mod coordinator;
pub mod lock;
pub mod turn;

pub use coordinator::{
    ChatRequest, ChatResponse, ChatStreamEvent, ChatTurnStream, SessionCoordinator,
};
pub use lock::{CompanionLocks, GenerationSession, SessionGuard};
pub use turn::{ConversationRole, ConversationTurn};
