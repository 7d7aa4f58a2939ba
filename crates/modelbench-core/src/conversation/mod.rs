//! Tool-calling conversations.
//!
//! A conversation alternates between model turns and tool execution:
//! the model either answers (done) or requests tool calls, whose results are
//! appended to the history before the next turn. [`run_conversation`] is the
//! loop; providers plug in through [`Conversation`] and [`ChatBackend`].

pub mod decode;
pub mod driver;
pub mod provider;
pub mod session;
pub mod turn;

pub use decode::{apply_final_answer, strip_code_fence};
pub use driver::{run_conversation, Conversation};
pub use provider::{ChatBackend, ToolCallingProvider};
pub use session::ToolSession;
pub use turn::{ModelTurn, ToolCall, ToolChoice, ToolDefinition};
