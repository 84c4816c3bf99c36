//! AI agent providers.
//!
//! The agent is an opaque capability behind `AiProvider`. `CommandProvider`
//! shells out to an agent CLI; `ScriptedProvider` replays canned replies.

mod command;
mod scripted;
mod types;

pub use command::CommandProvider;
pub use scripted::{ScriptedProvider, ScriptedReply};
pub use types::{AiProvider, DEFAULT_TIMEOUT, ExecuteRequest, ExecuteResult, ProviderError};
