//! Crate-level error type.
//!
//! The first four variants mirror the ways a game session can go wrong without
//! taking the process down: a malformed frame, a message arriving in the wrong
//! phase, a user action attempted in the wrong phase, and a dead connection.
//! The remaining variants cover startup concerns (config, files, JSON).

use thiserror::Error;

use crate::game::GamePhase;

#[derive(Debug, Error)]
pub enum GameError {
    /// An inbound frame did not match the `{ type, data }` envelope schema.
    #[error("decode error: {reason}")]
    Decode { reason: String },

    /// An inbound message type is not valid for the current phase.
    #[error("protocol error: `{message}` is not valid while {phase}")]
    Protocol {
        message: &'static str,
        phase: GamePhase,
    },

    /// A user action was attempted outside of its valid phase or role.
    #[error("invalid state: cannot {action} while {phase}")]
    InvalidState {
        action: &'static str,
        phase: GamePhase,
    },

    /// The connection to the backend closed or failed.
    #[error("channel error: {0}")]
    Channel(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl GameError {
    pub(crate) fn decode(reason: impl Into<String>) -> Self {
        GameError::Decode {
            reason: reason.into(),
        }
    }

    /// Short label used as the `kind` field in log events.
    pub fn kind(&self) -> &'static str {
        match self {
            GameError::Decode { .. } => "decode",
            GameError::Protocol { .. } => "protocol",
            GameError::InvalidState { .. } => "invalid_state",
            GameError::Channel(_) => "channel",
            GameError::Config(_) => "config",
            GameError::Io(_) => "io",
            GameError::Json(_) => "json",
        }
    }

    /// Whether the session must stop. Session-level errors never are; the state
    /// machine stays in a well-defined phase after each of them.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            GameError::Decode { .. }
                | GameError::Protocol { .. }
                | GameError::InvalidState { .. }
                | GameError::Channel(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, GameError>;
