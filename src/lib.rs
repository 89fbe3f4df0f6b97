//! Client for the guess-the-next-token game.
//!
//! A backend streams a model's generation token by token over a WebSocket.
//! The asker ("outside") submits the prompt and watches the answer grow; the
//! chooser ("inside") picks each next token from five ranked candidates.
//!
//! [`game::GameStateMachine`] holds the protocol logic and is independent of
//! any I/O. [`channel::SessionChannel`] owns the connection and
//! [`session::run`] wires both to the terminal.

pub mod channel;
pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod game;
pub mod protocol;
pub mod render;
pub mod session;
pub mod tokens;

pub use error::{GameError, Result};
pub use game::{GameEvent, GamePhase, GameStateMachine};
pub use protocol::{Candidate, ChoiceIndex, InboundMessage, OutboundMessage, Role};
pub use tokens::{ChatTemplate, TokenReconstructor};
