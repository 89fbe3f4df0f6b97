//! Game state machine.
//!
//! Consumes decoded inbound messages, tracks the game phase, rebuilds the
//! streamed response and decides which outbound message a user action
//! produces. It owns no connection and no rendering surface: every accepted
//! inbound message yields an optional [`GameEvent`] for the presentation layer
//! to observe, and every accepted user action yields the [`OutboundMessage`]
//! the caller should send.
//!
//! Phase order within one game is AwaitingPrompt → Streaming → Finished. Only
//! `reset` moves backwards. Messages that arrive in the wrong phase (including
//! stale tokens from a game that was reset) are rejected without touching
//! state.

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{GameError, Result};
use crate::export::Transcript;
use crate::protocol::{Candidate, ChoiceIndex, InboundMessage, OutboundMessage, Role, CHOICE_COUNT};
use crate::tokens::{ChatTemplate, TokenReconstructor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    AwaitingPrompt,
    Streaming,
    Finished,
}

impl std::fmt::Display for GamePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GamePhase::AwaitingPrompt => write!(f, "awaiting prompt"),
            GamePhase::Streaming => write!(f, "streaming"),
            GamePhase::Finished => write!(f, "finished"),
        }
    }
}

/// Observable change produced by an accepted inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    /// A game started with this prompt.
    PromptReceived { prompt: String },
    /// Text was appended to the response.
    Appended { text: String },
    /// Candidates the chooser may pick from, in rank order.
    ChoicesOffered([Candidate; CHOICE_COUNT]),
    Finished,
    Reset,
}

#[derive(Debug, Clone)]
pub struct GameStateMachine {
    role: Role,
    phase: GamePhase,
    response: String,
    tokens: TokenReconstructor,
    last_prompt: Option<String>,
    pending_offer: Option<[Candidate; CHOICE_COUNT]>,
}

impl GameStateMachine {
    pub fn new(role: Role, template: ChatTemplate) -> Self {
        GameStateMachine {
            role,
            phase: GamePhase::AwaitingPrompt,
            response: String::new(),
            tokens: TokenReconstructor::new(template),
            last_prompt: None,
            pending_offer: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    /// The response rebuilt so far.
    pub fn response(&self) -> &str {
        &self.response
    }

    pub fn last_prompt(&self) -> Option<&str> {
        self.last_prompt.as_deref()
    }

    pub fn prev_token(&self) -> Option<&str> {
        self.tokens.prev_token()
    }

    /// The offer the chooser has not answered yet.
    pub fn pending_offer(&self) -> Option<&[Candidate; CHOICE_COUNT]> {
        self.pending_offer.as_ref()
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Apply one inbound message.
    ///
    /// Returns `Ok(None)` when the message was accepted but changes nothing
    /// visible (a suppressed control token, or an offer sent to the asker).
    pub fn handle(&mut self, msg: InboundMessage) -> Result<Option<GameEvent>> {
        match msg {
            InboundMessage::Reset => {
                self.reset();
                Ok(Some(GameEvent::Reset))
            }
            InboundMessage::Prompt(prompt) => {
                self.expect_phase(GamePhase::AwaitingPrompt, "prompt")?;
                self.phase = GamePhase::Streaming;
                self.last_prompt = Some(prompt.clone());
                Ok(Some(GameEvent::PromptReceived { prompt }))
            }
            InboundMessage::NextToken(raw) => {
                self.expect_phase(GamePhase::Streaming, "next_token")?;
                let output = self.tokens.push(&raw);
                if output.is_suppressed() {
                    return Ok(None);
                }
                let text = output.as_str().to_string();
                self.response.push_str(&text);
                Ok(Some(GameEvent::Appended { text }))
            }
            InboundMessage::ChoiceOffer(candidates) => {
                self.expect_phase(GamePhase::Streaming, "inside_choice")?;
                match self.role {
                    Role::Chooser => {
                        self.pending_offer = Some(candidates.clone());
                        Ok(Some(GameEvent::ChoicesOffered(candidates)))
                    }
                    Role::Asker => Ok(None),
                }
            }
            InboundMessage::Finish => {
                self.expect_phase(GamePhase::Streaming, "finish")?;
                self.phase = GamePhase::Finished;
                self.pending_offer = None;
                Ok(Some(GameEvent::Finished))
            }
        }
    }

    fn expect_phase(&self, expected: GamePhase, message: &'static str) -> Result<()> {
        if self.phase == expected {
            return Ok(());
        }
        warn!(
            role = %self.role,
            phase = %self.phase,
            msg = message,
            "protocol violation, message dropped"
        );
        Err(GameError::Protocol {
            message,
            phase: self.phase,
        })
    }

    fn reset(&mut self) {
        self.phase = GamePhase::AwaitingPrompt;
        self.response.clear();
        self.tokens.reset();
        self.last_prompt = None;
        self.pending_offer = None;
    }

    // -----------------------------------------------------------------------
    // User actions
    // -----------------------------------------------------------------------

    /// Asker submits a prompt. The text is sent exactly as given; the prompt
    /// is only recorded once the backend echoes it back.
    pub fn submit(&mut self, prompt: &str) -> Result<OutboundMessage> {
        self.expect_action(Role::Asker, GamePhase::AwaitingPrompt, "submit a prompt")?;
        Ok(OutboundMessage::StartGame(prompt.to_string()))
    }

    /// Chooser picks a candidate of the most recent offer.
    pub fn choose(&mut self, index: ChoiceIndex) -> Result<OutboundMessage> {
        self.expect_action(Role::Chooser, GamePhase::Streaming, "choose a token")?;
        self.pending_offer = None;
        Ok(OutboundMessage::Choice(index))
    }

    /// Either role asks for a new game; valid in every phase.
    pub fn restart(&self) -> OutboundMessage {
        OutboundMessage::ResetGame
    }

    fn expect_action(&self, role: Role, phase: GamePhase, action: &'static str) -> Result<()> {
        if self.role == role && self.phase == phase {
            return Ok(());
        }
        debug!(
            role = %self.role,
            phase = %self.phase,
            action,
            "user action ignored"
        );
        Err(GameError::InvalidState {
            action,
            phase: self.phase,
        })
    }

    /// The exportable record of the current game, for the asker only.
    pub fn transcript(&self, date_ms: u64) -> Option<Transcript> {
        if self.role != Role::Asker {
            return None;
        }
        let prompt = self.last_prompt.clone()?;
        Some(Transcript {
            date: date_ms,
            prompt,
            response: self.response.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer() -> [Candidate; CHOICE_COUNT] {
        ["the", "a", "an", "this", "that"].map(|t| Candidate {
            text: t.to_string(),
            probability: 0.2,
        })
    }

    fn streaming(role: Role) -> GameStateMachine {
        let mut game = GameStateMachine::new(role, ChatTemplate::llama3());
        game.handle(InboundMessage::Prompt("Best chippy?".to_string()))
            .unwrap();
        game
    }

    fn token(s: &str) -> InboundMessage {
        InboundMessage::NextToken(s.to_string())
    }

    #[test]
    fn test_new_game_awaits_prompt() {
        let game = GameStateMachine::new(Role::Asker, ChatTemplate::llama3());
        assert_eq!(game.phase(), GamePhase::AwaitingPrompt);
        assert_eq!(game.response(), "");
        assert!(game.last_prompt().is_none());
    }

    #[test]
    fn test_prompt_starts_streaming() {
        let mut game = GameStateMachine::new(Role::Chooser, ChatTemplate::llama3());
        let event = game
            .handle(InboundMessage::Prompt("Where is Leith?".to_string()))
            .unwrap();
        assert_eq!(
            event,
            Some(GameEvent::PromptReceived {
                prompt: "Where is Leith?".to_string()
            })
        );
        assert_eq!(game.phase(), GamePhase::Streaming);
        assert_eq!(game.last_prompt(), Some("Where is Leith?"));
    }

    #[test]
    fn test_tokens_append_translated_text() {
        let mut game = streaming(Role::Asker);
        for raw in ["<|start_header_id|>", "assistant", "<|end_header_id|>", "Aye", "<|eot_id|>"] {
            game.handle(token(raw)).unwrap();
        }
        assert_eq!(game.response(), "Aye\n\n");
    }

    #[test]
    fn test_suppressed_token_yields_no_event() {
        let mut game = streaming(Role::Asker);
        assert_eq!(game.handle(token("<|end_header_id|>")).unwrap(), None);
        assert_eq!(game.prev_token(), Some("<|end_header_id|>"));
    }

    #[test]
    fn test_appended_event_carries_text() {
        let mut game = streaming(Role::Asker);
        assert_eq!(
            game.handle(token("<|eot_id|>")).unwrap(),
            Some(GameEvent::Appended {
                text: "\n\n".to_string()
            })
        );
    }

    #[test]
    fn test_finish_moves_to_finished() {
        let mut game = streaming(Role::Asker);
        assert_eq!(
            game.handle(InboundMessage::Finish).unwrap(),
            Some(GameEvent::Finished)
        );
        assert_eq!(game.phase(), GamePhase::Finished);
    }

    #[test]
    fn test_token_after_finish_is_rejected() {
        let mut game = streaming(Role::Asker);
        game.handle(token("Hi")).unwrap();
        game.handle(InboundMessage::Finish).unwrap();
        let err = game.handle(token(" there")).unwrap_err();
        assert!(matches!(err, GameError::Protocol { phase: GamePhase::Finished, .. }));
        assert_eq!(game.response(), "Hi");
    }

    #[test]
    fn test_stream_messages_rejected_while_awaiting_prompt() {
        let mut game = GameStateMachine::new(Role::Chooser, ChatTemplate::llama3());
        for msg in [token("x"), InboundMessage::ChoiceOffer(offer()), InboundMessage::Finish] {
            let err = game.handle(msg).unwrap_err();
            assert_eq!(err.kind(), "protocol");
            assert_eq!(game.phase(), GamePhase::AwaitingPrompt);
            assert_eq!(game.response(), "");
        }
        assert!(game.prev_token().is_none());
    }

    #[test]
    fn test_second_prompt_while_streaming_is_rejected() {
        let mut game = streaming(Role::Chooser);
        assert!(game.handle(InboundMessage::Prompt("again".to_string())).is_err());
        assert_eq!(game.last_prompt(), Some("Best chippy?"));
        assert_eq!(game.phase(), GamePhase::Streaming);
    }

    #[test]
    fn test_reset_from_every_phase() {
        let mut awaiting = GameStateMachine::new(Role::Asker, ChatTemplate::llama3());
        let mut mid = streaming(Role::Asker);
        mid.handle(token("<|start_header_id|>")).unwrap();
        mid.handle(token("Hello")).unwrap();
        let mut done = streaming(Role::Asker);
        done.handle(token("Bye")).unwrap();
        done.handle(InboundMessage::Finish).unwrap();

        for game in [&mut awaiting, &mut mid, &mut done] {
            assert_eq!(game.handle(InboundMessage::Reset).unwrap(), Some(GameEvent::Reset));
            assert_eq!(game.phase(), GamePhase::AwaitingPrompt);
            assert_eq!(game.response(), "");
            assert!(game.prev_token().is_none());
            assert!(game.last_prompt().is_none());
        }
    }

    #[test]
    fn test_stale_token_after_reset_is_rejected() {
        let mut game = streaming(Role::Chooser);
        game.handle(token("old")).unwrap();
        game.handle(InboundMessage::Reset).unwrap();
        assert!(game.handle(token(" stale")).is_err());
        assert!(game.handle(InboundMessage::ChoiceOffer(offer())).is_err());
        assert_eq!(game.response(), "");
    }

    #[test]
    fn test_rebuild_from_empty_after_reset() {
        let mut game = streaming(Role::Asker);
        game.handle(token("<|start_header_id|>")).unwrap();
        game.handle(InboundMessage::Reset).unwrap();
        game.handle(InboundMessage::Prompt("q".to_string())).unwrap();
        // lookback must not leak across games
        game.handle(token("assistant")).unwrap();
        assert_eq!(game.response(), "assistant");
    }

    // -- Choice offers --------------------------------------------------------

    #[test]
    fn test_offer_surfaces_for_chooser() {
        let mut game = streaming(Role::Chooser);
        let event = game.handle(InboundMessage::ChoiceOffer(offer())).unwrap();
        assert_eq!(event, Some(GameEvent::ChoicesOffered(offer())));
        assert_eq!(game.pending_offer(), Some(&offer()));
        assert_eq!(game.response(), "");
    }

    #[test]
    fn test_offer_is_silent_for_asker() {
        let mut game = streaming(Role::Asker);
        assert_eq!(game.handle(InboundMessage::ChoiceOffer(offer())).unwrap(), None);
        assert!(game.pending_offer().is_none());
    }

    // -- User actions ---------------------------------------------------------

    #[test]
    fn test_submit_sends_exact_prompt() {
        let mut game = GameStateMachine::new(Role::Asker, ChatTemplate::llama3());
        let msg = game.submit("  What's the weather like?  ").unwrap();
        assert_eq!(
            msg,
            OutboundMessage::StartGame("  What's the weather like?  ".to_string())
        );
    }

    #[test]
    fn test_submit_does_not_record_prompt_before_echo() {
        let mut game = GameStateMachine::new(Role::Asker, ChatTemplate::llama3());
        game.submit("typed").unwrap();
        assert_eq!(game.phase(), GamePhase::AwaitingPrompt);
        assert_eq!(game.last_prompt(), None);
        assert!(game.transcript(0).is_none());

        game.handle(InboundMessage::Prompt("typed".to_string())).unwrap();
        assert_eq!(game.last_prompt(), Some("typed"));
    }

    #[test]
    fn test_submit_rejected_outside_awaiting_prompt() {
        let mut game = streaming(Role::Asker);
        let err = game.submit("again").unwrap_err();
        assert!(matches!(err, GameError::InvalidState { phase: GamePhase::Streaming, .. }));
        assert_eq!(game.last_prompt(), Some("Best chippy?"));
    }

    #[test]
    fn test_submit_rejected_for_chooser() {
        let mut game = GameStateMachine::new(Role::Chooser, ChatTemplate::llama3());
        assert!(game.submit("hi").is_err());
    }

    #[test]
    fn test_choose_while_streaming() {
        let mut game = streaming(Role::Chooser);
        game.handle(InboundMessage::ChoiceOffer(offer())).unwrap();
        let index = ChoiceIndex::new(2).unwrap();
        assert_eq!(game.choose(index).unwrap(), OutboundMessage::Choice(index));
        assert!(game.pending_offer().is_none());
    }

    #[test]
    fn test_choose_rejected_outside_streaming() {
        let index = ChoiceIndex::new(1).unwrap();
        let mut awaiting = GameStateMachine::new(Role::Chooser, ChatTemplate::llama3());
        assert!(awaiting.choose(index).is_err());

        let mut done = streaming(Role::Chooser);
        done.handle(InboundMessage::Finish).unwrap();
        assert!(done.choose(index).is_err());
    }

    #[test]
    fn test_choose_rejected_for_asker() {
        let mut game = streaming(Role::Asker);
        assert!(game.choose(ChoiceIndex::new(1).unwrap()).is_err());
    }

    #[test]
    fn test_restart_always_resets() {
        let game = streaming(Role::Chooser);
        assert_eq!(game.restart(), OutboundMessage::ResetGame);
        let idle = GameStateMachine::new(Role::Asker, ChatTemplate::llama3());
        assert_eq!(idle.restart(), OutboundMessage::ResetGame);
    }

    // -- Transcript -----------------------------------------------------------

    #[test]
    fn test_transcript_for_asker() {
        let mut game = streaming(Role::Asker);
        game.handle(token("Fish")).unwrap();
        let t = game.transcript(1_700_000_000_000).unwrap();
        assert_eq!(t.prompt, "Best chippy?");
        assert_eq!(t.response, "Fish");
        assert_eq!(t.date, 1_700_000_000_000);
    }

    #[test]
    fn test_no_transcript_for_chooser_or_before_prompt() {
        assert!(streaming(Role::Chooser).transcript(0).is_none());
        let idle = GameStateMachine::new(Role::Asker, ChatTemplate::llama3());
        assert!(idle.transcript(0).is_none());
    }
}
