//! Rebuilding response text from raw model tokens.
//!
//! The backend streams the model's raw tokens, including the chat-template
//! control markers. Those markers are either translated (end of turn becomes a
//! paragraph break) or dropped. The role name that follows a start-of-header
//! marker is dropped too, which is why the previous raw token is tracked
//! separately from the text that was actually appended.

use serde::{Deserialize, Serialize};

/// Control markers of the chat template the backend model uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatTemplate {
    pub end_of_turn: String,
    pub start_header: String,
    pub end_header: String,
    /// Role name emitted between the header markers for model turns.
    pub assistant_role: String,
}

impl ChatTemplate {
    /// Llama 3 instruct markers.
    pub fn llama3() -> Self {
        ChatTemplate {
            end_of_turn: "<|eot_id|>".to_string(),
            start_header: "<|start_header_id|>".to_string(),
            end_header: "<|end_header_id|>".to_string(),
            assistant_role: "assistant".to_string(),
        }
    }
}

impl Default for ChatTemplate {
    fn default() -> Self {
        ChatTemplate::llama3()
    }
}

/// Text appended for an end-of-turn marker.
pub const PARAGRAPH_BREAK: &str = "\n\n";

/// What one raw token contributes to the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOutput<'a> {
    /// Append the token verbatim.
    Text(&'a str),
    /// Append a paragraph break instead of the end-of-turn marker.
    ParagraphBreak,
    /// Append nothing.
    Suppressed,
}

impl<'a> TokenOutput<'a> {
    pub fn as_str(&self) -> &'a str {
        match self {
            TokenOutput::Text(s) => s,
            TokenOutput::ParagraphBreak => PARAGRAPH_BREAK,
            TokenOutput::Suppressed => "",
        }
    }

    pub fn is_suppressed(&self) -> bool {
        matches!(self, TokenOutput::Suppressed)
    }
}

/// Stateful translator from raw tokens to appended text.
///
/// Tokens must be fed strictly in arrival order.
#[derive(Debug, Clone, Default)]
pub struct TokenReconstructor {
    template: ChatTemplate,
    prev_token: Option<String>,
}

impl TokenReconstructor {
    pub fn new(template: ChatTemplate) -> Self {
        TokenReconstructor {
            template,
            prev_token: None,
        }
    }

    pub fn template(&self) -> &ChatTemplate {
        &self.template
    }

    /// The most recent raw token, control markers included.
    pub fn prev_token(&self) -> Option<&str> {
        self.prev_token.as_deref()
    }

    /// Translate one raw token and remember it for the next lookback.
    pub fn push<'t>(&mut self, raw: &'t str) -> TokenOutput<'t> {
        let t = &self.template;
        let output = if raw == t.end_of_turn {
            TokenOutput::ParagraphBreak
        } else if raw == t.start_header || raw == t.end_header {
            TokenOutput::Suppressed
        } else if raw == t.assistant_role
            && self.prev_token.as_deref() == Some(t.start_header.as_str())
        {
            TokenOutput::Suppressed
        } else {
            TokenOutput::Text(raw)
        };

        match &mut self.prev_token {
            Some(prev) => {
                prev.clear();
                prev.push_str(raw);
            }
            None => self.prev_token = Some(raw.to_string()),
        }
        output
    }

    pub fn reset(&mut self) {
        self.prev_token = None;
    }
}

/// Rebuild the full response text for a token sequence.
pub fn reconstruct<'a, I>(template: &ChatTemplate, tokens: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut reconstructor = TokenReconstructor::new(template.clone());
    tokens
        .into_iter()
        .fold(String::new(), |mut text, raw| {
            text.push_str(reconstructor.push(raw).as_str());
            text
        })
}
