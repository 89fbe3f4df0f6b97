//! Wire protocol: roles, inbound/outbound messages and the JSON envelope.
//!
//! Every frame in either direction is a JSON text frame shaped
//! `{ "type": <string>, "data": <payload> }`. Inbound frames are decoded
//! leniently where the backend is loose (`reset`/`finish` may carry any `data`
//! or none) and strictly where the payload matters (`inside_choice` must carry
//! exactly five candidates).

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{GameError, Result};

/// Number of candidates in every choice offer.
pub const CHOICE_COUNT: usize = 5;

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Which side of the game this client plays. Fixed for the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
pub enum Role {
    /// Submits the prompt and watches the answer grow ("outside").
    #[value(name = "outside", alias = "asker")]
    #[serde(rename = "outside")]
    Asker,
    /// Picks the next token among the offered candidates ("inside").
    #[value(name = "inside", alias = "chooser")]
    #[serde(rename = "inside")]
    Chooser,
}

impl Role {
    /// The path segment used for this role's endpoint.
    pub fn as_loc(&self) -> &'static str {
        match self {
            Role::Asker => "outside",
            Role::Chooser => "inside",
        }
    }

    pub fn from_loc(loc: &str) -> Option<Self> {
        match loc.trim().to_lowercase().as_str() {
            "outside" | "asker" => Some(Role::Asker),
            "inside" | "chooser" => Some(Role::Chooser),
            _ => None,
        }
    }

    /// Read the role from a page-style query string (`loc=inside&...`).
    /// A leading `?` is tolerated.
    pub fn from_query(query: &str) -> Option<Self> {
        let params = parse_query(query.trim_start_matches('?'));
        params.get("loc").and_then(|loc| Role::from_loc(loc))
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_loc())
    }
}

/// Percent-decoding for query parameters; `+` decodes to a space.
pub fn url_decode(s: &str) -> String {
    let mut bytes = Vec::with_capacity(s.len());
    let mut iter = s.bytes();
    while let Some(b) = iter.next() {
        match b {
            b'+' => bytes.push(b' '),
            b'%' => {
                let hex: Vec<u8> = iter.by_ref().take(2).collect();
                let decoded = std::str::from_utf8(&hex)
                    .ok()
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                match decoded {
                    Some(byte) => bytes.push(byte),
                    None => {
                        bytes.push(b'%');
                        bytes.extend_from_slice(&hex);
                    }
                }
            }
            _ => bytes.push(b),
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Parse a query string into key-value pairs. Later keys win.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let val = parts.next().unwrap_or("");
            Some((url_decode(key), url_decode(val)))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// One candidate next token offered to the chooser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "token")]
    pub text: String,
    #[serde(rename = "prob")]
    pub probability: f64,
}

impl Candidate {
    /// Probability as a whole percentage, rounded down.
    pub fn percent(&self) -> u32 {
        (self.probability * 100.0).floor() as u32
    }
}

/// A message received from the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// The prompt that started the game, echoed to every client.
    Prompt(String),
    /// A fresh game is starting.
    Reset,
    /// One raw token of the response.
    NextToken(String),
    /// Five ranked candidates; index order is rank order.
    ChoiceOffer([Candidate; CHOICE_COUNT]),
    /// Generation is complete.
    Finish,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl InboundMessage {
    /// Wire `type` value of this message.
    pub fn wire_type(&self) -> &'static str {
        match self {
            InboundMessage::Prompt(_) => "prompt",
            InboundMessage::Reset => "reset",
            InboundMessage::NextToken(_) => "next_token",
            InboundMessage::ChoiceOffer(_) => "inside_choice",
            InboundMessage::Finish => "finish",
        }
    }

    /// Decode one text frame.
    pub fn decode(frame: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(frame)
            .map_err(|e| GameError::decode(format!("not a message envelope: {e}")))?;

        match envelope.kind.as_str() {
            "prompt" => expect_string(envelope.data, "prompt").map(InboundMessage::Prompt),
            "next_token" => {
                expect_string(envelope.data, "next_token").map(InboundMessage::NextToken)
            }
            "inside_choice" => decode_candidates(envelope.data).map(InboundMessage::ChoiceOffer),
            "reset" => Ok(InboundMessage::Reset),
            "finish" => Ok(InboundMessage::Finish),
            other => Err(GameError::decode(format!("unknown message type `{other}`"))),
        }
    }
}

fn expect_string(data: serde_json::Value, kind: &str) -> Result<String> {
    match data {
        serde_json::Value::String(s) => Ok(s),
        other => Err(GameError::decode(format!(
            "`{kind}` expects a string payload, got {other}"
        ))),
    }
}

fn decode_candidates(data: serde_json::Value) -> Result<[Candidate; CHOICE_COUNT]> {
    let candidates: Vec<Candidate> = serde_json::from_value(data)
        .map_err(|e| GameError::decode(format!("bad `inside_choice` payload: {e}")))?;

    if let Some(bad) = candidates
        .iter()
        .find(|c| !(0.0..=1.0).contains(&c.probability))
    {
        return Err(GameError::decode(format!(
            "candidate `{}` has probability {} outside [0, 1]",
            bad.text, bad.probability
        )));
    }

    let count = candidates.len();
    candidates.try_into().map_err(|_| {
        GameError::decode(format!(
            "`inside_choice` expects {CHOICE_COUNT} candidates, got {count}"
        ))
    })
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// A 1-based index into the most recent choice offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ChoiceIndex(u8);

impl ChoiceIndex {
    pub fn new(index: u8) -> Option<Self> {
        (1..=CHOICE_COUNT as u8)
            .contains(&index)
            .then_some(ChoiceIndex(index))
    }

    pub fn get(&self) -> u8 {
        self.0
    }

    /// Zero-based position in the offer.
    pub fn position(&self) -> usize {
        usize::from(self.0 - 1)
    }
}

impl TryFrom<u8> for ChoiceIndex {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        ChoiceIndex::new(value)
            .ok_or_else(|| format!("choice must be 1..={CHOICE_COUNT}, got {value}"))
    }
}

impl From<ChoiceIndex> for u8 {
    fn from(index: ChoiceIndex) -> Self {
        index.0
    }
}

impl std::str::FromStr for ChoiceIndex {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let n: u8 = s
            .trim()
            .parse()
            .map_err(|_| format!("not a choice number: {s}"))?;
        ChoiceIndex::try_from(n)
    }
}

/// A message sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OutboundMessage {
    StartGame(String),
    ResetGame,
    Choice(ChoiceIndex),
}

impl OutboundMessage {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer_json(n: usize) -> String {
        let items: Vec<String> = (0..n)
            .map(|i| format!(r#"{{"token":"t{i}","prob":0.{i}}}"#))
            .collect();
        format!(r#"{{"type":"inside_choice","data":[{}]}}"#, items.join(","))
    }

    // -- Role ----------------------------------------------------------------

    #[test]
    fn test_role_loc_names() {
        assert_eq!(Role::Asker.as_loc(), "outside");
        assert_eq!(Role::Chooser.as_loc(), "inside");
        assert_eq!(Role::Chooser.to_string(), "inside");
    }

    #[test]
    fn test_role_from_query() {
        assert_eq!(Role::from_query("?loc=inside"), Some(Role::Chooser));
        assert_eq!(Role::from_query("debug=1&loc=outside"), Some(Role::Asker));
        assert_eq!(Role::from_query("loc=elsewhere"), None);
        assert_eq!(Role::from_query(""), None);
    }

    #[test]
    fn test_url_decode() {
        assert_eq!(url_decode("hello+world"), "hello world");
        assert_eq!(url_decode("hello%20world"), "hello world");
        assert_eq!(url_decode("caf%C3%A9"), "café");
        assert_eq!(url_decode("100%"), "100%");
    }

    // -- Inbound decode -----------------------------------------------------

    #[test]
    fn test_decode_prompt() {
        let msg = InboundMessage::decode(r#"{"type":"prompt","data":"Where is Leith?"}"#).unwrap();
        assert_eq!(msg, InboundMessage::Prompt("Where is Leith?".to_string()));
    }

    #[test]
    fn test_decode_next_token_keeps_whitespace() {
        let msg = InboundMessage::decode(r#"{"type":"next_token","data":" world"}"#).unwrap();
        assert_eq!(msg, InboundMessage::NextToken(" world".to_string()));
    }

    #[test]
    fn test_decode_reset_and_finish_ignore_data() {
        assert_eq!(
            InboundMessage::decode(r#"{"type":"reset"}"#).unwrap(),
            InboundMessage::Reset
        );
        assert_eq!(
            InboundMessage::decode(r#"{"type":"finish","data":{"anything":1}}"#).unwrap(),
            InboundMessage::Finish
        );
    }

    #[test]
    fn test_decode_choice_offer_preserves_order() {
        let msg = InboundMessage::decode(&offer_json(5)).unwrap();
        match msg {
            InboundMessage::ChoiceOffer(c) => {
                let texts: Vec<&str> = c.iter().map(|c| c.text.as_str()).collect();
                assert_eq!(texts, ["t0", "t1", "t2", "t3", "t4"]);
            }
            other => panic!("expected offer, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_choice_offer_wrong_count() {
        for n in [0, 4, 6] {
            let err = InboundMessage::decode(&offer_json(n)).unwrap_err();
            assert_eq!(err.kind(), "decode");
        }
    }

    #[test]
    fn test_decode_choice_offer_probability_out_of_range() {
        let frame = r#"{"type":"inside_choice","data":[
            {"token":"a","prob":0.5},{"token":"b","prob":1.5},
            {"token":"c","prob":0.1},{"token":"d","prob":0.1},{"token":"e","prob":0.1}]}"#;
        assert!(matches!(
            InboundMessage::decode(frame),
            Err(GameError::Decode { .. })
        ));
    }

    #[test]
    fn test_decode_bare_string_broadcast_is_error() {
        let err = InboundMessage::decode(r#""Client outside left the chat""#).unwrap_err();
        assert_eq!(err.kind(), "decode");
    }

    #[test]
    fn test_decode_unknown_type() {
        assert!(InboundMessage::decode(r#"{"type":"pong"}"#).is_err());
    }

    #[test]
    fn test_decode_token_requires_string() {
        assert!(InboundMessage::decode(r#"{"type":"next_token","data":7}"#).is_err());
        assert!(InboundMessage::decode(r#"{"type":"next_token"}"#).is_err());
    }

    #[test]
    fn test_decode_not_json() {
        assert!(InboundMessage::decode("{type: prompt").is_err());
    }

    #[test]
    fn test_candidate_percent_rounds_down() {
        let c = Candidate {
            text: "the".to_string(),
            probability: 0.419,
        };
        assert_eq!(c.percent(), 41);
    }

    // -- Outbound encode -----------------------------------------------------

    #[test]
    fn test_encode_start_game() {
        let json = OutboundMessage::StartGame("hi there".to_string()).encode().unwrap();
        assert_eq!(json, r#"{"type":"start_game","data":"hi there"}"#);
    }

    #[test]
    fn test_encode_reset_game_has_no_data() {
        let json = OutboundMessage::ResetGame.encode().unwrap();
        assert_eq!(json, r#"{"type":"reset_game"}"#);
    }

    #[test]
    fn test_encode_choice_is_integer() {
        let json = OutboundMessage::Choice(ChoiceIndex::new(3).unwrap())
            .encode()
            .unwrap();
        assert_eq!(json, r#"{"type":"choice","data":3}"#);
    }

    #[test]
    fn test_choice_index_bounds() {
        assert!(ChoiceIndex::new(0).is_none());
        assert!(ChoiceIndex::new(6).is_none());
        assert_eq!(ChoiceIndex::new(1).unwrap().position(), 0);
        assert_eq!(ChoiceIndex::new(5).unwrap().position(), 4);
    }

    #[test]
    fn test_choice_index_from_str() {
        assert_eq!("2".parse::<ChoiceIndex>().unwrap().get(), 2);
        assert_eq!(" 5 ".parse::<ChoiceIndex>().unwrap().get(), 5);
        assert!("9".parse::<ChoiceIndex>().is_err());
        assert!("two".parse::<ChoiceIndex>().is_err());
    }

    #[test]
    fn test_outbound_choice_rejects_out_of_range_on_decode() {
        let parsed: std::result::Result<OutboundMessage, _> =
            serde_json::from_str(r#"{"type":"choice","data":9}"#);
        assert!(parsed.is_err());
    }
}
