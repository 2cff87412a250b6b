//! Device output classification
//!
//! Every stdout line from the console is one of four things: an advert, an
//! overheard group-text repeat, a delivery ACK, or a plain response line for
//! whichever command is current. The JSON test only looks at the type
//! discriminator and the fields each handler needs, so firmware revisions
//! that add or drop fields still classify.

use serde_json::Value;
use tracing::debug;

/// Discriminator values emitted by `json_log_rx`
const ADVERT_TYPE: &str = "ADVERT";
const REPEAT_TYPE: &str = "GRP_TXT";
const ACK_TYPE: &str = "ACK";

/// Prompt separator printed by the console after the device name
pub const PROMPT_SEPARATOR: &str = "|*";

/// Longest plausible device name in a prompt
const MAX_PROMPT_NAME_LEN: usize = 32;

/// An overheard group-text packet
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatEvent {
    /// On-air payload, hex
    pub pkt_payload: String,
    /// Relay path, hex
    pub path: String,
    /// Signal to noise ratio
    pub snr: Option<f64>,
    /// Number of hops in `path`
    pub path_len: Option<u32>,
}

/// An overheard delivery acknowledgement
#[derive(Debug, Clone, PartialEq)]
pub struct AckEvent {
    /// ACK code as printed by the device
    pub code: String,
    /// Signal to noise ratio
    pub snr: Option<f64>,
    /// Route type name (`FLOOD`, `DIRECT`, ...)
    pub route: Option<String>,
    /// Relay path, hex
    pub path: String,
}

/// Closed set of things a stdout line can be
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Advert JSON, kept verbatim for the advert log
    Advert(Value),
    /// Group-text repeat for the correlator
    Repeat(RepeatEvent),
    /// Delivery ACK for the correlator
    Ack(AckEvent),
    /// Anything else: part of the current command's reply
    ResponseLine(String),
}

/// Classify one stdout line (already stripped of its line terminator)
pub fn classify(line: &str) -> Option<StreamEvent> {
    let trimmed = line.trim_start();
    if !trimmed.starts_with('{') {
        return Some(StreamEvent::ResponseLine(line.to_string()));
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(_) => return Some(StreamEvent::ResponseLine(line.to_string())),
    };

    let type_name = value.get("payload_typename").and_then(Value::as_str);
    match type_name {
        Some(ADVERT_TYPE) => Some(StreamEvent::Advert(value)),
        Some(REPEAT_TYPE) => parse_repeat(&value).map(StreamEvent::Repeat),
        Some(ACK_TYPE) => parse_ack(&value).map(StreamEvent::Ack),
        _ => Some(StreamEvent::ResponseLine(line.to_string())),
    }
}

fn parse_repeat(value: &Value) -> Option<RepeatEvent> {
    let pkt_payload = match value.get("pkt_payload").and_then(Value::as_str) {
        Some(p) if !p.is_empty() => p.to_string(),
        _ => {
            debug!("Dropping GRP_TXT event without pkt_payload");
            return None;
        }
    };
    Some(RepeatEvent {
        pkt_payload,
        path: string_field(value, "path"),
        snr: value.get("snr").and_then(Value::as_f64),
        path_len: value
            .get("path_len")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok()),
    })
}

fn parse_ack(value: &Value) -> Option<AckEvent> {
    let code = ["code", "pkt_payload"]
        .iter()
        .filter_map(|key| value.get(*key))
        .find_map(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
    let Some(code) = code else {
        debug!("Dropping ACK event without code");
        return None;
    };
    Some(AckEvent {
        code,
        snr: value.get("snr").and_then(Value::as_f64),
        route: value
            .get("route_typename")
            .and_then(Value::as_str)
            .map(str::to_string),
        path: string_field(value, "path"),
    })
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Split a prompt-framed line into the device name and any trailing text.
///
/// `"MarWoj|*"` yields `("MarWoj", "")`; lines without the separator, or
/// whose prefix does not look like a name, yield `None`. Chat lines such as
/// `"Alice: see |* here"` carry a colon before the separator and are not
/// prompts.
pub fn split_prompt(line: &str) -> Option<(&str, &str)> {
    let idx = line.find(PROMPT_SEPARATOR)?;
    let name = line[..idx].trim();
    if name.is_empty()
        || name.len() > MAX_PROMPT_NAME_LEN
        || name.starts_with('{')
        || name.contains(':')
    {
        return None;
    }
    let rest = line[idx + PROMPT_SEPARATOR.len()..].trim();
    Some((name, rest))
}
