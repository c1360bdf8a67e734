//! Wire messages exchanged between the ground station and its satellites
//!
//! Messages are plain UTF-8 text without a frame delimiter:
//!
//! | Wire form | Meaning | Direction |
//! |---|---|---|
//! | `""` | peer is disconnecting | worker -> coordinator |
//! | `hello` | handshake probe | worker -> coordinator |
//! | `world` | handshake acknowledgement | coordinator -> worker |
//! | `::r::<csv>` | resource registration | worker -> coordinator |
//! | `ok` | registration accepted | coordinator -> worker |
//! | `::t::<name>::<payoff>::<list>` | task assignment | coordinator -> worker |
//!
//! The resource list inside a task assignment is written as `['1', '2']`.

use crate::error::{ProtocolError, Result};
use crate::task::{parse_payoff, parse_resource_csv, validate_resource_id, Task, FIELD_SEPARATOR};
use std::collections::BTreeSet;

/// Handshake probe
pub const MSG_PING: &str = "hello";

/// Handshake acknowledgement
pub const MSG_PONG: &str = "world";

/// Registration accepted
pub const MSG_OK: &str = "ok";

/// Prefix of a resource registration
pub const RESOURCES_PREFIX: &str = "::r::";

/// Prefix of a task assignment
pub const TASK_PREFIX: &str = "::t::";

/// A protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Empty payload, the peer is going away
    Disconnect,

    /// Handshake probe
    Hello,

    /// Handshake acknowledgement
    World,

    /// Resource registration with the declared ids
    Register(Vec<String>),

    /// Registration accepted
    Ok,

    /// Task assignment
    Assign(Task),
}

impl Message {
    /// Encode the message to its wire form
    pub fn encode(&self) -> String {
        match self {
            Message::Disconnect => String::new(),
            Message::Hello => MSG_PING.to_string(),
            Message::World => MSG_PONG.to_string(),
            Message::Ok => MSG_OK.to_string(),
            Message::Register(resources) => {
                format!("{}{}", RESOURCES_PREFIX, resources.join(","))
            }
            Message::Assign(task) => format!(
                "{prefix}{name}{sep}{payoff}{sep}{list}",
                prefix = TASK_PREFIX,
                name = task.name(),
                sep = FIELD_SEPARATOR,
                payoff = task.payoff(),
                list = encode_resource_list(task.resources()),
            ),
        }
    }

    /// Decode a single message
    ///
    /// A zero-length payload is a disconnect. Trailing line terminators are
    /// ignored so the protocol can be driven from a terminal.
    pub fn decode(payload: &str) -> Result<Self> {
        if payload.is_empty() {
            return Ok(Message::Disconnect);
        }

        let text = payload.trim_end_matches(['\r', '\n']);
        match text {
            MSG_PING => return Ok(Message::Hello),
            MSG_PONG => return Ok(Message::World),
            MSG_OK => return Ok(Message::Ok),
            _ => {}
        }

        if let Some(csv) = text.strip_prefix(RESOURCES_PREFIX) {
            return Ok(Message::Register(parse_resource_csv(csv)?));
        }

        if let Some(body) = text.strip_prefix(TASK_PREFIX) {
            return decode_task(body).map(Message::Assign);
        }

        Err(ProtocolError::UnknownMessage(payload.to_string()))
    }

    /// Decode one read buffer that may hold several messages
    ///
    /// Nothing delimits messages on the wire, so two task assignments sent
    /// back to back can arrive in a single read. Every occurrence of the task
    /// prefix starts a new message.
    pub fn decode_payload(payload: &str) -> Result<Vec<Self>> {
        if payload.is_empty() {
            return Ok(vec![Message::Disconnect]);
        }

        let starts: Vec<usize> = payload
            .match_indices(TASK_PREFIX)
            .map(|(idx, _)| idx)
            .collect();
        if starts.is_empty() || starts == [0] {
            return Ok(vec![Self::decode(payload)?]);
        }

        let mut messages = Vec::with_capacity(starts.len() + 1);
        let head = &payload[..starts[0]];
        if !head.is_empty() {
            messages.push(Self::decode(head)?);
        }
        for (i, &start) in starts.iter().enumerate() {
            let end = starts.get(i + 1).copied().unwrap_or(payload.len());
            messages.push(Self::decode(&payload[start..end])?);
        }
        Ok(messages)
    }
}

/// Encode resource ids as `['1', '2']`
pub fn encode_resource_list(resources: &BTreeSet<String>) -> String {
    let quoted: Vec<String> = resources.iter().map(|r| format!("'{}'", r)).collect();
    format!("[{}]", quoted.join(", "))
}

/// Parse a resource list
///
/// Accepts the bracketed form produced by [`encode_resource_list`] (single
/// or double quotes) and a bare comma-separated list.
pub fn parse_resource_list(list: &str) -> Result<Vec<String>> {
    let list = list.trim();
    let Some(inner) = list.strip_prefix('[').and_then(|l| l.strip_suffix(']')) else {
        return parse_resource_csv(list);
    };

    let mut resources = Vec::new();
    for item in inner.split(',').map(str::trim).filter(|item| !item.is_empty()) {
        let unquoted = strip_quotes(item)
            .ok_or_else(|| ProtocolError::MalformedResources(list.to_string()))?;
        validate_resource_id(unquoted)
            .map_err(|_| ProtocolError::MalformedResources(list.to_string()))?;
        resources.push(unquoted.to_string());
    }

    if resources.is_empty() {
        return Err(ProtocolError::EmptyResources);
    }
    Ok(resources)
}

fn strip_quotes(item: &str) -> Option<&str> {
    ['\'', '"']
        .iter()
        .find_map(|&q| item.strip_prefix(q).and_then(|i| i.strip_suffix(q)))
}

fn decode_task(body: &str) -> Result<Task> {
    let mut fields = body.splitn(3, FIELD_SEPARATOR);
    let (Some(name), Some(payoff), Some(list)) = (fields.next(), fields.next(), fields.next())
    else {
        return Err(ProtocolError::MalformedTask(body.to_string()));
    };

    let payoff = parse_payoff(payoff)?;
    let resources = parse_resource_list(list)?;
    Task::new(name, payoff, resources)
}
