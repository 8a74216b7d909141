//! Protocol frames exchanged with relays.
//!
//! Every frame is a JSON array whose first element is a label:
//!
//! | Direction      | Frame                                   |
//! |----------------|-----------------------------------------|
//! | client → relay | `["REQ", channel, filter...]`           |
//! | client → relay | `["CLOSE", channel]`                    |
//! | client → relay | `["EVENT", event]`                      |
//! | relay → client | `["EVENT", channel, event]`             |
//! | relay → client | `["EOSE", channel]`                     |
//! | relay → client | `["OK", event_id, accepted, message]`   |
//! | relay → client | `["NOTICE", message]`                   |
//! | relay → client | `["CLOSED", channel, message]`          |

use crate::error::ProtocolError;
use crate::event::Event;
use crate::filter::Filter;
use crate::ids::EventId;
use serde_json::{json, Value};

/// Frames a client sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Open or replace the subscription named `channel`.
    Req {
        /// Subscription id.
        channel: String,
        /// Filters, OR-ed together by the relay.
        filters: Vec<Filter>,
    },
    /// End the subscription named `channel`.
    Close {
        /// Subscription id.
        channel: String,
    },
    /// Publish a signed event.
    Event(Event),
}

/// Frames a relay sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// An event matching a subscription.
    Event {
        /// Subscription id the event was delivered on.
        channel: String,
        /// The event.
        event: Box<Event>,
    },
    /// End of stored events for a subscription.
    Eose {
        /// Subscription id.
        channel: String,
    },
    /// Publish result.
    Ok {
        /// Id of the published event.
        event_id: EventId,
        /// Whether the relay stored it.
        accepted: bool,
        /// Relay-supplied reason.
        message: String,
    },
    /// Human-readable relay notice.
    Notice {
        /// Notice text.
        message: String,
    },
    /// The relay ended a subscription on its own.
    Closed {
        /// Subscription id.
        channel: String,
        /// Relay-supplied reason.
        message: String,
    },
}

impl ClientMessage {
    /// Encode as a JSON text frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        let value = match self {
            ClientMessage::Req { channel, filters } => {
                let mut frame = vec![json!("REQ"), json!(channel)];
                for filter in filters {
                    frame.push(serde_json::to_value(filter)?);
                }
                Value::Array(frame)
            }
            ClientMessage::Close { channel } => json!(["CLOSE", channel]),
            ClientMessage::Event(event) => {
                let body = serde_json::to_value(event)?;
                json!(["EVENT", body])
            }
        };
        Ok(value.to_string())
    }

    /// Decode a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        let frame = parse_array(text)?;
        match label(&frame)? {
            "REQ" => {
                let channel = string_at(&frame, 1)?;
                let filters = frame[2..]
                    .iter()
                    .map(|f| serde_json::from_value(f.clone()))
                    .collect::<Result<Vec<Filter>, _>>()?;
                Ok(ClientMessage::Req { channel, filters })
            }
            "CLOSE" => Ok(ClientMessage::Close {
                channel: string_at(&frame, 1)?,
            }),
            "EVENT" => {
                let event = frame
                    .get(1)
                    .cloned()
                    .ok_or_else(|| ProtocolError::InvalidFrame("EVENT without event".into()))?;
                Ok(ClientMessage::Event(serde_json::from_value(event)?))
            }
            other => Err(ProtocolError::UnknownFrame(other.to_string())),
        }
    }
}

impl RelayMessage {
    /// Decode a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        let frame = parse_array(text)?;
        match label(&frame)? {
            "EVENT" => {
                let channel = string_at(&frame, 1)?;
                let event = frame
                    .get(2)
                    .cloned()
                    .ok_or_else(|| ProtocolError::InvalidFrame("EVENT without event".into()))?;
                Ok(RelayMessage::Event {
                    channel,
                    event: Box::new(serde_json::from_value(event)?),
                })
            }
            "EOSE" => Ok(RelayMessage::Eose {
                channel: string_at(&frame, 1)?,
            }),
            "OK" => {
                let event_id = EventId::from_hex(&string_at(&frame, 1)?)?;
                let accepted = frame
                    .get(2)
                    .and_then(Value::as_bool)
                    .ok_or_else(|| ProtocolError::InvalidFrame("OK without status".into()))?;
                let message = frame
                    .get(3)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Ok(RelayMessage::Ok {
                    event_id,
                    accepted,
                    message,
                })
            }
            "NOTICE" => Ok(RelayMessage::Notice {
                message: string_at(&frame, 1)?,
            }),
            "CLOSED" => Ok(RelayMessage::Closed {
                channel: string_at(&frame, 1)?,
                message: frame
                    .get(2)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }),
            other => Err(ProtocolError::UnknownFrame(other.to_string())),
        }
    }

    /// Encode as a JSON text frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        let value = match self {
            RelayMessage::Event { channel, event } => {
                let body = serde_json::to_value(event.as_ref())?;
                json!(["EVENT", channel, body])
            }
            RelayMessage::Eose { channel } => json!(["EOSE", channel]),
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => json!(["OK", event_id.to_hex(), accepted, message]),
            RelayMessage::Notice { message } => json!(["NOTICE", message]),
            RelayMessage::Closed { channel, message } => json!(["CLOSED", channel, message]),
        };
        Ok(value.to_string())
    }
}

fn parse_array(text: &str) -> Result<Vec<Value>, ProtocolError> {
    match serde_json::from_str::<Value>(text)? {
        Value::Array(frame) => Ok(frame),
        _ => Err(ProtocolError::InvalidFrame("frame is not an array".into())),
    }
}

fn label(frame: &[Value]) -> Result<&str, ProtocolError> {
    frame
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::InvalidFrame("missing frame label".into()))
}

fn string_at(frame: &[Value], index: usize) -> Result<String, ProtocolError> {
    frame
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProtocolError::InvalidFrame(format!("expected string at position {}", index)))
}
