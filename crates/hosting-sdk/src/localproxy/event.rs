//! Events published by the local proxy broker

use serde::Deserialize;

/// Kind of a broker event, used to key registered callbacks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Any event type the SDK does not act on.
    Info,
    Allocate,
    Deallocate,
}

/// An event received on the per-server channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    /// The raw event type tag from the wire.
    pub event_type: String,
    pub event_id: String,
    pub server_id: i64,
    /// Allocation the event refers to; empty for info events.
    pub allocation_id: String,
}

/// Wire envelope. All payloads carry the base fields; allocate and
/// deallocate events additionally carry the allocation ID, so a single
/// decode pass covers every kind.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "EventType")]
    event_type: String,
    #[serde(rename = "EventID", default)]
    event_id: String,
    #[serde(rename = "ServerID", default)]
    server_id: i64,
    #[serde(rename = "AllocationID", default)]
    allocation_id: String,
}

impl Event {
    /// Decodes a broker payload. Unknown event types are tolerated and
    /// surface as [`EventKind::Info`].
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let envelope: Envelope = serde_json::from_value(value)?;

        // Both the original and the revised proxy namings are accepted.
        let kind = match envelope.event_type.as_str() {
            "AllocateEventType" | "ServerAllocateEvent" => EventKind::Allocate,
            "DeallocateEventType" | "ServerDeallocateEvent" => EventKind::Deallocate,
            _ => EventKind::Info,
        };

        Ok(Self {
            kind,
            event_type: envelope.event_type,
            event_id: envelope.event_id,
            server_id: envelope.server_id,
            allocation_id: envelope.allocation_id,
        })
    }
}
