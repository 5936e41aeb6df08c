//! Request/response models for the local proxy and matchmaker APIs

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request to reserve a server. Currently carries no parameters.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReserveRequest {}

/// Successful response to a reservation request.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveResponse {
    /// Build configuration this server is using.
    pub build_configuration_id: i64,
    /// Time at which the reservation was made.
    pub created: DateTime<Utc>,
    /// Time at which the reservation was fulfilled.
    pub fulfilled: DateTime<Utc>,
    /// Port of the server on the requested machine.
    pub game_port: i64,
    /// IPv4 address of the machine the server is running on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
    /// IPv6 address of the machine the server is running on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<String>,
    /// Time at which the reservation was requested.
    pub requested: DateTime<Utc>,
    /// UUID of the reservation generated by the service.
    pub reservation_id: String,
}

/// Request to hold a server, preventing the platform from scaling it down.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HoldRequest {
    /// Duration of the hold as a sequence of numbers and time units
    /// (e.g. `2m` / `1h`). Holds are stored at per-second granularity.
    pub timeout: String,
}

/// Status of a server hold.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldStatus {
    /// Unix epoch at which the hold expires, in seconds.
    pub expires_at: i64,
    /// Whether the server is currently held.
    pub held: bool,
}

/// Request to patch a server allocation.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PatchAllocationRequest {
    /// Ready state of the server.
    pub ready: bool,
}

/// Token handed out by the local proxy for matchmaker calls.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub error: String,
}

/// A matchmaker backfill ticket. The keep-alive loop parses and discards
/// these; approval is the side effect it is after.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BackfillTicket {
    /// Backfill ticket ID.
    #[serde(rename = "ID", alias = "id", default)]
    pub id: String,
    /// `ip:port` of the server that created the backfill.
    #[serde(rename = "Connection", alias = "connection", default)]
    pub connection: String,
    /// Attributes compared against matchmaking-config filters to segment
    /// the ticket population into pools.
    #[serde(rename = "Attributes", alias = "attributes", default)]
    pub attributes: HashMap<String, f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backfill_ticket_accepts_both_casings() {
        let upper: BackfillTicket = serde_json::from_str(r#"{"ID":"x"}"#).unwrap();
        assert_eq!(upper.id, "x");

        let lower: BackfillTicket =
            serde_json::from_str(r#"{"id":"y","connection":"1.2.3.4:9000"}"#).unwrap();
        assert_eq!(lower.id, "y");
        assert_eq!(lower.connection, "1.2.3.4:9000");
    }

    #[test]
    fn hold_status_wire_names() {
        let status: HoldStatus =
            serde_json::from_str(r#"{"expiresAt": 1700000000, "held": true}"#).unwrap();
        assert_eq!(status.expires_at, 1_700_000_000);
        assert!(status.held);
    }
}
