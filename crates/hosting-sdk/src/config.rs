//! Platform-supplied server configuration
//!
//! The hosting platform writes a JSON document next to the game server and
//! rewrites it whenever the server's allocation state changes. Recognized
//! keys deserialize into [`Config`]; everything else (for example custom
//! build-configuration data) is collected into [`Config::extra`].

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::SdkError;

/// Local proxy base URL used when the configuration omits one.
pub const DEFAULT_LOCAL_PROXY_URL: &str = "http://localhost:8086";

/// Matchmaker base URL used when `extra["matchmakerUrl"]` is unset.
pub const DEFAULT_MATCHMAKER_URL: &str = "https://matchmaker.services.api.unity.com";

/// A numeric value the platform serializes as either a JSON number or a
/// JSON string, kept in its textual form.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct NumericString(String);

impl NumericString {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.0.parse().ok()
    }

    pub fn as_u16(&self) -> Option<u16> {
        self.0.parse().ok()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NumericString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NumericString {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl<'de> Deserialize<'de> for NumericString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(s) => Ok(Self(s)),
            serde_json::Value::Number(n) => Ok(Self(n.to_string())),
            serde_json::Value::Null => Ok(Self::default()),
            other => Err(serde::de::Error::custom(format!(
                "expected a number or a numeric string, got {other}"
            ))),
        }
    }
}

/// The query protocol the server answers monitoring requests with.
///
/// SQP is the platform's recommended protocol; A2S is supported for
/// discovery clients that require it. Values the SDK does not recognize are
/// preserved and rejected when the query endpoint is selected.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum QueryProtocol {
    #[default]
    Sqp,
    A2s,
    Other(String),
}

impl QueryProtocol {
    /// The protocol the platform recommends for new fleets.
    pub fn recommended() -> Self {
        Self::Sqp
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Sqp => "sqp",
            Self::A2s => "a2s",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for QueryProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for QueryProtocol {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for QueryProtocol {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            // An absent or empty query type means the platform default.
            "" | "sqp" => Self::Sqp,
            "a2s" => Self::A2s,
            _ => Self::Other(s),
        })
    }
}

/// Game server configuration variables provided by the hosting platform.
///
/// Snapshots are immutable; readers always receive a copy of the current
/// configuration and never observe a partially applied update.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Allocation ID for the current allocation. Empty when the server is
    /// not allocated.
    #[serde(rename = "allocatedUUID")]
    pub allocated_uuid: String,

    /// IPv4 address advertised for this server.
    pub ip: String,

    /// IPv6 address advertised for this server. Can be empty.
    pub ipv6: String,

    /// Base URL of the machine-local proxy service.
    #[serde(rename = "localProxyUrl")]
    pub local_proxy_url: String,

    /// Port the game itself listens on. Binding it is the embedder's job.
    pub port: NumericString,

    /// UDP port the SDK binds for query interactions.
    #[serde(rename = "queryPort")]
    pub query_port: NumericString,

    /// Query protocol served on the query port.
    #[serde(rename = "queryType")]
    pub query_type: QueryProtocol,

    /// ID of this server in the hosting platform.
    #[serde(rename = "serverID")]
    pub server_id: NumericString,

    /// Directory the game should place its log files in. The platform
    /// collects files written here.
    #[serde(rename = "serverLogDir")]
    pub server_log_dir: String,

    /// All other keys in the document, for example custom build
    /// configuration values. Values must be strings.
    #[serde(flatten)]
    pub extra: HashMap<String, String>,
}

impl Config {
    /// Loads configuration from the given file.
    pub fn from_file(path: &Path) -> Result<Self, SdkError> {
        let raw = std::fs::read(path).map_err(SdkError::ConfigRead)?;
        Ok(Self::from_slice(&raw)?)
    }

    /// Parses a configuration document. An empty document produces an
    /// end-of-input error, which callers watching the file treat as a
    /// transient truncation.
    pub fn from_slice(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    /// Whether the matchmaker backfill keep-alive is enabled for this
    /// server.
    pub fn backfill_enabled(&self) -> bool {
        self.extra
            .get("enableBackfill")
            .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1")
    }

    /// Matchmaker base URL, falling back to the published platform
    /// endpoint.
    pub fn matchmaker_url(&self) -> &str {
        match self.extra.get("matchmakerUrl") {
            Some(url) if !url.is_empty() => url,
            _ => DEFAULT_MATCHMAKER_URL,
        }
    }

    /// Local proxy base URL, falling back to the default local endpoint.
    pub fn local_proxy_url(&self) -> &str {
        if self.local_proxy_url.is_empty() {
            DEFAULT_LOCAL_PROXY_URL
        } else {
            &self.local_proxy_url
        }
    }

    /// Hostname portion of the local proxy URL, as used by the broker
    /// WebSocket endpoint.
    pub fn local_proxy_host(&self) -> &str {
        self.local_proxy_url()
            .strip_prefix("http://")
            .unwrap_or_else(|| self.local_proxy_url())
    }
}
