//! Presence node wire protocol
//!
//! All frames are JSON text, tagged by `type`. Close codes follow the
//! WebSocket registry: 1008 for auth/ownership rejection, 1011 for internal
//! faults, 1001 for shutdown and duplicate-session displacement.

use crate::bus::PresenceAction;
use serde::{Deserialize, Serialize};

pub const CLOSE_GOING_AWAY: u16 = 1001;
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

pub const REASON_NO_TOKEN: &str = "No token provided";
pub const REASON_INVALID_TOKEN: &str = "Invalid token";
pub const REASON_NOT_OWNED: &str = "User does not belong to this node";
pub const REASON_INTERNAL: &str = "Internal server error";
pub const REASON_DISPLACED: &str = "Replaced by a newer session";
pub const REASON_SHUTDOWN: &str = "Server shutting down";

/// Frames a client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "ping")]
    Ping {
        #[serde(default)]
        timestamp: Option<i64>,
    },
    /// Anything with an unrecognized `type`; logged and ignored.
    #[serde(other)]
    Unknown,
}

/// Frames the server sends.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "welcome")]
    Welcome {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "nodeId")]
        node_id: String,
        timestamp: i64,
    },
    #[serde(rename = "pong")]
    Pong { timestamp: i64 },
    #[serde(rename = "status_update")]
    StatusUpdate {
        action: PresenceAction,
        timestamp: i64,
        #[serde(rename = "sourceNodeId")]
        source_node_id: String,
    },
}
