//! Wire schema for the networked variant (§4.7, §6 "Wire format").
//!
//! The Python reference exchanges opaque pickled records over a gRPC
//! bidirectional stream; this defines an explicit, field-tagged schema
//! instead, framed as length-delimited `bincode` payloads inside
//! WebSocket binary messages (tokio-tungstenite already frames each
//! message, so no extra length prefix is needed at that layer).

use serde::{Deserialize, Serialize};

/// An observation annotated for deduplication and latency accounting
/// across the RPC boundary (§3). Only numeric feature channels are
/// represented — image tensors are out of this schema's scope per
/// §1 Non-goals (camera configuration, transport bytes-chunking).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TimedObservation {
    pub features: Vec<(String, Vec<f32>)>,
    pub timestamp: f64,
    pub timestep: i64,
    /// Set whenever a new chunk has just been received; bypasses the
    /// similarity filter to guarantee forward progress (§4.7 "must_go").
    pub must_go: bool,
}

/// A single action stamped with the wall-clock time and absolute
/// timestep it corresponds to (§3, §4.7 Action channel).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TimedAction {
    pub action: Vec<f32>,
    pub timestamp: f64,
    pub timestep: i64,
}

/// `SendPolicyInstructions` payload (§4.7 Handshake).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RemotePolicyConfig {
    pub policy_type: String,
    pub pretrained_path: String,
    pub action_features: Vec<String>,
    pub actions_per_chunk: usize,
    pub device: String,
}

/// The four RPC methods (§6), multiplexed over one duplex connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ClientMessage {
    Ready,
    SendPolicyInstructions(RemotePolicyConfig),
    SendObservation(TimedObservation),
    GetActions,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ServerMessage {
    ReadyAck,
    PolicyInstructionsAck,
    /// Whether `SendObservation`'s payload was accepted by the
    /// dedup/similarity filter (§4.7).
    ObservationAck { accepted: bool },
    Actions(Vec<TimedAction>),
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("failed to encode message: {0}")]
    Encode(String),
    #[error("failed to decode message: {0}")]
    Decode(String),
}

pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, WireError> {
    bincode::serialize(msg).map_err(|e| WireError::Encode(e.to_string()))
}

pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, WireError> {
    bincode::deserialize(bytes).map_err(|e| WireError::Decode(e.to_string()))
}
