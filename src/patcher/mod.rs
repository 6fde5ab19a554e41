//! Patcher host synchronization.
//!
//! The patcher is a secondary file-distribution host whose checkout and file
//! manifest must track the authoritative repository. Client and server talk
//! JSON over HTTP, but the channel itself is untrusted: the handshake and
//! every meaningful value are protected by the shared-secret field cipher.

pub mod client;
pub mod manifest;
pub mod server;

use serde::{Deserialize, Serialize};

/// Header carrying the encrypted greeting.
pub const GREETING_HEADER: &str = "Content-Message";

/// Response envelope. Every value is an encrypted token; only the JSON
/// structure is in the clear.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub error_code: String,
    pub error_message: String,
    pub branch: String,
}

/// Request body for the mutating operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutateRequest {
    #[serde(rename = "type")]
    pub kind: String,
    /// Encrypted target branch; present for `switch` only.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub branch: String,
}
