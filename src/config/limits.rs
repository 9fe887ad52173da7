//! Queue capacities and protocol limits.

use serde::Deserialize;

/// Resource limits.
///
/// These bound per-room and per-connection memory so a flood or a stalled
/// client cannot exhaust the server.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Room actor mailbox capacity (default: 1024).
    #[serde(default = "default_room_mailbox_capacity")]
    pub room_mailbox_capacity: usize,
    /// Outbound frames buffered per connection before it is evicted as a
    /// slow consumer (default: 512).
    #[serde(default = "default_client_queue_capacity")]
    pub client_queue_capacity: usize,
    /// Time a client may take to answer `sync-step-1` (default: 30s).
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,
    /// Largest accepted awareness payload in bytes (default: 64 KiB).
    #[serde(default = "default_max_awareness_bytes")]
    pub max_awareness_bytes: usize,
    /// Documents one connection may have joined at once (default: 64).
    #[serde(default = "default_max_documents_per_connection")]
    pub max_documents_per_connection: usize,
    /// How long a room nobody joined waits before retiring (default: 5s).
    #[serde(default = "default_room_linger_ms")]
    pub room_linger_ms: u64,
    /// How long shutdown waits for sessions to close before flushing rooms
    /// anyway (default: 5s).
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            room_mailbox_capacity: default_room_mailbox_capacity(),
            client_queue_capacity: default_client_queue_capacity(),
            sync_timeout_ms: default_sync_timeout_ms(),
            max_awareness_bytes: default_max_awareness_bytes(),
            max_documents_per_connection: default_max_documents_per_connection(),
            room_linger_ms: default_room_linger_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

fn default_room_mailbox_capacity() -> usize {
    1024
}

fn default_client_queue_capacity() -> usize {
    512
}

fn default_sync_timeout_ms() -> u64 {
    30_000
}

fn default_max_awareness_bytes() -> usize {
    64 * 1024
}

fn default_max_documents_per_connection() -> usize {
    64
}

fn default_room_linger_ms() -> u64 {
    5_000
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}
