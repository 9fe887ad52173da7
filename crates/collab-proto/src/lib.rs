//! # collab-proto
//!
//! Wire protocol spoken between collabd and browser editors.
//!
//! Every frame is a JSON object carried in a WebSocket text message. The
//! `type` field selects the message kind; binary CRDT payloads (Yjs updates,
//! state vectors, awareness blobs) travel as standard base64 strings.
//!
//! ## Quick Start
//!
//! ```rust
//! use collab_proto::{ClientMessage, DocumentId, ServerMessage};
//!
//! let raw = r#"{"type":"join","documentId":"d1"}"#;
//! let msg = ClientMessage::from_json(raw).expect("valid frame");
//! assert_eq!(msg.document_id(), Some(&DocumentId::from("d1")));
//!
//! let reply = ServerMessage::synced(DocumentId::from("d1"));
//! assert_eq!(reply.to_json().unwrap(), r#"{"type":"synced","documentId":"d1"}"#);
//! ```
//!
//! ## Handshake
//!
//! ```text
//! client                                  server
//!   | --- (token in URL / header / auth) --> |
//!   | <-------------- authenticated -------- |
//!   | --- join {documentId} ---------------> |
//!   | <-- sync-step-1 {stateVector} -------- |
//!   | --- sync-step-2 {stateVector} -------> |
//!   | <-- update {diff} -------------------- |
//!   | <-- synced --------------------------- |
//!   | <== update / awareness ==============> |
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod error;
pub mod message;
pub mod payload;

pub use error::{close, ErrorCode, ProtocolError};
pub use message::{ClientMessage, DocumentId, PeerInfo, ServerMessage};
pub use payload::Payload;
