//! Shared protocol definitions for background ↔ view communication.
//! Keeping this in a dedicated crate lets the background side and any
//! tooling decode the same shapes without pulling in the channel runtime.
//!
//! Background → view messages are discriminated by a `command` field, view →
//! background requests by a `request` field. The heartbeat marker carries
//! neither and is recognized structurally.

mod message;
mod node;
mod request;

pub use message::{
    commands, decode_message, encode_message, heartbeat_marker, is_heartbeat, ExportResult,
    ImportResult, InitTree, NodeUpdated, Notify, NotifyEvent, ProtocolMessage, SetCursor,
};
pub use node::NodeData;
pub use request::Request;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message is not a JSON object")]
    NotAnObject,
    #[error("message carries no `{0}` discriminant")]
    MissingDiscriminant(&'static str),
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("malformed `{command}` message: {source}")]
    Malformed {
        command: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
