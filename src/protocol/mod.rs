//! Wire protocol between the host and its workers.
//!
//! ## Wire format
//!
//! ```text
//! [varint length][utf-8 json]   one frame per message
//! {"type": "<tag>", "body": {...}}
//! ```
//!
//! Known tags: `version`, `solution`, `project`, `metadata`. Any other tag
//! is delivered as an opaque [`Message::Unknown`].

pub mod codec;
pub mod frame;
pub mod message;

pub use codec::{decode, decode_message, dispatch, encode, Envelope};
pub use frame::{read_frame, write_frame};
pub use message::{
    ErrorMessage, Message, MetadataBody, ProjectBody, ProjectDescriptor, SolutionBody,
    UnknownMessage, VersionBody,
};
