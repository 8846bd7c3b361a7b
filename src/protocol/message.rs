//! Typed message bodies exchanged between host and worker.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wire tag for [`VersionBody`].
pub const VERSION: &str = "version";
/// Wire tag for [`SolutionBody`].
pub const SOLUTION: &str = "solution";
/// Wire tag for [`ProjectBody`].
pub const PROJECT: &str = "project";
/// Wire tag for [`MetadataBody`].
pub const METADATA: &str = "metadata";

/// A decoded message.
///
/// `Error` and `Unknown` only ever originate on the receiving side: they
/// describe a frame that could not be turned into one of the known kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Version(VersionBody),
    Solution(SolutionBody),
    Project(ProjectBody),
    Metadata(MetadataBody),
    Error(ErrorMessage),
    Unknown(UnknownMessage),
}

impl Message {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Version(_) => VERSION,
            Message::Solution(_) => SOLUTION,
            Message::Project(_) => PROJECT,
            Message::Metadata(_) => METADATA,
            Message::Error(_) => "error",
            Message::Unknown(_) => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionBody {
    pub version: i32,
}

/// Full project list. Receiving one replaces all worker state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolutionBody {
    #[serde(default, deserialize_with = "null_as_default")]
    pub projects: Vec<ProjectDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDescriptor {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    /// Path of the project file; its parent directory is the source root.
    pub path: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub references: Vec<String>,
}

/// Reference list update for a single, already known project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectBody {
    pub id: Uuid,
    #[serde(default, deserialize_with = "null_as_default")]
    pub references: Vec<String>,
}

/// Compiled metadata for one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataBody {
    pub id: Uuid,
    #[serde(default, alias = "name")]
    pub project_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assembly_name: Option<String>,
    #[serde(default, with = "base64_bytes")]
    pub bytes: Vec<u8>,
}

/// A frame that could not be decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMessage {
    pub original_text: String,
    /// Failure detail when the envelope parsed but its body did not.
    pub detail: Option<String>,
}

/// A well-formed envelope with a tag this build does not know.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownMessage {
    pub type_tag: String,
    /// The body exactly as it appeared on the wire.
    pub body: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(text) => STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
