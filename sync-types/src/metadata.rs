//! Profile metadata carried in the content of `METADATA` events.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Display fields a user publishes about themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileMetadata {
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Free-form bio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    /// Avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    /// LNURL for lightning tips.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lud06: Option<String>,
}

impl ProfileMetadata {
    /// Parse event content.
    ///
    /// The content must be a JSON object. Unknown keys and non-string values
    /// are ignored, since profiles in the wild carry many extra fields.
    pub fn from_content(content: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(content)
            .map_err(|e| ProtocolError::MalformedContent(format!("metadata is not JSON: {}", e)))?;
        let Value::Object(map) = value else {
            return Err(ProtocolError::MalformedContent(
                "metadata is not a JSON object".into(),
            ));
        };

        Ok(Self {
            name: string_field(&map, "name"),
            about: string_field(&map, "about"),
            picture: string_field(&map, "picture"),
            lud06: string_field(&map, "lud06"),
        })
    }

    /// Serialize as event content.
    pub fn to_content(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}
