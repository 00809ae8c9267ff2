//! File records exchanged as `input` command bodies and `output` update bodies.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};

/// MIME type used when a file has no recognizable extension.
pub const DEFAULT_MIME_TYPE: &str = "text/plain";

/// A file travelling over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowFile {
    /// Path relative to the flow input or output directory.
    pub path: String,
    /// MIME type of the payload.
    #[serde(rename = "type", default)]
    pub mime_type: String,
    /// File contents (base64 encoded on the wire).
    #[serde(with = "base64_bytes", default)]
    pub payload: Vec<u8>,
}

impl FlowFile {
    /// Create a new file record.
    #[must_use]
    pub fn new(path: impl Into<String>, mime_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            mime_type: mime_type.into(),
            payload,
        }
    }

    /// MIME type without parameters, lowercased (`text/plain; charset=utf-8` → `text/plain`).
    #[must_use]
    pub fn media_type(&self) -> String {
        self.mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
    }

    /// Generic file kind (`text`, `image`, ...).
    #[must_use]
    pub fn kind(&self) -> String {
        self.media_type()
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string()
    }

    /// Payload as text.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

mod base64_bytes {
    use super::BASE64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Parameters of one automation invocation (`run` command body).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerArguments {
    /// Flow identifier.
    pub flow: String,
    /// Optional data string handed to the flow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Optional proxy URL (`scheme://[user[:password]@]host:port`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

impl RunnerArguments {
    /// Arguments for the given flow.
    #[must_use]
    pub fn new(flow: impl Into<String>) -> Self {
        Self {
            flow: flow.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_payload_is_base64() {
        let file = FlowFile::new("result.txt", "text/plain", b"hello".to_vec());
        let value = serde_json::to_value(&file).unwrap();
        assert_eq!(
            value,
            json!({"path": "result.txt", "type": "text/plain", "payload": "aGVsbG8="})
        );

        let parsed: FlowFile = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.text(), "hello");
    }

    #[test]
    fn test_kind_ignores_parameters() {
        let file = FlowFile::new("a.txt", "Text/Plain; charset=utf-8", Vec::new());
        assert_eq!(file.media_type(), "text/plain");
        assert_eq!(file.kind(), "text");

        let image = FlowFile::new("shot.png", "image/png", Vec::new());
        assert_eq!(image.kind(), "image");
    }

    #[test]
    fn test_missing_payload_is_empty() {
        let parsed: FlowFile = serde_json::from_value(json!({"path": "x"})).unwrap();
        assert!(parsed.payload.is_empty());
        assert!(parsed.mime_type.is_empty());
    }

    #[test]
    fn test_runner_arguments_shape() {
        let args: RunnerArguments = serde_json::from_value(json!({"flow": "f"})).unwrap();
        assert_eq!(args, RunnerArguments::new("f"));
        assert_eq!(serde_json::to_value(&args).unwrap(), json!({"flow": "f"}));
    }
}
