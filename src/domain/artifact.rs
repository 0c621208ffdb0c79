use std::path::PathBuf;

use base64::{Engine as _, engine::general_purpose::STANDARD};

use super::request::OutputFormat;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactPayload {
    Text(String),
    Binary(Vec<u8>),
}

/// Serialized chart bytes with their format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputArtifact {
    pub payload: ArtifactPayload,
    pub format: OutputFormat,
}

impl OutputArtifact {
    pub fn text(format: OutputFormat, text: String) -> Self {
        Self {
            payload: ArtifactPayload::Text(text),
            format,
        }
    }

    pub fn binary(format: OutputFormat, bytes: Vec<u8>) -> Self {
        Self {
            payload: ArtifactPayload::Binary(bytes),
            format,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.payload {
            ArtifactPayload::Text(text) => text.as_bytes(),
            ArtifactPayload::Binary(bytes) => bytes,
        }
    }

    /// Text as-is, binary as base64.
    pub fn encoded_payload(&self) -> String {
        match &self.payload {
            ArtifactPayload::Text(text) => text.clone(),
            ArtifactPayload::Binary(bytes) => STANDARD.encode(bytes),
        }
    }
}

/// Where a finished artifact ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Written to disk; carries the path reported to the caller.
    File(PathBuf),
    /// Returned inline: SVG text or base64 for raster formats.
    Inline(String),
}

impl Delivery {
    pub fn into_response_text(self) -> String {
        match self {
            Delivery::File(path) => path.display().to_string(),
            Delivery::Inline(payload) => payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_payloads_are_base64_encoded() {
        let artifact = OutputArtifact::binary(OutputFormat::Png, vec![0x89, b'P', b'N', b'G']);
        assert_eq!(artifact.encoded_payload(), "iVBORw==");
    }

    #[test]
    fn text_payloads_pass_through() {
        let artifact = OutputArtifact::text(OutputFormat::Svg, "<svg/>".into());
        assert_eq!(artifact.encoded_payload(), "<svg/>");
        assert_eq!(artifact.as_bytes(), b"<svg/>");
    }
}
