//! Script body representations
//!
//! The gateway stores script bodies as a single base64 blob. Export files may
//! instead carry the decoded text as an array of lines, or as a JSON-quoted
//! string. All forms convert back to the identical gateway blob.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use serde::{Deserialize, Serialize};

use crate::{CoreError, Result};

/// How script bodies are written into export bundles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptRepresentation {
    /// Decoded text split on `\n`
    #[default]
    Lines,
    /// The gateway's base64 blob, unchanged
    Base64,
    /// Decoded text as a JSON-quoted string
    JsonText,
}

/// A script body as found in an export bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptBody {
    Lines(Vec<String>),
    Text(String),
}

/// The form a textual script body was detected in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedForm {
    Lines,
    Base64,
    JsonText,
    PlainText,
}

impl ScriptBody {
    pub fn detect(&self) -> DetectedForm {
        match self {
            ScriptBody::Lines(_) => DetectedForm::Lines,
            ScriptBody::Text(text) if json_quoted(text).is_some() => DetectedForm::JsonText,
            ScriptBody::Text(text) if is_base64_encoded(text) => DetectedForm::Base64,
            ScriptBody::Text(_) => DetectedForm::PlainText,
        }
    }

    /// Normalise to the gateway's single base64 form
    pub fn to_base64(&self) -> String {
        match self {
            ScriptBody::Lines(lines) => encode_text(&lines.join("\n")),
            ScriptBody::Text(text) => match json_quoted(text) {
                Some(decoded) => encode_text(&decoded),
                None if is_base64_encoded(text) => text.clone(),
                None => encode_text(text),
            },
        }
    }

    /// Encode from the gateway form into the requested representation
    pub fn from_base64(encoded: &str, representation: ScriptRepresentation) -> Result<Self> {
        Ok(match representation {
            ScriptRepresentation::Base64 => ScriptBody::Text(encoded.to_string()),
            ScriptRepresentation::Lines => {
                let text = decode_text(encoded)?;
                ScriptBody::Lines(text.split('\n').map(str::to_string).collect())
            }
            ScriptRepresentation::JsonText => {
                let text = decode_text(encoded)?;
                let quoted = serde_json::to_string(&text)
                    .map_err(|e| CoreError::serialization("script text", e))?;
                ScriptBody::Text(quoted)
            }
        })
    }

    /// Base64url form used for SAML2 metadata documents
    pub fn to_base64_url(&self) -> String {
        match self {
            ScriptBody::Lines(lines) => URL_SAFE.encode(lines.join("\n")),
            ScriptBody::Text(text) => text.clone(),
        }
    }
}

pub fn encode_text(text: &str) -> String {
    STANDARD.encode(text)
}

pub fn decode_text(encoded: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| CoreError::encoding("script", e))?;
    String::from_utf8(bytes).map_err(|e| CoreError::encoding("script", e))
}

pub fn encode_base64_url(text: &str) -> String {
    URL_SAFE.encode(text)
}

pub fn decode_base64_url(encoded: &str) -> Result<String> {
    let bytes = URL_SAFE
        .decode(encoded)
        .map_err(|e| CoreError::encoding("metadata", e))?;
    String::from_utf8(bytes).map_err(|e| CoreError::encoding("metadata", e))
}

/// Strict check for padded standard-alphabet base64
pub fn is_base64_encoded(text: &str) -> bool {
    if text.len() % 4 != 0 {
        return false;
    }
    let body = text.trim_end_matches('=');
    if text.len() - body.len() > 2 {
        return false;
    }
    body.bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
        && STANDARD.decode(text).is_ok()
}

fn json_quoted(text: &str) -> Option<String> {
    if !text.starts_with('"') {
        return None;
    }
    serde_json::from_str::<String>(text).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "var a = 1;\nvar b = \"two\";\noutcome = \"true\";";

    #[test]
    fn test_three_lines_normalise_to_gateway_form() {
        let body = ScriptBody::Lines(SOURCE.split('\n').map(str::to_string).collect());
        assert_eq!(body.detect(), DetectedForm::Lines);
        assert_eq!(body.to_base64(), encode_text(SOURCE));
    }

    #[test]
    fn test_encoded_script_is_unchanged() {
        let encoded = encode_text(SOURCE);
        let body = ScriptBody::Text(encoded.clone());
        assert_eq!(body.detect(), DetectedForm::Base64);
        assert_eq!(body.to_base64(), encoded);
    }

    #[test]
    fn test_json_text_is_encoded() {
        let body =
            ScriptBody::from_base64(&encode_text(SOURCE), ScriptRepresentation::JsonText).unwrap();
        assert_eq!(body.detect(), DetectedForm::JsonText);
        assert_eq!(body.to_base64(), encode_text(SOURCE));
    }

    #[test]
    fn test_every_representation_preserves_content() {
        let encoded = encode_text("line one\n\n  indented\nlast\n");
        for representation in [
            ScriptRepresentation::Lines,
            ScriptRepresentation::Base64,
            ScriptRepresentation::JsonText,
        ] {
            let body = ScriptBody::from_base64(&encoded, representation).unwrap();
            assert_eq!(body.to_base64(), encoded, "{:?}", representation);
        }
    }

    #[test]
    fn test_plain_text_gets_encoded() {
        let body = ScriptBody::Text("outcome = true;".to_string());
        assert_eq!(body.detect(), DetectedForm::PlainText);
        assert_eq!(body.to_base64(), encode_text("outcome = true;"));
    }

    #[test]
    fn test_invalid_base64_is_an_encoding_error() {
        let err = ScriptBody::from_base64("@@@", ScriptRepresentation::Lines).unwrap_err();
        assert!(matches!(err, CoreError::Encoding { .. }));
    }
}
