use crate::error::Error;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static MIME_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][\w.+-]*/[A-Za-z0-9][\w.+-]*(\s*;\s*[^;]+)*$")
        .expect("MIME type pattern is valid")
});

/// Opaque audio bytes tagged with a MIME type.
///
/// A blob is moved, never cloned, on its way between the caller, the store
/// worker and the mixer.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    mime_type: String,
    bytes: Vec<u8>,
}

impl Blob {
    pub fn new(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Non-empty and carrying a syntactically valid MIME type.
    pub fn is_well_formed(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.bytes.is_empty() {
            return Err(Error::InvalidPayload("blob is empty".to_string()));
        }
        if self.mime_type.trim().is_empty() {
            return Err(Error::InvalidPayload("blob has no MIME type".to_string()));
        }
        if !MIME_TYPE.is_match(&self.mime_type) {
            return Err(Error::InvalidPayload(format!(
                "malformed MIME type {:?}",
                self.mime_type
            )));
        }
        Ok(())
    }

    /// File extension implied by the MIME type: `audio/webm;codecs=opus` → `webm`.
    pub fn extension(&self) -> &str {
        extension_for(&self.mime_type)
    }
}

pub fn extension_for(mime_type: &str) -> &str {
    let essence = mime_type.split(';').next().unwrap_or_default();
    essence.split('/').nth(1).unwrap_or("bin").trim()
}

impl std::fmt::Debug for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blob")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_formed() {
        assert!(Blob::new("audio/wav", vec![1, 2, 3]).is_well_formed());
        assert!(Blob::new("audio/webm;codecs=opus", vec![1]).is_well_formed());
        assert!(Blob::new("audio/ogg; codecs=opus", vec![1]).is_well_formed());
    }

    #[test]
    fn test_rejects_empty_and_untyped() {
        assert!(matches!(
            Blob::new("audio/wav", Vec::new()).validate(),
            Err(Error::InvalidPayload(_))
        ));
        assert!(matches!(
            Blob::new("", vec![1]).validate(),
            Err(Error::InvalidPayload(_))
        ));
        assert!(matches!(
            Blob::new("wav", vec![1]).validate(),
            Err(Error::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_extension() {
        assert_eq!(extension_for("audio/webm;codecs=opus"), "webm");
        assert_eq!(extension_for("audio/wav"), "wav");
        assert_eq!(extension_for("garbage"), "bin");
        assert_eq!(Blob::new("audio/mpeg", vec![0]).extension(), "mpeg");
    }
}
