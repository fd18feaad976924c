//! Storage key layout for managed media.
//!
//! Uploads live under the input prefix (`uploads/clip.mp4`) and transcoded
//! renditions under the output prefix (`outputs/clip_cli.mp4`). Jobs refer to
//! uploads by their source key, the name relative to the input prefix.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("key '{0}' is outside the managed prefix '{1}'")]
    OutsidePrefix(String, String),

    #[error("key '{0}' has an empty file name")]
    EmptyName(String),

    #[error("key '{0}' contains a nested path or control character")]
    InvalidName(String),

    #[error("input prefix '{0}' and output prefix '{1}' overlap")]
    OverlappingPrefixes(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaKeys {
    input_prefix: String,
    output_prefix: String,
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

fn validate_name(key: &str, name: &str) -> Result<(), KeyError> {
    if name.is_empty() {
        return Err(KeyError::EmptyName(key.to_string()));
    }
    if name.contains('/')
        || name.contains('\\')
        || name == "."
        || name == ".."
        || name.chars().any(char::is_control)
    {
        return Err(KeyError::InvalidName(key.to_string()));
    }
    Ok(())
}

impl MediaKeys {
    pub fn new(input_prefix: &str, output_prefix: &str) -> Result<Self, KeyError> {
        let input_prefix = normalize_prefix(input_prefix);
        let output_prefix = normalize_prefix(output_prefix);

        if input_prefix.starts_with(&output_prefix) || output_prefix.starts_with(&input_prefix) {
            return Err(KeyError::OverlappingPrefixes(input_prefix, output_prefix));
        }

        Ok(Self {
            input_prefix,
            output_prefix,
        })
    }

    pub fn input_prefix(&self) -> &str {
        &self.input_prefix
    }

    pub fn output_prefix(&self) -> &str {
        &self.output_prefix
    }

    /// Full storage key of an upload.
    pub fn source_location(&self, source_key: &str) -> String {
        format!("{}{}", self.input_prefix, source_key)
    }

    /// Full storage key of a rendition.
    pub fn output_location(&self, output_key: &str) -> String {
        format!("{}{}", self.output_prefix, output_key)
    }

    /// Extracts the source key from a full storage key under the input prefix.
    pub fn parse_source(&self, key: &str) -> Result<String, KeyError> {
        let name = key
            .strip_prefix(&self.input_prefix)
            .ok_or_else(|| KeyError::OutsidePrefix(key.to_string(), self.input_prefix.clone()))?;
        validate_name(key, name)?;
        Ok(name.to_string())
    }

    /// Turns a client supplied file name into a source key, dropping any
    /// directory components the client sent along.
    pub fn source_from_upload(&self, file_name: &str) -> Result<String, KeyError> {
        let name = file_name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
            .trim();
        validate_name(file_name, name)?;
        Ok(name.to_string())
    }

    /// Name the runner gives the rendition: the source stem plus the name
    /// modifier and the container extension.
    pub fn output_name(&self, source_key: &str, name_modifier: &str, extension: &str) -> String {
        let stem = match source_key.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => source_key,
        };
        format!("{}{}.{}", stem, name_modifier, extension.trim_start_matches('.'))
    }
}
