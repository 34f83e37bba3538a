use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::file_format::FileFormat;

#[derive(Debug, thiserror::Error)]
pub enum SerdeFormatError {
    #[error("YAML serialization failed")]
    Yaml(#[from] serde_yml::Error),
    #[error("JSON serialization failed")]
    Json(#[from] serde_json::Error),
}

pub type SerdeFormatResult<T> = Result<T, SerdeFormatError>;

pub fn is_false(value: &bool) -> bool {
    !*value
}

/// Serializes `value` as text in the given format. Line endings are
/// normalized to `\n` and the output always ends with a newline.
pub fn serialize<T: Serialize>(value: &T, format: FileFormat) -> SerdeFormatResult<String> {
    let text = match format {
        FileFormat::Yaml => serde_yml::to_string(value)?,
        FileFormat::Json => serde_json::to_string_pretty(value)?,
    };

    Ok(normalize_line_endings(&text))
}

pub fn deserialize<T: DeserializeOwned + 'static>(
    serialized: &str,
    format: FileFormat,
) -> SerdeFormatResult<T> {
    match format {
        FileFormat::Yaml => Ok(serde_yml::from_str(serialized)?),
        FileFormat::Json => Ok(serde_json::from_str(serialized)?),
    }
}

fn normalize_line_endings(text: &str) -> String {
    let mut out = text.replace("\r\n", "\n").replace('\r', "\n");
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        values: Vec<i64>,
    }

    #[test]
    fn yaml_and_json_roundtrip() -> anyhow::Result<()> {
        let sample = Sample {
            name: "Val1".to_string(),
            values: vec![2, 3],
        };

        for format in [FileFormat::Yaml, FileFormat::Json] {
            let text = serialize(&sample, format)?;
            assert!(text.ends_with('\n'));
            let restored: Sample = deserialize(&text, format)?;
            assert_eq!(restored, sample);
        }

        Ok(())
    }

    #[test]
    fn line_endings_are_normalized() {
        assert_eq!(normalize_line_endings("a\r\nb\rc"), "a\nb\nc\n");
        assert_eq!(normalize_line_endings("a\n"), "a\n");
        assert_eq!(normalize_line_endings(""), "\n");
    }
}
