use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum FileExtensionError {
    #[error("Failed to get file extension for file: {0}")]
    MissingFileExtension(String),
    #[error("Unsupported file extension for file: {0}")]
    UnsupportedFileExtension(String),
}

pub type FileFormatResult<T> = Result<T, FileExtensionError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileFormat {
    Yaml,
    Json,
}

impl FileFormat {
    pub fn from_file_name(file_name: &str) -> FileFormatResult<Self> {
        Self::from_path(Path::new(file_name))
    }

    pub fn from_path(path: &Path) -> FileFormatResult<Self> {
        let ext = path
            .extension()
            .and_then(|os_str| os_str.to_str())
            .ok_or_else(|| FileExtensionError::MissingFileExtension(path.display().to_string()))?;

        if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") {
            Ok(Self::Yaml)
        } else if ext.eq_ignore_ascii_case("json") {
            Ok(Self::Json)
        } else {
            Err(FileExtensionError::UnsupportedFileExtension(
                path.display().to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_by_extension() {
        assert_eq!(FileFormat::from_file_name("a.yml").unwrap(), FileFormat::Yaml);
        assert_eq!(FileFormat::from_file_name("a.YAML").unwrap(), FileFormat::Yaml);
        assert_eq!(FileFormat::from_file_name("dir/a.json").unwrap(), FileFormat::Json);
    }

    #[test]
    fn unsupported_extensions() {
        assert!(matches!(
            FileFormat::from_file_name("script"),
            Err(FileExtensionError::MissingFileExtension(_))
        ));
        assert!(matches!(
            FileFormat::from_file_name("script.lua"),
            Err(FileExtensionError::UnsupportedFileExtension(_))
        ));
    }
}
