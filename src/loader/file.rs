//! Loading key material from the filesystem.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use url::Url;

use super::{ContentMeta, LoadError, Loaded, Loader, DEFAULT_FILE_FORMAT};

/// Loads key material from local files.
///
/// Accepts `file://` URIs as well as bare filesystem paths. The content
/// format is taken from the file extension, defaulting to
/// [`DEFAULT_FILE_FORMAT`], and the file's modification time is reported as
/// [`ContentMeta::last_modified`].
#[derive(Clone, Copy, Debug, Default)]
pub struct FileLoader;

impl FileLoader {
    /// Builds a `FileLoader`.
    pub fn new() -> Self {
        Self
    }

    fn to_path(location: &str) -> Result<PathBuf, LoadError> {
        if location.starts_with("file:") {
            let url = Url::parse(location)?;
            url.to_file_path().map_err(|()| LoadError::InvalidFilePath {
                location: location.to_owned(),
            })
        } else {
            Ok(PathBuf::from(location))
        }
    }

    fn meta_for(path: &Path, modified: Option<DateTime<Utc>>) -> ContentMeta {
        let format = path
            .extension()
            .map_or_else(|| DEFAULT_FILE_FORMAT.to_owned(), |ext| {
                format!(".{}", ext.to_string_lossy())
            });

        ContentMeta {
            format,
            ttl: None,
            last_modified: modified,
        }
    }
}

#[async_trait]
impl Loader for FileLoader {
    async fn load(&self, location: &str, _prev: &ContentMeta) -> Result<Loaded, LoadError> {
        let path = Self::to_path(location)?;

        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            // Directories, pipes, sockets and the like read without
            // complaint on some platforms; reject them up front.
            return Err(LoadError::NotAFile {
                location: location.to_owned(),
            });
        }

        let data = tokio::fs::read(&path).await?;
        let modified = metadata.modified().ok().map(DateTime::<Utc>::from);

        Ok(Loaded::Content {
            data,
            meta: Self::meta_for(&path, modified),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn reads_bare_path_with_extension_format() {
        let mut file = tempfile::Builder::new()
            .suffix(".jwk-set")
            .tempfile()
            .unwrap();
        file.write_all(b"{\"keys\":[]}").unwrap();

        let location = file.path().to_string_lossy().into_owned();
        let loaded = FileLoader::new()
            .load(&location, &ContentMeta::default())
            .await
            .unwrap();

        match loaded {
            Loaded::Content { data, meta } => {
                assert_eq!(data, b"{\"keys\":[]}");
                assert_eq!(meta.format, ".jwk-set");
                assert!(meta.last_modified.is_some());
                assert!(meta.ttl.is_none());
            }
            Loaded::Unchanged => panic!("expected content"),
        }
    }

    #[tokio::test]
    async fn reads_file_uri() {
        let mut file = tempfile::Builder::new().suffix(".pem").tempfile().unwrap();
        file.write_all(b"pem bytes").unwrap();

        let location = format!("file://{}", file.path().to_string_lossy());
        let loaded = FileLoader::new()
            .load(&location, &ContentMeta::default())
            .await
            .unwrap();

        assert!(matches!(loaded, Loaded::Content { .. }));
    }

    #[tokio::test]
    async fn extensionless_files_default_to_pem() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"data").unwrap();

        // NamedTempFile paths carry no extension by default.
        let location = file.path().to_string_lossy().into_owned();
        let loaded = FileLoader::new()
            .load(&location, &ContentMeta::default())
            .await
            .unwrap();

        match loaded {
            Loaded::Content { meta, .. } => assert_eq!(meta.format, DEFAULT_FILE_FORMAT),
            Loaded::Unchanged => panic!("expected content"),
        }
    }

    #[tokio::test]
    async fn directories_are_not_files() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().to_string_lossy().into_owned();

        let err = FileLoader::new()
            .load(&location, &ContentMeta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::NotAFile { .. }));
    }

    #[tokio::test]
    async fn missing_files_surface_io_errors() {
        let err = FileLoader::new()
            .load("/definitely/not/here.pem", &ContentMeta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Io(_)));
    }
}
