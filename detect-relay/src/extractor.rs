use crate::errors::{RelayError, Result};
use crate::temp_files::TempFiles;
use bytes::Bytes;
use http::Request;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http_body_util::BodyExt;
use indexmap::{IndexMap, IndexSet};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const MAX_SUFFIX_LEN: usize = 10;

/// An uploaded file spooled to transient storage
#[derive(Clone, Debug, PartialEq)]
pub struct FileHandle {
    pub path: PathBuf,
    pub original_filename: Option<String>,
    pub size: u64,
    pub content_type: Option<String>,
}

impl FileHandle {
    fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// The one file forwarded for a request
#[derive(Clone, Debug, PartialEq)]
pub struct SelectedFile {
    pub field: String,
    pub file: FileHandle,
}

/// Parsed inbound submission. Both maps keep submission order.
#[derive(Debug, Default)]
pub struct UploadRequest {
    pub fields: IndexMap<String, Vec<String>>,
    pub files: IndexMap<String, Vec<FileHandle>>,
    received_fields: IndexSet<String>,
}

impl UploadRequest {
    /// First non-empty value of a scalar field.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)?
            .iter()
            .map(String::as_str)
            .find(|v| !v.is_empty())
    }

    /// Distinct names of every part received, in submission order.
    pub fn received_fields(&self) -> Vec<String> {
        self.received_fields.iter().cloned().collect()
    }

    /// Picks the file to forward.
    ///
    /// Preferred names are checked in order and the first one carrying a
    /// non-empty file wins. Without a preferred match, the first field in
    /// submission order carrying a non-empty file is used.
    pub fn select_file(&self, preferred_fields: &[String]) -> Result<SelectedFile> {
        let first_usable =
            |handles: &Vec<FileHandle>| handles.iter().find(|f| !f.is_empty()).cloned();

        let preferred = preferred_fields.iter().find_map(|name| {
            self.files
                .get(name)
                .and_then(first_usable)
                .map(|file| (name.clone(), file))
        });

        let selected = preferred.or_else(|| {
            self.files
                .iter()
                .find_map(|(name, handles)| first_usable(handles).map(|file| (name.clone(), file)))
        });

        match selected {
            Some((field, file)) => Ok(SelectedFile { field, file }),
            None => Err(RelayError::NoFileProvided {
                received_fields: self.received_fields(),
            }),
        }
    }
}

/// Parses a multipart upload, spooling every file part into `temp`.
///
/// Bodies larger than `max_bytes` are rejected: up front when the declared
/// content length is already too large, otherwise as soon as the running
/// total passes the limit. Files written before a failure stay tracked by
/// `temp` and are removed with it.
pub async fn parse_upload<B>(
    request: Request<B>,
    max_bytes: u64,
    temp: &mut TempFiles,
) -> Result<UploadRequest>
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
{
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or(RelayError::UnsupportedContentType)?;
    let boundary = multer::parse_boundary(content_type)?;

    let declared_length = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if let Some(length) = declared_length
        && length > max_bytes
    {
        return Err(RelayError::PayloadTooLarge { limit: max_bytes });
    }

    let constraints = multer::Constraints::new()
        .size_limit(multer::SizeLimit::new().whole_stream(max_bytes));
    let body_stream = request.into_body().into_data_stream();
    let mut multipart = multer::Multipart::with_constraints(body_stream, boundary, constraints);

    let mut upload = UploadRequest::default();

    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        upload.received_fields.insert(name.clone());

        let Some(file_name) = field.file_name().map(str::to_string) else {
            let value = field.text().await?;
            upload.fields.entry(name).or_default().push(value);
            continue;
        };

        let content_type = field.content_type().map(|m| m.to_string());
        let (mut file, path) = temp.create(&file_suffix(&file_name))?;

        let mut size: u64 = 0;
        while let Some(chunk) = field.chunk().await? {
            size += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        tracing::debug!(field = %name, size, path = %path.display(), "spooled upload part");

        upload.files.entry(name).or_default().push(FileHandle {
            path,
            original_filename: Some(file_name).filter(|n| !n.trim().is_empty()),
            size,
            content_type,
        });
    }

    Ok(upload)
}

// Extension of the uploaded name, kept on the temp file. Anything unusual is dropped.
fn file_suffix(file_name: &str) -> String {
    let basename = file_name.rsplit(['/', '\\']).next().unwrap_or_default();

    Path::new(basename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| ext.len() <= MAX_SUFFIX_LEN && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{MultipartBody, upload_request};
    use http_body_util::Full;

    fn preferred() -> Vec<String> {
        crate::config::UploadConfig::default().preferred_fields
    }

    async fn parse(body: MultipartBody, temp: &mut TempFiles) -> Result<UploadRequest> {
        parse_upload(upload_request(body.build()), 1024 * 1024, temp).await
    }

    #[tokio::test]
    async fn test_parse_fields_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut temp = TempFiles::new(dir.path());

        let body = MultipartBody::new()
            .text("conf", "0.5")
            .file("photo", "cat.JPG", "image/jpeg", b"\xff\xd8\xff\xe0cat")
            .text("conf", "0.6")
            .file("photo", "dog.png", "image/png", b"dog");

        let upload = parse(body, &mut temp).await.unwrap();

        assert_eq!(upload.fields["conf"], vec!["0.5", "0.6"]);
        assert_eq!(upload.field("conf"), Some("0.5"));
        assert_eq!(upload.field("imgsz"), None);
        assert_eq!(upload.received_fields(), vec!["conf", "photo"]);

        let photos = &upload.files["photo"];
        assert_eq!(photos.len(), 2);
        assert_eq!(photos[0].original_filename.as_deref(), Some("cat.JPG"));
        assert_eq!(photos[0].content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(photos[0].size, 7);
        assert!(photos[0].path.to_string_lossy().ends_with(".JPG"));
        assert_eq!(std::fs::read(&photos[1].path).unwrap(), b"dog");

        assert_eq!(temp.len(), 2);
    }

    #[tokio::test]
    async fn test_preferred_field_beats_submission_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut temp = TempFiles::new(dir.path());

        let body = MultipartBody::new()
            .file("attachment", "a.jpg", "image/jpeg", b"first")
            .file("upload", "b.jpg", "image/jpeg", b"second")
            .file("photo", "c.jpg", "image/jpeg", b"third");

        let upload = parse(body, &mut temp).await.unwrap();
        let selected = upload.select_file(&preferred()).unwrap();

        // "photo" comes before "upload" in the preference list
        assert_eq!(selected.field, "photo");
        assert_eq!(selected.file.original_filename.as_deref(), Some("c.jpg"));
    }

    #[tokio::test]
    async fn test_first_of_many_files_under_one_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut temp = TempFiles::new(dir.path());

        let body = MultipartBody::new()
            .file("image", "one.jpg", "image/jpeg", b"1")
            .file("image", "two.jpg", "image/jpeg", b"2");

        let upload = parse(body, &mut temp).await.unwrap();
        let selected = upload.select_file(&preferred()).unwrap();
        assert_eq!(selected.file.original_filename.as_deref(), Some("one.jpg"));
    }

    #[tokio::test]
    async fn test_fallback_to_first_file_field() {
        let dir = tempfile::tempdir().unwrap();
        let mut temp = TempFiles::new(dir.path());

        let body = MultipartBody::new()
            .text("image", "not a file")
            .file("snapshot", "s.jpg", "image/jpeg", b"snap")
            .file("other", "o.jpg", "image/jpeg", b"other");

        let upload = parse(body, &mut temp).await.unwrap();
        let selected = upload.select_file(&preferred()).unwrap();
        assert_eq!(selected.field, "snapshot");
    }

    #[tokio::test]
    async fn test_empty_file_input_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut temp = TempFiles::new(dir.path());

        let body = MultipartBody::new()
            .file("image", "", "application/octet-stream", b"")
            .file("picture", "p.jpg", "image/jpeg", b"pic");

        let upload = parse(body, &mut temp).await.unwrap();
        let selected = upload.select_file(&preferred()).unwrap();
        assert_eq!(selected.field, "picture");
    }

    #[tokio::test]
    async fn test_no_file_reports_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut temp = TempFiles::new(dir.path());

        let body = MultipartBody::new()
            .text("conf", "0.3")
            .text("imgsz", "320")
            .text("note", "hello")
            .text("conf", "0.4");

        let upload = parse(body, &mut temp).await.unwrap();
        let err = upload.select_file(&preferred()).unwrap_err();

        match err {
            RelayError::NoFileProvided { received_fields } => {
                assert_eq!(received_fields, vec!["conf", "imgsz", "note"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(temp.len(), 0);
    }

    #[tokio::test]
    async fn test_declared_length_over_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut temp = TempFiles::new(dir.path());

        let body = MultipartBody::new().file("image", "big.jpg", "image/jpeg", &[0u8; 2048]);
        let result = parse_upload(upload_request(body.build()), 1024, &mut temp).await;

        assert!(matches!(
            result.unwrap_err(),
            RelayError::PayloadTooLarge { limit: 1024 }
        ));
        // Rejected before any part was spooled
        assert_eq!(temp.len(), 0);
    }

    #[tokio::test]
    async fn test_streamed_body_over_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut temp = TempFiles::new(dir.path());

        let body = MultipartBody::new().file("image", "big.jpg", "image/jpeg", &[0u8; 4096]);
        let mut request = upload_request(body.build());
        request.headers_mut().remove(CONTENT_LENGTH);

        let result = parse_upload(request, 1024, &mut temp).await;
        assert!(matches!(
            result.unwrap_err(),
            RelayError::PayloadTooLarge { limit: 1024 }
        ));

        // Anything spooled before the limit was hit is still tracked
        temp.cleanup();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_rejects_non_multipart() {
        let dir = tempfile::tempdir().unwrap();
        let mut temp = TempFiles::new(dir.path());

        let request = Request::builder()
            .method("POST")
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from_static(b"{}")))
            .unwrap();
        let result = parse_upload(request, 1024, &mut temp).await;
        assert!(matches!(
            result.unwrap_err(),
            RelayError::UnsupportedContentType
        ));

        let request = Request::builder()
            .method("POST")
            .body(Full::new(Bytes::from_static(b"{}")))
            .unwrap();
        let result = parse_upload(request, 1024, &mut temp).await;
        assert!(matches!(
            result.unwrap_err(),
            RelayError::UnsupportedContentType
        ));
    }

    #[tokio::test]
    async fn test_rejects_truncated_body() {
        let dir = tempfile::tempdir().unwrap();
        let mut temp = TempFiles::new(dir.path());

        let body = MultipartBody::new()
            .file("image", "a.jpg", "image/jpeg", b"abc")
            .build();
        let truncated = body.slice(..body.len() - 10);

        let result = parse_upload(upload_request(truncated), 1024, &mut temp).await;
        assert!(matches!(
            result.unwrap_err(),
            RelayError::MalformedMultipart(_)
        ));
    }

    #[test]
    fn test_file_suffix() {
        assert_eq!(file_suffix("photo.jpeg"), ".jpeg");
        assert_eq!(file_suffix("C:\\Users\\me\\shot.PNG"), ".PNG");
        assert_eq!(file_suffix("../../etc/passwd"), "");
        assert_eq!(file_suffix("archive.tar.gz"), ".gz");
        assert_eq!(file_suffix("weird.j p g"), "");
        assert_eq!(file_suffix(""), "");
    }
}
