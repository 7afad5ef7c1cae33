//! The GraphQL multipart request protocol (file uploads).
//!
//! A multipart body carries three kinds of parts, in order: an `operations`
//! field holding the GraphQL payload with `null` placeholders, a `map` field
//! routing each file part into placeholder positions, and one part per file.
//! Decoding substitutes every mapped placeholder with the file's field name
//! and exposes the file contents to the engine through the request
//! [`Context`](crate::Context) as an [`Uploads`] handle.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use indexmap::IndexMap;
use serde_json_bytes::Value;

use crate::configuration::UploadLimits;
use crate::error::HttpError;

/// The `map` multipart field: file part name to placeholder paths, in
/// document order.
type FileMap = IndexMap<String, Vec<String>>;

/// One file decoded from a multipart request.
#[derive(Clone, Debug)]
pub struct UploadedFile {
    /// The multipart field name the file arrived under, as referenced by the
    /// request's `map` field and by the substituted placeholders.
    pub field_name: String,
    /// The client-supplied file name, when one was sent.
    pub file_name: Option<String>,
    /// The content type of the part, when one was sent.
    pub content_type: Option<String>,
    /// The file contents.
    pub data: Bytes,
}

/// The files of one request, keyed by multipart field name.
///
/// Stored in `context.extensions()` so engines can look up the file behind a
/// substituted placeholder:
///
/// ```ignore
/// let uploads = context.extensions().get::<Uploads>().cloned();
/// let file = uploads.and_then(|uploads| uploads.get("0").cloned());
/// ```
#[derive(Clone, Debug, Default)]
pub struct Uploads {
    files: Arc<HashMap<String, UploadedFile>>,
}

impl Uploads {
    pub fn get(&self, field_name: &str) -> Option<&UploadedFile> {
        self.files.get(field_name)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Decodes a multipart request body into its operations payload and files.
///
/// Field order is enforced: `operations` first, `map` second, files after.
/// Every path in the map must point at a `null` placeholder inside the
/// operations value; the placeholder is replaced with the file's field name.
pub(crate) async fn decode(
    body: Bytes,
    boundary: String,
    limits: &UploadLimits,
) -> Result<(Value, Uploads), HttpError> {
    let stream = futures::stream::once(async move { Ok::<Bytes, Infallible>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut operations = read_json_field(&mut multipart, "operations")
        .await?
        .map(|bytes| serde_json::from_slice(&bytes).map_err(HttpError::InvalidOperationsJson))
        .transpose()?
        .ok_or(HttpError::MissingOperationsField)?;

    let map: FileMap = read_json_field(&mut multipart, "map")
        .await?
        .map(|bytes| serde_json::from_slice(&bytes).map_err(HttpError::InvalidMapJson))
        .transpose()?
        .ok_or(HttpError::MissingMapField)?;

    let files = read_files(&mut multipart, limits).await?;

    for (field_name, paths) in &map {
        if !files.contains_key(field_name) {
            return Err(HttpError::MissingFile(field_name.clone()));
        }
        for path in paths {
            let placeholder = resolve_path(&mut operations, path)
                .ok_or_else(|| HttpError::InvalidMapPath(path.clone()))?;
            if !placeholder.is_null() {
                return Err(HttpError::NonNullPlaceholder(path.clone()));
            }
            *placeholder = Value::String(field_name.as_str().into());
        }
    }

    let uploads = Uploads {
        files: Arc::new(files),
    };
    Ok((operations, uploads))
}

/// Reads the next multipart field if it carries the expected name.
///
/// Returns `None` on a name mismatch so the caller reports the missing field
/// rather than a generic ordering error.
async fn read_json_field(
    multipart: &mut multer::Multipart<'_>,
    expected: &str,
) -> Result<Option<Bytes>, HttpError> {
    let Some(field) = multipart.next_field().await.map_err(HttpError::InvalidMultipart)? else {
        return Ok(None);
    };
    if field.name() != Some(expected) {
        return Ok(None);
    }
    Ok(Some(field.bytes().await.map_err(HttpError::InvalidMultipart)?))
}

async fn read_files(
    multipart: &mut multer::Multipart<'_>,
    limits: &UploadLimits,
) -> Result<HashMap<String, UploadedFile>, HttpError> {
    let mut files = HashMap::new();
    while let Some(field) = multipart.next_field().await.map_err(HttpError::InvalidMultipart)? {
        let Some(field_name) = field.name().map(str::to_owned) else {
            continue;
        };
        if files.len() == limits.max_files {
            return Err(HttpError::MaxFilesExceeded(limits.max_files));
        }
        let file_name = field.file_name().map(str::to_owned);
        let content_type = field.content_type().map(|mime| mime.to_string());
        let data = field.bytes().await.map_err(HttpError::InvalidMultipart)?;
        if data.len() > limits.max_file_size {
            return Err(HttpError::MaxFileSizeExceeded {
                limit: limits.max_file_size_display(),
                filename: file_name.unwrap_or(field_name),
            });
        }
        files.insert(
            field_name.clone(),
            UploadedFile {
                field_name,
                file_name,
                content_type,
                data,
            },
        );
    }
    Ok(files)
}

/// Walks a dot-separated map path into the operations value.
///
/// String segments select object keys; integer segments index into arrays,
/// which is how batch items are addressed (`0.variables.file`).
fn resolve_path<'a>(operations: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    let mut current = operations;
    for segment in path.split('.') {
        current = match current {
            Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            Value::Object(map) => map.get_mut(segment)?,
            _ => return None,
        };
    }
    Some(current)
}
