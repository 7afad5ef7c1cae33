//! Content negotiation and request body decoding.
//!
//! The reader turns raw request headers and bytes into operation payloads,
//! without interpreting them: shape validation of individual operations
//! happens later, in the pipeline, so that one malformed item of a batch does
//! not take the whole request down.

use http::HeaderMap;
use http::header::ACCEPT;
use http::header::CONTENT_TYPE;
use mediatype::MediaType;
use mediatype::MediaTypeList;
use mediatype::ReadParams;
use mediatype::names::BOUNDARY;
use mediatype::names::FORM_DATA;
use mediatype::names::HTML;
use mediatype::names::JSON;
use mediatype::names::MULTIPART;
use mediatype::names::TEXT;
use mediatype::names::_STAR;
use serde_json_bytes::Value;

use crate::error::HttpError;

/// What the request body claims to be, per its `Content-Type` header.
#[derive(Debug)]
pub(crate) enum ContentKind {
    Json,
    Multipart { boundary: String },
}

/// One decoded request body: a single operation payload or an ordered batch.
#[derive(Debug)]
pub(crate) enum Payload {
    Single(Value),
    Batch(Vec<Value>),
}

/// Classifies the `Content-Type` of a POST body.
///
/// `application/json` (parameters ignored) and `multipart/form-data` (with a
/// mandatory boundary) are the only supported types.
pub(crate) fn negotiate_content_type(headers: &HeaderMap) -> Result<ContentKind, HttpError> {
    let media_type = headers
        .get(CONTENT_TYPE)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| MediaType::parse(header).ok())
        .ok_or(HttpError::UnsupportedContentType)?;

    if media_type.ty == mediatype::names::APPLICATION && media_type.subty == JSON {
        return Ok(ContentKind::Json);
    }
    if media_type.ty == MULTIPART && media_type.subty == FORM_DATA {
        let boundary = media_type
            .get_param(BOUNDARY)
            .ok_or(HttpError::InvalidMultipart(multer::Error::NoBoundary))?;
        return Ok(ContentKind::Multipart {
            boundary: boundary.unquoted_str().to_string(),
        });
    }
    Err(HttpError::UnsupportedContentType)
}

/// Decodes a JSON request body into operation payloads.
pub(crate) fn decode_json(body: &[u8]) -> Result<Payload, HttpError> {
    if body.is_empty() {
        return Err(HttpError::EmptyBody);
    }
    let value: Value = serde_json::from_slice(body).map_err(HttpError::InvalidJson)?;
    classify(value)
}

/// Splits a decoded JSON value into single-operation and batch shapes.
///
/// Scalars fail here as a request-level error; objects pass through and have
/// their shape checked per operation, so batch items fail independently.
pub(crate) fn classify(value: Value) -> Result<Payload, HttpError> {
    match value {
        Value::Array(operations) => Ok(Payload::Batch(operations)),
        object @ Value::Object(_) => Ok(Payload::Single(object)),
        _ => Err(HttpError::ScalarOperationData),
    }
}

/// True when the `Accept` header admits an HTML response.
///
/// A missing header and `*/*` both count as acceptance, matching how browsers
/// reach the explorer.
pub(crate) fn accepts_html(headers: &HeaderMap) -> bool {
    let mut present = false;
    let accepted = headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|header| {
            present = true;
            header.to_str().ok()
        })
        .flat_map(MediaTypeList::new)
        .flatten()
        .any(|media_type| {
            (media_type.ty == TEXT && media_type.subty == HTML)
                || (media_type.ty == _STAR && media_type.subty == _STAR)
        });
    accepted || !present
}
