//! Error taxonomy for the transport layer.
//!
//! Two levels exist side by side. [`HttpError`] covers failures to read the
//! request at all (wrong content type, malformed JSON, multipart protocol
//! violations) and renders as a plain-text 4xx body. Everything downstream of
//! a readable operation payload is expressed as GraphQL errors inside a JSON
//! response body, built through [`crate::graphql::Error`].

use apollo_compiler::validation::DiagnosticList;
use bytesize::ByteSize;
use displaydoc::Display;
use serde_json_bytes::Value;
use thiserror::Error;

use crate::graphql;
use crate::graphql::Location;
use crate::json_ext::Object;

/// A failure to read the incoming HTTP request, raised before any GraphQL
/// processing starts.
#[derive(Debug, Error, Display)]
pub(crate) enum HttpError {
    /// Posted content must be of type application/json or multipart/form-data
    UnsupportedContentType,

    /// Request body cannot be empty
    EmptyBody,

    /// Request body is not a valid JSON
    InvalidJson(serde_json::Error),

    /// Operation data should be a JSON object
    ScalarOperationData,

    /// Content length header is missing or incorrect
    ContentLength,

    /// Request body is too large
    PayloadTooLarge,

    /// Invalid multipart request: {0}
    InvalidMultipart(multer::Error),

    /// Request is missing the 'operations' multipart field
    MissingOperationsField,

    /// Request 'operations' multipart field is not a valid JSON
    InvalidOperationsJson(serde_json::Error),

    /// Request is missing the 'map' multipart field
    MissingMapField,

    /// Request 'map' multipart field is not a valid JSON
    InvalidMapJson(serde_json::Error),

    /// Invalid path '{0}' found inside the 'map' multipart field
    InvalidMapPath(String),

    /// Path '{0}' in the 'map' multipart field does not point to a null value
    NonNullPlaceholder(String),

    /// Request is missing the file for multipart field '{0}'
    MissingFile(String),

    /// Exceeded the limit of {0} file uploads in a single request
    MaxFilesExceeded(usize),

    /// Exceeded the file size limit of {limit} on file '{filename}'
    MaxFileSizeExceeded { limit: ByteSize, filename: String },
}

impl HttpError {
    pub(crate) fn status(&self) -> http::StatusCode {
        match self {
            HttpError::PayloadTooLarge
            | HttpError::MaxFilesExceeded(_)
            | HttpError::MaxFileSizeExceeded { .. } => http::StatusCode::PAYLOAD_TOO_LARGE,
            _ => http::StatusCode::BAD_REQUEST,
        }
    }
}

/// Syntax diagnostics reported while parsing an operation document.
#[derive(Debug)]
pub(crate) struct ParseErrors {
    pub(crate) errors: DiagnosticList,
}

impl ParseErrors {
    pub(crate) fn into_graphql_errors(self) -> Vec<graphql::Error> {
        self.errors
            .iter()
            .map(|diagnostic| {
                graphql::Error::builder()
                    .message(diagnostic.error.to_string())
                    .locations(
                        diagnostic
                            .line_column_range()
                            .map(|location| {
                                vec![Location {
                                    line: location.start.line as u32,
                                    column: location.start.column as u32,
                                }]
                            })
                            .unwrap_or_default(),
                    )
                    .extension_code("GRAPHQL_PARSING_FAILED")
                    .build()
            })
            .collect()
    }
}

impl graphql::Error {
    /// Builds a GraphQL error out of an arbitrary Rust error value.
    ///
    /// With `debug` set, the error carries the conventional debug-server
    /// extension shape: `extensions.exception` holds the error type and a
    /// `stacktrace` listing the error and each of its sources, outermost
    /// first. With `debug` unset only the message survives.
    pub fn from_exception<E>(error: &E, debug: bool) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        let mut builder = Self::builder()
            .message(error.to_string())
            .extension_code("INTERNAL_SERVER_ERROR");
        if debug {
            let mut exception = Object::new();
            let type_name = std::any::type_name::<E>();
            if !type_name.starts_with("dyn ") {
                exception.insert("type", Value::String(type_name.into()));
            }
            let mut stacktrace = vec![Value::String(error.to_string().into())];
            let mut source = error.source();
            while let Some(cause) = source {
                stacktrace.push(Value::String(cause.to_string().into()));
                source = cause.source();
            }
            exception.insert("stacktrace", Value::Array(stacktrace));
            builder = builder.extension("exception", Value::Object(exception));
        }
        builder.build()
    }
}
