//! HTTP transport.
//!
//! [`reader`] negotiates content types and decodes operation payloads,
//! [`multipart`] implements the GraphQL multipart request protocol for file
//! uploads, [`service`] mounts everything as an axum route, and [`blocking`]
//! adapts the same semantics to synchronous callers.

mod blocking;
pub(crate) mod multipart;
pub(crate) mod reader;
mod service;

pub use blocking::Blocking;
pub use multipart::UploadedFile;
pub use multipart::Uploads;
