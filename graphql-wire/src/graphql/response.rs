//! GraphQL execution results.

use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;
use serde_json_bytes::Value;

use crate::graphql::Error;
use crate::json_ext::Object;

/// A GraphQL response as it is serialized onto the wire.
///
/// The `data` key carries the distinction mandated by the GraphQL spec:
/// absent when execution never reached field resolution, explicitly `null`
/// when resolution started and failed at the root.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Response {
    /// The response data.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,

    /// The errors raised while servicing the operation.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<Error>,

    /// The extensions of this response.
    #[serde(skip_serializing_if = "Object::is_empty", default)]
    pub extensions: Object,
}

#[buildstructor::buildstructor]
impl Response {
    /// Returns a builder that builds a GraphQL [`Response`] from its components.
    ///
    /// Builder methods:
    ///
    /// * `.data(impl Into<`[`Value`]`>)`
    ///   Optional.
    ///   Sets [`Response::data`].
    ///
    /// * `.errors(impl Into<`[`Vec`]`<`[`Error`]`>>)`
    ///   Optional.
    ///   Sets the entire `Vec` of [`Response::errors`].
    ///
    /// * `.error(impl Into<`[`Error`]`>)`
    ///   Optional, may be called multiple times.
    ///   Adds one error at the end of [`Response::errors`].
    ///
    /// * `.extensions(impl Into<`[`serde_json_bytes::Map`]`<`[`ByteString`]`, `[`Value`]`>>)`
    ///   Optional.
    ///   Sets the entire [`Response::extensions`] map.
    ///
    /// * `.extension(impl Into<`[`ByteString`]`>, impl Into<`[`Value`]`>)`
    ///   Optional, may be called multiple times.
    ///   Adds one entry to the [`Response::extensions`] map.
    ///
    /// * `.build()`
    ///   Finishes the builder and returns a GraphQL [`Response`].
    #[builder(visibility = "pub")]
    fn new(
        data: Option<Value>,
        errors: Vec<Error>,
        // Skip the `Object` type alias in order to use buildstructor's map special-casing
        extensions: JsonMap<ByteString, Value>,
    ) -> Self {
        Self {
            data,
            errors,
            extensions,
        }
    }

    /// A response for a failure raised before execution began: no `data` key,
    /// only errors.
    pub fn from_errors(errors: Vec<Error>) -> Self {
        Self {
            data: None,
            errors,
            extensions: Object::default(),
        }
    }
}
