//! GraphQL operation payloads.

use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;
use serde_json_bytes::Value;

use crate::graphql::Error;
use crate::json_ext::Object;

/// Extension code attached to payload shape errors.
pub(crate) const INVALID_GRAPHQL_REQUEST: &str = "INVALID_GRAPHQL_REQUEST";

/// A GraphQL operation payload as it appears on the wire, for both HTTP
/// bodies and WebSocket `subscribe`/`start` messages.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// The GraphQL operation (e.g., query, mutation) string.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub query: Option<String>,

    /// The (optional) GraphQL operation name.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub operation_name: Option<String>,

    /// The (optional) GraphQL variables in the form of a JSON object.
    #[serde(
        skip_serializing_if = "Object::is_empty",
        default,
        deserialize_with = "deserialize_null_default"
    )]
    pub variables: Object,

    /// The (optional) GraphQL `extensions` of a GraphQL request.
    #[serde(skip_serializing_if = "Object::is_empty", default)]
    pub extensions: Object,
}

// NOTE: this deserialize helper is used to transform `null` to Default::default()
fn deserialize_null_default<'de, D, T: Default + Deserialize<'de>>(
    deserializer: D,
) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
{
    <Option<T>>::deserialize(deserializer).map(|x| x.unwrap_or_default())
}

#[buildstructor::buildstructor]
impl Request {
    /// Returns a builder that builds a GraphQL [`Request`] from its components.
    ///
    /// Builder methods:
    ///
    /// * `.query(impl Into<`[`String`]`>)`
    ///   Optional.
    ///   Sets [`Request::query`].
    ///
    /// * `.operation_name(impl Into<`[`String`]`>)`
    ///   Optional.
    ///   Sets [`Request::operation_name`].
    ///
    /// * `.variables(impl Into<`[`serde_json_bytes::Map`]`<`[`ByteString`]`, `[`Value`]`>>)`
    ///   Optional.
    ///   Sets the entire `variables` map.
    ///
    /// * `.variable(impl Into<`[`ByteString`]`>, impl Into<`[`Value`]`>)`
    ///   Optional, may be called multiple times.
    ///   Adds one entry to the `variables` map.
    ///
    /// * `.extensions(impl Into<`[`serde_json_bytes::Map`]`<`[`ByteString`]`, `[`Value`]`>>)`
    ///   Optional.
    ///   Sets the entire `extensions` map.
    ///
    /// * `.extension(impl Into<`[`ByteString`]`>, impl Into<`[`Value`]`>)`
    ///   Optional, may be called multiple times.
    ///   Adds one entry to the `extensions` map.
    ///
    /// * `.build()`
    ///   Finishes the builder and returns a GraphQL [`Request`].
    #[builder(visibility = "pub")]
    fn new(
        query: Option<String>,
        operation_name: Option<String>,
        // Skip the `Object` type alias in order to use buildstructor's map special-casing
        variables: JsonMap<ByteString, Value>,
        extensions: JsonMap<ByteString, Value>,
    ) -> Self {
        Self {
            query,
            operation_name,
            variables,
            extensions,
        }
    }

    /// Validates a decoded JSON value as an operation payload.
    ///
    /// The payload must be an object carrying a non-empty string `query`, an
    /// optional string `operationName` and optional object-or-null
    /// `variables`. Everything else fails with the documented message.
    pub(crate) fn from_operation_value(value: Value) -> Result<Self, Error> {
        let Value::Object(mut map) = value else {
            return Err(shape_error("Operation data should be a JSON object"));
        };

        let query = match map.remove("query") {
            Some(Value::String(query)) if !query.as_str().is_empty() => {
                Some(query.as_str().to_string())
            }
            _ => return Err(shape_error("The query must be a string.")),
        };

        let operation_name = match map.remove("operationName") {
            None | Some(Value::Null) => None,
            Some(Value::String(name)) => Some(name.as_str().to_string()),
            Some(other) => {
                return Err(shape_error(format!(
                    "\"{}\" is not a valid operation name.",
                    render(&other)
                )));
            }
        };

        let variables = match map.remove("variables") {
            None | Some(Value::Null) => Object::new(),
            Some(Value::Object(variables)) => variables,
            Some(_) => return Err(shape_error("Query variables must be a null or an object.")),
        };

        let extensions = match map.remove("extensions") {
            Some(Value::Object(extensions)) => extensions,
            _ => Object::new(),
        };

        Ok(Self {
            query,
            operation_name,
            variables,
            extensions,
        })
    }
}

fn shape_error(message: impl Into<String>) -> Error {
    Error::builder()
        .message(message)
        .extension_code(INVALID_GRAPHQL_REQUEST)
        .build()
}

/// Compact JSON rendering of a value, for error messages.
fn render(value: &Value) -> String {
    serde_json::to_string(value).expect("JSON values are serializable")
}
