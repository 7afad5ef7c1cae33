//! JSON types and helpers shared across the request/response surface.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;
use serde_json_bytes::Value;

/// A JSON object as used in GraphQL payloads: insertion-ordered, cheap to clone.
pub type Object = Map<ByteString, Value>;

/// One segment of a GraphQL error path.
///
/// Paths address a field within [`Response::data`][crate::graphql::Response]:
/// string segments select object keys, integer segments index into lists.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathElement {
    /// An index into a list value.
    Index(usize),
    /// A key within an object value.
    Key(String),
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElement::Index(index) => write!(f, "{index}"),
            PathElement::Key(key) => write!(f, "{key}"),
        }
    }
}

/// A GraphQL error path, e.g. `hero/friends/1/name`.
///
/// Serializes as the JSON array of segments mandated by the GraphQL spec.
#[derive(Debug, Clone, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn empty() -> Self {
        Path(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.0.iter()
    }

    /// Returns a new path with `element` appended.
    pub fn join(&self, element: PathElement) -> Self {
        let mut segments = self.0.clone();
        segments.push(element);
        Path(segments)
    }
}

impl<T: AsRef<str>> From<T> for Path {
    fn from(value: T) -> Self {
        Path(
            value
                .as_ref()
                .split('/')
                .filter(|segment| !segment.is_empty())
                .map(|segment| {
                    if let Ok(index) = segment.parse::<usize>() {
                        PathElement::Index(index)
                    } else {
                        PathElement::Key(segment.to_string())
                    }
                })
                .collect(),
        )
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in &self.0 {
            write!(f, "/{element}")?;
        }
        Ok(())
    }
}
