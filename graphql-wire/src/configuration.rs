//! Server configuration.

use std::time::Duration;

use bytesize::ByteSize;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

/// Configuration for a GraphQL server binding.
///
/// Every knob has a production-safe default; `Configuration::default()` is a
/// working setup. Unknown fields are rejected when deserializing.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct Configuration {
    /// Attach exception details (error type and source chain) to the
    /// extensions of errors built from Rust error values. Keep disabled in
    /// production.
    pub debug: bool,

    /// Serve introspection queries (`__schema` / `__type` root fields).
    pub introspection: bool,

    /// Maximum size in bytes of an HTTP request body.
    pub http_max_request_bytes: usize,

    /// Limits applied to multipart file uploads.
    pub uploads: UploadLimits,

    /// WebSocket subscription behavior.
    pub subscriptions: SubscriptionConfig,

    /// Cross-origin request handling for the HTTP route.
    pub cors: Cors,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            debug: false,
            introspection: true,
            http_max_request_bytes: 2_000_000,
            uploads: UploadLimits::default(),
            subscriptions: SubscriptionConfig::default(),
            cors: Cors::default(),
        }
    }
}

/// Limits applied while decoding a multipart upload request.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct UploadLimits {
    /// Maximum number of file parts in one request.
    pub max_files: usize,

    /// Maximum size in bytes of a single file part.
    pub max_file_size: usize,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_files: 5,
            max_file_size: 5_242_880, // 5mb
        }
    }
}

impl UploadLimits {
    pub(crate) fn max_file_size_display(&self) -> ByteSize {
        ByteSize::b(self.max_file_size as u64)
    }
}

/// WebSocket subscription behavior.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct SubscriptionConfig {
    /// Accept WebSocket upgrades on the GraphQL route.
    pub enabled: bool,

    /// How long a client may take to send `connection_init` after the
    /// WebSocket opens before the connection is closed (default: 5s).
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub connection_init_timeout: Duration,

    /// Keep-alive cadence: `ka` messages on the graphql-ws protocol, `ping`
    /// messages (with liveness enforcement) on graphql-transport-ws.
    /// `null` disables keep-alive entirely (default: 10s).
    #[serde(with = "humantime_serde")]
    #[schemars(with = "Option<String>")]
    pub keepalive_interval: Option<Duration>,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            connection_init_timeout: Duration::from_secs(5),
            keepalive_interval: Some(Duration::from_secs(10)),
        }
    }
}

/// Cross-origin request handling for the HTTP route.
///
/// No CORS layer is mounted unless any origin is allowed or an origin list is
/// configured.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct Cors {
    /// Allow requests from any origin. Mutually exclusive with
    /// `allow_credentials`.
    pub allow_any_origin: bool,

    /// The origins allowed to send cross-origin requests.
    pub origins: Vec<String>,

    /// Allow cookies and other credentials on cross-origin requests.
    pub allow_credentials: bool,
}

impl Cors {
    /// Builds the CORS layer for the router, or `None` when no cross-origin
    /// access is configured.
    pub(crate) fn into_layer(self) -> Result<Option<tower_http::cors::CorsLayer>, String> {
        if !self.allow_any_origin && self.origins.is_empty() {
            return Ok(None);
        }
        if self.allow_any_origin && self.allow_credentials {
            return Err(
                "'allow_any_origin: true' is mutually exclusive with 'allow_credentials: true'"
                    .to_string(),
            );
        }

        let layer = tower_http::cors::CorsLayer::new()
            .allow_methods([http::Method::GET, http::Method::POST])
            .allow_headers([http::header::CONTENT_TYPE])
            .allow_credentials(self.allow_credentials);
        let layer = if self.allow_any_origin {
            layer.allow_origin(tower_http::cors::Any)
        } else {
            let origins = self
                .origins
                .iter()
                .map(|origin| {
                    origin.parse::<http::HeaderValue>().map_err(|err| {
                        format!("CORS origin '{origin}' is not a valid header value: {err}")
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            layer.allow_origin(origins)
        };
        Ok(Some(layer))
    }
}
