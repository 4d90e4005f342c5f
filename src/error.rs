// Standardized error types, matching the taxonomy carried in JSON-RPC
// `error.data.code` and in REST `{ error, code }` bodies.

use thiserror::Error;

/// Main error type for the kotadb library.
#[derive(Error, Debug)]
pub enum KotaError {
    #[error("missing credentials")]
    AuthMissingKey,

    #[error("malformed authorization header")]
    AuthInvalidHeader,

    #[error("invalid or revoked key")]
    AuthInvalidKey,

    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("accept header does not permit both json and event-stream")]
    NotAcceptable,

    #[error("origin not allowed: {0}")]
    ForbiddenOrigin(String),

    #[error("upstream auth failure: {0}")]
    UpstreamAuth(String),

    #[error("upstream rate limit: {0}")]
    UpstreamRateLimit(String),

    #[error("upstream not found: {0}")]
    UpstreamNotFound(String),

    #[error("security: {0}")]
    Security(String),

    #[error("cancelled")]
    Cancelled,

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("internal: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, KotaError>;

/// Taxonomy code as carried in `error.data.code` / REST `{code}`.
impl KotaError {
    pub fn taxonomy_code(&self) -> &'static str {
        match self {
            KotaError::AuthMissingKey => "AUTH_MISSING_KEY",
            KotaError::AuthInvalidHeader => "AUTH_INVALID_HEADER",
            KotaError::AuthInvalidKey => "AUTH_INVALID_KEY",
            KotaError::RateLimited { .. } => "RATE_LIMITED",
            KotaError::NotFound(_) => "NOT_FOUND",
            KotaError::InvalidParams(_) => "INVALID_PARAMS",
            KotaError::NotAcceptable => "NOT_ACCEPTABLE",
            KotaError::ForbiddenOrigin(_) => "FORBIDDEN_ORIGIN",
            KotaError::UpstreamAuth(_) => "UPSTREAM_AUTH",
            KotaError::UpstreamRateLimit(_) => "UPSTREAM_RATE_LIMIT",
            KotaError::UpstreamNotFound(_) => "UPSTREAM_NOT_FOUND",
            KotaError::Security(_) => "SECURITY",
            _ => "INTERNAL",
        }
    }

    /// JSON-RPC 2.0 error code for this taxonomy entry.
    pub fn jsonrpc_code(&self) -> i64 {
        match self {
            KotaError::InvalidParams(_) | KotaError::NotFound(_) => -32602,
            _ => -32603,
        }
    }

    /// HTTP status code for this taxonomy entry.
    pub fn http_status(&self) -> u16 {
        match self {
            KotaError::AuthMissingKey
            | KotaError::AuthInvalidHeader
            | KotaError::AuthInvalidKey => 401,
            KotaError::RateLimited { .. } => 429,
            KotaError::NotFound(_) => 404,
            KotaError::InvalidParams(_) => 400,
            KotaError::NotAcceptable => 406,
            KotaError::ForbiddenOrigin(_) => 403,
            _ => 500,
        }
    }

    pub fn to_user_string(&self) -> String {
        self.to_string()
    }
}

impl From<String> for KotaError {
    fn from(s: String) -> Self {
        KotaError::Internal(s)
    }
}

impl From<tokio::task::JoinError> for KotaError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            KotaError::Cancelled
        } else {
            KotaError::Internal(err.to_string())
        }
    }
}

impl From<KotaError> for String {
    fn from(err: KotaError) -> Self {
        err.to_string()
    }
}
