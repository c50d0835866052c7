use std::fmt;

/// Errors surfaced by the admission, scheduling, and recording pipeline.
///
/// Every variant maps to exactly one HTTP status and one client-safe message
/// via [`GatewayError::http_status`] / [`GatewayError::client_message`] — no
/// internal identifier (account id, store key, stack trace) is ever part of
/// the client-facing text.
#[derive(Debug)]
pub enum GatewayError {
    MalformedRequest(String),
    Unauthorized,
    Disabled,
    Expired,
    Forbidden,
    ModelNotAllowed,
    ClientNotAllowed,
    TokenLimitExceeded,
    DailyCostExceeded,
    RateLimited,
    ConcurrencyExceeded,
    NoAvailableAccounts { requested_model: Option<String> },
    GroupMisconfigured,
    UpstreamError(String),
    InternalError(String),
}

impl GatewayError {
    /// HTTP status this error maps to per the gateway's exit/error code table.
    pub fn http_status(&self) -> u16 {
        match self {
            GatewayError::MalformedRequest(_) => 400,
            GatewayError::Unauthorized => 401,
            GatewayError::Disabled
            | GatewayError::Expired
            | GatewayError::Forbidden
            | GatewayError::ModelNotAllowed
            | GatewayError::ClientNotAllowed => 403,
            GatewayError::TokenLimitExceeded
            | GatewayError::DailyCostExceeded
            | GatewayError::RateLimited => 429,
            GatewayError::ConcurrencyExceeded => 429,
            GatewayError::NoAvailableAccounts { .. } | GatewayError::GroupMisconfigured => 503,
            GatewayError::UpstreamError(_) => 502,
            GatewayError::InternalError(_) => 500,
        }
    }

    /// Client-facing message. Never includes internal identifiers, store
    /// keys, or distinguishes "unknown key" from "wrong hash" — see the
    /// security-logging note on [`crate::admission`].
    pub fn client_message(&self) -> String {
        match self {
            GatewayError::MalformedRequest(msg) => format!("malformed request: {msg}"),
            GatewayError::Unauthorized => "invalid api key".to_string(),
            GatewayError::Disabled => "api key is disabled".to_string(),
            GatewayError::Expired => "api key has expired".to_string(),
            GatewayError::Forbidden => "api key is not permitted for this platform".to_string(),
            GatewayError::ModelNotAllowed => "model is not allowed for this api key".to_string(),
            GatewayError::ClientNotAllowed => "client is not allowed for this api key".to_string(),
            GatewayError::TokenLimitExceeded => "token limit exceeded".to_string(),
            GatewayError::DailyCostExceeded => "daily cost limit exceeded".to_string(),
            GatewayError::RateLimited => "rate limit exceeded, try again later".to_string(),
            GatewayError::ConcurrencyExceeded => "concurrency limit exceeded".to_string(),
            GatewayError::NoAvailableAccounts { requested_model } => match requested_model {
                Some(model) => format!("no account available for model {model}"),
                None => "no account available".to_string(),
            },
            GatewayError::GroupMisconfigured => "account group is misconfigured".to_string(),
            GatewayError::UpstreamError(_) => "upstream error".to_string(),
            GatewayError::InternalError(_) => "internal error".to_string(),
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::MalformedRequest(msg) => write!(f, "malformed request: {msg}"),
            GatewayError::Unauthorized => write!(f, "unauthorized"),
            GatewayError::Disabled => write!(f, "key disabled"),
            GatewayError::Expired => write!(f, "key expired"),
            GatewayError::Forbidden => write!(f, "forbidden"),
            GatewayError::ModelNotAllowed => write!(f, "model not allowed"),
            GatewayError::ClientNotAllowed => write!(f, "client not allowed"),
            GatewayError::TokenLimitExceeded => write!(f, "token limit exceeded"),
            GatewayError::DailyCostExceeded => write!(f, "daily cost exceeded"),
            GatewayError::RateLimited => write!(f, "rate limited"),
            GatewayError::ConcurrencyExceeded => write!(f, "concurrency exceeded"),
            GatewayError::NoAvailableAccounts { requested_model } => match requested_model {
                Some(model) => write!(f, "no available accounts for model {model}"),
                None => write!(f, "no available accounts"),
            },
            GatewayError::GroupMisconfigured => write!(f, "account group misconfigured"),
            GatewayError::UpstreamError(msg) => write!(f, "upstream error: {msg}"),
            GatewayError::InternalError(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for GatewayError {}
