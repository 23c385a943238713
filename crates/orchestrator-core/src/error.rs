use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("API error: {message} (status: {status})")]
    Api { status: u16, message: String },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Stream error: {0}")]
    Stream(String),

    /// A tool-argument schema mismatch (expected array got string, null for
    /// an integer, etc). Earns one free immediate retry with an injected hint.
    #[error("Tool argument error in {tool}: {message}")]
    ToolArgument { tool: String, message: String },

    /// The tool ran (via the tool-server) and reported failure. Not retried
    /// at the LLM-client layer; surfaced to the agent in its next prompt.
    #[error("Tool '{tool}' failed: {message}")]
    ToolServer { tool: String, message: String },

    #[error("Persistence error at {path}: {message}")]
    Persistence { path: String, message: String },

    /// A Hierarchy Manager invariant violation (stack/hierarchy desync,
    /// pop mismatch, dangling parent reference).
    #[error("Hierarchy invariant violated: {0}")]
    Hierarchy(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("{kind} timeout")]
    Timeout { kind: TimeoutKind },

    #[error("Cancelled")]
    Cancelled,

    #[error("Unknown error: {0}")]
    Unknown(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Which of the LLM Client's three enforced timeouts fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    FirstChunk,
    InterChunk,
    Overall,
}

impl std::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TimeoutKind::FirstChunk => "first_chunk",
            TimeoutKind::InterChunk => "inter_chunk",
            TimeoutKind::Overall => "overall",
        };
        write!(f, "{}", s)
    }
}

impl Error {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::RateLimit(message.into())
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream(message.into())
    }

    pub fn tool_argument(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolArgument {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn tool_server(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolServer {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn persistence(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Persistence {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn hierarchy(message: impl Into<String>) -> Self {
        Self::Hierarchy(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn timeout(kind: TimeoutKind) -> Self {
        Self::Timeout { kind }
    }

    /// Whether the LLM Client's retry policy should retry this error at all
    /// (§4.7: "All errors retry" up to max_retries, modulo auth errors which
    /// are not transient).
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::Auth(_) | Error::Cancelled)
    }

    pub fn is_auth_error(&self) -> bool {
        matches!(self, Error::Auth(_))
    }

    /// Whether this error belongs to the tool-argument-type-error class that
    /// earns one free immediate retry with an injected hint (§4.7).
    pub fn is_tool_argument_error(&self) -> bool {
        matches!(self, Error::ToolArgument { .. })
    }

    /// A short, stable error-class tag used to generate the contextual retry
    /// hint described in §4.7 (null-value, JSON-parse, unknown-tool,
    /// rate-limit, auth, ...).
    pub fn hint_class(&self) -> &'static str {
        match self {
            Error::ToolArgument { .. } => "tool-argument",
            Error::Serialization(_) => "json-parse",
            Error::RateLimit(_) => "rate-limit",
            Error::Auth(_) => "auth",
            Error::Timeout { .. } => "timeout",
            Error::Network(_) => "network",
            Error::InvalidRequest(_) => "unknown-tool",
            _ => "general",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::timeout(TimeoutKind::Overall)
        } else {
            Error::network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::api(400, "Bad request");
        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("Bad request"));
    }

    #[test]
    fn test_is_retryable() {
        assert!(Error::network("timeout").is_retryable());
        assert!(Error::rate_limit("too many requests").is_retryable());
        assert!(Error::stream("transport error").is_retryable());
        assert!(!Error::auth("invalid key").is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn test_tool_argument_error_class() {
        let err = Error::tool_argument("search", "expected array, got string");
        assert!(err.is_tool_argument_error());
        assert_eq!(err.hint_class(), "tool-argument");
    }

    #[test]
    fn test_timeout_kind_display() {
        assert_eq!(Error::timeout(TimeoutKind::FirstChunk).to_string(), "first_chunk timeout");
        assert_eq!(Error::timeout(TimeoutKind::InterChunk).to_string(), "inter_chunk timeout");
        assert_eq!(Error::timeout(TimeoutKind::Overall).to_string(), "overall timeout");
    }
}
