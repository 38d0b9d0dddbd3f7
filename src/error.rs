// ABOUTME: Defines all error types for the proxy using thiserror.
// ABOUTME: Each subsystem has its own error enum, unified under ProxyError.

use std::fmt;

/// Top-level error type for the proxy.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("MCP error: {0}")]
    Mcp(#[from] McpError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Bind error: {0}")]
    Bind(#[from] BindError),

    #[error("Failed to build route for '{name}': {message}")]
    RouteBuild { name: String, message: String },

    #[error("Startup aborted: {0}")]
    Startup(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to fetch config: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("Config fetch returned HTTP {0}")]
    FetchStatus(u16),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Errors from MCP operations.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Upstream '{0}' is not connected")]
    NotConnected(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("RPC error ({code}): {message}")]
    Rpc { code: i32, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from the connection registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Upstream '{0}' already exists")]
    DuplicateName(String),

    #[error("Upstream '{0}' not found")]
    NotFound(String),

    #[error("{0}")]
    ConnectFailed(ConnectFailures),
}

/// Errors from binding an upstream to a proxy unit.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("Proxy unit '{0}' already has an upstream bound")]
    AlreadyBound(String),

    #[error("Proxy unit '{0}' has no upstream bound")]
    NotBound(String),

    #[error("Failed to fetch {kind} from '{name}': {source}")]
    CatalogFetch {
        name: String,
        kind: CatalogKind,
        #[source]
        source: McpError,
    },

    #[error("Failed to register {kind} for '{name}': {source}")]
    Register {
        name: String,
        kind: CatalogKind,
        #[source]
        source: RegisterError,
    },
}

/// Errors from registering an item on a local endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    #[error("item has an empty name")]
    EmptyName,

    #[error("'{0}' is already registered")]
    Duplicate(String),
}

/// The four catalogs an upstream can publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogKind {
    Tools,
    Prompts,
    Resources,
    ResourceTemplates,
}

impl fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CatalogKind::Tools => "tools",
            CatalogKind::Prompts => "prompts",
            CatalogKind::Resources => "resources",
            CatalogKind::ResourceTemplates => "resource templates",
        };
        f.write_str(label)
    }
}

/// A single upstream that failed during a bulk operation.
#[derive(Debug)]
pub struct UpstreamFailure {
    pub name: String,
    pub error: McpError,
}

/// Every failure collected by a concurrent bulk connect, in completion order.
///
/// The first entry is the summary reported to callers; the rest are kept so
/// operators can diagnose several broken upstreams from one startup attempt.
#[derive(Debug)]
pub struct ConnectFailures {
    failures: Vec<UpstreamFailure>,
}

impl ConnectFailures {
    pub(crate) fn new(failures: Vec<UpstreamFailure>) -> Self {
        Self { failures }
    }

    /// The failure that completed first.
    pub fn first(&self) -> Option<&UpstreamFailure> {
        self.failures.first()
    }

    /// All failures, in the order their tasks completed.
    pub fn all(&self) -> &[UpstreamFailure] {
        &self.failures
    }

    /// Names of the upstreams that failed.
    pub fn names(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for ConnectFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failures.first() {
            Some(first) => {
                write!(f, "failed to connect upstream {}: {}", first.name, first.error)?;
                if self.failures.len() > 1 {
                    write!(f, " (and {} more)", self.failures.len() - 1)?;
                }
                Ok(())
            }
            None => f.write_str("no upstream failures"),
        }
    }
}
