// ABOUTME: Typed proxy and upstream configuration, including option inheritance.
// ABOUTME: Mirrors the JSON config file; resolution helpers turn strings into enums.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::duration;
use crate::error::ConfigError;

/// Default request timeout for upstream calls.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Default grace period for draining HTTP on shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Root of the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub servers: BTreeMap<String, UpstreamConfig>,
}

/// Proxy-wide settings for the front-end listener.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(rename = "baseURL", default)]
    pub base_url: String,
    #[serde(default)]
    pub addr: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(
        rename = "shutdownTimeout",
        default,
        with = "duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub shutdown_timeout: Option<Duration>,
    #[serde(default)]
    pub options: OptionsConfig,
}

impl ProxyConfig {
    /// The frontend framing every route speaks.
    pub fn frontend_kind(&self) -> Result<FrontendKind, ConfigError> {
        match self.kind.as_deref() {
            None | Some("") => Ok(FrontendKind::Sse),
            Some(other) => other.parse(),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT)
    }

    /// Socket address to bind; a bare `:port` listens on all interfaces.
    pub fn listen_addr(&self) -> String {
        if self.addr.starts_with(':') {
            format!("0.0.0.0{}", self.addr)
        } else {
            self.addr.clone()
        }
    }

    /// Path component of `baseURL`, used as the prefix for every route.
    pub fn base_path(&self) -> String {
        match reqwest::Url::parse(&self.base_url) {
            Ok(url) => url.path().to_string(),
            Err(_) => self.base_url.clone(),
        }
    }
}

/// Settings for one upstream server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(
        default,
        with = "duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub options: OptionsConfig,
}

impl UpstreamConfig {
    /// Config for a subprocess upstream.
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            transport: Some(TransportKind::Stdio.to_string()),
            command: Some(command.into()),
            args,
            ..Self::default()
        }
    }

    /// Config for a URL-based upstream.
    pub fn remote(kind: TransportKind, url: impl Into<String>) -> Self {
        Self {
            transport: Some(kind.to_string()),
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Resolve the configured transport string.
    pub fn transport_kind(&self) -> Result<TransportKind, ConfigError> {
        match self.transport.as_deref() {
            Some(kind) if !kind.is_empty() => kind.parse(),
            _ => Ok(self.detect_transport()),
        }
    }

    /// Guess the transport from which connection fields are present.
    pub fn detect_transport(&self) -> TransportKind {
        if self.command.as_deref().is_some_and(|c| !c.is_empty()) {
            TransportKind::Stdio
        } else if self.url.as_deref().is_some_and(|u| !u.is_empty()) {
            TransportKind::Sse
        } else {
            TransportKind::Stdio
        }
    }

    pub fn request_timeout(&self) -> Duration {
        match self.timeout {
            Some(t) if !t.is_zero() => t,
            _ => DEFAULT_UPSTREAM_TIMEOUT,
        }
    }
}

/// Options attachable to both the proxy and each upstream.
///
/// Every field is optional so an upstream can tell "unset" apart from an
/// explicit value when inheriting from the proxy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionsConfig {
    #[serde(rename = "panicIfInvalid", default, skip_serializing_if = "Option::is_none")]
    pub panic_if_invalid: Option<bool>,
    #[serde(rename = "logEnabled", default, skip_serializing_if = "Option::is_none")]
    pub log_enabled: Option<bool>,
    #[serde(rename = "authTokens", default, skip_serializing_if = "Option::is_none")]
    pub auth_tokens: Option<Vec<String>>,
    #[serde(rename = "toolFilter", default, skip_serializing_if = "Option::is_none")]
    pub tool_filter: Option<ToolFilterConfig>,
}

impl OptionsConfig {
    /// Fill every unset field from `defaults`, leaving set fields alone.
    pub fn inherit_from(&self, defaults: &OptionsConfig) -> OptionsConfig {
        OptionsConfig {
            panic_if_invalid: self.panic_if_invalid.or(defaults.panic_if_invalid),
            log_enabled: self.log_enabled.or(defaults.log_enabled),
            auth_tokens: self
                .auth_tokens
                .clone()
                .or_else(|| defaults.auth_tokens.clone()),
            tool_filter: self
                .tool_filter
                .clone()
                .or_else(|| defaults.tool_filter.clone()),
        }
    }

    pub fn panic_if_invalid(&self) -> bool {
        self.panic_if_invalid.unwrap_or(false)
    }

    pub fn log_enabled(&self) -> bool {
        self.log_enabled.unwrap_or(false)
    }

    /// Configured bearer tokens, empty when none.
    pub fn tokens(&self) -> &[String] {
        self.auth_tokens.as_deref().unwrap_or(&[])
    }
}

/// Allow/block rule restricting which tools are republished.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFilterConfig {
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub list: Vec<String>,
}

impl ToolFilterConfig {
    pub fn allow<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode: ToolFilterMode::Allow.to_string(),
            list: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn block<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode: ToolFilterMode::Block.to_string(),
            list: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse the mode case-insensitively; `None` for anything unrecognized.
    pub fn parsed_mode(&self) -> Option<ToolFilterMode> {
        match self.mode.to_ascii_lowercase().as_str() {
            "allow" => Some(ToolFilterMode::Allow),
            "block" => Some(ToolFilterMode::Block),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolFilterMode {
    Allow,
    Block,
}

impl fmt::Display for ToolFilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolFilterMode::Allow => f.write_str("allow"),
            ToolFilterMode::Block => f.write_str("block"),
        }
    }
}

/// How the proxy talks to an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Stdio,
    Sse,
    StreamableHttp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Stdio => f.write_str("stdio"),
            TransportKind::Sse => f.write_str("sse"),
            TransportKind::StreamableHttp => f.write_str("streamable-http"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdio" => Ok(TransportKind::Stdio),
            "sse" => Ok(TransportKind::Sse),
            "streamable-http" => Ok(TransportKind::StreamableHttp),
            other => Err(ConfigError::Invalid(format!(
                "unsupported transport type: {}",
                other
            ))),
        }
    }
}

/// How each front-end route frames MCP traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontendKind {
    Sse,
    StreamableHttp,
}

impl fmt::Display for FrontendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrontendKind::Sse => f.write_str("sse"),
            FrontendKind::StreamableHttp => f.write_str("streamable-http"),
        }
    }
}

impl FromStr for FrontendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sse" => Ok(FrontendKind::Sse),
            "streamable-http" => Ok(FrontendKind::StreamableHttp),
            other => Err(ConfigError::Invalid(format!(
                "unsupported transport type: {}",
                other
            ))),
        }
    }
}
