// ABOUTME: Loads config from a file path or http(s) URL, fills defaults, validates.
// ABOUTME: Option inheritance is resolved once here so the effective config is inspectable.

use tracing::{debug, info};

use super::{Config, FrontendKind, ToolFilterConfig, TransportKind, UpstreamConfig};
use crate::error::ConfigError;

/// Load, default-fill and validate a config from a path or URL.
pub async fn load(source: &str) -> Result<Config, ConfigError> {
    let text = if source.starts_with("http://") || source.starts_with("https://") {
        fetch(source).await?
    } else {
        tokio::fs::read_to_string(source)
            .await
            .map_err(|e| ConfigError::Read {
                path: source.to_string(),
                source: e,
            })?
    };

    let config = from_json(&text)?;
    config.validate()?;
    info!(
        source = %source,
        upstreams = config.servers.len(),
        "Loaded config"
    );
    Ok(config)
}

async fn fetch(url: &str) -> Result<String, ConfigError> {
    let response = reqwest::get(url).await?;
    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(ConfigError::FetchStatus(status.as_u16()));
    }
    Ok(response.text().await?)
}

/// Parse config JSON and apply defaults. Does not validate.
pub fn from_json(text: &str) -> Result<Config, ConfigError> {
    let mut config: Config = serde_json::from_str(text)?;
    config.apply_defaults();
    Ok(config)
}

impl Config {
    /// Fill in defaulted fields and resolve option inheritance.
    pub fn apply_defaults(&mut self) {
        if self.proxy.kind.as_deref().is_none_or(str::is_empty) {
            self.proxy.kind = Some(FrontendKind::Sse.to_string());
        }

        let proxy_options = self.proxy.options.clone();
        for (name, upstream) in self.servers.iter_mut() {
            upstream.options = upstream.options.inherit_from(&proxy_options);
            if upstream.transport.as_deref().is_none_or(str::is_empty) {
                let detected = upstream.detect_transport();
                debug!(upstream = %name, transport = %detected, "Detected transport");
                upstream.transport = Some(detected.to_string());
            }
        }
    }

    /// Check required fields, transport kinds, and tool filters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let proxy = &self.proxy;
        for (field, value) in [
            ("name", &proxy.name),
            ("addr", &proxy.addr),
            ("baseURL", &proxy.base_url),
            ("version", &proxy.version),
        ] {
            if value.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "invalid proxy config: {} is required",
                    field
                )));
            }
        }
        proxy
            .frontend_kind()
            .map_err(|e| ConfigError::Invalid(format!("invalid proxy config: {}", e)))?;

        for (name, upstream) in &self.servers {
            validate_upstream(name, upstream).map_err(|e| {
                ConfigError::Invalid(format!("invalid server config for {}: {}", name, e))
            })?;
        }
        Ok(())
    }
}

fn validate_upstream(name: &str, config: &UpstreamConfig) -> Result<(), String> {
    if name.is_empty() {
        return Err("server name is required".into());
    }
    if name.contains('/') {
        return Err("server name must not contain '/'".into());
    }

    let kind = config.transport_kind().map_err(|e| match e {
        ConfigError::Invalid(msg) => msg,
        other => other.to_string(),
    })?;
    let has_command = config.command.as_deref().is_some_and(|c| !c.is_empty());
    let has_url = config.url.as_deref().is_some_and(|u| !u.is_empty());
    match kind {
        TransportKind::Stdio => {
            if !has_command {
                return Err("command is required for stdio transport".into());
            }
            if has_url {
                return Err("url must not be set for stdio transport".into());
            }
        }
        TransportKind::Sse | TransportKind::StreamableHttp => {
            if !has_url {
                return Err("url is required for sse/streamable transport".into());
            }
            if has_command {
                return Err("command must not be set for sse/streamable transport".into());
            }
        }
    }

    if let Some(filter) = &config.options.tool_filter {
        validate_tool_filter(filter)?;
    }
    Ok(())
}

fn validate_tool_filter(filter: &ToolFilterConfig) -> Result<(), String> {
    if !filter.list.is_empty() && filter.parsed_mode().is_none() {
        return Err(format!(
            "invalid tool filter: invalid filter mode: {}, must be 'allow' or 'block'",
            filter.mode
        ));
    }
    Ok(())
}
