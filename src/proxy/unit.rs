// ABOUTME: ProxyUnit - binds one upstream and republishes its catalog locally.
// ABOUTME: Drains every paginated catalog, applies the tool filter, registers handlers.

use std::future::Future;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::endpoint::{CallHandler, McpEndpoint, ReadHandler};
use super::filter::ToolFilter;
use crate::config::OptionsConfig;
use crate::error::{BindError, CatalogKind, McpError};
use crate::mcp::{McpClientInfo, Page};
use crate::upstream::Upstream;

/// Counts from one populate pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PopulateSummary {
    pub tools: usize,
    pub dropped_tools: Vec<String>,
    pub prompts: usize,
    pub resources: usize,
    pub resource_templates: usize,
}

/// Republishes a single upstream through a local [`McpEndpoint`].
///
/// A unit binds at most one upstream. The binding is a weak reference: the
/// registry owns the connection and the unit never keeps it alive.
pub struct ProxyUnit {
    name: String,
    options: OptionsConfig,
    endpoint: Arc<McpEndpoint>,
    bound: Mutex<Option<Weak<dyn Upstream>>>,
}

impl ProxyUnit {
    pub fn new(name: impl Into<String>, server_info: McpClientInfo, options: OptionsConfig) -> Self {
        Self {
            name: name.into(),
            options,
            endpoint: Arc::new(McpEndpoint::new(server_info)),
            bound: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &OptionsConfig {
        &self.options
    }

    pub fn endpoint(&self) -> Arc<McpEndpoint> {
        self.endpoint.clone()
    }

    pub fn is_bound(&self) -> bool {
        self.bound.lock().is_some()
    }

    /// Bind `upstream` and populate the endpoint from it.
    ///
    /// Fails with [`BindError::AlreadyBound`] if a binding exists; the
    /// existing binding is left untouched. If populating fails the new
    /// binding is released again.
    pub async fn bind(&self, upstream: &Arc<dyn Upstream>) -> Result<PopulateSummary, BindError> {
        {
            let mut bound = self.bound.lock();
            if bound.is_some() {
                return Err(BindError::AlreadyBound(self.name.clone()));
            }
            *bound = Some(Arc::downgrade(upstream));
        }

        match self.populate_from_upstream().await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                *self.bound.lock() = None;
                Err(e)
            }
        }
    }

    /// Release the binding. Registrations already made stay in place.
    pub fn unbind(&self) -> Result<(), BindError> {
        match self.bound.lock().take() {
            Some(_) => Ok(()),
            None => Err(BindError::NotBound(self.name.clone())),
        }
    }

    fn upstream(&self) -> Result<Arc<dyn Upstream>, BindError> {
        let weak = self
            .bound
            .lock()
            .clone()
            .ok_or_else(|| BindError::NotBound(self.name.clone()))?;
        weak.upgrade().ok_or_else(|| BindError::CatalogFetch {
            name: self.name.clone(),
            kind: CatalogKind::Tools,
            source: McpError::NotConnected(self.name.clone()),
        })
    }

    /// Pull every catalog from the bound upstream into the endpoint.
    ///
    /// Tools are mandatory: a fetch or registration failure aborts. Prompts,
    /// resources and resource templates are each attempted independently and
    /// failures are only logged.
    pub async fn populate_from_upstream(&self) -> Result<PopulateSummary, BindError> {
        let upstream = self.upstream()?;
        let mut summary = PopulateSummary::default();

        let (tools, dropped) = self.populate_tools(&upstream).await?;
        summary.tools = tools;
        summary.dropped_tools = dropped;

        match self.populate_prompts(&upstream).await {
            Ok(count) => summary.prompts = count,
            Err(e) => warn!(upstream = %self.name, error = %e, "Failed to add prompts"),
        }
        match self.populate_resources(&upstream).await {
            Ok(count) => summary.resources = count,
            Err(e) => warn!(upstream = %self.name, error = %e, "Failed to add resources"),
        }
        match self.populate_resource_templates(&upstream).await {
            Ok(count) => summary.resource_templates = count,
            Err(e) => {
                warn!(upstream = %self.name, error = %e, "Failed to add resource templates")
            }
        }

        info!(
            upstream = %self.name,
            tools = summary.tools,
            dropped = summary.dropped_tools.len(),
            prompts = summary.prompts,
            resources = summary.resources,
            resource_templates = summary.resource_templates,
            "Populated proxy unit"
        );
        Ok(summary)
    }

    async fn populate_tools(
        &self,
        upstream: &Arc<dyn Upstream>,
    ) -> Result<(usize, Vec<String>), BindError> {
        let tools = drain(&self.name, |cursor| {
            let upstream = upstream.clone();
            async move { upstream.list_tools(cursor.as_deref()).await }
        })
        .await
        .map_err(|source| self.fetch_error(CatalogKind::Tools, source))?;

        let filter = ToolFilter::from_config(&self.name, self.options.tool_filter.as_ref());
        let (kept, dropped) = filter.apply(&self.name, tools);
        for tool in kept {
            let handler = call_handler(upstream, &tool.name, |up, name, args| async move {
                up.call_tool(&name, args).await
            });
            debug!(upstream = %self.name, tool = %tool.name, "Adding tool");
            self.endpoint
                .register_tool(tool, handler)
                .map_err(|source| BindError::Register {
                    name: self.name.clone(),
                    kind: CatalogKind::Tools,
                    source,
                })?;
        }
        Ok((self.endpoint.tool_names().len(), dropped))
    }

    async fn populate_prompts(&self, upstream: &Arc<dyn Upstream>) -> Result<usize, BindError> {
        let prompts = drain(&self.name, |cursor| {
            let upstream = upstream.clone();
            async move { upstream.list_prompts(cursor.as_deref()).await }
        })
        .await
        .map_err(|source| self.fetch_error(CatalogKind::Prompts, source))?;

        let mut count = 0;
        for prompt in prompts {
            let handler = call_handler(upstream, &prompt.name, |up, name, args| async move {
                up.get_prompt(&name, args).await
            });
            let prompt_name = prompt.name.clone();
            match self.endpoint.register_prompt(prompt, handler) {
                Ok(()) => count += 1,
                Err(e) => warn!(upstream = %self.name, prompt = %prompt_name, error = %e, "Skipping prompt"),
            }
        }
        Ok(count)
    }

    async fn populate_resources(&self, upstream: &Arc<dyn Upstream>) -> Result<usize, BindError> {
        let resources = drain(&self.name, |cursor| {
            let upstream = upstream.clone();
            async move { upstream.list_resources(cursor.as_deref()).await }
        })
        .await
        .map_err(|source| self.fetch_error(CatalogKind::Resources, source))?;

        let mut count = 0;
        for resource in resources {
            let uri = resource.uri.clone();
            match self.endpoint.register_resource(resource, read_handler(upstream, &self.name)) {
                Ok(()) => count += 1,
                Err(e) => warn!(upstream = %self.name, uri = %uri, error = %e, "Skipping resource"),
            }
        }
        Ok(count)
    }

    async fn populate_resource_templates(
        &self,
        upstream: &Arc<dyn Upstream>,
    ) -> Result<usize, BindError> {
        let templates = drain(&self.name, |cursor| {
            let upstream = upstream.clone();
            async move { upstream.list_resource_templates(cursor.as_deref()).await }
        })
        .await
        .map_err(|source| self.fetch_error(CatalogKind::ResourceTemplates, source))?;

        let mut count = 0;
        for template in templates {
            let uri = template.uri_template.clone();
            match self
                .endpoint
                .register_resource_template(template, read_handler(upstream, &self.name))
            {
                Ok(()) => count += 1,
                Err(e) => {
                    warn!(upstream = %self.name, template = %uri, error = %e, "Skipping resource template")
                }
            }
        }
        Ok(count)
    }

    fn fetch_error(&self, kind: CatalogKind, source: McpError) -> BindError {
        BindError::CatalogFetch {
            name: self.name.clone(),
            kind,
            source,
        }
    }
}

/// Fetch pages until the cursor runs out or a page comes back empty.
///
/// Pages are fetched strictly in sequence since each depends on the
/// previous cursor.
async fn drain<T, F, Fut>(upstream: &str, mut fetch: F) -> Result<Vec<T>, McpError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, McpError>>,
{
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = fetch(cursor.clone()).await?;
        if page.items.is_empty() {
            break;
        }
        let next = page.continuation().map(str::to_string);
        items.extend(page.items);

        match next {
            Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                warn!(upstream = %upstream, cursor = %next, "Upstream repeated its cursor, stopping");
                break;
            }
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(items)
}

fn call_handler<F, Fut>(upstream: &Arc<dyn Upstream>, name: &str, call: F) -> CallHandler
where
    F: Fn(Arc<dyn Upstream>, String, Option<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, McpError>> + Send + 'static,
{
    let weak = Arc::downgrade(upstream);
    let owner = upstream.name().to_string();
    let name = name.to_string();
    Arc::new(move |args: Option<Value>| match weak.upgrade() {
        Some(up) => call(up, name.clone(), args).boxed(),
        None => futures::future::ready(Err(McpError::NotConnected(owner.clone()))).boxed(),
    })
}

fn read_handler(upstream: &Arc<dyn Upstream>, owner: &str) -> ReadHandler {
    let weak = Arc::downgrade(upstream);
    let owner = owner.to_string();
    Arc::new(move |uri: String| match weak.upgrade() {
        Some(up) => async move { up.read_resource(&uri).await }.boxed(),
        None => futures::future::ready(Err(McpError::NotConnected(owner.clone()))).boxed(),
    })
}
