use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::Result;
use crate::mcp::connection::{
    ConnectionState, ToolDescriptor, ToolInvocationResult, ToolProviderConnection,
};

/// Backend seam for a source of tools. The production implementation is a
/// [`ToolProviderConnection`]; tests substitute in-process fakes.
#[async_trait]
pub trait ToolBackend: Send {
    fn id(&self) -> &str;

    /// Bring the backend up. A backend that fails here is excluded from the
    /// catalog; it must not panic or retry internally.
    async fn start(&mut self) -> Result<()>;

    fn tools(&self) -> Vec<ToolDescriptor>;

    async fn invoke(
        &mut self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> ToolInvocationResult;

    async fn shutdown(&mut self);
}

#[async_trait]
impl ToolBackend for ToolProviderConnection {
    fn id(&self) -> &str {
        ToolProviderConnection::id(self)
    }

    async fn start(&mut self) -> Result<()> {
        self.initialize().await
    }

    fn tools(&self) -> Vec<ToolDescriptor> {
        ToolProviderConnection::tools(self).to_vec()
    }

    async fn invoke(
        &mut self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> ToolInvocationResult {
        ToolProviderConnection::invoke(self, name, arguments, timeout).await
    }

    async fn shutdown(&mut self) {
        if self.state() != ConnectionState::Closed {
            self.close().await;
        }
    }
}

type SharedBackend = Arc<Mutex<Box<dyn ToolBackend>>>;

/// Aggregated tool registry across all live backends.
///
/// Tool names are not namespaced: when two backends advertise the same name,
/// the backend registered first keeps it and later duplicates are dropped
/// with a warning.
pub struct ToolCatalog {
    backends: Vec<SharedBackend>,
    /// tool name -> (backend index, descriptor), in registration order.
    routes: HashMap<String, (usize, ToolDescriptor)>,
    ordered_names: Vec<String>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
            routes: HashMap::new(),
            ordered_names: Vec::new(),
        }
    }

    /// Start a backend and fold its tools into the catalog. Backends that
    /// fail to start are logged and skipped; the catalog stays usable.
    pub async fn register(&mut self, mut backend: Box<dyn ToolBackend>) {
        let id = backend.id().to_owned();
        if let Err(e) = backend.start().await {
            warn!(provider = %id, error = %e, "excluding provider that failed to start");
            backend.shutdown().await;
            return;
        }

        let index = self.backends.len();
        let registered = Self::fold_tools(
            &mut self.routes,
            &mut self.ordered_names,
            index,
            &id,
            backend.tools(),
        );
        info!(provider = %id, tools = registered, "provider registered");
        self.backends.push(Arc::new(Mutex::new(backend)));
    }

    /// Rebuild the registry from every registered backend's current tool
    /// list, keeping registration order as the collision priority.
    pub async fn refresh(&mut self) {
        self.routes.clear();
        self.ordered_names.clear();
        for (index, backend) in self.backends.iter().enumerate() {
            let backend = backend.lock().await;
            Self::fold_tools(
                &mut self.routes,
                &mut self.ordered_names,
                index,
                backend.id(),
                backend.tools(),
            );
        }
    }

    fn fold_tools(
        routes: &mut HashMap<String, (usize, ToolDescriptor)>,
        ordered_names: &mut Vec<String>,
        index: usize,
        provider: &str,
        tools: Vec<ToolDescriptor>,
    ) -> usize {
        let mut registered = 0usize;
        for tool in tools {
            if let Some((owner, _)) = routes.get(&tool.name) {
                warn!(
                    tool = %tool.name,
                    provider,
                    owner_index = owner,
                    "duplicate tool name, keeping first registration"
                );
                continue;
            }
            ordered_names.push(tool.name.clone());
            routes.insert(tool.name.clone(), (index, tool));
            registered += 1;
        }
        registered
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn tool_names(&self) -> &[String] {
        &self.ordered_names
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.routes.contains_key(name)
    }

    /// Tool definitions in the chat-completions function schema the model expects.
    pub fn as_model_schema(&self) -> Vec<Value> {
        self.ordered_names
            .iter()
            .filter_map(|name| self.routes.get(name))
            .map(|(_, tool)| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.input_schema,
                    }
                })
            })
            .collect()
    }

    /// Dispatch an invocation to the backend that owns the tool. Unknown
    /// names come back as an unsuccessful result, like any other tool fault.
    pub async fn route(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> ToolInvocationResult {
        let Some((index, _)) = self.routes.get(name) else {
            return ToolInvocationResult {
                correlation_id: 0,
                success: false,
                payload: None,
                error: Some(format!("unknown tool '{name}'")),
            };
        };
        let mut backend = self.backends[*index].lock().await;
        backend.invoke(name, arguments, timeout).await
    }

    /// Shut every backend down, swallowing failures.
    pub async fn shutdown(&mut self) {
        for backend in &self.backends {
            backend.lock().await.shutdown().await;
        }
        self.backends.clear();
        self.routes.clear();
        self.ordered_names.clear();
    }
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::test_support::FakeBackend;
    use super::*;

    #[tokio::test]
    async fn first_registration_wins_on_duplicate_names() {
        let mut catalog = ToolCatalog::new();
        catalog
            .register(Box::new(
                FakeBackend::new("alpha", &["search", "weather"]).with_response("search", "from alpha"),
            ))
            .await;
        catalog
            .register(Box::new(
                FakeBackend::new("beta", &["search", "news"]).with_response("search", "from beta"),
            ))
            .await;

        assert_eq!(catalog.tool_names(), &["search", "weather", "news"]);
        let result = catalog
            .route("search", json!({}), Duration::from_secs(1))
            .await;
        assert_eq!(result.payload.as_deref(), Some("from alpha"));
    }

    #[tokio::test]
    async fn failed_backend_is_excluded_but_others_register() {
        let mut catalog = ToolCatalog::new();
        catalog
            .register(Box::new(FakeBackend::new("broken", &["search"]).failing_start()))
            .await;
        catalog
            .register(Box::new(
                FakeBackend::new("ok", &["news"]).with_response("news", "headline"),
            ))
            .await;

        assert_eq!(catalog.tool_names(), &["news"]);
        assert!(!catalog.has_tool("search"));
    }

    #[tokio::test]
    async fn refresh_rebuilds_with_same_priority() {
        let mut catalog = ToolCatalog::new();
        catalog
            .register(Box::new(FakeBackend::new("alpha", &["search"])))
            .await;
        catalog
            .register(Box::new(FakeBackend::new("beta", &["search", "news"])))
            .await;
        assert_eq!(catalog.tool_names(), &["search", "news"]);

        catalog.refresh().await;
        assert_eq!(catalog.tool_names(), &["search", "news"]);
        let result = catalog
            .route("news", json!({}), Duration::from_secs(1))
            .await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn route_unknown_tool_returns_unsuccessful_result() {
        let catalog = ToolCatalog::new();
        let result = catalog
            .route("missing", json!({}), Duration::from_secs(1))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("unknown tool"));
    }

    #[tokio::test]
    async fn model_schema_lists_tools_in_registration_order() {
        let mut catalog = ToolCatalog::new();
        catalog
            .register(Box::new(FakeBackend::new("alpha", &["b_tool", "a_tool"])))
            .await;

        let schema = catalog.as_model_schema();
        assert_eq!(schema.len(), 2);
        assert_eq!(schema[0]["function"]["name"], "b_tool");
        assert_eq!(schema[1]["function"]["name"], "a_tool");
        assert_eq!(schema[0]["type"], "function");
    }

    #[tokio::test]
    async fn shutdown_reaches_every_backend() {
        let alpha = FakeBackend::new("alpha", &["a"]);
        let beta = FakeBackend::new("beta", &["b"]);
        let alpha_shutdowns = Arc::clone(&alpha.shutdowns);
        let beta_shutdowns = Arc::clone(&beta.shutdowns);

        let mut catalog = ToolCatalog::new();
        catalog.register(Box::new(alpha)).await;
        catalog.register(Box::new(beta)).await;
        catalog.shutdown().await;

        assert_eq!(alpha_shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(beta_shutdowns.load(Ordering::SeqCst), 1);
        assert!(catalog.is_empty());
    }
}
