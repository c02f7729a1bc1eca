//! Node name to reachable address resolution.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::debug;

use crate::config::{GlobalConfig, NodeResolverKind};
use crate::Result;

use super::client::SchedulerClient;

/// Turns a scheduler node name into an address SSH can reach.
pub trait NodeResolver: Send + Sync {
    /// Resolve `node` to a host name or IP address.
    ///
    /// # Errors
    ///
    /// Implementations return an error only when the lookup itself fails.
    fn resolve<'a>(&'a self, node: &'a str)
        -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;
}

/// Resolves names from a fixed inventory table, falling back to the name.
#[derive(Debug, Clone, Default)]
pub struct StaticNodeResolver {
    table: HashMap<String, String>,
}

impl StaticNodeResolver {
    /// Create a resolver over `table`.
    #[must_use]
    pub fn new(table: HashMap<String, String>) -> Self {
        Self { table }
    }
}

impl NodeResolver for StaticNodeResolver {
    fn resolve<'a>(
        &'a self,
        node: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        let address = self
            .table
            .get(node)
            .cloned()
            .unwrap_or_else(|| node.to_owned());
        Box::pin(async move { Ok(address) })
    }
}

/// Resolves names through the scheduler's `NodeAddr` field.
pub struct SchedulerNodeResolver {
    client: Arc<SchedulerClient>,
}

impl SchedulerNodeResolver {
    /// Create a resolver querying through `client`.
    #[must_use]
    pub fn new(client: Arc<SchedulerClient>) -> Self {
        Self { client }
    }
}

impl NodeResolver for SchedulerNodeResolver {
    fn resolve<'a>(
        &'a self,
        node: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let address = self.client.query_node_address(node).await?;
            debug!(node, ?address, "resolved node address");
            Ok(address.unwrap_or_else(|| node.to_owned()))
        })
    }
}

/// Build the resolver selected by `config.node_resolver`.
#[must_use]
pub fn from_config(config: &GlobalConfig, client: Arc<SchedulerClient>) -> Arc<dyn NodeResolver> {
    match config.node_resolver {
        NodeResolverKind::Static => Arc::new(StaticNodeResolver::new(config.nodes.clone())),
        NodeResolverKind::Scheduler => Arc::new(SchedulerNodeResolver::new(client)),
    }
}
