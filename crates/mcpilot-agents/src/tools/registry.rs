use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use super::ToolProvider;
use super::schema::{RawToolDescriptor, ToolDescriptor};
use crate::providers::ToolDefinition;

/// A tool together with the provider that serves it.
#[derive(Clone)]
pub struct RegisteredTool {
    pub provider: Arc<dyn ToolProvider>,
    pub descriptor: ToolDescriptor,
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("provider", &self.provider.name())
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// Name-indexed view over the tools of every connected provider.
///
/// Entries keep registration order. When two providers expose the same tool
/// name the first one registered wins; the later entry stays listed in
/// [`ToolRegistry::entries`] but can never be resolved.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    entries: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start every provider and register its tools, in order.
    ///
    /// Providers that fail to start or to list their tools are skipped.
    pub async fn discover(providers: &[Arc<dyn ToolProvider>]) -> Self {
        let mut registry = Self::new();
        for provider in providers {
            if let Err(e) = provider.start().await {
                warn!("tool provider '{}' failed to start: {e}", provider.name());
                continue;
            }
            let tools = match provider.list_tools().await {
                Ok(tools) => tools,
                Err(e) => {
                    warn!(
                        "tool provider '{}' failed to list tools: {e}",
                        provider.name()
                    );
                    continue;
                }
            };
            info!(
                "tool provider '{}' connected: {} tool(s) discovered",
                provider.name(),
                tools.len()
            );
            registry.register(Arc::clone(provider), tools);
        }
        registry
    }

    /// Normalize and add `tools` served by `provider`.
    pub fn register(&mut self, provider: Arc<dyn ToolProvider>, tools: Vec<RawToolDescriptor>) {
        for raw in tools {
            let descriptor = ToolDescriptor::from(raw);
            let position = self.entries.len();
            match self.index.get(&descriptor.name) {
                Some(&owner) => warn!(
                    "tool '{}' from '{}' is shadowed by '{}'",
                    descriptor.name,
                    provider.name(),
                    self.entries[owner].provider.name()
                ),
                None => {
                    info!("tool ready: {}.{}", provider.name(), descriptor.name);
                    self.index.insert(descriptor.name.clone(), position);
                }
            }
            self.entries.push(RegisteredTool {
                provider: Arc::clone(&provider),
                descriptor,
            });
        }
    }

    pub fn resolve(&self, name: &str) -> Option<&RegisteredTool> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    /// Tool list for the completion service: every resolvable tool, in
    /// registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.reachable()
            .map(|entry| entry.descriptor.to_definition())
            .collect()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.reachable()
            .map(|entry| entry.descriptor.name.as_str())
            .collect()
    }

    /// All registered entries, shadowed ones included.
    pub fn entries(&self) -> &[RegisteredTool] {
        &self.entries
    }

    /// Number of resolvable tool names.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn reachable(&self) -> impl Iterator<Item = &RegisteredTool> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(i, entry)| self.index.get(&entry.descriptor.name) == Some(i))
            .map(|(_, entry)| entry)
    }
}
