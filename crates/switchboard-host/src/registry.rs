use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use regex::Regex;
use switchboard_core::schema::{ParamType, ToolDescriptor};
use switchboard_core::tools::ToolHandler;

use crate::error::RegistryError;

/// A descriptor paired with its handler and compiled parameter patterns.
#[derive(Clone)]
pub struct RegisteredTool {
    descriptor: Arc<ToolDescriptor>,
    handler: Arc<dyn ToolHandler>,
    patterns: HashMap<String, Regex>,
}

impl RegisteredTool {
    pub fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    pub fn handler(&self) -> Arc<dyn ToolHandler> {
        Arc::clone(&self.handler)
    }

    pub fn pattern(&self, field: &str) -> Option<&Regex> {
        self.patterns.get(field)
    }
}

/// Name → tool map, populated at startup and read-only while serving.
/// Share it behind an `Arc` once registration is done.
pub struct ToolRegistry {
    tools: IndexMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: IndexMap::new(),
        }
    }

    /// Register a tool. Names are unique and patterns must compile.
    pub fn register(
        &mut self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), RegistryError> {
        if self.tools.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateTool(descriptor.name));
        }

        let mut patterns = HashMap::new();
        for param in &descriptor.parameter_schema {
            let Some(pattern) = &param.pattern else {
                continue;
            };
            if param.kind != ParamType::String {
                return Err(RegistryError::PatternOnNonString {
                    tool: descriptor.name.clone(),
                    field: param.name.clone(),
                });
            }
            let regex = Regex::new(pattern).map_err(|e| RegistryError::InvalidPattern {
                tool: descriptor.name.clone(),
                field: param.name.clone(),
                message: e.to_string(),
            })?;
            patterns.insert(param.name.clone(), regex);
        }

        tracing::debug!(tool = %descriptor.name, params = descriptor.parameter_schema.len(), "registered tool");
        self.tools.insert(
            descriptor.name.clone(),
            RegisteredTool {
                descriptor: Arc::new(descriptor),
                handler,
                patterns,
            },
        );
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Descriptors in registration order.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.tools
            .values()
            .map(|t| t.descriptor.as_ref().clone())
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Total tool count.
    pub fn count(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
