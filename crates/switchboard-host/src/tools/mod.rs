//! Built-in business tools over a [`CustomerDirectory`].

pub mod customer_context;
pub mod orders;
pub mod tickets;

use std::sync::Arc;

use serde_json::Value;
use switchboard_core::tools::{HandlerError, ToolArgs};

use crate::directory::CustomerDirectory;
use crate::error::RegistryError;
use crate::registry::ToolRegistry;

/// Upper bound on any list a tool returns.
const MAX_LIMIT: i64 = 100;

/// Register every built-in tool against `directory`.
pub fn register_builtin_tools(
    registry: &mut ToolRegistry,
    directory: Arc<dyn CustomerDirectory>,
) -> Result<(), RegistryError> {
    registry.register(
        customer_context::descriptor(),
        Arc::new(customer_context::AggregateCustomerContext::new(Arc::clone(&directory))),
    )?;
    registry.register(
        orders::descriptor(),
        Arc::new(orders::ListOrders::new(Arc::clone(&directory))),
    )?;
    registry.register(tickets::descriptor(), Arc::new(tickets::SearchTickets::new(directory)))?;
    Ok(())
}

fn str_arg<'a>(args: &'a ToolArgs, name: &str) -> Result<&'a str, HandlerError> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| HandlerError::InvalidInput(format!("{name} must be a string")))
}

fn limit_arg(args: &ToolArgs, name: &str, default: i64) -> usize {
    let limit = args.get(name).and_then(Value::as_i64).unwrap_or(default);
    limit.clamp(0, MAX_LIMIT) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryDirectory;

    #[test]
    fn registers_all_builtins_in_order() {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry, Arc::new(InMemoryDirectory::demo())).unwrap();
        assert_eq!(
            registry.names(),
            vec!["aggregate_customer_context", "list_orders", "search_tickets"]
        );

        let again = register_builtin_tools(&mut registry, Arc::new(InMemoryDirectory::demo()));
        assert!(matches!(again, Err(RegistryError::DuplicateTool(_))));
    }

    #[test]
    fn limits_are_clamped() {
        let mut args = ToolArgs::new();
        args.insert("limit".into(), Value::from(5000));
        assert_eq!(limit_arg(&args, "limit", 10), 100);
        args.insert("limit".into(), Value::from(-3));
        assert_eq!(limit_arg(&args, "limit", 10), 0);
        assert_eq!(limit_arg(&ToolArgs::new(), "limit", 10), 10);
    }
}
