use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use switchboard_core::schema::{ParamSpec, ToolDescriptor};
use switchboard_core::tools::{HandlerError, ToolArgs, ToolContext, ToolHandler};

use super::{limit_arg, str_arg};
use crate::directory::{CustomerDirectory, TicketFilter, TicketStatus};

pub const NAME: &str = "aggregate_customer_context";

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

pub fn descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        NAME,
        "Look up a customer by email and return their profile, recent orders, open support tickets and lifetime value in one payload.",
    )
    .param(
        ParamSpec::string("email")
            .required()
            .with_pattern(EMAIL_PATTERN)
            .describe("Customer email address"),
    )
    .param(
        ParamSpec::integer("order_limit")
            .with_default(json!(5))
            .describe("How many recent orders to include"),
    )
}

/// Joins profile, orders and tickets for one customer.
pub struct AggregateCustomerContext {
    directory: Arc<dyn CustomerDirectory>,
}

impl AggregateCustomerContext {
    pub fn new(directory: Arc<dyn CustomerDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl ToolHandler for AggregateCustomerContext {
    async fn call(&self, args: ToolArgs, ctx: ToolContext) -> Result<Value, HandlerError> {
        let email = str_arg(&args, "email")?;
        let order_limit = limit_arg(&args, "order_limit", 5);

        let customer = self
            .directory
            .find_by_email(email)
            .await?
            .ok_or_else(|| HandlerError::NotFound(format!("no customer with email {email}")))?;

        // Independent reads; run them together.
        let (orders, tickets, lifetime_value) = tokio::try_join!(
            self.directory.orders(&customer.id, order_limit),
            self.directory
                .tickets(&customer.id, TicketFilter::Only(TicketStatus::Open)),
            self.directory.lifetime_value(&customer.id),
        )?;

        tracing::debug!(
            correlation_id = %ctx.correlation_id,
            customer_id = %customer.id,
            orders = orders.len(),
            open_tickets = tickets.len(),
            "aggregated customer context"
        );

        Ok(json!({
            "customer": customer,
            "recentOrders": orders,
            "openTickets": tickets,
            "lifetimeValue": lifetime_value,
        }))
    }
}
