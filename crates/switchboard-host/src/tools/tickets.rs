use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use switchboard_core::schema::{ParamSpec, ToolDescriptor};
use switchboard_core::tools::{HandlerError, ToolArgs, ToolContext, ToolHandler};

use super::str_arg;
use crate::directory::{CustomerDirectory, TicketFilter};

pub const NAME: &str = "search_tickets";

pub fn descriptor() -> ToolDescriptor {
    ToolDescriptor::new(NAME, "Search a customer's support tickets by status.")
        .param(ParamSpec::string("customer_id").required().describe("Customer id, e.g. cus_001"))
        .param(
            ParamSpec::string("status")
                .with_default(json!("open"))
                .with_pattern("^(open|pending|closed|all)$")
                .describe("open, pending, closed or all"),
        )
}

pub struct SearchTickets {
    directory: Arc<dyn CustomerDirectory>,
}

impl SearchTickets {
    pub fn new(directory: Arc<dyn CustomerDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl ToolHandler for SearchTickets {
    async fn call(&self, args: ToolArgs, _ctx: ToolContext) -> Result<Value, HandlerError> {
        let customer_id = str_arg(&args, "customer_id")?;
        let status = str_arg(&args, "status")?;
        let filter = TicketFilter::parse(status)
            .ok_or_else(|| HandlerError::InvalidInput(format!("unknown ticket status {status}")))?;
        let tickets = self.directory.tickets(customer_id, filter).await?;
        Ok(json!({ "customerId": customer_id, "tickets": tickets }))
    }
}
