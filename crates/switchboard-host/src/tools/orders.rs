use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use switchboard_core::schema::{ParamSpec, ToolDescriptor};
use switchboard_core::tools::{HandlerError, ToolArgs, ToolContext, ToolHandler};

use super::{limit_arg, str_arg};
use crate::directory::CustomerDirectory;

pub const NAME: &str = "list_orders";

pub fn descriptor() -> ToolDescriptor {
    ToolDescriptor::new(NAME, "List a customer's orders, newest first.")
        .param(ParamSpec::string("customer_id").required().describe("Customer id, e.g. cus_001"))
        .param(
            ParamSpec::integer("limit")
                .with_default(json!(10))
                .describe("Maximum number of orders"),
        )
}

pub struct ListOrders {
    directory: Arc<dyn CustomerDirectory>,
}

impl ListOrders {
    pub fn new(directory: Arc<dyn CustomerDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl ToolHandler for ListOrders {
    async fn call(&self, args: ToolArgs, _ctx: ToolContext) -> Result<Value, HandlerError> {
        let customer_id = str_arg(&args, "customer_id")?;
        let limit = limit_arg(&args, "limit", 10);
        let orders = self.directory.orders(customer_id, limit).await?;
        Ok(json!({ "customerId": customer_id, "orders": orders }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryDirectory;

    #[tokio::test]
    async fn lists_newest_first() {
        let tool = ListOrders::new(Arc::new(InMemoryDirectory::demo()));
        let mut args = ToolArgs::new();
        args.insert("customer_id".into(), json!("cus_001"));
        args.insert("limit".into(), json!(10));

        let out = tool
            .call(args, ToolContext::new(Default::default(), None))
            .await
            .unwrap();
        assert_eq!(out["customerId"], "cus_001");
        let ids: Vec<_> = out["orders"]
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["ord_1003", "ord_1002", "ord_1001"]);
    }

    #[tokio::test]
    async fn unknown_customer_has_no_orders() {
        let tool = ListOrders::new(Arc::new(InMemoryDirectory::demo()));
        let mut args = ToolArgs::new();
        args.insert("customer_id".into(), json!("cus_404"));
        let out = tool
            .call(args, ToolContext::new(Default::default(), None))
            .await
            .unwrap();
        assert_eq!(out["orders"], json!([]));
    }
}
