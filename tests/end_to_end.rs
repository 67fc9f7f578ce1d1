//! Orchestrator → client → SSE host → dispatcher → tools, all in-process.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde_json::json;

use switchboard_agent::{AgentRunner, RunStatus, RunnerConfig, ScriptedModel, ScriptedReply};
use switchboard_client::{ClientConfig, ConnectionManager};
use switchboard_core::wire::AUTH_HEADER;
use switchboard_host::{
    register_builtin_tools, Dispatcher, InMemoryDirectory, ServerConfig, ServerHandle,
    ToolRegistry, TransportConfig,
};

const SECRET: &str = "e2e-secret";

async fn host() -> ServerHandle {
    let mut registry = ToolRegistry::new();
    register_builtin_tools(&mut registry, Arc::new(InMemoryDirectory::demo())).unwrap();
    let dispatcher = Dispatcher::new(Arc::new(registry)).with_timeout(Duration::from_secs(5));

    let config = ServerConfig {
        port: 0,
        dev_routes: true,
        ..ServerConfig::new(TransportConfig::new(SECRET))
    };
    switchboard_host::start(config, Arc::new(dispatcher))
        .await
        .unwrap()
}

fn gateway(handle: &ServerHandle, key: &str) -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::new(ClientConfig::new(
        handle.base_url(),
        SecretString::from(key.to_string()),
    )))
}

#[tokio::test]
async fn customer_question_answered_in_two_iterations() {
    let handle = host().await;
    let gateway = gateway(&handle, SECRET);
    let model = Arc::new(ScriptedModel::new(vec![
        ScriptedReply::tool_calls(vec![(
            "aggregate_customer_context",
            json!({ "email": "jane@example.com" }),
        )]),
        ScriptedReply::text("Jane has one open ticket and three recent orders."),
    ]));

    let runner = AgentRunner::new(model.clone(), gateway.clone(), RunnerConfig::default()).unwrap();
    let outcome = runner.run("What's going on with jane@example.com?").await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.message, "Jane has one open ticket and three recent orders.");
    assert_eq!(outcome.tool_calls.len(), 1);

    let record = &outcome.tool_calls[0];
    assert_eq!(record.name, "aggregate_customer_context");
    assert!(!record.is_error);
    assert_eq!(record.result["customer"]["id"], "cus_001");
    assert_eq!(record.result["recentOrders"].as_array().unwrap().len(), 3);
    assert_eq!(record.result["openTickets"].as_array().unwrap().len(), 1);
    let lifetime = record.result["lifetimeValue"].as_f64().unwrap();
    assert!((lifetime - 485.49).abs() < 1e-6);

    // tools were discovered over the wire in registration order
    let names: Vec<_> = model.requests()[0]
        .tools
        .iter()
        .map(|t| t.name.clone())
        .collect();
    assert_eq!(
        names,
        vec!["aggregate_customer_context", "list_orders", "search_tickets"]
    );

    gateway.close().await;
    handle.stop().await;
}

#[tokio::test]
async fn unknown_customer_is_fed_back_as_tool_error() {
    let handle = host().await;
    let gateway = gateway(&handle, SECRET);
    let model = Arc::new(ScriptedModel::new(vec![
        ScriptedReply::tool_calls(vec![(
            "aggregate_customer_context",
            json!({ "email": "nobody@example.com" }),
        )]),
        ScriptedReply::text("I couldn't find that customer."),
    ]));

    let runner = AgentRunner::new(model, gateway, RunnerConfig::default()).unwrap();
    let outcome = runner.run("Look up nobody@example.com").await;

    assert_eq!(outcome.status, RunStatus::Completed);
    let record = &outcome.tool_calls[0];
    assert!(record.is_error);
    assert_eq!(record.result["error"], true);
    assert!(record.result["message"]
        .as_str()
        .unwrap()
        .contains("nobody@example.com"));

    handle.stop().await;
}

#[tokio::test]
async fn parallel_calls_come_back_in_request_order() {
    let handle = host().await;
    let gateway = gateway(&handle, SECRET);
    let model = Arc::new(ScriptedModel::new(vec![
        ScriptedReply::tool_calls(vec![
            ("search_tickets", json!({ "customer_id": "cus_001", "status": "all" })),
            ("list_orders", json!({ "customer_id": "cus_001", "limit": 2 })),
        ]),
        ScriptedReply::text("done"),
    ]));

    let runner = AgentRunner::new(model, gateway, RunnerConfig::default()).unwrap();
    let outcome = runner.run("tickets and orders").await;

    let names: Vec<_> = outcome.tool_calls.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["search_tickets", "list_orders"]);
    assert_eq!(outcome.tool_calls[0].result["tickets"].as_array().unwrap().len(), 2);
    assert_eq!(outcome.tool_calls[1].result["orders"].as_array().unwrap().len(), 2);

    handle.stop().await;
}

#[tokio::test]
async fn looping_model_hits_the_ceiling() {
    let handle = host().await;
    let gateway = gateway(&handle, SECRET);
    let model = Arc::new(ScriptedModel::always(ScriptedReply::tool_calls(vec![(
        "list_orders",
        json!({ "customer_id": "cus_001" }),
    )])));

    let config = RunnerConfig::default().with_max_iterations(3);
    let runner = AgentRunner::new(model.clone(), gateway, config).unwrap();
    let outcome = runner.run("keep going").await;

    assert_eq!(outcome.status, RunStatus::LimitExceeded);
    assert_eq!(outcome.iterations, 3);
    assert_eq!(model.call_count(), 3);
    assert_eq!(outcome.tool_calls.len(), 2);

    handle.stop().await;
}

#[tokio::test]
async fn wrong_secret_yields_transport_errors_not_a_crash() {
    let handle = host().await;
    let gateway = gateway(&handle, "not-the-secret");
    let model = Arc::new(ScriptedModel::new(vec![
        ScriptedReply::tool_calls(vec![("list_orders", json!({ "customer_id": "cus_001" }))]),
        ScriptedReply::text("The tool host rejected me."),
    ]));

    let runner = AgentRunner::new(model.clone(), gateway, RunnerConfig::default()).unwrap();
    let outcome = runner.run("orders?").await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert!(model.requests()[0].tools.is_empty());
    assert!(outcome.tool_calls[0].is_error);
    assert_eq!(outcome.tool_calls[0].result["kind"], "transport");
    assert_eq!(handle.transport().session_count(), 0);

    handle.stop().await;
}

#[tokio::test]
async fn missing_credential_gets_no_session() {
    let handle = host().await;
    let http = reqwest::Client::new();

    let resp = http
        .get(format!("{}/sse", handle.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body = resp.text().await.unwrap();
    assert!(!body.contains("event: connected"));
    assert_eq!(handle.transport().session_count(), 0);

    let resp = http
        .get(format!("{}/sse", handle.base_url()))
        .header(AUTH_HEADER, "")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    assert_eq!(handle.transport().session_count(), 0);

    handle.stop().await;
}
