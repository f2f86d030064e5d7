#![allow(dead_code)]

use std::sync::Arc;

use pw_mcp::App;
use pw_mcp_protocol::CallerIdentity;
use pw_mcp_runtime::PoolConfig;
use pw_mcp_runtime::testing::MockFactory;
use serde_json::{Value, json};

pub async fn mock_app() -> App {
	let config = PoolConfig {
		max_size: 4,
		min_size: 0,
		..PoolConfig::default()
	};
	App::start(config, Arc::new(MockFactory::new())).await.unwrap()
}

pub fn identity(team: &str) -> CallerIdentity {
	CallerIdentity::new(team, "tester")
}

pub fn request(id: i64, method: &str, params: Value) -> Value {
	json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}

pub fn initialize(id: i64) -> Value {
	request(
		id,
		"initialize",
		json!({ "protocolVersion": "2025-03-26", "clientInfo": { "name": "test-client", "version": "0" } }),
	)
}

pub fn call(id: i64, tool: &str, arguments: Value) -> Value {
	request(id, "tools/call", json!({ "name": tool, "arguments": arguments }))
}
