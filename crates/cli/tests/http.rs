mod common;

use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode};
use pw_mcp::App;
use pw_mcp::transport::{HttpTransport, Transport};
use serde_json::{Value, json};
use tower::ServiceExt as _;

use common::{call, identity, initialize, mock_app, request};

async fn http_app() -> (axum::Router, App) {
	let app = mock_app().await;
	let http = HttpTransport::new("127.0.0.1:0".parse().unwrap(), "/mcp", identity("alpha")).trust_identity_headers(true);
	http.set_handlers(app.handlers());
	http.set_status_provider(app.status_provider());
	(http.app(), app)
}

async fn send(router: &axum::Router, req: Request<Body>) -> (StatusCode, Bytes) {
	let resp = router.clone().oneshot(req).await.unwrap();
	let status = resp.status();
	let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
	(status, body)
}

fn post(body: &Value) -> Request<Body> {
	Request::builder()
		.method("POST")
		.uri("/mcp")
		.header("content-type", "application/json")
		.body(Body::from(body.to_string()))
		.unwrap()
}

fn get(uri: &str) -> Request<Body> {
	Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_body(body: &Bytes) -> Value {
	serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn initialize_negotiates_over_post() {
	let (router, _app) = http_app().await;
	let (status, body) = send(&router, post(&initialize(1))).await;

	assert_eq!(status, StatusCode::OK);
	let body = json_body(&body);
	assert_eq!(body["id"], 1);
	assert_eq!(body["result"]["protocolVersion"], "2025-03-26");
	assert_eq!(body["result"]["serverInfo"]["name"], "pw-mcp");
	assert_eq!(body["result"]["capabilities"]["tools"]["listChanged"], false);
}

#[tokio::test]
async fn wide_numeric_ids_echo_unchanged() {
	let (router, _app) = http_app().await;
	for id in [json!(1.5), json!(9223372036854775808u64)] {
		let (status, body) = send(&router, post(&json!({ "jsonrpc": "2.0", "id": id.clone(), "method": "ping" }))).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(json_body(&body)["id"], id);
	}
}

#[tokio::test]
async fn unsupported_version_is_a_jsonrpc_error() {
	let (router, _app) = http_app().await;
	let (status, body) = send(&router, post(&request(2, "initialize", json!({ "protocolVersion": "1999-01-01" })))).await;

	assert_eq!(status, StatusCode::OK);
	let body = json_body(&body);
	assert_eq!(body["error"]["code"], -32602);
	assert!(body["error"]["message"].as_str().unwrap().contains("1999-01-01"));
	assert!(body["error"]["data"]["supportedVersions"].as_array().unwrap().len() >= 3);
}

#[tokio::test]
async fn notification_gets_no_content() {
	let (router, _app) = http_app().await;
	let note = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
	let (status, body) = send(&router, post(&note)).await;
	assert_eq!(status, StatusCode::NO_CONTENT);
	assert!(body.is_empty());
}

#[tokio::test]
async fn envelope_errors_are_flat_400s() {
	let (router, _app) = http_app().await;

	let bad_version = json!({ "jsonrpc": "1.0", "id": 1, "method": "ping" });
	let (status, body) = send(&router, post(&bad_version)).await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	let body = json_body(&body);
	assert_eq!(body["success"], false);
	assert!(body["error"].as_str().unwrap().contains("jsonrpc"));

	let bad_method = json!({ "jsonrpc": "2.0", "id": 1, "method": 7 });
	let (status, body) = send(&router, post(&bad_method)).await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(json_body(&body)["success"], false);
}

#[tokio::test]
async fn unknown_method_stays_inside_the_envelope() {
	let (router, _app) = http_app().await;
	let (status, body) = send(&router, post(&request(3, "resources/list", json!({})))).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(json_body(&body)["error"]["code"], -32601);
}

#[tokio::test]
async fn non_post_verbs_are_rejected() {
	let (router, _app) = http_app().await;
	for method in ["GET", "PUT", "DELETE"] {
		let req = Request::builder().method(method).uri("/mcp").body(Body::empty()).unwrap();
		let (status, body) = send(&router, req).await;
		assert_eq!(status, StatusCode::BAD_REQUEST, "{method}");
		let body = json_body(&body);
		assert_eq!(body["success"], false);
		assert!(body["error"].as_str().unwrap().contains(method));
	}
}

#[tokio::test]
async fn trusted_headers_scope_tool_calls() {
	let (router, _app) = http_app().await;

	let mut req = post(&call(4, "browser_create", json!({ "teamId": "alpha" })));
	req.headers_mut().insert("x-team-id", "beta".parse().unwrap());
	let (status, body) = send(&router, req).await;
	assert_eq!(status, StatusCode::OK);
	let result = &json_body(&body)["result"];
	assert_eq!(result["isError"], false);
	assert_eq!(result["structuredContent"]["metadata"]["teamId"], "beta");
	let session = result["structuredContent"]["result"]["sessionId"].as_str().unwrap().to_string();

	// Configured identity is alpha; the session belongs to beta.
	let (_, body) = send(
		&router,
		post(&call(5, "browser_navigate", json!({ "sessionId": session, "url": "about:blank", "teamId": "beta" }))),
	)
	.await;
	let result = &json_body(&body)["result"];
	assert_eq!(result["isError"], true);
	assert_eq!(result["structuredContent"]["error"]["code"], "ACCESS_DENIED");
}

#[tokio::test]
async fn status_routes_report_plain_json() {
	let (router, _app) = http_app().await;
	send(&router, post(&initialize(1))).await;
	send(&router, post(&call(2, "browser_create", json!({})))).await;

	let (status, body) = send(&router, get("/health")).await;
	assert_eq!(status, StatusCode::OK);
	let health = json_body(&body);
	assert_eq!(health["status"], "ok");
	assert_eq!(health["transport"], "http");
	assert_eq!(health["protocolState"], "ready");

	let (status, body) = send(&router, get("/metrics")).await;
	assert_eq!(status, StatusCode::OK);
	let metrics = json_body(&body);
	assert_eq!(metrics["pool"]["totalInstances"], 1);
	assert_eq!(metrics["sessions"]["activeSessions"], 1);
	assert_eq!(metrics["sessions"]["sessionsByTeam"]["alpha"], 1);

	let (status, body) = send(&router, get("/tools")).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(json_body(&body)["tools"].as_array().unwrap().len(), 8);
}

#[tokio::test]
async fn listener_binds_and_stops() {
	let app = mock_app().await;
	let http = HttpTransport::new("127.0.0.1:0".parse().unwrap(), "/mcp", identity("alpha"));
	http.set_handlers(app.handlers());

	assert!(http.start().await.is_err());
	http.initialize().await.unwrap();
	assert_ne!(http.local_addr().unwrap().port(), 0);
	http.start().await.unwrap();
	assert!(http.is_running());

	http.stop().await.unwrap();
	assert!(!http.is_running());
	http.wait().await;
}
