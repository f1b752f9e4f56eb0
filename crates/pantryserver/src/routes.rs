use actix_web::{get, post, web, HttpResponse, Responder, Result as ActixResult};
use actix_ws::Message;
use pantrycore::{Flow, FlowError, Payload};
use pantryruntime::FlowRuntime;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Application state shared across handlers
pub struct AppState {
    pub runtime: Arc<FlowRuntime>,
}

#[derive(Debug, Deserialize)]
pub struct TestRunRequest {
    pub flow: Flow,
    pub payload: Payload,
}

#[derive(Debug, Deserialize)]
pub struct EncryptRequest {
    pub plaintext: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(e: &FlowError) -> HttpResponse {
    let body = ErrorResponse { error: e.to_string() };
    if e.is_structural() {
        HttpResponse::UnprocessableEntity().json(body)
    } else {
        HttpResponse::InternalServerError().json(body)
    }
}

#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "pantry-flow-engine"
    }))
}

/// Node kinds with their capability and config fields, for the editor palette.
#[get("/api/nodes")]
async fn list_node_kinds(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let registry = data.runtime.registry();
    let nodes: Vec<_> = registry
        .list_node_kinds()
        .into_iter()
        .filter_map(|kind| registry.get_metadata(kind))
        .collect();
    Ok(HttpResponse::Ok().json(nodes))
}

#[post("/api/flows/validate")]
async fn validate_flow(data: web::Data<AppState>, flow: web::Json<Flow>) -> ActixResult<impl Responder> {
    let flow = flow.into_inner();
    match data.runtime.validate(&flow) {
        Ok(graph) => {
            let roots: Vec<_> = graph.roots().iter().map(|n| n.id.clone()).collect();
            Ok(HttpResponse::Ok().json(serde_json::json!({ "valid": true, "roots": roots })))
        }
        Err(e) => {
            info!("Flow {} rejected: {}", flow.id, e);
            Ok(error_response(&e))
        }
    }
}

/// Run a flow in test mode against a sample payload.
#[post("/api/flows/test")]
async fn test_flow(data: web::Data<AppState>, req: web::Json<TestRunRequest>) -> ActixResult<impl Responder> {
    let TestRunRequest { flow, payload } = req.into_inner();
    info!("Test run of flow {}", flow.id);

    match data.runtime.test_run(&flow, payload).await {
        Ok(result) => Ok(HttpResponse::Ok().json(result)),
        Err(e) => {
            info!("Flow {} test run rejected: {}", flow.id, e);
            Ok(error_response(&e))
        }
    }
}

#[post("/api/credentials/encrypt")]
async fn encrypt_secret(data: web::Data<AppState>, req: web::Json<EncryptRequest>) -> ActixResult<impl Responder> {
    let Some(vault) = data.runtime.vault() else {
        return Ok(HttpResponse::ServiceUnavailable().json(ErrorResponse {
            error: "vault key is not configured".to_string(),
        }));
    };
    match vault.encrypt(&req.plaintext) {
        Ok(ciphertext) => Ok(HttpResponse::Ok().json(serde_json::json!({ "ciphertext": ciphertext }))),
        Err(e) => Ok(HttpResponse::InternalServerError().json(ErrorResponse { error: e.to_string() })),
    }
}

/// WebSocket endpoint for real-time run events
#[get("/api/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;
    info!("WebSocket client connected");

    let mut events = data.runtime.subscribe_events();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            warn!("WebSocket client lagged; {} events dropped", missed);
                        }
                        Err(_) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check)
        .service(list_node_kinds)
        .service(validate_flow)
        .service(test_flow)
        .service(encrypt_secret)
        .service(websocket_events);
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};
    use pantryruntime::EngineConfig;
    use serde_json::{json, Value};

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn state(vault_key: Option<&str>) -> web::Data<AppState> {
        let runtime = match vault_key {
            Some(key) => {
                let config = EngineConfig {
                    vault_key: Some(key.to_string()),
                    ..Default::default()
                };
                FlowRuntime::builder(config).build().unwrap()
            }
            None => FlowRuntime::new(),
        };
        web::Data::new(AppState {
            runtime: Arc::new(runtime),
        })
    }

    fn flow_json() -> Value {
        json!({
            "id": "flow-1",
            "name": "Dairy alert",
            "isActive": true,
            "nodes": [
                { "id": "trigger-1", "type": "ExpirationTrigger", "position": { "x": 0, "y": 0 }, "config": { "timeOffset": "3" } },
                { "id": "notify-1", "type": "SendNotification", "config": {
                    "channel": "email", "recipient": "chef@example.com", "message": "{{name}} expires soon"
                } }
            ],
            "edges": [
                { "id": "e1", "source": "trigger-1", "target": "notify-1", "sourceHandle": null, "targetHandle": null }
            ]
        })
    }

    #[actix_web::test]
    async fn test_list_nodes() {
        let app = test::init_service(App::new().app_data(state(None)).configure(configure)).await;
        let req = test::TestRequest::get().uri("/api/nodes").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        let kinds = body.as_array().unwrap();
        assert_eq!(kinds.len(), 8);
        assert_eq!(kinds[0]["kind"], json!("ExpirationTrigger"));
        assert_eq!(kinds[0]["capability"], json!("trigger"));
    }

    #[actix_web::test]
    async fn test_validate_ok_and_cycle() {
        let app = test::init_service(App::new().app_data(state(None)).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/flows/validate")
            .set_json(flow_json())
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body, json!({ "valid": true, "roots": ["trigger-1"] }));

        let mut cyclic = flow_json();
        cyclic["nodes"][0]["type"] = json!("UpdateData");
        cyclic["nodes"][0]["config"] = json!({ "targetField": "x", "value": "y" });
        cyclic["edges"]
            .as_array_mut()
            .unwrap()
            .push(json!({ "id": "e2", "source": "notify-1", "target": "trigger-1" }));
        let req = test::TestRequest::post()
            .uri("/api/flows/validate")
            .set_json(cyclic)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[actix_web::test]
    async fn test_test_run_returns_trace() {
        let app = test::init_service(App::new().app_data(state(None)).configure(configure)).await;
        let req = test::TestRequest::post()
            .uri("/api/flows/test")
            .set_json(json!({
                "flow": flow_json(),
                "payload": {
                    "trigger_event": "expiration",
                    "timestamp": "2026-01-15T08:00:00Z",
                    "inventory_item": { "id": "item-101", "name": "Milk (Gallon)", "category": "Dairy", "remaining_days": 2 }
                }
            }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["trace"], json!(["trigger-1", "notify-1"]));
        assert_eq!(body["finalPayload"]["inventory_item"]["id"], json!("item-101"));
        assert!(body["log"].as_array().unwrap().len() >= 4);
    }

    #[actix_web::test]
    async fn test_encrypt_requires_key() {
        let app = test::init_service(App::new().app_data(state(None)).configure(configure)).await;
        let req = test::TestRequest::post()
            .uri("/api/credentials/encrypt")
            .set_json(json!({ "plaintext": "sk-test" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::SERVICE_UNAVAILABLE);

        let app = test::init_service(App::new().app_data(state(Some(KEY))).configure(configure)).await;
        let req = test::TestRequest::post()
            .uri("/api/credentials/encrypt")
            .set_json(json!({ "plaintext": "sk-test" }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let ciphertext = body["ciphertext"].as_str().unwrap();
        assert!(ciphertext.contains(':'));
        assert!(!ciphertext.contains("sk-test"));
    }
}
