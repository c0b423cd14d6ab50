/// Integration tests with mocked external APIs
/// Exercises the WhatsApp, Razorpay, Cloudinary and Gemini clients without
/// hitting real services
use serde_json::{json, Value};
use std::sync::Mutex;
use vyapar_connect::assistant::{run_chat, AssistantClient, ToolExecutor, MAX_TOOL_ROUNDS};
use vyapar_connect::circuit_breaker::create_api_circuit_breaker;
use vyapar_connect::config::{CloudinaryConfig, RazorpayConfig};
use vyapar_connect::errors::AppError;
use vyapar_connect::gateway_client::{PaymentGatewayClient, PaymentLinkRequest};
use vyapar_connect::media::MediaClient;
use vyapar_connect::models::ChatTurn;
use vyapar_connect::whatsapp_client::{WhatsAppClient, WhatsAppCredentials};
use wiremock::matchers::{
    body_partial_json, body_string_contains, header, method, path, query_param,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn credentials() -> WhatsAppCredentials {
    WhatsAppCredentials {
        phone_number_id: "1234567890".to_string(),
        access_token: "test_access_token".to_string(),
    }
}

fn whatsapp_client(server: &MockServer) -> WhatsAppClient {
    WhatsAppClient::new(&server.uri(), "v19.0", create_api_circuit_breaker()).unwrap()
}

#[tokio::test]
async fn test_whatsapp_send_text_returns_provider_id() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v19.0/1234567890/messages"))
        .and(header("authorization", "Bearer test_access_token"))
        .and(body_partial_json(json!({
            "messaging_product": "whatsapp",
            "to": "919876543210",
            "type": "text",
            "text": { "body": "Your order is ready" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messaging_product": "whatsapp",
            "contacts": [{ "input": "919876543210", "wa_id": "919876543210" }],
            "messages": [{ "id": "wamid.HBgM123" }]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = whatsapp_client(&mock_server);
    let id = client
        .send_text(&credentials(), "+919876543210", "Your order is ready")
        .await
        .unwrap();

    assert_eq!(id, "wamid.HBgM123");
}

#[tokio::test]
async fn test_whatsapp_template_carries_body_params() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v19.0/1234567890/messages"))
        .and(body_partial_json(json!({
            "type": "template",
            "template": {
                "name": "diwali_offer",
                "language": { "code": "hi" },
                "components": [{
                    "type": "body",
                    "parameters": [{ "type": "text", "text": "Asha" }]
                }]
            }
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "messages": [{ "id": "wamid.T1" }] })),
        )
        .mount(&mock_server)
        .await;

    let client = whatsapp_client(&mock_server);
    let id = client
        .send_template(
            &credentials(),
            "919876543210",
            "diwali_offer",
            "hi",
            &["Asha".to_string()],
        )
        .await
        .unwrap();

    assert_eq!(id, "wamid.T1");
}

#[tokio::test]
async fn test_whatsapp_error_includes_provider_message() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "message": "(#131030) Recipient phone number not in allowed list",
                "type": "OAuthException",
                "code": 131030
            }
        })))
        .mount(&mock_server)
        .await;

    let client = whatsapp_client(&mock_server);
    let err = client
        .send_text(&credentials(), "919876543210", "hi")
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::ExternalApiError(_)));
    assert!(err.to_string().contains("not in allowed list"));
}

#[tokio::test]
async fn test_whatsapp_breaker_opens_after_server_errors() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(5)
        .mount(&mock_server)
        .await;

    let client = whatsapp_client(&mock_server);
    for _ in 0..5 {
        assert!(client
            .send_text(&credentials(), "919876543210", "hi")
            .await
            .is_err());
    }

    let err = client
        .send_text(&credentials(), "919876543210", "hi")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("temporarily unavailable"));
}

#[tokio::test]
async fn test_whatsapp_client_errors_do_not_trip_breaker() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(7)
        .mount(&mock_server)
        .await;

    let client = whatsapp_client(&mock_server);
    for _ in 0..7 {
        let err = client
            .send_text(&credentials(), "919876543210", "hi")
            .await
            .unwrap_err();
        assert!(!err.to_string().contains("temporarily unavailable"));
    }
}

#[tokio::test]
async fn test_razorpay_payment_link_created() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/payment_links"))
        // base64("rzp_test_key:rzp_test_secret")
        .and(header(
            "authorization",
            "Basic cnpwX3Rlc3Rfa2V5OnJ6cF90ZXN0X3NlY3JldA==",
        ))
        .and(body_partial_json(json!({
            "amount": 149950,
            "currency": "INR",
            "reference_id": "5f0c2f9e-8d7a-4a51-9f43-0b6a1e2c7d11",
            "notes": { "payment_id": "5f0c2f9e-8d7a-4a51-9f43-0b6a1e2c7d11" },
            "customer": { "name": "Asha Traders", "contact": "+919876543210" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "plink_Abc123",
            "short_url": "https://rzp.io/i/abc123",
            "status": "created",
            "amount": 149950
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = PaymentGatewayClient::new(
        &mock_server.uri(),
        &RazorpayConfig {
            key_id: "rzp_test_key".to_string(),
            key_secret: "rzp_test_secret".to_string(),
        },
    )
    .unwrap();

    let link = client
        .create_payment_link(&PaymentLinkRequest {
            amount_paise: 149950,
            currency: "INR",
            description: "Order ORD-00042",
            reference_id: "5f0c2f9e-8d7a-4a51-9f43-0b6a1e2c7d11",
            customer_name: "Asha Traders",
            customer_phone: "+919876543210",
        })
        .await
        .unwrap();

    assert_eq!(link.id, "plink_Abc123");
    assert_eq!(link.short_url, "https://rzp.io/i/abc123");
}

#[tokio::test]
async fn test_razorpay_error_is_external() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/payment_links"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": { "code": "BAD_REQUEST_ERROR", "description": "Authentication failed" }
        })))
        .mount(&mock_server)
        .await;

    let client = PaymentGatewayClient::new(
        &mock_server.uri(),
        &RazorpayConfig {
            key_id: "wrong".to_string(),
            key_secret: "wrong".to_string(),
        },
    )
    .unwrap();

    let err = client
        .create_payment_link(&PaymentLinkRequest {
            amount_paise: 100,
            currency: "INR",
            description: "x",
            reference_id: "ORD-00001",
            customer_name: "x",
            customer_phone: "+919876543210",
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::ExternalApiError(_)));
    assert!(err.to_string().contains("Authentication failed"));
}

fn cloudinary_client(server: &MockServer) -> MediaClient {
    MediaClient::new(
        &server.uri(),
        CloudinaryConfig {
            cloud_name: "demo".to_string(),
            api_key: "123456".to_string(),
            api_secret: "shh".to_string(),
        },
    )
    .unwrap()
}

#[tokio::test]
async fn test_cloudinary_upload_returns_secure_url() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1_1/demo/image/upload"))
        .and(body_string_contains("api_key=123456"))
        .and(body_string_contains("signature="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "public_id": "vyapar/products/abc",
            "secure_url": "https://res.cloudinary.com/demo/image/upload/vyapar/products/abc.jpg"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = cloudinary_client(&mock_server);
    let url = client
        .upload_image("https://example.com/saree.jpg")
        .await
        .unwrap();

    assert_eq!(
        url,
        "https://res.cloudinary.com/demo/image/upload/vyapar/products/abc.jpg"
    );
}

#[tokio::test]
async fn test_cloudinary_rejects_plain_strings_without_calling_out() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = cloudinary_client(&mock_server);
    let err = client.upload_image("not an image").await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

/// Tool executor that answers every call with a canned order list.
struct RecordingExecutor {
    calls: Mutex<Vec<(String, Value)>>,
}

impl ToolExecutor for RecordingExecutor {
    async fn execute(&self, name: &str, args: &Value) -> Result<Value, AppError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), args.clone()));
        match name {
            "list_orders" => Ok(json!([{ "order_number": "ORD-00007", "total": "2500.00" }])),
            _ => Err(AppError::BadRequest(format!("Unknown tool '{}'", name))),
        }
    }
}

#[tokio::test]
async fn test_assistant_runs_tool_then_answers() {
    let mock_server = MockServer::start().await;

    // Second round: the request now carries the tool result.
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-test:generateContent"))
        .and(body_string_contains("functionResponse"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{ "text": "You have one pending order: ORD-00007 for ₹2500." }]
                }
            }]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    // First round: the model asks for a tool.
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-test:generateContent"))
        .and(query_param("key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{
                        "functionCall": { "name": "list_orders", "args": { "status": "pending" } }
                    }]
                }
            }]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = AssistantClient::new(&mock_server.uri(), "gemini-test", "test-key").unwrap();
    let executor = RecordingExecutor {
        calls: Mutex::new(Vec::new()),
    };
    let history = vec![
        ChatTurn {
            role: "user".to_string(),
            text: "Hi".to_string(),
        },
        ChatTurn {
            role: "model".to_string(),
            text: "Hello! How can I help?".to_string(),
        },
    ];

    let response = run_chat(
        &client,
        &executor,
        "Asha Traders",
        &history,
        "Which orders are pending?",
    )
    .await
    .unwrap();

    assert_eq!(
        response.reply,
        "You have one pending order: ORD-00007 for ₹2500."
    );
    assert_eq!(response.tool_calls.len(), 1);
    assert_eq!(response.tool_calls[0].name, "list_orders");

    let calls = executor.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1["status"], "pending");
}

#[tokio::test]
async fn test_assistant_surfaces_gemini_errors() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("quota exceeded"))
        .mount(&mock_server)
        .await;

    let client = AssistantClient::new(&mock_server.uri(), "gemini-test", "test-key").unwrap();
    let executor = RecordingExecutor {
        calls: Mutex::new(Vec::new()),
    };

    let err = run_chat(&client, &executor, "Shop", &[], "hello")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ExternalApiError(_)));
    assert!(err.to_string().contains("quota exceeded"));
}

fn tool_call_reply(text: Option<&str>, tool: &str) -> Value {
    let mut parts = Vec::new();
    if let Some(text) = text {
        parts.push(json!({ "text": text }));
    }
    parts.push(json!({ "functionCall": { "name": tool, "args": {} } }));
    json!({ "candidates": [{ "content": { "role": "model", "parts": parts } }] })
}

#[tokio::test]
async fn test_assistant_stops_after_max_rounds() {
    let mock_server = MockServer::start().await;

    // The model never stops asking for tools.
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-test:generateContent"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(tool_call_reply(Some("Let me check your orders."), "list_orders")),
        )
        .expect(MAX_TOOL_ROUNDS as u64)
        .mount(&mock_server)
        .await;

    let client = AssistantClient::new(&mock_server.uri(), "gemini-test", "test-key").unwrap();
    let executor = RecordingExecutor {
        calls: Mutex::new(Vec::new()),
    };

    let response = run_chat(&client, &executor, "Shop", &[], "How are sales?")
        .await
        .unwrap();

    assert_eq!(response.reply, "Let me check your orders.");
    assert_eq!(response.tool_calls.len(), MAX_TOOL_ROUNDS);
    assert_eq!(executor.calls.lock().unwrap().len(), MAX_TOOL_ROUNDS);
}

#[tokio::test]
async fn test_assistant_falls_back_without_any_text() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-test:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tool_call_reply(None, "list_orders")))
        .expect(MAX_TOOL_ROUNDS as u64)
        .mount(&mock_server)
        .await;

    let client = AssistantClient::new(&mock_server.uri(), "gemini-test", "test-key").unwrap();
    let executor = RecordingExecutor {
        calls: Mutex::new(Vec::new()),
    };

    let response = run_chat(&client, &executor, "Shop", &[], "How are sales?")
        .await
        .unwrap();

    assert!(response.reply.starts_with("Sorry"));
    assert_eq!(response.tool_calls.len(), MAX_TOOL_ROUNDS);
}

#[tokio::test]
async fn test_assistant_returns_tool_errors_to_model() {
    let mock_server = MockServer::start().await;

    // Second round: the rejected call comes back as an error object.
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-test:generateContent"))
        .and(body_string_contains("Unknown tool 'delete_all_orders'"))
        .and(body_string_contains("\"error\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{ "text": "I cannot delete orders." }]
                }
            }]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-test:generateContent"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(tool_call_reply(None, "delete_all_orders")),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = AssistantClient::new(&mock_server.uri(), "gemini-test", "test-key").unwrap();
    let executor = RecordingExecutor {
        calls: Mutex::new(Vec::new()),
    };

    let response = run_chat(&client, &executor, "Shop", &[], "Delete all my orders")
        .await
        .unwrap();

    assert_eq!(response.reply, "I cannot delete orders.");
    assert_eq!(response.tool_calls.len(), 1);
    assert_eq!(response.tool_calls[0].name, "delete_all_orders");
}
