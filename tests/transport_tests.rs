//! HTTP-level tests for the reqwest transport against a local mock server.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use invoice_relay::{HttpTransport, MultipartPayload, Transport, TransportError};

fn transport() -> HttpTransport {
    HttpTransport::new(Duration::from_secs(5)).expect("failed to build transport")
}

#[tokio::test]
async fn json_reply_is_parsed_and_raw_text_kept() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/trigger"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"resumeUrl": "https://x/r1"})),
        )
        .mount(&server)
        .await;

    let body = json!({"action": "start_process"});
    let parsed = transport()
        .send_json(&format!("{}/trigger", server.uri()), &body)
        .await
        .unwrap();

    assert_eq!(parsed.json, Some(json!({"resumeUrl": "https://x/r1"})));
    assert!(parsed.text.contains("resumeUrl"));
}

#[tokio::test]
async fn non_success_status_surfaces_the_body_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("upstream tunnel down"))
        .mount(&server)
        .await;

    let result = transport()
        .send_json(&server.uri(), &json!({"action": "start_process"}))
        .await;

    match result {
        Err(TransportError::Http { status, body }) => {
            assert_eq!(status, 502);
            assert_eq!(body, "upstream tunnel down");
        }
        other => panic!("expected HTTP error, got {other:?}"),
    }
}

#[tokio::test]
async fn non_json_success_body_is_kept_as_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>interstitial</html>"))
        .mount(&server)
        .await;

    let parsed = transport()
        .send_json(&server.uri(), &json!({"action": "start_process"}))
        .await
        .unwrap();

    assert!(parsed.json.is_none());
    assert_eq!(parsed.text, "<html>interstitial</html>");
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
    // Nothing listens on this port.
    let result = transport()
        .send_json("http://127.0.0.1:9", &json!({"action": "start_process"}))
        .await;

    assert!(matches!(result, Err(TransportError::Network { .. })));
}

#[tokio::test]
async fn multipart_upload_carries_file_and_form_fields() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/resume"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"xfxTrackingId": "T1", "invoiceNo": "INV-1"})),
        )
        .mount(&server)
        .await;

    let payload = MultipartPayload {
        file_name: "invoice.xml".to_string(),
        content_type: "text/xml".to_string(),
        bytes: b"<Invoice/>".to_vec(),
        fields: vec![
            ("resumeUrl".to_string(), "https://x/r1".to_string()),
            ("action".to_string(), "process_invoice".to_string()),
        ],
    };

    let parsed = transport()
        .send_multipart(&format!("{}/resume", server.uri()), payload)
        .await
        .unwrap();
    assert!(parsed.json.is_some());

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("<Invoice/>"));
    assert!(body.contains("invoice.xml"));
    assert!(body.contains("process_invoice"));
    let content_type = requests[0]
        .headers
        .get("content-type")
        .expect("content-type header")
        .to_str()
        .unwrap();
    assert!(content_type.starts_with("multipart/form-data"));
}
