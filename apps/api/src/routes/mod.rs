pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::conversion::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let body_limit = DefaultBodyLimit::max(state.config.max_upload_bytes);

    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/v1/conversions", post(handlers::handle_convert))
        .route("/api/v1/conversions/export", post(handlers::handle_export))
        .route("/api/v1/conversions/preview", post(handlers::handle_preview))
        .route("/api/v1/error-analysis", post(handlers::handle_error_analysis))
        .layer(body_limit)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::box_client::fake::FakeDocumentAi;
    use crate::config::{BoxSettings, Config, PipelineConfig};

    const BOUNDARY: &str = "conga-docgen-test-boundary";

    const TEMPLATE: &[u8] = "Account: «Account_Name»\nEmail: «Contact_Email»\n".as_bytes();
    const QUERY: &[u8] = b"SELECT Account.Name, Contact.Email FROM Account";
    const SCHEMA: &[u8] = br#"[
        {"targetObject": "Account", "targetField": "Name", "dataType": "text"},
        {"targetObject": "Contact", "targetField": "Email", "dataType": "email"}
    ]"#;
    const TWO_ROWS: &str = "conga_field,box_field,confidence,notes\n\
        «Account_Name»,{{Account.Name}},high,Direct mapping\n\
        «Contact_Email»,{{Contact.Email}},high,Related contact";

    fn config(max_upload_bytes: usize) -> Config {
        Config {
            box_settings: BoxSettings {
                developer_token: "test-token".to_string(),
                api_url: "http://box.invalid".to_string(),
                upload_url: "http://upload.box.invalid".to_string(),
                parent_folder_id: "0".to_string(),
                ai_model: "test-model".to_string(),
            },
            pipeline: PipelineConfig::default(),
            port: 0,
            rust_log: "info".to_string(),
            max_upload_bytes,
        }
    }

    fn app(ai: Arc<FakeDocumentAi>) -> Router {
        build_router(AppState {
            ai,
            config: config(1024 * 1024),
        })
    }

    /// (part name, optional file name, content)
    fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, filename, content) in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            let disposition = match filename {
                Some(f) => format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{f}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                ),
                None => format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n"),
            };
            body.extend_from_slice(disposition.as_bytes());
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn full_form() -> Vec<u8> {
        multipart_body(&[
            ("template", Some("template.txt"), TEMPLATE),
            ("query", None, QUERY),
            ("schema", Some("schema.json"), SCHEMA),
        ])
    }

    fn multipart_request(uri: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app(Arc::new(FakeDocumentAi::default()))
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "conga-docgen-api");
    }

    #[tokio::test]
    async fn test_conversion_returns_rows_and_diagnostics() {
        let ai = Arc::new(FakeDocumentAi::answering(TWO_ROWS));
        let response = app(ai.clone())
            .oneshot(multipart_request("/api/v1/conversions", full_form()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "success");
        assert_eq!(
            body["columns"],
            serde_json::json!(["conga_field", "box_field", "confidence", "notes"])
        );
        assert_eq!(body["rows"].as_array().unwrap().len(), 2);
        assert_eq!(body["rows"][0]["conga_field"], "Account_Name");
        assert_eq!(body["rows"][0]["box_field"], "{{Account.Name}}");
        assert!(!body["diagnostics"].as_array().unwrap().is_empty());
        assert_eq!(ai.calls(), 1);
        assert_eq!(ai.uploads.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_stage_failure_is_a_failed_outcome_not_an_http_error() {
        let ai = Arc::new(FakeDocumentAi::answering("I could not find any fields."));
        let response = app(ai)
            .oneshot(multipart_request("/api/v1/conversions", full_form()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "failed");
        assert!(body["rows"].as_array().unwrap().is_empty());
        let last = body["diagnostics"].as_array().unwrap().last().cloned().unwrap();
        assert_eq!(last["error_kind"], "response_parse");
        assert_eq!(last["context"], "I could not find any fields.");
    }

    #[tokio::test]
    async fn test_missing_part_is_bad_request() {
        let ai = Arc::new(FakeDocumentAi::answering(TWO_ROWS));
        let body = multipart_body(&[
            ("template", Some("template.txt"), TEMPLATE),
            ("query", None, QUERY),
        ]);
        let response = app(ai.clone())
            .oneshot(multipart_request("/api/v1/conversions", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(body["error"]["message"], "Missing 'schema' part");
        assert_eq!(ai.calls(), 0);
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected() {
        let router = build_router(AppState {
            ai: Arc::new(FakeDocumentAi::default()),
            config: config(64),
        });
        let response = router
            .oneshot(multipart_request("/api/v1/conversions", full_form()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_export_returns_zip_with_status_header() {
        let ai = Arc::new(FakeDocumentAi::answering(TWO_ROWS));
        let response = app(ai)
            .oneshot(multipart_request("/api/v1/conversions/export", full_form()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
        assert_eq!(response.headers()["x-conversion-status"], "success");

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
        let mut mapping = String::new();
        archive
            .by_name("conga_to_box_mapping.csv")
            .unwrap()
            .read_to_string(&mut mapping)
            .unwrap();
        assert!(mapping.starts_with("conga_field,box_field,confidence,notes\n"));
        assert!(mapping.contains("Account_Name,{{Account.Name}},high,Direct mapping"));
        assert!(archive.by_name("original_template.txt").is_ok());
    }

    #[tokio::test]
    async fn test_preview_never_calls_the_service() {
        let ai = Arc::new(FakeDocumentAi::default());
        let response = app(ai.clone())
            .oneshot(multipart_request("/api/v1/conversions/preview", full_form()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let tokens: Vec<_> = body["merge_fields"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["token"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(tokens, vec!["Account_Name", "Contact_Email"]);
        assert_eq!(body["query"]["root_object"], "Account");
        assert_eq!(body["schema_fields"].as_array().unwrap().len(), 2);
        assert_eq!(ai.calls(), 0);
        assert!(ai.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_error_analysis_endpoint() {
        let ai = Arc::new(FakeDocumentAi::answering(
            "Cause: The AI answer had no table.\nSolutions: Retry the conversion.",
        ));
        let request = Request::post("/api/v1/error-analysis")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"error_context":"response_parse: no table found"}"#))
            .unwrap();
        let response = app(ai).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["analysis"]["cause"], "The AI answer had no table.");
        assert_eq!(body["analysis"]["solutions"], "Retry the conversion.");
    }

    #[tokio::test]
    async fn test_error_analysis_rejects_empty_context() {
        let request = Request::post("/api/v1/error-analysis")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"error_context":"   "}"#))
            .unwrap();
        let response = app(Arc::new(FakeDocumentAi::default()))
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
