use reqwest::{header, Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, error};

use tutor_core::llm::{InvokeError, InvokeOpts, InvokeResult, PromptClient, ResponseFormat};
use tutor_core::schema::{self, SchemaFailure};

use crate::worker::config::WorkerConfig;

/// Fields checked, in order, for the model output inside a reply envelope.
const CONTENT_FIELDS: [&str; 3] = ["response", "text", "message"];
/// Fields checked, in order, for an error message inside a reply envelope.
const ERROR_FIELDS: [&str; 3] = ["error", "message", "details"];

#[derive(Clone)]
pub struct WorkerClient {
    http: Client,
    cfg: WorkerConfig,
}

impl WorkerClient {
    pub fn new(cfg: WorkerConfig) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::HeaderName::from_bytes(cfg.api_key_header.as_bytes())?,
            header::HeaderValue::from_str(&cfg.api_key)?,
        );
        let mut builder = Client::builder().default_headers(headers).use_rustls_tls();
        if let Some(p) = &cfg.proxy {
            builder = builder.proxy(reqwest::Proxy::all(p)?);
        }
        // No request timeout: callers own their deadlines.
        let http = builder.build()?;
        Ok(Self { http, cfg })
    }

    fn build_message(&self, prompt: &str, opts: &InvokeOpts) -> String {
        match (&opts.schema, opts.format) {
            (Some(s), ResponseFormat::Json) if opts.advertise_schema => {
                format!("{prompt}\n\n{}", schema::prompt_hint(s))
            }
            _ => prompt.to_string(),
        }
    }
}

#[allow(async_fn_in_trait)]
impl PromptClient for WorkerClient {
    async fn invoke(
        &self,
        prompt: &str,
        opts: &InvokeOpts,
    ) -> Result<InvokeResult, InvokeError> {
        let message = self.build_message(prompt, opts);
        let body = json!({
            "message": message,
            "model": self.cfg.model,
            "responseFormat": opts.format,
        });
        debug!(target:"gateway::worker", "invoke model={} format={:?}", self.cfg.model, opts.format);

        let resp = self
            .http
            .post(self.cfg.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_err)?;
        let status = resp.status();
        // The body is read in full before any parse attempt, so every
        // failure path can report the literal text received.
        let raw = resp
            .text()
            .await
            .map_err(|e| InvokeError::Other(format!("read body: {e}")))?;
        let envelope: Option<Value> = serde_json::from_str(&raw).ok();

        if !status.is_success() {
            error!(target:"gateway::worker", "gateway error status={} body={}", status, raw);
            return Err(gateway_error(status, envelope, &raw));
        }

        let content = envelope
            .as_ref()
            .and_then(|env| first_string_field(env, &CONTENT_FIELDS))
            .unwrap_or_default()
            .to_string();

        match opts.format {
            ResponseFormat::Text => Ok(InvokeResult::Text(content)),
            ResponseFormat::Json => {
                let cleaned = strip_code_fences(&content);
                let value: Value = serde_json::from_str(cleaned).map_err(|e| {
                    error!(target:"gateway::worker", "non-JSON model output: {}", content);
                    InvokeError::MalformedOutput {
                        message: e.to_string(),
                        raw: content.clone(),
                    }
                })?;
                if let Some(s) = &opts.schema {
                    if let Err(issues) = schema::validate(s, &value) {
                        return Err(InvokeError::Validation(SchemaFailure { issues, value }));
                    }
                }
                Ok(InvokeResult::Json(value))
            }
        }
    }
}

fn map_reqwest_err(e: reqwest::Error) -> InvokeError {
    if e.is_request() || e.is_connect() {
        InvokeError::Network(e.to_string())
    } else {
        InvokeError::Other(e.to_string())
    }
}

fn gateway_error(status: StatusCode, envelope: Option<Value>, raw: &str) -> InvokeError {
    let message = envelope
        .as_ref()
        .and_then(|env| first_string_field(env, &ERROR_FIELDS))
        .map(str::to_string)
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| "gateway request failed".to_string());
    let detail = envelope.unwrap_or_else(|| json!({ "raw": raw }));
    InvokeError::Gateway {
        status: status.as_u16(),
        message,
        detail,
    }
}

/// First non-empty string among `fields`, in order. The precedence rule is
/// part of the gateway contract, so it stays an explicit ordered list
/// rather than chained lookups.
fn first_string_field<'a>(envelope: &'a Value, fields: &[&str]) -> Option<&'a str> {
    fields
        .iter()
        .filter_map(|f| envelope.get(*f).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty())
}

/// Strip one surrounding markdown code fence, tagged `json` or bare.
/// Unfenced input comes back unchanged, so stripping twice is a no-op.
fn strip_code_fences(s: &str) -> &str {
    let trimmed = s.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    use tutor_core::schema::{Field, Kind, Schema};
    use url::Url;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn colors_schema() -> Schema {
        Schema::new(vec![Field::required(
            "colors",
            Kind::Array {
                items: Box::new(Kind::String),
                min_items: Some(2),
            },
        )])
    }

    fn test_client(server: &MockServer) -> WorkerClient {
        let cfg = WorkerConfig::new(Url::parse(&server.uri()).unwrap(), "test-key");
        WorkerClient::new(cfg).unwrap()
    }

    #[test]
    fn strip_code_fences_handles_tagged_and_bare_fences() {
        assert_eq!(
            strip_code_fences("```json\n{\"a\":1}\n```"),
            "{\"a\":1}"
        );
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn strip_code_fences_is_idempotent() {
        let once = strip_code_fences("```json\n{\"a\":1}\n```");
        assert_eq!(strip_code_fences(once), once);
    }

    #[test]
    fn first_string_field_follows_declared_order() {
        let env = json!({ "message": "second", "error": "first" });
        assert_eq!(first_string_field(&env, &ERROR_FIELDS), Some("first"));
    }

    #[test]
    fn first_string_field_skips_empty_and_non_string_values() {
        let env = json!({ "response": "", "text": 42, "message": "fallback" });
        assert_eq!(first_string_field(&env, &CONTENT_FIELDS), Some("fallback"));
        assert_eq!(first_string_field(&json!({}), &CONTENT_FIELDS), None);
    }

    #[test]
    fn schema_is_appended_only_when_advertised() {
        let cfg = WorkerConfig::new(Url::parse("http://localhost/").unwrap(), "k");
        let client = WorkerClient::new(cfg).unwrap();

        let advertised = InvokeOpts::json().with_schema(colors_schema());
        let msg = client.build_message("list 2 colors", &advertised);
        assert!(msg.starts_with("list 2 colors\n\n"));
        assert!(msg.contains("\"colors\" (array of string, required, at least 2 items)"));

        let silent = InvokeOpts::json().with_validation_schema(colors_schema());
        assert_eq!(client.build_message("list 2 colors", &silent), "list 2 colors");
    }

    #[tokio::test]
    async fn fenced_json_reply_is_stripped_parsed_and_validated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("x-api-key", "test-key"))
            .and(body_partial_json(json!({
                "model": "@cf/meta/llama-3.3-70b-instruct",
                "responseFormat": "json"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": "```json\n{\"colors\":[\"red\",\"blue\"]}\n```"
            })))
            .mount(&server)
            .await;

        let cfg = WorkerConfig::new(Url::parse(&server.uri()).unwrap(), "test-key")
            .with_model("@cf/meta/llama-3.3-70b-instruct");
        let client = WorkerClient::new(cfg).unwrap();
        let opts = InvokeOpts::json().with_schema(colors_schema());
        let result = client.invoke("list 2 colors", &opts).await.unwrap();

        assert_eq!(result.as_json(), Some(&json!({ "colors": ["red", "blue"] })));
    }

    #[tokio::test]
    async fn gateway_error_uses_error_field_and_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(json!({ "error": "rate limited" })),
            )
            .mount(&server)
            .await;

        let client = test_client(&server);
        let err = client
            .invoke("hi", &InvokeOpts::json())
            .await
            .unwrap_err();

        match err {
            InvokeError::Gateway {
                status,
                message,
                detail,
            } => {
                assert_eq!(status, 500);
                assert_eq!(message, "rate limited");
                assert_eq!(detail, json!({ "error": "rate limited" }));
            }
            other => panic!("expected Gateway, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_body_without_known_fields_falls_back_to_status_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({ "nope": 1 })))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let err = client
            .invoke("hi", &InvokeOpts::json())
            .await
            .unwrap_err();

        match err {
            InvokeError::Gateway { status, message, .. } => {
                assert_eq!(status, 503);
                assert_eq!(message, "Service Unavailable");
            }
            other => panic!("expected Gateway, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_json_error_body_keeps_raw_text_as_detail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let err = client
            .invoke("hi", &InvokeOpts::json())
            .await
            .unwrap_err();

        match err {
            InvokeError::Gateway {
                status,
                message,
                detail,
            } => {
                assert_eq!(status, 500);
                assert_eq!(message, "Internal Server Error");
                assert_eq!(detail, json!({ "raw": "boom" }));
            }
            other => panic!("expected Gateway, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_json_content_in_json_mode_fails_with_raw_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "response": "not json" })),
            )
            .mount(&server)
            .await;

        let client = test_client(&server);
        let err = client
            .invoke("hi", &InvokeOpts::json())
            .await
            .unwrap_err();

        match err {
            InvokeError::MalformedOutput { raw, .. } => assert_eq!(raw, "not json"),
            other => panic!("expected MalformedOutput, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn json_mode_without_schema_returns_parsed_value_unvalidated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": "{\"anything\": [1, 2, 3]}"
            })))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let result = client.invoke("hi", &InvokeOpts::json()).await.unwrap();
        assert_eq!(result, InvokeResult::Json(json!({ "anything": [1, 2, 3] })));
    }

    #[tokio::test]
    async fn text_mode_returns_json_looking_content_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "responseFormat": "text" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": "{\"k\": 1}"
            })))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let result = client.invoke("hi", &InvokeOpts::text()).await.unwrap();
        assert_eq!(result.as_text(), Some("{\"k\": 1}"));
        assert_eq!(result.as_json(), None);
    }

    #[tokio::test]
    async fn content_falls_back_to_later_envelope_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": "",
                "text": "hello"
            })))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let result = client.invoke("hi", &InvokeOpts::text()).await.unwrap();
        assert_eq!(result, InvokeResult::Text("hello".to_string()));
    }

    #[tokio::test]
    async fn validation_failure_carries_issues_and_offending_value() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": "{\"colors\":[\"red\"]}"
            })))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let opts = InvokeOpts::json().with_validation_schema(colors_schema());
        let err = client.invoke("list 2 colors", &opts).await.unwrap_err();

        match err {
            InvokeError::Validation(failure) => {
                assert_eq!(failure.issues.len(), 1);
                assert_eq!(failure.issues[0].code, "MIN_ITEMS");
                assert_eq!(failure.value, json!({ "colors": ["red"] }));
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }
}
