//! Generic outbound HTTP step
//!
//! Failure texts are phrased so the error classifier routes them: transport
//! problems mention the connection or network, timeouts say timeout and
//! 5xx answers say server. The URL never appears in a failure text, since a
//! path segment like `/network` would steer the classifier; it is logged
//! instead.

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;

use crate::execution::error::StepError;
use crate::workflow::condition::coerce_string;
use crate::workflow::{Results, StepConfig, Variables};

use super::StepHandler;

/// Typed form of an http-request step's config.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub parse_json: bool,
}

impl HttpRequest {
    pub fn from_config(config: &StepConfig) -> Result<Self, StepError> {
        let url = config.require_str("url")?.to_string();
        let method = config.str("method")?.unwrap_or("GET").to_uppercase();
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| StepError::invalid_config("method", format!("unknown method '{}'", method)))?;

        let headers = config
            .object("headers")?
            .map(|map| {
                map.iter()
                    .map(|(name, value)| (name.clone(), coerce_string(value)))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            url,
            method,
            headers,
            body: config.get("body").filter(|b| !b.is_null()).cloned(),
            parse_json: config.bool("parse_json")?.unwrap_or(true),
        })
    }
}

/// Sends the configured request with `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct HttpRequestHandler {
    client: Client,
}

impl HttpRequestHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a preconfigured client (proxies, timeouts, TLS).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn send(&self, request: HttpRequest) -> Result<Value, StepError> {
        debug!("{} {}", request.method, request.url);

        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        builder = match &request.body {
            Some(Value::String(text)) => builder.body(text.clone()),
            Some(body) => builder.json(body),
            None => builder,
        };

        let response = builder.send().await.map_err(|e| {
            debug!("{} {} failed: {}", request.method, request.url, e);
            transport_error(e)
        })?;
        let status = response.status();
        if !status.is_success() {
            debug!("{} {} answered {}", request.method, request.url, status);
            return Err(status_error(status));
        }

        let text = response.text().await.map_err(transport_error)?;
        if !request.parse_json {
            return Ok(Value::String(text));
        }
        serde_json::from_str(&text).map_err(|e| {
            debug!("{} {} returned a body that is not JSON", request.method, request.url);
            StepError::http(format!("invalid JSON response: {}", e))
        })
    }
}

#[async_trait]
impl StepHandler for HttpRequestHandler {
    async fn execute(
        &self,
        config: &StepConfig,
        _variables: &Variables,
        _results: &Results,
    ) -> Result<Value, StepError> {
        self.send(HttpRequest::from_config(config)?).await
    }
}

fn transport_error(err: reqwest::Error) -> StepError {
    let err = err.without_url();
    if err.is_timeout() {
        StepError::http(format!("request timeout: {}", err))
    } else if err.is_connect() {
        StepError::http(format!("connection error: {}", err))
    } else {
        StepError::http(format!("network error: {}", err))
    }
}

fn status_error(status: StatusCode) -> StepError {
    let code = status.as_u16();
    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        StepError::http(format!("request timeout: HTTP {}", code))
    } else if status.is_server_error() {
        StepError::http(format!("server error: HTTP {}", code))
    } else if status.is_client_error() {
        StepError::http(format!("invalid request: HTTP {}", code))
    } else {
        StepError::http(format!("unexpected HTTP {}", code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::{ErrorClassifier, ErrorType, HeuristicClassifier};
    use serde_json::json;

    #[test]
    fn test_request_defaults() {
        let config = StepConfig::new().with("url", "http://localhost/api");
        let request = HttpRequest::from_config(&config).unwrap();

        assert_eq!(request.method, Method::GET);
        assert!(request.parse_json);
        assert!(request.headers.is_empty());
        assert!(request.body.is_none());
    }

    #[test]
    fn test_request_from_full_config() {
        let config = StepConfig::new()
            .with("url", "http://localhost/api")
            .with("method", "post")
            .with("headers", json!({"x-trace": "abc", "x-n": 1}))
            .with("body", json!({"q": "rust"}))
            .with("parse_json", false);
        let request = HttpRequest::from_config(&config).unwrap();

        assert_eq!(request.method, Method::POST);
        assert!(request.headers.contains(&("x-n".to_string(), "1".to_string())));
        assert_eq!(request.body, Some(json!({"q": "rust"})));
        assert!(!request.parse_json);
    }

    #[test]
    fn test_request_requires_url() {
        assert!(HttpRequest::from_config(&StepConfig::new()).is_err());
    }

    #[test]
    fn test_status_errors_classify() {
        let classifier = HeuristicClassifier;

        let err = status_error(StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(classifier.classify(&err.to_string()), ErrorType::System);

        let err = status_error(StatusCode::BAD_REQUEST);
        assert_eq!(classifier.classify(&err.to_string()), ErrorType::Validation);

        let err = status_error(StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(classifier.classify(&err.to_string()), ErrorType::Timeout);
    }

    #[tokio::test]
    async fn test_keyword_in_url_does_not_steer_classification() {
        let config = StepConfig::new().with("url", "http://127.0.0.1:1/network/status");
        let err = HttpRequestHandler::new()
            .execute(&config, &Variables::new(), &Results::new())
            .await
            .unwrap_err();
        assert!(!err.to_string().contains("/network/status"));

        let expected = [
            (StatusCode::SERVICE_UNAVAILABLE, ErrorType::System),
            (StatusCode::NOT_FOUND, ErrorType::Validation),
            (StatusCode::GATEWAY_TIMEOUT, ErrorType::Timeout),
        ];
        for (status, error_type) in expected {
            let text = status_error(status).to_string();
            assert!(!text.contains("http://"));
            assert_eq!(HeuristicClassifier.classify(&text), error_type);
        }
    }

    #[tokio::test]
    async fn test_refused_connection_is_network_error() {
        let config = StepConfig::new().with("url", "http://127.0.0.1:1/");
        let err = HttpRequestHandler::new()
            .execute(&config, &Variables::new(), &Results::new())
            .await
            .unwrap_err();

        assert_eq!(HeuristicClassifier.classify(&err.to_string()), ErrorType::Network);
    }
}
