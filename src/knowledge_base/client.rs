use std::time::Duration;

use anyhow::{Error, anyhow};
use http::{Method, StatusCode};
use hyper::body::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    error::ApiError,
    http_util::client::{HttpClient, read_body},
};

pub const DOCUMENTS_PATH: &str = "/v1/convai/knowledge-base";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Knowledge-base document API of the voice platform.
#[derive(Clone)]
pub struct KnowledgeBaseClient {
    http: HttpClient,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

fn upstream_error(status: StatusCode, body: &[u8]) -> ApiError {
    ApiError::Upstream {
        status,
        message: format!(
            "ElevenLabs API error ({}): {}",
            status.as_u16(),
            String::from_utf8_lossy(body)
        ),
    }
}

/// Upstream answers are relayed as is; an empty body reads as `{}`.
fn relayed(body: &[u8]) -> Value {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Value::Object(Map::new());
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

impl KnowledgeBaseClient {
    pub fn new(http: HttpClient, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn api_key(self, api_key: Option<String>) -> Self {
        Self { api_key, ..self }
    }

    pub fn timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    async fn call<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&T>,
    ) -> Result<Bytes, Error> {
        let url = format!("{}{DOCUMENTS_PATH}{path}", self.base_url);
        let headers: Vec<(&str, &str)> = self
            .api_key
            .iter()
            .map(|key| ("xi-api-key", key.as_str()))
            .collect();
        log::debug!("Knowledge base {method} {url}");

        let exchange = async {
            let res = self.http.send_json(method, &url, &headers, body).await?;
            let status = res.status();
            Ok::<_, Error>((status, read_body(res).await?))
        };
        let (status, data) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| anyhow!("Knowledge base request timed out after {:?}", self.timeout))??;
        if !status.is_success() {
            log::warn!("Knowledge base answered {status} to {url}");
            return Err(upstream_error(status, &data).into());
        }
        Ok(data)
    }

    /// `query` is a ready query string, `?`-prefixed or empty.
    pub async fn list(&self, query: &str) -> Result<Value, Error> {
        let data = self.call::<()>(Method::GET, query, None).await?;
        Ok(relayed(&data))
    }

    pub async fn get(&self, id: &str) -> Result<Value, Error> {
        let data = self.call::<()>(Method::GET, &format!("/{id}"), None).await?;
        Ok(relayed(&data))
    }

    /// Creates a document from `kind` (`url` or `text`) content.
    pub async fn create<T: Serialize + ?Sized>(&self, kind: &str, document: &T) -> Result<Value, Error> {
        let data = self
            .call(Method::POST, &format!("/{kind}"), Some(document))
            .await?;
        Ok(relayed(&data))
    }

    pub async fn update<T: Serialize + ?Sized>(&self, id: &str, changes: &T) -> Result<Value, Error> {
        let data = self
            .call(Method::PATCH, &format!("/{id}"), Some(changes))
            .await?;
        Ok(relayed(&data))
    }

    pub async fn delete(&self, id: &str) -> Result<(), Error> {
        self.call::<()>(Method::DELETE, &format!("/{id}"), None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_util::testing;
    use serde_json::json;

    fn client(base_url: &str) -> KnowledgeBaseClient {
        KnowledgeBaseClient::new(HttpClient::new(None).unwrap(), base_url)
            .api_key(Some("xi-test".into()))
    }

    #[tokio::test]
    async fn sends_key_and_relays_body() {
        let upstream = testing::spawn(|_| {
            (StatusCode::OK, "application/json", r#"{"documents":[],"has_more":false}"#.into())
        })
        .await;
        let documents = client(&upstream.base_url).list("?page_size=5").await.unwrap();
        assert_eq!(documents, json!({ "documents": [], "has_more": false }));

        let requests = upstream.requests();
        assert_eq!(requests[0].method, Method::GET);
        assert_eq!(requests[0].uri, "/v1/convai/knowledge-base?page_size=5");
        assert_eq!(requests[0].header("xi-api-key"), Some("xi-test"));
    }

    #[tokio::test]
    async fn create_posts_to_kind() {
        let upstream = testing::spawn(|_| (StatusCode::OK, "application/json", r#"{"id":"doc1"}"#.into())).await;
        let created = client(&upstream.base_url)
            .create("url", &json!({ "type": "url", "name": "Manual", "url": "https://example.com" }))
            .await
            .unwrap();
        assert_eq!(created["id"], "doc1");

        let request = &upstream.requests()[0];
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.uri, "/v1/convai/knowledge-base/url");
        assert_eq!(request.header("content-type"), Some("application/json"));
        let sent: Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(sent["name"], "Manual");
    }

    #[tokio::test]
    async fn text_documents_post_to_text() {
        let upstream = testing::spawn(|_| (StatusCode::OK, "application/json", r#"{"id":"doc2"}"#.into())).await;
        client(&upstream.base_url)
            .create("text", &json!({ "type": "text", "name": "FAQ", "text": "Oil every 5k miles" }))
            .await
            .unwrap();

        let request = &upstream.requests()[0];
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.uri, "/v1/convai/knowledge-base/text");
        let sent: Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(sent["type"], "text");
        assert_eq!(sent["text"], "Oil every 5k miles");
    }

    #[tokio::test]
    async fn error_status_is_relayed() {
        let upstream = testing::spawn(|_| {
            (StatusCode::NOT_FOUND, "application/json", r#"{"detail":"missing"}"#.into())
        })
        .await;
        let err = client(&upstream.base_url).get("doc9").await.unwrap_err();
        let err = err.downcast_ref::<ApiError>().unwrap();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            err.to_string(),
            r#"ElevenLabs API error (404): {"detail":"missing"}"#
        );
    }

    #[tokio::test]
    async fn delete_ignores_empty_body() {
        let upstream = testing::spawn(|_| (StatusCode::NO_CONTENT, "text/plain", String::new())).await;
        client(&upstream.base_url).delete("doc1").await.unwrap();
        assert_eq!(upstream.requests()[0].method, Method::DELETE);
        assert_eq!(upstream.requests()[0].uri, "/v1/convai/knowledge-base/doc1");
    }

    #[test]
    fn relayed_bodies() {
        assert_eq!(relayed(b""), json!({}));
        assert_eq!(relayed(b"[1]"), json!([1]));
        assert_eq!(relayed(b"plain"), json!("plain"));
    }
}
