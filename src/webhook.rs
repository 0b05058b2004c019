//! Voice-bot platform webhooks.
//!
//! The signed endpoint checks an HMAC-SHA256 of the raw body before storing
//! anything. The call-lifecycle endpoints record whatever they receive.

use std::fmt::Write;

use anyhow::Error;
use chrono::{SecondsFormat, Utc};
use http::{Request, Response, StatusCode};
use hyper::body::Bytes;
use openssl::{hash::MessageDigest, memcmp, pkey::PKey, sign::Signer};
use serde_json::json;

use crate::{
    Outgoing,
    error::ApiError,
    http_util::{
        request::{body_json, headers_json, query_json},
        response,
    },
    store::RecordStore,
};

pub const SIGNATURE_HEADERS: [&str; 2] = ["elevenlabs-signature", "x-elevenlabs-signature"];

/// Hex encoded HMAC-SHA256 of `body`.
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String, Error> {
    let key = PKey::hmac(secret)?;
    let mut signer = Signer::new(MessageDigest::sha256(), &key)?;
    signer.update(body)?;
    let mut hex = String::new();
    for byte in signer.sign_to_vec()? {
        write!(&mut hex, "{byte:02x}")?;
    }
    Ok(hex)
}

pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && memcmp::eq(a.as_bytes(), b.as_bytes())
}

pub fn verify(secret: Option<&str>, signature: Option<&str>, body: &[u8]) -> Result<(), ApiError> {
    let Some(secret) = secret.filter(|s| !s.is_empty()) else {
        log::error!("Webhook secret is not configured");
        return Err(ApiError::Unauthorized("Webhook secret not configured".into()));
    };
    let Some(signature) = signature else {
        return Err(ApiError::Unauthorized("Missing ElevenLabs-Signature header".into()));
    };
    let expected = sign(secret.as_bytes(), body).map_err(|err| {
        log::error!("Cannot compute webhook signature: {err:#}");
        ApiError::Internal
    })?;
    if constant_time_eq(signature, &expected) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized("Invalid signature".into()))
    }
}

fn signature_header(req: &Request<Bytes>) -> Option<&str> {
    SIGNATURE_HEADERS
        .iter()
        .find_map(|name| req.headers().get(*name))
        .and_then(|value| value.to_str().ok())
}

fn request_target(req: &Request<Bytes>) -> &str {
    req.uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| req.uri().path())
}

/// `POST /api/webhooks/elevenlabs`
pub async fn receive_signed(
    store: &RecordStore,
    secret: Option<&str>,
    req: Request<Bytes>,
) -> Result<Response<Outgoing>, Error> {
    verify(secret, signature_header(&req), req.body())?;

    let data = json!({
        "receivedAt": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "method": req.method().as_str(),
        "path": request_target(&req),
        "headers": headers_json(req.headers()),
        "query": query_json(req.uri().query()),
        "body": body_json(&req),
    });
    let record = store.insert("webhook:elevenlabs", Some(&data.to_string())).await?;
    response::json(StatusCode::OK, &json!({ "ok": true, "id": record.id }))
}

/// Pre-call, post-call and tool webhooks: stored as received.
pub async fn record(
    store: &RecordStore,
    name: &str,
    req: Request<Bytes>,
) -> Result<Response<Outgoing>, Error> {
    let data = json!({
        "method": req.method().as_str(),
        "query": query_json(req.uri().query()),
        "body": body_json(&req),
        "headers": headers_json(req.headers()),
    });
    store.insert(name, Some(&data.to_string())).await?;
    response::json(
        StatusCode::OK,
        &json!({ "message": "Webhook pre-call data saved successfully" }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_util::response::read_json;
    use serde_json::Value;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"type":"post_call_transcription","data":{"agent_id":"a1"}}"#;

    fn signed(signature: Option<&str>) -> Request<Bytes> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/webhooks/elevenlabs?source=test");
        if let Some(signature) = signature {
            builder = builder.header("ElevenLabs-Signature", signature);
        }
        builder.body(Bytes::from_static(BODY)).unwrap()
    }

    #[test]
    fn known_hmac() {
        // RFC 4231 test case 2.
        assert_eq!(
            sign(b"Jefe", b"what do ya want for nothing?").unwrap(),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn comparison() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }

    #[test]
    fn verify_rejections() {
        let good = sign(SECRET.as_bytes(), BODY).unwrap();
        assert!(verify(Some(SECRET), Some(&good), BODY).is_ok());
        for (secret, signature) in [
            (None, Some(good.as_str())),
            (Some(""), Some(good.as_str())),
            (Some(SECRET), None),
            (Some(SECRET), Some("deadbeef")),
            (Some("other"), Some(good.as_str())),
        ] {
            let err = verify(secret, signature, BODY).unwrap_err();
            assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn signed_webhook_is_stored() {
        let store = RecordStore::in_memory();
        let signature = sign(SECRET.as_bytes(), BODY).unwrap();
        let res = receive_signed(&store, Some(SECRET), signed(Some(&signature)))
            .await
            .unwrap();
        let body = read_json(res).await.unwrap();
        assert_eq!(body["ok"], true);

        let record = store.get(body["id"].as_str().unwrap()).await.unwrap();
        assert_eq!(record.name, "webhook:elevenlabs");
        let data: Value = serde_json::from_str(record.data.as_deref().unwrap()).unwrap();
        assert_eq!(data["path"], "/api/webhooks/elevenlabs?source=test");
        assert_eq!(data["query"], json!({ "source": "test" }));
        assert_eq!(data["body"]["data"]["agent_id"], "a1");
        assert_eq!(data["method"], "POST");
    }

    #[tokio::test]
    async fn unsigned_webhook_is_rejected() {
        let store = RecordStore::in_memory();
        let err = receive_signed(&store, Some(SECRET), signed(None))
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ApiError>().unwrap().status(),
            StatusCode::UNAUTHORIZED
        );
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn lifecycle_webhook_is_recorded() {
        let store = RecordStore::in_memory();
        let req = Request::builder()
            .method("GET")
            .uri("/api/webhooks/elevenlabs-post?conversation_id=c9")
            .body(Bytes::new())
            .unwrap();
        let res = record(&store, "Post-Call Interaction", req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let records = store.list().await;
        assert_eq!(records[0].name, "Post-Call Interaction");
        let data: Value = serde_json::from_str(records[0].data.as_deref().unwrap()).unwrap();
        assert_eq!(data["method"], "GET");
        assert_eq!(data["query"]["conversation_id"], "c9");
        assert_eq!(data["body"], json!({}));
    }
}
