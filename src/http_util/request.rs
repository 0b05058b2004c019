use http::{HeaderMap, Request, header};
use hyper::body::Bytes;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::{error::ApiError, http_util::query};

/// Deserializes a JSON body; an empty body reads as `{}`.
pub fn parse_json<T: DeserializeOwned>(req: &Request<Bytes>) -> Result<T, ApiError> {
    let body = req.body();
    let body: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        body
    };
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(e.to_string()))
}

pub fn headers_json(headers: &HeaderMap) -> Value {
    let mut map = Map::new();
    for name in headers.keys() {
        let value = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect::<Vec<_>>()
            .join(", ");
        map.insert(name.as_str().to_string(), Value::String(value));
    }
    Value::Object(map)
}

/// Query parameters as an object; repeated keys collect into arrays.
pub fn query_json(query: Option<&str>) -> Value {
    let mut map = Map::new();
    for (key, value) in query::parse(query) {
        match map.get_mut(&key) {
            Some(Value::Array(values)) => values.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
            None => {
                map.insert(key, Value::String(value));
            }
        }
    }
    Value::Object(map)
}

/// Best-effort decoding of a body for audit records: JSON, then form data, then text.
pub fn body_json(req: &Request<Bytes>) -> Value {
    let body = req.body();
    if body.is_empty() {
        return Value::Object(Map::new());
    }
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        return value;
    }
    let is_form = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/x-www-form-urlencoded"));
    match (is_form, std::str::from_utf8(body)) {
        (true, Ok(text)) => query_json(Some(text)),
        _ => Value::String(String::from_utf8_lossy(body).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_body_is_empty_object() {
        let req = Request::new(Bytes::from_static(b"  "));
        let value: Value = parse_json(&req).unwrap();
        assert_eq!(value, json!({}));
    }

    #[test]
    fn malformed_body_is_bad_request() {
        let req = Request::new(Bytes::from_static(b"{\"name\":"));
        assert!(matches!(
            parse_json::<Value>(&req),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn repeated_query_keys() {
        assert_eq!(
            query_json(Some("types=url&types=text&search=a%20b")),
            json!({ "types": ["url", "text"], "search": "a b" })
        );
    }

    #[test]
    fn form_and_text_bodies() {
        let req = Request::builder()
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Bytes::from_static(b"a=1&b=2"))
            .unwrap();
        assert_eq!(body_json(&req), json!({ "a": "1", "b": "2" }));

        let req = Request::new(Bytes::from_static(b"plain"));
        assert_eq!(body_json(&req), json!("plain"));
    }

    #[test]
    fn duplicate_headers_are_joined() {
        let mut headers = HeaderMap::new();
        headers.append("x-tag", "a".parse().unwrap());
        headers.append("x-tag", "b".parse().unwrap());
        assert_eq!(headers_json(&headers), json!({ "x-tag": "a, b" }));
    }
}
