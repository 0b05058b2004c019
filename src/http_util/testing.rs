//! Local upstream for exercising outbound clients.

use std::sync::{Arc, Mutex};

use anyhow::Error;
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri, header};
use http_body_util::{BodyExt, Full};
use hyper::{
    body::{Bytes, Incoming},
    server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

#[derive(Clone, Debug)]
pub struct Captured {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Captured {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

pub struct Upstream {
    pub base_url: String,
    requests: Arc<Mutex<Vec<Captured>>>,
}

impl Upstream {
    pub fn requests(&self) -> Vec<Captured> {
        self.requests.lock().unwrap().clone()
    }
}

/// Serves every request with `respond(request) -> (status, content type, body)`.
pub async fn spawn<F>(respond: F) -> Upstream
where
    F: Fn(&Captured) -> (StatusCode, &'static str, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let requests = Arc::new(Mutex::new(Vec::new()));
    let respond = Arc::new(respond);

    let captured = requests.clone();
    tokio::task::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let respond = respond.clone();
            let captured = captured.clone();
            tokio::task::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let respond = respond.clone();
                    let captured = captured.clone();
                    async move {
                        let (parts, body) = req.into_parts();
                        let request = Captured {
                            method: parts.method,
                            uri: parts.uri,
                            headers: parts.headers,
                            body: body.collect().await?.to_bytes(),
                        };
                        let (status, content_type, body) = respond(&request);
                        captured.lock().unwrap().push(request);
                        Ok::<_, Error>(
                            Response::builder()
                                .status(status)
                                .header(header::CONTENT_TYPE, content_type)
                                .body(Full::new(Bytes::from(body)))?,
                        )
                    }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    Upstream { base_url, requests }
}
