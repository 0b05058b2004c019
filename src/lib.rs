pub mod app;
pub mod assistant;
pub mod config;
pub mod data;
pub mod error;
pub mod http_util;
pub mod knowledge_base;
pub mod openai;
pub mod service;
pub mod sse;
pub mod store;
pub mod webhook;

pub use self::service::{Outgoing, Router, Service};

use std::sync::Arc;

use anyhow::{Error, anyhow};
use http::{Request, Response};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::{body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, ToSocketAddrs};

use crate::error::ApiError;

/// Inbound bodies larger than this are refused with 413.
pub const MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

pub async fn serve<A, S>(addr: A, service: S) -> Result<(), Error>
where
    A: ToSocketAddrs,
    S: Service + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    serve_listener(listener, service).await
}

pub async fn serve_listener<S>(listener: TcpListener, service: S) -> Result<(), Error>
where
    S: Service + 'static,
{
    log::info!(
        "Listening for incoming connections at {}",
        listener.local_addr()?
    );
    let service = Arc::new(service);

    loop {
        let (stream, addr) = listener.accept().await?;
        log::debug!("Incoming connection from {addr} established");

        let io = TokioIo::new(stream);
        let service = service.clone();

        // One task per connection.
        tokio::task::spawn(async move {
            if let Err(err) = http1::Builder::new()
                .serve_connection(
                    io,
                    service_fn(move |req| handle(service.clone(), req)),
                )
                .await
            {
                if err.is_incomplete_message() {
                    log::warn!("Incoming connection from {addr} unexpected EOF");
                } else {
                    log::error!("Incoming connection from {addr} failed: {err:?}");
                }
            } else {
                log::debug!("Incoming connection closed: {addr}");
            }
        });
    }
}

/// Collects the body so handlers see the raw bytes.
async fn handle<S: Service>(service: Arc<S>, req: Request<Incoming>) -> Result<Response<Outgoing>, Error> {
    let (parts, body) = req.into_parts();
    let body = match Limited::new(body, MAX_BODY_SIZE).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) if err.is::<LengthLimitError>() => {
            log::warn!("{} {} refused: body over {MAX_BODY_SIZE} bytes", parts.method, parts.uri);
            let mut res = ApiError::PayloadTooLarge.into_response()?;
            crate::service::allow_any_origin(res.headers_mut());
            return Ok(res);
        }
        Err(err) => return Err(anyhow!(err)),
    };
    service.call(Request::from_parts(parts, body)).await
}
