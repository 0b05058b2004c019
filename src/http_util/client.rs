use std::pin::Pin;

use anyhow::{Context, Error, bail};
use http::{HeaderValue, Method, Request, Response, Uri, header, uri::Authority};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper_util::rt::TokioIo;
use openssl::ssl::{SslConnector, SslMethod};
use serde::Serialize;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_openssl::SslStream;

use crate::http_util::proxy;

/// Outbound HTTP/1 client. Every request uses a fresh connection, TLS for `https`
/// URLs, optionally tunnelled through an HTTP proxy.
#[derive(Clone)]
pub struct HttpClient {
    tls: SslConnector,
    proxy: Option<Authority>,
}

impl HttpClient {
    pub fn new(proxy: Option<&Uri>) -> Result<Self, Error> {
        let proxy = match proxy {
            Some(url) => Some(
                url.authority()
                    .cloned()
                    .context("Proxy URL has no authority")?,
            ),
            None => None,
        };
        Ok(Self {
            tls: SslConnector::builder(SslMethod::tls_client())?.build(),
            proxy,
        })
    }

    pub async fn send(&self, mut req: Request<Full<Bytes>>) -> Result<Response<Incoming>, Error> {
        let url = req.uri().clone();
        let https = match url.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            other => bail!("Unsupported URL scheme {other:?}"),
        };
        let authority = url.authority().context("URL has no host")?.clone();
        let host = authority.host().to_owned();
        let port = authority.port_u16().unwrap_or(if https { 443 } else { 80 });

        let stream = match &self.proxy {
            Some(proxy) => {
                let mut stream = TcpStream::connect(proxy.as_str()).await?;
                proxy::handshake(&mut stream, (&host, port)).await?;
                stream
            }
            None => TcpStream::connect((host.as_str(), port)).await?,
        };
        stream.set_nodelay(true)?;

        *req.uri_mut() = url
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
            .parse()?;
        req.headers_mut()
            .insert(header::HOST, HeaderValue::from_str(authority.as_str())?);

        let addr = format!("{host}:{port}");
        if https {
            let ssl = self.tls.configure()?.into_ssl(&host)?;
            let mut stream = SslStream::new(ssl, stream)?;
            Pin::new(&mut stream).connect().await?;
            send_over(stream, req, addr).await
        } else {
            send_over(stream, req, addr).await
        }
    }

    /// Sends a request with an optional JSON body.
    pub async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        headers: &[(&str, &str)],
        body: Option<&T>,
    ) -> Result<Response<Incoming>, Error> {
        let mut builder = Request::builder()
            .method(method)
            .uri(url)
            .header(header::ACCEPT, "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let data = match body {
            Some(body) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Bytes::from(serde_json::to_vec(body)?)
            }
            None => Bytes::new(),
        };
        self.send(builder.body(Full::new(data))?).await
    }
}

async fn send_over<S>(io: S, req: Request<Full<Bytes>>, addr: String) -> Result<Response<Incoming>, Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io)).await?;
    log::debug!("Outgoing connection to {addr} established");

    // Drives the connection until the response body is consumed.
    tokio::task::spawn(async move {
        if let Err(err) = conn.await {
            log::error!("Outgoing connection to {addr} failed: {err:?}");
        } else {
            log::debug!("Outgoing connection to {addr} closed");
        }
    });

    Ok(sender.send_request(req).await?)
}

pub async fn read_body(res: Response<Incoming>) -> Result<Bytes, Error> {
    Ok(res.into_body().collect().await?.to_bytes())
}
