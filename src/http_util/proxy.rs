use std::fmt::Write;

use anyhow::{Error, bail};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const MAX_RESPONSE_HEAD: usize = 8 * 1024;

/// Opens a tunnel through an HTTP proxy with `CONNECT host:port`.
pub async fn handshake<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    (host, port): (&str, u16),
) -> Result<(), Error> {
    let mut req = String::new();
    write!(&mut req, "CONNECT {host}:{port} HTTP/1.1\r\n")?;
    write!(&mut req, "Host: {host}:{port}\r\n")?;
    write!(&mut req, "Proxy-Connection: keep-alive\r\n\r\n")?;
    stream.write_all(req.as_bytes()).await?;
    stream.flush().await?;

    // Byte by byte so nothing past the response head is consumed.
    let mut head = Vec::new();
    while !(head.ends_with(b"\r\n\r\n") || head.ends_with(b"\n\n")) {
        if head.len() >= MAX_RESPONSE_HEAD {
            bail!("HTTP proxy: Response head is too long");
        }
        head.push(stream.read_u8().await?);
    }

    let head = String::from_utf8(head)?;
    let status_line = head.lines().next().unwrap_or_default();
    let mut parts = status_line.split_ascii_whitespace();
    match parts.next() {
        Some("HTTP/1.1" | "HTTP/1.0") => (),
        _ => bail!("HTTP proxy: Unsupported response protocol: {status_line:?}"),
    }
    match parts.next() {
        Some(code) if code.starts_with('2') => Ok(()),
        _ => bail!("HTTP proxy: Tunnel refused: {status_line:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    async fn run_proxy(answer: &'static [u8]) -> (Result<(), Error>, String) {
        let (mut client, mut proxy) = duplex(1024);
        let server = tokio::spawn(async move {
            let mut seen = Vec::new();
            while !seen.ends_with(b"\r\n\r\n") {
                seen.push(proxy.read_u8().await.unwrap());
            }
            proxy.write_all(answer).await.unwrap();
            String::from_utf8(seen).unwrap()
        });
        let res = handshake(&mut client, ("api.openai.com", 443)).await;
        (res, server.await.unwrap())
    }

    #[tokio::test]
    async fn tunnel_established() {
        let (res, seen) = run_proxy(b"HTTP/1.1 200 Connection established\r\n\r\n").await;
        res.unwrap();
        assert!(seen.starts_with("CONNECT api.openai.com:443 HTTP/1.1\r\n"));
        assert!(seen.contains("Host: api.openai.com:443\r\n"));
    }

    #[tokio::test]
    async fn tunnel_refused() {
        let (res, _) = run_proxy(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n").await;
        assert!(res.unwrap_err().to_string().contains("407"));
    }
}
