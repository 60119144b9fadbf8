//! Loopback listener for the identity provider redirect.
//!
//! Bound before the browser opens, so the redirect cannot arrive first.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use url::Url;

pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(120);

pub struct CallbackListener {
    listener: TcpListener,
    redirect_uri: Url,
}

impl CallbackListener {
    /// Binds the host and port of an `http://` loopback redirect URI.
    pub async fn bind(redirect_uri: &Url) -> Result<Self> {
        if redirect_uri.scheme() != "http" {
            bail!("redirect_uri must be an http:// loopback address, got {redirect_uri}");
        }
        let addrs = redirect_uri
            .socket_addrs(|| None)
            .with_context(|| format!("resolve redirect_uri {redirect_uri}"))?;
        let listener = TcpListener::bind(&addrs[..])
            .await
            .with_context(|| format!("listen for the login callback on {redirect_uri}"))?;
        Ok(Self {
            listener,
            redirect_uri: redirect_uri.clone(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Waits for the redirect and returns it as a full callback URL.
    ///
    /// Requests for other paths (favicon probes) get a 404 and are skipped.
    pub async fn wait(self, timeout: Duration) -> Result<Url> {
        tokio::time::timeout(timeout, self.accept_callback())
            .await
            .with_context(|| format!("no login callback within {}s", timeout.as_secs()))?
    }

    async fn accept_callback(&self) -> Result<Url> {
        loop {
            let (mut stream, peer) = self
                .listener
                .accept()
                .await
                .context("accept callback connection")?;
            let mut buffer = vec![0u8; 8192];
            let n = stream
                .read(&mut buffer)
                .await
                .context("read callback request")?;
            let request = String::from_utf8_lossy(&buffer[..n]);

            let Some(url) = callback_url(&self.redirect_uri, &request) else {
                tracing::debug!(%peer, "ignoring request outside the callback path");
                respond(&mut stream, &not_found_response()).await;
                continue;
            };
            let failed = url.query_pairs().any(|(k, _)| k == "error");
            let response = if failed {
                failure_response()
            } else {
                success_response()
            };
            respond(&mut stream, &response).await;
            return Ok(url);
        }
    }
}

async fn respond(stream: &mut TcpStream, response: &str) {
    if let Err(err) = stream.write_all(response.as_bytes()).await {
        tracing::debug!(error = %err, "callback response not delivered");
    }
}

/// The request target resolved against `redirect_uri`, if it hits the callback path.
fn callback_url(redirect_uri: &Url, request: &str) -> Option<Url> {
    let mut parts = request.lines().next()?.split_whitespace();
    let _method = parts.next()?;
    let target = parts.next()?;
    let url = redirect_uri.join(target).ok()?;
    (url.path() == redirect_uri.path()).then_some(url)
}

fn html_response(status: &str, title: &str, message: &str) -> String {
    let body = format!(
        "<!doctype html><html><head><meta charset=\"utf-8\" /><title>{title}</title></head><body><p>{message}</p></body></html>"
    );
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

fn success_response() -> String {
    html_response(
        "200 OK",
        "Signed in",
        "Signed in. You can close this tab and return to your terminal.",
    )
}

fn failure_response() -> String {
    html_response(
        "200 OK",
        "Sign-in not completed",
        "Sign-in did not complete. Return to your terminal for details.",
    )
}

fn not_found_response() -> String {
    let body = "Not found";
    format!(
        "HTTP/1.1 404 Not Found\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn get(addr: SocketAddr, target: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(format!("GET {target} HTTP/1.1\r\nHost: {addr}\r\n\r\n").as_bytes())
            .await
            .unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        reply
    }

    #[test]
    fn callback_url_keeps_query_on_callback_path() {
        let redirect = Url::parse("http://127.0.0.1:8765/callback").unwrap();

        let url = callback_url(
            &redirect,
            "GET /callback?state=s-1&session_state=x&code=c-1 HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
        )
        .unwrap();

        assert_eq!(url.as_str(), "http://127.0.0.1:8765/callback?state=s-1&session_state=x&code=c-1");
        assert_eq!(callback_url(&redirect, "GET /favicon.ico HTTP/1.1\r\n"), None);
        assert_eq!(callback_url(&redirect, ""), None);
    }

    #[tokio::test]
    async fn listener_skips_other_paths_and_returns_callback() {
        let listener = CallbackListener::bind(&Url::parse("http://127.0.0.1:0/callback").unwrap())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let waiting = tokio::spawn(listener.wait(Duration::from_secs(5)));

        let favicon = get(addr, "/favicon.ico").await;
        assert!(favicon.starts_with("HTTP/1.1 404"));

        let page = get(addr, "/callback?state=s-1&code=c-1").await;
        assert!(page.starts_with("HTTP/1.1 200"));
        assert!(page.contains("Signed in"));

        let url = waiting.await.unwrap().unwrap();
        assert_eq!(url.path(), "/callback");
        assert_eq!(url.query(), Some("state=s-1&code=c-1"));
    }

    #[tokio::test]
    async fn error_callback_is_returned_with_failure_page() {
        let listener = CallbackListener::bind(&Url::parse("http://127.0.0.1:0/callback").unwrap())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let waiting = tokio::spawn(listener.wait(Duration::from_secs(5)));

        let page = get(addr, "/callback?error=access_denied&state=s-1").await;
        assert!(page.contains("did not complete"));

        let url = waiting.await.unwrap().unwrap();
        assert!(url.query().unwrap().contains("error=access_denied"));
    }

    #[tokio::test]
    async fn https_redirect_is_refused() {
        let result = CallbackListener::bind(&Url::parse("https://127.0.0.1:8765/callback").unwrap()).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_gives_up_after_timeout() {
        let listener = CallbackListener::bind(&Url::parse("http://127.0.0.1:0/callback").unwrap())
            .await
            .unwrap();

        let err = listener.wait(Duration::from_secs(120)).await.unwrap_err();

        assert!(err.to_string().contains("120s"));
    }
}
