//! Single-shot loopback listener for the OAuth2 redirect.
//!
//! The listener binds `127.0.0.1` on the registered port and serves a tiny
//! axum router until the first request for the callback path settles the
//! attempt. Connections are served concurrently, so an idle or slow socket
//! never holds back the real redirect. Once the attempt is settled the
//! server stops accepting and the port can be bound again immediately.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{RawQuery, State};
use axum::http::{StatusCode, Uri};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::form_urlencoded;

use vouchersnap_common::{Error, Result};

/// How long in-flight responses may take to drain once the attempt is settled.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Code and state carried by a successful redirect.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizationResult {
    pub code: String,
    pub returned_state: String,
}

impl std::fmt::Debug for AuthorizationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationResult")
            .field("code", &"[REDACTED]")
            .field("returned_state", &self.returned_state)
            .finish()
    }
}

/// How a listener's single attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// The browser came back with a code and a state.
    Authorized(AuthorizationResult),
    /// The browser came back with an error, with nothing usable, or the wait was cancelled.
    Rejected(String),
    /// Nothing arrived in time.
    TimedOut,
}

/// Loopback HTTP listener armed for one authorization attempt.
#[derive(Debug)]
pub struct CallbackListener {
    listener: TcpListener,
    path: String,
}

/// Hands the first callback's outcome to the waiting attempt.
struct CallbackSlot {
    sender: Mutex<Option<oneshot::Sender<CallbackOutcome>>>,
}

impl CallbackSlot {
    fn take(&self) -> Option<oneshot::Sender<CallbackOutcome>> {
        self.sender.lock().ok().and_then(|mut sender| sender.take())
    }
}

impl CallbackListener {
    /// Bind the loopback interface on `port`.
    ///
    /// # Errors
    /// - `PortUnavailable` if the port is already bound or not permitted
    pub async fn bind(port: u16, path: impl Into<String>) -> Result<Self> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let listener = TcpListener::bind(addr).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::AddrInUse
            | std::io::ErrorKind::PermissionDenied
            | std::io::ErrorKind::AddrNotAvailable => Error::PortUnavailable { port, source: e },
            _ => Error::Io(e),
        })?;
        debug!(%addr, "Callback listener bound");

        Ok(Self {
            listener,
            path: path.into(),
        })
    }

    /// Address actually bound (useful when binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Wait for the callback, giving up after `timeout`.
    pub async fn await_callback(self, timeout: Duration) -> CallbackOutcome {
        self.await_callback_until(timeout, &CancellationToken::new())
            .await
    }

    /// Wait for the callback, giving up after `timeout` or when `cancel` fires.
    ///
    /// The listener is consumed; its port is free once this returns.
    pub async fn await_callback_until(
        self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> CallbackOutcome {
        let Self { listener, path } = self;
        let (sender, receiver) = oneshot::channel();
        let slot = Arc::new(CallbackSlot {
            sender: Mutex::new(Some(sender)),
        });

        let app = Router::new()
            .route(&path, get(handle_callback))
            .fallback(not_found)
            .with_state(slot);

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        });

        let outcome = tokio::select! {
            result = tokio::time::timeout(timeout, receiver) => match result {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => CallbackOutcome::Rejected("callback listener stopped unexpectedly".to_string()),
                Err(_) => CallbackOutcome::TimedOut,
            },
            _ = cancel.cancelled() => CallbackOutcome::Rejected("authorization cancelled".to_string()),
        };

        shutdown.cancel();
        stop_server(server).await;
        outcome
    }
}

/// Let in-flight responses finish, then make sure the server is gone.
async fn stop_server(mut server: JoinHandle<std::io::Result<()>>) {
    match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
        Ok(Ok(Ok(()))) => debug!("Callback server stopped"),
        Ok(Ok(Err(e))) => warn!("Callback server failed: {}", e),
        Ok(Err(e)) => warn!("Callback server task failed: {}", e),
        Err(_) => {
            debug!("Callback server did not drain in time, aborting");
            server.abort();
            let _ = server.await;
        }
    }
}

async fn handle_callback(
    State(slot): State<Arc<CallbackSlot>>,
    RawQuery(query): RawQuery,
) -> (StatusCode, Html<String>) {
    let Some(sender) = slot.take() else {
        debug!("Ignoring callback for an attempt that is already settled");
        return (
            StatusCode::GONE,
            Html(plain_page("This sign-in attempt is already complete")),
        );
    };

    let outcome = outcome_from_query(query.as_deref().unwrap_or_default());
    let response = match &outcome {
        CallbackOutcome::Authorized(_) => (StatusCode::OK, Html(success_page())),
        _ => (StatusCode::BAD_REQUEST, Html(failure_page())),
    };
    // The receiver is gone only if the attempt already gave up.
    let _ = sender.send(outcome);
    response
}

async fn not_found(uri: Uri) -> (StatusCode, Html<String>) {
    debug!(path = uri.path(), "Ignoring request for non-callback path");
    (StatusCode::NOT_FOUND, Html(plain_page("Not found")))
}

/// Interpret the callback query string. The first occurrence of a key wins.
fn outcome_from_query(query: &str) -> CallbackOutcome {
    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut description = None;
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        let field = match key.as_ref() {
            "code" => &mut code,
            "state" => &mut state,
            "error" => &mut error,
            "error_description" => &mut description,
            _ => continue,
        };
        if field.is_none() {
            *field = Some(value.into_owned());
        }
    }

    if let Some(error) = error {
        let detail = description.filter(|d| !d.is_empty()).unwrap_or(error);
        return CallbackOutcome::Rejected(detail);
    }

    match (code, state) {
        (Some(code), Some(returned_state)) if !code.is_empty() => {
            CallbackOutcome::Authorized(AuthorizationResult {
                code,
                returned_state,
            })
        }
        (Some(_), _) => CallbackOutcome::Rejected("callback is missing the state parameter".to_string()),
        _ => CallbackOutcome::Rejected("callback carried no authorization code".to_string()),
    }
}

fn success_page() -> String {
    page(
        "VoucherSnap - Authenticated",
        "Authentication Successful!",
        "You can close this window and return to VoucherSnap.",
    )
}

fn failure_page() -> String {
    page(
        "VoucherSnap - Error",
        "Authentication Failed",
        "Please close this window and check VoucherSnap for details.",
    )
}

fn plain_page(message: &str) -> String {
    page("VoucherSnap", message, "")
}

fn page(title: &str, heading: &str, message: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><title>{}</title></head>\n<body style=\"font-family: sans-serif; text-align: center; padding: 50px;\">\n<h1>{}</h1>\n<p>{}</p>\n</body>\n</html>\n",
        title, heading, message
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    async fn armed(timeout: Duration) -> (u16, tokio::task::JoinHandle<CallbackOutcome>) {
        let listener = CallbackListener::bind(0, "/callback").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(listener.await_callback(timeout));
        (port, handle)
    }

    #[tokio::test]
    async fn test_captures_code_and_state() {
        let (port, handle) = armed(Duration::from_secs(5)).await;

        let response = client()
            .get(format!("http://127.0.0.1:{}/callback?code=abc&state=xyz", port))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert!(response.text().await.unwrap().contains("Authentication Successful"));

        let outcome = handle.await.unwrap();
        assert_eq!(
            outcome,
            CallbackOutcome::Authorized(AuthorizationResult {
                code: "abc".to_string(),
                returned_state: "xyz".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_error_parameter_is_rejected() {
        let (port, handle) = armed(Duration::from_secs(5)).await;

        let response = client()
            .get(format!(
                "http://127.0.0.1:{}/callback?error=access_denied&error_description=User+said+%3Cno%3E",
                port
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);
        let body = response.text().await.unwrap();
        assert!(body.contains("Authentication Failed"));
        assert!(!body.contains("<no>"));

        assert_eq!(
            handle.await.unwrap(),
            CallbackOutcome::Rejected("User said <no>".to_string())
        );
    }

    #[tokio::test]
    async fn test_missing_parameters_are_rejected() {
        let (port, handle) = armed(Duration::from_secs(5)).await;

        let response = client()
            .get(format!("http://127.0.0.1:{}/callback", port))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);

        assert!(matches!(handle.await.unwrap(), CallbackOutcome::Rejected(_)));
    }

    #[tokio::test]
    async fn test_foreign_path_does_not_consume_attempt() {
        let (port, handle) = armed(Duration::from_secs(5)).await;
        let client = client();

        let response = client
            .get(format!("http://127.0.0.1:{}/favicon.ico", port))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 404);

        client
            .get(format!("http://127.0.0.1:{}/callback?code=c&state=s", port))
            .send()
            .await
            .unwrap();

        assert!(matches!(handle.await.unwrap(), CallbackOutcome::Authorized(_)));
    }

    #[tokio::test]
    async fn test_second_request_is_refused() {
        let (port, handle) = armed(Duration::from_secs(5)).await;
        let client = client();

        client
            .get(format!("http://127.0.0.1:{}/callback?code=c&state=s", port))
            .send()
            .await
            .unwrap();
        handle.await.unwrap();

        // Fresh client so no pooled connection is reused.
        let second = reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap()
            .get(format!("http://127.0.0.1:{}/callback?code=d&state=t", port))
            .send()
            .await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_idle_connection_does_not_delay_callback() {
        let (port, handle) = armed(Duration::from_secs(1)).await;

        // A browser may open a speculative connection and never use it.
        let _idle = tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .unwrap();

        let started = std::time::Instant::now();
        let response = client()
            .get(format!("http://127.0.0.1:{}/callback?code=a&state=b", port))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert!(started.elapsed() < Duration::from_millis(800));

        assert!(matches!(handle.await.unwrap(), CallbackOutcome::Authorized(_)));
    }

    #[tokio::test]
    async fn test_non_get_does_not_consume_attempt() {
        let (port, handle) = armed(Duration::from_secs(5)).await;
        let client = client();

        let response = client
            .post(format!("http://127.0.0.1:{}/callback?code=x&state=y", port))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 405);

        client
            .get(format!("http://127.0.0.1:{}/callback?code=c&state=s", port))
            .send()
            .await
            .unwrap();

        match handle.await.unwrap() {
            CallbackOutcome::Authorized(result) => assert_eq!(result.code, "c"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_releases_port() {
        let port = free_port();
        let listener = CallbackListener::bind(port, "/callback").await.unwrap();

        let outcome = listener.await_callback(Duration::from_millis(100)).await;
        assert_eq!(outcome, CallbackOutcome::TimedOut);

        let rebound = CallbackListener::bind(port, "/callback").await;
        assert!(rebound.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_rejects() {
        let listener = CallbackListener::bind(0, "/callback").await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = listener
            .await_callback_until(Duration::from_secs(5), &cancel)
            .await;
        assert_eq!(
            outcome,
            CallbackOutcome::Rejected("authorization cancelled".to_string())
        );
    }

    #[tokio::test]
    async fn test_port_in_use() {
        let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = holder.local_addr().unwrap().port();

        let result = CallbackListener::bind(port, "/callback").await;
        assert!(matches!(result, Err(Error::PortUnavailable { port: p, .. }) if p == port));
    }

    #[test]
    fn test_code_without_state_is_rejected() {
        assert!(matches!(outcome_from_query("code=abc"), CallbackOutcome::Rejected(_)));
        assert!(matches!(outcome_from_query(""), CallbackOutcome::Rejected(_)));
    }

    #[test]
    fn test_first_parameter_occurrence_wins() {
        assert_eq!(
            outcome_from_query("code=a&state=s&code=b"),
            CallbackOutcome::Authorized(AuthorizationResult {
                code: "a".to_string(),
                returned_state: "s".to_string(),
            })
        );
    }
}
