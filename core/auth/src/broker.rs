//! Authentication broker: hands out a valid credential, logging in when needed.
//!
//! A login attempt walks a fixed sequence of phases:
//!
//! ```text
//! Idle -> ChallengeBuilt -> ListenerArmed -> BrowserLaunched -> AwaitingCallback
//!      -> CodeReceived -> ExchangePending -> Authenticated
//! ```
//!
//! and may instead end in `TimedOut`, `Rejected` or `ExchangeFailed`. Every
//! terminal failure leaves the token store exactly as it was and releases the
//! loopback port. Nothing is retried automatically; the next call starts a
//! new attempt with fresh PKCE and state values.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use vouchersnap_common::{Error, Result};

use crate::browser::{BrowserLauncher, SystemBrowser};
use crate::callback::{CallbackListener, CallbackOutcome};
use crate::endpoint::{CodeExchange, HttpTokenEndpoint, TokenEndpoint};
use crate::pkce::{PkceAttempt, CHALLENGE_METHOD};
use crate::token_store::TokenStore;
use crate::types::{AuthConfig, AuthStatus, Credential};

/// Receives the authorization URL when no browser could be opened.
pub type ManualUrlHandler = Box<dyn Fn(&Url) + Send + Sync>;

/// Phase of a single login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptPhase {
    Idle,
    ChallengeBuilt,
    ListenerArmed,
    BrowserLaunched,
    AwaitingCallback,
    CodeReceived,
    ExchangePending,
    Authenticated,
    TimedOut,
    Rejected,
    ExchangeFailed,
}

impl AttemptPhase {
    /// Whether the attempt has finished.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AttemptPhase::Authenticated
                | AttemptPhase::TimedOut
                | AttemptPhase::Rejected
                | AttemptPhase::ExchangeFailed
        )
    }
}

impl fmt::Display for AttemptPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Tracks and logs phase transitions of one attempt.
struct AttemptTracker {
    phase: AttemptPhase,
}

impl AttemptTracker {
    fn new() -> Self {
        Self {
            phase: AttemptPhase::Idle,
        }
    }

    fn advance(&mut self, next: AttemptPhase) {
        debug_assert!(!self.phase.is_terminal(), "attempt already finished");
        debug!(from = %self.phase, to = %next, "Login attempt phase");
        self.phase = next;
    }

    /// Record a terminal failure and hand the error back.
    fn fail(&mut self, phase: AttemptPhase, err: Error) -> Error {
        self.advance(phase);
        err
    }
}

/// Obtains, caches and discards the iNaturalist access credential.
pub struct AuthBroker {
    config: AuthConfig,
    store: TokenStore,
    endpoint: Arc<dyn TokenEndpoint>,
    browser: Arc<dyn BrowserLauncher>,
    manual_url: Option<ManualUrlHandler>,
    cancel: Option<CancellationToken>,
}

impl AuthBroker {
    /// Create a broker from explicit collaborators.
    ///
    /// # Errors
    /// - Invalid configuration (see [`AuthConfig::validate`])
    pub fn new(
        config: AuthConfig,
        store: TokenStore,
        endpoint: Arc<dyn TokenEndpoint>,
        browser: Arc<dyn BrowserLauncher>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            endpoint,
            browser,
            manual_url: None,
            cancel: None,
        })
    }

    /// Create a broker talking to the configured token endpoint over HTTPS,
    /// opening the system browser, and storing the credential at `store`.
    pub fn with_defaults(config: AuthConfig, store: TokenStore) -> Result<Self> {
        let endpoint = Arc::new(HttpTokenEndpoint::new(&config.token_url)?);
        Self::new(config, store, endpoint, Arc::new(SystemBrowser))
    }

    /// Replace the browser launcher, e.g. with [`ManualBrowser`](crate::ManualBrowser) on headless hosts.
    pub fn with_browser(mut self, browser: Arc<dyn BrowserLauncher>) -> Self {
        self.browser = browser;
        self
    }

    /// Call `handler` with the authorization URL whenever the browser cannot be opened.
    pub fn with_manual_url_handler(mut self, handler: impl Fn(&Url) + Send + Sync + 'static) -> Self {
        self.manual_url = Some(Box::new(handler));
        self
    }

    /// Abort any pending callback wait (as `Rejected`) once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Return a usable credential, running the interactive login only if needed.
    ///
    /// A cached, unexpired credential is returned without any network access.
    ///
    /// # Errors
    /// - `TimedOut`, `Rejected`, `ExchangeFailed`, `PortUnavailable` from the login attempt
    pub async fn ensure_authenticated(&self) -> Result<Credential> {
        match self.store.load().await {
            Some(credential) if !credential.is_expired() => {
                debug!(expires_at = %credential.expires_at(), "Using cached credential");
                return Ok(credential);
            }
            Some(_) => info!("Cached credential expired, logging in again"),
            None => debug!("No cached credential"),
        }
        self.login().await
    }

    /// Return the cached credential without ever starting a login.
    ///
    /// # Errors
    /// - `NotAuthenticated` if there is no usable credential
    pub async fn cached_credential(&self) -> Result<Credential> {
        self.store
            .load()
            .await
            .filter(|c| !c.is_expired())
            .ok_or(Error::NotAuthenticated)
    }

    /// Run a full interactive login, replacing any cached credential on success.
    pub async fn login(&self) -> Result<Credential> {
        let credential = self.run_attempt().await?;
        info!("Logged in to iNaturalist");
        Ok(credential)
    }

    /// Forget the cached credential. Succeeds when already logged out.
    pub async fn logout(&self) -> Result<()> {
        self.store.clear().await?;
        info!("Logged out");
        Ok(())
    }

    /// Describe what the token store holds.
    pub async fn status(&self) -> AuthStatus {
        self.store.status().await
    }

    /// Authorization URL for `attempt`.
    pub fn authorization_url(&self, attempt: &PkceAttempt) -> Result<Url> {
        let mut url = Url::parse(&self.config.auth_url)
            .map_err(|e| Error::Config(format!("Invalid auth URL: {}", e)))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", &self.config.redirect_uri())
                .append_pair("response_type", "code")
                .append_pair("code_challenge", attempt.code_challenge())
                .append_pair("code_challenge_method", CHALLENGE_METHOD)
                .append_pair("state", attempt.state());
            if !self.config.scopes.is_empty() {
                query.append_pair("scope", &self.config.scopes.join(" "));
            }
        }
        Ok(url)
    }

    async fn run_attempt(&self) -> Result<Credential> {
        let mut tracker = AttemptTracker::new();

        let attempt = PkceAttempt::new()?;
        let auth_url = self.authorization_url(&attempt)?;
        tracker.advance(AttemptPhase::ChallengeBuilt);

        // Armed before the browser opens so an instant redirect cannot be missed.
        let listener =
            CallbackListener::bind(self.config.redirect_port, self.config.redirect_path.as_str())
                .await?;
        tracker.advance(AttemptPhase::ListenerArmed);

        if let Err(e) = self.browser.launch(&auth_url) {
            warn!("Could not open a browser: {}", e);
            self.surface_manual_url(&auth_url);
        }
        tracker.advance(AttemptPhase::BrowserLaunched);

        let timeout = self.config.callback_timeout();
        tracker.advance(AttemptPhase::AwaitingCallback);
        let outcome = match &self.cancel {
            Some(cancel) => listener.await_callback_until(timeout, cancel).await,
            None => listener.await_callback(timeout).await,
        };

        let authorization = match outcome {
            CallbackOutcome::Authorized(result) => result,
            CallbackOutcome::Rejected(detail) => {
                warn!("Authorization rejected: {}", detail);
                return Err(tracker.fail(AttemptPhase::Rejected, Error::Rejected(detail)));
            }
            CallbackOutcome::TimedOut => {
                warn!("No authorization callback within {}s", timeout.as_secs());
                return Err(tracker.fail(AttemptPhase::TimedOut, Error::TimedOut(timeout)));
            }
        };
        tracker.advance(AttemptPhase::CodeReceived);

        if !attempt.state_matches(&authorization.returned_state) {
            warn!("Authorization callback state did not match this attempt");
            return Err(tracker.fail(
                AttemptPhase::Rejected,
                Error::Rejected("state parameter mismatch".to_string()),
            ));
        }

        let exchange = CodeExchange {
            client_id: self.config.client_id.clone(),
            code: authorization.code.clone(),
            code_verifier: attempt.code_verifier().to_string(),
            redirect_uri: self.config.redirect_uri(),
        };
        tracker.advance(AttemptPhase::ExchangePending);

        let credential = match self.endpoint.exchange_code(&exchange).await {
            Ok(credential) => credential,
            Err(e) => {
                warn!("Token exchange failed: {}", e);
                return Err(tracker.fail(AttemptPhase::ExchangeFailed, e));
            }
        };

        self.store.save(&credential).await?;
        tracker.advance(AttemptPhase::Authenticated);
        Ok(credential)
    }

    fn surface_manual_url(&self, url: &Url) {
        match &self.manual_url {
            Some(handler) => handler(url),
            None => warn!("Open this URL to log in: {}", url),
        }
    }
}
