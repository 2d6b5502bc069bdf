//! iNaturalist authentication for VoucherSnap.
//!
//! Implements the OAuth2 authorization code flow with PKCE for a desktop
//! CLI: a one-shot loopback listener catches the browser redirect, the code
//! is exchanged without any client secret, and the resulting credential is
//! cached on disk between runs.
//!
//! # Design Principles
//! - Fresh PKCE verifier and state per attempt, never persisted
//! - Loopback-only listener, released on every exit path
//! - Atomic credential writes; a corrupt cache reads as "logged out"
//! - Token endpoint and browser behind traits so tests can substitute them

pub mod broker;
pub mod browser;
pub mod callback;
pub mod endpoint;
pub mod pkce;
pub mod token_store;
pub mod types;

pub use broker::{AttemptPhase, AuthBroker};
pub use browser::{BrowserLauncher, ManualBrowser, SystemBrowser};
pub use callback::{AuthorizationResult, CallbackListener, CallbackOutcome};
pub use endpoint::{CodeExchange, HttpTokenEndpoint, TokenEndpoint, TokenGrant};
pub use pkce::{challenge_for, new_attempt, PkceAttempt};
pub use token_store::TokenStore;
pub use types::{AuthConfig, AuthStatus, Credential};
