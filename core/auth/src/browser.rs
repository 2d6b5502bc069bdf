//! Launching the user's browser at the authorization URL.

use url::Url;

/// Opens a URL for the user to complete authorization.
pub trait BrowserLauncher: Send + Sync {
    /// Open `url`. Failure is not fatal to a login; the URL is shown instead.
    fn launch(&self, url: &Url) -> std::io::Result<()>;
}

/// The platform's default browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn launch(&self, url: &Url) -> std::io::Result<()> {
        open::that(url.as_str())
    }
}

/// Never opens anything; for headless sessions where the URL is copied by hand.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualBrowser;

impl BrowserLauncher for ManualBrowser {
    fn launch(&self, _url: &Url) -> std::io::Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "browser launch disabled",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_browser_never_launches() {
        let url = Url::parse("https://www.inaturalist.org/oauth/authorize").unwrap();
        let err = ManualBrowser.launch(&url).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::Unsupported);
    }
}
