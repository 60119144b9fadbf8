//! Navigator backed by the desktop browser.

use relay_core::error::NavigationError;
use relay_core::navigator::{BrowsingContext, Navigator};
use url::Url;

/// Opens every URL in the default browser; the browser decides tab placement.
///
/// A terminal has no current location, so callbacks always come in through
/// the loopback listener.
#[derive(Debug, Default, Clone, Copy)]
pub struct BrowserNavigator {
    print_only: bool,
}

impl BrowserNavigator {
    /// `print_only` prints URLs instead of launching a browser.
    pub fn new(print_only: bool) -> Self {
        Self { print_only }
    }
}

impl Navigator for BrowserNavigator {
    fn open(&self, url: &Url, context: BrowsingContext) -> Result<(), NavigationError> {
        if self.print_only {
            println!("Open in your browser:");
            println!("  {url}");
            return Ok(());
        }
        tracing::debug!(?context, host = url.host_str().unwrap_or_default(), "opening browser");
        open::that(url.as_str()).map_err(|e| NavigationError::new(url.as_str(), e.to_string()))
    }
}
