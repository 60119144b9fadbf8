//! Browsing-context seam.
//!
//! The session client and the handoff builder never open URLs themselves;
//! they go through a `Navigator` owned by the presentation shell.

use url::Url;

use crate::error::NavigationError;

/// Where a URL is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowsingContext {
    /// Replace the current page (login and logout redirects).
    Current,
    /// A new tab or window; the current page stays.
    NewTab,
}

pub trait Navigator: Send + Sync {
    /// Location of the page hosting the session client, if there is one.
    ///
    /// Used to detect a login callback and as the default redirect URI.
    fn current_url(&self) -> Option<Url> {
        None
    }

    /// # Errors
    /// Returns `NavigationError` when the context could not be opened.
    fn open(&self, url: &Url, context: BrowsingContext) -> Result<(), NavigationError>;

    /// Whether a hidden session-status frame can be embedded.
    fn supports_login_iframe(&self) -> bool {
        false
    }
}
