//! Transport variant selection.
//!
//! The variant is chosen once, when the client is built:
//!
//! | Page origin | Overlay available | Transport |
//! |-------------|-------------------|-----------|
//! | served (`http`/`https`) | yes | overlay session at `overlay_path` + page query |
//! | served (`http`/`https`) | no | direct WebSocket to the page origin |
//! | local file / none | any | direct WebSocket to the development URL |
//!
//! A secure page (`https`) maps to a secure endpoint (`wss`).

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tracing::info;
use url::Url;

use crate::error::{Error, Result};

use super::{DirectTransport, Link, OverlayTransport, Transport};

// ============================================================================
// Constants
// ============================================================================

/// Endpoint used when the page is not served by the device.
pub const DEFAULT_DEV_URL: &str = "ws://device/";

/// Path of the overlay session endpoint on the device.
pub const DEFAULT_OVERLAY_PATH: &str = "/minnow-smq.lsp";

// ============================================================================
// TransportSelector
// ============================================================================

/// Chooses between the direct and the overlay transport.
#[derive(Debug, Clone)]
pub struct TransportSelector {
    /// URL the control page was loaded from; `None` behaves like a local file.
    page_url: Option<Url>,
    /// Whether the hosting environment offers an overlay session.
    overlay_available: bool,
    /// Fallback endpoint for pages not served by the device.
    dev_url: Url,
    /// Overlay endpoint path.
    overlay_path: String,
}

impl TransportSelector {
    /// Creates a selector for a page loaded from `page_url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`] only if the built-in development URL fails to
    /// parse.
    pub fn new(page_url: Option<Url>) -> Result<Self> {
        Ok(Self {
            page_url,
            overlay_available: false,
            dev_url: Url::parse(DEFAULT_DEV_URL)?,
            overlay_path: DEFAULT_OVERLAY_PATH.to_string(),
        })
    }

    /// Sets whether an overlay session is available.
    #[inline]
    #[must_use]
    pub fn with_overlay_available(mut self, available: bool) -> Self {
        self.overlay_available = available;
        self
    }

    /// Sets the development fallback endpoint.
    #[inline]
    #[must_use]
    pub fn with_dev_url(mut self, url: Url) -> Self {
        self.dev_url = url;
        self
    }

    /// Sets the overlay endpoint path.
    #[inline]
    #[must_use]
    pub fn with_overlay_path(mut self, path: impl Into<String>) -> Self {
        self.overlay_path = path.into();
        self
    }

    /// Returns `true` if the page was not served over the network.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.page_url
            .as_ref()
            .is_none_or(|url| url.scheme() == "file" || url.host_str().is_none())
    }

    /// Returns the direct WebSocket endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`] if the derived endpoint does not parse.
    pub fn direct_url(&self) -> Result<Url> {
        match &self.page_url {
            Some(page) if !self.is_local() => origin_endpoint(page, "/"),
            _ => Ok(self.dev_url.clone()),
        }
    }

    /// Returns the overlay endpoint, or `None` when the page is local.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`] if the derived endpoint does not parse.
    pub fn overlay_url(&self) -> Result<Option<Url>> {
        match &self.page_url {
            Some(page) if !self.is_local() => {
                let mut url = origin_endpoint(page, &self.overlay_path)?;
                url.set_query(page.query());
                Ok(Some(url))
            }
            _ => Ok(None),
        }
    }

    /// Builds the transport variant for this page.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`] if an endpoint cannot be derived.
    pub fn select(&self) -> Result<SelectedTransport> {
        if self.overlay_available
            && let Some(url) = self.overlay_url()?
        {
            info!(%url, "Using overlay session transport");
            return Ok(SelectedTransport::Overlay(OverlayTransport::new(url)));
        }

        let url = self.direct_url()?;
        info!(%url, "Using direct WebSocket transport");
        Ok(SelectedTransport::Direct(DirectTransport::new(url)))
    }
}

/// Maps the page origin to a WebSocket endpoint with the given path.
fn origin_endpoint(page: &Url, path: &str) -> Result<Url> {
    let scheme = if page.scheme() == "https" { "wss" } else { "ws" };
    let host = page
        .host_str()
        .ok_or_else(|| Error::config(format!("page URL has no host: {page}")))?;

    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };

    let endpoint = match page.port() {
        Some(port) => format!("{scheme}://{host}:{port}{path}"),
        None => format!("{scheme}://{host}{path}"),
    };

    Ok(Url::parse(&endpoint)?)
}

// ============================================================================
// SelectedTransport
// ============================================================================

/// The transport variant chosen by [`TransportSelector::select`].
#[derive(Debug)]
pub enum SelectedTransport {
    /// Direct WebSocket.
    Direct(DirectTransport),
    /// Overlay session.
    Overlay(OverlayTransport),
}

impl SelectedTransport {
    /// Returns `true` for the overlay variant.
    #[inline]
    #[must_use]
    pub fn is_overlay(&self) -> bool {
        matches!(self, Self::Overlay(_))
    }

    /// Returns the endpoint of the chosen variant.
    #[must_use]
    pub fn url(&self) -> &Url {
        match self {
            Self::Direct(t) => t.url(),
            Self::Overlay(t) => t.url(),
        }
    }
}

#[async_trait]
impl Transport for SelectedTransport {
    async fn connect(&self) -> Result<Link> {
        match self {
            Self::Direct(t) => t.connect().await,
            Self::Overlay(t) => t.connect().await,
        }
    }

    fn reconnectable(&self) -> bool {
        match self {
            Self::Direct(t) => t.reconnectable(),
            Self::Overlay(t) => t.reconnectable(),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Direct(t) => t.describe(),
            Self::Overlay(t) => t.describe(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
