//! Builder pattern for client configuration.
//!
//! # Example
//!
//! ```no_run
//! use device_link::Client;
//!
//! # fn example() -> device_link::Result<()> {
//! let client = Client::builder()
//!     .page_url("https://192.168.1.20/index.html")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use url::Url;

use crate::connection::ReconnectPolicy;
use crate::error::{Error, Result};
use crate::transport::{Transport, TransportSelector};

use super::core::Client;
use super::options::ClientOptions;

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for a [`Client`].
///
/// Use [`Client::builder()`] to create one.
#[derive(Default)]
pub struct ClientBuilder {
    /// URL the control page was served from.
    page_url: Option<String>,
    /// Whether an overlay session is offered.
    overlay_available: bool,
    /// Connection settings.
    options: ClientOptions,
    /// Transport overriding the selection.
    transport: Option<Arc<dyn Transport>>,
}

impl ClientBuilder {
    /// Creates a builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the URL the control page was served from.
    ///
    /// Without it the client connects to [`ClientOptions::dev_url`].
    #[inline]
    #[must_use]
    pub fn page_url(mut self, url: impl Into<String>) -> Self {
        self.page_url = Some(url.into());
        self
    }

    /// Declares that the hosting environment offers an overlay session.
    #[inline]
    #[must_use]
    pub fn overlay_available(mut self, available: bool) -> Self {
        self.overlay_available = available;
        self
    }

    /// Replaces all connection settings.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the reconnection policy.
    #[inline]
    #[must_use]
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.options.reconnect = policy;
        self
    }

    /// Uses `transport` instead of selecting one from the page URL.
    #[inline]
    #[must_use]
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Builds the client. No connection is made until [`Client::connect`].
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if a page URL is combined with a custom transport
    /// - [`Error::Url`] if a configured URL does not parse
    pub fn build(self) -> Result<Client> {
        let transport = match self.transport {
            Some(transport) => {
                if self.page_url.is_some() || self.overlay_available {
                    return Err(Error::config(
                        "page_url and overlay_available have no effect with a custom transport",
                    ));
                }
                transport
            }
            None => Arc::new(Self::select(
                self.page_url.as_deref(),
                self.overlay_available,
                &self.options,
            )?),
        };

        Ok(Client::new(transport, self.options))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ClientBuilder {
    fn select(
        page_url: Option<&str>,
        overlay_available: bool,
        options: &ClientOptions,
    ) -> Result<crate::transport::SelectedTransport> {
        let page = page_url.map(Url::parse).transpose()?;
        let dev_url = Url::parse(&options.dev_url)?;

        if !matches!(dev_url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "dev_url must use ws:// or wss://, got {dev_url}"
            )));
        }

        TransportSelector::new(page)?
            .with_overlay_available(overlay_available)
            .with_dev_url(dev_url)
            .with_overlay_path(options.overlay_path.clone())
            .select()
    }
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("page_url", &self.page_url)
            .field("overlay_available", &self.overlay_available)
            .field("options", &self.options)
            .field(
                "transport",
                &self.transport.as_ref().map(|t| t.describe()),
            )
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
