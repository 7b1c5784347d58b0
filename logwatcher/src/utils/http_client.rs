use std::{sync::OnceLock, time::Duration};

use reqwest::Client;
use tracing::debug;

use crate::{Error, Result};

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Safe to ignore: can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the HTTP client used by one notification channel.
pub fn build_client(channel: &'static str, timeout: Duration) -> Result<Client> {
    install_rustls_provider();
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("logwatcher/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| Error::channel(channel, format!("failed to build HTTP client: {e}")))
}
