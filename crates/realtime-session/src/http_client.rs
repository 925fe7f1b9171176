use std::sync::OnceLock;

use tracing::{debug, warn};

use crate::config::SessionConfig;

/// Install the process-wide rustls crypto provider.
///
/// Both reqwest and the WebSocket transport are built without a bundled provider.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Safe to ignore: can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the `reqwest::Client` used for REST requests and the refresh call.
pub fn build_http_client(config: &SessionConfig) -> reqwest::Client {
    install_rustls_provider();

    let mut builder = reqwest::Client::builder()
        .user_agent(concat!("realtime-session/", env!("CARGO_PKG_VERSION")));

    if !config.request_timeout().is_zero() {
        builder = builder.timeout(config.request_timeout());
    }

    builder.build().unwrap_or_else(|error| {
        warn!(
            error = %error,
            "Failed to create configured HTTP client; falling back to reqwest defaults"
        );
        reqwest::Client::new()
    })
}
