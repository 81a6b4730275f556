use std::time::Duration;

use rand::seq::SliceRandom;
use reqwest::{Client, ClientBuilder};

use crate::config::Settings;

/// Realistic browser User-Agents used when rotation is enabled.
pub const USER_AGENTS: &[&str] = &[
    // Desktop Browsers
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    // Mobile Browsers
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Linux; Android 14) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.6099.144 Mobile Safari/537.36",
];

pub const DEFAULT_USER_AGENT: &str = "bounty-hunter/0.1";

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(DEFAULT_USER_AGENT)
}

/// Build the raw transport used by the bounded fetcher.
///
/// Redirects are never followed here; the fetcher chases them itself so it
/// can enforce depth and host limits.
pub fn build_transport(settings: &Settings) -> reqwest::Result<Client> {
    ClientBuilder::new()
        // Connection pooling - reuse connections aggressively
        .pool_max_idle_per_host(settings.per_host.max(1))
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .tcp_nodelay(true)

        // Timeouts
        .timeout(settings.timeout())
        .connect_timeout(settings.timeout().min(Duration::from_secs(10)))

        // Compression
        .gzip(true)
        .brotli(true)

        // TLS
        .use_rustls_tls()
        .danger_accept_invalid_certs(true)

        .redirect(reqwest::redirect::Policy::none())
        .user_agent(DEFAULT_USER_AGENT)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_creation() {
        let client = build_transport(&Settings::default());
        assert!(client.is_ok());
    }

    #[test]
    fn test_random_user_agent_from_pool() {
        let ua = random_user_agent();
        assert!(USER_AGENTS.contains(&ua));
    }
}
