use crate::config::{secs, ResourceConfig};
use reqwest::Client;

/// Builds the pooled HTTP session shared by one manager
///
/// # Arguments
///
/// * `config` - Pool cap and timeouts
/// * `user_agent` - Current outbound identity
///
/// # Returns
///
/// * `Ok(Client)` - Session ready to share
/// * `Err(reqwest::Error)` - Failed to build the client
pub fn build_session(config: &ResourceConfig, user_agent: &str) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent)
        .pool_max_idle_per_host(config.max_connections_per_host)
        .timeout(secs(config.session_timeout))
        .connect_timeout(secs(config.connect_timeout))
        .gzip(true)
        .brotli(true)
        .build()
}
