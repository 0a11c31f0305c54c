//! Server configuration, read from the environment after `.env` is loaded.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

pub const DEFAULT_COMPLETION_URL: &str =
    "https://llm.api.cloud.yandex.net/foundationModels/v1/completion";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    /// Directory served for every path that is not an API route.
    pub static_dir: String,
    pub completion_url: String,
    pub api_key: Option<String>,
    pub folder_id: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            host: parse_env("HOST", IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            port: parse_env("PORT", 3000),
            static_dir: env_or("STATIC_DIR", "public"),
            completion_url: env_or("YANDEX_COMPLETION_URL", DEFAULT_COMPLETION_URL),
            api_key: std::env::var("YANDEX_API_KEY").ok(),
            folder_id: std::env::var("YANDEX_FOLDER_ID").ok(),
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_addr_joins_host_and_port() {
        let config = Config {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8080,
            static_dir: "public".to_string(),
            completion_url: DEFAULT_COMPLETION_URL.to_string(),
            api_key: None,
            folder_id: None,
        };
        assert_eq!(config.listen_addr().to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn unparsable_value_falls_back_to_default() {
        std::env::set_var("PSY_CHAT_TEST_PORT", "not-a-port");
        assert_eq!(parse_env::<u16>("PSY_CHAT_TEST_PORT", 3000), 3000);
        std::env::remove_var("PSY_CHAT_TEST_PORT");
    }
}
