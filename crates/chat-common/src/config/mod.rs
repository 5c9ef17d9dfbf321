//! Configuration structs

mod client_config;

pub use client_config::{
    ApiConfig, AppSettings, ClientConfig, ConfigError, ConnectionProperties, Environment,
    GatewayConfig, RateLimitConfig, ReconnectConfig,
};
