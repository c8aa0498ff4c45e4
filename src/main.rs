use std::sync::Arc;

use ::pingora::server::Server;

use anyhow::Context;
use clap::crate_version;
use config::LogFormat;
use pingora::{proxy::http_proxy_service, server::configuration::Opt};
use tracing_subscriber::EnvFilter;

use proxy_server::http_proxy::PypiGateway;

mod cache;
mod config;
mod error;
mod proxy_server;
mod pypi;
mod router;
mod upstream;

#[deny(
    clippy::all,
    clippy::pedantic,
    clippy::perf,
    clippy::correctness,
    clippy::style,
    clippy::suspicious,
    clippy::complexity
)]

fn main() -> Result<(), anyhow::Error> {
    // Loads configuration from command-line, YAML or environment sources
    let config = Arc::new(
        config::load("/etc/pypi-bridge/configs").context("failed to load configuration")?,
    );

    // Creates a tracing/logging subscriber based on the configuration provided
    if config.logging.format == LogFormat::Json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_max_level(&config.logging.level)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_max_level(&config.logging.level)
            .init();
    };

    let cache = Arc::new(cache::ProxyCache::new(&config));
    let client = upstream::UpstreamClient::new().context("failed to build upstream HTTP client")?;
    let router = Arc::new(router::Router::new(config.clone(), cache.clone(), client));

    let pingora_opts = Opt {
        daemon: false,
        upgrade: false,
        conf: None,
        nocapture: false,
        test: false,
    };

    let mut pingora_server = Server::new(Some(pingora_opts))?;
    pingora_server.bootstrap();

    let gateway = PypiGateway::new(config.clone(), router, cache);
    let mut proxy_service = http_proxy_service(&pingora_server.configuration, gateway);

    let listen_addr = format!("0.0.0.0:{}", config.port);
    proxy_service.add_tcp(&listen_addr);
    proxy_service.threads = config.worker_threads;

    pingora_server.add_service(proxy_service);

    tracing::info!(
        version = crate_version!(),
        workers = config.worker_threads,
        public_index = %config.public_pypi_url,
        private_index = %config.private_index_base(),
        listen = %listen_addr,
        cache_enabled = config.cache_enabled,
        "serving unified package index"
    );

    pingora_server.run_forever();
}
