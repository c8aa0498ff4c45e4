use anyhow::anyhow;
use reqwest::Url;

use super::Config;

/// given a Config struct, validate the values to ensure
/// the proxy won't panic when we try to use them
pub fn check_config(config: &Config) -> Result<(), anyhow::Error> {
    let Some(private_url) = config
        .private_pypi_url
        .as_deref()
        .filter(|url| !url.is_empty())
    else {
        return Err(anyhow!("private_pypi_url is required and cannot be empty"));
    };

    check_index_url("private_pypi_url", private_url)?;
    check_index_url("public_pypi_url", &config.public_pypi_url)?;

    if config.cache_enabled && config.cache_size == 0 {
        return Err(anyhow!(
            "cache_size must be greater than 0 when the cache is enabled"
        ));
    }

    if config.worker_threads.map_or(true, |threads| threads == 0) {
        return Err(anyhow!("worker_threads must be greater than 0"));
    }

    Ok(())
}

fn check_index_url(key: &str, value: &str) -> Result<(), anyhow::Error> {
    let url = Url::parse(value).map_err(|err| anyhow!("{key} is not a valid URL: {err}"))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(anyhow!(
            "{key} must be an absolute http(s) URL, got {value}"
        ));
    }
    Ok(())
}
