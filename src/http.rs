use log::debug;
use reqwest::Client;
use url::Url;

use crate::config::FetchConfig;
use crate::error::{Error, Resource, Result};

/// Build the HTTP client used for every fetch in a run: browser-default
/// headers plus the config's passthrough bag, one timeout for all calls.
pub fn build_client(config: &FetchConfig) -> Result<Client> {
    let headers = config.header_map();
    debug!("using HTTP headers: {headers:?}");
    Client::builder()
        .default_headers(headers)
        .timeout(config.timeout)
        .build()
        .map_err(|e| Error::InputValidation(format!("failed to build HTTP client: {e}")))
}

/// GET a URL and return the body as text.
pub async fn fetch_text(client: &Client, url: Url, resource: Resource) -> Result<String> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| Error::network(resource, &url, e))?
        .error_for_status()
        .map_err(|e| Error::network(resource, &url, e))?;
    response
        .text()
        .await
        .map_err(|e| Error::network(resource, &url, e))
}

/// GET a URL and return the raw body bytes.
pub async fn fetch_bytes(client: &Client, url: Url, resource: Resource) -> Result<Vec<u8>> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| Error::network(resource, &url, e))?
        .error_for_status()
        .map_err(|e| Error::network(resource, &url, e))?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| Error::network(resource, &url, e))?;
    Ok(bytes.to_vec())
}
