use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use rookie_core::Credentials;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::FetchError;

/// Locations of the public mirror configuration, tried in order.
pub const PUBLIC_CONFIG_URLS: &[&str] = &[
    "https://raw.githubusercontent.com/vrpyou/quest/main/vrp-public.json",
    "https://vrpirates.wiki/downloads/vrp-public.json",
];

#[derive(Debug, Deserialize)]
struct PublicConfigDoc {
    #[serde(rename = "baseUri", default)]
    base_uri: String,
    #[serde(default)]
    password: String,
}

/// Parse `{"baseUri": ..., "password": <base64>}` into credentials.
pub fn parse_public_config(json: &[u8]) -> Result<Credentials, FetchError> {
    let doc: PublicConfigDoc = serde_json::from_slice(json)?;
    if doc.base_uri.is_empty() || doc.password.is_empty() {
        return Err(FetchError::invalid("public config lacks baseUri or password"));
    }
    let passphrase = String::from_utf8(STANDARD.decode(doc.password.trim())?)
        .map_err(|_| FetchError::invalid("decoded password is not UTF-8"))?;
    Ok(Credentials {
        base_url: doc.base_uri,
        passphrase,
    })
}

/// Fetch the public config from the first URL that serves a valid one.
pub async fn fetch_public_config(
    client: &Client,
    urls: &[String],
) -> Result<Credentials, FetchError> {
    let mut last_err = FetchError::invalid("no public config URL configured");
    for url in urls {
        debug!(url = %url, "fetching public config");
        match fetch_one(client, url).await {
            Ok(credentials) => return Ok(credentials),
            Err(e) => {
                warn!(url = %url, error = %e, "public config unavailable");
                last_err = e;
            }
        }
    }
    Err(last_err)
}

async fn fetch_one(client: &Client, url: &str) -> Result<Credentials, FetchError> {
    let bytes = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;
    parse_public_config(&bytes)
}
