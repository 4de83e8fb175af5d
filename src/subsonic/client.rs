//! reqwest-backed Subsonic client with token authentication.

use std::time::Duration;

use futures::TryStreamExt;
use rand::Rng;
use rand::distributions::Alphanumeric;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use url::Url;

use super::models::{DirectoryEntry, DirectoryPayload, Empty, Envelope, IndexesPayload};
use super::{ArtistEntry, AudioStream, LibraryApi};
use crate::config::{ServerAddress, TranscodeOptions};
use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::format::is_error_envelope;
use crate::types::TrackId;

/// API version sent with every request
const API_VERSION: &str = "1.16.1";
/// Client name reported to the server
const CLIENT_NAME: &str = "downsonic";
/// Length of the random salt used for token authentication
const SALT_LENGTH: usize = 12;
/// Timeout for listing calls (streams only get a connect timeout)
const LISTING_TIMEOUT_SECS: u64 = 30;
/// Timeout for establishing a connection
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Authenticated handle on a Subsonic server
pub struct SubsonicClient {
    http: reqwest::Client,
    base: Url,
    credentials: Credentials,
}

impl SubsonicClient {
    /// Create a client for the given server
    ///
    /// No request is made; call [`LibraryApi::ping`] to verify the credentials.
    pub fn new(address: &ServerAddress, credentials: Credentials) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .user_agent(concat!("downsonic/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base: address.base_url()?,
            credentials,
        })
    }

    /// Create a client against an arbitrary base URL (used by tests against a mock server)
    pub fn with_base_url(base: Url, credentials: Credentials) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base,
            credentials,
        })
    }

    /// Build the URL of an API method with authentication parameters attached
    fn endpoint(&self, method: &str, params: &[(&str, String)]) -> Result<Url> {
        let mut url = self
            .base
            .join(&format!("rest/{method}"))
            .map_err(|e| Error::Other(format!("invalid endpoint '{method}': {e}")))?;

        let salt = random_salt();
        let token = auth_token(&self.credentials.password, &salt);

        url.query_pairs_mut()
            .append_pair("u", &self.credentials.username)
            .append_pair("t", &token)
            .append_pair("s", &salt)
            .append_pair("v", API_VERSION)
            .append_pair("c", CLIENT_NAME)
            .append_pair("f", "json")
            .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));

        Ok(url)
    }

    /// Call a listing method and unwrap its envelope
    async fn call<T>(&self, method: &str, params: &[(&str, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let url = self.endpoint(method, params)?;
        tracing::debug!(method, "Calling Subsonic API");

        let response = self
            .http
            .get(url.clone())
            .timeout(Duration::from_secs(LISTING_TIMEOUT_SECS))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::HttpStatus {
                status: response.status().as_u16(),
                url: redact(&url),
            });
        }

        let body = response.bytes().await?;
        parse_envelope(&body)
    }
}

#[async_trait::async_trait]
impl LibraryApi for SubsonicClient {
    async fn ping(&self) -> Result<()> {
        self.call::<Empty>("ping", &[]).await.map(|_| ())
    }

    async fn list_artists(&self) -> Result<Vec<ArtistEntry>> {
        let payload: IndexesPayload = self.call("getIndexes", &[]).await?;
        Ok(payload
            .indexes
            .map(|indexes| {
                indexes
                    .index
                    .into_iter()
                    .flat_map(|index| index.artist)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_albums(&self, artist_id: &str) -> Result<Vec<DirectoryEntry>> {
        self.music_directory(artist_id).await
    }

    async fn list_tracks(&self, album_id: &str) -> Result<Vec<DirectoryEntry>> {
        self.music_directory(album_id).await
    }

    async fn open_stream(
        &self,
        track_id: &TrackId,
        transcode: &TranscodeOptions,
    ) -> Result<AudioStream> {
        let mut params = vec![("id", track_id.to_string())];
        if let Some(bitrate) = transcode.max_bitrate_kbps {
            params.push(("maxBitRate", bitrate.to_string()));
        }
        if let Some(format) = &transcode.format {
            params.push(("format", format.clone()));
        }
        let url = self.endpoint("stream", &params)?;

        let response = self.http.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(Error::HttpStatus {
                status: response.status().as_u16(),
                url: redact(&url),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        // Errors on the stream endpoint come back as a regular envelope with 200 OK
        if content_type.as_deref().is_some_and(is_error_envelope) {
            let body = response.bytes().await?;
            return Err(match parse_envelope::<Empty>(&body) {
                Ok(_) => Error::InvalidResponse(format!(
                    "expected audio for track {track_id}, got {}",
                    content_type.as_deref().unwrap_or("unknown content")
                )),
                Err(e) => e,
            });
        }

        let content_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        Ok(AudioStream {
            content_type,
            content_length,
            body: Box::pin(response.bytes_stream().map_err(Error::from)),
        })
    }
}

impl SubsonicClient {
    async fn music_directory(&self, id: &str) -> Result<Vec<DirectoryEntry>> {
        let payload: DirectoryPayload = self
            .call("getMusicDirectory", &[("id", id.to_string())])
            .await?;
        let directory = payload.directory.ok_or_else(|| {
            Error::InvalidResponse(format!("getMusicDirectory({id}) returned no directory"))
        })?;
        Ok(directory.child)
    }
}

/// Decode a Subsonic envelope, turning `status: failed` into an error
fn parse_envelope<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    let envelope: Envelope<T> = serde_json::from_slice(body)
        .map_err(|e| Error::InvalidResponse(format!("malformed Subsonic response: {e}")))?;
    let response = envelope.response;

    if response.status != "ok" {
        return Err(match response.error {
            Some(err) => Error::from_subsonic(
                err.code,
                err.message
                    .unwrap_or_else(|| format!("request failed with code {}", err.code)),
            ),
            None => Error::InvalidResponse(format!(
                "response status '{}' without error details",
                response.status
            )),
        });
    }

    Ok(response.payload)
}

/// `md5(password + salt)` as lowercase hex
fn auth_token(password: &str, salt: &str) -> String {
    format!("{:x}", md5::compute(format!("{password}{salt}")))
}

fn random_salt() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SALT_LENGTH)
        .map(char::from)
        .collect()
}

/// URL without its query string, so credentials never reach logs
fn redact(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}
