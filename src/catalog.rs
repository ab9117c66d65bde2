use crate::error::Error;
use crate::store::Blob;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const SEARCH_FIELDS: &str = "id,name,description,previews,tags,license,username";

/// Content types a download may come back with.
const ACCEPTED_CONTENT_TYPES: &[&str] = &[
    "audio/mpeg",
    "audio/wav",
    "audio/ogg",
    "audio/flac",
    "application/octet-stream",
];

/// Credentials for the remote catalog.
///
/// Passed explicitly to each call. Searching works without a token; downloads
/// need one.
#[derive(Debug, Clone, Default)]
pub struct Session {
    token: Option<String>,
}

impl Session {
    pub fn new(token: Option<String>) -> Self {
        let mut session = Self::default();
        session.set_token(token);
        session
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Replace the bearer token. Blank tokens clear it.
    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token.filter(|t| !t.trim().is_empty());
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SoundSummary {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub previews: HashMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub license: String,
    #[serde(default)]
    pub username: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SoundSummary>,
}

/// Client for the remote sound library
pub struct Catalog {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl Catalog {
    pub fn new(api_url: &str, api_key: &str, timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub async fn search(&self, query: &str, session: &Session) -> Result<Vec<SoundSummary>, Error> {
        tracing::info!("Searching catalog for {:?}", query);

        let mut request = self
            .http
            .get(format!("{}/search/text/", self.api_url))
            .query(&[
                ("query", query),
                ("token", self.api_key.as_str()),
                ("fields", SEARCH_FIELDS),
            ]);
        if let Some(token) = session.token() {
            request = request.bearer_auth(token);
        }

        let response: SearchResponse = request.send().await?.error_for_status()?.json().await?;

        tracing::info!("Catalog search returned {} results", response.results.len());
        Ok(response.results)
    }

    pub async fn download(&self, id: u64, session: &Session) -> Result<Blob, Error> {
        let token = session
            .token()
            .ok_or_else(|| Error::Catalog("downloading requires a token".to_string()))?;

        tracing::info!("Downloading sound {}", id);
        let response = self
            .http
            .get(format!("{}/sounds/{}/download/", self.api_url, id))
            .bearer_auth(token)
            .header(ACCEPT, "*/*")
            .send()
            .await?
            .error_for_status()?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let mime_type = blob_type_for(&content_type)?;

        let bytes = response.bytes().await?.to_vec();
        if bytes.is_empty() {
            return Err(Error::Catalog(format!("sound {} downloaded empty", id)));
        }

        tracing::info!("Downloaded sound {}: {} bytes of {}", id, bytes.len(), mime_type);
        Ok(Blob::new(mime_type, bytes))
    }
}

/// MIME type to store a download under, given the response's content type.
pub fn blob_type_for(content_type: &str) -> Result<&'static str, Error> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match ACCEPTED_CONTENT_TYPES.iter().find(|t| **t == essence) {
        Some(&"application/octet-stream") => Ok("audio/mpeg"),
        Some(&accepted) => Ok(accepted),
        None => Err(Error::Catalog(format!(
            "unexpected content type: {:?}",
            content_type
        ))),
    }
}
