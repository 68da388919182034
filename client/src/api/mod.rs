use std::error::Error as StdError;
use std::fmt;

use anyhow::Result;
use bytes::Bytes;
use const_format::formatcp;
use displaydoc::Display;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT},
    Client as HttpClient, Response, StatusCode, Url,
};
use serde::{de::DeserializeOwned, Deserialize};

use crate::version::CSVGATE_DISTRIBUTOR;
use csvgate::api::v1::group_files::GroupFilesResponse;
use csvgate::api::v1::load_tables::{LoadTablesRequest, LoadTablesResponse};
use csvgate::api::v1::reclaim::ReclaimResponse;
use csvgate::api::v1::upload_chunk::{
    FinalizeUploadRequest, FinalizeUploadResponse, UploadChunkResponse, CSVGATE_CHUNK_INDEX,
    CSVGATE_CHUNK_TOTAL, CSVGATE_SESSION_TOKEN,
};
use csvgate::api::v1::upload_session::{CreateSessionResponse, CSVGATE_FILENAME};
use csvgate::session::{FileName, SessionToken};

/// The User-Agent string of csvgate.
const CSVGATE_USER_AGENT: &str = formatcp!(
    "csvgate/{} ({})",
    env!("CARGO_PKG_VERSION"),
    CSVGATE_DISTRIBUTOR
);

/// The csvgate API client.
#[derive(Debug, Clone)]
pub struct ApiClient {
    /// Base endpoint of the server.
    endpoint: Url,

    /// An initialized HTTP client.
    client: HttpClient,
}

/// An API error.
#[derive(Debug, Display)]
pub enum ApiError {
    /// {0}
    Structured(StructuredApiError),

    /// HTTP {0}: {1}
    Unstructured(StatusCode, String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct StructuredApiError {
    #[allow(dead_code)]
    code: u16,
    error: String,
    message: String,
}

impl ApiClient {
    pub fn new(endpoint: &str, token: Option<&str>) -> Result<Self> {
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            client: build_http_client(token)?,
        })
    }

    /// Creates an upload session holding `data` as `filename`.
    pub async fn create_session(&self, filename: &FileName, data: Bytes) -> Result<SessionToken> {
        let endpoint = self.endpoint.join("_api/v1/upload-session")?;

        let res = self
            .client
            .post(endpoint)
            .header(CSVGATE_FILENAME, filename.as_str())
            .body(data)
            .send()
            .await?;

        let response: CreateSessionResponse = parse_response(res).await?;
        Ok(response.session_token)
    }

    /// Uploads a chunk of a file.
    pub async fn upload_chunk(
        &self,
        session_token: &SessionToken,
        filename: &FileName,
        chunk_index: u32,
        total_chunks: u32,
        data: Bytes,
    ) -> Result<UploadChunkResponse> {
        let endpoint = self.endpoint.join("_api/v1/upload-chunk")?;

        let res = self
            .client
            .put(endpoint)
            .header(CSVGATE_SESSION_TOKEN, session_token.as_str())
            .header(CSVGATE_FILENAME, filename.as_str())
            .header(CSVGATE_CHUNK_INDEX, chunk_index)
            .header(CSVGATE_CHUNK_TOTAL, total_chunks)
            .body(data)
            .send()
            .await?;

        parse_response(res).await
    }

    /// Merges the uploaded chunks of a file.
    pub async fn finalize_upload(
        &self,
        request: &FinalizeUploadRequest,
    ) -> Result<FinalizeUploadResponse> {
        let endpoint = self.endpoint.join("_api/v1/finalize-upload")?;
        let res = self.client.post(endpoint).json(request).send().await?;

        parse_response(res).await
    }

    /// Groups the files of a session by header row.
    pub async fn group_files(&self, session_token: &SessionToken) -> Result<GroupFilesResponse> {
        let endpoint = self
            .endpoint
            .join("_api/v1/group-files/")?
            .join(session_token.as_str())?;

        let res = self.client.get(endpoint).send().await?;

        parse_response(res).await
    }

    /// Creates and loads one table per group.
    pub async fn load_tables(&self, request: &LoadTablesRequest) -> Result<LoadTablesResponse> {
        let endpoint = self.endpoint.join("_api/v1/load-tables")?;
        let res = self.client.post(endpoint).json(request).send().await?;

        parse_response(res).await
    }

    /// Runs a reclamation cycle on the server.
    pub async fn reclaim(&self) -> Result<ReclaimResponse> {
        let endpoint = self.endpoint.join("_api/v1/reclaim")?;
        let res = self.client.post(endpoint).send().await?;

        parse_response(res).await
    }
}

impl StdError for ApiError {}

impl ApiError {
    async fn try_from_response(response: Response) -> Result<Self> {
        let status = response.status();
        let text = response.text().await?;
        match serde_json::from_str(&text) {
            Ok(s) => Ok(Self::Structured(s)),
            Err(_) => Ok(Self::Unstructured(status, text)),
        }
    }

    /// Returns the error name reported by the server, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Structured(e) => Some(&e.error),
            Self::Unstructured(..) => None,
        }
    }
}

impl fmt::Display for StructuredApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error, self.message)
    }
}

async fn parse_response<T: DeserializeOwned>(res: Response) -> Result<T> {
    if res.status().is_success() {
        Ok(res.json().await?)
    } else {
        let api_error = ApiError::try_from_response(res).await?;
        Err(api_error.into())
    }
}

fn build_http_client(token: Option<&str>) -> Result<HttpClient> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CSVGATE_USER_AGENT));

    if let Some(token) = token {
        let mut auth_header = HeaderValue::from_str(&format!("bearer {}", token))?;
        auth_header.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth_header);
    }

    Ok(reqwest::Client::builder().default_headers(headers).build()?)
}
