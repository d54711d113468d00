use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH};
use reqwest::{Client, Url};
use tracing::{debug, instrument};

use vmsnap_core::{BlobCallError, MetadataTag};

/// Response header carrying the snapshot's timestamp token.
pub const SNAPSHOT_HEADER: &str = "x-ms-snapshot";

const METADATA_HEADER_PREFIX: &str = "x-ms-meta-";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A successful snapshot call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobSnapshotResponse {
    pub status: u16,
    pub snapshot_timestamp: String,
    pub body: String,
}

/// Issues the storage "create snapshot" call for one blob. Single attempt,
/// no retry.
#[derive(Clone, Debug)]
pub struct BlobSnapshotClient {
    client: Client,
}

impl BlobSnapshotClient {
    pub fn new(request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(request_timeout))
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// `PUT <blob_url>&comp=snapshot` with one `x-ms-meta-*` header per tag.
    #[instrument(skip_all)]
    pub async fn create_snapshot(
        &self,
        blob_url: Option<&str>,
        metadata: &[MetadataTag],
    ) -> Result<BlobSnapshotResponse, BlobCallError> {
        let blob_url = blob_url.ok_or(BlobCallError::MissingUrl)?;
        let url = snapshot_url(blob_url)?;
        let headers = build_headers(metadata)?;

        let resp = self
            .client
            .put(url)
            .headers(headers)
            .body(Vec::<u8>::new())
            .send()
            .await
            .map_err(|e| BlobCallError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        let snapshot_timestamp = resp
            .headers()
            .get(SNAPSHOT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.text().await.unwrap_or_default();
        debug!(status, has_snapshot_header = snapshot_timestamp.is_some(), "snapshot call returned");

        if status != 200 && status != 201 {
            return Err(BlobCallError::Status { status, body });
        }
        match snapshot_timestamp {
            Some(snapshot_timestamp) => Ok(BlobSnapshotResponse {
                status,
                snapshot_timestamp,
                body,
            }),
            None => Err(BlobCallError::MissingSnapshotHeader { status }),
        }
    }
}

/// Validate the blob URL and append the snapshot verb to its query.
pub fn snapshot_url(blob_url: &str) -> Result<Url, BlobCallError> {
    let parsed = Url::parse(blob_url).map_err(|e| BlobCallError::InvalidUrl(e.to_string()))?;
    if parsed.host_str().is_none() {
        return Err(BlobCallError::InvalidUrl(format!("no host in {}", parsed.scheme())));
    }
    Url::parse(&format!("{blob_url}&comp=snapshot"))
        .map_err(|e| BlobCallError::InvalidUrl(e.to_string()))
}

fn build_headers(metadata: &[MetadataTag]) -> Result<HeaderMap, BlobCallError> {
    let mut headers = HeaderMap::new();
    let _ = headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
    for tag in metadata {
        let name = HeaderName::from_bytes(format!("{METADATA_HEADER_PREFIX}{}", tag.key).as_bytes())
            .map_err(|e| BlobCallError::InvalidMetadata(format!("{}: {e}", tag.key)))?;
        let value = HeaderValue::from_str(&tag.value)
            .map_err(|e| BlobCallError::InvalidMetadata(format!("{}: {e}", tag.key)))?;
        let _ = headers.insert(name, value);
    }
    Ok(headers)
}
