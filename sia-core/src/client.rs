use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:9980";
const USER_AGENT: &str = "Sia-Agent";

#[derive(Debug, Error)]
pub enum SiaError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {message}")]
    Api { status: StatusCode, message: String },
}

/// Classification of a failed API call so callers branch on data rather
/// than on matching message strings themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// The named object does not exist remotely.
    NotFound,
    /// The destination path is already occupied by another object.
    Occupied,
    /// The daemon is unreachable, overloaded, or mid-restart.
    Transient,
    Other,
}

#[derive(Clone)]
pub struct SiaClient {
    http: Client,
    base_url: Url,
    api_password: Option<String>,
}

impl SiaClient {
    pub fn new(api_password: Option<String>) -> Result<Self, SiaError> {
        Self::with_base_url(DEFAULT_BASE_URL, api_password)
    }

    pub fn with_base_url(base_url: &str, api_password: Option<String>) -> Result<Self, SiaError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            api_password,
        })
    }

    /// Full renter file listing, one entry per remote object including
    /// historical versions of the same logical name.
    pub async fn renter_files(&self) -> Result<Vec<RenterFile>, SiaError> {
        let url = self.endpoint("/renter/files")?;
        let response = self.request(self.http.get(url)).send().await?;
        let payload: RenterFilesResponse = Self::handle_response(response).await?;
        Ok(payload.files.unwrap_or_default())
    }

    /// All transfers the daemon knows about, finished or not.
    pub async fn renter_downloads(&self) -> Result<Vec<RenterDownload>, SiaError> {
        let url = self.endpoint("/renter/downloads")?;
        let response = self.request(self.http.get(url)).send().await?;
        let payload: RenterDownloadsResponse = Self::handle_response(response).await?;
        Ok(payload.downloads.unwrap_or_default())
    }

    /// Begins an asynchronous upload of a local file to `siapath`. Returns
    /// as soon as the daemon has accepted the job.
    pub async fn renter_upload(
        &self,
        siapath: &str,
        source: &str,
        data_pieces: u32,
        parity_pieces: u32,
    ) -> Result<(), SiaError> {
        let mut url = self.endpoint(&format!("/renter/upload/{}", trim_siapath(siapath)))?;
        url.query_pairs_mut()
            .append_pair("source", source)
            .append_pair("datapieces", &data_pieces.to_string())
            .append_pair("paritypieces", &parity_pieces.to_string());
        let response = self.request(self.http.post(url)).send().await?;
        Self::handle_empty_response(response).await
    }

    /// Begins an asynchronous download of `siapath` into `destination`.
    pub async fn renter_download(
        &self,
        siapath: &str,
        destination: &str,
    ) -> Result<(), SiaError> {
        let mut url = self.endpoint(&format!("/renter/download/{}", trim_siapath(siapath)))?;
        url.query_pairs_mut()
            .append_pair("destination", destination)
            .append_pair("async", "true");
        let response = self.request(self.http.get(url)).send().await?;
        Self::handle_empty_response(response).await
    }

    pub async fn renter_delete(&self, siapath: &str) -> Result<(), SiaError> {
        let url = self.endpoint(&format!("/renter/delete/{}", trim_siapath(siapath)))?;
        let response = self.request(self.http.post(url)).send().await?;
        Self::handle_empty_response(response).await
    }

    /// Cheap reachability probe used by the recovery policy.
    pub async fn daemon_version(&self) -> Result<String, SiaError> {
        let url = self.endpoint("/daemon/version")?;
        let response = self.request(self.http.get(url)).send().await?;
        let payload: DaemonVersion = Self::handle_response(response).await?;
        Ok(payload.version)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.header("User-Agent", USER_AGENT);
        match &self.api_password {
            Some(password) => builder.basic_auth("", Some(password)),
            None => builder,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, SiaError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, SiaError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn handle_empty_response(response: reqwest::Response) -> Result<(), SiaError> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn api_error(response: reqwest::Response) -> SiaError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiMessage>(&body)
            .map(|payload| payload.message)
            .unwrap_or(body);
        SiaError::Api { status, message }
    }
}

impl SiaError {
    pub fn kind(&self) -> ApiErrorKind {
        match self {
            SiaError::Api { status, message } => classify_api_error(*status, message),
            SiaError::Request(err) if err.is_connect() || err.is_timeout() => {
                ApiErrorKind::Transient
            }
            _ => ApiErrorKind::Other,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ApiErrorKind::Transient
    }
}

fn classify_api_error(status: StatusCode, message: &str) -> ApiErrorKind {
    let message = message.to_ascii_lowercase();
    if status == StatusCode::NOT_FOUND
        || message.contains("unknown path")
        || message.contains("path does not exist")
        || message.contains("no file known")
    {
        ApiErrorKind::NotFound
    } else if message.contains("already exists") {
        ApiErrorKind::Occupied
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS
        )
    {
        ApiErrorKind::Transient
    } else {
        ApiErrorKind::Other
    }
}

// Siapaths never carry a leading slash on the wire.
fn trim_siapath(siapath: &str) -> &str {
    siapath.trim_start_matches('/')
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RenterFile {
    pub siapath: String,
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub filesize: u64,
    #[serde(default)]
    pub uploadprogress: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RenterDownload {
    pub siapath: String,
    pub destination: String,
    #[serde(default)]
    pub filesize: u64,
    #[serde(default)]
    pub received: u64,
    #[serde(default)]
    pub starttime: Option<String>,
    #[serde(default)]
    pub error: String,
}

impl RenterDownload {
    pub fn has_error(&self) -> bool {
        !self.error.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        !self.has_error() && self.received >= self.filesize
    }
}

// The daemon serializes empty slices as JSON null, so a plain Vec with
// `#[serde(default)]` would reject an empty listing.
#[derive(Debug, Deserialize)]
struct RenterFilesResponse {
    #[serde(default)]
    files: Option<Vec<RenterFile>>,
}

#[derive(Debug, Deserialize)]
struct RenterDownloadsResponse {
    #[serde(default)]
    downloads: Option<Vec<RenterDownload>>,
}

#[derive(Debug, Deserialize)]
struct DaemonVersion {
    version: String,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_occupied_destination() {
        let err = SiaError::Api {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "upload failed: a file already exists at that location".into(),
        };
        assert_eq!(err.kind(), ApiErrorKind::Occupied);
    }

    #[test]
    fn classifies_unknown_path_as_not_found() {
        let err = SiaError::Api {
            status: StatusCode::BAD_REQUEST,
            message: "delete failed: unknown path".into(),
        };
        assert_eq!(err.kind(), ApiErrorKind::NotFound);
    }

    #[test]
    fn classifies_server_errors_as_transient() {
        let err = SiaError::Api {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "daemon is syncing".into(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn download_completion_requires_full_receipt() {
        let mut download = RenterDownload {
            siapath: "sync/a.txt/1700000000".into(),
            destination: "/tmp/stage".into(),
            filesize: 10,
            received: 4,
            starttime: None,
            error: String::new(),
        };
        assert!(!download.is_complete());
        download.received = 10;
        assert!(download.is_complete());
        download.error = "host unreachable".into();
        assert!(!download.is_complete());
    }

    #[test]
    fn empty_file_download_counts_as_complete() {
        let download = RenterDownload {
            siapath: "sync/empty.txt/1700000000".into(),
            destination: "/tmp/stage".into(),
            filesize: 0,
            received: 0,
            starttime: None,
            error: String::new(),
        };
        assert!(download.is_complete());
    }
}
