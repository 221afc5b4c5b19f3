//! WebHDFS REST client.
//!
//! Uses `GETFILESTATUS`, `LISTSTATUS`, `GETFILECHECKSUM` and `OPEN` over a
//! blocking HTTP client. `OPEN` is redirected by the namenode to a datanode;
//! the client follows redirects.

use super::{stage_copy, RemoteFs};
use crate::checksums::CompositeChecksum;
use crate::error::RemoteError;
use crate::model::{RemoteEntry, RemoteEntryStat, RemotePath};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const METADATA_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Hex digits of the MD5 at the end of a serialized composite checksum.
const MD5_HEX_LEN: usize = 32;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileStatus {
    #[serde(default)]
    path_suffix: String,
    #[serde(rename = "type")]
    kind: String,
    length: u64,
    owner: String,
    group: String,
    permission: String,
    modification_time: i64,
    #[serde(default)]
    block_size: u64,
}

#[derive(Debug, Deserialize)]
struct FileStatusResponse {
    #[serde(rename = "FileStatus")]
    file_status: FileStatus,
}

#[derive(Debug, Deserialize)]
struct FileStatuses {
    #[serde(rename = "FileStatus")]
    file_status: Vec<FileStatus>,
}

#[derive(Debug, Deserialize)]
struct ListStatusResponse {
    #[serde(rename = "FileStatuses")]
    file_statuses: FileStatuses,
}

#[derive(Debug, Deserialize)]
struct FileChecksum {
    algorithm: String,
    bytes: String,
}

#[derive(Debug, Deserialize)]
struct FileChecksumResponse {
    #[serde(rename = "FileChecksum")]
    file_checksum: Option<FileChecksum>,
}

#[derive(Debug, Deserialize)]
struct RemoteException {
    exception: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct RemoteExceptionResponse {
    #[serde(rename = "RemoteException")]
    remote_exception: RemoteException,
}

impl FileStatus {
    fn to_stat(&self, path: &RemotePath) -> Result<RemoteEntryStat, RemoteError> {
        let permission = u16::from_str_radix(&self.permission, 8).map_err(|_| {
            RemoteError::Protocol {
                path: path.to_string(),
                reason: format!("bad permission {:?}", self.permission),
            }
        })?;
        Ok(RemoteEntryStat {
            size: self.length,
            owner: self.owner.clone(),
            group: self.group.clone(),
            permission,
            modification_time_ms: self.modification_time,
            block_size: self.block_size,
            is_dir: self.kind == "DIRECTORY",
        })
    }
}

/// Client for one namenode's WebHDFS endpoint.
#[derive(Debug, Clone)]
pub struct WebHdfs {
    base: Url,
    user: Option<String>,
    client: Client,
}

impl WebHdfs {
    /// `base` is the namenode HTTP address, e.g. `http://namenode:50070`.
    pub fn new(base: &str, user: Option<String>) -> Result<Self, RemoteError> {
        let base = Url::parse(base).map_err(|e| RemoteError::Protocol {
            path: base.to_string(),
            reason: format!("invalid WebHDFS URL: {}", e),
        })?;
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(None::<Duration>)
            .build()
            .map_err(|source| RemoteError::Http {
                path: base.to_string(),
                source,
            })?;
        Ok(WebHdfs { base, user, client })
    }

    fn url(&self, path: &RemotePath, op: &str) -> Url {
        let mut url = self.base.clone();
        let prefix = self.base.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{}/webhdfs/v1{}", prefix, path));
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("op", op);
            if let Some(user) = &self.user {
                query.append_pair("user.name", user);
            }
        }
        url
    }

    fn get_json<T: DeserializeOwned>(&self, path: &RemotePath, op: &str) -> Result<T, RemoteError> {
        let http = |source: reqwest::Error| RemoteError::Http {
            path: path.to_string(),
            source,
        };
        let resp = self
            .client
            .get(self.url(path, op))
            .timeout(METADATA_TIMEOUT)
            .send()
            .map_err(http)?;
        let status = resp.status();
        let text = resp.text().map_err(http)?;
        if !status.is_success() {
            return Err(exception(path, status, &text));
        }
        serde_json::from_str(&text).map_err(|e| RemoteError::Protocol {
            path: path.to_string(),
            reason: format!("{}: {}", e, text),
        })
    }
}

/// Map an error response to `NotFound` or a named remote exception.
fn exception(path: &RemotePath, status: StatusCode, body: &str) -> RemoteError {
    match serde_json::from_str::<RemoteExceptionResponse>(body) {
        Ok(resp) if resp.remote_exception.exception == "FileNotFoundException" => {
            RemoteError::NotFound {
                path: path.to_string(),
            }
        }
        Ok(resp) => RemoteError::Exception {
            path: path.to_string(),
            exception: resp.remote_exception.exception,
            message: resp.remote_exception.message,
        },
        Err(_) if status == StatusCode::NOT_FOUND => RemoteError::NotFound {
            path: path.to_string(),
        },
        Err(_) => RemoteError::Exception {
            path: path.to_string(),
            exception: status.to_string(),
            message: body.to_string(),
        },
    }
}

/// The serialized checksum ends with the 16-byte MD5; that is the payload.
fn parse_checksum(
    path: &RemotePath,
    checksum: FileChecksum,
) -> Result<CompositeChecksum, RemoteError> {
    let bytes = checksum.bytes.to_lowercase();
    if bytes.len() < MD5_HEX_LEN || !bytes.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(RemoteError::Protocol {
            path: path.to_string(),
            reason: format!("bad checksum bytes {:?}", checksum.bytes),
        });
    }
    let payload = &bytes[bytes.len() - MD5_HEX_LEN..];
    Ok(CompositeChecksum::new(checksum.algorithm, payload))
}

impl RemoteFs for WebHdfs {
    fn stat(&self, path: &RemotePath) -> Result<RemoteEntryStat, RemoteError> {
        let resp: FileStatusResponse = self.get_json(path, "GETFILESTATUS")?;
        resp.file_status.to_stat(path)
    }

    fn list(&self, path: &RemotePath) -> Result<Vec<RemoteEntry>, RemoteError> {
        let resp: ListStatusResponse = self.get_json(path, "LISTSTATUS")?;
        resp.file_statuses
            .file_status
            .iter()
            .map(|status| {
                let child = path.join(&status.path_suffix);
                Ok(RemoteEntry {
                    stat: status.to_stat(&child)?,
                    path: child,
                })
            })
            .collect()
    }

    fn checksum(&self, path: &RemotePath) -> Result<Option<CompositeChecksum>, RemoteError> {
        let resp: FileChecksumResponse = self.get_json(path, "GETFILECHECKSUM")?;
        resp.file_checksum
            .map(|c| parse_checksum(path, c))
            .transpose()
    }

    fn copy_to_local(&self, path: &RemotePath, local: &Path) -> Result<(), RemoteError> {
        let mut resp = self
            .client
            .get(self.url(path, "OPEN"))
            .send()
            .map_err(|source| RemoteError::Http {
                path: path.to_string(),
                source,
            })?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(exception(path, status, &body));
        }

        stage_copy(local, |staged| {
            resp.copy_to(staged).map(|_| ()).map_err(|source| RemoteError::Http {
                path: path.to_string(),
                source,
            })
        })
    }
}
