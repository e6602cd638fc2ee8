//! 协议客户端
//!
//! 把服务器渲染的列表页面当作 API 使用：
//! - 列目录：GET 页面后交给 [`parse_listing`] 解析
//! - 下载：流式读取，先写入 `.part` 文件，完成并校验长度后再重命名
//! - 上传：multipart POST，单个 `file` 字段
//!
//! 所有操作都是一次有超时的请求往返。

use crate::listing::render::encode_path;
use crate::listing::{Listing, PATH_SEPARATOR, parse_listing};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use reqwest::StatusCode;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// 默认请求超时
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// 远程路径最后一段为空时使用的本地文件名
pub const FALLBACK_FILE_NAME: &str = "downloaded_file";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Cannot reach {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("Server at {url} is not responding (timeout)")]
    Timeout { url: String },

    #[error("Server returned {status} for {url}")]
    Status { url: String, status: StatusCode },

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Incomplete download: received {received} of {expected} bytes")]
    Incomplete { received: u64, expected: u64 },

    #[error("Local file not found: {0:?}")]
    LocalFileMissing(PathBuf),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("File error: {0}")]
    Io(#[from] io::Error),
}

impl ClientError {
    fn from_reqwest(err: reqwest::Error, url: &str) -> Self {
        if err.is_timeout() {
            ClientError::Timeout {
                url: url.to_string(),
            }
        } else if err.is_connect() {
            ClientError::Unreachable {
                url: url.to_string(),
                reason: root_cause(&err),
            }
        } else if let Some(status) = err.status() {
            ClientError::Status {
                url: url.to_string(),
                status,
            }
        } else {
            ClientError::Transfer(root_cause(&err))
        }
    }

    /// 传输层错误 (连接失败或超时)
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::Unreachable { .. } | ClientError::Timeout { .. }
        )
    }
}

fn root_cause(err: &(dyn std::error::Error + 'static)) -> String {
    let mut source = err;
    while let Some(next) = source.source() {
        source = next;
    }
    source.to_string()
}

/// 下载进度回调
pub trait ProgressCallback: Send + Sync {
    /// `total` 在服务器提供 Content-Length 时为 `Some`
    fn on_progress(&self, transferred: u64, total: Option<u64>);
}

/// 不汇报进度
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_progress(&self, _transferred: u64, _total: Option<u64>) {}
}

/// 文件服务器客户端
pub struct FileClient {
    host: String,
    port: u16,
    base_url: String,
    download_dir: PathBuf,
    http: reqwest::Client,
}

impl FileClient {
    pub fn new(host: &str, port: u16, download_dir: impl Into<PathBuf>) -> Result<Self, ClientError> {
        Self::with_timeout(host, port, download_dir, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        host: &str,
        port: u16,
        download_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let download_dir = download_dir.into();
        std::fs::create_dir_all(&download_dir)?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| ClientError::Transfer(e.to_string()))?;

        let authority = if host.contains(':') && !host.starts_with('[') {
            format!("[{}]:{}", host, port)
        } else {
            format!("{}:{}", host, port)
        };

        Ok(Self {
            host: host.to_string(),
            port,
            base_url: format!("http://{}", authority),
            download_dir,
            http,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// 远程路径对应的 URL，路径按段转义
    pub fn url_for(&self, remote_path: &str) -> String {
        let path = if remote_path.starts_with(PATH_SEPARATOR) {
            remote_path.to_string()
        } else {
            format!("/{}", remote_path)
        };
        format!("{}{}", self.base_url, encode_path(&path))
    }

    /// 请求根目录，确认服务器可用
    pub async fn test_connection(&self) -> Result<(), ClientError> {
        let url = self.url_for("/");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(e, &url))?;
        check_status(response, &url)?;
        info!("Connected to {}", self.base_url);
        Ok(())
    }

    /// 列出目录，失败时返回错误
    pub async fn try_list_directory(&self, path: &str) -> Result<Listing, ClientError> {
        let url = self.url_for(&as_directory(path));
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(e, &url))?;
        let response = check_status(response, &url)?;
        let markup = response
            .text()
            .await
            .map_err(|e| ClientError::from_reqwest(e, &url))?;

        let listing = parse_listing(&markup, path);
        debug!(
            "Listed {}: {} directories, {} files",
            path,
            listing.directories.len(),
            listing.files.len()
        );
        Ok(listing)
    }

    /// 列出目录，任何失败都记录日志并返回空列表
    pub async fn list_directory(&self, path: &str) -> Listing {
        match self.try_list_directory(path).await {
            Ok(listing) => listing,
            Err(e) => {
                error!("Error listing directory {}: {}", path, e);
                Listing::default()
            }
        }
    }

    /// 下载文件到下载目录
    ///
    /// 成功时返回本地路径。失败时不会留下部分文件。
    pub async fn download_file<C: ProgressCallback + ?Sized>(
        &self,
        remote_path: &str,
        local_name: Option<&str>,
        progress: &C,
    ) -> Result<PathBuf, ClientError> {
        let name = match local_name {
            Some(n) => n.to_string(),
            None => default_local_name(remote_path),
        };
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(ClientError::InvalidPath(name));
        }

        let local_path = self.download_dir.join(&name);
        let part_path = self.download_dir.join(format!("{}.part", name));
        let url = self.url_for(remote_path);
        info!("Downloading {} -> {:?}", url, local_path);

        let result = match self.stream_to(&url, &part_path, progress).await {
            Ok(received) => fs::rename(&part_path, &local_path)
                .await
                .map(|()| received)
                .map_err(ClientError::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(received) => {
                info!("Download completed: {:?} ({} bytes)", local_path, received);
                Ok(local_path)
            }
            Err(e) => {
                if let Err(rm) = fs::remove_file(&part_path).await
                    && rm.kind() != io::ErrorKind::NotFound
                {
                    warn!("Failed to remove partial file {:?}: {}", part_path, rm);
                }
                Err(e)
            }
        }
    }

    async fn stream_to<C: ProgressCallback + ?Sized>(
        &self,
        url: &str,
        part_path: &Path,
        progress: &C,
    ) -> Result<u64, ClientError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(e, url))?;
        let response = check_status(response, url)?;
        let total = response.content_length();

        let mut file = fs::File::create(part_path).await?;
        let mut received: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ClientError::from_reqwest(e, url))?;
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
            progress.on_progress(received, total);
        }
        file.flush().await?;

        if let Some(expected) = total
            && received != expected
        {
            return Err(ClientError::Incomplete { received, expected });
        }
        Ok(received)
    }

    /// 上传本地文件到远程目录
    pub async fn upload_file(
        &self,
        local_path: impl AsRef<Path>,
        remote_dir: &str,
    ) -> Result<(), ClientError> {
        let local_path = local_path.as_ref();
        let meta = match fs::metadata(local_path).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(ClientError::LocalFileMissing(local_path.to_path_buf())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ClientError::LocalFileMissing(local_path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| ClientError::InvalidPath(local_path.display().to_string()))?;

        let data = fs::read(local_path).await?;
        let url = self.url_for(&as_directory(remote_dir));
        info!(
            "Uploading {:?} ({} bytes) to {}",
            local_path,
            meta.len(),
            url
        );

        let part = reqwest::multipart::Part::bytes(data)
            .file_name(file_name)
            .mime_str("application/octet-stream")
            .map_err(|e| ClientError::Transfer(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(e, &url))?;
        check_status(response, &url)?;
        info!("Upload completed");
        Ok(())
    }
}

fn check_status(response: reqwest::Response, url: &str) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        return Err(ClientError::Status {
            url: url.to_string(),
            status,
        });
    }
    Ok(response)
}

/// 保证目录路径以 `/` 结尾
fn as_directory(path: &str) -> String {
    if path.ends_with(PATH_SEPARATOR) {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

/// 远程路径最后一段作为默认文件名
pub fn default_local_name(remote_path: &str) -> String {
    match remote_path.rsplit(PATH_SEPARATOR).next() {
        Some(last) if !last.is_empty() && last != "." && last != ".." => last.to_string(),
        _ => FALLBACK_FILE_NAME.to_string(),
    }
}

/// 拼接远程目录和条目名称
pub fn join_remote(dir: &str, name: &str) -> String {
    let name = name.trim_start_matches(PATH_SEPARATOR);
    if dir.is_empty() || dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir.trim_end_matches(PATH_SEPARATOR), name)
    }
}

/// 上一级目录，根目录保持不变
pub fn parent_path(path: &str) -> String {
    let trimmed = path.trim_end_matches(PATH_SEPARATOR);
    match trimmed.rfind(PATH_SEPARATOR) {
        Some(0) | None => "/".to_string(),
        Some(idx) => trimmed[..idx].to_string(),
    }
}
