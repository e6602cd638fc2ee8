//! 文件上传处理
//!
//! 同名文件会被直接覆盖，不做冲突检测。

use super::error::RequestError;
use super::multipart::{first_file_part, parse_multipart};
use super::paths::sanitize_filename;
use async_trait::async_trait;
use axum::body::Bytes;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// 单次 POST 上传的输入，请求结束后即丢弃
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// 原始 multipart body
    pub body: Bytes,
    /// 从 Content-Type 中提取的 boundary
    pub boundary: String,
    /// 已解析并确认位于根目录内的目标目录
    pub target_dir: PathBuf,
}

/// 上传能力
#[async_trait]
pub trait UploadHandler: Send + Sync {
    /// 保存请求中的文件，返回最终写入的路径
    async fn handle(&self, request: UploadRequest) -> Result<PathBuf, RequestError>;
}

/// 默认实现：写入本地磁盘
///
/// 先写入同目录下的隐藏临时文件，成功后再重命名为最终文件名，
/// 失败时删除临时文件，不会留下半写入的目标文件。
#[derive(Debug, Default)]
pub struct DiskUploadHandler {
    counter: AtomicU64,
}

impl DiskUploadHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 临时文件名长度固定，不受上传文件名长度影响
    fn temp_path(&self, dir: &Path) -> PathBuf {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        dir.join(format!(".dirshare-{}-{}.upload", std::process::id(), n))
    }
}

#[async_trait]
impl UploadHandler for DiskUploadHandler {
    async fn handle(&self, request: UploadRequest) -> Result<PathBuf, RequestError> {
        let parts = parse_multipart(&request.body, &request.boundary)?;
        let part = first_file_part(&parts)?;
        let raw_name = part.filename.as_deref().unwrap_or_default();
        let filename = sanitize_filename(raw_name)?;
        if filename != raw_name {
            warn!(
                "Stripped directory components from upload name: {:?} -> {:?}",
                raw_name, filename
            );
        }

        let final_path = request.target_dir.join(&filename);
        if fs::metadata(&final_path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(RequestError::BadUpload(format!(
                "A directory named {} already exists",
                filename
            )));
        }

        let temp = self.temp_path(&request.target_dir);
        debug!("Writing {} bytes to {:?}", part.data.len(), temp);

        if let Err(e) = write_file(&temp, part.data).await {
            let _ = fs::remove_file(&temp).await;
            return Err(io_error(e));
        }
        if let Err(e) = fs::rename(&temp, &final_path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(io_error(e));
        }

        info!(
            "Stored upload {:?} ({} bytes)",
            final_path,
            part.data.len()
        );
        Ok(final_path)
    }
}

async fn write_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}

fn io_error(e: std::io::Error) -> RequestError {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        RequestError::Forbidden(format!("Cannot write to target directory: {}", e))
    } else {
        RequestError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARY: &str = "xyz";

    fn upload_body(filename: &str, data: &[u8]) -> Bytes {
        let mut body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            b = BOUNDARY,
            f = filename
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
        Bytes::from(body)
    }

    fn request(dir: &Path, filename: &str, data: &[u8]) -> UploadRequest {
        UploadRequest {
            body: upload_body(filename, data),
            boundary: BOUNDARY.to_string(),
            target_dir: dir.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn test_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let handler = DiskUploadHandler::new();
        let path = handler
            .handle(request(dir.path(), "a.txt", b"hello"))
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("a.txt"));
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_strips_directories_from_name() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();

        let path = DiskUploadHandler::new()
            .handle(request(&sub, "../../evil.txt", b"evil"))
            .await
            .unwrap();
        assert_eq!(path, sub.join("evil.txt"));
        assert!(!dir.path().join("evil.txt").exists());
    }

    #[tokio::test]
    async fn test_overwrites_existing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"old content").unwrap();
        DiskUploadHandler::new()
            .handle(request(dir.path(), "a.txt", b"new"))
            .await
            .unwrap();
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_no_temp_files_left() {
        let dir = tempfile::tempdir().unwrap();
        DiskUploadHandler::new()
            .handle(request(dir.path(), "a.txt", b"x"))
            .await
            .unwrap();
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("a.txt")]);
    }

    #[tokio::test]
    async fn test_long_filename() {
        let dir = tempfile::tempdir().unwrap();
        let name = format!("{}.txt", "a".repeat(240));
        let path = DiskUploadHandler::new()
            .handle(request(dir.path(), &name, b"long"))
            .await
            .unwrap();
        assert_eq!(path, dir.path().join(&name));
        assert_eq!(std::fs::read(&path).unwrap(), b"long");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_rejects_malformed_body() {
        let dir = tempfile::tempdir().unwrap();
        let err = DiskUploadHandler::new()
            .handle(UploadRequest {
                body: Bytes::from_static(b"garbage"),
                boundary: BOUNDARY.to_string(),
                target_dir: dir.path().to_path_buf(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::BadUpload(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_rejects_directory_name_clash() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("taken")).unwrap();
        let err = DiskUploadHandler::new()
            .handle(request(dir.path(), "taken", b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::BadUpload(_)));
    }
}
