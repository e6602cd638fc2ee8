//! 目录列表服务器
//!
//! 将配置的根目录通过 HTTP 暴露给局域网：
//! - GET 目录：渲染列表页面
//! - GET 文件：流式返回文件内容
//! - POST 目录 (需开启上传)：接收 multipart 上传

pub mod error;
pub mod multipart;
pub mod paths;
pub mod router;
pub mod upload;

pub use error::RequestError;
pub use router::Router;
pub use upload::{DiskUploadHandler, UploadHandler, UploadRequest};

use log::{error, info, warn};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// 默认上传大小上限 (512 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 512 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Cannot serve {path:?}: {reason}")]
    InvalidRoot { path: PathBuf, reason: String },

    #[error("Failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("Server error: {0}")]
    Io(#[from] io::Error),
}

/// 服务器配置，启动时构造一次，之后只读
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 规范化后的绝对路径
    pub root: PathBuf,
    pub allow_upload: bool,
    pub max_upload_bytes: u64,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16, root: impl AsRef<Path>) -> Result<Self, ServerError> {
        let root = root.as_ref();
        let canonical = root.canonicalize().map_err(|e| ServerError::InvalidRoot {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;
        if !canonical.is_dir() {
            return Err(ServerError::InvalidRoot {
                path: root.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }

        Ok(Self {
            host: host.into(),
            port,
            root: canonical,
            allow_upload: false,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        })
    }

    pub fn with_upload(mut self, allow: bool) -> Self {
        self.allow_upload = allow;
        self
    }

    pub fn with_max_upload_bytes(mut self, limit: u64) -> Self {
        self.max_upload_bytes = limit;
        self
    }

    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// 已绑定端口、尚未开始处理请求的服务器
pub struct ListingServer {
    listener: TcpListener,
    router: Router,
}

impl ListingServer {
    /// 使用默认组件绑定
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        Self::bind_router(Router::new(config)).await
    }

    /// 使用自定义组件绑定
    pub async fn bind_router(router: Router) -> Result<Self, ServerError> {
        let config = router.config();
        let addr = config.bind_addr();
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;

        info!(
            "Listing server bound to {} (root={:?}, upload={})",
            addr, config.root, config.allow_upload
        );
        Ok(Self { listener, router })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn config(&self) -> &ServerConfig {
        self.router.config()
    }

    /// 处理请求直到 `shutdown` 完成
    pub async fn serve<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router.into_service();
        axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("Listing server stopped");
        Ok(())
    }

    /// 在后台任务中运行，返回实际监听地址
    pub fn spawn(self) -> io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = self.local_addr()?;
        let handle = tokio::spawn(async move {
            if let Err(e) = self.serve(std::future::pending()).await {
                error!("Listing server error: {}", e);
            }
        });
        Ok((addr, handle))
    }
}

/// 启动时打印的访问地址
///
/// 绑定到通配地址时给出本机和局域网两个地址，否则只给出绑定地址。
pub fn access_urls(config: &ServerConfig, local_addr: SocketAddr) -> Vec<String> {
    let port = local_addr.port();
    if !local_addr.ip().is_unspecified() {
        return vec![format!("http://{}", local_addr)];
    }

    let mut urls = vec![format!("http://localhost:{}", port)];
    match crate::discovery::local_ipv4() {
        Ok(ip) => urls.push(format!("http://{}:{}", ip, port)),
        Err(e) => warn!("Could not determine LAN address for {}: {}", config.host, e),
    }
    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_rejects_missing_root() {
        let err = ServerConfig::new("127.0.0.1", 0, "/definitely/not/here").unwrap_err();
        assert!(matches!(err, ServerError::InvalidRoot { .. }));
    }

    #[test]
    fn test_config_rejects_file_root() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = ServerConfig::new("127.0.0.1", 0, file.path()).unwrap_err();
        assert!(matches!(err, ServerError::InvalidRoot { .. }));
    }

    #[test]
    fn test_config_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::new("0.0.0.0", 8000, dir.path()).unwrap();
        assert!(!config.allow_upload);
        assert!(config.root.is_absolute());
        assert_eq!(config.bind_addr(), "0.0.0.0:8000");
        assert_eq!(config.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);

        let v6 = ServerConfig::new("::1", 80, dir.path()).unwrap();
        assert_eq!(v6.bind_addr(), "[::1]:80");
    }

    #[test]
    fn test_access_urls_for_specific_host() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::new("127.0.0.1", 0, dir.path()).unwrap();
        let urls = access_urls(&config, "127.0.0.1:8123".parse().unwrap());
        assert_eq!(urls, vec!["http://127.0.0.1:8123".to_string()]);
    }
}
