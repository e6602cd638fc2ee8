//! 请求分发
//!
//! `Router` 组合注入的 [`DirectoryRenderer`] 和 [`UploadHandler`]，
//! 按方法分发：GET/HEAD 返回文件或目录页面，POST 处理上传。

use super::ServerConfig;
use super::error::RequestError;
use super::multipart::boundary_from_content_type;
use super::paths::resolve_request_path;
use super::upload::{DiskUploadHandler, UploadHandler, UploadRequest};
use crate::listing::{DirectoryRenderer, EntryClass, HtmlRenderer, RenderContext};
use crate::listing::render::RenderEntry;
use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use log::{debug, info};
use percent_encoding::percent_decode_str;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;

pub struct Router {
    config: Arc<ServerConfig>,
    renderer: Arc<dyn DirectoryRenderer>,
    uploads: Arc<dyn UploadHandler>,
    hostname: String,
}

impl Router {
    /// 使用默认的 HTML 渲染器和磁盘上传处理器
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            renderer: Arc::new(HtmlRenderer),
            uploads: Arc::new(DiskUploadHandler::new()),
            hostname: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
        }
    }

    pub fn with_renderer(mut self, renderer: impl DirectoryRenderer + 'static) -> Self {
        self.renderer = Arc::new(renderer);
        self
    }

    pub fn with_upload_handler(mut self, uploads: impl UploadHandler + 'static) -> Self {
        self.uploads = Arc::new(uploads);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// 构建 axum 服务，所有路径都进入同一个分发函数
    pub fn into_service(self) -> axum::Router {
        axum::Router::new()
            .fallback(dispatch)
            .with_state(Arc::new(self))
    }

    pub async fn handle(&self, request: Request) -> Response {
        let method = request.method().clone();
        let path = request.uri().path().to_string();
        debug!("{} {}", method, path);

        let result = match method {
            Method::GET | Method::HEAD => self.get(&path).await,
            Method::POST => self.post(&path, request).await,
            other => Err(RequestError::MethodNotAllowed(other.to_string())),
        };
        result.unwrap_or_else(IntoResponse::into_response)
    }

    async fn get(&self, path: &str) -> Result<Response, RequestError> {
        let fs_path = resolve_request_path(&self.config.root, path)?;
        let meta = fs::metadata(&fs_path).await.map_err(|e| io_to_request(e, path))?;

        if !meta.is_dir() {
            return serve_file(&fs_path, meta.len(), path).await;
        }

        // 目录必须以 / 结尾，页面中的相对链接才能正确解析
        if !path.ends_with('/') {
            return Ok((
                StatusCode::MOVED_PERMANENTLY,
                // 合并开头的多个 /，避免 `//host` 形式的跨站跳转
                [(
                    header::LOCATION,
                    format!("/{}/", path.trim_start_matches('/')),
                )],
            )
                .into_response());
        }

        let entries = read_entries(&fs_path).await.map_err(|e| match e.kind() {
            io::ErrorKind::PermissionDenied => {
                RequestError::Forbidden("No permission to list directory".to_string())
            }
            _ => io_to_request(e, path),
        })?;

        let url_path = percent_decode_str(path).decode_utf8_lossy();
        let page = self.renderer.render(&RenderContext {
            url_path: &url_path,
            hostname: &self.hostname,
            allow_upload: self.config.allow_upload,
            entries: &entries,
        });

        Ok((
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            page,
        )
            .into_response())
    }

    async fn post(&self, path: &str, request: Request) -> Result<Response, RequestError> {
        if !self.config.allow_upload {
            return Err(RequestError::UploadDisabled);
        }

        let content_type = request
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let boundary = boundary_from_content_type(content_type)?;

        let target_dir = resolve_request_path(&self.config.root, path)?;
        if !fs::metadata(&target_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(RequestError::NotFound(format!(
                "Upload target is not a directory: {}",
                path
            )));
        }

        let limit = self.config.max_upload_bytes;
        if content_length(request.headers()).is_some_and(|len| len > limit) {
            return Err(RequestError::PayloadTooLarge(limit));
        }
        let body = read_body(request.into_body(), limit).await?;

        let stored = self
            .uploads
            .handle(UploadRequest {
                body,
                boundary,
                target_dir,
            })
            .await?;
        info!("Upload to {} stored at {:?}", path, stored);

        Ok((StatusCode::FOUND, [(header::LOCATION, path.to_string())]).into_response())
    }
}

async fn dispatch(State(router): State<Arc<Router>>, request: Request) -> Response {
    router.handle(request).await
}

/// 读取并分类子条目，按名称不区分大小写排序
async fn read_entries(dir: &Path) -> io::Result<Vec<RenderEntry>> {
    let mut reader = fs::read_dir(dir).await?;
    let mut entries = Vec::new();

    while let Some(entry) = reader.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        let path = entry.path();
        let is_link = fs::symlink_metadata(&path)
            .await
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);

        // 跟随符号链接后是目录的仍按目录处理
        let (class, size) = match fs::metadata(&path).await {
            Ok(m) if m.is_dir() => (EntryClass::Directory, None),
            _ if is_link => (EntryClass::Symlink, None),
            Ok(m) => (EntryClass::File, Some(m.len())),
            Err(_) => (EntryClass::File, None),
        };
        entries.push(RenderEntry { name, class, size });
    }

    entries.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(entries)
}

async fn serve_file(fs_path: &Path, len: u64, url_path: &str) -> Result<Response, RequestError> {
    let file = fs::File::open(fs_path)
        .await
        .map_err(|e| io_to_request(e, url_path))?;
    let mime = mime_guess::from_path(fs_path).first_or_octet_stream();

    debug!("Streaming {:?} ({} bytes, {})", fs_path, len, mime);
    let stream = tokio_util::io::ReaderStream::new(file);
    Ok((
        [
            (header::CONTENT_TYPE, mime.to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

/// 读取完整 body，超过 `limit` 时返回 413
///
/// 分块传输没有 Content-Length，只能边读边计数。
async fn read_body(body: Body, limit: u64) -> Result<Bytes, RequestError> {
    let mut stream = body.into_data_stream();
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk
            .map_err(|e| RequestError::BadUpload(format!("Failed to read request body: {}", e)))?;
        if (buf.len() + chunk.len()) as u64 > limit {
            return Err(RequestError::PayloadTooLarge(limit));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buf))
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn io_to_request(e: io::Error, path: &str) -> RequestError {
    match e.kind() {
        io::ErrorKind::NotFound => RequestError::NotFound(path.to_string()),
        io::ErrorKind::PermissionDenied => {
            RequestError::Forbidden(format!("No permission to access {}", path))
        }
        _ => RequestError::Internal(e.to_string()),
    }
}
