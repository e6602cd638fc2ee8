//! Dirshare Core Library
//!
//! 局域网目录共享：HTTP 目录列表服务器、基于列表页面的客户端和子网发现
//!
//! # 模块
//!
//! - **listing**: 列表页面的渲染和解析，服务器和客户端共用的页面约定
//! - **server**: 目录列表服务器，支持可选的 multipart 上传
//! - **client**: 列目录、下载、上传
//! - **discovery**: 扫描本地子网中的列表服务器
//! - **config**: 持久化设置
//!
//! # 使用示例
//!
//! ## 启动服务器
//!
//! ```ignore
//! use dirshare_core::{ListingServer, ServerConfig};
//!
//! let config = ServerConfig::new("0.0.0.0", 8000, "./shared")?.with_upload(true);
//! let server = ListingServer::bind(config).await?;
//! server.serve(async { tokio::signal::ctrl_c().await.ok(); }).await?;
//! ```
//!
//! ## 浏览和下载
//!
//! ```ignore
//! use dirshare_core::{FileClient, NoProgress};
//!
//! let client = FileClient::new("192.168.1.10", 8000, "downloads")?;
//! let listing = client.list_directory("/").await;
//! for file in &listing.files {
//!     client.download_file(&file.path, None, &NoProgress).await?;
//! }
//! ```

pub mod client;
pub mod config;
pub mod discovery;
pub mod listing;
pub mod server;

// Listing re-exports
pub use listing::{
    DirectoryEntry, DirectoryRenderer, EntryKind, HtmlRenderer, LISTING_SIGNATURE, Listing,
    parse_listing,
};

// Server re-exports
pub use server::{
    DiskUploadHandler, ListingServer, RequestError, Router, ServerConfig, ServerError,
    UploadHandler, access_urls,
};

// Client re-exports
pub use client::{ClientError, FileClient, NoProgress, ProgressCallback};

// Discovery re-exports
pub use discovery::{DiscoveryOptions, DiscoveryResult, ScanCallback, Scanner};

pub use config::Settings;
