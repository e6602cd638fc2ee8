//! Dirshare Server
//!
//! 在局域网内共享一个目录：浏览器或 `dirshare` 客户端都可以浏览和下载，
//! 开启 `--upload` 后还可以上传文件。

use anyhow::{Context, Result};
use clap::Parser;
use dirshare_core::config::Settings;
use dirshare_core::{ListingServer, ServerConfig, access_urls};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dirshare-server", version, about = "局域网目录共享服务器")]
struct Cli {
    /// 绑定地址 (默认: 0.0.0.0)
    #[arg(long)]
    host: Option<String>,

    /// 监听端口 (默认: 8000)
    #[arg(short, long)]
    port: Option<u16>,

    /// 共享目录 (默认: 当前目录)
    #[arg(short, long)]
    directory: Option<PathBuf>,

    /// 允许上传文件
    #[arg(short, long)]
    upload: bool,

    /// 单次上传大小上限 (MiB)
    #[arg(long)]
    max_upload_mib: Option<u64>,

    /// 将本次参数保存为默认设置
    #[arg(long)]
    save_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 桥接 log crate（dirshare-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,dirshare_core=debug")),
        )
        .try_init();

    let cli = Cli::parse();
    let mut settings = Settings::load();

    // 命令行参数优先
    if let Some(host) = cli.host {
        settings.server.host = host;
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(dir) = cli.directory {
        settings.server.directory = dir;
    }
    if cli.upload {
        settings.server.allow_upload = true;
    }
    if let Some(mib) = cli.max_upload_mib {
        settings.server.max_upload_bytes = mib.saturating_mul(1024 * 1024);
    }
    if cli.save_config {
        settings.save().context("Failed to save settings")?;
        println!("💾 设置已保存到 {}", Settings::config_path().display());
    }

    let server_settings = &settings.server;
    let config = ServerConfig::new(
        server_settings.host.clone(),
        server_settings.port,
        &server_settings.directory,
    )?
    .with_upload(server_settings.allow_upload)
    .with_max_upload_bytes(server_settings.max_upload_bytes);

    let server = ListingServer::bind(config).await?;
    let local_addr = server.local_addr()?;
    print_banner(server.config(), local_addr);

    server
        .serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            println!("\n⏹️  正在停止服务器...");
        })
        .await?;

    println!("👋 服务器已停止");
    Ok(())
}

fn print_banner(config: &ServerConfig, local_addr: std::net::SocketAddr) {
    println!("📂 共享目录: {}", config.root.display());
    println!("🌐 访问地址:");
    for url in access_urls(config, local_addr) {
        println!("   {}", url);
    }
    if config.allow_upload {
        println!("📤 上传: 已开启");
    } else {
        println!("📤 上传: 已关闭 (使用 --upload 开启)");
    }
    println!("⚠️  仅供受信任的局域网使用，没有任何身份验证");
    println!("   按 Ctrl+C 停止");
}
