//! Dirshare CLI
//!
//! 连接目录共享服务器进行交互式浏览，或扫描局域网中的服务器

mod shell;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use dirshare_core::config::Settings;
use dirshare_core::{DiscoveryOptions, FileClient, ScanCallback, Scanner};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dirshare", version, about = "局域网目录共享客户端")]
struct Cli {
    /// 服务器地址
    server: Option<String>,

    /// 服务器端口 (默认: 8000)
    #[arg(short, long)]
    port: Option<u16>,

    /// 下载目录 (默认: downloads)
    #[arg(short, long)]
    download_dir: Option<PathBuf>,

    /// 扫描局域网中的服务器
    #[arg(short = 's', long)]
    discover: bool,

    /// 请求超时时间 (秒)
    #[arg(short, long)]
    timeout: Option<u64>,

    /// 扫描的网络前缀长度 (16-30)
    #[arg(long)]
    prefix_len: Option<u8>,
}

/// 扫描时实时打印发现的服务器
struct PrintCallback;

#[async_trait]
impl ScanCallback for PrintCallback {
    async fn on_server_found(&self, addr: SocketAddr) {
        println!("   ✅ 发现服务器: {}", addr);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_log::LogTracer::init();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .try_init();

    let cli = Cli::parse();
    let settings = Settings::load();
    let port = cli.port.unwrap_or(settings.client.port);

    if cli.discover {
        return discover(&cli, &settings, port).await;
    }

    let Some(server) = cli.server else {
        eprintln!("❌ 缺少服务器地址");
        eprintln!("   用法: dirshare <服务器地址> [--port <端口>]");
        eprintln!("   或使用 --discover 扫描局域网中的服务器");
        std::process::exit(1);
    };

    let download_dir = cli
        .download_dir
        .unwrap_or_else(|| settings.client.download_dir.clone());
    let timeout = Duration::from_secs(cli.timeout.unwrap_or(settings.client.timeout_secs));
    let client = FileClient::with_timeout(&server, port, &download_dir, timeout)?;

    println!("🔗 连接到 {} ...", client.base_url());
    if let Err(e) = client.test_connection().await {
        eprintln!("❌ 连接失败: {}", e);
        print_troubleshooting(&server, port, e.is_transport());
        std::process::exit(1);
    }
    println!("✅ 已连接 (下载目录: {})", download_dir.display());

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    shell::run_shell(&client, stdin, &mut stdout).await?;
    Ok(())
}

async fn discover(cli: &Cli, settings: &Settings, port: u16) -> Result<()> {
    let mut options = DiscoveryOptions::new(port);
    options.timeout = Duration::from_secs(cli.timeout.unwrap_or(settings.discovery.timeout_secs));
    options.prefix_len = cli.prefix_len.unwrap_or(settings.discovery.prefix_len);

    let scanner = Scanner::new(options)?;
    println!(
        "🔍 扫描局域网 (/{}, 端口 {})...",
        scanner.options().prefix_len,
        port
    );

    let result = scanner.scan(Some(Arc::new(PrintCallback))).await?;
    if result.is_empty() {
        println!("   未发现服务器");
        println!("   请确认服务器已启动，并且与本机处于同一网络");
        return Ok(());
    }

    println!("\n发现 {} 个服务器:", result.len());
    for (i, addr) in result.socket_addrs().enumerate() {
        println!("   [{}] {}", i + 1, addr);
    }
    if let Some(first) = result.addresses.iter().next() {
        println!("\n连接: dirshare {} --port {}", first, port);
    }
    Ok(())
}

fn print_troubleshooting(server: &str, port: u16, transport: bool) {
    println!("\n💡 排查建议:");
    if transport {
        println!("   1. 确认服务器已启动: dirshare-server --port {}", port);
        println!("   2. 确认地址 {} 和端口 {} 正确", server, port);
        println!("   3. 确认两台设备处于同一网络");
        println!("   4. 检查防火墙是否允许端口 {}", port);
        println!("   5. 使用 dirshare --discover 扫描局域网中的服务器");
    } else {
        println!("   服务器有响应但返回了错误，确认它是 dirshare-server 而不是其他 HTTP 服务");
    }
}
