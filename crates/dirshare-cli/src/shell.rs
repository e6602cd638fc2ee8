//! 交互式浏览
//!
//! 导航状态只有当前路径。`cd` 只能进入当前列表中存在的目录，
//! 其他命令不改变状态。任何命令失败都只打印原因，循环继续。

use dirshare_core::client::{FileClient, ProgressCallback, join_remote, parent_path};
use dirshare_core::Listing;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

const HELP: &str = "\
可用命令:
  ls                列出当前目录
  cd <目录>         进入子目录 (cd .. 返回上级, cd / 返回根目录)
  download <文件>   下载当前目录中的文件
  upload <本地路径> 上传本地文件到当前目录
  pwd               显示当前路径
  help              显示帮助
  quit / exit       退出";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Cd(String),
    Download(String),
    Upload(String),
    Pwd,
    Help,
    Quit,
    /// 空行
    Empty,
    /// 命令缺少参数
    MissingArgument(&'static str),
    Unknown(String),
}

impl Command {
    /// 解析一行输入，参数为命令后的剩余部分 (可以包含空格)
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Command::Empty;
        }
        let (name, arg) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };

        let with_arg = |usage: &'static str, make: fn(String) -> Command| {
            if arg.is_empty() {
                Command::MissingArgument(usage)
            } else {
                make(arg.to_string())
            }
        };

        match name.to_lowercase().as_str() {
            "ls" | "dir" => Command::List,
            "cd" => with_arg("cd <目录>", Command::Cd),
            "download" | "get" => with_arg("download <文件>", Command::Download),
            "upload" | "put" => with_arg("upload <本地路径>", Command::Upload),
            "pwd" => Command::Pwd,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            _ => Command::Unknown(name.to_string()),
        }
    }
}

/// 导航状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigator {
    path: String,
}

impl Default for Navigator {
    fn default() -> Self {
        Self::new()
    }
}

impl Navigator {
    pub fn new() -> Self {
        Self {
            path: "/".to_string(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn up(&mut self) {
        self.path = parent_path(&self.path);
    }

    pub fn reset(&mut self) {
        self.path = "/".to_string();
    }

    /// 进入子目录，`listing` 中没有该目录时状态不变并返回 false
    pub fn enter(&mut self, name: &str, listing: &Listing) -> bool {
        let name = name.trim_end_matches('/');
        if listing.directory(name).is_none() {
            return false;
        }
        self.path = join_remote(&self.path, name);
        true
    }
}

/// 在终端打印下载进度
///
/// 已知总长度时打印百分比，否则打印已接收字节数。
#[derive(Default)]
pub struct ConsoleProgress {
    last: AtomicU64,
}

impl ProgressCallback for ConsoleProgress {
    fn on_progress(&self, transferred: u64, total: Option<u64>) {
        let (marker, line) = match total {
            Some(total) if total > 0 => {
                let percent = transferred.saturating_mul(100) / total;
                (percent, format!("{}%", percent))
            }
            _ => (transferred / (64 * 1024), format!("{} bytes", transferred)),
        };
        // 只在进度变化时刷新
        if self.last.swap(marker + 1, Ordering::Relaxed) != marker + 1 {
            eprint!("\r   📥 {}", line);
        }
    }
}

/// 交互循环，直到 quit 或输入结束
pub async fn run_shell<R, W>(client: &FileClient, input: R, output: &mut W) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut nav = Navigator::new();
    let mut lines = input.lines();

    writeln!(output, "输入 help 查看可用命令")?;
    loop {
        write!(output, "{}:{}> ", client.host(), nav.path())?;
        output.flush()?;

        let Some(line) = lines.next_line().await? else {
            writeln!(output)?;
            break;
        };

        match Command::parse(&line) {
            Command::Empty => {}
            Command::Quit => break,
            Command::Help => writeln!(output, "{}", HELP)?,
            Command::Pwd => writeln!(output, "{}", nav.path())?,
            Command::List => list(client, nav.path(), output).await?,
            Command::Cd(arg) => cd(client, &mut nav, &arg, output).await?,
            Command::Download(name) => download(client, nav.path(), &name, output).await?,
            Command::Upload(local) => upload(client, nav.path(), &local, output).await?,
            Command::MissingArgument(usage) => writeln!(output, "❌ 用法: {}", usage)?,
            Command::Unknown(name) => {
                writeln!(output, "❓ 未知命令: {} (输入 help 查看可用命令)", name)?
            }
        }
    }

    writeln!(output, "👋 再见")?;
    Ok(())
}

async fn list<W: Write>(client: &FileClient, path: &str, output: &mut W) -> io::Result<()> {
    let listing = match client.try_list_directory(path).await {
        Ok(listing) => listing,
        Err(e) => return writeln!(output, "❌ 无法列出目录: {}", e),
    };
    if listing.is_empty() {
        return writeln!(output, "   (空目录)");
    }
    for dir in &listing.directories {
        writeln!(output, "📁 {}/", dir.name)?;
    }
    for file in &listing.files {
        writeln!(output, "📄 {}", file.name)?;
    }
    Ok(())
}

async fn cd<W: Write>(
    client: &FileClient,
    nav: &mut Navigator,
    arg: &str,
    output: &mut W,
) -> io::Result<()> {
    match arg {
        ".." => nav.up(),
        "/" => nav.reset(),
        name => {
            let listing = client.list_directory(nav.path()).await;
            if !nav.enter(name, &listing) {
                writeln!(output, "❌ 目录不存在: {}", name)?;
            }
        }
    }
    Ok(())
}

async fn download<W: Write>(
    client: &FileClient,
    path: &str,
    name: &str,
    output: &mut W,
) -> io::Result<()> {
    // 优先使用列表中的路径，找不到时按名称拼接
    let listing = client.list_directory(path).await;
    let remote = match listing.file(name) {
        Some(entry) => entry.path.clone(),
        None => join_remote(path, name),
    };

    writeln!(output, "📥 下载: {}", remote)?;
    let progress = ConsoleProgress::default();
    let result = client.download_file(&remote, None, &progress).await;
    eprintln!();
    match result {
        Ok(local) => writeln!(output, "✅ 已保存到 {}", local.display()),
        Err(e) => writeln!(output, "❌ 下载失败: {}", e),
    }
}

async fn upload<W: Write>(
    client: &FileClient,
    path: &str,
    local: &str,
    output: &mut W,
) -> io::Result<()> {
    writeln!(output, "📤 上传: {} -> {}", local, path)?;
    match client.upload_file(local, path).await {
        Ok(()) => writeln!(output, "✅ 上传完成"),
        Err(e) => writeln!(output, "❌ 上传失败: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirshare_core::parse_listing;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("ls"), Command::List);
        assert_eq!(Command::parse("  LS  "), Command::List);
        assert_eq!(Command::parse("pwd"), Command::Pwd);
        assert_eq!(Command::parse("exit"), Command::Quit);
        assert_eq!(Command::parse("quit"), Command::Quit);
        assert_eq!(Command::parse(""), Command::Empty);
        assert_eq!(Command::parse("   "), Command::Empty);
    }

    #[test]
    fn test_parse_arguments_keep_spaces() {
        assert_eq!(
            Command::parse("cd my photos"),
            Command::Cd("my photos".to_string())
        );
        assert_eq!(
            Command::parse("download  report 2024.pdf "),
            Command::Download("report 2024.pdf".to_string())
        );
        assert_eq!(
            Command::parse("upload /tmp/a b.txt"),
            Command::Upload("/tmp/a b.txt".to_string())
        );
    }

    #[test]
    fn test_parse_missing_and_unknown() {
        assert!(matches!(Command::parse("cd"), Command::MissingArgument(_)));
        assert!(matches!(Command::parse("download"), Command::MissingArgument(_)));
        assert_eq!(
            Command::parse("rm -rf /"),
            Command::Unknown("rm".to_string())
        );
    }

    fn listing() -> Listing {
        parse_listing(
            r#"<ul>
            <li><a href="sub/" class="file-name directory">sub/</a></li>
            <li><a href="a.txt" class="file-name file">a.txt</a></li>
            </ul>"#,
            "/",
        )
    }

    #[test]
    fn test_navigator() {
        let mut nav = Navigator::new();
        assert_eq!(nav.path(), "/");

        // 不存在的目录和文件都不能进入
        assert!(!nav.enter("missing", &listing()));
        assert!(!nav.enter("a.txt", &listing()));
        assert_eq!(nav.path(), "/");

        assert!(nav.enter("sub", &listing()));
        assert_eq!(nav.path(), "/sub");

        nav.up();
        assert_eq!(nav.path(), "/");
        nav.up();
        assert_eq!(nav.path(), "/");

        assert!(nav.enter("sub/", &listing()));
        nav.reset();
        assert_eq!(nav.path(), "/");
    }

    // ==================== 完整会话 ====================

    async fn start_server(root: &std::path::Path) -> std::net::SocketAddr {
        let config = dirshare_core::ServerConfig::new("127.0.0.1", 0, root)
            .unwrap()
            .with_upload(true);
        let server = dirshare_core::ListingServer::bind(config).await.unwrap();
        let (addr, _handle) = server.spawn().unwrap();
        addr
    }

    #[tokio::test]
    async fn test_shell_session() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("a.txt"), b"hello").unwrap();
        std::fs::create_dir(root.path().join("sub")).unwrap();
        std::fs::write(root.path().join("sub").join("b.txt"), b"abc").unwrap();
        let addr = start_server(root.path()).await;

        let downloads = tempfile::tempdir().unwrap();
        let client = FileClient::new("127.0.0.1", addr.port(), downloads.path()).unwrap();

        let script = "ls\nbogus\ncd missing\ncd sub\npwd\ndownload b.txt\ncd ..\npwd\nquit\nls\n";
        let mut output = Vec::new();
        run_shell(&client, script.as_bytes(), &mut output).await.unwrap();
        let text = String::from_utf8(output).unwrap();

        assert!(text.contains("📁 sub/"), "{}", text);
        assert!(text.contains("📄 a.txt"), "{}", text);
        assert!(text.contains("未知命令: bogus"), "{}", text);
        assert!(text.contains("目录不存在: missing"), "{}", text);
        assert!(text.contains("127.0.0.1:/sub> "), "{}", text);
        assert!(text.contains("> /sub\n"), "{}", text);
        assert!(text.contains("✅ 已保存到"), "{}", text);
        // quit 之后的命令不再执行
        assert_eq!(text.matches("📄 a.txt").count(), 1, "{}", text);
        assert!(text.ends_with("👋 再见\n"), "{}", text);

        assert_eq!(std::fs::read(downloads.path().join("b.txt")).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_shell_ends_on_eof() {
        let root = tempfile::tempdir().unwrap();
        let addr = start_server(root.path()).await;
        let downloads = tempfile::tempdir().unwrap();
        let client = FileClient::new("127.0.0.1", addr.port(), downloads.path()).unwrap();

        let mut output = Vec::new();
        run_shell(&client, "ls\nupload /definitely/not/here.txt\n".as_bytes(), &mut output)
            .await
            .unwrap();
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("(空目录)"), "{}", text);
        assert!(text.contains("❌ 上传失败"), "{}", text);
        assert!(text.ends_with("👋 再见\n"), "{}", text);
    }
}
