//! 目录页面渲染

use super::{EntryClass, LISTING_LINK_CLASS, LISTING_SIGNATURE, PATH_SEPARATOR, SYMLINK_MARKER};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::fmt::Write;

/// 路径段编码集合：只保留 unreserved 字符
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// 对单个路径段做 URL 转义
pub fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT).to_string()
}

/// 对完整路径逐段转义，保留分隔符
pub fn encode_path(path: &str) -> String {
    path.split(PATH_SEPARATOR)
        .map(encode_segment)
        .collect::<Vec<_>>()
        .join("/")
}

/// 渲染用的单个条目
#[derive(Debug, Clone)]
pub struct RenderEntry {
    pub name: String,
    pub class: EntryClass,
    /// 文件大小，目录和符号链接为 `None`
    pub size: Option<u64>,
}

/// 渲染一个目录页面所需的全部输入
#[derive(Debug, Clone)]
pub struct RenderContext<'a> {
    /// 已解码的请求路径 (以 `/` 开头)
    pub url_path: &'a str,
    /// 页面信息栏显示的服务器名称
    pub hostname: &'a str,
    pub allow_upload: bool,
    /// 已排序的子条目
    pub entries: &'a [RenderEntry],
}

/// 目录渲染能力
///
/// 服务器通过注入的实现生成列表页面，默认为 [`HtmlRenderer`]。
/// 任何实现都必须输出 [`LISTING_SIGNATURE`] 并遵守列表链接约定，否则客户端无法解析。
pub trait DirectoryRenderer: Send + Sync {
    fn render(&self, ctx: &RenderContext<'_>) -> String;
}

/// 默认 HTML 渲染器
#[derive(Debug, Clone, Default)]
pub struct HtmlRenderer;

const STYLE: &str = r#"
        body { font-family: Arial, sans-serif; margin: 20px; background-color: #f5f5f5; }
        .container { max-width: 1200px; margin: 0 auto; background: white; padding: 20px; border-radius: 8px; }
        .header { border-bottom: 2px solid #007bff; padding-bottom: 10px; margin-bottom: 20px; }
        .info { background: #d1ecf1; padding: 10px; border-radius: 4px; margin-bottom: 20px; }
        .upload-form { background: #e9ecef; padding: 15px; border-radius: 5px; margin-bottom: 20px; }
        .file-list { list-style: none; padding: 0; }
        .file-item { display: flex; justify-content: space-between; padding: 10px; border-bottom: 1px solid #eee; }
        .file-name { flex-grow: 1; text-decoration: none; color: #007bff; }
        .file-size { margin-left: 10px; color: #666; font-size: 0.9em; }
        .directory { font-weight: bold; }
        .back-link { background: #6c757d; color: white; padding: 8px 16px; text-decoration: none; border-radius: 4px; display: inline-block; margin-bottom: 20px; }
"#;

impl DirectoryRenderer for HtmlRenderer {
    fn render(&self, ctx: &RenderContext<'_>) -> String {
        let title = format!("{} {}", LISTING_SIGNATURE, escape_html(ctx.url_path));
        let mut page = String::with_capacity(4096);

        // write! 到 String 不会失败
        let _ = write!(
            page,
            r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{title}</title>
    <style>{STYLE}    </style>
</head>
<body>
    <div class="container">
        <div class="header"><h1>{title}</h1></div>
        <div class="info">
            <strong>Server:</strong> {host} |
            <strong>Path:</strong> {path}
        </div>
"#,
            host = escape_html(ctx.hostname),
            path = escape_html(ctx.url_path),
        );

        if ctx.allow_upload {
            page.push_str(
                r#"        <div class="upload-form">
            <h3>Upload File</h3>
            <form enctype="multipart/form-data" method="post">
                <input type="file" name="file" required>
                <input type="submit" value="Upload">
            </form>
        </div>
"#,
            );
        }

        if let Some(parent) = parent_href(ctx.url_path) {
            let _ = writeln!(
                page,
                r#"        <a href="{}" class="back-link">&larr; Parent Directory</a>"#,
                escape_html(&parent)
            );
        }

        page.push_str("        <ul class=\"file-list\">\n");
        for entry in ctx.entries {
            let (href, text, size) = match entry.class {
                EntryClass::Directory => (
                    format!("{}/", encode_segment(&entry.name)),
                    format!("{}/", entry.name),
                    "Directory".to_string(),
                ),
                EntryClass::Symlink => (
                    encode_segment(&entry.name),
                    format!("{}{}", entry.name, SYMLINK_MARKER),
                    "Symlink".to_string(),
                ),
                EntryClass::File => (
                    encode_segment(&entry.name),
                    entry.name.clone(),
                    entry
                        .size
                        .map(format_size)
                        .unwrap_or_else(|| "Unknown size".to_string()),
                ),
            };
            let _ = writeln!(
                page,
                r#"            <li class="file-item"><a href="{href}" class="{LISTING_LINK_CLASS} {class}">{text}</a><span class="file-size">{size}</span></li>"#,
                href = escape_html(&href),
                class = entry.class.css_class(),
                text = escape_html(&text),
            );
        }
        page.push_str("        </ul>\n    </div>\n</body>\n</html>\n");

        page
    }
}

/// 父目录链接，已在根目录时返回 `None`
fn parent_href(url_path: &str) -> Option<String> {
    let trimmed = url_path.trim_end_matches(PATH_SEPARATOR);
    if trimmed.is_empty() {
        return None;
    }
    let parent = match trimmed.rfind(PATH_SEPARATOR) {
        Some(idx) => &trimmed[..=idx],
        None => "/",
    };
    Some(encode_path(parent))
}

/// HTML 转义，用于所有受用户影响的文本 (路径、文件名)
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// 格式化文件大小，例如 `1.5 KB`
pub fn format_size(size: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = size as f64;
    for unit in UNITS {
        if value < 1024.0 {
            return format!("{:.1} {}", value, unit);
        }
        value /= 1024.0;
    }
    format!("{:.1} PB", value)
}
