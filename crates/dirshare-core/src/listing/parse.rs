//! 列表页面解析
//!
//! 客户端对页面结构的唯一依赖点。只识别带有 [`LISTING_LINK_CLASS`] 的链接，
//! 其余链接 (父目录、外部链接) 全部忽略。

use super::{
    DirectoryEntry, EntryKind, LISTING_LINK_CLASS, Listing, PATH_SEPARATOR, SYMLINK_MARKER,
};
use log::trace;
use percent_encoding::percent_decode_str;
use regex::Regex;
use std::sync::LazyLock;

static ANCHOR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)<a\s([^>]*)>(.*?)</a\s*>"#).unwrap());

static HREF_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
});

static CLASS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bclass\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
});

static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

/// 将列表页面解析为目录和文件两个有序序列
///
/// `current_path` 是请求该页面时的导航路径，相对链接以它为目录进行解析。
/// 返回的条目路径已解码，不带结尾的 `/`。
pub fn parse_listing(markup: &str, current_path: &str) -> Listing {
    let mut listing = Listing::default();

    for caps in ANCHOR_PATTERN.captures_iter(markup) {
        let attrs = &caps[1];
        let classes = match attr_value(&CLASS_PATTERN, attrs) {
            Some(c) => c,
            None => continue,
        };
        if !classes.split_whitespace().any(|c| c == LISTING_LINK_CLASS) {
            continue;
        }

        let href = match attr_value(&HREF_PATTERN, attrs) {
            Some(h) => unescape_html(&h),
            None => continue,
        };
        if is_external(&href) {
            trace!("Skipping external link: {}", href);
            continue;
        }

        let text = unescape_html(TAG_PATTERN.replace_all(&caps[2], "").trim());
        let (name, kind) = match text.strip_suffix(PATH_SEPARATOR) {
            Some(dir) => (dir.to_string(), EntryKind::Directory),
            None => {
                let is_symlink = classes.split_whitespace().any(|c| c == "symlink");
                let name = if is_symlink {
                    text.strip_suffix(SYMLINK_MARKER).unwrap_or(&text)
                } else {
                    &text
                };
                (name.to_string(), EntryKind::File)
            }
        };
        if name.is_empty() {
            continue;
        }

        listing.push(DirectoryEntry {
            name,
            path: resolve_href(current_path, &href),
            kind,
        });
    }

    listing
}

fn attr_value(pattern: &Regex, attrs: &str) -> Option<String> {
    let caps = pattern.captures(attrs)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
}

fn is_external(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    lower.starts_with("http:") || lower.starts_with("https:") || lower.starts_with("//")
}

/// 以 `base` 为目录解析 `href`，返回解码后的规范路径
pub fn resolve_href(base: &str, href: &str) -> String {
    let href = href.split(['?', '#']).next().unwrap_or_default();
    let joined = if href.starts_with(PATH_SEPARATOR) {
        href.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches(PATH_SEPARATOR), href)
    };

    let mut segments: Vec<String> = Vec::new();
    for raw in joined.split(PATH_SEPARATOR) {
        match raw {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            seg => segments.push(percent_decode_str(seg).decode_utf8_lossy().into_owned()),
        }
    }

    format!("/{}", segments.join("/"))
}

fn unescape_html(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::render::{DirectoryRenderer, HtmlRenderer, RenderContext, RenderEntry};
    use crate::listing::EntryClass;

    #[test]
    fn test_parse_rendered_page() {
        let entries = vec![
            RenderEntry {
                name: "sub".to_string(),
                class: EntryClass::Directory,
                size: None,
            },
            RenderEntry {
                name: "a.txt".to_string(),
                class: EntryClass::File,
                size: Some(5),
            },
        ];
        let page = HtmlRenderer.render(&RenderContext {
            url_path: "/",
            hostname: "h",
            allow_upload: true,
            entries: &entries,
        });

        let listing = parse_listing(&page, "/");
        assert_eq!(listing.directories.len(), 1);
        assert_eq!(listing.directories[0].name, "sub");
        assert_eq!(listing.directories[0].path, "/sub");
        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.files[0].name, "a.txt");
        assert_eq!(listing.files[0].path, "/a.txt");
    }

    #[test]
    fn test_ignores_links_without_marker() {
        let page = r#"
            <a href="/" class="back-link">Parent</a>
            <a href="other.txt">other.txt</a>
            <a href="x.txt" class="file-name file">x.txt</a>
        "#;
        let listing = parse_listing(page, "/");
        assert!(listing.directories.is_empty());
        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.files[0].name, "x.txt");
    }

    #[test]
    fn test_ignores_external_links() {
        let page = r#"<a href="http://evil.example/x" class="file-name file">x</a>"#;
        assert!(parse_listing(page, "/").is_empty());
    }

    #[test]
    fn test_nested_path_resolution() {
        let page = r#"
            <a href="b.txt" class="file-name file">b.txt</a>
            <a href="deep%20er/" class="file-name directory">deep er/</a>
        "#;
        let listing = parse_listing(page, "/sub");
        assert_eq!(listing.files[0].path, "/sub/b.txt");
        assert_eq!(listing.directories[0].name, "deep er");
        assert_eq!(listing.directories[0].path, "/sub/deep er");
    }

    #[test]
    fn test_symlink_marker_stripped() {
        let page = r#"<a href="ln" class="file-name symlink">ln@</a>"#;
        let listing = parse_listing(page, "/");
        assert_eq!(listing.files[0].name, "ln");
        assert_eq!(listing.files[0].kind, EntryKind::File);
    }

    #[test]
    fn test_plain_file_keeps_at_sign() {
        let page = r#"<a href="mail%40" class="file-name file">mail@</a>"#;
        let listing = parse_listing(page, "/");
        assert_eq!(listing.files[0].name, "mail@");
    }

    #[test]
    fn test_escaped_text_is_unescaped() {
        let page = r#"<a href="a%26b" class="file-name file">a&amp;b</a>"#;
        let listing = parse_listing(page, "/");
        assert_eq!(listing.files[0].name, "a&b");
        assert_eq!(listing.files[0].path, "/a&b");
    }

    #[test]
    fn test_garbage_markup_yields_empty() {
        assert!(parse_listing("not html at all <a", "/").is_empty());
        assert!(parse_listing("", "/").is_empty());
    }

    #[test]
    fn test_resolve_href() {
        assert_eq!(resolve_href("/", "a.txt"), "/a.txt");
        assert_eq!(resolve_href("/sub/", "b/"), "/sub/b");
        assert_eq!(resolve_href("/sub", "../x"), "/x");
        assert_eq!(resolve_href("/sub", "/abs/y"), "/abs/y");
        assert_eq!(resolve_href("/", "../../etc"), "/etc");
    }
}
