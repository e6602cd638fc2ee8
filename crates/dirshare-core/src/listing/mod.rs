//! 目录列表协议
//!
//! 服务器渲染的 HTML 页面同时也是客户端的 API：
//! - 每个条目都是带有 `file-name` class 的 `<a>` 元素
//! - `href` 为 URL 转义后的相对路径，可见文本为显示名称
//! - 目录在 `href` 和文本上都带有结尾的 `/`
//!
//! 渲染 (`render`) 和解析 (`parse`) 必须保持一致，修改任意一侧都会破坏互操作性。

pub mod parse;
pub mod render;

pub use parse::parse_listing;
pub use render::{DirectoryRenderer, HtmlRenderer, RenderContext, escape_html, format_size};

/// 每个目录页面都包含的签名字符串，发现模块据此确认对端是本服务
pub const LISTING_SIGNATURE: &str = "Directory listing for";

/// 列表链接标记 (anchor 的 class)
pub const LISTING_LINK_CLASS: &str = "file-name";

/// 符号链接显示名称后缀
pub const SYMLINK_MARKER: char = '@';

pub const PATH_SEPARATOR: char = '/';

/// 条目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryKind {
    File,
    Directory,
}

/// 渲染时的条目分类
///
/// 符号链接只影响显示，在协议层面仍然是文件。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryClass {
    File,
    Directory,
    Symlink,
}

impl EntryClass {
    pub fn kind(&self) -> EntryKind {
        match self {
            EntryClass::Directory => EntryKind::Directory,
            EntryClass::File | EntryClass::Symlink => EntryKind::File,
        }
    }

    /// 渲染到 anchor 上的 CSS class
    pub fn css_class(&self) -> &'static str {
        match self {
            EntryClass::File => "file",
            EntryClass::Directory => "directory",
            EntryClass::Symlink => "symlink",
        }
    }
}

/// 列表中的一行
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirectoryEntry {
    /// 显示名称，不含路径分隔符
    pub name: String,
    /// 相对服务根目录的路径
    pub path: String,
    pub kind: EntryKind,
}

impl DirectoryEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// 一次列表请求的结果，按页面中出现的顺序
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub directories: Vec<DirectoryEntry>,
    pub files: Vec<DirectoryEntry>,
}

impl Listing {
    pub fn is_empty(&self) -> bool {
        self.directories.is_empty() && self.files.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.directories.iter().chain(self.files.iter())
    }

    /// 查找名为 `name` 的子目录
    pub fn directory(&self, name: &str) -> Option<&DirectoryEntry> {
        self.directories.iter().find(|d| d.name == name)
    }

    /// 查找名为 `name` 的文件
    pub fn file(&self, name: &str) -> Option<&DirectoryEntry> {
        self.files.iter().find(|f| f.name == name)
    }

    fn push(&mut self, entry: DirectoryEntry) {
        match entry.kind {
            EntryKind::Directory => self.directories.push(entry),
            EntryKind::File => self.files.push(entry),
        }
    }
}

impl FromIterator<DirectoryEntry> for Listing {
    fn from_iter<T: IntoIterator<Item = DirectoryEntry>>(iter: T) -> Self {
        let mut listing = Listing::default();
        for entry in iter {
            listing.push(entry);
        }
        listing
    }
}
