//! 请求路径到文件系统路径的映射
//!
//! 所有解析结果都必须留在服务根目录内。

use crate::listing::PATH_SEPARATOR;
use percent_encoding::percent_decode_str;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("Path escapes the served root: {0}")]
    Traversal(String),

    #[error("Path contains a null byte")]
    NullByte,

    #[error("Path is not valid UTF-8")]
    InvalidEncoding,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FilenameError {
    #[error("Filename is empty")]
    Empty,

    #[error("Filename contains a null byte")]
    NullByte,
}

/// 将 URL 路径解析为根目录下的文件系统路径
///
/// - 先做百分号解码，再逐段检查
/// - 任何 `..` 段都直接拒绝，而不是尝试归一化
/// - 解析出的真实路径 (跟随符号链接后) 必须仍在根目录内
///
/// `root` 应为已经规范化的绝对路径。目标不存在时返回 [`PathError::NotFound`]。
pub fn resolve_request_path(root: &Path, url_path: &str) -> Result<PathBuf, PathError> {
    let decoded = percent_decode_str(url_path)
        .decode_utf8()
        .map_err(|_| PathError::InvalidEncoding)?;

    if decoded.contains('\0') {
        return Err(PathError::NullByte);
    }

    let mut resolved = root.to_path_buf();
    for segment in decoded.split(PATH_SEPARATOR) {
        match segment {
            "" | "." => continue,
            ".." => return Err(PathError::Traversal(decoded.to_string())),
            // 反斜杠在 Windows 上是分隔符，一律视为越界尝试
            s if s.contains('\\') => return Err(PathError::Traversal(decoded.to_string())),
            s => resolved.push(s),
        }
    }

    let canonical = match resolved.canonicalize() {
        Ok(p) => p,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(PathError::NotFound(decoded.to_string()));
        }
        Err(e) => return Err(PathError::Io(e)),
    };
    if !canonical.starts_with(root) {
        return Err(PathError::Traversal(decoded.to_string()));
    }

    Ok(canonical)
}

/// 去掉上传文件名中的目录部分
///
/// `../../evil.txt` 和 `C:\tmp\evil.txt` 都会变成 `evil.txt`。
pub fn sanitize_filename(raw: &str) -> Result<String, FilenameError> {
    if raw.contains('\0') {
        return Err(FilenameError::NullByte);
    }

    let name = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    match name {
        "" | "." | ".." => Err(FilenameError::Empty),
        n => Ok(n.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::write(root.join("a.txt"), b"hello").unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub").join("b c.txt"), b"abc").unwrap();
        (dir, root)
    }

    #[test]
    fn test_resolve_root() {
        let (_dir, root) = fixture();
        assert_eq!(resolve_request_path(&root, "/").unwrap(), root);
        assert_eq!(resolve_request_path(&root, "").unwrap(), root);
    }

    #[test]
    fn test_resolve_nested_encoded() {
        let (_dir, root) = fixture();
        let path = resolve_request_path(&root, "/sub/b%20c.txt").unwrap();
        assert_eq!(path, root.join("sub").join("b c.txt"));
    }

    #[test]
    fn test_rejects_parent_segments() {
        let (_dir, root) = fixture();
        for attempt in [
            "/../etc/passwd",
            "/sub/../../etc/passwd",
            "/%2e%2e/etc/passwd",
            "/sub/%2E%2E/%2E%2E/x",
            "/sub/..",
            "/..%2fetc",
        ] {
            assert!(
                matches!(
                    resolve_request_path(&root, attempt),
                    Err(PathError::Traversal(_))
                ),
                "{} should be rejected",
                attempt
            );
        }
    }

    #[test]
    fn test_rejects_backslash_and_null() {
        let (_dir, root) = fixture();
        assert!(matches!(
            resolve_request_path(&root, "/..%5c..%5cx"),
            Err(PathError::Traversal(_))
        ));
        assert!(matches!(
            resolve_request_path(&root, "/a%00.txt"),
            Err(PathError::NullByte)
        ));
    }

    #[test]
    fn test_missing_is_not_found() {
        let (_dir, root) = fixture();
        assert!(matches!(
            resolve_request_path(&root, "/missing.txt"),
            Err(PathError::NotFound(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_symlink_escape() {
        let (_dir, root) = fixture();
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("secret.txt"), b"secret").unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("escape")).unwrap();

        assert!(matches!(
            resolve_request_path(&root, "/escape/secret.txt"),
            Err(PathError::Traversal(_))
        ));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("../../evil.txt").unwrap(), "evil.txt");
        assert_eq!(sanitize_filename("C:\\tmp\\evil.txt").unwrap(), "evil.txt");
        assert_eq!(sanitize_filename("/etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_filename("plain.txt").unwrap(), "plain.txt");
        assert_eq!(sanitize_filename("dir/"), Err(FilenameError::Empty));
        assert_eq!(sanitize_filename(".."), Err(FilenameError::Empty));
        assert_eq!(sanitize_filename("a\0b"), Err(FilenameError::NullByte));
    }
}
