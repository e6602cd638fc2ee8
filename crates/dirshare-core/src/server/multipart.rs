//! multipart/form-data 解析
//!
//! 纯函数实现，不依赖服务器。状态机：
//!
//! ```text
//! Preamble --(--boundary)--> Headers --(空行)--> Body --(--boundary)--> Headers
//!                                                  \--(--boundary--)--> Done
//! ```
//!
//! 每个 part 的数据是头部空行之后到下一个分隔符之前的字节，
//! 末尾的一个换行 (`\r\n` 或 `\n`) 属于分隔符，会被去掉。

use percent_encoding::percent_decode_str;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MultipartError {
    #[error("Content type is not multipart/form-data")]
    NotMultipart,

    #[error("No boundary parameter in content type")]
    MissingBoundary,

    #[error("Boundary not found in body")]
    BoundaryNotFound,

    #[error("Malformed part headers")]
    MalformedHeaders,

    #[error("Body ended before the closing boundary")]
    Unterminated,

    #[error("No file part in request")]
    NoFilePart,
}

/// 一个 multipart 段，数据直接引用原始 body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part<'a> {
    /// 头部键值对，键已转换为小写
    pub headers: Vec<(String, String)>,
    /// Content-Disposition 中的 `name`
    pub name: Option<String>,
    /// Content-Disposition 中的 `filename` (原样，未做安全处理)
    pub filename: Option<String>,
    pub data: &'a [u8],
}

impl Part<'_> {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_file(&self) -> bool {
        self.filename.is_some()
    }
}

/// 从 Content-Type 中提取 boundary
pub fn boundary_from_content_type(content_type: &str) -> Result<String, MultipartError> {
    let mut params = split_params(content_type).into_iter();
    let media_type = params.next().unwrap_or_default();
    if !media_type.trim().eq_ignore_ascii_case("multipart/form-data") {
        return Err(MultipartError::NotMultipart);
    }

    params
        .filter_map(|p| {
            let (key, value) = p.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("boundary")
                .then(|| unquote(value.trim()).to_string())
        })
        .find(|b| !b.is_empty() && b.len() <= 200)
        .ok_or(MultipartError::MissingBoundary)
}

enum State {
    Preamble,
    Headers,
    Body(Vec<(String, String)>),
    Done,
}

/// 按 boundary 将 body 拆分为段
pub fn parse_multipart<'a>(body: &'a [u8], boundary: &str) -> Result<Vec<Part<'a>>, MultipartError> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let mut parts = Vec::new();
    let mut pos = 0;
    let mut state = State::Preamble;

    loop {
        state = match state {
            State::Preamble => {
                let start =
                    find(body, &delimiter, 0).ok_or(MultipartError::BoundaryNotFound)?;
                pos = start + delimiter.len();
                after_delimiter(body, &mut pos)
            }
            State::Headers => {
                let (end, next) = find_header_end(body, pos).ok_or(MultipartError::MalformedHeaders)?;
                let headers = parse_headers(&body[pos..end])?;
                pos = next;
                State::Body(headers)
            }
            State::Body(headers) => {
                let end = find(body, &delimiter, pos).ok_or(MultipartError::Unterminated)?;
                let data = strip_line_end(&body[pos..end]);
                parts.push(build_part(headers, data));
                pos = end + delimiter.len();
                after_delimiter(body, &mut pos)
            }
            State::Done => break,
        };
    }

    Ok(parts)
}

/// 第一个带文件名的段
pub fn first_file_part<'p, 'a>(parts: &'p [Part<'a>]) -> Result<&'p Part<'a>, MultipartError> {
    parts
        .iter()
        .find(|p| p.is_file())
        .ok_or(MultipartError::NoFilePart)
}

/// 分隔符之后：`--` 表示结束，否则跳过换行进入下一段头部
fn after_delimiter(body: &[u8], pos: &mut usize) -> State {
    let rest = &body[*pos..];
    if rest.starts_with(b"--") {
        return State::Done;
    }
    // 分隔符行可能带有空白填充
    let trimmed = rest
        .iter()
        .take_while(|b| **b == b' ' || **b == b'\t')
        .count();
    *pos += trimmed;
    let rest = &body[*pos..];
    if rest.starts_with(b"\r\n") {
        *pos += 2;
    } else if rest.starts_with(b"\n") {
        *pos += 1;
    }
    // 缺少结尾的 `--` 时按结束处理，保留已解析的段
    if *pos >= body.len() {
        return State::Done;
    }
    State::Headers
}

/// 返回 (头部结束位置, 数据开始位置)
fn find_header_end(body: &[u8], from: usize) -> Option<(usize, usize)> {
    // 没有任何头部时空行紧跟分隔符
    if body[from..].starts_with(b"\r\n") {
        return Some((from, from + 2));
    }
    if body[from..].starts_with(b"\n") {
        return Some((from, from + 1));
    }
    let crlf = find(body, b"\r\n\r\n", from).map(|i| (i, i + 4));
    let lf = find(body, b"\n\n", from).map(|i| (i, i + 2));
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_headers(block: &[u8]) -> Result<Vec<(String, String)>, MultipartError> {
    let text = String::from_utf8_lossy(block);
    let mut headers = Vec::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or(MultipartError::MalformedHeaders)?;
        headers.push((key.trim().to_ascii_lowercase(), value.trim().to_string()));
    }
    Ok(headers)
}

fn build_part(headers: Vec<(String, String)>, data: &[u8]) -> Part<'_> {
    let disposition = headers
        .iter()
        .find(|(k, _)| k == "content-disposition")
        .map(|(_, v)| disposition_params(v))
        .unwrap_or_default();

    let param = |key: &str| {
        disposition
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.clone())
    };

    // RFC 5987 扩展形式优先
    let filename = param("filename*")
        .and_then(|v| decode_ext_value(&v))
        .or_else(|| param("filename"));

    Part {
        name: param("name"),
        filename,
        headers,
        data,
    }
}

fn disposition_params(value: &str) -> Vec<(String, String)> {
    split_params(value)
        .into_iter()
        .skip(1)
        .filter_map(|p| {
            let (k, v) = p.split_once('=')?;
            Some((k.trim().to_string(), unquote(v.trim()).to_string()))
        })
        .collect()
}

/// `UTF-8''%E4%B8%AD.txt` 形式
fn decode_ext_value(value: &str) -> Option<String> {
    let (charset, rest) = value.split_once('\'')?;
    let (_lang, encoded) = rest.split_once('\'')?;
    if !charset.eq_ignore_ascii_case("utf-8") {
        return None;
    }
    percent_decode_str(encoded)
        .decode_utf8()
        .ok()
        .map(|s| s.into_owned())
}

/// 按 `;` 拆分参数，引号内的 `;` 不拆分
fn split_params(value: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;
    for c in value.chars() {
        match c {
            _ if escaped => {
                current.push(c);
                escaped = false;
            }
            '\\' if in_quotes => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ';' if !in_quotes => out.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    out.push(current);
    out
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn strip_line_end(data: &[u8]) -> &[u8] {
    data.strip_suffix(b"\r\n")
        .or_else(|| data.strip_suffix(b"\n"))
        .unwrap_or(data)
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}
