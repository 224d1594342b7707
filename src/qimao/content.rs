//! 章节正文与标题的清洗。

use regex::Regex;
use std::sync::OnceLock;

static RE_TAG: OnceLock<Regex> = OnceLock::new();
static RE_CHARSET: OnceLock<Regex> = OnceLock::new();
static RE_LINE_EDGES: OnceLock<Regex> = OnceLock::new();
static RE_INLINE_WS: OnceLock<Regex> = OnceLock::new();
static RE_BLANK_LINES: OnceLock<Regex> = OnceLock::new();

fn re_tag() -> &'static Regex {
    RE_TAG.get_or_init(|| Regex::new(r"<[^>]+>").expect("compile RE_TAG"))
}

fn re_charset() -> &'static Regex {
    // 保留中文、英文、数字与常用标点，其余按乱码剔除
    RE_CHARSET.get_or_init(|| {
        Regex::new(r#"[^\u{4e00}-\u{9fa5}a-zA-Z0-9\s，。！？；“”‘’（）【】\n\t]"#)
            .expect("compile RE_CHARSET")
    })
}

fn re_line_edges() -> &'static Regex {
    RE_LINE_EDGES.get_or_init(|| Regex::new(r"(?m)^[ \t]+|[ \t]+$").expect("compile RE_LINE_EDGES"))
}

fn re_inline_ws() -> &'static Regex {
    RE_INLINE_WS.get_or_init(|| Regex::new(r"[ \t]+").expect("compile RE_INLINE_WS"))
}

fn re_blank_lines() -> &'static Regex {
    RE_BLANK_LINES.get_or_init(|| Regex::new(r"\n+").expect("compile RE_BLANK_LINES"))
}

/// 清洗章节正文。
///
/// 依次做实体解码、`</p>` 转换行、去标签、乱码过滤、行首尾空白清理、
/// 行内空白压缩与空行合并。
pub fn clean_content(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let content = raw
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&apos;", "'");

    let content = content.replace("</p>", "\n");
    let content = re_tag().replace_all(&content, "");
    let content = re_charset().replace_all(&content, "");
    let content = re_line_edges().replace_all(&content, "");
    let content = re_inline_ws().replace_all(&content, " ");
    let content = re_blank_lines().replace_all(&content, "\n");

    content.trim().to_string()
}

/// 去掉搜索结果标题/作者里的高亮标签。
pub fn strip_html_tags(text: &str) -> String {
    re_tag().replace_all(text, "").to_string()
}
