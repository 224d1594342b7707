//! 七猫链接解析与书籍 ID 提取。

use regex::Regex;
use std::sync::OnceLock;

static RE_URL: OnceLock<Regex> = OnceLock::new();
static RE_SHUKU: OnceLock<Regex> = OnceLock::new();
static RE_DIGITS: OnceLock<Regex> = OnceLock::new();

fn re_url() -> &'static Regex {
    RE_URL.get_or_init(|| Regex::new(r"https?://\S+").expect("compile RE_URL"))
}

fn re_shuku() -> &'static Regex {
    RE_SHUKU.get_or_init(|| Regex::new(r"/shuku/(\d+)").expect("compile RE_SHUKU"))
}

fn re_digits() -> &'static Regex {
    RE_DIGITS.get_or_init(|| Regex::new(r"\d+").expect("compile RE_DIGITS"))
}

/// 消息中是否带有任意链接。
pub fn has_link(text: &str) -> bool {
    re_url().is_match(text)
}

/// 链接是否指向七猫站点（qimao.com / wtzw.com）。
pub fn is_valid_qimao_link(url: &str) -> bool {
    url.contains("qimao.com") || url.contains("wtzw.com")
}

/// 从消息文本中提取七猫书籍 ID。
///
/// 优先匹配 `/shuku/<digits>` 路径；没有命中时回落到链接里最长的数字串。
pub fn extract_book_id(text: &str) -> Option<String> {
    let url = re_url()
        .find_iter(text)
        .map(|m| m.as_str())
        .find(|u| is_valid_qimao_link(u))?;

    if let Some(caps) = re_shuku().captures(url) {
        return caps.get(1).map(|m| m.as_str().to_string());
    }

    re_digits()
        .find_iter(url)
        .map(|m| m.as_str())
        .max_by_key(|s| s.len())
        .map(|s| s.to_string())
}
