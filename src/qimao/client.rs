//! 七猫平台 HTTP 客户端。
//!
//! 接口来自七猫安卓端：请求参数带 MD5 签名，请求头按书籍 ID 的
//! hashCode 固定挑选一个 app-version，章节正文可能是 AES 密文。

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::download::models::{BookBrief, BookInfo, ChapterRef};
use crate::download::ports::ChapterFetchClient;

use super::content::{clean_content, strip_html_tags};
use super::crypto::{decrypt_chapter_content, java_hash_code, sign_params};

const SIGN_KEY: &str = "d3dGiJc651gSQ8w1";
const AES_KEY_HEX: &str = "32343263636238323330643730396531";
const BASE_URL_BC: &str = "https://api-bc.wtzw.com";
const BASE_URL_KS: &str = "https://api-ks.wtzw.com";

const VERSION_LIST: [&str; 21] = [
    "73720", "73700", "73620", "73600", "73500", "73420", "73400", "73328", "73325", "73320",
    "73300", "73220", "73200", "73100", "73000", "72900", "72820", "72800", "70720", "62010",
    "62112",
];

pub struct QimaoClient {
    http: Client,
}

impl QimaoClient {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .danger_accept_invalid_certs(true)
            .build()
            .context("构建 HTTP 客户端失败")?;
        Ok(Self { http })
    }

    /// 同一 book_id 总是得到同一个版本号，行为与安卓端一致。
    fn pick_app_version(book_id: &str) -> &'static str {
        let seed = java_hash_code(book_id);
        VERSION_LIST[seed.unsigned_abs() as usize % VERSION_LIST.len()]
    }

    fn signed_headers(book_id: &str) -> Vec<(&'static str, String)> {
        let version = Self::pick_app_version(book_id);
        let mut headers: Vec<(&'static str, String)> = vec![
            ("AUTHORIZATION", String::new()),
            ("app-version", version.to_string()),
            ("application-id", "com.****.reader".to_string()),
            ("channel", "unknown".to_string()),
            ("net-env", "1".to_string()),
            ("platform", "android".to_string()),
            ("qm-params", String::new()),
            ("reg", "0".to_string()),
        ];
        let pairs: Vec<(&str, &str)> = headers.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let sign = sign_params(&pairs, SIGN_KEY);
        headers.push(("sign", sign));
        headers
    }

    async fn get_json(&self, url: &str, params: &[(&str, &str)], book_id: &str) -> Result<Value> {
        let sign = sign_params(params, SIGN_KEY);
        let mut query: Vec<(&str, &str)> = params.to_vec();
        query.push(("sign", sign.as_str()));

        let mut req = self.http.get(url).query(&query);
        for (name, value) in Self::signed_headers(book_id) {
            req = req.header(name, value);
        }

        let resp = req.send().await.with_context(|| format!("请求失败: {url}"))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("上游返回 {status}: {url}"));
        }
        resp.json::<Value>()
            .await
            .with_context(|| format!("响应解析失败: {url}"))
    }
}

#[async_trait]
impl ChapterFetchClient for QimaoClient {
    async fn search_books(&self, keyword: &str) -> Result<Vec<BookBrief>> {
        let params = [
            ("extend", ""),
            ("tab", "0"),
            ("gender", "0"),
            ("refresh_state", "8"),
            ("page", "1"),
            ("wd", keyword),
            ("is_short_story_user", "0"),
        ];
        let url = format!("{BASE_URL_BC}/search/v1/words");
        let data = self.get_json(&url, &params, "00000000").await?;

        let books = data
            .pointer("/data/books")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut results = Vec::new();
        for json in books {
            let Some(id) = json.get("id").map(value_to_string).filter(|s| !s.is_empty()) else {
                continue;
            };
            results.push(BookBrief {
                book_id: id,
                book_name: strip_html_tags(
                    json.get("title").and_then(Value::as_str).unwrap_or("无书名"),
                ),
                author: strip_html_tags(
                    json.get("author")
                        .and_then(Value::as_str)
                        .unwrap_or("未知作者"),
                ),
                finished: json.get("is_over").and_then(Value::as_str) == Some("1"),
            });
        }
        Ok(results)
    }

    async fn fetch_book_info(&self, book_id: &str) -> Result<Option<BookInfo>> {
        let params = [
            ("id", book_id),
            ("imei_ip", "2937357107"),
            ("teeny_mode", "0"),
        ];
        let url = format!("{BASE_URL_BC}/api/v4/book/detail");
        let data = self.get_json(&url, &params, book_id).await?;

        let Some(book) = data.pointer("/data/book") else {
            return Ok(None);
        };

        let words_num: u64 = book
            .get("words_num")
            .map(value_to_string)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let finished = book.get("is_over").and_then(Value::as_str) == Some("1");
        let tags: Vec<String> = book
            .get("book_tag_list")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|t| t.get("title").and_then(Value::as_str))
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Some(BookInfo {
            book_id: book.get("id").map(value_to_string).unwrap_or_default(),
            book_name: book
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or("未知标题")
                .to_string(),
            author: book
                .get("author")
                .and_then(Value::as_str)
                .unwrap_or("未知作者")
                .to_string(),
            source: "七猫".to_string(),
            status: if finished { "已完结" } else { "连载中" }.to_string(),
            summary: book
                .get("intro")
                .and_then(Value::as_str)
                .map(|s| s.to_string()),
            word_count: (words_num > 0).then(|| format_word_count(words_num)),
            cover_url: book
                .get("image_link")
                .and_then(Value::as_str)
                .map(|s| s.to_string()),
            category: (!tags.is_empty()).then(|| tags.join(", ")),
        }))
    }

    async fn fetch_chapter_list(&self, book_id: &str) -> Result<Vec<ChapterRef>> {
        let params = [("chapter_ver", "0"), ("id", book_id)];
        let url = format!("{BASE_URL_KS}/api/v1/chapter/chapter-list");
        let data = self.get_json(&url, &params, book_id).await?;

        let mut raw: Vec<Value> = data
            .pointer("/data/chapter_lists")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        raw.sort_by_key(|json| {
            json.get("chapter_sort")
                .map(value_to_string)
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(0)
        });

        let chapters = raw
            .iter()
            .enumerate()
            .map(|(index, json)| ChapterRef {
                index,
                chapter_id: json.get("id").map(value_to_string).unwrap_or_default(),
                title: json
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or("未知章节")
                    .to_string(),
                sort: json
                    .get("chapter_sort")
                    .map(value_to_string)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0),
            })
            .collect();
        Ok(chapters)
    }

    async fn fetch_chapter_content(&self, book_id: &str, chapter_id: &str) -> Result<String> {
        let params = [("chapter_id", chapter_id), ("id", book_id)];
        let url = format!("{BASE_URL_KS}/api/v1/chapter/content");
        let data = self.get_json(&url, &params, book_id).await?;

        let raw = data
            .pointer("/data/content")
            .and_then(Value::as_str)
            .unwrap_or_default();

        // 正文可能加密也可能明文，解密失败按明文处理
        let content = match decrypt_chapter_content(raw, AES_KEY_HEX) {
            Ok(plain) => plain,
            Err(e) => {
                debug!(target: "qimao", chapter_id, error = %e, "按明文处理章节内容");
                raw.to_string()
            }
        };

        let cleaned = clean_content(&content);
        if cleaned.is_empty() {
            return Err(anyhow!("章节内容为空: {chapter_id}"));
        }
        Ok(cleaned)
    }
}

/// 上游对数字字段时而返回字符串时而返回数字，统一转成字符串再用。
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

fn format_word_count(words: u64) -> String {
    if words >= 10_000 {
        format!("{:.1}万字", words as f64 / 10_000.0)
    } else {
        format!("{words}字")
    }
}
