//! 编排器依赖的外部端口。
//!
//! 章节抓取与文件投递都通过 trait 注入，集成测试用内存实现替换真实客户端。

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use super::models::{BookBrief, BookInfo, ChapterRef};

/// 上游内容平台客户端。
#[async_trait]
pub trait ChapterFetchClient: Send + Sync {
    /// 按关键词搜索，返回展示用的简要条目。
    async fn search_books(&self, keyword: &str) -> Result<Vec<BookBrief>>;

    /// 拉取书籍详情；书不存在时返回 `None`。
    async fn fetch_book_info(&self, book_id: &str) -> Result<Option<BookInfo>>;

    /// 拉取完整目录，已按源站排序字段升序排好。
    async fn fetch_chapter_list(&self, book_id: &str) -> Result<Vec<ChapterRef>>;

    /// 拉取单章正文（已解密、已清洗）。
    async fn fetch_chapter_content(&self, book_id: &str, chapter_id: &str) -> Result<String>;
}

/// 成品文件的投递通道（群文件上传等）。
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, group_id: &str, file_path: &Path, file_name: &str) -> Result<()>;
}
