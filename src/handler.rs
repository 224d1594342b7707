//! 聊天指令解析与回复文案渲染。
//!
//! 只做字符串进出，消息收发由宿主负责。

use crate::base_system::link_extractor::{extract_book_id, has_link};
use crate::download::models::{BookBrief, BookInfo, DownloadState, DownloadStatus};

const DIVIDER: &str = "━━━━━━━━━━━━━━━━━━";

/// 一条消息解析出的指令。带参指令的参数可能为空串，由调用方回复用法。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Search(String),
    Detail(String),
    Download(String),
    Progress,
    Cancel,
    Help,
    /// 消息里带七猫链接，自动触发下载
    LinkDownload(String),
}

pub fn parse_command(message: &str) -> Option<Command> {
    let message = message.trim();

    // 链接识别优先于文字指令
    if has_link(message)
        && let Some(book_id) = extract_book_id(message)
    {
        return Some(Command::LinkDownload(book_id));
    }

    if let Some(rest) = strip_any(message, &["搜索小说", "搜小说"]) {
        return Some(Command::Search(rest));
    }
    if let Some(rest) = strip_any(message, &["小说详情", "书籍详情"]) {
        return Some(Command::Detail(rest));
    }
    if let Some(rest) = strip_any(message, &["下载小说", "下小说"]) {
        // 参数后若还有其它内容只取第一段
        let id = rest.split_whitespace().next().unwrap_or("").to_string();
        return Some(Command::Download(id));
    }

    match message {
        "下载进度" | "进度" => Some(Command::Progress),
        "取消下载" | "停止下载" => Some(Command::Cancel),
        "小说帮助" | "小说菜单" | "小说下载帮助" => Some(Command::Help),
        _ => None,
    }
}

fn strip_any(message: &str, prefixes: &[&str]) -> Option<String> {
    for prefix in prefixes {
        if let Some(rest) = message.strip_prefix(prefix) {
            if rest.is_empty() {
                return Some(String::new());
            }
            if rest.starts_with(char::is_whitespace) {
                return Some(rest.trim().to_string());
            }
        }
    }
    None
}

pub fn render_search_results(results: &[BookBrief]) -> String {
    let mut reply = format!("📚 搜索结果 (共{}个):\n\n", results.len());
    for (i, book) in results.iter().take(5).enumerate() {
        reply.push_str(&format!("{}. {}\n", i + 1, book.book_name));
        reply.push_str(&format!("   作者: {}\n", book.author));
        reply.push_str(&format!(
            "   状态: {}\n",
            if book.finished { "已完结" } else { "连载中" }
        ));
        reply.push_str(&format!("   ID: {}\n\n", book.book_id));
    }
    reply.push_str("💡 发送 \"下载小说 书籍ID\" 开始下载");
    reply
}

/// 书籍详情卡片。`downloading` 决定尾部是下载提示还是开始下载提示。
pub fn render_book_card(book: &BookInfo, downloading: bool) -> String {
    let mut card = format!("{DIVIDER}\n📚 {}\n{DIVIDER}\n\n", book.book_name);
    card.push_str(&format!("✍️ 作者: {}\n", book.author));
    card.push_str(&format!("📖 来源: {}\n", book.source));
    card.push_str(&format!("📊 状态: {}\n", book.status));
    if let Some(words) = &book.word_count {
        card.push_str(&format!("📝 字数: {words}\n"));
    }
    if let Some(category) = &book.category {
        card.push_str(&format!("🏷️ 分类: {category}\n"));
    }
    if downloading {
        card.push_str(&format!("\n📥 开始下载中，请稍候...\n{DIVIDER}"));
    } else {
        if let Some(summary) = &book.summary {
            card.push_str(&format!("\n📄 简介:\n{}\n", truncate_chars(summary, 100)));
        }
        card.push_str(&format!(
            "\n{DIVIDER}\n💡 发送 \"下载小说 {}\" 开始下载",
            book.book_id
        ));
    }
    card
}

pub fn render_progress(book: &BookInfo, status: &DownloadStatus) -> String {
    let mut reply = format!("{DIVIDER}\n📊 下载进度\n{DIVIDER}\n\n");
    reply.push_str(&format!("📚 书名: {}\n", book.book_name));
    reply.push_str(&format!("✍️ 作者: {}\n", book.author));
    reply.push_str(&format!(
        "📈 进度: {}/{} ({:.1}%)\n",
        status.downloaded_chapters, status.total_chapters, status.progress
    ));
    reply.push_str(&format!("⚡ 速度: {:.1} 章/秒\n", status.avg_speed));
    reply.push_str(&format!(
        "⏱️ 预计剩余: {}秒\n",
        status.estimated_time.round() as u64
    ));
    reply.push_str(&format!("📊 状态: {}\n", status_text(status.state)));
    reply.push_str(DIVIDER);
    reply
}

pub fn render_completion(book: &BookInfo, status: &DownloadStatus, format: &str) -> String {
    let duration_secs = status
        .end_time_ms
        .map(|end| end.saturating_sub(status.start_time_ms) / 1000)
        .unwrap_or(0);
    let mut msg = "✅ 下载完成！\n\n".to_string();
    msg.push_str(&format!("📚 书名: {}\n", book.book_name));
    msg.push_str(&format!("✍️ 作者: {}\n", book.author));
    msg.push_str(&format!("📖 章节: {} 章\n", status.total_chapters));
    if status.failed_chapters > 0 {
        msg.push_str(&format!("⚠️ 失败章节: {} 章\n", status.failed_chapters));
    }
    msg.push_str(&format!("⏱️ 用时: {duration_secs}秒\n"));
    msg.push_str(&format!("📁 格式: {}", format.to_uppercase()));
    msg
}

pub fn status_text(state: DownloadState) -> &'static str {
    match state {
        DownloadState::Pending => "⏳ 等待中",
        DownloadState::Downloading => "⬇️ 下载中",
        DownloadState::Completed => "✅ 已完成",
        DownloadState::Failed => "❌ 失败",
        DownloadState::Cancelled => "🚫 已取消",
    }
}

pub fn help_text() -> String {
    format!(
        "{DIVIDER}\n📚 小说下载插件\n{DIVIDER}\n\n\
         🔍 搜索小说 <书名> - 搜索小说\n\
         📖 小说详情 <ID> - 查看详情\n\
         📥 下载小说 <ID> - 下载小说\n\
         📊 下载进度 - 查看进度\n\
         ❌ 取消下载 - 取消任务\n\n\
         {DIVIDER}\n\
         📖 支持平台: 七猫小说\n\
         📁 支持格式: TXT, EPUB, HTML\n\
         👑 管理员和群主无下载限制\n\
         {DIVIDER}"
    )
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let cut: String = s.chars().take(max_chars).collect();
    format!("{cut}...")
}
