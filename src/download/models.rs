//! 下载相关的数据模型定义。
//!
//! 包含书籍信息、章节引用/记录、下载状态与下载任务等核心数据结构。
//! 一个 [`DownloadTask`] 由创建它的编排器独占驱动；任务注册表只持有
//! `Arc` 引用，用于查询进度与跨调用栈取消。

use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// 搜索结果条目（仅含列表展示所需字段）。
#[derive(Debug, Clone, Serialize)]
pub struct BookBrief {
    pub book_id: String,
    pub book_name: String,
    pub author: String,
    pub finished: bool,
}

/// 书籍详情。任务创建时拉取一次，之后只读。
#[derive(Debug, Clone, Serialize)]
pub struct BookInfo {
    pub book_id: String,
    pub book_name: String,
    pub author: String,
    /// 内容来源标签，例如“七猫”。
    pub source: String,
    /// 完结状态文本（“已完结”/“连载中”）。
    pub status: String,
    pub summary: Option<String>,
    /// 已格式化的字数文本，例如“12.3万字”。
    pub word_count: Option<String>,
    pub cover_url: Option<String>,
    pub category: Option<String>,
}

/// 目录中的一条章节引用。`index` 为排序后的零基序号，决定最终输出顺序。
#[derive(Debug, Clone, Serialize)]
pub struct ChapterRef {
    pub index: usize,
    pub chapter_id: String,
    pub title: String,
    /// 源站返回的显式排序字段（chapter_sort）。
    pub sort: i64,
}

/// 章节下载记录。每个记录只会被一个抓取单元写入，不存在同记录竞争。
#[derive(Debug, Clone)]
pub struct ChapterRecord {
    pub index: usize,
    pub chapter_id: String,
    pub title: String,
    pub downloaded: bool,
    /// 正文；仅在 `downloaded == true` 时存在。
    pub content: Option<String>,
    /// 抓取失败原因；与 `content` 互斥。
    pub error: Option<String>,
}

impl From<ChapterRef> for ChapterRecord {
    fn from(value: ChapterRef) -> Self {
        Self {
            index: value.index,
            chapter_id: value.chapter_id,
            title: value.title,
            downloaded: false,
            content: None,
            error: None,
        }
    }
}

/// 任务生命周期状态。终态（completed/failed/cancelled）之后不再迁移。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    Pending,
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DownloadState::Completed | DownloadState::Failed | DownloadState::Cancelled
        )
    }
}

/// 下载进度快照。计数在一次运行内单调递增。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadStatus {
    pub total_chapters: usize,
    pub downloaded_chapters: usize,
    pub failed_chapters: usize,
    /// downloaded / total × 100，每次章节成功后重算。
    pub progress: f64,
    pub state: DownloadState,
    pub start_time_ms: u64,
    pub end_time_ms: Option<u64>,
    /// 平均速度（章/秒）。尚不可估计时为 0。
    pub avg_speed: f64,
    /// 预计剩余秒数。速度为 0 时同样以 0 表示“暂不可估计”。
    pub estimated_time: f64,
    pub error: Option<String>,
}

impl DownloadStatus {
    fn new(total_chapters: usize) -> Self {
        Self {
            total_chapters,
            downloaded_chapters: 0,
            failed_chapters: 0,
            progress: 0.0,
            state: DownloadState::Downloading,
            start_time_ms: now_ms(),
            end_time_ms: None,
            avg_speed: 0.0,
            estimated_time: 0.0,
            error: None,
        }
    }

    /// 单章成功后的计数与速度/ETA 重算。`elapsed_secs` 为任务启动至今的秒数。
    fn note_chapter_done(&mut self, elapsed_secs: f64) {
        self.downloaded_chapters += 1;
        self.progress = self.downloaded_chapters as f64 / self.total_chapters as f64 * 100.0;

        // elapsed 可能在启动瞬间取整为零，除零时保持“暂不可估计”。
        if elapsed_secs > 0.0 {
            self.avg_speed = self.downloaded_chapters as f64 / elapsed_secs;
        }
        if self.avg_speed > 0.0 {
            let remaining = (self.total_chapters - self.downloaded_chapters) as f64;
            self.estimated_time = remaining / self.avg_speed;
        } else {
            self.estimated_time = 0.0;
        }
    }

    fn note_chapter_failed(&mut self) {
        self.failed_chapters += 1;
    }
}

/// 一次下载任务。抓取单元并发修改章节记录与共享计数，状态读写都经由内部锁。
#[derive(Debug)]
pub struct DownloadTask {
    pub user_id: String,
    pub group_id: Option<String>,
    pub book: BookInfo,
    started: Instant,
    status: Mutex<DownloadStatus>,
    chapters: Mutex<Vec<ChapterRecord>>,
    file_path: Mutex<Option<PathBuf>>,
    cancel: AtomicBool,
}

impl DownloadTask {
    pub fn new(
        user_id: &str,
        group_id: Option<&str>,
        book: BookInfo,
        chapters: Vec<ChapterRef>,
    ) -> Self {
        let records: Vec<ChapterRecord> = chapters.into_iter().map(ChapterRecord::from).collect();
        Self {
            user_id: user_id.to_string(),
            group_id: group_id.map(|g| g.to_string()),
            book,
            started: Instant::now(),
            status: Mutex::new(DownloadStatus::new(records.len())),
            chapters: Mutex::new(records),
            file_path: Mutex::new(None),
            cancel: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> DownloadStatus {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn total_chapters(&self) -> usize {
        self.chapters.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn chapter_id_at(&self, index: usize) -> Option<String> {
        self.chapters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(index)
            .map(|c| c.chapter_id.clone())
    }

    /// 章节记录快照（按序号顺序），供文档组装与测试读取。
    pub fn chapters_snapshot(&self) -> Vec<ChapterRecord> {
        self.chapters.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn file_path(&self) -> Option<PathBuf> {
        self.file_path.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn set_file_path(&self, path: PathBuf) {
        *self.file_path.lock().unwrap_or_else(|e| e.into_inner()) = Some(path);
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// 抓取单元成功：写入正文并更新共享计数（单章恰由一个单元写入）。
    pub(crate) fn record_success(&self, index: usize, content: String) {
        {
            let mut chapters = self.chapters.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(ch) = chapters.get_mut(index) {
                ch.downloaded = true;
                ch.content = Some(content);
                ch.error = None;
            }
        }
        let elapsed = self.started.elapsed().as_secs_f64();
        self.status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .note_chapter_done(elapsed);
    }

    /// 抓取单元失败：记录错误文本，失败不会中断整批下载。
    pub(crate) fn record_failure(&self, index: usize, error: String) {
        {
            let mut chapters = self.chapters.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(ch) = chapters.get_mut(index) {
                ch.downloaded = false;
                ch.content = None;
                ch.error = Some(error);
            }
        }
        self.status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .note_chapter_failed();
    }

    // 终态之间不迁移，后到的标记是空操作。

    pub(crate) fn mark_completed(&self) {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        if status.state.is_terminal() {
            return;
        }
        status.state = DownloadState::Completed;
        status.end_time_ms = Some(now_ms());
    }

    pub(crate) fn mark_failed(&self, error: String) {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        if status.state.is_terminal() {
            return;
        }
        status.state = DownloadState::Failed;
        status.error = Some(error);
        status.end_time_ms = Some(now_ms());
    }

    pub(crate) fn mark_cancelled(&self) {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        if status.state.is_terminal() {
            return;
        }
        status.state = DownloadState::Cancelled;
        status.end_time_ms = Some(now_ms());
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
