//! 下载流程的错误类型。
//!
//! 各错误的 `Display` 文本会直接呈现给用户，保持中文表述。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("无法获取书籍信息")]
    MetadataUnavailable,

    #[error("无法获取章节列表")]
    ChapterListUnavailable,

    #[error("章节数超过限制 ({count}/{limit})")]
    ChapterLimitExceeded { count: usize, limit: usize },

    #[error("已有正在进行的下载任务")]
    AlreadyDownloading,

    #[error("下载已取消")]
    Cancelled,

    #[error("上传群文件失败: {0}")]
    Delivery(String),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}
