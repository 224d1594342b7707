//! 成品文档生成。
//!
//! 将下载完成的章节记录按序号组装为 txt 或 html 文件。缺失章节在输出中
//! 留白跳过，不写占位文本。

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::base_system::context::safe_fs_name;
use crate::download::models::{BookInfo, ChapterRecord};

use super::html_utils::escape_html;

/// 按配置的输出格式生成文档，返回成品路径。
/// epub 尚未实现，降级为 txt 并记录一条警告。
pub fn generate_document(
    book: &BookInfo,
    chapters: &[ChapterRecord],
    output_dir: &Path,
    format: &str,
) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("创建输出目录失败: {}", output_dir.display()))?;

    let base = safe_fs_name(&format!("{}_{}", book.book_name, book.author), "_", 120);

    let path = match format {
        "html" => write_html(book, chapters, output_dir, &base)?,
        "epub" => {
            warn!(target: "book_parser", book = %book.book_name, "epub 生成暂未支持，降级为 txt");
            write_txt(book, chapters, output_dir, &base)?
        }
        _ => write_txt(book, chapters, output_dir, &base)?,
    };

    info!(target: "book_parser", path = %path.display(), "文档生成完成");
    Ok(path)
}

fn write_txt(
    book: &BookInfo,
    chapters: &[ChapterRecord],
    output_dir: &Path,
    base: &str,
) -> Result<PathBuf> {
    let mut out = String::new();
    out.push_str(&format!("《{}》\n", book.book_name));
    out.push_str(&format!("作者：{}\n", book.author));
    out.push_str(&format!("来源：{}\n", book.source));
    out.push_str(&format!("状态：{}\n", book.status));
    if let Some(words) = &book.word_count {
        out.push_str(&format!("字数：{}\n", words));
    }
    if let Some(summary) = &book.summary {
        out.push_str(&format!("简介：{}\n", summary));
    }
    out.push_str("\n========================================\n\n");

    for ch in chapters {
        let Some(content) = ch.content.as_deref() else {
            continue;
        };
        out.push_str(&ch.title);
        out.push_str("\n\n");
        out.push_str(content);
        out.push_str("\n\n");
    }

    let path = output_dir.join(format!("{base}.txt"));
    fs::write(&path, out).with_context(|| format!("写入 txt 失败: {}", path.display()))?;
    Ok(path)
}

fn write_html(
    book: &BookInfo,
    chapters: &[ChapterRecord],
    output_dir: &Path,
    base: &str,
) -> Result<PathBuf> {
    let title = escape_html(&book.book_name);
    let author = escape_html(&book.author);

    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n<html lang=\"zh-CN\">\n<head>\n");
    out.push_str("<meta charset=\"utf-8\">\n");
    out.push_str(&format!("<title>{title}</title>\n"));
    out.push_str(
        "<style>\n\
         body { max-width: 42em; margin: 0 auto; padding: 1em; font-family: serif; }\n\
         h1 { text-align: center; }\n\
         h2 { margin-top: 2em; }\n\
         p { line-height: 1.8; text-indent: 2em; }\n\
         </style>\n",
    );
    out.push_str("</head>\n<body>\n");
    out.push_str(&format!("<h1>{title}</h1>\n"));
    out.push_str(&format!("<p>作者：{author}</p>\n"));
    out.push_str(&format!("<p>来源：{}</p>\n", escape_html(&book.source)));
    out.push_str(&format!("<p>状态：{}</p>\n", escape_html(&book.status)));
    if let Some(summary) = &book.summary {
        out.push_str(&format!("<p>简介：{}</p>\n", escape_html(summary)));
    }
    out.push_str("<hr>\n");

    for ch in chapters {
        let Some(content) = ch.content.as_deref() else {
            continue;
        };
        out.push_str(&format!("<h2>{}</h2>\n", escape_html(&ch.title)));
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            out.push_str(&format!("<p>{}</p>\n", escape_html(line)));
        }
    }

    out.push_str("</body>\n</html>\n");

    let path = output_dir.join(format!("{base}.html"));
    fs::write(&path, out).with_context(|| format!("写入 html 失败: {}", path.display()))?;
    Ok(path)
}
