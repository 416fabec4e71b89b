// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Line-oriented Postfix lookup tables: `key value` maps and plain domain lists.

use crate::modules::error::code::ErrorCode;
use crate::modules::error::KeyKeeperResult;
use crate::raise_error;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

fn is_content_line(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && !trimmed.starts_with('#')
}

fn map_key(line: &str) -> Option<&str> {
    if !is_content_line(line) {
        return None;
    }
    line.split_whitespace().next()
}

pub fn contains_key(content: &str, key: &str) -> bool {
    content.lines().any(|line| map_key(line) == Some(key))
}

/// Leaves exactly one `key value` line: the first existing entry is replaced in place,
/// later duplicates are dropped, and a missing entry is appended.
pub fn upsert_entry(content: &str, key: &str, value: &str) -> (String, bool) {
    let entry = format!("{} {}", key, value);
    let mut replaced = false;
    let mut lines = Vec::new();
    for line in content.lines() {
        if map_key(line) == Some(key) {
            if !replaced {
                lines.push(entry.clone());
                replaced = true;
            }
        } else {
            lines.push(line.to_string());
        }
    }
    if !replaced {
        lines.push(entry);
    }
    (join_lines(&lines), replaced)
}

/// Drops every line keyed exactly by `key`; returns the new content and how many went.
pub fn remove_entries(content: &str, key: &str) -> (String, usize) {
    let mut removed = 0;
    let lines: Vec<String> = content
        .lines()
        .filter(|line| {
            let hit = map_key(line) == Some(key);
            if hit {
                removed += 1;
            }
            !hit
        })
        .map(String::from)
        .collect();
    (join_lines(&lines), removed)
}

/// Whole-line, case-insensitive match; comments and surrounding blanks are ignored.
pub fn contains_domain(content: &str, domain: &str) -> bool {
    let domain = domain.trim();
    content
        .lines()
        .filter(|line| is_content_line(line))
        .any(|line| line.trim().eq_ignore_ascii_case(domain))
}

pub fn append_line(content: &str, line: &str) -> String {
    let mut updated = content.to_string();
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(line);
    updated.push('\n');
    updated
}

fn join_lines(lines: &[String]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut joined = lines.join("\n");
    joined.push('\n');
    joined
}

pub async fn read_or_empty(path: &Path) -> KeyKeeperResult<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(raise_error!(
            format!("Failed to read {}: {}", path.display(), e),
            ErrorCode::ProvisioningFailed
        )),
    }
}

/// Writes through a sibling temp file and a rename, so readers never see a partial map.
pub async fn write_atomic(path: &Path, content: &str) -> KeyKeeperResult<()> {
    let temp = temp_path(path);
    tokio::fs::write(&temp, content).await.map_err(|e| {
        raise_error!(
            format!("Failed to write {}: {}", temp.display(), e),
            ErrorCode::ProvisioningFailed
        )
    })?;
    if let Ok(metadata) = tokio::fs::metadata(path).await {
        let _ = tokio::fs::set_permissions(&temp, metadata.permissions()).await;
    }
    tokio::fs::rename(&temp, path).await.map_err(|e| {
        raise_error!(
            format!(
                "Failed to move {} into place at {}: {}",
                temp.display(),
                path.display(),
                e
            ),
            ErrorCode::ProvisioningFailed
        )
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".keykeeper.tmp");
    path.with_file_name(name)
}
