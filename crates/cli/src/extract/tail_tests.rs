// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::io::Write;

use super::{line_count, read_span};

#[test]
fn reads_a_span_with_one_indexed_numbers() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("session.jsonl");
    std::fs::write(&path, "{\"a\":1}\n{\"b\":2}\n{\"c\":3}\n")?;

    let lines = read_span(&path, 1, 3)?;
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].number, 2);
    assert_eq!(lines[0].text, r#"{"b":2}"#);
    assert_eq!(lines[1].number, 3);
    Ok(())
}

#[test]
fn missing_file_reads_as_empty() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let lines = read_span(&dir.path().join("absent.jsonl"), 0, u64::MAX)?;
    assert!(lines.is_empty());
    assert_eq!(line_count(&dir.path().join("absent.jsonl"))?, 0);
    Ok(())
}

#[test]
fn unterminated_tail_is_invisible() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("session.jsonl");
    std::fs::write(&path, "{\"a\":1}\n{\"partial\":")?;

    let lines = read_span(&path, 0, u64::MAX)?;
    assert_eq!(lines.len(), 1);
    assert_eq!(line_count(&path)?, 1);

    // Completing the line makes it visible at the next read.
    let mut file = std::fs::OpenOptions::new().append(true).open(&path)?;
    writeln!(file, "2}}")?;
    drop(file);

    let lines = read_span(&path, 1, u64::MAX)?;
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].number, 2);
    assert_eq!(lines[0].text, r#"{"partial":2}"#);
    Ok(())
}

#[test]
fn lo_at_end_of_file_reads_nothing() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("session.jsonl");
    std::fs::write(&path, "{\"a\":1}\n")?;

    assert!(read_span(&path, 1, u64::MAX)?.is_empty());
    assert!(read_span(&path, 5, u64::MAX)?.is_empty());
    Ok(())
}

#[test]
fn blank_lines_keep_their_numbers() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("session.jsonl");
    std::fs::write(&path, "{\"a\":1}\n\n{\"c\":3}\n")?;

    let lines = read_span(&path, 0, u64::MAX)?;
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[1].number, 2);
    assert_eq!(lines[1].text, "");
    assert_eq!(lines[2].number, 3);
    Ok(())
}
