// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Numbered-line reads over append-only JSONL session logs.
//!
//! Cursors are 1-indexed line numbers, so reads are expressed as spans of
//! line numbers rather than byte offsets. Only newline-terminated lines are
//! visible: a trailing fragment still being written by the agent does not
//! exist until its newline lands.

use std::io::{BufRead, BufReader};
use std::path::Path;

/// One physical line of a session log, with its 1-indexed number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberedLine {
    pub number: u64,
    pub text: String,
}

/// Read the newline-terminated lines whose numbers fall in `(lo, hi]`.
///
/// A missing file reads as empty (the agent may not have flushed its first
/// entry yet). Pass `u64::MAX` for `hi` to read to end-of-file.
pub fn read_span(path: &Path, lo: u64, hi: u64) -> anyhow::Result<Vec<NumberedLine>> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e.into()),
    };

    let mut reader = BufReader::new(file);
    let mut lines = Vec::new();
    let mut number = 0u64;
    let mut buf = String::new();

    loop {
        buf.clear();
        let bytes_read = reader.read_line(&mut buf)?;
        if bytes_read == 0 {
            break;
        }
        if !buf.ends_with('\n') {
            // Unterminated tail: the writer has not finished this line.
            break;
        }
        number += 1;
        if number <= lo {
            continue;
        }
        if number > hi {
            break;
        }
        lines.push(NumberedLine { number, text: buf.trim_end_matches(['\n', '\r']).to_string() });
    }

    Ok(lines)
}

/// Number of newline-terminated lines currently in the file.
pub fn line_count(path: &Path) -> anyhow::Result<u64> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut reader = BufReader::new(file);
    let mut count = 0u64;
    let mut buf = String::new();
    loop {
        buf.clear();
        let bytes_read = reader.read_line(&mut buf)?;
        if bytes_read == 0 || !buf.ends_with('\n') {
            break;
        }
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
#[path = "tail_tests.rs"]
mod tests;
