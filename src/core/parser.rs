//! Hosts-file parser for block lists.
//!
//! Accepts `<sink> <domain>` lines where the sink is one of the addresses block
//! lists use to null-route a name. Anything else is skipped without error.

use crate::domain::model::ParsedList;
use std::collections::HashSet;

/// First-field values that mark a line as a block entry.
pub const BLOCK_SINKS: [&str; 2] = ["0.0.0.0", "127.0.0.1"];

/// Parse a single hosts line into a normalized domain.
/// Returns None for comments, blank lines and entries that are not blocks.
pub fn parse_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let mut fields = line.split_whitespace();
    let sink = fields.next()?;
    let candidate = fields.next()?;

    if !BLOCK_SINKS.contains(&sink) {
        return None;
    }

    let domain = candidate.trim().to_lowercase();
    if domain == "localhost" || !domain.contains('.') {
        return None;
    }

    Some(domain)
}

/// Parse a complete payload held in memory.
pub fn parse_hosts(content: &str) -> ParsedList {
    let mut parser = HostsParser::new();
    parser.push_chunk(content.as_bytes());
    parser.finish()
}

/// Incremental parser fed with body chunks as they arrive off the network.
/// Lines split across chunk boundaries are buffered until complete.
#[derive(Debug, Default)]
pub struct HostsParser {
    pending: Vec<u8>,
    seen: HashSet<String>,
    out: ParsedList,
}

impl HostsParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);

        let buf = std::mem::take(&mut self.pending);
        let mut start = 0;
        while let Some(offset) = buf[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            self.consume_line(&buf[start..end]);
            start = end + 1;
        }
        self.pending = buf[start..].to_vec();
    }

    /// Domains emitted so far.
    pub fn len(&self) -> usize {
        self.out.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.out.domains.is_empty()
    }

    /// Flush a trailing line without newline and return the result.
    pub fn finish(mut self) -> ParsedList {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.consume_line(&rest);
        }
        self.out
    }

    fn consume_line(&mut self, raw: &[u8]) {
        self.out.lines_seen += 1;

        let Ok(line) = std::str::from_utf8(raw) else {
            self.out.lines_rejected += 1;
            return;
        };

        match parse_line(line) {
            Some(domain) => {
                if self.seen.insert(domain.clone()) {
                    self.out.domains.push(domain);
                }
            }
            None => {
                let trimmed = line.trim();
                if !trimmed.is_empty() && !trimmed.starts_with('#') {
                    self.out.lines_rejected += 1;
                }
            }
        }
    }
}
