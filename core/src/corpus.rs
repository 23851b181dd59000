//! Reading URL/host corpora produced by discovery tooling.

use crate::{ScopeDecision, ScopeFilter, Target};
use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tracing::debug;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Aggregate counters for one corpus load.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CorpusStats {
    pub read: usize,
    pub accepted: usize,
    pub unparsable: usize,
    pub out_of_scope: usize,
    pub duplicates: usize,
}

/// Read non-empty, non-comment lines from a text file, gunzipping when the
/// file is compressed. Invalid UTF-8 is replaced rather than rejected.
pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    let mut f = File::open(path).with_context(|| format!("open corpus {}", path.display()))?;
    let mut magic = [0u8; 2];
    let n = f.read(&mut magic).with_context(|| format!("read corpus {}", path.display()))?;
    let f = File::open(path).with_context(|| format!("reopen corpus {}", path.display()))?;
    let gz = (n == 2 && magic == GZIP_MAGIC) || path.extension().map(|e| e == "gz").unwrap_or(false);
    let reader: Box<dyn Read> = if gz { Box::new(MultiGzDecoder::new(f)) } else { Box::new(f) };
    parse_lines(BufReader::new(reader)).with_context(|| format!("read corpus {}", path.display()))
}

fn parse_lines<R: BufRead>(mut br: R) -> std::io::Result<Vec<String>> {
    let mut out = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if br.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        let t = line.trim();
        if t.is_empty() || t.starts_with('#') {
            continue;
        }
        out.push(t.to_string());
    }
    Ok(out)
}

/// Turn raw lines into unique probe targets. Unparsable lines and hosts the
/// scope filter rejects are counted and skipped.
pub fn load_targets(lines: &[String], scope: Option<&ScopeFilter>) -> (Vec<Target>, CorpusStats) {
    let mut stats = CorpusStats { read: lines.len(), ..Default::default() };
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for line in lines {
        let Some(t) = Target::parse(line) else {
            stats.unparsable += 1;
            continue;
        };
        if let Some(f) = scope {
            let d = f.decide(t.host());
            if !d.admits() {
                debug!(host = t.host(), decision = ?d, "dropped by scope");
                stats.out_of_scope += 1;
                continue;
            }
            if d == ScopeDecision::External {
                debug!(host = t.host(), "external host admitted");
            }
        }
        if !seen.insert(t.key.clone()) {
            stats.duplicates += 1;
            continue;
        }
        stats.accepted += 1;
        out.push(t);
    }
    (out, stats)
}
