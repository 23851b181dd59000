//! File output helpers shared by the store and the triage writers.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Replace `path` with `bytes` so that readers see either the old or the new
/// content in full. The temp file lives in the same directory so the rename
/// stays on one filesystem.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    fs::create_dir_all(dir)?;
    let tmp = temp_sibling(dir, path);
    let res = (|| {
        let mut f = File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if res.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    res
}

/// Write lines sorted and deduplicated, one per line. Returns the number of
/// distinct lines written.
pub fn write_sorted_lines<I, S>(path: &Path, lines: I) -> io::Result<usize>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut v: Vec<String> = lines.into_iter().map(Into::into).collect();
    v.sort();
    v.dedup();
    let mut buf = String::with_capacity(v.iter().map(|s| s.len() + 1).sum());
    for l in &v {
        buf.push_str(l);
        buf.push('\n');
    }
    atomic_write(path, buf.as_bytes())?;
    Ok(v.len())
}

fn temp_sibling(dir: &Path, target: &Path) -> PathBuf {
    let name = target.file_name().and_then(|n| n.to_str()).unwrap_or("out");
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    dir.join(format!(".{}.{}.{}.tmp", name, std::process::id(), seq))
}
