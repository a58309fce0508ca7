//! Small utilities shared across modules: wall-clock access, timestamp
//! smearing so messages sent in quick succession keep stable ordering
//! even on coarse clocks, and collision-safe "fine filename"
//! allocation for the blob directory.
//!
//! Folded into one module since neither concern is large enough to
//! justify its own file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Hands out monotonically increasing timestamps, "smearing" repeated
/// calls within the same wall-clock second one second apart so a batch of
/// messages sent back to back still sorts correctly.
#[derive(Debug, Default)]
pub struct Smearer {
    last: AtomicI64,
}

impl Smearer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a timestamp `>= now()` that is strictly greater than every
    /// timestamp previously returned by this smearer.
    pub fn smeared_time(&self) -> i64 {
        let wall = now();
        loop {
            let prev = self.last.load(Ordering::SeqCst);
            let next = if wall > prev { wall } else { prev + 1 };
            if self
                .last
                .compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return next;
            }
        }
    }
}

/// A short random, URL-safe, opaque identifier (used for `group_id` and
/// for job/backup temp filenames). Eleven base-36 characters give ~56
/// bits of entropy, plenty for "won't collide across two peers' group
/// chats".
pub fn create_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    (0..11)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Renders a unix timestamp for human-facing message info text.
pub fn timestamp_to_str(timestamp: i64) -> String {
    chrono::DateTime::from_timestamp(timestamp, 0)
        .unwrap_or_else(chrono::Utc::now)
        .format("%Y.%m.%d %H:%M:%S")
        .to_string()
}

/// Picks a filename under `dir` based on `desired_name` that does not
/// already exist, inserting a numeric suffix before the extension on
/// collision: `photo.jpg`, `photo-1.jpg`, `photo-2.jpg`, …
pub fn fine_filename(dir: &Path, desired_name: &str) -> PathBuf {
    let sanitized = sanitize_filename::sanitize(desired_name);
    let path = Path::new(&sanitized);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("file").to_string();
    let ext = path.extension().and_then(|s| s.to_str()).map(|s| s.to_string());

    let mut candidate = dir.join(&sanitized);
    let mut suffix = 0u32;
    while candidate.exists() {
        suffix += 1;
        let name = match &ext {
            Some(ext) => format!("{stem}-{suffix}.{ext}"),
            None => format!("{stem}-{suffix}"),
        };
        candidate = dir.join(name);
    }
    candidate
}
