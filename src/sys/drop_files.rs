//! Reading the file list out of a native drop handle.

use std::path::PathBuf;

use tracing::{trace, warn};

/// Initial per-path buffer, in UTF-16 units including the terminator.
pub const PATH_BUFFER_LEN: usize = 512;

/// Longest path the buffer grows to, the extended-length path limit.
pub const MAX_PATH_BUFFER_LEN: usize = 32_768;

/// Opaque handle carried by a drop-files message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DropHandle(pub usize);

/// Native drag query interface.
pub trait DropQuery {
    fn count(&self) -> u32;

    /// Length of path `index` in UTF-16 units, not counting the terminator.
    fn path_len(&self, index: u32) -> usize;

    /// Copies path `index` into `buf`, truncating to `buf.len() - 1` units and
    /// NUL-terminating. Returns the number of units copied.
    fn copy_path(&self, index: u32, buf: &mut [u16]) -> usize;

    /// Releases the native handle. Called exactly once, by [`DropGuard`].
    fn finish(&mut self);
}

/// Owns a drop query and releases it on every exit path.
pub struct DropGuard<'a>(Box<dyn DropQuery + 'a>);

impl<'a> DropGuard<'a> {
    pub fn new(query: Box<dyn DropQuery + 'a>) -> Self { DropGuard(query) }

    pub fn paths(&self) -> Vec<PathBuf> { read_paths(self.0.as_ref()) }
}

impl Drop for DropGuard<'_> {
    fn drop(&mut self) { self.0.finish(); }
}

fn read_paths(query: &dyn DropQuery) -> Vec<PathBuf> {
    let count = query.count();
    let mut buf = vec![0u16; PATH_BUFFER_LEN];
    let mut paths = Vec::with_capacity(count as usize);
    'paths: for index in 0..count {
        let needed = query.path_len(index);
        if needed >= MAX_PATH_BUFFER_LEN {
            warn!(index, needed, "dropped path too long, skipped");
            continue;
        }
        if needed + 1 > buf.len() {
            warn!(index, needed, "dropped path exceeds buffer, growing");
            buf.resize(needed + 1, 0);
        }
        let mut copied = query.copy_path(index, &mut buf);
        // A full buffer may mean the path was cut short, whatever the length query said.
        while copied + 1 >= buf.len() {
            if buf.len() >= MAX_PATH_BUFFER_LEN {
                warn!(index, len = buf.len(), "dropped path never fit, skipped");
                continue 'paths;
            }
            let grown = (buf.len() * 2).min(MAX_PATH_BUFFER_LEN);
            warn!(index, grown, "dropped path filled the buffer, retrying");
            buf.resize(grown, 0);
            copied = query.copy_path(index, &mut buf);
        }
        if copied == 0 {
            trace!(index, "empty dropped path skipped");
            continue;
        }
        let end = buf[..copied].iter().position(|&c| c == 0).unwrap_or(copied);
        paths.push(PathBuf::from(String::from_utf16_lossy(&buf[..end])));
    }
    paths
}
