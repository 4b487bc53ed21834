use std::{
    fs,
    io::{self, Write},
    path::Path,
};

use tempfile::NamedTempFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// Another writer got there first; the existing file is untouched.
    AlreadyExists,
}

/// Writes `contents` to `path` only if nothing exists there yet.
///
/// The bytes go to a temporary file in the same directory which is then
/// linked into place without clobbering, so readers never observe a partial
/// file and concurrent writers of the same path cannot overwrite each other.
pub fn write_new(path: &Path, contents: &[u8]) -> io::Result<WriteOutcome> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;

    match file.persist_noclobber(path) {
        Ok(_) => Ok(WriteOutcome::Written),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(WriteOutcome::AlreadyExists),
        Err(e) => Err(e.error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("057-x.md");

        assert_eq!(write_new(&path, b"first").unwrap(), WriteOutcome::Written);
        assert_eq!(write_new(&path, b"second").unwrap(), WriteOutcome::AlreadyExists);
        assert_eq!(fs::read_to_string(&path).unwrap(), "first");
    }

    #[test]
    fn leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        write_new(&path, b"1").unwrap();
        write_new(&path, b"2").unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
