//  FS.rs
//    by Lut99
//
//  Created:
//    09 Feb 2023, 10:05:33
//  Last edited:
//    14 Jun 2023, 10:12:08
//  Auto updated?
//    Yes
//
//  Description:
//!   Provides filesystem helpers for the per-process scratch directories
//!   in which buckets live.
//

use std::fs;
use std::io;
use std::path::Path;


/***** LIBRARY *****/
/// Computes the total size, in bytes, of all files under the given directory.
///
/// # Arguments
/// - `path`: The directory to measure. May not exist, in which case the size is 0.
///
/// # Errors
/// This function errors if we failed to read the directory or stat one of its entries.
pub fn dir_size(path: impl AsRef<Path>) -> Result<u64, io::Error> {
    let path: &Path = path.as_ref();
    if !path.exists() { return Ok(0); }

    let mut total: u64 = 0;
    for entry in fs::read_dir(path)? {
        let entry: fs::DirEntry = entry?;
        let meta: fs::Metadata = entry.metadata()?;
        if meta.is_dir() {
            total += dir_size(entry.path())?;
        } else {
            total += meta.len();
        }
    }
    Ok(total)
}

/// Removes the given directory and everything under it, tolerating it not existing.
///
/// # Errors
/// This function errors if the directory exists but could not be removed.
pub fn clean_dir(path: impl AsRef<Path>) -> Result<(), io::Error> {
    let path: &Path = path.as_ref();
    match fs::remove_dir_all(path) {
        Ok(_)    => Ok(()),
        Err(err) => if err.kind() == io::ErrorKind::NotFound { Ok(()) } else { Err(err) },
    }
}


/***** TESTS *****/
#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;

    use super::*;

    #[test]
    fn dirsize_counts_nested() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        File::create(dir.path().join("a")).unwrap().write_all(&[0; 10]).unwrap();
        File::create(dir.path().join("sub/b")).unwrap().write_all(&[0; 32]).unwrap();
        assert_eq!(dir_size(dir.path()).unwrap(), 42);
        assert_eq!(dir_size(dir.path().join("nonexistent")).unwrap(), 0);
    }

    #[test]
    fn cleandir_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("scratch");
        fs::create_dir(&target).unwrap();
        File::create(target.join("x")).unwrap();
        clean_dir(&target).unwrap();
        assert!(!target.exists());
        clean_dir(&target).unwrap();
    }
}
