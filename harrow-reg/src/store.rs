//  STORE.rs
//    by Lut99
//
//  Created:
//    20 Feb 2023, 10:30:51
//  Last edited:
//    19 Jun 2023, 15:31:40
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the on-disk bucket store every process keeps under its
//!   scratch root. Buckets are written under a per-attempt directory and
//!   sealed by renaming it to the task's canonical directory, so attempts
//!   never share paths and a failed attempt leaves nothing visible.
//

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::debug;

use specifications::data::{DatasetId, JobId};
use specifications::tasks::{BucketAddr, TaskCoord};

use crate::errors::{ReadError, StoreError};
use crate::frame;


/***** LIBRARY *****/
/// An append-only writer for one output bucket of one task attempt.
pub struct BucketWriter {
    /// The path of the bucket file, for error reporting.
    path : PathBuf,
    /// The buffered file handle.
    file : BufWriter<File>,
}

impl BucketWriter {
    /// Appends one record to the bucket.
    ///
    /// # Errors
    /// This function errors if the underlying write fails.
    pub fn write(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        match frame::write_record(&mut self.file, key, value) {
            Ok(_)    => Ok(()),
            Err(err) => Err(StoreError::FileWriteError{ path: self.path.clone(), err }),
        }
    }

    /// Flushes and closes the bucket file. The bucket only becomes visible once the whole attempt
    /// is sealed.
    pub fn finish(mut self) -> Result<(), StoreError> {
        match self.file.flush() {
            Ok(_)    => Ok(()),
            Err(err) => Err(StoreError::FileWriteError{ path: self.path, err }),
        }
    }
}



/// The per-process store of buckets, rooted at `{tmpdir}/{job_id}`.
///
/// Layout: `{root}/{dataset_id}/{task_id}/{split_index}.bucket`, with in-flight attempts living
/// under `{root}/{dataset_id}/{task_id}-a{attempt}` until sealed.
pub struct BucketStore {
    /// The scratch root of this job.
    root    : PathBuf,
    /// Tasks (and whole datasets) whose buckets were deleted on master command. Distinguishes a
    /// deleted bucket (HTTP 410) from a never-known one (HTTP 404).
    deleted : Mutex<HashSet<(DatasetId, Option<u32>)>>,
}

impl BucketStore {
    /// Constructor for a BucketStore under the given scratch root.
    ///
    /// # Arguments
    /// - `tmpdir`: The configured scratch directory of this process.
    /// - `job`: The job everything in this store belongs to.
    pub fn new(tmpdir: impl AsRef<Path>, job: JobId) -> Self {
        Self {
            root    : tmpdir.as_ref().join(job.to_string()),
            deleted : Mutex::new(HashSet::new()),
        }
    }

    /// Returns the scratch root of this store.
    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The canonical (sealed) directory of a task's buckets.
    #[inline]
    fn task_dir(&self, dataset: DatasetId, source: u32) -> PathBuf {
        self.root.join(dataset.to_string()).join(source.to_string())
    }

    /// The in-flight directory of one attempt's buckets.
    #[inline]
    fn attempt_dir(&self, coord: TaskCoord, attempt: u32) -> PathBuf {
        self.root.join(coord.dataset.to_string()).join(format!("{}-a{}", coord.split, attempt))
    }

    /// The path of one sealed bucket file.
    #[inline]
    pub fn bucket_path(&self, addr: &BucketAddr) -> PathBuf {
        self.task_dir(addr.dataset, addr.source).join(format!("{}.bucket", addr.split))
    }

    /// Opens a writer for one output bucket of the given task attempt.
    ///
    /// # Errors
    /// This function errors if the attempt directory or the bucket file could not be created.
    pub fn create(&self, coord: TaskCoord, attempt: u32, split: u32) -> Result<BucketWriter, StoreError> {
        let dir: PathBuf = self.attempt_dir(coord, attempt);
        if let Err(err) = fs::create_dir_all(&dir) { return Err(StoreError::DirCreateError{ path: dir, err }); }

        let path: PathBuf = dir.join(format!("{}.bucket", split));
        let file: File = match File::create(&path) {
            Ok(file) => file,
            Err(err) => { return Err(StoreError::FileCreateError{ path, err }); },
        };
        Ok(BucketWriter{ path, file: BufWriter::new(file) })
    }

    /// Seals all buckets of the given task attempt, making them servable.
    ///
    /// If a sealed set already exists for this task (e.g., a duplicate completion racing a
    /// reassignment), the existing set wins and the new attempt is discarded.
    ///
    /// # Errors
    /// This function errors if the rename fails.
    pub fn seal(&self, coord: TaskCoord, attempt: u32) -> Result<(), StoreError> {
        let from: PathBuf = self.attempt_dir(coord, attempt);
        let to: PathBuf = self.task_dir(coord.dataset, coord.split);

        if to.exists() {
            debug!("Sealed buckets for {} already present; discarding attempt {}", coord, attempt);
            return self.discard(coord, attempt);
        }
        if let Err(err) = fs::rename(&from, &to) { return Err(StoreError::SealError{ coord, attempt, err }); }

        // A re-run task revives its address
        self.deleted.lock().unwrap().remove(&(coord.dataset, Some(coord.split)));
        Ok(())
    }

    /// Removes the (unsealed) buckets of a failed or cancelled attempt.
    pub fn discard(&self, coord: TaskCoord, attempt: u32) -> Result<(), StoreError> {
        let dir: PathBuf = self.attempt_dir(coord, attempt);
        match fs::remove_dir_all(&dir) {
            Ok(_)    => Ok(()),
            Err(err) => if err.kind() == std::io::ErrorKind::NotFound { Ok(()) } else { Err(StoreError::DirRemoveError{ path: dir, err }) },
        }
    }

    /// Reads one sealed bucket.
    ///
    /// # Errors
    /// [`ReadError::Gone`] if the bucket was deleted on master command, [`ReadError::NotFound`] if
    /// it was never sealed here.
    pub fn read(&self, addr: &BucketAddr) -> Result<Vec<u8>, ReadError> {
        {
            let deleted = self.deleted.lock().unwrap();
            if deleted.contains(&(addr.dataset, None)) || deleted.contains(&(addr.dataset, Some(addr.source))) {
                return Err(ReadError::Gone{ addr: *addr });
            }
        }

        let path: PathBuf = self.bucket_path(addr);
        match fs::read(&path) {
            Ok(raw)  => Ok(raw),
            Err(err) => if err.kind() == std::io::ErrorKind::NotFound { Err(ReadError::NotFound{ addr: *addr }) } else { Err(ReadError::IoError{ addr: *addr, err }) },
        }
    }

    /// Stores a bucket fetched from a peer at its canonical path, making this process a replica
    /// for it.
    ///
    /// Written to a temporary sibling first and renamed, so a concurrent reader never observes a
    /// half-written bucket.
    pub fn store_fetched(&self, addr: &BucketAddr, raw: &[u8]) -> Result<(), StoreError> {
        let dir: PathBuf = self.task_dir(addr.dataset, addr.source);
        if let Err(err) = fs::create_dir_all(&dir) { return Err(StoreError::DirCreateError{ path: dir, err }); }

        let path: PathBuf = self.bucket_path(addr);
        let part: PathBuf = path.with_extension("bucket.part");
        if let Err(err) = fs::write(&part, raw) { return Err(StoreError::FileWriteError{ path: part, err }); }
        if let Err(err) = fs::rename(&part, &path) { return Err(StoreError::FileWriteError{ path, err }); }

        self.deleted.lock().unwrap().remove(&(addr.dataset, Some(addr.source)));
        Ok(())
    }

    /// Persists one sealed bucket into the dataset's output directory.
    pub fn persist(&self, addr: &BucketAddr, outdir: impl AsRef<Path>) -> Result<(), StoreError> {
        let outdir: &Path = outdir.as_ref();
        if let Err(err) = fs::create_dir_all(outdir) { return Err(StoreError::DirCreateError{ path: outdir.into(), err }); }

        let target: PathBuf = outdir.join(format!("{}-{}-{}.bucket", addr.dataset, addr.source, addr.split));
        match fs::copy(self.bucket_path(addr), &target) {
            Ok(_)    => Ok(()),
            Err(err) => Err(StoreError::PersistError{ addr: *addr, path: target, err }),
        }
    }

    /// Deletes all buckets of the given task, remembering the deletion for HTTP 410.
    pub fn delete_task(&self, coord: TaskCoord) -> Result<(), StoreError> {
        let dir: PathBuf = self.task_dir(coord.dataset, coord.split);
        self.deleted.lock().unwrap().insert((coord.dataset, Some(coord.split)));
        match fs::remove_dir_all(&dir) {
            Ok(_)    => Ok(()),
            Err(err) => if err.kind() == std::io::ErrorKind::NotFound { Ok(()) } else { Err(StoreError::DirRemoveError{ path: dir, err }) },
        }
    }

    /// Deletes all buckets of the given dataset, remembering the deletion for HTTP 410.
    pub fn delete_dataset(&self, dataset: DatasetId) -> Result<(), StoreError> {
        let dir: PathBuf = self.root.join(dataset.to_string());
        self.deleted.lock().unwrap().insert((dataset, None));
        match fs::remove_dir_all(&dir) {
            Ok(_)    => Ok(()),
            Err(err) => if err.kind() == std::io::ErrorKind::NotFound { Ok(()) } else { Err(StoreError::DirRemoveError{ path: dir, err }) },
        }
    }

    /// Measures the total on-disk working set of this store, in bytes.
    pub fn usage(&self) -> Result<u64, StoreError> {
        match harrow_shr::fs::dir_size(&self.root) {
            Ok(size) => Ok(size),
            Err(err) => Err(StoreError::UsageError{ path: self.root.clone(), err }),
        }
    }

    /// Removes the entire store from disk.
    pub fn clean(&self) -> Result<(), StoreError> {
        match harrow_shr::fs::clean_dir(&self.root) {
            Ok(_)    => Ok(()),
            Err(err) => Err(StoreError::DirRemoveError{ path: self.root.clone(), err }),
        }
    }
}


/***** TESTS *****/
#[cfg(test)]
mod tests {
    use specifications::data::JobId;

    use super::*;
    use crate::frame::decode_records;

    fn store() -> (tempfile::TempDir, BucketStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BucketStore::new(dir.path(), JobId::generate());
        (dir, store)
    }

    #[test]
    fn write_seal_read() {
        let (_dir, store) = store();
        let coord = TaskCoord::new(DatasetId(1), 0);

        let mut writer = store.create(coord, 0, 2).unwrap();
        writer.write(b"a", b"1").unwrap();
        writer.write(b"b", b"2").unwrap();
        writer.finish().unwrap();

        // Unsealed buckets are not visible
        let addr = BucketAddr::new(DatasetId(1), 0, 2);
        assert!(matches!(store.read(&addr), Err(ReadError::NotFound{ .. })));

        store.seal(coord, 0).unwrap();
        let raw = store.read(&addr).unwrap();
        assert_eq!(decode_records(&raw).unwrap(), vec![(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())]);
    }

    #[test]
    fn seal_keeps_first_completion() {
        let (_dir, store) = store();
        let coord = TaskCoord::new(DatasetId(1), 0);
        let addr = BucketAddr::new(DatasetId(1), 0, 0);

        let mut writer = store.create(coord, 0, 0).unwrap();
        writer.write(b"first", b"").unwrap();
        writer.finish().unwrap();
        store.seal(coord, 0).unwrap();

        let mut writer = store.create(coord, 1, 0).unwrap();
        writer.write(b"second", b"").unwrap();
        writer.finish().unwrap();
        store.seal(coord, 1).unwrap();

        let records = decode_records(&store.read(&addr).unwrap()).unwrap();
        assert_eq!(records[0].0, b"first".to_vec());
        assert!(!store.attempt_dir(coord, 1).exists());
    }

    #[test]
    fn delete_task_tombstones() {
        let (_dir, store) = store();
        let coord = TaskCoord::new(DatasetId(2), 1);
        let addr = BucketAddr::new(DatasetId(2), 1, 0);

        let writer = store.create(coord, 0, 0).unwrap();
        writer.finish().unwrap();
        store.seal(coord, 0).unwrap();

        store.delete_task(coord).unwrap();
        assert!(matches!(store.read(&addr), Err(ReadError::Gone{ .. })));

        // A replica write revives the address
        store.store_fetched(&addr, &[]).unwrap();
        assert!(store.read(&addr).is_ok());
    }

    #[test]
    fn discard_removes_attempt() {
        let (_dir, store) = store();
        let coord = TaskCoord::new(DatasetId(3), 0);
        let mut writer = store.create(coord, 2, 0).unwrap();
        writer.write(b"x", b"y").unwrap();
        writer.finish().unwrap();

        store.discard(coord, 2).unwrap();
        assert!(matches!(store.read(&BucketAddr::new(DatasetId(3), 0, 0)), Err(ReadError::NotFound{ .. })));
        assert_eq!(store.usage().unwrap(), 0);
    }
}
