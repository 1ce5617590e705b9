use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::info;
use uuid::Uuid;

use crate::error::{HConductorError, Result};
use crate::task::{Queue, TaskStatus};

/// File of record for the task queue. Every read-modify-write sequence holds
/// an exclusive advisory lock for its full duration; loads take a shared lock.
/// Writes land via a sibling temp file plus rename so no reader ever observes
/// a torn document.
pub struct QueueStore {
    path: PathBuf,
}

impl QueueStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<Queue> {
        let file = OpenOptions::new()
            .read(true)
            .open(&self.path)
            .map_err(|e| HConductorError::resource(format!("opening queue: {e}")))?;
        file.lock_shared()
            .map_err(|e| HConductorError::resource(format!("locking queue for read: {e}")))?;

        let mut contents = String::new();
        let mut reader = &file;
        reader
            .read_to_string(&mut contents)
            .map_err(|e| HConductorError::resource(format!("reading queue: {e}")))?;
        FileExt::unlock(&file).ok();

        let queue: Queue = serde_json::from_str(&contents)?;
        queue.validate()?;
        Ok(queue)
    }

    pub fn save(&self, queue: &Queue) -> Result<()> {
        queue.validate()?;
        let lock_file = self.open_or_create_for_lock()?;
        lock_file
            .lock_exclusive()
            .map_err(|e| HConductorError::resource(format!("locking queue for write: {e}")))?;
        let result = self.write_atomic(queue);
        FileExt::unlock(&lock_file).ok();
        result
    }

    pub fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        let lock_file = self.open_or_create_for_lock()?;
        lock_file.lock_exclusive().map_err(|e| {
            HConductorError::resource(format!("locking queue for status update: {e}"))
        })?;

        let result = (|| -> Result<()> {
            let mut contents = String::new();
            File::open(&self.path)?.read_to_string(&mut contents)?;
            let mut queue: Queue = serde_json::from_str(&contents)?;

            {
                let task = queue
                    .get_mut(id)
                    .ok_or_else(|| HConductorError::contract(format!("task not found: {id}")))?;
                task.status = status;
            }

            self.write_atomic(&queue)
        })();

        FileExt::unlock(&lock_file).ok();
        result
    }

    fn open_or_create_for_lock(&self) -> Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.path)
            .map_err(|e| HConductorError::resource(format!("opening queue lock file: {e}")))
    }

    /// Writes to a sibling temp file in the same directory, then renames over
    /// the original. Rename is atomic on the same filesystem, so a concurrent
    /// reader sees either the old or the new content, never a partial write.
    fn write_atomic(&self, queue: &Queue) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let tmp_path = dir.join(format!(".queue-{}.tmp", Uuid::new_v4()));

        let json = serde_json::to_string_pretty(queue)?;
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(json.as_bytes())?;
            tmp.sync_all()?;
        }

        std::fs::rename(&tmp_path, &self.path)?;
        info!(path = %self.path.display(), "queue persisted");
        Ok(())
    }
}
