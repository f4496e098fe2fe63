use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::domain::{
    models::Task,
    ports::outbound::{ExpandedNodes, LocalStore, RunningTimers},
    StoreError,
};

const TASKS_FILE: &str = "tasks.json";
const EXPANDED_FILE: &str = "expanded.json";
const RUNNING_FILE: &str = "running_timers.json";

/// Local store backed by one JSON file per value in a directory.
///
/// Each save writes a temporary sibling and renames it over the target,
/// so a crash mid-write leaves the previous file intact.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, StoreError> {
        let path = self.dir.join(name);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn write<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!(".{name}.tmp"));

        let raw = serde_json::to_vec_pretty(value)?;
        write_private(&tmp, &raw)?;
        fs::rename(&tmp, &path)?;

        debug!(path = %path.display(), bytes = raw.len(), "Wrote local store file");
        Ok(())
    }
}

fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path)?;
    file.write_all(content)?;
    file.sync_all()
}

impl LocalStore for FileStore {
    fn load_tasks(&self) -> Result<Option<Vec<Task>>, StoreError> {
        self.read(TASKS_FILE)
    }

    fn save_tasks(&self, tasks: &[Task]) -> Result<(), StoreError> {
        self.write(TASKS_FILE, tasks)
    }

    fn load_expanded(&self) -> Result<Option<ExpandedNodes>, StoreError> {
        self.read(EXPANDED_FILE)
    }

    fn save_expanded(&self, expanded: &ExpandedNodes) -> Result<(), StoreError> {
        self.write(EXPANDED_FILE, expanded)
    }

    fn load_running_timers(&self) -> Result<Option<RunningTimers>, StoreError> {
        self.read(RUNNING_FILE)
    }

    fn save_running_timers(&self, timers: &RunningTimers) -> Result<(), StoreError> {
        self.write(RUNNING_FILE, timers)
    }
}
