//! JSONL reading and writing of task records.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use crate::error::DispatchError;
use crate::task::{Task, DEFAULT_TIMEOUT_BUILD, DEFAULT_TIMEOUT_TEST};

/// Reads tasks from a JSONL file with the default timeouts.
pub fn read_tasks(path: &Path) -> Result<Vec<Task>, DispatchError> {
    read_tasks_with_timeouts(path, DEFAULT_TIMEOUT_BUILD, DEFAULT_TIMEOUT_TEST)
}

/// Reads tasks from a JSONL file. Records without `timeout_build` or
/// `timeout_test` get the given values.
///
/// Blank lines are ignored. Lines that are not valid task records are
/// logged and skipped so one corrupt record does not stop a batch.
pub fn read_tasks_with_timeouts(
    path: &Path,
    timeout_build: u64,
    timeout_test: u64,
) -> Result<Vec<Task>, DispatchError> {
    let reader = BufReader::new(File::open(path)?);
    let mut tasks = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed = serde_json::from_str::<Value>(&line).and_then(|mut value| {
            if let Value::Object(record) = &mut value {
                record
                    .entry("timeout_build")
                    .or_insert_with(|| timeout_build.into());
                record
                    .entry("timeout_test")
                    .or_insert_with(|| timeout_test.into());
            }
            serde_json::from_value::<Task>(value)
        });
        match parsed {
            Ok(task) => tasks.push(task),
            Err(e) => tracing::warn!(
                path = %path.display(),
                line = index + 1,
                error = %e,
                "Skipping malformed task record"
            ),
        }
    }

    tracing::info!(path = %path.display(), count = tasks.len(), "Loaded tasks");
    Ok(tasks)
}

/// `task_id` values already present in an output file. A missing file
/// yields an empty set.
pub fn completed_ids(path: &Path) -> Result<HashSet<String>, DispatchError> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut ids = HashSet::new();
    for line in reader.lines() {
        let line = line?;
        // A partially written last line is not a completed record.
        let Ok(value) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        if let Some(id) = value.get("task_id").and_then(Value::as_str) {
            ids.insert(id.to_string());
        }
    }
    Ok(ids)
}

/// Line-oriented JSON writer. Every record is flushed as soon as it is
/// written, so an interrupted batch leaves only complete lines behind.
pub struct JsonlWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    written: usize,
}

impl JsonlWriter {
    /// Opens `path`, appending when `append` is set and truncating otherwise.
    pub fn open(path: &Path, append: bool) -> Result<Self, DispatchError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let ends_mid_line = append
            && fs::read(path)
                .map(|bytes| bytes.last().is_some_and(|b| *b != b'\n'))
                .unwrap_or(false);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)?;
        let mut writer = BufWriter::new(file);
        // Terminate a line cut short by an interrupted run.
        if ends_mid_line {
            writeln!(writer)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            written: 0,
        })
    }

    pub fn write_record<T: Serialize>(&mut self, record: &T) -> Result<(), DispatchError> {
        let line = serde_json::to_string(record)?;
        writeln!(self.writer, "{}", line)?;
        self.writer.flush()?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
