// Toolflow — Run log
//
// Append-only record of tool invocations, one line per call:
//
//   2026-10-16T09:12:44.120+02:00 - 6f1c...-9a3e - github__list_issues
//
// Lines sharing a run id belong to one execution of a workflow or tool chain.

use chrono::{DateTime, FixedOffset, Local};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

const SEPARATOR: &str = " - ";

#[derive(Error, Debug)]
pub enum RunLogError {
    #[error("run log I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed run log line: {0:?}")]
    Malformed(String),
    #[error("bad timestamp in run log line: {0}")]
    Timestamp(#[from] chrono::ParseError),
    #[error("bad run id in run log line: {0}")]
    RunId(#[from] uuid::Error),
    #[error("tool name {0:?} is empty or contains control characters")]
    InvalidToolName(String),
}

/// A single tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub timestamp: DateTime<FixedOffset>,
    pub run_id: Uuid,
    pub tool_name: String,
}

impl RunRecord {
    pub fn now(run_id: Uuid, tool_name: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now().fixed_offset(),
            run_id,
            tool_name: tool_name.into(),
        }
    }
}

impl fmt::Display for RunRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            self.timestamp.to_rfc3339(),
            self.run_id.hyphenated(),
            self.tool_name
        )
    }
}

impl FromStr for RunRecord {
    type Err = RunLogError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.trim_end_matches(['\r', '\n']).splitn(3, SEPARATOR);
        let (Some(ts), Some(id), Some(tool)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(RunLogError::Malformed(line.to_string()));
        };
        let tool = tool.trim();
        if tool.is_empty() {
            return Err(RunLogError::Malformed(line.to_string()));
        }
        Ok(Self {
            timestamp: DateTime::parse_from_rfc3339(ts.trim())?,
            run_id: Uuid::parse_str(id.trim())?,
            tool_name: tool.to_string(),
        })
    }
}

/// All invocations that share one run id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub run_id: Uuid,
    pub started_at: DateTime<FixedOffset>,
    pub finished_at: DateTime<FixedOffset>,
    pub tools: Vec<String>,
}

/// Group records by run id, keeping first-appearance order.
pub fn group_runs(records: &[RunRecord]) -> Vec<Run> {
    let mut runs: Vec<Run> = Vec::new();
    for rec in records {
        match runs.iter_mut().find(|r| r.run_id == rec.run_id) {
            Some(run) => {
                run.tools.push(rec.tool_name.clone());
                run.started_at = run.started_at.min(rec.timestamp);
                run.finished_at = run.finished_at.max(rec.timestamp);
            }
            None => runs.push(Run {
                run_id: rec.run_id,
                started_at: rec.timestamp,
                finished_at: rec.timestamp,
                tools: vec![rec.tool_name.clone()],
            }),
        }
    }
    runs
}

#[derive(Clone)]
pub struct RunLogger {
    path: PathBuf,
    writer: Arc<Mutex<()>>, // serializes appends
}

impl RunLogger {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            writer: Arc::new(Mutex::new(())),
        }
    }

    pub async fn log(&self, run_id: Uuid, tool_name: &str) -> Result<RunRecord, RunLogError> {
        let record = RunRecord::now(run_id, tool_name);
        self.append(&record).await?;
        Ok(record)
    }

    /// Append one record. Tool names must be non-empty and free of control
    /// characters so each record stays on one parseable line.
    pub async fn append(&self, record: &RunRecord) -> Result<(), RunLogError> {
        let name = &record.tool_name;
        if name.trim().is_empty() || name.chars().any(char::is_control) {
            return Err(RunLogError::InvalidToolName(name.clone()));
        }
        let line = format!("{}\n", record);

        let _guard = self.writer.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;

        tracing::trace!(run_id = %record.run_id, tool = %record.tool_name, "Run log appended");
        Ok(())
    }

    pub fn get_path(&self) -> &Path {
        &self.path
    }

    /// Read every well-formed record. Malformed lines are skipped; a missing
    /// file reads as empty.
    pub fn read_records(&self) -> Result<Vec<RunRecord>, RunLogError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<RunRecord>() {
                Ok(rec) => records.push(rec),
                Err(e) => {
                    tracing::warn!(line = lineno + 1, error = %e, "Skipping run log line");
                }
            }
        }
        Ok(records)
    }

    pub fn runs(&self) -> Result<Vec<Run>, RunLogError> {
        Ok(group_runs(&self.read_records()?))
    }

    pub fn run(&self, run_id: Uuid) -> Result<Option<Run>, RunLogError> {
        Ok(self.runs()?.into_iter().find(|r| r.run_id == run_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_line() {
        let record = RunRecord {
            timestamp: DateTime::parse_from_rfc3339("2024-05-01T10:00:00+02:00").unwrap(),
            run_id: Uuid::parse_str("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap(),
            tool_name: "github__star_repo".into(),
        };
        assert_eq!(
            record.to_string(),
            "2024-05-01T10:00:00+02:00 - 67e55044-10b1-426f-9247-bb680e5fe0c8 - github__star_repo"
        );
    }

    #[test]
    fn test_parse_keeps_offset() {
        let rec: RunRecord =
            "2024-05-01T10:00:00.5-07:00 - 67e55044-10b1-426f-9247-bb680e5fe0c8 - notion__search"
                .parse()
                .unwrap();
        assert_eq!(rec.timestamp.offset().local_minus_utc(), -7 * 3600);
        assert_eq!(rec.tool_name, "notion__search");
    }

    #[test]
    fn test_parse_tool_name_with_separator() {
        let rec: RunRecord =
            "2024-05-01T10:00:00+00:00 - 67e55044-10b1-426f-9247-bb680e5fe0c8 - odd - name"
                .parse()
                .unwrap();
        assert_eq!(rec.tool_name, "odd - name");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            "just text".parse::<RunRecord>(),
            Err(RunLogError::Malformed(_))
        ));
        assert!(matches!(
            "yesterday - 67e55044-10b1-426f-9247-bb680e5fe0c8 - x".parse::<RunRecord>(),
            Err(RunLogError::Timestamp(_))
        ));
        assert!(matches!(
            "2024-05-01T10:00:00+00:00 - not-a-uuid - x".parse::<RunRecord>(),
            Err(RunLogError::RunId(_))
        ));
        assert!(matches!(
            "2024-05-01T10:00:00+00:00 - 67e55044-10b1-426f-9247-bb680e5fe0c8 -  ".parse::<RunRecord>(),
            Err(RunLogError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_append_and_group() {
        let tmp = TempDir::new().unwrap();
        let logger = RunLogger::new(tmp.path().join("logs").join("runs.log"));

        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        logger.log(first, "github__get_readme").await.unwrap();
        logger.log(second, "slack__post_message").await.unwrap();
        logger.log(first, "notion__create_page").await.unwrap();

        let runs = logger.runs().unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, first);
        assert_eq!(
            runs[0].tools,
            vec!["github__get_readme", "notion__create_page"]
        );
        assert!(runs[0].started_at <= runs[0].finished_at);
        assert_eq!(runs[1].tools, vec!["slack__post_message"]);
        assert_eq!(logger.run(second).unwrap().unwrap().tools.len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_tool_names_that_break_lines() {
        let tmp = TempDir::new().unwrap();
        let logger = RunLogger::new(tmp.path().join("runs.log"));
        let run_id = Uuid::new_v4();

        for bad in ["evil\n2024-05-01T10:00:00+00:00 - x - y", "tab\there", "  "] {
            assert!(matches!(
                logger.log(run_id, bad).await,
                Err(RunLogError::InvalidToolName(_))
            ));
        }
        assert!(logger.read_records().unwrap().is_empty());

        logger.log(run_id, "github__get_readme").await.unwrap();
        assert_eq!(logger.read_records().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_skips_garbage_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("runs.log");
        std::fs::write(
            &path,
            "garbage\n\n2024-05-01T10:00:00+00:00 - 67e55044-10b1-426f-9247-bb680e5fe0c8 - a\n",
        )
        .unwrap();
        let logger = RunLogger::new(path);
        logger.log(Uuid::new_v4(), "b").await.unwrap();

        let records = logger.read_records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].tool_name, "a");
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let tmp = TempDir::new().unwrap();
        let logger = RunLogger::new(tmp.path().join("absent.log"));
        assert!(logger.read_records().unwrap().is_empty());
        assert_eq!(logger.get_path(), tmp.path().join("absent.log").as_path());
    }
}
