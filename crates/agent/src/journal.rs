//! Daily Markdown reports of study activity.
//!
//! One file per day at `<dir>/<YYYY-MM-DD>.md`, each entry a `- ` bullet.
//! Writes run on the blocking pool.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use tokio::sync::Mutex;
use tracing::warn;

pub struct StudyJournal {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl StudyJournal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn report_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.md", date.format("%Y-%m-%d")))
    }

    pub fn today_path(&self) -> PathBuf {
        self.report_path(Local::now().date_naive())
    }

    pub async fn log_activity(&self, kind: &str, detail: &str) {
        self.append(&format!("[{kind}] {detail}")).await;
    }

    /// Record a clarification the model asked for while studying.
    pub async fn log_confusion(&self, topic: &str, reason: &str) {
        self.append(&format!("[confusion] {topic}: {reason}")).await;
    }

    /// Number of entries in the report for `date`. A missing report has none.
    pub fn entry_count(&self, date: NaiveDate) -> usize {
        std::fs::read_to_string(self.report_path(date))
            .map(|text| text.lines().filter(|l| l.starts_with("- ")).count())
            .unwrap_or(0)
    }

    async fn append(&self, entry: &str) {
        let _guard = self.write_lock.lock().await;
        let now = Local::now();
        let date = now.date_naive();
        let path = self.report_path(date);
        let line = format!("- {} {}", now.format("%H:%M:%S"), one_line(entry));

        let target = path.clone();
        match tokio::task::spawn_blocking(move || write_entry(&target, date, &line)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(path = %path.display(), error = %e, "Failed to write study report"),
            Err(e) => warn!(error = %e, "Study report task failed"),
        }
    }
}

fn write_entry(path: &Path, date: NaiveDate, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let fresh = !path.exists();
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if fresh {
        writeln!(file, "# Study report {}\n", date.format("%Y-%m-%d"))?;
    }
    writeln!(file, "{line}")
}

fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_land_in_todays_report() {
        let dir = tempfile::tempdir().unwrap();
        let journal = StudyJournal::new(dir.path().join("reports"));
        journal.log_activity("research_topic", "tokio:\nscheduler internals").await;
        journal.log_confusion("petgraph", "which version?").await;

        let today = Local::now().date_naive();
        assert_eq!(journal.entry_count(today), 2);
        let text = std::fs::read_to_string(journal.today_path()).unwrap();
        assert!(text.starts_with("# Study report"));
        assert!(text.contains("[research_topic] tokio: scheduler internals"));
        assert!(text.contains("[confusion] petgraph: which version?"));
    }

    #[tokio::test]
    async fn concurrent_entries_share_one_header() {
        let dir = tempfile::tempdir().unwrap();
        let journal = std::sync::Arc::new(StudyJournal::new(dir.path()));
        let writers: Vec<_> = (0..8)
            .map(|i| {
                let journal = std::sync::Arc::clone(&journal);
                tokio::spawn(async move { journal.log_activity("research_topic", &format!("topic {i}")).await })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        let text = std::fs::read_to_string(journal.today_path()).unwrap();
        assert_eq!(text.matches("# Study report").count(), 1);
        assert_eq!(journal.entry_count(Local::now().date_naive()), 8);
    }

    #[test]
    fn missing_report_counts_zero() {
        let dir = tempfile::tempdir().unwrap();
        let journal = StudyJournal::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        assert_eq!(journal.entry_count(date), 0);
    }
}
