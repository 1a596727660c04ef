use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use tokio::sync::mpsc;

use crate::stage::{LogLevel, LogRecord};

/// A single-threaded fabric that owns every open per-model log file handle
/// and drains one mpsc channel. No stage ever opens a log file directly --
/// every `LogRecord` flows through the engine into this fabric.
pub struct LogFabric {
    rx: mpsc::Receiver<LogRecord>,
    log_dir: PathBuf,
    batch_timestamp: String,
    files: BTreeMap<String, std::fs::File>,
    use_color: bool,
}

impl LogFabric {
    pub fn new(rx: mpsc::Receiver<LogRecord>, log_dir: PathBuf) -> Self {
        Self {
            rx,
            log_dir,
            batch_timestamp: Utc::now().format("%Y%m%dT%H%M%SZ").to_string(),
            files: BTreeMap::new(),
            use_color: std::io::stdout().is_terminal(),
        }
    }

    /// Write the `_task_info` aggregate log naming the ordered stage list
    /// chosen for every model in the batch.
    pub fn write_task_info(&self, entries: &[(String, Vec<String>)]) -> Result<()> {
        std::fs::create_dir_all(&self.log_dir)
            .with_context(|| format!("creating log directory {}", self.log_dir.display()))?;
        let path = self.log_dir.join("_task_info");
        let mut file = std::fs::File::create(&path)
            .with_context(|| format!("creating {}", path.display()))?;
        for (model_name, stages) in entries {
            writeln!(file, "{model_name}: {}", stages.join(" -> "))?;
        }
        Ok(())
    }

    fn file_for(&mut self, model_name: &str) -> Result<&mut std::fs::File> {
        if !self.files.contains_key(model_name) {
            std::fs::create_dir_all(&self.log_dir)
                .with_context(|| format!("creating log directory {}", self.log_dir.display()))?;
            let path = log_file_path(&self.log_dir, &self.batch_timestamp, model_name);
            let file = std::fs::File::create(&path)
                .with_context(|| format!("creating {}", path.display()))?;
            self.files.insert(model_name.to_string(), file);
        }
        Ok(self.files.get_mut(model_name).unwrap())
    }

    /// Drain the channel until every sender has dropped, appending each
    /// record to its model's file sink and forwarding it to the process
    /// tracing log at `debug` level.
    pub async fn run(mut self) {
        while let Some(record) = self.rx.recv().await {
            self.emit(&record);
        }
    }

    fn emit(&mut self, record: &LogRecord) {
        let line = format_line(record);

        match self.file_for(&record.model_name) {
            Ok(file) => {
                if let Err(e) = writeln!(file, "{line}") {
                    tracing::warn!(model = %record.model_name, error = %e, "failed to write log record");
                }
            }
            Err(e) => {
                tracing::warn!(model = %record.model_name, error = %e, "failed to open log file");
            }
        }

        print_to_terminal(record, self.use_color);

        tracing::debug!(
            model = %record.model_name,
            level = %record.level,
            "{}",
            record.message
        );
    }
}

fn log_file_path(log_dir: &Path, batch_timestamp: &str, model_name: &str) -> PathBuf {
    log_dir.join(format!("{batch_timestamp}_{model_name}.log"))
}

fn format_line(record: &LogRecord) -> String {
    let timestamp = Utc::now().to_rfc3339();
    match &record.extended {
        Some(extended) => format!(
            "{timestamp} {} {} -- {}",
            record.level, record.message, extended
        ),
        None => format!("{timestamp} {} {}", record.level, record.message),
    }
}

fn print_to_terminal(record: &LogRecord, use_color: bool) {
    let prefix = format!("[{}]", record.model_name);
    if use_color {
        match record.level {
            LogLevel::Info => println!("{} {}", prefix.cyan(), record.message),
            LogLevel::Error => println!("{} {}", prefix.red(), record.message.red()),
        }
    } else {
        println!("{prefix} {}: {}", record.level, record.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_path_is_timestamp_then_model_name() {
        let path = log_file_path(Path::new("/var/log/models"), "20260727T120000Z", "stand_ner_ru");
        assert_eq!(
            path,
            Path::new("/var/log/models/20260727T120000Z_stand_ner_ru.log")
        );
    }

    #[test]
    fn format_line_includes_extended_info_when_present() {
        let record = LogRecord {
            model_name: "stand_ner_ru".to_string(),
            level: LogLevel::Info,
            message: "stage finished".to_string(),
            extended: Some("elapsed: 1.2s".to_string()),
        };
        let line = format_line(&record);
        assert!(line.contains("stage finished"));
        assert!(line.contains("elapsed: 1.2s"));
        assert!(line.contains("INFO"));
    }

    #[test]
    fn format_line_without_extended_info() {
        let record = LogRecord {
            model_name: "stand_ner_ru".to_string(),
            level: LogLevel::Error,
            message: "boom".to_string(),
            extended: None,
        };
        let line = format_line(&record);
        assert!(!line.contains("--"));
        assert!(line.contains("ERROR"));
    }

    #[tokio::test]
    async fn per_model_logs_contain_only_that_models_records() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel(16);
        let mut fabric = LogFabric::new(rx, dir.path().to_path_buf());

        tx.send(LogRecord {
            model_name: "a_model".to_string(),
            level: LogLevel::Info,
            message: "from a".to_string(),
            extended: None,
        })
        .await
        .unwrap();
        tx.send(LogRecord {
            model_name: "b_model".to_string(),
            level: LogLevel::Info,
            message: "from b".to_string(),
            extended: None,
        })
        .await
        .unwrap();
        drop(tx);

        while let Some(record) = fabric.rx.recv().await {
            fabric.emit(&record);
        }

        let a_path = log_file_path(dir.path(), &fabric.batch_timestamp, "a_model");
        let b_path = log_file_path(dir.path(), &fabric.batch_timestamp, "b_model");
        let a_content = std::fs::read_to_string(a_path).unwrap();
        let b_content = std::fs::read_to_string(b_path).unwrap();

        assert!(a_content.contains("from a"));
        assert!(!a_content.contains("from b"));
        assert!(b_content.contains("from b"));
        assert!(!b_content.contains("from a"));
    }
}
