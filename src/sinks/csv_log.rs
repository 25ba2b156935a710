//! Persistent CSV record log.
//!
//! One file per test run, named `<base>_<stamp><ext>` inside the configured
//! output directory. Files are never overwritten: a name already taken gets
//! a `_01`, `_02`, ... suffix. Rows are flushed as they are written so the
//! file is usable while a test is still running.

use async_trait::async_trait;
use serde::Serialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info};

use super::RecordSink;
use crate::config::LogConfig;
use crate::error::{AppResult, DaqError};
use crate::protocol::Record;

/// Column names, in order.
pub const CSV_HEADER: [&str; 14] = [
    "Timestamp",
    "Status",
    "Cycles",
    "Position_1_mm",
    "Force_Lower_N",
    "Travel_1_mm",
    "Position_2_mm",
    "Force_Upper_N",
    "Travel_2_mm",
    "Travel_at_Upper_mm",
    "Loss_of_Stiffness_Percent",
    "Error_Code",
    "Error_Description",
    "Raw_Data",
];

const ROW_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
const MAX_NAME_SUFFIX: u32 = 999;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogStats {
    /// Log being appended to, if any.
    pub current_file: Option<PathBuf>,
    /// Data rows in the current log.
    pub rows_written: u64,
}

/// Appends one CSV row per record to a timestamped log file.
pub struct CsvLogSink {
    config: LogConfig,
    writer: Option<csv::Writer<File>>,
    current: Option<PathBuf>,
    rows_written: u64,
}

impl CsvLogSink {
    /// No file is created until the first record or [`start_new_log`](Self::start_new_log).
    pub fn new(config: LogConfig) -> Self {
        Self {
            config,
            writer: None,
            current: None,
            rows_written: 0,
        }
    }

    /// Directory logs are written to.
    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    /// Path of the open log.
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    /// Current file and row count.
    pub fn stats(&self) -> LogStats {
        LogStats {
            current_file: self.current.clone(),
            rows_written: self.rows_written,
        }
    }

    /// Close the current file (if any) and open a fresh one with a header row.
    pub fn start_new_log(&mut self) -> AppResult<PathBuf> {
        self.close_log()?;
        fs::create_dir_all(&self.config.output_dir)?;

        let stamp = chrono::Local::now().format(&self.config.timestamp_format);
        let stem = format!("{}_{}", self.config.base_filename, stamp);
        let path = unique_path(&self.config.output_dir, &stem, &self.config.file_extension)?;

        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(CSV_HEADER)?;
        writer.flush()?;

        info!(path = %path.display(), "started new log file");
        self.writer = Some(writer);
        self.current = Some(path.clone());
        self.rows_written = 0;
        Ok(path)
    }

    /// Finish the current file and start the next one.
    pub fn rotate(&mut self) -> AppResult<PathBuf> {
        self.start_new_log()
    }

    /// Flush and close the current file. The path stays available for
    /// [`save_as`](Self::save_as).
    pub fn close_log(&mut self) -> AppResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            debug!(rows = self.rows_written, "log file closed");
        }
        Ok(())
    }

    /// Append one row, opening a log file first if none is open.
    pub fn append(&mut self, record: &Record) -> AppResult<()> {
        if self.writer.is_none() {
            self.start_new_log()?;
        }
        let Some(writer) = self.writer.as_mut() else {
            return Err(DaqError::NoActiveLog);
        };

        let row = [
            record.captured_at.format(ROW_TIMESTAMP_FORMAT).to_string(),
            record.status.to_string(),
            record.cycle_count.to_string(),
            record.position_1.to_string(),
            record.force_lower.to_string(),
            record.travel_1.to_string(),
            record.position_2.to_string(),
            record.force_upper.to_string(),
            record.travel_2.to_string(),
            record.travel_at_upper.to_string(),
            format!("{:.2}", record.loss_of_stiffness_percent()),
            record.error_code.to_string(),
            record.error_description().into_owned(),
            record.raw_text.clone(),
        ];
        writer.write_record(&row)?;
        writer.flush()?;
        self.rows_written += 1;
        Ok(())
    }

    /// Copy the current log to `name` in the output directory.
    ///
    /// The configured extension is added when `name` has none; an existing
    /// file is never replaced.
    pub fn save_as(&mut self, name: &str) -> AppResult<PathBuf> {
        let source = self.current.clone().ok_or(DaqError::NoActiveLog)?;
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }

        let requested = Path::new(name);
        let stem = requested
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.config.base_filename.clone());
        let extension = match requested.extension() {
            Some(ext) => format!(".{}", ext.to_string_lossy()),
            None => self.config.file_extension.clone(),
        };

        let target = unique_path(&self.config.output_dir, &stem, &extension)?;
        fs::copy(&source, &target)?;
        info!(from = %source.display(), to = %target.display(), "log saved");
        Ok(target)
    }

    /// Log files in the output directory, newest first.
    pub fn list_log_files(&self) -> AppResult<Vec<PathBuf>> {
        let dir = &self.config.output_dir;
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let wanted = self.config.file_extension.trim_start_matches('.');

        let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let matches = path
                .extension()
                .is_some_and(|ext| ext.to_string_lossy().eq_ignore_ascii_case(wanted));
            if !matches || !entry.file_type()?.is_file() {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            files.push((modified, path));
        }
        files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        Ok(files.into_iter().map(|(_, path)| path).collect())
    }
}

/// `dir/stem+ext`, or the first free `dir/stem_NN+ext`.
fn unique_path(dir: &Path, stem: &str, extension: &str) -> AppResult<PathBuf> {
    let candidate = dir.join(format!("{stem}{extension}"));
    if !candidate.exists() {
        return Ok(candidate);
    }
    for n in 1..=MAX_NAME_SUFFIX {
        let candidate = dir.join(format!("{stem}_{n:02}{extension}"));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(DaqError::Io(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("no free file name for '{stem}' in {}", dir.display()),
    )))
}

#[async_trait]
impl RecordSink for CsvLogSink {
    fn name(&self) -> &str {
        "csv_log"
    }

    async fn on_record(&mut self, record: &Arc<Record>) -> anyhow::Result<()> {
        self.append(record)?;
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.close_log()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameDecoder;
    use tempfile::TempDir;

    fn sink_in(dir: &TempDir) -> CsvLogSink {
        CsvLogSink::new(LogConfig {
            output_dir: dir.path().join("logs"),
            // literal stamp keeps names predictable
            timestamp_format: "run".to_string(),
            ..LogConfig::default()
        })
    }

    fn read_rows(path: &Path) -> Vec<csv::StringRecord> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .unwrap();
        reader.records().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn writes_header_then_rows() {
        let dir = TempDir::new().unwrap();
        let mut sink = sink_in(&dir);
        let decoder = FrameDecoder::new();

        sink.append(&decoder.decode("DTA;31422;182;263;0;793;2238;50;200;0;!").unwrap())
            .unwrap();
        sink.append(&decoder.decode("END;31423;-182;263;0;793;2238;0;611;12;!").unwrap())
            .unwrap();

        let path = sink.current_path().unwrap().to_path_buf();
        assert_eq!(path.file_name().unwrap(), "fatigue_test_run.csv");

        let rows = read_rows(&path);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].iter().collect::<Vec<_>>(), CSV_HEADER.to_vec());

        let first = &rows[1];
        assert_eq!(&first[1], "DTA");
        assert_eq!(&first[2], "31422");
        assert_eq!(&first[3], "1.82");
        assert_eq!(&first[4], "26.3");
        assert_eq!(&first[7], "223.8");
        assert_eq!(&first[8], "0.50");
        assert_eq!(&first[10], "25.00");
        assert_eq!(&first[11], "0");
        assert_eq!(&first[12], "No Error: Everything is OK");
        assert_eq!(&first[13], "DTA;31422;182;263;0;793;2238;50;200;0;!");
        // YYYY-mm-dd HH:MM:SS.mmm
        assert_eq!(first[0].len(), 23);

        let second = &rows[2];
        assert_eq!(&second[1], "END");
        assert_eq!(&second[3], "-1.82");
        assert_eq!(&second[11], "12");
        assert!(second[12].starts_with("Additional Path 2 Violation"));

        assert_eq!(sink.stats().rows_written, 2);
    }

    #[test]
    fn never_overwrites_existing_logs() {
        let dir = TempDir::new().unwrap();
        let mut sink = sink_in(&dir);

        let first = sink.start_new_log().unwrap();
        let second = sink.rotate().unwrap();
        let third = sink.rotate().unwrap();

        assert_eq!(first.file_name().unwrap(), "fatigue_test_run.csv");
        assert_eq!(second.file_name().unwrap(), "fatigue_test_run_01.csv");
        assert_eq!(third.file_name().unwrap(), "fatigue_test_run_02.csv");
        assert_eq!(sink.stats().rows_written, 0);
        assert_eq!(sink.list_log_files().unwrap().len(), 3);
    }

    #[test]
    fn save_as_copies_current_log() {
        let dir = TempDir::new().unwrap();
        let mut sink = sink_in(&dir);
        assert!(matches!(sink.save_as("specimen_a"), Err(DaqError::NoActiveLog)));

        let record = FrameDecoder::new()
            .decode("DTA;1;182;263;0;793;2238;0;611;0;!")
            .unwrap();
        sink.append(&record).unwrap();

        let saved = sink.save_as("specimen_a").unwrap();
        assert_eq!(saved.file_name().unwrap(), "specimen_a.csv");
        assert_eq!(read_rows(&saved).len(), 2);

        let again = sink.save_as("specimen_a.csv").unwrap();
        assert_eq!(again.file_name().unwrap(), "specimen_a_01.csv");

        // logging continues into the original file
        sink.append(&record).unwrap();
        assert_eq!(read_rows(sink.current_path().unwrap()).len(), 3);
    }

    #[test]
    fn list_is_newest_first_and_filters_extension() {
        let dir = TempDir::new().unwrap();
        let mut sink = sink_in(&dir);
        assert!(sink.list_log_files().unwrap().is_empty());

        let older = sink.start_new_log().unwrap();
        let newer = sink.rotate().unwrap();
        let past = SystemTime::now() - std::time::Duration::from_secs(3600);
        File::options()
            .write(true)
            .open(&older)
            .unwrap()
            .set_modified(past)
            .unwrap();
        fs::write(dir.path().join("logs").join("notes.txt"), "x").unwrap();

        assert_eq!(sink.list_log_files().unwrap(), vec![newer, older]);
    }

    #[tokio::test]
    async fn sink_opens_log_lazily_and_closes() {
        let dir = TempDir::new().unwrap();
        let mut sink = sink_in(&dir);
        assert!(sink.current_path().is_none());

        let record = Arc::new(
            FrameDecoder::new()
                .decode("DTA;1;182;263;0;793;2238;0;611;0;!")
                .unwrap(),
        );
        sink.on_record(&record).await.unwrap();
        RecordSink::close(&mut sink).await.unwrap();

        let path = sink.current_path().unwrap();
        assert_eq!(read_rows(path).len(), 2);
        assert_eq!(sink.stats().rows_written, 1);
    }
}
