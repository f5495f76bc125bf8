use crate::config::Config;
use chrono::{NaiveDate, Utc};
use std::{
    collections::VecDeque,
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

/// Bounded buffer of the most recent log lines, shared with the HTTP layer.
#[derive(Clone, Debug)]
pub struct LogRing {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(4096)))),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, line: impl Into<String>) {
        let mut lines = lock(&self.lines);
        lines.push_back(line.into());
        while lines.len() > self.capacity {
            lines.pop_front();
        }
    }

    /// Up to `count` most recent lines, oldest first.
    pub fn tail(&self, count: usize) -> Vec<String> {
        let lines = lock(&self.lines);
        let skip = lines.len().saturating_sub(count);
        lines.iter().skip(skip).cloned().collect()
    }
}

/// Appends to `hookwatch-YYYY-MM-DD.log`, switching files when the date rolls.
#[derive(Debug)]
pub struct DailyLogFile {
    dir: PathBuf,
    current: Mutex<Option<(NaiveDate, File)>>,
}

impl DailyLogFile {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            current: Mutex::new(None),
        })
    }

    fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let today = Utc::now().date_naive();
        let mut current = lock(&self.current);
        let stale = !matches!(&*current, Some((date, _)) if *date == today);
        if stale {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path_for(&self.dir, today))?;
            *current = Some((today, file));
        }
        match current.as_mut() {
            Some((_, file)) => file.write_all(buf),
            None => Ok(()),
        }
    }

    fn flush(&self) -> io::Result<()> {
        match lock(&self.current).as_mut() {
            Some((_, file)) => file.flush(),
            None => Ok(()),
        }
    }
}

pub fn log_path_for(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("hookwatch-{}.log", date.format("%Y-%m-%d")))
}

pub fn today_log_path(dir: &str) -> PathBuf {
    log_path_for(Path::new(dir), Utc::now().date_naive())
}

pub struct LogGuard {
    file: Option<Arc<DailyLogFile>>,
}

impl LogGuard {
    pub fn flush(&self) {
        if let Some(file) = &self.file {
            let _ = file.flush();
        }
    }
}

struct MultiWriter {
    stdout: io::Stdout,
    file: Option<Arc<DailyLogFile>>,
    ring: LogRing,
}

impl MultiWriter {
    fn new(file: Option<Arc<DailyLogFile>>, ring: LogRing) -> Self {
        Self {
            stdout: io::stdout(),
            file,
            ring,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stdout.write_all(buf);
        if let Some(file) = &self.file {
            let _ = file.write_all(buf);
        }
        for line in String::from_utf8_lossy(buf).lines() {
            if !line.trim().is_empty() {
                self.ring.push(line);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stdout.flush();
        if let Some(file) = &self.file {
            let _ = file.flush();
        }
        Ok(())
    }
}

pub fn init_logging(config: &Config, ring: LogRing) -> Option<LogGuard> {
    let level = if config.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("HOOKWATCH_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = if config.debug {
        EnvFilter::new(level)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };
    let file = match DailyLogFile::new(&config.log_dir) {
        Ok(file) => Some(Arc::new(file)),
        Err(err) => {
            eprintln!("log_file_error: {err}");
            None
        }
    };
    let guard = LogGuard { file: file.clone() };
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone(), ring.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(guard)
}

/// A poisoned lock still guards valid log state.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_keeps_only_the_newest_lines() {
        let ring = LogRing::new(3);
        for index in 0..5 {
            ring.push(format!("line {index}"));
        }
        assert_eq!(ring.tail(usize::MAX).len(), 3);
        assert_eq!(ring.tail(2), vec!["line 3", "line 4"]);
        assert_eq!(ring.tail(100), vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn multi_writer_splits_lines_into_ring_and_daily_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ring = LogRing::new(10);
        let file = Arc::new(DailyLogFile::new(dir.path()).expect("log file"));
        let mut writer = MultiWriter::new(Some(file), ring.clone());

        writer.write_all(b"first\nsecond\n\n").expect("write");
        writer.flush().expect("flush");

        assert_eq!(ring.tail(10), vec!["first", "second"]);
        let written = std::fs::read_to_string(log_path_for(dir.path(), Utc::now().date_naive()))
            .expect("read log");
        assert_eq!(written, "first\nsecond\n\n");
    }

    #[test]
    fn daily_file_name_carries_the_date() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 9).expect("date");
        assert_eq!(
            log_path_for(Path::new("logs"), date),
            PathBuf::from("logs/hookwatch-2026-03-09.log")
        );
    }
}
