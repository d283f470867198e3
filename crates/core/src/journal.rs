#![allow(missing_docs)]

//! Append-only movement and audit journals.

use std::{
    fmt,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};

use crate::{
    error::{ControlError, ControlResult},
    models::Position,
};

/// `asctime`-style stamp: `Www Mmm dd hh:mm:ss yyyy`.
pub fn format_timestamp(at: DateTime<Local>) -> String {
    at.format("%a %b %e %H:%M:%S %Y").to_string()
}

/// Either end of a logged hop: a position or the `--` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waypoint {
    At(Position),
    Nowhere,
}

impl From<Position> for Waypoint {
    fn from(position: Position) -> Self {
        Self::At(position)
    }
}

impl fmt::Display for Waypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::At(position) => write!(f, "{position}"),
            Self::Nowhere => f.write_str(crate::models::NO_POSITION),
        }
    }
}

/// Per-train log of intended hops. The first record of a run truncates
/// whatever a previous run left behind.
#[derive(Debug)]
pub struct MovementJournal {
    path: PathBuf,
    started: bool,
}

impl MovementJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            started: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `[Current: <pos>], [Next: <pos>], <timestamp>`.
    pub fn record(&mut self, current: Waypoint, next: Waypoint) -> ControlResult<()> {
        let line = format!(
            "[Current: {current}], [Next: {next}], {}\n",
            format_timestamp(Local::now())
        );
        append_line(&self.path, &line, !self.started)?;
        self.started = true;
        Ok(())
    }
}

/// One authorization decision, as written to the audit journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub train: u32,
    pub current: Position,
    pub next: Position,
    pub granted: bool,
    pub at: DateTime<Local>,
}

impl fmt::Display for AuditEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[TRENO authorization request: T{}], [Current: {}], [Next: {}], [Authorized: {}], {}",
            self.train,
            self.current,
            self.next,
            if self.granted { "SI" } else { "NO" },
            format_timestamp(self.at)
        )
    }
}

/// Authority-side log of every decision, granted or denied.
#[derive(Debug, Clone)]
pub struct AuditJournal {
    path: PathBuf,
}

impl AuditJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop entries from a previous run.
    pub fn reset(&self) -> ControlResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| journal_error(&self.path, source))?;
        }
        fs::write(&self.path, "").map_err(|source| journal_error(&self.path, source))
    }

    /// Remove a journal left by an earlier run. A missing file is fine.
    pub fn discard(&self) -> ControlResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(journal_error(&self.path, err)),
        }
    }

    pub fn append(&self, entry: &AuditEntry) -> ControlResult<()> {
        append_line(&self.path, &format!("{entry}\n"), false)
    }
}

fn append_line(path: &Path, line: &str, truncate: bool) -> ControlResult<()> {
    let mut options = OpenOptions::new();
    options.create(true);
    if truncate {
        options.write(true).truncate(true);
    } else {
        options.append(true);
    }
    options
        .open(path)
        .and_then(|mut file| file.write_all(line.as_bytes()))
        .map_err(|source| journal_error(path, source))
}

fn journal_error(path: &Path, source: std::io::Error) -> ControlError {
    ControlError::Journal {
        path: path.to_path_buf(),
        source,
    }
}
