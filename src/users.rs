use crate::error::{Result, StationError};
use std::{path::PathBuf, sync::RwLock};
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct Worker {
    pub code: String,
    pub name: String,
    /// Last four digits of the birth date, used to disambiguate names.
    pub birth_last4: String,
}

/// Registered inspectors, loaded from a `code,name,birth` CSV file.
pub struct UserDirectory {
    path: PathBuf,
    workers: RwLock<Vec<Worker>>,
}

impl UserDirectory {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let dir = Self::empty(path);
        dir.reload()?;
        Ok(dir)
    }

    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            workers: RwLock::new(Vec::new()),
        }
    }

    pub fn from_workers(workers: Vec<Worker>) -> Self {
        Self {
            path: PathBuf::new(),
            workers: RwLock::new(workers),
        }
    }

    pub fn reload(&self) -> Result<usize> {
        let text = std::fs::read_to_string(&self.path)?;
        let workers = parse_users(&text)?;
        let count = workers.len();

        *self
            .workers
            .write()
            .map_err(|_| StationError::Catalog("user directory lock poisoned".to_string()))? =
            workers;

        info!("Loaded {count} workers from {}", self.path.display());
        Ok(count)
    }

    pub fn find(&self, code: &str) -> Option<Worker> {
        let workers = self.workers.read().ok()?;
        workers
            .iter()
            .find(|w| w.code.eq_ignore_ascii_case(code.trim()))
            .cloned()
    }
}

fn parse_users(text: &str) -> Result<Vec<Worker>> {
    let mut workers = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim_start_matches('\u{feff}').trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let cols: Vec<&str> = line.split(',').map(str::trim).collect();
        if i == 0 && cols.first().is_some_and(|c| c.eq_ignore_ascii_case("code")) {
            continue;
        }

        let [code, name, birth] = cols[..] else {
            return Err(StationError::Catalog(format!(
                "users line {}: expected 3 columns, got {}",
                i + 1,
                cols.len()
            )));
        };

        let digits: String = birth.chars().filter(char::is_ascii_digit).collect();
        let birth_last4 = digits[digits.len().saturating_sub(4)..].to_string();

        workers.push(Worker {
            code: code.to_string(),
            name: name.to_string(),
            birth_last4,
        });
    }

    Ok(workers)
}
