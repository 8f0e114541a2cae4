use crate::error::{Result, StationError};
use std::{
    path::{Path, PathBuf},
    sync::RwLock,
};
use tracing::{info, warn};

/// Maps a part identity to the numeric tip-type code stored in its EEPROM.
pub trait CatalogLookup: Send + Sync {
    /// `None` when the part is unknown or its code is not numeric.
    fn numeric_code(&self, mtr_version: &str, country: &str, needle_label: &str) -> Option<u16>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub mtr_version: String,
    pub country: String,
    pub needle_label: String,
    /// As written in the table; not every row carries a number.
    pub code: String,
}

impl CatalogEntry {
    pub fn numeric_code(&self) -> Option<u16> {
        self.code.trim().parse().ok()
    }

    fn matches(&self, mtr_version: &str, country: &str, needle_label: &str) -> bool {
        self.mtr_version.trim() == mtr_version.trim()
            && self.country.trim().eq_ignore_ascii_case(country.trim())
            && self.needle_label.trim().eq_ignore_ascii_case(needle_label.trim())
    }
}

/// Part catalog backed by a `mtrVersion,country,needleLabel,code` CSV file.
pub struct CsvCatalog {
    path: PathBuf,
    entries: RwLock<Vec<CatalogEntry>>,
}

impl CsvCatalog {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let catalog = Self {
            path: path.into(),
            entries: RwLock::new(Vec::new()),
        };

        catalog.reload()?;
        Ok(catalog)
    }

    /// Empty catalog that still knows where to reload from.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn from_entries(entries: Vec<CatalogEntry>) -> Self {
        Self {
            path: PathBuf::new(),
            entries: RwLock::new(entries),
        }
    }

    /// Re-reads the backing file. On error the previous entries are kept.
    pub fn reload(&self) -> Result<usize> {
        let entries = read_catalog(&self.path)?;
        let count = entries.len();

        *self
            .entries
            .write()
            .map_err(|_| StationError::Catalog("catalog lock poisoned".to_string()))? = entries;

        info!("Loaded {count} catalog entries from {}", self.path.display());
        Ok(count)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }
}

impl CatalogLookup for CsvCatalog {
    fn numeric_code(&self, mtr_version: &str, country: &str, needle_label: &str) -> Option<u16> {
        let entries = self.entries.read().ok()?;
        let entry = entries
            .iter()
            .find(|e| e.matches(mtr_version, country, needle_label))?;

        let code = entry.numeric_code();
        if code.is_none() {
            warn!(
                "Catalog code {:?} for {mtr_version}/{country}/{needle_label} is not numeric",
                entry.code
            );
        }

        code
    }
}

fn read_catalog(path: &Path) -> Result<Vec<CatalogEntry>> {
    let text = std::fs::read_to_string(path)?;
    parse_catalog(&text)
}

pub(crate) fn parse_catalog(text: &str) -> Result<Vec<CatalogEntry>> {
    let mut entries = Vec::new();

    for (i, line) in text.lines().enumerate() {
        let line = line.trim_start_matches('\u{feff}').trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let cols: Vec<&str> = line.split(',').map(str::trim).collect();
        if i == 0 && cols.first().is_some_and(|c| c.eq_ignore_ascii_case("mtrVersion")) {
            continue;
        }

        let [mtr_version, country, needle_label, code] = cols[..] else {
            return Err(StationError::Catalog(format!(
                "line {}: expected 4 columns, got {}",
                i + 1,
                cols.len()
            )));
        };

        entries.push(CatalogEntry {
            mtr_version: mtr_version.to_string(),
            country: country.to_string(),
            needle_label: needle_label.to_string(),
            code: code.to_string(),
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    const TABLE: &str = "\
mtrVersion,country,needleLabel,code
2.0,KR,SINGLE 34G,30
4.0,KR,MULTI 9P,41
4.0,US,MULTI 9P,N/A
";

    #[test]
    fn lookup_is_case_insensitive_on_labels() {
        let catalog = CsvCatalog::from_entries(parse_catalog(TABLE).unwrap());
        assert_eq!(catalog.numeric_code("2.0", "kr", "single 34g"), Some(30));
        assert_eq!(catalog.numeric_code("4.0", "KR", "MULTI 9P"), Some(41));
        assert_eq!(catalog.numeric_code("4.0", "US", "MULTI 9P"), None);
        assert_eq!(catalog.numeric_code("3.0", "KR", "MULTI 9P"), None);
    }

    #[test]
    fn malformed_rows_are_rejected() {
        let err = parse_catalog("2.0,KR,30\n").unwrap_err();
        assert!(matches!(err, StationError::Catalog(msg) if msg.starts_with("line 1")));
    }

    #[test]
    fn reload_picks_up_file_changes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "2.0,KR,SINGLE 34G,30").unwrap();

        let catalog = CsvCatalog::load(file.path()).unwrap();
        assert_eq!(catalog.len(), 1);

        writeln!(file, "2.0,KR,SINGLE 30G,31").unwrap();
        assert_eq!(catalog.reload().unwrap(), 2);
        assert_eq!(catalog.numeric_code("2.0", "KR", "SINGLE 30G"), Some(31));
    }

    #[test]
    fn failed_reload_keeps_previous_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.csv");
        std::fs::write(&path, TABLE).unwrap();

        let catalog = CsvCatalog::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(catalog.reload().is_err());
        assert_eq!(catalog.len(), 3);
    }
}
