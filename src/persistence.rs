use crate::{error::Result, users::Worker};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use station_protocol::JudgeResult;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

pub const CAPTURE_EXTENSION: &str = "png";

#[async_trait]
pub trait PersistencePort: Send + Sync {
    async fn ensure_dir(&self, path: &Path) -> Result<()>;
    async fn save(&self, path: &Path, bytes: &[u8]) -> Result<()>;
}

#[derive(Debug, Default, Clone)]
pub struct FsPersistence;

#[async_trait]
impl PersistencePort for FsPersistence {
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }

    async fn save(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        tokio::fs::write(path, bytes).await?;
        debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }
}

/// Identity of one saved capture.
#[derive(Debug, Clone)]
pub struct CaptureName<'a> {
    pub inspector_code: &'a str,
    /// `YYMMDD`
    pub date_code: String,
    pub daily_serial: u32,
    pub judge: JudgeResult,
    pub tip_type: Option<u16>,
    pub worker: &'a Worker,
}

impl CaptureName<'_> {
    /// `{worker}_{birth}/{PASS|NG}`, relative to the save root.
    pub fn dir(&self) -> PathBuf {
        PathBuf::from(format!("{}_{}", self.worker.name, self.worker.birth_last4))
            .join(self.judge.as_str())
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}-{}-{:03}-{}-{}-{}-{}.{CAPTURE_EXTENSION}",
            self.inspector_code,
            self.date_code,
            self.daily_serial,
            self.judge,
            tip_code(self.tip_type),
            self.worker.birth_last4,
            self.worker.name,
        )
    }

    pub fn path_in(&self, save_root: &Path) -> PathBuf {
        save_root.join(self.dir()).join(self.file_name())
    }
}

/// `T030`; unknown tip types become `T000`.
pub fn tip_code(tip_type: Option<u16>) -> String {
    format!("T{:03}", tip_type.unwrap_or(0))
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
struct SerialState {
    date: NaiveDate,
    /// Serial the next judged part will carry.
    next: u32,
}

/// Per-day judgment counter, persisted as JSON so restarts keep counting.
pub struct DailySerialStore {
    path: PathBuf,
    state: Mutex<SerialState>,
}

impl DailySerialStore {
    pub async fn open(path: impl Into<PathBuf>, today: NaiveDate) -> Result<Self> {
        let path = path.into();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SerialState {
                date: today,
                next: 1,
            },
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn in_memory(today: NaiveDate) -> Self {
        Self {
            path: PathBuf::new(),
            state: Mutex::new(SerialState {
                date: today,
                next: 1,
            }),
        }
    }

    /// Serial for the next judgment on `today`.
    pub async fn current(&self, today: NaiveDate) -> u32 {
        let state = self.state.lock().await;
        if state.date == today {
            state.next
        } else {
            1
        }
    }

    /// Consumes the serial for a judgment on `today` and persists the next
    /// one. A store left on an earlier day starts over at 1.
    pub async fn reserve(&self, today: NaiveDate) -> u32 {
        let mut state = self.state.lock().await;
        if state.date != today {
            info!("New production day {today}, daily serial restarts at 1");
            *state = SerialState {
                date: today,
                next: 1,
            };
        }

        let used = state.next;
        state.next = used + 1;
        if let Err(e) = self.persist(&state).await {
            error!("Failed to persist daily serial {}: {e}", state.next);
        }

        used
    }

    async fn persist(&self, state: &SerialState) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, serde_json::to_string(state)?).await?;
        Ok(())
    }
}

pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker() -> Worker {
        Worker {
            code: "A01".to_string(),
            name: "Kim".to_string(),
            birth_last4: "0315".to_string(),
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    #[test]
    fn capture_path_layout() {
        let worker = worker();
        let name = CaptureName {
            inspector_code: "Q7",
            date_code: "261016".to_string(),
            daily_serial: 4,
            judge: JudgeResult::Pass,
            tip_type: Some(30),
            worker: &worker,
        };

        assert_eq!(
            name.path_in(Path::new("/data")),
            PathBuf::from("/data/Kim_0315/PASS/Q7-261016-004-PASS-T030-0315-Kim.png")
        );
    }

    #[test]
    fn missing_tip_type_is_t000() {
        assert_eq!(tip_code(None), "T000");
        assert_eq!(tip_code(Some(7)), "T007");
    }

    #[tokio::test]
    async fn serial_survives_restart_and_resets_daily() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("serial.json");

        let store = DailySerialStore::open(&path, day(16)).await.unwrap();
        assert_eq!(store.current(day(16)).await, 1);
        assert_eq!(store.reserve(day(16)).await, 1);
        assert_eq!(store.reserve(day(16)).await, 2);

        let reopened = DailySerialStore::open(&path, day(16)).await.unwrap();
        assert_eq!(reopened.current(day(16)).await, 3);
        assert_eq!(reopened.current(day(17)).await, 1);
        assert_eq!(reopened.reserve(day(17)).await, 1);
        assert_eq!(reopened.current(day(17)).await, 2);
    }

    #[tokio::test]
    async fn first_judgment_after_midnight_gets_serial_one() {
        let store = DailySerialStore::in_memory(day(16));
        assert_eq!(store.reserve(day(16)).await, 1);
        assert_eq!(store.reserve(day(16)).await, 2);

        // view was loaded before midnight, the judgment lands after it
        assert_eq!(store.current(day(16)).await, 3);
        assert_eq!(store.reserve(day(17)).await, 1);
        assert_eq!(store.reserve(day(17)).await, 2);
    }

    #[tokio::test]
    async fn fs_persistence_writes_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("Kim_0315").join("NG");

        FsPersistence.ensure_dir(&target).await.unwrap();
        FsPersistence
            .save(&target.join("x.png"), b"png")
            .await
            .unwrap();
        assert_eq!(std::fs::read(target.join("x.png")).unwrap(), b"png");
    }
}
