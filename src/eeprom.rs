use crate::{
    catalog::CatalogLookup,
    channel::ChannelTransport,
    config::PartProfile,
    error::{EepromStage, Result, StationError},
};
use chrono::{Datelike, NaiveDate};
use station_protocol::{
    request::Command,
    response::{EepromResult, Event, EventKind},
    EepromRecord, JudgeResult,
};
use std::time::Duration;
use tracing::{debug, warn};

pub const EEPROM_TIMEOUT: Duration = Duration::from_secs(5);

/// Every write resets the shot counter.
const REWRITE_SHOT_COUNT: u32 = 0;

#[derive(Debug, Clone)]
pub struct EepromRequest {
    pub part: PartProfile,
    pub date: NaiveDate,
    pub inspector_code: Option<String>,
    pub judge_result: Option<JudgeResult>,
    pub daily_serial: Option<u32>,
}

impl EepromRequest {
    pub fn new(part: PartProfile, date: NaiveDate) -> Self {
        Self {
            part,
            date,
            inspector_code: None,
            judge_result: None,
            daily_serial: None,
        }
    }

    /// Final rewrite carrying the judgment.
    pub fn judged(mut self, judge: JudgeResult, daily_serial: u32) -> Self {
        self.judge_result = Some(judge);
        self.daily_serial = Some(daily_serial);
        self
    }

    fn write_command(&self, tip_type: Option<u16>) -> Command {
        Command::EepromWrite {
            tip_type,
            shot_count: REWRITE_SHOT_COUNT,
            year: self.date.year() as u16,
            month: self.date.month() as u8,
            day: self.date.day() as u8,
            maker_code: self.part.maker_code,
            mtr_version: self.part.mtr_version.clone(),
            country: self.part.country.clone(),
            inspector_code: self.inspector_code.clone(),
            judge_result: self.judge_result,
            daily_serial: self.daily_serial,
        }
    }
}

#[derive(Clone)]
pub struct EepromCoordinator {
    transport: ChannelTransport,
}

impl EepromCoordinator {
    pub fn new(transport: ChannelTransport) -> Self {
        Self { transport }
    }

    /// Writes the part record and returns what the chip reads back.
    ///
    /// An unknown or non-numeric catalog code writes a `null` tip type.
    pub async fn write_then_read(
        &self,
        request: &EepromRequest,
        catalog: &dyn CatalogLookup,
    ) -> Result<EepromRecord> {
        let part = &request.part;
        let tip_type = catalog.numeric_code(&part.mtr_version, &part.country, &part.needle_label);
        if tip_type.is_none() {
            warn!(
                "No numeric tip type for {}/{}/{}, writing null",
                part.mtr_version, part.country, part.needle_label
            );
        }

        let written = self
            .transport
            .request(
                request.write_command(tip_type),
                EventKind::EepromWrite,
                None,
                EEPROM_TIMEOUT,
            )
            .await
            .and_then(|e| expect_result(e, EepromStage::Write))
            .map_err(|e| StationError::eeprom(EepromStage::Write, e))?;
        debug!("EEPROM write ok: {written:?}");

        let read = self
            .transport
            .request(
                Command::EepromRead {
                    mtr_version: part.mtr_version.clone(),
                    country: part.country.clone(),
                },
                EventKind::EepromRead,
                None,
                EEPROM_TIMEOUT,
            )
            .await
            .and_then(|e| expect_result(e, EepromStage::Read))
            .map_err(|e| StationError::eeprom(EepromStage::Read, e))?;

        read.data.ok_or_else(|| {
            StationError::eeprom(
                EepromStage::Read,
                StationError::CommandRejected("read returned no data".to_string()),
            )
        })
    }
}

fn expect_result(event: Event, stage: EepromStage) -> Result<EepromResult> {
    let result = match (stage, event) {
        (EepromStage::Write, Event::EepromWrite(res)) => res,
        (EepromStage::Read, Event::EepromRead(res)) => res,
        (_, other) => {
            return Err(StationError::CommandRejected(format!(
                "unexpected {} event",
                other.kind()
            )))
        }
    };

    if !result.success {
        let reason = result
            .error
            .clone()
            .unwrap_or_else(|| format!("eeprom {stage} failed"));
        return Err(StationError::CommandRejected(reason));
    }

    Ok(result)
}
