use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::preset::Preset;

/// Raw schedule entry as written in config. Day syntax: a range `"1-5"`,
/// a list `"1,3,5"` or a single day `"2"`, 0 = Monday.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub days: String,
    pub start: String,
    pub mode: String,
}

/// Half-hour slots per day in an external schedule grid.
pub const GRID_SLOTS: usize = 48;

/// Preset boundaries for a week, one sorted time → preset map per day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeeklySchedule {
    days: [BTreeMap<NaiveTime, Preset>; 7],
}

fn parse_days(expr: &str) -> Result<Vec<usize>> {
    let parse_one = |text: &str| -> Result<usize> {
        let day: usize = text
            .trim()
            .parse()
            .with_context(|| format!("bad day {:?}", text))?;
        if day > 6 {
            bail!("day {} out of range 0..=6", day);
        }
        Ok(day)
    };
    if let Some((from, to)) = expr.split_once('-') {
        let from = parse_one(from)?;
        let to = parse_one(to)?;
        if from > to {
            bail!("day range {:?} is reversed", expr);
        }
        Ok((from..=to).collect())
    } else if expr.contains(',') {
        expr.split(',').map(parse_one).collect()
    } else {
        Ok(vec![parse_one(expr)?])
    }
}

fn slot_time(slot: usize) -> NaiveTime {
    NaiveTime::MIN + Duration::minutes(slot as i64 * 30)
}

impl WeeklySchedule {
    /// Builds a schedule from config entries. Malformed entries are
    /// dropped with a log line; the rest still apply.
    pub fn from_entries(entries: &[ScheduleEntry]) -> WeeklySchedule {
        let mut schedule = WeeklySchedule::default();
        for entry in entries {
            match WeeklySchedule::parse_entry(entry) {
                Ok((days, time, preset)) => {
                    for day in days {
                        schedule.days[day].insert(time, preset);
                    }
                }
                Err(err) => warn!("dropping schedule entry {:?}: {:#}", entry, err),
            }
        }
        schedule
    }

    fn parse_entry(entry: &ScheduleEntry) -> Result<(Vec<usize>, NaiveTime, Preset)> {
        let days = parse_days(&entry.days)?;
        let time = NaiveTime::parse_from_str(&entry.start, "%H:%M")
            .with_context(|| format!("bad start time {:?}", entry.start))?;
        let preset = Preset::from_name(&entry.mode)
            .with_context(|| format!("unknown preset {:?}", entry.mode))?;
        Ok((days, time, preset))
    }

    /// Builds a schedule from a 7×48 half-hour grid of preset names,
    /// Monday row first. A cell becomes a boundary when it differs from
    /// the previous slot; Sunday's last slot seeds the comparison so an
    /// unchanged midnight cell is not a boundary.
    pub fn from_grid(rows: &[Vec<String>]) -> Result<WeeklySchedule> {
        if rows.len() != 7 {
            bail!("schedule grid needs 7 day rows, got {}", rows.len());
        }
        for (day, row) in rows.iter().enumerate() {
            if row.len() != GRID_SLOTS {
                bail!(
                    "schedule grid day {} has {} slots, want {}",
                    day,
                    row.len(),
                    GRID_SLOTS
                );
            }
        }
        let mut schedule = WeeklySchedule::default();
        let mut previous = rows[6][GRID_SLOTS - 1].as_str();
        for (day, row) in rows.iter().enumerate() {
            for (slot, cell) in row.iter().enumerate() {
                if cell.as_str() == previous {
                    continue;
                }
                match Preset::from_name(cell) {
                    Some(preset) => {
                        schedule.days[day].insert(slot_time(slot), preset);
                        previous = cell.as_str();
                    }
                    None => {
                        warn!("schedule grid day {} slot {}: unknown preset {:?}", day, slot, cell)
                    }
                }
            }
        }
        Ok(schedule)
    }

    pub fn insert(&mut self, day: usize, time: NaiveTime, preset: Preset) {
        self.days[day].insert(time, preset);
    }

    pub fn is_empty(&self) -> bool {
        self.days.iter().all(|slots| slots.is_empty())
    }

    /// Nearest boundary at or after `now`. The scan covers eight days so
    /// a single-entry schedule still wraps around to the same weekday.
    pub fn next_change(&self, now: NaiveDateTime) -> Option<(NaiveDateTime, Preset)> {
        for ahead in 0..=7 {
            let date = now.date() + Duration::days(ahead);
            let slots = &self.days[date.weekday().num_days_from_monday() as usize];
            for (&time, &preset) in slots {
                let at = date.and_time(time);
                if at >= now {
                    return Some((at, preset));
                }
            }
        }
        None
    }

    /// Nearest boundary at or before `now`, scanning back eight days.
    pub fn last_change(&self, now: NaiveDateTime) -> Option<(NaiveDateTime, Preset)> {
        for back in 0..=7 {
            let date = now.date() - Duration::days(back);
            let slots = &self.days[date.weekday().num_days_from_monday() as usize];
            for (&time, &preset) in slots.iter().rev() {
                let at = date.and_time(time);
                if at <= now {
                    return Some((at, preset));
                }
            }
        }
        None
    }
}
