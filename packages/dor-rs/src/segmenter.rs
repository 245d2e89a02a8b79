//! Window segmenter
//!
//! Slices a raw numeric series into message-sized windows. Window timing
//! comes from the configuration (start time plus `index * frame`), never from
//! the data's own timestamps; those are only used to derive a sample rate.

use crate::dtm::Dtm;
use crate::error::{DorError, Result};
use crate::series::{
    Column, SeriesTable, RANGE_HIGH_PREFIX, RANGE_LOW_PREFIX, RATE_PREFIX, SAMPLES_PREFIX,
    TIMESTAMP_COLUMN,
};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Separator between samples in a rendered channel
pub const SAMPLE_SEPARATOR: &str = "^";

pub const START_TIME_KEY: &str = "START_TIME";
pub const END_TIME_KEY: &str = "END_TIME";
pub const DEVICE_ID_KEY: &str = "DEVICE_ID";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmenterConfig {
    /// Hz; replaced by the first supplied `RATE_*` value when the data has one
    pub sample_rate: f64,
    /// Time covered by one window
    pub frame_ms: u64,
    /// HL7 DTM of the first window's start
    pub start_time: String,
    pub device_id: String,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            sample_rate: 128.0,
            frame_ms: 3000,
            start_time: "20150617120000.000".to_string(),
            device_id: "C1007-123".to_string(),
        }
    }
}

impl SegmenterConfig {
    pub fn values_per_window(&self, sample_rate: f64) -> usize {
        let values = (sample_rate * self.frame_ms as f64 / 1000.0).round();
        if values.is_finite() && values >= 1.0 {
            values as usize
        } else {
            1
        }
    }
}

/// One message's worth of every channel.
#[derive(Debug, Clone)]
pub struct WaveformWindow {
    pub index: usize,
    pub start: Dtm,
    pub end: Dtm,
    /// Slices in table column order, timestamp column first
    pub channels: Vec<Column>,
    /// `RANGE_LOW_*`, `RANGE_HIGH_*` and `RATE_*` values not present in the data
    pub derived: BTreeMap<String, f64>,
}

impl WaveformWindow {
    pub fn channel(&self, name: &str) -> Option<&[f64]> {
        self.channels
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    fn value(&self, key: &str) -> Option<f64> {
        self.derived
            .get(key)
            .copied()
            .or_else(|| self.channel(key).and_then(|v| v.first().copied()))
    }

    /// Effective sample rate of waveform type `wave_type`, supplied or derived
    pub fn rate(&self, wave_type: &str) -> Option<f64> {
        self.value(&format!("{}{}", RATE_PREFIX, wave_type))
    }

    /// `(low, high)` range of waveform type `wave_type`, supplied or derived
    pub fn range(&self, wave_type: &str) -> Option<(f64, f64)> {
        Some((
            self.value(&format!("{}{}", RANGE_LOW_PREFIX, wave_type))?,
            self.value(&format!("{}{}", RANGE_HIGH_PREFIX, wave_type))?,
        ))
    }

    /// Placeholder name to replacement text for this window.
    pub fn placeholders(&self, device_id: &str) -> HashMap<String, String> {
        let mut values = HashMap::new();
        values.insert(DEVICE_ID_KEY.to_string(), device_id.to_string());
        values.insert(START_TIME_KEY.to_string(), self.start.to_string());
        values.insert(END_TIME_KEY.to_string(), self.end.to_string());

        for (key, value) in &self.derived {
            values.insert(key.clone(), value.to_string());
        }
        for column in &self.channels {
            values.insert(column.name.clone(), join_values(&column.values));
        }
        values
    }
}

fn join_values(values: &[f64]) -> String {
    values
        .iter()
        .map(f64::to_string)
        .collect::<Vec<_>>()
        .join(SAMPLE_SEPARATOR)
}

/// Split `table` into windows of `round(rate * frame / 1000)` rows.
///
/// The rows left over after the last full window are folded into it. A
/// channel that has run out of data by the time a window starts repeats its
/// slice from the previous window.
pub fn segment(table: &SeriesTable, config: &SegmenterConfig) -> Result<Vec<WaveformWindow>> {
    let sample_rate = table.supplied_rate().unwrap_or(config.sample_rate);
    if !(sample_rate.is_finite() && sample_rate > 0.0) {
        return Err(DorError::Config(format!("invalid sample rate {}", sample_rate)));
    }
    if config.frame_ms == 0 {
        return Err(DorError::Config("frame length must be positive".to_string()));
    }

    let first_start = Dtm::parse(&config.start_time)
        .map_err(|e| DorError::Config(format!("invalid start time: {}", e)))?;
    let frame = i64::try_from(config.frame_ms)
        .ok()
        .and_then(TimeDelta::try_milliseconds)
        .ok_or_else(|| DorError::Config(format!("frame length {} ms is out of range", config.frame_ms)))?;

    let per_window = config.values_per_window(sample_rate);
    let total = table.row_count();
    let window_count = (total / per_window).max(1);

    log::info!(
        "Segmenting {} rows into {} windows of {} values ({} Hz, {} ms)",
        total,
        window_count,
        per_window,
        sample_rate,
        config.frame_ms
    );

    let mut windows: Vec<WaveformWindow> = Vec::with_capacity(window_count);
    for index in 0..window_count {
        let offset = index * per_window;
        let is_last = index + 1 == window_count;

        let channels: Vec<Column> = table
            .columns()
            .iter()
            .enumerate()
            .map(|(position, column)| {
                let len = column.values.len();
                let values = if offset < len {
                    let end = if is_last {
                        len
                    } else {
                        (offset + per_window).min(len)
                    };
                    column.values[offset..end].to_vec()
                } else {
                    windows
                        .last()
                        .map(|previous| previous.channels[position].values.clone())
                        .unwrap_or_default()
                };
                Column {
                    name: column.name.clone(),
                    values,
                }
            })
            .collect();

        let (start, end) = window_bounds(&first_start, frame, index)?;
        let derived = derive_values(table, &channels, sample_rate);

        windows.push(WaveformWindow {
            index,
            start,
            end,
            channels,
            derived,
        });
    }

    Ok(windows)
}

/// Start and end of window `index`, or a config error when they are not representable.
fn window_bounds(first_start: &Dtm, frame: TimeDelta, index: usize) -> Result<(Dtm, Dtm)> {
    let out_of_range = || {
        DorError::Config(format!(
            "window {} of {} ms frames is out of the time range",
            index,
            frame.num_milliseconds()
        ))
    };

    let start = i32::try_from(index)
        .ok()
        .and_then(|index| frame.checked_mul(index))
        .and_then(|elapsed| first_start.instant().checked_add_signed(elapsed))
        .ok_or_else(out_of_range)?;
    let end = start.checked_add_signed(frame).ok_or_else(out_of_range)?;

    Ok((Dtm::from_instant(start), Dtm::from_instant(end)))
}

fn derive_values(table: &SeriesTable, channels: &[Column], fallback_rate: f64) -> BTreeMap<String, f64> {
    let mut derived = BTreeMap::new();
    let timestamps = channels
        .iter()
        .find(|c| c.name == TIMESTAMP_COLUMN)
        .map(|c| c.values.as_slice())
        .unwrap_or(&[]);

    for column in channels {
        let Some(wave_type) = column.name.strip_prefix(SAMPLES_PREFIX) else {
            continue;
        };
        if column.values.is_empty() {
            continue;
        }

        let low_key = format!("{}{}", RANGE_LOW_PREFIX, wave_type);
        if !table.has_column(&low_key) {
            let low = column.values.iter().copied().fold(f64::INFINITY, f64::min);
            derived.insert(low_key, low);
        }

        let high_key = format!("{}{}", RANGE_HIGH_PREFIX, wave_type);
        if !table.has_column(&high_key) {
            let high = column.values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            derived.insert(high_key, high);
        }

        let rate_key = format!("{}{}", RATE_PREFIX, wave_type);
        if !table.has_column(&rate_key) {
            derived.insert(rate_key, window_rate(column.values.len(), timestamps, fallback_rate));
        }
    }

    derived
}

/// `(samples - 1) / (max_ts - min_ts)` in samples per second
fn window_rate(samples: usize, timestamps: &[f64], fallback_rate: f64) -> f64 {
    let min = timestamps.iter().copied().fold(f64::INFINITY, f64::min);
    let max = timestamps.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;

    if samples < 2 || !span.is_finite() || span <= 0.0 {
        return fallback_rate;
    }
    (samples - 1) as f64 / span * 1000.0
}
