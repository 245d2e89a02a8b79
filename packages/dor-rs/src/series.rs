use crate::dtm::Dtm;
use crate::error::{DorError, Result};
use chrono::{DateTime, NaiveDateTime};
use std::collections::HashMap;
use std::path::Path;

/// Reserved name of the first column
pub const TIMESTAMP_COLUMN: &str = "TIMESTAMP";

pub const SAMPLES_PREFIX: &str = "SAMPLES_";
pub const RATE_PREFIX: &str = "RATE_";
pub const RANGE_LOW_PREFIX: &str = "RANGE_LOW_";
pub const RANGE_HIGH_PREFIX: &str = "RANGE_HIGH_";

const QUOTES: [char; 2] = ['\'', '"'];

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<f64>,
}

/// Raw numeric series: one timestamp column plus any number of channels.
///
/// Columns may be shorter than the timestamp column. A row that stops early
/// simply contributes nothing to the columns it leaves out.
#[derive(Debug, Clone)]
pub struct SeriesTable {
    columns: Vec<Column>,
    channel_map: HashMap<String, usize>,
}

impl SeriesTable {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DorError::FileNotFound(path.display().to_string()));
        }
        log::info!("Reading series data from {}", path.display());
        Self::parse(&std::fs::read_to_string(path)?)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty());

        let (_, header) = lines
            .next()
            .ok_or_else(|| DorError::Series("no header row".to_string()))?;

        let names: Vec<String> = header.split(',').map(|s| strip_cell(s).to_string()).collect();
        if names.first().map(String::as_str) != Some(TIMESTAMP_COLUMN) {
            return Err(DorError::Series(format!(
                "first column must be {}, found '{}'",
                TIMESTAMP_COLUMN,
                names.first().map(String::as_str).unwrap_or("")
            )));
        }

        let mut channel_map = HashMap::with_capacity(names.len());
        for (index, name) in names.iter().enumerate() {
            if name.is_empty() {
                return Err(DorError::Series(format!("column {} has no name", index + 1)));
            }
            if channel_map.insert(name.clone(), index).is_some() {
                return Err(DorError::Series(format!("duplicate column '{}'", name)));
            }
        }

        let mut columns: Vec<Column> = names
            .into_iter()
            .map(|name| Column {
                name,
                values: Vec::new(),
            })
            .collect();

        for (line_index, line) in lines {
            let row = line_index + 1;
            let cells: Vec<&str> = line.split(',').map(strip_cell).collect();
            if cells.len() > columns.len() {
                return Err(DorError::Series(format!(
                    "row {} has {} cells but the header has {} columns",
                    row,
                    cells.len(),
                    columns.len()
                )));
            }

            for (index, cell) in cells.into_iter().enumerate() {
                let column = &mut columns[index];
                if index == 0 {
                    let millis = parse_timestamp(cell).map_err(|e| {
                        DorError::Series(format!("row {}, column {}: {}", row, column.name, e))
                    })?;
                    column.values.push(millis as f64);
                } else if !cell.is_empty() {
                    let value: f64 = cell.parse().map_err(|_| {
                        DorError::Series(format!(
                            "row {}, column {}: '{}' is not a number",
                            row, column.name, cell
                        ))
                    })?;
                    column.values.push(value);
                }
            }
        }

        log::debug!(
            "Parsed {} rows across {} channels",
            columns[0].values.len(),
            columns.len() - 1
        );

        Ok(Self {
            columns,
            channel_map,
        })
    }

    /// Epoch milliseconds of every row
    pub fn timestamps(&self) -> &[f64] {
        &self.columns[0].values
    }

    pub fn row_count(&self) -> usize {
        self.timestamps().len()
    }

    /// All columns in header order, timestamp first
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.channel_map.get(name).map(|&i| &self.columns[i])
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.channel_map.contains_key(name)
    }

    /// First value of the first `RATE_*` column in name order
    pub fn supplied_rate(&self) -> Option<f64> {
        let mut rate_columns: Vec<&Column> = self
            .columns
            .iter()
            .filter(|c| c.name.starts_with(RATE_PREFIX))
            .collect();
        rate_columns.sort_by(|a, b| a.name.cmp(&b.name));
        rate_columns
            .into_iter()
            .find_map(|c| c.values.first().copied())
    }
}

fn strip_cell(cell: &str) -> &str {
    cell.trim().trim_matches(&QUOTES[..]).trim()
}

/// Parse a timestamp cell to epoch milliseconds.
///
/// Accepts RFC 3339, ISO local date-time (read as UTC) or an HL7 DTM value.
pub fn parse_timestamp(text: &str) -> Result<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.timestamp_millis());
    }

    for pattern in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, pattern) {
            return Ok(naive.and_utc().timestamp_millis());
        }
    }

    Dtm::parse(text)
        .map(|dtm| dtm.instant().timestamp_millis())
        .map_err(|_| DorError::InvalidTimestamp(text.to_string()))
}
