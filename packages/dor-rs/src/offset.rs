use crate::continuity::TimestampMode;
use crate::dtm::Dtm;
use crate::error::Result;
use crate::message::{FieldRef, Message};
use chrono::{DateTime, TimeDelta, Utc};

/// Stamp the header with the current instant and shift every present
/// order/observation time by `offset`.
///
/// Not idempotent: applying twice shifts twice.
pub fn apply(message: &mut Message, offset: TimeDelta, mode: TimestampMode) -> Result<()> {
    apply_at(message, offset, mode, Utc::now())
}

pub fn apply_at(
    message: &mut Message,
    offset: TimeDelta,
    mode: TimestampMode,
    now: DateTime<Utc>,
) -> Result<()> {
    // Resolve every shifted value first so a bad field leaves the message untouched
    let mut updates: Vec<(FieldRef, Dtm)> = Vec::new();
    if mode == TimestampMode::Shift {
        for group in message.groups() {
            let fields = [group.start, group.end]
                .into_iter()
                .chain(group.observations.iter().copied());
            for at in fields {
                if let Some(value) = message.time(at)? {
                    updates.push((at, value.shifted(offset)));
                }
            }
        }
    }

    // An unreadable header is replaced outright
    let header = match message.header_time() {
        Ok(Some(current)) => current.stamped(now),
        _ => Dtm::from_instant(now),
    };
    message.set_header_time(&header);

    for (at, value) in updates {
        message.set_time(at, &value);
    }

    Ok(())
}
