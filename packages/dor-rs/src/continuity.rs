//! Offset bookkeeping that makes a looped corpus look like a live feed.
//!
//! Every replayed message is shifted by one signed offset. The offset is
//! seeded so the reference message appears to have just been recorded, and
//! on every wrap back to the start of the corpus it is either advanced by the
//! corpus span (waveform corpora, so consecutive cycles abut exactly) or
//! recomputed from the wall clock (parametric corpora, which have no end
//! times and need no cross-cycle adjacency).

use crate::dtm::Dtm;
use crate::error::{DorError, Result};
use crate::message::Message;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Whether embedded order/observation timestamps are shifted before sending.
///
/// The header time is stamped with the current instant in both modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampMode {
    #[default]
    Shift,
    Preserve,
}

/// How the offset moves when a worker wraps around the corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuityPolicy {
    /// Waveform corpus: advance by the time covered by one full cycle
    AdvanceBySpan(TimeDelta),
    /// Parametric corpus: reseed from the wall clock
    RecomputeFromClock,
}

impl ContinuityPolicy {
    pub fn for_corpus(first: &Message, last: &Message) -> Result<Self> {
        Ok(match span(first, last)? {
            Some(span) => ContinuityPolicy::AdvanceBySpan(span),
            None => ContinuityPolicy::RecomputeFromClock,
        })
    }

    pub fn span(&self) -> Option<TimeDelta> {
        match self {
            ContinuityPolicy::AdvanceBySpan(span) => Some(*span),
            ContinuityPolicy::RecomputeFromClock => None,
        }
    }
}

fn first_order_times(message: &Message) -> Result<(Option<Dtm>, Option<Dtm>)> {
    match message.groups().first() {
        Some(group) => Ok((message.time(group.start)?, message.time(group.end)?)),
        None => Ok((None, None)),
    }
}

/// End time of the first order group, falling back to its start time.
pub fn reference_time(message: &Message) -> Result<Dtm> {
    match first_order_times(message)? {
        (_, Some(end)) => Ok(end),
        (Some(start), None) => Ok(start),
        (None, None) => Err(DorError::Config(
            "reference message has neither an order start nor an order end time".to_string(),
        )),
    }
}

pub fn initial_offset_at(reference: &Message, now: DateTime<Utc>) -> Result<TimeDelta> {
    Ok(now - reference_time(reference)?.instant())
}

pub fn initial_offset(reference: &Message) -> Result<TimeDelta> {
    initial_offset_at(reference, Utc::now())
}

/// Time from the start of `first` to the end of `last`, when `last` has an end.
pub fn span(first: &Message, last: &Message) -> Result<Option<TimeDelta>> {
    let (_, end) = first_order_times(last)?;
    let Some(end) = end else {
        return Ok(None);
    };

    let (start, _) = first_order_times(first)?;
    let start = start.ok_or_else(|| {
        DorError::Config("first message has no order start time to measure the span from".to_string())
    })?;

    Ok(Some(end.instant() - start.instant()))
}

/// Per-worker offset state.
#[derive(Debug, Clone)]
pub struct Continuity {
    policy: ContinuityPolicy,
    reference: DateTime<Utc>,
    offset: TimeDelta,
}

impl Continuity {
    pub fn new(first: &Message, last: &Message) -> Result<Self> {
        Self::new_at(first, last, Utc::now())
    }

    pub fn new_at(first: &Message, last: &Message, now: DateTime<Utc>) -> Result<Self> {
        let policy = ContinuityPolicy::for_corpus(first, last)?;
        let reference = reference_time(first)?.instant();

        Ok(Self {
            policy,
            reference,
            offset: now - reference,
        })
    }

    pub fn policy(&self) -> ContinuityPolicy {
        self.policy
    }

    /// Offset to apply to the next message.
    pub fn offset(&self) -> TimeDelta {
        self.offset
    }

    /// Land the reference message on `now` again.
    pub fn reseed_at(&mut self, now: DateTime<Utc>) {
        self.offset = now - self.reference;
    }

    pub fn on_cycle_wrap(&mut self) {
        self.on_cycle_wrap_at(Utc::now());
    }

    pub fn on_cycle_wrap_at(&mut self, now: DateTime<Utc>) {
        match self.policy {
            ContinuityPolicy::AdvanceBySpan(span) => self.offset += span,
            ContinuityPolicy::RecomputeFromClock => self.reseed_at(now),
        }
    }
}
