use crate::continuity::{reference_time, ContinuityPolicy};
use crate::error::{DorError, Result};
use crate::message::Message;
use memmap2::Mmap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

const MLLP_FRAMING: [char; 2] = ['\u{0b}', '\u{1c}'];

/// Counters from one corpus load
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusStats {
    pub files: usize,
    pub found: usize,
    pub accepted: usize,
    pub skipped: usize,
}

/// Ordered, immutable message texts shared by every worker.
///
/// Only texts that decode as `ORU^R01` are kept. Workers decode their own
/// copy before every send.
#[derive(Debug, Clone)]
pub struct Corpus {
    messages: Arc<[String]>,
    stats: CorpusStats,
}

impl Corpus {
    /// Load and validate every file in order.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut texts = Vec::new();
        for path in paths {
            let path = path.as_ref();
            log::info!("Reading HL7v2 messages from {}", path.display());
            texts.extend(split_messages(&read_text(path)?));
        }

        let mut corpus = Self::from_texts(texts)?;
        corpus.stats.files = paths.len();
        Ok(corpus)
    }

    /// Validate already split message texts.
    pub fn from_texts(texts: Vec<String>) -> Result<Self> {
        let found = texts.len();

        let checked: Vec<Result<()>> = texts.par_iter().map(|text| check_message(text)).collect();

        let mut messages = Vec::with_capacity(found);
        for (index, (text, check)) in texts.into_iter().zip(checked).enumerate() {
            match check {
                Ok(()) => messages.push(text),
                Err(e) => log::warn!("Error parsing message {}, skipping it: {}", index, e),
            }
        }

        if messages.is_empty() {
            return Err(DorError::Config(format!(
                "no usable ORU^R01 messages in input ({} found)",
                found
            )));
        }

        let stats = CorpusStats {
            files: 0,
            found,
            accepted: messages.len(),
            skipped: found - messages.len(),
        };
        log::info!("Read {} HL7v2 messages ({} skipped)", stats.accepted, stats.skipped);

        Ok(Self {
            messages: messages.into(),
            stats,
        })
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.messages.get(index).map(String::as_str)
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn stats(&self) -> &CorpusStats {
        &self.stats
    }

    pub fn first(&self) -> Result<Message> {
        self.decode_at(0)
    }

    pub fn last(&self) -> Result<Message> {
        self.decode_at(self.len().saturating_sub(1))
    }

    pub fn decode_at(&self, index: usize) -> Result<Message> {
        let text = self
            .get(index)
            .ok_or_else(|| DorError::Config(format!("corpus has no message {}", index)))?;
        Message::decode(text)
    }

    /// Continuity policy the corpus implies. Fails when continuity cannot be seeded.
    pub fn policy(&self) -> Result<ContinuityPolicy> {
        let first = self.first()?;
        reference_time(&first)?;
        ContinuityPolicy::for_corpus(&first, &self.last()?)
    }
}

fn check_message(text: &str) -> Result<()> {
    let message = Message::decode(text)?;
    if !message.is_observation_result() {
        return Err(DorError::UnsupportedMessageType(
            message.message_type().unwrap_or("<none>").to_string(),
        ));
    }
    Ok(())
}

fn read_text(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(DorError::FileNotFound(path.display().to_string()));
    }

    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(String::new());
    }

    // Read-only mapping of a file we do not modify
    let mmap = unsafe { Mmap::map(&file)? };
    Ok(String::from_utf8_lossy(&mmap).into_owned())
}

/// Split a stream of messages at every line starting with `MSH`.
///
/// Accepts `\r`, `\n` or `\r\n` segment terminators and MLLP framing bytes.
/// Each returned message uses `\r` terminators.
pub fn split_messages(text: &str) -> Vec<String> {
    let mut messages = Vec::new();
    let mut current = String::new();
    let mut dropped = 0usize;

    for line in text.split(['\r', '\n']) {
        let line = line.trim_matches(&MLLP_FRAMING[..]);
        if line.trim().is_empty() {
            continue;
        }

        if line.starts_with("MSH") {
            if !current.is_empty() {
                messages.push(std::mem::take(&mut current));
            }
        } else if current.is_empty() {
            dropped += 1;
            continue;
        }

        current.push_str(line);
        current.push('\r');
    }

    if !current.is_empty() {
        messages.push(current);
    }

    if dropped > 0 {
        log::warn!("Ignored {} segment(s) before the first MSH segment", dropped);
    }

    messages
}
