use crate::dtm::Dtm;
use crate::error::{DorError, Result};

/// Segment terminator used when encoding.
pub const SEGMENT_TERMINATOR: char = '\r';

const MLLP_START: char = '\u{0b}';
const MLLP_END: char = '\u{1c}';

/// Position of the message header time (MSH-7).
const HEADER_TIME_FIELD: usize = 7;
/// OBR-7 observation date/time.
const ORDER_START_FIELD: usize = 7;
/// OBR-8 observation end date/time.
const ORDER_END_FIELD: usize = 8;
/// OBX-14 date/time of the observation.
const OBSERVATION_TIME_FIELD: usize = 14;

/// Address of one field inside a decoded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRef {
    pub segment: usize,
    pub field: usize,
}

/// One OBR segment and the OBX segments that follow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderGroup {
    pub start: FieldRef,
    pub end: FieldRef,
    pub observations: Vec<FieldRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Delimiters {
    field: char,
    component: char,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    /// Raw items split on the field separator; `items[0]` is the segment name
    items: Vec<String>,
}

impl Segment {
    fn name(&self) -> &str {
        &self.items[0]
    }

    fn is_header(&self) -> bool {
        self.name() == "MSH"
    }

    /// MSH-1 is the separator itself, so MSH field n lives at item n - 1.
    fn item_index(&self, field: usize) -> Option<usize> {
        match (self.is_header(), field) {
            (_, 0) | (true, 1) => None,
            (true, n) => Some(n - 1),
            (false, n) => Some(n),
        }
    }
}

/// Decoded HL7 v2 message in ER7 (pipe) encoding.
///
/// Only the parts needed for replay are interpreted: delimiters, segment
/// boundaries and the time fields of the header, order and observation
/// segments. Everything else is carried through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    delimiters: Delimiters,
    segments: Vec<Segment>,
    groups: Vec<OrderGroup>,
}

impl Message {
    pub fn decode(text: &str) -> Result<Self> {
        let lines: Vec<&str> = text
            .split(['\r', '\n'])
            .map(|line| line.trim_matches(|c| c == MLLP_START || c == MLLP_END))
            .filter(|line| !line.trim().is_empty())
            .collect();

        let header = lines
            .first()
            .ok_or_else(|| DorError::Decode("empty message".to_string()))?;

        if !header.starts_with("MSH") {
            return Err(DorError::Decode(
                "message does not start with an MSH segment".to_string(),
            ));
        }

        let mut header_chars = header.chars().skip(3);
        let field = header_chars
            .next()
            .ok_or_else(|| DorError::Decode("MSH segment has no field separator".to_string()))?;
        let component = header_chars
            .next()
            .filter(|c| *c != field)
            .ok_or_else(|| DorError::Decode("MSH segment has no encoding characters".to_string()))?;
        let delimiters = Delimiters { field, component };

        let mut segments = Vec::with_capacity(lines.len());
        for line in lines {
            let items: Vec<String> = line.split(field).map(str::to_string).collect();
            let name = &items[0];
            if name.len() != 3 || !name.bytes().all(|b| b.is_ascii_alphanumeric()) {
                return Err(DorError::Decode(format!("invalid segment name '{}'", name)));
            }
            segments.push(Segment { items });
        }

        let groups = collect_groups(&segments);

        Ok(Self {
            delimiters,
            segments,
            groups,
        })
    }

    pub fn encode(&self) -> String {
        let separator = self.delimiters.field.to_string();
        let mut out = String::new();
        for segment in &self.segments {
            out.push_str(&segment.items.join(&separator));
            out.push(SEGMENT_TERMINATOR);
        }
        out
    }

    /// Raw content of a field, or `None` when the field is not present.
    pub fn field(&self, at: FieldRef) -> Option<&str> {
        let segment = self.segments.get(at.segment)?;
        let index = segment.item_index(at.field)?;
        segment.items.get(index).map(String::as_str)
    }

    /// Raw content of field `field` in the first segment named `name`.
    pub fn first_field(&self, name: &str, field: usize) -> Option<&str> {
        let segment = self.segments.iter().position(|s| s.name() == name)?;
        self.field(FieldRef { segment, field })
    }

    /// Component `component` (1-based) of a field.
    pub fn component<'a>(&self, raw: &'a str, component: usize) -> Option<&'a str> {
        raw.split(self.delimiters.component)
            .nth(component.checked_sub(1)?)
    }

    /// Reads a time field. Empty fields are absent, not errors.
    pub fn time(&self, at: FieldRef) -> Result<Option<Dtm>> {
        let value = self
            .field(at)
            .and_then(|raw| self.component(raw, 1))
            .map(str::trim)
            .unwrap_or("");

        if value.is_empty() {
            return Ok(None);
        }

        Dtm::parse(value).map(Some)
    }

    /// Writes the first component of a time field, keeping any other components.
    pub fn set_time(&mut self, at: FieldRef, value: &Dtm) {
        let component = self.delimiters.component;
        let Some(segment) = self.segments.get_mut(at.segment) else {
            return;
        };
        let Some(index) = segment.item_index(at.field) else {
            return;
        };

        if segment.items.len() <= index {
            segment.items.resize(index + 1, String::new());
        }

        let current = &segment.items[index];
        let rest = current.find(component).map(|pos| current[pos..].to_string());
        let mut updated = value.to_string();
        if let Some(rest) = rest {
            updated.push_str(&rest);
        }
        segment.items[index] = updated;
    }

    pub fn header_ref(&self) -> FieldRef {
        FieldRef {
            segment: 0,
            field: HEADER_TIME_FIELD,
        }
    }

    pub fn header_time(&self) -> Result<Option<Dtm>> {
        self.time(self.header_ref())
    }

    pub fn set_header_time(&mut self, value: &Dtm) {
        let at = self.header_ref();
        self.set_time(at, value);
    }

    pub fn groups(&self) -> &[OrderGroup] {
        &self.groups
    }

    /// MSH-9, e.g. `ORU^R01^ORU_R01`.
    pub fn message_type(&self) -> Option<&str> {
        self.first_field("MSH", 9)
    }

    /// MSH-10.
    pub fn control_id(&self) -> Option<&str> {
        self.first_field("MSH", 10)
    }

    pub fn is_observation_result(&self) -> bool {
        let Some(raw) = self.message_type() else {
            return false;
        };
        self.component(raw, 1) == Some("ORU") && self.component(raw, 2) == Some("R01")
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
}

fn collect_groups(segments: &[Segment]) -> Vec<OrderGroup> {
    let mut groups: Vec<OrderGroup> = Vec::new();

    for (index, segment) in segments.iter().enumerate() {
        match segment.name() {
            "OBR" => groups.push(OrderGroup {
                start: FieldRef {
                    segment: index,
                    field: ORDER_START_FIELD,
                },
                end: FieldRef {
                    segment: index,
                    field: ORDER_END_FIELD,
                },
                observations: Vec::new(),
            }),
            "OBX" => {
                // OBX before the first OBR has no order to belong to
                if let Some(group) = groups.last_mut() {
                    group.observations.push(FieldRef {
                        segment: index,
                        field: OBSERVATION_TIME_FIELD,
                    });
                }
            }
            _ => {}
        }
    }

    groups
}
