pub mod continuity;
pub mod coordinator;
pub mod corpus;
pub mod dtm;
pub mod error;
pub mod message;
pub mod offset;
pub mod segmenter;
pub mod series;
pub mod template;
pub mod transport;
pub mod types;
pub mod worker;

pub use continuity::{Continuity, ContinuityPolicy, TimestampMode};
pub use coordinator::ReplayCoordinator;
pub use corpus::{Corpus, CorpusStats};
pub use dtm::Dtm;
pub use error::{DorError, Result};
pub use message::Message;
pub use segmenter::{segment, SegmenterConfig, WaveformWindow};
pub use series::SeriesTable;
pub use template::Template;
pub use transport::{Ack, Connection, MllpTransport, Transport};
pub use types::*;
pub use worker::ReplayWorker;
