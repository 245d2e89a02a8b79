use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "dordriver",
    version,
    about = "HL7 v2 waveform replay driver",
    long_about = "Replay a corpus of HL7 v2 ORU^R01 messages against an MLLP receiver with\n\
                  live-looking, continuous timestamps, or fill a message template from raw\n\
                  time-series data."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Replay a message corpus against an MLLP receiver
    Send(SendArgs),
    /// Fill a message template with windows of raw series data
    Fill(FillArgs),
    /// Load a corpus and report what a replay would use
    Validate(ValidateArgs),
}

#[derive(Args)]
pub struct SendArgs {
    /// Receiver host
    #[arg(long, env = "DOR_HOST")]
    pub host: String,

    /// Receiver port
    #[arg(long, env = "DOR_PORT")]
    pub port: u16,

    /// Corpus files or glob patterns (e.g., "corpus/*.hl7")
    #[arg(long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Messages sent by each worker; the corpus is looped as needed
    #[arg(long, default_value_t = 1)]
    pub count: u64,

    /// Target delay between consecutive messages of one worker, in milliseconds
    #[arg(long, default_value_t = 0)]
    pub delay_ms: u64,

    /// Number of parallel connections
    #[arg(long, default_value_t = 1)]
    pub workers: usize,

    /// Send order and observation times unchanged (the header time is still refreshed)
    #[arg(long)]
    pub keep_timestamps: bool,

    /// Seconds to wait for each acknowledgement
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Also print the summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Suppress progress output on stderr
    #[arg(long)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct FillArgs {
    /// Message template with <PLACEHOLDER> tokens
    #[arg(long)]
    pub template: String,

    /// Raw series CSV (first column TIMESTAMP)
    #[arg(long)]
    pub data: String,

    /// Output file for the filled messages
    #[arg(long, default_value = "HL7_WF_filled.hl7")]
    pub dst: String,

    /// Sample rate in Hz (overridden by a RATE_* column)
    #[arg(long, default_value_t = 128.0)]
    pub sample_rate: f64,

    /// Time covered by one message, in milliseconds
    #[arg(long, default_value_t = 3000)]
    pub frame_ms: u64,

    /// Value of the DEVICE_ID placeholder
    #[arg(long, default_value = "C1007-123")]
    pub device_id: String,

    /// HL7 timestamp of the first message's start
    #[arg(long, default_value = "20150617120000.000")]
    pub start_time: String,
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Corpus files or glob patterns
    #[arg(long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}
