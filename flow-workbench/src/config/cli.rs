use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
pub struct CliOpt {
    /// Path to the JSON file containing the monitor config (defaults are used when omitted)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Where the per-flow report should be stored
    #[arg(long, default_value = "flow-report.json")]
    pub report: PathBuf,

    /// Where the replay log should be stored
    #[arg(long, default_value = "replay-log.json")]
    pub replay_log: PathBuf,

    /// Whether the delay, jitter and packet size histograms should be included in the report
    #[arg(long)]
    pub histograms: bool,

    /// Skip the terminal sweep, leaving packets that are still in flight at the end of the run
    /// unresolved (they won't count as lost)
    #[arg(long)]
    pub no_final_sweep: bool,

    /// Emit a `tracing` event for every packet (visible with `RUST_LOG=flow_monitor=trace`)
    #[arg(long)]
    pub log_packets: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Feed a recorded trace of packet events through the monitor
    Replay(ReplayOpt),
    /// Generate constant bit rate traffic and monitor it
    Synthetic(SyntheticOpt),
}

#[derive(Parser, Debug, Clone)]
pub struct ReplayOpt {
    /// Path to the JSON file containing the packet events
    #[arg(long)]
    pub trace: PathBuf,
}

#[derive(Parser, Debug, Clone)]
pub struct SyntheticOpt {
    /// The number of concurrent flows
    #[arg(long, default_value_t = 2)]
    pub flows: u16,

    /// The number of packets sent by each flow
    #[arg(long, default_value_t = 100)]
    pub packets: u64,

    /// The interval between two packets of the same flow
    #[arg(long, default_value_t = 10)]
    pub interval_ms: u64,

    /// The size of each packet, in bytes
    #[arg(long, default_value_t = 1000)]
    pub packet_size: u64,

    /// The one-way delay of every delivered packet
    #[arg(long, default_value_t = 30)]
    pub base_delay_ms: u64,

    /// The maximum extra delay, drawn uniformly for each packet (causes jitter and reordering)
    #[arg(long, default_value_t = 0)]
    pub jitter_ms: u64,

    /// The ratio of packets that will be lost (the value must be between 0 and 1)
    #[arg(long, default_value_t = 0.0)]
    pub loss_ratio: f64,

    /// The number of intermediate hops at which each packet is observed
    #[arg(long, default_value_t = 0)]
    pub hops: u8,

    /// The random seed governing loss and jitter
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}
