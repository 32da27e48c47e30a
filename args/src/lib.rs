// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Command-line arguments for the dataplane daemon.

pub use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "Software dataplane")]
#[command(version = "1.0")]
#[command(about = "A poll-mode module-graph dataplane", long_about = None)]
pub struct CmdArgs {
    /// Number of pinned dataplane workers.
    #[arg(
        long,
        value_name = "N",
        default_value_t = 1,
        value_parser = clap::value_parser!(u16).range(1..=64),
        help = "Number of dataplane worker threads in [1..64], one pinned per CPU"
    )]
    workers: u16,

    #[arg(
        long,
        value_name = "tracing filter",
        help = "Tracing filter directives, e.g. 'info' or 'debug,engine=trace'"
    )]
    tracing: Option<String>,

    /// How often the daemon reports graph counters.
    #[arg(
        long,
        value_name = "MILLISECONDS",
        default_value_t = 1000,
        help = "Interval between counter reports, in milliseconds"
    )]
    report_interval_ms: u64,

    #[arg(
        long,
        default_value_t = false,
        help = "Wire up the demo latency graph (source -> timestamp -> port -> measure -> sink)"
    )]
    demo: bool,
}

impl CmdArgs {
    #[must_use]
    pub fn num_workers(&self) -> usize {
        self.workers.into()
    }

    #[must_use]
    pub fn tracing(&self) -> Option<&String> {
        self.tracing.as_ref()
    }

    #[must_use]
    pub fn report_interval_ms(&self) -> u64 {
        self.report_interval_ms
    }

    #[must_use]
    pub fn demo(&self) -> bool {
        self.demo
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let args = CmdArgs::parse_from(["dataplane"]);
        assert_eq!(args.num_workers(), 1);
        assert_eq!(args.report_interval_ms(), 1000);
        assert!(!args.demo());
        assert!(args.tracing().is_none());
    }

    #[test]
    fn worker_count_is_bounded() {
        assert!(CmdArgs::try_parse_from(["dataplane", "--workers", "64"]).is_ok());
        assert!(CmdArgs::try_parse_from(["dataplane", "--workers", "65"]).is_err());
        assert!(CmdArgs::try_parse_from(["dataplane", "--workers", "0"]).is_err());
    }
}
