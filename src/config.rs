use std::time::Duration;

use clap::Parser;

use crate::metrics::SampleFormat;

/// Log accelerator power draw while a command runs.
///
/// Prints `<timestamp_ns> <power_mw>` to stdout every sampling period, from
/// the pre-roll before COMMAND starts until the post-roll after it exits.
#[derive(Parser, Debug)]
#[command(name = "wattmon", version, about)]
pub struct Args {
    /// Samples per second.
    #[arg(short, long, env = "WATTMON_RATE", default_value_t = 100,
          value_parser = clap::value_parser!(u32).range(1..=10_000))]
    pub rate: u32,

    /// Idle time sampled before the command starts (e.g. "1s", "500ms", "1.5").
    #[arg(long, env = "WATTMON_PRE_ROLL", default_value = "1s", value_parser = parse_duration)]
    pub pre_roll: Duration,

    /// Idle time sampled after the command exits.
    #[arg(long, env = "WATTMON_POST_ROLL", default_value = "3s", value_parser = parse_duration)]
    pub post_roll: Duration,

    /// Index of the GPU to sample.
    #[arg(short, long, env = "WATTMON_DEVICE", default_value_t = 0)]
    pub device: u32,

    /// Kill the command if it runs longer than this.
    #[arg(long, env = "WATTMON_TIMEOUT", value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Output format of the sample stream.
    #[arg(short, long, env = "WATTMON_FORMAT", value_enum, default_value_t = SampleFormat::Plain)]
    pub format: SampleFormat,

    /// Run the command line through `sh -c` instead of executing it directly.
    #[arg(long)]
    pub shell: bool,

    /// Exit with the command's exit code instead of 0.
    #[arg(long)]
    pub propagate_exit_code: bool,

    /// Increase logging verbosity (-v for info, -vv for debug).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    pub quiet: bool,

    /// Command to profile, with its arguments.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Timing and device selection for one profiling run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub interval: Duration,
    pub pre_roll: Duration,
    pub post_roll: Duration,
    pub device_index: u32,
    pub timeout: Option<Duration>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            interval: Duration::from_millis(10),
            pre_roll: Duration::from_secs(1),
            post_roll: Duration::from_secs(3),
            device_index: 0,
            timeout: None,
        }
    }
}

impl MonitorConfig {
    pub fn with_rate(mut self, samples_per_second: u32) -> Self {
        self.interval = Duration::from_secs(1) / samples_per_second.max(1);
        self
    }
}

impl From<&Args> for MonitorConfig {
    fn from(args: &Args) -> Self {
        MonitorConfig {
            pre_roll: args.pre_roll,
            post_roll: args.post_roll,
            device_index: args.device,
            timeout: args.timeout,
            ..MonitorConfig::default()
        }
        .with_rate(args.rate)
    }
}

/// Parses "250ms", "2s", "1m" or a bare number of seconds ("1.5").
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let (num_str, scale) = if let Some(num) = s.strip_suffix("ms") {
        (num, 0.001)
    } else if let Some(num) = s.strip_suffix('s') {
        (num, 1.0)
    } else if let Some(num) = s.strip_suffix('m') {
        (num, 60.0)
    } else {
        (s, 1.0)
    };

    let value: f64 = num_str
        .trim()
        .parse()
        .map_err(|e| format!("invalid duration '{}': {}", s, e))?;
    Duration::try_from_secs_f64(value * scale)
        .map_err(|e| format!("invalid duration '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_duration_units() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration(" 1.5 ").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn rejects_bad_durations() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("3h").is_err());
    }

    #[test]
    fn defaults_match_baseline() {
        let args = Args::try_parse_from(["wattmon", "./a.out"]).unwrap();
        let config = MonitorConfig::from(&args);
        assert_eq!(config, MonitorConfig::default());
        assert_eq!(args.format, SampleFormat::Plain);
        assert!(!args.shell);
    }

    #[test]
    fn rate_sets_interval() {
        let args = Args::try_parse_from(["wattmon", "--rate", "4", "true"]).unwrap();
        assert_eq!(MonitorConfig::from(&args).interval, Duration::from_millis(250));
    }

    #[test]
    fn command_keeps_its_own_flags() {
        let args = Args::try_parse_from([
            "wattmon", "--pre-roll", "0", "--format", "csv", "./bench", "--size", "10", "-v",
        ])
        .unwrap();
        assert_eq!(args.command, ["./bench", "--size", "10", "-v"]);
        assert_eq!(args.verbose, 0);
        assert_eq!(args.format, SampleFormat::Csv);
        assert_eq!(args.pre_roll, Duration::ZERO);
    }

    #[test]
    fn command_is_required() {
        assert!(Args::try_parse_from(["wattmon"]).is_err());
        assert!(Args::try_parse_from(["wattmon", "--rate", "0", "true"]).is_err());
    }
}
