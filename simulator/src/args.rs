use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Seeded load simulator for sql-dispatch")]
pub(crate) struct Args {
    #[arg(long, value_parser = humantime::parse_duration)]
    pub(crate) duration: Option<Duration>,
    #[arg(long)]
    pub(crate) iterations: Option<u64>,
    #[arg(long)]
    pub(crate) seed: Option<u64>,
    #[arg(long, default_value_t = 4)]
    pub(crate) workers: usize,
    #[arg(long, default_value_t = 0.3)]
    pub(crate) insert_rate: f64,
    #[arg(long, default_value_t = 0.2)]
    pub(crate) touch_rate: f64,
    #[arg(long, default_value_t = 0.02)]
    pub(crate) missing_rate: f64,
    #[arg(long, default_value_t = 0.1)]
    pub(crate) tick_rate: f64,
    /// Fail fast with backpressure once this many queries are pending
    #[arg(long)]
    pub(crate) max_in_flight: Option<usize>,
    #[arg(long)]
    pub(crate) log: Option<PathBuf>,
    #[arg(long)]
    pub(crate) quick: bool,
    #[arg(long)]
    pub(crate) stress: bool,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SimConfig {
    pub(crate) duration_ms: Option<u64>,
    pub(crate) iterations: Option<u64>,
    pub(crate) seed: u64,
    pub(crate) workers: usize,
    pub(crate) insert_rate: f64,
    pub(crate) touch_rate: f64,
    pub(crate) missing_rate: f64,
    pub(crate) tick_rate: f64,
    pub(crate) max_in_flight: Option<usize>,
    pub(crate) log: Option<PathBuf>,
    pub(crate) preset: Option<String>,
    pub(crate) first_steps: usize,
    pub(crate) tail_steps: usize,
}

impl SimConfig {
    pub(crate) fn from_args(args: Args) -> Self {
        let mut config = SimConfig {
            duration_ms: args
                .duration
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            iterations: args.iterations,
            seed: args.seed.unwrap_or_else(random_seed),
            workers: args.workers.max(1),
            insert_rate: clamp_rate(args.insert_rate),
            touch_rate: clamp_rate(args.touch_rate),
            missing_rate: clamp_rate(args.missing_rate),
            tick_rate: clamp_rate(args.tick_rate),
            max_in_flight: args.max_in_flight,
            log: args.log,
            preset: None,
            first_steps: 30,
            tail_steps: 80,
        };

        if config.iterations.is_none() && config.duration_ms.is_none() {
            config.iterations = Some(2_000);
        }
        if args.quick {
            config.apply_quick();
        }
        if args.stress {
            config.apply_stress();
        }

        config
    }

    fn apply_quick(&mut self) {
        self.preset = Some("quick".to_string());
        self.iterations = Some(500);
        self.duration_ms = None;
        self.workers = 2;
        self.tick_rate = 0.2;
    }

    fn apply_stress(&mut self) {
        self.preset = Some("stress".to_string());
        self.iterations = Some(50_000);
        self.duration_ms = None;
        self.workers = 16;
        self.insert_rate = 0.4;
        self.touch_rate = 0.3;
        self.tick_rate = 0.02;
    }
}

fn clamp_rate(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

fn random_seed() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    now.as_secs() ^ u64::from(now.subsec_nanos())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_rate_limits_bounds() {
        assert_eq!(clamp_rate(-1.0), 0.0);
        assert_eq!(clamp_rate(2.0), 1.0);
        assert_eq!(clamp_rate(0.5), 0.5);
        assert_eq!(clamp_rate(f64::NAN), 0.0);
    }

    #[test]
    fn defaults_bound_the_run() {
        let config = SimConfig::from_args(Args::parse_from(["simulator", "--seed", "7"]));
        assert_eq!(config.seed, 7);
        assert_eq!(config.iterations, Some(2_000));
        assert_eq!(config.workers, 4);
    }
}
