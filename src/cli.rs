use std::{ffi::OsString, time::Duration};

use clap::Parser;

use crate::config::{parse_duration, Config, ConfigError, DEFAULT_TIMEOUT};

/// Long flags that may also be spelled with a single dash, e.g. `-cluster prod`.
const LONG_FLAGS: [&str; 5] = ["cluster", "thanos", "timeout", "help", "version"];

/// Prints the CPU, memory, ephemeral storage and storage capacity of a
/// cluster as reported by Thanos query
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// cluster name to fetch resource info
    #[arg(long, default_value = "", hide_default_value = true)]
    pub cluster: String,

    /// thanos query URL
    #[arg(long, default_value = "", hide_default_value = true)]
    pub thanos: String,

    /// timeout shared by all thanos queries of the run
    #[arg(long, default_value = DEFAULT_TIMEOUT, value_parser = parse_duration)]
    pub timeout: Duration,
}

impl TryFrom<Cli> for Config {
    type Error = ConfigError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        Config::new(cli.cluster, cli.thanos, cli.timeout)
    }
}

/// Rewrites `-cluster`/`-cluster=prod` style arguments to their `--` form.
/// Everything after a bare `--` is passed through untouched.
pub fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut passthrough = false;
    args.into_iter()
        .map(|arg| {
            if passthrough {
                return arg;
            }
            let Some(s) = arg.to_str() else {
                return arg;
            };
            if s == "--" {
                passthrough = true;
                return arg;
            }
            match s.strip_prefix('-') {
                Some(rest) if !rest.starts_with('-') => {
                    let name = rest.split_once('=').map_or(rest, |(name, _)| name);
                    if LONG_FLAGS.contains(&name) {
                        OsString::from(format!("-{s}"))
                    } else {
                        arg
                    }
                }
                _ => arg,
            }
        })
        .collect()
}
