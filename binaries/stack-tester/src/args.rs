//! Command-line arguments; `struct Args`.

//---------------------------------------------------------------------------------------------------- Import
use std::path::PathBuf;

use tracing::level_filters::LevelFilter;

//---------------------------------------------------------------------------------------------------- Args
/// Stack tester args.
#[derive(clap::Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// The key prefix the instruction stream is stored under.
    pub prefix: String,

    /// The API version to request from the client.
    ///
    /// Requests above the linked client's maximum are clamped down.
    pub api_version: u32,

    /// The PATH of the cluster file.
    #[arg(default_value = "./galena.cluster")]
    pub cluster_file: PathBuf,

    /// Log level for diagnostic output on stderr.
    #[arg(long, default_value_t = LevelFilter::INFO)]
    pub log_level: LevelFilter,
}

//---------------------------------------------------------------------------------------------------- Tests
#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn positional_arguments() {
        let args = Args::parse_from(["stack-tester", "test_spec", "710"]);
        assert_eq!(args.prefix, "test_spec");
        assert_eq!(args.api_version, 710);
        assert_eq!(args.cluster_file, PathBuf::from("./galena.cluster"));
    }

    #[test]
    fn cluster_file_override() {
        let args = Args::parse_from(["stack-tester", "p", "600", "/tmp/other.cluster"]);
        assert_eq!(args.cluster_file, PathBuf::from("/tmp/other.cluster"));
    }

    #[test]
    fn missing_arguments_fail() {
        assert!(Args::try_parse_from(["stack-tester", "only-prefix"]).is_err());
        assert!(Args::try_parse_from(["stack-tester"]).is_err());
    }
}
