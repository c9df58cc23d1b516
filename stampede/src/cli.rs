use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 10s, 250ms, 1m)".to_string());
    }
    // Bare numbers are seconds, matching plan files.
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s)
        .map_err(|err| format!("invalid duration '{s}': {err} (expected e.g. 10s, 250ms, 1m)"))
}

fn parse_positive(input: &str) -> Result<u64, String> {
    match input.trim().parse::<u64>() {
        Ok(0) => Err("must be a positive integer".to_string()),
        Ok(v) => Ok(v),
        Err(err) => Err(format!("invalid number '{input}': {err}")),
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Progress bar on stderr and a human-readable summary.
    HumanReadable,
    /// Emit JSON progress lines and a final summary line (NDJSON) to stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "stampede",
    author,
    version,
    about = "Staged load generator with threshold-based pass/fail",
    long_about = "stampede drives a staged number of virtual users through a scripted HTTP workflow, aggregates latency/rate/counter metrics and evaluates thresholds against them.\n\nA test plan is a YAML file with `stages` (or `vus`/`duration`), `thresholds` and a list of `steps`.\n\nEnvironment variables of the current process are visible to templates as `{{env.NAME}}`; use `--env KEY=VALUE` to add/override values.",
    after_help = "Examples:\n  stampede run plans/smoke.yaml\n  stampede run plans/load.yaml --vus 50 --duration 30s\n  stampede run plans/load.yaml --iterations 1000 --output json\n  stampede run plans/load.yaml --env API_URL=http://localhost:4567/api\n  stampede validate plans/load.yaml"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a test plan
    #[command(
        long_about = "Run a test plan and exit with a code reflecting its threshold verdicts.\n\nCLI flags override values from the plan; `--vus` or `--duration` replace the plan's stages with a constant load."
    )]
    Run(RunArgs),

    /// Check a test plan without sending any request
    Validate(ValidateArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the test plan (.yaml)
    pub plan: PathBuf,

    /// Stop after this many iterations in total across all virtual users
    #[arg(long, value_parser = parse_positive)]
    pub iterations: Option<u64>,

    /// Number of virtual users (constant load)
    #[arg(long, value_parser = parse_positive)]
    pub vus: Option<u64>,

    /// Test duration (e.g. 10s, 250ms, 1m)
    #[arg(long, value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Add/override env vars visible to templates (repeatable, KEY=VALUE).
    /// CLI-provided vars override the current process env.
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Path to the test plan (.yaml)
    pub plan: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_accepts_common_units() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("1m"), Ok(Duration::from_secs(60)));
        assert_eq!(parse_duration("1m30s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration("2h"), Ok(Duration::from_secs(2 * 60 * 60)));
        assert_eq!(parse_duration("5"), Ok(Duration::from_secs(5)));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
    }

    #[test]
    fn cli_parses_run_with_overrides() {
        let parsed = Cli::try_parse_from([
            "stampede",
            "run",
            "load.yaml",
            "--iterations",
            "10",
            "--vus",
            "2",
            "--duration",
            "250ms",
            "--env",
            "API_URL=http://localhost:4567/api",
            "--env",
            "EMPTY=",
            "--output",
            "json",
        ]);

        let cli = match parsed {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };

        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.plan, PathBuf::from("load.yaml"));
                assert_eq!(args.iterations, Some(10));
                assert_eq!(args.vus, Some(2));
                assert_eq!(args.duration, Some(Duration::from_millis(250)));
                assert_eq!(
                    args.env,
                    vec![
                        "API_URL=http://localhost:4567/api".to_string(),
                        "EMPTY=".to_string()
                    ]
                );
                assert!(matches!(args.output, OutputFormat::Json));
            }
            Command::Validate(_) => panic!("expected run command"),
        }
    }

    #[test]
    fn cli_rejects_zero_vus() {
        assert!(Cli::try_parse_from(["stampede", "run", "load.yaml", "--vus", "0"]).is_err());
    }

    #[test]
    fn cli_parses_validate() {
        let cli = match Cli::try_parse_from(["stampede", "validate", "load.yaml"]) {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };
        match cli.command {
            Command::Validate(args) => assert_eq!(args.plan, PathBuf::from("load.yaml")),
            Command::Run(_) => panic!("expected validate command"),
        }
    }
}
