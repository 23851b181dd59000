use clap::ValueEnum;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

const CRATES: &[&str] = &["reconkit", "reconkit_core", "enrich_store", "probe", "rules", "classify"];

fn default_directives(verbose: u8) -> String {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    CRATES.iter().map(|c| format!("{c}={level}")).collect::<Vec<_>>().join(",")
}

/// Logs go to stderr so stdout stays clean for data. `RUST_LOG` overrides `-v`.
pub fn init_tracing(verbose: u8, format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));
    match format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).with_writer(std::io::stderr).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).with_writer(std::io::stderr).init();
        }
    }
}
