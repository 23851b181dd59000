mod app;
mod commands;
mod config;
mod logging;
mod output;

use anyhow::Result;
use app::AppContext;
use clap::{Parser, Subcommand};
use commands::{ClassifyFlags, GenerateArgs, ProbeFlags, ScopeArgs};
use logging::{init_tracing, LogFormat};
use output::OutputFormat;
use std::path::PathBuf;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "reconkit", version, about = "Recon URL pipeline: canonicalize, scope, probe, enrich and triage")]
struct Cli {
    /// Optional config file (YAML). Defaults to ./reconkit.yaml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Root directory for per-scope outputs
    #[arg(long, global = true)]
    outputs: Option<PathBuf>,
    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print version info
    Version,
    /// Canonicalize a URL list, deduplicate it and optionally scope it
    Canon {
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
        /// Write sorted canonical lines here instead of stdout
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
        /// Scope root; when set, out-of-scope lines are dropped
        #[arg(long)]
        scope: Option<String>,
        #[arg(long, requires = "scope")]
        allow: Vec<String>,
        #[arg(long, requires = "scope")]
        deny: Vec<String>,
        #[arg(long, default_value_t = false, requires = "scope")]
        include_external: bool,
    },
    /// Show the scope decision for each host
    Scope {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(required = true)]
        hosts: Vec<String>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Probe a URL list and merge the results into the scope's enrichment
    ProbeUrls {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
        #[command(flatten)]
        flags: ProbeFlags,
    },
    /// Resolve and probe hosts, updating the host index
    ProbeHosts {
        #[command(flatten)]
        scope: ScopeArgs,
        /// Hosts or URLs, one per line
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
        #[command(flatten)]
        flags: ProbeFlags,
    },
    /// Fan a path list out over live hosts
    ProbePaths {
        #[arg(long)]
        scope: String,
        /// Plain path list, or JSON/NDJSON request specs
        #[arg(long, value_name = "FILE")]
        paths: PathBuf,
        /// Module holding host probe results
        #[arg(long, default_value = "subdomains")]
        hosts_module: String,
        /// Host status codes that qualify a host (repeatable)
        #[arg(long = "status")]
        statuses: Vec<u16>,
        /// Allow state-changing methods such as POST or DELETE
        #[arg(long = "i-have-permission", default_value_t = false)]
        allow_unsafe: bool,
        #[command(flatten)]
        flags: ProbeFlags,
    },
    /// Group hosts by IP address
    Rollup {
        #[arg(long)]
        scope: String,
        /// Recompute from the host index before printing
        #[arg(long, default_value_t = false)]
        rebuild: bool,
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Compile or generate classification rules
    Rules {
        #[command(subcommand)]
        command: RulesCommands,
    },
    /// Classify the scope corpus into severity buckets
    Classify {
        #[arg(long)]
        scope: String,
        #[command(flatten)]
        flags: ClassifyFlags,
        /// Put every classified row in the report instead of a balanced sample
        #[arg(long, default_value_t = false)]
        full: bool,
        /// Rows in the balanced sample
        #[arg(long)]
        budget: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
        /// Skip the per-label text files
        #[arg(long, default_value_t = false)]
        no_buckets: bool,
    },
    /// Dry-run the rules over part of the corpus and report hits per rule
    Preview {
        #[arg(long)]
        scope: String,
        #[command(flatten)]
        flags: ClassifyFlags,
        /// Lines to classify, 0 for the whole corpus
        #[arg(long, default_value_t = 500)]
        limit: usize,
        /// Sample the corpus with this seed instead of taking the first lines
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
enum RulesCommands {
    /// Compile a rules file, or the merged rule set of a scope
    Compile {
        #[arg(long)]
        scope: Option<String>,
        #[arg(long, value_name = "FILE", conflicts_with = "scope")]
        file: Option<PathBuf>,
        /// Source tag for --file
        #[arg(long, default_value = "custom")]
        source: String,
        /// Sources to merge for --scope, comma separated
        #[arg(long, value_delimiter = ',')]
        sources: Vec<String>,
    },
    /// Generate rules from a corpus sample and save them as the ai rule source
    Generate(GenerateArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);
    let config = config::load_config(cli.config.as_deref())?;
    let outputs = cli.outputs.clone().or_else(|| config.outputs.clone()).unwrap_or_else(|| PathBuf::from("outputs"));
    debug!(outputs = %outputs.display(), "starting");
    let app = AppContext::new(outputs, config);

    match cli.command {
        Commands::Version => {
            println!("reconkit {}", reconkit_core::version());
        }
        Commands::Canon { input, out, scope, allow, deny, include_external } => {
            let scope = scope.map(|scope| ScopeArgs { scope, allow, deny, include_external });
            commands::canon(&app, &input, scope.as_ref(), out.as_deref())?;
        }
        Commands::Scope { scope, hosts, format } => commands::scope(&app, &scope, &hosts, format)?,
        Commands::ProbeUrls { scope, input, flags } => commands::probe_urls_cmd(&app, &scope, &input, &flags)?,
        Commands::ProbeHosts { scope, input, flags } => commands::probe_hosts_cmd(&app, &scope, &input, &flags)?,
        Commands::ProbePaths { scope, paths, hosts_module, statuses, allow_unsafe, flags } => {
            commands::probe_paths_cmd(&app, &scope, &paths, &hosts_module, &statuses, allow_unsafe, &flags)?
        }
        Commands::Rollup { scope, rebuild, format } => commands::rollup(&app, &scope, rebuild, format)?,
        Commands::Rules { command } => match command {
            RulesCommands::Compile { scope, file, source, sources } => {
                commands::rules_compile(&app, scope.as_deref(), file.as_deref(), &source, &sources)?
            }
            RulesCommands::Generate(args) => commands::rules_generate(&app, &args)?,
        },
        Commands::Classify { scope, flags, full, budget, seed, no_buckets } => {
            commands::classify_cmd(&app, &scope, &flags, full, budget, seed, no_buckets)?
        }
        Commands::Preview { scope, flags, limit, seed } => commands::preview_cmd(&app, &scope, &flags, limit, seed)?,
    }
    Ok(())
}
