//! One handler per subcommand. Each maps onto a library operation.

use crate::app::AppContext;
use crate::config::{parse_scheme_order, parse_sources, ProbeConfig};
use crate::output::{print_json, write_records, OutputFormat};
use anyhow::{anyhow, Context, Result};
use clap::Args;
use classify::{preview, write_buckets, Classifier, ClassifyOptions, ReportRows, TriageReport, DEFAULT_SAMPLE_BUDGET};
use enrich_store::{EnrichRecord, EnrichStore, ProbeLock};
use probe::{load_path_specs, live_bases, parse_header, probe_hosts, probe_paths, probe_urls, ProbeOptions, StopSignal};
use reconkit_core::{canonicalize, load_targets, read_lines, write_sorted_lines};
use rules::{
    compile_file, generate_rules, rules_file, sample_corpus, save_rules, CompiledRule, ModelRuleGenerator, RuleGenerator, RuleSet,
    RuleSource, StatisticalRuleGenerator, DEFAULT_SAMPLE_SEED,
};
use serde_json::json;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Args)]
pub struct ScopeArgs {
    /// Scope root domain (e.g. example.com)
    #[arg(long)]
    pub scope: String,
    /// Glob of hosts to admit regardless of the root (repeatable)
    #[arg(long)]
    pub allow: Vec<String>,
    /// Glob of hosts to reject (repeatable, wins over --allow)
    #[arg(long)]
    pub deny: Vec<String>,
    /// Admit hosts outside the root when no allow list is set
    #[arg(long, default_value_t = false)]
    pub include_external: bool,
}

#[derive(Debug, Args, Default)]
pub struct ProbeFlags {
    /// Max concurrent requests
    #[arg(long)]
    pub concurrency: Option<usize>,
    /// Max concurrent requests per host (path fan-out)
    #[arg(long)]
    pub per_host: Option<usize>,
    /// Timeout per request in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    /// Retries per target on failure
    #[arg(long)]
    pub retries: Option<u32>,
    /// Extra request header "Name: value" (repeatable)
    #[arg(long = "header", short = 'H')]
    pub headers: Vec<String>,
    #[arg(long)]
    pub user_agent: Option<String>,
    /// Scheme tried first for bare hosts: https-first or http-first
    #[arg(long)]
    pub scheme_order: Option<String>,
    /// Skip HEAD and always GET
    #[arg(long, default_value_t = false)]
    pub no_head: bool,
    #[arg(long, default_value_t = false)]
    pub no_redirects: bool,
    #[arg(long, default_value_t = false)]
    pub no_title: bool,
    /// Accept invalid TLS certificates
    #[arg(long, default_value_t = false)]
    pub insecure: bool,
    /// Stop scheduling new requests after this many seconds
    #[arg(long)]
    pub deadline_secs: Option<u64>,
    /// Enrichment module name the results are stored under
    #[arg(long)]
    pub module: Option<String>,
    /// Start even if another run for this scope and module looks active
    #[arg(long, default_value_t = false)]
    pub force: bool,
    /// Also write per-target results to this file (JSONL, or CSV with --csv)
    #[arg(long, value_name = "FILE")]
    pub out: Option<PathBuf>,
    #[arg(long, default_value_t = false, requires = "out")]
    pub csv: bool,
}

impl ProbeFlags {
    fn apply(&self, o: &mut ProbeOptions) -> Result<()> {
        if let Some(v) = self.concurrency { o.concurrency = v; }
        if let Some(v) = self.per_host { o.per_host = Some(v); }
        if let Some(v) = self.timeout_ms { o.timeout_ms = v; }
        if let Some(v) = self.retries { o.retries = v; }
        for h in &self.headers { o.headers.push(parse_header(h)?); }
        if let Some(v) = &self.user_agent { o.user_agent = Some(v.clone()); }
        if let Some(v) = &self.scheme_order { o.scheme_order = parse_scheme_order(v)?; }
        if self.no_head { o.head_first = false; }
        if self.no_redirects { o.follow_redirects = false; }
        if self.no_title { o.fetch_title = false; }
        if self.insecure { o.insecure = true; }
        Ok(())
    }

    /// Preset, then config section, then flags.
    fn resolve(&self, preset: ProbeOptions, section: Option<&ProbeConfig>) -> Result<ProbeOptions> {
        let mut o = preset;
        if let Some(s) = section {
            s.apply(&mut o)?;
        }
        self.apply(&mut o)?;
        Ok(o)
    }
}

#[derive(Debug, Args, Default)]
pub struct ClassifyFlags {
    /// Rule sources to load, comma separated (seed,custom,ai)
    #[arg(long, value_delimiter = ',')]
    pub sources: Vec<String>,
    /// Keep the nominal label when no status code was observed
    #[arg(long, default_value_t = false)]
    pub no_demote_missing: bool,
    /// Do not force 401/403 to INFO
    #[arg(long, default_value_t = false)]
    pub no_demote_blocked: bool,
    /// Do not force 404 to INFO
    #[arg(long, default_value_t = false)]
    pub no_demote_404: bool,
    /// Leave URLs without an observed status code unclassified
    #[arg(long, default_value_t = false)]
    pub http_required: bool,
    /// Corpus file; defaults to <scope>/urls.txt, then the enrichment keys
    #[arg(long, value_name = "FILE")]
    pub input: Option<PathBuf>,
}

impl ClassifyFlags {
    fn options(&self, app: &AppContext) -> ClassifyOptions {
        let mut o = ClassifyOptions::default();
        if let Some(c) = &app.config.classify {
            c.apply(&mut o);
        }
        if self.no_demote_missing { o.demote_missing_code = false; }
        if self.no_demote_blocked { o.demote_blocked = false; }
        if self.no_demote_404 { o.demote_not_found = false; }
        if self.http_required { o.http_required = true; }
        o
    }

    fn sources(&self, app: &AppContext) -> Result<Vec<RuleSource>> {
        if !self.sources.is_empty() {
            return parse_sources(&self.sources);
        }
        match app.config.classify.as_ref().and_then(|c| c.sources.as_ref()) {
            Some(s) => parse_sources(s),
            None => Ok(RuleSource::LOAD_ORDER.to_vec()),
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("starting async runtime")
}

fn stop_signal(deadline_secs: Option<u64>) -> StopSignal {
    let stop = StopSignal::new();
    if let Some(s) = deadline_secs {
        stop.stop_after(Duration::from_secs(s));
    }
    stop
}

/// Per-target rows from the module snapshot just committed.
fn emit_records(store: &EnrichStore, module: &str, keys: &[String], flags: &ProbeFlags) -> Result<()> {
    let Some(out) = flags.out.as_deref() else { return Ok(()) };
    let snap = store.read_module(module)?;
    let rows: Vec<(String, EnrichRecord)> = keys.iter().filter_map(|k| snap.get(k).map(|r| (k.clone(), r.clone()))).collect();
    write_records(Some(out), flags.csv, &rows)?;
    info!(path = %out.display(), rows = rows.len(), "results written");
    Ok(())
}

pub fn canon(app: &AppContext, input: &Path, scope: Option<&ScopeArgs>, out: Option<&Path>) -> Result<()> {
    let lines = read_lines(input)?;
    let filter = match scope {
        Some(s) => Some(app.scope_filter(&s.scope, &s.allow, &s.deny, s.include_external)?),
        None => None,
    };
    let (targets, stats) = load_targets(&lines, filter.as_ref());
    info!(read = stats.read, accepted = stats.accepted, unparsable = stats.unparsable, out_of_scope = stats.out_of_scope, duplicates = stats.duplicates, "corpus canonicalized");
    let keys = targets.into_iter().map(|t| t.key);
    match out {
        Some(p) => {
            let n = write_sorted_lines(p, keys).with_context(|| format!("writing {}", p.display()))?;
            info!(path = %p.display(), lines = n, "canonical corpus written");
        }
        None => {
            let sorted: BTreeSet<String> = keys.collect();
            for k in sorted {
                println!("{k}");
            }
        }
    }
    Ok(())
}

pub fn scope(app: &AppContext, args: &ScopeArgs, hosts: &[String], format: OutputFormat) -> Result<()> {
    let filter = app.scope_filter(&args.scope, &args.allow, &args.deny, args.include_external)?;
    let decisions: Vec<(String, &'static str, bool)> = hosts
        .iter()
        .map(|h| {
            let d = filter.decide(h);
            (h.clone(), d.as_str(), d.admits())
        })
        .collect();
    match format {
        OutputFormat::Text => {
            for (h, d, _) in &decisions {
                println!("{h}\t{d}");
            }
        }
        OutputFormat::Json => {
            let v: Vec<_> = decisions.iter().map(|(h, d, a)| json!({"host": h, "decision": d, "admitted": a})).collect();
            print_json(&v)?;
        }
        OutputFormat::Jsonl => {
            for (h, d, a) in &decisions {
                println!("{}", json!({"host": h, "decision": d, "admitted": a}));
            }
        }
    }
    Ok(())
}

pub fn probe_urls_cmd(app: &AppContext, args: &ScopeArgs, input: &Path, flags: &ProbeFlags) -> Result<()> {
    let store = app.store(&args.scope)?;
    let filter = app.scope_filter(&args.scope, &args.allow, &args.deny, args.include_external)?;
    let (targets, corpus) = load_targets(&read_lines(input)?, Some(&filter));
    let opts = flags.resolve(ProbeOptions::for_urls(), app.config.probe.as_ref())?;
    let module = flags.module.as_deref().unwrap_or("probe_urls");
    let run_id = Uuid::now_v7();
    let _lock = ProbeLock::acquire(store.layout(), module, &app.registry, run_id, flags.force)?;
    let keys: Vec<String> = targets.iter().map(|t| t.key.clone()).collect();
    info!(%run_id, module, targets = targets.len(), "url probe starting");

    let mut batch = store.url_batch(module, run_id)?;
    let rt = runtime()?;
    let stats = rt.block_on(async {
        let stop = stop_signal(flags.deadline_secs);
        probe_urls(targets, opts, &mut batch, &stop).await
    })?;
    let commit = batch.commit()?;
    emit_records(&store, module, &keys, flags)?;
    print_json(&json!({ "corpus": corpus, "probe": stats, "skipped": stats.skipped(), "commit": commit }))
}

pub fn probe_hosts_cmd(app: &AppContext, args: &ScopeArgs, input: &Path, flags: &ProbeFlags) -> Result<()> {
    let store = app.store(&args.scope)?;
    let filter = app.scope_filter(&args.scope, &args.allow, &args.deny, args.include_external)?;
    let (targets, corpus) = load_targets(&read_lines(input)?, Some(&filter));
    let hosts: Vec<String> = targets.iter().map(|t| t.host().to_string()).collect::<BTreeSet<_>>().into_iter().collect();
    let opts = flags.resolve(ProbeOptions::for_hosts(), app.config.hosts.as_ref())?;
    let module = flags.module.as_deref().unwrap_or("subdomains");
    let run_id = Uuid::now_v7();
    let _lock = ProbeLock::acquire(store.layout(), module, &app.registry, run_id, flags.force)?;
    info!(%run_id, module, hosts = hosts.len(), "host probe starting");

    let keys = hosts.clone();
    let mut batch = store.host_batch(module, run_id)?;
    let rt = runtime()?;
    let stats = rt.block_on(async {
        let stop = stop_signal(flags.deadline_secs);
        probe_hosts(hosts, opts, &mut batch, &stop).await
    })?;
    let commit = batch.commit()?;
    emit_records(&store, module, &keys, flags)?;
    print_json(&json!({ "corpus": corpus, "probe": stats, "skipped": stats.skipped(), "commit": commit }))
}

pub fn probe_paths_cmd(
    app: &AppContext,
    scope: &str,
    paths: &Path,
    hosts_module: &str,
    statuses: &[u16],
    allow_unsafe: bool,
    flags: &ProbeFlags,
) -> Result<()> {
    let store = app.store(scope)?;
    let section = app.config.paths.as_ref();
    let statuses: Vec<u16> = if !statuses.is_empty() {
        statuses.to_vec()
    } else {
        section.and_then(|p| p.statuses.clone()).unwrap_or_else(|| vec![200])
    };
    let bases = live_bases(&*store.read_module(hosts_module)?, &statuses);
    if bases.is_empty() {
        warn!(module = hosts_module, ?statuses, "no live hosts to fan out over; run probe-hosts first");
    }
    let specs = load_path_specs(paths)?;
    let opts = flags.resolve(ProbeOptions::for_paths(), section)?;
    let module = flags.module.as_deref().unwrap_or("probe_paths");
    let run_id = Uuid::now_v7();
    let _lock = ProbeLock::acquire(store.layout(), module, &app.registry, run_id, flags.force)?;
    info!(%run_id, module, bases = bases.len(), specs = specs.len(), "path probe starting");

    let mut batch = store.url_batch(module, run_id)?;
    let rt = runtime()?;
    let (stats, urls) = rt.block_on(async {
        let stop = stop_signal(flags.deadline_secs);
        probe_paths(bases, specs, opts, allow_unsafe, &mut batch, &stop).await
    })?;
    let commit = batch.commit()?;
    let keys: Vec<String> = urls.iter().map(|u| canonicalize(u)).collect();
    emit_records(&store, module, &keys, flags)?;
    print_json(&json!({ "probe": stats, "skipped": stats.skipped(), "commit": commit }))
}

pub fn rollup(app: &AppContext, scope: &str, rebuild: bool, format: OutputFormat) -> Result<()> {
    let store = app.store(scope)?;
    let buckets = if rebuild { store.rebuild_rollup()? } else { store.read_rollup() };
    match format {
        OutputFormat::Text => {
            for b in &buckets {
                let hosts: Vec<&str> = b.hosts.iter().map(|h| h.host.as_str()).collect();
                println!("{}\t{} hosts ({} alive)\t{}", b.ip, b.total_hosts, b.alive, hosts.join(","));
            }
        }
        OutputFormat::Json => print_json(&buckets)?,
        OutputFormat::Jsonl => {
            for b in &buckets {
                println!("{}", serde_json::to_string(b)?);
            }
        }
    }
    Ok(())
}

fn rule_json(r: &CompiledRule) -> serde_json::Value {
    json!({
        "id": r.id,
        "label": r.label,
        "reason": r.reason,
        "source": r.source,
        "pattern": r.pattern.as_str(),
        "code_in": r.code_in,
        "method": r.methods,
        "structural": r.matcher.is_some(),
    })
}

/// Compile one document, or the merged rule set for a scope.
pub fn rules_compile(app: &AppContext, scope: Option<&str>, file: Option<&Path>, source: &str, sources: &[String]) -> Result<()> {
    if let Some(f) = file {
        let source = RuleSource::parse(source).ok_or_else(|| anyhow!("unknown rule source {source:?}"))?;
        let report = compile_file(f, source);
        return print_json(&json!({
            "file": f,
            "rules": report.rules.iter().map(rule_json).collect::<Vec<_>>(),
            "dropped": report.dropped,
            "notes": report.notes,
        }));
    }
    let scope = scope.ok_or_else(|| anyhow!("provide --scope or --file"))?;
    let store = app.store(scope)?;
    let sources = if sources.is_empty() { RuleSource::LOAD_ORDER.to_vec() } else { parse_sources(sources)? };
    let set = RuleSet::load(&store.layout().rules_dir(), &sources);
    print_json(&json!({
        "rules_version": set.version(),
        "rules": set.rules().iter().map(rule_json).collect::<Vec<_>>(),
        "dropped": set.dropped.iter().map(|(s, d)| json!({"source": s, "id": d.id, "reason": d.reason})).collect::<Vec<_>>(),
        "notes": set.notes,
    }))
}

#[derive(Debug, Args)]
pub struct GenerateArgs {
    #[arg(long)]
    pub scope: String,
    /// Corpus file; defaults to <scope>/urls.txt, then the enrichment keys
    #[arg(long, value_name = "FILE")]
    pub input: Option<PathBuf>,
    /// Lines sampled from the corpus for the generator
    #[arg(long)]
    pub sample: Option<usize>,
    #[arg(long)]
    pub seed: Option<u64>,
    #[arg(long)]
    pub model: Option<String>,
    /// Ollama-compatible generate endpoint
    #[arg(long)]
    pub endpoint: Option<String>,
    #[arg(long)]
    pub temperature: Option<f32>,
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    /// Extra model attempts before falling back
    #[arg(long)]
    pub retries: Option<u32>,
    /// Skip the model and derive rules statistically
    #[arg(long, default_value_t = false)]
    pub no_model: bool,
}

pub fn rules_generate(app: &AppContext, args: &GenerateArgs) -> Result<()> {
    let cfg = app.config.rulegen.clone().unwrap_or_default();
    let store = app.store(&args.scope)?;
    let corpus = app.corpus(&store, args.input.as_deref())?;
    if corpus.is_empty() {
        return Err(anyhow!("no corpus for scope {:?}: pass --input or create {}", args.scope, store.layout().base().join("urls.txt").display()));
    }
    let size = args.sample.or(cfg.sample_size).unwrap_or(200);
    let seed = args.seed.or(cfg.seed).unwrap_or(DEFAULT_SAMPLE_SEED);
    let sample = sample_corpus(&corpus, size, seed);

    let model = if args.no_model {
        None
    } else {
        let endpoint = args.endpoint.clone().or(cfg.endpoint).unwrap_or_else(|| ModelRuleGenerator::DEFAULT_ENDPOINT.to_string());
        let name = args.model.clone().or(cfg.model).unwrap_or_else(|| ModelRuleGenerator::DEFAULT_MODEL.to_string());
        let timeout = Duration::from_millis(args.timeout_ms.or(cfg.timeout_ms).unwrap_or(120_000));
        let g = ModelRuleGenerator::new(&endpoint, &name, timeout)?.with_temperature(args.temperature.or(cfg.temperature).unwrap_or(0.5));
        Some(g)
    };
    let retries = args.retries.or(cfg.retries).unwrap_or(1);
    let fallback = StatisticalRuleGenerator::default();
    let rt = runtime()?;
    let outcome = rt.block_on(generate_rules(model.as_ref().map(|g| g as &dyn RuleGenerator), &fallback, &sample, retries));
    if outcome.degraded {
        warn!(strategy = ?outcome.strategy, "rule generation degraded to statistical fallback");
    }
    let path = rules_file(&store.layout().rules_dir(), RuleSource::Ai);
    save_rules(&path, &outcome.specs)?;
    print_json(&json!({
        "path": path,
        "sample": sample.len(),
        "rules": outcome.specs.len(),
        "strategy": outcome.strategy,
        "degraded": outcome.degraded,
    }))
}

pub fn classify_cmd(app: &AppContext, scope: &str, flags: &ClassifyFlags, full: bool, budget: Option<usize>, seed: Option<u64>, no_buckets: bool) -> Result<()> {
    let store = app.store(scope)?;
    let corpus = app.corpus(&store, flags.input.as_deref())?;
    let set = RuleSet::load(&store.layout().rules_dir(), &flags.sources(app)?);
    if set.is_empty() {
        warn!("rule set is empty, every URL will be unclassified");
    }
    let opts = flags.options(app);
    let enrich = store.read_global();
    let classification = Classifier::new(&set, opts).classify(&corpus, &enrich);

    let cfg = app.config.classify.clone().unwrap_or_default();
    let rows = if full {
        ReportRows::All
    } else {
        ReportRows::Balanced {
            budget: budget.or(cfg.sample_budget).unwrap_or(DEFAULT_SAMPLE_BUDGET),
            seed: seed.or(cfg.sample_seed).unwrap_or(DEFAULT_SAMPLE_SEED),
        }
    };
    let report = TriageReport::build(&classification, &set.version(), &opts, &set.notes, rows);
    let path = store.layout().triage_report();
    report.save(&path)?;
    info!(path = %path.display(), "triage report written");
    let buckets = if no_buckets { None } else { Some(write_buckets(&store.layout().buckets_dir(), &classification)?) };
    print_json(&json!({ "report": path, "summary": report.summary, "buckets": buckets }))
}

pub fn preview_cmd(app: &AppContext, scope: &str, flags: &ClassifyFlags, limit: usize, seed: Option<u64>) -> Result<()> {
    let store = app.store(scope)?;
    let corpus = app.corpus(&store, flags.input.as_deref())?;
    let set = RuleSet::load(&store.layout().rules_dir(), &flags.sources(app)?);
    let enrich = store.read_global();
    let classifier = Classifier::new(&set, flags.options(app));
    print_json(&preview(&classifier, &corpus, &enrich, limit, seed))
}
