//! Rule compilation, merging and generation for URL triage.

mod compile;
mod error;
mod generate;
mod label;
mod matcher;
mod ruleset;
mod seed;
mod spec;

pub use compile::{compile_file, compile_rule, compile_specs, compile_str, compile_value, slug, CompileReport, CompiledRule, Dropped};
pub use error::{Result, RuleError};
pub use generate::{
    generate_rules, parse_model_reply, sample_corpus, save_rules, GenerationOutcome, ModelRuleGenerator, RuleGenerator,
    StatisticalRuleGenerator, Strategy, DEFAULT_SAMPLE_SEED,
};
pub use label::{Label, RuleSource};
pub use matcher::{Matcher, UrlFacts};
pub use ruleset::{rules_file, RuleSet};
pub use seed::seed_report;
pub use spec::{rule_values, RuleSpec};
