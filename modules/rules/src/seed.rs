use crate::compile::{compile_str, CompileReport};
use crate::label::RuleSource;

const SEED_RULES: &str = include_str!("../data/seed_rules.json");

/// The bundled default rules.
pub fn seed_report() -> CompileReport {
    compile_str(SEED_RULES, RuleSource::Seed)
}
