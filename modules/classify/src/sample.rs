use crate::engine::TriageRow;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rules::Label;

pub const DEFAULT_SAMPLE_BUDGET: usize = 1000;

/// Per-tier share of a sample budget. HIGH is kept deliberately small.
pub fn quota(label: Label, budget: usize) -> usize {
    match label {
        Label::High => budget / 10,
        Label::Medium | Label::Low => budget / 3,
        Label::Info => budget - budget / 10 - 2 * (budget / 3),
    }
}

/// Sample rows so no single tier dominates. Each tier is shuffled with a
/// seeded generator; output is grouped by tier, highest first.
pub fn balanced_sample(rows: &[TriageRow], budget: usize, seed: u64) -> Vec<TriageRow> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::with_capacity(budget.min(rows.len()));
    for label in Label::ALL {
        let mut tier: Vec<&TriageRow> = rows.iter().filter(|r| r.final_label == label).collect();
        tier.shuffle(&mut rng);
        out.extend(tier.into_iter().take(quota(label, budget)).cloned());
    }
    out
}
