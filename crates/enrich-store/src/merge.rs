use crate::models::{EnrichMap, EnrichRecord};

/// Merge one incoming observation over the prior record for the same key.
///
/// `first_seen` is immutable once set and `sources` only grows. The core
/// fields take the incoming values; optional fields and extras are overlaid.
pub fn merge_record(prior: Option<&EnrichRecord>, incoming: EnrichRecord) -> EnrichRecord {
    let Some(prior) = prior else { return incoming };
    let mut out = incoming;
    out.first_seen = prior.first_seen.or(out.first_seen);
    out.sources.extend(prior.sources.iter().cloned());
    if out.method.is_none() {
        out.method = prior.method.clone();
    }
    if out.latency_ms.is_none() {
        out.latency_ms = prior.latency_ms;
    }
    if out.body_sha256.is_none() {
        out.body_sha256 = prior.body_sha256.clone();
    }
    for (k, v) in &prior.extra {
        out.extra.entry(k.clone()).or_insert_with(|| v.clone());
    }
    out
}

/// Merge every update into `base`. Returns how many keys were new.
pub fn merge_maps(base: &mut EnrichMap, updates: &EnrichMap) -> usize {
    let mut created = 0;
    for (key, rec) in updates {
        let merged = merge_record(base.get(key), rec.clone());
        if base.insert(key.clone(), merged).is_none() {
            created += 1;
        }
    }
    created
}
