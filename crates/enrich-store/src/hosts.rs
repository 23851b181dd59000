//! Host-level records, the host to IP graph and the per-IP rollup.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub type HostIndex = BTreeMap<String, HostRecord>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostStatus {
    #[serde(default)]
    pub alive: bool,
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub scheme: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    pub host: String,
    #[serde(default)]
    pub first_seen: i64,
    #[serde(default)]
    pub last_seen: i64,
    #[serde(default)]
    pub last_status: HostStatus,
    #[serde(default)]
    pub ip_now: Vec<String>,
    #[serde(default)]
    pub ip_hist: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// What one host probe observed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostObservation {
    pub host: String,
    pub status: HostStatus,
    pub ips: Vec<String>,
    pub content_type: Option<String>,
    pub final_url: Option<String>,
    pub error: Option<String>,
}

/// Fold an observation into the host index entry. `first_seen` sticks,
/// `ip_hist` is the sorted union of every address ever seen.
pub fn merge_host(prior: Option<&HostRecord>, obs: &HostObservation, now: i64) -> HostRecord {
    let ip_now: Vec<String> = obs.ips.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
    let mut hist: BTreeSet<String> = prior.map(|p| p.ip_hist.iter().cloned().collect()).unwrap_or_default();
    hist.extend(ip_now.iter().cloned());
    HostRecord {
        host: obs.host.clone(),
        first_seen: prior.map(|p| p.first_seen).filter(|t| *t > 0).unwrap_or(now),
        last_seen: now,
        last_status: obs.status.clone(),
        ip_now,
        ip_hist: hist.into_iter().collect(),
        tags: prior.map(|p| p.tags.clone()).unwrap_or_default(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupHost {
    pub host: String,
    pub alive: bool,
    pub code: Option<u16>,
    pub title: Option<String>,
    pub scheme: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpRollup {
    pub ip: String,
    pub total_hosts: usize,
    pub alive: usize,
    pub hosts: Vec<RollupHost>,
}

/// Group hosts by current address. Hosts without one land in the `-` bucket.
pub fn build_rollup(index: &HostIndex) -> Vec<IpRollup> {
    let mut by_ip: BTreeMap<String, IpRollup> = BTreeMap::new();
    let unresolved = ["-".to_string()];
    for (host, rec) in index {
        let ips: &[String] = if rec.ip_now.is_empty() { &unresolved } else { &rec.ip_now };
        for ip in ips {
            let bucket = by_ip
                .entry(ip.clone())
                .or_insert_with(|| IpRollup { ip: ip.clone(), total_hosts: 0, alive: 0, hosts: Vec::new() });
            bucket.total_hosts += 1;
            if rec.last_status.alive {
                bucket.alive += 1;
            }
            bucket.hosts.push(RollupHost {
                host: host.clone(),
                alive: rec.last_status.alive,
                code: rec.last_status.code,
                title: rec.last_status.title.clone(),
                scheme: rec.last_status.scheme.clone(),
            });
        }
    }
    let mut out: Vec<IpRollup> = by_ip.into_values().collect();
    for b in &mut out {
        b.hosts.sort_by(|x, y| (!x.alive, &x.host).cmp(&(!y.alive, &y.host)));
    }
    out.sort_by(|a, b| b.alive.cmp(&a.alive).then(b.total_hosts.cmp(&a.total_hosts)).then(a.ip.cmp(&b.ip)));
    out
}
