use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity tiers, ordered `Info < Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Label {
    Info,
    Low,
    Medium,
    High,
}

impl Label {
    /// Highest first.
    pub const ALL: [Label; 4] = [Label::High, Label::Medium, Label::Low, Label::Info];

    pub fn weight(self) -> u8 {
        match self {
            Label::High => 4,
            Label::Medium => 3,
            Label::Low => 2,
            Label::Info => 1,
        }
    }

    /// One tier lower; `Info` stays `Info`.
    pub fn step_down(self) -> Label {
        match self {
            Label::High => Label::Medium,
            Label::Medium => Label::Low,
            Label::Low | Label::Info => Label::Info,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Label::High => "HIGH",
            Label::Medium => "MEDIUM",
            Label::Low => "LOW",
            Label::Info => "INFO",
        }
    }

    pub fn parse(s: &str) -> Option<Label> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HIGH" => Some(Label::High),
            "MEDIUM" => Some(Label::Medium),
            "LOW" => Some(Label::Low),
            "INFO" => Some(Label::Info),
            _ => None,
        }
    }

    /// Unknown or missing labels fall to the neutral tier.
    pub fn parse_lenient(s: Option<&str>) -> Label {
        s.and_then(Label::parse).unwrap_or(Label::Info)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a rule came from. Also the match-time tie-breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSource {
    Seed,
    Custom,
    Ai,
}

impl RuleSource {
    pub const LOAD_ORDER: [RuleSource; 3] = [RuleSource::Seed, RuleSource::Custom, RuleSource::Ai];

    pub fn priority(self) -> u8 {
        match self {
            RuleSource::Custom => 3,
            RuleSource::Ai => 2,
            RuleSource::Seed => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RuleSource::Seed => "seed",
            RuleSource::Custom => "custom",
            RuleSource::Ai => "ai",
        }
    }

    pub fn parse(s: &str) -> Option<RuleSource> {
        match s.trim().to_ascii_lowercase().as_str() {
            "seed" => Some(RuleSource::Seed),
            "custom" => Some(RuleSource::Custom),
            "ai" => Some(RuleSource::Ai),
            _ => None,
        }
    }
}

impl fmt::Display for RuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_and_weights_agree() {
        assert!(Label::High > Label::Medium && Label::Low > Label::Info);
        let mut ws: Vec<u8> = Label::ALL.iter().map(|l| l.weight()).collect();
        assert_eq!(ws, vec![4, 3, 2, 1]);
        ws.sort();
        assert_eq!(ws, vec![1, 2, 3, 4]);
    }

    #[test]
    fn step_down_floors_at_info() {
        assert_eq!(Label::High.step_down(), Label::Medium);
        assert_eq!(Label::Low.step_down(), Label::Info);
        assert_eq!(Label::Info.step_down(), Label::Info);
    }

    #[test]
    fn lenient_labels() {
        assert_eq!(Label::parse_lenient(Some(" high ")), Label::High);
        assert_eq!(Label::parse_lenient(Some("CRITICAL")), Label::Info);
        assert_eq!(Label::parse_lenient(None), Label::Info);
        assert_eq!(serde_json::to_string(&Label::Medium).unwrap(), "\"MEDIUM\"");
    }

    #[test]
    fn custom_outranks_ai_outranks_seed() {
        assert!(RuleSource::Custom.priority() > RuleSource::Ai.priority());
        assert!(RuleSource::Ai.priority() > RuleSource::Seed.priority());
        assert_eq!(RuleSource::parse("AI"), Some(RuleSource::Ai));
    }
}
