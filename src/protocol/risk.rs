//! Risk-level vocabularies and therapeutic-school tag normalization.
//!
//! Two parallel risk vocabularies exist on the wire: the UI-facing levels
//! `none | mild | high` and the internal flags `none | support | crisis`.
//! They are related by a fixed bijection and both are coerced to closed
//! enums at the parse boundary — raw strings never travel deeper.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Risk enums
// ---------------------------------------------------------------------------

/// Internal risk classification of a turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskFlag {
    #[default]
    None,
    Support,
    Crisis,
}

/// UI/wire-facing risk level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireRisk {
    #[default]
    None,
    Mild,
    High,
}

impl RiskFlag {
    /// Tolerant parse of a wire string; anything unrecognized is `None`.
    pub fn from_wire_str(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "high" | "crisis" => RiskFlag::Crisis,
            "mild" | "support" => RiskFlag::Support,
            _ => RiskFlag::None,
        }
    }

    /// The wire-level counterpart under the fixed bijection.
    pub fn wire_level(self) -> WireRisk {
        match self {
            RiskFlag::None => WireRisk::None,
            RiskFlag::Support => WireRisk::Mild,
            RiskFlag::Crisis => WireRisk::High,
        }
    }

    /// The `risk` wire boolean: true iff the level is mild or high.
    pub fn is_elevated(self) -> bool {
        !matches!(self, RiskFlag::None)
    }
}

impl WireRisk {
    pub fn internal(self) -> RiskFlag {
        match self {
            WireRisk::None => RiskFlag::None,
            WireRisk::Mild => RiskFlag::Support,
            WireRisk::High => RiskFlag::Crisis,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WireRisk::None => "none",
            WireRisk::Mild => "mild",
            WireRisk::High => "high",
        }
    }
}

// ---------------------------------------------------------------------------
// School tag normalization
// ---------------------------------------------------------------------------

/// Exact-match alias table, keys lowercased.
const SCHOOL_ALIASES: &[(&[&str], &str)] = &[
    (&["kvt", "cbt", "verhaltenstherapie", "cbt/kvt"], "CBT/KVT"),
    (&["act", "akzeptanz", "akzeptanz- und commitmenttherapie"], "ACT"),
    (&["sft", "schema", "schematherapie"], "Schematherapie"),
    (&["ifs", "inneres team", "teilearbeit"], "IFS"),
    (&["sf", "lösungsfokus", "solution", "systemisch"], "Systemisch"),
    (&["achtsamkeit", "mindfulness", "mbsr"], "Achtsamkeit"),
];

/// Substring fallback buckets for unseen spellings.
const SCHOOL_HINTS: &[(&[&str], &str)] = &[
    (&["kvt", "cbt", "verhalten", "kognitiv"], "CBT/KVT"),
    (&["akzeptanz", "commitment"], "ACT"),
    (&["schema"], "Schematherapie"),
    (&["inneres team", "ifs", "teile"], "IFS"),
    (&["system", "lösung", "solution"], "Systemisch"),
    (&["achtsam", "mindful"], "Achtsamkeit"),
];

const MAX_PASSTHROUGH_TAG: usize = 24;

/// Map a raw school/tag spelling to its canonical tag.
///
/// Unknown input never fails: it falls back to a truncated passthrough of
/// the original spelling.
pub fn canonical_school(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let lower = trimmed.to_lowercase();

    for (aliases, canonical) in SCHOOL_ALIASES {
        if aliases.contains(&lower.as_str()) {
            return (*canonical).to_string();
        }
    }
    for (hints, canonical) in SCHOOL_HINTS {
        if hints.iter().any(|h| lower.contains(h)) {
            return (*canonical).to_string();
        }
    }

    trimmed.chars().take(MAX_PASSTHROUGH_TAG).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_round_trip() {
        for level in [WireRisk::None, WireRisk::Mild, WireRisk::High] {
            assert_eq!(level.internal().wire_level(), level);
        }
        for flag in [RiskFlag::None, RiskFlag::Support, RiskFlag::Crisis] {
            assert_eq!(flag.wire_level().internal(), flag);
        }
    }

    #[test]
    fn test_risk_from_wire_str() {
        assert_eq!(RiskFlag::from_wire_str("HIGH"), RiskFlag::Crisis);
        assert_eq!(RiskFlag::from_wire_str("crisis"), RiskFlag::Crisis);
        assert_eq!(RiskFlag::from_wire_str(" mild "), RiskFlag::Support);
        assert_eq!(RiskFlag::from_wire_str("support"), RiskFlag::Support);
        assert_eq!(RiskFlag::from_wire_str("none"), RiskFlag::None);
        assert_eq!(RiskFlag::from_wire_str("banana"), RiskFlag::None);
        assert_eq!(RiskFlag::from_wire_str(""), RiskFlag::None);
    }

    #[test]
    fn test_risk_boolean() {
        assert!(!RiskFlag::None.is_elevated());
        assert!(RiskFlag::Support.is_elevated());
        assert!(RiskFlag::Crisis.is_elevated());
    }

    #[test]
    fn test_school_aliases() {
        assert_eq!(canonical_school("kvt"), "CBT/KVT");
        assert_eq!(canonical_school("CBT"), "CBT/KVT");
        assert_eq!(canonical_school("Schematherapie"), "Schematherapie");
        assert_eq!(canonical_school("mindfulness"), "Achtsamkeit");
    }

    #[test]
    fn test_school_substring_fallback() {
        assert_eq!(canonical_school("kognitive Umstrukturierung"), "CBT/KVT");
        assert_eq!(canonical_school("lösungsorientiert"), "Systemisch");
        assert_eq!(canonical_school("Achtsamkeitsübung"), "Achtsamkeit");
    }

    #[test]
    fn test_school_unknown_passthrough_truncated() {
        assert_eq!(canonical_school("Logotherapie"), "Logotherapie");
        let long = "x".repeat(60);
        assert_eq!(canonical_school(&long).chars().count(), 24);
        assert_eq!(canonical_school("  "), "");
    }
}
