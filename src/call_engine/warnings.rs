//! Call Quality Warnings
//!
//! Die Telefonie-Schicht meldet bei jeder Änderung den aktuellen und den
//! vorherigen Satz an Warnungen. Daraus werden neu aufgetretene und
//! aufgehobene Warnungen für ein kurzzeitiges Banner berechnet.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Qualitätswarnung eines laufenden Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QualityWarning {
    HighRtt,
    HighJitter,
    HighPacketsLostFraction,
    LowMos,
    ConstantAudioInputLevel,
}

impl QualityWarning {
    /// Wandelt einen Warnungs-Code der Telefonie-Schicht um
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::HighRtt),
            1 => Some(Self::HighJitter),
            2 => Some(Self::HighPacketsLostFraction),
            3 => Some(Self::LowMos),
            4 => Some(Self::ConstantAudioInputLevel),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighRtt => "high-rtt",
            Self::HighJitter => "high-jitter",
            Self::HighPacketsLostFraction => "high-packets-lost-fraction",
            Self::LowMos => "low-mos",
            Self::ConstantAudioInputLevel => "constant-audio-input-level",
        }
    }
}

impl fmt::Display for QualityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unterschied zwischen zwei Warnungs-Snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarningDiff {
    pub raised: BTreeSet<QualityWarning>,
    pub cleared: BTreeSet<QualityWarning>,
}

impl WarningDiff {
    /// `raised = current - (current ∩ previous)`, `cleared = previous - (current ∩ previous)`
    pub fn between(current: &BTreeSet<QualityWarning>, previous: &BTreeSet<QualityWarning>) -> Self {
        let common: BTreeSet<_> = current.intersection(previous).copied().collect();
        Self {
            raised: current.difference(&common).copied().collect(),
            cleared: previous.difference(&common).copied().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.raised.is_empty() && self.cleared.is_empty()
    }

    /// Banner-Text, oder `None` wenn sich nichts geändert hat
    pub fn message(&self) -> Option<String> {
        let mut parts = Vec::new();
        if !self.raised.is_empty() {
            parts.push(format!("Warnings detected: {}", join(&self.raised)));
        }
        if !self.cleared.is_empty() {
            parts.push(format!("Warnings cleared: {}", join(&self.cleared)));
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("; "))
        }
    }
}

fn join(warnings: &BTreeSet<QualityWarning>) -> String {
    warnings
        .iter()
        .map(QualityWarning::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use QualityWarning::*;

    fn set(warnings: &[QualityWarning]) -> BTreeSet<QualityWarning> {
        warnings.iter().copied().collect()
    }

    #[test]
    fn test_diff_raised_and_cleared() {
        let diff = WarningDiff::between(&set(&[HighJitter, LowMos]), &set(&[HighRtt, HighJitter]));
        assert_eq!(diff.raised, set(&[LowMos]));
        assert_eq!(diff.cleared, set(&[HighRtt]));
        assert_eq!(
            diff.message().as_deref(),
            Some("Warnings detected: low-mos; Warnings cleared: high-rtt")
        );
    }

    #[test]
    fn test_diff_is_idempotent() {
        for warnings in [set(&[]), set(&[HighRtt]), set(&[HighRtt, LowMos, ConstantAudioInputLevel])] {
            let diff = WarningDiff::between(&warnings, &warnings);
            assert!(diff.is_empty());
            assert!(diff.message().is_none());
        }
    }

    #[test]
    fn test_message_lists_all_raised() {
        let diff = WarningDiff::between(&set(&[HighRtt, HighPacketsLostFraction]), &set(&[]));
        assert_eq!(
            diff.message().as_deref(),
            Some("Warnings detected: high-rtt, high-packets-lost-fraction")
        );
    }

    #[test]
    fn test_from_code() {
        assert_eq!(QualityWarning::from_code(0), Some(HighRtt));
        assert_eq!(QualityWarning::from_code(4), Some(ConstantAudioInputLevel));
        assert_eq!(QualityWarning::from_code(5), None);
    }
}
