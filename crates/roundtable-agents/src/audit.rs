use rust_decimal::Decimal;
use roundtable_models::{AuditMode, AuditSettings};
use tracing::debug;

/// Weight subtracted from the policy confidence per matched soft signal.
const SOFT_SIGNAL_WEIGHT: Decimal = Decimal::from_parts(2, 0, 0, false, 1);

/// Visibility decision for one completed turn.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditVerdict {
    pub visible: bool,
    /// Policy confidence in [0, 1]; 1 means no soft signal matched.
    pub score: Decimal,
    pub reason: Option<String>,
}

impl AuditVerdict {
    fn visible(score: Decimal) -> Self {
        Self {
            visible: true,
            score,
            reason: None,
        }
    }
}

/// Decides which agent output becomes visible to the rest of the panel.
pub struct AuditFilter {
    settings: AuditSettings,
    hard_patterns: Vec<String>,
    soft_signals: Vec<String>,
}

impl AuditFilter {
    pub fn new(settings: AuditSettings) -> Self {
        let lower = |terms: &[String]| terms.iter().map(|t| t.to_lowercase()).collect();
        Self {
            hard_patterns: lower(&settings.hard_patterns),
            soft_signals: lower(&settings.soft_signals),
            settings,
        }
    }

    /// Whether rejected turns are still admitted (redacted) to the transcript.
    pub fn logs_filtered(&self) -> bool {
        self.settings.log_filtered
    }

    /// Threshold applied to this speaker. The chair gets a relaxed bar.
    pub fn effective_threshold(&self, is_chairman: bool) -> Decimal {
        let threshold = self.settings.filter_threshold;
        if is_chairman {
            threshold * (Decimal::ONE - self.settings.chairman_relax_factor)
        } else {
            threshold
        }
    }

    pub fn evaluate(&self, text: &str, role: &str, is_chairman: bool) -> AuditVerdict {
        if !self.settings.enabled {
            return AuditVerdict::visible(Decimal::ONE);
        }

        let lowered = text.to_lowercase();
        if let Some(pattern) = self.hard_patterns.iter().find(|p| lowered.contains(p.as_str())) {
            debug!(role, pattern = %pattern, "Hard audit violation");
            return AuditVerdict {
                visible: false,
                score: Decimal::ZERO,
                reason: Some(format!("hard violation: '{pattern}'")),
            };
        }

        let matched: Vec<&str> = self
            .soft_signals
            .iter()
            .filter(|s| lowered.contains(s.as_str()))
            .map(String::as_str)
            .collect();
        let weight = match self.settings.mode {
            AuditMode::Strict => SOFT_SIGNAL_WEIGHT * Decimal::TWO,
            AuditMode::Moderate | AuditMode::Lenient => SOFT_SIGNAL_WEIGHT,
        };
        let penalty = weight * Decimal::from(matched.len() as u64);
        let score = (Decimal::ONE - penalty).max(Decimal::ZERO);

        if self.settings.mode == AuditMode::Lenient {
            return AuditVerdict::visible(score);
        }

        let threshold = self.effective_threshold(is_chairman);
        if score < threshold {
            debug!(role, %score, %threshold, signals = ?matched, "Turn below audit threshold");
            return AuditVerdict {
                visible: false,
                score,
                reason: Some(format!(
                    "policy confidence {score} below {threshold} (signals: {})",
                    matched.join(", ")
                )),
            };
        }
        AuditVerdict::visible(score)
    }
}
