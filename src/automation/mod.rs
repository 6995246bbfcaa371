//! Automation/AI-collaborator detection context, fed into the audit log.
//!
//! The detection heuristic itself is explicitly out of scope for this
//! program: what lives here is the pluggable interface and the one concrete
//! implementation the program ships with (`ANSIBLE_*` environment
//! variables), so a caller can supply a better-informed detector without
//! touching the session loop or logger.
use crate::config::Configuration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AutomationContext {
    pub(crate) detected: bool,
    pub(crate) confidence: u8,
    pub(crate) source: String,
}

impl AutomationContext {
    fn none() -> Self {
        Self {
            detected: false,
            confidence: 0,
            source: "none".to_string(),
        }
    }
}

pub(crate) trait AutomationDetector {
    fn detect(&self) -> AutomationContext;
}

/// Looks for `ANSIBLE_*` environment variables, the only signal this
/// program ships a concrete detector for.
pub(crate) struct EnvironmentDetector;

impl AutomationDetector for EnvironmentDetector {
    fn detect(&self) -> AutomationContext {
        let ansible_vars = std::env::vars().filter(|(k, _)| k.starts_with("ANSIBLE_")).count();
        if ansible_vars == 0 {
            return AutomationContext::none();
        }
        AutomationContext {
            detected: true,
            confidence: 100,
            source: "ansible-env".to_string(),
        }
    }
}

/// Apply `automation_detection_enabled`/`automation_detection_confidence_threshold`:
/// a detection below the configured threshold, or detection disabled
/// outright, is reported as undetected so logging doesn't flag low-
/// confidence noise.
pub(crate) fn evaluate(config: &Configuration, detector: &dyn AutomationDetector) -> AutomationContext {
    if !config.automation_detection_enabled {
        return AutomationContext::none();
    }
    let context = detector.detect();
    if context.confidence < config.automation_detection_confidence_threshold {
        return AutomationContext::none();
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDetector(AutomationContext);
    impl AutomationDetector for FixedDetector {
        fn detect(&self) -> AutomationContext {
            self.0.clone()
        }
    }

    #[test]
    fn disabled_detection_always_reports_none() {
        let mut config = Configuration::default();
        config.automation_detection_enabled = false;
        let detector = FixedDetector(AutomationContext {
            detected: true,
            confidence: 100,
            source: "test".to_string(),
        });
        assert!(!evaluate(&config, &detector).detected);
    }

    #[test]
    fn low_confidence_detection_is_suppressed() {
        let mut config = Configuration::default();
        config.automation_detection_confidence_threshold = 80;
        let detector = FixedDetector(AutomationContext {
            detected: true,
            confidence: 50,
            source: "test".to_string(),
        });
        assert!(!evaluate(&config, &detector).detected);
    }

    #[test]
    fn confident_detection_passes_through() {
        let config = Configuration::default();
        let detector = FixedDetector(AutomationContext {
            detected: true,
            confidence: 90,
            source: "test".to_string(),
        });
        let result = evaluate(&config, &detector);
        assert!(result.detected);
        assert_eq!(result.source, "test");
    }
}
