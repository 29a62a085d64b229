//! Error Classification
//!
//! Maps a raw failure message to an [`ErrorType`] and a [`Severity`].
//! The default classifier matches keywords; hosts with structured error
//! codes can plug in their own [`ErrorClassifier`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Taxonomy of step failures.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    Network,
    Timeout,
    Validation,
    System,
    Execution,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Validation => "validation",
            Self::System => "system",
            Self::Execution => "execution",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(label)
    }
}

/// Classifies failure messages.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, message: &str) -> ErrorType;

    fn severity(&self, message: &str) -> Severity;
}

/// Keyword-based classifier. Rules are checked in order; the first match
/// wins. Matching is case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct HeuristicClassifier;

const TYPE_RULES: &[(ErrorType, &[&str])] = &[
    (ErrorType::Network, &["network", "fetch", "connection"]),
    (ErrorType::Timeout, &["timeout", "timed out", "deadline"]),
    (ErrorType::Validation, &["validation", "invalid", "required"]),
    (ErrorType::System, &["system", "internal", "server"]),
];

const SEVERITY_RULES: &[(Severity, &[&str])] = &[
    (Severity::Critical, &["critical", "fatal", "crash"]),
    (Severity::High, &["error", "failed", "exception"]),
    (Severity::Medium, &["warning", "deprecated"]),
];

impl ErrorClassifier for HeuristicClassifier {
    fn classify(&self, message: &str) -> ErrorType {
        let lower = message.to_lowercase();
        TYPE_RULES
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
            .map(|(error_type, _)| *error_type)
            .unwrap_or(ErrorType::Execution)
    }

    fn severity(&self, message: &str) -> Severity {
        let lower = message.to_lowercase();
        SEVERITY_RULES
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
            .map(|(severity, _)| *severity)
            .unwrap_or(Severity::Low)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_network() {
        let c = HeuristicClassifier;
        assert_eq!(c.classify("Network unreachable"), ErrorType::Network);
        assert_eq!(c.classify("fetch failed"), ErrorType::Network);
        assert_eq!(c.classify("Connection reset by peer"), ErrorType::Network);
    }

    #[test]
    fn test_classify_timeout() {
        let c = HeuristicClassifier;
        assert_eq!(c.classify("operation TIMEOUT"), ErrorType::Timeout);
        assert_eq!(c.classify("deadline exceeded"), ErrorType::Timeout);
    }

    #[test]
    fn test_classify_validation() {
        let c = HeuristicClassifier;
        assert_eq!(c.classify("Invalid query"), ErrorType::Validation);
        assert_eq!(c.classify("field is required"), ErrorType::Validation);
    }

    #[test]
    fn test_classify_system() {
        let c = HeuristicClassifier;
        assert_eq!(c.classify("Internal error"), ErrorType::System);
        assert_eq!(c.classify("server returned 503"), ErrorType::System);
    }

    #[test]
    fn test_classify_fallback() {
        assert_eq!(HeuristicClassifier.classify("something odd"), ErrorType::Execution);
    }

    #[test]
    fn test_rule_order_network_first() {
        assert_eq!(
            HeuristicClassifier.classify("connection timeout"),
            ErrorType::Network
        );
    }

    #[test]
    fn test_severity() {
        let c = HeuristicClassifier;
        assert_eq!(c.severity("fatal crash in worker"), Severity::Critical);
        assert_eq!(c.severity("request failed"), Severity::High);
        assert_eq!(c.severity("deprecated api"), Severity::Medium);
        assert_eq!(c.severity("odd"), Severity::Low);
        assert!(Severity::Critical > Severity::High);
    }
}
