//! Retry policy for scene production attempts.
//!
//! [`RetryPolicy::decide`] is a pure function of the attempt index and the
//! error message: it either allows another attempt, carrying a corrective
//! hint for the generator, or declares the scene terminal. The mapping from
//! error category to hint is plain configuration ([`FeedbackRule`]), so new
//! categories never touch control flow.

use serde::{Deserialize, Serialize};

/// Default maximum number of attempts (initial attempt + 2 retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Hint used when no rule matches the error.
pub const GENERIC_HINT: &str = "Fix the reported error.";

/// Maps an error category to a corrective instruction.
///
/// A rule matches when any of its patterns occurs in the error message
/// (case-sensitive substring match).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackRule {
    /// Category name, e.g. "undefined-reference".
    pub category: String,
    /// Substrings identifying the category.
    pub patterns: Vec<String>,
    /// Instruction appended to the next generation request.
    pub hint: String,
}

impl FeedbackRule {
    pub fn new(
        category: impl Into<String>,
        patterns: impl IntoIterator<Item = impl Into<String>>,
        hint: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            patterns: patterns.into_iter().map(Into::into).collect(),
            hint: hint.into(),
        }
    }

    pub fn matches(&self, error_message: &str) -> bool {
        self.patterns
            .iter()
            .any(|p| !p.is_empty() && error_message.contains(p.as_str()))
    }
}

/// Built-in rules for the failure classes renderers report most often.
pub fn default_feedback_rules() -> Vec<FeedbackRule> {
    vec![
        FeedbackRule::new(
            "undefined-reference",
            ["NameError", "is not defined"],
            "You used an undefined variable or color. Use only predefined symbols: \
             standard Manim colors (RED, BLUE, etc.) and names imported from manim.",
        ),
        FeedbackRule::new(
            "missing-method",
            ["AttributeError", "has no attribute"],
            "You used a method that does not exist. Verify the method exists before \
             calling it; check the Manim Community Edition documentation.",
        ),
        FeedbackRule::new(
            "type-mismatch",
            ["TypeError"],
            "Check argument types before invoking operations. Don't animate non-Mobjects.",
        ),
    ]
}

/// Outcome of [`RetryPolicy::decide`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Run another attempt with this feedback.
    Retry {
        /// Matched rule category, `None` for unclassified errors.
        category: Option<String>,
        feedback: String,
    },
    /// No further attempts.
    Terminal,
}

impl RetryDecision {
    pub fn is_retry(&self) -> bool {
        matches!(self, RetryDecision::Retry { .. })
    }
}

/// Decides between retry and terminal failure for a scene attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    rules: Vec<FeedbackRule>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, default_feedback_rules())
    }
}

impl RetryPolicy {
    /// Creates a policy allowing `max_attempts` total attempts.
    pub fn new(max_attempts: u32, rules: Vec<FeedbackRule>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            rules,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn rules(&self) -> &[FeedbackRule] {
        &self.rules
    }

    /// Decides what happens after attempt `attempt_index` (0-based) failed.
    ///
    /// Terminal once `attempt_index + 1 >= max_attempts`, regardless of the
    /// error content.
    pub fn decide(&self, attempt_index: u32, error_message: &str) -> RetryDecision {
        if attempt_index.saturating_add(1) >= self.max_attempts {
            return RetryDecision::Terminal;
        }

        RetryDecision::Retry {
            category: self.classify(error_message).map(|r| r.category.clone()),
            feedback: self.feedback_for(error_message),
        }
    }

    /// Returns the first rule matching the error, in configuration order.
    pub fn classify(&self, error_message: &str) -> Option<&FeedbackRule> {
        self.rules.iter().find(|r| r.matches(error_message))
    }

    pub fn hint_for(&self, error_message: &str) -> &str {
        self.classify(error_message)
            .map(|r| r.hint.as_str())
            .unwrap_or(GENERIC_HINT)
    }

    /// Builds the feedback block fed into the next generation attempt.
    pub fn feedback_for(&self, error_message: &str) -> String {
        format!(
            "Previous attempt failed with error: {}\nFix: {}\n",
            error_message.trim(),
            self.hint_for(error_message)
        )
    }
}
