//! Abort decision for one streaming session, as a fold over tool outcomes.
//!
//! The session feeds every observed inline tool outcome through
//! [`ErrorTally::step`] in arrival order. The tally is a plain value, so the
//! same decision can be replayed from a recorded outcome list with
//! [`decide_abort`] without a live transport.

use serde::{Deserialize, Serialize};

use super::tool_errors::ToolErrorCategory;

/// Error thresholds for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionLimits {
    /// Auth errors that trigger an immediate abort.
    pub max_auth_errors: u32,
    /// Total tool errors at which a server error aborts the session.
    pub max_server_errors: u32,
    /// Total tool errors (any category) that abort the session.
    pub max_tool_errors: u32,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_auth_errors: 2,
            max_server_errors: 3,
            max_tool_errors: 5,
        }
    }
}

/// One inline tool result as seen by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolOutcome {
    Succeeded,
    Failed(ToolErrorCategory),
}

/// Final verdict of a session's tool-error monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AbortDecision {
    pub aborted: bool,
    pub category: Option<ToolErrorCategory>,
}

/// Running counters. Monotonic; the first abort category sticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorTally {
    pub tool_errors: u32,
    pub auth_errors: u32,
    pub server_errors: u32,
    pub address_errors: u32,
    pub validation_errors: u32,
    abort: Option<ToolErrorCategory>,
}

impl ErrorTally {
    /// Apply one outcome and return the updated tally.
    pub fn step(mut self, outcome: ToolOutcome, limits: &SessionLimits) -> Self {
        let ToolOutcome::Failed(category) = outcome else {
            return self;
        };

        self.tool_errors += 1;
        match category {
            ToolErrorCategory::Auth => self.auth_errors += 1,
            ToolErrorCategory::Server => self.server_errors += 1,
            ToolErrorCategory::Address => self.address_errors += 1,
            ToolErrorCategory::Validation => self.validation_errors += 1,
        }

        if self.abort.is_some() {
            return self;
        }

        self.abort = if category == ToolErrorCategory::Auth
            && self.auth_errors >= limits.max_auth_errors
        {
            Some(ToolErrorCategory::Auth)
        } else if category == ToolErrorCategory::Server
            && self.tool_errors >= limits.max_server_errors
        {
            Some(ToolErrorCategory::Server)
        } else if self.tool_errors >= limits.max_tool_errors {
            Some(category)
        } else {
            None
        };
        self
    }

    /// Category that triggered the abort, if one has.
    pub fn abort_category(&self) -> Option<ToolErrorCategory> {
        self.abort
    }

    pub fn decision(&self) -> AbortDecision {
        AbortDecision {
            aborted: self.abort.is_some(),
            category: self.abort,
        }
    }
}

/// Replay a full outcome sequence into a decision.
pub fn decide_abort<I>(outcomes: I, limits: &SessionLimits) -> AbortDecision
where
    I: IntoIterator<Item = ToolOutcome>,
{
    outcomes
        .into_iter()
        .fold(ErrorTally::default(), |tally, outcome| tally.step(outcome, limits))
        .decision()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ToolErrorCategory::*;
    use ToolOutcome::{Failed, Succeeded};

    #[test]
    fn test_no_errors_no_abort() {
        let decision = decide_abort([Succeeded, Succeeded], &SessionLimits::default());
        assert_eq!(
            decision,
            AbortDecision {
                aborted: false,
                category: None
            }
        );
    }

    #[test]
    fn test_three_server_errors_abort_with_server() {
        let decision = decide_abort(
            [Failed(Server), Failed(Server), Failed(Server)],
            &SessionLimits::default(),
        );
        assert!(decision.aborted);
        assert_eq!(decision.category, Some(Server));
    }

    #[test]
    fn test_two_server_errors_do_not_abort() {
        let outcomes = [Failed(Server), Succeeded, Failed(Server)];
        let decision = decide_abort(outcomes, &SessionLimits::default());
        assert!(!decision.aborted);
    }

    #[test]
    fn test_auth_limit_aborts_with_auth() {
        let decision = decide_abort([Failed(Auth), Failed(Auth)], &SessionLimits::default());
        assert_eq!(decision.category, Some(Auth));
    }

    #[test]
    fn test_server_error_counts_total_not_just_server() {
        // Two validation errors then one server error: total hits the server limit.
        let decision = decide_abort(
            [Failed(Validation), Failed(Validation), Failed(Server)],
            &SessionLimits::default(),
        );
        assert_eq!(decision.category, Some(Server));
    }

    #[test]
    fn test_overall_limit_uses_crossing_category() {
        let decision = decide_abort(
            [
                Failed(Validation),
                Failed(Address),
                Failed(Validation),
                Failed(Address),
                Failed(Address),
            ],
            &SessionLimits::default(),
        );
        assert_eq!(decision.category, Some(Address));
    }

    #[test]
    fn test_first_decision_sticks_and_counters_keep_growing() {
        let limits = SessionLimits::default();
        let tally = [Failed(Auth), Failed(Auth), Failed(Server), Failed(Server)]
            .into_iter()
            .fold(ErrorTally::default(), |t, o| t.step(o, &limits));
        assert_eq!(tally.abort_category(), Some(Auth));
        assert_eq!(tally.tool_errors, 4);
        assert_eq!(tally.server_errors, 2);
    }

    #[test]
    fn test_custom_limits() {
        let limits = SessionLimits {
            max_auth_errors: 1,
            max_server_errors: 10,
            max_tool_errors: 10,
        };
        assert_eq!(decide_abort([Failed(Auth)], &limits).category, Some(Auth));
    }
}
