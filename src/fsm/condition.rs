//! # FSM condition helpers
//!
//! [`ConditionTemplate`] and [`TransitionResult`] are the two pieces of
//! [`super::State`]'s data model (spec §3): a template carries only what's
//! immutable across every run of a state (`type`, optional `message`), and
//! a transition's `Result` decides `status`/`reason` at read time from
//! exactly one of its four shapes: terminal-success, terminal-error,
//! requeue-with-delay, requeue-with-backoff.

use std::time::Duration;

use crate::capability::Condition;

/// The immutable part of a [`super::State`]'s condition (spec §3). `status`,
/// `reason` and `observedGeneration` are filled in by the driver from the
/// transition's [`TransitionResult`] each time the state runs.
#[derive(Clone, Copy, Debug)]
pub struct ConditionTemplate {
    pub type_: &'static str,
    pub message: Option<&'static str>,
}

impl ConditionTemplate {
    pub const fn new(type_: &'static str) -> Self {
        Self { type_, message: None }
    }

    pub const fn with_message(mut self, message: &'static str) -> Self {
        self.message = Some(message);
        self
    }
}

/// A transition's tagged outcome (spec §3). Read as exactly one of:
/// terminal-success (`is_done()` and no requeue set), terminal-success with
/// a trailing requeue (`is_done()` and `requeue_after_duration()` set),
/// terminal-error (`message()` set), requeue-with-delay
/// (`requeue_after_duration()` set), or requeue-with-backoff (neither).
#[derive(Clone, Debug, Default)]
pub struct TransitionResult {
    done: bool,
    err: Option<String>,
    requeue_after: Option<Duration>,
    reason: Option<String>,
    requeue_after_completion: bool,
    custom_condition: Option<Condition>,
}

impl TransitionResult {
    /// Terminal success; advances to `next`.
    pub fn done() -> Self {
        Self { done: true, ..Default::default() }
    }

    /// Terminal error; the message becomes the state's condition message and
    /// the walk stops here unless [`Self::after_completion`] was also set.
    pub fn error(message: impl Into<String>) -> Self {
        Self { err: Some(message.into()), ..Default::default() }
    }

    /// Requeue-with-delay: not done, but with a known wait.
    pub fn requeue_after(after: Duration) -> Self {
        Self { requeue_after: Some(after), ..Default::default() }
    }

    /// Requeue-with-backoff: not done, no known delay; the host queue's
    /// exponential backoff applies.
    pub fn requeue_backoff() -> Self {
        Self::default()
    }

    /// Schedules a trailing requeue on an otherwise-successful result
    /// ("done-and-requeue", spec §4.6 step 5's third bullet).
    pub fn with_requeue_after(mut self, after: Duration) -> Self {
        self.requeue_after = Some(after);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Postpones returning this result until every remaining state in the
    /// walk has run (spec §3's `requeueAfterCompletion`).
    pub fn after_completion(mut self) -> Self {
        self.requeue_after_completion = true;
        self
    }

    pub fn with_custom_condition(mut self, condition: Condition) -> Self {
        self.custom_condition = Some(condition);
        self
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn wants_requeue_after_completion(&self) -> bool {
        self.requeue_after_completion
    }

    pub fn requeue_after_duration(&self) -> Option<Duration> {
        self.requeue_after
    }

    pub fn message(&self) -> Option<&str> {
        self.err.as_deref()
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn custom_condition(&self) -> Option<&Condition> {
        self.custom_condition.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_has_no_message_by_default() {
        let r = TransitionResult::done();
        assert!(r.is_done());
        assert!(r.message().is_none());
        assert!(r.requeue_after_duration().is_none());
    }

    #[test]
    fn done_and_requeue_keeps_done_true() {
        let r = TransitionResult::done().with_requeue_after(Duration::from_secs(30));
        assert!(r.is_done());
        assert_eq!(r.requeue_after_duration(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn error_is_not_done_and_carries_a_message() {
        let r = TransitionResult::error("dependency unavailable");
        assert!(!r.is_done());
        assert_eq!(r.message(), Some("dependency unavailable"));
    }

    #[test]
    fn requeue_backoff_has_neither_message_nor_delay() {
        let r = TransitionResult::requeue_backoff().with_reason("WaitingForDependency");
        assert!(!r.is_done());
        assert!(r.message().is_none());
        assert!(r.requeue_after_duration().is_none());
        assert_eq!(r.reason(), Some("WaitingForDependency"));
    }
}
