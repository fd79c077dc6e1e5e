//! Rules held by threads outside of a job's own scheduling rule.
//!
//! Any thread, worker or client, can bracket a section of code with
//! [`JobManager::begin_rule`] and [`JobManager::end_rule`]. Begins nest: a
//! nested rule must be contained by the rule the thread already holds and
//! is not acquired again. Only the outermost rule goes through the lock
//! manager.

use std::marker::PhantomData;
use std::thread;

use jobs_locks::{AcquireOutcome, Resource};
use jobs_progress::ProgressMonitor;
use jobs_rules::{contains, rule_ptr_eq, validate_rule, RuleRef};
use tracing::{debug, warn};

use crate::{Job, JobManager, SchedulerError};

/// One `begin_rule` that has not been ended yet.
pub(crate) struct ImplicitRule {
    pub rule: Option<RuleRef>,
    /// Whether this entry took the rule from the lock manager.
    pub acquired: bool,
}

/// What the scheduler knows about one thread.
#[derive(Default)]
pub(crate) struct ThreadContext {
    /// Job the thread is running, for workers.
    pub job: Option<Job>,
    pub rules: Vec<ImplicitRule>,
}

impl ThreadContext {
    pub fn is_empty(&self) -> bool {
        self.job.is_none() && self.rules.is_empty()
    }

    /// The outermost rule the thread holds: its job's rule, or else the
    /// first rule it began.
    pub fn held_rule(&self) -> Option<RuleRef> {
        self.job
            .as_ref()
            .and_then(|job| job.sched().held_rule.clone())
            .or_else(|| self.rules.iter().find_map(|entry| entry.rule.clone()))
    }
}

enum Nesting {
    /// Recorded without touching the lock manager.
    Pushed,
    /// The rule must be acquired first.
    Acquire(RuleRef),
}

impl JobManager {
    /// Block until the calling thread holds `rule`.
    ///
    /// Calls nest and every successful call must be paired with an
    /// [`end_rule`](Self::end_rule) for the same rule. A `None` rule holds
    /// nothing but still has to be ended.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::InvalidRule` if the rule is not reflexive
    /// - `SchedulerError::RuleNotContained` if the thread already holds a
    ///   rule that does not contain `rule`
    /// - `SchedulerError::Canceled` if `monitor` is canceled before the rule
    ///   is granted; nothing is held afterwards and `end_rule` must not be
    ///   called
    pub fn begin_rule(
        &self,
        rule: Option<RuleRef>,
        monitor: Option<&dyn ProgressMonitor>,
    ) -> Result<(), SchedulerError> {
        let Nesting::Acquire(rule) = self.nest(rule)? else {
            return Ok(());
        };

        let probe = monitor.map(|m| move || m.is_canceled());
        let cancel = probe.as_ref().map(|p| p as &dyn Fn() -> bool);
        match self
            .shared
            .locks
            .acquire_with(Resource::Rule(rule.clone()), None, cancel)
        {
            AcquireOutcome::Acquired => {
                self.push_rule(Some(rule), true);
                Ok(())
            }
            AcquireOutcome::Canceled | AcquireOutcome::TimedOut => {
                debug!(rule = ?rule, "Rule acquisition canceled");
                Err(SchedulerError::Canceled)
            }
        }
    }

    /// Like [`begin_rule`](Self::begin_rule), but returns `Ok(false)`
    /// instead of blocking when the rule is held elsewhere. Only `Ok(true)`
    /// has to be paired with `end_rule`.
    ///
    /// # Errors
    ///
    /// Same as `begin_rule`, except that it never reports cancellation.
    pub fn try_begin_rule(&self, rule: Option<RuleRef>) -> Result<bool, SchedulerError> {
        let Nesting::Acquire(rule) = self.nest(rule)? else {
            return Ok(true);
        };
        if !self.shared.locks.try_acquire(Resource::Rule(rule.clone())) {
            return Ok(false);
        }
        self.push_rule(Some(rule), true);
        Ok(true)
    }

    /// End the most recent [`begin_rule`](Self::begin_rule) of the calling
    /// thread. `rule` must be the same instance that was begun.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::EndRuleMismatch` if the thread has no rule
    /// begun or its innermost rule is a different one. The stack is left
    /// unchanged in that case.
    pub fn end_rule(&self, rule: Option<&RuleRef>) -> Result<(), SchedulerError> {
        let me = thread::current().id();
        let entry = {
            let mut state = self.shared.state.lock();
            let Some(ctx) = state.threads.get_mut(&me) else {
                return Err(mismatch(rule));
            };
            let matches = match (ctx.rules.last(), rule) {
                (Some(top), Some(rule)) => top.rule.as_ref().is_some_and(|t| rule_ptr_eq(t, rule)),
                (Some(top), None) => top.rule.is_none(),
                (None, _) => false,
            };
            if !matches {
                return Err(mismatch(rule));
            }
            let entry = ctx.rules.pop();
            if ctx.is_empty() {
                state.threads.remove(&me);
            }
            entry
        };

        if let Some(ImplicitRule {
            rule: Some(rule),
            acquired: true,
        }) = entry
        {
            self.shared.locks.release(&Resource::Rule(rule))?;
        }
        Ok(())
    }

    /// [`begin_rule`](Self::begin_rule) returning a guard that ends the rule
    /// when dropped.
    pub fn rule_guard(
        &self,
        rule: Option<RuleRef>,
        monitor: Option<&dyn ProgressMonitor>,
    ) -> Result<RuleGuard, SchedulerError> {
        self.begin_rule(rule.clone(), monitor)?;
        Ok(RuleGuard {
            manager: self.clone(),
            rule,
            _not_send: PhantomData,
        })
    }

    /// The outermost rule the calling thread holds, through its job or
    /// through `begin_rule`.
    pub fn current_rule(&self) -> Option<RuleRef> {
        let me = thread::current().id();
        let state = self.shared.state.lock();
        state.threads.get(&me).and_then(ThreadContext::held_rule)
    }

    /// Check `rule` against what the thread already holds. Nested and empty
    /// begins are recorded right away.
    fn nest(&self, rule: Option<RuleRef>) -> Result<Nesting, SchedulerError> {
        if let Some(rule) = &rule {
            validate_rule(rule.as_ref())?;
        }
        let me = thread::current().id();
        let mut state = self.shared.state.lock();
        let outer = state.threads.get(&me).and_then(ThreadContext::held_rule);

        match (outer, rule) {
            (Some(outer), rule) => {
                if !contains(Some(outer.as_ref()), rule.as_deref()) {
                    return Err(SchedulerError::RuleNotContained(format!(
                        "{:?} is not contained by {:?}",
                        rule, outer
                    )));
                }
                state.threads.entry(me).or_default().rules.push(ImplicitRule {
                    rule,
                    acquired: false,
                });
                Ok(Nesting::Pushed)
            }
            (None, None) => {
                state.threads.entry(me).or_default().rules.push(ImplicitRule {
                    rule: None,
                    acquired: false,
                });
                Ok(Nesting::Pushed)
            }
            (None, Some(rule)) => Ok(Nesting::Acquire(rule)),
        }
    }

    fn push_rule(&self, rule: Option<RuleRef>, acquired: bool) {
        let me = thread::current().id();
        let mut state = self.shared.state.lock();
        state
            .threads
            .entry(me)
            .or_default()
            .rules
            .push(ImplicitRule { rule, acquired });
    }
}

fn mismatch(rule: Option<&RuleRef>) -> SchedulerError {
    SchedulerError::EndRuleMismatch(format!("{:?}", rule))
}

/// Ends a rule begun with [`JobManager::rule_guard`] when dropped.
///
/// Rules belong to the thread that began them, so the guard is not `Send`.
#[must_use = "the rule is ended as soon as the guard is dropped"]
pub struct RuleGuard {
    manager: JobManager,
    rule: Option<RuleRef>,
    _not_send: PhantomData<*const ()>,
}

impl RuleGuard {
    pub fn rule(&self) -> Option<&RuleRef> {
        self.rule.as_ref()
    }
}

impl Drop for RuleGuard {
    fn drop(&mut self) {
        if let Err(e) = self.manager.end_rule(self.rule.as_ref()) {
            warn!(error = %e, "Failed to end rule on guard drop");
        }
    }
}
