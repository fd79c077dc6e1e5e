//! Child monitors that own a fixed share of their parent's ticks.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::ProgressMonitor;

/// Labeling behavior of a [`SubProgressMonitor`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubMonitorStyle {
    /// Do not forward sub task labels to the parent at all.
    pub suppress_sub_task_label: bool,
    /// Prefix forwarded sub task labels with this monitor's main task name.
    pub prepend_main_label: bool,
}

#[derive(Debug, Default)]
struct SubState {
    scale: f64,
    sent_to_parent: f64,
    nested_begin_tasks: u32,
    used_up: bool,
    has_sub_task: bool,
    main_task_label: String,
}

/// A monitor that reports into a parent using a fixed number of parent ticks.
///
/// `begin_task(name, total)` computes `scale = parent_ticks / total`; every
/// unit of work reported here becomes `scale` ticks on the parent. Reports
/// are clamped so the parent never receives more than `parent_ticks` in
/// total, and once the allotment is used up further reports are ignored.
/// `done()` flushes whatever remains of the allotment.
///
/// Only the outermost `begin_task`/`done` pair counts; nested pairs (a
/// helper that begins its own task on a monitor it was handed) are
/// tolerated and ignored.
///
/// Cancellation is delegated to the parent.
pub struct SubProgressMonitor {
    parent: Arc<dyn ProgressMonitor>,
    parent_ticks: u32,
    style: SubMonitorStyle,
    state: Mutex<SubState>,
}

impl SubProgressMonitor {
    /// Create a child that may report up to `parent_ticks` ticks to `parent`.
    pub fn new(parent: Arc<dyn ProgressMonitor>, parent_ticks: u32) -> Self {
        Self::with_style(parent, parent_ticks, SubMonitorStyle::default())
    }

    /// Create a child with explicit labeling behavior.
    pub fn with_style(
        parent: Arc<dyn ProgressMonitor>,
        parent_ticks: u32,
        style: SubMonitorStyle,
    ) -> Self {
        Self {
            parent,
            parent_ticks,
            style,
            state: Mutex::new(SubState::default()),
        }
    }

    /// Number of parent ticks this monitor may report.
    pub fn parent_ticks(&self) -> u32 {
        self.parent_ticks
    }

    /// Parent ticks reported so far.
    pub fn sent_to_parent(&self) -> f64 {
        self.state.lock().sent_to_parent
    }
}

impl ProgressMonitor for SubProgressMonitor {
    fn begin_task(&self, name: &str, total_work: Option<u32>) {
        let mut state = self.state.lock();
        state.nested_begin_tasks += 1;
        if state.nested_begin_tasks > 1 {
            return;
        }
        state.scale = match total_work {
            Some(total) if total > 0 => f64::from(self.parent_ticks) / f64::from(total),
            _ => 0.0,
        };
        if self.style.prepend_main_label {
            state.main_task_label = name.to_string();
        }
    }

    fn done(&self) {
        let (remaining, clear_sub_task) = {
            let mut state = self.state.lock();
            if state.nested_begin_tasks == 0 {
                return;
            }
            state.nested_begin_tasks -= 1;
            if state.nested_begin_tasks > 0 {
                return;
            }
            let remaining = f64::from(self.parent_ticks) - state.sent_to_parent;
            state.sent_to_parent = f64::from(self.parent_ticks);
            state.used_up = true;
            (remaining, std::mem::take(&mut state.has_sub_task))
        };

        if remaining > 0.0 {
            self.parent.internal_worked(remaining);
        }
        if clear_sub_task {
            self.parent.sub_task("");
        }
    }

    fn internal_worked(&self, work: f64) {
        let real_work = {
            let mut state = self.state.lock();
            if state.used_up || state.nested_begin_tasks != 1 {
                return;
            }
            let remaining = f64::from(self.parent_ticks) - state.sent_to_parent;
            let real_work = if work > 0.0 {
                (state.scale * work).min(remaining)
            } else {
                0.0
            };
            state.sent_to_parent += real_work;
            if state.sent_to_parent >= f64::from(self.parent_ticks) {
                state.used_up = true;
            }
            real_work
        };

        if real_work > 0.0 {
            self.parent.internal_worked(real_work);
        }
    }

    fn is_canceled(&self) -> bool {
        self.parent.is_canceled()
    }

    fn set_canceled(&self, canceled: bool) {
        self.parent.set_canceled(canceled);
    }

    fn set_task_name(&self, name: &str) {
        self.parent.set_task_name(name);
    }

    fn sub_task(&self, name: &str) {
        if self.style.suppress_sub_task_label {
            return;
        }
        let label = {
            let mut state = self.state.lock();
            state.has_sub_task = true;
            if self.style.prepend_main_label && !state.main_task_label.is_empty() {
                format!("{} {}", state.main_task_label, name)
            } else {
                name.to_string()
            }
        };
        self.parent.sub_task(&label);
    }
}
