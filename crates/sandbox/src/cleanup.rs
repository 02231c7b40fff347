//! Reverse-order cleanup of acquired resources.

use tracing::warn;

type Action = Box<dyn FnOnce() -> std::io::Result<()> + Send>;

/// A stack of cleanup actions executed in reverse acquisition order.
///
/// Every resource a sandbox acquires (mount, device node, temp directory)
/// pushes its release here immediately after acquisition; `run_all` then
/// releases everything on success and failure paths alike. A failing
/// action is logged and does not stop later actions from running.
#[derive(Default)]
pub struct CleanupStack {
    actions: Vec<(String, Action)>,
}

impl CleanupStack {
    /// An empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cleanup action.
    pub fn push(
        &mut self,
        label: impl Into<String>,
        action: impl FnOnce() -> std::io::Result<()> + Send + 'static,
    ) {
        self.actions.push((label.into(), Box::new(action)));
    }

    /// Number of registered actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether no actions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run every action, most recently acquired first.
    pub fn run_all(&mut self) {
        while let Some((label, action)) = self.actions.pop() {
            if let Err(e) = action() {
                warn!(cleanup = %label, error = %e, "Sandbox cleanup action failed");
            }
        }
    }
}

impl Drop for CleanupStack {
    fn drop(&mut self) {
        self.run_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn actions_run_in_reverse_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut stack = CleanupStack::new();
        for i in 0..3 {
            let order = Arc::clone(&order);
            stack.push(format!("action-{i}"), move || {
                order.lock().unwrap().push(i);
                Ok(())
            });
        }
        stack.run_all();
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
        assert!(stack.is_empty());
    }

    #[test]
    fn a_failing_action_does_not_stop_the_rest(){
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut stack = CleanupStack::new();
        {
            let order = Arc::clone(&order);
            stack.push("first", move || {
                order.lock().unwrap().push("first");
                Ok(())
            });
        }
        stack.push("failing", || Err(std::io::Error::other("boom")));
        stack.run_all();
        assert_eq!(*order.lock().unwrap(), vec!["first"]);
    }

    #[test]
    fn drop_runs_pending_actions() {
        let order = Arc::new(Mutex::new(Vec::new()));
        {
            let mut stack = CleanupStack::new();
            let order = Arc::clone(&order);
            stack.push("on-drop", move || {
                order.lock().unwrap().push("ran");
                Ok(())
            });
        }
        assert_eq!(*order.lock().unwrap(), vec!["ran"]);
    }
}
