//! Wall-clock timing of run steps.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{info, info_span};

/// Elapsed time of one completed step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepTiming {
    pub label: &'static str,
    pub elapsed: Duration,
}

type Observer = Box<dyn FnMut(&StepTiming)>;

/// Ordered record of step timings.
///
/// An optional observer sees each timing as soon as it is recorded, which
/// lets a front end print progress while the run is still going.
#[derive(Default)]
pub struct StepTimings {
    steps: Vec<StepTiming>,
    observer: Option<Observer>,
}

impl StepTimings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(observer: impl FnMut(&StepTiming) + 'static) -> Self {
        Self {
            steps: Vec::new(),
            observer: Some(Box::new(observer)),
        }
    }

    /// Runs `f` inside a span named after `label` and records its duration.
    pub fn measure<T>(&mut self, label: &'static str, f: impl FnOnce() -> T) -> T {
        let span = info_span!("step", label);
        let _guard = span.enter();
        let start = Instant::now();
        let out = f();
        self.record(label, start.elapsed());
        out
    }

    /// Like [`measure`](Self::measure), but records only when `f` succeeds.
    pub fn step<T, E>(
        &mut self,
        label: &'static str,
        f: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        let span = info_span!("step", label);
        let _guard = span.enter();
        let start = Instant::now();
        let out = f()?;
        self.record(label, start.elapsed());
        Ok(out)
    }

    pub fn record(&mut self, label: &'static str, elapsed: Duration) {
        info!(label, secs = elapsed.as_secs_f64(), "step complete");
        let timing = StepTiming { label, elapsed };
        if let Some(observer) = self.observer.as_mut() {
            observer(&timing);
        }
        self.steps.push(timing);
    }

    pub fn steps(&self) -> &[StepTiming] {
        &self.steps
    }

    /// Elapsed time of the first step recorded under `label`.
    pub fn get(&self, label: &str) -> Option<Duration> {
        self.steps
            .iter()
            .find(|step| step.label == label)
            .map(|step| step.elapsed)
    }
}

impl fmt::Debug for StepTimings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepTimings")
            .field("steps", &self.steps)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn observer_sees_steps_in_order() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut timings = StepTimings::with_observer(move |step| sink.borrow_mut().push(step.label));

        assert_eq!(timings.measure("first", || 1 + 1), 2);
        timings.record("second", Duration::from_millis(3));

        assert_eq!(*seen.borrow(), vec!["first", "second"]);
        assert_eq!(timings.get("second"), Some(Duration::from_millis(3)));
        assert_eq!(timings.steps().len(), 2);
    }

    #[test]
    fn failed_steps_are_not_recorded() {
        let mut timings = StepTimings::new();
        let result: Result<(), &str> = timings.step("broken", || Err("nope"));
        assert_eq!(result, Err("nope"));
        assert!(timings.steps().is_empty());
    }
}
