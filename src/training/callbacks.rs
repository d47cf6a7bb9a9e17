//! Epoch-level training safeguards driven by validation loss
//!
//! - [`EarlyStopping`]: stop after `patience` epochs without improvement and
//!   keep a copy of the best model seen
//! - [`ReduceLrOnPlateau`]: multiply the learning rate by `factor` after
//!   `patience` epochs without improvement

/// What the early-stopping monitor decided for an epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Monitored value improved; the model was kept as the new best
    Improved,
    /// No improvement yet, keep training
    Continue,
    /// Patience exhausted
    Stop,
}

/// Early stopping on a metric that should decrease
#[derive(Debug, Clone)]
pub struct EarlyStopping<M> {
    patience: usize,
    min_delta: f64,
    best_value: f64,
    best_epoch: Option<usize>,
    best_state: Option<M>,
    wait: usize,
}

impl<M: Clone> EarlyStopping<M> {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            min_delta: 0.0,
            best_value: f64::INFINITY,
            best_epoch: None,
            best_state: None,
            wait: 0,
        }
    }

    pub fn with_min_delta(mut self, min_delta: f64) -> Self {
        self.min_delta = min_delta;
        self
    }

    /// Record the value for `epoch`; `state` is cloned only on improvement
    pub fn step(&mut self, epoch: usize, value: f64, state: &M) -> Verdict {
        if value < self.best_value - self.min_delta {
            self.best_value = value;
            self.best_epoch = Some(epoch);
            self.best_state = Some(state.clone());
            self.wait = 0;
            return Verdict::Improved;
        }

        self.wait += 1;
        if self.wait >= self.patience {
            Verdict::Stop
        } else {
            Verdict::Continue
        }
    }

    pub fn best_value(&self) -> f64 {
        self.best_value
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    /// Best state seen so far, if any epoch improved
    pub fn into_best(self) -> Option<M> {
        self.best_state
    }
}

/// Reduce-on-plateau learning rate schedule for a decreasing metric
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    best_value: f64,
    epochs_without_improvement: usize,
    current_lr: f64,
    factor: f64,
    patience: usize,
    min_delta: f64,
    min_lr: f64,
}

impl ReduceLrOnPlateau {
    pub fn new(initial_lr: f64, factor: f64, patience: usize) -> Self {
        Self {
            best_value: f64::INFINITY,
            epochs_without_improvement: 0,
            current_lr: initial_lr,
            factor,
            patience,
            min_delta: 1e-4,
            min_lr: 0.0,
        }
    }

    pub fn with_min_lr(mut self, min_lr: f64) -> Self {
        self.min_lr = min_lr;
        self
    }

    /// Feed the epoch's value; returns `Some(new_lr)` when the rate was cut
    pub fn step(&mut self, value: f64) -> Option<f64> {
        if value < self.best_value - self.min_delta {
            self.best_value = value;
            self.epochs_without_improvement = 0;
            return None;
        }

        self.epochs_without_improvement += 1;
        if self.epochs_without_improvement >= self.patience {
            self.epochs_without_improvement = 0;
            let new_lr = (self.current_lr * self.factor).max(self.min_lr);
            if new_lr < self.current_lr {
                self.current_lr = new_lr;
                return Some(new_lr);
            }
        }
        None
    }

    pub fn lr(&self) -> f64 {
        self.current_lr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_early_stopping_patience() {
        let mut stop = EarlyStopping::new(3);
        assert_eq!(stop.step(0, 1.0, &"e0"), Verdict::Improved);
        assert_eq!(stop.step(1, 0.8, &"e1"), Verdict::Improved);
        assert_eq!(stop.step(2, 0.9, &"e2"), Verdict::Continue);
        assert_eq!(stop.step(3, 0.85, &"e3"), Verdict::Continue);
        assert_eq!(stop.step(4, 0.81, &"e4"), Verdict::Stop);

        assert_eq!(stop.best_epoch(), Some(1));
        assert_eq!(stop.best_value(), 0.8);
        assert_eq!(stop.into_best(), Some("e1"));
    }

    #[test]
    fn test_early_stopping_improvement_resets_wait() {
        let mut stop = EarlyStopping::new(2);
        stop.step(0, 1.0, &0);
        assert_eq!(stop.step(1, 1.5, &1), Verdict::Continue);
        assert_eq!(stop.step(2, 0.5, &2), Verdict::Improved);
        assert_eq!(stop.step(3, 0.6, &3), Verdict::Continue);
        assert_eq!(stop.step(4, 0.7, &4), Verdict::Stop);
        assert_eq!(stop.into_best(), Some(2));
    }

    #[test]
    fn test_early_stopping_min_delta() {
        let mut stop = EarlyStopping::new(5).with_min_delta(0.1);
        stop.step(0, 1.0, &());
        assert_eq!(stop.step(1, 0.95, &()), Verdict::Continue);
        assert_eq!(stop.step(2, 0.85, &()), Verdict::Improved);
    }

    #[test]
    fn test_reduce_lr_on_plateau() {
        let mut sched = ReduceLrOnPlateau::new(0.001, 0.3, 2);

        assert_eq!(sched.step(1.0), None);
        assert_eq!(sched.step(0.9), None);
        assert_eq!(sched.step(0.95), None);

        let reduced = sched.step(0.92).unwrap();
        assert!((reduced - 0.0003).abs() < 1e-12);
        assert!((sched.lr() - 0.0003).abs() < 1e-12);

        // patience counter restarts after a cut
        assert_eq!(sched.step(0.93), None);
        assert!(sched.step(0.94).is_some());
    }

    #[test]
    fn test_reduce_lr_respects_floor() {
        let mut sched = ReduceLrOnPlateau::new(0.01, 0.1, 1).with_min_lr(0.005);
        sched.step(1.0);
        assert_eq!(sched.step(1.0), Some(0.005));
        assert_eq!(sched.step(1.0), None);
        assert_eq!(sched.lr(), 0.005);
    }
}
