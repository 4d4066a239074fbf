/// Cosine annealing of the learning rate towards `eta_min` over `t_max` steps.
#[derive(Debug, Clone)]
pub struct CosineAnnealing {
    base_lr: f64,
    eta_min: f64,
    t_max: f64,
    steps: usize,
}

impl CosineAnnealing {
    /// Create a schedule starting at `base_lr`.
    pub fn new(base_lr: f64, eta_min: f64, t_max: f64) -> Self {
        Self {
            base_lr,
            eta_min,
            t_max: t_max.max(f64::EPSILON),
            steps: 0,
        }
    }

    /// Number of steps taken so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Learning rate after the steps taken so far.
    pub fn learning_rate(&self) -> f64 {
        let progress = self.steps as f64 / self.t_max;
        let cosine = (std::f64::consts::PI * progress).cos();
        self.eta_min + (self.base_lr - self.eta_min) * (1.0 + cosine) / 2.0
    }

    /// Advance one step and return the new learning rate.
    pub fn step(&mut self) -> f64 {
        self.steps += 1;
        self.learning_rate()
    }
}

/// Geometric decay of the surface point perturbation magnitude.
#[derive(Debug, Clone)]
pub struct PerturbationSchedule {
    scale: f64,
    decay: f64,
}

impl PerturbationSchedule {
    /// Create a schedule starting at `scale`, multiplied by `decay` on every advance.
    pub fn new(scale: f64, decay: f64) -> Self {
        Self { scale, decay }
    }

    /// Current magnitude.
    pub fn current(&self) -> f64 {
        self.scale
    }

    /// Decay the magnitude and return the new value.
    pub fn advance(&mut self) -> f64 {
        self.scale *= self.decay;
        self.scale
    }
}
