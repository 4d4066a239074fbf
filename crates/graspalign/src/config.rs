use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    candidate::InitConfig, error::AlignError, penalty::PenaltyConfig,
    selection::SelectionPolicy, trajectory::DEFAULT_KEYFRAME_THRESHOLD,
};

/// Parameters of one alignment run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignConfig {
    /// Number of parallel candidates `M`.
    pub num_candidates: usize,
    /// Number of optimization iterations.
    pub iterations: usize,
    /// Initial Adam learning rate.
    pub learning_rate: f64,
    /// The learning rate schedule advances once every this many iterations.
    pub lr_decay_period: usize,
    /// Floor of the cosine schedule.
    pub eta_min: f64,
    /// Initial magnitude of the surface point noise.
    pub perturb_scale: f64,
    /// Per-iteration multiplier of the noise magnitude.
    pub perturb_decay: f64,
    /// Minimum root displacement between trajectory keyframes.
    pub keyframe_threshold: f64,
    /// Per-candidate losses are logged every this many iterations.
    pub log_period: usize,
    /// Enabled penalty terms.
    pub penalties: PenaltyConfig,
    /// Winner selection policy.
    pub selection: SelectionPolicy,
    /// Candidate initialization.
    pub init: InitConfig,
    /// Seed of the random generator, drawn from the OS when absent.
    pub seed: Option<u64>,
    /// Number of trailing keyframes exported as the final approach.
    pub approach_keyframes: Option<usize>,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self::hand()
    }
}

impl AlignConfig {
    /// Articulated hand alignment with the orientation penalty.
    pub fn hand() -> Self {
        Self {
            num_candidates: 10,
            iterations: 1500,
            learning_rate: 1e-2,
            lr_decay_period: 50,
            eta_min: 1e-4,
            perturb_scale: 1e-3,
            perturb_decay: 0.5,
            keyframe_threshold: DEFAULT_KEYFRAME_THRESHOLD,
            log_period: 100,
            penalties: PenaltyConfig::hand(),
            selection: SelectionPolicy::Plain,
            init: InitConfig::hand(),
            seed: None,
            approach_keyframes: None,
        }
    }

    /// Rigid gripper alignment: no penalties, plain selection, short approach export.
    pub fn gripper() -> Self {
        Self {
            penalties: PenaltyConfig::default(),
            init: InitConfig::gripper(),
            approach_keyframes: Some(40),
            ..Self::hand()
        }
    }

    /// Load a configuration from a YAML file; missing fields take the hand defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, AlignError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Parse a YAML configuration.
    pub fn from_yaml_str(text: &str) -> Result<Self, AlignError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Number of scheduler periods over the whole run.
    pub fn schedule_period(&self) -> f64 {
        self.iterations as f64 / self.lr_decay_period as f64
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> Result<(), AlignError> {
        let fail = |msg: String| Err(AlignError::InvalidConfig(msg));
        if self.num_candidates == 0 {
            return fail("num_candidates must be positive".to_string());
        }
        if self.iterations == 0 {
            return fail("iterations must be positive".to_string());
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return fail(format!("learning_rate must be positive, got {}", self.learning_rate));
        }
        if !(self.eta_min >= 0.0 && self.eta_min <= self.learning_rate) {
            return fail(format!(
                "eta_min must lie in [0, {}], got {}",
                self.learning_rate, self.eta_min
            ));
        }
        if self.lr_decay_period == 0 || self.log_period == 0 {
            return fail("lr_decay_period and log_period must be positive".to_string());
        }
        if !(self.perturb_decay > 0.0 && self.perturb_decay <= 1.0) {
            return fail(format!("perturb_decay must lie in (0, 1], got {}", self.perturb_decay));
        }
        if self.perturb_scale < 0.0 || self.keyframe_threshold < 0.0 {
            return fail("perturb_scale and keyframe_threshold must not be negative".to_string());
        }
        if self.init.xy_low > self.init.xy_high
            || self.init.z_margin_low > self.init.z_margin_high
        {
            return fail("init ranges must be ordered low to high".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::OrientationWindow;
    use std::io::Write;

    #[test]
    fn test_presets_are_valid() -> Result<(), AlignError> {
        let hand = AlignConfig::hand();
        hand.validate()?;
        assert_eq!(hand.num_candidates, 10);
        assert_eq!(hand.schedule_period(), 30.0);
        assert!(hand.penalties.orientation.is_some());

        let gripper = AlignConfig::gripper();
        gripper.validate()?;
        assert!(gripper.penalties.orientation.is_none());
        assert_eq!(gripper.approach_keyframes, Some(40));
        assert_eq!(gripper.init, InitConfig::gripper());
        Ok(())
    }

    #[test]
    fn test_validate_rejects() {
        let cases = [
            AlignConfig {
                num_candidates: 0,
                ..Default::default()
            },
            AlignConfig {
                iterations: 0,
                ..Default::default()
            },
            AlignConfig {
                learning_rate: -1.0,
                ..Default::default()
            },
            AlignConfig {
                perturb_decay: 1.5,
                ..Default::default()
            },
            AlignConfig {
                lr_decay_period: 0,
                ..Default::default()
            },
        ];
        for config in cases {
            assert!(matches!(config.validate(), Err(AlignError::InvalidConfig(_))));
        }
    }

    #[test]
    fn test_from_yaml_file() -> Result<(), Box<dyn std::error::Error>> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(
            file,
            "num_candidates: 4\niterations: 200\nseed: 7\nselection: !Constrained\n  canonical_euler_zxy: [1.5707963, -1.5707963, 0.0]\n  tolerance: 0.5\n"
        )?;
        let config = AlignConfig::from_yaml_file(file.path())?;
        assert_eq!(config.num_candidates, 4);
        assert_eq!(config.iterations, 200);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.learning_rate, 1e-2);
        match config.selection {
            SelectionPolicy::Constrained(OrientationWindow { tolerance, .. }) => {
                assert_eq!(tolerance, 0.5)
            }
            SelectionPolicy::Plain => panic!("expected constrained selection"),
        }
        Ok(())
    }

    #[test]
    fn test_invalid_yaml_is_rejected() {
        assert!(matches!(
            AlignConfig::from_yaml_str("iterations: 0"),
            Err(AlignError::InvalidConfig(_))
        ));
        assert!(matches!(
            AlignConfig::from_yaml_str("iterations: [1, 2]"),
            Err(AlignError::YamlError(_))
        ));
    }
}
