//! Scaling behavior policy.

use std::time::Duration;

use keel_core::{AutoscaleConfig, ConfigError};
use serde_json::{Value, json};

/// Period over which scale-up steps are measured.
pub const SCALE_UP_PERIOD: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingBehavior {
    pub scale_down_window: Duration,
    pub scale_down_percent: u32,
    pub scale_down_period: Duration,
    pub scale_up_percent: u32,
    pub scale_up_pods: u32,
}

impl Default for ScalingBehavior {
    fn default() -> Self {
        Self {
            scale_down_window: Duration::from_secs(300),
            scale_down_percent: 50,
            scale_down_period: Duration::from_secs(60),
            scale_up_percent: 100,
            scale_up_pods: 4,
        }
    }
}

impl ScalingBehavior {
    pub fn from_config(config: &AutoscaleConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            scale_down_window: config.scale_down_window()?,
            scale_down_percent: config.scale_down_percent,
            scale_down_period: config.period()?,
            scale_up_percent: config.scale_up_percent,
            scale_up_pods: config.scale_up_pods,
        })
    }

    /// The `behavior` block of an autoscaler spec.
    pub fn to_spec(&self) -> Value {
        json!({
            "scaleDown": {
                "stabilizationWindowSeconds": self.scale_down_window.as_secs(),
                "selectPolicy": "Max",
                "policies": [{
                    "type": "Percent",
                    "value": self.scale_down_percent,
                    "periodSeconds": self.scale_down_period.as_secs(),
                }],
            },
            "scaleUp": {
                "stabilizationWindowSeconds": 0,
                "selectPolicy": "Max",
                "policies": [
                    {
                        "type": "Percent",
                        "value": self.scale_up_percent,
                        "periodSeconds": SCALE_UP_PERIOD.as_secs(),
                    },
                    {
                        "type": "Pods",
                        "value": self.scale_up_pods,
                        "periodSeconds": SCALE_UP_PERIOD.as_secs(),
                    },
                ],
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_config_defaults() {
        let from_config = ScalingBehavior::from_config(&AutoscaleConfig::default()).unwrap();
        assert_eq!(from_config, ScalingBehavior::default());
    }

    #[test]
    fn scale_down_is_stabilized_and_capped() {
        let spec = ScalingBehavior::default().to_spec();
        assert_eq!(spec["scaleDown"]["stabilizationWindowSeconds"], 300);
        assert_eq!(spec["scaleDown"]["policies"][0]["type"], "Percent");
        assert_eq!(spec["scaleDown"]["policies"][0]["value"], 50);
        assert_eq!(spec["scaleDown"]["policies"][0]["periodSeconds"], 60);
    }

    #[test]
    fn scale_up_takes_larger_step_without_delay() {
        let spec = ScalingBehavior::default().to_spec();
        assert_eq!(spec["scaleUp"]["stabilizationWindowSeconds"], 0);
        assert_eq!(spec["scaleUp"]["selectPolicy"], "Max");
        assert_eq!(spec["scaleUp"]["policies"].as_array().unwrap().len(), 2);
        assert_eq!(spec["scaleUp"]["policies"][1]["type"], "Pods");
        assert_eq!(spec["scaleUp"]["policies"][1]["value"], 4);
    }
}
