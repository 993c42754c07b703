//! Closed-loop scaling on aggregate CPU utilization.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Target-tracking policy for the service's instance count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    /// Instance floor.
    #[serde(default = "default_min_capacity")]
    pub min_capacity: u32,
    /// Instance cap.
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u32,
    /// Target aggregate CPU utilization, in percent.
    #[serde(default = "default_target_utilization")]
    pub target_utilization: f64,
    /// Cooldown after adding instances, in seconds.
    #[serde(default = "default_cooldown_secs")]
    pub scale_out_cooldown_secs: u64,
    /// Cooldown after removing instances, in seconds.
    #[serde(default = "default_cooldown_secs")]
    pub scale_in_cooldown_secs: u64,
}

const fn default_min_capacity() -> u32 {
    1
}

const fn default_max_capacity() -> u32 {
    4
}

const fn default_target_utilization() -> f64 {
    60.0
}

const fn default_cooldown_secs() -> u64 {
    60
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            min_capacity: default_min_capacity(),
            max_capacity: default_max_capacity(),
            target_utilization: default_target_utilization(),
            scale_out_cooldown_secs: default_cooldown_secs(),
            scale_in_cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl ScalingPolicy {
    /// Sets the capacity bounds.
    #[must_use]
    pub fn with_capacity(mut self, min: u32, max: u32) -> Self {
        self.min_capacity = min;
        self.max_capacity = max.max(min);
        self
    }

    /// Sets both cooldowns.
    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.scale_out_cooldown_secs = cooldown.as_secs();
        self.scale_in_cooldown_secs = cooldown.as_secs();
        self
    }

    /// Sets the target utilization.
    #[must_use]
    pub fn with_target(mut self, percent: f64) -> Self {
        self.target_utilization = percent;
        self
    }

    /// Clamps a count into `[min_capacity, max_capacity]`.
    #[must_use]
    pub fn clamp(&self, count: u32) -> u32 {
        count.clamp(self.min_capacity, self.max_capacity)
    }
}

/// Why the controller left the count alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldReason {
    /// Utilization is on target.
    OnTarget,
    /// The cap or floor is already reached.
    AtLimit,
    /// The previous action's cooldown has not elapsed.
    CoolingDown,
    /// A deployment holds the service.
    DeploymentInProgress,
    /// Nothing has been deployed yet.
    Idle,
}

/// A scaling verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingDecision {
    /// Add instances up to `to`.
    ScaleOut {
        /// Count before.
        from: u32,
        /// Count after.
        to: u32,
    },
    /// Remove instances down to `to`.
    ScaleIn {
        /// Count before.
        from: u32,
        /// Count after.
        to: u32,
    },
    /// Keep the current count.
    Hold(HoldReason),
}

impl ScalingDecision {
    /// The count to run after applying the decision.
    #[must_use]
    pub fn target(&self, current: u32) -> u32 {
        match self {
            Self::ScaleOut { to, .. } | Self::ScaleIn { to, .. } => *to,
            Self::Hold(_) => current,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LastAction {
    at: Instant,
    cooldown: Duration,
}

/// Evaluates a [`ScalingPolicy`] against observed utilization.
#[derive(Debug, Clone)]
pub struct ScalingController {
    policy: ScalingPolicy,
    last_action: Option<LastAction>,
}

impl ScalingController {
    /// Creates a controller with no action history.
    #[must_use]
    pub fn new(policy: ScalingPolicy) -> Self {
        Self {
            policy,
            last_action: None,
        }
    }

    /// Returns the policy.
    #[must_use]
    pub fn policy(&self) -> &ScalingPolicy {
        &self.policy
    }

    /// Decides the next count for `current` instances at `utilization` percent.
    ///
    /// The desired count is `ceil(current * utilization / target)`, bounded
    /// by the policy. Any action starts a cooldown during which further
    /// actions are held.
    pub fn evaluate(&mut self, current: u32, utilization: f64, now: Instant) -> ScalingDecision {
        let desired = self.desired_count(current, utilization);
        if desired == current {
            let target = self.policy.target_utilization;
            let at_limit = (utilization > target && current >= self.policy.max_capacity)
                || (utilization < target && current <= self.policy.min_capacity);
            return ScalingDecision::Hold(if at_limit {
                HoldReason::AtLimit
            } else {
                HoldReason::OnTarget
            });
        }

        if let Some(last) = self.last_action {
            if now.saturating_duration_since(last.at) < last.cooldown {
                return ScalingDecision::Hold(HoldReason::CoolingDown);
            }
        }

        let (decision, cooldown_secs) = if desired > current {
            (
                ScalingDecision::ScaleOut { from: current, to: desired },
                self.policy.scale_out_cooldown_secs,
            )
        } else {
            (
                ScalingDecision::ScaleIn { from: current, to: desired },
                self.policy.scale_in_cooldown_secs,
            )
        };
        self.last_action = Some(LastAction {
            at: now,
            cooldown: Duration::from_secs(cooldown_secs),
        });
        tracing::info!(decision = ?decision, utilization, "Scaling action");
        decision
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn desired_count(&self, current: u32, utilization: f64) -> u32 {
        if current == 0 || self.policy.target_utilization <= 0.0 {
            return self.policy.clamp(current);
        }
        let raw =
            (f64::from(current) * utilization.max(0.0) / self.policy.target_utilization).ceil();
        let raw = raw.min(f64::from(u32::MAX)) as u32;
        self.policy.clamp(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_policy() {
        let policy = ScalingPolicy::default();
        assert_eq!(policy.min_capacity, 1);
        assert_eq!(policy.max_capacity, 4);
        assert!((policy.target_utilization - 60.0).abs() < f64::EPSILON);
        assert_eq!(policy.scale_out_cooldown_secs, 60);
    }

    #[test]
    fn test_scale_out_bounded_by_cap() {
        let mut controller = ScalingController::new(ScalingPolicy::default());
        let now = Instant::now();

        assert_eq!(
            controller.evaluate(2, 90.0, now),
            ScalingDecision::ScaleOut { from: 2, to: 3 }
        );

        let mut controller = ScalingController::new(ScalingPolicy::default());
        assert_eq!(
            controller.evaluate(3, 100.0, now),
            ScalingDecision::ScaleOut { from: 3, to: 4 }
        );
        let mut controller = ScalingController::new(ScalingPolicy::default());
        assert_eq!(controller.evaluate(4, 100.0, now), ScalingDecision::Hold(HoldReason::AtLimit));
    }

    #[test]
    fn test_scale_in_bounded_by_floor() {
        let mut controller = ScalingController::new(ScalingPolicy::default());
        let now = Instant::now();

        assert_eq!(
            controller.evaluate(4, 10.0, now),
            ScalingDecision::ScaleIn { from: 4, to: 1 }
        );
        let mut controller = ScalingController::new(ScalingPolicy::default());
        assert_eq!(controller.evaluate(1, 5.0, now), ScalingDecision::Hold(HoldReason::AtLimit));
    }

    #[test]
    fn test_on_target_holds() {
        let mut controller = ScalingController::new(ScalingPolicy::default());
        assert_eq!(
            controller.evaluate(2, 55.0, Instant::now()),
            ScalingDecision::Hold(HoldReason::OnTarget)
        );
    }

    #[test]
    fn test_cooldown_follows_each_action() {
        let mut controller = ScalingController::new(ScalingPolicy::default());
        let start = Instant::now();

        assert!(matches!(controller.evaluate(1, 95.0, start), ScalingDecision::ScaleOut { .. }));
        assert_eq!(
            controller.evaluate(2, 95.0, start + Duration::from_secs(30)),
            ScalingDecision::Hold(HoldReason::CoolingDown)
        );
        assert_eq!(
            controller.evaluate(2, 95.0, start + Duration::from_secs(61)),
            ScalingDecision::ScaleOut { from: 2, to: 4 }
        );
    }

    #[test]
    fn test_decision_target() {
        assert_eq!(ScalingDecision::ScaleOut { from: 1, to: 3 }.target(1), 3);
        assert_eq!(ScalingDecision::Hold(HoldReason::OnTarget).target(2), 2);
    }
}
