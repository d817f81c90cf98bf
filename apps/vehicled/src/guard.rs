//! Obstacle and over-temperature guard.
//!
//! Watches the cached values of the distance and motor temperature sensors
//! and turns them into forward speed ceilings and a motor block on the
//! safety layer. Reverse is never limited, so the car can always back away.

use std::sync::Arc;
use std::time::Duration;

use smartrc_actuation::{Direction, SafetyLayer};
use smartrc_protocol::Severity;
use smartrc_sensors::SensorType;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::ObstacleConfig;

pub struct Guard {
    safety: Arc<SafetyLayer>,
    distance: Option<Arc<SensorType>>,
    motor: Option<Arc<SensorType>>,
    obstacle: ObstacleConfig,
    /// Configured forward ceiling when no obstacle is near.
    baseline: f64,
    blocked: bool,
}

impl Guard {
    pub fn new(
        safety: Arc<SafetyLayer>,
        distance: Option<Arc<SensorType>>,
        motor: Option<Arc<SensorType>>,
        obstacle: ObstacleConfig,
        baseline: f64,
    ) -> Self {
        if distance.is_none() {
            tracing::warn!(sensor = %obstacle.sensor, "distance sensor not found, obstacle guard disabled");
        }
        Self {
            safety,
            distance,
            motor,
            obstacle,
            baseline,
            blocked: false,
        }
    }

    /// Forward ceiling for a measured distance; `None` keeps the baseline.
    fn forward_ceiling(&self, distance_cm: Option<f64>) -> f64 {
        let obstacle = match distance_cm {
            Some(d) if d < self.obstacle.stop_distance_cm => 0.0,
            Some(d) if d < self.obstacle.slow_distance_cm => self.obstacle.slow_limit_percent,
            _ => 100.0,
        };
        obstacle.min(self.baseline)
    }

    /// Applies the current sensor state once.
    pub fn tick(&mut self) {
        if let Some(distance) = &self.distance {
            let ceiling = self.forward_ceiling(distance.value().as_number());
            if self.safety.limits().forward != ceiling {
                tracing::info!(ceiling, "adjusting forward speed ceiling");
                if let Err(e) = self.safety.set_limit(Direction::Forward, ceiling) {
                    tracing::error!("failed to apply forward speed ceiling: {e}");
                }
            }
        }

        let overheated = self
            .motor
            .as_ref()
            .and_then(|m| m.alert())
            .is_some_and(|a| a.severity == Severity::Critical);
        if overheated && !self.blocked {
            tracing::warn!("motor overheated, blocking drive");
            match self.safety.block() {
                Ok(()) => self.blocked = true,
                Err(e) => tracing::error!("failed to block motor: {e}"),
            }
        } else if !overheated && self.blocked {
            tracing::info!("motor cooled down, releasing block");
            self.safety.unblock();
            self.blocked = false;
        }
    }

    /// Runs [`tick`](Self::tick) every `period` until cancelled.
    pub async fn run(mut self, period: Duration, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => self.tick(),
            }
        }
        tracing::debug!("guard stopped");
    }
}
