//! Simulation data types.

use anyhow::{Result, bail};
use glam::DVec2;
use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, fmt};

/// Opaque identity of an agent.
///
/// Two agents may share position and velocity, so "is this the same agent"
/// is always answered by comparing ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(u32);

impl AgentId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Velocity contributions applied to an agent during one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Steering {
    pub separation: DVec2,
    pub alignment: DVec2,
    pub cohesion: DVec2,
    pub border: DVec2,
    pub obstacle: DVec2,
}

/// Agent ("drone") of the simulation.
#[derive(Debug, Clone)]
pub struct Agent {
    id: AgentId,

    pub(crate) position: DVec2,
    pub(crate) velocity: DVec2,
    pub(crate) acceleration: DVec2,

    sight_distance: f64,

    history: VecDeque<DVec2>,
    history_len: usize,
    trajectory_log: Vec<DVec2>,

    pub(crate) last_steering: Steering,
}

impl Agent {
    /// Create a new agent with empty history and zero acceleration.
    pub fn new(id: AgentId, position: DVec2, velocity: DVec2, sight_distance: f64) -> Self {
        const HISTORY_LEN: usize = 10;
        Self {
            id,
            position,
            velocity,
            acceleration: DVec2::ZERO,
            sight_distance,
            history: VecDeque::with_capacity(HISTORY_LEN + 1),
            history_len: HISTORY_LEN,
            trajectory_log: Vec::new(),
            last_steering: Steering::default(),
        }
    }

    /// Replace the trail cap.
    pub fn with_history_len(mut self, history_len: usize) -> Self {
        self.history_len = history_len;
        self
    }

    pub fn with_acceleration(mut self, acceleration: DVec2) -> Self {
        self.acceleration = acceleration;
        self
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn position(&self) -> DVec2 {
        self.position
    }

    pub fn velocity(&self) -> DVec2 {
        self.velocity
    }

    pub fn acceleration(&self) -> DVec2 {
        self.acceleration
    }

    pub fn sight_distance(&self) -> f64 {
        self.sight_distance
    }

    /// Most recent positions, oldest first.
    pub fn history(&self) -> &VecDeque<DVec2> {
        &self.history
    }

    /// Every position visited since the first frame.
    pub fn trajectory_log(&self) -> &[DVec2] {
        &self.trajectory_log
    }

    /// Contributions applied during the most recent frame.
    pub fn last_steering(&self) -> &Steering {
        &self.last_steering
    }

    /// Rescale the velocity into `[min_speed, max_speed]`, keeping its direction.
    ///
    /// Resets the acceleration whenever the velocity is rescaled.
    ///
    /// # Errors
    /// Returns an error if the velocity has zero (or non-finite) magnitude,
    /// since its direction is undefined.
    pub fn regulate_speed(&mut self, min_speed: f64, max_speed: f64) -> Result<()> {
        let speed = self.velocity.length();
        if !(speed.is_finite() && speed > 0.0) {
            bail!("agent {} has degenerate speed {speed}", self.id);
        }

        let target = if speed > max_speed {
            max_speed
        } else if speed < min_speed {
            min_speed
        } else {
            return Ok(());
        };

        self.velocity = self.velocity / speed * target;
        self.acceleration = DVec2::ZERO;

        Ok(())
    }

    /// Record the current position, then advance it by the current velocity.
    pub fn advance(&mut self) {
        self.history.push_back(self.position);
        while self.history.len() > self.history_len {
            self.history.pop_front();
        }
        self.trajectory_log.push(self.position);

        self.position += self.velocity;
    }

    pub fn state(&self) -> AgentState {
        AgentState {
            id: self.id,
            position: self.position,
            velocity: self.velocity,
        }
    }
}

/// Kinematic state of one agent inside a [`Frame`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub id: AgentId,
    pub position: DVec2,
    pub velocity: DVec2,
}

/// Record of one frame: each agent with its regulated velocity, before it moves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Frame index.
    pub index: usize,

    /// Simulated time in seconds.
    pub time: f64,

    /// State of every agent, in population order.
    pub agents: Vec<AgentState>,
}

/// Trajectory of one agent in plot metres.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTrack {
    pub id: AgentId,
    pub x_m: Vec<f64>,
    pub y_m: Vec<f64>,
}

/// Data drawn by the plotting layer after a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotData {
    /// Simulated time of every frame.
    pub time: Vec<f64>,

    /// Obstacle positions in plot metres.
    pub obstacles: Vec<[f64; 2]>,

    pub agents: Vec<AgentTrack>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(velocity: DVec2) -> Agent {
        Agent::new(AgentId::new(0), DVec2::ZERO, velocity, 50.0)
    }

    #[test]
    fn clamps_fast_agents_to_max_speed() {
        let mut agt = agent(DVec2::new(30.0, 40.0)).with_acceleration(DVec2::new(0.2, 0.3));
        agt.regulate_speed(7.0, 10.0).expect("failed to regulate speed");

        assert!((agt.velocity().length() - 10.0).abs() < 1e-12);
        assert!((agt.velocity() - DVec2::new(6.0, 8.0)).length() < 1e-12);
        assert_eq!(agt.acceleration(), DVec2::ZERO);
    }

    #[test]
    fn clamps_slow_agents_to_min_speed() {
        let mut agt = agent(DVec2::new(0.0, -1.0));
        agt.regulate_speed(7.0, 10.0).expect("failed to regulate speed");

        assert!((agt.velocity() - DVec2::new(0.0, -7.0)).length() < 1e-12);
    }

    #[test]
    fn keeps_in_range_velocity_and_acceleration() {
        let acc = DVec2::new(0.1, 0.4);
        let mut agt = agent(DVec2::new(6.0, 6.0)).with_acceleration(acc);
        agt.regulate_speed(7.0, 10.0).expect("failed to regulate speed");

        assert_eq!(agt.velocity(), DVec2::new(6.0, 6.0));
        assert_eq!(agt.acceleration(), acc);
    }

    #[test]
    fn clamp_is_idempotent() {
        for velocity in [
            DVec2::new(0.3, -0.1),
            DVec2::new(-50.0, 12.0),
            DVec2::new(5.0, 6.0),
            DVec2::new(1e-6, 0.0),
        ] {
            let mut agt = agent(velocity);
            agt.regulate_speed(7.0, 10.0).expect("failed to regulate speed");
            let once = agt.velocity();
            agt.regulate_speed(7.0, 10.0).expect("failed to regulate speed");

            assert!((agt.velocity() - once).length() < 1e-12);
            let speed = once.length();
            assert!((7.0 - 1e-9..=10.0 + 1e-9).contains(&speed), "speed {speed}");
        }
    }

    #[test]
    fn zero_velocity_is_fatal() {
        let mut agt = agent(DVec2::ZERO);
        assert!(agt.regulate_speed(7.0, 10.0).is_err());
        assert_eq!(agt.velocity(), DVec2::ZERO);
    }

    #[test]
    fn history_is_capped_but_log_is_not() {
        let mut agt = agent(DVec2::new(1.0, 0.0)).with_history_len(10);
        for _ in 0..25 {
            agt.advance();
        }

        assert_eq!(agt.history().len(), 10);
        assert_eq!(agt.history().front(), Some(&DVec2::new(15.0, 0.0)));
        assert_eq!(agt.history().back(), Some(&DVec2::new(24.0, 0.0)));

        assert_eq!(agt.trajectory_log().len(), 25);
        assert_eq!(agt.trajectory_log()[0], DVec2::ZERO);
        assert_eq!(agt.position(), DVec2::new(25.0, 0.0));
    }
}
