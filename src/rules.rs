//! Steering rules.
//!
//! Each rule returns a velocity contribution computed from the current
//! state of the focal agent and the population. The caller adds it to the
//! focal velocity before evaluating the next rule.

use crate::config::RulesConfig;
use crate::model::Agent;
use crate::world::{Bounds, Obstacle};
use glam::DVec2;

impl Agent {
    /// Other agents within `range` of this one.
    fn neighbors<'a>(&'a self, flock: &'a [Agent], range: f64) -> impl Iterator<Item = &'a Agent> {
        flock.iter().filter(move |other| {
            other.id() != self.id() && self.position.distance(other.position) < range
        })
    }

    /// Push away from every agent closer than the sight distance.
    ///
    /// The offsets are summed, not averaged, so closer and more numerous
    /// neighbors push harder.
    pub fn separation(&self, flock: &[Agent], rules: &RulesConfig) -> DVec2 {
        let avoid_dir: DVec2 = self
            .neighbors(flock, self.sight_distance())
            .map(|other| self.position - other.position)
            .sum();

        rules.separation_gain * avoid_dir
    }

    /// Steer towards the average velocity of nearby agents.
    pub fn alignment(&self, flock: &[Agent], rules: &RulesConfig) -> DVec2 {
        let range = self.sight_distance() + rules.flock_range_bonus;

        let (n_near, vel_sum) = self
            .neighbors(flock, range)
            .fold((0usize, DVec2::ZERO), |(n, sum), other| (n + 1, sum + other.velocity));
        if n_near == 0 {
            return DVec2::ZERO;
        }

        let avg_vel = vel_sum / n_near as f64;
        rules.alignment_gain * (avg_vel - self.velocity)
    }

    /// Steer towards the centroid of nearby agents.
    pub fn cohesion(&self, flock: &[Agent], rules: &RulesConfig) -> DVec2 {
        let range = self.sight_distance() + rules.flock_range_bonus;

        let (n_near, pos_sum) = self
            .neighbors(flock, range)
            .fold((0usize, DVec2::ZERO), |(n, sum), other| (n + 1, sum + other.position));
        if n_near == 0 {
            return DVec2::ZERO;
        }

        let centroid = pos_sum / n_near as f64;
        rules.cohesion_gain * (centroid - self.position)
    }

    /// Velocity candidate nudged back from the borders.
    ///
    /// Unlike the other rules this is a full velocity, not a delta: axes
    /// away from the borders carry the current velocity component.
    pub fn border_avoidance(&self, bounds: &Bounds, rules: &RulesConfig) -> DVec2 {
        bounds.border_candidate(self.position, self.velocity, rules)
    }

    /// Push away from every obstacle within range.
    pub fn obstacle_avoidance(&self, obstacles: &[Obstacle], rules: &RulesConfig) -> DVec2 {
        let range = self.sight_distance() + rules.obstacle_range_bonus;

        let avoid_dir: DVec2 = obstacles
            .iter()
            .map(|rock| rock.effective_position(rules.avoidance_radius_offset))
            .filter(|&rock_pos| self.position.distance(rock_pos) < range)
            .map(|rock_pos| self.position - rock_pos)
            .sum();

        rules.obstacle_gain * avoid_dir
    }
}
