//! Static geometry: obstacles and the bordered plot area.

use crate::config::{RulesConfig, WorldConfig};
use glam::DVec2;
use serde::{Deserialize, Serialize};

/// Static obstacle ("rock").
///
/// Created once before the first frame and never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    position: DVec2,
}

impl Obstacle {
    pub fn new(position: DVec2) -> Self {
        Self { position }
    }

    pub fn position(&self) -> DVec2 {
        self.position
    }

    /// Position used by the avoidance distance test.
    ///
    /// The offset is added to both coordinates, so a nonzero value moves the
    /// obstacle diagonally instead of enlarging it.
    pub fn effective_position(&self, offset: f64) -> DVec2 {
        self.position + DVec2::splat(offset)
    }
}

/// Rectangular plot area with a border margin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    near: DVec2,
    far: DVec2,
}

impl Bounds {
    pub fn new(world: &WorldConfig) -> Self {
        let margin = world.border_margin;
        let extent = DVec2::new(world.width, world.height);

        // The far threshold mirrors the near one across the plot area.
        let far = extent + DVec2::splat(2.0 * world.offset - margin);

        Self {
            near: DVec2::splat(margin),
            far,
        }
    }

    /// Near-edge thresholds on both axes.
    pub fn near(&self) -> DVec2 {
        self.near
    }

    /// Far-edge thresholds on both axes.
    pub fn far(&self) -> DVec2 {
        self.far
    }

    /// Velocity candidate nudged away from every violated edge.
    ///
    /// Axes that are clear of both edges pass `velocity` through unchanged.
    pub fn border_candidate(&self, position: DVec2, velocity: DVec2, rules: &RulesConfig) -> DVec2 {
        let correction = rules.border_correction;
        let mut candidate = velocity;

        if position.x < self.near.x {
            candidate.x += correction;
        }
        if position.x > self.far.x {
            candidate.x -= correction;
        }
        if position.y < self.near.y {
            candidate.y += correction;
        }
        if position.y > self.far.y {
            candidate.y -= correction;
        }

        candidate
    }

    /// Whether `position` lies inside the margins on both axes.
    pub fn is_clear(&self, position: DVec2) -> bool {
        position.cmpge(self.near).all() && position.cmple(self.far).all()
    }
}

/// Pixels per metre of the plot area.
const PIXELS_PER_METRE: f64 = 10.0;

/// Convert a world position to plot metres.
///
/// The plot origin sits at the bottom-left corner of the area, so the y axis
/// is flipped with respect to world coordinates.
pub fn to_plot_metres(world: &WorldConfig, position: DVec2) -> [f64; 2] {
    let local = (position - DVec2::splat(world.offset)) / PIXELS_PER_METRE;
    [local.x, world.height / PIXELS_PER_METRE - local.y]
}
