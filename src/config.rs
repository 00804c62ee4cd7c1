use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Population and per-agent kinematics.
    pub flock: FlockConfig,
    /// Steering rule gains.
    pub rules: RulesConfig,
    /// Plot area and border.
    pub world: WorldConfig,
    /// Initial condition.
    pub init: InitConfig,
    /// Clock and output.
    pub output: OutputConfig,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlockConfig {
    /// Number of agents.
    pub n_agents: usize,
    /// Number of obstacles.
    pub n_obstacles: usize,
    /// Lower speed bound enforced by the clamp.
    pub min_speed: f64,
    /// Upper speed bound enforced by the clamp.
    pub max_speed: f64,
    /// Radius of neighbor awareness.
    pub sight_distance: f64,
    /// Length of the trailing position history.
    pub history_len: usize,
}

impl Default for FlockConfig {
    fn default() -> Self {
        Self {
            n_agents: 10,
            n_obstacles: 5,
            min_speed: 7.0,
            max_speed: 10.0,
            sight_distance: 50.0,
            history_len: 10,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub separation_gain: f64,
    pub alignment_gain: f64,
    pub cohesion_gain: f64,
    pub obstacle_gain: f64,

    /// Velocity nudge applied per violated border.
    pub border_correction: f64,

    /// Offset added to both obstacle coordinates before distance tests.
    ///
    /// This shifts the effective obstacle position, it does not widen the
    /// avoided area.
    pub avoidance_radius_offset: f64,

    /// Extra range over `sight_distance` for alignment and cohesion.
    pub flock_range_bonus: f64,
    /// Extra range over `sight_distance` for obstacle avoidance.
    pub obstacle_range_bonus: f64,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            separation_gain: 0.15,
            alignment_gain: 0.1,
            cohesion_gain: 0.005,
            obstacle_gain: 0.25,
            border_correction: 10.0,
            avoidance_radius_offset: 0.0,
            flock_range_bonus: 30.0,
            obstacle_range_bonus: 10.0,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Width of the plot area.
    pub width: f64,
    /// Height of the plot area.
    pub height: f64,
    /// Distance from the origin to the plot area on both axes.
    pub offset: f64,
    /// Near-edge threshold, measured from the origin.
    pub border_margin: f64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            width: 1000.0,
            height: 1000.0,
            offset: 100.0,
            border_margin: 175.0,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InitConfig {
    /// Seed of the random number generator (taken from the OS if absent).
    pub seed: Option<u64>,
    /// Initial velocity components are drawn from `[-initial_speed, initial_speed)`.
    pub initial_speed: f64,
    /// Initial acceleration components are drawn from `[0, initial_acceleration)`.
    pub initial_acceleration: f64,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            seed: None,
            initial_speed: 10.0,
            initial_acceleration: 0.5,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Simulated seconds per frame.
    pub frame_dt: f64,
    /// Simulated seconds after which the run stops.
    pub duration: f64,
    /// Number of frames between frame records.
    pub frames_per_save: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            frame_dt: 1.0 / 60.0,
            duration: 30.0,
            frames_per_save: 1,
        }
    }
}

impl OutputConfig {
    /// Number of frames needed for the simulated time to reach `duration`.
    pub fn n_frames(&self) -> usize {
        // Guard against `duration / frame_dt` landing a hair above an integer.
        (self.duration / self.frame_dt - 1e-9).ceil() as usize
    }

    /// Number of frame records written during a full run.
    pub fn n_saves(&self) -> usize {
        self.n_frames().div_ceil(self.frames_per_save)
    }
}

impl Config {
    /// Load a [`Config`] from a file.
    ///
    /// The file must be TOML-encoded; missing fields take their defaults.
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        Self::parse(&contents)
    }

    /// Parse and validate a [`Config`] from a TOML string.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;
        config.warn_unsafe_gains();

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let flock = &self.flock;
        check_num(flock.n_agents, 1..100_000).context("invalid number of agents")?;
        check_num(flock.n_obstacles, 0..100_000).context("invalid number of obstacles")?;
        check_num(flock.min_speed, f64::EPSILON..).context("invalid minimum speed")?;
        check_num(flock.max_speed, flock.min_speed..).context("invalid maximum speed")?;
        check_num(flock.sight_distance, f64::EPSILON..).context("invalid sight distance")?;
        check_num(flock.history_len, 1..10_000).context("invalid history length")?;

        let world = &self.world;
        check_num(world.width, f64::EPSILON..).context("invalid world width")?;
        check_num(world.height, f64::EPSILON..).context("invalid world height")?;

        check_num(self.init.initial_speed, f64::EPSILON..).context("invalid initial speed")?;
        check_num(self.init.initial_acceleration, 0.0..)
            .context("invalid initial acceleration")?;

        let output = &self.output;
        check_num(output.frame_dt, f64::EPSILON..).context("invalid frame duration")?;
        check_num(output.duration, f64::EPSILON..).context("invalid run duration")?;
        check_num(output.frames_per_save, 1..1_000_000)
            .context("invalid number of frames per save")?;

        Ok(())
    }

    fn warn_unsafe_gains(&self) {
        // Higher gains make the flock oscillate and eventually blow up.
        if check_num(self.rules.alignment_gain, 0.0..=0.25).is_err() {
            log::warn!(
                "alignment gain {} is outside the safe range [0, 0.25]",
                self.rules.alignment_gain
            );
        }
        if check_num(self.rules.cohesion_gain, 0.0..=0.05).is_err() {
            log::warn!(
                "cohesion gain {} is outside the safe range [0, 0.05]",
                self.rules.cohesion_gain
            );
        }
    }
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = Config::parse("").expect("failed to parse empty config");
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.flock.n_agents, 10);
        assert_eq!(cfg.flock.n_obstacles, 5);
        assert_eq!(cfg.world.border_margin, 175.0);
        assert_eq!(cfg.rules.separation_gain, 0.15);
        assert_eq!(cfg.output.duration, 30.0);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = Config::parse("[flock]\nn_agents = 3\n\n[init]\nseed = 7\n")
            .expect("failed to parse config");
        assert_eq!(cfg.flock.n_agents, 3);
        assert_eq!(cfg.flock.max_speed, 10.0);
        assert_eq!(cfg.init.seed, Some(7));
    }

    #[test]
    fn rejects_inverted_speed_bounds() {
        let err = Config::parse("[flock]\nmin_speed = 12.0\nmax_speed = 10.0\n");
        assert!(err.is_err());
    }

    #[test]
    fn rejects_empty_flock() {
        assert!(Config::parse("[flock]\nn_agents = 0\n").is_err());
    }

    #[test]
    fn unsafe_gains_are_not_errors() {
        let cfg = Config::parse("[rules]\ncohesion_gain = 0.5\n").expect("gain must be accepted");
        assert_eq!(cfg.rules.cohesion_gain, 0.5);
    }

    #[test]
    fn frame_count_covers_duration() {
        let output = OutputConfig {
            frame_dt: 0.1,
            duration: 1.0,
            frames_per_save: 3,
        };
        assert_eq!(output.n_frames(), 10);
        assert_eq!(output.n_saves(), 4);
    }
}
