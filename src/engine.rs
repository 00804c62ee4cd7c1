use crate::config::Config;
use crate::model::{Agent, AgentId, AgentTrack, Frame, PlotData, Steering};
use crate::world::{Bounds, Obstacle, to_plot_metres};
use anyhow::{Context, Result};
use glam::DVec2;
use rand::prelude::*;
use rand_distr::Uniform;
use rmp_serde::encode;
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

/// Simulation engine.
///
/// Holds the configuration, the flock and the obstacles, and provides
/// methods to initialize the flock, advance it frame by frame, and write
/// the resulting trajectories.
pub struct Engine {
    cfg: Config,
    bounds: Bounds,
    agents: Vec<Agent>,
    obstacles: Vec<Obstacle>,
    frame: usize,
    time_log: Vec<f64>,
}

impl Engine {
    /// Create a new `Engine` with the given configuration and a random initial state.
    pub fn generate_initial_condition<R: Rng + ?Sized>(cfg: Config, rng: &mut R) -> Result<Self> {
        let world = &cfg.world;
        let x_dist = Uniform::new(world.offset, world.offset + world.width)?;
        let y_dist = Uniform::new(world.offset, world.offset + world.height)?;

        let speed = cfg.init.initial_speed;
        let vel_dist = Uniform::new(-speed, speed)?;
        let max_acc = cfg.init.initial_acceleration;
        let unit_dist = Uniform::new(0.0, 1.0)?;

        let mut agents = Vec::with_capacity(cfg.flock.n_agents);
        for i_agt in 0..cfg.flock.n_agents {
            let position = DVec2::new(x_dist.sample(rng), y_dist.sample(rng));

            // The speed clamp needs a direction, so never start at rest.
            let mut velocity = DVec2::ZERO;
            while velocity == DVec2::ZERO {
                velocity = DVec2::new(vel_dist.sample(rng), vel_dist.sample(rng));
            }

            let acceleration = max_acc * DVec2::new(unit_dist.sample(rng), unit_dist.sample(rng));

            let id = AgentId::new(u32::try_from(i_agt).context("too many agents")?);
            let agt = Agent::new(id, position, velocity, cfg.flock.sight_distance)
                .with_history_len(cfg.flock.history_len)
                .with_acceleration(acceleration);
            agents.push(agt);
        }

        let obstacles = (0..cfg.flock.n_obstacles)
            .map(|_| Obstacle::new(DVec2::new(x_dist.sample(rng), y_dist.sample(rng))))
            .collect();

        Ok(Self::from_parts(cfg, agents, obstacles))
    }

    /// Create a new `Engine` from an explicit flock and set of obstacles.
    pub fn from_parts(cfg: Config, agents: Vec<Agent>, obstacles: Vec<Obstacle>) -> Self {
        let bounds = Bounds::new(&cfg.world);
        log::debug!(
            "border thresholds: near {} far {}",
            bounds.near(),
            bounds.far()
        );
        let time_log = Vec::with_capacity(cfg.output.n_frames());
        Self {
            cfg,
            bounds,
            agents,
            obstacles,
            frame: 0,
            time_log,
        }
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn obstacles(&self) -> &[Obstacle] {
        &self.obstacles
    }

    /// Simulated time at the start of the next frame.
    pub fn time(&self) -> f64 {
        self.frame as f64 * self.cfg.output.frame_dt
    }

    /// Whether the simulated time has reached the configured duration.
    pub fn is_finished(&self) -> bool {
        self.frame >= self.cfg.output.n_frames()
    }

    /// Advance the simulation by one frame.
    ///
    /// Agents are updated in place and in population order, so each agent
    /// sees the agents before it in their already updated state. Within an
    /// agent, every steering contribution is added to the velocity before
    /// the next one is computed.
    ///
    /// Returns the state of each agent right after its speed is regulated,
    /// before it moves.
    pub fn step(&mut self) -> Result<Frame> {
        let time = self.time();
        let flock = &self.cfg.flock;
        let rules = &self.cfg.rules;

        let mut states = Vec::with_capacity(self.agents.len());
        for i_agt in 0..self.agents.len() {
            let agt = &mut self.agents[i_agt];
            agt.regulate_speed(flock.min_speed, flock.max_speed)
                .with_context(|| format!("failed to regulate speed at frame {}", self.frame))?;
            states.push(agt.state());
            agt.advance();

            let mut steering = Steering::default();

            steering.separation = self.agents[i_agt].separation(&self.agents, rules);
            self.agents[i_agt].velocity += steering.separation;

            steering.alignment = self.agents[i_agt].alignment(&self.agents, rules);
            self.agents[i_agt].velocity += steering.alignment;

            steering.cohesion = self.agents[i_agt].cohesion(&self.agents, rules);
            self.agents[i_agt].velocity += steering.cohesion;

            steering.border = self.agents[i_agt].border_avoidance(&self.bounds, rules);
            self.agents[i_agt].velocity += steering.border;

            steering.obstacle = self.agents[i_agt].obstacle_avoidance(&self.obstacles, rules);
            self.agents[i_agt].velocity += steering.obstacle;

            self.agents[i_agt].last_steering = steering;
        }

        if log::log_enabled!(log::Level::Debug) {
            let n_border = self
                .agents
                .iter()
                .filter(|agt| !self.bounds.is_clear(agt.position()))
                .count();
            let n_accel = self
                .agents
                .iter()
                .filter(|agt| agt.acceleration() != DVec2::ZERO)
                .count();
            let n_trail: usize = self.agents.iter().map(|agt| agt.history().len()).sum();
            log::debug!(
                "frame {} at {time:.3}s: {n_border} agents inside the border margin, \
                 {n_accel} never rescaled, {n_trail} trail points",
                self.frame
            );
        }

        let frame = Frame {
            index: self.frame,
            time,
            agents: states,
        };

        self.time_log.push(time);
        self.frame += 1;

        Ok(frame)
    }

    /// Perform the simulation, saving frame records and plot data to binary files.
    pub fn perform_simulation<P: AsRef<Path>, Q: AsRef<Path>>(
        &mut self,
        frames_file: P,
        plot_file: Q,
    ) -> Result<()> {
        let file = frames_file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        let n_frames = self.cfg.output.n_frames();
        let frames_per_save = self.cfg.output.frames_per_save;
        let frames_per_report = (n_frames / 10).max(1);

        while !self.is_finished() {
            let frame = self.step().context("failed to perform step")?;

            if frame.index % frames_per_save == 0 {
                encode::write(&mut writer, &frame).context("failed to serialize frame")?;
            }

            if (frame.index + 1) % frames_per_report == 0 {
                let progress = 100.0 * (frame.index + 1) as f64 / n_frames as f64;
                log::info!("completed {progress:06.2}%");
            }
        }

        writer.flush().context("failed to flush writer stream")?;

        self.save_plot_data(plot_file)
            .context("failed to save plot data")?;

        Ok(())
    }

    /// Trajectories of the run so far, in plot metres.
    pub fn plot_data(&self) -> PlotData {
        let world = &self.cfg.world;

        let agents = self
            .agents
            .iter()
            .map(|agt| {
                let (x_m, y_m) = agt
                    .trajectory_log()
                    .iter()
                    .map(|&pos| {
                        let [x, y] = to_plot_metres(world, pos);
                        (x, y)
                    })
                    .unzip();
                AgentTrack {
                    id: agt.id(),
                    x_m,
                    y_m,
                }
            })
            .collect();

        let obstacles = self
            .obstacles
            .iter()
            .map(|rock| to_plot_metres(world, rock.position()))
            .collect();

        PlotData {
            time: self.time_log.clone(),
            obstacles,
            agents,
        }
    }

    fn save_plot_data<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, &self.plot_data()).context("failed to serialize plot data")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }
}
