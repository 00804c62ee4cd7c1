use crate::config::Config;
use crate::model::Frame;
use crate::stats::{Accumulator, TimeSeries};
use anyhow::{Context, Result};
use glam::DVec2;
use rmp_serde::{decode, encode};
use serde_value::Value;
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

/// Observable computed from a stream of frames.
pub trait Obs {
    fn name(&self) -> &'static str;
    fn update(&mut self, frame: &Frame) -> Result<()>;
    fn report(&self) -> Result<Value>;
}

/// Norm of the mean heading: 1 for a fully aligned flock, near 0 for a disordered one.
pub struct Polarization {
    time_series: TimeSeries,
}

impl Polarization {
    pub fn new() -> Self {
        Self {
            time_series: TimeSeries::new(),
        }
    }
}

impl Obs for Polarization {
    fn name(&self) -> &'static str {
        "polarization"
    }

    fn update(&mut self, frame: &Frame) -> Result<()> {
        if frame.agents.is_empty() {
            return Ok(());
        }
        let heading_sum: DVec2 = frame
            .agents
            .iter()
            .map(|agt| agt.velocity.normalize_or_zero())
            .sum();
        self.time_series
            .push(heading_sum.length() / frame.agents.len() as f64);
        Ok(())
    }

    fn report(&self) -> Result<Value> {
        serde_value::to_value(self.time_series.report()).context("failed to convert report")
    }
}

/// Distribution of agent speeds over all frames.
pub struct Speed {
    acc: Accumulator,
}

impl Speed {
    pub fn new() -> Self {
        Self {
            acc: Accumulator::new(),
        }
    }
}

impl Obs for Speed {
    fn name(&self) -> &'static str {
        "speed"
    }

    fn update(&mut self, frame: &Frame) -> Result<()> {
        for agt in &frame.agents {
            self.acc.add(agt.velocity.length());
        }
        Ok(())
    }

    fn report(&self) -> Result<Value> {
        serde_value::to_value(self.acc.report()).context("failed to convert report")
    }
}

/// Distance from each agent to its nearest neighbor.
///
/// The report minimum is the closest approach of any pair during the run.
pub struct NearestNeighbor {
    acc: Accumulator,
}

impl NearestNeighbor {
    pub fn new() -> Self {
        Self {
            acc: Accumulator::new(),
        }
    }
}

impl Obs for NearestNeighbor {
    fn name(&self) -> &'static str {
        "nearest_neighbor"
    }

    fn update(&mut self, frame: &Frame) -> Result<()> {
        for agt in &frame.agents {
            let nearest = frame
                .agents
                .iter()
                .filter(|other| other.id != agt.id)
                .map(|other| agt.position.distance(other.position))
                .fold(f64::INFINITY, f64::min);
            if nearest.is_finite() {
                self.acc.add(nearest);
            }
        }
        Ok(())
    }

    fn report(&self) -> Result<Value> {
        serde_value::to_value(self.acc.report()).context("failed to convert report")
    }
}

/// Mean distance of the agents to the flock centroid.
pub struct Spread {
    time_series: TimeSeries,
}

impl Spread {
    pub fn new() -> Self {
        Self {
            time_series: TimeSeries::new(),
        }
    }
}

impl Obs for Spread {
    fn name(&self) -> &'static str {
        "spread"
    }

    fn update(&mut self, frame: &Frame) -> Result<()> {
        let n_agt = frame.agents.len();
        if n_agt == 0 {
            return Ok(());
        }
        let centroid = frame.agents.iter().map(|agt| agt.position).sum::<DVec2>() / n_agt as f64;
        let dist_sum: f64 = frame
            .agents
            .iter()
            .map(|agt| agt.position.distance(centroid))
            .sum();
        self.time_series.push(dist_sum / n_agt as f64);
        Ok(())
    }

    fn report(&self) -> Result<Value> {
        serde_value::to_value(self.time_series.report()).context("failed to convert report")
    }
}

pub struct Analyzer {
    cfg: Config,
    obs_ptr_vec: Vec<Box<dyn Obs>>,
}

impl Analyzer {
    pub fn new(cfg: Config) -> Self {
        let obs_ptr_vec: Vec<Box<dyn Obs>> = vec![
            Box::new(Polarization::new()),
            Box::new(Speed::new()),
            Box::new(NearestNeighbor::new()),
            Box::new(Spread::new()),
        ];
        Self { cfg, obs_ptr_vec }
    }

    /// Feed every frame record of a run to the observables.
    pub fn add_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let reader = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let n_read = self.add_reader(BufReader::new(reader))?;

        let n_saves = self.cfg.output.n_saves();
        if n_read != n_saves {
            log::warn!("{file:?} holds {n_read} frame records, config expects {n_saves}");
        }
        Ok(())
    }

    /// Feed frame records to the observables until the stream ends.
    ///
    /// Returns the number of records read.
    pub fn add_reader<R: BufRead>(&mut self, mut reader: R) -> Result<usize> {
        let mut n_read = 0;
        while !reader
            .fill_buf()
            .context("failed to read frame stream")?
            .is_empty()
        {
            let frame: Frame = decode::from_read(&mut reader)
                .with_context(|| format!("failed to read frame record {n_read}"))?;
            self.add_frame(&frame)?;
            n_read += 1;
        }
        Ok(n_read)
    }

    pub fn add_frame(&mut self, frame: &Frame) -> Result<()> {
        for obs in &mut self.obs_ptr_vec {
            obs.update(frame)
                .with_context(|| format!("failed to update {}", obs.name()))?;
        }
        Ok(())
    }

    pub fn reports(&self) -> Result<BTreeMap<&'static str, Value>> {
        self.obs_ptr_vec
            .iter()
            .map(|obs| Ok((obs.name(), obs.report()?)))
            .collect()
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        let reports = self.reports().context("failed to build reports")?;
        encode::write_named(&mut writer, &reports).context("failed to serialize reports")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AgentId, AgentState};

    fn frame(states: &[(DVec2, DVec2)]) -> Frame {
        Frame {
            index: 0,
            time: 0.0,
            agents: states
                .iter()
                .enumerate()
                .map(|(i, &(position, velocity))| AgentState {
                    id: AgentId::new(i as u32),
                    position,
                    velocity,
                })
                .collect(),
        }
    }

    fn field(value: &Value, key: &str) -> f64 {
        let Value::Map(map) = value else {
            panic!("report is not a map");
        };
        match map.get(&Value::String(key.to_string())) {
            Some(Value::F64(val)) => *val,
            other => panic!("missing {key}: {other:?}"),
        }
    }

    #[test]
    fn aligned_flock_is_fully_polarized() {
        let mut obs = Polarization::new();
        let aligned = frame(&[
            (DVec2::ZERO, DVec2::new(7.0, 0.0)),
            (DVec2::new(5.0, 5.0), DVec2::new(9.0, 0.0)),
        ]);
        for _ in 0..4 {
            obs.update(&aligned).expect("failed to update");
        }
        let report = obs.report().expect("failed to report");
        assert!((field(&report, "mean") - 1.0).abs() < 1e-12);
    }

    #[test]
    fn opposed_agents_cancel_out() {
        let mut obs = Polarization::new();
        let opposed = frame(&[
            (DVec2::ZERO, DVec2::new(7.0, 0.0)),
            (DVec2::new(5.0, 5.0), DVec2::new(-9.0, 0.0)),
        ]);
        for _ in 0..4 {
            obs.update(&opposed).expect("failed to update");
        }
        let report = obs.report().expect("failed to report");
        assert!(field(&report, "mean").abs() < 1e-12);
    }

    #[test]
    fn nearest_neighbor_tracks_closest_pair() {
        let mut obs = NearestNeighbor::new();
        obs.update(&frame(&[
            (DVec2::ZERO, DVec2::X),
            (DVec2::new(3.0, 4.0), DVec2::X),
            (DVec2::new(30.0, 40.0), DVec2::X),
        ]))
        .expect("failed to update");

        let report = obs.report().expect("failed to report");
        assert_eq!(field(&report, "min"), 5.0);
        assert_eq!(field(&report, "max"), 45.0);
    }

    #[test]
    fn analyzer_reports_every_observable() {
        let mut analyzer = Analyzer::new(Config::default());
        analyzer
            .add_frame(&frame(&[(DVec2::ZERO, DVec2::X), (DVec2::X, DVec2::Y)]))
            .expect("failed to add frame");

        let reports = analyzer.reports().expect("failed to build reports");
        let names: Vec<_> = reports.keys().copied().collect();
        assert_eq!(names, ["nearest_neighbor", "polarization", "speed", "spread"]);
    }

    #[test]
    fn reads_frames_until_the_stream_ends() {
        let mut bytes = Vec::new();
        for index in 0..3 {
            let mut record = frame(&[(DVec2::ZERO, DVec2::new(8.0, 0.0))]);
            record.index = index;
            encode::write(&mut bytes, &record).expect("failed to serialize frame");
        }

        // The saved count no longer matches the default config.
        let mut analyzer = Analyzer::new(Config::default());
        let n_read = analyzer
            .add_reader(bytes.as_slice())
            .expect("failed to read frames");
        assert_eq!(n_read, 3);

        let reports = analyzer.reports().expect("failed to build reports");
        assert_eq!(field(&reports["speed"], "max"), 8.0);
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let mut bytes = Vec::new();
        let record = frame(&[(DVec2::ZERO, DVec2::X)]);
        encode::write(&mut bytes, &record).expect("failed to serialize frame");
        encode::write(&mut bytes, &record).expect("failed to serialize frame");
        bytes.truncate(bytes.len() - 3);

        let mut analyzer = Analyzer::new(Config::default());
        assert!(analyzer.add_reader(bytes.as_slice()).is_err());
    }
}
