//! Piecewise-linear functions of time for boundary values.
//!
//! Written either as a plain number (constant) or as a string
//! `"(t0,t1,...:v0,v1,...)"`. Outside `[t0, tn]` the end values are held.

use crate::error::{Result, SolverError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub struct LinearInterpolator {
    times: Vec<f64>,
    values: Vec<f64>,
}

impl LinearInterpolator {
    pub fn constant(value: f64) -> Self {
        Self {
            times: vec![0.0],
            values: vec![value],
        }
    }

    pub fn new(times: Vec<f64>, values: Vec<f64>) -> Result<Self> {
        if times.is_empty() || times.len() != values.len() {
            return Err(SolverError::Config(format!(
                "interpolator needs matching, non-empty times and values ({} vs {})",
                times.len(),
                values.len()
            )));
        }
        if times.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(SolverError::Config(format!(
                "interpolator times must increase strictly: {times:?}"
            )));
        }
        if times.iter().chain(&values).any(|v| !v.is_finite()) {
            return Err(SolverError::Config("interpolator data must be finite".to_string()));
        }
        Ok(Self { times, values })
    }

    pub fn eval(&self, time: f64) -> f64 {
        let n = self.times.len();
        if n == 1 || time <= self.times[0] {
            return self.values[0];
        }
        if time >= self.times[n - 1] {
            return self.values[n - 1];
        }
        let i = self.times.partition_point(|&t| t <= time) - 1;
        let s = (time - self.times[i]) / (self.times[i + 1] - self.times[i]);
        self.values[i] + s * (self.values[i + 1] - self.values[i])
    }

    pub fn is_constant(&self) -> bool {
        self.values.windows(2).all(|w| w[0] == w[1])
    }
}

impl Default for LinearInterpolator {
    fn default() -> Self {
        Self::constant(0.0)
    }
}

fn parse_list(s: &str) -> Result<Vec<f64>> {
    s.split(',')
        .map(|t| {
            t.trim()
                .parse::<f64>()
                .map_err(|e| SolverError::Config(format!("bad number '{}' in interpolator: {e}", t.trim())))
        })
        .collect()
}

impl FromStr for LinearInterpolator {
    type Err = SolverError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(v) = s.parse::<f64>() {
            return Ok(Self::constant(v));
        }
        let inner = s
            .strip_prefix('(')
            .and_then(|r| r.strip_suffix(')'))
            .ok_or_else(|| SolverError::Config(format!("interpolator '{s}' must look like (t0,t1:v0,v1)")))?;
        let (times, values) = inner
            .split_once(':')
            .ok_or_else(|| SolverError::Config(format!("interpolator '{s}' is missing ':'")))?;
        Self::new(parse_list(times)?, parse_list(values)?)
    }
}

impl fmt::Display for LinearInterpolator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.times.len() == 1 {
            return write!(f, "{}", self.values[0]);
        }
        let join = |v: &[f64]| v.iter().map(|x| x.to_string()).collect::<Vec<_>>().join(",");
        write!(f, "({}:{})", join(&self.times), join(&self.values))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawInterpolator {
    Number(f64),
    Text(String),
}

impl Serialize for LinearInterpolator {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if self.times.len() == 1 {
            RawInterpolator::Number(self.values[0]).serialize(serializer)
        } else {
            RawInterpolator::Text(self.to_string()).serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for LinearInterpolator {
    fn deserialize<De: serde::Deserializer<'de>>(deserializer: De) -> std::result::Result<Self, De::Error> {
        match RawInterpolator::deserialize(deserializer)? {
            RawInterpolator::Number(v) => Ok(Self::constant(v)),
            RawInterpolator::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}
