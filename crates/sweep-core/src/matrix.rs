//! Test matrix generators.
//!
//! Every generator is a pure function of its arguments. Order matters: it is
//! the row order of the report and the index of each latency file.

use crate::config::{AppMode, TestConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatrixError {
    #[error("linear sweep step must be positive")]
    ZeroStep,
    #[error("geometric sweep multiplier must be greater than 1, got {0}")]
    NonGrowingMultiplier(usize),
    #[error("geometric sweep cannot start at 0")]
    ZeroStart,
}

/// Parameter a one-dimensional sweep steps through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepField {
    BranchingFactor,
    HostsPerNode,
}

impl SweepField {
    fn apply(self, base: &TestConfig, value: usize) -> TestConfig {
        let mut cfg = base.clone();
        match self {
            SweepField::BranchingFactor => cfg.branching_factor = value,
            SweepField::HostsPerNode => cfg.hosts_per_node = value,
        }
        cfg
    }
}

/// Steps `field` from `low` to `high` inclusive by `step`.
pub fn linear_sweep(
    base: &TestConfig,
    field: SweepField,
    low: usize,
    high: usize,
    step: usize,
) -> Result<Vec<TestConfig>, MatrixError> {
    if step == 0 {
        return Err(MatrixError::ZeroStep);
    }
    let mut out = Vec::new();
    let mut value = low;
    while value <= high {
        out.push(field.apply(base, value));
        match value.checked_add(step) {
            Some(next) => value = next,
            None => break,
        }
    }
    Ok(out)
}

/// Steps `field` from `low` to `high` inclusive, multiplying by `mult`.
pub fn geometric_sweep(
    base: &TestConfig,
    field: SweepField,
    low: usize,
    high: usize,
    mult: usize,
) -> Result<Vec<TestConfig>, MatrixError> {
    if mult <= 1 {
        return Err(MatrixError::NonGrowingMultiplier(mult));
    }
    if low == 0 {
        return Err(MatrixError::ZeroStart);
    }
    let mut out = Vec::new();
    let mut value = low;
    while value <= high {
        out.push(field.apply(base, value));
        match value.checked_mul(mult) {
            Some(next) => value = next,
            None => break,
        }
    }
    Ok(out)
}

/// Independent dimensions of a full sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossDimensions {
    pub machines: Vec<usize>,
    pub hosts_per_node: Vec<usize>,
    pub branching_factors: Vec<usize>,
    pub rates: Vec<i64>,
}

/// Cartesian product, machines outermost and rate innermost. Everything not
/// swept is copied from `base`.
pub fn cross_product(dims: &CrossDimensions, base: &TestConfig) -> Vec<TestConfig> {
    let total = dims.machines.len()
        * dims.hosts_per_node.len()
        * dims.branching_factors.len()
        * dims.rates.len();
    let mut out = Vec::with_capacity(total);
    for &machines in &dims.machines {
        for &hosts_per_node in &dims.hosts_per_node {
            for &branching_factor in &dims.branching_factors {
                for &rate in &dims.rates {
                    out.push(TestConfig {
                        machines,
                        hosts_per_node,
                        branching_factor,
                        rate,
                        ..base.clone()
                    });
                }
            }
        }
    }
    out
}

/// Operator-forced topology, applied across a whole matrix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopologyPin {
    pub machines: Option<usize>,
    pub hosts_per_node: Option<usize>,
    pub branching_factor: Option<usize>,
}

impl TopologyPin {
    pub fn is_empty(&self) -> bool {
        self.machines.is_none() && self.hosts_per_node.is_none() && self.branching_factor.is_none()
    }
}

pub fn pin_topology(matrix: &[TestConfig], pin: &TopologyPin) -> Vec<TestConfig> {
    matrix
        .iter()
        .map(|cfg| TestConfig {
            machines: pin.machines.unwrap_or(cfg.machines),
            hosts_per_node: pin.hosts_per_node.unwrap_or(cfg.hosts_per_node),
            branching_factor: pin.branching_factor.unwrap_or(cfg.branching_factor),
            ..cfg.clone()
        })
        .collect()
}

/// Message load at a fixed topology; the first row sends at the slowest rate
/// and serves as the idle baseline.
pub fn rate_load(machines: usize, hpn: usize, bf: usize, rounds: usize) -> Vec<TestConfig> {
    [5000, 5000, 500, 50, 30]
        .into_iter()
        .map(|rate| TestConfig::stamp(machines, hpn, bf, rate, rounds))
        .collect()
}

pub fn depth_sweep(
    machines: usize,
    hpn: usize,
    low: usize,
    high: usize,
    step: usize,
    rounds: usize,
) -> Result<Vec<TestConfig>, MatrixError> {
    let base = TestConfig::stamp(machines, hpn, low, 10, rounds);
    linear_sweep(&base, SweepField::BranchingFactor, low, high, step)
}

/// Branching factors 1 through 512 in powers of two.
pub fn depth_fixed(machines: usize, hpn: usize, rounds: usize) -> Vec<TestConfig> {
    (0..10)
        .map(|exp| TestConfig::stamp(machines, hpn, 1 << exp, 30, rounds))
        .collect()
}

pub fn scale_sweep(
    machines: usize,
    bf: usize,
    low: usize,
    high: usize,
    mult: usize,
    rounds: usize,
) -> Result<Vec<TestConfig>, MatrixError> {
    let base = TestConfig::stamp(machines, low, bf, 10, rounds);
    geometric_sweep(&base, SweepField::HostsPerNode, low, high, mult)
}

pub fn failure_table(machines: usize) -> Vec<TestConfig> {
    let base = TestConfig::stamp(machines, 64, 16, 30, 50);
    vec![
        base.clone(),
        base.clone().with_failures(0, 5, 0),
        base.clone().with_failures(0, 10, 0),
        base.clone().with_failures(5, 0, 5),
        base.clone().with_failures(5, 0, 10),
        base.with_failures(5, 0, 10).with_test_connect(true),
    ]
}

pub fn voting_table(machines: usize) -> Vec<TestConfig> {
    let base = TestConfig::stamp(machines, 64, 16, 30, 50);
    vec![base.clone().with_test_connect(true), base]
}

pub fn full_cross(rounds: usize) -> Vec<TestConfig> {
    let dims = CrossDimensions {
        machines: vec![1, 16, 32],
        hosts_per_node: vec![1, 16, 32, 128],
        branching_factors: vec![2, 4, 8, 16, 128],
        rates: vec![5000, 500, 100, 30],
    };
    cross_product(&dims, &TestConfig::stamp(0, 0, 0, 0, rounds))
}

pub fn hosts_table(machines: usize) -> Vec<TestConfig> {
    vec![
        TestConfig::stamp(machines, 1, 2, 30, 20),
        TestConfig::stamp(machines, 2, 3, 30, 20),
    ]
}

pub fn sign_table(machines: usize) -> Vec<TestConfig> {
    [
        (1, 2, 20),
        (2, 3, 20),
        (4, 3, 20),
        (8, 8, 20),
        (16, 16, 20),
        (32, 16, 20),
        (64, 16, 20),
        (128, 16, 50),
    ]
    .into_iter()
    .map(|(hpn, bf, rounds)| {
        TestConfig::stamp(machines, hpn, bf, 30, rounds).with_app(AppMode::Sign)
    })
    .collect()
}

/// Voting never sends stamp requests, hence the huge delay.
pub fn vote_table(machines: usize) -> Vec<TestConfig> {
    [(1, 3), (2, 4), (4, 6), (8, 8), (16, 16), (32, 16), (64, 16), (128, 16)]
        .into_iter()
        .map(|(hpn, bf)| {
            TestConfig::stamp(machines, hpn, bf, 10_000_000, 20).with_app(AppMode::Vote)
        })
        .collect()
}
