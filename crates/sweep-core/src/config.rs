use serde::{Deserialize, Serialize};
use std::fmt;

/// Application mode the driver runs on top of the tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppMode {
    #[default]
    Stamp,
    Sign,
    Vote,
}

impl AppMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppMode::Stamp => "stamp",
            AppMode::Sign => "sign",
            AppMode::Vote => "vote",
        }
    }
}

impl fmt::Display for AppMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for a single experiment instance.
///
/// Failure counts are expected to stay at or below `machines`; nothing here
/// enforces that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestConfig {
    pub machines: usize,
    pub hosts_per_node: usize,
    pub branching_factor: usize,
    /// Milliseconds between messages. Zero or negative never sends.
    pub rate: i64,
    pub rounds: usize,
    #[serde(default)]
    pub failures: usize,
    #[serde(default)]
    pub root_failures: usize,
    #[serde(default)]
    pub follower_failures: usize,
    #[serde(default)]
    pub test_connect: bool,
    #[serde(default)]
    pub app: AppMode,
}

impl TestConfig {
    /// A failure-free stamp configuration.
    pub fn stamp(
        machines: usize,
        hosts_per_node: usize,
        branching_factor: usize,
        rate: i64,
        rounds: usize,
    ) -> Self {
        Self {
            machines,
            hosts_per_node,
            branching_factor,
            rate,
            rounds,
            failures: 0,
            root_failures: 0,
            follower_failures: 0,
            test_connect: false,
            app: AppMode::Stamp,
        }
    }

    pub fn with_app(mut self, app: AppMode) -> Self {
        self.app = app;
        self
    }

    pub fn with_failures(mut self, failures: usize, root: usize, follower: usize) -> Self {
        self.failures = failures;
        self.root_failures = root;
        self.follower_failures = follower;
        self
    }

    pub fn with_test_connect(mut self, test_connect: bool) -> Self {
        self.test_connect = test_connect;
        self
    }
}

impl fmt::Display for TestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "nmachs={} hpn={} bf={} rate={} rounds={} failures={} rfail={} ffail={} test_connect={} app={}",
            self.machines,
            self.hosts_per_node,
            self.branching_factor,
            self.rate,
            self.rounds,
            self.failures,
            self.root_failures,
            self.follower_failures,
            self.test_connect,
            self.app
        )
    }
}
