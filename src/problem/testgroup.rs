//! Materialized test groups.
//!
//! The generate phase turns the configured groups into this concrete
//! form: limits and dependencies preserved, and every enabled test case
//! resolved to its file prefix and provenance. Later phases and the
//! archive only ever see materialized groups.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestGroup {
    #[serde(default)]
    pub depends: Vec<String>,

    /// Score of this group. A submission's group score is
    /// `full_score * min(min over dependencies of their score ratio,
    /// min over tests of score(t) / 100)`.
    pub full_score: i64,

    /// Cpu time limit in nanoseconds.
    pub time_limit: u64,

    /// Memory limit in bytes.
    pub memory_limit: u64,

    pub tests: Vec<TestCase>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    /// Path prefix of the test files: input is `<prefix>.in`, answer is
    /// `<prefix>.ans`.
    pub prefix: String,

    /// Provenance of the input: `[fixed-path]` or
    /// `[generator-path, arg, ...]`.
    pub inf_from: Vec<String>,

    /// Provenance of the answer: `[fixed-answer-path]` or
    /// `[standard-solution-path]`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ans_from: Vec<String>,
}

impl TestCase {
    pub fn inf_path(&self) -> String {
        format!("{}.in", self.prefix)
    }

    pub fn ans_path(&self) -> String {
        format!("{}.ans", self.prefix)
    }
}

/// File prefix of test `idx` in `group`.
pub fn test_case_prefix(group: &str, idx: usize) -> String {
    format!("{group}-{idx}")
}
