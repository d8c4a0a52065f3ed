//! Declarative problem configuration.
//!
//! Each problem repository carries a YAML file (`problem.yaml` by
//! default) describing its checker, validator, generators, solutions
//! with the test groups they claim to accept, fixed tests and the test
//! groups to build. The parse phase of a build shape-checks everything
//! declared here against the repository snapshot.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemConfig {
    /// Statement path per language tag; carried, not interpreted.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub statements: HashMap<String, String>,

    /// Name of a built-in checker, or a path in the repository.
    pub checker: String,

    /// Path of the validator in the repository.
    pub validator: String,

    /// Generator name -> repository path.
    #[serde(default)]
    pub generators: HashMap<String, String>,

    /// Solution name -> source and claimed test groups.
    #[serde(default)]
    pub solutions: HashMap<String, SolutionConfig>,

    /// Name of the main correct solution. It should claim every group.
    pub standard_solution: String,

    /// Fixed test name -> input (and optional answer) paths.
    #[serde(default)]
    pub fixed_tests: HashMap<String, FixedTestConfig>,

    pub test_groups: HashMap<String, TestGroupConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionConfig {
    pub path: String,
    /// Test groups this solution must pass, and no others.
    #[serde(default)]
    pub accepts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedTestConfig {
    pub inf: String,
    /// Without a fixed answer the standard solution produces one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ans: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestGroupConfig {
    /// Groups that must be passed for this group to score.
    #[serde(default)]
    pub depends: Vec<String>,

    #[serde(default)]
    pub full_score: i64,

    /// Cpu time limit in nanoseconds for runs in this group.
    pub time_limit: u64,

    /// Memory limit in bytes for runs in this group.
    pub memory_limit: u64,

    #[serde(default)]
    pub tests: Vec<TestSpec>,
}

/// One test case: either a fixed test or a generator invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<String>,

    /// Extra generator arguments after `--group <name>`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,

    /// Disabled tests are skipped everywhere.
    #[serde(default)]
    pub disable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
statements:
  en: statements/en.md
checker: wcmp
validator: src/validator.cpp
generators:
  rand: src/gen_rand.cpp
  edge: src/gen_edge.cpp
solutions:
  main:
    path: src/sol_main.cpp
    accepts: [small, large]
  brute:
    path: src/sol_brute.cpp
    accepts: [small]
standard_solution: main
fixed_tests:
  sample1:
    inf: tests/sample1.in
    ans: tests/sample1.ans
  handmade:
    inf: tests/handmade.in
test_groups:
  small:
    full_score: 40
    time_limit: 1000000000
    memory_limit: 268435456
    tests:
      - fixed: sample1
      - generator: rand
        extra_args: ["--n", "100"]
  large:
    depends: [small]
    full_score: 60
    time_limit: 2000000000
    memory_limit: 268435456
    tests:
      - generator: rand
        extra_args: ["--n", "100000"]
      - generator: edge
        disable: true
"#;

    #[test]
    fn test_parse_sample_config() {
        let config: ProblemConfig = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(config.checker, "wcmp");
        assert_eq!(config.standard_solution, "main");
        assert_eq!(config.generators.len(), 2);
        assert_eq!(config.solutions["main"].accepts, vec!["small", "large"]);
        assert_eq!(config.fixed_tests["sample1"].ans.as_deref(), Some("tests/sample1.ans"));
        assert!(config.fixed_tests["handmade"].ans.is_none());

        let small = &config.test_groups["small"];
        assert_eq!(small.full_score, 40);
        assert_eq!(small.tests[0].fixed.as_deref(), Some("sample1"));
        assert_eq!(small.tests[1].generator.as_deref(), Some("rand"));
        assert_eq!(small.tests[1].extra_args, vec!["--n", "100"]);

        let large = &config.test_groups["large"];
        assert_eq!(large.depends, vec!["small"]);
        assert!(large.tests[1].disable);
    }

    #[test]
    fn test_round_trips_through_json() {
        // Reports embed the config; it must survive JSON serialization.
        let config: ProblemConfig = serde_yaml::from_str(SAMPLE).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let back: ProblemConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.test_groups.len(), config.test_groups.len());
    }
}
