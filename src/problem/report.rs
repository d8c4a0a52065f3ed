//! Structured build report.
//!
//! Every phase of a build contributes a sub-report with an `ok` flag, an
//! optional first error and the per-artifact run results. The assembled
//! [`BuildInfo`] is what the HTTP surface returns and what gets persisted
//! alongside the revision.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::judge::TaskOutcome;
use crate::sandbox::pb::response::result::StatusType;

use super::config::ProblemConfig;
use super::testgroup::TestGroup;

/// Byte limit for text excerpts in the report (inputs, outputs, stderr).
pub const MESSAGE_TEXT_LIMIT: usize = 128;

/// Sandbox execution status, mirrored into a serializable form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Invalid,
    Accepted,
    WrongAnswer,
    PartiallyCorrect,
    MemoryLimitExceeded,
    TimeLimitExceeded,
    OutputLimitExceeded,
    FileError,
    NonzeroExitStatus,
    Signalled,
    DangerousSyscall,
    JudgementFailed,
    InvalidInteraction,
    InternalError,
}

impl From<StatusType> for Status {
    fn from(status: StatusType) -> Self {
        match status {
            StatusType::Invalid => Status::Invalid,
            StatusType::Accepted => Status::Accepted,
            StatusType::WrongAnswer => Status::WrongAnswer,
            StatusType::PartiallyCorrect => Status::PartiallyCorrect,
            StatusType::MemoryLimitExceeded => Status::MemoryLimitExceeded,
            StatusType::TimeLimitExceeded => Status::TimeLimitExceeded,
            StatusType::OutputLimitExceeded => Status::OutputLimitExceeded,
            StatusType::FileError => Status::FileError,
            StatusType::NonzeroExitStatus => Status::NonzeroExitStatus,
            StatusType::Signalled => Status::Signalled,
            StatusType::DangerousSyscall => Status::DangerousSyscall,
            StatusType::JudgementFailed => Status::JudgementFailed,
            StatusType::InvalidInteraction => Status::InvalidInteraction,
            StatusType::InternalError => Status::InternalError,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Invalid => "invalid",
            Status::Accepted => "accepted",
            Status::WrongAnswer => "wrong_answer",
            Status::PartiallyCorrect => "partially_correct",
            Status::MemoryLimitExceeded => "memory_limit_exceeded",
            Status::TimeLimitExceeded => "time_limit_exceeded",
            Status::OutputLimitExceeded => "output_limit_exceeded",
            Status::FileError => "file_error",
            Status::NonzeroExitStatus => "nonzero_exit_status",
            Status::Signalled => "signalled",
            Status::DangerousSyscall => "dangerous_syscall",
            Status::JudgementFailed => "judgement_failed",
            Status::InvalidInteraction => "invalid_interaction",
            Status::InternalError => "internal_error",
        };
        write!(f, "{s}")
    }
}

/// Truncates a string to `max` bytes on a character boundary.
pub(crate) fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Right-trims whitespace and caps the text at [`MESSAGE_TEXT_LIMIT`]
/// bytes, marking the cut with `...`.
pub fn truncate_message(s: &str) -> String {
    let s = s.trim_end_matches(['\n', ' ']);
    if s.len() > MESSAGE_TEXT_LIMIT - 3 {
        format!("{}...", truncate_utf8(s, MESSAGE_TEXT_LIMIT - 3))
    } else {
        s.to_string()
    }
}

/// Result of running a single task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// True when the task executed and the sandbox accepted it.
    pub finished: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub err: Option<String>,
    pub status: Status,
    pub time: u64,
    pub memory: u64,
    pub stderr: String,
}

impl RunResult {
    /// Distills a task outcome into a report entry.
    pub fn from_outcome(outcome: &TaskOutcome) -> Self {
        match outcome {
            Ok(result) => Self {
                finished: result.status() == StatusType::Accepted,
                err: None,
                status: result.status().into(),
                time: result.time,
                memory: result.memory,
                stderr: truncate_message(&String::from_utf8_lossy(
                    result.files.get("stderr").map(Vec::as_slice).unwrap_or(b""),
                )),
            },
            Err(err) => Self {
                finished: false,
                err: Some(format!("{err:#}")),
                status: Status::InternalError,
                time: 0,
                memory: 0,
                stderr: String::new(),
            },
        }
    }
}

/// Verdict of one solution on one test case after checking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeResult {
    pub status: Status,
    pub time: u64,
    pub memory: u64,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub checker_result: String,
    pub inf: String,
    pub ouf: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseInfo {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub config: Option<ProblemConfig>,
}

impl ParseInfo {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            config: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateInfo {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub generator_compile_results: HashMap<String, RunResult>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub std_compile_result: Option<RunResult>,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub generate_results: HashMap<String, RunResult>,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub std_run_results: HashMap<String, RunResult>,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub test_groups: HashMap<String, TestGroup>,
}

impl GenerateInfo {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidateInfo {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub validator_compile_result: Option<RunResult>,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub validate_results: HashMap<String, RunResult>,
}

impl ValidateInfo {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckInfo {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub solution_compile_results: HashMap<String, RunResult>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub checker_compile_result: Option<RunResult>,
    /// Solution name -> test case prefix -> verdict.
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub judge_results: HashMap<String, HashMap<String, JudgeResult>>,
    /// Groups a solution claims but did not pass.
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub not_pass_groups: HashMap<String, Vec<String>>,
    /// Groups a solution passed without claiming them.
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub extra_pass_groups: HashMap<String, Vec<String>>,
}

impl CheckInfo {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// The full build report for one revision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildInfo {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parse: Option<ParseInfo>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub generate: Option<GenerateInfo>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub validate: Option<ValidateInfo>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub check: Option<CheckInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::pb;

    #[test]
    fn test_truncate_message_trims_and_caps() {
        assert_eq!(truncate_message("short output \n \n"), "short output");
        let long = "x".repeat(500);
        let truncated = truncate_message(&long);
        assert_eq!(truncated.len(), MESSAGE_TEXT_LIMIT);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_truncate_message_keeps_char_boundaries() {
        let s = "ё".repeat(200);
        let truncated = truncate_message(&s);
        assert!(truncated.len() <= MESSAGE_TEXT_LIMIT);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_run_result_from_accepted() {
        let mut files = HashMap::new();
        files.insert("stderr".to_string(), b"compiled\n".to_vec());
        let result = pb::response::Result {
            status: StatusType::Accepted as i32,
            time: 12,
            memory: 34,
            files,
            ..Default::default()
        };
        let run = RunResult::from_outcome(&Ok(result));
        assert!(run.finished);
        assert_eq!(run.status, Status::Accepted);
        assert_eq!(run.stderr, "compiled");
        assert_eq!((run.time, run.memory), (12, 34));
    }

    #[test]
    fn test_run_result_from_rejected() {
        let result = pb::response::Result {
            status: StatusType::NonzeroExitStatus as i32,
            ..Default::default()
        };
        let run = RunResult::from_outcome(&Ok(result));
        assert!(!run.finished);
        assert_eq!(run.status, Status::NonzeroExitStatus);
        assert!(run.err.is_none());
    }

    #[test]
    fn test_run_result_from_error() {
        let run = RunResult::from_outcome(&Err(anyhow::anyhow!("connection refused")));
        assert!(!run.finished);
        assert_eq!(run.status, Status::InternalError);
        assert!(run.err.as_deref().unwrap().contains("connection refused"));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Status::WrongAnswer).unwrap(),
            "\"wrong_answer\""
        );
        assert_eq!(Status::TimeLimitExceeded.to_string(), "time_limit_exceeded");
    }
}
