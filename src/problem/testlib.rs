//! Embedded testlib assets and checker output classification.
//!
//! Generators, validators and checkers are testlib programs; the header
//! is embedded at build time and copied into their compile sandboxes. A
//! checker reports its verdict on stderr in testlib's textual format,
//! which [`parse_testlib_output`] maps onto a status, a score and a
//! tagged, size-capped message.

use std::sync::LazyLock;

use regex::Regex;

use super::report::{truncate_utf8, Status};

/// The testlib header copied into every testlib compile sandbox.
pub static TESTLIB_SOURCE: &[u8] = include_bytes!("../../third_party/testlib/testlib.h");

/// Upper bound for classified checker messages, tag included.
pub const MAX_TESTLIB_MESSAGE_LEN: usize = 1024;

static BUILTIN_CHECKERS: &[(&str, &[u8])] = &[
    (
        "wcmp",
        include_bytes!("../../third_party/testlib/checkers/wcmp.cpp"),
    ),
    (
        "lcmp",
        include_bytes!("../../third_party/testlib/checkers/lcmp.cpp"),
    ),
    (
        "ncmp",
        include_bytes!("../../third_party/testlib/checkers/ncmp.cpp"),
    ),
    (
        "yesno",
        include_bytes!("../../third_party/testlib/checkers/yesno.cpp"),
    ),
];

/// Source of a built-in checker, if `name` is one.
///
/// Available checkers:
/// - `wcmp`: compare sequences of tokens.
/// - `lcmp`: compare files as sequences of tokens in lines.
/// - `ncmp`: compare sequences of integers.
/// - `yesno`: compare a single YES/NO token, case insensitive.
pub fn builtin_checker_source(name: &str) -> Option<&'static [u8]> {
    BUILTIN_CHECKERS
        .iter()
        .find(|(checker, _)| *checker == name)
        .map(|(_, source)| *source)
}

static OK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^ok (.*)$").unwrap());
static WA_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^wrong answer (.*)$").unwrap());
static PE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^wrong output format (.*)$").unwrap());
static PC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:partially correct|points) \(?([0-9.]*)\)? (.*)$").unwrap());

fn tag_message(tag: &str, body: &str) -> String {
    let limit = MAX_TESTLIB_MESSAGE_LEN - tag.len();
    if body.len() <= limit {
        format!("{tag}{body}")
    } else {
        format!("{tag}{}...", truncate_utf8(body, limit - 3))
    }
}

/// Classifies a testlib checker's trimmed stderr.
///
/// Returns the status, the score granted out of `full_score`, and the
/// message prefixed with its status tag (`AC` / `WA` / `PE` / `PC`),
/// capped at [`MAX_TESTLIB_MESSAGE_LEN`] bytes. Output matching none of
/// the testlib formats is a judgement failure.
pub fn parse_testlib_output(output: &str, full_score: i64) -> (Status, i64, String) {
    if let Some(captures) = OK_RE.captures(output) {
        return (Status::Accepted, full_score, tag_message("AC ", &captures[1]));
    }
    if let Some(captures) = WA_RE.captures(output) {
        return (Status::WrongAnswer, 0, tag_message("WA ", &captures[1]));
    }
    if let Some(captures) = PE_RE.captures(output) {
        // Presentation errors count as wrong answers, tagged PE.
        return (Status::WrongAnswer, 0, tag_message("PE ", &captures[1]));
    }
    if let Some(captures) = PC_RE.captures(output) {
        let ratio: f64 = captures[1].parse().unwrap_or(0.0);
        return if ratio >= 1.0 {
            (Status::Accepted, full_score, tag_message("AC ", &captures[2]))
        } else if ratio > 0.0 {
            let score = (full_score as f64 * ratio).floor() as i64;
            let body = format!("{} {}", &captures[1], &captures[2]);
            (Status::PartiallyCorrect, score, tag_message("PC ", &body))
        } else {
            (Status::WrongAnswer, 0, tag_message("WA ", &captures[2]))
        };
    }
    (Status::JudgementFailed, 0, tag_message("", output))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepted() {
        let (status, score, message) = parse_testlib_output("ok your answer is right", 123);
        assert_eq!(status, Status::Accepted);
        assert_eq!(score, 123);
        assert_eq!(message, "AC your answer is right");
    }

    #[test]
    fn test_wrong_answer() {
        let (status, score, message) =
            parse_testlib_output("wrong answer your answer is wrong!", 123);
        assert_eq!(status, Status::WrongAnswer);
        assert_eq!(score, 0);
        assert_eq!(message, "WA your answer is wrong!");
    }

    #[test]
    fn test_format_error_reported_as_wa() {
        let (status, score, message) =
            parse_testlib_output("wrong output format expected a space", 123);
        assert_eq!(status, Status::WrongAnswer);
        assert_eq!(score, 0);
        assert_eq!(message, "PE expected a space");
    }

    #[test]
    fn test_partially_correct() {
        let (status, score, message) =
            parse_testlib_output("partially correct (0.12) ABCDE", 1000);
        assert_eq!(status, Status::PartiallyCorrect);
        assert_eq!(score, 120);
        assert_eq!(message, "PC 0.12 ABCDE");
    }

    #[test]
    fn test_points_variant() {
        let (status, score, message) = parse_testlib_output("points 0.12 you got points", 1000);
        assert_eq!(status, Status::PartiallyCorrect);
        assert_eq!(score, 120);
        assert_eq!(message, "PC 0.12 you got points");
    }

    #[test]
    fn test_ratio_boundaries() {
        // Full ratio upgrades to accepted with the full score.
        let (status, score, _) = parse_testlib_output("partially correct (1.0) done", 123);
        assert_eq!(status, Status::Accepted);
        assert_eq!(score, 123);

        // Zero ratio degrades to wrong answer.
        let (status, score, _) = parse_testlib_output("partially correct (0.0) nothing", 123);
        assert_eq!(status, Status::WrongAnswer);
        assert_eq!(score, 0);

        // Near-full stays partial with a floored score.
        let (status, score, _) = parse_testlib_output("points 0.999 close", 1000);
        assert_eq!(status, Status::PartiallyCorrect);
        assert_eq!(score, 999);
    }

    #[test]
    fn test_malformed_ratio_is_wrong_answer() {
        let (status, score, message) = parse_testlib_output("points (.) broken", 1000);
        assert_eq!(status, Status::WrongAnswer);
        assert_eq!(score, 0);
        assert_eq!(message, "WA broken");
    }

    #[test]
    fn test_unrecognized_output_is_judgement_failure() {
        let (status, score, message) = parse_testlib_output("Segmentation fault", 100);
        assert_eq!(status, Status::JudgementFailed);
        assert_eq!(score, 0);
        assert_eq!(message, "Segmentation fault");
    }

    #[test]
    fn test_message_cap() {
        let long = format!("ok {}", "y".repeat(5000));
        let (status, _, message) = parse_testlib_output(&long, 1);
        assert_eq!(status, Status::Accepted);
        assert_eq!(message.len(), MAX_TESTLIB_MESSAGE_LEN);
        assert!(message.starts_with("AC y"));
        assert!(message.ends_with("..."));

        let garbage = "g".repeat(5000);
        let (_, _, message) = parse_testlib_output(&garbage, 1);
        assert_eq!(message.len(), MAX_TESTLIB_MESSAGE_LEN);
    }

    #[test]
    fn test_builtin_checker_lookup() {
        assert!(builtin_checker_source("wcmp").is_some());
        assert!(builtin_checker_source("yesno").is_some());
        assert!(builtin_checker_source("custom.cpp").is_none());
    }

    #[test]
    fn test_testlib_header_embedded() {
        assert!(!TESTLIB_SOURCE.is_empty());
    }
}
