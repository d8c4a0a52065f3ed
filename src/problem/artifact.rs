//! Source artifacts: generators, validators, checkers and solutions.
//!
//! All four share one lifecycle: a source supplier yields the code (from
//! the repository, an embedded builtin, or a literal byte slice), a
//! compile task turns it into a sandbox-cached binary whose id lands in a
//! write-once cell, and run tasks reference that cell so they can be
//! declared before the compile has happened.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::error;

use crate::config;
use crate::judge::{Callback, FileIdCell, StdinSource, Task, TaskOutcome};
use crate::revision::Revision;
use crate::sandbox::pb;
use crate::sandbox::pb::response::result::StatusType;

use super::testlib::{builtin_checker_source, TESTLIB_SOURCE};
use super::Problem;

/// Yields the artifact's source code. Called once, when the compile task
/// is built.
pub type SourceSupplier = Arc<dyn Fn() -> Result<Vec<u8>> + Send + Sync>;

fn problem_source(problem: &Problem, rev: Revision, path: String) -> SourceSupplier {
    let problem = problem.clone();
    Arc::new(move || problem.file(&rev, &path))
}

fn bytes_source(source: Vec<u8>) -> SourceSupplier {
    Arc::new(move || Ok(source.clone()))
}

/// Compile-task builder shared by every artifact kind.
///
/// The wrapping callback stores the cached binary id into the artifact's
/// cell on acceptance, then delegates to the caller's callback.
fn compile_task(
    source: &SourceSupplier,
    binary_id: &FileIdCell,
    source_name: &'static str,
    artifact_name: &'static str,
    extra_args: &[String],
    with_testlib: bool,
    cb: Callback,
) -> Result<Task> {
    let code = source().with_context(|| format!("failed to read source of '{artifact_name}'"))?;
    let compile = &config::get().compile;
    let mut task = Task::new()
        .with_cmd(compile.cmd.iter().cloned())
        .with_cmd(extra_args.iter().cloned())
        .with_cmd([source_name, "-o", artifact_name])
        .with_time_limit(compile.time_limit)
        .with_memory_limit(compile.memory_limit)
        .with_stderr_limit(compile.stderr_limit)
        .with_copy_in(source_name, code)
        .with_copy_out([artifact_name]);
    if with_testlib {
        task = task.with_copy_in("testlib.h", TESTLIB_SOURCE.to_vec());
    }

    let cell = binary_id.clone();
    Ok(task.with_callback(Box::new(move |outcome: TaskOutcome| {
        if let Ok(result) = &outcome {
            if result.status() == StatusType::Accepted {
                match result.file_ids.get(artifact_name) {
                    Some(id) => cell.set(id.clone()),
                    None => error!("'{artifact_name}' compiled but its binary id is missing"),
                }
            }
        }
        cb(outcome)
    })))
}

/// A testlib generator producing test inputs on stdout.
pub struct Generator {
    source: SourceSupplier,
    binary_id: FileIdCell,
}

impl Generator {
    pub fn new(source: SourceSupplier) -> Self {
        Self {
            source,
            binary_id: FileIdCell::new(),
        }
    }

    pub fn from_problem(problem: &Problem, rev: Revision, path: impl Into<String>) -> Self {
        Self::new(problem_source(problem, rev, path.into()))
    }

    pub fn from_bytes(source: impl Into<Vec<u8>>) -> Self {
        Self::new(bytes_source(source.into()))
    }

    pub fn compile_task(&self, cb: Callback) -> Result<Task> {
        compile_task(
            &self.source,
            &self.binary_id,
            "generator.cpp",
            "generator",
            &config::get().generator.compile_args,
            true,
            cb,
        )
    }

    /// Run task producing one test input on stdout.
    pub fn generate_task(&self, args: &[String], cb: Callback) -> Task {
        let run = &config::get().generator.run;
        Task::new()
            .with_cmd(["generator"])
            .with_cmd(args.iter().cloned())
            .with_time_limit(run.time_limit)
            .with_memory_limit(run.memory_limit)
            .with_stderr_limit(run.stderr_limit)
            .with_copy_in_cached("generator", self.binary_id.clone())
            .with_callback(cb)
    }
}

/// A testlib validator checking a test input fed on stdin.
pub struct Validator {
    source: SourceSupplier,
    binary_id: FileIdCell,
}

impl Validator {
    pub fn new(source: SourceSupplier) -> Self {
        Self {
            source,
            binary_id: FileIdCell::new(),
        }
    }

    pub fn from_problem(problem: &Problem, rev: Revision, path: impl Into<String>) -> Self {
        Self::new(problem_source(problem, rev, path.into()))
    }

    #[allow(dead_code)]
    pub fn from_bytes(source: impl Into<Vec<u8>>) -> Self {
        Self::new(bytes_source(source.into()))
    }

    pub fn compile_task(&self, cb: Callback) -> Result<Task> {
        compile_task(
            &self.source,
            &self.binary_id,
            "validator.cpp",
            "validator",
            &config::get().validator.compile_args,
            true,
            cb,
        )
    }

    /// Run task validating the given input.
    pub fn validate_task(&self, inf: StdinSource, args: &[String], cb: Callback) -> Task {
        let run = &config::get().validator.run;
        Task::new()
            .with_cmd(["validator"])
            .with_cmd(args.iter().cloned())
            .with_time_limit(run.time_limit)
            .with_memory_limit(run.memory_limit)
            .with_stderr_limit(run.stderr_limit)
            .with_stdin_source(inf)
            .with_copy_in_cached("validator", self.binary_id.clone())
            .with_callback(cb)
    }
}

/// A testlib checker judging a solution's output.
pub struct Checker {
    source: SourceSupplier,
    binary_id: FileIdCell,
}

impl Checker {
    pub fn new(source: SourceSupplier) -> Self {
        Self {
            source,
            binary_id: FileIdCell::new(),
        }
    }

    pub fn from_problem(problem: &Problem, rev: Revision, path: impl Into<String>) -> Self {
        Self::new(problem_source(problem, rev, path.into()))
    }

    pub fn from_bytes(source: impl Into<Vec<u8>>) -> Self {
        Self::new(bytes_source(source.into()))
    }

    /// A built-in checker by name, if one exists.
    pub fn builtin(name: &str) -> Option<Self> {
        builtin_checker_source(name).map(|source| Self::new(bytes_source(source.to_vec())))
    }

    pub fn compile_task(&self, cb: Callback) -> Result<Task> {
        compile_task(
            &self.source,
            &self.binary_id,
            "checker.cpp",
            "checker",
            &config::get().checker.compile_args,
            true,
            cb,
        )
    }

    /// Run task judging `ouf` against `ans` for the input `inf`. The
    /// verdict arrives on the checker's stderr in testlib format.
    pub fn check_task(
        &self,
        inf: pb::request::File,
        ouf: pb::request::File,
        ans: pb::request::File,
        cb: Callback,
    ) -> Task {
        let run = &config::get().checker.run;
        Task::new()
            .with_cmd(["checker", "input.txt", "output.txt", "answer.txt"])
            .with_time_limit(run.time_limit)
            .with_memory_limit(run.memory_limit)
            .with_stderr_limit(run.stderr_limit)
            .with_copy_in_cached("checker", self.binary_id.clone())
            .with_copy_in_file("input.txt", inf)
            .with_copy_in_file("output.txt", ouf)
            .with_copy_in_file("answer.txt", ans)
            .with_callback(cb)
    }
}

/// A contestant-style solution.
pub struct Solution {
    source: SourceSupplier,
    binary_id: FileIdCell,
}

impl Solution {
    pub fn new(source: SourceSupplier) -> Self {
        Self {
            source,
            binary_id: FileIdCell::new(),
        }
    }

    pub fn from_problem(problem: &Problem, rev: Revision, path: impl Into<String>) -> Self {
        Self::new(problem_source(problem, rev, path.into()))
    }

    #[allow(dead_code)]
    pub fn from_bytes(source: impl Into<Vec<u8>>) -> Self {
        Self::new(bytes_source(source.into()))
    }

    pub fn compile_task(&self, cb: Callback) -> Result<Task> {
        compile_task(&self.source, &self.binary_id, "sol.cpp", "sol", &[], false, cb)
    }

    /// Run task executing the solution under the given group limits.
    pub fn run_task(
        &self,
        time_limit: u64,
        memory_limit: u64,
        stdin: StdinSource,
        args: &[String],
        cb: Callback,
    ) -> Task {
        Task::new()
            .with_cmd(["sol"])
            .with_cmd(args.iter().cloned())
            .with_time_limit(time_limit)
            .with_memory_limit(memory_limit)
            .with_stdin_source(stdin)
            .with_copy_in_cached("sol", self.binary_id.clone())
            .with_callback(cb)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn accepted_with(file_ids: &[(&str, &str)]) -> pb::response::Result {
        pb::response::Result {
            status: StatusType::Accepted as i32,
            file_ids: file_ids
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    fn cmd_of(request: &pb::Request) -> &pb::request::CmdType {
        &request.cmd[0]
    }

    #[test]
    fn test_generator_compile_task_shape() {
        let generator = Generator::from_bytes(b"int main() {}".as_slice());
        let task = generator.compile_task(Box::new(|_| true)).unwrap();
        let request = task.to_exec_request();
        let cmd = cmd_of(&request);

        let compiler_cmd = &config::get().compile.cmd;
        assert_eq!(&cmd.args[..compiler_cmd.len()], compiler_cmd.as_slice());
        assert!(cmd.args.ends_with(&[
            "generator.cpp".to_string(),
            "-o".to_string(),
            "generator".to_string()
        ]));
        assert!(cmd.copy_in.contains_key("generator.cpp"));
        assert!(cmd.copy_in.contains_key("testlib.h"));
        assert!(cmd
            .copy_out_cached
            .iter()
            .any(|f| f.name == "generator"));
    }

    #[test]
    fn test_solution_compile_has_no_testlib() {
        let solution = Solution::from_bytes(b"int main() {}".as_slice());
        let task = solution.compile_task(Box::new(|_| true)).unwrap();
        let request = task.to_exec_request();
        assert!(!cmd_of(&request).copy_in.contains_key("testlib.h"));
        assert!(cmd_of(&request).copy_in.contains_key("sol.cpp"));
    }

    #[test]
    fn test_compile_callback_fills_binary_cell() {
        let generator = Generator::from_bytes(b"int main() {}".as_slice());
        let run = generator.generate_task(&["--group".into(), "small".into()], Box::new(|_| true));

        // Run task declared before compiling: no binary bound yet.
        assert!(cmd_of(&run.to_exec_request()).copy_in.is_empty());

        let compile = generator.compile_task(Box::new(|_| true)).unwrap();
        assert!((compile.callback)(Ok(accepted_with(&[
            ("generator", "bin-7"),
            ("stdout", "out-1")
        ]))));

        // The same run task now serializes with the compiled binary.
        let request = run.to_exec_request();
        let file = &cmd_of(&request).copy_in["generator"];
        let pb::request::file::File::Cached(cached) = file.file.as_ref().unwrap() else {
            panic!("expected cached binary");
        };
        assert_eq!(cached.file_id, "bin-7");
    }

    #[test]
    fn test_compile_callback_ignores_rejection() {
        let solution = Solution::from_bytes(b"int main() {}".as_slice());
        let run = solution.run_task(
            1_000_000_000,
            64 * 1024 * 1024,
            StdinSource::File(crate::sandbox::memory_file(b"1 2\n".to_vec())),
            &[],
            Box::new(|_| true),
        );
        let compile = solution.compile_task(Box::new(|_| true)).unwrap();
        let rejected = pb::response::Result {
            status: StatusType::NonzeroExitStatus as i32,
            files: HashMap::new(),
            ..Default::default()
        };
        (compile.callback)(Ok(rejected));
        assert!(cmd_of(&run.to_exec_request()).copy_in.is_empty());
    }

    #[test]
    fn test_checker_task_binds_three_files() {
        use crate::sandbox::{cached_file, memory_file};

        let checker = Checker::builtin("wcmp").unwrap();
        let task = checker.check_task(
            memory_file(b"1 2\n".to_vec()),
            cached_file("ouf-1"),
            memory_file(b"3\n".to_vec()),
            Box::new(|_| true),
        );
        let request = task.to_exec_request();
        let cmd = cmd_of(&request);
        assert_eq!(cmd.args, vec!["checker", "input.txt", "output.txt", "answer.txt"]);
        assert!(cmd.copy_in.contains_key("input.txt"));
        assert!(cmd.copy_in.contains_key("output.txt"));
        assert!(cmd.copy_in.contains_key("answer.txt"));
    }

    #[test]
    fn test_builtin_checker_unknown_name() {
        assert!(Checker::builtin("no-such-checker").is_none());
    }
}
