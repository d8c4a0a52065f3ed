//! The four-phase build pipeline.
//!
//! Parse shape-checks the configuration against the repository snapshot;
//! Generate materializes every test input and reference answer into an
//! in-memory filesystem; Validate runs the validator over every input;
//! Check runs every solution on every test, judges the outputs with the
//! checker and verifies that each solution passes exactly the groups it
//! claims. Each phase submits at most one request chain to the
//! least-loaded judge and collects callback results over per-phase
//! channels; senders live inside the task callbacks, so a channel closes
//! once every task of the phase has completed or been cancelled.

use std::collections::{BTreeSet, HashMap, HashSet};

use tokio::sync::mpsc;
use tracing::debug;

use crate::judge::{JudgePool, Request, StdinSource};
use crate::memfs::MemFs;
use crate::revision::{format_revision, Revision};
use crate::sandbox::{cached_file, memory_file};

use super::artifact::{Checker, Generator, Solution, Validator};
use super::config::ProblemConfig;
use super::report::{
    truncate_message, BuildInfo, CheckInfo, GenerateInfo, JudgeResult, ParseInfo, RunResult,
    Status, ValidateInfo,
};
use super::testgroup::{test_case_prefix, TestCase, TestGroup};
use super::testlib::{builtin_checker_source, parse_testlib_output};
use super::Problem;

/// Per-test score handed to the testlib parser in the check phase; group
/// scoring normalizes test scores to this base.
const TEST_FULL_SCORE: i64 = 100;

struct RunResponse {
    solution: String,
    group: String,
    test: String,
    result: RunResult,
    ouf_id: String,
}

struct CheckResponse {
    solution: String,
    group: String,
    test: String,
    result: RunResult,
}

impl Problem {
    /// Parse phase: loads the configuration and checks every declared
    /// artifact, file and test against the snapshot. Returns the first
    /// specific error encountered.
    pub fn build_parse(&self, rev: &Revision) -> ParseInfo {
        if !self.commit_exists(rev) {
            return ParseInfo::failed(format!("revision {} not found", format_revision(rev)));
        }

        let conf = match self.config(rev) {
            Ok(conf) => conf,
            Err(err) => return ParseInfo::failed(format!("{err:#}")),
        };

        if self.file(rev, &conf.checker).is_err()
            && builtin_checker_source(&conf.checker).is_none()
        {
            return ParseInfo::failed(format!(
                "checker '{}' is neither a repository file nor a built-in checker",
                conf.checker
            ));
        }

        if let Err(err) = self.file(rev, &conf.validator) {
            return ParseInfo::failed(format!(
                "validator '{}' not found: {err:#}",
                conf.validator
            ));
        }

        for (name, path) in &conf.generators {
            if let Err(err) = self.file(rev, path) {
                return ParseInfo::failed(format!(
                    "generator '{name}' (path: {path}) not found: {err:#}"
                ));
            }
        }

        for (name, fixed) in &conf.fixed_tests {
            if let Err(err) = self.file(rev, &fixed.inf) {
                return ParseInfo::failed(format!(
                    "fixed test '{name}' input (path: {}) not found: {err:#}",
                    fixed.inf
                ));
            }
            if let Some(ans) = &fixed.ans {
                if let Err(err) = self.file(rev, ans) {
                    return ParseInfo::failed(format!(
                        "fixed test '{name}' answer (path: {ans}) not found: {err:#}"
                    ));
                }
            }
        }

        if !conf.solutions.contains_key(&conf.standard_solution) {
            return ParseInfo::failed(format!(
                "standard solution '{}' is not declared in solutions",
                conf.standard_solution
            ));
        }

        for (group_name, group) in &conf.test_groups {
            for dep in &group.depends {
                if !conf.test_groups.contains_key(dep) {
                    return ParseInfo::failed(format!(
                        "test group '{group_name}' depends on '{dep}' which does not exist"
                    ));
                }
            }

            if group.full_score < 0 {
                return ParseInfo::failed(format!(
                    "test group '{group_name}' has a negative full score"
                ));
            }

            for (i, test) in group.tests.iter().enumerate() {
                if let Some(fixed) = &test.fixed {
                    if !conf.fixed_tests.contains_key(fixed) {
                        return ParseInfo::failed(format!(
                            "test group '{group_name}' references unknown fixed test '{fixed}'"
                        ));
                    }
                } else if let Some(generator) = &test.generator {
                    if !conf.generators.contains_key(generator) {
                        return ParseInfo::failed(format!(
                            "test group '{group_name}' references unknown generator '{generator}'"
                        ));
                    }
                } else {
                    return ParseInfo::failed(format!(
                        "test case {i} of group '{group_name}' is neither fixed nor generated"
                    ));
                }
            }
        }

        ParseInfo {
            ok: true,
            error: None,
            config: Some(conf),
        }
    }

    /// Generate phase: compiles the generators and the standard solution,
    /// then produces `<prefix>.in` and `<prefix>.ans` for every enabled
    /// test case into `fs`, returning the materialized test groups.
    ///
    /// Everything runs as one request chain: compiles, then generator
    /// runs, then standard-solution runs. A standard run whose input is
    /// generated reads it through a write-once slot that the generator's
    /// callback fills with the sandbox-cached stdout id; the slot is
    /// dereferenced when the run task's wire request is serialized, after
    /// its batch became runnable.
    pub async fn build_generate(
        &self,
        rev: &Revision,
        conf: &ProblemConfig,
        pool: &JudgePool,
        fs: &mut MemFs,
    ) -> GenerateInfo {
        let mut info = GenerateInfo {
            ok: true,
            ..GenerateInfo::default()
        };

        let mut generators: HashMap<String, Generator> = HashMap::new();
        let mut generator_compile_tasks = Vec::new();
        let (gen_compile_tx, mut gen_compile_rx) = mpsc::unbounded_channel::<(String, RunResult)>();

        for (name, path) in &conf.generators {
            let generator = Generator::from_problem(self, *rev, path.clone());
            let tx = gen_compile_tx.clone();
            let cb_name = name.clone();
            let task = match generator.compile_task(Box::new(move |outcome| {
                let result = RunResult::from_outcome(&outcome);
                let finished = result.finished;
                let _ = tx.send((cb_name, result));
                finished
            })) {
                Ok(task) => task,
                Err(err) => {
                    return GenerateInfo::failed(format!(
                        "failed to build compile task for generator '{name}': {err:#}"
                    ))
                }
            };
            generator_compile_tasks.push(task);
            generators.insert(name.clone(), generator);
        }
        drop(gen_compile_tx);

        let std_path = match conf.solutions.get(&conf.standard_solution) {
            Some(solution) => solution.path.clone(),
            None => {
                return GenerateInfo::failed(format!(
                    "standard solution '{}' is not declared",
                    conf.standard_solution
                ))
            }
        };
        let std_solution = Solution::from_problem(self, *rev, std_path.clone());
        let (std_compile_tx, mut std_compile_rx) = mpsc::unbounded_channel::<RunResult>();
        let std_compile_task = match std_solution.compile_task(Box::new(move |outcome| {
            let result = RunResult::from_outcome(&outcome);
            let finished = result.finished;
            let _ = std_compile_tx.send(result);
            finished
        })) {
            Ok(task) => task,
            Err(err) => {
                return GenerateInfo::failed(format!(
                    "failed to build compile task for standard solution: {err:#}"
                ))
            }
        };

        let (generate_tx, mut generate_rx) =
            mpsc::unbounded_channel::<(String, RunResult, String)>();
        let (std_run_tx, mut std_run_rx) = mpsc::unbounded_channel::<(String, RunResult, String)>();
        let mut generate_tasks = Vec::new();
        let mut std_run_tasks = Vec::new();

        for (group_name, group) in &conf.test_groups {
            let mut materialized = TestGroup {
                depends: group.depends.clone(),
                full_score: group.full_score,
                time_limit: group.time_limit,
                memory_limit: group.memory_limit,
                tests: Vec::new(),
            };

            for (i, test) in group.tests.iter().enumerate() {
                if test.disable {
                    continue;
                }

                let prefix = test_case_prefix(group_name, i);
                let inf_path = format!("{prefix}.in");
                let ans_path = format!("{prefix}.ans");
                let mut test_case = TestCase {
                    prefix,
                    inf_from: Vec::new(),
                    ans_from: Vec::new(),
                };

                let stdin: StdinSource;
                if let Some(fixed_name) = &test.fixed {
                    let fixed = &conf.fixed_tests[fixed_name];
                    let content = match self.file(rev, &fixed.inf) {
                        Ok(content) => content,
                        Err(err) => {
                            return GenerateInfo::failed(format!(
                                "failed to read fixed input '{}': {err:#}",
                                fixed.inf
                            ))
                        }
                    };
                    stdin = StdinSource::File(memory_file(content.clone()));
                    fs.write(inf_path, content);
                    test_case.inf_from = vec![fixed.inf.clone()];
                } else if let Some(gen_name) = &test.generator {
                    let Some(generator) = generators.get(gen_name) else {
                        return GenerateInfo::failed(format!("unknown generator '{gen_name}'"));
                    };
                    let mut args = vec!["--group".to_string(), group_name.clone()];
                    args.extend(test.extra_args.iter().cloned());

                    let slot = crate::judge::FileSlot::new();
                    let tx = generate_tx.clone();
                    let cb_slot = slot.clone();
                    let cb_path = inf_path.clone();
                    let task = generator.generate_task(
                        &args,
                        Box::new(move |outcome| {
                            let result = RunResult::from_outcome(&outcome);
                            let finished = result.finished;
                            let file_id = outcome
                                .as_ref()
                                .ok()
                                .and_then(|r| r.file_ids.get("stdout").cloned())
                                .unwrap_or_default();
                            if !file_id.is_empty() {
                                cb_slot.set(cached_file(file_id.clone()));
                            }
                            let _ = tx.send((cb_path, result, file_id));
                            finished
                        }),
                    );
                    generate_tasks.push(task);

                    let mut inf_from = vec![conf.generators[gen_name].clone()];
                    inf_from.extend(args);
                    test_case.inf_from = inf_from;
                    stdin = StdinSource::Slot(slot);
                } else {
                    // Unreachable after a successful parse phase.
                    return GenerateInfo::failed(format!(
                        "test case '{}' is neither fixed nor generated",
                        test_case.prefix
                    ));
                }

                let fixed_ans = test
                    .fixed
                    .as_ref()
                    .and_then(|name| conf.fixed_tests[name].ans.clone());
                if let Some(ans_src) = fixed_ans {
                    let content = match self.file(rev, &ans_src) {
                        Ok(content) => content,
                        Err(err) => {
                            return GenerateInfo::failed(format!(
                                "failed to read fixed answer '{ans_src}': {err:#}"
                            ))
                        }
                    };
                    fs.write(ans_path, content);
                    test_case.ans_from = vec![ans_src];
                } else {
                    let tx = std_run_tx.clone();
                    let cb_path = ans_path.clone();
                    let task = std_solution.run_task(
                        group.time_limit,
                        group.memory_limit,
                        stdin,
                        &[],
                        Box::new(move |outcome| {
                            let result = RunResult::from_outcome(&outcome);
                            let finished = result.finished;
                            let file_id = outcome
                                .as_ref()
                                .ok()
                                .and_then(|r| r.file_ids.get("stdout").cloned())
                                .unwrap_or_default();
                            let _ = tx.send((cb_path, result, file_id));
                            finished
                        }),
                    );
                    std_run_tasks.push(task);
                    test_case.ans_from = vec![std_path.clone()];
                }

                materialized.tests.push(test_case);
            }

            info.test_groups.insert(group_name.clone(), materialized);
        }
        drop(generate_tx);
        drop(std_run_tx);

        let judge = match pool.idle_judge() {
            Ok(judge) => judge,
            Err(err) => return GenerateInfo::failed(format!("failed to pick a judge: {err:#}")),
        };

        let request = Request::new()
            .execute(generator_compile_tasks)
            .execute([std_compile_task])
            .then(generate_tasks)
            .then(std_run_tasks);
        if let Err(err) = judge.submit(request).await {
            return GenerateInfo::failed(format!("failed to submit request: {err:#}"));
        }

        while let Some((name, result)) = gen_compile_rx.recv().await {
            let finished = result.finished;
            info.generator_compile_results.insert(name.clone(), result);
            if !finished {
                info.ok = false;
                info.error = Some(format!("failed to compile generator '{name}'"));
                break;
            }
        }
        if !info.ok {
            return info;
        }

        info.std_compile_result = std_compile_rx.recv().await;
        if !info
            .std_compile_result
            .as_ref()
            .map(|result| result.finished)
            .unwrap_or(false)
        {
            info.ok = false;
            info.error = Some("failed to compile standard solution".to_string());
            return info;
        }

        // Fetch generated inputs, then generated answers, into the
        // filesystem. The first fatal outcome halts materialization;
        // remaining responses are drained by the early return dropping
        // the receiver.
        while let Some((path, result, file_id)) = generate_rx.recv().await {
            let finished = result.finished;
            let fatal = result.err.is_some();
            info.generate_results.insert(path.clone(), result);
            if !finished {
                info.ok = false;
                info.error = Some(format!("failed to generate input file '{path}'"));
                if fatal {
                    break;
                }
                continue;
            }
            match judge.file_get(&file_id).await {
                Ok(content) => fs.write(path, content),
                Err(err) => {
                    info.ok = false;
                    info.error = Some(format!("failed to fetch input file '{path}': {err:#}"));
                    break;
                }
            }
        }
        if !info.ok {
            return info;
        }

        while let Some((path, result, file_id)) = std_run_rx.recv().await {
            let finished = result.finished;
            let fatal = result.err.is_some();
            info.std_run_results.insert(path.clone(), result);
            if !finished {
                info.ok = false;
                info.error = Some(format!(
                    "standard solution did not finish on input of '{path}'"
                ));
                if fatal {
                    break;
                }
                continue;
            }
            match judge.file_get(&file_id).await {
                Ok(content) => fs.write(path, content),
                Err(err) => {
                    info.ok = false;
                    info.error = Some(format!("failed to fetch answer file '{path}': {err:#}"));
                    break;
                }
            }
        }

        info
    }

    /// Validate phase: compiles the validator and runs it over every
    /// materialized input with `--group <name>`. Non-accepted validations
    /// mark the phase failed but do not stop the remaining ones;
    /// execution errors do.
    pub async fn build_validate(
        &self,
        rev: &Revision,
        conf: &ProblemConfig,
        test_groups: &HashMap<String, TestGroup>,
        pool: &JudgePool,
        fs: &MemFs,
    ) -> ValidateInfo {
        let validator = Validator::from_problem(self, *rev, conf.validator.clone());

        let (compile_tx, mut compile_rx) = mpsc::unbounded_channel::<RunResult>();
        let compile_task = match validator.compile_task(Box::new(move |outcome| {
            let result = RunResult::from_outcome(&outcome);
            let finished = result.finished;
            let _ = compile_tx.send(result);
            finished
        })) {
            Ok(task) => task,
            Err(err) => {
                return ValidateInfo::failed(format!(
                    "failed to build compile task for validator: {err:#}"
                ))
            }
        };

        let (validate_tx, mut validate_rx) = mpsc::unbounded_channel::<(String, RunResult)>();
        let mut validate_tasks = Vec::new();
        for (group_name, group) in test_groups {
            for test in &group.tests {
                let inf_path = test.inf_path();
                let input = match fs.read(&inf_path) {
                    Ok(content) => content.to_vec(),
                    Err(err) => return ValidateInfo::failed(format!("{err:#}")),
                };
                let args = vec!["--group".to_string(), group_name.clone()];
                let tx = validate_tx.clone();
                let cb_path = inf_path.clone();
                validate_tasks.push(validator.validate_task(
                    StdinSource::File(memory_file(input)),
                    &args,
                    Box::new(move |outcome| {
                        let result = RunResult::from_outcome(&outcome);
                        let fatal = result.err.is_some();
                        let _ = tx.send((cb_path, result));
                        !fatal
                    }),
                ));
            }
        }
        drop(validate_tx);

        let judge = match pool.idle_judge() {
            Ok(judge) => judge,
            Err(err) => return ValidateInfo::failed(format!("failed to pick a judge: {err:#}")),
        };
        let request = Request::new().execute([compile_task]).then(validate_tasks);
        if let Err(err) = judge.submit(request).await {
            return ValidateInfo::failed(format!("failed to submit request: {err:#}"));
        }

        let mut info = ValidateInfo {
            ok: true,
            ..ValidateInfo::default()
        };

        info.validator_compile_result = compile_rx.recv().await;
        if !info
            .validator_compile_result
            .as_ref()
            .map(|result| result.finished)
            .unwrap_or(false)
        {
            info.ok = false;
            info.error = Some("failed to compile validator".to_string());
            return info;
        }

        while let Some((path, result)) = validate_rx.recv().await {
            let finished = result.finished;
            let fatal = result.err.is_some();
            info.validate_results.insert(path.clone(), result);
            if !finished {
                info.ok = false;
                if info.error.is_none() {
                    info.error = Some(format!("validator rejected input '{path}'"));
                }
                if fatal {
                    break;
                }
            }
        }

        info
    }

    /// Check phase: compiles every solution and the checker, runs all
    /// (solution x test) pairs with the group limits keeping each stdout
    /// cached in the sandbox, judges accepted runs with the checker, and
    /// verifies each solution passes exactly the groups it claims.
    pub async fn build_check(
        &self,
        rev: &Revision,
        conf: &ProblemConfig,
        test_groups: &HashMap<String, TestGroup>,
        pool: &JudgePool,
        fs: &MemFs,
    ) -> CheckInfo {
        let mut info = CheckInfo {
            ok: true,
            ..CheckInfo::default()
        };

        let mut solutions: HashMap<String, Solution> = HashMap::new();
        let mut solution_compile_tasks = Vec::new();
        let (sol_compile_tx, mut sol_compile_rx) = mpsc::unbounded_channel::<(String, RunResult)>();

        for (name, sol_conf) in &conf.solutions {
            let solution = Solution::from_problem(self, *rev, sol_conf.path.clone());
            let tx = sol_compile_tx.clone();
            let cb_name = name.clone();
            let task = match solution.compile_task(Box::new(move |outcome| {
                let result = RunResult::from_outcome(&outcome);
                let finished = result.finished;
                let _ = tx.send((cb_name, result));
                finished
            })) {
                Ok(task) => task,
                Err(err) => {
                    return CheckInfo::failed(format!(
                        "failed to build compile task for solution '{name}': {err:#}"
                    ))
                }
            };
            solution_compile_tasks.push(task);
            solutions.insert(name.clone(), solution);
        }
        drop(sol_compile_tx);

        let checker = if self.file(rev, &conf.checker).is_ok() {
            Checker::from_problem(self, *rev, conf.checker.clone())
        } else {
            match Checker::builtin(&conf.checker) {
                Some(checker) => checker,
                None => {
                    return CheckInfo::failed(format!("checker '{}' not found", conf.checker))
                }
            }
        };
        let (checker_compile_tx, mut checker_compile_rx) = mpsc::unbounded_channel::<RunResult>();
        let checker_compile_task = match checker.compile_task(Box::new(move |outcome| {
            let result = RunResult::from_outcome(&outcome);
            let finished = result.finished;
            let _ = checker_compile_tx.send(result);
            finished
        })) {
            Ok(task) => task,
            Err(err) => {
                return CheckInfo::failed(format!(
                    "failed to build compile task for checker: {err:#}"
                ))
            }
        };

        let (run_tx, mut run_rx) = mpsc::unbounded_channel::<RunResponse>();
        let mut run_tasks = Vec::new();
        for (group_name, group) in test_groups {
            for test in &group.tests {
                let inf_path = test.inf_path();
                let input = match fs.read(&inf_path) {
                    Ok(content) => content.to_vec(),
                    Err(err) => return CheckInfo::failed(format!("{err:#}")),
                };

                for sol_name in conf.solutions.keys() {
                    let solution = &solutions[sol_name];
                    let tx = run_tx.clone();
                    let cb_solution = sol_name.clone();
                    let cb_group = group_name.clone();
                    let cb_test = test.prefix.clone();
                    run_tasks.push(solution.run_task(
                        group.time_limit,
                        group.memory_limit,
                        StdinSource::File(memory_file(input.clone())),
                        &[],
                        Box::new(move |outcome| {
                            let result = RunResult::from_outcome(&outcome);
                            let ouf_id = outcome
                                .as_ref()
                                .ok()
                                .and_then(|r| r.file_ids.get("stdout").cloned())
                                .unwrap_or_default();
                            let _ = tx.send(RunResponse {
                                solution: cb_solution,
                                group: cb_group,
                                test: cb_test,
                                result,
                                ouf_id,
                            });
                            true
                        }),
                    ));
                }
            }
        }
        drop(run_tx);

        let judge = match pool.idle_judge() {
            Ok(judge) => judge,
            Err(err) => return CheckInfo::failed(format!("failed to pick a judge: {err:#}")),
        };
        let request = Request::new()
            .execute(solution_compile_tasks)
            .execute([checker_compile_task])
            .then(run_tasks);
        if let Err(err) = judge.submit(request).await {
            return CheckInfo::failed(format!("failed to submit request: {err:#}"));
        }

        while let Some((name, result)) = sol_compile_rx.recv().await {
            let finished = result.finished;
            info.solution_compile_results.insert(name.clone(), result);
            if !finished {
                info.ok = false;
                info.error = Some(format!("failed to compile solution '{name}'"));
                break;
            }
        }
        if !info.ok {
            return info;
        }

        info.checker_compile_result = checker_compile_rx.recv().await;
        if !info
            .checker_compile_result
            .as_ref()
            .map(|result| result.finished)
            .unwrap_or(false)
        {
            info.ok = false;
            info.error = Some("failed to compile checker".to_string());
            return info;
        }

        for name in conf.solutions.keys() {
            info.judge_results.insert(name.clone(), HashMap::new());
        }

        // (solution, group) pairs with at least one test that did not
        // come out fully accepted.
        let mut failed_groups: HashSet<(String, String)> = HashSet::new();
        let (check_tx, mut check_rx) = mpsc::unbounded_channel::<CheckResponse>();
        let mut check_tasks = Vec::new();

        while let Some(resp) = run_rx.recv().await {
            if let Some(err) = &resp.result.err {
                info.ok = false;
                info.error = Some(format!(
                    "failed to run solution '{}' on '{}': {err}",
                    resp.solution, resp.test
                ));
                break;
            }

            let inf_path = format!("{}.in", resp.test);
            let input = match fs.read(&inf_path) {
                Ok(content) => content.to_vec(),
                Err(err) => {
                    info.ok = false;
                    info.error = Some(format!("{err:#}"));
                    break;
                }
            };

            let ouf_excerpt = if resp.ouf_id.is_empty() {
                String::new()
            } else {
                match judge.file_get(&resp.ouf_id).await {
                    Ok(content) => truncate_message(&String::from_utf8_lossy(&content)),
                    Err(err) => {
                        info.ok = false;
                        info.error =
                            Some(format!("failed to fetch output of '{}': {err:#}", resp.test));
                        break;
                    }
                }
            };

            let accepted = resp.result.status == Status::Accepted;
            if let Some(results) = info.judge_results.get_mut(&resp.solution) {
                results.insert(
                    resp.test.clone(),
                    JudgeResult {
                        status: resp.result.status,
                        time: resp.result.time,
                        memory: resp.result.memory,
                        checker_result: String::new(),
                        inf: truncate_message(&String::from_utf8_lossy(&input)),
                        ouf: ouf_excerpt,
                    },
                );
            }

            if !accepted {
                failed_groups.insert((resp.solution.clone(), resp.group.clone()));
                continue;
            }

            let ans_path = format!("{}.ans", resp.test);
            let answer = match fs.read(&ans_path) {
                Ok(content) => content.to_vec(),
                Err(err) => {
                    info.ok = false;
                    info.error = Some(format!("{err:#}"));
                    break;
                }
            };

            let tx = check_tx.clone();
            let cb_solution = resp.solution.clone();
            let cb_group = resp.group.clone();
            let cb_test = resp.test.clone();
            check_tasks.push(checker.check_task(
                memory_file(input),
                cached_file(resp.ouf_id.clone()),
                memory_file(answer),
                Box::new(move |outcome| {
                    let result = RunResult::from_outcome(&outcome);
                    let _ = tx.send(CheckResponse {
                        solution: cb_solution,
                        group: cb_group,
                        test: cb_test,
                        result,
                    });
                    true
                }),
            ));
        }
        drop(check_tx);
        if !info.ok {
            return info;
        }

        if let Err(err) = judge.submit(Request::new().execute(check_tasks)).await {
            info.ok = false;
            info.error = Some(format!("failed to submit check request: {err:#}"));
            return info;
        }

        while let Some(resp) = check_rx.recv().await {
            if let Some(err) = &resp.result.err {
                info.ok = false;
                info.error = Some(format!(
                    "failed to check '{}' of solution '{}': {err}",
                    resp.test, resp.solution
                ));
                break;
            }
            let (status, _score, message) =
                parse_testlib_output(&resp.result.stderr, TEST_FULL_SCORE);
            if let Some(entry) = info
                .judge_results
                .get_mut(&resp.solution)
                .and_then(|results| results.get_mut(&resp.test))
            {
                entry.status = status;
                entry.checker_result = message;
            }
            if status != Status::Accepted {
                failed_groups.insert((resp.solution.clone(), resp.group.clone()));
            }
        }
        if !info.ok {
            return info;
        }

        // A solution passes a group when every test of the group came out
        // accepted from both the run and the checker. It must pass the
        // groups it claims and nothing else.
        for (sol_name, sol_conf) in &conf.solutions {
            let accepts: BTreeSet<&str> = sol_conf.accepts.iter().map(String::as_str).collect();
            let passed: BTreeSet<&str> = test_groups
                .keys()
                .filter(|group| {
                    !failed_groups.contains(&(sol_name.clone(), (*group).clone()))
                })
                .map(String::as_str)
                .collect();

            let not_pass: Vec<String> = accepts
                .iter()
                .filter(|group| !passed.contains(*group))
                .map(|group| group.to_string())
                .collect();
            let extra_pass: Vec<String> = passed
                .iter()
                .filter(|group| !accepts.contains(*group))
                .map(|group| group.to_string())
                .collect();

            if !not_pass.is_empty() {
                info.ok = false;
                if info.error.is_none() {
                    info.error = Some(format!(
                        "solution '{sol_name}' should pass group '{}' but did not",
                        not_pass[0]
                    ));
                }
                info.not_pass_groups.insert(sol_name.clone(), not_pass);
            }
            if !extra_pass.is_empty() {
                info.ok = false;
                if info.error.is_none() {
                    info.error = Some(format!(
                        "solution '{sol_name}' passes group '{}' without claiming it",
                        extra_pass[0]
                    ));
                }
                info.extra_pass_groups.insert(sol_name.clone(), extra_pass);
            }
        }

        info
    }

    /// Runs the whole pipeline for one revision. Returns the report and,
    /// when every phase succeeded, the materialized test data.
    pub async fn build(&self, rev: &Revision, pool: &JudgePool) -> (BuildInfo, Option<MemFs>) {
        let mut result = BuildInfo::default();

        let parse = self.build_parse(rev);
        debug!("build parse: ok={}", parse.ok);
        let conf = match (parse.ok, parse.config.clone()) {
            (true, Some(conf)) => conf,
            _ => {
                result.parse = Some(parse);
                return (result, None);
            }
        };
        result.parse = Some(parse);

        let mut fs = MemFs::new();
        let generate = self.build_generate(rev, &conf, pool, &mut fs).await;
        debug!("build generate: ok={}", generate.ok);
        let generate_ok = generate.ok;
        let test_groups = generate.test_groups.clone();
        result.generate = Some(generate);
        if !generate_ok {
            return (result, None);
        }

        let validate = self
            .build_validate(rev, &conf, &test_groups, pool, &fs)
            .await;
        debug!("build validate: ok={}", validate.ok);
        let validate_ok = validate.ok;
        result.validate = Some(validate);
        if !validate_ok {
            return (result, None);
        }

        let check = self.build_check(rev, &conf, &test_groups, pool, &fs).await;
        debug!("build check: ok={}", check.ok);
        let check_ok = check.ok;
        result.check = Some(check);
        if !check_ok {
            return (result, None);
        }

        result.ok = true;
        (result, Some(fs))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::*;
    use crate::judge::Judge;
    use crate::revision::MemRevisionStore;
    use crate::sandbox::pb;
    use crate::sandbox::pb::response::result::StatusType;
    use crate::sandbox::testing::{MockFiles, MockReply, MockSandbox};

    const REV: Revision = [9u8; 20];

    fn result_with(
        status: StatusType,
        file_ids: Vec<(&str, String)>,
        stderr: &[u8],
    ) -> pb::Response {
        pb::Response {
            results: vec![pb::response::Result {
                status: status as i32,
                time: 1_000_000,
                memory: 1024,
                files: [("stderr".to_string(), stderr.to_vec())].into(),
                file_ids: file_ids
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
                ..Default::default()
            }],
        }
    }

    fn stdin_of(request: &pb::Request, files: &MockFiles) -> Vec<u8> {
        files.resolve(&request.cmd[0].files[0]).unwrap_or_default()
    }

    fn copy_in_of(request: &pb::Request, path: &str, files: &MockFiles) -> Vec<u8> {
        request.cmd[0]
            .copy_in
            .get(path)
            .and_then(|file| files.resolve(file))
            .unwrap_or_default()
    }

    /// A scripted sandbox that behaves like a real toolchain for an A+B
    /// problem: compiles map sources to binary ids, the generator prints
    /// "3 4", solutions sum their input (or print garbage when built from
    /// a source containing WRONG), the validator wants two integers and
    /// the checker token-compares output with answer.
    fn a_plus_b_sandbox() -> Arc<MockSandbox> {
        MockSandbox::new(|request, files| {
            let cmd = &request.cmd[0];
            let arg0 = cmd.args.first().map(String::as_str).unwrap_or("");

            if cmd.args.iter().any(|arg| arg == "-o") {
                // Compile: the artifact follows -o, the source precedes it.
                let at = cmd.args.iter().position(|arg| arg == "-o").unwrap();
                let artifact = cmd.args[at + 1].clone();
                let source_name = cmd.args[at - 1].clone();
                let source = copy_in_of(request, &source_name, files);
                if source.windows(6).any(|w| w == b"BROKEN") {
                    return MockReply::respond(result_with(
                        StatusType::NonzeroExitStatus,
                        vec![],
                        b"compile error\n",
                    ));
                }
                let binary_id = files.store(source);
                let stdout_id = files.store(Vec::new());
                return MockReply::respond(result_with(
                    StatusType::Accepted,
                    vec![(artifact.as_str(), binary_id), ("stdout", stdout_id)],
                    b"",
                ));
            }

            match arg0 {
                "generator" => {
                    let stdout_id = files.store(b"3 4\n".to_vec());
                    MockReply::respond(result_with(
                        StatusType::Accepted,
                        vec![("stdout", stdout_id)],
                        b"",
                    ))
                }
                "validator" => {
                    let input = stdin_of(request, files);
                    let ok = String::from_utf8_lossy(&input)
                        .split_whitespace()
                        .filter_map(|token| token.parse::<i64>().ok())
                        .count()
                        == 2;
                    let stdout_id = files.store(Vec::new());
                    if ok {
                        MockReply::respond(result_with(
                            StatusType::Accepted,
                            vec![("stdout", stdout_id)],
                            b"",
                        ))
                    } else {
                        MockReply::respond(result_with(
                            StatusType::NonzeroExitStatus,
                            vec![("stdout", stdout_id)],
                            b"FAIL expected two integers\n",
                        ))
                    }
                }
                "sol" => {
                    let source = copy_in_of(request, "sol", files);
                    let input = stdin_of(request, files);
                    let output = if source.windows(5).any(|w| w == b"WRONG") {
                        b"999\n".to_vec()
                    } else {
                        let sum: i64 = String::from_utf8_lossy(&input)
                            .split_whitespace()
                            .filter_map(|token| token.parse::<i64>().ok())
                            .sum();
                        format!("{sum}\n").into_bytes()
                    };
                    let stdout_id = files.store(output);
                    MockReply::respond(result_with(
                        StatusType::Accepted,
                        vec![("stdout", stdout_id)],
                        b"",
                    ))
                }
                "checker" => {
                    let output = copy_in_of(request, "output.txt", files);
                    let answer = copy_in_of(request, "answer.txt", files);
                    let stdout_id = files.store(Vec::new());
                    let matches = String::from_utf8_lossy(&output).split_whitespace().eq(
                        String::from_utf8_lossy(&answer).split_whitespace(),
                    );
                    if matches {
                        MockReply::respond(result_with(
                            StatusType::Accepted,
                            vec![("stdout", stdout_id)],
                            b"ok answer is correct\n",
                        ))
                    } else {
                        MockReply::respond(result_with(
                            StatusType::NonzeroExitStatus,
                            vec![("stdout", stdout_id)],
                            b"wrong answer expected something else\n",
                        ))
                    }
                }
                other => MockReply::error(&format!("mock cannot run '{other}'")),
            }
        })
    }

    fn pool_with_mock(sandbox: Arc<MockSandbox>) -> JudgePool {
        let pool = JudgePool::new();
        let judge = Judge::new("mock", sandbox);
        judge.start();
        pool.register(judge);
        pool
    }

    fn base_snapshot(config_yaml: &str) -> Problem {
        let mut store = MemRevisionStore::new();
        store.insert(REV, "problem.yaml", config_yaml.as_bytes());
        store.insert(REV, "src/validator.cpp", b"validator source".as_slice());
        store.insert(REV, "src/gen.cpp", b"generator source".as_slice());
        store.insert(REV, "src/sol.cpp", b"correct solution".as_slice());
        store.insert(REV, "src/wrong.cpp", b"WRONG solution".as_slice());
        store.insert(REV, "tests/sample.in", b"1 2\n".as_slice());
        Problem::new(Uuid::new_v4(), Arc::new(store))
    }

    const A_PLUS_B_CONFIG: &str = r#"
checker: wcmp
validator: src/validator.cpp
generators:
  gen: src/gen.cpp
solutions:
  main:
    path: src/sol.cpp
    accepts: [main]
  wrong:
    path: src/wrong.cpp
    accepts: []
standard_solution: main
fixed_tests:
  sample:
    inf: tests/sample.in
test_groups:
  main:
    full_score: 100
    time_limit: 1000000000
    memory_limit: 67108864
    tests:
      - fixed: sample
      - generator: gen
"#;

    #[test]
    fn test_parse_accepts_valid_config() {
        let problem = base_snapshot(A_PLUS_B_CONFIG);
        let parse = problem.build_parse(&REV);
        assert!(parse.ok, "{:?}", parse.error);
        let conf = parse.config.unwrap();
        assert_eq!(conf.checker, "wcmp");
        assert_eq!(conf.test_groups["main"].tests.len(), 2);
    }

    #[test]
    fn test_parse_rejects_unknown_revision() {
        let problem = base_snapshot(A_PLUS_B_CONFIG);
        let parse = problem.build_parse(&[0u8; 20]);
        assert!(!parse.ok);
        assert!(parse.error.unwrap().contains("revision"));
    }

    #[test]
    fn test_parse_rejects_missing_validator() {
        let config = A_PLUS_B_CONFIG.replace("src/validator.cpp", "src/missing.cpp");
        let problem = base_snapshot(&config);
        let parse = problem.build_parse(&REV);
        assert!(!parse.ok);
        assert!(parse.error.unwrap().contains("validator"));
    }

    #[test]
    fn test_parse_rejects_unknown_checker() {
        let config = A_PLUS_B_CONFIG.replace("checker: wcmp", "checker: nocmp");
        let problem = base_snapshot(&config);
        let parse = problem.build_parse(&REV);
        assert!(!parse.ok);
        assert!(parse.error.unwrap().contains("checker 'nocmp'"));
    }

    #[test]
    fn test_parse_rejects_bad_depends_and_score() {
        let config = A_PLUS_B_CONFIG.replace(
            "  main:\n    full_score: 100",
            "  main:\n    depends: [ghost]\n    full_score: 100",
        );
        let problem = base_snapshot(&config);
        let parse = problem.build_parse(&REV);
        assert!(!parse.ok);
        assert!(parse.error.unwrap().contains("ghost"));

        let config = A_PLUS_B_CONFIG.replace("full_score: 100", "full_score: -5");
        let problem = base_snapshot(&config);
        let parse = problem.build_parse(&REV);
        assert!(!parse.ok);
        assert!(parse.error.unwrap().contains("negative full score"));
    }

    #[test]
    fn test_parse_rejects_unknown_generator_reference() {
        let config = A_PLUS_B_CONFIG.replace("- generator: gen", "- generator: ghostgen");
        let problem = base_snapshot(&config);
        let parse = problem.build_parse(&REV);
        assert!(!parse.ok);
        assert!(parse.error.unwrap().contains("ghostgen"));
    }

    #[tokio::test]
    async fn test_full_a_plus_b_build() {
        let problem = base_snapshot(A_PLUS_B_CONFIG);
        let pool = pool_with_mock(a_plus_b_sandbox());

        let (info, fs) = problem.build(&REV, &pool).await;
        assert!(info.ok, "build failed: {info:?}");
        let fs = fs.expect("successful build must return test data");

        // Every enabled test case materialized its input and answer.
        assert_eq!(fs.read("main-0.in").unwrap(), b"1 2\n");
        assert_eq!(fs.read("main-0.ans").unwrap(), b"3\n");
        assert_eq!(fs.read("main-1.in").unwrap(), b"3 4\n");
        assert_eq!(fs.read("main-1.ans").unwrap(), b"7\n");

        let generate = info.generate.as_ref().unwrap();
        assert!(generate.ok);
        assert_eq!(generate.test_groups["main"].tests.len(), 2);
        assert!(generate.generator_compile_results["gen"].finished);
        assert!(generate.std_compile_result.as_ref().unwrap().finished);
        assert_eq!(
            generate.test_groups["main"].tests[1].inf_from,
            vec!["src/gen.cpp", "--group", "main"]
        );

        let validate = info.validate.as_ref().unwrap();
        assert!(validate.ok);
        assert_eq!(validate.validate_results.len(), 2);

        let check = info.check.as_ref().unwrap();
        assert!(check.ok, "{:?}", check.error);
        // The standard solution is accepted by the checker everywhere.
        let main_results = &check.judge_results["main"];
        assert_eq!(main_results["main-0"].status, Status::Accepted);
        assert!(main_results["main-0"].checker_result.starts_with("AC "));
        // The wrong solution fails the group, and claims nothing, so the
        // oracle is satisfied on both sides.
        assert_eq!(check.judge_results["wrong"]["main-1"].status, Status::WrongAnswer);
        assert!(check.not_pass_groups.is_empty());
        assert!(check.extra_pass_groups.is_empty());
    }

    #[tokio::test]
    async fn test_check_oracle_flags_mismatches() {
        let config = r#"
checker: wcmp
validator: src/validator.cpp
generators:
  gen: src/gen.cpp
solutions:
  main:
    path: src/sol.cpp
    accepts: [main]
  liar:
    path: src/wrong.cpp
    accepts: [main]
  sneaky:
    path: src/sol.cpp
    accepts: []
standard_solution: main
test_groups:
  main:
    full_score: 100
    time_limit: 1000000000
    memory_limit: 67108864
    tests:
      - generator: gen
"#;
        let problem = base_snapshot(config);
        let pool = pool_with_mock(a_plus_b_sandbox());

        let (info, fs) = problem.build(&REV, &pool).await;
        assert!(!info.ok);
        assert!(fs.is_none());

        let check = info.check.unwrap();
        assert!(!check.ok);
        // The liar claims the group but fails it; the sneaky one passes
        // it without claiming it.
        assert_eq!(check.not_pass_groups["liar"], vec!["main"]);
        assert_eq!(check.extra_pass_groups["sneaky"], vec!["main"]);
        assert!(!check.not_pass_groups.contains_key("main"));
        assert!(!check.extra_pass_groups.contains_key("main"));
    }

    #[tokio::test]
    async fn test_generate_fails_on_broken_generator() {
        let config = A_PLUS_B_CONFIG.replace("gen: src/gen.cpp", "gen: src/broken_gen.cpp");
        let problem = {
            let mut store = MemRevisionStore::new();
            store.insert(REV, "problem.yaml", config.as_bytes());
            store.insert(REV, "src/validator.cpp", b"validator source".as_slice());
            store.insert(REV, "src/broken_gen.cpp", b"BROKEN generator".as_slice());
            store.insert(REV, "src/sol.cpp", b"correct solution".as_slice());
            store.insert(REV, "src/wrong.cpp", b"WRONG solution".as_slice());
            store.insert(REV, "tests/sample.in", b"1 2\n".as_slice());
            Problem::new(Uuid::new_v4(), Arc::new(store))
        };
        let pool = pool_with_mock(a_plus_b_sandbox());

        let (info, fs) = problem.build(&REV, &pool).await;
        assert!(!info.ok);
        assert!(fs.is_none());

        let generate = info.generate.unwrap();
        assert!(!generate.ok);
        assert!(generate.error.unwrap().contains("generator 'gen'"));
        let compile = &generate.generator_compile_results["gen"];
        assert!(!compile.finished);
        assert_eq!(compile.stderr, "compile error");
        // The pipeline stopped before later phases.
        assert!(info.validate.is_none());
        assert!(info.check.is_none());
    }

    #[tokio::test]
    async fn test_validate_records_all_rejections() {
        // An input that is not two integers: the validator rejects it,
        // but validation still covers every test case.
        let config = r#"
checker: wcmp
validator: src/validator.cpp
generators: {}
solutions:
  main:
    path: src/sol.cpp
    accepts: [g]
standard_solution: main
fixed_tests:
  bad:
    inf: tests/bad.in
    ans: tests/bad.ans
  good:
    inf: tests/good.in
    ans: tests/good.ans
test_groups:
  g:
    full_score: 100
    time_limit: 1000000000
    memory_limit: 67108864
    tests:
      - fixed: bad
      - fixed: good
"#;
        let problem = {
            let mut store = MemRevisionStore::new();
            store.insert(REV, "problem.yaml", config.as_bytes());
            store.insert(REV, "src/validator.cpp", b"validator source".as_slice());
            store.insert(REV, "src/sol.cpp", b"correct solution".as_slice());
            store.insert(REV, "tests/bad.in", b"not numbers\n".as_slice());
            store.insert(REV, "tests/bad.ans", b"0\n".as_slice());
            store.insert(REV, "tests/good.in", b"1 2\n".as_slice());
            store.insert(REV, "tests/good.ans", b"3\n".as_slice());
            Problem::new(Uuid::new_v4(), Arc::new(store))
        };
        let pool = pool_with_mock(a_plus_b_sandbox());

        let (info, fs) = problem.build(&REV, &pool).await;
        assert!(!info.ok);
        assert!(fs.is_none());

        let validate = info.validate.unwrap();
        assert!(!validate.ok);
        // Both validations completed despite the rejection.
        assert_eq!(validate.validate_results.len(), 2);
        assert!(!validate.validate_results["g-0.in"].finished);
        assert!(validate.validate_results["g-1.in"].finished);
        assert!(info.check.is_none());
    }

    #[tokio::test]
    async fn test_disabled_tests_are_skipped() {
        let config = A_PLUS_B_CONFIG.replace("- generator: gen", "- generator: gen\n        disable: true");
        let problem = base_snapshot(&config);
        let pool = pool_with_mock(a_plus_b_sandbox());

        let (info, fs) = problem.build(&REV, &pool).await;
        assert!(info.ok, "{info:?}");
        let fs = fs.unwrap();
        assert!(fs.exists("main-0.in"));
        assert!(!fs.exists("main-1.in"));
        assert_eq!(info.generate.unwrap().test_groups["main"].tests.len(), 1);
    }
}
