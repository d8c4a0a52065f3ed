//! Export of archived test data as judge-site packages.
//!
//! Currently only the Luogu format: a zip holding an inner `data.zip`
//! with the test files and a per-test `config.yml`, plus a `scoring.txt`
//! aggregating group scores.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::io::{Cursor, Write as _};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use super::storage::StorageClient;
use super::testgroup::TestGroup;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LuoguTestConfig {
    time_limit: i64,
    memory_limit: u64,
    score: i64,
    subtask_id: usize,
}

/// Formats this module can export.
pub fn formats() -> &'static [&'static str] {
    &["luogu"]
}

/// Exports the archived test data of a problem in the given format.
pub async fn export(
    format: &str,
    storage: &StorageClient,
    problem_id: Uuid,
    test_groups: &HashMap<String, TestGroup>,
) -> Result<Vec<u8>> {
    match format {
        "luogu" => luogu_package(storage, problem_id, test_groups).await,
        other => bail!("unknown package format '{other}'"),
    }
}

async fn luogu_package(
    storage: &StorageClient,
    problem_id: Uuid,
    test_groups: &HashMap<String, TestGroup>,
) -> Result<Vec<u8>> {
    let bucket = problem_id.to_string();
    let options = SimpleFileOptions::default();

    // Group order must be stable so subtask ids are reproducible.
    let ordered: BTreeMap<&String, &TestGroup> = test_groups.iter().collect();

    let mut test_configs: BTreeMap<String, LuoguTestConfig> = BTreeMap::new();
    let mut scoring = String::new();
    scoring.push_str("@total_score = 0\n");
    scoring.push_str("@final_status = AC\n");
    scoring.push_str("@final_time = 0\n");
    scoring.push_str("@final_memory = 0\n");

    let mut data = ZipWriter::new(Cursor::new(Vec::new()));
    for (subtask_id, (_, group)) in ordered.iter().enumerate() {
        let subtask_id = subtask_id + 1;

        let _ = write!(
            scoring,
            "@total_score = @total_score + @score{subtask_id}\n\
             if @time{subtask_id} < @final_time; then\n  @final_time = @time{subtask_id}\nfi\n\
             if @memory{subtask_id} < @final_memory; then\n  @final_memory = @memory{subtask_id}\nfi\n\
             if @status{subtask_id} != AC and (@final_status == AC or @status{subtask_id} != UNAC); then\n  \
             @final_status = @status{subtask_id}\nfi\n"
        );

        for test in &group.tests {
            for path in [test.inf_path(), test.ans_path()] {
                let content = storage.get(&bucket, &path).await?;
                data.start_file(&*path, options)
                    .with_context(|| format!("failed to add '{path}' to package"))?;
                data.write_all(&content)?;
            }

            test_configs.insert(
                test.inf_path(),
                LuoguTestConfig {
                    time_limit: (group.time_limit / 1_000_000) as i64,
                    memory_limit: group.memory_limit / (1024 * 1024),
                    score: group.full_score,
                    subtask_id,
                },
            );
        }
    }

    data.start_file("config.yml", options)?;
    let config_yaml = serde_yaml::to_string(&test_configs)?;
    data.write_all(config_yaml.as_bytes())?;
    let data_bytes = data.finish()?.into_inner();

    let mut package = ZipWriter::new(Cursor::new(Vec::new()));
    package.start_file("data.zip", options)?;
    package.write_all(&data_bytes)?;
    package.start_file("scoring.txt", options)?;
    package.write_all(scoring.as_bytes())?;
    Ok(package.finish()?.into_inner())
}
