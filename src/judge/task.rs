//! Declarative description of one sandboxed command.
//!
//! A task carries everything needed to run a single program in the
//! sandbox: argv, environment, limits, input files and requested outputs,
//! plus a completion callback. Tasks are declared up front and executed
//! later by a judge worker; inputs that are produced by earlier tasks
//! (a compiled binary, a generated test input) are referenced through
//! write-once cells that are dereferenced only when the wire request is
//! serialized at dispatch time.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use uuid::Uuid;

use crate::sandbox::{cached_file, memory_file, pb, pipe_collector};

/// Default cpu time limit: 5 seconds.
pub const DEFAULT_TIME_LIMIT: u64 = 5_000_000_000;
/// Default memory limit: 256 MiB.
pub const DEFAULT_MEMORY_LIMIT: u64 = 256 * 1024 * 1024;
/// Default stdout cap: 256 MiB.
pub const DEFAULT_STDOUT_LIMIT: i64 = 256 * 1024 * 1024;
/// Default stderr cap: 10 KiB.
pub const DEFAULT_STDERR_LIMIT: i64 = 10 * 1024;

/// Default environment of sandboxed commands.
pub fn default_env() -> Vec<String> {
    vec![
        "PATH=/usr/local/bin:/usr/bin:/bin".to_string(),
        "HOME=/tmp".to_string(),
    ]
}

/// Outcome delivered to a task callback: the sandbox result on success,
/// or the transport/timeout error otherwise.
pub type TaskOutcome = anyhow::Result<pb::response::Result>;

/// Completion callback. Returning `false` aborts the remaining sibling
/// tasks of the request and cancels its chain.
pub type Callback = Box<dyn FnOnce(TaskOutcome) -> bool + Send + 'static>;

/// Write-once slot for a sandbox file id.
///
/// A compile task's callback fills the cell; run tasks declared earlier
/// read it when their wire request is serialized. Cloning shares the slot.
#[derive(Clone, Debug, Default)]
pub struct FileIdCell(Arc<OnceLock<String>>);

impl FileIdCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the id. Later writes are ignored; the slot is one-shot.
    pub fn set(&self, id: String) {
        let _ = self.0.set(id);
    }

    pub fn get(&self) -> Option<String> {
        self.0.get().cloned()
    }
}

/// Write-once slot for a whole wire file, used to bind a producer task's
/// cached output as a later task's stdin.
#[derive(Clone, Debug, Default)]
pub struct FileSlot(Arc<OnceLock<pb::request::File>>);

impl FileSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, file: pb::request::File) {
        let _ = self.0.set(file);
    }

    pub fn get(&self) -> Option<pb::request::File> {
        self.0.get().cloned()
    }
}

/// Stdin of a task: bound at construction, or resolved from a slot at
/// dispatch time.
#[derive(Clone, Debug)]
pub enum StdinSource {
    File(pb::request::File),
    Slot(FileSlot),
}

/// A sandboxed command with limits, inputs, outputs and a callback.
///
/// Every task requests stdout and stderr: stdout is returned cached (as a
/// file id retained for reuse by later tasks), stderr inline, capped by
/// the stderr limit.
pub struct Task {
    pub id: Uuid,
    pub cmd: Vec<String>,
    /// Cpu time limit in nanoseconds. The wall clock limit is twice this.
    pub time_limit: u64,
    /// Memory limit in bytes.
    pub memory_limit: u64,
    pub stdout_limit: i64,
    pub stderr_limit: i64,
    pub env: Vec<String>,
    pub stdin: StdinSource,
    pub copy_in: HashMap<String, pb::request::File>,
    /// Copy-ins resolved from file-id cells at dispatch time. Unset cells
    /// are skipped. A path present here shadows the same path in
    /// `copy_in`.
    pub copy_in_cached: HashMap<String, FileIdCell>,
    /// Extra paths to return as cached files, in addition to stdout.
    pub copy_out: Vec<String>,
    pub callback: Callback,
}

impl Task {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            cmd: Vec::new(),
            time_limit: DEFAULT_TIME_LIMIT,
            memory_limit: DEFAULT_MEMORY_LIMIT,
            stdout_limit: DEFAULT_STDOUT_LIMIT,
            stderr_limit: DEFAULT_STDERR_LIMIT,
            env: default_env(),
            stdin: StdinSource::File(memory_file(Vec::new())),
            copy_in: HashMap::new(),
            copy_in_cached: HashMap::new(),
            copy_out: Vec::new(),
            callback: Box::new(|_| true),
        }
    }

    /// Appends arguments to the command line.
    pub fn with_cmd<I, S>(mut self, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd.extend(cmd.into_iter().map(Into::into));
        self
    }

    pub fn with_time_limit(mut self, time_limit: u64) -> Self {
        self.time_limit = time_limit;
        self
    }

    pub fn with_memory_limit(mut self, memory_limit: u64) -> Self {
        self.memory_limit = memory_limit;
        self
    }

    pub fn with_stderr_limit(mut self, stderr_limit: i64) -> Self {
        self.stderr_limit = stderr_limit;
        self
    }

    pub fn with_env<I, S>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env.extend(env.into_iter().map(Into::into));
        self
    }

    pub fn with_stdin(self, content: Vec<u8>) -> Self {
        self.with_stdin_file(memory_file(content))
    }

    #[allow(dead_code)]
    pub fn with_stdin_cached(self, file_id: impl Into<String>) -> Self {
        self.with_stdin_file(cached_file(file_id))
    }

    pub fn with_stdin_file(mut self, file: pb::request::File) -> Self {
        self.stdin = StdinSource::File(file);
        self
    }

    pub fn with_stdin_source(mut self, stdin: StdinSource) -> Self {
        self.stdin = stdin;
        self
    }

    pub fn with_copy_in(mut self, path: impl Into<String>, content: Vec<u8>) -> Self {
        self.copy_in.insert(path.into(), memory_file(content));
        self
    }

    pub fn with_copy_in_file(mut self, path: impl Into<String>, file: pb::request::File) -> Self {
        self.copy_in.insert(path.into(), file);
        self
    }

    pub fn with_copy_in_cached(mut self, path: impl Into<String>, cell: FileIdCell) -> Self {
        self.copy_in_cached.insert(path.into(), cell);
        self
    }

    pub fn with_copy_out<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.copy_out.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn with_callback(mut self, callback: Callback) -> Self {
        self.callback = callback;
        self
    }

    /// Serializes the task into its wire request, dereferencing cached
    /// file-id cells and the stdin slot at this point. This is what lets
    /// a run task be declared before the binary it depends on has been
    /// compiled.
    pub fn to_exec_request(&self) -> pb::Request {
        let mut copy_in = self.copy_in.clone();
        for (path, cell) in &self.copy_in_cached {
            if let Some(id) = cell.get() {
                copy_in.insert(path.clone(), cached_file(id));
            }
        }

        let stdin = match &self.stdin {
            StdinSource::File(file) => file.clone(),
            StdinSource::Slot(slot) => slot.get().unwrap_or_else(|| memory_file(Vec::new())),
        };

        let mut copy_out_cached = vec![pb::request::CmdCopyOutFile {
            name: "stdout".to_string(),
            optional: false,
        }];
        copy_out_cached.extend(self.copy_out.iter().map(|name| pb::request::CmdCopyOutFile {
            name: name.clone(),
            optional: false,
        }));

        pb::Request {
            cmd: vec![pb::request::CmdType {
                args: self.cmd.clone(),
                env: self.env.clone(),
                files: vec![
                    stdin,
                    pipe_collector("stdout", self.stdout_limit),
                    pipe_collector("stderr", self.stderr_limit),
                ],
                cpu_time_limit: self.time_limit,
                clock_time_limit: self.time_limit * 2,
                memory_limit: self.memory_limit,
                proc_limit: 0,
                copy_in,
                copy_out: vec![pb::request::CmdCopyOutFile {
                    name: "stderr".to_string(),
                    optional: false,
                }],
                copy_out_cached,
            }],
        }
    }
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd_of(request: &pb::Request) -> &pb::request::CmdType {
        &request.cmd[0]
    }

    #[test]
    fn test_default_wire_shape() {
        let task = Task::new().with_cmd(["/bin/true"]);
        let request = task.to_exec_request();
        let cmd = cmd_of(&request);

        assert_eq!(cmd.args, vec!["/bin/true"]);
        assert_eq!(cmd.cpu_time_limit, DEFAULT_TIME_LIMIT);
        assert_eq!(cmd.clock_time_limit, 2 * DEFAULT_TIME_LIMIT);
        assert_eq!(cmd.memory_limit, DEFAULT_MEMORY_LIMIT);
        // stdin + stdout pipe + stderr pipe, always.
        assert_eq!(cmd.files.len(), 3);
        let pb::request::file::File::Pipe(stdout) = cmd.files[1].file.as_ref().unwrap() else {
            panic!("stdout must be a pipe collector");
        };
        assert_eq!(stdout.name, "stdout");
        assert_eq!(stdout.max, DEFAULT_STDOUT_LIMIT);
        // stderr comes back inline, stdout cached.
        assert_eq!(cmd.copy_out.len(), 1);
        assert_eq!(cmd.copy_out[0].name, "stderr");
        assert_eq!(cmd.copy_out_cached[0].name, "stdout");
    }

    #[test]
    fn test_with_cmd_appends() {
        let task = Task::new()
            .with_cmd(["/usr/bin/g++", "-O2"])
            .with_cmd(["sol.cpp", "-o", "sol"]);
        assert_eq!(task.cmd, vec!["/usr/bin/g++", "-O2", "sol.cpp", "-o", "sol"]);
    }

    #[test]
    fn test_copy_out_requests_are_cached() {
        let task = Task::new().with_copy_out(["sol"]);
        let request = task.to_exec_request();
        let names: Vec<&str> = cmd_of(&request)
            .copy_out_cached
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["stdout", "sol"]);
    }

    #[test]
    fn test_cached_copy_in_binds_at_serialization() {
        let cell = FileIdCell::new();
        let task = Task::new().with_copy_in_cached("sol", cell.clone());

        // Unset cell: the copy-in is skipped entirely.
        let request = task.to_exec_request();
        assert!(cmd_of(&request).copy_in.is_empty());

        // The id written after task construction flows into the wire form.
        cell.set("bin-42".to_string());
        let request = task.to_exec_request();
        let file = &cmd_of(&request).copy_in["sol"];
        let pb::request::file::File::Cached(cached) = file.file.as_ref().unwrap() else {
            panic!("expected a cached file");
        };
        assert_eq!(cached.file_id, "bin-42");
    }

    #[test]
    fn test_file_id_cell_is_write_once() {
        let cell = FileIdCell::new();
        cell.set("first".to_string());
        cell.set("second".to_string());
        assert_eq!(cell.get().as_deref(), Some("first"));
    }

    #[test]
    fn test_stdin_slot_binds_at_serialization() {
        let slot = FileSlot::new();
        let task = Task::new().with_stdin_source(StdinSource::Slot(slot.clone()));

        // Unset slot falls back to an empty stdin.
        let request = task.to_exec_request();
        let pb::request::file::File::Memory(memory) =
            cmd_of(&request).files[0].file.as_ref().unwrap()
        else {
            panic!("expected memory stdin");
        };
        assert!(memory.content.is_empty());

        slot.set(cached_file("gen-stdout-7"));
        let request = task.to_exec_request();
        let pb::request::file::File::Cached(cached) =
            cmd_of(&request).files[0].file.as_ref().unwrap()
        else {
            panic!("expected cached stdin");
        };
        assert_eq!(cached.file_id, "gen-stdout-7");
    }

    #[test]
    fn test_cached_copy_in_shadows_plain_copy_in() {
        let cell = FileIdCell::new();
        cell.set("cached-1".to_string());
        let task = Task::new()
            .with_copy_in("data", b"inline".to_vec())
            .with_copy_in_cached("data", cell);
        let request = task.to_exec_request();
        let file = &cmd_of(&request).copy_in["data"];
        assert!(matches!(
            file.file.as_ref().unwrap(),
            pb::request::file::File::Cached(_)
        ));
    }
}
