//! Per-iteration artifacts under `<log dir>/<run_id>/<iteration>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::status::StatusCode;

#[derive(Debug, Clone, Serialize)]
pub struct IterationMeta {
    pub run_id: String,
    pub iteration: u32,
    /// Status carried into this iteration's Worker instruction.
    pub feedback: StatusCode,
    /// Classified verdict for this iteration's output.
    pub status: StatusCode,
    pub worker_output_bytes: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct IterationPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub instruction_path: PathBuf,
    pub worker_output_path: PathBuf,
    pub review_instruction_path: PathBuf,
    pub verdict_path: PathBuf,
}

impl IterationPaths {
    pub fn new(root: &Path, run_id: &str, iteration: u32) -> Self {
        let dir = root.join(run_id).join(iteration.to_string());
        Self {
            meta_path: dir.join("meta.json"),
            instruction_path: dir.join("instruction.md"),
            worker_output_path: dir.join("worker_output.txt"),
            review_instruction_path: dir.join("review_instruction.md"),
            verdict_path: dir.join("verdict.txt"),
            dir,
        }
    }
}

pub struct IterationWriteRequest<'a> {
    pub root: &'a Path,
    pub meta: &'a IterationMeta,
    pub instruction: &'a str,
    pub worker_output: &'a str,
    pub review_instruction: &'a str,
    /// Raw Manager text before classification.
    pub verdict: &'a str,
}

pub fn write_iteration(request: &IterationWriteRequest<'_>) -> Result<IterationPaths> {
    let meta = request.meta;
    let paths = IterationPaths::new(request.root, &meta.run_id, meta.iteration);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create iteration dir {}", paths.dir.display()))?;

    write_json(&paths.meta_path, meta)?;
    write_text(&paths.instruction_path, request.instruction)?;
    write_text(&paths.worker_output_path, request.worker_output)?;
    write_text(&paths.review_instruction_path, request.review_instruction)?;
    write_text(&paths.verdict_path, request.verdict)?;

    Ok(paths)
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_paths_are_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = IterationPaths::new(temp.path(), "run-1", 3);

        assert!(paths.dir.ends_with(Path::new("run-1/3")));
        assert!(paths.meta_path.ends_with("meta.json"));
        assert!(paths.instruction_path.ends_with("instruction.md"));
        assert!(paths.worker_output_path.ends_with("worker_output.txt"));
        assert!(paths.review_instruction_path.ends_with("review_instruction.md"));
        assert!(paths.verdict_path.ends_with("verdict.txt"));
    }

    #[test]
    fn writes_all_artifacts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let meta = IterationMeta {
            run_id: "run-9".to_string(),
            iteration: 1,
            feedback: StatusCode::IncompleteTask,
            status: StatusCode::Completed,
            worker_output_bytes: 6,
            duration_ms: 42,
        };

        let paths = write_iteration(&IterationWriteRequest {
            root: temp.path(),
            meta: &meta,
            instruction: "do it",
            worker_output: "done\n\n",
            review_instruction: "review it",
            verdict: " completed\n",
        })
        .expect("write logs");

        assert_eq!(fs::read_to_string(&paths.worker_output_path).expect("read"), "done\n\n");
        assert_eq!(fs::read_to_string(&paths.verdict_path).expect("read"), " completed\n");
        assert!(paths.instruction_path.is_file());
        assert!(paths.review_instruction_path.is_file());

        let raw = fs::read_to_string(&paths.meta_path).expect("read meta");
        let json: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(json["run_id"], "run-9");
        assert_eq!(json["feedback"], "INCOMPLETE_TASK");
        assert_eq!(json["status"], "COMPLETED");
        assert_eq!(json["duration_ms"], 42);
    }
}
