//! Per-(user, problem) artifact workspaces
//!
//! Every problem a user processes owns one directory under the workspace
//! base, holding the statement, generated tests, the packaged archive,
//! generated code, logs, and `processing_status.json`. All JSON writes go
//! through a temp-file + rename so concurrent readers never observe a
//! half-written file.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::StoreError;
use crate::models::{ProblemData, ProcessingStatus, ValidationSummary};

pub const PROBLEM_DATA_FILE: &str = "problem_data.json";
pub const PROCESSING_STATUS_FILE: &str = "processing_status.json";
pub const SOLUTION_FILE: &str = "solution.cpp";
pub const GENERATOR_FILE: &str = "gen.py";
pub const PIPELINE_LOG_FILE: &str = "pipeline.log";
pub const TESTS_DIR: &str = "tests";

/// Number of test pairs a complete set carries (`0..9.in/out`)
pub const TEST_PAIR_COUNT: usize = 10;

/// Resolve the workspace base directory: env var, container default, then
/// a directory next to the process
pub fn workspace_base() -> PathBuf {
    if let Ok(base) = std::env::var("OJO_WORKSPACE")
        && !base.trim().is_empty()
    {
        return PathBuf::from(base);
    }
    let docker = PathBuf::from("/app/workspace");
    if docker.exists() {
        return docker;
    }
    PathBuf::from("workspace")
}

/// Replace filesystem-illegal characters with `_`
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | ' ' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Handle on one problem's artifact directory
#[derive(Debug, Clone)]
pub struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    /// `<base>/user_<user_id>/problem_<sanitized_canonical_id>/`
    pub fn for_problem(base: &Path, user_id: i64, canonical_id: &str) -> Self {
        let dir = base
            .join(format!("user_{user_id}"))
            .join(format!("problem_{}", sanitize_filename(canonical_id)));
        Workspace { dir }
    }

    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Workspace { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_exists(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))
    }

    pub fn tests_dir(&self) -> PathBuf {
        self.dir.join(TESTS_DIR)
    }

    pub fn solution_path(&self) -> PathBuf {
        self.dir.join(SOLUTION_FILE)
    }

    pub fn generator_path(&self) -> PathBuf {
        self.dir.join(GENERATOR_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(PIPELINE_LOG_FILE)
    }

    /// `problem_<safe_name>_testcase.zip` inside the workspace
    pub fn archive_path(&self, original_id: &str) -> PathBuf {
        self.dir
            .join(format!("problem_{}_testcase.zip", sanitize_filename(original_id)))
    }

    // === problem_data.json ===

    pub fn load_problem(&self) -> Option<ProblemData> {
        let text = fs::read_to_string(self.dir.join(PROBLEM_DATA_FILE)).ok()?;
        serde_json::from_str(&text).ok()
    }

    pub fn save_problem(&self, data: &ProblemData) -> Result<(), StoreError> {
        self.ensure_exists()?;
        let json = serde_json::to_string_pretty(data)?;
        atomic_write(&self.dir.join(PROBLEM_DATA_FILE), json.as_bytes())
    }

    // === processing_status.json ===

    pub fn status(&self) -> ProcessingStatus {
        fs::read_to_string(self.dir.join(PROCESSING_STATUS_FILE))
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }

    /// AC-confirmed workspaces are reusable and survive task deletion
    pub fn is_completed(&self) -> bool {
        self.status().is_completed()
    }

    /// Merge the set fields of `patch` into the persisted status
    ///
    /// Top-level fields are replaced; `upload_real_ids` is merged key-wise so
    /// ids recorded for other adapters survive.
    pub fn merge_status(&self, patch: &ProcessingStatus) -> Result<(), StoreError> {
        self.ensure_exists()?;
        let mut base: serde_json::Value = fs::read_to_string(self.dir.join(PROCESSING_STATUS_FILE))
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or(serde_json::json!({}));

        let patch_value = serde_json::to_value(patch)?;
        merge_objects(&mut base, patch_value);

        let json = serde_json::to_string_pretty(&base)?;
        atomic_write(&self.dir.join(PROCESSING_STATUS_FILE), json.as_bytes())
    }

    pub fn set_upload_real_id(&self, adapter: &str, real_id: &str) -> Result<(), StoreError> {
        let mut patch = ProcessingStatus::default();
        patch.upload_real_ids.insert(adapter.to_string(), real_id.to_string());
        self.merge_status(&patch)
    }

    pub fn upload_real_id(&self, adapter: &str) -> Option<String> {
        self.status().upload_real_ids.get(adapter).cloned()
    }

    pub fn set_validation(&self, summary: &ValidationSummary) -> Result<(), StoreError> {
        self.merge_status(&ProcessingStatus {
            validation: Some(summary.clone()),
            ..Default::default()
        })
    }

    // === Generated test data ===

    /// Remove the generated tests and archive before a gen re-run, so a
    /// retry never mixes files from two generations
    pub fn clear_generated(&self, original_id: &str) -> Result<(), StoreError> {
        let tests = self.tests_dir();
        if tests.exists() {
            debug!(dir = %tests.display(), "clearing stale test directory");
            fs::remove_dir_all(&tests).map_err(|e| StoreError::io(&tests, e))?;
        }
        let archive = self.archive_path(original_id);
        if archive.exists() {
            fs::remove_file(&archive).map_err(|e| StoreError::io(&archive, e))?;
        }
        Ok(())
    }

    /// Trim leading/trailing blank lines of every test file, force a single
    /// trailing newline, and rewrite 0-byte `.in` files to one newline so
    /// downstream parsers never see an empty input
    pub fn normalize_tests(&self) -> Result<usize, StoreError> {
        let tests = self.tests_dir();
        if !tests.exists() {
            return Ok(0);
        }

        let mut rewritten = 0;
        let entries = fs::read_dir(&tests).map_err(|e| StoreError::io(&tests, e))?;
        for entry in entries {
            let path = entry.map_err(|e| StoreError::io(&tests, e))?.path();
            let ext = path.extension().and_then(|e| e.to_str());
            if !matches!(ext, Some("in") | Some("out")) {
                continue;
            }

            let content = fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;
            let mut lines: Vec<&str> = content.lines().collect();
            while lines.first().is_some_and(|l| l.trim().is_empty()) {
                lines.remove(0);
            }
            while lines.last().is_some_and(|l| l.trim().is_empty()) {
                lines.pop();
            }
            let mut trimmed = lines.join("\n");
            if !trimmed.is_empty() {
                trimmed.push('\n');
            }
            // Empty inputs survive as a single newline
            if trimmed.is_empty() && ext == Some("in") {
                trimmed.push('\n');
            }
            if trimmed != content {
                fs::write(&path, &trimmed).map_err(|e| StoreError::io(&path, e))?;
                rewritten += 1;
            }
        }
        Ok(rewritten)
    }

    /// Require exactly the set `{0..9}.in` / `{0..9}.out`
    pub fn verify_tests_complete(&self) -> Result<(), StoreError> {
        let tests = self.tests_dir();
        let mut missing = Vec::new();
        for i in 0..TEST_PAIR_COUNT {
            for ext in ["in", "out"] {
                let name = format!("{i}.{ext}");
                if !tests.join(&name).exists() {
                    missing.push(name);
                }
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(StoreError::IncompleteTests(missing))
        }
    }

    /// Package the 20 test files into the testcase archive
    ///
    /// Files are written in numeric order with fixed metadata, so two runs
    /// over byte-identical tests produce byte-identical archives.
    pub fn archive_tests(&self, original_id: &str) -> Result<PathBuf, StoreError> {
        self.verify_tests_complete()?;
        let archive = self.archive_path(original_id);
        let tests = self.tests_dir();

        let file = File::create(&archive).map_err(|e| StoreError::io(&archive, e))?;
        let mut zip = ZipWriter::new(file);
        let opts = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(zip::DateTime::default());

        for i in 0..TEST_PAIR_COUNT {
            for ext in ["in", "out"] {
                let name = format!("{i}.{ext}");
                let path = tests.join(&name);
                let bytes = fs::read(&path).map_err(|e| StoreError::io(&path, e))?;
                zip.start_file(name, opts)?;
                zip.write_all(&bytes).map_err(|e| StoreError::io(&archive, e))?;
            }
        }
        zip.finish()?;
        info!(archive = %archive.display(), "testcase archive written");
        Ok(archive)
    }

    /// Bundle the workspace for download: statement JSON, rendered
    /// markdown, the test set, and the solution when present
    pub fn download_bundle(&self, out: &Path) -> Result<(), StoreError> {
        let file = File::create(out).map_err(|e| StoreError::io(out, e))?;
        let mut zip = ZipWriter::new(file);
        let opts = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        let mut add_file = |zip: &mut ZipWriter<File>, path: PathBuf, arcname: String| -> Result<(), StoreError> {
            if !path.exists() {
                return Ok(());
            }
            let bytes = fs::read(&path).map_err(|e| StoreError::io(&path, e))?;
            zip.start_file(arcname, opts)?;
            zip.write_all(&bytes).map_err(|e| StoreError::io(out, e))?;
            Ok(())
        };

        add_file(&mut zip, self.dir.join(PROBLEM_DATA_FILE), PROBLEM_DATA_FILE.into())?;
        add_file(&mut zip, self.dir.join("problem_statement.md"), "problem_statement.md".into())?;
        add_file(&mut zip, self.solution_path(), SOLUTION_FILE.into())?;
        for i in 0..TEST_PAIR_COUNT {
            for ext in ["in", "out"] {
                let name = format!("{i}.{ext}");
                add_file(&mut zip, self.tests_dir().join(&name), format!("{TESTS_DIR}/{name}"))?;
            }
        }
        zip.finish()?;
        Ok(())
    }

    /// Background cleanup on task deletion: AC-confirmed workspaces are kept
    pub fn delete_unless_completed(&self) -> Result<bool, StoreError> {
        if !self.dir.exists() {
            return Ok(false);
        }
        if self.is_completed() {
            info!(dir = %self.dir.display(), "workspace is AC-confirmed, keeping");
            return Ok(false);
        }
        fs::remove_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        info!(dir = %self.dir.display(), "workspace deleted");
        Ok(true)
    }
}

/// Write to a sibling temp path, then rename into place
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => path.with_file_name(format!("{name}.tmp")),
        None => path.with_extension("tmp"),
    };
    {
        let mut file = File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
        file.write_all(bytes).map_err(|e| StoreError::io(&tmp, e))?;
        file.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
}

fn merge_objects(base: &mut serde_json::Value, patch: serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match base_map.get_mut(&key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_objects(existing, value);
                    }
                    _ => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, patch) => *base_slot = patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sample;
    use std::io::Read;
    use tempfile::TempDir;

    fn workspace() -> (TempDir, Workspace) {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::for_problem(tmp.path(), 1, "codeforces_1234A");
        ws.ensure_exists().unwrap();
        (tmp, ws)
    }

    fn write_full_test_set(ws: &Workspace) {
        fs::create_dir_all(ws.tests_dir()).unwrap();
        for i in 0..TEST_PAIR_COUNT {
            fs::write(ws.tests_dir().join(format!("{i}.in")), "1\n").unwrap();
            fs::write(ws.tests_dir().join(format!("{i}.out")), "1\n").unwrap();
        }
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("https://judge/p?id=1"), "https___judge_p_id=1");
        assert_eq!(sanitize_filename("codeforces_1234A"), "codeforces_1234A");
    }

    #[test]
    fn test_workspace_path_shape() {
        let ws = Workspace::for_problem(Path::new("/data"), 7, "luogu_P1000");
        assert_eq!(ws.dir(), Path::new("/data/user_7/problem_luogu_P1000"));
    }

    #[test]
    fn test_problem_data_round_trip() {
        let (_tmp, ws) = workspace();
        assert!(ws.load_problem().is_none());

        let data = ProblemData {
            id: "codeforces_1234A".into(),
            source: "codeforces".into(),
            title: "Game".into(),
            description: "desc".into(),
            samples: vec![Sample {
                input: "1\n".into(),
                output: "1\n".into(),
            }],
            ..Default::default()
        };
        ws.save_problem(&data).unwrap();
        let loaded = ws.load_problem().unwrap();
        assert_eq!(loaded.title, "Game");
        assert_eq!(loaded.samples.len(), 1);
    }

    #[test]
    fn test_status_merge_preserves_other_fields() {
        let (_tmp, ws) = workspace();

        ws.merge_status(&ProcessingStatus {
            stage: Some("gen".into()),
            ok_gen: Some(true),
            ..Default::default()
        })
        .unwrap();
        ws.merge_status(&ProcessingStatus {
            stage: Some("upload".into()),
            ok_upload: Some(true),
            ..Default::default()
        })
        .unwrap();

        let status = ws.status();
        assert_eq!(status.stage.as_deref(), Some("upload"));
        assert_eq!(status.ok_gen, Some(true));
        assert_eq!(status.ok_upload, Some(true));
        assert_eq!(status.ok_solve, None);
    }

    #[test]
    fn test_real_id_map_merges_per_adapter() {
        let (_tmp, ws) = workspace();
        ws.set_upload_real_id("hydro", "P42").unwrap();
        ws.set_upload_real_id("other", "X1").unwrap();
        assert_eq!(ws.upload_real_id("hydro").as_deref(), Some("P42"));
        assert_eq!(ws.upload_real_id("other").as_deref(), Some("X1"));
        assert_eq!(ws.upload_real_id("missing"), None);
    }

    #[test]
    fn test_is_completed_requires_ok_solve() {
        let (_tmp, ws) = workspace();
        assert!(!ws.is_completed());
        ws.merge_status(&ProcessingStatus {
            ok_gen: Some(true),
            ok_upload: Some(true),
            ..Default::default()
        })
        .unwrap();
        assert!(!ws.is_completed());
        ws.merge_status(&ProcessingStatus {
            ok_solve: Some(true),
            ..Default::default()
        })
        .unwrap();
        assert!(ws.is_completed());
    }

    #[test]
    fn test_normalize_tests() {
        let (_tmp, ws) = workspace();
        fs::create_dir_all(ws.tests_dir()).unwrap();
        fs::write(ws.tests_dir().join("0.in"), "\n\n  1 2\n3\n\n\n").unwrap();
        fs::write(ws.tests_dir().join("0.out"), "ok").unwrap();
        fs::write(ws.tests_dir().join("1.in"), "").unwrap();

        ws.normalize_tests().unwrap();

        // Interior leading spaces survive, outer blank lines do not
        assert_eq!(fs::read_to_string(ws.tests_dir().join("0.in")).unwrap(), "  1 2\n3\n");
        assert_eq!(fs::read_to_string(ws.tests_dir().join("0.out")).unwrap(), "ok\n");
        // Empty input becomes a single newline
        assert_eq!(fs::read_to_string(ws.tests_dir().join("1.in")).unwrap(), "\n");
    }

    #[test]
    fn test_verify_tests_reports_missing() {
        let (_tmp, ws) = workspace();
        write_full_test_set(&ws);
        fs::remove_file(ws.tests_dir().join("7.out")).unwrap();

        match ws.verify_tests_complete() {
            Err(StoreError::IncompleteTests(missing)) => assert_eq!(missing, vec!["7.out".to_string()]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_archive_contains_all_pairs() {
        let (_tmp, ws) = workspace();
        write_full_test_set(&ws);

        let archive = ws.archive_tests("codeforces_1234A").unwrap();
        let mut zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        assert_eq!(zip.len(), TEST_PAIR_COUNT * 2);
        let mut content = String::new();
        zip.by_name("9.out").unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "1\n");
    }

    #[test]
    fn test_archive_deterministic() {
        let (_tmp, ws) = workspace();
        write_full_test_set(&ws);

        let archive = ws.archive_tests("p").unwrap();
        let first = fs::read(&archive).unwrap();
        let archive = ws.archive_tests("p").unwrap();
        let second = fs::read(&archive).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_clear_generated() {
        let (_tmp, ws) = workspace();
        write_full_test_set(&ws);
        let archive = ws.archive_tests("p").unwrap();
        assert!(archive.exists());

        ws.clear_generated("p").unwrap();
        assert!(!ws.tests_dir().exists());
        assert!(!archive.exists());
    }

    #[test]
    fn test_delete_unless_completed() {
        let (_tmp, ws) = workspace();
        ws.merge_status(&ProcessingStatus {
            ok_solve: Some(true),
            ..Default::default()
        })
        .unwrap();
        // AC-confirmed: kept
        assert!(!ws.delete_unless_completed().unwrap());
        assert!(ws.dir().exists());

        ws.merge_status(&ProcessingStatus {
            ok_solve: Some(false),
            ..Default::default()
        })
        .unwrap();
        assert!(ws.delete_unless_completed().unwrap());
        assert!(!ws.dir().exists());
    }

    #[test]
    fn test_download_bundle() {
        let (tmp, ws) = workspace();
        write_full_test_set(&ws);
        ws.save_problem(&ProblemData {
            id: "p".into(),
            title: "T".into(),
            ..Default::default()
        })
        .unwrap();
        fs::write(ws.solution_path(), "int main(){}\n").unwrap();

        let out = tmp.path().join("bundle.zip");
        ws.download_bundle(&out).unwrap();

        let mut zip = zip::ZipArchive::new(File::open(&out).unwrap()).unwrap();
        assert!(zip.by_name(PROBLEM_DATA_FILE).is_ok());
        assert!(zip.by_name(SOLUTION_FILE).is_ok());
        assert!(zip.by_name("tests/0.in").is_ok());
        // No statement markdown was written, so it is absent
        assert!(zip.by_name("problem_statement.md").is_err());
    }
}
