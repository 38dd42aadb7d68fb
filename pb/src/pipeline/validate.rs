//! Local validation: compile the solution, run it over the generated
//! tests, diff against the expected outputs
//!
//! The comparison normalizes whitespace the same way the generated files
//! were normalized, so a validation pass is consistent with what the judge
//! will later see.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use problemstore::Workspace;
use problemstore::artifact::TEST_PAIR_COUNT;

use super::types::PipelineError;
use crate::config::ValidationConfig;

/// Compilation gets a fixed generous budget; per-case runs use the
/// configured timeout
const COMPILE_TIMEOUT: Duration = Duration::from_secs(120);

const BINARY_NAME: &str = "solution_bin";

/// Result of one validation pass
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub passed: bool,
    pub total_cases: u32,
    pub passed_cases: u32,
    /// `"<case>: <reason>"` for each failing case
    pub failures: Vec<String>,
}

fn substitute(template: &[String], source: &Path, binary: &Path) -> Vec<String> {
    template
        .iter()
        .map(|part| {
            part.replace("{source}", &source.to_string_lossy())
                .replace("{binary}", &binary.to_string_lossy())
        })
        .collect()
}

/// Trailing whitespace per line and trailing blank lines are not
/// significant
fn normalize_output(text: &str) -> String {
    let mut lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

/// Compile `solution.cpp` and check it against every generated test pair
///
/// The caller holds the compile slot; this function only does the work.
pub async fn validate_solution(
    workspace: &Workspace,
    config: &ValidationConfig,
) -> Result<ValidationOutcome, PipelineError> {
    let source = workspace.solution_path();
    let binary = workspace.dir().join(BINARY_NAME);
    let tests = workspace.tests_dir();

    // Compile
    let argv = substitute(&config.compile_command, &source, &binary);
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| PipelineError::CompileError("empty compile command".into()))?;
    debug!(?argv, "compiling solution");

    let compile = tokio::time::timeout(
        COMPILE_TIMEOUT,
        Command::new(program)
            .args(args)
            .current_dir(workspace.dir())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output(),
    )
    .await
    .map_err(|_| PipelineError::CompileError("compile timed out".into()))?
    .map_err(|e| PipelineError::CompileError(format!("cannot run compiler: {e}")))?;

    if !compile.status.success() {
        let stderr = String::from_utf8_lossy(&compile.stderr);
        let summary: String = stderr.chars().take(500).collect();
        return Err(PipelineError::CompileError(summary));
    }

    // Run every case
    let mut outcome = ValidationOutcome {
        passed: false,
        total_cases: TEST_PAIR_COUNT as u32,
        passed_cases: 0,
        failures: Vec::new(),
    };

    for i in 0..TEST_PAIR_COUNT {
        let case = format!("{i}.in");
        let input = tokio::fs::read(tests.join(&case))
            .await
            .map_err(|e| PipelineError::ValidationFailed(format!("cannot read {case}: {e}")))?;
        let expected = tokio::fs::read_to_string(tests.join(format!("{i}.out")))
            .await
            .map_err(|e| PipelineError::ValidationFailed(format!("cannot read {i}.out: {e}")))?;

        match run_case(config, &source, &binary, workspace.dir(), &input).await {
            Ok(stdout) => {
                if normalize_output(&stdout) == normalize_output(&expected) {
                    outcome.passed_cases += 1;
                } else {
                    outcome.failures.push(format!("{case}: wrong answer"));
                }
            }
            Err(reason) => outcome.failures.push(format!("{case}: {reason}")),
        }
    }

    outcome.passed = outcome.passed_cases == outcome.total_cases;
    debug!(
        passed = outcome.passed,
        passed_cases = outcome.passed_cases,
        "validation finished"
    );
    Ok(outcome)
}

async fn run_case(
    config: &ValidationConfig,
    source: &Path,
    binary: &Path,
    workdir: &Path,
    input: &[u8],
) -> Result<String, String> {
    let argv = substitute(&config.run_command, source, binary);
    let (program, args) = argv.split_first().ok_or("empty run command")?;

    let mut child = Command::new(program)
        .args(args)
        .current_dir(workdir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| format!("spawn failed: {e}"))?;

    if let Some(mut stdin) = child.stdin.take() {
        let input = input.to_vec();
        tokio::spawn(async move {
            let _ = stdin.write_all(&input).await;
        });
    }

    let output = tokio::time::timeout(Duration::from_secs(config.case_timeout_secs), child.wait_with_output())
        .await
        .map_err(|_| "time limit exceeded".to_string())?
        .map_err(|e| format!("wait failed: {e}"))?;

    if !output.status.success() {
        return Err(format!("runtime error (exit {:?})", output.status.code()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn echo_config() -> ValidationConfig {
        // `true` always compiles, `cat` echoes the input back
        ValidationConfig {
            compile_command: vec!["true".into()],
            run_command: vec!["cat".into()],
            case_timeout_secs: 5,
        }
    }

    fn workspace_with_tests(pairs: &[(&str, &str)]) -> (TempDir, Workspace) {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::at(tmp.path().join("problem_x"));
        ws.ensure_exists().unwrap();
        std::fs::create_dir_all(ws.tests_dir()).unwrap();
        for (i, (input, output)) in pairs.iter().enumerate() {
            std::fs::write(ws.tests_dir().join(format!("{i}.in")), input).unwrap();
            std::fs::write(ws.tests_dir().join(format!("{i}.out")), output).unwrap();
        }
        std::fs::write(ws.solution_path(), "int main() { return 0; }\n").unwrap();
        (tmp, ws)
    }

    #[test]
    fn test_normalize_output() {
        assert_eq!(normalize_output("1 2  \n3\n\n\n"), "1 2\n3");
        assert_eq!(normalize_output(""), "");
        assert_eq!(normalize_output("a\nb"), normalize_output("a\nb\n"));
    }

    #[tokio::test]
    async fn test_validation_passes_when_outputs_match() {
        let pairs: Vec<(&str, &str)> = (0..10).map(|_| ("1\n", "1\n")).collect();
        let (_tmp, ws) = workspace_with_tests(&pairs);

        let outcome = validate_solution(&ws, &echo_config()).await.unwrap();
        assert!(outcome.passed);
        assert_eq!(outcome.passed_cases, 10);
        assert!(outcome.failures.is_empty());
    }

    #[tokio::test]
    async fn test_validation_reports_mismatches() {
        let mut pairs: Vec<(&str, &str)> = (0..10).map(|_| ("1\n", "1\n")).collect();
        // cat echoes the input, so a differing .out fails
        pairs[3] = ("1\n", "2\n");
        let (_tmp, ws) = workspace_with_tests(&pairs);

        let outcome = validate_solution(&ws, &echo_config()).await.unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.passed_cases, 9);
        assert_eq!(outcome.failures, vec!["3.in: wrong answer".to_string()]);
    }

    #[tokio::test]
    async fn test_whitespace_only_difference_passes() {
        let pairs: Vec<(&str, &str)> = (0..10).map(|_| ("a b\n", "a b  \n\n")).collect();
        let (_tmp, ws) = workspace_with_tests(&pairs);

        let outcome = validate_solution(&ws, &echo_config()).await.unwrap();
        assert!(outcome.passed);
    }

    #[tokio::test]
    async fn test_compile_failure_is_compile_error() {
        let pairs: Vec<(&str, &str)> = (0..10).map(|_| ("1\n", "1\n")).collect();
        let (_tmp, ws) = workspace_with_tests(&pairs);

        let config = ValidationConfig {
            compile_command: vec!["false".into()],
            run_command: vec!["cat".into()],
            case_timeout_secs: 5,
        };
        let err = validate_solution(&ws, &config).await.unwrap_err();
        assert!(err.is_compile_error());
    }
}
