//! Assistant-response post-processing
//!
//! Code-block extraction, generator/solution sanitation, and the statement
//! rendering shared by prompts and the `problem_statement.md` artifact.

use regex::Regex;
use std::sync::LazyLock;

use problemstore::ProblemData;

static FENCED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?si)```(?:python|py|cpp|c\+\+)?[ \t]*\n?(.*?)```").expect("static regex")
});
static ARCHIVE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"problem_[^_\s"']+_testcase\.zip"#).expect("static regex"));

/// The last fenced code block in the text, or the whole trimmed text when
/// no fences are present
pub fn extract_code_block(text: &str) -> Option<String> {
    let extracted = FENCED_RE
        .captures_iter(text)
        .last()
        .map(|caps| caps[1].trim().to_string())
        .unwrap_or_else(|| text.trim().to_string());
    (!extracted.is_empty()).then_some(extracted)
}

/// Clean an LLM-produced generator script and pin its archive name
pub fn sanitize_generator_code(text: &str, archive_name: &str) -> Option<String> {
    let mut code = extract_code_block(text)?;
    // The model sometimes invents its own archive name; pin ours
    code = ARCHIVE_NAME_RE.replace_all(&code, archive_name).to_string();
    if !code.ends_with('\n') {
        code.push('\n');
    }
    Some(code)
}

/// Clean an LLM-produced C++ solution
pub fn sanitize_solution_code(text: &str) -> Option<String> {
    let mut code = extract_code_block(text)?;
    // Drop prose lines the model sometimes leaves before the includes
    if let Some(start) = code.find("#include") {
        let prefix = &code[..start];
        if !prefix.contains(';') && !prefix.contains('{') {
            code = code[start..].to_string();
        }
    }
    if !code.ends_with('\n') {
        code.push('\n');
    }
    Some(code)
}

/// Shallow syntactic validity check for generator scripts
///
/// Not a real parser: catches the common truncation failures (unbalanced
/// brackets, dangling fences, empty bodies) before spending a subprocess.
pub fn check_generator_syntax(code: &str) -> Result<(), String> {
    if code.trim().len() < 100 {
        return Err(format!("generator too short ({} bytes)", code.trim().len()));
    }
    if code.contains("```") {
        return Err("markdown fence left in code".into());
    }
    for (open, close) in [('(', ')'), ('[', ']'), ('{', '}')] {
        let opens = code.chars().filter(|c| *c == open).count();
        let closes = code.chars().filter(|c| *c == close).count();
        if opens != closes {
            return Err(format!("unbalanced {open}{close}: {opens} vs {closes}"));
        }
    }
    Ok(())
}

/// Convert judge HTML fragments to plain markdown-ish text
pub fn html_to_text(raw: &str) -> String {
    if raw.contains('<') && raw.contains('>') {
        html2md::rewrite_html(raw, false)
    } else {
        raw.to_string()
    }
}

/// Render the canonical statement markdown used in prompts and saved as
/// `problem_statement.md`
pub fn statement_markdown(problem: &ProblemData) -> String {
    let mut parts = vec![format!("# {}\n", problem.title)];

    let description = html_to_text(&problem.description);
    if !description.trim().is_empty() {
        parts.push("## Statement".into());
        parts.push(description);
    }
    let input_format = html_to_text(&problem.input_format);
    if !input_format.trim().is_empty() {
        parts.push("\n## Input".into());
        parts.push(input_format);
    }
    let output_format = html_to_text(&problem.output_format);
    if !output_format.trim().is_empty() {
        parts.push("\n## Output".into());
        parts.push(output_format);
    }
    if !problem.samples.is_empty() {
        parts.push("\n## Samples".into());
        for (i, sample) in problem.samples.iter().enumerate() {
            parts.push(format!(
                "### Sample {n}\nInput:\n```\n{input}\n```\nOutput:\n```\n{output}\n```",
                n = i + 1,
                input = sample.input.trim_end(),
                output = sample.output.trim_end(),
            ));
        }
    }
    if let Some(hints) = &problem.hints
        && !hints.trim().is_empty()
    {
        parts.push("\n## Notes".into());
        parts.push(html_to_text(hints));
    }
    if let Some(time) = problem.time_limit_ms {
        let memory = problem
            .memory_limit_mb
            .map(|m| format!(", {m} MB"))
            .unwrap_or_default();
        parts.push(format!("\nLimits: {time} ms{memory}"));
    }

    parts.join("\n")
}
