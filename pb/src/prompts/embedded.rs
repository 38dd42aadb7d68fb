//! Embedded prompt templates
//!
//! Compiled into the binary from .pmt files; an on-disk override directory
//! can shadow any of them at runtime.

/// System prompt for test-data generation
pub const GEN_SYSTEM: &str = include_str!("../../prompts/gen_system.pmt");

/// Task instructions appended to the statement for generation
pub const GEN_TASK: &str = include_str!("../../prompts/gen_task.pmt");

/// System prompt for solution writing
pub const SOLUTION_SYSTEM: &str = include_str!("../../prompts/solution_system.pmt");

/// Task requirements appended to the statement for solving
pub const SOLUTION_TASK: &str = include_str!("../../prompts/solution_task.pmt");

/// Get an embedded template by name
pub fn get_embedded(name: &str) -> Option<&'static str> {
    match name {
        "gen_system" => Some(GEN_SYSTEM),
        "gen_task" => Some(GEN_TASK),
        "solution_system" => Some(SOLUTION_SYSTEM),
        "solution_task" => Some(SOLUTION_TASK),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_templates_present() {
        for name in ["gen_system", "gen_task", "solution_system", "solution_task"] {
            assert!(get_embedded(name).is_some(), "{name} missing");
        }
        assert!(get_embedded("nope").is_none());
    }

    #[test]
    fn test_gen_task_mentions_test_layout() {
        let task = get_embedded("gen_task").unwrap();
        assert!(task.contains("tests/0.in"));
        assert!(task.contains("{{problem_id}}"));
    }
}
