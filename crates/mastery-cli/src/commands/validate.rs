//! The `mastery validate` command.

use std::path::PathBuf;

use anyhow::Result;

use mastery_core::parser;

pub fn execute(lesson_path: PathBuf) -> Result<()> {
    let lessons = if lesson_path.is_dir() {
        parser::load_lesson_directory(&lesson_path)?
    } else {
        let skipped = std::fs::read_to_string(&lesson_path)
            .ok()
            .and_then(|content| parser::inactive_outcomes(&content).ok())
            .unwrap_or_default();
        if !skipped.is_empty() {
            println!("Inactive outcomes skipped: {}", skipped.join(", "));
        }
        vec![parser::parse_lesson(&lesson_path)?]
    };

    let mut total_warnings = 0;

    for lesson in &lessons {
        println!(
            "Lesson: {} ({} outcomes)",
            lesson.title,
            lesson.outcomes.len()
        );

        let warnings = parser::validate_lesson(lesson);
        for w in &warnings {
            let prefix = w
                .outcome_id
                .as_ref()
                .map(|id| format!("  [{id}]"))
                .unwrap_or_else(|| "  ".to_string());
            println!("{prefix} WARNING: {}", w.message);
        }
        total_warnings += warnings.len();
    }

    if lessons.is_empty() {
        println!("No valid lessons found.");
    } else if total_warnings == 0 {
        println!("All lessons valid.");
    } else {
        println!("\n{total_warnings} warning(s) found.");
    }

    Ok(())
}
