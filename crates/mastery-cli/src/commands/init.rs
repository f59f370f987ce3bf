//! The `mastery init` command.

use anyhow::Result;

pub fn execute() -> Result<()> {
    if std::path::Path::new("mastery.toml").exists() {
        println!("mastery.toml already exists, skipping.");
    } else {
        std::fs::write("mastery.toml", SAMPLE_CONFIG)?;
        println!("Created mastery.toml");
    }

    std::fs::create_dir_all("lessons")?;
    let example_path = std::path::Path::new("lessons/example.toml");
    if example_path.exists() {
        println!("lessons/example.toml already exists, skipping.");
    } else {
        std::fs::write(example_path, EXAMPLE_LESSON)?;
        println!("Created lessons/example.toml");
    }

    println!("\nNext steps:");
    println!("  1. Edit mastery.toml with your API keys");
    println!("  2. Run: mastery validate --lesson lessons/example.toml");
    println!("  3. Run: mastery tutor --lesson lessons/example.toml");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# mastery configuration

default_provider = "anthropic"
default_model = "claude-sonnet-4-20250514"
temperature = 0.7
max_retries = 2
retry_delay_ms = 500
call_timeout_secs = 60
sessions_dir = "./mastery-sessions"

[providers.anthropic]
type = "anthropic"
api_key = "${ANTHROPIC_API_KEY}"

[providers.openai]
type = "openai"
api_key = "${OPENAI_API_KEY}"

[providers.ollama]
type = "ollama"
base_url = "http://localhost:11434"

# Offline tutor that grades answers by keyword overlap
[providers.offline]
type = "mock"

# Fallback thresholds for lessons that set none
[mastery]
mastery_threshold = 0.8
rephrase_floor = 0.2
max_attempts = 2
"#;

const EXAMPLE_LESSON: &str = r#"[lesson]
id = "python-oop"
title = "Python Object-Oriented Programming"
topic = "Python OOP"
description = "Classes, objects, methods and inheritance in Python"

[[outcomes]]
id = "class_definition"
description = "Define and structure classes in Python"
key_concepts = ["class keyword", "__init__", "attributes"]
order = 1

[[outcomes]]
id = "methods"
description = "Write instance methods that use self"
key_concepts = ["self", "instance method", "method call"]
order = 2

[[outcomes]]
id = "inheritance"
description = "Use inheritance to share and extend behaviour"
key_concepts = ["base class", "super()", "method overriding"]
order = 3
mastery_threshold = 0.85
"#;
