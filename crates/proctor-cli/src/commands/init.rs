//! The `proctor init` command.

use std::path::Path;

use anyhow::Result;

pub fn execute() -> Result<()> {
    write_if_missing(Path::new("proctor.toml"), SAMPLE_CONFIG)?;

    std::fs::create_dir_all("exams")?;
    write_if_missing(Path::new("exams/example.toml"), EXAMPLE_EXAM)?;

    std::fs::create_dir_all("scripts")?;
    write_if_missing(Path::new("scripts/example.toml"), EXAMPLE_SCRIPT)?;

    println!("\nNext steps:");
    println!("  1. Edit proctor.toml to pick a security level and storage directory");
    println!("  2. Run: proctor validate --exam exams/example.toml");
    println!("  3. Run: proctor run --exam exams/example.toml --script scripts/example.toml");

    Ok(())
}

fn write_if_missing(path: &Path, contents: &str) -> Result<()> {
    if path.exists() {
        println!("{} already exists, skipping.", path.display());
    } else {
        std::fs::write(path, contents)?;
        println!("Created {}", path.display());
    }
    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# proctor configuration

# standard, high or maximum
security_level = "standard"

autosave_interval_secs = 30
snapshot_interval_secs = 60
escalation_grace_secs = 5
tab_switch_threshold = 3
devtools_threshold_px = 160
time_warnings_secs = [300, 60]
max_sessions_per_target = 5

storage = "file"
storage_dir = "./proctor-data"

webcam = true
screen_capture = false
"#;

const EXAMPLE_EXAM: &str = r#"[exam]
id = "example"
title = "Example Exam"
duration_secs = 600

[[questions]]
id = "q1"
type = "short_answer"
prompt = "What is 2 + 2?"

[[questions]]
id = "q2"
type = "multiple_choice"
prompt = "Which planet is closest to the sun?"
options = ["Mercury", "Venus", "Mars"]

[[questions]]
id = "q3"
type = "true_false"
prompt = "Water boils at 100 degrees Celsius at sea level."
"#;

const EXAMPLE_SCRIPT: &str = r#"[[steps]]
action = "answer"
question = "q1"
value = { type = "text", value = "4" }

[[steps]]
action = "navigate"
question = "q2"

[[steps]]
delay_ms = 500
action = "answer"
question = "q2"
value = { type = "text", value = "Mercury" }

[[steps]]
action = "signal"
signal = { signal = "visibility_hidden" }

[[steps]]
delay_ms = 200
action = "signal"
signal = { signal = "visibility_visible" }

[[steps]]
action = "navigate"
question = "q3"

[[steps]]
action = "answer"
question = "q3"
value = { type = "boolean", value = true }
"#;
