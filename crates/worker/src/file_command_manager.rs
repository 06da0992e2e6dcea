// Build variables published through a file.
// A step gets the path of an empty file in `BUILD_VARIABLES_FILE`; whatever
// it appends there is added to the build-variable table once it finishes.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use worker_sdk::TraceWriter;

use crate::sandbox::directory_token;
use crate::variables::BuildVariables;

pub struct FileCommandManager;

impl FileCommandManager {
    /// Create an empty variables file in `temp_dir` and return its path.
    pub fn initialize(temp_dir: &Path) -> Result<PathBuf> {
        let file = temp_dir.join(format!("build_variables_{}.txt", directory_token()));
        std::fs::write(&file, "")
            .with_context(|| format!("Failed to create build variables file {}", file.display()))?;
        Ok(file)
    }

    /// Publish the content of `file` and delete it. Returns how many
    /// variables were published.
    ///
    /// Format is either:
    /// - `NAME=VALUE` (single line)
    /// - Multi-line heredoc: `NAME<<DELIMITER\nVALUE\nDELIMITER`
    pub fn process(file: &Path, variables: &BuildVariables, trace: &dyn TraceWriter) -> usize {
        let content = match std::fs::read_to_string(file) {
            Ok(c) => c,
            Err(e) => {
                trace.verbose(&format!("Failed to read build variables file: {e}"));
                return 0;
            }
        };
        let _ = std::fs::remove_file(file);

        let parsed = parse(&content);
        for warning in &parsed.warnings {
            trace.warning(warning);
        }
        for (name, value) in &parsed.entries {
            trace.verbose(&format!("Publishing build variable {name}"));
            variables.publish(name, value);
        }
        parsed.entries.len()
    }
}

#[derive(Debug, Default, PartialEq)]
struct Parsed {
    entries: Vec<(String, String)>,
    warnings: Vec<String>,
}

fn parse(content: &str) -> Parsed {
    let mut parsed = Parsed::default();
    let mut lines = content.lines();

    while let Some(line) = lines.next() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(heredoc_pos) = line.find("<<") {
            let name = line[..heredoc_pos].trim();
            let delimiter = line[heredoc_pos + 2..].trim();
            if name.is_empty() || delimiter.is_empty() {
                parsed
                    .warnings
                    .push(format!("Invalid heredoc in build variables file: {line}"));
                continue;
            }

            let mut value_lines = Vec::new();
            let mut terminated = false;
            for value_line in lines.by_ref() {
                if value_line.trim() == delimiter {
                    terminated = true;
                    break;
                }
                value_lines.push(value_line);
            }
            if !terminated {
                parsed
                    .warnings
                    .push(format!("Missing delimiter '{delimiter}' for build variable {name}"));
                continue;
            }
            parsed.entries.push((name.to_string(), value_lines.join("\n")));
        } else if let Some(eq_pos) = line.find('=') {
            let name = line[..eq_pos].trim();
            if name.is_empty() {
                parsed
                    .warnings
                    .push(format!("Invalid build variable (empty name): {line}"));
                continue;
            }
            parsed
                .entries
                .push((name.to_string(), line[eq_pos + 1..].trim().to_string()));
        } else {
            parsed
                .warnings
                .push(format!("Unrecognized build variables line: {line}"));
        }
    }

    parsed
}
