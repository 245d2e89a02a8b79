pub mod fill;
pub mod send;
pub mod validate;

use crate::exit_codes;
use dor_rs::DorError;
use std::path::PathBuf;

/// Expand `--input` values; arguments with glob metacharacters are
/// expanded and sorted, plain paths are kept as given.
pub fn resolve_inputs(inputs: &[String]) -> Result<Vec<PathBuf>, String> {
    let mut files = Vec::new();
    for input in inputs {
        if !input.contains(['*', '?', '[']) {
            files.push(PathBuf::from(input));
            continue;
        }

        let paths =
            glob::glob(input).map_err(|e| format!("Invalid glob pattern '{}': {}", input, e))?;

        let mut matched = Vec::new();
        for entry in paths {
            match entry {
                Ok(path) => {
                    if path.is_file() {
                        matched.push(path);
                    }
                }
                Err(e) => {
                    eprintln!("Warning: glob error: {}", e);
                }
            }
        }

        if matched.is_empty() {
            return Err(format!("No files match '{}'", input));
        }
        matched.sort();
        files.extend(matched);
    }
    Ok(files)
}

pub fn exit_code_for(error: &DorError) -> i32 {
    match error {
        DorError::Config(_)
        | DorError::FileNotFound(_)
        | DorError::Decode(_)
        | DorError::UnsupportedMessageType(_)
        | DorError::InvalidTimestamp(_)
        | DorError::MissingPlaceholder(_)
        | DorError::Series(_) => exit_codes::INPUT_ERROR,
        _ => exit_codes::EXECUTION_ERROR,
    }
}
