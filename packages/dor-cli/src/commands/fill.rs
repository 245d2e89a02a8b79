use crate::cli::FillArgs;
use crate::exit_codes;
use crate::output;
use dor_rs::{segment, DorError, SegmenterConfig, SeriesTable, Template};
use std::path::Path;

pub fn execute(args: FillArgs) -> i32 {
    let config = SegmenterConfig {
        sample_rate: args.sample_rate,
        frame_ms: args.frame_ms,
        start_time: args.start_time.clone(),
        device_id: args.device_id.clone(),
    };

    let messages = match fill_messages(&args, &config) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Error: {}", e);
            return super::exit_code_for(&e);
        }
    };

    if let Err(e) = output::write_output(&messages.join("\n"), Some(&args.dst)) {
        eprintln!("Error: {}", e);
        return exit_codes::EXECUTION_ERROR;
    }

    log::info!("Wrote {} message(s) to {}", messages.len(), args.dst);
    eprintln!("Wrote {} message(s) to {}", messages.len(), args.dst);

    exit_codes::SUCCESS
}

fn fill_messages(args: &FillArgs, config: &SegmenterConfig) -> Result<Vec<String>, DorError> {
    let template = Template::load(Path::new(&args.template))?;
    let table = SeriesTable::load(Path::new(&args.data))?;

    let windows = segment(&table, config)?;
    let values: Vec<_> = windows
        .iter()
        .map(|w| w.placeholders(&config.device_id))
        .collect();

    let filled = template.fill_all(&values)?;
    Ok(filled.iter().map(|m| normalize_segments(m)).collect())
}

/// One message per line: segments end with `\r`, no `\n` inside.
fn normalize_segments(message: &str) -> String {
    message
        .split(['\r', '\n'])
        .filter(|segment| !segment.trim().is_empty())
        .map(|segment| format!("{}\r", segment))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_segments() {
        assert_eq!(normalize_segments("MSH|a\r\nPID|b\n\nOBR|c"), "MSH|a\rPID|b\rOBR|c\r");
    }
}
