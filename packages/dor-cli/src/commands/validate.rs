use crate::cli::ValidateArgs;
use crate::exit_codes;
use crate::output;
use dor_rs::continuity::reference_time;
use dor_rs::{Corpus, CorpusStats, ContinuityPolicy};
use serde::Serialize;

#[derive(Serialize)]
struct ValidateOutput {
    files: Vec<String>,
    stats: Option<CorpusStats>,
    policy: Option<String>,
    span_ms: Option<i64>,
    reference_time: Option<String>,
    error: Option<String>,
}

struct Report {
    stats: CorpusStats,
    policy: ContinuityPolicy,
    reference_time: String,
}

fn inspect(corpus: &Corpus) -> dor_rs::Result<Report> {
    let policy = corpus.policy()?;
    let reference = reference_time(&corpus.first()?)?;
    Ok(Report {
        stats: corpus.stats().clone(),
        policy,
        reference_time: reference.to_string(),
    })
}

pub fn execute(args: ValidateArgs) -> i32 {
    let files = match super::resolve_inputs(&args.input) {
        Ok(f) => f,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };

    let report = Corpus::load(&files).and_then(|corpus| inspect(&corpus));

    let result = ValidateOutput {
        files: files.iter().map(|p| p.display().to_string()).collect(),
        stats: report.as_ref().ok().map(|r| r.stats.clone()),
        policy: report.as_ref().ok().map(|r| match r.policy {
            ContinuityPolicy::AdvanceBySpan(_) => "advance_by_span".to_string(),
            ContinuityPolicy::RecomputeFromClock => "recompute_from_clock".to_string(),
        }),
        span_ms: report
            .as_ref()
            .ok()
            .and_then(|r| r.policy.span())
            .map(|s| s.num_milliseconds()),
        reference_time: report.as_ref().ok().map(|r| r.reference_time.clone()),
        error: report.as_ref().err().map(|e| e.to_string()),
    };

    if args.json {
        if let Err(e) = output::print_json(&result) {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    }

    match report {
        Ok(report) => {
            if !args.json {
                println!(
                    "Corpus is valid: {} message(s) accepted, {} skipped",
                    report.stats.accepted, report.stats.skipped
                );
                match report.policy {
                    ContinuityPolicy::AdvanceBySpan(span) => println!(
                        "Continuity: advance by span of {} ms per cycle",
                        span.num_milliseconds()
                    ),
                    ContinuityPolicy::RecomputeFromClock => {
                        println!("Continuity: recompute from clock on every cycle")
                    }
                }
            }
            exit_codes::SUCCESS
        }
        Err(e) => {
            if !args.json {
                eprintln!("Error: {}", e);
            }
            super::exit_code_for(&e)
        }
    }
}
