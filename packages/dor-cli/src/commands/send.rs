use crate::cli::SendArgs;
use crate::exit_codes;
use crate::output;
use dor_rs::{Corpus, ReplayConfig, ReplayCoordinator, TimestampMode};

pub async fn execute(args: SendArgs) -> i32 {
    let files = match super::resolve_inputs(&args.input) {
        Ok(f) => f,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };

    let corpus = match Corpus::load(&files) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return super::exit_code_for(&e);
        }
    };

    let config = ReplayConfig {
        host: args.host.clone(),
        port: args.port,
        messages_per_worker: args.count,
        delay_ms: args.delay_ms,
        workers: args.workers,
        timestamp_mode: if args.keep_timestamps {
            TimestampMode::Preserve
        } else {
            TimestampMode::Shift
        },
        ack_timeout_secs: args.timeout_secs,
    };

    let coordinator = match ReplayCoordinator::mllp(config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return super::exit_code_for(&e);
        }
    };

    // Ctrl-C interrupts every worker's pause; partial results are still reported
    let cancel = coordinator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received, stopping workers");
            cancel.cancel();
        }
    });

    if !args.quiet {
        eprintln!(
            "Replaying {} message(s) from {} file(s): {} worker(s) x {} message(s) to {}:{}",
            corpus.len(),
            files.len(),
            args.workers,
            args.count,
            args.host,
            args.port
        );
    }

    let summary = match coordinator.run(&corpus).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return super::exit_code_for(&e);
        }
    };

    for line in summary.report_lines() {
        println!("{}", line);
    }

    if args.json {
        if let Err(e) = output::print_json(&summary) {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    }

    if !args.quiet && summary.interrupted_workers > 0 {
        eprintln!("{} worker(s) were interrupted", summary.interrupted_workers);
    }

    if summary.is_clean() {
        exit_codes::SUCCESS
    } else if summary.sent > 0 {
        exit_codes::PARTIAL_FAILURE
    } else {
        exit_codes::EXECUTION_ERROR
    }
}
