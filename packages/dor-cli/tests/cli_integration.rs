use assert_cmd::Command;
use predicates::prelude::*;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::thread;

fn dordriver() -> Command {
    let mut cmd = Command::cargo_bin("dordriver").unwrap();
    cmd.env_remove("DOR_HOST").env_remove("DOR_PORT");
    cmd
}

fn waveform(control_id: &str, start: &str, end: &str) -> String {
    format!(
        "MSH|^~\\&|DOR|C1007-123|||20150617120000.000||ORU^R01^ORU_R01|{}|P|2.6\r\
         OBR|1||XXX|WAVEFORM|||{}|{}\r\
         OBX|1|NA|131329^MDC_ECG_LEAD_I^MDC|1.1.1.1|0.16^0.185|mV||||||||{}\r",
        control_id, start, end, start
    )
}

fn write_corpus(dir: &Path, name: &str) -> String {
    let path = dir.join(name);
    let text = format!(
        "{}\n{}\n",
        waveform("1", "20150617120000.000", "20150617120003.000"),
        waveform("2", "20150617120003.000", "20150617120006.000")
    );
    std::fs::write(&path, text).unwrap();
    path.to_str().unwrap().to_string()
}

/// Answers every MLLP frame with an AA acknowledgement.
fn start_ack_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    thread::spawn(move || serve(stream));
                }
                Err(_) => break,
            }
        }
    });
    port
}

fn serve(mut stream: TcpStream) {
    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        while let Some(end) = buffer.windows(2).position(|w| w[0] == 0x1c && w[1] == 0x0d) {
            let frame: Vec<u8> = buffer.drain(..end + 2).collect();
            let text = String::from_utf8_lossy(&frame[1..end]).into_owned();
            let control_id = text
                .split('\r')
                .next()
                .and_then(|msh| msh.split('|').nth(9))
                .unwrap_or("")
                .to_string();
            let ack = format!(
                "\u{0b}MSH|^~\\&|RCV|FAC|DOR|FAC|20240101120000||ACK^R01|A{0}|P|2.6\rMSA|AA|{0}\r\u{1c}\r",
                control_id
            );
            if stream.write_all(ack.as_bytes()).is_err() {
                return;
            }
        }
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => return,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
        }
    }
}

fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

// =============================================================================
// GENERAL
// =============================================================================

#[test]
fn test_no_args_shows_help() {
    dordriver()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

#[test]
fn test_version_flag() {
    dordriver()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("dordriver"));
}

#[test]
fn test_help_flag() {
    dordriver()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("send"))
        .stdout(predicate::str::contains("fill"))
        .stdout(predicate::str::contains("validate"));
}

// =============================================================================
// VALIDATE SUBCOMMAND
// =============================================================================

#[test]
fn test_validate_corpus() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = write_corpus(dir.path(), "corpus.hl7");

    dordriver()
        .args(["validate", "--input", &corpus])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 message(s) accepted, 0 skipped"))
        .stdout(predicate::str::contains("advance by span of 6000 ms"));
}

#[test]
fn test_validate_json_output() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = write_corpus(dir.path(), "corpus.hl7");

    let output = dordriver()
        .args(["validate", "--input", &corpus, "--json"])
        .assert()
        .success();

    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed["stats"]["accepted"], 2);
    assert_eq!(parsed["policy"], "advance_by_span");
    assert_eq!(parsed["span_ms"], 6000);
    assert!(parsed["error"].is_null());
}

#[test]
fn test_validate_glob_expands_sorted() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path(), "a.hl7");
    write_corpus(dir.path(), "b.hl7");
    let pattern = format!("{}/*.hl7", dir.path().display());

    let output = dordriver()
        .args(["validate", "--input", &pattern, "--json"])
        .assert()
        .success();

    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed["stats"]["files"], 2);
    assert_eq!(parsed["stats"]["accepted"], 4);
    assert!(parsed["files"][0].as_str().unwrap().ends_with("a.hl7"));
}

#[test]
fn test_validate_nonexistent_file() {
    dordriver()
        .args(["validate", "--input", "/nonexistent/corpus.hl7"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_validate_skips_unsupported_messages() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mixed.hl7");
    std::fs::write(
        &path,
        format!(
            "MSH|^~\\&|A|B|C|D|20120530112345||ADT^A01|9|P|2.6\rPID|||1\r{}",
            waveform("1", "20150617120000.000", "20150617120003.000")
        ),
    )
    .unwrap();

    dordriver()
        .args(["validate", "--input", path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 message(s) accepted, 1 skipped"));
}

#[test]
fn test_validate_without_usable_messages() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("adt.hl7");
    std::fs::write(&path, "MSH|^~\\&|A|B|C|D|20120530112345||ADT^A01|9|P|2.6\r").unwrap();

    dordriver()
        .args(["validate", "--input", path.to_str().unwrap()])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("no usable ORU^R01 messages"));
}

// =============================================================================
// SEND SUBCOMMAND
// =============================================================================

#[test]
fn test_send_missing_input_arg() {
    dordriver()
        .args(["send", "--host", "127.0.0.1", "--port", "6661"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--input"));
}

#[test]
fn test_send_invalid_port() {
    dordriver()
        .args(["send", "--host", "127.0.0.1", "--port", "not-a-port", "--input", "x.hl7"])
        .assert()
        .failure();
}

#[test]
fn test_send_reports_totals() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = write_corpus(dir.path(), "corpus.hl7");
    let port = start_ack_server().to_string();

    dordriver()
        .args(["send", "--host", "127.0.0.1", "--port", &port, "--input", &corpus])
        .args(["--count", "4", "--workers", "2", "--quiet"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Total runtime (including delay) ms:"))
        .stdout(predicate::str::contains("Average runtime per worker (sending only) ms:"))
        .stdout(predicate::str::contains("Successfully sent messages: 8"))
        .stdout(predicate::str::contains("Failed messages: 0"))
        .stdout(predicate::str::contains("Failed connections: 0"));
}

#[test]
fn test_send_port_from_environment() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = write_corpus(dir.path(), "corpus.hl7");
    let port = start_ack_server().to_string();

    dordriver()
        .env("DOR_HOST", "127.0.0.1")
        .env("DOR_PORT", &port)
        .args(["send", "--input", &corpus, "--count", "3", "--keep-timestamps"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Successfully sent messages: 3"));
}

#[test]
fn test_send_json_summary() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = write_corpus(dir.path(), "corpus.hl7");
    let port = start_ack_server().to_string();

    let output = dordriver()
        .args(["send", "--host", "127.0.0.1", "--port", &port, "--input", &corpus])
        .args(["--count", "2", "--json", "--quiet"])
        .assert()
        .success();

    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let json_start = stdout.find('{').unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&stdout[json_start..]).unwrap();
    assert_eq!(parsed["sent"], 2);
    assert_eq!(parsed["workers"].as_array().unwrap().len(), 1);
    assert_eq!(parsed["workers"][0]["outcome"], "completed");
}

#[test]
fn test_send_unreachable_receiver() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = write_corpus(dir.path(), "corpus.hl7");
    let port = closed_port().to_string();

    dordriver()
        .args(["send", "--host", "127.0.0.1", "--port", &port, "--input", &corpus])
        .args(["--count", "3", "--timeout-secs", "2"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("Successfully sent messages: 0"))
        .stdout(predicate::str::contains("Failed connections: 1"));
}

// =============================================================================
// FILL SUBCOMMAND
// =============================================================================

const TEMPLATE: &str = "MSH|^~\\&|DOR|<DEVICE_ID>|||<START_TIME>||ORU^R01^ORU_R01|1|P|2.6\n\
                        OBR|1||XXX|WAVEFORM|||<START_TIME>|<END_TIME>\n\
                        OBX|1|NA|131329^MDC_ECG_LEAD_I^MDC|1.1.1.1|<SAMPLES_ECG1>|mV|<RANGE_LOW_ECG1>^<RANGE_HIGH_ECG1>||||||<RATE_ECG1>|<START_TIME>\n";

fn write_series(dir: &Path) -> String {
    let values = [0.160, 0.185, 0.185, 0.185, 0.185, 0.185, 0.185, 0.185, 0.185, 0.200];
    let mut text = String::from("'TIMESTAMP','SAMPLES_ECG1'\n");
    for (i, value) in values.iter().enumerate() {
        text.push_str(&format!("'2015-06-17T12:00:00.{:03}','{}'\n", i * 4, value));
    }
    let path = dir.join("series.csv");
    std::fs::write(&path, text).unwrap();
    path.to_str().unwrap().to_string()
}

#[test]
fn test_fill_writes_one_message_per_window() {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("template.hl7");
    std::fs::write(&template, TEMPLATE).unwrap();
    let data = write_series(dir.path());
    let dst = dir.path().join("filled.hl7");

    dordriver()
        .args(["fill", "--template", template.to_str().unwrap(), "--data", &data])
        .args(["--dst", dst.to_str().unwrap(), "--sample-rate", "250", "--frame-ms", "20"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Wrote 2 message(s)"));

    let filled = std::fs::read_to_string(&dst).unwrap();
    let messages: Vec<&str> = filled.split('\n').collect();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].contains("|0.16^0.185^0.185^0.185^0.185|"));
    assert!(messages[0].contains("|20150617120000.000|20150617120000.020\r"));
    assert!(messages[1].contains("|0.185^0.185^0.185^0.185^0.2|"));
    assert!(messages[1].contains("|C1007-123|"));
    assert!(!filled.contains('<'));

    // The generated file is a valid replay corpus
    dordriver()
        .args(["validate", "--input", dst.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 message(s) accepted"))
        .stdout(predicate::str::contains("advance by span of 40 ms"));
}

#[test]
fn test_fill_missing_placeholder() {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("template.hl7");
    std::fs::write(&template, format!("{}NTE|1||<PATIENT_NAME>\n", TEMPLATE)).unwrap();
    let data = write_series(dir.path());
    let dst = dir.path().join("filled.hl7");

    dordriver()
        .args(["fill", "--template", template.to_str().unwrap(), "--data", &data])
        .args(["--dst", dst.to_str().unwrap()])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("'PATIENT_NAME'"));

    assert!(!dst.exists());
}

#[test]
fn test_fill_missing_data_file() {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("template.hl7");
    std::fs::write(&template, TEMPLATE).unwrap();

    dordriver()
        .args(["fill", "--template", template.to_str().unwrap()])
        .args(["--data", "/nonexistent/series.csv"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not found"));
}
