//! Tests for job log sinks

use shardkeeper::core::{build_job_message, InMemoryLogSink, JobLogSink, TracingLogSink};
use shardkeeper::util::{new_run_id, LogLevel};

#[test]
fn test_clones_share_buffer() {
    let sink = InMemoryLogSink::new(16);
    let mut writer = sink.clone();
    writer.record(build_job_message("workers", LogLevel::Info, "swept", new_run_id()));
    writer.record(build_job_message("top-global", LogLevel::Error, "db down", new_run_id()));

    assert_eq!(sink.messages().len(), 2);
    let errors = sink.messages_for("top-global");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].level, LogLevel::Error);
}

#[test]
fn test_tracing_sink_accepts_messages() {
    let mut sink = TracingLogSink;
    sink.record(build_job_message("workers", LogLevel::Info, "no subscriber installed", new_run_id()));
}

#[test]
fn test_job_message_serializes_with_run_id() {
    let run_id = new_run_id();
    let message = build_job_message("workers", LogLevel::Info, "swept", run_id);

    let json = serde_json::to_string(&message).unwrap();
    assert!(json.contains(&format!("\"runId\":\"{run_id}\"")));
    assert!(json.contains("\"jobName\":\"workers\""));

    let back: shardkeeper::core::JobMessage = serde_json::from_str(&json).unwrap();
    assert_eq!(back, message);
}
