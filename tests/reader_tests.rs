use runlog::{fields, read_log, Error, Event, LogFile, LogValue, LogWriter, StorageForm, WriterOptions};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

fn finished_log(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("log.jsonl");
    let mut writer = LogWriter::open(&path, fields! { "lr" => 0.01, "name" => "demo" }).unwrap();
    writer.add("step", fields! { "loss" => 10 }).unwrap();
    writer.add("valid", fields! { "loss" => 6, "error_rate" => 0.1 }).unwrap();
    writer.add("step", fields! { "loss" => 5 }).unwrap();
    writer.close().unwrap();
    path
}

fn collect(log: &LogFile) -> Vec<Event> {
    log.events()
        .unwrap()
        .collect::<runlog::Result<Vec<_>>>()
        .unwrap()
}

fn malformed_line(err: Error) -> Option<usize> {
    match err {
        Error::MalformedLog { line, .. } => line,
        other => panic!("Expected MalformedLog, got {:?}", other),
    }
}

#[test]
fn test_open_by_either_name() {
    let dir = tempdir().unwrap();
    let raw = finished_log(&dir);
    let compressed = dir.path().join("log.jsonl.lz4");

    for path in [&raw, &compressed] {
        let log = LogFile::open(path).unwrap();
        assert_eq!(log.form(), StorageForm::Compressed);
        assert_eq!(log.path(), compressed.as_path());
        assert_eq!(collect(&log).len(), 3);
    }
}

#[test]
fn test_compressed_preferred_over_raw() {
    let dir = tempdir().unwrap();
    let raw = finished_log(&dir);

    // Simulates a crash between writing the compressed file and removing the raw one.
    fs::write(&raw, "{\"stale\":true}\n").unwrap();

    let log = LogFile::open(&raw).unwrap();
    assert_eq!(log.form(), StorageForm::Compressed);
    assert_eq!(log.header().get("name"), Some(&LogValue::Str("demo".into())));
}

#[test]
fn test_form_detected_from_contents() {
    let dir = tempdir().unwrap();
    finished_log(&dir);
    let renamed = dir.path().join("renamed.data");
    fs::rename(dir.path().join("log.jsonl.lz4"), &renamed).unwrap();

    let log = LogFile::open(&renamed).unwrap();
    assert_eq!(log.form(), StorageForm::Compressed);
    assert_eq!(collect(&log).len(), 3);
}

#[test]
fn test_events_are_restartable() {
    let dir = tempdir().unwrap();
    let path = finished_log(&dir);
    let log = LogFile::open(&path).unwrap();

    let first = collect(&log);
    let second = collect(&log);
    assert_eq!(first, second);
    assert_eq!(first[1], Event::new("valid", fields! { "loss" => 6, "error_rate" => 0.1 }));
}

#[test]
fn test_kinds_and_metadata() {
    let dir = tempdir().unwrap();
    let path = finished_log(&dir);
    let log = LogFile::open(&path).unwrap();

    let kinds: Vec<String> = log.kinds().unwrap().into_iter().collect();
    assert_eq!(kinds, vec!["step".to_string(), "valid".to_string()]);

    let meta = log.metadata().unwrap();
    assert_eq!(meta.form, StorageForm::Compressed);
    assert!(meta.size > 0);
    assert!(meta.modified.is_some());
    if let Some(created) = meta.created {
        assert!(created <= meta.modified.unwrap());
    }
}

#[test]
fn test_reader_follows_log_finalized_after_open() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log.jsonl");
    let mut writer = LogWriter::open(&path, fields! { "lr" => 0.01 }).unwrap();
    writer.add("step", fields! { "loss" => 10 }).unwrap();

    let log = LogFile::open(&path).unwrap();
    assert_eq!(log.form(), StorageForm::Raw);
    assert_eq!(collect(&log).len(), 1);

    writer.add("step", fields! { "loss" => 5 }).unwrap();
    writer.close().unwrap();
    assert!(!path.exists());

    assert_eq!(
        collect(&log),
        vec![
            Event::new("step", fields! { "loss" => 10 }),
            Event::new("step", fields! { "loss" => 5 }),
        ]
    );
    let meta = log.metadata().unwrap();
    assert_eq!(meta.form, StorageForm::Compressed);
    assert_eq!(meta.path, dir.path().join("log.jsonl.lz4"));
}

#[test]
fn test_missing_log() {
    let dir = tempdir().unwrap();
    match LogFile::open(dir.path().join("nothing.jsonl")) {
        Err(Error::Io(e)) => assert_eq!(e.kind(), ErrorKind::NotFound),
        other => panic!("Expected NotFound, got {:?}", other),
    }
}

#[test]
fn test_empty_log() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.jsonl");
    fs::write(&path, "").unwrap();

    assert_eq!(malformed_line(LogFile::open(&path).unwrap_err()), None);
}

#[test]
fn test_bad_header() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.jsonl");
    fs::write(&path, "not json\n{\"kind\":\"step\"}\n").unwrap();

    assert_eq!(malformed_line(LogFile::open(&path).unwrap_err()), Some(1));
}

#[test]
fn test_bad_line_stops_iteration() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.jsonl");
    fs::write(
        &path,
        "{}\n{\"kind\":\"step\",\"loss\":1}\n{\"kind\":\"step\",\"loss\":\n{\"kind\":\"step\",\"loss\":3}\n",
    )
    .unwrap();

    let (_, mut events) = read_log(&path).unwrap();
    assert_eq!(events.next().unwrap().unwrap().get("loss"), Some(&LogValue::Int(1)));
    assert_eq!(malformed_line(events.next().unwrap().unwrap_err()), Some(3));
    assert!(events.next().is_none(), "Iterator should stop after an error");
}

#[test]
fn test_event_without_kind() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nokind.jsonl");
    fs::write(&path, "{}\n{\"loss\":1}\n").unwrap();

    let (_, mut events) = read_log(&path).unwrap();
    assert_eq!(malformed_line(events.next().unwrap().unwrap_err()), Some(2));
}

#[test]
fn test_unterminated_raw_line_is_in_flight() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log.jsonl");
    fs::write(&path, "{}\n{\"kind\":\"step\",\"loss\":1}\n{\"kind\":\"st").unwrap();

    let log = LogFile::open(&path).unwrap();
    assert_eq!(collect(&log), vec![Event::new("step", fields! { "loss" => 1 })]);

    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(b"ep\",\"loss\":2}\n").unwrap();
    assert_eq!(collect(&log).len(), 2, "Completed line should be visible on the next pass");
}

#[test]
fn test_events_bounded_at_open() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log.jsonl");
    let options = WriterOptions::default().compress_on_close(false);
    let mut writer = LogWriter::open_with(&path, fields! {}, options).unwrap();
    writer.add("step", fields! { "i" => 0 }).unwrap();

    let log = LogFile::open(&path).unwrap();
    let mut events = log.events().unwrap();
    writer.add("step", fields! { "i" => 1 }).unwrap();

    assert!(events.next().unwrap().is_ok());
    assert!(events.next().is_none(), "Events appended after the pass started are not included");
    assert_eq!(collect(&log).len(), 2);
}

#[test]
fn test_truncated_compressed_log() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log.jsonl");
    let mut writer = LogWriter::open(&path, fields! { "run" => 1 }).unwrap();
    for i in 0..200 {
        writer.add("step", fields! { "i" => i, "note" => format!("event number {}", i) }).unwrap();
    }
    writer.close().unwrap();

    let compressed = dir.path().join("log.jsonl.lz4");
    let bytes = fs::read(&compressed).unwrap();
    fs::write(&compressed, &bytes[..bytes.len() / 2]).unwrap();

    let result = LogFile::open(&compressed).and_then(|log| {
        log.events()?.collect::<runlog::Result<Vec<_>>>()
    });
    assert!(
        matches!(result, Err(Error::MalformedLog { .. })),
        "Expected MalformedLog, got {:?}",
        result.map(|events| events.len())
    );
}

#[test]
fn test_reading_does_not_modify() {
    let dir = tempdir().unwrap();
    let path = finished_log(&dir);
    let compressed = dir.path().join("log.jsonl.lz4");
    let before = fs::read(&compressed).unwrap();

    let log = LogFile::open(&path).unwrap();
    collect(&log);
    log.kinds().unwrap();

    assert_eq!(fs::read(&compressed).unwrap(), before);
    assert!(!Path::new(&path).exists());
}
