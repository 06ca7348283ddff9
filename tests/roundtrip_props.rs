use proptest::collection::{btree_map, vec};
use proptest::prelude::*;
use runlog::{ops, read_log, table, Event, Fields, Header, LogValue, LogWriter, WriterOptions};
use tempfile::tempdir;

fn log_value() -> impl Strategy<Value = LogValue> {
    let leaf = prop_oneof![
        Just(LogValue::Null),
        any::<bool>().prop_map(LogValue::Bool),
        any::<i64>().prop_map(LogValue::Int),
        (-1.0e12f64..1.0e12).prop_map(LogValue::Float),
        "\\PC{0,12}".prop_map(LogValue::Str),
    ];
    leaf.prop_recursive(2, 16, 4, |inner| {
        prop_oneof![
            vec(inner.clone(), 0..4).prop_map(LogValue::Array),
            btree_map("[a-z]{1,6}", inner, 0..4).prop_map(LogValue::Map),
        ]
    })
}

fn fields_strategy() -> impl Strategy<Value = Fields> {
    btree_map("[a-z_]{1,8}", log_value(), 0..5).prop_map(|mut fields| {
        fields.remove("kind");
        fields
    })
}

fn event_strategy() -> impl Strategy<Value = Event> {
    ("[a-z][a-z0-9_.:-]{0,7}", fields_strategy()).prop_map(|(kind, fields)| Event::new(kind, fields))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn written_events_read_back_identically(
        header in fields_strategy(),
        events in vec(event_strategy(), 0..20),
        compress in any::<bool>(),
    ) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let options = WriterOptions::default().compress_on_close(compress);

        let mut writer = LogWriter::open_with(&path, header.clone(), options).unwrap();
        for event in &events {
            writer.add(event.kind(), event.fields.clone()).unwrap();
        }
        writer.close().unwrap();

        let (read_header, read_events) = read_log(&path).unwrap();
        let read_events = read_events.collect::<runlog::Result<Vec<_>>>().unwrap();
        prop_assert_eq!(read_header.fields(), &header);
        prop_assert_eq!(read_events, events);
    }

    #[test]
    fn tables_partition_every_event(events in vec(event_strategy(), 0..40)) {
        let enriched = ops::apply(
            &Header::default(),
            events.iter().cloned().map(Ok),
            vec![ops::map("seen", |_| LogValue::Bool(true))],
        );
        let tables = table::by_kind(enriched).unwrap();

        let total: usize = tables.values().map(|t| t.len()).sum();
        prop_assert_eq!(total, events.len());
        for (kind, t) in &tables {
            let expected = events.iter().filter(|e| e.kind() == kind).count();
            prop_assert_eq!(t.len(), expected);
            prop_assert!(!t.columns().contains("kind"));
            prop_assert_eq!(t.column("seen").map(|c| c.len()), Some(expected));
        }
    }
}
