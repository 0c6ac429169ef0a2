// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Exercises query text all the way from [qpath::parse] through predicate
//! filtering, path projection and pipeline evaluation, against a synthetic
//! in-memory event source rather than a real `.jfr` binary: no recording
//! fixture ships in this crate, so these events are built directly as
//! [Row]s, standing in for what [jfr_reader::recording::RecordingHandle::stream_events]
//! would have produced after resolving an event's constant pool references.

use jfr_reader::chunk::ChunkHeader;
use jfr_reader::resolver::TimeResolver;
use qpath_eval::{predicate, pipeline, Row, RowValue};

/// A chunk header with a round tick frequency, used to build a
/// [TimeResolver] for tests that exercise time conversion without a real
/// recording to parse one out of.
fn synthetic_chunk_header() -> ChunkHeader {
    ChunkHeader {
        major: 2,
        minor: 0,
        chunk_size: 0,
        constant_pool_position: 0,
        metadata_position: 0,
        nanoseconds_since_epoch: 1_700_000_000_000_000_000,
        duration_nanoseconds: 0,
        start_ticks: 1_000,
        ticks_per_second: 1_000_000_000,
        state_and_flags: 0,
    }
}

fn file_read_row(path: &str, bytes: i64) -> Row {
    let mut row = Row::new();
    row.set("$eventType", RowValue::Str("jdk.FileRead".to_string()));
    row.set("path", RowValue::Str(path.to_string()));
    row.set("bytes", RowValue::Int(bytes));
    row
}

fn thread_dump_row(frames: Vec<(&str, &str)>) -> Row {
    let mut row = Row::new();
    row.set("$eventType", RowValue::Str("jdk.ThreadDump".to_string()));
    row.set(
        "stackTrace",
        RowValue::Map(vec![(
            "frames".to_string(),
            RowValue::Array(
                frames
                    .into_iter()
                    .map(|(frame_type, method)| {
                        RowValue::Map(vec![
                            ("frameType".to_string(), RowValue::Str(frame_type.to_string())),
                            ("method".to_string(), RowValue::Str(method.to_string())),
                        ])
                    })
                    .collect(),
            ),
        )]),
    );
    row
}

/// Stand-in for [qpath_eval::evaluate::evaluate]'s predicate-filter-then-project
/// dataflow (§4.3), minus the recording streaming step: `rows` plays the part
/// of the stream of per-event rows a real recording would produce.
fn run_query(query_text: &str, rows: Vec<Row>) -> Vec<Row> {
    let query = qpath::parse(query_text).expect("valid query");

    let matched: Vec<Row> = rows
        .into_iter()
        .filter(|row| {
            query
                .predicates
                .iter()
                .all(|p| predicate::predicate_matches(p, &query.segments, row))
        })
        .collect();

    let projected: Vec<Row> = if query.segments.is_empty() {
        matched
    } else {
        matched
            .iter()
            .flat_map(|row| {
                row.project(&query.segments).into_iter().map(|v| {
                    let mut out = Row::new();
                    out.set("value", v);
                    out
                })
            })
            .collect()
    };

    pipeline::apply_all(&query.pipeline, projected).expect("pipeline stage succeeds")
}

#[test]
fn predicate_filters_before_aggregation() {
    let rows = vec![
        file_read_row("/a", 2048),
        file_read_row("/b", 512),
        file_read_row("/c", 4096),
    ];

    let out = run_query("events/jdk.FileRead[bytes > 1024] | sum(bytes)", rows);

    assert_eq!(out.len(), 1);
    assert_eq!(out[0].get("sum"), Some(&RowValue::Float(6144.0)));
    assert_eq!(out[0].get("count"), Some(&RowValue::Int(2)));
}

#[test]
fn group_by_aggregates_over_matching_rows() {
    let rows = vec![
        file_read_row("/a", 100),
        file_read_row("/a", 200),
        file_read_row("/b", 50),
    ];

    let out = run_query("events/jdk.FileRead | groupBy(path, agg=count)", rows);

    let a = out
        .iter()
        .find(|r| r.get("key") == Some(&RowValue::Str("/a".to_string())))
        .expect("group for /a");
    assert_eq!(a.get("count"), Some(&RowValue::Int(2)));

    let b = out
        .iter()
        .find(|r| r.get("key") == Some(&RowValue::Str("/b".to_string())))
        .expect("group for /b");
    assert_eq!(b.get("count"), Some(&RowValue::Int(1)));
}

#[test]
fn select_projects_fields_and_expressions() {
    let rows = vec![file_read_row("/a", 2048)];

    let out = run_query("events/jdk.FileRead | select(path, bytes/1024 as kb)", rows);

    assert_eq!(out.len(), 1);
    assert_eq!(out[0].get("path"), Some(&RowValue::Str("/a".to_string())));
    assert_eq!(out[0].get("kb"), Some(&RowValue::Float(2.0)));
}

/// A predicate written after `stackTrace/frames` scopes to that array (§4.4),
/// so a thread dump with at least one matching frame is kept in its entirety
/// and the trailing `/method` segment still fans out across every frame, not
/// just the one the predicate matched.
#[test]
fn depth_scoped_predicate_gates_whole_event_then_path_fans_out() {
    let rows = vec![
        thread_dump_row(vec![("Java", "run"), ("Interpreted", "helper")]),
        thread_dump_row(vec![("Interpreted", "idle")]),
    ];

    let out = run_query(
        "events/jdk.ThreadDump/stackTrace/frames[frameType = \"Java\"]/method",
        rows,
    );

    let methods: Vec<&str> = out
        .iter()
        .map(|r| match r.get("value") {
            Some(RowValue::Str(s)) => s.as_str(),
            _ => panic!("expected string value"),
        })
        .collect();

    assert_eq!(methods, vec!["run", "helper"]);
}

#[test]
fn resolve_event_time_converts_ticks_before_time_range() {
    let time_resolver = TimeResolver::new(&synthetic_chunk_header());

    let mut first = file_read_row("/a", 10);
    first.set("startTime", RowValue::Int(1_000));
    first.set("duration", RowValue::Int(500_000_000));
    first.resolve_event_time(&time_resolver);

    let mut second = file_read_row("/b", 20);
    second.set("startTime", RowValue::Int(2_000_000_000 + 1_000));
    second.set("duration", RowValue::Int(0));
    second.resolve_event_time(&time_resolver);

    let out = run_query(
        "events/jdk.FileRead | timeRange(startTime, duration)",
        vec![first, second],
    );

    let min = out[0].get("minTicks").unwrap().to_numeric() as i64;
    let max = out[0].get("maxTicks").unwrap().to_numeric() as i64;

    // Both values are epoch nanoseconds, not raw chunk ticks: the earliest
    // start is the chunk's own epoch origin, and the span between the two
    // events' start ticks (2 seconds) shows up unchanged in the gap between
    // min and the second event's converted start.
    assert_eq!(min, 1_700_000_000_000_000_000);
    assert_eq!(max, 1_700_000_002_000_000_000);
}
