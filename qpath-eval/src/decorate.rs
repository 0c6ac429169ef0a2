// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `decorateByTime` (§4.5.2) and `decorateByKey` (§4.5.3).
//!
//! Both need to see the full decorator event population before they can
//! join a single primary row, so they cannot be expressed as a per-row
//! [crate::pipeline] transform; both take a [RecordingHandle] directly.
//!
//! Primary rows are the ones [crate::evaluate] already materialized from its
//! own streaming pass (predicates already applied). Decorator events are
//! collected here with a second, filtered streaming pass.
//!
//! Both operators assume the conventional `jdk.jfr` event shape, where every
//! event carries `startTime`/`duration` fields — QPath's grammar does not
//! expose separate start/duration path parameters for decoration, so there
//! is nothing else to key off of. Both fields arrive already converted to
//! epoch nanoseconds / a nanosecond duration (see [Row::resolve_event_time]),
//! since comparing the raw per-chunk tick counts across a primary event and
//! a decorator event from a different chunk would be meaningless.

use jfr_reader::recording::{ReaderOptions, RecordingHandle};
use qpath::ast::Segment;
use rustc_hash::FxHashSet;

use crate::{
    error::Result,
    row::{Row, RowValue},
};

struct DecoratorEvent {
    thread_id: i64,
    start: i64,
    end: i64,
    row: Row,
}

fn collect_decorators(
    recording: &RecordingHandle,
    options: ReaderOptions,
    decorator_type: &str,
    thread_path: &[Segment],
) -> Result<Vec<DecoratorEvent>> {
    let mut wanted = FxHashSet::default();
    wanted.insert(decorator_type.to_string());

    let mut out = Vec::new();

    recording.stream_events(options, Some(&wanted), |type_name, value, time_resolver, _control| {
        let mut row = Row::from_event(type_name, RowValue::from_resolved(&value));
        row.resolve_event_time(time_resolver);

        let thread_id = row
            .project(thread_path)
            .first()
            .map(|v| v.to_numeric() as i64)
            .unwrap_or(0);
        let start = row
            .project(&path("startTime"))
            .first()
            .map(|v| v.to_numeric() as i64)
            .unwrap_or(0);
        let duration = row
            .project(&path("duration"))
            .first()
            .map(|v| v.to_numeric() as i64)
            .unwrap_or(0);

        out.push(DecoratorEvent {
            thread_id,
            start,
            end: start + duration,
            row,
        });

        Ok(())
    })?;

    out.sort_by_key(|d| (d.thread_id, d.start));

    Ok(out)
}

fn path(name: &str) -> Vec<Segment> {
    vec![Segment::bare(name)]
}

fn overlay_decorator(primary: &Row, decorator: Option<&Row>, fields: &[String]) -> Row {
    let mut out = primary.clone();

    let names: Vec<String> = if fields.is_empty() {
        decorator
            .map(|d| d.columns().iter().map(|(k, _)| k.clone()).collect())
            .unwrap_or_default()
    } else {
        fields.to_vec()
    };

    for name in names {
        let value = decorator
            .and_then(|d| d.get(&name))
            .cloned()
            .unwrap_or(RowValue::Null);
        out.set(format!("$decorator.{name}"), value);
    }

    out
}

/// Temporal join: primary and decorator intervals overlap and their thread
/// ids (via `thread_path`/`decorator_thread_path`) match.
pub fn decorate_by_time(
    recording: &RecordingHandle,
    options: ReaderOptions,
    decorator_type: &str,
    fields: &[String],
    thread_path: &[Segment],
    decorator_thread_path: &[Segment],
    primary_rows: Vec<Row>,
) -> Result<Vec<Row>> {
    let decorators = collect_decorators(recording, options, decorator_type, decorator_thread_path)?;

    let out = primary_rows
        .into_iter()
        .map(|row| {
            let thread_id = row
                .project(thread_path)
                .first()
                .map(|v| v.to_numeric() as i64)
                .unwrap_or(0);
            let start = row
                .project(&path("startTime"))
                .first()
                .map(|v| v.to_numeric() as i64)
                .unwrap_or(0);
            let duration = row
                .project(&path("duration"))
                .first()
                .map(|v| v.to_numeric() as i64)
                .unwrap_or(0);
            let end = start + duration;

            // Binary-search the thread's run, then scan for the first
            // overlapping interval; the list is sorted by
            // `(thread_id, start)` so the run is contiguous.
            let run_start = decorators.partition_point(|d| d.thread_id < thread_id);
            let run_end = decorators.partition_point(|d| d.thread_id <= thread_id);

            let matched = decorators[run_start..run_end]
                .iter()
                .find(|d| d.start < end && d.end > start);

            overlay_decorator(&row, matched.map(|d| &d.row), fields)
        })
        .collect();

    Ok(out)
}

/// Equality join on `key`/`decorator_key` (§4.5.3).
pub fn decorate_by_key(
    recording: &RecordingHandle,
    options: ReaderOptions,
    decorator_type: &str,
    key: &[Segment],
    decorator_key: &[Segment],
    fields: &[String],
    primary_rows: Vec<Row>,
) -> Result<Vec<Row>> {
    let mut wanted = FxHashSet::default();
    wanted.insert(decorator_type.to_string());

    // Hash index: key (display string) -> first matching decorator row.
    // "first one in sort order" for decorateByTime has no analog here since
    // there is no intrinsic order; first-seen during the pass-1 stream is
    // used instead, which is recording order.
    let mut index: rustc_hash::FxHashMap<String, Row> = rustc_hash::FxHashMap::default();

    recording.stream_events(options, Some(&wanted), |type_name, value, time_resolver, _control| {
        let mut row = Row::from_event(type_name, RowValue::from_resolved(&value));
        row.resolve_event_time(time_resolver);
        if let Some(k) = row.project(decorator_key).first() {
            let display = k.to_display_string();
            index.entry(display).or_insert(row);
        }
        Ok(())
    })?;

    let out = primary_rows
        .into_iter()
        .map(|row| {
            let matched = row
                .project(key)
                .first()
                .and_then(|k| index.get(&k.to_display_string()));

            overlay_decorator(&row, matched, fields)
        })
        .collect();

    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn overlay_decorator_materializes_null_for_requested_fields_without_a_match() {
        let primary = Row::new();
        let fields = vec!["allocated".to_string()];

        let out = overlay_decorator(&primary, None, &fields);

        assert_eq!(out.get("$decorator.allocated"), Some(&RowValue::Null));
    }

    #[test]
    fn overlay_decorator_copies_requested_fields_from_match() {
        let primary = Row::new();
        let mut decorator = Row::new();
        decorator.set("allocated", RowValue::Int(42));

        let out = overlay_decorator(&primary, Some(&decorator), &["allocated".to_string()]);

        assert_eq!(out.get("$decorator.allocated"), Some(&RowValue::Int(42)));
    }
}
