// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The streaming event evaluator (§4.3): turns a parsed [qpath::ast::Query]
//! plus a [RecordingHandle] into rows.

use jfr_reader::recording::{ReaderOptions, RecordingHandle};
use qpath::ast::{PipelineOp, Query, Root, Segment};
use rustc_hash::FxHashSet;

use crate::{
    decorate,
    error::{Error, Result},
    pipeline, predicate,
    row::{Row, RowValue},
};

pub fn evaluate(recording: &RecordingHandle, query: &Query, options: ReaderOptions) -> Result<Vec<Row>> {
    evaluate_with_limit(recording, query, options, None)
}

pub fn evaluate_with_limit(
    recording: &RecordingHandle,
    query: &Query,
    options: ReaderOptions,
    limit: Option<usize>,
) -> Result<Vec<Row>> {
    let rows = match query.root {
        Root::Events => evaluate_events(recording, query, options, limit)?,
        Root::Metadata => rows_from_metadata(recording, query)?,
        Root::Chunks => rows_from_chunks(recording, query)?,
        Root::ConstantPool => rows_from_constant_pool(recording, query)?,
    };

    // Events applies its own segments handling inline (interleaved with
    // per-event predicate filtering); the other roots materialize eagerly,
    // so their leaf projection happens once, after the fact.
    let rows = if query.root != Root::Events && !query.segments.is_empty() {
        rows.iter().flat_map(|r| rows_for_segments(r, &query.segments)).collect()
    } else {
        rows
    };

    run_pipeline(recording, options, &query.pipeline, rows)
}

/// For queries whose path extends past the event type with an empty
/// pipeline, bypass [Row] entirely and return the bare leaf values (§4.3
/// entry points).
pub fn evaluate_values(
    recording: &RecordingHandle,
    query: &Query,
    options: ReaderOptions,
) -> Result<Vec<RowValue>> {
    evaluate_values_with_limit(recording, query, options, None)
}

pub fn evaluate_values_with_limit(
    recording: &RecordingHandle,
    query: &Query,
    options: ReaderOptions,
    limit: Option<usize>,
) -> Result<Vec<RowValue>> {
    validate_event_types(recording, query)?;

    let wanted = event_type_filter(query);
    let mut values = Vec::new();

    recording.stream_events(options, wanted.as_ref(), |type_name, value, time_resolver, control| {
        let mut row = Row::from_event(type_name, RowValue::from_resolved(&value));
        row.resolve_event_time(time_resolver);

        if matches_all(&query.predicates, &query.segments, &row) {
            values.extend(row.project(&query.segments));

            if let Some(n) = limit {
                if values.len() >= n {
                    control.abort();
                }
            }
        }

        Ok(())
    })?;

    if let Some(n) = limit {
        values.truncate(n);
    }

    Ok(values)
}

fn matches_all(predicates: &[qpath::ast::Predicate], segments: &[Segment], row: &Row) -> bool {
    predicates
        .iter()
        .all(|p| predicate::predicate_matches(p, segments, row))
}

fn event_type_filter(query: &Query) -> Option<FxHashSet<String>> {
    if query.event_types.is_empty() {
        None
    } else {
        Some(query.event_types.iter().cloned().collect())
    }
}

/// Wrap each value reached by projecting `segments` from `row` into its own
/// single-column row, so a non-empty projection still feeds the `Row`-based
/// pipeline when the query goes on to use one (e.g.
/// `…/sampledThread/javaName | count()`).
fn rows_for_segments(row: &Row, segments: &[Segment]) -> Vec<Row> {
    row.project(segments)
        .into_iter()
        .map(|v| {
            let mut out = Row::new();
            out.set("value", v);
            out
        })
        .collect()
}

fn evaluate_events(
    recording: &RecordingHandle,
    query: &Query,
    options: ReaderOptions,
    limit: Option<usize>,
) -> Result<Vec<Row>> {
    validate_event_types(recording, query)?;

    let wanted = event_type_filter(query);
    let mut rows = Vec::new();

    recording.stream_events(options, wanted.as_ref(), |type_name, value, time_resolver, control| {
        let mut row = Row::from_event(type_name, RowValue::from_resolved(&value));
        row.resolve_event_time(time_resolver);

        if matches_all(&query.predicates, &query.segments, &row) {
            if query.segments.is_empty() {
                rows.push(row);
            } else {
                rows.extend(rows_for_segments(&row, &query.segments));
            }

            if let Some(n) = limit {
                if rows.len() >= n {
                    control.abort();
                }
            }
        }

        Ok(())
    })?;

    Ok(rows)
}

fn rows_from_metadata(recording: &RecordingHandle, query: &Query) -> Result<Vec<Row>> {
    let types = recording.load_metadata(None)?;

    let rows: Vec<Row> = types
        .iter()
        .map(|t| {
            let mut row = Row::new();
            row.set("name", RowValue::Str(t.name.clone()));
            row.set(
                "superType",
                t.super_type.clone().map(RowValue::Str).unwrap_or(RowValue::Null),
            );
            row.set("label", t.label.clone().map(RowValue::Str).unwrap_or(RowValue::Null));
            row.set(
                "description",
                t.description.clone().map(RowValue::Str).unwrap_or(RowValue::Null),
            );
            row.set(
                "fields",
                RowValue::Array(
                    t.fields
                        .iter()
                        .map(|f| {
                            RowValue::Map(vec![
                                ("name".to_string(), RowValue::Str(f.name.clone())),
                                (
                                    "typeName".to_string(),
                                    f.type_name.clone().map(RowValue::Str).unwrap_or(RowValue::Null),
                                ),
                                ("isArray".to_string(), RowValue::Bool(f.is_array)),
                            ])
                        })
                        .collect(),
                ),
            );
            row
        })
        .filter(|r| matches_all(&query.predicates, &query.segments, r))
        .collect();

    Ok(rows)
}

fn rows_from_chunks(recording: &RecordingHandle, query: &Query) -> Result<Vec<Row>> {
    let chunks = recording.list_chunks()?;

    let rows: Vec<Row> = chunks
        .iter()
        .map(|c| {
            let mut row = Row::new();
            row.set("index", RowValue::Int(c.index as i64));
            row.set("offset", RowValue::Int(c.offset as i64));
            row.set("size", RowValue::Int(c.size as i64));
            row.set("startNanos", RowValue::Int(c.start_nanos as i64));
            row.set("startTicks", RowValue::Int(c.start_ticks as i64));
            row.set("tickFrequency", RowValue::Int(c.tick_frequency as i64));
            row.set("durationNanos", RowValue::Int(c.duration_nanos as i64));
            row.set("compressed", RowValue::Bool(c.compressed));
            row
        })
        .filter(|r| matches_all(&query.predicates, &query.segments, r))
        .collect();

    Ok(rows)
}

fn rows_from_constant_pool(recording: &RecordingHandle, query: &Query) -> Result<Vec<Row>> {
    let summary = recording.load_constant_pool_summary()?;

    let rows: Vec<Row> = summary
        .iter()
        .map(|(name, total)| {
            let mut row = Row::new();
            row.set("name", RowValue::Str(name.clone()));
            row.set("totalSize", RowValue::Int(*total as i64));
            row
        })
        .filter(|r| matches_all(&query.predicates, &query.segments, r))
        .collect();

    Ok(rows)
}

fn run_pipeline(
    recording: &RecordingHandle,
    options: ReaderOptions,
    ops: &[PipelineOp],
    mut rows: Vec<Row>,
) -> Result<Vec<Row>> {
    for op in ops {
        rows = match op {
            PipelineOp::DecorateByTime {
                decorator_type,
                fields,
                thread_path,
                decorator_thread_path,
            } => decorate::decorate_by_time(
                recording,
                options,
                decorator_type,
                fields,
                thread_path,
                decorator_thread_path,
                rows,
            )?,
            PipelineOp::DecorateByKey {
                decorator_type,
                key,
                decorator_key,
                fields,
            } => decorate::decorate_by_key(recording, options, decorator_type, key, decorator_key, fields, rows)?,
            other => pipeline::apply_stage(other, rows)?,
        };
    }

    Ok(rows)
}

/// §3.2/§4.3.2: validate `query.event_types` against the recording's
/// declared type names, computing a "did you mean" suggestion (prefix match
/// first, else nearest Levenshtein distance within 3) on mismatch.
fn validate_event_types(recording: &RecordingHandle, query: &Query) -> Result<()> {
    if query.root != Root::Events || query.event_types.is_empty() {
        return Ok(());
    }

    let declared = recording.declared_event_type_names()?;
    if declared.is_empty() {
        // Not every reader surfaces a usable type catalog; skip validation
        // rather than reject a possibly-valid query.
        return Ok(());
    }

    for name in &query.event_types {
        if !declared.contains(name) {
            return Err(Error::UnknownEventType {
                name: name.clone(),
                suggestion: suggest_event_type(name, &declared),
            });
        }
    }

    Ok(())
}

fn suggest_event_type(name: &str, declared: &FxHashSet<String>) -> Option<String> {
    let mut candidates: Vec<&String> = declared.iter().collect();
    candidates.sort();

    if let Some(prefix_match) = candidates
        .iter()
        .find(|d| d.starts_with(name) || name.starts_with(d.as_str()))
    {
        return Some((*prefix_match).clone());
    }

    candidates
        .into_iter()
        .map(|d| (levenshtein(name, d), d))
        .filter(|(dist, _)| *dist <= 3)
        .min_by_key(|(dist, _)| *dist)
        .map(|(_, d)| d.clone())
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let mut row: Vec<usize> = (0..=b.len()).collect();

    for i in 1..=a.len() {
        let mut prev = row[0];
        row[0] = i;

        for j in 1..=b.len() {
            let tmp = row[j];
            row[j] = if a[i - 1] == b[j - 1] {
                prev
            } else {
                1 + prev.min(row[j]).min(row[j - 1])
            };
            prev = tmp;
        }
    }

    row[b.len()]
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn levenshtein_distance_matches_known_values() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("jdk.FileRead", "jdk.FileRead"), 0);
    }

    #[test]
    fn suggest_prefers_prefix_match_over_edit_distance() {
        let mut declared = FxHashSet::default();
        declared.insert("jdk.FileReadX".to_string());
        declared.insert("jdk.SocketRead".to_string());

        let suggestion = suggest_event_type("jdk.FileRead", &declared);
        assert_eq!(suggestion.as_deref(), Some("jdk.FileReadX"));
    }
}
