// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! [Row] and [RowValue]: the uniform output shape of the evaluator and of
//! every pipeline operator.
//!
//! A row is modeled as an insertion-ordered key to value mapping rather than
//! a hash map, per the design note that operators should copy-on-write
//! rather than mutate upstream rows: cloning a `Vec` of pairs is cheap and
//! keeps column order (and therefore output order) stable without an
//! auxiliary ordering index.

use jfr_reader::{
    resolver::TimeResolver,
    value::{OwnedPrimitive, ResolvedValue},
};

/// A single value flowing through the pipeline.
///
/// This deliberately collapses the width distinctions JFR's wire format
/// cares about (`byte`/`short`/`int`/`long`, `float`/`double`) into one
/// integer and one floating-point variant: nothing past the reader needs to
/// know which declared Java type a number came from.
#[derive(Clone, Debug, PartialEq)]
pub enum RowValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<RowValue>),
    Map(Vec<(String, RowValue)>),
}

impl RowValue {
    pub fn is_null(&self) -> bool {
        matches!(self, RowValue::Null)
    }

    pub fn as_array(&self) -> Option<&[RowValue]> {
        match self {
            RowValue::Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(String, RowValue)]> {
        match self {
            RowValue::Map(v) => Some(v),
            _ => None,
        }
    }

    pub fn map_get(&self, name: &str) -> Option<&RowValue> {
        self.as_map()?.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Truthiness per §4.5.1: `bool→bool | number→≠0 | string→non-empty |
    /// null→false | other→true`.
    pub fn truthy(&self) -> bool {
        match self {
            RowValue::Null => false,
            RowValue::Bool(b) => *b,
            RowValue::Int(i) => *i != 0,
            RowValue::Float(f) => *f != 0.0,
            RowValue::Str(s) => !s.is_empty(),
            RowValue::Array(_) | RowValue::Map(_) => true,
        }
    }

    /// Numeric coercion per §4.5.1: `null → 0.0`; strings parsed as double,
    /// non-parseable → 0.0.
    pub fn to_numeric(&self) -> f64 {
        match self {
            RowValue::Null => 0.0,
            RowValue::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            RowValue::Int(i) => *i as f64,
            RowValue::Float(f) => *f,
            RowValue::Str(s) => s.trim().parse().unwrap_or(0.0),
            RowValue::Array(_) | RowValue::Map(_) => 0.0,
        }
    }

    /// Stringification used by templates and string-producing functions.
    /// Nulls stringify to the empty string (§4.5.1).
    pub fn to_display_string(&self) -> String {
        match self {
            RowValue::Null => String::new(),
            RowValue::Bool(b) => b.to_string(),
            RowValue::Int(i) => i.to_string(),
            RowValue::Float(f) => format_float(*f),
            RowValue::Str(s) => s.clone(),
            RowValue::Array(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_display_string()).collect();
                format!("[{}]", parts.join(", "))
            }
            RowValue::Map(fields) => {
                let parts: Vec<String> = fields
                    .iter()
                    .map(|(k, v)| format!("{k}={}", v.to_display_string()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
        }
    }

    pub fn from_resolved(value: &ResolvedValue) -> Self {
        match value {
            ResolvedValue::Missing => RowValue::Null,
            ResolvedValue::Array(items) => {
                RowValue::Array(items.iter().map(RowValue::from_resolved).collect())
            }
            ResolvedValue::Object(obj) => RowValue::Map(
                obj.fields
                    .iter()
                    .map(|(name, v)| (name.clone(), RowValue::from_resolved(v)))
                    .collect(),
            ),
            ResolvedValue::Primitive(p) => match p {
                OwnedPrimitive::Null => RowValue::Null,
                OwnedPrimitive::Boolean(b) => RowValue::Bool(*b),
                OwnedPrimitive::Byte(v) => RowValue::Int(*v as i64),
                OwnedPrimitive::Short(v) => RowValue::Int(*v as i64),
                OwnedPrimitive::Integer(v) => RowValue::Int(*v as i64),
                OwnedPrimitive::Long(v) => RowValue::Int(*v),
                OwnedPrimitive::Float(v) => RowValue::Float(*v as f64),
                OwnedPrimitive::Double(v) => RowValue::Float(*v),
                OwnedPrimitive::Character(c) => RowValue::Str(c.to_string()),
                OwnedPrimitive::String(s) => RowValue::Str(s.clone()),
            },
        }
    }
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f == f.trunc() && f.is_finite() {
        format!("{f:.1}")
    } else {
        f.to_string()
    }
}

/// An ordered mapping from column name to value: the uniform output of the
/// evaluator and every pipeline operator.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, RowValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_event(type_name: &str, value: RowValue) -> Self {
        let mut row = Self::new();
        row.set("$eventType", RowValue::Str(type_name.to_string()));

        match value {
            RowValue::Map(fields) => {
                for (k, v) in fields {
                    row.set(k, v);
                }
            }
            other => row.set("$value", other),
        }

        row
    }

    /// Rewrite `startTime`/`duration` — the tick-valued fields every
    /// `jdk.jfr` event declares — from chunk-local ticks into epoch
    /// nanoseconds and a nanosecond duration, using the originating chunk's
    /// [TimeResolver]. `decorateByTime`/`timeRange` key off these fields
    /// directly, and a raw tick count is meaningless once compared across
    /// chunks, each of which has its own tick origin and frequency.
    pub fn resolve_event_time(&mut self, time_resolver: &TimeResolver) {
        if let Some(&RowValue::Int(ticks)) = self.get("startTime") {
            self.set("startTime", RowValue::Int(time_resolver.epoch_nanoseconds(ticks)));
        }
        if let Some(&RowValue::Int(ticks)) = self.get("duration") {
            self.set("duration", RowValue::Int(time_resolver.delta_nanoseconds(0, ticks)));
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: RowValue) {
        let name = name.into();
        if let Some(existing) = self.columns.iter_mut().find(|(k, _)| *k == name) {
            existing.1 = value;
        } else {
            self.columns.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&RowValue> {
        self.columns.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn columns(&self) -> &[(String, RowValue)] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<(String, RowValue)> {
        self.columns
    }

    /// Navigate `path` starting at this row's top-level columns, applying
    /// the automatic array-iteration rule from §4.3.1: when the current
    /// value is an array and the next token is a field name, the walk fans
    /// out across every element and continues the remaining path on each.
    ///
    /// Returns the list of values reached by every branch of the walk (zero,
    /// one, or many, depending on how many arrays were crossed).
    pub fn project(&self, path: &[qpath::ast::Segment]) -> Vec<RowValue> {
        project_value(&RowValue::Map(self.columns.clone()), path)
    }

    /// Navigate `path` like [Row::project], but without §4.3.1's array
    /// fan-out: a step that lands on an array stops there and yields the
    /// array itself rather than continuing the walk once per element. Used
    /// by `select`-expression field references (§4.6), which treat a path
    /// crossing an array as selecting the array, not its elements.
    pub fn project_no_fanout(&self, path: &[qpath::ast::Segment]) -> RowValue {
        let mut current = RowValue::Map(self.columns.clone());

        for segment in path {
            match &current {
                RowValue::Map(_) => {
                    let Some(field) = current.map_get(&segment.name) else {
                        return RowValue::Null;
                    };
                    current = apply_index(field.clone(), segment.index.as_ref())
                        .into_iter()
                        .next()
                        .unwrap_or(RowValue::Null);
                }
                RowValue::Array(_) => return current,
                _ => return RowValue::Null,
            }
        }

        current
    }
}

/// Navigate `path` starting at an arbitrary value rather than a [Row]'s
/// top-level columns, applying the same fan-out rule as [Row::project].
/// Shared by predicate-depth scoping ([crate::predicate]), which needs to
/// walk a path from the sub-structure reached at a bracket's position
/// rather than from the row's root.
pub(crate) fn project_value(value: &RowValue, path: &[qpath::ast::Segment]) -> Vec<RowValue> {
    let mut values = vec![value.clone()];

    for segment in path {
        let mut next = Vec::new();
        for v in &values {
            step(v, segment, &mut next);
        }
        values = next;
    }

    values
}

fn apply_index(value: RowValue, index: Option<&qpath::ast::SegmentIndex>) -> Vec<RowValue> {
    use qpath::ast::SegmentIndex;

    match index {
        None => vec![value],
        Some(SegmentIndex::Element(i)) => match value.as_array() {
            Some(items) => resolve_index(items.len(), *i)
                .map(|idx| vec![items[idx].clone()])
                .unwrap_or_default(),
            None => Vec::new(),
        },
        Some(SegmentIndex::Slice { start, end }) => match value.as_array() {
            Some(items) => {
                let len = items.len() as i64;
                let start = (*start).max(0).min(len) as usize;
                let end = (*end).max(0).min(len) as usize;
                if start >= end {
                    vec![RowValue::Array(Vec::new())]
                } else {
                    vec![RowValue::Array(items[start..end].to_vec())]
                }
            }
            None => Vec::new(),
        },
    }
}

fn resolve_index(len: usize, index: i64) -> Option<usize> {
    if index >= 0 {
        let idx = index as usize;
        (idx < len).then_some(idx)
    } else {
        let idx = len as i64 + index;
        (idx >= 0).then_some(idx as usize)
    }
}

/// Navigate one path segment from `value`, fanning out across arrays.
fn step(value: &RowValue, segment: &qpath::ast::Segment, out: &mut Vec<RowValue>) {
    match value {
        RowValue::Null => {}
        RowValue::Array(items) => {
            for item in items {
                step(item, segment, out);
            }
        }
        RowValue::Map(_) => {
            if let Some(field) = value.map_get(&segment.name) {
                out.extend(apply_index(field.clone(), segment.index.as_ref()));
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use qpath::ast::{Segment, SegmentIndex};

    fn sample_row() -> Row {
        let mut row = Row::new();
        row.set(
            "frames",
            RowValue::Array(vec![
                RowValue::Map(vec![("name".to_string(), RowValue::Str("run".to_string()))]),
                RowValue::Map(vec![(
                    "name".to_string(),
                    RowValue::Str("call".to_string()),
                )]),
            ]),
        );
        row
    }

    #[test]
    fn project_fans_out_over_array() {
        let row = sample_row();
        let values = row.project(&[Segment::bare("frames"), Segment::bare("name")]);

        assert_eq!(
            values,
            vec![
                RowValue::Str("run".to_string()),
                RowValue::Str("call".to_string())
            ]
        );
    }

    #[test]
    fn project_element_index_selects_one() {
        let row = sample_row();
        let values = row.project(&[
            Segment {
                name: "frames".to_string(),
                index: Some(SegmentIndex::Element(1)),
            },
            Segment::bare("name"),
        ]);

        assert_eq!(values, vec![RowValue::Str("call".to_string())]);
    }

    #[test]
    fn project_missing_field_is_empty() {
        let row = sample_row();
        assert!(row.project(&[Segment::bare("nope")]).is_empty());
    }

    #[test]
    fn truthy_matches_spec_table() {
        assert!(!RowValue::Null.truthy());
        assert!(!RowValue::Int(0).truthy());
        assert!(RowValue::Int(-1).truthy());
        assert!(!RowValue::Str(String::new()).truthy());
        assert!(RowValue::Str("x".to_string()).truthy());
    }

    #[test]
    fn numeric_coercion_defaults_to_zero() {
        assert_eq!(RowValue::Null.to_numeric(), 0.0);
        assert_eq!(RowValue::Str("not a number".to_string()).to_numeric(), 0.0);
        assert_eq!(RowValue::Str("3.5".to_string()).to_numeric(), 3.5);
    }
}
