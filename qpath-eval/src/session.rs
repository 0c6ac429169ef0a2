// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The variable-caching session contract (§4.6).
//!
//! A query result can be bound to a name (`$v := events/...`) and reused by
//! later queries without re-streaming the recording. Since [crate::row::Row]
//! is already an owned, chunk-lifetime-free value, caching is just keeping
//! the materialized `Vec<Row>` around and replaying pipeline stages over it.
//! `decorateByTime`/`decorateByKey` need a second streaming pass against the
//! recording itself, which a cached variable no longer has access to, so
//! those two stages are skipped (with a warning) when replayed — matching
//! [crate::pipeline::apply_stage]'s own no-op behavior for them.

use std::path::{Path, PathBuf};

use jfr_reader::recording::{ReaderOptions, RecordingHandle};
use qpath::ast::{PipelineOp, Query};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{error::Result, evaluate, pipeline, row::Row};

/// A previously evaluated query result, kept around under a variable name.
struct CachedVariable {
    rows: Vec<Row>,
    event_types: Option<FxHashSet<String>>,
}

/// Holds one open recording plus whatever variables have been bound against
/// it so far.
pub struct Session {
    recording_path: PathBuf,
    recording: RecordingHandle,
    options: ReaderOptions,
    variables: FxHashMap<String, CachedVariable>,
}

impl Session {
    pub fn open(path: impl AsRef<Path>, options: ReaderOptions) -> Result<Self> {
        let recording_path = path.as_ref().to_path_buf();
        let recording = RecordingHandle::open(&recording_path)?;

        Ok(Self {
            recording_path,
            recording,
            options,
            variables: FxHashMap::default(),
        })
    }

    pub fn recording_path(&self) -> &Path {
        &self.recording_path
    }

    pub fn available_event_types(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.recording.declared_event_type_names()?.into_iter().collect();
        names.sort();
        Ok(names)
    }

    /// Evaluate `query` against the open recording, returning its rows.
    pub fn evaluate(&self, query: &Query) -> Result<Vec<Row>> {
        evaluate::evaluate(&self.recording, query, self.options)
    }

    /// Evaluate `query` and cache its result rows under `name` (`$name :=
    /// query`), for reuse by [Session::get]/[Session::apply_to_rows] without
    /// re-streaming the recording.
    pub fn assign(&mut self, name: impl Into<String>, query: &Query) -> Result<()> {
        let rows = self.evaluate(query)?;
        let event_types = if query.event_types.is_empty() {
            None
        } else {
            Some(query.event_types.iter().cloned().collect())
        };
        self.variables.insert(name.into(), CachedVariable { rows, event_types });
        Ok(())
    }

    /// The rows cached under `name`, if any.
    pub fn get(&self, name: &str) -> Option<&[Row]> {
        self.variables.get(name).map(|v| v.rows.as_slice())
    }

    /// Replay `pipeline` against a previously bound variable's rows. Any
    /// `decorateByTime`/`decorateByKey` stage is skipped, since a cached
    /// variable has no recording access of its own.
    pub fn apply_to_rows(&self, name: &str, pipeline_ops: &[PipelineOp]) -> Result<Vec<Row>> {
        let Some(cached) = self.variables.get(name) else {
            return Ok(Vec::new());
        };

        let mut rows = cached.rows.clone();

        for op in pipeline_ops {
            rows = match op {
                PipelineOp::DecorateByTime { .. } | PipelineOp::DecorateByKey { .. } => {
                    tracing::warn!(
                        variable = name,
                        "skipping decoration stage against a cached variable; rebind the query to rerun it"
                    );
                    rows
                }
                other => pipeline::apply_stage(other, rows)?,
            };
        }

        Ok(rows)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::row::RowValue;

    fn session_with_variable(rows: Vec<Row>) -> (FxHashMap<String, CachedVariable>, &'static str) {
        let mut variables = FxHashMap::default();
        variables.insert(
            "v".to_string(),
            CachedVariable {
                rows,
                event_types: None,
            },
        );
        (variables, "v")
    }

    #[test]
    fn apply_to_rows_skips_missing_variable() {
        let (variables, _) = session_with_variable(Vec::new());
        assert!(variables.get("missing").is_none());
    }

    #[test]
    fn apply_to_rows_replays_count_over_cached_rows() {
        let mut row = Row::new();
        row.set("bytes", RowValue::Int(10));
        let (variables, name) = session_with_variable(vec![row.clone(), row]);

        let cached = variables.get(name).unwrap();
        let result = pipeline::apply_stage(&PipelineOp::Count, cached.rows.clone()).unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].get("count"), Some(&RowValue::Int(2)));
    }
}
