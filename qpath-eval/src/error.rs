// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use thiserror::Error;

/// Errors raised while evaluating a QPath query against a recording.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] qpath::Error),

    #[error(transparent)]
    Reader(#[from] jfr_reader::error::Error),

    #[error("unknown event type {name:?}{}", suggestion.as_ref().map(|s| format!(", did you mean {s:?}?")).unwrap_or_default())]
    UnknownEventType {
        name: String,
        suggestion: Option<String>,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
