// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use thiserror::Error;

/// Errors raised while parsing a QPath query string.
///
/// The parser never panics: every malformed input is reported as a
/// [Error::Syntax] carrying the byte offset into the input where the
/// failure was detected.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Error {
    #[error("syntax error at byte {position}: {message}")]
    Syntax { position: usize, message: String },
}

impl Error {
    pub fn syntax(position: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            position,
            message: message.into(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
