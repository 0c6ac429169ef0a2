// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `jfrq <recording> <query>`: a minimal, non-interactive runner for a
//! single QPath query against a single recording.
//!
//! This deliberately stays out of the table/JSON/CSV rendering business —
//! rows print in a line-delimited debug format. A real frontend belongs in
//! a separate crate built on top of `qpath-eval`.

use std::process::ExitCode;

use jfr_reader::recording::{ReaderOptions, RecordingHandle};
use qpath_eval::evaluate;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(recording_path), Some(query_text)) = (args.next(), args.next()) else {
        eprintln!("usage: jfrq <recording> <query>");
        return ExitCode::FAILURE;
    };

    if let Err(err) = run(&recording_path, &query_text) {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn run(recording_path: &str, query_text: &str) -> Result<(), Box<dyn std::error::Error>> {
    let query = qpath::parse(query_text)?;
    let recording = RecordingHandle::open(recording_path)?;

    let rows = evaluate(&recording, &query, ReaderOptions::default())?;

    for row in &rows {
        println!("{row:?}");
    }

    tracing::info!(row_count = rows.len(), "query complete");

    Ok(())
}
