// Copyright 2023 Gregory Szorc.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Multi chunk recording file handling.
//!
//! This module defines types that provide a high-level interface for reading
//! JFR data from multiple chunks. We refer to multi-chunk inputs as a
//! *recording*. [RecordingHandle] is the entry point used by the query
//! evaluator: it resolves a path or stream into a deterministic sequence of
//! in-memory chunks and exposes chunk summaries, metadata lookups, constant
//! pool introspection and streaming event iteration.

use crate::{
    chunk::{ChunkHeader, ChunkReader, SliceReader},
    error::{Error, Result},
    event::ChunkEvent,
    resolver::TimeResolver,
    value::ResolvedValue,
};
use rustc_hash::FxHashSet;
use std::{
    io::{Read, Seek, SeekFrom},
    path::Path,
};

/// Governs how [RecordingHandle::stream_events] reacts to a chunk it cannot
/// parse.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum OnCorruptChunk {
    /// Log and move on to the next chunk.
    Skip,
    /// Surface the error to the caller and stop streaming.
    #[default]
    Propagate,
}

/// Configuration accepted by [RecordingHandle] operations.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReaderOptions {
    pub on_corrupt_chunk: OnCorruptChunk,
}

/// Summary information about a single chunk, cheap to compute without
/// resolving any event data.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChunkSummary {
    pub index: usize,
    pub offset: u64,
    pub size: u64,
    pub start_nanos: u64,
    pub start_ticks: u64,
    pub tick_frequency: u64,
    pub duration_nanos: u64,
    pub compressed: bool,
}

/// A flattened, owned view of a declared type's shape, suitable for display
/// or programmatic inspection independent of any particular chunk's backing
/// buffer.
#[derive(Clone, Debug)]
pub struct TypeInfo {
    pub name: String,
    pub super_type: Option<String>,
    pub label: Option<String>,
    pub description: Option<String>,
    pub fields: Vec<FieldInfo>,
}

/// Pull the single string value out of a `jdk.jfr.Label`/`jdk.jfr.Description`
/// annotation attached to a class, matching it up against the class table
/// since [crate::metadata::AnnotationElement] only carries a type id.
fn annotation_string_value<'a>(
    annotations: &[crate::metadata::AnnotationElement<'a>],
    classes_by_id: &rustc_hash::FxHashMap<i64, &crate::metadata::ClassElement<'a>>,
    class_name: &str,
) -> Option<String> {
    annotations.iter().find_map(|a| {
        let class = classes_by_id.get(&a.type_id)?;

        if class.name.as_ref() != class_name {
            return None;
        }

        match crate::annotations::AnnotationValue::from_elements(a, class).ok()? {
            crate::annotations::AnnotationValue::Label(l) => Some(l.to_string()),
            crate::annotations::AnnotationValue::Description(d) => Some(d.to_string()),
            _ => None,
        }
    })
}

#[derive(Clone, Debug)]
pub struct FieldInfo {
    pub name: String,
    pub type_name: Option<String>,
    pub is_array: bool,
}

/// Allows a [RecordingHandle::stream_events] visitor to terminate iteration
/// early, e.g. once a query's row limit has been satisfied.
#[derive(Default)]
pub struct StreamControl {
    aborted: bool,
}

impl StreamControl {
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }
}

/// A resolved, in-memory recording: an ordered sequence of chunk byte buffers.
///
/// Chunks are read eagerly at construction. This trades memory for the
/// simplicity of letting every later operation borrow chunk data with a
/// stable lifetime; recordings large enough for this to matter are out of
/// scope (see the non-goals around streaming-from-disk incremental reads).
pub struct RecordingHandle {
    chunks: Vec<Vec<u8>>,
}

impl RecordingHandle {
    /// Open a recording from a path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_stream(file)
    }

    /// Open a recording from any readable, seekable stream.
    pub fn from_stream<T: Read + Seek>(reader: T) -> Result<Self> {
        let mut fr = FileReader::from_stream(reader)?;
        let mut chunks = Vec::new();

        while let Some(chunk) = fr.next_chunk_data()? {
            chunks.push(chunk);
        }

        if chunks.is_empty() {
            return Err(Error::InvalidFormat);
        }

        Ok(Self { chunks })
    }

    fn slice_reader(&self, index: usize) -> Result<SliceReader<'_>> {
        let data = self
            .chunks
            .get(index)
            .ok_or_else(|| Error::CorruptRecording {
                chunk_index: index,
                offset: 0,
                reason: "chunk index out of range".to_string(),
            })?;

        SliceReader::new(data).map(|(_, reader)| reader)
    }

    /// Number of chunks in this recording.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Summaries for every chunk in the recording, cheapest-possible to compute.
    pub fn list_chunks(&self) -> Result<Vec<ChunkSummary>> {
        let mut offset = 0u64;
        let mut out = Vec::with_capacity(self.chunks.len());

        for (index, data) in self.chunks.iter().enumerate() {
            let (_, header) = ChunkHeader::parse(data).map_err(|e| -> Error { e.into() })?;

            out.push(ChunkSummary {
                index,
                offset,
                size: data.len() as u64,
                start_nanos: header.nanoseconds_since_epoch,
                start_ticks: header.start_ticks,
                tick_frequency: header.ticks_per_second,
                duration_nanos: header.duration_nanoseconds,
                compressed: header.is_compressed(),
            });

            offset += data.len() as u64;
        }

        Ok(out)
    }

    /// Load type information, optionally filtered to a single declared type name.
    ///
    /// Types are unioned across all chunks: the same type name may be
    /// declared repeatedly (with possibly different field shapes between
    /// chunks); each declaration is returned.
    pub fn load_metadata(&self, type_name: Option<&str>) -> Result<Vec<TypeInfo>> {
        let mut out = Vec::new();

        for index in 0..self.chunks.len() {
            let reader = self.slice_reader(index)?;
            let metadata = reader.metadata()?;

            let names_by_id: rustc_hash::FxHashMap<i64, &str> = metadata
                .root
                .metadata
                .classes
                .iter()
                .map(|c| (c.id, c.name.as_ref()))
                .collect();

            let classes_by_id: rustc_hash::FxHashMap<i64, &crate::metadata::ClassElement> =
                metadata
                    .root
                    .metadata
                    .classes
                    .iter()
                    .map(|c| (c.id, c))
                    .collect();

            for class in metadata.root.metadata.classes.iter() {
                if let Some(name) = type_name {
                    if class.name.as_ref() != name {
                        continue;
                    }
                }

                out.push(TypeInfo {
                    name: class.name.to_string(),
                    super_type: class.super_type.as_ref().map(|s| s.to_string()),
                    label: annotation_string_value(
                        &class.annotations,
                        &classes_by_id,
                        "jdk.jfr.Label",
                    ),
                    description: annotation_string_value(
                        &class.annotations,
                        &classes_by_id,
                        "jdk.jfr.Description",
                    ),
                    fields: class
                        .fields
                        .iter()
                        .map(|f| FieldInfo {
                            name: f.name.to_string(),
                            type_name: names_by_id.get(&f.type_id).map(|s| s.to_string()),
                            is_array: f.is_array_type(),
                        })
                        .collect(),
                });
            }
        }

        Ok(out)
    }

    /// The set of event type names declared anywhere in the recording.
    ///
    /// Used to validate a query's `event_types` clause with a helpful
    /// "did-you-mean" suggestion on mismatch.
    pub fn declared_event_type_names(&self) -> Result<FxHashSet<String>> {
        let mut names = FxHashSet::default();

        for index in 0..self.chunks.len() {
            let reader = self.slice_reader(index)?;
            let metadata = reader.metadata()?;

            names.extend(
                metadata
                    .root
                    .metadata
                    .classes
                    .iter()
                    .map(|c| c.name.to_string()),
            );
        }

        Ok(names)
    }

    /// Total decoded byte size contributed by each constant pool type, summed
    /// across chunks.
    pub fn load_constant_pool_summary(&self) -> Result<Vec<(String, u64)>> {
        let mut totals: Vec<(String, u64)> = Vec::new();

        for index in 0..self.chunks.len() {
            let reader = self.slice_reader(index)?;
            let resolver = reader.resolver()?;
            let cpv = resolver.constant_pool_values()?;

            for (class_id, _idx, _value) in cpv.iter_all() {
                let name = resolver.class_name(class_id).unwrap_or("<unknown>");

                match totals.iter_mut().find(|(n, _)| n == name) {
                    Some((_, total)) => *total += 1,
                    None => totals.push((name.to_string(), 1)),
                }
            }
        }

        Ok(totals)
    }

    /// Fully resolved constant pool entries for a single type name, filtered
    /// by a caller-supplied predicate over the resolved value.
    pub fn load_constant_pool_entries(
        &self,
        type_name: &str,
        predicate: impl Fn(&ResolvedValue) -> bool,
    ) -> Result<Vec<(i64, ResolvedValue)>> {
        let mut out = Vec::new();

        for index in 0..self.chunks.len() {
            let reader = self.slice_reader(index)?;
            let resolver = reader.resolver()?;
            let cpv = resolver.constant_pool_values()?;

            let Some(class_id) = resolver.class_id(type_name) else {
                continue;
            };

            for (cid, idx, value) in cpv.iter_all() {
                if cid != class_id {
                    continue;
                }

                let resolved = value.clone().resolve_constants(&cpv);

                if predicate(&resolved) {
                    out.push((idx, resolved));
                }
            }
        }

        Ok(out)
    }

    /// Stream every non-special event across every chunk to `visitor`.
    ///
    /// Events arrive fully resolved: every constant pool reference reachable
    /// from the event has already been expanded, so `visitor` can hold onto
    /// the value past the lifetime of any particular chunk. Calling
    /// `control.abort()` stops iteration after the current event, including
    /// across chunk boundaries.
    ///
    /// `visitor` also receives the originating chunk's [TimeResolver], since
    /// an event's `startTime`/`duration` fields are chunk-local tick counts:
    /// a caller comparing timestamps across chunks (or against wall-clock
    /// time) must convert them first, and each chunk has its own tick
    /// origin and frequency.
    pub fn stream_events(
        &self,
        options: ReaderOptions,
        event_types: Option<&FxHashSet<String>>,
        mut visitor: impl FnMut(&str, ResolvedValue, &TimeResolver, &mut StreamControl) -> Result<()>,
    ) -> Result<()> {
        let mut control = StreamControl::default();

        for index in 0..self.chunks.len() {
            if control.is_aborted() {
                break;
            }

            let reader = match self.slice_reader(index) {
                Ok(r) => r,
                Err(e) => return Self::handle_chunk_error(options, index, e),
            };

            let resolver = match reader.resolver() {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(chunk = index, error = %e, "failed to build resolver for chunk");
                    match Self::handle_chunk_error(options, index, e) {
                        Ok(()) => continue,
                        Err(e) => return Err(e),
                    }
                }
            };

            let cpv = match resolver.constant_pool_values() {
                Ok(v) => v,
                Err(e) => match Self::handle_chunk_error(options, index, e) {
                    Ok(()) => continue,
                    Err(e) => return Err(e),
                },
            };

            tracing::debug!(chunk = index, "streaming events");

            for event in reader.iter_event_records() {
                if control.is_aborted() {
                    break;
                }

                let event = match event {
                    Ok(e) => e,
                    Err(e) => return Self::handle_chunk_error(options, index, e),
                };

                if event.is_special_event() {
                    continue;
                }

                let Some(type_name) = resolver.class_name(event.header.event_type) else {
                    continue;
                };

                if let Some(wanted) = event_types {
                    if !wanted.contains(type_name) {
                        continue;
                    }
                }

                let type_name = type_name.to_string();

                let resolved = match resolver.parse_event_resolved(
                    event.fields_data()?,
                    event.header.event_type,
                    &cpv,
                ) {
                    Ok(v) => v,
                    Err(e) => match Self::handle_chunk_error(options, index, e) {
                        Ok(()) => continue,
                        Err(e) => return Err(e),
                    },
                };

                visitor(&type_name, resolved, resolver.time_resolver(), &mut control)?;
            }
        }

        Ok(())
    }

    fn handle_chunk_error(options: ReaderOptions, chunk_index: usize, err: Error) -> Result<()> {
        match options.on_corrupt_chunk {
            OnCorruptChunk::Propagate => Err(Error::CorruptRecording {
                chunk_index,
                offset: 0,
                reason: err.to_string(),
            }),
            OnCorruptChunk::Skip => {
                tracing::warn!(chunk = chunk_index, error = %err, "skipping corrupt chunk");
                Ok(())
            }
        }
    }
}

/// Read JFR files as a sequence of chunk byte buffers.
pub struct FileReader<T: Read + Seek> {
    reader: T,
    offset: u64,
}

impl<T: Read + Seek> FileReader<T> {
    /// Construct an instance from a readable and seekable stream.
    ///
    /// It isn't performance critical for the stream to be buffered as we currently
    /// only support APIs for reading entire chunks. So buffering won't save
    /// that many system calls.
    pub fn from_stream(mut reader: T) -> Result<Self> {
        let offset = reader.stream_position()?;

        Ok(Self { reader, offset })
    }

    /// Read the data belonging to the next chunk from the underlying stream.
    ///
    /// Evaluates to [None] if it looks like we reached end of file.
    pub fn next_chunk_data(&mut self) -> Result<Option<Vec<u8>>> {
        self.reader.seek(SeekFrom::Start(self.offset))?;

        let mut buf = vec![0u8; ChunkHeader::HEADER_SIZE as usize];

        match self.reader.read(&mut buf)? {
            0 => {
                return Ok(None);
            }
            x if x == ChunkHeader::HEADER_SIZE as usize => {}
            x => {
                return Err(Error::Io(format!(
                    "read {} of {} bytes necessary to decode chunk header",
                    x,
                    ChunkHeader::HEADER_SIZE,
                )));
            }
        }

        // We let the nom parser guide us instead of codifying the logic here.
        let needed = match SliceReader::new(&buf) {
            Ok(_) => {
                // This should never happen: a header-only buffer never
                // contains a full chunk.
                0
            }
            Err(Error::ParseIncomplete(nom::Needed::Size(needed))) => needed.into(),
            Err(Error::ParseIncomplete(nom::Needed::Unknown)) => {
                return Err(Error::InvalidFormat);
            }
            Err(err) => {
                return Err(err);
            }
        };

        buf.reserve_exact(needed);
        buf.extend(std::iter::repeat(0u8).take(needed));

        self.reader
            .read_exact(&mut buf[ChunkHeader::HEADER_SIZE as usize..])?;

        self.offset = self.reader.stream_position()?;

        Ok(Some(buf))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn open_rejects_non_jfr_data() {
        let data = b"not a jfr recording at all, just some bytes".to_vec();
        let result = RecordingHandle::from_stream(std::io::Cursor::new(data));
        assert!(result.is_err());
    }
}
