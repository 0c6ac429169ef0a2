// Copyright 2023 Gregory Szorc.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The JFR binary format, and how it maps onto this crate's four query
//! roots (`events`, `metadata`, `chunks`, `cp`).
//!
//! # Chunks
//!
//! A recording is a concatenation of *chunks*, each self-contained: a
//! 68-byte header (magic `FLR\0`) followed by a variable-length stream of
//! events. The header carries timing (start nanos, start ticks, tick
//! frequency, duration) and the byte offsets of the chunk's metadata block
//! and its last checkpoint event, so both can be located without a scan.
//! [crate::recording::RecordingHandle::list_chunks] surfaces one
//! [crate::recording::ChunkSummary] per chunk — this is the `chunks` root.
//!
//! An event record only declares its length and a numeric class ID; walking
//! records this way yields counts and sizes but nothing about field values,
//! since a class ID means nothing without the metadata that defines it.
//!
//! # Metadata
//!
//! The metadata block is a string table (for deduplication) plus a list of
//! *classes*: every type referenced anywhere in the chunk, each with a name,
//! super type, annotations, field list, and setting list. A class's fields
//! are exactly what they sound like — the declared properties of a Java
//! class or event, each typed and optionally array- or constant-pool-valued.
//! Annotations (`jdk.jfr.Label`, `Description`, and others this crate treats
//! opaquely) are metadata JFR itself attaches to types and fields rather
//! than properties an application author wrote.
//! [crate::recording::RecordingHandle::load_metadata] decodes this block
//! into [crate::recording::TypeInfo] — the `metadata` root.
//!
//! # Checkpoint events and constant pools
//!
//! Checkpoint events are interleaved with regular events, sharing the same
//! header shape but always under class ID 1 and carrying a bit mask marking
//! special checkpoint flavors. Each chunk header points at the chunk's last
//! checkpoint, and each checkpoint points at the one before it, so the chain
//! can be walked backward without scanning every event.
//!
//! A checkpoint holds one or more *constant pools*: per-class mappings from
//! an integer index to a decoded value. A field can be declared to store its
//! value inline or as an index into that field's constant pool — whichever
//! it is, the choice is fixed for every instance of that class within the
//! chunk. Pooling lets a value referenced by many events (a stack trace, a
//! thread) live once on disk; it also lets a writer append pool entries
//! incrementally without rewriting earlier file content.
//! [crate::recording::RecordingHandle::load_constant_pool_summary] and
//! `load_constant_pool_entries` expose this as the `cp` root.
//!
//! # Events
//!
//! Past the chunk header, each event record holds its size, its class ID,
//! and the field values for that class in declaration order — opaque bytes
//! until interpreted against the metadata. This is the `events` root, and
//! the one QPath queries most often: `events/jdk.ExecutionSample/...`.
//!
//! # Resolving constant pool references
//!
//! A pooled value can itself contain pooled references: an event's
//! `java.lang.Thread` field is commonly a constant pool index, and that
//! `Thread`'s `group` field (a `jdk.types.ThreadGroup`) may itself be pooled,
//! whose own `parent` field is a `jdk.types.ThreadGroup` that can again be
//! pooled. [crate::value::Value::resolve_constants] walks this chain
//! recursively so a query never sees an unresolved reference.
