// Copyright 2023 Gregory Szorc.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Resolved JFR value types.
//!
//! [Primitive] holds a scalar value decoded directly from the wire. [Value]
//! is the richer runtime tree produced once a class's fields have been
//! interpreted against its metadata: a scalar, a nested [Object], an array
//! of values, or an unresolved reference into a constants pool.
//!
//! Resolving constant pool references is deliberately a separate step (see
//! [ResolvedConstantValue] and `ConstantResolver` in the `resolver` module)
//! so that callers who only care about inline field values never pay the
//! cost of walking the constants pool.

use {
    crate::{error::Result, metadata::ClassElement, primitive::Primitive},
    std::sync::Arc,
};

/// A resolved object: an instance of a JFR class with its fields decoded.
///
/// Field values line up positionally with `class.fields`. [Object::get]
/// performs the name lookup callers actually want.
#[derive(Clone, Debug)]
pub struct Object<'resolver, 'chunk> {
    pub class: Arc<ClassElement<'chunk>>,
    pub fields: Vec<Value<'resolver, 'chunk>>,
    _marker: std::marker::PhantomData<&'resolver ()>,
}

impl<'resolver, 'chunk> Object<'resolver, 'chunk> {
    pub fn new(class: Arc<ClassElement<'chunk>>, fields: Vec<Value<'resolver, 'chunk>>) -> Self {
        Self {
            class,
            fields,
            _marker: std::marker::PhantomData,
        }
    }

    /// The name of this object's class, e.g. `jdk.ExecutionSample`.
    pub fn class_name(&self) -> &str {
        self.class.name.as_ref()
    }

    /// Look up a field's value by name.
    ///
    /// Returns `None` both when the field is absent from the class
    /// definition and (defensively) when the decoded field count doesn't
    /// match the declared field count.
    pub fn get(&self, name: &str) -> Option<&Value<'resolver, 'chunk>> {
        let index = self.class.fields.iter().position(|f| f.name == name)?;

        self.fields.get(index)
    }

    /// Iterate over (field name, value) pairs in declaration order.
    pub fn iter_fields(&self) -> impl Iterator<Item = (&str, &Value<'resolver, 'chunk>)> + '_ {
        self.class
            .fields
            .iter()
            .zip(self.fields.iter())
            .map(|(f, v)| (f.name.as_ref(), v))
    }
}

/// A fully resolved value within an event or constant pool entry.
#[derive(Clone, Debug)]
pub enum Value<'resolver, 'chunk> {
    Primitive(Primitive<'chunk>),
    Object(Object<'resolver, 'chunk>),
    Array(Vec<Value<'resolver, 'chunk>>),
    /// An unresolved reference into the constants pool for `class_id`.
    ///
    /// Index `0` conventionally denotes a null reference.
    ConstantPool { class_id: i64, constant_index: i64 },
}

impl<'resolver, 'chunk> Value<'resolver, 'chunk> {
    pub fn as_primitive(&self) -> Option<&Primitive<'chunk>> {
        if let Self::Primitive(p) = self {
            Some(p)
        } else {
            None
        }
    }

    pub fn as_object(&self) -> Option<&Object<'resolver, 'chunk>> {
        if let Self::Object(o) = self {
            Some(o)
        } else {
            None
        }
    }

    pub fn as_array(&self) -> Option<&[Value<'resolver, 'chunk>]> {
        if let Self::Array(v) = self {
            Some(v)
        } else {
            None
        }
    }

    /// Recursively expand constant pool references using `resolver`.
    ///
    /// Produces a self-contained value tree with no remaining
    /// [Value::ConstantPool] nodes (aside from ones that fail to resolve,
    /// which collapse to [ResolvedConstantValue::Missing] at that position
    /// and are represented inline as a null primitive so the tree shape is
    /// preserved).
    pub fn resolve_constants<CR>(self, resolver: &CR) -> ResolvedValue
    where
        CR: crate::resolver::ConstantResolver<'chunk>,
    {
        match self {
            Self::Primitive(p) => ResolvedValue::Primitive(p.into_owned()),
            Self::Array(items) => ResolvedValue::Array(
                items
                    .into_iter()
                    .map(|v| v.resolve_constants(resolver))
                    .collect(),
            ),
            Self::Object(o) => ResolvedValue::Object(ResolvedObject {
                class_name: o.class_name().to_string(),
                fields: o
                    .class
                    .fields
                    .iter()
                    .zip(o.fields.into_iter())
                    .map(|(f, v)| (f.name.to_string(), v.resolve_constants(resolver)))
                    .collect(),
            }),
            Self::ConstantPool {
                class_id,
                constant_index,
            } => match resolver.get_recursive(class_id, constant_index) {
                ResolvedConstantValue::Null => ResolvedValue::Primitive(OwnedPrimitive::Null),
                ResolvedConstantValue::Missing => ResolvedValue::Missing,
                ResolvedConstantValue::Value(v) => v,
            },
        }
    }
}

/// An owned, fully-resolved value tree with no further constant pool
/// indirection and no borrowed lifetime tied to chunk data.
#[derive(Clone, Debug)]
pub enum ResolvedValue {
    Primitive(OwnedPrimitive),
    Object(ResolvedObject),
    Array(Vec<ResolvedValue>),
    /// A constant pool reference that failed to resolve.
    Missing,
}

#[derive(Clone, Debug)]
pub struct ResolvedObject {
    pub class_name: String,
    pub fields: Vec<(String, ResolvedValue)>,
}

impl ResolvedObject {
    pub fn get(&self, name: &str) -> Option<&ResolvedValue> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }
}

/// Owned counterpart to [Primitive], used once values outlive chunk data.
#[derive(Clone, Debug)]
pub enum OwnedPrimitive {
    Null,
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Character(char),
    String(String),
}

impl<'chunk> Primitive<'chunk> {
    /// Convert to an owned primitive with no borrowed data.
    pub fn into_owned(self) -> OwnedPrimitive {
        match self {
            Self::Boolean(v) => OwnedPrimitive::Boolean(v),
            Self::Byte(v) => OwnedPrimitive::Byte(v),
            Self::Short(v) => OwnedPrimitive::Short(v),
            Self::Integer(v) => OwnedPrimitive::Integer(v),
            Self::Long(v) => OwnedPrimitive::Long(v),
            Self::Float(v) => OwnedPrimitive::Float(v),
            Self::Double(v) => OwnedPrimitive::Double(v),
            Self::Character(v) => OwnedPrimitive::Character(v),
            Self::NullString => OwnedPrimitive::Null,
            Self::String(v) => OwnedPrimitive::String(v.into_owned()),
            // Caller should have resolved this through the constants pool
            // before calling into_owned(); treat an unresolved reference
            // defensively as null rather than panicking.
            Self::StringConstantPool(_) => OwnedPrimitive::Null,
        }
    }
}

/// A constant pool lookup result, borrowed from the pool's backing storage.
pub enum ConstantValue<'resolver, 'chunk> {
    /// Index `0`: the canonical null reference.
    Null,
    /// The index was never populated by any constant pool event.
    Missing,
    Value(&'resolver Value<'resolver, 'chunk>),
}

/// Like [ConstantValue] but with constant references expanded recursively.
pub enum ResolvedConstantValue {
    Null,
    Missing,
    Value(ResolvedValue),
}

/// A constant pool lookup mapped through a caller-supplied function.
pub enum ConstantValueMapped<T> {
    Null,
    Missing,
    Value(Result<T>),
}

impl<T> ConstantValueMapped<T> {
    pub fn into_option(self) -> Result<Option<T>> {
        match self {
            Self::Null | Self::Missing => Ok(None),
            Self::Value(v) => v.map(Some),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn owned_primitive_from_string() {
        let p = Primitive::String(std::borrow::Cow::Borrowed("hello"));
        match p.into_owned() {
            OwnedPrimitive::String(s) => assert_eq!(s, "hello"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn resolved_object_field_lookup() {
        let obj = ResolvedObject {
            class_name: "jdk.ExecutionSample".to_string(),
            fields: vec![
                ("startTime".to_string(), ResolvedValue::Primitive(OwnedPrimitive::Long(42))),
                ("sampledThread".to_string(), ResolvedValue::Missing),
            ],
        };

        assert!(matches!(
            obj.get("startTime"),
            Some(ResolvedValue::Primitive(OwnedPrimitive::Long(42)))
        ));
        assert!(obj.get("missing").is_none());
    }
}
