// Copyright 2023 Gregory Szorc.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The two `jdk.jfr` annotations the metadata root surfaces: `Label` and
//! `Description`. A JFR type or field can carry dozens of other annotations
//! (`Timespan`, `DataAmount`, `Period`, and so on), but nothing past
//! [crate::recording::RecordingHandle::load_metadata] reads them, so they
//! collapse into [AnnotationValue::Unknown] rather than getting a dedicated
//! variant each.

use crate::{
    error::{Error, Result},
    metadata::{AnnotationElement, ClassElement},
};
use std::{borrow::Cow, ops::Deref};

/// A `jdk.jfr.Label` annotation: the human-readable name for a type or field.
#[derive(Clone, Debug)]
pub struct Label<'a>(Cow<'a, str>);

impl<'a> Deref for Label<'a> {
    type Target = Cow<'a, str>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'a> Label<'a> {
    fn from_element(el: &AnnotationElement<'a>) -> Result<Self> {
        let (_, value) = el
            .values
            .first()
            .ok_or_else(|| Error::AnnotationParse("jdk.jfr.Label lacks a value".to_string()))?;

        Ok(Self(value.clone()))
    }
}

/// A `jdk.jfr.Description` annotation: the longer prose description of a
/// type or field.
#[derive(Clone, Debug)]
pub struct Description<'a>(pub Cow<'a, str>);

impl<'a> Deref for Description<'a> {
    type Target = Cow<'a, str>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'a> Description<'a> {
    fn from_element(el: &AnnotationElement<'a>) -> Result<Self> {
        let (_, value) = el.values.first().ok_or_else(|| {
            Error::AnnotationParse("jdk.jfr.Description lacks a value".to_string())
        })?;

        Ok(Self(value.clone()))
    }
}

/// A parsed annotation. Anything other than `Label`/`Description` is kept as
/// its raw key/value pairs rather than decoded into a dedicated type.
#[derive(Clone, Debug)]
pub enum AnnotationValue<'a> {
    Label(Label<'a>),
    Description(Description<'a>),
    Unknown(Vec<(Cow<'a, str>, Cow<'a, str>)>),
}

impl<'a> AnnotationValue<'a> {
    /// Construct a parsed annotation from its raw metadata [AnnotationElement]
    /// and associated [ClassElement].
    pub fn from_elements(annotation: &AnnotationElement<'a>, class: &ClassElement<'a>) -> Result<Self> {
        if annotation.type_id != class.id {
            return Err(Error::AnnotationParse(format!(
                "class id mismatch: {} != {}",
                annotation.type_id, class.id
            )));
        }

        match class.name.as_ref() {
            "jdk.jfr.Label" => Ok(Self::Label(Label::from_element(annotation)?)),
            "jdk.jfr.Description" => Ok(Self::Description(Description::from_element(annotation)?)),
            _ => Ok(Self::Unknown(annotation.values.clone())),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::metadata::ClassElement;

    fn class_element<'a>(id: i64, name: &'a str) -> ClassElement<'a> {
        ClassElement {
            id,
            name: Cow::Borrowed(name),
            super_type: None,
            simple_type: None,
            fields: Vec::new(),
            settings: Vec::new(),
            annotations: Vec::new(),
        }
    }

    #[test]
    fn label_resolves_from_matching_class() {
        let class = class_element(7, "jdk.jfr.Label");
        let el = AnnotationElement {
            type_id: 7,
            values: vec![(Cow::Borrowed("value"), Cow::Borrowed("CPU Load"))],
        };

        match AnnotationValue::from_elements(&el, &class).unwrap() {
            AnnotationValue::Label(l) => assert_eq!(&*l, "CPU Load"),
            other => panic!("expected Label, got {other:?}"),
        }
    }

    #[test]
    fn unknown_annotation_keeps_raw_values() {
        let class = class_element(9, "jdk.jfr.Timespan");
        let el = AnnotationElement {
            type_id: 9,
            values: vec![(Cow::Borrowed("value"), Cow::Borrowed("NANOSECONDS"))],
        };

        match AnnotationValue::from_elements(&el, &class).unwrap() {
            AnnotationValue::Unknown(values) => assert_eq!(values.len(), 1),
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn mismatched_class_id_is_an_error() {
        let class = class_element(1, "jdk.jfr.Label");
        let el = AnnotationElement {
            type_id: 2,
            values: vec![],
        };

        assert!(AnnotationValue::from_elements(&el, &class).is_err());
    }
}
