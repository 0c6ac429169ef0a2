// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Predicate evaluation (§4.4).
//!
//! A predicate's [qpath::ast::MatchMode] is attached once, at the enclosing
//! `[...]` bracket, and applies uniformly to every leaf comparison reached
//! while walking that predicate's expression tree: each leaf projects its
//! path (fanning out across arrays per §4.3.1) and the mode decides how the
//! resulting list of per-element booleans collapses into one.
//!
//! A predicate written after one or more path segments scopes to the
//! sub-structure reached at that position rather than the whole row
//! ([qpath::ast::Predicate::depth]): `stackTrace/frames[frameType = "X"]`
//! tests each frame of `frames`, not the event's top-level fields. The same
//! [MatchMode] governs both that outer, positional fan and the inner,
//! per-leaf fan a path crossing a nested array produces.

use qpath::ast::{BoolExpr, CmpOp, FuncArg, Literal, MatchMode, Predicate, Segment};

use crate::row::{project_value, Row, RowValue};

pub fn predicate_matches(predicate: &Predicate, segments: &[Segment], row: &Row) -> bool {
    let scopes = scoped_values(row, segments, predicate.depth);
    collapse(&scopes, predicate.mode, |scope| {
        eval(&predicate.expr, scope, predicate.mode)
    })
}

/// The sub-structure(s) a predicate's bracket applies to: the whole row at
/// depth 0, or the value(s) reached by walking `segments[..depth]`, with any
/// array landed on at that depth flattened into its elements so the
/// bracket's mode can govern element-wise matching.
fn scoped_values(row: &Row, segments: &[Segment], depth: usize) -> Vec<RowValue> {
    if depth == 0 {
        return vec![RowValue::Map(row.columns().to_vec())];
    }

    row.project(&segments[..depth])
        .into_iter()
        .flat_map(|v| match v {
            RowValue::Array(items) => items,
            other => vec![other],
        })
        .collect()
}

fn eval(expr: &BoolExpr, scope: &RowValue, mode: MatchMode) -> bool {
    match expr {
        BoolExpr::Cmp { path, op, literal } => {
            let values = project_value(scope, path);
            collapse(&values, mode, |v| compare_one(v, *op, literal))
        }
        BoolExpr::FuncBool { name, args } => eval_func_bool(name, args, scope, mode),
        BoolExpr::Logical { left, op, right } => match op {
            qpath::ast::LogicalOp::And => eval(left, scope, mode) && eval(right, scope, mode),
            qpath::ast::LogicalOp::Or => eval(left, scope, mode) || eval(right, scope, mode),
        },
        BoolExpr::Not(inner) => !eval(inner, scope, mode),
    }
}

/// Apply a [MatchMode] over a list of projected values, testing `f` against
/// each. An empty projection (missing field) behaves like an empty array:
/// `ANY` is false, `ALL` is false (requires non-empty per §4.4), `NONE` is
/// vacuously true.
fn collapse(values: &[RowValue], mode: MatchMode, f: impl Fn(&RowValue) -> bool) -> bool {
    match mode {
        MatchMode::Any => values.iter().any(f),
        MatchMode::All => !values.is_empty() && values.iter().all(f),
        MatchMode::None => !values.iter().any(f),
    }
}

fn compare_one(value: &RowValue, op: CmpOp, literal: &Literal) -> bool {
    if matches!(literal, Literal::Null) {
        let is_null = value.is_null();
        return match op {
            CmpOp::Eq => is_null,
            CmpOp::Ne => !is_null,
            _ => false,
        };
    }

    // Predicates against null are false (§7), except the Null-literal case
    // handled above.
    if value.is_null() {
        return false;
    }

    if op == CmpOp::RegexMatch {
        let Literal::String(pattern) = literal else {
            return false;
        };
        return regex::Regex::new(pattern)
            .map(|re| re.is_match(&value.to_display_string()))
            .unwrap_or(false);
    }

    match literal {
        Literal::String(s) => cmp_with_ordering(value.to_display_string().as_str().cmp(s.as_str()), op),
        Literal::Boolean(b) => {
            let bv = value.truthy();
            match op {
                CmpOp::Eq => bv == *b,
                CmpOp::Ne => bv != *b,
                _ => false,
            }
        }
        Literal::Integer(i) => cmp_numeric(value.to_numeric(), *i as f64, op),
        Literal::Float(f) => cmp_numeric(value.to_numeric(), *f, op),
        Literal::Null => unreachable!("handled above"),
    }
}

fn cmp_with_ordering(ordering: std::cmp::Ordering, op: CmpOp) -> bool {
    use std::cmp::Ordering::*;

    match (op, ordering) {
        (CmpOp::Eq, Equal) => true,
        (CmpOp::Ne, Equal) => false,
        (CmpOp::Ne, _) => true,
        (CmpOp::Gt, Greater) => true,
        (CmpOp::Ge, Greater | Equal) => true,
        (CmpOp::Lt, Less) => true,
        (CmpOp::Le, Less | Equal) => true,
        _ => false,
    }
}

fn cmp_numeric(value: f64, literal: f64, op: CmpOp) -> bool {
    match op {
        CmpOp::Eq => value == literal,
        CmpOp::Ne => value != literal,
        CmpOp::Gt => value > literal,
        CmpOp::Ge => value >= literal,
        CmpOp::Lt => value < literal,
        CmpOp::Le => value <= literal,
        CmpOp::RegexMatch => false,
    }
}

fn eval_func_bool(name: &str, args: &[FuncArg], scope: &RowValue, mode: MatchMode) -> bool {
    let resolve = |arg: &FuncArg| -> Vec<RowValue> {
        match arg {
            FuncArg::Path(path) => project_value(scope, path),
            FuncArg::Literal(lit) => vec![literal_value(lit)],
        }
    };

    match name {
        "exists" => args
            .first()
            .map(|a| {
                let values = resolve(a);
                !values.is_empty() && values.iter().any(|v| !v.is_null())
            })
            .unwrap_or(false),
        "empty" => args
            .first()
            .map(|a| {
                let values = resolve(a);
                values.is_empty() || values.iter().all(|v| v.is_null())
            })
            .unwrap_or(true),
        "contains" => binary_str(args, scope, mode, |h, n| h.contains(n)),
        "starts_with" => binary_str(args, scope, mode, |h, n| h.starts_with(n)),
        "ends_with" => binary_str(args, scope, mode, |h, n| h.ends_with(n)),
        "matches" => binary_str(args, scope, mode, |h, pattern| {
            regex::Regex::new(pattern)
                .map(|re| re.is_match(h))
                .unwrap_or(false)
        }),
        "between" => {
            let Some(FuncArg::Path(path)) = args.first() else {
                return false;
            };
            let (Some(lo), Some(hi)) = (args.get(1), args.get(2)) else {
                return false;
            };
            let lo = resolve(lo).first().map(|v| v.to_numeric()).unwrap_or(0.0);
            let hi = resolve(hi).first().map(|v| v.to_numeric()).unwrap_or(0.0);

            collapse(&project_value(scope, path), mode, |v| {
                let n = v.to_numeric();
                n >= lo && n <= hi
            })
        }
        _ => false,
    }
}

fn binary_str(
    args: &[FuncArg],
    scope: &RowValue,
    mode: MatchMode,
    f: impl Fn(&str, &str) -> bool,
) -> bool {
    let Some(FuncArg::Path(path)) = args.first() else {
        return false;
    };
    let Some(needle) = args.get(1).map(literal_or_path_string) else {
        return false;
    };

    collapse(&project_value(scope, path), mode, |v| {
        f(&v.to_display_string(), &needle)
    })
}

fn literal_or_path_string(arg: &FuncArg) -> String {
    match arg {
        FuncArg::Literal(Literal::String(s)) => s.clone(),
        FuncArg::Literal(lit) => literal_value(lit).to_display_string(),
        FuncArg::Path(_) => String::new(),
    }
}

fn literal_value(lit: &Literal) -> RowValue {
    match lit {
        Literal::Integer(i) => RowValue::Int(*i),
        Literal::Float(f) => RowValue::Float(*f),
        Literal::String(s) => RowValue::Str(s.clone()),
        Literal::Boolean(b) => RowValue::Bool(*b),
        Literal::Null => RowValue::Null,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use qpath::ast::Segment;

    fn row_with(field: &str, value: RowValue) -> Row {
        let mut row = Row::new();
        row.set(field, value);
        row
    }

    #[test]
    fn gt_matches_numeric_literal() {
        let row = row_with("bytes", RowValue::Int(2048));
        let predicate = Predicate {
            mode: MatchMode::Any,
            expr: BoolExpr::Cmp {
                path: vec![Segment::bare("bytes")],
                op: CmpOp::Gt,
                literal: Literal::Integer(1024),
            },
            depth: 0,
        };

        assert!(predicate_matches(&predicate, &[], &row));
    }

    #[test]
    fn null_field_never_matches_non_null_literal() {
        let row = Row::new();
        let predicate = Predicate {
            mode: MatchMode::Any,
            expr: BoolExpr::Cmp {
                path: vec![Segment::bare("missing")],
                op: CmpOp::Eq,
                literal: Literal::Integer(0),
            },
            depth: 0,
        };

        assert!(!predicate_matches(&predicate, &[], &row));
    }

    #[test]
    fn regex_match_operator() {
        let row = row_with("path", RowValue::Str("/tmp/a".to_string()));
        let predicate = Predicate {
            mode: MatchMode::Any,
            expr: BoolExpr::Cmp {
                path: vec![Segment::bare("path")],
                op: CmpOp::RegexMatch,
                literal: Literal::String("/tmp/.*".to_string()),
            },
            depth: 0,
        };

        assert!(predicate_matches(&predicate, &[], &row));
    }

    #[test]
    fn all_mode_requires_nonempty_array() {
        let mut row = Row::new();
        row.set("values", RowValue::Array(Vec::new()));

        let predicate = Predicate {
            mode: MatchMode::All,
            expr: BoolExpr::Cmp {
                path: vec![Segment::bare("values")],
                op: CmpOp::Gt,
                literal: Literal::Integer(0),
            },
            depth: 0,
        };

        assert!(!predicate_matches(&predicate, &[], &row));
    }

    #[test]
    fn none_mode_is_vacuously_true_over_empty() {
        let mut row = Row::new();
        row.set("values", RowValue::Array(Vec::new()));

        let predicate = Predicate {
            mode: MatchMode::None,
            expr: BoolExpr::Cmp {
                path: vec![Segment::bare("values")],
                op: CmpOp::Gt,
                literal: Literal::Integer(0),
            },
            depth: 0,
        };

        assert!(predicate_matches(&predicate, &[], &row));
    }

    #[test]
    fn logical_and_short_circuits_on_mode() {
        let row = row_with("bytes", RowValue::Int(10));
        let predicate = Predicate {
            mode: MatchMode::Any,
            expr: BoolExpr::Logical {
                left: Box::new(BoolExpr::Cmp {
                    path: vec![Segment::bare("bytes")],
                    op: CmpOp::Gt,
                    literal: Literal::Integer(0),
                }),
                op: qpath::ast::LogicalOp::And,
                right: Box::new(BoolExpr::Not(Box::new(BoolExpr::Cmp {
                    path: vec![Segment::bare("bytes")],
                    op: CmpOp::Gt,
                    literal: Literal::Integer(100),
                }))),
            },
            depth: 0,
        };

        assert!(predicate_matches(&predicate, &[], &row));
    }

    /// `stackTrace/frames[frameType = "X"]`: the predicate's depth (2) scopes
    /// it to the `frames` array reached by walking the first two segments,
    /// not the event's top-level fields.
    #[test]
    fn depth_scopes_predicate_to_nested_array() {
        let mut row = Row::new();
        row.set(
            "stackTrace",
            RowValue::Map(vec![(
                "frames".to_string(),
                RowValue::Array(vec![
                    RowValue::Map(vec![("frameType".to_string(), RowValue::Str("Java".to_string()))]),
                    RowValue::Map(vec![(
                        "frameType".to_string(),
                        RowValue::Str("Interpreted".to_string()),
                    )]),
                ]),
            )]),
        );

        let segments = vec![Segment::bare("stackTrace"), Segment::bare("frames")];
        let predicate = Predicate {
            mode: MatchMode::Any,
            expr: BoolExpr::Cmp {
                path: vec![Segment::bare("frameType")],
                op: CmpOp::Eq,
                literal: Literal::String("Interpreted".to_string()),
            },
            depth: 2,
        };

        assert!(predicate_matches(&predicate, &segments, &row));

        let predicate_all = Predicate { mode: MatchMode::All, ..predicate };
        assert!(!predicate_matches(&predicate_all, &segments, &row));
    }
}
