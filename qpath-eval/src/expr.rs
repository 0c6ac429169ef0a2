// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Evaluation of the `select` expression sub-language (§4.5.1).

use qpath::ast::{BinaryOp, Expr, Literal};

use crate::row::{Row, RowValue};

/// Evaluate `expr` against `row`.
///
/// Field references navigate the row using [Row::project_no_fanout], not
/// [Row::project]: an expression produces exactly one value per row, so
/// (unlike predicate evaluation) arrays are not implicitly iterated past the
/// first step — a path crossing an array collapses to that array's value
/// rather than fanning out. Callers that need one output row per array
/// element should reach for `groupBy`/`select` over the pre-projected path
/// instead.
pub fn eval(expr: &Expr, row: &Row) -> RowValue {
    match expr {
        Expr::Literal(lit) => literal_to_value(lit),
        Expr::FieldRef(path) => row.project_no_fanout(path),
        Expr::Neg(inner) => RowValue::Float(-eval(inner, row).to_numeric()),
        Expr::Binary { left, op, right } => eval_binary(*op, &eval(left, row), &eval(right, row)),
        Expr::Func { name, args } => eval_func(name, args, row),
        Expr::StringTemplate { parts, exprs } => {
            let mut out = String::new();
            for (i, part) in parts.iter().enumerate() {
                out.push_str(part);
                if let Some(e) = exprs.get(i) {
                    out.push_str(&eval(e, row).to_display_string());
                }
            }
            RowValue::Str(out)
        }
    }
}

fn literal_to_value(lit: &Literal) -> RowValue {
    match lit {
        Literal::Integer(i) => RowValue::Int(*i),
        Literal::Float(f) => RowValue::Float(*f),
        Literal::String(s) => RowValue::Str(s.clone()),
        Literal::Boolean(b) => RowValue::Bool(*b),
        Literal::Null => RowValue::Null,
    }
}

fn eval_binary(op: BinaryOp, left: &RowValue, right: &RowValue) -> RowValue {
    if op == BinaryOp::Add && (matches!(left, RowValue::Str(_)) || matches!(right, RowValue::Str(_)))
    {
        return RowValue::Str(format!(
            "{}{}",
            left.to_display_string(),
            right.to_display_string()
        ));
    }

    let (l, r) = (left.to_numeric(), right.to_numeric());

    RowValue::Float(match op {
        BinaryOp::Add => l + r,
        BinaryOp::Sub => l - r,
        BinaryOp::Mul => l * r,
        // Division by zero yields NaN silently (§7).
        BinaryOp::Div => l / r,
    })
}

fn eval_func(name: &str, args: &[Expr], row: &Row) -> RowValue {
    let values: Vec<RowValue> = args.iter().map(|a| eval(a, row)).collect();

    match name {
        "if" => match values.as_slice() {
            [cond, a, b] => {
                if cond.truthy() {
                    a.clone()
                } else {
                    b.clone()
                }
            }
            _ => RowValue::Null,
        },
        "upper" => values
            .first()
            .map(|v| RowValue::Str(v.to_display_string().to_uppercase()))
            .unwrap_or(RowValue::Null),
        "lower" => values
            .first()
            .map(|v| RowValue::Str(v.to_display_string().to_lowercase()))
            .unwrap_or(RowValue::Null),
        "substring" => {
            let Some(s) = values.first().map(|v| v.to_display_string()) else {
                return RowValue::Null;
            };
            let chars: Vec<char> = s.chars().collect();
            let start = values.get(1).map(|v| v.to_numeric() as i64).unwrap_or(0);
            let start = start.max(0).min(chars.len() as i64) as usize;
            let end = match values.get(2) {
                Some(v) => (start as i64 + v.to_numeric() as i64)
                    .max(start as i64)
                    .min(chars.len() as i64) as usize,
                None => chars.len(),
            };
            RowValue::Str(chars[start..end].iter().collect())
        }
        "length" => values
            .first()
            .map(|v| RowValue::Int(v.to_display_string().chars().count() as i64))
            .unwrap_or(RowValue::Int(0)),
        "coalesce" => values
            .into_iter()
            .find(|v| !v.is_null())
            .unwrap_or(RowValue::Null),
        _ => RowValue::Null,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use qpath::ast::Segment;

    fn row_with(name: &str, value: RowValue) -> Row {
        let mut row = Row::new();
        row.set(name, value);
        row
    }

    #[test]
    fn add_concatenates_when_either_side_is_string() {
        let row = Row::new();
        let expr = Expr::Binary {
            left: Box::new(Expr::Literal(Literal::String("a".to_string()))),
            op: BinaryOp::Add,
            right: Box::new(Expr::Literal(Literal::Integer(1))),
        };

        assert_eq!(eval(&expr, &row), RowValue::Str("a1".to_string()));
    }

    #[test]
    fn division_by_zero_is_nan() {
        let row = Row::new();
        let expr = Expr::Binary {
            left: Box::new(Expr::Literal(Literal::Integer(1))),
            op: BinaryOp::Div,
            right: Box::new(Expr::Literal(Literal::Integer(0))),
        };

        match eval(&expr, &row) {
            RowValue::Float(f) => assert!(f.is_nan()),
            other => panic!("expected float, got {other:?}"),
        }
    }

    #[test]
    fn field_ref_projects_row_path() {
        let row = row_with("bytes", RowValue::Int(2048));
        let expr = Expr::Binary {
            left: Box::new(Expr::FieldRef(vec![Segment::bare("bytes")])),
            op: BinaryOp::Div,
            right: Box::new(Expr::Literal(Literal::Integer(1024))),
        };

        assert_eq!(eval(&expr, &row), RowValue::Float(2.0));
    }

    #[test]
    fn string_template_interleaves_parts_and_exprs() {
        let row = row_with("bytes", RowValue::Int(10));
        let expr = Expr::StringTemplate {
            parts: vec!["read ".to_string(), " bytes".to_string()],
            exprs: vec![Expr::FieldRef(vec![Segment::bare("bytes")])],
        };

        assert_eq!(eval(&expr, &row), RowValue::Str("read 10 bytes".to_string()));
    }

    #[test]
    fn coalesce_returns_first_non_null() {
        let expr = Expr::Func {
            name: "coalesce".to_string(),
            args: vec![
                Expr::Literal(Literal::Null),
                Expr::Literal(Literal::Integer(5)),
            ],
        };

        assert_eq!(eval(&expr, &Row::new()), RowValue::Int(5));
    }
}
