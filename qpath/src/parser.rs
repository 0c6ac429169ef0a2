// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Hand-written recursive-descent parser turning a QPath string into a
//! [crate::ast::Query].
//!
//! The parser works over a `Vec<char>` rather than raw bytes; `position` in
//! [crate::error::Error::Syntax] is a char offset, which coincides with a
//! byte offset for the ASCII-heavy query text this language expects.

use crate::{
    ast::{
        ArgValue, BinaryOp, BoolExpr, CmpOp, Expr, FuncArg, GroupAgg, GroupSortBy, Literal,
        LogicalOp, MatchMode, NamedArg, PipelineOp, Predicate, Query, Root, Segment,
        SegmentIndex, SelectItem,
    },
    error::{Error, Result},
};

/// Parse a complete QPath query string.
pub fn parse(input: &str) -> Result<Query> {
    let mut p = Parser::new(input);
    let query = p.parse_query()?;
    p.skip_ws();

    if !p.eof() {
        return Err(p.error(format!("unexpected trailing input: {:?}", p.rest())));
    }

    Ok(query)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::syntax(self.pos, message)
    }

    fn eof(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn rest(&self) -> String {
        self.chars[self.pos..].iter().collect()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<()> {
        self.skip_ws();
        match self.advance() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(self.error(format!("expected '{expected}', found '{c}'"))),
            None => Err(self.error(format!("expected '{expected}', found end of input"))),
        }
    }

    fn consume_if(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Consume a fixed keyword only if it is not immediately followed by an
    /// identifier character (so `andThreshold` is one identifier, not the
    /// keyword `and` plus garbage).
    fn consume_keyword(&mut self, keyword: &str) -> bool {
        let save = self.pos;
        self.skip_ws();

        let kw_len = keyword.chars().count();
        if self.chars[self.pos..]
            .iter()
            .take(kw_len)
            .collect::<String>()
            .eq_ignore_ascii_case(keyword)
            && !matches!(self.peek_at(kw_len), Some(c) if is_ident_char(c))
        {
            self.pos += kw_len;
            true
        } else {
            self.pos = save;
            false
        }
    }

    fn is_ident_start(c: char) -> bool {
        c.is_alphabetic() || c == '_' || c == '$'
    }

    fn parse_ident(&mut self) -> Result<String> {
        self.skip_ws();

        let start = self.pos;
        match self.peek() {
            Some(c) if Self::is_ident_start(c) => {
                self.pos += 1;
            }
            _ => return Err(self.error("expected identifier")),
        }

        while matches!(self.peek(), Some(c) if is_ident_char(c) || c == '.') {
            self.pos += 1;
        }

        Ok(self.chars[start..self.pos].iter().collect())
    }

    /// Parse a `/`-joined path of segments, each optionally carrying an
    /// indexing suffix. Stops at the first character that cannot start a
    /// segment (`[`, `|`, `,`, `)`, whitespace, comparison/logical operators).
    fn parse_path(&mut self) -> Result<Vec<Segment>> {
        let mut segments = Vec::new();

        loop {
            self.skip_ws();
            let name = self.parse_ident()?;
            let index = self.try_parse_segment_index()?;
            segments.push(Segment { name, index });

            if self.peek() == Some('/') && matches!(self.peek_at(1), Some(c) if Self::is_ident_start(c) || c.is_ascii_digit())
            {
                self.pos += 1;
            } else {
                break;
            }
        }

        Ok(segments)
    }

    fn try_parse_segment_index(&mut self) -> Result<Option<SegmentIndex>> {
        if self.peek() != Some('[') {
            return Ok(None);
        }

        // Distinguish an indexing suffix (`[0]`, `[1:4]`) from a predicate
        // bracket (`[field = 1]`) by checking whether the bracket body looks
        // like a bare integer or integer:integer.
        let save = self.pos;
        self.pos += 1;
        self.skip_ws();

        let start_digits = self.pos;
        let negative = self.consume_if('-');
        let mut saw_digit = false;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
            saw_digit = true;
        }

        if !saw_digit {
            self.pos = save;
            return Ok(None);
        }

        let first: i64 = self.chars[start_digits..self.pos]
            .iter()
            .collect::<String>()
            .parse()
            .map_err(|_| self.error("invalid integer in index"))?;
        let _ = negative;

        self.skip_ws();

        if self.consume_if(':') {
            self.skip_ws();
            let end_start = self.pos;
            self.consume_if('-');
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
            let end: i64 = self.chars[end_start..self.pos]
                .iter()
                .collect::<String>()
                .parse()
                .map_err(|_| self.error("invalid integer in slice end"))?;

            self.skip_ws();
            self.expect_char(']')?;

            Ok(Some(SegmentIndex::Slice { start: first, end }))
        } else {
            self.skip_ws();
            if self.peek() != Some(']') {
                // Not a clean index after all (e.g. `[0 = x]`, unusual but
                // fall back to treating it as not-an-index).
                self.pos = save;
                return Ok(None);
            }
            self.pos += 1;

            Ok(Some(SegmentIndex::Element(first)))
        }
    }

    fn parse_query(&mut self) -> Result<Query> {
        self.skip_ws();
        let root = self.parse_root()?;

        let mut event_types = Vec::new();
        let mut segments = Vec::new();
        let mut predicates = Vec::new();

        if root == Root::Events {
            self.skip_ws();
            let save = self.pos;
            if self.consume_if('/') {
                match self.parse_event_types() {
                    Ok(types) => event_types = types,
                    // Not an event-type list after all (e.g. `events/[pred]` or
                    // `events/someField`); rewind and let the segment/predicate
                    // loop below handle it. An empty `event_types` means "all
                    // event types".
                    Err(_) => self.pos = save,
                }
            }
        }

        loop {
            self.skip_ws();
            if self.consume_if('/') {
                let segs = self.parse_path()?;
                segments.extend(segs);
            } else if self.peek() == Some('[') {
                predicates.push(self.parse_predicate(segments.len())?);
            } else {
                break;
            }
        }

        let mut pipeline = Vec::new();
        loop {
            self.skip_ws();
            if self.consume_if('|') {
                pipeline.push(self.parse_pipeline_op()?);
            } else {
                break;
            }
        }

        Ok(Query {
            root,
            event_types,
            segments,
            predicates,
            pipeline,
        })
    }

    fn parse_root(&mut self) -> Result<Root> {
        self.skip_ws();

        for (keyword, root) in [
            ("events", Root::Events),
            ("metadata", Root::Metadata),
            ("chunks", Root::Chunks),
            ("cp", Root::ConstantPool),
        ] {
            if self.consume_keyword(keyword) {
                return Ok(root);
            }
        }

        Err(self.error("expected query root: one of events, metadata, chunks, cp"))
    }

    fn parse_event_types(&mut self) -> Result<Vec<String>> {
        let mut names = vec![self.parse_ident()?];

        while self.consume_if(',') {
            names.push(self.parse_ident()?);
        }

        Ok(names)
    }

    fn parse_predicate(&mut self, depth: usize) -> Result<Predicate> {
        let mode = if self.consume_keyword("any:") {
            MatchMode::Any
        } else if self.consume_keyword("all:") {
            MatchMode::All
        } else if self.consume_keyword("none:") {
            MatchMode::None
        } else {
            MatchMode::Any
        };

        self.expect_char('[')?;
        let expr = self.parse_bool_expr()?;
        self.skip_ws();
        self.expect_char(']')?;

        Ok(Predicate { mode, expr, depth })
    }

    // boolExpr := orExpr
    // orExpr    := andExpr (("or" | "||") andExpr)*
    // andExpr   := notExpr (("and" | "&&") notExpr)*
    // notExpr   := ("not" | "!")? atom
    // atom      := "(" boolExpr ")" | funcBool | cmp
    fn parse_bool_expr(&mut self) -> Result<BoolExpr> {
        self.parse_or_expr()
    }

    fn parse_or_expr(&mut self) -> Result<BoolExpr> {
        let mut left = self.parse_and_expr()?;

        loop {
            self.skip_ws();
            let matched = self.consume_keyword("or") || self.try_consume_symbol("||");
            if !matched {
                break;
            }

            let right = self.parse_and_expr()?;
            left = BoolExpr::Logical {
                left: Box::new(left),
                op: LogicalOp::Or,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_and_expr(&mut self) -> Result<BoolExpr> {
        let mut left = self.parse_not_expr()?;

        loop {
            self.skip_ws();
            let matched = self.consume_keyword("and") || self.try_consume_symbol("&&");
            if !matched {
                break;
            }

            let right = self.parse_not_expr()?;
            left = BoolExpr::Logical {
                left: Box::new(left),
                op: LogicalOp::And,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_not_expr(&mut self) -> Result<BoolExpr> {
        self.skip_ws();
        if self.consume_keyword("not") || self.try_consume_symbol("!") {
            return Ok(BoolExpr::Not(Box::new(self.parse_not_expr()?)));
        }

        self.parse_bool_atom()
    }

    fn try_consume_symbol(&mut self, symbol: &str) -> bool {
        let save = self.pos;
        self.skip_ws();

        let len = symbol.chars().count();
        if self.chars[self.pos..].iter().take(len).collect::<String>() == symbol {
            self.pos += len;
            true
        } else {
            self.pos = save;
            false
        }
    }

    fn parse_bool_atom(&mut self) -> Result<BoolExpr> {
        self.skip_ws();

        if self.consume_if('(') {
            let inner = self.parse_bool_expr()?;
            self.skip_ws();
            self.expect_char(')')?;
            return Ok(inner);
        }

        // Try `funcname(...)` used in boolean position: exists, empty,
        // between, contains, starts_with, ends_with, matches.
        let save = self.pos;
        if let Ok(name) = self.parse_ident() {
            self.skip_ws();
            if self.peek() == Some('(') && is_bool_func(&name) {
                self.pos += 1;
                let args = self.parse_func_args()?;
                self.skip_ws();
                self.expect_char(')')?;
                return Ok(BoolExpr::FuncBool { name, args });
            }
        }
        self.pos = save;

        self.parse_cmp()
    }

    fn parse_func_args(&mut self) -> Result<Vec<FuncArg>> {
        let mut args = Vec::new();
        self.skip_ws();

        if self.peek() == Some(')') {
            return Ok(args);
        }

        loop {
            args.push(self.parse_func_arg()?);
            self.skip_ws();
            if self.consume_if(',') {
                continue;
            }
            break;
        }

        Ok(args)
    }

    fn parse_func_arg(&mut self) -> Result<FuncArg> {
        self.skip_ws();

        if matches!(self.peek(), Some(c) if c == '"' || c == '\'' || c.is_ascii_digit() || c == '-')
        {
            Ok(FuncArg::Literal(self.parse_literal()?))
        } else {
            Ok(FuncArg::Path(self.parse_path()?))
        }
    }

    fn parse_cmp(&mut self) -> Result<BoolExpr> {
        let path = self.parse_path()?;
        self.skip_ws();
        let op = self.parse_cmp_op()?;
        self.skip_ws();
        let literal = self.parse_literal()?;

        Ok(BoolExpr::Cmp { path, op, literal })
    }

    fn parse_cmp_op(&mut self) -> Result<CmpOp> {
        // `=~` must be tried before `=`.
        for (symbol, op) in [
            ("=~", CmpOp::RegexMatch),
            ("==", CmpOp::Eq),
            ("!=", CmpOp::Ne),
            (">=", CmpOp::Ge),
            ("<=", CmpOp::Le),
            ("=", CmpOp::Eq),
            (">", CmpOp::Gt),
            ("<", CmpOp::Lt),
            ("~", CmpOp::RegexMatch),
        ] {
            if self.try_consume_symbol(symbol) {
                return Ok(op);
            }
        }

        Err(self.error("expected a comparison operator"))
    }

    fn parse_literal(&mut self) -> Result<Literal> {
        self.skip_ws();

        match self.peek() {
            Some('"') => Ok(Literal::String(self.parse_double_quoted_string()?)),
            Some('\'') => Ok(Literal::String(self.parse_single_quoted_string()?)),
            Some(c) if c.is_ascii_digit() || c == '-' => self.parse_number_literal(),
            _ => {
                let word = self.parse_ident()?;
                match word.as_str() {
                    "true" => Ok(Literal::Boolean(true)),
                    "false" => Ok(Literal::Boolean(false)),
                    "null" => Ok(Literal::Null),
                    other => Ok(Literal::String(other.to_string())),
                }
            }
        }
    }

    fn parse_number_literal(&mut self) -> Result<Literal> {
        let start = self.pos;
        self.consume_if('-');

        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }

        let mut is_float = false;
        if self.peek() == Some('.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            is_float = true;
            self.pos += 1;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }

        let text: String = self.chars[start..self.pos].iter().collect();

        if is_float {
            let v: f64 = text
                .parse()
                .map_err(|_| self.error(format!("invalid float literal: {text}")))?;
            Ok(Literal::Float(v))
        } else {
            let mut v: i64 = text
                .parse()
                .map_err(|_| self.error(format!("invalid integer literal: {text}")))?;

            v = self.apply_size_suffix(v)?;

            Ok(Literal::Integer(v))
        }
    }

    /// Apply a trailing `K|KB|M|MB|G|GB` (case-insensitive) multiplier if present.
    fn apply_size_suffix(&mut self, value: i64) -> Result<i64> {
        let save = self.pos;

        for (suffix, multiplier) in [
            ("KB", 1024i64),
            ("K", 1024),
            ("MB", 1024 * 1024),
            ("M", 1024 * 1024),
            ("GB", 1024 * 1024 * 1024),
            ("G", 1024 * 1024 * 1024),
        ] {
            let len = suffix.chars().count();
            let candidate: String = self.chars[self.pos..].iter().take(len).collect();
            if candidate.eq_ignore_ascii_case(suffix)
                && !matches!(self.peek_at(len), Some(c) if is_ident_char(c))
            {
                self.pos += len;
                return Ok(value * multiplier);
            }
        }

        self.pos = save;
        Ok(value)
    }

    fn parse_double_quoted_string(&mut self) -> Result<String> {
        self.pos += 1; // consume opening quote
        let mut out = String::new();

        loop {
            match self.advance() {
                None => return Err(self.error("unterminated string literal")),
                Some('"') => break,
                Some('\\') => match self.advance() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('\\') => out.push('\\'),
                    Some('"') => out.push('"'),
                    Some(other) => out.push(other),
                    None => return Err(self.error("unterminated escape in string literal")),
                },
                Some(c) => out.push(c),
            }
        }

        Ok(out)
    }

    fn parse_single_quoted_string(&mut self) -> Result<String> {
        self.pos += 1;
        let start = self.pos;

        loop {
            match self.advance() {
                None => return Err(self.error("unterminated string literal")),
                Some('\'') => break,
                Some(_) => {}
            }
        }

        Ok(self.chars[start..self.pos - 1].iter().collect())
    }

    fn parse_pipeline_op(&mut self) -> Result<PipelineOp> {
        self.skip_ws();
        let name = self.parse_ident()?;
        self.skip_ws();
        self.expect_char('(')?;

        let op = match name.as_str() {
            "count" => {
                self.expect_char(')')?;
                return Ok(PipelineOp::Count);
            }
            "select" => return self.parse_select_op(),
            _ => {
                let (positional, named) = self.parse_generic_args()?;
                self.build_pipeline_op(&name, positional, named)?
            }
        };

        Ok(op)
    }

    fn parse_generic_args(&mut self) -> Result<(Vec<ArgValue>, Vec<NamedArg>)> {
        let mut positional = Vec::new();
        let mut named = Vec::new();

        self.skip_ws();
        if self.peek() == Some(')') {
            self.pos += 1;
            return Ok((positional, named));
        }

        loop {
            self.skip_ws();

            let save = self.pos;
            let maybe_name = self.parse_ident().ok();
            self.skip_ws();

            if let Some(ident) = maybe_name {
                if self.peek() == Some('=') && self.peek_at(1) != Some('=') && self.peek_at(1) != Some('~') {
                    self.pos += 1;
                    let value = self.parse_arg_value()?;
                    named.push(NamedArg { name: ident, value });
                    self.skip_ws();
                    if self.consume_if(',') {
                        continue;
                    }
                    break;
                }
            }
            self.pos = save;

            positional.push(self.parse_arg_value()?);
            self.skip_ws();
            if self.consume_if(',') {
                continue;
            }
            break;
        }

        self.skip_ws();
        self.expect_char(')')?;

        Ok((positional, named))
    }

    fn parse_arg_value(&mut self) -> Result<ArgValue> {
        self.skip_ws();

        match self.peek() {
            Some('"') => Ok(ArgValue::Literal(Literal::String(
                self.parse_double_quoted_string()?,
            ))),
            Some('\'') => Ok(ArgValue::Literal(Literal::String(
                self.parse_single_quoted_string()?,
            ))),
            Some(c) if c.is_ascii_digit() || c == '-' => {
                Ok(ArgValue::Literal(self.parse_number_literal()?))
            }
            _ => {
                let word = self.parse_ident()?;
                match word.as_str() {
                    "true" => return Ok(ArgValue::Literal(Literal::Boolean(true))),
                    "false" => return Ok(ArgValue::Literal(Literal::Boolean(false))),
                    _ => {}
                }

                if self.peek() == Some('/') {
                    let mut segs = vec![Segment::bare(word)];
                    while self.peek() == Some('/') {
                        self.pos += 1;
                        segs.push(Segment::bare(self.parse_ident()?));
                    }
                    Ok(ArgValue::Path(segs))
                } else {
                    Ok(ArgValue::Ident(word))
                }
            }
        }
    }

    fn parse_select_op(&mut self) -> Result<PipelineOp> {
        let mut items = Vec::new();

        self.skip_ws();
        if self.peek() == Some(')') {
            self.pos += 1;
            return Ok(PipelineOp::Select { items });
        }

        loop {
            let expr = self.parse_expr()?;
            self.skip_ws();

            let alias = if self.consume_keyword("as") {
                self.skip_ws();
                Some(self.parse_ident()?)
            } else {
                None
            };

            items.push(match (expr, alias) {
                (Expr::FieldRef(path), alias) => SelectItem::Field { path, alias },
                (expr, Some(alias)) => SelectItem::Expression { expr, alias },
                (_, None) => {
                    return Err(self.error("expression selection requires an `as alias`"))
                }
            });

            self.skip_ws();
            if self.consume_if(',') {
                continue;
            }
            break;
        }

        self.skip_ws();
        self.expect_char(')')?;

        Ok(PipelineOp::Select { items })
    }

    // expr      := term (("+" | "-") term)*
    // term      := unary (("*" | "/") unary)*
    // unary     := "-" unary | atom
    // atom      := number | string | func(...) | path | "(" expr ")"
    fn parse_expr(&mut self) -> Result<Expr> {
        let mut left = self.parse_term()?;

        loop {
            self.skip_ws();
            let op = if self.try_consume_symbol("+") {
                BinaryOp::Add
            } else if self.peek() == Some('-') && self.peek_at(1) != Some('>') {
                self.pos += 1;
                BinaryOp::Sub
            } else {
                break;
            };

            let right = self.parse_term()?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;

        loop {
            self.skip_ws();
            let op = if self.try_consume_symbol("*") {
                BinaryOp::Mul
            } else if self.try_consume_symbol("/") {
                BinaryOp::Div
            } else {
                break;
            };

            let right = self.parse_unary()?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        self.skip_ws();
        if self.consume_if('-') {
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }

        self.parse_expr_atom()
    }

    fn parse_expr_atom(&mut self) -> Result<Expr> {
        self.skip_ws();

        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let inner = self.parse_expr()?;
                self.skip_ws();
                self.expect_char(')')?;
                Ok(inner)
            }
            Some('"') => self.parse_string_or_template(),
            Some('\'') => Ok(Expr::Literal(Literal::String(
                self.parse_single_quoted_string()?,
            ))),
            Some(c) if c.is_ascii_digit() => {
                Ok(Expr::Literal(self.parse_number_literal()?))
            }
            _ => {
                let name = self.parse_ident()?;

                match name.as_str() {
                    "true" => return Ok(Expr::Literal(Literal::Boolean(true))),
                    "false" => return Ok(Expr::Literal(Literal::Boolean(false))),
                    "null" => return Ok(Expr::Literal(Literal::Null)),
                    _ => {}
                }

                self.skip_ws();
                if self.peek() == Some('(') {
                    self.pos += 1;
                    let mut args = Vec::new();
                    self.skip_ws();
                    if self.peek() != Some(')') {
                        loop {
                            args.push(self.parse_expr()?);
                            self.skip_ws();
                            if self.consume_if(',') {
                                continue;
                            }
                            break;
                        }
                    }
                    self.skip_ws();
                    self.expect_char(')')?;
                    return Ok(Expr::Func { name, args });
                }

                let mut path = vec![Segment {
                    name,
                    index: self.try_parse_segment_index()?,
                }];
                while self.peek() == Some('/') {
                    self.pos += 1;
                    let name = self.parse_ident()?;
                    let index = self.try_parse_segment_index()?;
                    path.push(Segment { name, index });
                }

                Ok(Expr::FieldRef(path))
            }
        }
    }

    /// Parse a double-quoted string, splitting on `${...}` interpolations
    /// into a [Expr::StringTemplate] when any are present.
    fn parse_string_or_template(&mut self) -> Result<Expr> {
        self.pos += 1;

        let mut parts = vec![String::new()];
        let mut exprs = Vec::new();

        loop {
            match self.advance() {
                None => return Err(self.error("unterminated string literal")),
                Some('"') => break,
                Some('\\') => match self.advance() {
                    Some('n') => parts.last_mut().unwrap().push('\n'),
                    Some('t') => parts.last_mut().unwrap().push('\t'),
                    Some('\\') => parts.last_mut().unwrap().push('\\'),
                    Some('"') => parts.last_mut().unwrap().push('"'),
                    Some(other) => parts.last_mut().unwrap().push(other),
                    None => return Err(self.error("unterminated escape in string literal")),
                },
                Some('$') if self.peek() == Some('{') => {
                    self.pos += 1;
                    let inner = self.parse_expr()?;
                    self.skip_ws();
                    self.expect_char('}')?;
                    exprs.push(inner);
                    parts.push(String::new());
                }
                Some(c) => parts.last_mut().unwrap().push(c),
            }
        }

        if exprs.is_empty() {
            Ok(Expr::Literal(Literal::String(parts.remove(0))))
        } else {
            Ok(Expr::StringTemplate { parts, exprs })
        }
    }

    fn build_pipeline_op(
        &self,
        name: &str,
        positional: Vec<ArgValue>,
        named: Vec<NamedArg>,
    ) -> Result<PipelineOp> {
        let named_lookup = |key: &str| named.iter().find(|a| a.name == key).map(|a| &a.value);

        let opt_path_arg = |idx: usize| -> Option<Vec<Segment>> {
            match positional.get(idx) {
                Some(ArgValue::Path(p)) => Some(p.clone()),
                Some(ArgValue::Ident(s)) => Some(vec![Segment::bare(s.clone())]),
                _ => None,
            }
        };

        let require_path_arg = |idx: usize, what: &str| -> Result<Vec<Segment>> {
            opt_path_arg(idx).ok_or_else(|| self.error(format!("{what} requires a path argument")))
        };

        let require_int_arg = |idx: usize, what: &str| -> Result<i64> {
            match positional.get(idx) {
                Some(ArgValue::Literal(Literal::Integer(v))) => Ok(*v),
                _ => Err(self.error(format!("{what} requires an integer argument"))),
            }
        };

        let require_string_arg = |idx: usize, what: &str| -> Result<String> {
            match positional.get(idx) {
                Some(ArgValue::Literal(Literal::String(s))) => Ok(s.clone()),
                Some(ArgValue::Ident(s)) => Ok(s.clone()),
                _ => Err(self.error(format!("{what} requires a string argument"))),
            }
        };

        let named_bool = |key: &str, default: bool| -> bool {
            match named_lookup(key) {
                Some(ArgValue::Literal(Literal::Boolean(b))) => *b,
                _ => default,
            }
        };

        let named_path = |key: &str| -> Option<Vec<Segment>> {
            match named_lookup(key) {
                Some(ArgValue::Path(p)) => Some(p.clone()),
                Some(ArgValue::Ident(s)) => Some(vec![Segment::bare(s.clone())]),
                _ => None,
            }
        };

        let named_string = |key: &str| -> Option<String> {
            match named_lookup(key) {
                Some(ArgValue::Literal(Literal::String(s))) => Some(s.clone()),
                Some(ArgValue::Ident(s)) => Some(s.clone()),
                Some(ArgValue::Path(p)) => Some(crate::ast::path_to_string(p)),
                _ => None,
            }
        };

        Ok(match name {
            "sum" => PipelineOp::Sum { path: opt_path_arg(0) },
            "stats" => PipelineOp::Stats { path: opt_path_arg(0) },
            "sketch" => PipelineOp::Sketch { path: opt_path_arg(0) },
            "quantiles" => {
                let mut quantiles = Vec::new();
                let mut path = None;

                for arg in &positional {
                    match arg {
                        ArgValue::Literal(Literal::Float(f)) => quantiles.push(*f),
                        ArgValue::Literal(Literal::Integer(i)) => quantiles.push(*i as f64),
                        ArgValue::Path(p) => path = Some(p.clone()),
                        ArgValue::Ident(s) => path = Some(vec![Segment::bare(s.clone())]),
                        ArgValue::Literal(_) => {}
                    }
                }

                if let Some(p) = named_path("path") {
                    path = Some(p);
                }

                if quantiles.is_empty() {
                    return Err(self.error("quantiles() requires at least one quantile"));
                }

                PipelineOp::Quantiles { quantiles, path }
            }
            "groupBy" => {
                let key = require_path_arg(0, "groupBy")?;
                let agg = match named_string("agg").as_deref() {
                    Some("sum") => GroupAgg::Sum,
                    Some("avg") => GroupAgg::Avg,
                    Some("min") => GroupAgg::Min,
                    Some("max") => GroupAgg::Max,
                    Some("count") | None => GroupAgg::Count,
                    Some(other) => {
                        return Err(self.error(format!("unknown groupBy agg: {other}")))
                    }
                };
                let sort_by = match named_string("sortBy").as_deref() {
                    Some("value") => GroupSortBy::Value,
                    _ => GroupSortBy::Key,
                };

                PipelineOp::GroupBy {
                    key,
                    agg,
                    value: named_path("value"),
                    sort_by,
                    asc: named_bool("asc", true),
                }
            }
            "top" => PipelineOp::Top {
                n: require_int_arg(0, "top")?,
                by: named_path("by"),
                asc: named_bool("asc", false),
            },
            "sortBy" => PipelineOp::SortBy {
                field: require_path_arg(0, "sortBy")?,
                asc: named_bool("asc", false),
            },
            "len" => PipelineOp::Len { path: opt_path_arg(0) },
            "uppercase" => PipelineOp::Uppercase { path: opt_path_arg(0) },
            "lowercase" => PipelineOp::Lowercase { path: opt_path_arg(0) },
            "trim" => PipelineOp::Trim { path: opt_path_arg(0) },
            "abs" => PipelineOp::Abs { path: opt_path_arg(0) },
            "round" => PipelineOp::Round { path: opt_path_arg(0) },
            "floor" => PipelineOp::Floor { path: opt_path_arg(0) },
            "ceil" => PipelineOp::Ceil { path: opt_path_arg(0) },
            "contains" => PipelineOp::Contains {
                path: require_path_arg(0, "contains")?,
                needle: require_string_arg(1, "contains")?,
            },
            "replace" => PipelineOp::Replace {
                path: require_path_arg(0, "replace")?,
                from: require_string_arg(1, "replace")?,
                to: require_string_arg(2, "replace")?,
            },
            "toMap" => PipelineOp::ToMap {
                key_field: require_string_arg(0, "toMap")?,
                value_field: require_string_arg(1, "toMap")?,
            },
            "timeRange" => PipelineOp::TimeRange {
                ticks_path: require_path_arg(0, "timeRange")?,
                duration_path: named_path("duration"),
                format: named_string("format"),
            },
            "decorateByTime" => PipelineOp::DecorateByTime {
                decorator_type: require_string_arg(0, "decorateByTime")?,
                fields: named_field_list(&named, "fields"),
                thread_path: named_path("threadPath")
                    .unwrap_or_else(|| crate::ast::path_from_str("eventThread/javaThreadId")),
                decorator_thread_path: named_path("decoratorThreadPath")
                    .unwrap_or_else(|| crate::ast::path_from_str("eventThread/javaThreadId")),
            },
            "decorateByKey" => PipelineOp::DecorateByKey {
                decorator_type: require_string_arg(0, "decorateByKey")?,
                key: named_path("key")
                    .ok_or_else(|| self.error("decorateByKey requires key="))?,
                decorator_key: named_path("decoratorKey")
                    .ok_or_else(|| self.error("decorateByKey requires decoratorKey="))?,
                fields: named_field_list(&named, "fields"),
            },
            other => return Err(self.error(format!("unknown pipeline operator: {other}"))),
        })
    }
}

fn named_field_list(named: &[NamedArg], key: &str) -> Vec<String> {
    match named.iter().find(|a| a.name == key).map(|a| &a.value) {
        Some(ArgValue::Path(p)) => p.iter().map(|s| s.name.clone()).collect(),
        Some(ArgValue::Ident(s)) => vec![s.clone()],
        Some(ArgValue::Literal(Literal::String(s))) => {
            s.split(',').map(|x| x.trim().to_string()).collect()
        }
        _ => Vec::new(),
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn is_bool_func(name: &str) -> bool {
    matches!(
        name,
        "contains" | "starts_with" | "ends_with" | "matches" | "exists" | "empty" | "between"
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ast::*;

    #[test]
    fn parses_simple_count_query() {
        let q = parse("events/jdk.FileRead | count()").unwrap();

        assert_eq!(q.root, Root::Events);
        assert_eq!(q.event_types, vec!["jdk.FileRead".to_string()]);
        assert!(q.segments.is_empty());
        assert_eq!(q.pipeline, vec![PipelineOp::Count]);
    }

    #[test]
    fn parses_predicate_and_sum() {
        let q = parse("events/jdk.FileRead[bytes > 1024] | sum(bytes)").unwrap();

        assert_eq!(q.predicates.len(), 1);
        match &q.predicates[0].expr {
            BoolExpr::Cmp { path, op, literal } => {
                assert_eq!(path_to_string(path), "bytes");
                assert_eq!(*op, CmpOp::Gt);
                assert_eq!(*literal, Literal::Integer(1024));
            }
            other => panic!("unexpected predicate: {other:?}"),
        }

        assert_eq!(
            q.pipeline,
            vec![PipelineOp::Sum {
                path: Some(path_from_str("bytes"))
            }]
        );
    }

    #[test]
    fn parses_projection_path() {
        let q = parse("events/jdk.ExecutionSample/sampledThread/javaName").unwrap();

        assert_eq!(
            q.segments,
            vec![Segment::bare("sampledThread"), Segment::bare("javaName")]
        );
    }

    #[test]
    fn parses_group_by_with_named_args() {
        let q =
            parse("events/jdk.ExecutionSample | groupBy(sampledThread/javaName, agg=count)")
                .unwrap();

        match &q.pipeline[0] {
            PipelineOp::GroupBy { key, agg, .. } => {
                assert_eq!(path_to_string(key), "sampledThread/javaName");
                assert_eq!(*agg, GroupAgg::Count);
            }
            other => panic!("unexpected op: {other:?}"),
        }
    }

    #[test]
    fn parses_select_with_expression_and_alias() {
        let q = parse("events/jdk.FileRead | select(path, bytes/1024 as kb)").unwrap();

        match &q.pipeline[0] {
            PipelineOp::Select { items } => {
                assert_eq!(items.len(), 2);
                assert!(matches!(&items[0], SelectItem::Field { alias: None, .. }));
                assert!(matches!(&items[1], SelectItem::Expression { alias, .. } if alias == "kb"));
            }
            other => panic!("unexpected op: {other:?}"),
        }
    }

    #[test]
    fn parses_regex_predicate() {
        let q = parse(r#"events/jdk.FileRead[path =~ "/tmp/.*"]"#).unwrap();

        match &q.predicates[0].expr {
            BoolExpr::Cmp { op, literal, .. } => {
                assert_eq!(*op, CmpOp::RegexMatch);
                assert_eq!(*literal, Literal::String("/tmp/.*".to_string()));
            }
            other => panic!("unexpected predicate: {other:?}"),
        }
    }

    #[test]
    fn parses_logical_and_not_predicate() {
        let q = parse("events/jdk.FileRead[bytes > 0 and not path = \"/dev/null\"]").unwrap();

        assert!(matches!(
            &q.predicates[0].expr,
            BoolExpr::Logical {
                op: LogicalOp::And,
                ..
            }
        ));
    }

    #[test]
    fn parses_match_mode_prefix() {
        let q = parse(r#"events/jdk.ThreadDump[any:[frames/method/name = "run"]]"#).unwrap();

        assert_eq!(q.predicates[0].mode, MatchMode::Any);
    }

    #[test]
    fn parses_string_template_in_select() {
        let q = parse(r#"events/jdk.FileRead | select("read ${bytes} bytes" as msg)"#).unwrap();

        match &q.pipeline[0] {
            PipelineOp::Select { items } => match &items[0] {
                SelectItem::Expression { expr, alias } => {
                    assert_eq!(alias, "msg");
                    assert!(matches!(expr, Expr::StringTemplate { .. }));
                }
                other => panic!("unexpected item: {other:?}"),
            },
            other => panic!("unexpected op: {other:?}"),
        }
    }

    #[test]
    fn parses_size_suffix_literal() {
        let q = parse("events/jdk.FileRead[bytes > 4K]").unwrap();

        match &q.predicates[0].expr {
            BoolExpr::Cmp { literal, .. } => assert_eq!(*literal, Literal::Integer(4096)),
            other => panic!("unexpected predicate: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_root() {
        let err = parse("bogus/jdk.FileRead").unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
    }

    #[test]
    fn parse_is_idempotent() {
        let text = "events/jdk.FileRead[bytes > 1024] | sortBy(bytes, asc=true) | top(5)";
        let a = parse(text).unwrap();
        let b = parse(text).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn parses_element_index_segment() {
        let q = parse("events/jdk.ThreadDump/frames[0]/method").unwrap();

        assert_eq!(q.segments[0].index, Some(SegmentIndex::Element(0)));
    }

    #[test]
    fn parses_slice_index_segment() {
        let q = parse("events/jdk.ThreadDump/frames[1:4]").unwrap();

        assert_eq!(
            q.segments[0].index,
            Some(SegmentIndex::Slice { start: 1, end: 4 })
        );
    }
}
