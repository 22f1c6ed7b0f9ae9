//! Filter expression parser.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! expr      := and ( ("or" | "||") and )*
//! and       := unary ( ("and" | "&&") unary )*
//! unary     := ("not" | "!") unary | primary
//! primary   := "(" expr ")"
//!            | TEXT_MATCH "(" ident "," string ")"
//!            | ident predicate
//! predicate := cmp literal | "in" list | "not" "in" list | "is" ["not"] "null"
//! list      := "[" [ literal ( "," literal )* ] "]"
//! ```
//!
//! Keywords are case-insensitive. Strings take single or double quotes
//! with backslash escapes.

use crate::error::{FtsError, Result};
use crate::query::filter::{CompareOp, Filter, Literal};

/// Deepest nesting of parentheses and `not` an expression may use.
pub const MAX_FILTER_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Cmp(CompareOp),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Minus,
    And,
    Or,
    Not,
}

/// Parse `expr` into a [`Filter`]. Blank input yields [`Filter::All`].
pub fn parse(expr: &str) -> Result<Filter> {
    if expr.trim().is_empty() {
        return Ok(Filter::All);
    }
    let tokens = lex(expr)?;
    let mut parser = Parser {
        expr,
        tokens,
        pos: 0,
        depth: 0,
    };
    let filter = parser.parse_or()?;
    if let Some(tok) = parser.peek() {
        return Err(parser.error(format!("unexpected token {tok:?}")));
    }
    Ok(filter)
}

fn error(expr: &str, reason: impl Into<String>) -> FtsError {
    FtsError::InvalidFilter {
        expr: expr.to_string(),
        reason: reason.into(),
    }
}

fn lex(expr: &str) -> Result<Vec<Tok>> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Tok::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Tok::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Tok::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Tok::Comma);
                i += 1;
            }
            '-' => {
                tokens.push(Tok::Minus);
                i += 1;
            }
            '=' | '!' | '<' | '>' => {
                let next = chars.get(i + 1).copied();
                let (tok, width) = match (c, next) {
                    ('=', Some('=')) => (Tok::Cmp(CompareOp::Eq), 2),
                    ('!', Some('=')) => (Tok::Cmp(CompareOp::Ne), 2),
                    ('<', Some('=')) => (Tok::Cmp(CompareOp::Le), 2),
                    ('>', Some('=')) => (Tok::Cmp(CompareOp::Ge), 2),
                    ('<', _) => (Tok::Cmp(CompareOp::Lt), 1),
                    ('>', _) => (Tok::Cmp(CompareOp::Gt), 1),
                    ('!', _) => (Tok::Not, 1),
                    _ => return Err(error(expr, format!("unexpected '=' at {i}, use '=='"))),
                };
                tokens.push(tok);
                i += width;
            }
            '&' | '|' => {
                if chars.get(i + 1) != Some(&c) {
                    return Err(error(expr, format!("unexpected '{c}' at {i}")));
                }
                tokens.push(if c == '&' { Tok::And } else { Tok::Or });
                i += 2;
            }
            '\'' | '"' => {
                let (s, end) = lex_string(&chars, i, expr)?;
                tokens.push(Tok::Str(s));
                i = end;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_digit()
                        || matches!(chars[i], '.' | 'e' | 'E')
                        || (matches!(chars[i], '+' | '-') && matches!(chars[i - 1], 'e' | 'E')))
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(lex_number(&text, expr)?);
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.to_ascii_lowercase().as_str() {
                    "and" => Tok::And,
                    "or" => Tok::Or,
                    "not" => Tok::Not,
                    _ => Tok::Ident(word),
                });
            }
            other => return Err(error(expr, format!("unexpected character '{other}' at {i}"))),
        }
    }
    Ok(tokens)
}

fn lex_string(chars: &[char], start: usize, expr: &str) -> Result<(String, usize)> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or_else(|| error(expr, "dangling escape in string literal"))?;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => *other,
                });
                i += 2;
            }
            c if c == quote => return Ok((out, i + 1)),
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(error(expr, "unterminated string literal"))
}

fn lex_number(text: &str, expr: &str) -> Result<Tok> {
    if !text.contains(['.', 'e', 'E']) {
        if let Ok(v) = text.parse::<i64>() {
            return Ok(Tok::Int(v));
        }
    }
    text.parse::<f64>()
        .map(Tok::Float)
        .map_err(|_| error(expr, format!("invalid number {text}")))
}

struct Parser<'a> {
    expr: &'a str,
    tokens: Vec<Tok>,
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn error(&self, reason: impl Into<String>) -> FtsError {
        error(self.expr, reason)
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok) -> Result<()> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(self.error(format!("expected {tok:?}, found {:?}", self.peek())))
        }
    }

    fn parse_or(&mut self) -> Result<Filter> {
        let mut children = vec![self.parse_and()?];
        while self.eat(&Tok::Or) {
            children.push(self.parse_and()?);
        }
        Ok(if children.len() == 1 {
            children.remove(0)
        } else {
            Filter::Or(children)
        })
    }

    fn parse_and(&mut self) -> Result<Filter> {
        let mut children = vec![self.parse_unary()?];
        while self.eat(&Tok::And) {
            children.push(self.parse_unary()?);
        }
        Ok(if children.len() == 1 {
            children.remove(0)
        } else {
            Filter::And(children)
        })
    }

    fn descend(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_FILTER_DEPTH {
            return Err(self.error(format!("nesting deeper than {MAX_FILTER_DEPTH}")));
        }
        Ok(())
    }

    fn parse_unary(&mut self) -> Result<Filter> {
        if self.eat(&Tok::Not) {
            self.descend()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Filter::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Filter> {
        match self.next() {
            Some(Tok::LParen) => {
                self.descend()?;
                let inner = self.parse_or()?;
                self.expect(&Tok::RParen)?;
                self.depth -= 1;
                Ok(inner)
            }
            Some(Tok::Ident(name)) if name.eq_ignore_ascii_case("text_match") => {
                self.expect(&Tok::LParen)?;
                let field = match self.next() {
                    Some(Tok::Ident(field)) => field,
                    other => return Err(self.error(format!("expected field name, found {other:?}"))),
                };
                self.expect(&Tok::Comma)?;
                let query = match self.next() {
                    Some(Tok::Str(q)) => q,
                    other => return Err(self.error(format!("expected query string, found {other:?}"))),
                };
                self.expect(&Tok::RParen)?;
                Ok(Filter::TextMatch { field, query })
            }
            Some(Tok::Ident(field)) => self.parse_predicate(field),
            other => Err(self.error(format!("expected a predicate, found {other:?}"))),
        }
    }

    fn parse_predicate(&mut self, field: String) -> Result<Filter> {
        match self.next() {
            Some(Tok::Cmp(op)) => Ok(Filter::Compare {
                field,
                op,
                value: self.parse_literal()?,
            }),
            Some(Tok::Ident(kw)) if kw.eq_ignore_ascii_case("in") => Ok(Filter::In {
                field,
                values: self.parse_list()?,
            }),
            Some(Tok::Not) => match self.next() {
                Some(Tok::Ident(kw)) if kw.eq_ignore_ascii_case("in") => Ok(Filter::NotIn {
                    field,
                    values: self.parse_list()?,
                }),
                other => Err(self.error(format!("expected 'in' after 'not', found {other:?}"))),
            },
            Some(Tok::Ident(kw)) if kw.eq_ignore_ascii_case("is") => {
                let negated = self.eat(&Tok::Not);
                match self.next() {
                    Some(Tok::Ident(kw)) if kw.eq_ignore_ascii_case("null") => Ok(if negated {
                        Filter::IsNotNull { field }
                    } else {
                        Filter::IsNull { field }
                    }),
                    other => Err(self.error(format!("expected 'null', found {other:?}"))),
                }
            }
            other => Err(self.error(format!("expected an operator after {field}, found {other:?}"))),
        }
    }

    fn parse_list(&mut self) -> Result<Vec<Literal>> {
        self.expect(&Tok::LBracket)?;
        let mut values = Vec::new();
        if self.eat(&Tok::RBracket) {
            return Ok(values);
        }
        loop {
            values.push(self.parse_literal()?);
            if self.eat(&Tok::RBracket) {
                return Ok(values);
            }
            self.expect(&Tok::Comma)?;
        }
    }

    fn parse_literal(&mut self) -> Result<Literal> {
        let negative = self.eat(&Tok::Minus);
        let literal = match self.next() {
            Some(Tok::Int(v)) => Literal::Int(if negative { -v } else { v }),
            Some(Tok::Float(v)) => Literal::Float(if negative { -v } else { v }),
            Some(Tok::Str(s)) if !negative => Literal::String(s),
            Some(Tok::Ident(word)) if !negative && word.eq_ignore_ascii_case("true") => Literal::Bool(true),
            Some(Tok::Ident(word)) if !negative && word.eq_ignore_ascii_case("false") => Literal::Bool(false),
            other => return Err(self.error(format!("expected a literal, found {other:?}"))),
        };
        Ok(literal)
    }
}
