//! Recursive-descent parser for join-spec text.
//!
//! ```text
//! JoinOp ::= Source { Type Source }
//! Source ::= Column | "(" JoinOp ")"
//! Column ::= identifier
//! Type   ::= ":" | "::" | ">:" | ":<" | ">:<" | ">" | "<" | "><"
//! ```
//!
//! Consecutive `:` joins at one nesting level collapse into a single
//! `InnerJoins` group; full joins are wrapped under ordinal names.

use std::collections::HashSet;
use std::sync::Arc;

use catalog::JoinSchema;
use common::{DbError, DbResult};
use storage::Table;

use crate::{ColumnRef, FullJoin, JoinOp, JoinType, SpecNode};

pub fn parse(
    text: &str,
    schema: &JoinSchema,
    tables: &[Arc<dyn Table>],
) -> DbResult<SpecNode> {
    let tokens = tokenize(text)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        schema,
        tables,
        next_table: 0,
        seen: HashSet::new(),
        full_ordinal: 0,
    };
    let root = parser.join_expr()?;
    if let Some(tok) = parser.peek() {
        return Err(DbError::Syntax(format!(
            "unexpected trailing input at '{tok}'"
        )));
    }
    if parser.next_table != tables.len() {
        return Err(DbError::TypeMismatch(format!(
            "spec names {} columns but {} table handles were supplied",
            parser.next_table,
            tables.len()
        )));
    }
    Ok(root)
}

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Ident(String),
    Type(JoinType),
    LParen,
    RParen,
}

impl std::fmt::Display for Tok {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tok::Ident(name) => write!(f, "{name}"),
            Tok::Type(ty) => write!(f, "{}", ty.token()),
            Tok::LParen => write!(f, "("),
            Tok::RParen => write!(f, ")"),
        }
    }
}

fn tokenize(text: &str) -> DbResult<Vec<Tok>> {
    let mut tokens = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Tok::RParen);
                i += 1;
            }
            '>' | '<' | ':' => {
                // Longest operator first: ">:<" then the two-character forms.
                let rest = &text[i..];
                let (ty, len) = if rest.starts_with(">:<") {
                    (JoinType::FullOuter, 3)
                } else if rest.starts_with("><") {
                    (JoinType::FullAnti, 2)
                } else if rest.starts_with(">:") {
                    (JoinType::LeftOuter, 2)
                } else if rest.starts_with(":<") {
                    (JoinType::RightOuter, 2)
                } else if rest.starts_with("::") {
                    (JoinType::Straight, 2)
                } else if rest.starts_with(':') {
                    (JoinType::Inner, 1)
                } else if rest.starts_with('>') {
                    (JoinType::LeftAnti, 1)
                } else {
                    (JoinType::RightAnti, 1)
                };
                tokens.push(Tok::Type(ty));
                i += len;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                tokens.push(Tok::Ident(text[start..i].to_string()));
            }
            other => {
                return Err(DbError::Syntax(format!(
                    "unexpected character '{other}' in join spec"
                )));
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Tok>,
    pos: usize,
    schema: &'a JoinSchema,
    tables: &'a [Arc<dyn Table>],
    next_table: usize,
    seen: HashSet<String>,
    full_ordinal: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn join_expr(&mut self) -> DbResult<SpecNode> {
        let mut node = self.source()?;
        while let Some(Tok::Type(ty)) = self.peek() {
            let ty = *ty;
            self.pos += 1;
            let right = self.source()?;
            node = self.combine(node, ty, right);
        }
        Ok(node)
    }

    fn source(&mut self) -> DbResult<SpecNode> {
        match self.peek().cloned() {
            Some(Tok::LParen) => {
                self.pos += 1;
                let inner = self.join_expr()?;
                match self.peek() {
                    Some(Tok::RParen) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    Some(tok) => Err(DbError::Syntax(format!("expected ')', found '{tok}'"))),
                    None => Err(DbError::Syntax("unmatched '('".into())),
                }
            }
            Some(Tok::Ident(name)) => {
                self.pos += 1;
                self.column(name)
            }
            Some(tok) => Err(DbError::Syntax(format!(
                "expected column or '(', found '{tok}'"
            ))),
            None => Err(DbError::Syntax("unexpected end of join spec".into())),
        }
    }

    fn column(&mut self, name: String) -> DbResult<SpecNode> {
        let declared = self
            .schema
            .column(&name)
            .ok_or_else(|| DbError::UnknownColumn(name.clone()))?;
        if !self.seen.insert(name.clone()) {
            return Err(DbError::DuplicateColumn(name));
        }
        let table = self
            .tables
            .get(self.next_table)
            .ok_or_else(|| {
                DbError::TypeMismatch(format!(
                    "no table handle supplied for column '{name}'"
                ))
            })?
            .clone();
        self.next_table += 1;
        if **table.schema() != *declared.schema {
            return Err(DbError::TypeMismatch(format!(
                "table '{}' does not match the declared row type of column '{name}'",
                table.name()
            )));
        }
        Ok(SpecNode::Column(ColumnRef {
            name,
            schema: declared.schema.clone(),
            nullable: declared.nullable,
            table,
        }))
    }

    fn combine(&mut self, left: SpecNode, ty: JoinType, right: SpecNode) -> SpecNode {
        if ty == JoinType::Inner {
            return match left {
                SpecNode::InnerJoins(mut children) => {
                    children.push(right);
                    SpecNode::InnerJoins(children)
                }
                other => SpecNode::InnerJoins(vec![other, right]),
            };
        }
        let op = JoinOp { ty, left, right };
        if ty.is_full() {
            let name = format!("fj{}", self.full_ordinal);
            self.full_ordinal += 1;
            SpecNode::FullJoin(Box::new(FullJoin { name, op }))
        } else {
            SpecNode::Join(Box::new(op))
        }
    }
}
