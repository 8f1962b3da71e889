//! Recursive-descent parser for filter text.
//!
//! ```text
//! Filter  ::= OrExpr
//! OrExpr  ::= AndExpr { "||" AndExpr }
//! AndExpr ::= Term { "&&" Term }
//! Term    ::= "(" OrExpr ")" | "true" | "false" | Compare
//! Compare ::= Path Op Rhs
//! Path    ::= identifier { "." identifier }
//! Op      ::= "==" | "!=" | ">=" | "<=" | "<" | ">" | "in" | "!in"
//! Rhs     ::= "?" digits | Path | "null"
//! ```

use common::{DbError, DbResult};

use crate::{ColumnPath, CompareOp, Operand, RowFilter};

pub fn parse(text: &str) -> DbResult<RowFilter> {
    let tokens = tokenize(text)?;
    let mut parser = Parser { tokens, pos: 0 };
    let filter = parser.or_expr()?;
    match parser.peek() {
        None => Ok(filter),
        Some(tok) => Err(DbError::Syntax(format!(
            "unexpected trailing input at '{tok}'"
        ))),
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Ident(String),
    Arg(i32),
    Op(CompareOp),
    AndAnd,
    OrOr,
    LParen,
    RParen,
    Dot,
    Null,
    True,
    False,
}

impl std::fmt::Display for Tok {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tok::Ident(s) => write!(f, "{s}"),
            Tok::Arg(n) => write!(f, "?{n}"),
            Tok::Op(op) => write!(f, "{}", op.token()),
            Tok::AndAnd => write!(f, "&&"),
            Tok::OrOr => write!(f, "||"),
            Tok::LParen => write!(f, "("),
            Tok::RParen => write!(f, ")"),
            Tok::Dot => write!(f, "."),
            Tok::Null => write!(f, "null"),
            Tok::True => write!(f, "true"),
            Tok::False => write!(f, "false"),
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
            '.' => {
                tokens.push(Tok::Dot);
                i += 1;
            }
            '&' if bytes.get(i + 1) == Some(&b'&') => {
                tokens.push(Tok::AndAnd);
                i += 2;
            }
            '|' if bytes.get(i + 1) == Some(&b'|') => {
                tokens.push(Tok::OrOr);
                i += 2;
            }
            '=' if bytes.get(i + 1) == Some(&b'=') => {
                tokens.push(Tok::Op(CompareOp::Eq));
                i += 2;
            }
            '!' if bytes.get(i + 1) == Some(&b'=') => {
                tokens.push(Tok::Op(CompareOp::Ne));
                i += 2;
            }
            '!' if rest_starts_with(bytes, i + 1, b"in") => {
                tokens.push(Tok::Op(CompareOp::NotIn));
                i += 3;
            }
            '>' if bytes.get(i + 1) == Some(&b'=') => {
                tokens.push(Tok::Op(CompareOp::Ge));
                i += 2;
            }
            '<' if bytes.get(i + 1) == Some(&b'=') => {
                tokens.push(Tok::Op(CompareOp::Le));
                i += 2;
            }
            '>' => {
                tokens.push(Tok::Op(CompareOp::Gt));
                i += 1;
            }
            '<' => {
                tokens.push(Tok::Op(CompareOp::Lt));
                i += 1;
            }
            '?' => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if end == start {
                    return Err(DbError::Syntax("argument number expected after '?'".into()));
                }
                let n: i32 = text[start..end]
                    .parse()
                    .map_err(|_| DbError::Syntax("argument number out of range".into()))?;
                if n == 0 {
                    return Err(DbError::Syntax("arguments are numbered from 1".into()));
                }
                tokens.push(Tok::Arg(n));
                i = end;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                let mut end = i;
                while end < bytes.len()
                    && ((bytes[end] as char).is_ascii_alphanumeric() || bytes[end] == b'_')
                {
                    end += 1;
                }
                let word = &text[start..end];
                tokens.push(match word {
                    "in" => Tok::Op(CompareOp::In),
                    "null" => Tok::Null,
                    "true" => Tok::True,
                    "false" => Tok::False,
                    _ => Tok::Ident(word.to_string()),
                });
                i = end;
            }
            other => {
                return Err(DbError::Syntax(format!("unexpected character '{other}'")));
            }
        }
    }
    Ok(tokens)
}

fn rest_starts_with(bytes: &[u8], at: usize, word: &[u8]) -> bool {
    if bytes.len() < at + word.len() || &bytes[at..at + word.len()] != word {
        return false;
    }
    // The keyword must not run into a longer identifier.
    match bytes.get(at + word.len()) {
        Some(&b) => !(b as char).is_ascii_alphanumeric() && b != b'_',
        None => true,
    }
}

struct Parser {
    tokens: Vec<Tok>,
    pos: usize,
}

impl Parser {
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

    fn expect(&mut self, tok: Tok) -> DbResult<()> {
        match self.next() {
            Some(found) if found == tok => Ok(()),
            Some(found) => Err(DbError::Syntax(format!("expected '{tok}', found '{found}'"))),
            None => Err(DbError::Syntax(format!("expected '{tok}', found end"))),
        }
    }

    fn or_expr(&mut self) -> DbResult<RowFilter> {
        let mut children = vec![self.and_expr()?];
        while self.peek() == Some(&Tok::OrOr) {
            self.next();
            children.push(self.and_expr()?);
        }
        Ok(RowFilter::or(children))
    }

    fn and_expr(&mut self) -> DbResult<RowFilter> {
        let mut children = vec![self.term()?];
        while self.peek() == Some(&Tok::AndAnd) {
            self.next();
            children.push(self.term()?);
        }
        Ok(RowFilter::and(children))
    }

    fn term(&mut self) -> DbResult<RowFilter> {
        match self.peek() {
            Some(Tok::LParen) => {
                self.next();
                let inner = self.or_expr()?;
                self.expect(Tok::RParen)?;
                Ok(inner)
            }
            Some(Tok::True) => {
                self.next();
                Ok(RowFilter::True)
            }
            Some(Tok::False) => {
                self.next();
                Ok(RowFilter::False)
            }
            _ => self.compare(),
        }
    }

    fn compare(&mut self) -> DbResult<RowFilter> {
        let column = self.path()?;
        let op = match self.next() {
            Some(Tok::Op(op)) => op,
            Some(found) => {
                return Err(DbError::Syntax(format!(
                    "expected comparison operator, found '{found}'"
                )));
            }
            None => return Err(DbError::Syntax("expected comparison operator".into())),
        };
        let rhs = match self.next() {
            Some(Tok::Arg(n)) => Operand::Arg(n),
            Some(Tok::Null) => Operand::Null,
            Some(Tok::Ident(_)) => {
                self.pos -= 1;
                Operand::Column(self.path()?)
            }
            Some(found) => {
                return Err(DbError::Syntax(format!(
                    "expected argument, column, or null, found '{found}'"
                )));
            }
            None => return Err(DbError::Syntax("expected comparison operand".into())),
        };
        Ok(RowFilter::compare(column, op, rhs))
    }

    fn path(&mut self) -> DbResult<ColumnPath> {
        let mut segments = Vec::new();
        match self.next() {
            Some(Tok::Ident(name)) => segments.push(name),
            Some(found) => {
                return Err(DbError::Syntax(format!(
                    "expected column name, found '{found}'"
                )));
            }
            None => return Err(DbError::Syntax("expected column name".into())),
        }
        while self.peek() == Some(&Tok::Dot) {
            self.next();
            match self.next() {
                Some(Tok::Ident(name)) => segments.push(name),
                Some(found) => {
                    return Err(DbError::Syntax(format!(
                        "expected column name after '.', found '{found}'"
                    )));
                }
                None => return Err(DbError::Syntax("expected column name after '.'".into())),
            }
        }
        Ok(ColumnPath::new(segments))
    }
}
