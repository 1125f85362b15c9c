//! Tokenizer and recursive-descent parser for the SQL dialect relmap emits.
//!
//! The grammar is deliberately small: single-table `SELECT` with an optional
//! alias, `WHERE`, `ORDER BY`, `LIMIT`/`OFFSET` and the five aggregates,
//! `select nextval('seq')`, `INSERT ... values`, `UPDATE ... SET`,
//! `DELETE FROM`, plus `CREATE TABLE` / `CREATE SEQUENCE` for fixtures.
//! Statements carry literal values only; there are no bind parameters.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use relmap_core::error::QueryErrorKind;
use relmap_core::{Error, Result, Value};

// ==================== Tokens ====================

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Word(String),
    Number(String),
    Text(String),
    Blob(Vec<u8>),
    Symbol(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) | Token::Number(w) | Token::Symbol(w) => write!(f, "{}", w),
            Token::Text(t) => write!(f, "'{}'", t),
            Token::Blob(_) => write!(f, "X'..'"),
        }
    }
}

const TOKEN_PATTERN: &str = r"(?x)
    ^\s*(?:
        [xX]'(?P<blob>[0-9A-Fa-f]*)'
      | '(?P<text>(?:[^']|'')*)'
      | (?P<number>-?\d+(?:\.\d+)?(?:[eE][+-]?\d+)?)
      | (?P<word>[A-Za-z_][A-Za-z0-9_$]*)
      | (?P<symbol><>|!=|<=|>=|[=<>(),.*;])
    )";

fn token_regex() -> Result<&'static Regex> {
    static TOKEN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    TOKEN
        .get_or_init(|| Regex::new(TOKEN_PATTERN))
        .as_ref()
        .map_err(|e| Error::Custom(format!("SQL token pattern failed to compile: {}", e)))
}

/// Split `sql` into tokens.
pub(crate) fn tokenize(sql: &str) -> Result<Vec<Token>> {
    let regex = token_regex()?;
    let mut tokens = Vec::new();
    let mut rest = sql;
    loop {
        if rest.trim_start().is_empty() {
            return Ok(tokens);
        }
        let Some(caps) = regex.captures(rest) else {
            let near: String = rest.trim_start().chars().take(16).collect();
            return Err(Error::query(
                QueryErrorKind::Syntax,
                sql,
                format!("unexpected input near \"{}\"", near),
            ));
        };
        let token = if let Some(m) = caps.name("blob") {
            Token::Blob(decode_hex(m.as_str()).ok_or_else(|| {
                Error::query(QueryErrorKind::Syntax, sql, "odd number of hex digits")
            })?)
        } else if let Some(m) = caps.name("text") {
            Token::Text(m.as_str().replace("''", "'"))
        } else if let Some(m) = caps.name("number") {
            Token::Number(m.as_str().to_string())
        } else if let Some(m) = caps.name("word") {
            Token::Word(m.as_str().to_string())
        } else if let Some(m) = caps.name("symbol") {
            Token::Symbol(m.as_str().to_string())
        } else {
            return Err(Error::query(QueryErrorKind::Syntax, sql, "empty token"));
        };
        tokens.push(token);
        rest = &rest[caps.get(0).map_or(rest.len(), |m| m.end())..];
    }
}

fn decode_hex(digits: &str) -> Option<Vec<u8>> {
    if digits.len() % 2 != 0 {
        return None;
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).ok())
        .collect()
}

// ==================== Syntax tree ====================

/// A possibly alias-qualified column reference.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ColumnRef {
    pub qualifier: Option<String>,
    pub name: String,
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{}.{}", q, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    Column(ColumnRef),
    Compare(Box<Expr>, CompareOp, Box<Expr>),
    IsNull { expr: Box<Expr>, negated: bool },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        escape: Option<Box<Expr>>,
        negated: bool,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AggregateFn {
    Sum,
    Count,
    Min,
    Max,
    Avg,
}

impl AggregateFn {
    fn from_word(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().as_str() {
            "SUM" => Some(Self::Sum),
            "COUNT" => Some(Self::Count),
            "MIN" => Some(Self::Min),
            "MAX" => Some(Self::Max),
            "AVG" => Some(Self::Avg),
            _ => None,
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Sum => "SUM",
            Self::Count => "COUNT",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Avg => "AVG",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SelectItem {
    Wildcard,
    Column(ColumnRef),
    /// `None` argument means `COUNT(*)`.
    Aggregate(AggregateFn, Option<ColumnRef>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OrderKey {
    pub expr: Expr,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Select {
    pub items: Vec<SelectItem>,
    pub table: String,
    pub alias: Option<String>,
    pub filter: Option<Expr>,
    pub order: Vec<OrderKey>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Statement {
    CreateTable {
        table: String,
        columns: Vec<String>,
    },
    CreateSequence {
        name: String,
        start: i64,
    },
    Insert {
        table: String,
        columns: Vec<String>,
        values: Vec<Value>,
    },
    Update {
        table: String,
        assignments: Vec<(String, Value)>,
        filter: Option<Expr>,
    },
    Delete {
        table: String,
        filter: Option<Expr>,
    },
    Select(Select),
    NextVal(String),
}

impl Statement {
    /// Does this statement produce a result set?
    pub(crate) fn returns_rows(&self) -> bool {
        matches!(self, Statement::Select(_) | Statement::NextVal(_))
    }
}

// ==================== Parser ====================

/// Parse a single statement. A trailing `;` is allowed.
pub(crate) fn parse(sql: &str) -> Result<Statement> {
    let mut parser = Parser {
        sql,
        tokens: tokenize(sql)?,
        pos: 0,
    };
    let statement = parser.statement()?;
    parser.symbol(";");
    if let Some(token) = parser.peek() {
        return Err(parser.error(format!("unexpected trailing {}", token)));
    }
    Ok(statement)
}

const CLAUSE_KEYWORDS: [&str; 5] = ["WHERE", "ORDER", "LIMIT", "OFFSET", "SET"];

struct Parser<'a> {
    sql: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, message: impl Into<String>) -> Error {
        Error::query(QueryErrorKind::Syntax, self.sql, message)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}", keyword)))
        }
    }

    fn at_symbol(&self, symbol: &str) -> bool {
        matches!(self.peek(), Some(Token::Symbol(s)) if s == symbol)
    }

    fn symbol(&mut self, symbol: &str) -> bool {
        if self.at_symbol(symbol) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, symbol: &str) -> Result<()> {
        if self.symbol(symbol) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", symbol)))
        }
    }

    fn identifier(&mut self) -> Result<String> {
        match self.advance() {
            Some(Token::Word(w)) => Ok(w),
            Some(other) => Err(self.error(format!("expected identifier, found {}", other))),
            None => Err(self.error("expected identifier, found end of statement")),
        }
    }

    fn unsigned(&mut self) -> Result<u64> {
        match self.advance() {
            Some(Token::Number(n)) => n
                .parse()
                .map_err(|_| self.error(format!("expected a non-negative integer, found {}", n))),
            _ => Err(self.error("expected a non-negative integer")),
        }
    }

    fn identifier_list(&mut self) -> Result<Vec<String>> {
        self.expect_symbol("(")?;
        let mut names = vec![self.identifier()?];
        while self.symbol(",") {
            names.push(self.identifier()?);
        }
        self.expect_symbol(")")?;
        Ok(names)
    }

    fn statement(&mut self) -> Result<Statement> {
        if self.keyword("SELECT") {
            self.select()
        } else if self.keyword("INSERT") {
            self.insert()
        } else if self.keyword("UPDATE") {
            self.update()
        } else if self.keyword("DELETE") {
            self.expect_keyword("FROM")?;
            let table = self.identifier()?;
            let filter = self.where_clause()?;
            Ok(Statement::Delete { table, filter })
        } else if self.keyword("CREATE") {
            self.create()
        } else {
            Err(self.error("unsupported statement"))
        }
    }

    fn create(&mut self) -> Result<Statement> {
        if self.keyword("TABLE") {
            let table = self.identifier()?;
            let columns = self.identifier_list()?;
            Ok(Statement::CreateTable { table, columns })
        } else if self.keyword("SEQUENCE") {
            let name = self.identifier()?;
            let mut start = 1;
            if self.keyword("START") {
                self.keyword("WITH");
                start = match self.literal()? {
                    Value::BigInt(n) => n,
                    other => return Err(self.error(format!("bad sequence start {}", other))),
                };
            }
            Ok(Statement::CreateSequence { name, start })
        } else {
            Err(self.error("expected TABLE or SEQUENCE"))
        }
    }

    fn insert(&mut self) -> Result<Statement> {
        self.expect_keyword("INTO")?;
        let table = self.identifier()?;
        let columns = self.identifier_list()?;
        self.expect_keyword("VALUES")?;
        self.expect_symbol("(")?;
        let mut values = vec![self.literal()?];
        while self.symbol(",") {
            values.push(self.literal()?);
        }
        self.expect_symbol(")")?;
        if columns.len() != values.len() {
            return Err(self.error(format!(
                "{} columns but {} values",
                columns.len(),
                values.len()
            )));
        }
        Ok(Statement::Insert {
            table,
            columns,
            values,
        })
    }

    fn update(&mut self) -> Result<Statement> {
        let table = self.identifier()?;
        self.expect_keyword("SET")?;
        let mut assignments = Vec::new();
        loop {
            let column = self.identifier()?;
            self.expect_symbol("=")?;
            assignments.push((column, self.literal()?));
            if !self.symbol(",") {
                break;
            }
        }
        let filter = self.where_clause()?;
        Ok(Statement::Update {
            table,
            assignments,
            filter,
        })
    }

    fn select(&mut self) -> Result<Statement> {
        if self.at_keyword("nextval") && matches!(self.peek_at(1), Some(Token::Symbol(s)) if s == "(")
        {
            self.pos += 2;
            let name = match self.advance() {
                Some(Token::Text(name)) => name,
                _ => return Err(self.error("nextval expects a quoted sequence name")),
            };
            self.expect_symbol(")")?;
            return Ok(Statement::NextVal(name));
        }

        let mut items = vec![self.select_item()?];
        while self.symbol(",") {
            items.push(self.select_item()?);
        }
        self.expect_keyword("FROM")?;
        let table = self.identifier()?;
        let alias = match self.peek() {
            Some(Token::Word(w)) if !CLAUSE_KEYWORDS.iter().any(|k| w.eq_ignore_ascii_case(k)) => {
                Some(self.identifier()?)
            }
            _ => None,
        };
        let filter = self.where_clause()?;

        let mut order = Vec::new();
        if self.keyword("ORDER") {
            self.expect_keyword("BY")?;
            loop {
                let expr = self.operand()?;
                let descending = if self.keyword("DESC") {
                    true
                } else {
                    self.keyword("ASC");
                    false
                };
                order.push(OrderKey { expr, descending });
                if !self.symbol(",") {
                    break;
                }
            }
        }

        let limit = if self.keyword("LIMIT") {
            Some(self.unsigned()?)
        } else {
            None
        };
        let offset = if self.keyword("OFFSET") {
            Some(self.unsigned()?)
        } else {
            None
        };

        Ok(Statement::Select(Select {
            items,
            table,
            alias,
            filter,
            order,
            limit,
            offset,
        }))
    }

    fn select_item(&mut self) -> Result<SelectItem> {
        if self.symbol("*") {
            return Ok(SelectItem::Wildcard);
        }
        if let Some(Token::Word(w)) = self.peek() {
            if let Some(function) = AggregateFn::from_word(w) {
                if matches!(self.peek_at(1), Some(Token::Symbol(s)) if s == "(") {
                    self.pos += 2;
                    let argument = if self.symbol("*") {
                        None
                    } else {
                        Some(self.column_ref()?)
                    };
                    self.expect_symbol(")")?;
                    return Ok(SelectItem::Aggregate(function, argument));
                }
            }
        }
        Ok(SelectItem::Column(self.column_ref()?))
    }

    fn column_ref(&mut self) -> Result<ColumnRef> {
        let first = self.identifier()?;
        if self.symbol(".") {
            Ok(ColumnRef {
                qualifier: Some(first),
                name: self.identifier()?,
            })
        } else {
            Ok(ColumnRef {
                qualifier: None,
                name: first,
            })
        }
    }

    fn where_clause(&mut self) -> Result<Option<Expr>> {
        if self.keyword("WHERE") {
            Ok(Some(self.or_expr()?))
        } else {
            Ok(None)
        }
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut left = self.and_expr()?;
        while self.keyword("OR") {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut left = self.not_expr()?;
        while self.keyword("AND") {
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr> {
        if self.keyword("NOT") {
            Ok(Expr::Not(Box::new(self.not_expr()?)))
        } else {
            self.predicate()
        }
    }

    fn predicate(&mut self) -> Result<Expr> {
        let left = self.operand()?;

        if self.keyword("IS") {
            let negated = self.keyword("NOT");
            self.expect_keyword("NULL")?;
            return Ok(Expr::IsNull {
                expr: Box::new(left),
                negated,
            });
        }

        let negated_like =
            self.at_keyword("NOT") && matches!(self.peek_at(1), Some(Token::Word(w)) if w.eq_ignore_ascii_case("LIKE"));
        if negated_like {
            self.pos += 1;
        }
        if self.keyword("LIKE") {
            let pattern = self.operand()?;
            let escape = if self.keyword("ESCAPE") {
                Some(Box::new(self.operand()?))
            } else {
                None
            };
            return Ok(Expr::Like {
                expr: Box::new(left),
                pattern: Box::new(pattern),
                escape,
                negated: negated_like,
            });
        }

        let op = match self.peek() {
            Some(Token::Symbol(s)) => match s.as_str() {
                "=" => Some(CompareOp::Eq),
                "<>" | "!=" => Some(CompareOp::Ne),
                "<" => Some(CompareOp::Lt),
                "<=" => Some(CompareOp::Le),
                ">" => Some(CompareOp::Gt),
                ">=" => Some(CompareOp::Ge),
                _ => None,
            },
            _ => None,
        };
        match op {
            Some(op) => {
                self.pos += 1;
                let right = self.operand()?;
                Ok(Expr::Compare(Box::new(left), op, Box::new(right)))
            }
            None => Ok(left),
        }
    }

    fn operand(&mut self) -> Result<Expr> {
        if self.symbol("(") {
            let inner = self.or_expr()?;
            self.expect_symbol(")")?;
            return Ok(inner);
        }
        match self.peek() {
            Some(Token::Word(w))
                if ["NULL", "TRUE", "FALSE"]
                    .iter()
                    .any(|k| w.eq_ignore_ascii_case(k)) =>
            {
                Ok(Expr::Literal(self.literal()?))
            }
            Some(Token::Word(_)) => Ok(Expr::Column(self.column_ref()?)),
            Some(_) => Ok(Expr::Literal(self.literal()?)),
            None => Err(self.error("expected an operand, found end of statement")),
        }
    }

    fn literal(&mut self) -> Result<Value> {
        match self.advance() {
            Some(Token::Number(n)) => number_literal(&n).ok_or_else(|| self.error(format!("bad number {}", n))),
            Some(Token::Text(t)) => Ok(Value::Text(t)),
            Some(Token::Blob(b)) => Ok(Value::Bytes(b)),
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("NULL") => Ok(Value::Null),
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("TRUE") => Ok(Value::Bool(true)),
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("FALSE") => Ok(Value::Bool(false)),
            Some(other) => Err(self.error(format!("expected a literal, found {}", other))),
            None => Err(self.error("expected a literal, found end of statement")),
        }
    }
}

/// Integers become `BigInt`, anything with a fraction or exponent `Double`.
fn number_literal(text: &str) -> Option<Value> {
    if text.contains(['.', 'e', 'E']) {
        text.parse().ok().map(Value::Double)
    } else {
        text.parse()
            .ok()
            .map(Value::BigInt)
            .or_else(|| text.parse().ok().map(Value::Double))
    }
}
