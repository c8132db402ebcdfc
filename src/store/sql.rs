//! A small subset of the Cosmos DB SQL dialect, evaluated in process.
//!
//! Supported shape:
//!
//! ```text
//! SELECT [DISTINCT] [TOP n] (* | VALUE COUNT(1) | VALUE path | path, ...)
//! FROM container [[AS] alias]
//! [WHERE cond]            -- =, !=, <>, <, <=, >, >=, AND, OR, NOT, IS_NULL(), IS_DEFINED()
//! [ORDER BY path [ASC|DESC]]
//! [OFFSET n LIMIT m]
//! ```
//!
//! Anything else is rejected with [`StoreError::InvalidQuery`].

use std::cmp::Ordering;

use serde_json::{Map, Number, Value as JsonValue};

use super::{SqlQuery, StoreError, StoreResult};

const RESERVED: &[&str] = &[
    "select", "distinct", "top", "value", "from", "as", "where", "and", "or", "not", "order",
    "by", "asc", "desc", "offset", "limit", "join", "group",
];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(Number),
    Str(String),
    Param(String),
    Sym(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
struct Path {
    root: String,
    segments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum Projection {
    All,
    Count,
    Value(Path),
    Fields(Vec<Path>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Path(Path),
    Literal(JsonValue),
    Param(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    IsNull(Path),
    IsDefined(Path),
    Compare(Operand, CmpOp, Operand),
}

#[derive(Debug, Clone, PartialEq)]
struct Select {
    distinct: bool,
    top: Option<usize>,
    projection: Projection,
    alias: String,
    filter: Option<Expr>,
    order_by: Option<(Path, bool)>,
    offset: usize,
    limit: Option<usize>,
}

fn invalid(msg: impl Into<String>) -> StoreError {
    StoreError::InvalidQuery(msg.into())
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn tokenize(text: &str) -> StoreResult<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && is_ident_char(chars[i]) {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        if c == '@' {
            let start = i + 1;
            i = start;
            while i < chars.len() && is_ident_char(chars[i]) {
                i += 1;
            }
            if i == start {
                return Err(invalid("empty parameter name after '@'"));
            }
            let name: String = chars[start..i].iter().collect();
            tokens.push(Token::Param(format!("@{}", name)));
            continue;
        }

        let negative = c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());
        if c.is_ascii_digit() || negative {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                i += 1;
                if i < chars.len() && (chars[i] == '+' || chars[i] == '-') {
                    i += 1;
                }
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let raw: String = chars[start..i].iter().collect();
            tokens.push(Token::Number(parse_number(&raw)?));
            continue;
        }

        if c == '\'' || c == '"' {
            let quote = c;
            let mut s = String::new();
            i += 1;
            loop {
                let Some(&ch) = chars.get(i) else {
                    return Err(invalid("unterminated string literal"));
                };
                if ch == '\\' && i + 1 < chars.len() {
                    s.push(match chars[i + 1] {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                    i += 2;
                    continue;
                }
                i += 1;
                if ch == quote {
                    break;
                }
                s.push(ch);
            }
            tokens.push(Token::Str(s));
            continue;
        }

        let next = chars.get(i + 1).copied();
        let two = match (c, next) {
            ('!', Some('=')) => Some("!="),
            ('<', Some('>')) => Some("<>"),
            ('<', Some('=')) => Some("<="),
            ('>', Some('=')) => Some(">="),
            _ => None,
        };
        if let Some(sym) = two {
            tokens.push(Token::Sym(sym));
            i += 2;
            continue;
        }

        let one = match c {
            '*' => "*",
            '(' => "(",
            ')' => ")",
            ',' => ",",
            '.' => ".",
            '[' => "[",
            ']' => "]",
            '=' => "=",
            '<' => "<",
            '>' => ">",
            other => return Err(invalid(format!("unexpected character '{}'", other))),
        };
        tokens.push(Token::Sym(one));
        i += 1;
    }

    Ok(tokens)
}

fn parse_number(raw: &str) -> StoreResult<Number> {
    if let Ok(i) = raw.parse::<i64>() {
        return Ok(Number::from(i));
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .ok_or_else(|| invalid(format!("invalid number '{}'", raw)))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    alias: Option<String>,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn peek_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s.eq_ignore_ascii_case(kw))
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.peek_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> StoreResult<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(invalid(format!("expected {}", kw.to_uppercase())))
        }
    }

    fn eat_sym(&mut self, sym: &str) -> bool {
        if matches!(self.peek(), Some(Token::Sym(s)) if *s == sym) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_sym(&mut self, sym: &str) -> StoreResult<()> {
        if self.eat_sym(sym) {
            Ok(())
        } else {
            Err(invalid(format!("expected '{}'", sym)))
        }
    }

    fn expect_ident(&mut self) -> StoreResult<String> {
        match self.next() {
            Some(Token::Ident(s)) => Ok(s),
            other => Err(invalid(format!("expected identifier, found {:?}", other))),
        }
    }

    fn expect_usize(&mut self) -> StoreResult<usize> {
        match self.next() {
            Some(Token::Number(n)) => n
                .as_u64()
                .map(|n| n as usize)
                .ok_or_else(|| invalid(format!("expected non-negative integer, found {}", n))),
            other => Err(invalid(format!("expected integer, found {:?}", other))),
        }
    }

    fn parse_path(&mut self) -> StoreResult<Path> {
        let root = self.expect_ident()?;
        if let Some(alias) = &self.alias {
            if &root != alias {
                return Err(invalid(format!("identifier '{}' could not be resolved", root)));
            }
        }
        let mut segments = Vec::new();
        loop {
            if self.eat_sym(".") {
                segments.push(self.expect_ident()?);
            } else if self.eat_sym("[") {
                let segment = match self.next() {
                    Some(Token::Str(s)) => s,
                    Some(Token::Number(n)) => n.to_string(),
                    other => return Err(invalid(format!("invalid property index {:?}", other))),
                };
                self.expect_sym("]")?;
                segments.push(segment);
            } else {
                break;
            }
        }
        Ok(Path { root, segments })
    }

    fn parse_select(&mut self) -> StoreResult<Select> {
        self.expect_keyword("select")?;
        let distinct = self.eat_keyword("distinct");
        let top = if self.eat_keyword("top") {
            Some(self.expect_usize()?)
        } else {
            None
        };

        let projection = if self.eat_sym("*") {
            Projection::All
        } else if self.eat_keyword("value") {
            if self.eat_keyword("count") {
                self.expect_sym("(")?;
                match self.next() {
                    Some(Token::Number(_)) | Some(Token::Sym("*")) => {}
                    other => return Err(invalid(format!("unsupported COUNT argument {:?}", other))),
                }
                self.expect_sym(")")?;
                Projection::Count
            } else {
                Projection::Value(self.parse_path()?)
            }
        } else {
            let mut fields = vec![self.parse_path()?];
            while self.eat_sym(",") {
                fields.push(self.parse_path()?);
            }
            Projection::Fields(fields)
        };

        self.expect_keyword("from")?;
        let source = self.expect_ident()?;
        self.eat_keyword("as");
        let alias = match self.peek() {
            Some(Token::Ident(s)) if !RESERVED.contains(&s.to_ascii_lowercase().as_str()) => {
                let s = s.clone();
                self.pos += 1;
                s
            }
            _ => source,
        };

        let roots: Vec<&Path> = match &projection {
            Projection::Value(p) => vec![p],
            Projection::Fields(ps) => ps.iter().collect(),
            _ => Vec::new(),
        };
        if let Some(bad) = roots.iter().find(|p| p.root != alias) {
            return Err(invalid(format!("identifier '{}' could not be resolved", bad.root)));
        }
        self.alias = Some(alias.clone());

        let filter = if self.eat_keyword("where") {
            Some(self.parse_or()?)
        } else {
            None
        };

        let order_by = if self.eat_keyword("order") {
            self.expect_keyword("by")?;
            let path = self.parse_path()?;
            let desc = if self.eat_keyword("desc") {
                true
            } else {
                self.eat_keyword("asc");
                false
            };
            Some((path, desc))
        } else {
            None
        };

        let (offset, limit) = if self.eat_keyword("offset") {
            let offset = self.expect_usize()?;
            self.expect_keyword("limit")?;
            (offset, Some(self.expect_usize()?))
        } else {
            (0, None)
        };

        if let Some(token) = self.peek() {
            return Err(invalid(format!("unexpected token {:?}", token)));
        }

        Ok(Select {
            distinct,
            top,
            projection,
            alias,
            filter,
            order_by,
            offset,
            limit,
        })
    }

    fn parse_or(&mut self) -> StoreResult<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("or") {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> StoreResult<Expr> {
        let mut left = self.parse_unary()?;
        while self.eat_keyword("and") {
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> StoreResult<Expr> {
        if self.eat_keyword("not") {
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        if self.eat_sym("(") {
            let inner = self.parse_or()?;
            self.expect_sym(")")?;
            return Ok(inner);
        }
        for (name, is_null) in [("is_null", true), ("is_defined", false)] {
            if self.peek_keyword(name)
                && matches!(self.tokens.get(self.pos + 1), Some(Token::Sym("(")))
            {
                self.pos += 2;
                let path = self.parse_path()?;
                self.expect_sym(")")?;
                return Ok(if is_null {
                    Expr::IsNull(path)
                } else {
                    Expr::IsDefined(path)
                });
            }
        }

        let left = self.parse_operand()?;
        let op = match self.next() {
            Some(Token::Sym("=")) => CmpOp::Eq,
            Some(Token::Sym("!=")) | Some(Token::Sym("<>")) => CmpOp::Ne,
            Some(Token::Sym("<")) => CmpOp::Lt,
            Some(Token::Sym("<=")) => CmpOp::Le,
            Some(Token::Sym(">")) => CmpOp::Gt,
            Some(Token::Sym(">=")) => CmpOp::Ge,
            other => return Err(invalid(format!("expected comparison operator, found {:?}", other))),
        };
        let right = self.parse_operand()?;
        Ok(Expr::Compare(left, op, right))
    }

    fn parse_operand(&mut self) -> StoreResult<Operand> {
        match self.peek().cloned() {
            Some(Token::Str(s)) => {
                self.pos += 1;
                Ok(Operand::Literal(JsonValue::String(s)))
            }
            Some(Token::Number(n)) => {
                self.pos += 1;
                Ok(Operand::Literal(JsonValue::Number(n)))
            }
            Some(Token::Param(p)) => {
                self.pos += 1;
                Ok(Operand::Param(p))
            }
            Some(Token::Ident(s)) => match s.to_ascii_lowercase().as_str() {
                "true" | "false" | "null" => {
                    self.pos += 1;
                    Ok(Operand::Literal(match s.to_ascii_lowercase().as_str() {
                        "true" => JsonValue::Bool(true),
                        "false" => JsonValue::Bool(false),
                        _ => JsonValue::Null,
                    }))
                }
                _ => Ok(Operand::Path(self.parse_path()?)),
            },
            other => Err(invalid(format!("expected value, found {:?}", other))),
        }
    }
}

fn parse(text: &str) -> StoreResult<Select> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err(invalid("query text is empty"));
    }
    Parser {
        tokens,
        pos: 0,
        alias: None,
    }
    .parse_select()
}

fn resolve<'a>(doc: &'a JsonValue, path: &Path) -> Option<&'a JsonValue> {
    let mut current = doc;
    for segment in &path.segments {
        current = match current {
            JsonValue::Object(map) => map.get(segment)?,
            JsonValue::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn kind_rank(value: &JsonValue) -> u8 {
    match value {
        JsonValue::Null => 0,
        JsonValue::Bool(_) => 1,
        JsonValue::Number(_) => 2,
        JsonValue::String(_) => 3,
        JsonValue::Array(_) => 4,
        JsonValue::Object(_) => 5,
    }
}

/// Total order over JSON values: null < bool < number < string < array < object.
pub(crate) fn total_order(a: &JsonValue, b: &JsonValue) -> Ordering {
    match (a, b) {
        (JsonValue::Bool(x), JsonValue::Bool(y)) => x.cmp(y),
        (JsonValue::Number(x), JsonValue::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.total_cmp(&y)
        }
        (JsonValue::String(x), JsonValue::String(y)) => x.cmp(y),
        (JsonValue::Array(x), JsonValue::Array(y)) => x
            .iter()
            .zip(y.iter())
            .map(|(l, r)| total_order(l, r))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (JsonValue::Object(x), JsonValue::Object(y)) => x.len().cmp(&y.len()),
        _ => kind_rank(a).cmp(&kind_rank(b)),
    }
}

fn values_equal(a: &JsonValue, b: &JsonValue) -> bool {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare(op: CmpOp, a: &JsonValue, b: &JsonValue) -> bool {
    // Mixed kinds compare as undefined, which filters the row out.
    if kind_rank(a) != kind_rank(b) {
        return false;
    }
    let ord = total_order(a, b);
    match op {
        CmpOp::Eq => values_equal(a, b),
        CmpOp::Ne => !values_equal(a, b),
        CmpOp::Lt => ord == Ordering::Less,
        CmpOp::Le => ord != Ordering::Greater,
        CmpOp::Gt => ord == Ordering::Greater,
        CmpOp::Ge => ord != Ordering::Less,
    }
}

fn operand<'a>(
    op: &'a Operand,
    doc: &'a JsonValue,
    query: &'a SqlQuery,
) -> StoreResult<Option<&'a JsonValue>> {
    match op {
        Operand::Path(path) => Ok(resolve(doc, path)),
        Operand::Literal(value) => Ok(Some(value)),
        Operand::Param(name) => query
            .parameters
            .iter()
            .find(|p| &p.name == name)
            .map(|p| Some(&p.value))
            .ok_or_else(|| invalid(format!("parameter {} was not supplied", name))),
    }
}

fn eval(expr: &Expr, doc: &JsonValue, query: &SqlQuery) -> StoreResult<bool> {
    Ok(match expr {
        Expr::And(l, r) => eval(l, doc, query)? && eval(r, doc, query)?,
        Expr::Or(l, r) => eval(l, doc, query)? || eval(r, doc, query)?,
        Expr::Not(inner) => !eval(inner, doc, query)?,
        Expr::IsNull(path) => matches!(resolve(doc, path), Some(JsonValue::Null)),
        Expr::IsDefined(path) => resolve(doc, path).is_some(),
        Expr::Compare(l, op, r) => {
            match (operand(l, doc, query)?, operand(r, doc, query)?) {
                (Some(a), Some(b)) => compare(*op, a, b),
                _ => false,
            }
        }
    })
}

fn project(projection: &Projection, doc: JsonValue) -> Option<JsonValue> {
    match projection {
        Projection::All | Projection::Count => Some(doc),
        Projection::Value(path) => resolve(&doc, path).cloned(),
        Projection::Fields(paths) => {
            let mut out = Map::new();
            for path in paths {
                if let Some(value) = resolve(&doc, path) {
                    let key = path.segments.last().unwrap_or(&path.root);
                    out.insert(key.clone(), value.clone());
                }
            }
            Some(JsonValue::Object(out))
        }
    }
}

/// Run `query` over `docs` and return the materialized result rows.
pub(crate) fn execute(query: &SqlQuery, docs: Vec<JsonValue>) -> StoreResult<Vec<JsonValue>> {
    let select = parse(&query.query)?;

    let mut rows = Vec::new();
    for doc in docs {
        let keep = match &select.filter {
            Some(filter) => eval(filter, &doc, query)?,
            None => true,
        };
        if keep {
            rows.push(doc);
        }
    }

    if select.projection == Projection::Count {
        return Ok(vec![JsonValue::from(rows.len())]);
    }

    if let Some((path, desc)) = &select.order_by {
        rows.sort_by(|a, b| {
            let ord = match (resolve(a, path), resolve(b, path)) {
                (Some(x), Some(y)) => total_order(x, y),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            if *desc {
                ord.reverse()
            } else {
                ord
            }
        });
    }

    let mut projected: Vec<JsonValue> = rows
        .into_iter()
        .filter_map(|doc| project(&select.projection, doc))
        .collect();

    if select.distinct {
        let mut unique: Vec<JsonValue> = Vec::with_capacity(projected.len());
        for value in projected {
            if !unique.iter().any(|seen| values_equal(seen, &value)) {
                unique.push(value);
            }
        }
        projected = unique;
    }

    let take = match (select.top, select.limit) {
        (Some(t), Some(l)) => t.min(l),
        (t, l) => t.or(l).unwrap_or(usize::MAX),
    };
    tracing::trace!(alias = %select.alias, rows = projected.len(), "evaluated query");
    Ok(projected.into_iter().skip(select.offset).take(take).collect())
}
