//! A small XPath 1.0 evaluator over [`Document`], enough for the path rules sites publish
//! for next links and page elements.

use crate::dom::{Document, NodeId};
use crate::error::{Error, Result};
use std::collections::HashMap;

// name, min args, max args
const FUNCTIONS: [(&str, usize, usize); 14] = [
    ("last", 0, 0),
    ("position", 0, 0),
    ("count", 1, 1),
    ("not", 1, 1),
    ("true", 0, 0),
    ("false", 0, 0),
    ("contains", 2, 2),
    ("starts-with", 2, 2),
    ("normalize-space", 0, 1),
    ("string", 0, 1),
    ("string-length", 0, 1),
    ("name", 0, 0),
    ("local-name", 0, 0),
    ("concat", 2, usize::MAX),
];

/// Evaluates `expression` and returns the selected nodes in document order. Attribute
/// results are reported as their owner element.
pub fn evaluate(doc: &Document, expression: &str) -> Result<Vec<NodeId>> {
    let expr = parse(expression)?;
    let evaluator = Evaluator::new(doc);
    let ctx = Ctx {
        item: Item::Node(doc.document_node()),
        position: 1,
        size: 1,
    };
    match evaluator.eval(&expr, &ctx) {
        Value::Nodes(items) => {
            let mut ids: Vec<NodeId> = Vec::new();
            for item in items {
                let id = match item {
                    Item::Node(id) => id,
                    Item::Attr(owner, _) => owner,
                };
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            Ok(ids)
        }
        _ => Err(Error::rule(expression, "expression does not select nodes")),
    }
}

// --- tokens ---

#[derive(Clone, Copy, Debug, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Slash,
    DoubleSlash,
    Pipe,
    Dot,
    DotDot,
    At,
    Star,
    ColonColon,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Op(CmpOp),
    Name(String),
    Literal(String),
    Number(f64),
}

fn tokenize(input: &str) -> std::result::Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '/' if next == Some('/') => {
                tokens.push(Token::DoubleSlash);
                i += 2;
                continue;
            }
            '.' if next == Some('.') => {
                tokens.push(Token::DotDot);
                i += 2;
                continue;
            }
            ':' if next == Some(':') => {
                tokens.push(Token::ColonColon);
                i += 2;
                continue;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Op(CmpOp::Ne));
                i += 2;
                continue;
            }
            '<' if next == Some('=') => {
                tokens.push(Token::Op(CmpOp::Le));
                i += 2;
                continue;
            }
            '>' if next == Some('=') => {
                tokens.push(Token::Op(CmpOp::Ge));
                i += 2;
                continue;
            }
            '"' | '\'' => {
                let start = i + 1;
                let Some(len) = chars[start..].iter().position(|&q| q == c) else {
                    return Err("unterminated string literal".to_string());
                };
                tokens.push(Token::Literal(chars[start..start + len].iter().collect()));
                i = start + len + 1;
                continue;
            }
            c if c.is_ascii_digit() || (c == '.' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse()
                    .map_err(|_| format!("invalid number `{text}`"))?;
                tokens.push(Token::Number(number));
                continue;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '-' || chars[i] == '_')
                {
                    i += 1;
                }
                tokens.push(Token::Name(chars[start..i].iter().collect()));
                continue;
            }
            _ => {}
        }
        let token = match c {
            '/' => Token::Slash,
            '|' => Token::Pipe,
            '.' => Token::Dot,
            '@' => Token::At,
            '*' => Token::Star,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            '=' => Token::Op(CmpOp::Eq),
            '<' => Token::Op(CmpOp::Lt),
            '>' => Token::Op(CmpOp::Gt),
            other => return Err(format!("unexpected character `{other}`")),
        };
        tokens.push(token);
        i += 1;
    }
    Ok(tokens)
}

// --- syntax tree ---

#[derive(Clone, Copy, Debug, PartialEq)]
enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    SelfAxis,
    Parent,
    Ancestor,
    FollowingSibling,
    PrecedingSibling,
    Attribute,
}

impl Axis {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "child" => Axis::Child,
            "descendant" => Axis::Descendant,
            "descendant-or-self" => Axis::DescendantOrSelf,
            "self" => Axis::SelfAxis,
            "parent" => Axis::Parent,
            "ancestor" => Axis::Ancestor,
            "following-sibling" => Axis::FollowingSibling,
            "preceding-sibling" => Axis::PrecedingSibling,
            "attribute" => Axis::Attribute,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
enum NodeTest {
    Name(String),
    Any,
    Text,
    Node,
}

#[derive(Clone, Debug)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Expr>,
}

impl Step {
    fn bare(axis: Axis, test: NodeTest) -> Self {
        Self {
            axis,
            test,
            predicates: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
struct LocationPath {
    absolute: bool,
    steps: Vec<Step>,
}

#[derive(Clone, Debug)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, CmpOp, Box<Expr>),
    Union(Vec<Expr>),
    Path(LocationPath),
    Filter(Box<Expr>, Vec<Expr>),
    Call(String, Vec<Expr>),
    Literal(String),
    Number(f64),
}

fn is_node_type(name: &str) -> bool {
    name == "text" || name == "node"
}

// --- parser ---

fn parse(source: &str) -> Result<Expr> {
    let tokens = tokenize(source).map_err(|reason| Error::rule(source, reason))?;
    if tokens.is_empty() {
        return Err(Error::rule(source, "empty expression"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        source,
    };
    let expr = parser.parse_or()?;
    if let Some(token) = parser.peek() {
        return Err(parser.error(format!("unexpected {token:?}")));
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    source: &'a str,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Name(n)) if n == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {token:?}")))
        }
    }

    fn error(&self, reason: String) -> Error {
        Error::rule(self.source, reason)
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("or") {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_equality()?;
        while self.eat_keyword("and") {
            let right = self.parse_equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        let mut left = self.parse_relational()?;
        while let Some(Token::Op(op @ (CmpOp::Eq | CmpOp::Ne))) = self.peek().cloned() {
            self.pos += 1;
            let right = self.parse_relational()?;
            left = Expr::Compare(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr> {
        let mut left = self.parse_union()?;
        while let Some(Token::Op(op @ (CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge))) =
            self.peek().cloned()
        {
            self.pos += 1;
            let right = self.parse_union()?;
            left = Expr::Compare(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_union(&mut self) -> Result<Expr> {
        let first = self.parse_path_expr()?;
        if self.peek() != Some(&Token::Pipe) {
            return Ok(first);
        }
        let mut parts = vec![first];
        while self.eat(&Token::Pipe) {
            parts.push(self.parse_path_expr()?);
        }
        Ok(Expr::Union(parts))
    }

    fn parse_path_expr(&mut self) -> Result<Expr> {
        match self.peek().cloned() {
            Some(Token::Literal(s)) => {
                self.pos += 1;
                Ok(Expr::Literal(s))
            }
            Some(Token::Number(n)) => {
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                let predicates = self.parse_predicates()?;
                Ok(if predicates.is_empty() {
                    inner
                } else {
                    Expr::Filter(Box::new(inner), predicates)
                })
            }
            Some(Token::Name(name))
                if self.peek_at(1) == Some(&Token::LParen) && !is_node_type(&name) =>
            {
                self.pos += 2;
                let args = self.parse_args()?;
                let Some((_, min, max)) = FUNCTIONS.iter().find(|(f, _, _)| *f == name) else {
                    return Err(self.error(format!("unsupported function `{name}()`")));
                };
                if args.len() < *min || args.len() > *max {
                    return Err(self.error(format!("wrong argument count for `{name}()`")));
                }
                Ok(Expr::Call(name, args))
            }
            _ => self.parse_location_path().map(Expr::Path),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_or()?);
            if !self.eat(&Token::Comma) {
                self.expect(Token::RParen)?;
                return Ok(args);
            }
        }
    }

    fn parse_predicates(&mut self) -> Result<Vec<Expr>> {
        let mut predicates = Vec::new();
        while self.eat(&Token::LBracket) {
            predicates.push(self.parse_or()?);
            self.expect(Token::RBracket)?;
        }
        Ok(predicates)
    }

    fn starts_step(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Dot | Token::DotDot | Token::At | Token::Star | Token::Name(_))
        )
    }

    fn parse_location_path(&mut self) -> Result<LocationPath> {
        let mut steps = Vec::new();
        let absolute = match self.peek() {
            Some(Token::Slash) => {
                self.pos += 1;
                if !self.starts_step() {
                    return Ok(LocationPath {
                        absolute: true,
                        steps,
                    });
                }
                true
            }
            Some(Token::DoubleSlash) => {
                self.pos += 1;
                steps.push(Step::bare(Axis::DescendantOrSelf, NodeTest::Node));
                true
            }
            _ => false,
        };
        steps.push(self.parse_step()?);
        loop {
            if self.eat(&Token::Slash) {
                steps.push(self.parse_step()?);
            } else if self.eat(&Token::DoubleSlash) {
                steps.push(Step::bare(Axis::DescendantOrSelf, NodeTest::Node));
                steps.push(self.parse_step()?);
            } else {
                break;
            }
        }
        Ok(LocationPath { absolute, steps })
    }

    fn parse_step(&mut self) -> Result<Step> {
        if self.eat(&Token::Dot) {
            return Ok(Step::bare(Axis::SelfAxis, NodeTest::Node));
        }
        if self.eat(&Token::DotDot) {
            return Ok(Step::bare(Axis::Parent, NodeTest::Node));
        }
        let axis_name = match (self.peek(), self.peek_at(1)) {
            (Some(Token::Name(name)), Some(Token::ColonColon)) => Some(name.clone()),
            _ => None,
        };
        let axis = if self.eat(&Token::At) {
            Axis::Attribute
        } else if let Some(name) = axis_name {
            let axis = Axis::from_name(&name)
                .ok_or_else(|| self.error(format!("unsupported axis `{name}`")))?;
            self.pos += 2;
            axis
        } else {
            Axis::Child
        };
        let token = self.peek().cloned();
        self.pos += 1;
        let test = match token {
            Some(Token::Star) => NodeTest::Any,
            Some(Token::Name(name)) => {
                if self.peek() == Some(&Token::LParen) && is_node_type(&name) {
                    self.pos += 1;
                    self.expect(Token::RParen)?;
                    if name == "text" {
                        NodeTest::Text
                    } else {
                        NodeTest::Node
                    }
                } else {
                    NodeTest::Name(name.to_ascii_lowercase())
                }
            }
            other => return Err(self.error(format!("expected a node test, found {other:?}"))),
        };
        let predicates = self.parse_predicates()?;
        Ok(Step {
            axis,
            test,
            predicates,
        })
    }
}

// --- evaluation ---

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Item {
    Node(NodeId),
    Attr(NodeId, String),
}

#[derive(Clone, Debug)]
enum Value {
    Nodes(Vec<Item>),
    Str(String),
    Num(f64),
    Bool(bool),
}

impl Value {
    fn boolean(&self) -> bool {
        match self {
            Value::Nodes(items) => !items.is_empty(),
            Value::Str(s) => !s.is_empty(),
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Bool(b) => *b,
        }
    }
}

struct Ctx {
    item: Item,
    position: usize,
    size: usize,
}

struct Evaluator<'a> {
    doc: &'a Document,
    order: HashMap<NodeId, usize>,
}

impl<'a> Evaluator<'a> {
    fn new(doc: &'a Document) -> Self {
        let order = doc
            .node(doc.document_node())
            .map(|root| {
                root.descendants()
                    .enumerate()
                    .map(|(i, n)| (n.id(), i))
                    .collect()
            })
            .unwrap_or_default();
        Self { doc, order }
    }

    fn eval(&self, expr: &Expr, ctx: &Ctx) -> Value {
        match expr {
            Expr::Literal(s) => Value::Str(s.clone()),
            Expr::Number(n) => Value::Num(*n),
            Expr::Or(a, b) => {
                Value::Bool(self.eval(a, ctx).boolean() || self.eval(b, ctx).boolean())
            }
            Expr::And(a, b) => {
                Value::Bool(self.eval(a, ctx).boolean() && self.eval(b, ctx).boolean())
            }
            Expr::Compare(a, op, b) => {
                Value::Bool(self.compare(&self.eval(a, ctx), *op, &self.eval(b, ctx)))
            }
            Expr::Union(parts) => {
                let mut items = Vec::new();
                for part in parts {
                    if let Value::Nodes(found) = self.eval(part, ctx) {
                        items.extend(found);
                    }
                }
                Value::Nodes(self.in_document_order(items))
            }
            Expr::Path(path) => Value::Nodes(self.eval_path(path, ctx)),
            Expr::Filter(inner, predicates) => match self.eval(inner, ctx) {
                Value::Nodes(items) => Value::Nodes(self.apply_predicates(items, predicates)),
                other => other,
            },
            Expr::Call(name, args) => self.call(name, args, ctx),
        }
    }

    fn eval_path(&self, path: &LocationPath, ctx: &Ctx) -> Vec<Item> {
        let start = if path.absolute {
            Item::Node(self.doc.document_node())
        } else {
            ctx.item.clone()
        };
        let mut current = vec![start];
        for step in &path.steps {
            let mut next = Vec::new();
            for item in &current {
                let candidates = self.axis(item, step);
                next.extend(self.apply_predicates(candidates, &step.predicates));
            }
            current = self.in_document_order(next);
        }
        current
    }

    /// Predicates see candidates in axis order, so reverse axes count outward.
    fn apply_predicates(&self, mut items: Vec<Item>, predicates: &[Expr]) -> Vec<Item> {
        for predicate in predicates {
            let size = items.len();
            items = items
                .into_iter()
                .enumerate()
                .filter(|(i, item)| {
                    let ctx = Ctx {
                        item: item.clone(),
                        position: i + 1,
                        size,
                    };
                    match self.eval(predicate, &ctx) {
                        Value::Num(n) => n == (i + 1) as f64,
                        other => other.boolean(),
                    }
                })
                .map(|(_, item)| item)
                .collect();
        }
        items
    }

    fn axis(&self, item: &Item, step: &Step) -> Vec<Item> {
        let id = match item {
            Item::Node(id) => *id,
            Item::Attr(owner, _) => {
                return match step.axis {
                    Axis::Parent => self.filter_nodes([*owner], &step.test),
                    Axis::SelfAxis if step.test == NodeTest::Node => vec![item.clone()],
                    _ => Vec::new(),
                };
            }
        };
        let Some(node) = self.doc.node(id) else {
            return Vec::new();
        };
        let ids: Vec<NodeId> = match step.axis {
            Axis::Child => node.children().map(|n| n.id()).collect(),
            Axis::Descendant => node.descendants().skip(1).map(|n| n.id()).collect(),
            Axis::DescendantOrSelf => node.descendants().map(|n| n.id()).collect(),
            Axis::SelfAxis => vec![id],
            Axis::Parent => node.parent().map(|p| p.id()).into_iter().collect(),
            Axis::Ancestor => node.ancestors().map(|n| n.id()).collect(),
            Axis::FollowingSibling => node.next_siblings().map(|n| n.id()).collect(),
            Axis::PrecedingSibling => node.prev_siblings().map(|n| n.id()).collect(),
            Axis::Attribute => {
                let Some(element) = node.value().as_element() else {
                    return Vec::new();
                };
                return element
                    .attrs()
                    .filter(|(name, _)| match &step.test {
                        NodeTest::Name(wanted) => name.eq_ignore_ascii_case(wanted),
                        NodeTest::Any | NodeTest::Node => true,
                        NodeTest::Text => false,
                    })
                    .map(|(name, _)| Item::Attr(id, name.to_string()))
                    .collect();
            }
        };
        self.filter_nodes(ids, &step.test)
    }

    fn filter_nodes(&self, ids: impl IntoIterator<Item = NodeId>, test: &NodeTest) -> Vec<Item> {
        ids.into_iter()
            .filter(|id| {
                self.doc.node(*id).is_some_and(|n| match test {
                    NodeTest::Node => true,
                    NodeTest::Text => n.value().is_text(),
                    NodeTest::Any => n.value().is_element(),
                    NodeTest::Name(name) => n
                        .value()
                        .as_element()
                        .is_some_and(|e| e.name().eq_ignore_ascii_case(name)),
                })
            })
            .map(Item::Node)
            .collect()
    }

    fn in_document_order(&self, mut items: Vec<Item>) -> Vec<Item> {
        items.sort_by(|a, b| self.order_key(a).cmp(&self.order_key(b)));
        items.dedup();
        items
    }

    fn order_key<'i>(&self, item: &'i Item) -> (usize, u8, &'i str) {
        match item {
            Item::Node(id) => (self.order.get(id).copied().unwrap_or(usize::MAX), 0, ""),
            Item::Attr(id, name) => (
                self.order.get(id).copied().unwrap_or(usize::MAX),
                1,
                name.as_str(),
            ),
        }
    }

    fn string_value(&self, item: &Item) -> String {
        match item {
            Item::Node(id) => self.doc.raw_text(*id),
            Item::Attr(owner, name) => self.doc.attr(*owner, name).unwrap_or_default().to_string(),
        }
    }

    fn string(&self, value: &Value) -> String {
        match value {
            Value::Str(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Num(n) if n.is_nan() => "NaN".to_string(),
            Value::Num(n) if n.fract() == 0.0 && n.is_finite() => format!("{}", *n as i64),
            Value::Num(n) => n.to_string(),
            Value::Nodes(items) => items
                .first()
                .map(|item| self.string_value(item))
                .unwrap_or_default(),
        }
    }

    fn number(&self, value: &Value) -> f64 {
        match value {
            Value::Num(n) => *n,
            Value::Bool(b) => f64::from(u8::from(*b)),
            other => self.string(other).trim().parse().unwrap_or(f64::NAN),
        }
    }

    fn compare(&self, left: &Value, op: CmpOp, right: &Value) -> bool {
        let equality = matches!(op, CmpOp::Eq | CmpOp::Ne);
        match (left, right) {
            (Value::Nodes(_), Value::Bool(b)) | (Value::Bool(b), Value::Nodes(_)) if equality => {
                let nodes = if let Value::Nodes(_) = left { left } else { right };
                (nodes.boolean() == *b) == (op == CmpOp::Eq)
            }
            (Value::Nodes(a), Value::Nodes(b)) => a.iter().any(|x| {
                let x = self.string_value(x);
                b.iter()
                    .any(|y| compare_strings(&x, op, &self.string_value(y)))
            }),
            (Value::Nodes(a), other) => a
                .iter()
                .any(|x| self.compare(&Value::Str(self.string_value(x)), op, other)),
            (other, Value::Nodes(b)) => b
                .iter()
                .any(|y| self.compare(other, op, &Value::Str(self.string_value(y)))),
            (Value::Bool(_), _) | (_, Value::Bool(_)) if equality => {
                (left.boolean() == right.boolean()) == (op == CmpOp::Eq)
            }
            (Value::Num(_), _) | (_, Value::Num(_)) => {
                compare_numbers(self.number(left), op, self.number(right))
            }
            _ if equality => compare_strings(&self.string(left), op, &self.string(right)),
            _ => compare_numbers(self.number(left), op, self.number(right)),
        }
    }

    fn call(&self, name: &str, args: &[Expr], ctx: &Ctx) -> Value {
        let arg = |i: usize| args.get(i).map(|a| self.eval(a, ctx));
        let string_arg = |i: usize| match arg(i) {
            Some(v) => self.string(&v),
            None => self.string_value(&ctx.item),
        };
        match name {
            "last" => Value::Num(ctx.size as f64),
            "position" => Value::Num(ctx.position as f64),
            "count" => Value::Num(match arg(0) {
                Some(Value::Nodes(items)) => items.len() as f64,
                _ => 0.0,
            }),
            "not" => Value::Bool(!arg(0).is_some_and(|v| v.boolean())),
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            "contains" => Value::Bool(string_arg(0).contains(&string_arg(1))),
            "starts-with" => Value::Bool(string_arg(0).starts_with(&string_arg(1))),
            "normalize-space" => Value::Str(
                string_arg(0)
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            "string" => Value::Str(string_arg(0)),
            "string-length" => Value::Num(string_arg(0).chars().count() as f64),
            "name" | "local-name" => Value::Str(match &ctx.item {
                Item::Node(id) => self.doc.tag(*id).unwrap_or_default().to_string(),
                Item::Attr(_, attr) => attr.clone(),
            }),
            "concat" => Value::Str(
                args.iter()
                    .map(|a| self.string(&self.eval(a, ctx)))
                    .collect(),
            ),
            _ => Value::Bool(false),
        }
    }
}

fn compare_strings(a: &str, op: CmpOp, b: &str) -> bool {
    match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        _ => compare_numbers(
            a.trim().parse().unwrap_or(f64::NAN),
            op,
            b.trim().parse().unwrap_or(f64::NAN),
        ),
    }
}

fn compare_numbers(a: f64, op: CmpOp, b: f64) -> bool {
    match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::Lt => a < b,
        CmpOp::Le => a <= b,
        CmpOp::Gt => a > b,
        CmpOp::Ge => a >= b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
        <div id="nav"><a rel="prev" href="/p/0">Prev</a><a rel="next" href="/p/2">Next  page</a></div>
        <ul><li>one</li><li class="x">two</li><li>three</li></ul>
        <ol><li>four</li></ol>
        <p id="after">tail</p>
    </body></html>"#;

    fn doc() -> Document {
        Document::parse(PAGE, None)
    }

    fn texts(d: &Document, expression: &str) -> Vec<String> {
        evaluate(d, expression)
            .unwrap()
            .into_iter()
            .map(|id| d.text(id))
            .collect()
    }

    #[test]
    fn attribute_predicates() {
        let d = doc();
        assert_eq!(texts(&d, r#"//*[@rel="next"]"#), ["Next  page"]);
        assert_eq!(texts(&d, "//a[@rel!='next']"), ["Prev"]);
    }

    #[test]
    fn unions_come_back_in_document_order() {
        let d = doc();
        assert_eq!(
            texts(&d, r#"//*[@rel="next"]|//*[@rel="prev"]"#),
            ["Prev", "Next  page"]
        );
    }

    #[test]
    fn positions_are_per_context_unless_filtered() {
        let d = doc();
        assert_eq!(texts(&d, "//li[1]"), ["one", "four"]);
        assert_eq!(texts(&d, "(//li)[2]"), ["two"]);
        assert_eq!(texts(&d, "//ul/li[last()]"), ["three"]);
        assert_eq!(texts(&d, "//ul/li[position() > 1]"), ["two", "three"]);
    }

    #[test]
    fn string_functions() {
        let d = doc();
        assert_eq!(
            texts(&d, "//a[normalize-space(.)='Next page']"),
            ["Next  page"]
        );
        assert_eq!(texts(&d, "//a[contains(@href, '/2')]"), ["Next  page"]);
        assert_eq!(texts(&d, "//li[starts-with(text(), 'th')]"), ["three"]);
        assert_eq!(texts(&d, "//li[not(@class)]").len(), 3);
    }

    #[test]
    fn other_axes() {
        let d = doc();
        assert_eq!(texts(&d, "//li[@class='x']/following-sibling::li"), ["three"]);
        assert_eq!(texts(&d, "//li[@class='x']/preceding-sibling::*[1]"), ["one"]);
        let parents = evaluate(&d, "//a/..").unwrap();
        assert_eq!(parents.len(), 1);
        assert_eq!(d.attr(parents[0], "id"), Some("nav"));
        assert_eq!(
            evaluate(&d, "//ol/li/ancestor::body").unwrap(),
            vec![d.body().unwrap()]
        );
    }

    #[test]
    fn attribute_results_report_their_owner() {
        let d = doc();
        let found = evaluate(&d, "//a/@href").unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(d.tag(found[0]), Some("a"));
    }

    #[test]
    fn malformed_expressions_are_rule_errors() {
        let d = doc();
        for bad in ["//a[", "", "//a[frobnicate()]", "foo::bar", "//a[@x='1]", "count(//a)"] {
            assert!(
                matches!(evaluate(&d, bad), Err(Error::Rule { .. })),
                "{bad} should fail"
            );
        }
    }
}
