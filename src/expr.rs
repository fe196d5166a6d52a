//! Filter and update expressions (spec §9 "Expressions").
//!
//! Expressions arrive serialized; this module decodes them into a
//! pool-allocated, immutable tree and evaluates them against an
//! `ExprContext` — a bag of `{tag|edge -> {prop -> value}}` plus the
//! reserved pseudo-columns. `ExprPool` is the per-request arena: every
//! node referenced by a plan's filters and updaters lives in one pool
//! that is dropped in one shot when the request completes, rather than
//! relying on ad hoc `Box` trees scattered across operators.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExprId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprNode {
    Lit(Value),
    /// `scope.name`, e.g. `player.age` or `follow.degree`; resolved
    /// against whichever tag/edge is current in `ExprContext`.
    PropRef { scope: String, name: String },
    /// A reserved pseudo-column: `_vid, _tag, _src, _type, _rank, _dst`.
    Pseudo(String),
    Cmp(CmpOp, ExprId, ExprId),
    And(ExprId, ExprId),
    Or(ExprId, ExprId),
    Not(ExprId),
    Add(ExprId, ExprId),
}

/// Owns every expression node decoded for one request. Dropped with
/// the request (spec §9 "per-request object pool").
#[derive(Default)]
pub struct ExprPool {
    nodes: Vec<ExprNode>,
}

impl ExprPool {
    pub fn new() -> Self {
        ExprPool::default()
    }

    pub fn push(&mut self, node: ExprNode) -> ExprId {
        self.nodes.push(node);
        ExprId(self.nodes.len() - 1)
    }

    pub fn get(&self, id: ExprId) -> &ExprNode {
        &self.nodes[id.0]
    }
}

pub const RESERVED_PSEUDO: &[&str] = &["_vid", "_tag", "_src", "_type", "_rank", "_dst"];

/// Per-input evaluation context (spec §9, §4.6). `tag_props` holds one
/// flattened map per projected/filtered tag; `edge_props` holds the
/// *current* edge's properties while an edge cursor is being advanced
/// (updated by `HashJoinNode` on each step, spec §4.4); `working` holds
/// the update operators' working copy of an in-flight upsert.
#[derive(Default)]
pub struct ExprContext {
    pub tag_props: HashMap<String, HashMap<String, Value>>,
    pub edge_name: Option<String>,
    pub edge_props: HashMap<String, Value>,
    pub working: HashMap<String, Value>,
    pub pseudo: HashMap<String, Value>,
}

impl ExprContext {
    pub fn new() -> Self {
        ExprContext::default()
    }

    pub fn set_tag(&mut self, tag: &str, props: HashMap<String, Value>) {
        self.tag_props.insert(tag.to_string(), props);
    }

    pub fn set_current_edge(&mut self, edge_name: &str, props: HashMap<String, Value>) {
        self.edge_name = Some(edge_name.to_string());
        self.edge_props = props;
    }

    pub fn set_pseudo(&mut self, name: &str, v: Value) {
        self.pseudo.insert(name.to_string(), v);
    }

    fn resolve(&self, scope: &str, name: &str) -> Value {
        if scope == "working" {
            return self.working.get(name).cloned().unwrap_or(Value::Null);
        }
        if self.edge_name.as_deref() == Some(scope) {
            if let Some(v) = self.edge_props.get(name) {
                return v.clone();
            }
        }
        if let Some(props) = self.tag_props.get(scope) {
            if let Some(v) = props.get(name) {
                return v.clone();
            }
        }
        Value::Null
    }
}

/// Evaluates `id` against `pool`/`ctx`. A filter that evaluates to
/// `Null` is treated as `false` (spec §4.4); type errors surface as
/// `Error::InvalidFilter` so the caller can mark `ILLEGAL_DATA` and
/// abort just the current input.
pub fn eval(pool: &ExprPool, id: ExprId, ctx: &ExprContext) -> Result<Value> {
    match pool.get(id) {
        ExprNode::Lit(v) => Ok(v.clone()),
        ExprNode::PropRef { scope, name } => Ok(ctx.resolve(scope, name)),
        ExprNode::Pseudo(name) => Ok(ctx.pseudo.get(name).cloned().unwrap_or(Value::Null)),
        ExprNode::Not(a) => {
            let v = eval(pool, *a, ctx)?;
            match v {
                Value::Null => Ok(Value::Null),
                Value::Bool(b) => Ok(Value::Bool(!b)),
                other => Err(Error::InvalidFilter(format!("NOT applied to non-bool {:?}", other))),
            }
        }
        ExprNode::And(a, b) => {
            let va = truthy(eval(pool, *a, ctx)?)?;
            if va == Some(false) {
                return Ok(Value::Bool(false));
            }
            let vb = truthy(eval(pool, *b, ctx)?)?;
            Ok(match (va, vb) {
                (Some(true), Some(true)) => Value::Bool(true),
                (_, Some(false)) => Value::Bool(false),
                _ => Value::Null,
            })
        }
        ExprNode::Or(a, b) => {
            let va = truthy(eval(pool, *a, ctx)?)?;
            if va == Some(true) {
                return Ok(Value::Bool(true));
            }
            let vb = truthy(eval(pool, *b, ctx)?)?;
            Ok(match (va, vb) {
                (Some(false), Some(false)) => Value::Bool(false),
                (_, Some(true)) => Value::Bool(true),
                _ => Value::Null,
            })
        }
        ExprNode::Cmp(op, a, b) => {
            let va = eval(pool, *a, ctx)?;
            let vb = eval(pool, *b, ctx)?;
            if va.is_null() || vb.is_null() {
                return Ok(Value::Null);
            }
            let ord = va.typed_cmp(&vb);
            use std::cmp::Ordering::*;
            let r = match op {
                CmpOp::Eq => ord == Equal,
                CmpOp::Ne => ord != Equal,
                CmpOp::Lt => ord == Less,
                CmpOp::Le => ord != Greater,
                CmpOp::Gt => ord == Greater,
                CmpOp::Ge => ord != Less,
            };
            Ok(Value::Bool(r))
        }
        ExprNode::Add(a, b) => {
            let va = eval(pool, *a, ctx)?;
            let vb = eval(pool, *b, ctx)?;
            match (va, vb) {
                (Value::Int(x), Value::Int(y)) => Ok(Value::Int(x + y)),
                (Value::Float(x), Value::Float(y)) => Ok(Value::Float(x + y)),
                (Value::String(x), Value::String(y)) => Ok(Value::String(x + &y)),
                (x, y) => Err(Error::InvalidFilter(format!("cannot add {:?} and {:?}", x, y))),
            }
        }
    }
}

fn truthy(v: Value) -> Result<Option<bool>> {
    match v {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(b)),
        other => Err(Error::InvalidFilter(format!("expected bool, got {:?}", other))),
    }
}

/// Evaluates `id`, treating `Null` as `false` — the contract
/// `FilterNode` uses (spec §4.4).
pub fn eval_bool_filter(pool: &ExprPool, id: ExprId, ctx: &ExprContext) -> Result<bool> {
    match eval(pool, id, ctx)? {
        Value::Bool(b) => Ok(b),
        Value::Null => Ok(false),
        other => Err(Error::InvalidFilter(format!("filter did not evaluate to bool: {:?}", other))),
    }
}

/// Decodes a textual expression into `pool`, returning the root's id.
/// Grammar: comparisons (`scope.name OP literal`), `AND`/`OR`/`NOT`,
/// parenthesized grouping, pseudo-columns (`_dst`, ...), int/float/
/// string/bool/null literals. This is the wire format this core's
/// request layer hands expressions over in (spec §9: "Expressions
/// arrive as serialized bytes").
pub fn decode(bytes: &[u8]) -> Result<(ExprPool, ExprId)> {
    let text = std::str::from_utf8(bytes).map_err(|e| Error::InvalidFilter(e.to_string()))?;
    let mut p = Parser { s: text.as_bytes(), i: 0, pool: ExprPool::new() };
    let id = p.parse_or()?;
    p.skip_ws();
    if p.i != p.s.len() {
        return Err(Error::InvalidFilter(format!("trailing input at byte {}", p.i)));
    }
    Ok((p.pool, id))
}

struct Parser<'a> {
    s: &'a [u8],
    i: usize,
    pool: ExprPool,
}

impl<'a> Parser<'a> {
    fn skip_ws(&mut self) {
        while self.i < self.s.len() && self.s[self.i].is_ascii_whitespace() {
            self.i += 1;
        }
    }

    fn peek_word(&mut self, word: &str) -> bool {
        self.skip_ws();
        let w = word.as_bytes();
        if self.s[self.i..].starts_with(w) {
            let after = self.i + w.len();
            let boundary = after >= self.s.len() || !(self.s[after] as char).is_alphanumeric();
            if boundary {
                self.i = after;
                return true;
            }
        }
        false
    }

    fn parse_or(&mut self) -> Result<ExprId> {
        let mut lhs = self.parse_and()?;
        loop {
            if self.peek_word("OR") {
                let rhs = self.parse_and()?;
                lhs = self.pool.push(ExprNode::Or(lhs, rhs));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<ExprId> {
        let mut lhs = self.parse_unary()?;
        loop {
            if self.peek_word("AND") {
                let rhs = self.parse_unary()?;
                lhs = self.pool.push(ExprNode::And(lhs, rhs));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<ExprId> {
        if self.peek_word("NOT") {
            let inner = self.parse_unary()?;
            return Ok(self.pool.push(ExprNode::Not(inner)));
        }
        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> Result<ExprId> {
        let lhs = self.parse_atom()?;
        self.skip_ws();
        let ops: &[(&str, CmpOp)] =
            &[(">=", CmpOp::Ge), ("<=", CmpOp::Le), ("==", CmpOp::Eq), ("!=", CmpOp::Ne), (">", CmpOp::Gt), ("<", CmpOp::Lt)];
        for (sym, op) in ops {
            if self.s[self.i..].starts_with(sym.as_bytes()) {
                self.i += sym.len();
                let rhs = self.parse_atom()?;
                return Ok(self.pool.push(ExprNode::Cmp(*op, lhs, rhs)));
            }
        }
        Ok(lhs)
    }

    fn parse_atom(&mut self) -> Result<ExprId> {
        self.skip_ws();
        if self.i >= self.s.len() {
            return Err(Error::InvalidFilter("unexpected end of expression".into()));
        }
        match self.s[self.i] {
            b'(' => {
                self.i += 1;
                let inner = self.parse_or()?;
                self.skip_ws();
                if self.s.get(self.i) != Some(&b')') {
                    return Err(Error::InvalidFilter("expected ')'".into()));
                }
                self.i += 1;
                Ok(inner)
            }
            b'"' => self.parse_string(),
            b'_' => self.parse_ident_or_pseudo(),
            c if c.is_ascii_digit() || c == b'-' => self.parse_number(),
            _ => self.parse_ident_or_pseudo(),
        }
    }

    fn parse_string(&mut self) -> Result<ExprId> {
        self.i += 1;
        let start = self.i;
        while self.i < self.s.len() && self.s[self.i] != b'"' {
            self.i += 1;
        }
        let s = std::str::from_utf8(&self.s[start..self.i]).unwrap().to_string();
        self.i += 1;
        Ok(self.pool.push(ExprNode::Lit(Value::String(s))))
    }

    fn parse_number(&mut self) -> Result<ExprId> {
        let start = self.i;
        if self.s[self.i] == b'-' {
            self.i += 1;
        }
        let mut is_float = false;
        while self.i < self.s.len() && (self.s[self.i].is_ascii_digit() || self.s[self.i] == b'.') {
            if self.s[self.i] == b'.' {
                is_float = true;
            }
            self.i += 1;
        }
        let text = std::str::from_utf8(&self.s[start..self.i]).unwrap();
        if is_float {
            let f: f64 = text.parse().map_err(|_| Error::InvalidFilter(format!("bad float {}", text)))?;
            Ok(self.pool.push(ExprNode::Lit(Value::Float(f))))
        } else {
            let n: i64 = text.parse().map_err(|_| Error::InvalidFilter(format!("bad int {}", text)))?;
            Ok(self.pool.push(ExprNode::Lit(Value::Int(n))))
        }
    }

    fn parse_ident_or_pseudo(&mut self) -> Result<ExprId> {
        let start = self.i;
        while self.i < self.s.len() && (self.s[self.i].is_ascii_alphanumeric() || self.s[self.i] == b'_' || self.s[self.i] == b'.') {
            self.i += 1;
        }
        let text = std::str::from_utf8(&self.s[start..self.i]).unwrap();
        if text.is_empty() {
            return Err(Error::InvalidFilter(format!("unexpected character at {}", start)));
        }
        if text == "true" {
            return Ok(self.pool.push(ExprNode::Lit(Value::Bool(true))));
        }
        if text == "false" {
            return Ok(self.pool.push(ExprNode::Lit(Value::Bool(false))));
        }
        if text == "null" {
            return Ok(self.pool.push(ExprNode::Lit(Value::Null)));
        }
        if RESERVED_PSEUDO.contains(&text) {
            return Ok(self.pool.push(ExprNode::Pseudo(text.to_string())));
        }
        match text.split_once('.') {
            Some((scope, name)) => Ok(self.pool.push(ExprNode::PropRef { scope: scope.to_string(), name: name.to_string() })),
            None => Err(Error::InvalidFilter(format!("bare identifier {:?} is not a pseudo-column", text))),
        }
    }
}
