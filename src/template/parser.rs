//! テンプレートの字句解析と構文解析
//!
//! 空白制御は trim_blocks / lstrip_blocks 相当で、`{%-` `-%}` による
//! 明示的な除去にも対応する。

use super::helpers::{Filter, Function};
use crate::error::TemplateError;
use serde_json::{Number, Value};
use std::collections::BTreeSet;

/// 構文木のノード
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Text(String),
    Output(Expr),
    If {
        branches: Vec<(Expr, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    For {
        var: String,
        iterable: Expr,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
    Set {
        name: String,
        value: Expr,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    In,
    NotIn,
}

/// 式
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    Attr(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    List(Vec<Expr>),
    Call(Function, Vec<Expr>),
    Filter(Box<Expr>, Filter, Vec<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, CmpOp, Box<Expr>),
    Conditional {
        then: Box<Expr>,
        cond: Box<Expr>,
        otherwise: Option<Box<Expr>>,
    },
}

/// 式の中で変数名として使えない語
const RESERVED: [&str; 6] = ["and", "or", "not", "if", "else", "in"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TagKind {
    Output,
    Block,
    Comment,
}

impl TagKind {
    fn closer(self) -> &'static str {
        match self {
            TagKind::Output => "}}",
            TagKind::Block => "%}",
            TagKind::Comment => "#}",
        }
    }
}

#[derive(Debug)]
enum Token {
    Text(String),
    Output { src: String, line: usize },
    Block { src: String, line: usize },
}

fn line_at(source: &str, idx: usize) -> usize {
    1 + source[..idx].matches('\n').count()
}

fn next_tag(source: &str, from: usize) -> Option<(usize, TagKind)> {
    let bytes = source.as_bytes();
    let mut i = from;
    while i + 1 < bytes.len() {
        if bytes[i] == b'{' {
            let kind = match bytes[i + 1] {
                b'{' => Some(TagKind::Output),
                b'%' => Some(TagKind::Block),
                b'#' => Some(TagKind::Comment),
                _ => None,
            };
            if let Some(kind) = kind {
                return Some((i, kind));
            }
        }
        i += 1;
    }
    None
}

/// ブロックタグの直前にある行頭の空白を取り除く
fn lstrip_block(source: &str, text_start: usize, text: &str) -> usize {
    let tail_start = text.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let tail = &text[tail_start..];
    if !tail.chars().all(|c| c == ' ' || c == '\t') {
        return text.len();
    }
    let at_line_start =
        tail_start > 0 || text_start == 0 || source[..text_start].ends_with('\n');
    if at_line_start {
        tail_start
    } else {
        text.len()
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let mut pos = 0;

    while let Some((start, kind)) = next_tag(source, pos) {
        let line = line_at(source, start);
        let inner_start = start + 2;
        let close = source[inner_start..]
            .find(kind.closer())
            .map(|i| inner_start + i)
            .ok_or_else(|| {
                TemplateError::syntax(line, format!("タグが閉じられていません ('{}' がありません)", kind.closer()))
            })?;

        let mut inner = &source[inner_start..close];
        let strip_before = inner.starts_with('-');
        if strip_before {
            inner = &inner[1..];
        }
        let strip_after = inner.ends_with('-');
        if strip_after {
            inner = &inner[..inner.len() - 1];
        }

        let mut text = &source[pos..start];
        if strip_before {
            text = text.trim_end();
        } else if kind != TagKind::Output {
            text = &text[..lstrip_block(source, pos, text)];
        }
        if !text.is_empty() {
            tokens.push(Token::Text(text.to_string()));
        }

        let src = inner.trim().to_string();
        match kind {
            TagKind::Output => tokens.push(Token::Output { src, line }),
            TagKind::Block => tokens.push(Token::Block { src, line }),
            TagKind::Comment => {}
        }

        pos = close + 2;
        let rest = &source[pos..];
        if strip_after {
            pos += rest.len() - rest.trim_start().len();
        } else if kind != TagKind::Output {
            if rest.starts_with("\r\n") {
                pos += 2;
            } else if rest.starts_with('\n') {
                pos += 1;
            }
        }
    }

    if pos < source.len() {
        tokens.push(Token::Text(source[pos..].to_string()));
    }
    Ok(tokens)
}

// ---- 式の字句解析 ----

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Num(Value),
    Sym(&'static str),
}

const SYMBOLS: [&str; 15] = [
    "==", "!=", "<=", ">=", "<", ">", "=", "(", ")", "[", "]", ",", ".", "|", "-",
];

fn lex(src: &str, line: usize) -> Result<Vec<Tok>, TemplateError> {
    let chars: Vec<char> = src.chars().collect();
    let mut toks = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '\'' || c == '"' {
            let quote = c;
            let mut s = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err(TemplateError::syntax(line, "文字列が閉じられていません")),
                    Some(&ch) if ch == quote => {
                        i += 1;
                        break;
                    }
                    Some('\\') => {
                        let escaped = chars.get(i + 1).copied().ok_or_else(|| {
                            TemplateError::syntax(line, "文字列が閉じられていません")
                        })?;
                        s.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                        i += 2;
                    }
                    Some(&ch) => {
                        s.push(ch);
                        i += 1;
                    }
                }
            }
            toks.push(Tok::Str(s));
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let is_float = i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit();
            if is_float {
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let text: String = chars[start..i].iter().collect();
            toks.push(Tok::Num(parse_number(&text, is_float, line)?));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            toks.push(Tok::Ident(chars[start..i].iter().collect()));
        } else {
            let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
            let sym: &'static str = SYMBOLS
                .iter()
                .copied()
                .find(|s| rest.starts_with(s))
                .ok_or_else(|| TemplateError::syntax(line, format!("予期しない文字 '{}'", c)))?;
            toks.push(Tok::Sym(sym));
            i += sym.chars().count();
        }
    }
    Ok(toks)
}

fn parse_number(text: &str, is_float: bool, line: usize) -> Result<Value, TemplateError> {
    let invalid = || TemplateError::syntax(line, format!("不正な数値 '{}'", text));
    if is_float {
        let n: f64 = text.parse().map_err(|_| invalid())?;
        Number::from_f64(n).map(Value::Number).ok_or_else(invalid)
    } else {
        text.parse::<i64>().map(Value::from).map_err(|_| invalid())
    }
}

// ---- 式の構文解析 ----

struct ExprParser {
    toks: Vec<Tok>,
    pos: usize,
    line: usize,
}

impl ExprParser {
    fn new(src: &str, line: usize) -> Result<Self, TemplateError> {
        Ok(Self {
            toks: lex(src, line)?,
            pos: 0,
            line,
        })
    }

    fn error(&self, message: impl Into<String>) -> TemplateError {
        TemplateError::syntax(self.line, message)
    }

    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Tok> {
        self.toks.get(self.pos + offset)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.toks.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat_sym(&mut self, sym: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Sym(s)) if *s == sym) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Ident(s)) if s == word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_sym(&mut self, sym: &str) -> Result<(), TemplateError> {
        if self.eat_sym(sym) {
            Ok(())
        } else {
            Err(self.error(format!("'{}' が必要です", sym)))
        }
    }

    fn expect_name(&mut self) -> Result<String, TemplateError> {
        match self.next() {
            Some(Tok::Ident(name)) if !RESERVED.contains(&name.as_str()) => Ok(name),
            _ => Err(self.error("名前が必要です")),
        }
    }

    fn expect_end(&self) -> Result<(), TemplateError> {
        match self.peek() {
            None => Ok(()),
            Some(tok) => Err(self.error(format!("余分なトークン {:?}", tok))),
        }
    }

    /// 式全体を読み、残りがないことを確認する
    fn complete(mut self) -> Result<Expr, TemplateError> {
        if self.toks.is_empty() {
            return Err(self.error("式が空です"));
        }
        let expr = self.expr()?;
        self.expect_end()?;
        Ok(expr)
    }

    fn expr(&mut self) -> Result<Expr, TemplateError> {
        let then = self.or()?;
        if self.eat_keyword("if") {
            let cond = self.or()?;
            let otherwise = if self.eat_keyword("else") {
                Some(Box::new(self.expr()?))
            } else {
                None
            };
            return Ok(Expr::Conditional {
                then: Box::new(then),
                cond: Box::new(cond),
                otherwise,
            });
        }
        Ok(then)
    }

    fn or(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.and()?;
        while self.eat_keyword("or") {
            left = Expr::Or(Box::new(left), Box::new(self.and()?));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.not()?;
        while self.eat_keyword("and") {
            left = Expr::And(Box::new(left), Box::new(self.not()?));
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Expr, TemplateError> {
        if self.eat_keyword("not") {
            return Ok(Expr::Not(Box::new(self.not()?)));
        }
        self.compare()
    }

    fn compare_op(&mut self) -> Option<CmpOp> {
        let (op, width) = match (self.peek()?, self.peek_at(1)) {
            (Tok::Sym("=="), _) => (CmpOp::Eq, 1),
            (Tok::Sym("!="), _) => (CmpOp::Ne, 1),
            (Tok::Sym("<"), _) => (CmpOp::Lt, 1),
            (Tok::Sym(">"), _) => (CmpOp::Gt, 1),
            (Tok::Sym("<="), _) => (CmpOp::Le, 1),
            (Tok::Sym(">="), _) => (CmpOp::Ge, 1),
            (Tok::Ident(w), _) if w == "in" => (CmpOp::In, 1),
            (Tok::Ident(w), Some(Tok::Ident(n))) if w == "not" && n == "in" => (CmpOp::NotIn, 2),
            _ => return None,
        };
        self.pos += width;
        Some(op)
    }

    fn compare(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.filtered()?;
        while let Some(op) = self.compare_op() {
            let right = self.filtered()?;
            left = Expr::Compare(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn filtered(&mut self) -> Result<Expr, TemplateError> {
        let mut expr = self.postfix()?;
        while self.eat_sym("|") {
            let name = self.expect_name()?;
            let filter = Filter::from_name(&name)
                .ok_or_else(|| self.error(format!("未知のフィルタ '{}'", name)))?;
            let args = if self.eat_sym("(") {
                self.args()?
            } else {
                Vec::new()
            };
            expr = Expr::Filter(Box::new(expr), filter, args);
        }
        Ok(expr)
    }

    fn postfix(&mut self) -> Result<Expr, TemplateError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat_sym(".") {
                let name = self.expect_name()?;
                expr = Expr::Attr(Box::new(expr), name);
            } else if self.eat_sym("[") {
                let index = self.expr()?;
                self.expect_sym("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    /// `(` の直後から `)` までの引数
    fn args(&mut self) -> Result<Vec<Expr>, TemplateError> {
        self.sequence(")")
    }

    fn sequence(&mut self, close: &str) -> Result<Vec<Expr>, TemplateError> {
        let mut items = Vec::new();
        if self.eat_sym(close) {
            return Ok(items);
        }
        loop {
            items.push(self.expr()?);
            if self.eat_sym(close) {
                return Ok(items);
            }
            self.expect_sym(",")?;
        }
    }

    fn primary(&mut self) -> Result<Expr, TemplateError> {
        match self.next() {
            Some(Tok::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Tok::Num(n)) => Ok(Expr::Literal(n)),
            Some(Tok::Sym("-")) => match self.next() {
                Some(Tok::Num(n)) => {
                    let negated = match n.as_i64() {
                        Some(i) => Value::from(-i),
                        None => n
                            .as_f64()
                            .and_then(|f| Number::from_f64(-f))
                            .map(Value::Number)
                            .unwrap_or(Value::Null),
                    };
                    Ok(Expr::Literal(negated))
                }
                _ => Err(self.error("'-' の後には数値が必要です")),
            },
            Some(Tok::Sym("(")) => {
                let expr = self.expr()?;
                self.expect_sym(")")?;
                Ok(expr)
            }
            Some(Tok::Sym("[")) => Ok(Expr::List(self.sequence("]")?)),
            Some(Tok::Ident(name)) => match name.as_str() {
                "true" | "True" => Ok(Expr::Literal(Value::Bool(true))),
                "false" | "False" => Ok(Expr::Literal(Value::Bool(false))),
                "none" | "None" => Ok(Expr::Literal(Value::Null)),
                word if RESERVED.contains(&word) => {
                    Err(self.error(format!("予期しないキーワード '{}'", word)))
                }
                _ if self.eat_sym("(") => {
                    let function = Function::from_name(&name)
                        .ok_or_else(|| self.error(format!("未知の関数 '{}'", name)))?;
                    Ok(Expr::Call(function, self.args()?))
                }
                _ => Ok(Expr::Var(name)),
            },
            Some(tok) => Err(self.error(format!("予期しないトークン {:?}", tok))),
            None => Err(self.error("式が途中で終わっています")),
        }
    }
}

pub fn parse_expression(src: &str, line: usize) -> Result<Expr, TemplateError> {
    ExprParser::new(src, line)?.complete()
}

// ---- ブロックの構文解析 ----

struct EndTag {
    keyword: String,
    rest: String,
    line: usize,
}

fn split_keyword(src: &str) -> (&str, &str) {
    match src.find(char::is_whitespace) {
        Some(i) => (&src[..i], src[i..].trim()),
        None => (src, ""),
    }
}

struct Parser {
    tokens: std::vec::IntoIter<Token>,
}

impl Parser {
    /// `ends` のいずれかのタグか、入力の終わりまで読む
    fn nodes(&mut self, ends: &[&str]) -> Result<(Vec<Node>, Option<EndTag>), TemplateError> {
        let mut nodes = Vec::new();
        while let Some(token) = self.tokens.next() {
            match token {
                Token::Text(text) => nodes.push(Node::Text(text)),
                Token::Output { src, line } => nodes.push(Node::Output(parse_expression(&src, line)?)),
                Token::Block { src, line } => {
                    let (keyword, rest) = split_keyword(&src);
                    if ends.contains(&keyword) {
                        return Ok((
                            nodes,
                            Some(EndTag {
                                keyword: keyword.to_string(),
                                rest: rest.to_string(),
                                line,
                            }),
                        ));
                    }
                    let node = match keyword {
                        "if" => self.if_block(rest, line)?,
                        "for" => self.for_block(rest, line)?,
                        "set" => set_statement(rest, line)?,
                        "elif" | "else" | "endif" | "endfor" => {
                            return Err(TemplateError::syntax(
                                line,
                                format!("対応するブロックのない '{}'", keyword),
                            ))
                        }
                        other => {
                            return Err(TemplateError::syntax(line, format!("未知のタグ '{}'", other)))
                        }
                    };
                    nodes.push(node);
                }
            }
        }
        Ok((nodes, None))
    }

    fn until(&mut self, ends: &[&str], opened_at: usize) -> Result<(Vec<Node>, EndTag), TemplateError> {
        match self.nodes(ends)? {
            (nodes, Some(end)) => {
                let bare = matches!(end.keyword.as_str(), "else" | "endif" | "endfor");
                if bare && !end.rest.is_empty() {
                    return Err(TemplateError::syntax(
                        end.line,
                        format!("'{}' に余分な内容があります", end.keyword),
                    ));
                }
                Ok((nodes, end))
            }
            (_, None) => Err(TemplateError::syntax(
                opened_at,
                format!("'{}' が見つかりません", ends[ends.len() - 1]),
            )),
        }
    }

    fn if_block(&mut self, cond_src: &str, line: usize) -> Result<Node, TemplateError> {
        let mut branches = Vec::new();
        let mut cond = parse_expression(cond_src, line)?;
        loop {
            let (body, end) = self.until(&["elif", "else", "endif"], line)?;
            branches.push((cond, body));
            match end.keyword.as_str() {
                "elif" => cond = parse_expression(&end.rest, end.line)?,
                "else" => {
                    let (otherwise, _) = self.until(&["endif"], line)?;
                    return Ok(Node::If { branches, otherwise });
                }
                _ => {
                    return Ok(Node::If {
                        branches,
                        otherwise: Vec::new(),
                    })
                }
            }
        }
    }

    fn for_block(&mut self, header: &str, line: usize) -> Result<Node, TemplateError> {
        let mut p = ExprParser::new(header, line)?;
        let var = p.expect_name()?;
        if !p.eat_keyword("in") {
            return Err(p.error("for には 'in' が必要です"));
        }
        let iterable = p.expr()?;
        p.expect_end()?;

        let (body, end) = self.until(&["else", "endfor"], line)?;
        let otherwise = if end.keyword == "else" {
            self.until(&["endfor"], line)?.0
        } else {
            Vec::new()
        };
        Ok(Node::For {
            var,
            iterable,
            body,
            otherwise,
        })
    }
}

fn set_statement(src: &str, line: usize) -> Result<Node, TemplateError> {
    let mut p = ExprParser::new(src, line)?;
    let name = p.expect_name()?;
    p.expect_sym("=")?;
    let value = p.expr()?;
    p.expect_end()?;
    Ok(Node::Set { name, value })
}

/// テンプレート全体を構文木にする
pub fn parse(source: &str) -> Result<Vec<Node>, TemplateError> {
    let mut parser = Parser {
        tokens: tokenize(source)?.into_iter(),
    };
    let (nodes, _) = parser.nodes(&[])?;
    Ok(nodes)
}

/// テンプレート内で束縛されずに参照される変数名
pub fn free_variables(nodes: &[Node]) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let mut bound = Vec::new();
    collect_nodes(nodes, &mut bound, &mut out);
    out
}

fn collect_nodes(nodes: &[Node], bound: &mut Vec<String>, out: &mut BTreeSet<String>) {
    for node in nodes {
        match node {
            Node::Text(_) => {}
            Node::Output(expr) => collect_expr(expr, bound, out),
            Node::If { branches, otherwise } => {
                for (cond, body) in branches {
                    collect_expr(cond, bound, out);
                    collect_nodes(body, bound, out);
                }
                collect_nodes(otherwise, bound, out);
            }
            Node::For {
                var,
                iterable,
                body,
                otherwise,
            } => {
                collect_expr(iterable, bound, out);
                let mark = bound.len();
                bound.push(var.clone());
                bound.push("loop".to_string());
                collect_nodes(body, bound, out);
                bound.truncate(mark);
                collect_nodes(otherwise, bound, out);
            }
            Node::Set { name, value } => {
                collect_expr(value, bound, out);
                bound.push(name.clone());
            }
        }
    }
}

fn collect_expr(expr: &Expr, bound: &[String], out: &mut BTreeSet<String>) {
    match expr {
        Expr::Literal(_) => {}
        Expr::Var(name) => {
            if !bound.iter().any(|b| b == name) {
                out.insert(name.clone());
            }
        }
        Expr::Attr(inner, _) | Expr::Not(inner) => collect_expr(inner, bound, out),
        Expr::Index(a, b) | Expr::And(a, b) | Expr::Or(a, b) | Expr::Compare(a, _, b) => {
            collect_expr(a, bound, out);
            collect_expr(b, bound, out);
        }
        Expr::List(items) | Expr::Call(_, items) => {
            for item in items {
                collect_expr(item, bound, out);
            }
        }
        Expr::Filter(inner, _, args) => {
            collect_expr(inner, bound, out);
            for arg in args {
                collect_expr(arg, bound, out);
            }
        }
        Expr::Conditional {
            then,
            cond,
            otherwise,
        } => {
            collect_expr(then, bound, out);
            collect_expr(cond, bound, out);
            if let Some(o) = otherwise {
                collect_expr(o, bound, out);
            }
        }
    }
}
