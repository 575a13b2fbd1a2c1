//! 構文木の評価と文字列化

use super::helpers::as_number;
use super::parser::{CmpOp, Expr, Node};
use crate::error::TemplateError;
use chrono::NaiveDateTime;
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// 描画中の変数スコープ
///
/// `for` ごとに1段積む。`set` は最も内側の段に書く。
pub struct RenderScope {
    pub now: NaiveDateTime,
    frames: Vec<Map<String, Value>>,
}

impl RenderScope {
    pub fn new(variables: Map<String, Value>, now: NaiveDateTime) -> Self {
        Self {
            now,
            frames: vec![variables],
        }
    }

    fn lookup(&self, name: &str) -> Value {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(name))
            .cloned()
            .unwrap_or(Value::Null)
    }

    fn set(&mut self, name: &str, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.to_string(), value);
        }
    }
}

/// 値の表示用文字列。null は空文字列、配列は ", " 区切り
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) => f.to_string(),
            _ => n.to_string(),
        },
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(display).collect::<Vec<_>>().join(", "),
        Value::Object(_) => value.to_string(),
    }
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

pub fn render_nodes(nodes: &[Node], scope: &mut RenderScope, out: &mut String) -> Result<(), TemplateError> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Output(expr) => out.push_str(&display(&eval(expr, scope)?)),
            Node::If { branches, otherwise } => {
                let mut taken = false;
                for (cond, body) in branches {
                    if truthy(&eval(cond, scope)?) {
                        render_nodes(body, scope, out)?;
                        taken = true;
                        break;
                    }
                }
                if !taken {
                    render_nodes(otherwise, scope, out)?;
                }
            }
            Node::For {
                var,
                iterable,
                body,
                otherwise,
            } => {
                let items = iteration_items(eval(iterable, scope)?);
                if items.is_empty() {
                    render_nodes(otherwise, scope, out)?;
                    continue;
                }
                let length = items.len();
                scope.frames.push(Map::new());
                let result = items.into_iter().enumerate().try_for_each(|(i, item)| {
                    scope.set(var, item);
                    scope.set("loop", loop_info(i, length));
                    render_nodes(body, scope, out)
                });
                scope.frames.pop();
                result?;
            }
            Node::Set { name, value } => {
                let value = eval(value, scope)?;
                scope.set(name, value);
            }
        }
    }
    Ok(())
}

/// 繰り返し対象の要素。オブジェクトはキー、スカラー値は1要素として扱う
fn iteration_items(value: Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        Value::Object(map) => map.into_iter().map(|(k, _)| Value::String(k)).collect(),
        other => vec![other],
    }
}

fn loop_info(index0: usize, length: usize) -> Value {
    let mut info = Map::new();
    info.insert("index".to_string(), Value::from(index0 + 1));
    info.insert("index0".to_string(), Value::from(index0));
    info.insert("revindex".to_string(), Value::from(length - index0));
    info.insert("first".to_string(), Value::Bool(index0 == 0));
    info.insert("last".to_string(), Value::Bool(index0 + 1 == length));
    info.insert("length".to_string(), Value::from(length));
    Value::Object(info)
}

pub fn eval(expr: &Expr, scope: &RenderScope) -> Result<Value, TemplateError> {
    Ok(match expr {
        Expr::Literal(v) => v.clone(),
        Expr::Var(name) => scope.lookup(name),
        Expr::Attr(inner, name) => match eval(inner, scope)? {
            Value::Object(mut map) => map.remove(name).unwrap_or(Value::Null),
            _ => Value::Null,
        },
        Expr::Index(inner, index) => index_value(eval(inner, scope)?, &eval(index, scope)?),
        Expr::List(items) => Value::Array(
            items
                .iter()
                .map(|item| eval(item, scope))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Expr::Call(function, args) => {
            let args = eval_all(args, scope)?;
            function.call(&args, scope)?
        }
        Expr::Filter(inner, filter, args) => {
            let input = eval(inner, scope)?;
            let args = eval_all(args, scope)?;
            filter.apply(&input, &args)?
        }
        Expr::Not(inner) => Value::Bool(!truthy(&eval(inner, scope)?)),
        Expr::And(a, b) => {
            let left = eval(a, scope)?;
            if truthy(&left) {
                eval(b, scope)?
            } else {
                left
            }
        }
        Expr::Or(a, b) => {
            let left = eval(a, scope)?;
            if truthy(&left) {
                left
            } else {
                eval(b, scope)?
            }
        }
        Expr::Compare(a, op, b) => Value::Bool(compare(&eval(a, scope)?, *op, &eval(b, scope)?)?),
        Expr::Conditional {
            then,
            cond,
            otherwise,
        } => {
            if truthy(&eval(cond, scope)?) {
                eval(then, scope)?
            } else {
                match otherwise {
                    Some(o) => eval(o, scope)?,
                    None => Value::Null,
                }
            }
        }
    })
}

fn eval_all(exprs: &[Expr], scope: &RenderScope) -> Result<Vec<Value>, TemplateError> {
    exprs.iter().map(|e| eval(e, scope)).collect()
}

fn index_value(container: Value, index: &Value) -> Value {
    match (container, index) {
        (Value::Array(mut items), Value::Number(n)) => {
            let len = items.len() as i64;
            match n.as_i64() {
                Some(i) if i >= 0 && i < len => items.swap_remove(i as usize),
                Some(i) if i < 0 && -i <= len => items.swap_remove((len + i) as usize),
                _ => Value::Null,
            }
        }
        (Value::Object(mut map), Value::String(key)) => map.remove(key).unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn contains(container: &Value, item: &Value) -> bool {
    match container {
        Value::Array(items) => items.iter().any(|i| values_equal(i, item)),
        Value::Object(map) => item.as_str().map(|k| map.contains_key(k)).unwrap_or(false),
        Value::String(s) => s.contains(&display(item)),
        _ => false,
    }
}

fn ordering(a: &Value, b: &Value) -> Result<Ordering, TemplateError> {
    let incomparable = || TemplateError::Render(format!("比較できない値です: {} と {}", a, b));
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => {
            let (x, y) = (as_number(a), as_number(b));
            x.partial_cmp(&y).ok_or_else(incomparable)
        }
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(incomparable()),
    }
}

fn compare(a: &Value, op: CmpOp, b: &Value) -> Result<bool, TemplateError> {
    Ok(match op {
        CmpOp::Eq => values_equal(a, b),
        CmpOp::Ne => !values_equal(a, b),
        CmpOp::In => contains(b, a),
        CmpOp::NotIn => !contains(b, a),
        CmpOp::Lt => ordering(a, b)? == Ordering::Less,
        CmpOp::Gt => ordering(a, b)? == Ordering::Greater,
        CmpOp::Le => ordering(a, b)? != Ordering::Greater,
        CmpOp::Ge => ordering(a, b)? != Ordering::Less,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_display() {
        assert_eq!(display(&Value::Null), "");
        assert_eq!(display(&json!(3)), "3");
        assert_eq!(display(&json!(2.5)), "2.5");
        assert_eq!(display(&json!(["a", 1])), "a, 1");
        assert_eq!(display(&json!(true)), "true");
    }

    #[test]
    fn test_truthy() {
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!([])));
        assert!(!truthy(&json!(0)));
        assert!(truthy(&json!("x")));
        assert!(truthy(&json!({"a": 1})));
    }

    #[test]
    fn test_compare() {
        assert!(compare(&json!(1), CmpOp::Eq, &json!(1.0)).unwrap());
        assert!(compare(&json!("b"), CmpOp::Gt, &json!("a")).unwrap());
        assert!(compare(&json!(2), CmpOp::Le, &json!(2)).unwrap());
        assert!(compare(&json!("x"), CmpOp::In, &json!(["x", "y"])).unwrap());
        assert!(compare(&json!("z"), CmpOp::NotIn, &json!("xy")).unwrap());
        assert!(compare(&json!(1), CmpOp::Lt, &json!("a")).is_err());
    }

    #[test]
    fn test_index_value() {
        assert_eq!(index_value(json!([1, 2, 3]), &json!(-1)), json!(3));
        assert_eq!(index_value(json!([1, 2, 3]), &json!(5)), Value::Null);
        assert_eq!(index_value(json!({"k": "v"}), &json!("k")), json!("v"));
    }
}
