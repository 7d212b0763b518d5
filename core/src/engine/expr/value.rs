//! Runtime values and operator/function semantics for the predicate language.

use serde_json::Value as JsonValue;

/// A scalar or list value inside an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    pub fn from_json(value: &JsonValue) -> Value {
        match value {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            JsonValue::String(s) => Value::Str(s.clone()),
            JsonValue::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            // nested objects are flattened before they reach the evaluator;
            // one inside a list degrades to its JSON text
            JsonValue::Object(_) => Value::Str(value.to_string()),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
        }
    }

    /// Truthiness: null, false, zero, empty string and empty list are false.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    pub fn render(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.clone(),
            Value::List(items) => {
                let rendered: Vec<String> = items.iter().map(Value::render).collect();
                format!("[{}]", rendered.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

pub fn arith(op: ArithOp, lhs: &Value, rhs: &Value) -> Result<Value, String> {
    use ArithOp::*;
    // string concatenation is the one non-numeric case
    if op == Add {
        if let (Value::Str(a), Value::Str(b)) = (lhs, rhs) {
            return Ok(Value::Str(format!("{a}{b}")));
        }
    }
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) if op != Div => match op {
            Add => Ok(Value::Int(a + b)),
            Sub => Ok(Value::Int(a - b)),
            Mul => Ok(Value::Int(a * b)),
            Mod => {
                if *b == 0 {
                    Err("modulo by zero".to_string())
                } else {
                    Ok(Value::Int(a % b))
                }
            }
            Div => unreachable!(),
        },
        _ if lhs.is_numeric() && rhs.is_numeric() => {
            let a = lhs.as_f64().unwrap();
            let b = rhs.as_f64().unwrap();
            match op {
                Add => Ok(Value::Float(a + b)),
                Sub => Ok(Value::Float(a - b)),
                Mul => Ok(Value::Float(a * b)),
                Div => {
                    if b == 0.0 {
                        Err("division by zero".to_string())
                    } else {
                        Ok(Value::Float(a / b))
                    }
                }
                Mod => {
                    if b == 0.0 {
                        Err("modulo by zero".to_string())
                    } else {
                        Ok(Value::Float(a % b))
                    }
                }
            }
        }
        _ => Err(format!(
            "unsupported operand types: {} and {}",
            lhs.type_name(),
            rhs.type_name()
        )),
    }
}

pub fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> Result<Value, String> {
    use CmpOp::*;
    let result = match op {
        Eq => equals(lhs, rhs),
        Ne => !equals(lhs, rhs),
        _ => {
            let ordering = ordering(lhs, rhs)?;
            match op {
                Lt => ordering.is_lt(),
                Le => ordering.is_le(),
                Gt => ordering.is_gt(),
                Ge => ordering.is_ge(),
                Eq | Ne => unreachable!(),
            }
        }
    };
    Ok(Value::Bool(result))
}

fn equals(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (a, b) if a.is_numeric() && b.is_numeric() => a.as_f64() == b.as_f64(),
        (a, b) => a == b,
    }
}

fn ordering(lhs: &Value, rhs: &Value) -> Result<std::cmp::Ordering, String> {
    match (lhs, rhs) {
        (a, b) if a.is_numeric() && b.is_numeric() => a
            .as_f64()
            .unwrap()
            .partial_cmp(&b.as_f64().unwrap())
            .ok_or_else(|| "numbers are not comparable".to_string()),
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (a, b) => Err(format!(
            "cannot order {} and {}",
            a.type_name(),
            b.type_name()
        )),
    }
}

/// Whitelisted functions; anything else is rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Abs,
    Min,
    Max,
    Sum,
    Len,
    Round,
    Int,
    Float,
    Str,
    Bool,
}

impl Func {
    pub fn from_name(name: &str) -> Option<Func> {
        Some(match name {
            "abs" => Func::Abs,
            "min" => Func::Min,
            "max" => Func::Max,
            "sum" => Func::Sum,
            "len" => Func::Len,
            "round" => Func::Round,
            "int" => Func::Int,
            "float" => Func::Float,
            "str" => Func::Str,
            "bool" => Func::Bool,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Func::Abs => "abs",
            Func::Min => "min",
            Func::Max => "max",
            Func::Sum => "sum",
            Func::Len => "len",
            Func::Round => "round",
            Func::Int => "int",
            Func::Float => "float",
            Func::Str => "str",
            Func::Bool => "bool",
        }
    }
}

pub fn apply(func: Func, args: &[Value]) -> Result<Value, String> {
    match func {
        Func::Abs => {
            let [arg] = one(func, args)?;
            match arg {
                Value::Int(i) => Ok(Value::Int(i.abs())),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                other => Err(bad_arg(func, other)),
            }
        }
        Func::Min | Func::Max => {
            let items = spread_numeric(func, args)?;
            let folded = items.into_iter().fold(None::<f64>, |acc, v| {
                Some(match acc {
                    None => v,
                    Some(acc) if func == Func::Min => acc.min(v),
                    Some(acc) => acc.max(v),
                })
            });
            let value = folded.ok_or_else(|| format!("{}() of empty sequence", func.name()))?;
            Ok(float_or_int(value))
        }
        Func::Sum => {
            let items = spread_numeric(func, args)?;
            Ok(float_or_int(items.iter().sum()))
        }
        Func::Len => {
            let [arg] = one(func, args)?;
            match arg {
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::List(l) => Ok(Value::Int(l.len() as i64)),
                other => Err(bad_arg(func, other)),
            }
        }
        Func::Round => {
            let [arg] = one(func, args)?;
            match arg {
                Value::Int(i) => Ok(Value::Int(*i)),
                Value::Float(f) => Ok(Value::Int(f.round() as i64)),
                other => Err(bad_arg(func, other)),
            }
        }
        Func::Int => {
            let [arg] = one(func, args)?;
            match arg {
                Value::Bool(b) => Ok(Value::Int(*b as i64)),
                Value::Int(i) => Ok(Value::Int(*i)),
                Value::Float(f) => Ok(Value::Int(f.trunc() as i64)),
                Value::Str(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| format!("int() could not parse '{s}'")),
                other => Err(bad_arg(func, other)),
            }
        }
        Func::Float => {
            let [arg] = one(func, args)?;
            match arg {
                Value::Bool(b) => Ok(Value::Float(*b as i64 as f64)),
                Value::Int(i) => Ok(Value::Float(*i as f64)),
                Value::Float(f) => Ok(Value::Float(*f)),
                Value::Str(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| format!("float() could not parse '{s}'")),
                other => Err(bad_arg(func, other)),
            }
        }
        Func::Str => {
            let [arg] = one(func, args)?;
            Ok(Value::Str(arg.render()))
        }
        Func::Bool => {
            let [arg] = one(func, args)?;
            Ok(Value::Bool(arg.truthy()))
        }
    }
}

fn one(func: Func, args: &[Value]) -> Result<[&Value; 1], String> {
    match args {
        [arg] => Ok([arg]),
        _ => Err(format!(
            "{}() takes exactly one argument, got {}",
            func.name(),
            args.len()
        )),
    }
}

/// min/max/sum accept either varargs or a single list argument.
fn spread_numeric(func: Func, args: &[Value]) -> Result<Vec<f64>, String> {
    let items: Vec<&Value> = match args {
        [Value::List(items)] => items.iter().collect(),
        _ => args.iter().collect(),
    };
    items
        .into_iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| format!("{}() expects numbers, got {}", func.name(), v.type_name()))
        })
        .collect()
}

fn float_or_int(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::Int(value as i64)
    } else {
        Value::Float(value)
    }
}

fn bad_arg(func: Func, arg: &Value) -> String {
    format!("{}() unsupported for {}", func.name(), arg.type_name())
}
