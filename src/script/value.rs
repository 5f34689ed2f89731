use super::Result;
use super::ast::FnDecl;
use super::eval::NativeContext;
use std::fmt;
use std::rc::Rc;

/// Signature of a built-in function.
pub type NativeFn = dyn Fn(&mut NativeContext<'_>, Vec<Value>) -> Result<Value>;

/// Built-in function value.
pub struct Native {
    /// Name shown in representations and `help()`.
    pub name: String,
    /// One-line usage text.
    pub help: String,
    /// Implementation.
    pub func: Box<NativeFn>,
}

impl fmt::Debug for Native {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Native").field("name", &self.name).finish()
    }
}

/// Record value: a type name with ordered named fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Type name, e.g. `OpResult`.
    pub name: String,
    /// Field names and values in declaration order.
    pub fields: Vec<(String, Value)>,
}

impl Record {
    /// Create a record.
    pub fn new(name: impl Into<String>, fields: Vec<(String, Value)>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Look up a field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// Mutable field lookup.
    pub fn get_mut(&mut self, field: &str) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }
}

/// Runtime values. Lists and records have value semantics: assignment copies.
#[derive(Debug, Clone)]
pub enum Value {
    /// Absence of a value.
    Nil,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// List.
    List(Vec<Value>),
    /// Record.
    Record(Record),
    /// User-defined function.
    Function(Rc<FnDecl>),
    /// Built-in function.
    Native(Rc<Native>),
}

impl Value {
    /// Type name reported by `type()`.
    pub fn type_name(&self) -> &str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Record(record) => &record.name,
            Value::Function(_) => "function",
            Value::Native(_) => "builtin",
        }
    }

    /// Truthiness used by conditions and `not`.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(flag) => *flag,
            Value::Int(value) => *value != 0,
            Value::Float(value) => *value != 0.0,
            Value::Str(text) => !text.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Record(_) | Value::Function(_) | Value::Native(_) => true,
        }
    }

    /// Whether this value is nil.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Representation echoed by the interactive loop: strings are quoted.
    pub fn repr(&self) -> String {
        match self {
            Value::Str(text) => quote(text),
            other => other.to_string(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// `str()` form: strings print bare, containers show their elements' `repr`.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(flag) => write!(f, "{flag}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => {
                if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
                    write!(f, "{value:.1}")
                } else {
                    write!(f, "{value}")
                }
            }
            Value::Str(text) => f.write_str(text),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    f.write_str(&item.repr())?;
                }
                f.write_str("]")
            }
            Value::Record(record) => {
                write!(f, "{}(", record.name)?;
                for (i, (name, value)) in record.fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}={}", value.repr())?;
                }
                f.write_str(")")
            }
            Value::Function(decl) => write!(f, "<fn {}>", decl.name),
            Value::Native(native) => write!(f, "<builtin {}>", native.name),
        }
    }
}

fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn representations() {
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::Float(0.5).to_string(), "0.5");
        assert_eq!(Value::Str("a\"b".into()).repr(), "\"a\\\"b\"");
        assert_eq!(
            Value::List(vec![Value::Int(1), Value::Str("x".into()), Value::Nil]).to_string(),
            "[1, \"x\", nil]"
        );
        let record = Record::new(
            "OpResult",
            vec![
                ("ok".into(), Value::Bool(true)),
                ("description".into(), Value::Str("done".into())),
            ],
        );
        assert_eq!(
            Value::Record(record).repr(),
            "OpResult(ok=true, description=\"done\")"
        );
    }

    #[test]
    fn equality_and_truthiness() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::Int(1), Value::Str("1".into()));
        assert!(!Value::List(Vec::new()).truthy());
        assert!(Value::Str("x".into()).truthy());
        assert!(!Value::Nil.truthy());
    }
}
