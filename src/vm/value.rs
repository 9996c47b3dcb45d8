use std::{cell::RefCell, fmt, rc::Rc};

use hashbrown::HashMap;

use crate::middle::mir::{Constant, Type, arithmetic};

/// A runtime value. Strings, arrays and maps are shared references, so
/// mutation through one copy is visible through all. Structs are immutable;
/// updating a field produces a new struct.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Void,
    Int(i64),
    Float(f64),
    Bool(bool),
    String(Rc<str>),
    Array(Rc<RefCell<Vec<Value>>>),
    Map(Rc<RefCell<HashMap<Rc<str>, Value>>>),
    Struct(Rc<[Value]>),
    Closure(Rc<Closure>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Closure {
    pub function: String,
    pub captures: Vec<Value>,
}

impl Value {
    pub fn string(value: &str) -> Self {
        Value::String(Rc::from(value))
    }

    pub fn array(elements: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(elements)))
    }

    /// The value a missing map entry reads as, for types that have one
    pub fn zero(ty: &Type) -> Option<Self> {
        Some(match ty {
            Type::Int => Value::Int(0),
            Type::Float => Value::Float(0.0),
            Type::Bool => Value::Bool(false),
            Type::String => Value::string(""),
            _ => return None,
        })
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Struct(_) => "struct",
            Value::Closure(_) => "function",
        }
    }
}

impl From<&Constant> for Value {
    fn from(constant: &Constant) -> Self {
        match constant {
            Constant::Int(v) => Value::Int(*v),
            Constant::Float(v) => Value::Float(*v),
            Constant::Bool(v) => Value::Bool(*v),
            Constant::String(v) => Value::string(v),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => write!(f, "void"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v}"),
            Value::Array(elements) => {
                write!(f, "[{}]", itertools::join(elements.borrow().iter(), ", "))
            }
            Value::Map(entries) => write!(f, "{{{} entries}}", entries.borrow().len()),
            Value::Struct(fields) => write!(f, "{{{}}}", itertools::join(fields.iter(), ", ")),
            Value::Closure(closure) => write!(f, "<fn {}>", closure.function),
        }
    }
}

/// Process exit status for the result of the entry function. Integers and
/// booleans keep their low 8 bits; anything else exits successfully.
pub fn exit_code(value: &Value) -> u8 {
    match value {
        Value::Int(v) => arithmetic::exit_status(*v),
        Value::Bool(v) => u8::from(*v),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(exit_code(&Value::Int(15)), 15);
        assert_eq!(exit_code(&Value::Int(-5)), 251);
        assert_eq!(exit_code(&Value::Bool(true)), 1);
        assert_eq!(exit_code(&Value::string("hello")), 0);
        assert_eq!(exit_code(&Value::Void), 0);
    }

    #[test]
    fn arrays_are_shared() {
        let array = Value::array(vec![Value::Int(1)]);
        let alias = array.clone();
        if let Value::Array(elements) = &alias {
            elements.borrow_mut().push(Value::Int(2));
        }
        assert_eq!(array.to_string(), "[1, 2]");
    }
}
