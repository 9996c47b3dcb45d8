//! The typed syntax tree handed over by the front end. Names are resolved and
//! every expression carries its checked type; nothing here is validated again
//! beyond what lowering needs.

use serde::{Deserialize, Serialize};

pub mod build;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    #[serde(default)]
    pub structs: Vec<StructDefinition>,
    pub functions: Vec<FunctionDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructDefinition {
    pub name: String,
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub parameters: Vec<FunctionParameter>,
    pub return_type: Type,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionParameter {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Type {
    Void,
    Int,
    Float,
    Bool,
    String,
    Array(Box<Type>),
    Map(Box<Type>),
    Struct(String),
    Function {
        parameters: Vec<Type>,
        return_type: Box<Type>,
    },
    /// A type the checker could not finalize. Lowering refuses these.
    Unresolved(String),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Block {
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    // Local binding, always initialized
    Local {
        name: String,
        ty: Type,
        value: Expression,
    },
    Expression(Expression),
    Assignment {
        target: Expression,
        value: Expression,
    },
    OperatorAssignment {
        operator: AssignmentOperatorKind,
        target: Expression,
        value: Expression,
    },
    If {
        condition: Expression,
        positive: Block,
        negative: Option<Block>,
    },
    While {
        condition: Expression,
        body: Block,
    },
    /// Classic three-clause loop. A missing condition loops forever.
    For {
        initializer: Option<Box<Statement>>,
        condition: Option<Expression>,
        step: Option<Box<Statement>>,
        body: Block,
    },
    ForIn {
        binding: String,
        ty: Type,
        iterable: Iterable,
        body: Block,
    },
    Break,
    Continue,
    Return(Option<Expression>),
    Block(Block),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Iterable {
    /// Half-open integer range `start..end`
    Range { start: Expression, end: Expression },
    /// Elements of an array, in order
    Array(Expression),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    pub ty: Type,
    pub kind: ExpressionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExpressionKind {
    Literal(Literal),
    Variable(String),
    /// A named module function used as a value
    Function(String),
    Binary {
        operator: BinaryOperatorKind,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    Unary {
        operator: UnaryOperatorKind,
        operand: Box<Expression>,
    },
    /// Conversion to the type of the enclosing expression
    Cast(Box<Expression>),
    /// Direct call of a module function or a runtime library function
    Call {
        function: String,
        arguments: Vec<Expression>,
    },
    /// Call through a function value
    CallValue {
        callee: Box<Expression>,
        arguments: Vec<Expression>,
    },
    Index {
        base: Box<Expression>,
        index: Box<Expression>,
    },
    Field {
        base: Box<Expression>,
        field: String,
    },
    Array(Vec<Expression>),
    Map(Vec<(Expression, Expression)>),
    Struct {
        name: String,
        fields: Vec<(String, Expression)>,
    },
    Lambda {
        parameters: Vec<FunctionParameter>,
        return_type: Type,
        /// Enclosing variables read by the body, copied when the lambda is
        /// created
        captures: Vec<FunctionParameter>,
        body: Block,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOperatorKind {
    Add,                  // +
    Subtract,             // -
    Multiply,             // *
    Divide,               // /
    Modulus,              // %
    Equals,               // ==
    NotEquals,            // !=
    LessThan,             // <
    LessThanOrEqualTo,    // <=
    GreaterThan,          // >
    GreaterThanOrEqualTo, // >=
    LogicalAnd,           // &&
    LogicalOr,            // ||
    BitwiseAnd,           // &
    BitwiseOr,            // |
    BitwiseXor,           // ^
    ShiftLeft,            // <<
    ShiftRight,           // >>
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperatorClass {
    Arithmetic,
    Logical,
    Comparison,
}

impl BinaryOperatorKind {
    pub fn class(self) -> BinaryOperatorClass {
        match self {
            Self::Add
            | Self::Subtract
            | Self::Multiply
            | Self::Divide
            | Self::Modulus
            | Self::BitwiseAnd
            | Self::BitwiseOr
            | Self::BitwiseXor
            | Self::ShiftLeft
            | Self::ShiftRight => BinaryOperatorClass::Arithmetic,
            Self::LogicalAnd | Self::LogicalOr => BinaryOperatorClass::Logical,
            Self::Equals
            | Self::NotEquals
            | Self::LessThan
            | Self::LessThanOrEqualTo
            | Self::GreaterThan
            | Self::GreaterThanOrEqualTo => BinaryOperatorClass::Comparison,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOperatorKind {
    LogicalNot, // !
    BitwiseNot, // ~
    Negate,     // -
}

impl core::fmt::Display for UnaryOperatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LogicalNot => write!(f, "!"),
            Self::BitwiseNot => write!(f, "~"),
            Self::Negate => write!(f, "-"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentOperatorKind {
    Add,        // +=
    Subtract,   // -=
    Multiply,   // *=
    Divide,     // /=
    Modulus,    // %=
    BitwiseAnd, // &=
    BitwiseOr,  // |=
    BitwiseXor, // ^=
    ShiftLeft,  // <<=
    ShiftRight, // >>=
}

impl AssignmentOperatorKind {
    /// The binary operator applied before storing
    pub fn binary_operator(self) -> BinaryOperatorKind {
        match self {
            Self::Add => BinaryOperatorKind::Add,
            Self::Subtract => BinaryOperatorKind::Subtract,
            Self::Multiply => BinaryOperatorKind::Multiply,
            Self::Divide => BinaryOperatorKind::Divide,
            Self::Modulus => BinaryOperatorKind::Modulus,
            Self::BitwiseAnd => BinaryOperatorKind::BitwiseAnd,
            Self::BitwiseOr => BinaryOperatorKind::BitwiseOr,
            Self::BitwiseXor => BinaryOperatorKind::BitwiseXor,
            Self::ShiftLeft => BinaryOperatorKind::ShiftLeft,
            Self::ShiftRight => BinaryOperatorKind::ShiftRight,
        }
    }
}
