//! Shorthand constructors for typed trees. Front ends produce trees through
//! these as well as tests that need a program without a parser.

use super::*;

pub fn module(name: &str, functions: Vec<FunctionDefinition>) -> Module {
    Module {
        name: name.into(),
        structs: Vec::new(),
        functions,
    }
}

pub fn structure(name: &str, fields: &[(&str, Type)]) -> StructDefinition {
    StructDefinition {
        name: name.into(),
        fields: fields
            .iter()
            .map(|(name, ty)| Field {
                name: (*name).into(),
                ty: ty.clone(),
            })
            .collect(),
    }
}

pub fn function(
    name: &str,
    parameters: &[(&str, Type)],
    return_type: Type,
    body: Vec<Statement>,
) -> FunctionDefinition {
    FunctionDefinition {
        name: name.into(),
        parameters: parameters_of(parameters),
        return_type,
        body: Block { statements: body },
    }
}

fn parameters_of(parameters: &[(&str, Type)]) -> Vec<FunctionParameter> {
    parameters
        .iter()
        .map(|(name, ty)| FunctionParameter {
            name: (*name).into(),
            ty: ty.clone(),
        })
        .collect()
}

pub fn block(statements: Vec<Statement>) -> Block {
    Block { statements }
}

pub fn array_type(element: Type) -> Type {
    Type::Array(Box::new(element))
}

pub fn map_type(value: Type) -> Type {
    Type::Map(Box::new(value))
}

pub fn function_type(parameters: Vec<Type>, return_type: Type) -> Type {
    Type::Function {
        parameters,
        return_type: Box::new(return_type),
    }
}

/* Expressions */

fn expression(ty: Type, kind: ExpressionKind) -> Expression {
    Expression { ty, kind }
}

pub fn int(value: i64) -> Expression {
    expression(Type::Int, ExpressionKind::Literal(Literal::Int(value)))
}

pub fn float(value: f64) -> Expression {
    expression(Type::Float, ExpressionKind::Literal(Literal::Float(value)))
}

pub fn boolean(value: bool) -> Expression {
    expression(Type::Bool, ExpressionKind::Literal(Literal::Bool(value)))
}

pub fn string(value: &str) -> Expression {
    expression(
        Type::String,
        ExpressionKind::Literal(Literal::String(value.into())),
    )
}

pub fn var(name: &str, ty: Type) -> Expression {
    expression(ty, ExpressionKind::Variable(name.into()))
}

pub fn function_ref(name: &str, ty: Type) -> Expression {
    expression(ty, ExpressionKind::Function(name.into()))
}

/// The result type is `bool` for comparisons and logical operators and the
/// left operand's type otherwise.
pub fn binary(operator: BinaryOperatorKind, lhs: Expression, rhs: Expression) -> Expression {
    let ty = match operator.class() {
        BinaryOperatorClass::Arithmetic => lhs.ty.clone(),
        BinaryOperatorClass::Logical | BinaryOperatorClass::Comparison => Type::Bool,
    };

    expression(
        ty,
        ExpressionKind::Binary {
            operator,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
    )
}

pub fn unary(operator: UnaryOperatorKind, operand: Expression) -> Expression {
    expression(
        operand.ty.clone(),
        ExpressionKind::Unary {
            operator,
            operand: Box::new(operand),
        },
    )
}

pub fn cast(operand: Expression, to: Type) -> Expression {
    expression(to, ExpressionKind::Cast(Box::new(operand)))
}

pub fn call(function: &str, ty: Type, arguments: Vec<Expression>) -> Expression {
    expression(
        ty,
        ExpressionKind::Call {
            function: function.into(),
            arguments,
        },
    )
}

pub fn call_value(callee: Expression, arguments: Vec<Expression>) -> Expression {
    let ty = match &callee.ty {
        Type::Function { return_type, .. } => (**return_type).clone(),
        other => Type::Unresolved(format!("call of non-function {other:?}")),
    };

    expression(
        ty,
        ExpressionKind::CallValue {
            callee: Box::new(callee),
            arguments,
        },
    )
}

pub fn index(base: Expression, index: Expression) -> Expression {
    let ty = match &base.ty {
        Type::Array(element) | Type::Map(element) => (**element).clone(),
        other => Type::Unresolved(format!("index into {other:?}")),
    };

    expression(
        ty,
        ExpressionKind::Index {
            base: Box::new(base),
            index: Box::new(index),
        },
    )
}

pub fn field(base: Expression, field: &str, ty: Type) -> Expression {
    expression(
        ty,
        ExpressionKind::Field {
            base: Box::new(base),
            field: field.into(),
        },
    )
}

pub fn array(element: Type, elements: Vec<Expression>) -> Expression {
    expression(array_type(element), ExpressionKind::Array(elements))
}

pub fn map(value: Type, entries: Vec<(Expression, Expression)>) -> Expression {
    expression(map_type(value), ExpressionKind::Map(entries))
}

pub fn structure_literal(name: &str, fields: Vec<(&str, Expression)>) -> Expression {
    expression(
        Type::Struct(name.into()),
        ExpressionKind::Struct {
            name: name.into(),
            fields: fields
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        },
    )
}

pub fn lambda(
    parameters: &[(&str, Type)],
    return_type: Type,
    captures: &[(&str, Type)],
    body: Vec<Statement>,
) -> Expression {
    let ty = function_type(
        parameters.iter().map(|(_, ty)| ty.clone()).collect(),
        return_type.clone(),
    );

    expression(
        ty,
        ExpressionKind::Lambda {
            parameters: parameters_of(parameters),
            return_type,
            captures: parameters_of(captures),
            body: Block { statements: body },
        },
    )
}

/* Statements */

pub fn local(name: &str, value: Expression) -> Statement {
    Statement::Local {
        name: name.into(),
        ty: value.ty.clone(),
        value,
    }
}

pub fn assign(target: Expression, value: Expression) -> Statement {
    Statement::Assignment { target, value }
}

pub fn operator_assign(
    operator: AssignmentOperatorKind,
    target: Expression,
    value: Expression,
) -> Statement {
    Statement::OperatorAssignment {
        operator,
        target,
        value,
    }
}

pub fn expr(expression: Expression) -> Statement {
    Statement::Expression(expression)
}

pub fn if_else(
    condition: Expression,
    positive: Vec<Statement>,
    negative: Option<Vec<Statement>>,
) -> Statement {
    Statement::If {
        condition,
        positive: block(positive),
        negative: negative.map(block),
    }
}

pub fn while_loop(condition: Expression, body: Vec<Statement>) -> Statement {
    Statement::While {
        condition,
        body: block(body),
    }
}

pub fn for_loop(
    initializer: Option<Statement>,
    condition: Option<Expression>,
    step: Option<Statement>,
    body: Vec<Statement>,
) -> Statement {
    Statement::For {
        initializer: initializer.map(Box::new),
        condition,
        step: step.map(Box::new),
        body: block(body),
    }
}

pub fn for_range(binding: &str, start: Expression, end: Expression, body: Vec<Statement>) -> Statement {
    Statement::ForIn {
        binding: binding.into(),
        ty: Type::Int,
        iterable: Iterable::Range { start, end },
        body: block(body),
    }
}

pub fn for_each(binding: &str, array: Expression, body: Vec<Statement>) -> Statement {
    let ty = match &array.ty {
        Type::Array(element) => (**element).clone(),
        other => Type::Unresolved(format!("iteration over {other:?}")),
    };

    Statement::ForIn {
        binding: binding.into(),
        ty,
        iterable: Iterable::Array(array),
        body: block(body),
    }
}

pub fn ret(value: Expression) -> Statement {
    Statement::Return(Some(value))
}

pub fn ret_void() -> Statement {
    Statement::Return(None)
}

pub fn brk() -> Statement {
    Statement::Break
}

pub fn cont() -> Statement {
    Statement::Continue
}
