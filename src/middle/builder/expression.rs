use super::{BodyLoweringContext, BuildError, BuildErrorKind, PendingLambda, build_error};
use crate::{
    frontend::ast::{self, BinaryOperatorClass, BinaryOperatorKind, UnaryOperatorKind},
    middle::mir::{
        BinaryOperator, Callee, ComparePredicate, Constant, Instruction, Terminator, Type,
        UnaryOperator, ValueId,
    },
    runtime::RuntimeFunction,
};

impl BodyLoweringContext<'_> {
    pub(super) fn constant(&mut self, value: Constant) -> ValueId {
        self.define(value.ty(), |destination| Instruction::Const { destination, value })
    }

    /// Lowers an expression that must produce a value
    pub(super) fn lower_value(&mut self, expression: &ast::Expression) -> Result<ValueId, BuildError> {
        match self.lower_expression(expression)? {
            Some(value) => Ok(value),
            None => build_error!(self, BuildErrorKind::VoidValue),
        }
    }

    /// Lowers an expression, returning `None` for calls without a result
    pub(super) fn lower_expression(
        &mut self,
        expression: &ast::Expression,
    ) -> Result<Option<ValueId>, BuildError> {
        let ty = self.lower_type(&expression.ty, "expression")?;

        let value = match &expression.kind {
            ast::ExpressionKind::Literal(literal) => self.constant(match literal {
                ast::Literal::Int(v) => Constant::Int(*v),
                ast::Literal::Float(v) => Constant::Float(*v),
                ast::Literal::Bool(v) => Constant::Bool(*v),
                ast::Literal::String(v) => Constant::String(v.clone()),
            }),
            ast::ExpressionKind::Variable(name) => {
                let variable = self.lookup_variable(name)?;
                let block = self.current_block();
                self.read_variable(variable, block)?
            }
            ast::ExpressionKind::Function(name) => {
                let Some(adapter) = self.module.adapter_for(name) else {
                    return build_error!(self, BuildErrorKind::UnknownFunction(name.clone()));
                };
                self.define(ty, |destination| Instruction::MakeClosure {
                    destination,
                    function: adapter,
                    captures: Vec::new(),
                })
            }
            ast::ExpressionKind::Binary { operator, lhs, rhs } => match operator.class() {
                BinaryOperatorClass::Logical => self.lower_short_circuit(*operator, lhs, rhs)?,
                BinaryOperatorClass::Comparison => {
                    let Some(predicate) = compare_predicate(*operator) else {
                        let ty = self.lower_type(&lhs.ty, "operand")?;
                        return build_error!(
                            self,
                            BuildErrorKind::UnsupportedOperator {
                                operator: format!("{operator:?}"),
                                ty,
                            }
                        );
                    };
                    let lhs = self.lower_value(lhs)?;
                    let rhs = self.lower_value(rhs)?;
                    self.define(Type::Bool, |destination| Instruction::Compare {
                        predicate,
                        destination,
                        lhs,
                        rhs,
                    })
                }
                BinaryOperatorClass::Arithmetic => {
                    let lhs_value = self.lower_value(lhs)?;
                    let rhs_value = self.lower_value(rhs)?;
                    self.lower_arithmetic(*operator, &lhs.ty, lhs_value, rhs_value)?
                }
            },
            ast::ExpressionKind::Unary { operator, operand } => {
                let value = self.lower_value(operand)?;
                let operator = match (operator, &ty) {
                    (UnaryOperatorKind::LogicalNot, Type::Bool) => UnaryOperator::Not,
                    (UnaryOperatorKind::BitwiseNot, Type::Int) => UnaryOperator::Complement,
                    (UnaryOperatorKind::Negate, Type::Int) => UnaryOperator::Neg,
                    (UnaryOperatorKind::Negate, Type::Float) => UnaryOperator::FNeg,
                    _ => {
                        return build_error!(
                            self,
                            BuildErrorKind::UnsupportedOperator {
                                operator: operator.to_string(),
                                ty: ty.clone(),
                            }
                        );
                    }
                };
                self.define(ty, |destination| Instruction::Unary {
                    operator,
                    destination,
                    operand: value,
                })
            }
            ast::ExpressionKind::Cast(operand) => {
                let from = self.lower_type(&operand.ty, "cast operand")?;
                let value = self.lower_value(operand)?;
                self.lower_cast(value, from, ty)?
            }
            ast::ExpressionKind::Call {
                function,
                arguments,
            } => return self.lower_call(function, arguments, ty),
            ast::ExpressionKind::CallValue { callee, arguments } => {
                let callee_type = self.lower_type(&callee.ty, "callee")?;
                let Type::Function(signature) = &callee_type else {
                    return build_error!(self, BuildErrorKind::NotCallable(callee_type));
                };
                let return_type = signature.return_type.clone();

                let callee = self.lower_value(callee)?;
                let arguments = self.lower_arguments(arguments)?;
                let destination = (return_type != Type::Void).then(|| self.function.new_value(return_type));
                self.push_instruction(Instruction::CallIndirect {
                    destination,
                    callee,
                    arguments,
                });
                return Ok(destination);
            }
            ast::ExpressionKind::Index { base, index } => {
                let base_type = self.lower_type(&base.ty, "index base")?;
                let container = self.lower_value(base)?;
                let index = self.lower_value(index)?;
                match base_type {
                    Type::Array(_) => self.define(ty, |destination| Instruction::ArrayLoad {
                        destination,
                        array: container,
                        index,
                    }),
                    Type::Map(_) => self.define(ty, |destination| Instruction::MapGet {
                        destination,
                        map: container,
                        key: index,
                    }),
                    other => return build_error!(self, BuildErrorKind::NotIndexable(other)),
                }
            }
            ast::ExpressionKind::Field { base, field } => {
                let (_, index) = self.field_index(&base.ty, field)?;
                let base = self.lower_value(base)?;
                self.define(ty, |destination| Instruction::FieldLoad {
                    destination,
                    base,
                    field: index,
                })
            }
            ast::ExpressionKind::Array(elements) => {
                let elements = self.lower_arguments(elements)?;
                self.define(ty, |destination| Instruction::ArrayNew {
                    destination,
                    elements,
                })
            }
            ast::ExpressionKind::Map(entries) => {
                let mut lowered = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    lowered.push((self.lower_value(key)?, self.lower_value(value)?));
                }
                self.define(ty, |destination| Instruction::MapNew {
                    destination,
                    entries: lowered,
                })
            }
            ast::ExpressionKind::Struct { name, fields } => self.lower_struct_literal(name, fields, ty)?,
            ast::ExpressionKind::Lambda {
                parameters,
                return_type,
                captures,
                body,
            } => self.lower_lambda(parameters, return_type, captures, body, ty)?,
        };

        Ok(Some(value))
    }

    fn lower_arguments(&mut self, arguments: &[ast::Expression]) -> Result<Vec<ValueId>, BuildError> {
        arguments.iter().map(|a| self.lower_value(a)).collect()
    }

    /// Integer, float and string arithmetic. The operand type picks the
    /// instruction.
    pub(super) fn lower_arithmetic(
        &mut self,
        operator: BinaryOperatorKind,
        operand_type: &ast::Type,
        lhs: ValueId,
        rhs: ValueId,
    ) -> Result<ValueId, BuildError> {
        let ty = self.lower_type(operand_type, "operand")?;

        let instruction_operator = match (&ty, operator) {
            (Type::Int, BinaryOperatorKind::Add) => BinaryOperator::Add,
            (Type::Int, BinaryOperatorKind::Subtract) => BinaryOperator::Sub,
            (Type::Int, BinaryOperatorKind::Multiply) => BinaryOperator::Mul,
            (Type::Int, BinaryOperatorKind::Divide) => BinaryOperator::Div,
            (Type::Int, BinaryOperatorKind::Modulus) => BinaryOperator::Rem,
            (Type::Int, BinaryOperatorKind::BitwiseAnd) => BinaryOperator::And,
            (Type::Int, BinaryOperatorKind::BitwiseOr) => BinaryOperator::Or,
            (Type::Int, BinaryOperatorKind::BitwiseXor) => BinaryOperator::Xor,
            (Type::Int, BinaryOperatorKind::ShiftLeft) => BinaryOperator::Shl,
            (Type::Int, BinaryOperatorKind::ShiftRight) => BinaryOperator::Shr,
            (Type::Float, BinaryOperatorKind::Add) => BinaryOperator::FAdd,
            (Type::Float, BinaryOperatorKind::Subtract) => BinaryOperator::FSub,
            (Type::Float, BinaryOperatorKind::Multiply) => BinaryOperator::FMul,
            (Type::Float, BinaryOperatorKind::Divide) => BinaryOperator::FDiv,
            (Type::Float, BinaryOperatorKind::Modulus) => BinaryOperator::FRem,
            (Type::String, BinaryOperatorKind::Add) => BinaryOperator::Concat,
            _ => {
                return build_error!(
                    self,
                    BuildErrorKind::UnsupportedOperator {
                        operator: format!("{operator:?}"),
                        ty,
                    }
                );
            }
        };

        Ok(self.define(ty, |destination| Instruction::Binary {
            operator: instruction_operator,
            destination,
            lhs,
            rhs,
        }))
    }

    /// `a && b` and `a || b` branch around the evaluation of `b`. The merge
    /// block's phi takes `a` itself on the edge that skipped `b`.
    fn lower_short_circuit(
        &mut self,
        operator: BinaryOperatorKind,
        lhs: &ast::Expression,
        rhs: &ast::Expression,
    ) -> Result<ValueId, BuildError> {
        let lhs = self.lower_value(lhs)?;
        let lhs_end = self.current_block();

        let is_and = operator == BinaryOperatorKind::LogicalAnd;
        let (rhs_label, merge_label) = if is_and {
            ("and_rhs", "and_merge")
        } else {
            ("or_rhs", "or_merge")
        };
        let rhs_block = self.function.add_block(rhs_label);
        let merge_block = self.function.add_block(merge_label);

        let (positive, negative) = if is_and {
            (rhs_block, merge_block)
        } else {
            (merge_block, rhs_block)
        };
        self.terminate(
            lhs_end,
            Terminator::Branch {
                condition: lhs,
                positive,
                negative,
            },
        );
        self.seal_block(rhs_block)?;

        self.current = Some(rhs_block);
        let rhs = self.lower_value(rhs)?;
        let rhs_end = self.current_block();
        self.jump_from_current(merge_block);
        self.seal_block(merge_block)?;

        self.current = Some(merge_block);
        let incoming = self
            .function
            .block(merge_block)
            .predecessors
            .iter()
            .map(|p| (*p, if *p == rhs_end { rhs } else { lhs }))
            .collect::<Vec<_>>();
        let result = self.function.new_value(Type::Bool);
        self.function.block_mut(merge_block).instructions.insert(
            0,
            Instruction::Phi {
                destination: result,
                incoming,
            },
        );

        Ok(result)
    }

    fn lower_cast(&mut self, value: ValueId, from: Type, to: Type) -> Result<ValueId, BuildError> {
        let runtime = match (&from, &to) {
            _ if from == to => return Ok(value),
            (Type::Int, Type::Float)
            | (Type::Float, Type::Int)
            | (Type::Bool, Type::Int)
            | (Type::Int, Type::Bool) => {
                return Ok(self.define(to, |destination| Instruction::Cast {
                    destination,
                    operand: value,
                }));
            }
            (Type::Int, Type::String) => RuntimeFunction::IntToString,
            (Type::Bool, Type::String) => RuntimeFunction::BoolToString,
            (Type::Float, Type::String) => RuntimeFunction::FloatToString,
            (Type::String, Type::Int) => RuntimeFunction::StringToInt,
            (Type::String, Type::Float) => RuntimeFunction::StringToFloat,
            (Type::String, Type::Bool) => RuntimeFunction::StringToBool,
            _ => return build_error!(self, BuildErrorKind::UnsupportedCast { from, to }),
        };

        Ok(self.define(to, |destination| Instruction::Call {
            destination: Some(destination),
            callee: Callee::Runtime(runtime),
            arguments: vec![value],
        }))
    }

    /// Module functions shadow runtime library functions of the same name.
    /// Overloaded library functions are picked by their first argument.
    fn lower_call(
        &mut self,
        function: &str,
        arguments: &[ast::Expression],
        return_type: Type,
    ) -> Result<Option<ValueId>, BuildError> {
        let argument_types = arguments
            .iter()
            .map(|argument| self.lower_type(&argument.ty, function))
            .collect::<Result<Vec<_>, _>>()?;
        let callee = if self.module.signatures.contains_key(function) {
            Callee::Function(function.into())
        } else if let Some(runtime) = RuntimeFunction::lookup(function, &argument_types) {
            Callee::Runtime(runtime)
        } else {
            return build_error!(self, BuildErrorKind::UnknownFunction(function.into()));
        };

        let arguments = self.lower_arguments(arguments)?;
        let destination = (return_type != Type::Void).then(|| self.function.new_value(return_type));
        self.push_instruction(Instruction::Call {
            destination,
            callee,
            arguments,
        });
        Ok(destination)
    }

    /// Resolves `field` of the struct type `ty` to its position
    pub(super) fn field_index(&self, ty: &ast::Type, field: &str) -> Result<(Type, usize), BuildError> {
        let struct_type = self.lower_type(ty, field)?;
        let Type::Struct(name) = &struct_type else {
            return build_error!(
                self,
                BuildErrorKind::UnknownField {
                    structure: struct_type.to_string(),
                    field: field.into(),
                }
            );
        };
        let Some(definition) = self.module.structs.get(name) else {
            return build_error!(self, BuildErrorKind::UnknownStruct(name.clone()));
        };
        let Some(index) = definition.field_index(field) else {
            return build_error!(
                self,
                BuildErrorKind::UnknownField {
                    structure: name.clone(),
                    field: field.into(),
                }
            );
        };

        Ok((struct_type, index))
    }

    /// Fields are evaluated in source order and stored in declaration order
    fn lower_struct_literal(
        &mut self,
        name: &str,
        fields: &[(String, ast::Expression)],
        ty: Type,
    ) -> Result<ValueId, BuildError> {
        let mut values = Vec::with_capacity(fields.len());
        for (field, value) in fields {
            values.push((field.as_str(), self.lower_value(value)?));
        }

        let Some(definition) = self.module.structs.get(name) else {
            return build_error!(self, BuildErrorKind::UnknownStruct(name.into()));
        };

        let mut ordered = Vec::with_capacity(definition.fields.len());
        for declared in &definition.fields {
            let Some((_, value)) = values.iter().find(|(field, _)| *field == declared.name) else {
                return build_error!(
                    self,
                    BuildErrorKind::MissingField {
                        structure: name.into(),
                        field: declared.name.clone(),
                    }
                );
            };
            ordered.push(*value);
        }
        if let Some((field, _)) = values
            .iter()
            .find(|(field, _)| definition.field_index(field).is_none())
        {
            return build_error!(
                self,
                BuildErrorKind::UnknownField {
                    structure: name.into(),
                    field: (*field).into(),
                }
            );
        }

        Ok(self.define(ty, |destination| Instruction::StructNew {
            destination,
            fields: ordered,
        }))
    }

    /// Queues the body as a function of its own and builds the closure
    /// holding the current values of the captured variables.
    fn lower_lambda(
        &mut self,
        parameters: &[ast::FunctionParameter],
        return_type: &ast::Type,
        captures: &[ast::FunctionParameter],
        body: &ast::Block,
        ty: Type,
    ) -> Result<ValueId, BuildError> {
        let mut captured = Vec::with_capacity(captures.len());
        for capture in captures {
            let variable = self.lookup_variable(&capture.name)?;
            let block = self.current_block();
            captured.push(self.read_variable(variable, block)?);
        }

        let name = self.module.lambda_name(&self.function.name);
        self.module.pending_lambdas.push(PendingLambda {
            name: name.clone(),
            parameters: parameters
                .iter()
                .map(|p| (p.name.clone(), p.ty.clone()))
                .collect(),
            return_type: return_type.clone(),
            captures: captures
                .iter()
                .map(|p| (p.name.clone(), p.ty.clone()))
                .collect(),
            body: body.clone(),
        });

        Ok(self.define(ty, |destination| Instruction::MakeClosure {
            destination,
            function: name,
            captures: captured,
        }))
    }
}

/// `None` for operators that do not compare
fn compare_predicate(operator: BinaryOperatorKind) -> Option<ComparePredicate> {
    Some(match operator {
        BinaryOperatorKind::Equals => ComparePredicate::Eq,
        BinaryOperatorKind::NotEquals => ComparePredicate::Ne,
        BinaryOperatorKind::LessThan => ComparePredicate::Lt,
        BinaryOperatorKind::LessThanOrEqualTo => ComparePredicate::Le,
        BinaryOperatorKind::GreaterThan => ComparePredicate::Gt,
        BinaryOperatorKind::GreaterThanOrEqualTo => ComparePredicate::Ge,
        _ => return None,
    })
}
