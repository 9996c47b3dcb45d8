use super::{BodyLoweringContext, BuildError, BuildErrorKind, LoopTargets, VariableId, build_error};
use crate::{
    frontend::ast,
    middle::mir::{self, BlockId, Terminator, ValueId},
};

/// An assignable location whose subexpressions have already been evaluated
enum Place {
    Variable(VariableId),
    Element {
        container: ValueId,
        container_type: mir::Type,
        index: ValueId,
    },
    /// Struct fields are values, so storing one rebuilds the struct and
    /// stores that into `base`
    Field {
        base: Box<Place>,
        base_value: ValueId,
        struct_type: mir::Type,
        field: usize,
    },
}

impl BodyLoweringContext<'_> {
    pub(super) fn lower_statements(&mut self, statements: &[ast::Statement]) -> Result<(), BuildError> {
        for statement in statements {
            // Everything after a return, break or continue is dead
            if self.current.is_none() {
                break;
            }
            self.lower_statement(statement)?;
        }
        Ok(())
    }

    fn lower_scoped_block(&mut self, block: &ast::Block) -> Result<(), BuildError> {
        self.push_scope();
        let result = self.lower_statements(&block.statements);
        self.pop_scope();
        result
    }

    pub(super) fn lower_statement(&mut self, statement: &ast::Statement) -> Result<(), BuildError> {
        match statement {
            ast::Statement::Local { name, ty, value } => {
                let ty = self.lower_type(ty, name)?;
                let value = self.lower_value(value)?;
                let variable = self.declare_variable(name, ty);
                let block = self.current_block();
                self.write_variable(variable, block, value);
            }
            ast::Statement::Expression(expression) => {
                self.lower_expression(expression)?;
            }
            ast::Statement::Assignment { target, value } => {
                let value = self.lower_value(value)?;
                let place = self.lower_place(target)?;
                self.store_place(&place, value)?;
            }
            ast::Statement::OperatorAssignment {
                operator,
                target,
                value,
            } => {
                let ty = self.lower_type(&target.ty, "assignment target")?;
                let place = self.lower_place(target)?;
                let current = self.load_place(&place, ty)?;
                let rhs = self.lower_value(value)?;
                let result = self.lower_arithmetic(operator.binary_operator(), &target.ty, current, rhs)?;
                self.store_place(&place, result)?;
            }
            ast::Statement::If {
                condition,
                positive,
                negative,
            } => self.lower_if(condition, positive, negative.as_ref())?,
            ast::Statement::While { condition, body } => self.lower_while(condition, body)?,
            ast::Statement::For {
                initializer,
                condition,
                step,
                body,
            } => {
                self.push_scope();
                let result = self.lower_for(
                    initializer.as_deref(),
                    condition.as_ref(),
                    step.as_deref(),
                    body,
                );
                self.pop_scope();
                result?;
            }
            ast::Statement::ForIn {
                binding,
                ty,
                iterable,
                body,
            } => {
                self.push_scope();
                let result = self.lower_for_in(binding, ty, iterable, body);
                self.pop_scope();
                result?;
            }
            ast::Statement::Break => {
                let Some(targets) = self.loops.last().copied() else {
                    return build_error!(self, BuildErrorKind::LoopControlOutsideLoop("break"));
                };
                self.jump_from_current(targets.break_target);
            }
            ast::Statement::Continue => {
                let Some(targets) = self.loops.last().copied() else {
                    return build_error!(self, BuildErrorKind::LoopControlOutsideLoop("continue"));
                };
                self.jump_from_current(targets.continue_target);
            }
            ast::Statement::Return(value) => {
                let value = value.as_ref().map(|v| self.lower_value(v)).transpose()?;
                let block = self.current_block();
                self.terminate(block, Terminator::Return { value });
                self.current = None;
            }
            ast::Statement::Block(block) => self.lower_scoped_block(block)?,
        }

        Ok(())
    }

    /// Evaluates the subexpressions of `target` once, leaving a place that
    /// can be both loaded and stored.
    fn lower_place(&mut self, target: &ast::Expression) -> Result<Place, BuildError> {
        match &target.kind {
            ast::ExpressionKind::Variable(name) => Ok(Place::Variable(self.lookup_variable(name)?)),
            ast::ExpressionKind::Index { base, index } => {
                let container_type = self.lower_type(&base.ty, "index base")?;
                if !matches!(container_type, mir::Type::Array(_) | mir::Type::Map(_)) {
                    return build_error!(self, BuildErrorKind::NotIndexable(container_type));
                }
                let container = self.lower_value(base)?;
                let index = self.lower_value(index)?;
                Ok(Place::Element {
                    container,
                    container_type,
                    index,
                })
            }
            ast::ExpressionKind::Field { base, field } => {
                let (struct_type, field) = self.field_index(&base.ty, field)?;
                let base = self.lower_place(base)?;
                let base_value = self.load_place(&base, struct_type.clone())?;
                Ok(Place::Field {
                    base: Box::new(base),
                    base_value,
                    struct_type,
                    field,
                })
            }
            _ => build_error!(self, BuildErrorKind::InvalidAssignmentTarget),
        }
    }

    fn load_place(&mut self, place: &Place, ty: mir::Type) -> Result<ValueId, BuildError> {
        Ok(match place {
            Place::Variable(variable) => {
                let block = self.current_block();
                self.read_variable(*variable, block)?
            }
            Place::Element {
                container,
                container_type: mir::Type::Map(_),
                index,
            } => self.define(ty, |destination| mir::Instruction::MapGet {
                destination,
                map: *container,
                key: *index,
            }),
            Place::Element { container, index, .. } => {
                self.define(ty, |destination| mir::Instruction::ArrayLoad {
                    destination,
                    array: *container,
                    index: *index,
                })
            }
            Place::Field {
                base_value, field, ..
            } => self.define(ty, |destination| mir::Instruction::FieldLoad {
                destination,
                base: *base_value,
                field: *field,
            }),
        })
    }

    fn store_place(&mut self, place: &Place, value: ValueId) -> Result<(), BuildError> {
        match place {
            Place::Variable(variable) => {
                let block = self.current_block();
                self.write_variable(*variable, block, value);
            }
            Place::Element {
                container,
                container_type: mir::Type::Map(_),
                index,
            } => self.push_instruction(mir::Instruction::MapPut {
                map: *container,
                key: *index,
                value,
            }),
            Place::Element { container, index, .. } => {
                self.push_instruction(mir::Instruction::ArrayStore {
                    array: *container,
                    index: *index,
                    value,
                })
            }
            Place::Field {
                base,
                base_value,
                struct_type,
                field,
            } => {
                let updated = self.define(struct_type.clone(), |destination| {
                    mir::Instruction::FieldStore {
                        destination,
                        base: *base_value,
                        field: *field,
                        value,
                    }
                });
                self.store_place(base, updated)?;
            }
        }
        Ok(())
    }

    fn lower_if(
        &mut self,
        condition: &ast::Expression,
        positive: &ast::Block,
        negative: Option<&ast::Block>,
    ) -> Result<(), BuildError> {
        let condition = self.lower_value(condition)?;
        let branch_block = self.current_block();

        let then_block = self.function.add_block("then");
        let else_block = negative.map(|_| self.function.add_block("else"));
        let merge_block = self.function.add_block("merge");

        self.terminate(
            branch_block,
            Terminator::Branch {
                condition,
                positive: then_block,
                negative: else_block.unwrap_or(merge_block),
            },
        );

        self.seal_block(then_block)?;
        self.current = Some(then_block);
        self.lower_scoped_block(positive)?;
        self.jump_from_current(merge_block);

        if let (Some(else_block), Some(negative)) = (else_block, negative) {
            self.seal_block(else_block)?;
            self.current = Some(else_block);
            self.lower_scoped_block(negative)?;
            self.jump_from_current(merge_block);
        }

        self.seal_block(merge_block)?;
        self.enter_if_reachable(merge_block);
        Ok(())
    }

    fn lower_while(&mut self, condition: &ast::Expression, body: &ast::Block) -> Result<(), BuildError> {
        let header = self.function.add_block("loop_header");
        self.jump_from_current(header);
        self.current = Some(header);

        let condition = self.lower_value(condition)?;
        let condition_end = self.current_block();

        let body_block = self.function.add_block("loop_body");
        let exit = self.function.add_block("loop_exit");

        self.terminate(
            condition_end,
            Terminator::Branch {
                condition,
                positive: body_block,
                negative: exit,
            },
        );
        self.seal_block(body_block)?;

        self.loops.push(LoopTargets {
            break_target: exit,
            continue_target: header,
        });
        self.current = Some(body_block);
        let result = self.lower_scoped_block(body);
        self.loops.pop();
        result?;
        self.jump_from_current(header);

        self.seal_block(header)?;
        self.seal_block(exit)?;
        self.enter_if_reachable(exit);
        Ok(())
    }

    /// init -> header (condition) -> body -> step -> header, leaving through
    /// exit. `continue` goes to the step block.
    fn lower_for(
        &mut self,
        initializer: Option<&ast::Statement>,
        condition: Option<&ast::Expression>,
        step: Option<&ast::Statement>,
        body: &ast::Block,
    ) -> Result<(), BuildError> {
        if let Some(initializer) = initializer {
            self.lower_statement(initializer)?;
        }

        let header = self.function.add_block("for_header");
        self.jump_from_current(header);
        self.current = Some(header);

        let condition = condition.map(|c| self.lower_value(c)).transpose()?;
        let condition_end = self.current_block();

        let body_block = self.function.add_block("for_body");
        let step_block = self.function.add_block("for_step");
        let exit = self.function.add_block("for_exit");

        match condition {
            Some(condition) => self.terminate(
                condition_end,
                Terminator::Branch {
                    condition,
                    positive: body_block,
                    negative: exit,
                },
            ),
            None => self.terminate(condition_end, Terminator::Jump { destination: body_block }),
        }
        self.seal_block(body_block)?;

        self.lower_loop_body(body_block, step_block, exit, body)?;

        self.seal_block(step_block)?;
        self.enter_if_reachable(step_block);
        if self.current.is_some() {
            if let Some(step) = step {
                self.lower_statement(step)?;
            }
            self.jump_from_current(header);
        }

        self.seal_block(header)?;
        self.seal_block(exit)?;
        self.enter_if_reachable(exit);
        Ok(())
    }

    fn lower_loop_body(
        &mut self,
        body_block: BlockId,
        continue_target: BlockId,
        exit: BlockId,
        body: &ast::Block,
    ) -> Result<(), BuildError> {
        self.loops.push(LoopTargets {
            break_target: exit,
            continue_target,
        });
        self.current = Some(body_block);
        let result = self.lower_scoped_block(body);
        self.loops.pop();
        result?;

        self.jump_from_current(continue_target);
        Ok(())
    }

    /// Range and array iteration, desugared to the classic loop over a hidden
    /// counter. The range end is evaluated once; the array length is read on
    /// every iteration since the body may push to the array.
    fn lower_for_in(
        &mut self,
        binding: &str,
        binding_type: &ast::Type,
        iterable: &ast::Iterable,
        body: &ast::Block,
    ) -> Result<(), BuildError> {
        let binding_type = self.lower_type(binding_type, binding)?;

        let (start, source) = match iterable {
            ast::Iterable::Range { start, end } => {
                let start = self.lower_value(start)?;
                let end = self.lower_value(end)?;
                (start, IterationSource::Range { end })
            }
            ast::Iterable::Array(array) => {
                let array = self.lower_value(array)?;
                let zero = self.constant(mir::Constant::Int(0));
                (zero, IterationSource::Array { array })
            }
        };

        let counter = self.declare_hidden_variable(mir::Type::Int);
        let block = self.current_block();
        self.write_variable(counter, block, start);

        let header = self.function.add_block("for_header");
        self.jump_from_current(header);
        self.current = Some(header);

        let index = self.read_variable(counter, header)?;
        let limit = match source {
            IterationSource::Range { end } => end,
            IterationSource::Array { array } => self.define(mir::Type::Int, |destination| {
                mir::Instruction::ArrayLength { destination, array }
            }),
        };
        let condition = self.define(mir::Type::Bool, |destination| mir::Instruction::Compare {
            predicate: mir::ComparePredicate::Lt,
            destination,
            lhs: index,
            rhs: limit,
        });

        let body_block = self.function.add_block("for_body");
        let step_block = self.function.add_block("for_step");
        let exit = self.function.add_block("for_exit");

        self.terminate(
            header,
            Terminator::Branch {
                condition,
                positive: body_block,
                negative: exit,
            },
        );
        self.seal_block(body_block)?;

        /* Bind the loop variable at the top of the body */

        self.current = Some(body_block);
        let index = self.read_variable(counter, body_block)?;
        let element = match source {
            IterationSource::Range { .. } => index,
            IterationSource::Array { array } => {
                self.define(binding_type.clone(), |destination| mir::Instruction::ArrayLoad {
                    destination,
                    array,
                    index,
                })
            }
        };
        self.push_scope();
        let variable = self.declare_variable(binding, binding_type);
        self.write_variable(variable, body_block, element);
        let result = self.lower_loop_body(body_block, step_block, exit, body);
        self.pop_scope();
        result?;

        /* Increment */

        self.seal_block(step_block)?;
        self.enter_if_reachable(step_block);
        if let Some(step) = self.current {
            let index = self.read_variable(counter, step)?;
            let one = self.constant(mir::Constant::Int(1));
            let next = self.define(mir::Type::Int, |destination| mir::Instruction::Binary {
                operator: mir::BinaryOperator::Add,
                destination,
                lhs: index,
                rhs: one,
            });
            let step_end = self.current_block();
            self.write_variable(counter, step_end, next);
            self.jump_from_current(header);
        }

        self.seal_block(header)?;
        self.seal_block(exit)?;
        self.enter_if_reachable(exit);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum IterationSource {
    Range { end: mir::ValueId },
    Array { array: mir::ValueId },
}
