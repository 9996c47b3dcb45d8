//! Structural and type invariants of MIR. Verification never changes the
//! module, so running it twice gives the same answer.

use hashbrown::HashMap;
use thiserror::Error;

use crate::{
    index::Index,
    middle::mir::{
        BinaryOperator, BlockId, Callee, ComparePredicate, Function, Instruction, Module,
        Terminator, Type, UnaryOperator, ValueId,
        cfg::{DominatorTree, derived_predecessors},
    },
    runtime::{AbiType, RuntimeFunction},
};

#[derive(Debug, Clone, PartialEq, Error)]
#[error("in function `{function}`{}: {kind}", .block.map(|b| format!(" at {b}")).unwrap_or_default())]
pub struct VerifyError {
    pub function: String,
    pub block: Option<BlockId>,
    pub kind: VerifyErrorKind,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VerifyErrorKind {
    #[error("entry block {0} does not exist")]
    MissingEntry(BlockId),
    #[error("entry block has predecessors")]
    EntryHasPredecessors,
    #[error("block has no terminator")]
    MissingTerminator,
    #[error("jump to unknown block {0}")]
    UnknownTarget(BlockId),
    #[error("both arms of the branch go to {0}")]
    IdenticalBranchArms(BlockId),
    #[error("recorded predecessors [{recorded}] differ from the edges [{derived}]")]
    PredecessorMismatch { recorded: String, derived: String },
    #[error("phi {0} follows a non-phi instruction")]
    PhiNotAtStart(ValueId),
    #[error("phi {phi} has {found} incoming values for {expected} predecessors")]
    PhiArity {
        phi: ValueId,
        expected: usize,
        found: usize,
    },
    #[error("incoming blocks of phi {0} are not in predecessor order")]
    PhiOrder(ValueId),
    #[error("{0} is defined more than once")]
    MultipleDefinitions(ValueId),
    #[error("{0} is not in the value table")]
    UnknownValue(ValueId),
    #[error("{0} is used but never defined")]
    UndefinedValue(ValueId),
    #[error("use of {value} is not dominated by its definition")]
    NotDominated { value: ValueId },
    #[error("{value} has type {found}, expected {expected}")]
    TypeMismatch {
        value: ValueId,
        expected: Type,
        found: Type,
    },
    #[error("{operator} is not defined for {ty}")]
    InvalidOperand { operator: String, ty: Type },
    #[error("cannot cast {from} to {to}")]
    InvalidCast { from: Type, to: Type },
    #[error("call of `{callee}` passes {found} arguments, expected {expected}")]
    ArityMismatch {
        callee: String,
        expected: usize,
        found: usize,
    },
    #[error("`{callee}` does not return a value")]
    VoidResult { callee: String },
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("unknown struct `{0}`")]
    UnknownStruct(String),
    #[error("struct `{structure}` has no field {field}")]
    FieldOutOfRange { structure: String, field: usize },
    #[error("{ty} is not a {expected}")]
    ExpectedKind { ty: Type, expected: &'static str },
    #[error("return of {found} from a function returning {expected}")]
    ReturnMismatch { expected: Type, found: Type },
}

pub fn verify_module(module: &Module) -> Result<(), VerifyError> {
    for function in module.functions.values() {
        verify_function(module, function)?;
    }
    Ok(())
}

pub fn verify_function(module: &Module, function: &Function) -> Result<(), VerifyError> {
    let mut verifier = Verifier {
        module,
        function,
        block: None,
        definitions: HashMap::new(),
    };

    verifier.check_structure()?;
    verifier.collect_definitions()?;
    verifier.check_dominance()?;
    verifier.check_types()?;

    tracing::trace!(function = %function.name, "verified");
    Ok(())
}

/// Where a value is defined: its block and position. Parameters sit before
/// the first instruction of the entry block.
#[derive(Debug, Clone, Copy)]
struct Definition {
    block: BlockId,
    position: Option<usize>,
}

struct Verifier<'a> {
    module: &'a Module,
    function: &'a Function,
    block: Option<BlockId>,
    definitions: HashMap<ValueId, Definition>,
}

impl Verifier<'_> {
    fn error(&self, kind: VerifyErrorKind) -> VerifyError {
        VerifyError {
            function: self.function.name.clone(),
            block: self.block,
            kind,
        }
    }

    fn fail<T>(&self, kind: VerifyErrorKind) -> Result<T, VerifyError> {
        Err(self.error(kind))
    }

    /* Control flow */

    fn check_structure(&mut self) -> Result<(), VerifyError> {
        let function = self.function;

        let Some(entry) = function.blocks.get(&function.entry) else {
            return self.fail(VerifyErrorKind::MissingEntry(function.entry));
        };
        if !entry.predecessors.is_empty() {
            self.block = Some(function.entry);
            return self.fail(VerifyErrorKind::EntryHasPredecessors);
        }

        for block in function.blocks.values() {
            self.block = Some(block.id);

            let Some(terminator) = &block.terminator else {
                return self.fail(VerifyErrorKind::MissingTerminator);
            };
            for target in terminator.successors() {
                if !function.blocks.contains_key(&target) {
                    return self.fail(VerifyErrorKind::UnknownTarget(target));
                }
            }
            if let Terminator::Branch {
                positive, negative, ..
            } = terminator
            {
                if positive == negative {
                    return self.fail(VerifyErrorKind::IdenticalBranchArms(*positive));
                }
            }
        }

        let derived = derived_predecessors(function);
        for block in function.blocks.values() {
            self.block = Some(block.id);

            let mut recorded = block.predecessors.clone();
            let mut expected = derived.get(&block.id).cloned().unwrap_or_default();
            recorded.sort();
            expected.sort();
            if recorded != expected {
                return self.fail(VerifyErrorKind::PredecessorMismatch {
                    recorded: itertools::join(&block.predecessors, ", "),
                    derived: itertools::join(&expected, ", "),
                });
            }

            let mut seen_other = false;
            for instruction in &block.instructions {
                let Instruction::Phi {
                    destination,
                    incoming,
                } = instruction
                else {
                    seen_other = true;
                    continue;
                };

                if seen_other {
                    return self.fail(VerifyErrorKind::PhiNotAtStart(*destination));
                }
                if incoming.len() != block.predecessors.len() {
                    return self.fail(VerifyErrorKind::PhiArity {
                        phi: *destination,
                        expected: block.predecessors.len(),
                        found: incoming.len(),
                    });
                }
                if incoming
                    .iter()
                    .zip(&block.predecessors)
                    .any(|((from, _), predecessor)| from != predecessor)
                {
                    return self.fail(VerifyErrorKind::PhiOrder(*destination));
                }
            }
        }

        self.block = None;
        Ok(())
    }

    /* Definitions and dominance */

    fn define(&mut self, value: ValueId, definition: Definition) -> Result<(), VerifyError> {
        if value.index() >= self.function.values.len() {
            return self.fail(VerifyErrorKind::UnknownValue(value));
        }
        if self.definitions.insert(value, definition).is_some() {
            return self.fail(VerifyErrorKind::MultipleDefinitions(value));
        }
        Ok(())
    }

    fn collect_definitions(&mut self) -> Result<(), VerifyError> {
        let function = self.function;

        for parameter in &function.parameters {
            self.define(
                *parameter,
                Definition {
                    block: function.entry,
                    position: None,
                },
            )?;
        }

        for block in function.blocks.values() {
            self.block = Some(block.id);
            for (position, instruction) in block.instructions.iter().enumerate() {
                if let Some(destination) = instruction.destination() {
                    self.define(
                        destination,
                        Definition {
                            block: block.id,
                            position: Some(position),
                        },
                    )?;
                }
            }
        }

        self.block = None;
        Ok(())
    }

    /// Whether the definition of `value` is available at `position` of
    /// `block`. `None` is the end of the block.
    fn available(
        &self,
        dominators: &DominatorTree,
        value: ValueId,
        block: BlockId,
        position: Option<usize>,
    ) -> Result<bool, VerifyError> {
        let Some(definition) = self.definitions.get(&value) else {
            return self.fail(VerifyErrorKind::UndefinedValue(value));
        };

        if definition.block != block {
            return Ok(dominators.dominates(definition.block, block));
        }

        Ok(match (definition.position, position) {
            (None, _) => true,
            (Some(_), None) => true,
            (Some(defined), Some(used)) => defined < used,
        })
    }

    fn check_dominance(&mut self) -> Result<(), VerifyError> {
        let function = self.function;
        let dominators = DominatorTree::compute(function);

        for block in function.blocks.values() {
            self.block = Some(block.id);

            for (position, instruction) in block.instructions.iter().enumerate() {
                if let Instruction::Phi { incoming, .. } = instruction {
                    // Phi operands are used at the end of the incoming edge
                    for (predecessor, value) in incoming {
                        let reachable = dominators.is_reachable(*predecessor);
                        if !self.available(&dominators, *value, *predecessor, None)? && reachable {
                            return self.fail(VerifyErrorKind::NotDominated { value: *value });
                        }
                    }
                    continue;
                }

                for value in instruction.operands() {
                    if !self.available(&dominators, value, block.id, Some(position))? {
                        return self.fail(VerifyErrorKind::NotDominated { value });
                    }
                }
            }

            if let Some(value) = block.terminator.as_ref().and_then(Terminator::operand) {
                if !self.available(&dominators, value, block.id, None)? {
                    return self.fail(VerifyErrorKind::NotDominated { value });
                }
            }
        }

        self.block = None;
        Ok(())
    }

    /* Types */

    fn ty(&self, value: ValueId) -> &Type {
        &self.function.values[value]
    }

    fn expect(&self, value: ValueId, expected: &Type) -> Result<(), VerifyError> {
        let found = self.ty(value);
        if found != expected {
            return self.fail(VerifyErrorKind::TypeMismatch {
                value,
                expected: expected.clone(),
                found: found.clone(),
            });
        }
        Ok(())
    }

    fn check_types(&mut self) -> Result<(), VerifyError> {
        let function = self.function;

        for block in function.blocks.values() {
            self.block = Some(block.id);

            for instruction in &block.instructions {
                self.check_instruction(instruction)?;
            }

            match &block.terminator {
                Some(Terminator::Branch { condition, .. }) => self.expect(*condition, &Type::Bool)?,
                Some(Terminator::Return { value }) => {
                    let found = value.map_or(Type::Void, |v| self.ty(v).clone());
                    if found != function.return_type {
                        return self.fail(VerifyErrorKind::ReturnMismatch {
                            expected: function.return_type.clone(),
                            found,
                        });
                    }
                }
                _ => {}
            }
        }

        self.block = None;
        Ok(())
    }

    fn check_instruction(&self, instruction: &Instruction) -> Result<(), VerifyError> {
        match instruction {
            Instruction::Const { destination, value } => self.expect(*destination, &value.ty()),
            Instruction::Unary {
                operator,
                destination,
                operand,
            } => {
                let expected = match operator {
                    UnaryOperator::Neg | UnaryOperator::Complement => Type::Int,
                    UnaryOperator::FNeg => Type::Float,
                    UnaryOperator::Not => Type::Bool,
                };
                self.expect(*operand, &expected)?;
                self.expect(*destination, &expected)
            }
            Instruction::Binary {
                operator,
                destination,
                lhs,
                rhs,
            } => {
                let expected = match operator {
                    BinaryOperator::FAdd
                    | BinaryOperator::FSub
                    | BinaryOperator::FMul
                    | BinaryOperator::FDiv
                    | BinaryOperator::FRem => Type::Float,
                    BinaryOperator::Concat => Type::String,
                    _ => Type::Int,
                };
                self.expect(*lhs, &expected)?;
                self.expect(*rhs, &expected)?;
                self.expect(*destination, &expected)
            }
            Instruction::Compare {
                predicate,
                destination,
                lhs,
                rhs,
            } => {
                let ty = self.ty(*lhs).clone();
                self.expect(*rhs, &ty)?;
                self.expect(*destination, &Type::Bool)?;

                let equality = matches!(predicate, ComparePredicate::Eq | ComparePredicate::Ne);
                match ty {
                    Type::Int | Type::Float | Type::String => Ok(()),
                    Type::Bool if equality => Ok(()),
                    ty => self.fail(VerifyErrorKind::InvalidOperand {
                        operator: predicate.to_string(),
                        ty,
                    }),
                }
            }
            Instruction::Cast {
                destination,
                operand,
            } => {
                let from = self.ty(*operand).clone();
                let to = self.ty(*destination).clone();
                match (&from, &to) {
                    (Type::Int, Type::Float)
                    | (Type::Float, Type::Int)
                    | (Type::Bool, Type::Int)
                    | (Type::Int, Type::Bool) => Ok(()),
                    _ if from == to && !from.is_reference() => Ok(()),
                    _ => self.fail(VerifyErrorKind::InvalidCast { from, to }),
                }
            }
            Instruction::Phi {
                destination,
                incoming,
            } => {
                let ty = self.ty(*destination);
                for (_, value) in incoming {
                    self.expect(*value, ty)?;
                }
                Ok(())
            }
            Instruction::ArrayNew {
                destination,
                elements,
            } => {
                let element = self.element_type(*destination)?;
                for value in elements {
                    self.expect(*value, &element)?;
                }
                Ok(())
            }
            Instruction::ArrayLoad {
                destination,
                array,
                index,
            } => {
                let element = self.element_type(*array)?;
                self.expect(*index, &Type::Int)?;
                self.expect(*destination, &element)
            }
            Instruction::ArrayStore {
                array,
                index,
                value,
            } => {
                let element = self.element_type(*array)?;
                self.expect(*index, &Type::Int)?;
                self.expect(*value, &element)
            }
            Instruction::ArrayLength { destination, array } => {
                self.element_type(*array)?;
                self.expect(*destination, &Type::Int)
            }
            Instruction::StructNew {
                destination,
                fields,
            } => {
                let field_types = self.struct_fields(*destination)?;
                if field_types.len() != fields.len() {
                    return self.fail(VerifyErrorKind::ArityMismatch {
                        callee: self.ty(*destination).to_string(),
                        expected: field_types.len(),
                        found: fields.len(),
                    });
                }
                for (value, ty) in fields.iter().zip(&field_types) {
                    self.expect(*value, ty)?;
                }
                Ok(())
            }
            Instruction::FieldLoad {
                destination,
                base,
                field,
            } => {
                let ty = self.field_type(*base, *field)?;
                self.expect(*destination, &ty)
            }
            Instruction::FieldStore {
                destination,
                base,
                field,
                value,
            } => {
                let ty = self.field_type(*base, *field)?;
                self.expect(*value, &ty)?;
                self.expect(*destination, &self.ty(*base).clone())
            }
            Instruction::MapNew {
                destination,
                entries,
            } => {
                let value_type = self.map_value_type(*destination)?;
                for (key, value) in entries {
                    self.expect(*key, &Type::String)?;
                    self.expect(*value, &value_type)?;
                }
                Ok(())
            }
            Instruction::MapGet {
                destination,
                map,
                key,
            } => {
                let value_type = self.map_value_type(*map)?;
                self.expect(*key, &Type::String)?;
                self.expect(*destination, &value_type)
            }
            Instruction::MapPut { map, key, value } => {
                let value_type = self.map_value_type(*map)?;
                self.expect(*key, &Type::String)?;
                self.expect(*value, &value_type)
            }
            Instruction::Call {
                destination,
                callee,
                arguments,
            } => match callee {
                Callee::Function(name) => {
                    let Some(target) = self.module.function(name) else {
                        return self.fail(VerifyErrorKind::UnknownFunction(name.clone()));
                    };
                    let signature = target.signature();
                    self.check_call(
                        name,
                        &signature.parameters,
                        &signature.return_type,
                        arguments,
                        *destination,
                    )
                }
                Callee::Runtime(function) => self.check_runtime_call(*function, arguments, *destination),
            },
            Instruction::CallIndirect {
                destination,
                callee,
                arguments,
            } => {
                let Type::Function(signature) = self.ty(*callee) else {
                    return self.fail(VerifyErrorKind::ExpectedKind {
                        ty: self.ty(*callee).clone(),
                        expected: "function value",
                    });
                };
                self.check_call(
                    &callee.to_string(),
                    &signature.parameters,
                    &signature.return_type,
                    arguments,
                    *destination,
                )
            }
            Instruction::MakeClosure {
                destination,
                function,
                ..
            } => {
                let Some(target) = self.module.function(function) else {
                    return self.fail(VerifyErrorKind::UnknownFunction(function.clone()));
                };
                // The target takes the closure itself first
                let Some(closure) = target.parameters.first() else {
                    return self.fail(VerifyErrorKind::ArityMismatch {
                        callee: function.clone(),
                        expected: 1,
                        found: 0,
                    });
                };
                self.expect(*destination, &target.values[*closure])
            }
            Instruction::LoadCapture { closure, .. } => match self.ty(*closure) {
                Type::Function(_) => Ok(()),
                ty => self.fail(VerifyErrorKind::ExpectedKind {
                    ty: ty.clone(),
                    expected: "function value",
                }),
            },
        }
    }

    fn check_call(
        &self,
        callee: &str,
        parameters: &[Type],
        return_type: &Type,
        arguments: &[ValueId],
        destination: Option<ValueId>,
    ) -> Result<(), VerifyError> {
        if parameters.len() != arguments.len() {
            return self.fail(VerifyErrorKind::ArityMismatch {
                callee: callee.into(),
                expected: parameters.len(),
                found: arguments.len(),
            });
        }
        for (argument, ty) in arguments.iter().zip(parameters) {
            self.expect(*argument, ty)?;
        }

        match destination {
            Some(_) if *return_type == Type::Void => self.fail(VerifyErrorKind::VoidResult {
                callee: callee.into(),
            }),
            Some(destination) => self.expect(destination, return_type),
            None => Ok(()),
        }
    }

    fn check_runtime_call(
        &self,
        function: RuntimeFunction,
        arguments: &[ValueId],
        destination: Option<ValueId>,
    ) -> Result<(), VerifyError> {
        let parameters = function.parameters();
        if parameters.len() != arguments.len() {
            return self.fail(VerifyErrorKind::ArityMismatch {
                callee: function.name().into(),
                expected: parameters.len(),
                found: arguments.len(),
            });
        }

        let mut element = None;
        for (argument, abi) in arguments.iter().zip(parameters) {
            let ty = self.ty(*argument);
            let matches = match abi {
                AbiType::Int => *ty == Type::Int,
                AbiType::Float => *ty == Type::Float,
                AbiType::Bool => *ty == Type::Bool,
                AbiType::String => *ty == Type::String,
                AbiType::Array => {
                    element = self.element_type(*argument).ok();
                    element.is_some()
                }
                AbiType::StringArray => *ty == Type::array_of(Type::String),
                AbiType::Map => matches!(ty, Type::Map(_)),
                AbiType::Element => element.as_ref() == Some(ty),
                AbiType::Void | AbiType::Pointer | AbiType::Bits => true,
            };
            if !matches {
                return self.fail(VerifyErrorKind::InvalidOperand {
                    operator: function.name().into(),
                    ty: ty.clone(),
                });
            }
        }

        let Some(destination) = destination else {
            return Ok(());
        };
        let expected = match function.returns() {
            AbiType::Int => Type::Int,
            AbiType::Float => Type::Float,
            AbiType::Bool => Type::Bool,
            AbiType::String => Type::String,
            AbiType::StringArray => Type::array_of(Type::String),
            _ => {
                return self.fail(VerifyErrorKind::VoidResult {
                    callee: function.name().into(),
                });
            }
        };
        self.expect(destination, &expected)
    }

    fn element_type(&self, array: ValueId) -> Result<Type, VerifyError> {
        match self.ty(array) {
            Type::Array(element) => Ok((**element).clone()),
            ty => self.fail(VerifyErrorKind::ExpectedKind {
                ty: ty.clone(),
                expected: "array",
            }),
        }
    }

    fn map_value_type(&self, map: ValueId) -> Result<Type, VerifyError> {
        match self.ty(map) {
            Type::Map(value) => Ok((**value).clone()),
            ty => self.fail(VerifyErrorKind::ExpectedKind {
                ty: ty.clone(),
                expected: "map",
            }),
        }
    }

    fn struct_fields(&self, value: ValueId) -> Result<Vec<Type>, VerifyError> {
        let Type::Struct(name) = self.ty(value) else {
            return self.fail(VerifyErrorKind::ExpectedKind {
                ty: self.ty(value).clone(),
                expected: "struct",
            });
        };
        let Some(definition) = self.module.structs.get(name) else {
            return self.fail(VerifyErrorKind::UnknownStruct(name.clone()));
        };
        Ok(definition.fields.iter().map(|f| f.ty.clone()).collect())
    }

    fn field_type(&self, base: ValueId, field: usize) -> Result<Type, VerifyError> {
        let fields = self.struct_fields(base)?;
        match fields.get(field) {
            Some(ty) => Ok(ty.clone()),
            None => self.fail(VerifyErrorKind::FieldOutOfRange {
                structure: self.ty(base).to_string(),
                field,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::mir::{Constant, Terminator};

    fn module_with(function: Function) -> Module {
        let mut module = Module::new("test");
        module.functions.insert(function.name.clone(), function);
        module
    }

    fn constant(function: &mut Function, block: BlockId, value: i64) -> ValueId {
        let destination = function.new_value(Type::Int);
        function.block_mut(block).instructions.push(Instruction::Const {
            destination,
            value: Constant::Int(value),
        });
        destination
    }

    fn kind(module: &Module) -> VerifyErrorKind {
        verify_module(module).unwrap_err().kind
    }

    /// entry branches to `then`/`else`, both jump to `merge` which returns a
    /// phi of the two constants.
    fn diamond() -> Function {
        let mut function = Function::new("diamond", Type::Int);
        let condition = function.add_parameter(Type::Bool);
        let then_block = function.add_block("then");
        let else_block = function.add_block("else");
        let merge = function.add_block("merge");

        let one = constant(&mut function, then_block, 1);
        let two = constant(&mut function, else_block, 2);
        let result = function.new_value(Type::Int);

        function.block_mut(BlockId::ENTRY).terminator = Some(Terminator::Branch {
            condition,
            positive: then_block,
            negative: else_block,
        });
        function.add_edge(BlockId::ENTRY, then_block);
        function.add_edge(BlockId::ENTRY, else_block);

        for block in [then_block, else_block] {
            function.block_mut(block).terminator = Some(Terminator::Jump { destination: merge });
            function.add_edge(block, merge);
        }

        let merge_block = function.block_mut(merge);
        merge_block.instructions.push(Instruction::Phi {
            destination: result,
            incoming: vec![(then_block, one), (else_block, two)],
        });
        merge_block.terminator = Some(Terminator::Return {
            value: Some(result),
        });

        function
    }

    #[test]
    fn accepts_a_well_formed_diamond_twice() {
        let module = module_with(diamond());
        assert_eq!(verify_module(&module), Ok(()));
        assert_eq!(verify_module(&module), Ok(()));
    }

    #[test]
    fn rejects_phi_arity_mismatch() {
        let mut function = diamond();
        let merge = BlockId(3);
        if let Some(Instruction::Phi { incoming, .. }) =
            function.block_mut(merge).instructions.first_mut()
        {
            incoming.pop();
        }

        assert!(matches!(
            kind(&module_with(function)),
            VerifyErrorKind::PhiArity {
                expected: 2,
                found: 1,
                ..
            }
        ));
    }

    #[test]
    fn rejects_phi_operands_out_of_order() {
        let mut function = diamond();
        if let Some(Instruction::Phi { incoming, .. }) =
            function.block_mut(BlockId(3)).instructions.first_mut()
        {
            incoming.reverse();
        }

        assert!(matches!(
            kind(&module_with(function)),
            VerifyErrorKind::PhiOrder(_)
        ));
    }

    #[test]
    fn rejects_uses_not_dominated_by_definitions() {
        let mut function = diamond();
        // Return the value defined only in `then`
        let one = ValueId(1);
        function.block_mut(BlockId(3)).terminator = Some(Terminator::Return { value: Some(one) });

        assert_eq!(
            kind(&module_with(function)),
            VerifyErrorKind::NotDominated { value: one }
        );
    }

    #[test]
    fn rejects_stale_predecessor_lists() {
        let mut function = diamond();
        function.block_mut(BlockId(3)).predecessors.pop();

        assert!(matches!(
            kind(&module_with(function)),
            VerifyErrorKind::PredecessorMismatch { .. }
        ));
    }

    #[test]
    fn rejects_branches_with_identical_arms() {
        let mut function = Function::new("f", Type::Void);
        let condition = function.add_parameter(Type::Bool);
        let exit = function.add_block("exit");
        function.block_mut(BlockId::ENTRY).terminator = Some(Terminator::Branch {
            condition,
            positive: exit,
            negative: exit,
        });
        function.add_edge(BlockId::ENTRY, exit);
        function.add_edge(BlockId::ENTRY, exit);
        function.block_mut(exit).terminator = Some(Terminator::Return { value: None });

        assert_eq!(
            kind(&module_with(function)),
            VerifyErrorKind::IdenticalBranchArms(exit)
        );
    }

    #[test]
    fn rejects_missing_terminators() {
        let function = Function::new("f", Type::Void);
        assert_eq!(
            kind(&module_with(function)),
            VerifyErrorKind::MissingTerminator
        );
    }

    #[test]
    fn rejects_ill_typed_arithmetic() {
        let mut function = Function::new("f", Type::Int);
        let flag = function.add_parameter(Type::Bool);
        let sum = function.new_value(Type::Int);
        let entry = function.block_mut(BlockId::ENTRY);
        entry.instructions.push(Instruction::Binary {
            operator: BinaryOperator::Add,
            destination: sum,
            lhs: flag,
            rhs: flag,
        });
        entry.terminator = Some(Terminator::Return { value: Some(sum) });

        assert_eq!(
            kind(&module_with(function)),
            VerifyErrorKind::TypeMismatch {
                value: flag,
                expected: Type::Int,
                found: Type::Bool,
            }
        );
    }

    #[test]
    fn rejects_wrong_return_type() {
        let mut function = Function::new("f", Type::Int);
        function.block_mut(BlockId::ENTRY).terminator = Some(Terminator::Return { value: None });

        assert_eq!(
            kind(&module_with(function)),
            VerifyErrorKind::ReturnMismatch {
                expected: Type::Int,
                found: Type::Void,
            }
        );
    }

    #[test]
    fn unreachable_blocks_are_exempt_from_dominance() {
        let mut function = Function::new("f", Type::Int);
        let value = constant(&mut function, BlockId::ENTRY, 3);
        function.block_mut(BlockId::ENTRY).terminator = Some(Terminator::Return { value: Some(value) });

        let dead = function.add_block("dead");
        let late = function.add_block("late");
        let defined_late = constant(&mut function, late, 4);
        function.block_mut(dead).terminator = Some(Terminator::Return {
            value: Some(defined_late),
        });
        function.block_mut(late).terminator = Some(Terminator::Return { value: Some(value) });

        assert_eq!(verify_module(&module_with(function)), Ok(()));
    }
}
