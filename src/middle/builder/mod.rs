//! Lowers the typed tree into MIR. Variables are put into SSA form while the
//! tree is walked, using block sealing and provisional phis (Braun et al.,
//! "Simple and Efficient Construction of Static Single Assignment Form").

use std::collections::BTreeMap;

use hashbrown::{HashMap, HashSet};
use thiserror::Error;

use crate::{
    frontend::ast,
    index::{IndexVec, simple_index},
    middle::mir::{self, BlockId, Function, FunctionType, Terminator, ValueId},
};

mod expression;
mod ssa;
mod statement;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("in function `{function}`: {kind}")]
pub struct BuildError {
    pub function: String,
    pub kind: BuildErrorKind,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildErrorKind {
    #[error("a path reaches the end of the function without returning a value")]
    MissingReturn,
    #[error("`{0}` has a type that was never finalized")]
    UnresolvedType(String),
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("unknown struct `{0}`")]
    UnknownStruct(String),
    #[error("struct `{structure}` has no field `{field}`")]
    UnknownField { structure: String, field: String },
    #[error("struct literal of `{structure}` is missing field `{field}`")]
    MissingField { structure: String, field: String },
    #[error("function `{0}` is defined more than once")]
    DuplicateFunction(String),
    #[error("`{0}` outside of a loop")]
    LoopControlOutsideLoop(&'static str),
    #[error("expression cannot be assigned to")]
    InvalidAssignmentTarget,
    #[error("cannot cast {from} to {to}")]
    UnsupportedCast { from: mir::Type, to: mir::Type },
    #[error("operator {operator} is not defined for {ty}")]
    UnsupportedOperator { operator: String, ty: mir::Type },
    #[error("expression of type void used as a value")]
    VoidValue,
    #[error("cannot index into {0}")]
    NotIndexable(mir::Type),
    #[error("cannot call a value of type {0}")]
    NotCallable(mir::Type),
}

/// Returns a [`BuildError`] for the function being lowered. With the
/// `error-backtrace` feature the lowering site that raised it is logged.
macro_rules! build_error {
    ($self:expr, $kind:expr $(,)?) => {{
        #[cfg(feature = "error-backtrace")]
        tracing::debug!(
            origin = concat!(module_path!(), ":", line!(), ":", column!()),
            "build error raised"
        );

        Err($self.error($kind))
    }};
}

pub(crate) use build_error;

/// Lowers every function of the module, plus the functions lifted out of
/// lambdas and the adapters needed to use named functions as values.
pub fn build_module(module: &ast::Module) -> Result<mir::Module, BuildError> {
    let _span = tracing::debug_span!("build_module", module = %module.name).entered();

    let mut context = ModuleContext::new(module)?;

    for function in &module.functions {
        let parameters = function
            .parameters
            .iter()
            .map(|p| (p.name.clone(), p.ty.clone()))
            .collect::<Vec<_>>();

        context.lower_function(
            &function.name,
            &parameters,
            &function.return_type,
            None,
            &function.body,
        )?;
    }

    while let Some(lambda) = context.pending_lambdas.pop() {
        context.lower_function(
            &lambda.name,
            &lambda.parameters,
            &lambda.return_type,
            Some(lambda.captures.as_slice()),
            &lambda.body,
        )?;
    }

    Ok(mir::Module {
        name: module.name.clone(),
        structs: context.structs,
        functions: context.output,
    })
}

/// A lambda body waiting to be lowered as its own function
struct PendingLambda {
    name: String,
    parameters: Vec<(String, ast::Type)>,
    return_type: ast::Type,
    captures: Vec<(String, ast::Type)>,
    body: ast::Block,
}

struct ModuleContext {
    structs: BTreeMap<String, mir::StructDefinition>,
    signatures: HashMap<String, FunctionType>,
    output: BTreeMap<String, Function>,
    pending_lambdas: Vec<PendingLambda>,
    adapters: HashSet<String>,
    next_lambda: usize,
}

impl ModuleContext {
    fn new(module: &ast::Module) -> Result<Self, BuildError> {
        let module_error = |kind| BuildError {
            function: String::from("<module>"),
            kind,
        };

        let mut structs = BTreeMap::new();
        for definition in &module.structs {
            let fields = definition
                .fields
                .iter()
                .map(|field| {
                    Ok(mir::StructField {
                        name: field.name.clone(),
                        ty: lower_type(&field.ty, &field.name)?,
                    })
                })
                .collect::<Result<Vec<_>, BuildErrorKind>>()
                .map_err(module_error)?;

            structs.insert(
                definition.name.clone(),
                mir::StructDefinition {
                    name: definition.name.clone(),
                    fields,
                },
            );
        }

        let mut signatures = HashMap::new();
        for function in &module.functions {
            let error = |kind| BuildError {
                function: function.name.clone(),
                kind,
            };

            let parameters = function
                .parameters
                .iter()
                .map(|p| lower_type(&p.ty, &p.name))
                .collect::<Result<Vec<_>, _>>()
                .map_err(error)?;
            let return_type = lower_type(&function.return_type, &function.name).map_err(error)?;

            let previous = signatures.insert(
                function.name.clone(),
                FunctionType {
                    parameters,
                    return_type,
                },
            );
            if previous.is_some() {
                return Err(error(BuildErrorKind::DuplicateFunction(function.name.clone())));
            }
        }

        Ok(Self {
            structs,
            signatures,
            output: BTreeMap::new(),
            pending_lambdas: Vec::new(),
            adapters: HashSet::new(),
            next_lambda: 0,
        })
    }

    fn lower_function(
        &mut self,
        name: &str,
        parameters: &[(String, ast::Type)],
        return_type: &ast::Type,
        captures: Option<&[(String, ast::Type)]>,
        body: &ast::Block,
    ) -> Result<(), BuildError> {
        tracing::debug!(function = name, "lowering function");

        let return_type = lower_type(return_type, name).map_err(|kind| BuildError {
            function: name.into(),
            kind,
        })?;

        let mut context = BodyLoweringContext::new(self, name, return_type);
        context.lower_body(parameters, captures, body)?;
        let function = context.into_output()?;

        self.output.insert(name.into(), function);
        Ok(())
    }

    fn lambda_name(&mut self, enclosing: &str) -> String {
        let name = format!("{enclosing}$lambda{}", self.next_lambda);
        self.next_lambda += 1;
        name
    }

    /// Name of the function value wrapper of `function`, generating it on first
    /// use. The wrapper takes the closure as its first parameter like every
    /// function reached through an indirect call.
    fn adapter_for(&mut self, function: &str) -> Option<String> {
        let name = format!("{function}$ref");
        if self.adapters.contains(&name) {
            return Some(name);
        }

        let signature = self.signatures.get(function)?.clone();
        let closure_type = mir::Type::Function(std::rc::Rc::new(signature.clone()));

        let mut adapter = Function::new(name.clone(), signature.return_type.clone());
        adapter.add_parameter(closure_type);
        let arguments = signature
            .parameters
            .iter()
            .map(|ty| adapter.add_parameter(ty.clone()))
            .collect::<Vec<_>>();

        let destination =
            (signature.return_type != mir::Type::Void).then(|| adapter.new_value(signature.return_type.clone()));

        let entry = adapter.block_mut(BlockId::ENTRY);
        entry.instructions.push(mir::Instruction::Call {
            destination,
            callee: mir::Callee::Function(function.into()),
            arguments,
        });
        entry.terminator = Some(Terminator::Return { value: destination });

        self.adapters.insert(name.clone());
        self.output.insert(name.clone(), adapter);
        Some(name)
    }
}

pub(super) fn lower_type(ty: &ast::Type, name: &str) -> Result<mir::Type, BuildErrorKind> {
    Ok(match ty {
        ast::Type::Void => mir::Type::Void,
        ast::Type::Int => mir::Type::Int,
        ast::Type::Float => mir::Type::Float,
        ast::Type::Bool => mir::Type::Bool,
        ast::Type::String => mir::Type::String,
        ast::Type::Array(element) => mir::Type::array_of(lower_type(element, name)?),
        ast::Type::Map(value) => mir::Type::map_of(lower_type(value, name)?),
        ast::Type::Struct(name) => mir::Type::Struct(name.clone()),
        ast::Type::Function {
            parameters,
            return_type,
        } => mir::Type::function(
            parameters
                .iter()
                .map(|p| lower_type(p, name))
                .collect::<Result<_, _>>()?,
            lower_type(return_type, name)?,
        ),
        ast::Type::Unresolved(_) => return Err(BuildErrorKind::UnresolvedType(name.into())),
    })
}

simple_index! {
    /// A source variable after scope resolution. Shadowed names get distinct
    /// ids.
    struct VariableId;
}

struct Variable {
    name: String,
    ty: mir::Type,
}

#[derive(Debug, Clone, Copy)]
struct LoopTargets {
    break_target: BlockId,
    continue_target: BlockId,
}

struct BodyLoweringContext<'m> {
    module: &'m mut ModuleContext,
    function: Function,
    /// `None` after a terminator until a new block is entered. Statements in
    /// that state are unreachable and are not lowered.
    current: Option<BlockId>,

    variables: IndexVec<VariableId, Variable>,
    scopes: Vec<HashMap<String, VariableId>>,
    loops: Vec<LoopTargets>,

    /* SSA construction state */
    definitions: HashMap<(VariableId, BlockId), ValueId>,
    sealed: HashSet<BlockId>,
    incomplete_phis: HashMap<BlockId, Vec<(VariableId, ValueId)>>,
    phi_blocks: HashMap<ValueId, BlockId>,
    /// Trivial phis that were removed, resolved when the function is finished
    aliases: HashMap<ValueId, ValueId>,
}

impl<'m> BodyLoweringContext<'m> {
    fn new(module: &'m mut ModuleContext, name: &str, return_type: mir::Type) -> Self {
        let mut context = Self {
            module,
            function: Function::new(name, return_type),
            current: Some(BlockId::ENTRY),
            variables: IndexVec::new(),
            scopes: vec![HashMap::new()],
            loops: Vec::new(),
            definitions: HashMap::new(),
            sealed: HashSet::new(),
            incomplete_phis: HashMap::new(),
            phi_blocks: HashMap::new(),
            aliases: HashMap::new(),
        };
        context.sealed.insert(BlockId::ENTRY);
        context
    }

    fn error(&self, kind: BuildErrorKind) -> BuildError {
        BuildError {
            function: self.function.name.clone(),
            kind,
        }
    }

    fn lower_type(&self, ty: &ast::Type, name: &str) -> Result<mir::Type, BuildError> {
        lower_type(ty, name).map_err(|kind| self.error(kind))
    }

    /// `captures` is present for lifted lambdas, which receive their own
    /// closure as the first parameter and unpack the captured values from it.
    fn lower_body(
        &mut self,
        parameters: &[(String, ast::Type)],
        captures: Option<&[(String, ast::Type)]>,
        body: &ast::Block,
    ) -> Result<(), BuildError> {
        let closure = if captures.is_none() {
            None
        } else {
            let signature = FunctionType {
                parameters: parameters
                    .iter()
                    .map(|(name, ty)| self.lower_type(ty, name))
                    .collect::<Result<_, _>>()?,
                return_type: self.function.return_type.clone(),
            };
            Some(
                self.function
                    .add_parameter(mir::Type::Function(std::rc::Rc::new(signature))),
            )
        };

        for (name, ty) in parameters {
            let ty = self.lower_type(ty, name)?;
            let value = self.function.add_parameter(ty.clone());
            let variable = self.declare_variable(name, ty);
            self.write_variable(variable, BlockId::ENTRY, value);
        }

        if let (Some(closure), Some(captures)) = (closure, captures) {
            for (index, (name, ty)) in captures.iter().enumerate() {
                let ty = self.lower_type(ty, name)?;
                let value = self.define(ty.clone(), |destination| mir::Instruction::LoadCapture {
                    destination,
                    closure,
                    index,
                });
                let variable = self.declare_variable(name, ty);
                self.write_variable(variable, BlockId::ENTRY, value);
            }
        }

        self.lower_statements(&body.statements)?;

        if let Some(current) = self.current {
            if self.function.return_type != mir::Type::Void {
                return build_error!(self, BuildErrorKind::MissingReturn);
            }
            self.terminate(current, Terminator::Return { value: None });
        }

        Ok(())
    }

    fn into_output(mut self) -> Result<Function, BuildError> {
        self.finalize_phis();
        Ok(self.function)
    }

    /* Scopes */

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare_variable(&mut self, name: &str, ty: mir::Type) -> VariableId {
        let id = self.variables.push(Variable {
            name: name.into(),
            ty,
        });
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.into(), id);
        }
        id
    }

    /// A variable that no source name refers to, like a loop counter
    fn declare_hidden_variable(&mut self, ty: mir::Type) -> VariableId {
        self.variables.push(Variable {
            name: String::from("<hidden>"),
            ty,
        })
    }

    fn lookup_variable(&self, name: &str) -> Result<VariableId, BuildError> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
            .map_or_else(
                || build_error!(self, BuildErrorKind::UnknownVariable(name.into())),
                Ok,
            )
    }

    /* Blocks and instructions */

    fn current_block(&self) -> BlockId {
        // Statements are skipped while unreachable, so expressions always have
        // a block to go into
        self.current.unwrap_or(BlockId::ENTRY)
    }

    fn push_instruction(&mut self, instruction: mir::Instruction) {
        let block = self.current_block();
        self.function.block_mut(block).instructions.push(instruction);
    }

    /// Allocates a value of type `ty` and pushes the instruction defining it
    fn define(&mut self, ty: mir::Type, make: impl FnOnce(ValueId) -> mir::Instruction) -> ValueId {
        let value = self.function.new_value(ty);
        self.push_instruction(make(value));
        value
    }

    /// Ends `block` with `terminator` and records its outgoing edges
    fn terminate(&mut self, block: BlockId, terminator: Terminator) {
        for successor in terminator.successors() {
            self.function.add_edge(block, successor);
        }
        self.function.block_mut(block).terminator = Some(terminator);
    }

    fn jump_from_current(&mut self, destination: BlockId) {
        if let Some(current) = self.current.take() {
            self.terminate(current, Terminator::Jump { destination });
        }
    }

    /// Continues lowering in `block` if anything reaches it. A block nothing
    /// jumps to is deleted and the code after it is unreachable.
    fn enter_if_reachable(&mut self, block: BlockId) {
        if self.function.block(block).predecessors.is_empty() {
            self.remove_block(block);
            self.current = None;
        } else {
            self.current = Some(block);
        }
    }

    fn remove_block(&mut self, block: BlockId) {
        self.function.blocks.remove(&block);
        self.sealed.remove(&block);
        self.incomplete_phis.remove(&block);
        self.definitions.retain(|(_, b), _| *b != block);
    }
}
