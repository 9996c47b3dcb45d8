//! Lowers MIR to a relocatable object for the host with Cranelift. Blocks
//! are emitted in reverse postorder so every definition is lowered before
//! its uses, phis become block parameters, and runtime routines are
//! imported symbols resolved when the object is linked against the C
//! runtime.

use std::path::PathBuf;

use cranelift_codegen::{
    ir::{
        self, AbiParam, InstBuilder, MemFlags, Signature, TrapCode,
        condcodes::{FloatCC, IntCC},
        types,
    },
    isa::OwnedTargetIsa,
    settings::{self, Configurable},
};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_module::{DataDescription, DataId, FuncId, Linkage, Module as _};
use cranelift_object::{ObjectBuilder, ObjectModule};
use hashbrown::HashMap;
use tracing::debug;

use super::{
    BackendError, CodeGenerator, EntryResult, OptLevel, TargetConfig, Workspace, entry_function,
    mangle,
};
use crate::{
    middle::mir::{
        BinaryOperator, BlockId, Callee, ComparePredicate, Constant, Function, FunctionType,
        Instruction, Module, Terminator, Type, UnaryOperator, ValueId, cfg,
    },
    runtime::{AbiType, MissingKey, RuntimeFunction, SUPPORT_FUNCTIONS, support},
};

/// Every reference type is a 64-bit pointer
const POINTER: ir::Type = types::I64;

pub struct CraneliftGenerator;

impl CodeGenerator for CraneliftGenerator {
    fn name(&self) -> &'static str {
        "cranelift"
    }

    fn emit_object(
        &self,
        module: &Module,
        config: &TargetConfig,
        workspace: &Workspace,
    ) -> Result<PathBuf, BackendError> {
        let object = compile_object(module, config)?;
        workspace.write("program.o", object)
    }

    fn emit_source(&self, _module: &Module, config: &TargetConfig) -> Result<String, BackendError> {
        Err(BackendError::unsupported(
            &config.entry,
            "source emission with the cranelift code generator",
        ))
    }
}

pub fn compile_object(module: &Module, config: &TargetConfig) -> Result<Vec<u8>, BackendError> {
    let (entry, result) = entry_function(module, &config.entry)?;

    let isa = build_isa(config.opt_level)?;
    if isa.pointer_bits() != 64 {
        return Err(BackendError::unsupported(
            &config.entry,
            format_args!("a {}-bit host", isa.pointer_bits()),
        ));
    }

    let builder = ObjectBuilder::new(
        isa,
        module.name.as_str(),
        cranelift_module::default_libcall_names(),
    )
    .map_err(BackendError::codegen)?;

    let mut compiler = ObjectCompiler::new(module, ObjectModule::new(builder));
    compiler.declare_functions()?;
    for function in module.functions.values() {
        compiler.define_function(function)?;
    }
    compiler.define_main(entry, result)?;
    compiler.finish()
}

fn build_isa(opt_level: OptLevel) -> Result<OwnedTargetIsa, BackendError> {
    let mut flags = settings::builder();
    let level = match opt_level {
        OptLevel::None => "none",
        OptLevel::Speed => "speed",
        OptLevel::Size => "speed_and_size",
    };
    flags
        .set("opt_level", level)
        .map_err(BackendError::codegen)?;
    flags.set("is_pic", "true").map_err(BackendError::codegen)?;

    let isa = cranelift_native::builder()
        .map_err(|message| BackendError::Codegen(format!("host ISA not supported: {message}")))?;
    isa.finish(settings::Flags::new(flags))
        .map_err(BackendError::codegen)
}

fn clif_type(ty: &Type) -> ir::Type {
    match ty {
        Type::Float => types::F64,
        Type::Bool => types::I8,
        Type::Int => types::I64,
        _ => POINTER,
    }
}

fn abi_type(ty: AbiType) -> Option<ir::Type> {
    match ty {
        AbiType::Void => None,
        AbiType::Float => Some(types::F64),
        AbiType::Bool => Some(types::I8),
        AbiType::Int
        | AbiType::String
        | AbiType::Array
        | AbiType::StringArray
        | AbiType::Map
        | AbiType::Element
        | AbiType::Pointer
        | AbiType::Bits => Some(types::I64),
    }
}

/// C expects `bool` arguments widened by the caller
fn abi_param(ty: ir::Type) -> AbiParam {
    if ty == types::I8 {
        AbiParam::new(ty).uext()
    } else {
        AbiParam::new(ty)
    }
}

fn slot_offset(index: usize) -> i32 {
    (index * 8) as i32
}

struct ObjectCompiler<'m> {
    mir: &'m Module,
    object: ObjectModule,
    functions: HashMap<&'m str, FuncId>,
    imports: HashMap<&'static str, FuncId>,
    strings: HashMap<String, DataId>,
}

impl<'m> ObjectCompiler<'m> {
    fn new(mir: &'m Module, object: ObjectModule) -> Self {
        Self {
            mir,
            object,
            functions: HashMap::new(),
            imports: HashMap::new(),
            strings: HashMap::new(),
        }
    }

    fn finish(self) -> Result<Vec<u8>, BackendError> {
        self.object.finish().emit().map_err(BackendError::codegen)
    }

    fn signature(&self, function: &FunctionType) -> Signature {
        let mut signature = self.object.make_signature();
        signature.params.extend(
            function
                .parameters
                .iter()
                .map(|ty| abi_param(clif_type(ty))),
        );
        if function.return_type != Type::Void {
            signature
                .returns
                .push(abi_param(clif_type(&function.return_type)));
        }
        signature
    }

    fn declare_functions(&mut self) -> Result<(), BackendError> {
        let mir = self.mir;
        for function in mir.functions.values() {
            let signature = self.signature(&function.signature());
            let id = self
                .object
                .declare_function(&mangle(&function.name), Linkage::Local, &signature)
                .map_err(BackendError::codegen)?;
            self.functions.insert(function.name.as_str(), id);
        }
        Ok(())
    }

    fn function_id(&self, name: &str) -> Result<FuncId, BackendError> {
        self.functions
            .get(name)
            .copied()
            .ok_or_else(|| BackendError::Codegen(format!("unknown function `{name}`")))
    }

    fn import(
        &mut self,
        symbol: &'static str,
        parameters: &[AbiType],
        returns: AbiType,
    ) -> Result<FuncId, BackendError> {
        if let Some(id) = self.imports.get(symbol) {
            return Ok(*id);
        }

        let mut signature = self.object.make_signature();
        signature
            .params
            .extend(parameters.iter().filter_map(|ty| abi_type(*ty)).map(abi_param));
        signature.returns.extend(abi_type(returns).map(abi_param));

        let id = self
            .object
            .declare_function(symbol, Linkage::Import, &signature)
            .map_err(BackendError::codegen)?;
        self.imports.insert(symbol, id);
        Ok(id)
    }

    fn import_runtime(&mut self, function: RuntimeFunction) -> Result<FuncId, BackendError> {
        let mut parameters = function.parameters().to_vec();
        if function.can_fault() {
            parameters.extend([AbiType::String, AbiType::Int]);
        }
        self.import(function.symbol(), &parameters, function.returns())
    }

    fn import_support(&mut self, symbol: &'static str) -> Result<FuncId, BackendError> {
        let signature = SUPPORT_FUNCTIONS
            .get(symbol)
            .ok_or_else(|| BackendError::Codegen(format!("unknown runtime routine `{symbol}`")))?;
        self.import(symbol, signature.parameters, signature.returns)
    }

    /// A read-only NUL-terminated copy of `text`
    fn string_data(&mut self, text: &str) -> Result<DataId, BackendError> {
        if let Some(id) = self.strings.get(text) {
            return Ok(*id);
        }

        let id = self
            .object
            .declare_anonymous_data(false, false)
            .map_err(BackendError::codegen)?;
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        let mut description = DataDescription::new();
        description.define(bytes.into_boxed_slice());
        self.object
            .define_data(id, &description)
            .map_err(BackendError::codegen)?;

        self.strings.insert(text.to_string(), id);
        Ok(id)
    }

    fn define_function(&mut self, function: &'m Function) -> Result<(), BackendError> {
        debug!(function = %function.name, "lowering with cranelift");

        let id = self.function_id(&function.name)?;
        let mut context = self.object.make_context();
        context.func.signature = self.signature(&function.signature());
        let mut builder_context = FunctionBuilderContext::new();

        {
            let builder = FunctionBuilder::new(&mut context.func, &mut builder_context);
            let mut lowering = FunctionLowering {
                compiler: self,
                function,
                builder,
                blocks: HashMap::new(),
                values: HashMap::new(),
            };
            lowering.lower()?;
            lowering.builder.seal_all_blocks();
            lowering.builder.finalize();
        }

        self.object
            .define_function(id, &mut context)
            .map_err(|error| BackendError::Codegen(format!("`{}`: {error:?}", function.name)))?;
        self.object.clear_context(&mut context);
        Ok(())
    }

    /// Exported `main` calling the entry function and turning its result
    /// into an exit status
    fn define_main(&mut self, entry: &Function, result: EntryResult) -> Result<(), BackendError> {
        let mut signature = self.object.make_signature();
        signature.params.push(AbiParam::new(types::I32));
        signature.params.push(AbiParam::new(types::I64));
        signature.returns.push(AbiParam::new(types::I32));
        let id = self
            .object
            .declare_function("main", Linkage::Export, &signature)
            .map_err(BackendError::codegen)?;
        let entry = self.function_id(&entry.name)?;
        let init = self.import_support(support::INIT)?;
        let print = match result {
            EntryResult::String => Some(self.import_support(support::PRINT_RESULT)?),
            _ => None,
        };

        let mut context = self.object.make_context();
        context.func.signature = signature;
        let mut builder_context = FunctionBuilderContext::new();

        {
            let mut builder = FunctionBuilder::new(&mut context.func, &mut builder_context);
            let block = builder.create_block();
            builder.append_block_params_for_function_params(block);
            builder.switch_to_block(block);

            let (argc, argv) = (builder.block_params(block)[0], builder.block_params(block)[1]);
            let argc = builder.ins().sextend(types::I64, argc);
            let init = self.object.declare_func_in_func(init, builder.func);
            builder.ins().call(init, &[argc, argv]);

            let callee = self.object.declare_func_in_func(entry, builder.func);
            let call = builder.ins().call(callee, &[]);
            let value = builder.inst_results(call).first().copied();

            let status = match (result, value, print) {
                (EntryResult::Int, Some(value), _) => {
                    let low = builder.ins().band_imm(value, 0xff);
                    builder.ins().ireduce(types::I32, low)
                }
                (EntryResult::Bool, Some(value), _) => builder.ins().uextend(types::I32, value),
                (EntryResult::String, Some(value), Some(print)) => {
                    let print = self.object.declare_func_in_func(print, builder.func);
                    builder.ins().call(print, &[value]);
                    builder.ins().iconst(types::I32, 0)
                }
                _ => builder.ins().iconst(types::I32, 0),
            };
            builder.ins().return_(&[status]);

            builder.seal_all_blocks();
            builder.finalize();
        }

        self.object
            .define_function(id, &mut context)
            .map_err(|error| BackendError::Codegen(format!("`main`: {error:?}")))?;
        self.object.clear_context(&mut context);
        Ok(())
    }
}

struct FunctionLowering<'a, 'm> {
    compiler: &'a mut ObjectCompiler<'m>,
    function: &'m Function,
    builder: FunctionBuilder<'a>,
    blocks: HashMap<BlockId, ir::Block>,
    values: HashMap<ValueId, ir::Value>,
}

impl<'m> FunctionLowering<'_, 'm> {
    fn lower(&mut self) -> Result<(), BackendError> {
        let function = self.function;
        let order = cfg::reverse_postorder(function);

        for id in &order {
            let block = self.builder.create_block();
            self.blocks.insert(*id, block);
        }

        let entry = self.block(function.entry)?;
        self.builder.append_block_params_for_function_params(entry);
        let parameters = self.builder.block_params(entry).to_vec();
        self.values
            .extend(function.parameters.iter().copied().zip(parameters));

        for id in &order {
            let block = self.block(*id)?;
            for (phi, _) in function.block(*id).phis() {
                let parameter = self
                    .builder
                    .append_block_param(block, clif_type(function.value_type(phi)));
                self.values.insert(phi, parameter);
            }
        }

        for id in order {
            let block = function.block(id);
            let clif_block = self.block(id)?;
            self.builder.switch_to_block(clif_block);

            for instruction in block.instructions.iter().filter(|i| !i.is_phi()) {
                self.lower_instruction(id, instruction)?;
            }

            let terminator = block.terminator.as_ref().ok_or_else(|| {
                BackendError::Codegen(format!("{id} in `{}` has no terminator", function.name))
            })?;
            self.lower_terminator(id, terminator)?;
        }

        Ok(())
    }

    fn block(&self, id: BlockId) -> Result<ir::Block, BackendError> {
        self.blocks.get(&id).copied().ok_or_else(|| {
            BackendError::Codegen(format!("{id} of `{}` is not reachable", self.function.name))
        })
    }

    fn value(&self, id: ValueId) -> Result<ir::Value, BackendError> {
        self.values.get(&id).copied().ok_or_else(|| {
            BackendError::Codegen(format!(
                "{id} used before its definition in `{}`",
                self.function.name
            ))
        })
    }

    fn values(&self, ids: &[ValueId]) -> Result<Vec<ir::Value>, BackendError> {
        ids.iter().map(|id| self.value(*id)).collect()
    }

    fn define(&mut self, id: ValueId, value: ir::Value) {
        self.values.insert(id, value);
    }

    fn ty(&self, id: ValueId) -> &'m Type {
        self.function.value_type(id)
    }

    fn unsupported(&self, construct: impl std::fmt::Display) -> BackendError {
        BackendError::unsupported(&self.function.name, construct)
    }

    fn string(&mut self, text: &str) -> Result<ir::Value, BackendError> {
        let data = self.compiler.string_data(text)?;
        let global = self
            .compiler
            .object
            .declare_data_in_func(data, self.builder.func);
        Ok(self.builder.ins().symbol_value(POINTER, global))
    }

    fn int(&mut self, value: i64) -> ir::Value {
        self.builder.ins().iconst(types::I64, value)
    }

    /// Function name and block id passed to routines that can fault
    fn location(&mut self, block: BlockId) -> Result<[ir::Value; 2], BackendError> {
        let function = self.function;
        let name = self.string(&function.name)?;
        let block = self.int(i64::from(block.0));
        Ok([name, block])
    }

    fn call(&mut self, id: FuncId, arguments: &[ir::Value]) -> Option<ir::Value> {
        let callee = self
            .compiler
            .object
            .declare_func_in_func(id, self.builder.func);
        let call = self.builder.ins().call(callee, arguments);
        self.builder.inst_results(call).first().copied()
    }

    fn support(
        &mut self,
        symbol: &'static str,
        arguments: &[ir::Value],
    ) -> Result<Option<ir::Value>, BackendError> {
        let id = self.compiler.import_support(symbol)?;
        Ok(self.call(id, arguments))
    }

    fn support_value(
        &mut self,
        symbol: &'static str,
        arguments: &[ir::Value],
    ) -> Result<ir::Value, BackendError> {
        self.support(symbol, arguments)?
            .ok_or_else(|| BackendError::Codegen(format!("`{symbol}` returns nothing")))
    }

    /// Reinterprets a value as the 8-byte slot stored in aggregates
    fn to_bits(&mut self, ty: &Type, value: ir::Value) -> ir::Value {
        match ty {
            Type::Float => self.builder.ins().bitcast(types::I64, MemFlags::new(), value),
            Type::Bool => self.builder.ins().uextend(types::I64, value),
            _ => value,
        }
    }

    fn from_bits(&mut self, ty: &Type, bits: ir::Value) -> ir::Value {
        match ty {
            Type::Float => self.builder.ins().bitcast(types::F64, MemFlags::new(), bits),
            Type::Bool => self.builder.ins().ireduce(types::I8, bits),
            _ => bits,
        }
    }

    fn store_slots(
        &mut self,
        base: ir::Value,
        offset: usize,
        values: &[ValueId],
    ) -> Result<(), BackendError> {
        for (i, id) in values.iter().enumerate() {
            let value = self.value(*id)?;
            let bits = self.to_bits(self.ty(*id), value);
            self.builder
                .ins()
                .store(MemFlags::trusted(), bits, base, slot_offset(i + offset));
        }
        Ok(())
    }

    fn load_slot(&mut self, ty: &Type, base: ir::Value, index: usize) -> ir::Value {
        let bits = self
            .builder
            .ins()
            .load(types::I64, MemFlags::trusted(), base, slot_offset(index));
        self.from_bits(ty, bits)
    }

    fn lower_instruction(
        &mut self,
        block: BlockId,
        instruction: &Instruction,
    ) -> Result<(), BackendError> {
        let function = self.function;

        match instruction {
            Instruction::Const { destination, value } => {
                let result = match value {
                    Constant::Int(v) => self.int(*v),
                    Constant::Float(v) => self.builder.ins().f64const(*v),
                    Constant::Bool(v) => self.builder.ins().iconst(types::I8, i64::from(*v)),
                    Constant::String(s) => self.string(s)?,
                };
                self.define(*destination, result);
            }
            Instruction::Unary {
                operator,
                destination,
                operand,
            } => {
                let operand = self.value(*operand)?;
                let result = match operator {
                    UnaryOperator::Neg => self.builder.ins().ineg(operand),
                    UnaryOperator::FNeg => self.builder.ins().fneg(operand),
                    UnaryOperator::Not => self.builder.ins().bxor_imm(operand, 1),
                    UnaryOperator::Complement => self.builder.ins().bnot(operand),
                };
                self.define(*destination, result);
            }
            Instruction::Binary {
                operator,
                destination,
                lhs,
                rhs,
            } => {
                let result = self.lower_binary(block, *operator, *lhs, *rhs)?;
                self.define(*destination, result);
            }
            Instruction::Compare {
                predicate,
                destination,
                lhs,
                rhs,
            } => {
                let (l, r) = (self.value(*lhs)?, self.value(*rhs)?);
                let result = match function.value_type(*lhs) {
                    Type::Float => self.builder.ins().fcmp(float_condition(*predicate), l, r),
                    Type::String => {
                        let ordering = self.support_value(support::STR_COMPARE, &[l, r])?;
                        self.builder
                            .ins()
                            .icmp_imm(int_condition(*predicate, true), ordering, 0)
                    }
                    Type::Bool => self.builder.ins().icmp(int_condition(*predicate, false), l, r),
                    _ => self.builder.ins().icmp(int_condition(*predicate, true), l, r),
                };
                self.define(*destination, result);
            }
            Instruction::Cast {
                destination,
                operand,
            } => {
                let value = self.value(*operand)?;
                let result = match (function.value_type(*operand), function.value_type(*destination)) {
                    (Type::Int, Type::Float) => self.builder.ins().fcvt_from_sint(types::F64, value),
                    (Type::Float, Type::Int) => {
                        self.builder.ins().fcvt_to_sint_sat(types::I64, value)
                    }
                    (Type::Bool, Type::Int) => self.builder.ins().uextend(types::I64, value),
                    (Type::Int, Type::Bool) => {
                        self.builder.ins().icmp_imm(IntCC::NotEqual, value, 0)
                    }
                    (from, to) if from == to => value,
                    (from, to) => {
                        return Err(self.unsupported(format_args!("a cast from `{from}` to `{to}`")));
                    }
                };
                self.define(*destination, result);
            }
            Instruction::Phi { .. } => {}
            Instruction::ArrayNew {
                destination,
                elements,
            } => {
                let length = self.int(elements.len() as i64);
                let array = self.support_value(support::ARRAY_NEW, &[length])?;
                if !elements.is_empty() {
                    let items = self
                        .builder
                        .ins()
                        .load(POINTER, MemFlags::trusted(), array, 16);
                    self.store_slots(items, 0, elements)?;
                }
                self.define(*destination, array);
            }
            Instruction::ArrayLoad {
                destination,
                array,
                index,
            } => {
                let (array, index) = (self.value(*array)?, self.value(*index)?);
                let [name, position] = self.location(block)?;
                let bits = self.support_value(support::ARRAY_GET, &[array, index, name, position])?;
                let result = self.from_bits(function.value_type(*destination), bits);
                self.define(*destination, result);
            }
            Instruction::ArrayStore {
                array,
                index,
                value,
            } => {
                let (array, index) = (self.value(*array)?, self.value(*index)?);
                let contents = self.value(*value)?;
                let bits = self.to_bits(function.value_type(*value), contents);
                let [name, position] = self.location(block)?;
                self.support(support::ARRAY_SET, &[array, index, bits, name, position])?;
            }
            Instruction::ArrayLength { destination, array } => {
                let array = self.value(*array)?;
                let result = self.support_value(support::ARRAY_LEN, &[array])?;
                self.define(*destination, result);
            }
            Instruction::StructNew {
                destination,
                fields,
            } => {
                let count = self.int(fields.len() as i64);
                let record = self.support_value(support::STRUCT_NEW, &[count])?;
                self.store_slots(record, 0, fields)?;
                self.define(*destination, record);
            }
            Instruction::FieldLoad {
                destination,
                base,
                field,
            } => {
                let base = self.value(*base)?;
                let result = self.load_slot(function.value_type(*destination), base, *field);
                self.define(*destination, result);
            }
            Instruction::FieldStore {
                destination,
                base,
                field,
                value,
            } => {
                let size = match self.ty(*base) {
                    Type::Struct(name) => self
                        .compiler
                        .mir
                        .structs
                        .get(name)
                        .map(|definition| definition.fields.len())
                        .ok_or_else(|| self.unsupported(format_args!("unknown struct `{name}`")))?,
                    ty => return Err(self.unsupported(format_args!("field access on `{ty}`"))),
                };
                let base = self.value(*base)?;
                let size = self.int(size as i64);
                let copy = self.support_value(support::STRUCT_COPY, &[base, size])?;
                self.store_slots(copy, *field, std::slice::from_ref(value))?;
                self.define(*destination, copy);
            }
            Instruction::MapNew {
                destination,
                entries,
            } => {
                let map = self.support_value(support::MAP_NEW, &[])?;
                for (key, value) in entries {
                    self.map_put(map, *key, *value)?;
                }
                self.define(*destination, map);
            }
            Instruction::MapGet {
                destination,
                map,
                key,
            } => {
                let ty = function.value_type(*destination);
                let (map, key) = (self.value(*map)?, self.value(*key)?);
                let missing = self.int(MissingKey::for_value_type(ty) as i64);
                let [name, position] = self.location(block)?;
                let bits =
                    self.support_value(support::MAP_GET, &[map, key, missing, name, position])?;
                let result = self.from_bits(ty, bits);
                self.define(*destination, result);
            }
            Instruction::MapPut { map, key, value } => {
                let map = self.value(*map)?;
                self.map_put(map, *key, *value)?;
            }
            Instruction::Call {
                destination,
                callee,
                arguments,
            } => {
                let result = match callee {
                    Callee::Function(name) => {
                        let id = self.compiler.function_id(name)?;
                        let arguments = self.values(arguments)?;
                        self.call(id, &arguments)
                    }
                    Callee::Runtime(routine) => {
                        let id = self.compiler.import_runtime(*routine)?;
                        let mut lowered = Vec::with_capacity(arguments.len() + 2);
                        for (abi, argument) in routine.parameters().iter().zip(arguments) {
                            let value = self.value(*argument)?;
                            lowered.push(match abi {
                                AbiType::Element => {
                                    self.to_bits(function.value_type(*argument), value)
                                }
                                _ => value,
                            });
                        }
                        if routine.can_fault() {
                            lowered.extend(self.location(block)?);
                        }
                        self.call(id, &lowered)
                    }
                };
                self.bind_result(*destination, result)?;
            }
            Instruction::CallIndirect {
                destination,
                callee,
                arguments,
            } => {
                let Type::Function(signature) = function.value_type(*callee) else {
                    return Err(self.unsupported(format_args!(
                        "a call through `{}`",
                        function.value_type(*callee)
                    )));
                };

                let mut clif_signature = self.compiler.signature(signature);
                clif_signature.params.insert(0, AbiParam::new(POINTER));
                let signature = self.builder.import_signature(clif_signature);

                let closure = self.value(*callee)?;
                let target = self
                    .builder
                    .ins()
                    .load(POINTER, MemFlags::trusted(), closure, 0);
                let mut lowered = vec![closure];
                lowered.extend(self.values(arguments)?);

                let call = self.builder.ins().call_indirect(signature, target, &lowered);
                let result = self.builder.inst_results(call).first().copied();
                self.bind_result(*destination, result)?;
            }
            Instruction::MakeClosure {
                destination,
                function: target,
                captures,
            } => {
                let id = self.compiler.function_id(target)?;
                let reference = self
                    .compiler
                    .object
                    .declare_func_in_func(id, self.builder.func);
                let address = self.builder.ins().func_addr(POINTER, reference);
                let count = self.int(captures.len() as i64);
                let closure = self.support_value(support::CLOSURE_NEW, &[address, count])?;
                self.store_slots(closure, 1, captures)?;
                self.define(*destination, closure);
            }
            Instruction::LoadCapture {
                destination,
                closure,
                index,
            } => {
                let closure = self.value(*closure)?;
                let result =
                    self.load_slot(function.value_type(*destination), closure, index + 1);
                self.define(*destination, result);
            }
        }

        Ok(())
    }

    fn bind_result(
        &mut self,
        destination: Option<ValueId>,
        result: Option<ir::Value>,
    ) -> Result<(), BackendError> {
        match (destination, result) {
            (Some(destination), Some(result)) => {
                self.define(destination, result);
                Ok(())
            }
            (Some(destination), None) => Err(BackendError::Codegen(format!(
                "call bound to {destination} returns nothing"
            ))),
            (None, _) => Ok(()),
        }
    }

    fn map_put(&mut self, map: ir::Value, key: ValueId, value: ValueId) -> Result<(), BackendError> {
        let key = self.value(key)?;
        let contents = self.value(value)?;
        let bits = self.to_bits(self.ty(value), contents);
        self.support(support::MAP_PUT, &[map, key, bits])?;
        Ok(())
    }

    fn lower_binary(
        &mut self,
        block: BlockId,
        operator: BinaryOperator,
        lhs: ValueId,
        rhs: ValueId,
    ) -> Result<ir::Value, BackendError> {
        let (l, r) = (self.value(lhs)?, self.value(rhs)?);

        Ok(match operator {
            BinaryOperator::Add => self.builder.ins().iadd(l, r),
            BinaryOperator::Sub => self.builder.ins().isub(l, r),
            BinaryOperator::Mul => self.builder.ins().imul(l, r),
            BinaryOperator::Div | BinaryOperator::Rem => {
                self.lower_division(block, operator, l, r)?
            }
            BinaryOperator::FAdd => self.builder.ins().fadd(l, r),
            BinaryOperator::FSub => self.builder.ins().fsub(l, r),
            BinaryOperator::FMul => self.builder.ins().fmul(l, r),
            BinaryOperator::FDiv => self.builder.ins().fdiv(l, r),
            BinaryOperator::FRem => self.support_value(support::FLOAT_REM, &[l, r])?,
            BinaryOperator::And => self.builder.ins().band(l, r),
            BinaryOperator::Or => self.builder.ins().bor(l, r),
            BinaryOperator::Xor => self.builder.ins().bxor(l, r),
            BinaryOperator::Shl => {
                let amount = self.builder.ins().band_imm(r, 63);
                self.builder.ins().ishl(l, amount)
            }
            BinaryOperator::Shr => {
                let amount = self.builder.ins().band_imm(r, 63);
                self.builder.ins().sshr(l, amount)
            }
            BinaryOperator::Concat => self.support_value(support::STR_CONCAT, &[l, r])?,
        })
    }

    /// A zero divisor calls the runtime's fault routine. A divisor of `-1`
    /// is replaced by `1` before dividing so `MIN / -1` cannot trap, and the
    /// result is patched to the wrapped quotient (or a zero remainder).
    fn lower_division(
        &mut self,
        block: BlockId,
        operator: BinaryOperator,
        lhs: ir::Value,
        rhs: ir::Value,
    ) -> Result<ir::Value, BackendError> {
        let fault = self.builder.create_block();
        let proceed = self.builder.create_block();

        let is_zero = self.builder.ins().icmp_imm(IntCC::Equal, rhs, 0);
        self.builder.ins().brif(is_zero, fault, &[], proceed, &[]);

        self.builder.switch_to_block(fault);
        let routine = match operator {
            BinaryOperator::Div => support::FAULT_DIVISION,
            _ => support::FAULT_REMAINDER,
        };
        let location = self.location(block)?;
        self.support(routine, &location)?;
        self.builder.ins().trap(TrapCode::unwrap_user(1));

        self.builder.switch_to_block(proceed);
        let is_minus_one = self.builder.ins().icmp_imm(IntCC::Equal, rhs, -1);
        let one = self.int(1);
        let divisor = self.builder.ins().select(is_minus_one, one, rhs);

        Ok(match operator {
            BinaryOperator::Div => {
                let quotient = self.builder.ins().sdiv(lhs, divisor);
                let negated = self.builder.ins().ineg(lhs);
                self.builder.ins().select(is_minus_one, negated, quotient)
            }
            _ => {
                let remainder = self.builder.ins().srem(lhs, divisor);
                let zero = self.int(0);
                self.builder.ins().select(is_minus_one, zero, remainder)
            }
        })
    }

    fn lower_terminator(
        &mut self,
        block: BlockId,
        terminator: &Terminator,
    ) -> Result<(), BackendError> {
        match terminator {
            Terminator::Jump { destination } => {
                let target = self.block(*destination)?;
                let arguments = self.edge_arguments(block, *destination)?;
                self.builder.ins().jump(target, &arguments);
            }
            Terminator::Branch {
                condition,
                positive,
                negative,
            } => {
                let condition = self.value(*condition)?;
                let (then_block, else_block) = (self.block(*positive)?, self.block(*negative)?);
                let then_arguments = self.edge_arguments(block, *positive)?;
                let else_arguments = self.edge_arguments(block, *negative)?;
                self.builder.ins().brif(
                    condition,
                    then_block,
                    &then_arguments,
                    else_block,
                    &else_arguments,
                );
            }
            Terminator::Return { value: Some(value) } => {
                let value = self.value(*value)?;
                self.builder.ins().return_(&[value]);
            }
            Terminator::Return { value: None } => {
                self.builder.ins().return_(&[]);
            }
        }
        Ok(())
    }

    /// Operands of the target's phis for the edge `from -> to`, in phi
    /// order
    fn edge_arguments(&self, from: BlockId, to: BlockId) -> Result<Vec<ir::Value>, BackendError> {
        self.function
            .block(to)
            .phis()
            .map(|(phi, incoming)| {
                let (_, operand) = incoming
                    .iter()
                    .find(|(block, _)| *block == from)
                    .ok_or_else(|| {
                        BackendError::Codegen(format!("{phi} has no operand for {from}"))
                    })?;
                self.value(*operand)
            })
            .collect()
    }
}

fn int_condition(predicate: ComparePredicate, signed: bool) -> IntCC {
    match (predicate, signed) {
        (ComparePredicate::Eq, _) => IntCC::Equal,
        (ComparePredicate::Ne, _) => IntCC::NotEqual,
        (ComparePredicate::Lt, true) => IntCC::SignedLessThan,
        (ComparePredicate::Le, true) => IntCC::SignedLessThanOrEqual,
        (ComparePredicate::Gt, true) => IntCC::SignedGreaterThan,
        (ComparePredicate::Ge, true) => IntCC::SignedGreaterThanOrEqual,
        (ComparePredicate::Lt, false) => IntCC::UnsignedLessThan,
        (ComparePredicate::Le, false) => IntCC::UnsignedLessThanOrEqual,
        (ComparePredicate::Gt, false) => IntCC::UnsignedGreaterThan,
        (ComparePredicate::Ge, false) => IntCC::UnsignedGreaterThanOrEqual,
    }
}

/// Every comparison with NaN is false except `ne`
fn float_condition(predicate: ComparePredicate) -> FloatCC {
    match predicate {
        ComparePredicate::Eq => FloatCC::Equal,
        ComparePredicate::Ne => FloatCC::NotEqual,
        ComparePredicate::Lt => FloatCC::LessThan,
        ComparePredicate::Le => FloatCC::LessThanOrEqual,
        ComparePredicate::Gt => FloatCC::GreaterThan,
        ComparePredicate::Ge => FloatCC::GreaterThanOrEqual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frontend::ast::{self, BinaryOperatorKind as Op, Type as T, build::*},
        middle::{builder::build_module, passes::Pipeline},
    };

    fn compile(functions: Vec<ast::FunctionDefinition>) -> Result<Vec<u8>, BackendError> {
        let mut module = build_module(&module("test", functions)).unwrap();
        Pipeline::runner().run(&mut module).unwrap();
        compile_object(&module, &TargetConfig::default())
    }

    #[test]
    fn compiles_loops_and_calls_to_an_object() {
        let object = compile(vec![
            function(
                "divide",
                &[("n", T::Int), ("d", T::Int)],
                T::Int,
                vec![ret(binary(Op::Divide, var("n", T::Int), var("d", T::Int)))],
            ),
            function(
                "main",
                &[],
                T::Int,
                vec![
                    local("sum", int(0)),
                    for_range(
                        "i",
                        int(0),
                        int(3),
                        vec![assign(
                            var("sum", T::Int),
                            binary(Op::Add, var("sum", T::Int), var("i", T::Int)),
                        )],
                    ),
                    ret(call("divide", T::Int, vec![var("sum", T::Int), int(1)])),
                ],
            ),
        ])
        .unwrap();

        assert!(!object.is_empty());
    }

    #[test]
    fn source_emission_is_unsupported() {
        let module = Module::new("test");
        let error = CraneliftGenerator
            .emit_source(&module, &TargetConfig::default())
            .unwrap_err();
        assert!(matches!(error, BackendError::Unsupported { .. }));
    }

    #[test]
    fn aggregate_entry_results_are_unsupported() {
        let error = compile(vec![function(
            "main",
            &[],
            array_type(T::Int),
            vec![ret(array(T::Int, vec![int(1)]))],
        )])
        .unwrap_err();
        assert!(matches!(error, BackendError::Unsupported { .. }));
    }
}
