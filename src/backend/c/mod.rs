//! Lowers MIR to C11 text compiled against the embedded runtime. Every MIR
//! value becomes a local variable declared at the top of its function, and
//! every phi gets a shadow variable that each incoming edge assigns before
//! jumping.

use std::{fmt::Write as _, path::PathBuf};

use indoc::indoc;
use itertools::Itertools;
use tracing::debug;

use super::{
    BackendError, CodeGenerator, EntryResult, TargetConfig, Workspace, entry_function, mangle,
};
use crate::{
    middle::mir::{
        BinaryOperator, BlockId, Callee, ComparePredicate, Constant, Function, Instruction,
        Module, Terminator, Type, UnaryOperator, ValueId,
    },
    runtime::{AbiType, C_HEADER_NAME, MissingKey},
};

mod writer;

use writer::SourceWriter;

pub struct CGenerator;

impl CodeGenerator for CGenerator {
    fn name(&self) -> &'static str {
        "c"
    }

    fn emit_object(
        &self,
        module: &Module,
        config: &TargetConfig,
        workspace: &Workspace,
    ) -> Result<PathBuf, BackendError> {
        let source = self.emit_source(module, config)?;
        workspace.write_runtime_header()?;
        let source = workspace.write("program.c", source)?;
        let object = workspace.path("program.o");
        workspace.compile(&source, &object)?;
        Ok(object)
    }

    fn emit_source(&self, module: &Module, config: &TargetConfig) -> Result<String, BackendError> {
        translate_module(module, &config.entry)
    }
}

pub fn translate_module(module: &Module, entry: &str) -> Result<String, BackendError> {
    let (entry, result) = entry_function(module, entry)?;

    let prototypes = module
        .functions
        .values()
        .map(|f| format!("{};", prototype(f)))
        .join("\n");

    let bodies = module
        .functions
        .values()
        .map(|f| FunctionTranslator::new(module, f).translate())
        .collect::<Result<Vec<_>, _>>()?
        .join("\n");

    Ok(format!(
        indoc! {r#"
            // generated by kilnc from module {0}
            #include <stdbool.h>
            #include <stdint.h>

            #include "{1}"

            {2}

            {3}
            {4}"#
        },
        module.name.replace(['\n', '\r'], " "),
        C_HEADER_NAME,
        prototypes,
        bodies,
        main_wrapper(entry, result),
    ))
}

fn main_wrapper(entry: &Function, result: EntryResult) -> String {
    let call = format!("{}()", mangle(&entry.name));
    let body = match result {
        EntryResult::Int => format!("return (int)((uint64_t){call} & 0xff);"),
        EntryResult::Bool => format!("return {call} ? 1 : 0;"),
        EntryResult::String => format!("kiln_rt_print_result({call});\n    return 0;"),
        EntryResult::Void => format!("{call};\n    return 0;"),
    };

    format!("int main(int argc, char **argv) {{\n    kiln_rt_init(argc, argv);\n    {body}\n}}\n")
}

fn c_type(ty: &Type) -> &'static str {
    match ty {
        Type::Void => "void",
        Type::Int => "int64_t",
        Type::Float => "double",
        Type::Bool => "bool",
        Type::String => "const char *",
        Type::Array(_) => "kiln_array *",
        Type::Map(_) => "kiln_map *",
        Type::Struct(_) | Type::Function(_) => "uint64_t *",
    }
}

fn declaration(ty: &Type, name: &str) -> String {
    let ty = c_type(ty);
    if ty.ends_with('*') {
        format!("{ty}{name}")
    } else {
        format!("{ty} {name}")
    }
}

fn prototype(function: &Function) -> String {
    let parameters = if function.parameters.is_empty() {
        "void".to_string()
    } else {
        function
            .parameters
            .iter()
            .map(|p| declaration(function.value_type(*p), &value(*p)))
            .join(", ")
    };

    format!(
        "static {}({parameters})",
        declaration(&function.return_type, &mangle(&function.name))
    )
}

fn value(id: ValueId) -> String {
    format!("v{}", id.0)
}

fn shadow(id: ValueId) -> String {
    format!("v{}_in", id.0)
}

fn label(id: BlockId) -> String {
    format!("bb{}", id.0)
}

/// Reinterprets a value as the 8-byte slot stored in aggregates
fn to_bits(ty: &Type, value: &str) -> String {
    match ty {
        Type::Float => format!("kiln_rt_float_bits({value})"),
        Type::Int | Type::Bool => format!("(uint64_t){value}"),
        _ => format!("(uint64_t)(uintptr_t){value}"),
    }
}

fn from_bits(ty: &Type, bits: &str) -> String {
    match ty {
        Type::Float => format!("kiln_rt_bits_float({bits})"),
        Type::Int => format!("(int64_t){bits}"),
        Type::Bool => format!("({bits} != 0)"),
        ty => format!("({})(uintptr_t){bits}", c_type(ty)),
    }
}

fn constant(value: &Constant) -> String {
    match value {
        Constant::Int(i64::MIN) => "INT64_MIN".into(),
        Constant::Int(v) => format!("INT64_C({v})"),
        Constant::Float(v) => format!("kiln_rt_bits_float(UINT64_C({:#x}))", v.to_bits()),
        Constant::Bool(v) => v.to_string(),
        Constant::String(s) => string_literal(s),
    }
}

/// Escapes everything outside printable ASCII, plus `?` so no trigraph can
/// form
fn string_literal(s: &str) -> String {
    let mut literal = String::from("\"");
    for byte in s.bytes() {
        match byte {
            b'"' => literal.push_str("\\\""),
            b'\\' => literal.push_str("\\\\"),
            b'?' => literal.push_str("\\?"),
            b'\n' => literal.push_str("\\n"),
            b'\t' => literal.push_str("\\t"),
            0x20..=0x7e => literal.push(byte as char),
            _ => {
                let _ = write!(literal, "\\{byte:03o}");
            }
        }
    }
    literal.push('"');
    literal
}

fn compare_operator(predicate: ComparePredicate) -> &'static str {
    match predicate {
        ComparePredicate::Eq => "==",
        ComparePredicate::Ne => "!=",
        ComparePredicate::Lt => "<",
        ComparePredicate::Le => "<=",
        ComparePredicate::Gt => ">",
        ComparePredicate::Ge => ">=",
    }
}

struct FunctionTranslator<'m> {
    module: &'m Module,
    function: &'m Function,
    writer: SourceWriter,
    /// The function's MIR name as a C string, for fault reports
    name: String,
}

impl<'m> FunctionTranslator<'m> {
    fn new(module: &'m Module, function: &'m Function) -> Self {
        Self {
            module,
            function,
            writer: SourceWriter::new(),
            name: string_literal(&function.name),
        }
    }

    fn translate(mut self) -> Result<String, BackendError> {
        debug!(function = %self.function.name, "translating to C");
        let function = self.function;

        self.writer.open(prototype(function));

        for (id, ty) in function.values.enumerate() {
            if function.parameters.contains(&id) || *ty == Type::Void {
                continue;
            }
            self.writer.emit(format!("{};", declaration(ty, &value(id))));
        }
        for block in function.blocks.values() {
            for (phi, _) in block.phis() {
                let ty = function.value_type(phi);
                self.writer.emit(format!("{};", declaration(ty, &shadow(phi))));
            }
        }

        self.writer.emit(format!("goto {};", label(function.entry)));

        for block in function.blocks.values() {
            self.writer.blank();
            self.writer.label(label(block.id));
            self.writer.comment(&block.label);

            for (phi, _) in block.phis() {
                self.writer.emit(format!("{} = {};", value(phi), shadow(phi)));
            }

            for instruction in block.instructions.iter().filter(|i| !i.is_phi()) {
                self.writer.comment(instruction.to_string());
                self.translate_instruction(block.id, instruction)?;
            }

            let terminator = block.terminator.as_ref().ok_or_else(|| {
                BackendError::Codegen(format!(
                    "{} in `{}` has no terminator",
                    block.id, function.name
                ))
            })?;
            self.writer.comment(terminator.to_string());
            self.translate_terminator(block.id, terminator);
        }

        self.writer.close();
        Ok(self.writer.into_output())
    }

    fn ty(&self, id: ValueId) -> &'m Type {
        self.function.value_type(id)
    }

    fn location(&self, block: BlockId) -> String {
        format!("{}, {}", self.name, block.0)
    }

    fn struct_size(&self, base: ValueId) -> Result<usize, BackendError> {
        match self.ty(base) {
            Type::Struct(name) => self
                .module
                .structs
                .get(name)
                .map(|definition| definition.fields.len())
                .ok_or_else(|| {
                    BackendError::unsupported(
                        &self.function.name,
                        format_args!("unknown struct `{name}`"),
                    )
                }),
            ty => Err(BackendError::unsupported(
                &self.function.name,
                format_args!("field access on `{ty}`"),
            )),
        }
    }

    fn assign(&mut self, destination: ValueId, expression: impl AsRef<str>) {
        self.writer
            .emit(format!("{} = {};", value(destination), expression.as_ref()));
    }

    fn translate_instruction(
        &mut self,
        block: BlockId,
        instruction: &Instruction,
    ) -> Result<(), BackendError> {
        let location = self.location(block);

        match instruction {
            Instruction::Const {
                destination,
                value: c,
            } => self.assign(*destination, constant(c)),
            Instruction::Unary {
                operator,
                destination,
                operand,
            } => {
                let o = value(*operand);
                let expression = match operator {
                    UnaryOperator::Neg => format!("(int64_t)(0 - (uint64_t){o})"),
                    UnaryOperator::FNeg => format!("-{o}"),
                    UnaryOperator::Not => format!("!{o}"),
                    UnaryOperator::Complement => format!("~{o}"),
                };
                self.assign(*destination, expression);
            }
            Instruction::Binary {
                operator,
                destination,
                lhs,
                rhs,
            } => self.translate_binary(block, *operator, *destination, *lhs, *rhs),
            Instruction::Compare {
                predicate,
                destination,
                lhs,
                rhs,
            } => {
                let operator = compare_operator(*predicate);
                let (l, r) = (value(*lhs), value(*rhs));
                let expression = if *self.ty(*lhs) == Type::String {
                    format!("kiln_rt_str_compare({l}, {r}) {operator} 0")
                } else {
                    format!("{l} {operator} {r}")
                };
                self.assign(*destination, expression);
            }
            Instruction::Cast {
                destination,
                operand,
            } => {
                let o = value(*operand);
                let expression = match (self.ty(*operand), self.ty(*destination)) {
                    (Type::Int, Type::Float) => format!("(double){o}"),
                    (Type::Float, Type::Int) => format!("kiln_rt_float_to_int({o})"),
                    (Type::Bool, Type::Int) => format!("(int64_t){o}"),
                    (Type::Int, Type::Bool) => format!("{o} != 0"),
                    (from, to) if from == to => o,
                    (from, to) => {
                        return Err(BackendError::unsupported(
                            &self.function.name,
                            format_args!("a cast from `{from}` to `{to}`"),
                        ));
                    }
                };
                self.assign(*destination, expression);
            }
            Instruction::Phi { .. } => {}
            Instruction::ArrayNew {
                destination,
                elements,
            } => {
                self.assign(
                    *destination,
                    format!("kiln_rt_array_new({})", elements.len()),
                );
                for (i, element) in elements.iter().enumerate() {
                    let bits = to_bits(self.ty(*element), &value(*element));
                    self.writer
                        .emit(format!("{}->items[{i}] = {bits};", value(*destination)));
                }
            }
            Instruction::ArrayLoad {
                destination,
                array,
                index,
            } => {
                let bits = format!(
                    "kiln_rt_array_get({}, {}, {location})",
                    value(*array),
                    value(*index),
                );
                self.assign(*destination, from_bits(self.ty(*destination), &bits));
            }
            Instruction::ArrayStore {
                array,
                index,
                value: element,
            } => {
                let bits = to_bits(self.ty(*element), &value(*element));
                self.writer.emit(format!(
                    "kiln_rt_array_set({}, {}, {bits}, {location});",
                    value(*array),
                    value(*index),
                ));
            }
            Instruction::ArrayLength { destination, array } => {
                self.assign(*destination, format!("kiln_rt_array_len({})", value(*array)));
            }
            Instruction::StructNew {
                destination,
                fields,
            } => {
                self.assign(*destination, format!("kiln_rt_struct_new({})", fields.len()));
                self.store_slots(*destination, 0, fields);
            }
            Instruction::FieldLoad {
                destination,
                base,
                field,
            } => {
                let bits = format!("{}[{field}]", value(*base));
                self.assign(*destination, from_bits(self.ty(*destination), &bits));
            }
            Instruction::FieldStore {
                destination,
                base,
                field,
                value: contents,
            } => {
                let size = self.struct_size(*base)?;
                self.assign(
                    *destination,
                    format!("kiln_rt_struct_copy({}, {size})", value(*base)),
                );
                let bits = to_bits(self.ty(*contents), &value(*contents));
                self.writer
                    .emit(format!("{}[{field}] = {bits};", value(*destination)));
            }
            Instruction::MapNew {
                destination,
                entries,
            } => {
                self.assign(*destination, "kiln_rt_map_new()");
                for (key, contents) in entries {
                    self.map_put(*destination, *key, *contents);
                }
            }
            Instruction::MapGet {
                destination,
                map,
                key,
            } => {
                let ty = self.ty(*destination);
                let bits = format!(
                    "kiln_rt_map_get({}, {}, {}, {location})",
                    value(*map),
                    value(*key),
                    MissingKey::for_value_type(ty) as i64,
                );
                self.assign(*destination, from_bits(ty, &bits));
            }
            Instruction::MapPut {
                map,
                key,
                value: contents,
            } => self.map_put(*map, *key, *contents),
            Instruction::Call {
                destination,
                callee,
                arguments,
            } => {
                let call = match callee {
                    Callee::Function(name) => format!(
                        "{}({})",
                        mangle(name),
                        arguments.iter().copied().map(value).join(", ")
                    ),
                    Callee::Runtime(function) => {
                        let mut parameters = function
                            .parameters()
                            .iter()
                            .zip(arguments)
                            .map(|(abi, argument)| match abi {
                                AbiType::Element => to_bits(self.ty(*argument), &value(*argument)),
                                _ => value(*argument),
                            })
                            .collect::<Vec<_>>();
                        if function.can_fault() {
                            parameters.push(location);
                        }
                        format!("{}({})", function.symbol(), parameters.join(", "))
                    }
                };
                self.call(*destination, call);
            }
            Instruction::CallIndirect {
                destination,
                callee,
                arguments,
            } => {
                let Type::Function(signature) = self.ty(*callee) else {
                    return Err(BackendError::unsupported(
                        &self.function.name,
                        format_args!("a call through `{}`", self.ty(*callee)),
                    ));
                };
                let closure = value(*callee);
                let parameters = std::iter::once("uint64_t *")
                    .chain(signature.parameters.iter().map(c_type))
                    .join(", ");
                let pointer = format!(
                    "(({} (*)({parameters}))(uintptr_t){closure}[0])",
                    c_type(&signature.return_type)
                );
                let call = format!(
                    "{pointer}({})",
                    std::iter::once(closure)
                        .chain(arguments.iter().copied().map(value))
                        .join(", ")
                );
                self.call(*destination, call);
            }
            Instruction::MakeClosure {
                destination,
                function,
                captures,
            } => {
                self.assign(
                    *destination,
                    format!(
                        "kiln_rt_closure_new((void *)&{}, {})",
                        mangle(function),
                        captures.len()
                    ),
                );
                self.store_slots(*destination, 1, captures);
            }
            Instruction::LoadCapture {
                destination,
                closure,
                index,
            } => {
                let bits = format!("{}[{}]", value(*closure), index + 1);
                self.assign(*destination, from_bits(self.ty(*destination), &bits));
            }
        }

        Ok(())
    }

    fn translate_binary(
        &mut self,
        block: BlockId,
        operator: BinaryOperator,
        destination: ValueId,
        lhs: ValueId,
        rhs: ValueId,
    ) {
        let (l, r) = (value(lhs), value(rhs));
        let location = self.location(block);
        let expression = match operator {
            BinaryOperator::Add => format!("(int64_t)((uint64_t){l} + (uint64_t){r})"),
            BinaryOperator::Sub => format!("(int64_t)((uint64_t){l} - (uint64_t){r})"),
            BinaryOperator::Mul => format!("(int64_t)((uint64_t){l} * (uint64_t){r})"),
            BinaryOperator::Div => {
                self.writer
                    .emit(format!("if ({r} == 0) kiln_rt_fault_division({location});"));
                format!("{r} == -1 ? (int64_t)(0 - (uint64_t){l}) : {l} / {r}")
            }
            BinaryOperator::Rem => {
                self.writer
                    .emit(format!("if ({r} == 0) kiln_rt_fault_remainder({location});"));
                format!("{r} == -1 ? 0 : {l} % {r}")
            }
            BinaryOperator::FAdd => format!("{l} + {r}"),
            BinaryOperator::FSub => format!("{l} - {r}"),
            BinaryOperator::FMul => format!("{l} * {r}"),
            BinaryOperator::FDiv => format!("{l} / {r}"),
            BinaryOperator::FRem => format!("kiln_rt_float_rem({l}, {r})"),
            BinaryOperator::And => format!("{l} & {r}"),
            BinaryOperator::Or => format!("{l} | {r}"),
            BinaryOperator::Xor => format!("{l} ^ {r}"),
            BinaryOperator::Shl => format!("(int64_t)((uint64_t){l} << ({r} & 63))"),
            BinaryOperator::Shr => format!("{l} >> ({r} & 63)"),
            BinaryOperator::Concat => format!("kiln_rt_str_concat({l}, {r})"),
        };
        self.assign(destination, expression);
    }

    fn store_slots(&mut self, base: ValueId, offset: usize, values: &[ValueId]) {
        for (i, element) in values.iter().enumerate() {
            let bits = to_bits(self.ty(*element), &value(*element));
            self.writer
                .emit(format!("{}[{}] = {bits};", value(base), i + offset));
        }
    }

    fn map_put(&mut self, map: ValueId, key: ValueId, contents: ValueId) {
        let bits = to_bits(self.ty(contents), &value(contents));
        self.writer.emit(format!(
            "kiln_rt_map_put({}, {}, {bits});",
            value(map),
            value(key)
        ));
    }

    fn call(&mut self, destination: Option<ValueId>, call: String) {
        match destination {
            Some(destination) => self.assign(destination, call),
            None => self.writer.emit(format!("{call};")),
        }
    }

    fn translate_terminator(&mut self, block: BlockId, terminator: &Terminator) {
        match terminator {
            Terminator::Jump { destination } => self.edge(block, *destination),
            Terminator::Branch {
                condition,
                positive,
                negative,
            } => {
                self.writer.open(format!("if ({})", value(*condition)));
                self.edge(block, *positive);
                self.writer.close();
                self.writer.open("else");
                self.edge(block, *negative);
                self.writer.close();
            }
            Terminator::Return { value: Some(result) } => {
                self.writer.emit(format!("return {};", value(*result)));
            }
            Terminator::Return { value: None } => self.writer.emit("return;"),
        }
    }

    /// Assigns the shadow of every phi in `to` its operand for this edge,
    /// then jumps
    fn edge(&mut self, from: BlockId, to: BlockId) {
        let target = self.function.block(to);
        for (phi, incoming) in target.phis() {
            if let Some((_, operand)) = incoming.iter().find(|(block, _)| *block == from) {
                self.writer
                    .emit(format!("{} = {};", shadow(phi), value(*operand)));
            }
        }
        self.writer.emit(format!("goto {};", label(to)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frontend::ast::{
            self, AssignmentOperatorKind, BinaryOperatorKind as Op, Type as T, build::*,
        },
        middle::{builder::build_module, passes::Pipeline},
    };

    fn translate(functions: Vec<ast::FunctionDefinition>) -> String {
        let mut module = build_module(&module("test", functions)).unwrap();
        Pipeline::runner().run(&mut module).unwrap();
        translate_module(&module, "main").unwrap()
    }

    #[test]
    fn loop_phis_use_shadow_variables() {
        let source = translate(vec![function(
            "main",
            &[],
            T::Int,
            vec![
                local("sum", int(0)),
                for_range(
                    "i",
                    int(0),
                    int(4),
                    vec![operator_assign(
                        AssignmentOperatorKind::Add,
                        var("sum", T::Int),
                        var("i", T::Int),
                    )],
                ),
                ret(var("sum", T::Int)),
            ],
        )]);

        assert!(source.contains("static int64_t kiln_fn_main(void);"));
        assert!(source.contains("_in = "));
        assert!(source.contains("return (int)((uint64_t)kiln_fn_main() & 0xff);"));
        assert!(source.contains("int main(int argc, char **argv) {\n    kiln_rt_init(argc, argv);"));
    }

    #[test]
    fn division_checks_for_zero() {
        let source = translate(vec![
            function(
                "divide",
                &[("d", T::Int)],
                T::Int,
                vec![ret(binary(Op::Divide, int(7), var("d", T::Int)))],
            ),
            function(
                "main",
                &[],
                T::Int,
                vec![ret(call("divide", T::Int, vec![int(0)]))],
            ),
        ]);

        assert!(source.contains("kiln_rt_fault_division(\"divide\", 0);"));
        assert!(source.contains("== -1 ? (int64_t)(0 - (uint64_t)"));
    }

    #[test]
    fn string_literals_are_escaped() {
        assert_eq!(string_literal("a\"b\\c\n??="), r#""a\"b\\c\n\?\?=""#);
        assert_eq!(string_literal("é"), r#""\303\251""#);
    }

    #[test]
    fn string_entry_results_are_printed() {
        let source = translate(vec![function(
            "main",
            &[],
            T::String,
            vec![ret(string("done"))],
        )]);

        assert!(source.contains("kiln_rt_print_result(kiln_fn_main());"));
    }
}
