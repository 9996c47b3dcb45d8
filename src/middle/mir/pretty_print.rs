use std::fmt::{self, Write};

use colored::Colorize;
use itertools::Itertools;

use crate::middle::mir::{self, Block, Constant, Function, Instruction, Module, Terminator};

pub fn pretty_print_module(module: &Module) {
    print!("{}", render_module(module));
}

pub fn render_module(module: &Module) -> String {
    let mut output = String::new();

    for definition in module.structs.values() {
        let _ = writeln!(
            output,
            "{} {} {{ {} }}",
            "struct".magenta(),
            definition.name.blue(),
            definition
                .fields
                .iter()
                .map(|f| format!("{}: {}", f.name, f.ty))
                .join(", ")
        );
    }

    for function in module.functions.values() {
        output.push_str(&render_function(function));
    }

    output
}

pub fn render_function(function: &Function) -> String {
    let mut output = String::new();

    let _ = writeln!(
        output,
        "{} {}{}{}{} {} {} {}",
        "fn".magenta(),
        function.name.blue(),
        "(".white(),
        function
            .parameters
            .iter()
            .map(|p| format!("{p}: {}", function.values[*p]))
            .join(", "),
        ")".white(),
        "->".white(),
        function.return_type,
        "{".white()
    );

    for block in function.blocks.values() {
        let _ = write_block(&mut output, block);
    }

    output.push_str(&format!("{}\n", "}".white()));
    output
}

fn write_block(output: &mut String, block: &Block) -> fmt::Result {
    write!(output, "{}", format!("{} ({}):", block.id, block.label).bright_red())?;
    if !block.predecessors.is_empty() {
        write!(
            output,
            " {}",
            format!("; preds {}", block.predecessors.iter().join(", ")).bright_black()
        )?;
    }
    writeln!(output)?;

    for instruction in &block.instructions {
        writeln!(output, "    {instruction}")?;
    }

    match &block.terminator {
        Some(terminator) => writeln!(output, "    {terminator}"),
        None => writeln!(output, "    {}", "<unterminated>".red()),
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int(value) => write!(f, "{}", value.to_string().purple()),
            Constant::Float(value) => write!(f, "{}", format!("{value:?}").purple()),
            Constant::Bool(value) => write!(f, "{}", value.to_string().purple()),
            Constant::String(value) => write!(f, "{}", format!("{value:?}").green()),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let equals = "=".white();

        match self {
            Instruction::Const { destination, value } => {
                write!(f, "{destination} {equals} {} {value}", "const".cyan())
            }
            Instruction::Unary {
                operator,
                destination,
                operand,
            } => write!(
                f,
                "{destination} {equals} {} {operand}",
                operator.to_string().cyan()
            ),
            Instruction::Binary {
                operator,
                destination,
                lhs,
                rhs,
            } => write!(
                f,
                "{destination} {equals} {} {lhs}, {rhs}",
                operator.to_string().cyan()
            ),
            Instruction::Compare {
                predicate,
                destination,
                lhs,
                rhs,
            } => write!(
                f,
                "{destination} {equals} {} {} {lhs}, {rhs}",
                "cmp".cyan(),
                predicate.to_string().white()
            ),
            Instruction::Cast {
                destination,
                operand,
            } => write!(f, "{destination} {equals} {} {operand}", "cast".cyan()),
            Instruction::Phi {
                destination,
                incoming,
            } => write!(
                f,
                "{destination} {equals} {} {}",
                "phi".cyan(),
                incoming
                    .iter()
                    .map(|(block, value)| format!("[{}: {value}]", block.to_string().blue()))
                    .join(", ")
            ),
            Instruction::ArrayNew {
                destination,
                elements,
            } => write!(
                f,
                "{destination} {equals} {} [{}]",
                "array_new".cyan(),
                elements.iter().join(", ")
            ),
            Instruction::ArrayLoad {
                destination,
                array,
                index,
            } => write!(
                f,
                "{destination} {equals} {} {array}[{index}]",
                "array_load".cyan()
            ),
            Instruction::ArrayStore {
                array,
                index,
                value,
            } => write!(
                f,
                "{} {array}[{index}] {} {value}",
                "array_store".cyan(),
                "<-".white()
            ),
            Instruction::ArrayLength { destination, array } => {
                write!(f, "{destination} {equals} {} {array}", "array_len".cyan())
            }
            Instruction::StructNew {
                destination,
                fields,
            } => write!(
                f,
                "{destination} {equals} {} {{{}}}",
                "struct_new".cyan(),
                fields.iter().join(", ")
            ),
            Instruction::FieldLoad {
                destination,
                base,
                field,
            } => write!(
                f,
                "{destination} {equals} {} {base}.{}",
                "field_load".cyan(),
                field.to_string().purple()
            ),
            Instruction::FieldStore {
                destination,
                base,
                field,
                value,
            } => write!(
                f,
                "{destination} {equals} {} {base}.{} {} {value}",
                "field_store".cyan(),
                field.to_string().purple(),
                "<-".white()
            ),
            Instruction::MapNew {
                destination,
                entries,
            } => write!(
                f,
                "{destination} {equals} {} {{{}}}",
                "map_new".cyan(),
                entries.iter().map(|(k, v)| format!("{k}: {v}")).join(", ")
            ),
            Instruction::MapGet {
                destination,
                map,
                key,
            } => write!(f, "{destination} {equals} {} {map}[{key}]", "map_get".cyan()),
            Instruction::MapPut { map, key, value } => write!(
                f,
                "{} {map}[{key}] {} {value}",
                "map_put".cyan(),
                "<-".white()
            ),
            Instruction::Call {
                destination,
                callee,
                arguments,
            } => {
                if let Some(destination) = destination {
                    write!(f, "{destination} {equals} ")?;
                }
                write!(
                    f,
                    "{} {}({})",
                    "call".cyan(),
                    callee.to_string().blue(),
                    arguments.iter().join(", ")
                )
            }
            Instruction::CallIndirect {
                destination,
                callee,
                arguments,
            } => {
                if let Some(destination) = destination {
                    write!(f, "{destination} {equals} ")?;
                }
                write!(
                    f,
                    "{} {callee}({})",
                    "call_indirect".cyan(),
                    arguments.iter().join(", ")
                )
            }
            Instruction::MakeClosure {
                destination,
                function,
                captures,
            } => write!(
                f,
                "{destination} {equals} {} @{}[{}]",
                "closure".cyan(),
                function.blue(),
                captures.iter().join(", ")
            ),
            Instruction::LoadCapture {
                destination,
                closure,
                index,
            } => write!(
                f,
                "{destination} {equals} {} {closure}.{}",
                "capture".cyan(),
                index.to_string().purple()
            ),
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Jump { destination } => {
                write!(f, "{} {}", "jmp".cyan(), destination.to_string().blue())
            }
            Terminator::Branch {
                condition,
                positive,
                negative,
            } => write!(
                f,
                "{} {condition}, {}, {}",
                "br".cyan(),
                positive.to_string().blue(),
                negative.to_string().blue()
            ),
            Terminator::Return { value: Some(value) } => write!(f, "{} {value}", "ret".cyan()),
            Terminator::Return { value: None } => write!(f, "{}", "ret".cyan()),
        }
    }
}

impl fmt::Display for mir::Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render_module(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::mir::{BinaryOperator, BlockId, Type};

    #[test]
    fn renders_blocks_with_their_instructions() {
        colored::control::set_override(false);

        let mut function = Function::new("main", Type::Int);
        let lhs = function.new_value(Type::Int);
        let rhs = function.new_value(Type::Int);
        let sum = function.new_value(Type::Int);
        let entry = function.block_mut(BlockId::ENTRY);
        entry.instructions = vec![
            Instruction::Const {
                destination: lhs,
                value: Constant::Int(10),
            },
            Instruction::Const {
                destination: rhs,
                value: Constant::Int(5),
            },
            Instruction::Binary {
                operator: BinaryOperator::Add,
                destination: sum,
                lhs,
                rhs,
            },
        ];
        entry.terminator = Some(Terminator::Return { value: Some(sum) });

        let text = render_function(&function);
        assert!(text.starts_with("fn main() -> int"));
        assert!(text.contains("bb0 (entry):"));
        assert!(text.contains("%0 = const 10"));
        assert!(text.contains("%2 = add %0, %1"));
        assert!(text.contains("ret %2"));
    }
}
