//! Interprets verified MIR directly. Calls push frames onto an explicit
//! stack, so the depth of the interpreted program never grows the host
//! stack.

use std::{cell::RefCell, rc::Rc};

use hashbrown::HashMap;
use thiserror::Error;

use crate::{
    index::Index,
    middle::mir::{
        BinaryOperator, BlockId, Callee, ComparePredicate, Function, Instruction, Module,
        Terminator, Type, UnaryOperator, ValueId,
        arithmetic::{self, ArithmeticFault},
    },
    runtime::MissingKey,
};

pub mod coverage;
pub mod intrinsics;
pub mod value;

pub use coverage::Coverage;
pub use intrinsics::Host;
pub use value::{Closure, Value, exit_code};

#[derive(Debug, Clone, PartialEq, Error)]
#[error("runtime fault in {function} at {block}: {kind}")]
pub struct RuntimeFault {
    pub function: String,
    pub block: BlockId,
    pub kind: FaultKind,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FaultKind {
    #[error("division by zero")]
    DivisionByZero,
    #[error("remainder by zero")]
    RemainderByZero,
    #[error("index {index} out of bounds for length {length}")]
    IndexOutOfBounds { index: i64, length: i64 },
    #[error("missing map key \"{0}\"")]
    MissingKey(String),
    #[error("substring range {start}..{end} out of bounds for length {length}")]
    SubstringOutOfBounds { start: i64, end: i64, length: i64 },
    #[error("char index {index} out of bounds for length {length}")]
    CharIndexOutOfBounds { index: i64, length: i64 },
    #[error("cannot read file \"{0}\"")]
    FileRead(String),
    #[error("cannot write file \"{0}\"")]
    FileWrite(String),
    #[error("call depth exceeded {0}")]
    StackOverflow(usize),
    /// Memory for another frame could not be allocated
    #[error("stack exhausted at depth {depth}")]
    StackExhausted { depth: usize },
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("cannot write output: {0}")]
    Output(String),
    #[error("cannot read input: {0}")]
    Input(String),
    /// Not a fault: the program asked to stop
    #[error("exit with status {0}")]
    Exit(i64),
    /// The module was not verified or was changed after verification
    #[error("malformed program: {0}")]
    Malformed(String),
}

impl FaultKind {
    fn invalid(expected: &str, found: &Value) -> Self {
        FaultKind::Malformed(format!("expected {expected}, found {}", found.type_name()))
    }
}

impl From<ArithmeticFault> for FaultKind {
    fn from(fault: ArithmeticFault) -> Self {
        match fault {
            ArithmeticFault::DivisionByZero => FaultKind::DivisionByZero,
            ArithmeticFault::RemainderByZero => FaultKind::RemainderByZero,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MachineConfig {
    /// Frames allowed on the stack before the program faults. Without a
    /// limit the stack grows until memory runs out.
    pub max_call_depth: Option<usize>,
}

/// Runs `entry` with the default configuration on the process's standard
/// streams. Runtime calls are counted into `coverage` when one is given.
pub fn execute(module: &Module, entry: &str, coverage: Option<&Coverage>) -> Result<Value, RuntimeFault> {
    let mut stdin = std::io::stdin().lock();
    let mut stdout = std::io::stdout().lock();
    let mut machine = Machine::new(module, MachineConfig::default());
    if let Some(coverage) = coverage {
        machine = machine.with_coverage(coverage.clone());
    }

    let mut host = Host::new(&mut stdin, &mut stdout);
    let result = machine.run(entry, &[], &mut host);
    if let Err(error) = host.flush() {
        tracing::warn!(%error, "cannot flush program output");
    }
    result
}

struct Frame<'m> {
    function: &'m Function,
    slots: Vec<Option<Value>>,
    block: BlockId,
    cursor: usize,
    /// Slot of the caller receiving the return value
    result: Option<ValueId>,
}

impl<'m> Frame<'m> {
    fn new(
        function: &'m Function,
        arguments: Vec<Value>,
        result: Option<ValueId>,
        depth: usize,
    ) -> Result<Self, FaultKind> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(function.values.len())
            .map_err(|_| FaultKind::StackExhausted { depth })?;
        slots.resize(function.values.len(), None);
        for (parameter, argument) in function.parameters.iter().zip(arguments) {
            slots[parameter.index()] = Some(argument);
        }

        let entry = function.entry;
        Ok(Self {
            function,
            slots,
            block: entry,
            cursor: function.blocks.get(&entry).map_or(0, |b| b.phi_count()),
            result,
        })
    }

    fn get(&self, value: ValueId) -> Result<Value, FaultKind> {
        self.slots
            .get(value.index())
            .cloned()
            .flatten()
            .ok_or_else(|| FaultKind::Malformed(format!("{value} read before it was defined")))
    }

    fn set(&mut self, value: ValueId, contents: Value) {
        if let Some(slot) = self.slots.get_mut(value.index()) {
            *slot = Some(contents);
        }
    }
}

/// What the interpreter loop does after an instruction
enum Step<'m> {
    Next,
    Call {
        function: &'m Function,
        arguments: Vec<Value>,
        result: Option<ValueId>,
    },
}

pub struct Machine<'m> {
    module: &'m Module,
    config: MachineConfig,
    frames: Vec<Frame<'m>>,
    coverage: Option<Coverage>,
}

impl<'m> Machine<'m> {
    pub fn new(module: &'m Module, config: MachineConfig) -> Self {
        Self {
            module,
            config,
            frames: Vec::new(),
            coverage: None,
        }
    }

    /// Counts runtime calls into `coverage`. Keep a clone to read the
    /// counts while the machine runs.
    pub fn with_coverage(mut self, coverage: Coverage) -> Self {
        self.coverage = Some(coverage);
        self
    }

    pub fn coverage(&self) -> Option<&Coverage> {
        self.coverage.as_ref()
    }

    pub fn run(&mut self, entry: &str, arguments: &[Value], host: &mut Host) -> Result<Value, RuntimeFault> {
        let _span = tracing::debug_span!("execute", entry).entered();

        let Some(function) = self.module.function(entry) else {
            return Err(RuntimeFault {
                function: entry.into(),
                block: BlockId::ENTRY,
                kind: FaultKind::UnknownFunction(entry.into()),
            });
        };

        self.frames.clear();
        let frame = Frame::new(function, arguments.to_vec(), None, 0).map_err(|kind| RuntimeFault {
            function: entry.into(),
            block: BlockId::ENTRY,
            kind,
        })?;
        self.frames.push(frame);

        let result = self.interpret(host);
        if let Err(fault) = &result {
            tracing::debug!(%fault, "execution stopped");
        }
        result
    }

    fn fault(&self, kind: FaultKind) -> RuntimeFault {
        let (function, block) = self
            .frames
            .last()
            .map_or((String::new(), BlockId::ENTRY), |f| (f.function.name.clone(), f.block));

        RuntimeFault {
            function,
            block,
            kind,
        }
    }

    fn interpret(&mut self, host: &mut Host) -> Result<Value, RuntimeFault> {
        loop {
            let Some(frame) = self.frames.last_mut() else {
                return Ok(Value::Void);
            };
            let function = frame.function;
            let Some(block) = function.blocks.get(&frame.block) else {
                let kind = FaultKind::Malformed(format!("missing block {}", frame.block));
                return Err(self.fault(kind));
            };

            if let Some(instruction) = block.instructions.get(frame.cursor) {
                frame.cursor += 1;

                match self.step(instruction, host) {
                    Ok(Step::Next) => {}
                    Ok(Step::Call {
                        function,
                        arguments,
                        result,
                    }) => {
                        let depth = self.frames.len();
                        if let Some(limit) = self.config.max_call_depth.filter(|limit| depth >= *limit) {
                            return Err(self.fault(FaultKind::StackOverflow(limit)));
                        }
                        tracing::trace!(function = %function.name, depth, "call");
                        let frame = Frame::new(function, arguments, result, depth)
                            .and_then(|frame| {
                                self.frames
                                    .try_reserve(1)
                                    .map(|()| frame)
                                    .map_err(|_| FaultKind::StackExhausted { depth })
                            })
                            .map_err(|kind| self.fault(kind))?;
                        self.frames.push(frame);
                    }
                    Err(kind) => return Err(self.fault(kind)),
                }
                continue;
            }

            let Some(terminator) = &block.terminator else {
                let kind = FaultKind::Malformed(format!("{} has no terminator", block.id));
                return Err(self.fault(kind));
            };

            match terminator {
                Terminator::Jump { destination } => self.enter(*destination)?,
                Terminator::Branch {
                    condition,
                    positive,
                    negative,
                } => {
                    let condition = match frame.get(*condition) {
                        Ok(Value::Bool(condition)) => condition,
                        Ok(other) => return Err(self.fault(FaultKind::invalid("bool", &other))),
                        Err(kind) => return Err(self.fault(kind)),
                    };
                    self.enter(if condition { *positive } else { *negative })?;
                }
                Terminator::Return { value } => {
                    let value = match value {
                        Some(value) => frame.get(*value).map_err(|kind| self.fault(kind))?,
                        None => Value::Void,
                    };

                    let Some(finished) = self.frames.pop() else {
                        return Ok(value);
                    };
                    match self.frames.last_mut() {
                        Some(caller) => {
                            if let Some(result) = finished.result {
                                caller.set(result, value);
                            }
                        }
                        None => return Ok(value),
                    }
                }
            }
        }
    }

    /// Moves the top frame to `destination`, copying the phi operands of the
    /// edge taken. All operands are read before any phi is written.
    fn enter(&mut self, destination: BlockId) -> Result<(), RuntimeFault> {
        let Some(frame) = self.frames.last_mut() else {
            return Ok(());
        };
        let from = frame.block;
        let Some(target) = frame.function.blocks.get(&destination) else {
            let kind = FaultKind::Malformed(format!("jump to missing block {destination}"));
            return Err(self.fault(kind));
        };

        let mut copies = Vec::new();
        for (phi, incoming) in target.phis() {
            let Some((_, value)) = incoming.iter().find(|(block, _)| *block == from) else {
                let kind = FaultKind::Malformed(format!("phi {phi} has no operand for {from}"));
                return Err(self.fault(kind));
            };
            match frame.get(*value) {
                Ok(value) => copies.push((phi, value)),
                Err(kind) => return Err(self.fault(kind)),
            }
        }

        for (phi, value) in copies {
            frame.set(phi, value);
        }
        frame.block = destination;
        frame.cursor = target.phi_count();
        Ok(())
    }

    fn step(&mut self, instruction: &'m Instruction, host: &mut Host) -> Result<Step<'m>, FaultKind> {
        let module = self.module;
        let Some(frame) = self.frames.last_mut() else {
            return Ok(Step::Next);
        };
        let function = frame.function;

        let (destination, value) = match instruction {
            Instruction::Const { destination, value } => (*destination, Value::from(value)),
            Instruction::Unary {
                operator,
                destination,
                operand,
            } => (*destination, eval_unary(*operator, frame.get(*operand)?)?),
            Instruction::Binary {
                operator,
                destination,
                lhs,
                rhs,
            } => (
                *destination,
                eval_binary(*operator, frame.get(*lhs)?, frame.get(*rhs)?)?,
            ),
            Instruction::Compare {
                predicate,
                destination,
                lhs,
                rhs,
            } => (
                *destination,
                Value::Bool(eval_compare(*predicate, &frame.get(*lhs)?, &frame.get(*rhs)?)?),
            ),
            Instruction::Cast {
                destination,
                operand,
            } => (
                *destination,
                eval_cast(frame.get(*operand)?, &function.values[*destination])?,
            ),
            Instruction::Phi { .. } => return Ok(Step::Next),
            Instruction::ArrayNew {
                destination,
                elements,
            } => {
                let elements = elements
                    .iter()
                    .map(|e| frame.get(*e))
                    .collect::<Result<Vec<_>, _>>()?;
                (*destination, Value::array(elements))
            }
            Instruction::ArrayLoad {
                destination,
                array,
                index,
            } => {
                let array = frame.get(*array)?;
                let index = frame.get(*index)?;
                let Value::Array(elements) = &array else {
                    return Err(FaultKind::invalid("array", &array));
                };
                let elements = elements.borrow();
                let position = checked_index(&index, elements.len())?;
                (*destination, elements[position].clone())
            }
            Instruction::ArrayStore {
                array,
                index,
                value,
            } => {
                let array = frame.get(*array)?;
                let index = frame.get(*index)?;
                let value = frame.get(*value)?;
                let Value::Array(elements) = &array else {
                    return Err(FaultKind::invalid("array", &array));
                };
                let mut elements = elements.borrow_mut();
                let position = checked_index(&index, elements.len())?;
                elements[position] = value;
                return Ok(Step::Next);
            }
            Instruction::ArrayLength { destination, array } => match frame.get(*array)? {
                Value::Array(elements) => (*destination, Value::Int(elements.borrow().len() as i64)),
                other => return Err(FaultKind::invalid("array", &other)),
            },
            Instruction::StructNew {
                destination,
                fields,
            } => {
                let fields = fields
                    .iter()
                    .map(|f| frame.get(*f))
                    .collect::<Result<Vec<_>, _>>()?;
                (*destination, Value::Struct(fields.into()))
            }
            Instruction::FieldLoad {
                destination,
                base,
                field,
            } => match frame.get(*base)? {
                Value::Struct(fields) => match fields.get(*field) {
                    Some(value) => (*destination, value.clone()),
                    None => return Err(FaultKind::Malformed(format!("no field {field}"))),
                },
                other => return Err(FaultKind::invalid("struct", &other)),
            },
            Instruction::FieldStore {
                destination,
                base,
                field,
                value,
            } => {
                let value = frame.get(*value)?;
                match frame.get(*base)? {
                    Value::Struct(fields) => {
                        let mut copy = fields.to_vec();
                        let Some(slot) = copy.get_mut(*field) else {
                            return Err(FaultKind::Malformed(format!("no field {field}")));
                        };
                        *slot = value;
                        (*destination, Value::Struct(copy.into()))
                    }
                    other => return Err(FaultKind::invalid("struct", &other)),
                }
            }
            Instruction::MapNew {
                destination,
                entries,
            } => {
                let mut map = HashMap::with_capacity(entries.len());
                for (key, value) in entries {
                    let Value::String(key) = frame.get(*key)? else {
                        return Err(FaultKind::Malformed("map key is not a string".into()));
                    };
                    map.insert(key, frame.get(*value)?);
                }
                (*destination, Value::Map(Rc::new(RefCell::new(map))))
            }
            Instruction::MapGet {
                destination,
                map,
                key,
            } => {
                let (Value::Map(entries), Value::String(key)) = (frame.get(*map)?, frame.get(*key)?)
                else {
                    return Err(FaultKind::Malformed("map.get on non-map operands".into()));
                };
                let value_type = &function.values[*destination];
                let found = entries.borrow().get(&key).cloned();
                let value = match found {
                    Some(value) => value,
                    None => match MissingKey::for_value_type(value_type) {
                        MissingKey::Fault => return Err(FaultKind::MissingKey(key.to_string())),
                        MissingKey::Zero | MissingKey::EmptyString => Value::zero(value_type)
                            .ok_or_else(|| FaultKind::MissingKey(key.to_string()))?,
                    },
                };
                (*destination, value)
            }
            Instruction::MapPut { map, key, value } => {
                let (Value::Map(entries), Value::String(key)) = (frame.get(*map)?, frame.get(*key)?)
                else {
                    return Err(FaultKind::Malformed("map.put on non-map operands".into()));
                };
                entries.borrow_mut().insert(key, frame.get(*value)?);
                return Ok(Step::Next);
            }
            Instruction::Call {
                destination,
                callee: Callee::Runtime(runtime),
                arguments,
            } => {
                let arguments = arguments
                    .iter()
                    .map(|a| frame.get(*a))
                    .collect::<Result<Vec<_>, _>>()?;
                if let Some(coverage) = &self.coverage {
                    coverage.record(*runtime);
                }
                tracing::trace!(function = %runtime, "runtime call");

                let result = intrinsics::call(*runtime, &arguments, host)?;
                match destination {
                    Some(destination) => (*destination, result),
                    None => return Ok(Step::Next),
                }
            }
            Instruction::Call {
                destination,
                callee: Callee::Function(name),
                arguments,
            } => {
                let Some(target) = module.function(name) else {
                    return Err(FaultKind::UnknownFunction(name.clone()));
                };
                let arguments = arguments
                    .iter()
                    .map(|a| frame.get(*a))
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(Step::Call {
                    function: target,
                    arguments,
                    result: *destination,
                });
            }
            Instruction::CallIndirect {
                destination,
                callee,
                arguments,
            } => {
                let closure = frame.get(*callee)?;
                let Value::Closure(record) = &closure else {
                    return Err(FaultKind::invalid("function", &closure));
                };
                let Some(target) = module.function(&record.function) else {
                    return Err(FaultKind::UnknownFunction(record.function.clone()));
                };

                let mut values = Vec::with_capacity(arguments.len() + 1);
                values.push(closure.clone());
                for argument in arguments {
                    values.push(frame.get(*argument)?);
                }
                return Ok(Step::Call {
                    function: target,
                    arguments: values,
                    result: *destination,
                });
            }
            Instruction::MakeClosure {
                destination,
                function,
                captures,
            } => {
                let captures = captures
                    .iter()
                    .map(|c| frame.get(*c))
                    .collect::<Result<Vec<_>, _>>()?;
                (
                    *destination,
                    Value::Closure(Rc::new(Closure {
                        function: function.clone(),
                        captures,
                    })),
                )
            }
            Instruction::LoadCapture {
                destination,
                closure,
                index,
            } => match frame.get(*closure)? {
                Value::Closure(record) => match record.captures.get(*index) {
                    Some(value) => (*destination, value.clone()),
                    None => return Err(FaultKind::Malformed(format!("no capture {index}"))),
                },
                other => return Err(FaultKind::invalid("function", &other)),
            },
        };

        frame.set(destination, value);
        Ok(Step::Next)
    }
}

fn checked_index(index: &Value, length: usize) -> Result<usize, FaultKind> {
    let Value::Int(index) = index else {
        return Err(FaultKind::invalid("int", index));
    };
    if *index < 0 || *index as usize >= length {
        return Err(FaultKind::IndexOutOfBounds {
            index: *index,
            length: length as i64,
        });
    }
    Ok(*index as usize)
}

fn eval_unary(operator: UnaryOperator, operand: Value) -> Result<Value, FaultKind> {
    Ok(match (operator, operand) {
        (UnaryOperator::Neg, Value::Int(v)) => Value::Int(v.wrapping_neg()),
        (UnaryOperator::Complement, Value::Int(v)) => Value::Int(!v),
        (UnaryOperator::FNeg, Value::Float(v)) => Value::Float(-v),
        (UnaryOperator::Not, Value::Bool(v)) => Value::Bool(!v),
        (operator, other) => {
            return Err(FaultKind::Malformed(format!(
                "{operator} applied to {}",
                other.type_name()
            )));
        }
    })
}

fn eval_binary(operator: BinaryOperator, lhs: Value, rhs: Value) -> Result<Value, FaultKind> {
    Ok(match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) if !operator.is_float() && operator != BinaryOperator::Concat => {
            Value::Int(arithmetic::int_binary(operator, a, b)?)
        }
        (Value::Float(a), Value::Float(b)) if operator.is_float() => {
            Value::Float(arithmetic::float_binary(operator, a, b))
        }
        (Value::String(a), Value::String(b)) if operator == BinaryOperator::Concat => {
            Value::string(&format!("{a}{b}"))
        }
        (lhs, rhs) => {
            return Err(FaultKind::Malformed(format!(
                "{operator} applied to {} and {}",
                lhs.type_name(),
                rhs.type_name()
            )));
        }
    })
}

fn eval_compare(predicate: ComparePredicate, lhs: &Value, rhs: &Value) -> Result<bool, FaultKind> {
    Ok(match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => predicate.evaluate(a, b),
        (Value::Float(a), Value::Float(b)) => predicate.evaluate(a, b),
        (Value::Bool(a), Value::Bool(b)) => predicate.evaluate(a, b),
        (Value::String(a), Value::String(b)) => predicate.evaluate(&a.as_bytes(), &b.as_bytes()),
        (lhs, rhs) => {
            return Err(FaultKind::Malformed(format!(
                "cannot compare {} with {}",
                lhs.type_name(),
                rhs.type_name()
            )));
        }
    })
}

fn eval_cast(operand: Value, to: &Type) -> Result<Value, FaultKind> {
    Ok(match (operand, to) {
        (Value::Int(v), Type::Float) => Value::Float(v as f64),
        (Value::Float(v), Type::Int) => Value::Int(v as i64),
        (Value::Bool(v), Type::Int) => Value::Int(i64::from(v)),
        (Value::Int(v), Type::Bool) => Value::Bool(v != 0),
        (value @ (Value::Int(_) | Value::Float(_) | Value::Bool(_)), _) => value,
        (other, to) => {
            return Err(FaultKind::Malformed(format!(
                "cannot cast {} to {to}",
                other.type_name()
            )));
        }
    })
}
