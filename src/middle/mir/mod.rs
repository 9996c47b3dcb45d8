//! MIR (Mid-level Intermediate Representation). Functions are made of basic
//! blocks holding SSA instructions. Every value is defined exactly once and
//! referenced by its [`ValueId`]; control flow only happens through block
//! terminators and merges through phi instructions at the start of a block.

use std::{collections::BTreeMap, fmt, rc::Rc};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{
    index::{IndexVec, simple_index},
    runtime::RuntimeFunction,
};

pub mod arithmetic;
pub mod cfg;
pub mod json;
pub mod pretty_print;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub structs: BTreeMap<String, StructDefinition>,
    pub functions: BTreeMap<String, Function>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructDefinition {
    pub name: String,
    pub fields: Vec<StructField>,
}

impl StructDefinition {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructField {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub parameters: Vec<ValueId>,
    pub return_type: Type,
    pub entry: BlockId,
    /// Blocks in insertion order. Ids are never reused within a function.
    #[serde(with = "json::blocks")]
    pub blocks: BTreeMap<BlockId, Block>,
    /// Type of every value defined in the function
    pub values: IndexVec<ValueId, Type>,
}

impl Function {
    pub fn new(name: impl Into<String>, return_type: Type) -> Self {
        let mut blocks = BTreeMap::new();
        blocks.insert(BlockId::ENTRY, Block::new(BlockId::ENTRY, "entry"));

        Self {
            name: name.into(),
            parameters: Vec::new(),
            return_type,
            entry: BlockId::ENTRY,
            blocks,
            values: IndexVec::new(),
        }
    }

    pub fn add_parameter(&mut self, ty: Type) -> ValueId {
        let id = self.values.push(ty);
        self.parameters.push(id);
        id
    }

    pub fn new_value(&mut self, ty: Type) -> ValueId {
        self.values.push(ty)
    }

    pub fn add_block(&mut self, label: impl Into<String>) -> BlockId {
        let id = self
            .blocks
            .last_key_value()
            .map_or(BlockId::ENTRY, |(id, _)| BlockId(id.0 + 1));
        self.blocks.insert(id, Block::new(id, label));
        id
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[&id]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        self.blocks
            .get_mut(&id)
            .unwrap_or_else(|| panic!("block {id} does not exist"))
    }

    pub fn value_type(&self, value: ValueId) -> &Type {
        &self.values[value]
    }

    pub fn signature(&self) -> FunctionType {
        FunctionType {
            parameters: self
                .parameters
                .iter()
                .map(|p| self.values[*p].clone())
                .collect(),
            return_type: self.return_type.clone(),
        }
    }

    /// Records the control edge `from -> to` in the predecessor list of `to`.
    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.block_mut(to).predecessors.push(from);
    }

    /// Removes one `from -> to` edge from the predecessor list of `to`,
    /// together with the matching operand of every phi in `to`.
    pub fn remove_edge(&mut self, from: BlockId, to: BlockId) {
        let Some(block) = self.blocks.get_mut(&to) else {
            return;
        };
        let Some(position) = block.predecessors.iter().position(|p| *p == from) else {
            return;
        };

        block.predecessors.remove(position);
        for instruction in &mut block.instructions {
            if let Instruction::Phi { incoming, .. } = instruction {
                if position < incoming.len() {
                    incoming.remove(position);
                }
            }
        }
    }

    /// Rewrites every operand equal to a key of `replacements` (following
    /// chains) in the whole function.
    pub fn replace_uses(&mut self, replacements: &hashbrown::HashMap<ValueId, ValueId>) {
        if replacements.is_empty() {
            return;
        }

        let resolve = |mut value: ValueId| {
            while let Some(next) = replacements.get(&value) {
                if *next == value {
                    break;
                }
                value = *next;
            }
            value
        };

        for block in self.blocks.values_mut() {
            for instruction in &mut block.instructions {
                instruction.for_each_operand_mut(|operand| *operand = resolve(*operand));
            }
            if let Some(terminator) = &mut block.terminator {
                terminator.for_each_operand_mut(|operand| *operand = resolve(*operand));
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub label: String,
    /// Recorded control predecessors, one entry per incoming edge. Phi
    /// operands are listed in the same order.
    pub predecessors: Vec<BlockId>,
    pub instructions: Vec<Instruction>,
    pub terminator: Option<Terminator>,
}

impl Block {
    pub fn new(id: BlockId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            predecessors: Vec::new(),
            instructions: Vec::new(),
            terminator: None,
        }
    }

    pub fn returns(&self) -> bool {
        matches!(self.terminator, Some(Terminator::Return { .. }))
    }

    pub fn successors(&self) -> Vec<BlockId> {
        self.terminator
            .as_ref()
            .map(Terminator::successors)
            .unwrap_or_default()
    }

    pub fn phis(&self) -> impl Iterator<Item = (ValueId, &[(BlockId, ValueId)])> {
        self.instructions.iter().map_while(|i| match i {
            Instruction::Phi {
                destination,
                incoming,
            } => Some((*destination, incoming.as_slice())),
            _ => None,
        })
    }

    pub fn phi_count(&self) -> usize {
        self.phis().count()
    }
}

simple_index! {
    /// Identifies a block within a function
    pub struct BlockId;
}

impl BlockId {
    pub const ENTRY: Self = Self(0);
}

simple_index! {
    /// Identifies an SSA value within a function
    pub struct ValueId;
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Void,
    Int,
    Float,
    Bool,
    String,
    Array(Rc<Type>),
    /// Maps are always keyed by strings
    Map(Rc<Type>),
    Struct(String),
    Function(Rc<FunctionType>),
}

impl Type {
    pub fn array_of(element: Type) -> Self {
        Type::Array(Rc::new(element))
    }

    pub fn map_of(value: Type) -> Self {
        Type::Map(Rc::new(value))
    }

    pub fn function(parameters: Vec<Type>, return_type: Type) -> Self {
        Type::Function(Rc::new(FunctionType {
            parameters,
            return_type,
        }))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int | Type::Float)
    }

    /// Types whose values are stored by reference to a runtime allocation
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Type::String | Type::Array(_) | Type::Map(_) | Type::Struct(_) | Type::Function(_)
        )
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::Bool => write!(f, "bool"),
            Type::String => write!(f, "string"),
            Type::Array(element) => write!(f, "array<{element}>"),
            Type::Map(value) => write!(f, "map<string,{value}>"),
            Type::Struct(name) => write!(f, "struct {name}"),
            Type::Function(function) => write!(f, "{function}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionType {
    pub parameters: Vec<Type>,
    pub return_type: Type,
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fn({}) -> {}",
            itertools::join(&self.parameters, ", "),
            self.return_type
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
}

impl Constant {
    pub fn ty(&self) -> Type {
        match self {
            Constant::Int(_) => Type::Int,
            Constant::Float(_) => Type::Float,
            Constant::Bool(_) => Type::Bool,
            Constant::String(_) => Type::String,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum UnaryOperator {
    /// Wrapping integer negation
    Neg,
    FNeg,
    /// Logical not on booleans
    Not,
    /// Bitwise complement on integers
    Complement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Concat,
}

impl BinaryOperator {
    pub fn is_float(self) -> bool {
        matches!(
            self,
            BinaryOperator::FAdd
                | BinaryOperator::FSub
                | BinaryOperator::FMul
                | BinaryOperator::FDiv
                | BinaryOperator::FRem
        )
    }

    /// Integer division and remainder fault on a zero divisor
    pub fn can_fault(self) -> bool {
        matches!(self, BinaryOperator::Div | BinaryOperator::Rem)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum ComparePredicate {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparePredicate {
    pub fn evaluate<T: PartialOrd>(self, lhs: &T, rhs: &T) -> bool {
        match self {
            ComparePredicate::Eq => lhs == rhs,
            ComparePredicate::Ne => lhs != rhs,
            ComparePredicate::Lt => lhs < rhs,
            ComparePredicate::Le => lhs <= rhs,
            ComparePredicate::Gt => lhs > rhs,
            ComparePredicate::Ge => lhs >= rhs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Callee {
    Function(String),
    Runtime(RuntimeFunction),
}

impl fmt::Display for Callee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callee::Function(name) => write!(f, "@{name}"),
            Callee::Runtime(function) => write!(f, "{function}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    Const {
        destination: ValueId,
        value: Constant,
    },
    Unary {
        operator: UnaryOperator,
        destination: ValueId,
        operand: ValueId,
    },
    Binary {
        operator: BinaryOperator,
        destination: ValueId,
        lhs: ValueId,
        rhs: ValueId,
    },
    Compare {
        predicate: ComparePredicate,
        destination: ValueId,
        lhs: ValueId,
        rhs: ValueId,
    },
    /// Converts between int, float and bool. The target type is the type of
    /// the destination.
    Cast {
        destination: ValueId,
        operand: ValueId,
    },
    Phi {
        destination: ValueId,
        incoming: Vec<(BlockId, ValueId)>,
    },
    ArrayNew {
        destination: ValueId,
        elements: Vec<ValueId>,
    },
    ArrayLoad {
        destination: ValueId,
        array: ValueId,
        index: ValueId,
    },
    ArrayStore {
        array: ValueId,
        index: ValueId,
        value: ValueId,
    },
    ArrayLength {
        destination: ValueId,
        array: ValueId,
    },
    StructNew {
        destination: ValueId,
        fields: Vec<ValueId>,
    },
    FieldLoad {
        destination: ValueId,
        base: ValueId,
        field: usize,
    },
    /// Produces a copy of `base` with one field replaced
    FieldStore {
        destination: ValueId,
        base: ValueId,
        field: usize,
        value: ValueId,
    },
    MapNew {
        destination: ValueId,
        entries: Vec<(ValueId, ValueId)>,
    },
    MapGet {
        destination: ValueId,
        map: ValueId,
        key: ValueId,
    },
    MapPut {
        map: ValueId,
        key: ValueId,
        value: ValueId,
    },
    Call {
        destination: Option<ValueId>,
        callee: Callee,
        arguments: Vec<ValueId>,
    },
    /// Calls a function value. The closure itself is passed as the hidden
    /// first argument of the target.
    CallIndirect {
        destination: Option<ValueId>,
        callee: ValueId,
        arguments: Vec<ValueId>,
    },
    MakeClosure {
        destination: ValueId,
        function: String,
        captures: Vec<ValueId>,
    },
    LoadCapture {
        destination: ValueId,
        closure: ValueId,
        index: usize,
    },
}

impl Instruction {
    pub fn destination(&self) -> Option<ValueId> {
        match self {
            Instruction::Const { destination, .. }
            | Instruction::Unary { destination, .. }
            | Instruction::Binary { destination, .. }
            | Instruction::Compare { destination, .. }
            | Instruction::Cast { destination, .. }
            | Instruction::Phi { destination, .. }
            | Instruction::ArrayNew { destination, .. }
            | Instruction::ArrayLoad { destination, .. }
            | Instruction::ArrayLength { destination, .. }
            | Instruction::StructNew { destination, .. }
            | Instruction::FieldLoad { destination, .. }
            | Instruction::FieldStore { destination, .. }
            | Instruction::MapNew { destination, .. }
            | Instruction::MapGet { destination, .. }
            | Instruction::MakeClosure { destination, .. }
            | Instruction::LoadCapture { destination, .. } => Some(*destination),
            Instruction::Call { destination, .. }
            | Instruction::CallIndirect { destination, .. } => *destination,
            Instruction::ArrayStore { .. } | Instruction::MapPut { .. } => None,
        }
    }

    /// Visits operands in evaluation order. Phi operands are included.
    pub fn for_each_operand(&self, mut f: impl FnMut(ValueId)) {
        match self {
            Instruction::Const { .. } => {}
            Instruction::Unary { operand, .. } | Instruction::Cast { operand, .. } => f(*operand),
            Instruction::Binary { lhs, rhs, .. } | Instruction::Compare { lhs, rhs, .. } => {
                f(*lhs);
                f(*rhs);
            }
            Instruction::Phi { incoming, .. } => incoming.iter().for_each(|(_, v)| f(*v)),
            Instruction::ArrayNew { elements, .. } => elements.iter().copied().for_each(f),
            Instruction::ArrayLoad { array, index, .. } => {
                f(*array);
                f(*index);
            }
            Instruction::ArrayStore {
                array,
                index,
                value,
            } => {
                f(*array);
                f(*index);
                f(*value);
            }
            Instruction::ArrayLength { array, .. } => f(*array),
            Instruction::StructNew { fields, .. } => fields.iter().copied().for_each(f),
            Instruction::FieldLoad { base, .. } => f(*base),
            Instruction::FieldStore { base, value, .. } => {
                f(*base);
                f(*value);
            }
            Instruction::MapNew { entries, .. } => entries.iter().for_each(|(k, v)| {
                f(*k);
                f(*v);
            }),
            Instruction::MapGet { map, key, .. } => {
                f(*map);
                f(*key);
            }
            Instruction::MapPut { map, key, value } => {
                f(*map);
                f(*key);
                f(*value);
            }
            Instruction::Call { arguments, .. } => arguments.iter().copied().for_each(f),
            Instruction::CallIndirect {
                callee, arguments, ..
            } => {
                f(*callee);
                arguments.iter().copied().for_each(f);
            }
            Instruction::MakeClosure { captures, .. } => captures.iter().copied().for_each(f),
            Instruction::LoadCapture { closure, .. } => f(*closure),
        }
    }

    pub fn for_each_operand_mut(&mut self, mut f: impl FnMut(&mut ValueId)) {
        match self {
            Instruction::Const { .. } => {}
            Instruction::Unary { operand, .. } | Instruction::Cast { operand, .. } => f(operand),
            Instruction::Binary { lhs, rhs, .. } | Instruction::Compare { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            Instruction::Phi { incoming, .. } => incoming.iter_mut().for_each(|(_, v)| f(v)),
            Instruction::ArrayNew { elements, .. } => elements.iter_mut().for_each(f),
            Instruction::ArrayLoad { array, index, .. } => {
                f(array);
                f(index);
            }
            Instruction::ArrayStore {
                array,
                index,
                value,
            } => {
                f(array);
                f(index);
                f(value);
            }
            Instruction::ArrayLength { array, .. } => f(array),
            Instruction::StructNew { fields, .. } => fields.iter_mut().for_each(f),
            Instruction::FieldLoad { base, .. } => f(base),
            Instruction::FieldStore { base, value, .. } => {
                f(base);
                f(value);
            }
            Instruction::MapNew { entries, .. } => entries.iter_mut().for_each(|(k, v)| {
                f(k);
                f(v);
            }),
            Instruction::MapGet { map, key, .. } => {
                f(map);
                f(key);
            }
            Instruction::MapPut { map, key, value } => {
                f(map);
                f(key);
                f(value);
            }
            Instruction::Call { arguments, .. } => arguments.iter_mut().for_each(f),
            Instruction::CallIndirect {
                callee, arguments, ..
            } => {
                f(callee);
                arguments.iter_mut().for_each(f);
            }
            Instruction::MakeClosure { captures, .. } => captures.iter_mut().for_each(f),
            Instruction::LoadCapture { closure, .. } => f(closure),
        }
    }

    pub fn operands(&self) -> Vec<ValueId> {
        let mut operands = Vec::new();
        self.for_each_operand(|v| operands.push(v));
        operands
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, Instruction::Phi { .. })
    }

    /// Instructions that can be removed when their result is unused. Anything
    /// that writes memory, calls out, or can fault is excluded.
    pub fn is_pure(&self) -> bool {
        match self {
            Instruction::Binary { operator, .. } => !operator.can_fault(),
            Instruction::Const { .. }
            | Instruction::Unary { .. }
            | Instruction::Compare { .. }
            | Instruction::Cast { .. }
            | Instruction::Phi { .. }
            | Instruction::ArrayNew { .. }
            | Instruction::ArrayLength { .. }
            | Instruction::StructNew { .. }
            | Instruction::FieldLoad { .. }
            | Instruction::FieldStore { .. }
            | Instruction::MapNew { .. }
            | Instruction::MakeClosure { .. } => true,
            Instruction::ArrayLoad { .. }
            | Instruction::ArrayStore { .. }
            | Instruction::MapGet { .. }
            | Instruction::MapPut { .. }
            | Instruction::Call { .. }
            | Instruction::CallIndirect { .. }
            | Instruction::LoadCapture { .. } => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Terminator {
    Jump {
        destination: BlockId,
    },
    Branch {
        condition: ValueId,
        positive: BlockId,
        negative: BlockId,
    },
    Return {
        value: Option<ValueId>,
    },
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Jump { destination } => vec![*destination],
            Terminator::Branch {
                positive, negative, ..
            } => vec![*positive, *negative],
            Terminator::Return { .. } => Vec::new(),
        }
    }

    pub fn operand(&self) -> Option<ValueId> {
        match self {
            Terminator::Branch { condition, .. } => Some(*condition),
            Terminator::Return { value } => *value,
            Terminator::Jump { .. } => None,
        }
    }

    pub fn for_each_operand_mut(&mut self, mut f: impl FnMut(&mut ValueId)) {
        match self {
            Terminator::Branch { condition, .. } => f(condition),
            Terminator::Return { value: Some(value) } => f(value),
            Terminator::Return { value: None } | Terminator::Jump { .. } => {}
        }
    }

    /// Replaces every edge to `from` with an edge to `to`.
    pub fn retarget(&mut self, from: BlockId, to: BlockId) {
        match self {
            Terminator::Jump { destination } => {
                if *destination == from {
                    *destination = to;
                }
            }
            Terminator::Branch {
                positive, negative, ..
            } => {
                if *positive == from {
                    *positive = to;
                }
                if *negative == from {
                    *negative = to;
                }
            }
            Terminator::Return { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;

    #[test]
    fn blocks_are_numbered_in_insertion_order() {
        let mut function = Function::new("f", Type::Void);
        let a = function.add_block("a");
        let b = function.add_block("b");

        assert_eq!(function.entry, BlockId::ENTRY);
        assert_eq!(a.index(), 1);
        assert_eq!(b.index(), 2);
        assert_eq!(
            function.blocks.keys().copied().collect::<Vec<_>>(),
            vec![BlockId::ENTRY, a, b]
        );
    }

    #[test]
    fn replace_uses_follows_chains() {
        let mut function = Function::new("f", Type::Int);
        let a = function.new_value(Type::Int);
        let b = function.new_value(Type::Int);
        let c = function.new_value(Type::Int);

        let entry = function.block_mut(BlockId::ENTRY);
        entry.instructions.push(Instruction::Const {
            destination: a,
            value: Constant::Int(1),
        });
        entry.terminator = Some(Terminator::Return { value: Some(c) });

        let mut replacements = hashbrown::HashMap::new();
        replacements.insert(c, b);
        replacements.insert(b, a);
        function.replace_uses(&replacements);

        assert_eq!(
            function.block(BlockId::ENTRY).terminator,
            Some(Terminator::Return { value: Some(a) })
        );
    }

    #[test]
    fn type_display() {
        assert_eq!(Type::map_of(Type::array_of(Type::Int)).to_string(), "map<string,array<int>>");
        assert_eq!(
            Type::function(vec![Type::Int, Type::Bool], Type::String).to_string(),
            "fn(int, bool) -> string"
        );
    }
}
