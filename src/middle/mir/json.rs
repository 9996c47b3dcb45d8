//! JSON interchange for MIR modules. Loading does not verify the module, run
//! it through a pipeline before handing it to a backend.

use crate::middle::mir::Module;

pub fn to_json(module: &Module) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(module)
}

pub fn from_json(source: &str) -> Result<Module, serde_json::Error> {
    serde_json::from_str(source)
}

/// Blocks are stored as a list (each block carries its own id) so that the
/// output does not depend on how map keys are encoded.
pub(super) mod blocks {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serializer};

    use crate::middle::mir::{Block, BlockId};

    pub fn serialize<S: Serializer>(
        blocks: &BTreeMap<BlockId, Block>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(blocks.values())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<BlockId, Block>, D::Error> {
        let blocks = Vec::<Block>::deserialize(deserializer)?;
        let count = blocks.len();
        let map = blocks
            .into_iter()
            .map(|b| (b.id, b))
            .collect::<BTreeMap<_, _>>();

        if map.len() != count {
            return Err(serde::de::Error::custom("duplicate block id"));
        }

        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::mir::{BlockId, Constant, Function, Instruction, Terminator, Type};

    #[test]
    fn module_survives_json() {
        let mut function = Function::new("main", Type::Int);
        let value = function.new_value(Type::Int);
        let entry = function.block_mut(BlockId::ENTRY);
        entry.instructions.push(Instruction::Const {
            destination: value,
            value: Constant::Int(-5),
        });
        entry.terminator = Some(Terminator::Return { value: Some(value) });

        let mut module = Module::new("test");
        module.functions.insert("main".into(), function);

        let json = to_json(&module).unwrap();
        assert!(json.contains("\"Const\""));
        assert_eq!(from_json(&json).unwrap(), module);
    }

    #[test]
    fn duplicate_block_ids_are_rejected() {
        let json = r#"{
            "name": "m",
            "structs": {},
            "functions": {
                "f": {
                    "name": "f",
                    "parameters": [],
                    "return_type": "Void",
                    "entry": 0,
                    "values": [],
                    "blocks": [
                        {"id": 0, "label": "entry", "predecessors": [], "instructions": [], "terminator": null},
                        {"id": 0, "label": "again", "predecessors": [], "instructions": [], "terminator": null}
                    ]
                }
            }
        }"#;

        assert!(from_json(json).is_err());
    }
}
