//! Variable definitions per block, sealing, and phi construction.

use hashbrown::HashMap;

use super::{BodyLoweringContext, BuildError, BuildErrorKind, VariableId, build_error};
use crate::middle::mir::{BlockId, Instruction, ValueId};

impl BodyLoweringContext<'_> {
    pub(super) fn write_variable(&mut self, variable: VariableId, block: BlockId, value: ValueId) {
        self.definitions.insert((variable, block), value);
    }

    pub(super) fn read_variable(
        &mut self,
        variable: VariableId,
        block: BlockId,
    ) -> Result<ValueId, BuildError> {
        if let Some(value) = self.definitions.get(&(variable, block)) {
            return Ok(self.resolve(*value));
        }

        self.read_variable_recursive(variable, block)
    }

    fn read_variable_recursive(
        &mut self,
        variable: VariableId,
        block: BlockId,
    ) -> Result<ValueId, BuildError> {
        let predecessors = self.function.block(block).predecessors.clone();

        let value = if !self.sealed.contains(&block) {
            // Not all predecessors are known yet, the operands are filled in
            // when the block is sealed
            let phi = self.insert_phi(variable, block);
            self.incomplete_phis
                .entry(block)
                .or_default()
                .push((variable, phi));
            phi
        } else if let [predecessor] = predecessors.as_slice() {
            self.read_variable(variable, *predecessor)?
        } else if predecessors.is_empty() {
            let name = self.variables[variable].name.clone();
            return build_error!(self, BuildErrorKind::UnknownVariable(name));
        } else {
            let phi = self.insert_phi(variable, block);
            // Breaks cycles through loops that read the variable again
            self.write_variable(variable, block, phi);
            self.add_phi_operands(variable, block, phi)?
        };

        self.write_variable(variable, block, value);
        Ok(value)
    }

    /// Inserts an operand-less phi after the existing phis of `block`
    fn insert_phi(&mut self, variable: VariableId, block: BlockId) -> ValueId {
        let ty = self.variables[variable].ty.clone();
        let phi = self.function.new_value(ty);

        let block_data = self.function.block_mut(block);
        let position = block_data.phi_count();
        block_data.instructions.insert(
            position,
            Instruction::Phi {
                destination: phi,
                incoming: Vec::new(),
            },
        );

        self.phi_blocks.insert(phi, block);
        tracing::trace!(%phi, %block, variable = %self.variables[variable].name, "inserted phi");
        phi
    }

    /// Fills `phi` with one operand per predecessor of `block`, in the order of
    /// the recorded predecessor list.
    fn add_phi_operands(
        &mut self,
        variable: VariableId,
        block: BlockId,
        phi: ValueId,
    ) -> Result<ValueId, BuildError> {
        let predecessors = self.function.block(block).predecessors.clone();

        let mut incoming = Vec::with_capacity(predecessors.len());
        for predecessor in predecessors {
            incoming.push((predecessor, self.read_variable(variable, predecessor)?));
        }

        if let Some(Instruction::Phi {
            incoming: operands, ..
        }) = self.find_phi_mut(block, phi)
        {
            *operands = incoming;
        }

        Ok(self.try_remove_trivial_phi(phi))
    }

    fn find_phi_mut(&mut self, block: BlockId, phi: ValueId) -> Option<&mut Instruction> {
        self.function
            .block_mut(block)
            .instructions
            .iter_mut()
            .find(|i| matches!(i, Instruction::Phi { destination, .. } if *destination == phi))
    }

    /// A phi whose operands are all the same value (or the phi itself) is
    /// replaced by that value.
    fn try_remove_trivial_phi(&mut self, phi: ValueId) -> ValueId {
        let Some(block) = self.phi_blocks.get(&phi).copied() else {
            return phi;
        };

        let operands = match self.find_phi_mut(block, phi) {
            Some(Instruction::Phi { incoming, .. }) => {
                incoming.iter().map(|(_, v)| *v).collect::<Vec<_>>()
            }
            _ => return phi,
        };

        let mut same = None;
        for operand in operands {
            let operand = self.resolve(operand);
            if Some(operand) == same || operand == phi {
                continue;
            }
            if same.is_some() {
                return phi;
            }
            same = Some(operand);
        }

        let Some(same) = same else {
            return phi;
        };

        self.function
            .block_mut(block)
            .instructions
            .retain(|i| !matches!(i, Instruction::Phi { destination, .. } if *destination == phi));
        self.phi_blocks.remove(&phi);
        self.aliases.insert(phi, same);

        tracing::trace!(%phi, replacement = %same, "removed trivial phi");
        same
    }

    /// Follows the alias chain of removed phis
    pub(super) fn resolve(&self, mut value: ValueId) -> ValueId {
        while let Some(next) = self.aliases.get(&value) {
            value = *next;
        }
        value
    }

    /// Marks the predecessor list of `block` as final and completes its
    /// provisional phis.
    pub(super) fn seal_block(&mut self, block: BlockId) -> Result<(), BuildError> {
        if let Some(pending) = self.incomplete_phis.remove(&block) {
            tracing::trace!(%block, phis = pending.len(), "sealing block");

            for (variable, phi) in pending {
                self.add_phi_operands(variable, block, phi)?;
            }
        }

        self.sealed.insert(block);
        Ok(())
    }

    /// Rewrites every use of a removed phi and drops phis that became trivial
    /// once their operands were resolved.
    pub(super) fn finalize_phis(&mut self) {
        loop {
            let aliases = self
                .aliases
                .keys()
                .map(|phi| (*phi, self.resolve(*phi)))
                .collect::<HashMap<_, _>>();
            self.function.replace_uses(&aliases);

            let candidates = self.phi_blocks.keys().copied().collect::<Vec<_>>();
            let removed_before = self.aliases.len();
            for phi in candidates {
                self.try_remove_trivial_phi(phi);
            }

            if self.aliases.len() == removed_before {
                break;
            }
        }
    }
}
