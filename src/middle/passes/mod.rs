//! Ordered pipelines of verification and transformation passes over MIR.

use strum::{Display, EnumString};
use thiserror::Error;

use crate::middle::mir::Module;

pub mod const_fold;
pub mod dce;
pub mod simplify_cfg;
pub mod verify;

pub use const_fold::ConstFold;
pub use dce::DeadCodeElimination;
pub use simplify_cfg::SimplifyCfg;
pub use verify::{VerifyError, verify_module};

#[derive(Debug, Clone, PartialEq, Error)]
#[error("pass `{pass}` broke an invariant: {invariant}")]
pub struct PassError {
    pub pass: String,
    pub invariant: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("input failed verification: {0}")]
    Verify(#[from] VerifyError),
    #[error(transparent)]
    Pass(#[from] PassError),
}

pub trait Pass {
    fn name(&self) -> &'static str;

    /// Structural passes edit blocks and edges. The module is verified again
    /// after each one that changed something.
    fn is_structural(&self) -> bool {
        false
    }

    /// Returns whether anything changed
    fn run(&mut self, module: &mut Module) -> Result<bool, PassError>;
}

/// Runs verification as a pass, so a pipeline can check the module at any
/// point.
pub struct Verify;

impl Pass for Verify {
    fn name(&self) -> &'static str {
        "verify"
    }

    fn run(&mut self, module: &mut Module) -> Result<bool, PassError> {
        verify_module(module).map_err(|error| PassError {
            pass: self.name().into(),
            invariant: error.to_string(),
        })?;
        Ok(false)
    }
}

/// Named presets selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Preset {
    #[default]
    Runner,
    Optimizing,
}

impl Preset {
    pub fn pipeline(self) -> Pipeline {
        match self {
            Preset::Runner => Pipeline::runner(),
            Preset::Optimizing => Pipeline::optimizing(),
        }
    }
}

pub struct Pipeline {
    name: String,
    passes: Vec<Box<dyn Pass>>,
}

impl Pipeline {
    /// A pipeline that only verifies its input. Passes run after that in
    /// the order they are added.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passes: Vec::new(),
        }
    }

    pub fn with_pass(mut self, pass: impl Pass + 'static) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    pub fn runner() -> Self {
        Self::new("runner")
    }

    pub fn optimizing() -> Self {
        Self::new("optimizing")
            .with_pass(ConstFold)
            .with_pass(SimplifyCfg)
            .with_pass(DeadCodeElimination)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of the passes in run order, starting with the initial
    /// verification
    pub fn pass_names(&self) -> Vec<&'static str> {
        std::iter::once(Verify.name())
            .chain(self.passes.iter().map(|p| p.name()))
            .collect()
    }

    pub fn run(&mut self, module: &mut Module) -> Result<(), PipelineError> {
        let _span = tracing::info_span!("pipeline", name = %self.name).entered();

        verify_module(module)?;

        for pass in &mut self.passes {
            let changed = pass.run(module)?;
            tracing::debug!(pass = pass.name(), changed, "ran pass");

            if changed && pass.is_structural() {
                verify_module(module).map_err(|error| PassError {
                    pass: pass.name().into(),
                    invariant: error.to_string(),
                })?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::mir::{BlockId, Function, Terminator, Type};

    fn returning_void() -> Module {
        let mut function = Function::new("main", Type::Void);
        function.block_mut(BlockId::ENTRY).terminator = Some(Terminator::Return { value: None });

        let mut module = Module::new("test");
        module.functions.insert("main".into(), function);
        module
    }

    /// Breaks the module by dropping the terminator of the entry block
    struct Vandal;

    impl Pass for Vandal {
        fn name(&self) -> &'static str {
            "vandal"
        }

        fn is_structural(&self) -> bool {
            true
        }

        fn run(&mut self, module: &mut Module) -> Result<bool, PassError> {
            for function in module.functions.values_mut() {
                function.block_mut(BlockId::ENTRY).terminator = None;
            }
            Ok(true)
        }
    }

    #[test]
    fn blames_the_structural_pass_that_broke_the_module() {
        let mut module = returning_void();
        let error = Pipeline::new("test")
            .with_pass(Vandal)
            .run(&mut module)
            .unwrap_err();

        assert!(matches!(error, PipelineError::Pass(PassError { ref pass, .. }) if pass == "vandal"));
    }

    #[test]
    fn invalid_input_fails_before_any_pass() {
        let mut module = returning_void();
        module
            .functions
            .get_mut("main")
            .unwrap()
            .block_mut(BlockId::ENTRY)
            .terminator = None;

        let error = Pipeline::optimizing().run(&mut module).unwrap_err();
        assert!(matches!(error, PipelineError::Verify(_)));
    }

    #[test]
    fn presets_parse_from_their_names() {
        assert_eq!("optimizing".parse::<Preset>(), Ok(Preset::Optimizing));
        assert_eq!(
            Preset::Optimizing.pipeline().pass_names(),
            ["verify", "const-fold", "simplify-cfg", "dce"]
        );
        assert_eq!(Pipeline::runner().pass_names(), ["verify"]);
    }
}
