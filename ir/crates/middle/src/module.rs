use std::{
    fmt::{
        Display,
        Formatter,
    },
    time::Instant,
};

use slotmap::SlotMap;
use tracing::{
    debug,
    info,
};

use crate::{
    optimization,
    optimization::PipelineConfig,
    verifier::VerifyError,
    Function,
    FunctionRef,
    Verifier,
};

#[derive(Debug, Clone, Default)]
pub struct Module {
    pub functions: SlotMap<FunctionRef, Function>,
}

impl Module {
    pub fn find_function_by_name(&self, name: &str) -> Option<&Function> {
        self.functions
            .values()
            .find(|function| function.name == name)
    }

    /// Runs the configured pipeline on every function.
    ///
    /// Returns true if any function was changed.
    pub fn optimize(&mut self, config: PipelineConfig) -> bool {
        let start = Instant::now();
        info!("Optimizing module");
        let mut opt_pipeline = optimization::Pipeline::new(self, config);
        debug!("Using config {:?}", opt_pipeline.config());
        let changed = opt_pipeline.run();
        let end = Instant::now();
        let time = end.duration_since(start).as_millis();
        info!("Optimized module in {time} ms (changed: {changed})");
        changed
    }

    /// Verifies every function and returns the errors together with the function they were found in.
    pub fn verify(&self) -> Vec<(FunctionRef, VerifyError)> {
        self.functions
            .iter()
            .flat_map(|(function_ref, function)| {
                Verifier::new(function)
                    .verify()
                    .into_iter()
                    .map(move |error| (function_ref, error))
            })
            .collect()
    }
}

impl Display for Module {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (_, func) in &self.functions {
            write!(f, "{}", func)?;
        }
        Ok(())
    }
}
