pub mod redundant_load_elim;

use crate::{
    module::Module,
    optimization::Pass,
    FunctionRef,
};

pub trait FunctionPass: Pass {
    /// Runs the pass on `function` and returns whether it was changed.
    fn run_on_function(&mut self, module: &mut Module, function: FunctionRef) -> bool;
}
