use std::{
    cell::RefCell,
    io::Write,
    rc::Rc,
};

use itertools::Itertools;
use strum::{
    EnumIter,
    EnumString,
    IntoStaticStr,
};
use strum_macros::Display;
use tracing::{
    debug,
    debug_span,
    warn,
};

use crate::{
    module::Module,
    optimization::function_pass::{
        redundant_load_elim::RedundantLoadElimPass,
        FunctionPass,
    },
    FunctionRef,
    Verifier,
};

pub mod function_pass;

pub trait Pass {
    /// Stable identifier of the pass, as accepted by [`PassId`]'s `FromStr` implementation.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Names of the analyses that have to be available before the pass runs.
    fn required_analyses(&self) -> &'static [&'static str] {
        &[]
    }

    /// Names of the analyses that stay valid after the pass changed a function.
    fn preserved_analyses(&self) -> &'static [&'static str] {
        &[]
    }
}

/// Every pass that can be selected in a [`PipelineConfig`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Display, EnumString, EnumIter, IntoStaticStr)]
pub enum PassId {
    /// Also accepted as `amdgpu-mem-opt`.
    #[strum(to_string = "redundant-load-elim", serialize = "amdgpu-mem-opt")]
    RedundantLoadElim,
}

impl PassId {
    pub const fn description(self) -> &'static str {
        match self {
            Self::RedundantLoadElim => "Redundant memory load elimination",
        }
    }

    fn create(self, remarks: &RemarkSink) -> Box<dyn FunctionPass> {
        match self {
            Self::RedundantLoadElim => Box::new(RedundantLoadElimPass::new(remarks.writer())),
        }
    }
}

/// Where passes write their optimization remarks to.
#[derive(Debug, Clone, Default)]
pub enum RemarkSink {
    #[default]
    Stderr,
    Discard,
    Capture(Remarks),
}

impl RemarkSink {
    pub fn writer(&self) -> Box<dyn Write> {
        match self {
            Self::Stderr => Box::new(std::io::stderr()),
            Self::Discard => Box::new(std::io::sink()),
            Self::Capture(remarks) => Box::new(remarks.clone()),
        }
    }
}

/// In-memory remark buffer. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct Remarks(Rc<RefCell<Vec<u8>>>);

impl Remarks {
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.borrow())
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Write for Remarks {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Passes in the order they run in.
    pub passes: Vec<PassId>,
    pub remarks: RemarkSink,
    /// Run the verifier after every pass and log what it finds.
    pub verify_each: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::redundant_load_elim_only()
    }
}

impl PipelineConfig {
    pub fn all_disabled() -> Self {
        Self {
            passes: vec![],
            remarks: RemarkSink::default(),
            verify_each: false,
        }
    }

    pub fn redundant_load_elim_only() -> Self {
        Self::with_passes([PassId::RedundantLoadElim])
    }

    pub fn with_passes(passes: impl IntoIterator<Item = PassId>) -> Self {
        Self {
            passes: passes.into_iter().collect(),
            ..Self::all_disabled()
        }
    }

    pub fn remarks(mut self, remarks: RemarkSink) -> Self {
        self.remarks = remarks;
        self
    }

    pub fn verify_each(mut self, verify_each: bool) -> Self {
        self.verify_each = verify_each;
        self
    }
}

pub struct Pipeline<'m> {
    module: &'m mut Module,
    config: PipelineConfig,
}

impl<'a> Pipeline<'a> {
    pub fn new(module: &'a mut Module, config: PipelineConfig) -> Self {
        Self { module, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs every configured pass once on every function.
    ///
    /// Returns true if any pass changed any function.
    pub fn run(&mut self) -> bool {
        let mut passes = self.get_passes();
        let functions = self.module.functions.keys().collect_vec();
        let mut changed = false;
        for function in functions {
            changed |= self.run_on_function(&mut passes, function);
        }
        changed
    }

    fn run_on_function(
        &mut self,
        passes: &mut [Box<dyn FunctionPass>],
        function: FunctionRef,
    ) -> bool {
        let mut changed = false;
        for pass in passes.iter_mut() {
            let function_name = self.module.functions[function].name.clone();
            let _span = debug_span!("pass", pass = pass.name(), function = %function_name).entered();
            let pass_changed = pass.run_on_function(self.module, function);
            debug!("Pass finished (changed: {pass_changed})");
            changed |= pass_changed;
            if self.config.verify_each {
                self.verify(function, pass.name());
            }
        }
        changed
    }

    fn verify(&self, function: FunctionRef, after_pass: &str) {
        let function = &self.module.functions[function];
        for error in Verifier::new(function).verify() {
            warn!(
                "@{} is malformed after {after_pass}: {}",
                function.name,
                error.display(&function.cfg)
            );
        }
    }

    fn get_passes(&self) -> Vec<Box<dyn FunctionPass>> {
        self.config
            .passes
            .iter()
            .map(|pass_id| pass_id.create(&self.config.remarks))
            .collect()
    }
}
