use std::fmt::{
    Display,
    Formatter,
};

use derive_more::From;
pub use front_bridge::{
    BridgeError,
    FrontBridge,
};
pub use function::{
    Function,
    FunctionRef,
};
pub use instruction::{
    Instr,
    InstrKind,
};
pub use module::Module;
pub use ty::Type;
pub use verifier::{
    Verifier,
    VerifyError,
};

use crate::cfg::{
    BBArgRef,
    Cfg,
    InstrRef,
};

pub mod cfg;
pub mod function;

/// A value that can be referenced by an operand: the result of an instruction or a basic block argument.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, From)]
pub enum Value {
    Instr(InstrRef),
    BBArg(BBArgRef),
}

impl Value {
    pub fn display<'cfg>(&self, cfg: &'cfg Cfg) -> ValueDisplay<'cfg> {
        ValueDisplay(cfg, *self)
    }

    /// Renders the definition of this value, e.g. `i32 %v1 = load %p` or `ptr %p`.
    pub fn display_definition<'cfg>(&self, cfg: &'cfg Cfg) -> ValueDefinitionDisplay<'cfg> {
        ValueDefinitionDisplay(cfg, *self)
    }

    pub fn ty(&self, cfg: &Cfg) -> Type {
        match self {
            Value::Instr(instr) => cfg.instructions[*instr].ty,
            Value::BBArg(arg) => cfg.basic_block_args[*arg].ty,
        }
    }
}

pub struct ValueDisplay<'cfg>(&'cfg Cfg, Value);

impl Display for ValueDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.1 {
            Value::Instr(instr) => write!(f, "{}", self.0.instructions[instr]),
            Value::BBArg(arg) => write!(f, "{}", self.0.basic_block_args[arg]),
        }
    }
}

pub struct ValueDefinitionDisplay<'cfg>(&'cfg Cfg, Value);

impl Display for ValueDefinitionDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let cfg = self.0;
        match self.1 {
            Value::Instr(instr) => write!(f, "{}", cfg.instructions[instr].display(cfg)),
            Value::BBArg(arg) => {
                let arg = &cfg.basic_block_args[arg];
                write!(f, "{} {}", arg.ty, arg)
            }
        }
    }
}

pub mod instruction;

pub mod module;
pub mod optimization;

mod front_bridge;
pub mod ty;
pub mod verifier;
