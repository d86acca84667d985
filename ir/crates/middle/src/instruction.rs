use std::fmt::{
    Display,
    Formatter,
};

use smallvec::{
    smallvec,
    SmallVec,
};
use strum_macros::Display;

use crate::{
    cfg::{
        BasicBlockRef,
        Cfg,
        InstrRef,
    },
    Type,
    Value,
};

/// An instruction in a basic block.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Instr {
    pub id: InstrRef,
    pub defined_in: BasicBlockRef,
    pub ty: Type,
    pub kind: InstrKind,
    /// Unique symbol for debugging purposes.
    ///
    /// Empty for instructions that do not produce a value.
    pub symbol: String,
}

impl Display for Instr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.symbol)
    }
}

impl Instr {
    pub fn new(ty: Type, kind: InstrKind, bb: BasicBlockRef, id: InstrRef, symbol: String) -> Self {
        Self {
            id,
            defined_in: bb,
            ty,
            kind,
            symbol,
        }
    }

    pub fn value(&self) -> Value {
        Value::Instr(self.id)
    }

    /// Whether other instructions can refer to the result of this instruction.
    pub fn produces_value(&self) -> bool {
        self.ty != Type::Void
    }

    pub fn display<'a>(&'a self, cfg: &'a Cfg) -> InstrDisplay<'a> {
        InstrDisplay(cfg, self)
    }

    /// Returns the operands of this instruction.
    ///
    /// The position of an operand in the returned list is its slot, which is what a
    /// [`Use`][crate::cfg::Use] refers to.
    pub fn used(&self) -> SmallVec<[&Op; 2]> {
        match &self.kind {
            InstrKind::Alloca(_) => smallvec![],
            InstrKind::Op(op) => smallvec![&op.op],
            InstrKind::Sub(instr) | InstrKind::Add(instr) => smallvec![&instr.lhs, &instr.rhs],
            InstrKind::Load(instr) => smallvec![&instr.source],
            InstrKind::Store(instr) => smallvec![&instr.value, &instr.dest],
            InstrKind::PtrToInt(instr) => smallvec![&instr.value],
            InstrKind::Cmp(instr) => smallvec![&instr.lhs, &instr.rhs],
        }
    }

    pub fn used_mut(&mut self) -> SmallVec<[&mut Op; 2]> {
        match &mut self.kind {
            InstrKind::Alloca(_) => smallvec![],
            InstrKind::Op(op) => smallvec![&mut op.op],
            InstrKind::Sub(instr) | InstrKind::Add(instr) => {
                smallvec![&mut instr.lhs, &mut instr.rhs]
            }
            InstrKind::Load(instr) => smallvec![&mut instr.source],
            InstrKind::Store(instr) => smallvec![&mut instr.value, &mut instr.dest],
            InstrKind::PtrToInt(instr) => smallvec![&mut instr.value],
            InstrKind::Cmp(instr) => smallvec![&mut instr.lhs, &mut instr.rhs],
        }
    }

    pub fn is_load(&self) -> bool {
        matches!(self.kind, InstrKind::Load(_))
    }
}

pub struct InstrDisplay<'a>(&'a Cfg, &'a Instr);

impl Display for InstrDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let instr = self.1;
        if instr.produces_value() {
            write!(f, "{} {} = ", instr.ty, instr)?;
        }
        match &instr.kind {
            InstrKind::Alloca(alloca_instr) => {
                write!(f, "alloca {}", alloca_instr.ty)?;
                if alloca_instr.num_elements > 1 {
                    write!(f, ", {}", alloca_instr.num_elements)?;
                }
            }
            InstrKind::Sub(sub_instr) => {
                write!(
                    f,
                    "sub {}, {}",
                    sub_instr.lhs.display(self.0),
                    sub_instr.rhs.display(self.0)
                )?;
            }
            InstrKind::Add(add_instr) => {
                write!(
                    f,
                    "add {}, {}",
                    add_instr.lhs.display(self.0),
                    add_instr.rhs.display(self.0)
                )?;
            }
            InstrKind::Op(op_instr) => {
                write!(f, "{}", op_instr.op.display(self.0))?;
            }
            InstrKind::Store(store_instr) => {
                write!(
                    f,
                    "store {}, {}",
                    store_instr.value.display(self.0),
                    store_instr.dest.display(self.0)
                )?;
            }
            InstrKind::Load(load_instr) => {
                write!(f, "load {}", load_instr.source.display(self.0))?;
            }
            InstrKind::PtrToInt(cast_instr) => {
                write!(f, "ptrtoint {}", cast_instr.value.display(self.0))?;
            }
            InstrKind::Cmp(cmp_instr) => {
                write!(
                    f,
                    "cmp {} {}, {}",
                    cmp_instr.op,
                    cmp_instr.lhs.display(self.0),
                    cmp_instr.rhs.display(self.0)
                )?;
            }
        };
        Ok(())
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum InstrKind {
    Alloca(AllocaInstr),
    Store(StoreInstr),
    Load(LoadInstr),
    PtrToInt(PtrToIntInstr),
    Op(OpInstr),
    Sub(BinOpInstr),
    Add(BinOpInstr),
    Cmp(CmpInstr),
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AllocaInstr {
    pub num_elements: u32,
    pub ty: Type,
}

impl AllocaInstr {
    pub fn new(ty: Type, num_elements: Option<u32>) -> Self {
        Self {
            num_elements: num_elements.unwrap_or(1),
            ty,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct StoreInstr {
    pub value: Op,
    pub dest: Op,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LoadInstr {
    pub source: Op,
}

/// Reinterprets an address as an integer.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PtrToIntInstr {
    pub value: Op,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BinOpInstr {
    pub lhs: Op,
    pub rhs: Op,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OpInstr {
    pub op: Op,
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Op {
    Const(Const),
    Value(Value),
}

impl From<Value> for Op {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl Op {
    pub fn referenced_value(&self) -> Option<Value> {
        match self {
            Op::Const(_) => None,
            Op::Value(value) => Some(*value),
        }
    }

    pub fn ty(&self, cfg: &Cfg) -> Type {
        match self {
            Op::Const(c) => c.ty(),
            Op::Value(value) => value.ty(cfg),
        }
    }

    pub fn display<'cfg>(&self, cfg: &'cfg Cfg) -> OpDisplay<'cfg, '_> {
        OpDisplay { cfg, op: self }
    }
}

pub struct OpDisplay<'cfg, 'op> {
    cfg: &'cfg Cfg,
    op: &'op Op,
}

impl Display for OpDisplay<'_, '_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.op {
            Op::Const(Const::Int(Type::Bool, value)) => write!(f, "{}", *value != 0),
            Op::Const(c) => write!(f, "{}{}", c, c.ty()),
            Op::Value(l) => write!(f, "{}", l.display(self.cfg)),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Const {
    Int(Type, i64),
}

impl Const {
    pub fn ty(&self) -> Type {
        match self {
            Const::Int(ty, _) => *ty,
        }
    }
}

impl Display for Const {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(_, value) => write!(f, "{}", value),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CmpInstr {
    pub op: CmpOp,
    pub lhs: Op,
    pub rhs: Op,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Display)]
pub enum CmpOp {
    #[strum(serialize = "eq")]
    Eq,
    #[strum(serialize = "gt")]
    Gt,
}
