use std::fmt::{
    Display,
    Formatter,
};

use memopt_front::module::{
    Identifier,
    Instruction,
    Literal,
    Operand,
};
use rustc_hash::FxHashMap;

use crate::{
    cfg,
    cfg::{
        BasicBlockRef,
        BranchTerm,
        CondBranchTerm,
        JumpTarget,
        RetTerm,
        TerminatorKind,
    },
    instruction::{
        CmpOp,
        Const,
        Op,
    },
    Function,
    Module,
    Type,
    Value,
};

/// An error found while lowering a parsed module into the IR.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum BridgeError {
    UndefinedValue {
        function: String,
        symbol: Identifier,
    },
    UndefinedBlock {
        function: String,
        symbol: Identifier,
    },
    DuplicateValue {
        function: String,
        symbol: Identifier,
    },
    DuplicateBlock {
        function: String,
        symbol: Identifier,
    },
    InstructionAfterTerminator {
        function: String,
        block: Identifier,
    },
}

impl Display for BridgeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UndefinedValue { function, symbol } => {
                write!(f, "Value %{symbol} is used in @{function} but never defined")
            }
            Self::UndefinedBlock { function, symbol } => {
                write!(f, "Basic block {symbol} is not defined in @{function}")
            }
            Self::DuplicateValue { function, symbol } => {
                write!(f, "Value %{symbol} is defined more than once in @{function}")
            }
            Self::DuplicateBlock { function, symbol } => {
                write!(f, "Basic block {symbol} is defined more than once in @{function}")
            }
            Self::InstructionAfterTerminator { function, block } => {
                write!(f, "Basic block {block} in @{function} continues after its terminator")
            }
        }
    }
}

impl std::error::Error for BridgeError {}

type Result<T> = std::result::Result<T, BridgeError>;

/// Lowers the syntax tree of [`memopt_front`] into a [`Module`].
///
/// Symbols are resolved in a single forward pass: a value has to be defined before it is
/// referenced in the source text. Basic blocks and their arguments are visible everywhere in
/// their function.
#[derive(Debug, Default)]
pub struct FrontBridge {
    function: String,
    bb_symbol_table: FxHashMap<Identifier, BasicBlockRef>,
    value_symbol_table: FxHashMap<Identifier, Value>,
}

impl FrontBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bridge(mut self, front_module: memopt_front::Module) -> Result<Module> {
        let mut module = Module::default();
        for function in front_module.functions {
            let function = self.bridge_function(function)?;
            module.functions.insert(function);
        }
        Ok(module)
    }

    fn bridge_function(&mut self, front_f: memopt_front::module::Function) -> Result<Function> {
        self.function = front_f.name.clone();
        self.bb_symbol_table.clear();
        self.value_symbol_table.clear();
        let mut function = Function::new(
            front_f.name,
            front_f.args.into_iter().map(Type::from).collect(),
            front_f.ret_ty.into(),
        );
        let mut cfg_builder = cfg::Builder::new(&mut function);
        for basic_block in &front_f.basic_blocks {
            if self.bb_symbol_table.contains_key(&basic_block.id) {
                return Err(BridgeError::DuplicateBlock {
                    function: self.function.clone(),
                    symbol: basic_block.id.clone(),
                });
            }
            let bb_ref = cfg_builder.create_bb(basic_block.id.clone());
            self.bb_symbol_table.insert(basic_block.id.clone(), bb_ref);
        }
        for basic_block in &front_f.basic_blocks {
            cfg_builder.set_bb(self.bb_symbol_table[&basic_block.id]);
            for arg in &basic_block.args {
                let arg_ref = cfg_builder.add_argument(arg.ty.into(), arg.id.clone());
                self.define_value(&arg.id, arg_ref.into())?;
            }
        }
        for basic_block in front_f.basic_blocks {
            cfg_builder.set_bb(self.bb_symbol_table[&basic_block.id]);
            for instruction in basic_block.instructions {
                if !cfg_builder.is_building_bb() {
                    return Err(BridgeError::InstructionAfterTerminator {
                        function: self.function.clone(),
                        block: basic_block.id,
                    });
                }
                self.bridge_instruction(instruction, &mut cfg_builder)?;
            }
        }
        Ok(function)
    }

    fn bridge_instruction(
        &mut self,
        instruction: Instruction,
        cfg_builder: &mut cfg::Builder,
    ) -> Result<()> {
        match instruction {
            Instruction::Add(dest, ty, lhs, rhs) => {
                let lhs = self.operand_to_op(lhs)?;
                let rhs = self.operand_to_op(rhs)?;
                let instr_ref = cfg_builder.add(dest.clone(), ty.into(), lhs, rhs);
                self.define_value(&dest, instr_ref.into())?;
            }
            Instruction::Sub(dest, ty, lhs, rhs) => {
                let lhs = self.operand_to_op(lhs)?;
                let rhs = self.operand_to_op(rhs)?;
                let instr_ref = cfg_builder.sub(dest.clone(), ty.into(), lhs, rhs);
                self.define_value(&dest, instr_ref.into())?;
            }
            Instruction::Cmp(dest, _, op, lhs, rhs) => {
                let lhs = self.operand_to_op(lhs)?;
                let rhs = self.operand_to_op(rhs)?;
                let instr_ref = cfg_builder.icmp(dest.clone(), op.into(), lhs, rhs);
                self.define_value(&dest, instr_ref.into())?;
            }
            Instruction::Op(dest, ty, op) => {
                let op = self.operand_to_op(op)?;
                let instr_ref = cfg_builder.op(dest.clone(), ty.into(), op);
                self.define_value(&dest, instr_ref.into())?;
            }
            Instruction::Alloca(dest, _, alloc_ty, num_elements) => {
                let instr_ref = cfg_builder.alloca(dest.clone(), alloc_ty.into(), num_elements);
                self.define_value(&dest, instr_ref.into())?;
            }
            Instruction::Load(dest, ty, source) => {
                let source = self.operand_to_op(source)?;
                let instr_ref = cfg_builder.load(dest.clone(), ty.into(), source);
                self.define_value(&dest, instr_ref.into())?;
            }
            Instruction::PtrToInt(dest, ty, value) => {
                let value = self.operand_to_op(value)?;
                let instr_ref = cfg_builder.ptr_to_int(dest.clone(), ty.into(), value);
                self.define_value(&dest, instr_ref.into())?;
            }
            Instruction::Store(value, dest) => {
                let value = self.operand_to_op(value)?;
                let dest = self.operand_to_op(dest)?;
                cfg_builder.store(value, dest);
            }
            Instruction::Ret(op) => {
                let value = op.map(|op| self.operand_to_op(op)).transpose()?;
                cfg_builder.end_bb(TerminatorKind::Ret(RetTerm { value }));
            }
            Instruction::Br(target) => {
                let target = self.map_target(target)?;
                cfg_builder.end_bb(TerminatorKind::Branch(BranchTerm::new(target)));
            }
            Instruction::Condbr(condition, true_target, false_target) => {
                let cond = self.operand_to_op(condition)?;
                let true_target = self.map_target(true_target)?;
                let false_target = self.map_target(false_target)?;
                cfg_builder.end_bb(TerminatorKind::CondBranch(CondBranchTerm::new(
                    cond,
                    true_target,
                    false_target,
                )));
            }
        }
        Ok(())
    }

    fn define_value(&mut self, symbol: &Identifier, value: Value) -> Result<()> {
        if self
            .value_symbol_table
            .insert(symbol.clone(), value)
            .is_some()
        {
            return Err(BridgeError::DuplicateValue {
                function: self.function.clone(),
                symbol: symbol.clone(),
            });
        }
        Ok(())
    }

    fn map_target(&self, target: memopt_front::module::Target) -> Result<JumpTarget> {
        let memopt_front::module::Target(label, args) = target;
        let target_bb_ref =
            self.bb_symbol_table
                .get(&label)
                .copied()
                .ok_or_else(|| BridgeError::UndefinedBlock {
                    function: self.function.clone(),
                    symbol: label,
                })?;
        let arguments = args
            .unwrap_or_default()
            .into_iter()
            .map(|arg| self.operand_to_op(arg))
            .collect::<Result<Vec<_>>>()?;
        Ok(JumpTarget::new(target_bb_ref, arguments))
    }

    fn operand_to_op(&self, operand: Operand) -> Result<Op> {
        match operand {
            Operand::Literal(Literal::Int(value, ty)) => Ok(Op::Const(Const::Int(ty.into(), value))),
            Operand::Literal(Literal::Bool(value)) => {
                Ok(Op::Const(Const::Int(Type::Bool, i64::from(value))))
            }
            Operand::Value(symbol) => self
                .value_symbol_table
                .get(&symbol)
                .copied()
                .map(Op::Value)
                .ok_or_else(|| BridgeError::UndefinedValue {
                    function: self.function.clone(),
                    symbol,
                }),
        }
    }
}

impl From<memopt_front::module::Type> for Type {
    fn from(value: memopt_front::module::Type) -> Self {
        match value {
            memopt_front::module::Type::U8 => Self::U8,
            memopt_front::module::Type::U16 => Self::U16,
            memopt_front::module::Type::U32 => Self::U32,
            memopt_front::module::Type::U64 => Self::U64,
            memopt_front::module::Type::I8 => Self::I8,
            memopt_front::module::Type::I16 => Self::I16,
            memopt_front::module::Type::I32 => Self::I32,
            memopt_front::module::Type::I64 => Self::I64,
            memopt_front::module::Type::Void => Self::Void,
            memopt_front::module::Type::Bool => Self::Bool,
            memopt_front::module::Type::Ptr => Self::Ptr,
        }
    }
}

impl TryFrom<memopt_front::Module> for Module {
    type Error = BridgeError;

    fn try_from(value: memopt_front::Module) -> Result<Self> {
        FrontBridge::new().bridge(value)
    }
}

impl From<memopt_front::module::CmpOp> for CmpOp {
    fn from(value: memopt_front::module::CmpOp) -> Self {
        match value {
            memopt_front::module::CmpOp::Eq => Self::Eq,
            memopt_front::module::CmpOp::Gt => Self::Gt,
        }
    }
}
