use crate::{
    cfg::{
        BBArgRef,
        BasicBlockRef,
        InstrRef,
        TerminatorKind,
    },
    function::Function,
    instruction::{
        AllocaInstr,
        BinOpInstr,
        CmpInstr,
        CmpOp,
        InstrKind,
        LoadInstr,
        Op,
        OpInstr,
        PtrToIntInstr,
        StoreInstr,
    },
    ty::Type,
};

#[derive(Debug)]
pub struct Builder<'func> {
    func: &'func mut Function,
    current_bb: Option<BasicBlockRef>,
}

impl<'func> Builder<'func> {
    pub fn new(func: &'func mut Function) -> Self {
        Self {
            func,
            current_bb: None,
        }
    }

    pub fn start_bb(&mut self, symbol: String) -> BasicBlockRef {
        let bb = self.create_bb(symbol);
        self.current_bb = Some(bb);
        bb
    }

    pub fn create_bb(&mut self, symbol: String) -> BasicBlockRef {
        self.func.cfg.new_basic_block(symbol)
    }

    pub fn set_bb(&mut self, bb: BasicBlockRef) {
        self.current_bb = Some(bb);
    }

    pub fn end_bb(&mut self, terminator: TerminatorKind) {
        let current_bb = self.current_bb();
        self.func.cfg.set_terminator(current_bb, terminator);
        self.current_bb = None;
    }

    pub fn alloca(&mut self, symbol: String, ty: Type, num_elements: Option<u32>) -> InstrRef {
        let alloca = AllocaInstr::new(ty, num_elements);
        self.add_instr(symbol, Type::Ptr, InstrKind::Alloca(alloca))
    }

    pub fn add(&mut self, symbol: String, ty: Type, lhs: Op, rhs: Op) -> InstrRef {
        self.add_instr(symbol, ty, InstrKind::Add(BinOpInstr { lhs, rhs }))
    }

    pub fn sub(&mut self, symbol: String, ty: Type, lhs: Op, rhs: Op) -> InstrRef {
        self.add_instr(symbol, ty, InstrKind::Sub(BinOpInstr { lhs, rhs }))
    }

    pub fn store(&mut self, value: Op, dest: Op) -> InstrRef {
        self.add_instr(
            String::new(),
            Type::Void,
            InstrKind::Store(StoreInstr { value, dest }),
        )
    }

    pub fn load(&mut self, symbol: String, ty: Type, source: Op) -> InstrRef {
        self.add_instr(symbol, ty, InstrKind::Load(LoadInstr { source }))
    }

    pub fn ptr_to_int(&mut self, symbol: String, ty: Type, value: Op) -> InstrRef {
        self.add_instr(symbol, ty, InstrKind::PtrToInt(PtrToIntInstr { value }))
    }

    pub fn op(&mut self, symbol: String, ty: Type, op: Op) -> InstrRef {
        self.add_instr(symbol, ty, InstrKind::Op(OpInstr { op }))
    }

    pub fn icmp(&mut self, symbol: String, condition: CmpOp, op1: Op, op2: Op) -> InstrRef {
        self.add_instr(
            symbol,
            Type::Bool,
            InstrKind::Cmp(CmpInstr {
                op: condition,
                lhs: op1,
                rhs: op2,
            }),
        )
    }

    pub fn add_argument(&mut self, ty: Type, symbol: String) -> BBArgRef {
        let current_bb = self.current_bb();
        self.func.cfg.add_bb_argument(current_bb, ty, symbol)
    }

    pub fn add_instr(&mut self, symbol: String, ty: Type, kind: InstrKind) -> InstrRef {
        let current_bb = self.current_bb();
        self.func.cfg.add_instruction(current_bb, ty, kind, symbol)
    }

    pub fn current_bb(&self) -> BasicBlockRef {
        self.current_bb.expect("No basic block is being built")
    }

    pub fn is_building_bb(&self) -> bool {
        self.current_bb.is_some()
    }
}
