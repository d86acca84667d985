use std::fmt::{
    Display,
    Formatter,
};

use crate::{
    cfg::{
        BasicBlockRef,
        Cfg,
        DomTree,
        Use,
        User,
    },
    instruction::{
        InstrKind,
        Op,
    },
    Function,
    Type,
    Value,
};

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum VerifyError {
    MissingTerminator(BasicBlockRef),
    UsedBeforeDefinition(Value, User),
    UseNotDominatedByDefinition(Value, User),
    /// The operands of `User` and the use list of `Value` disagree.
    UseListMismatch(Value, User),
    ExpectedPointer {
        actual: Type,
        location: User,
    },
    TypeMismatch {
        expected: Type,
        actual: Type,
        location: User,
    },
}

impl VerifyError {
    pub fn display<'cfg>(&self, cfg: &'cfg Cfg) -> VerifyErrorDisplay<'cfg, '_> {
        VerifyErrorDisplay { cfg, error: self }
    }
}

pub struct VerifyErrorDisplay<'cfg, 'error> {
    cfg: &'cfg Cfg,
    error: &'error VerifyError,
}

impl Display for VerifyErrorDisplay<'_, '_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let cfg = self.cfg;
        match self.error {
            VerifyError::MissingTerminator(bb) => {
                write!(f, "Missing terminator in {}", cfg.basic_block(*bb))
            }
            VerifyError::UsedBeforeDefinition(value, location) => write!(
                f,
                "{} used before definition in {}",
                value.display(cfg),
                location.display(cfg)
            ),
            VerifyError::UseNotDominatedByDefinition(value, location) => write!(
                f,
                "Definition of {} does not dominate its use in {}",
                value.display(cfg),
                location.display(cfg)
            ),
            VerifyError::UseListMismatch(value, location) => write!(
                f,
                "Use list of {} is out of sync with the operands of {}",
                value.display(cfg),
                location.display(cfg)
            ),
            VerifyError::ExpectedPointer { actual, location } => write!(
                f,
                "Expected an operand of type ptr, but got {actual} in {}",
                location.display(cfg)
            ),
            VerifyError::TypeMismatch {
                expected,
                actual,
                location,
            } => write!(
                f,
                "Expected type {expected}, but got {actual} in {}",
                location.display(cfg)
            ),
        }
    }
}

/// Checks the structural invariants of a function.
///
/// Errors are reported in block order, then program order. Inconsistent use lists are
/// reported last.
#[derive(Debug, Clone)]
pub struct Verifier<'func> {
    function: &'func Function,
}

impl<'func> Verifier<'func> {
    pub fn new(function: &'func Function) -> Self {
        Self { function }
    }

    pub fn verify(self) -> Vec<VerifyError> {
        let cfg = &self.function.cfg;
        let mut errors = vec![];
        if cfg.basic_blocks().next().is_none() {
            return errors;
        }
        let dom_tree = cfg.dom_tree();
        for (bb_ref, bb) in cfg.basic_blocks() {
            if !bb.has_terminator() {
                errors.push(VerifyError::MissingTerminator(bb_ref));
            }
            let users = bb
                .instructions()
                .map(User::Instr)
                .chain(bb.has_terminator().then_some(User::Term(bb_ref)));
            for (position, user) in users.enumerate() {
                self.verify_operands(&dom_tree, bb_ref, position, user, &mut errors);
                self.verify_types(user, &mut errors);
            }
        }
        for value in cfg.values() {
            for use_ in cfg.uses(value) {
                let refers_to_value = cfg
                    .operand(use_)
                    .and_then(Op::referenced_value)
                    .is_some_and(|referenced| referenced == value);
                if !refers_to_value {
                    errors.push(VerifyError::UseListMismatch(value, use_.user));
                }
            }
        }
        errors
    }

    fn verify_operands(
        &self,
        dom_tree: &DomTree,
        used_in: BasicBlockRef,
        position: usize,
        user: User,
        errors: &mut Vec<VerifyError>,
    ) {
        let cfg = &self.function.cfg;
        let used = match user {
            User::Instr(instr_ref) => cfg.instr(instr_ref).used(),
            User::Term(bb_ref) => cfg.basic_block(bb_ref).terminator().used(),
        };
        for (slot, op) in used.into_iter().enumerate() {
            let Some(value) = op.referenced_value() else {
                continue;
            };
            if !cfg.uses(value).any(|use_| use_ == Use { user, slot }) {
                errors.push(VerifyError::UseListMismatch(value, user));
            }
            let (defined_in, defined_at) = match value {
                Value::Instr(def) => {
                    let defined_in = cfg.instr(def).defined_in;
                    (defined_in, cfg.basic_block(defined_in).position_of(def))
                }
                // Block arguments are defined before the first instruction.
                Value::BBArg(arg) => (cfg.bb_arg(arg).defined_in(), None),
            };
            if defined_in == used_in {
                if defined_at.is_some_and(|defined_at| defined_at >= position) {
                    errors.push(VerifyError::UsedBeforeDefinition(value, user));
                }
            } else if dom_tree.is_reachable(used_in) && !dom_tree.dominates(defined_in, used_in) {
                errors.push(VerifyError::UseNotDominatedByDefinition(value, user));
            }
        }
    }

    fn verify_types(&self, user: User, errors: &mut Vec<VerifyError>) {
        let cfg = &self.function.cfg;
        let User::Instr(instr_ref) = user else {
            return;
        };
        let instr = cfg.instr(instr_ref);
        let address = match &instr.kind {
            InstrKind::Load(load) => Some(&load.source),
            InstrKind::Store(store) => Some(&store.dest),
            InstrKind::PtrToInt(cast) => Some(&cast.value),
            _ => None,
        };
        if let Some(address) = address {
            let actual = address.ty(cfg);
            if !actual.is_ptr() {
                errors.push(VerifyError::ExpectedPointer {
                    actual,
                    location: user,
                });
            }
        }
        match &instr.kind {
            InstrKind::Add(bin_op) | InstrKind::Sub(bin_op) => {
                for op in [&bin_op.lhs, &bin_op.rhs] {
                    Self::expect_type(cfg, instr.ty, op, user, errors);
                }
            }
            InstrKind::Cmp(cmp) => {
                Self::expect_type(cfg, cmp.lhs.ty(cfg), &cmp.rhs, user, errors);
            }
            InstrKind::Op(op) => Self::expect_type(cfg, instr.ty, &op.op, user, errors),
            _ => {}
        }
    }

    fn expect_type(cfg: &Cfg, expected: Type, op: &Op, location: User, errors: &mut Vec<VerifyError>) {
        let actual = op.ty(cfg);
        if actual != expected {
            errors.push(VerifyError::TypeMismatch {
                expected,
                actual,
                location,
            });
        }
    }
}
