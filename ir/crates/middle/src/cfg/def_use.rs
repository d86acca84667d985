use std::fmt::{
    Display,
    Formatter,
};

use fxindexmap::fx_index_set_with_capacity;
use smallvec::SmallVec;
use tracing::trace;

use super::{
    BasicBlockRef,
    Cfg,
    InstrRef,
};
use crate::{
    instruction::Op,
    Value,
};

/// Something that holds operands.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum User {
    Instr(InstrRef),
    /// The terminator of the given basic block.
    Term(BasicBlockRef),
}

impl User {
    pub fn display<'cfg>(&self, cfg: &'cfg Cfg) -> UserDisplay<'cfg> {
        UserDisplay(cfg, *self)
    }
}

pub struct UserDisplay<'cfg>(&'cfg Cfg, User);

impl Display for UserDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let cfg = self.0;
        match self.1 {
            User::Instr(instr_ref) => {
                let instr = &cfg.instructions[instr_ref];
                write!(
                    f,
                    "`{}` in {}",
                    instr.display(cfg),
                    cfg.basic_blocks[instr.defined_in]
                )
            }
            User::Term(bb_ref) => write!(f, "terminator of {}", cfg.basic_blocks[bb_ref]),
        }
    }
}

/// A def-use edge: operand `slot` of `user` refers to some [`Value`].
///
/// Uses are lookup handles only. They stay valid as long as the user keeps its shape.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Use {
    pub user: User,
    pub slot: usize,
}

impl Cfg {
    /// Returns all uses of `value`.
    pub fn uses(&self, value: Value) -> impl Iterator<Item = Use> + '_ {
        self.uses
            .get(&value)
            .into_iter()
            .flat_map(|uses| uses.iter().copied())
    }

    pub fn num_uses(&self, value: Value) -> usize {
        self.uses.get(&value).map_or(0, |uses| uses.len())
    }

    /// Returns true if `value` is referenced by at least `n` operand slots.
    pub fn has_n_uses_or_more(&self, value: Value, n: usize) -> bool {
        self.num_uses(value) >= n
    }

    /// Returns the operand that `use_` points at.
    pub fn operand(&self, use_: Use) -> Option<&Op> {
        let used = match use_.user {
            User::Instr(instr_ref) => self.instructions.get(instr_ref)?.used(),
            User::Term(bb_ref) => self.basic_blocks.get(bb_ref)?.terminator.as_ref()?.used(),
        };
        used.get(use_.slot).copied()
    }

    fn operands_mut(&mut self, user: User) -> SmallVec<[&mut Op; 2]> {
        match user {
            User::Instr(instr_ref) => self.instructions[instr_ref].used_mut(),
            User::Term(bb_ref) => self.basic_blocks[bb_ref]
                .terminator
                .as_mut()
                .map(|terminator| terminator.used_mut())
                .unwrap_or_default(),
        }
    }

    fn operands(&self, user: User) -> SmallVec<[&Op; 2]> {
        match user {
            User::Instr(instr_ref) => self.instructions[instr_ref].used(),
            User::Term(bb_ref) => self.basic_blocks[bb_ref]
                .terminator
                .as_ref()
                .map(|terminator| terminator.used())
                .unwrap_or_default(),
        }
    }

    /// Makes operand `use_.slot` of `use_.user` refer to `new_value`.
    ///
    /// The edge is moved from the use list of the old value to the one of `new_value`.
    pub fn replace_use(&mut self, use_: Use, new_value: Value) {
        let old_value = {
            let mut operands = self.operands_mut(use_.user);
            let Some(op) = operands.get_mut(use_.slot) else {
                return;
            };
            let old_value = op.referenced_value();
            **op = Op::Value(new_value);
            old_value
        };
        if let Some(old_value) = old_value {
            self.unlink(old_value, use_);
        }
        self.link(new_value, use_);
    }

    /// Rewrites every operand of `user` that refers to `old` to refer to `new` instead.
    ///
    /// Returns the number of rewritten operands.
    pub fn replace_uses_of_with(&mut self, user: User, old: Value, new: Value) -> usize {
        let slots = self
            .operands(user)
            .into_iter()
            .enumerate()
            .filter(|(_, op)| op.referenced_value() == Some(old))
            .map(|(slot, _)| slot)
            .collect::<SmallVec<[usize; 2]>>();
        for slot in slots.iter().copied() {
            self.replace_use(Use { user, slot }, new);
        }
        slots.len()
    }

    pub(super) fn register_uses(&mut self, user: User) {
        let used = self
            .operands(user)
            .into_iter()
            .enumerate()
            .filter_map(|(slot, op)| Some((op.referenced_value()?, slot)))
            .collect::<SmallVec<[(Value, usize); 2]>>();
        for (value, slot) in used {
            self.link(value, Use { user, slot });
        }
    }

    pub(super) fn unregister_uses(&mut self, user: User) {
        let used = self
            .operands(user)
            .into_iter()
            .enumerate()
            .filter_map(|(slot, op)| Some((op.referenced_value()?, slot)))
            .collect::<SmallVec<[(Value, usize); 2]>>();
        for (value, slot) in used {
            self.unlink(value, Use { user, slot });
        }
    }

    fn link(&mut self, value: Value, use_: Use) {
        trace!("Linking {use_:?} to {value:?}");
        self.uses
            .entry(value)
            .or_insert_with(|| fx_index_set_with_capacity(2))
            .insert(use_);
    }

    fn unlink(&mut self, value: Value, use_: Use) {
        trace!("Unlinking {use_:?} from {value:?}");
        if let Some(uses) = self.uses.get_mut(&value) {
            uses.swap_remove(&use_);
            if uses.is_empty() {
                self.uses.remove(&value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use crate::{
        cfg,
        cfg::{
            RetTerm,
            TerminatorKind,
            Use,
            User,
        },
        instruction::{
            Const,
            Op,
        },
        test::create_test_function,
        Type,
        Value,
    };

    #[test]
    fn should_track_uses_of_instructions_and_terminators() {
        let mut function = create_test_function();
        let mut cfg_builder = cfg::Builder::new(&mut function);
        let bb0 = cfg_builder.start_bb("bb0".into());
        let p = cfg_builder.add_argument(Type::Ptr, "p".into());
        let load = cfg_builder.load("v0".into(), Type::I32, Op::Value(p.into()));
        let store = cfg_builder.store(Op::Value(load.into()), Op::Value(p.into()));
        cfg_builder.end_bb(TerminatorKind::Ret(RetTerm::new(Op::Value(load.into()))));
        let cfg = &function.cfg;
        assert_eq!(
            cfg.uses(p.into()).collect_vec(),
            vec![
                Use {
                    user: User::Instr(load),
                    slot: 0
                },
                Use {
                    user: User::Instr(store),
                    slot: 1
                },
            ]
        );
        assert_eq!(
            cfg.uses(load.into()).collect_vec(),
            vec![
                Use {
                    user: User::Instr(store),
                    slot: 0
                },
                Use {
                    user: User::Term(bb0),
                    slot: 0
                },
            ]
        );
        assert!(cfg.has_n_uses_or_more(p.into(), 2));
        assert!(!cfg.has_n_uses_or_more(store.into(), 1));
    }

    #[test]
    fn should_move_use_edge_when_replacing_operand() {
        let mut function = create_test_function();
        let mut cfg_builder = cfg::Builder::new(&mut function);
        cfg_builder.start_bb("bb0".into());
        let p = cfg_builder.add_argument(Type::Ptr, "p".into());
        let q = cfg_builder.add_argument(Type::Ptr, "q".into());
        let load = cfg_builder.load("v0".into(), Type::I32, Op::Value(p.into()));
        cfg_builder.end_bb(TerminatorKind::Ret(RetTerm::empty()));
        let cfg = &mut function.cfg;
        let use_ = Use {
            user: User::Instr(load),
            slot: 0,
        };
        cfg.replace_use(use_, q.into());
        assert_eq!(cfg.num_uses(p.into()), 0);
        assert_eq!(cfg.uses(q.into()).collect_vec(), vec![use_]);
        assert_eq!(cfg.operand(use_), Some(&Op::Value(Value::BBArg(q))));
    }

    #[test]
    fn should_replace_terminator_operand_and_ignore_missing_slot() {
        let mut function = create_test_function();
        let mut cfg_builder = cfg::Builder::new(&mut function);
        let bb0 = cfg_builder.start_bb("bb0".into());
        let a = cfg_builder.add_argument(Type::I32, "a".into());
        let b = cfg_builder.add_argument(Type::I32, "b".into());
        cfg_builder.end_bb(TerminatorKind::Ret(RetTerm::new(Op::Value(a.into()))));
        let cfg = &mut function.cfg;
        let ret_use = Use {
            user: User::Term(bb0),
            slot: 0,
        };
        cfg.replace_use(ret_use, b.into());
        assert_eq!(cfg.num_uses(a.into()), 0);
        assert_eq!(cfg.uses(b.into()).collect_vec(), vec![ret_use]);
        assert_eq!(cfg.operand(ret_use), Some(&Op::Value(Value::BBArg(b))));

        let missing = Use {
            user: User::Term(bb0),
            slot: 1,
        };
        cfg.replace_use(missing, a.into());
        assert_eq!(cfg.num_uses(a.into()), 0);
        assert_eq!(cfg.operand(missing), None);
    }

    #[test]
    fn should_replace_every_matching_slot_of_user() {
        let mut function = create_test_function();
        let mut cfg_builder = cfg::Builder::new(&mut function);
        cfg_builder.start_bb("bb0".into());
        let a = cfg_builder.add_argument(Type::I32, "a".into());
        let b = cfg_builder.add_argument(Type::I32, "b".into());
        let sum = cfg_builder.add(
            "sum".into(),
            Type::I32,
            Op::Value(a.into()),
            Op::Value(a.into()),
        );
        let diff = cfg_builder.sub(
            "diff".into(),
            Type::I32,
            Op::Value(a.into()),
            Op::Const(Const::Int(Type::I32, 1)),
        );
        cfg_builder.end_bb(TerminatorKind::Ret(RetTerm::empty()));
        let cfg = &mut function.cfg;
        let replaced = cfg.replace_uses_of_with(User::Instr(sum), a.into(), b.into());
        assert_eq!(replaced, 2);
        assert_eq!(
            cfg.uses(a.into()).collect_vec(),
            vec![Use {
                user: User::Instr(diff),
                slot: 0
            }]
        );
        assert_eq!(cfg.num_uses(b.into()), 2);
        assert_eq!(
            cfg.instr(sum).display(cfg).to_string(),
            "i32 %sum = add %b, %b"
        );
    }

    #[test]
    fn should_reregister_uses_when_terminator_changes() {
        let mut function = create_test_function();
        let mut cfg_builder = cfg::Builder::new(&mut function);
        let bb0 = cfg_builder.start_bb("bb0".into());
        let a = cfg_builder.add_argument(Type::I32, "a".into());
        cfg_builder.end_bb(TerminatorKind::Ret(RetTerm::new(Op::Value(a.into()))));
        let cfg = &mut function.cfg;
        assert_eq!(cfg.num_uses(a.into()), 1);
        cfg.set_terminator(bb0, TerminatorKind::Ret(RetTerm::empty()));
        assert_eq!(cfg.num_uses(a.into()), 0);
    }
}
