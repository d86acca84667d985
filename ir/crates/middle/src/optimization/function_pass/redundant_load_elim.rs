//! Local redundant load elimination.
//!
//! Within every basic block, a load whose address is referenced at least twice in the function
//! gets a cached copy: a new load of the same address is placed in front of it and every other
//! user of the address is rewired to the cached result.
//!
//! The cached load itself keeps reading from the address. For the use count it is treated as a
//! user of its own result, as if it had been rewired too. A later load that was rewired to the
//! cached result therefore qualifies again and gets a cached copy of its own. Nothing is shared
//! between loads of the same address.
//!
//! The redundancy test is purely syntactic. Two loads only match if they read from the same
//! [`Value`]. Stores between the loads are not taken into account, and non-load users of the
//! address (including terminators) receive the loaded value in place of the address.

use std::io::Write;

use itertools::Itertools;
use rustc_hash::FxHashSet;
use tracing::{
    debug,
    warn,
};

use crate::{
    cfg::{
        BasicBlockRef,
        Cfg,
        InstrRef,
        User,
    },
    instruction::{
        InstrKind,
        LoadInstr,
        Op,
    },
    module::Module,
    optimization::{
        function_pass::FunctionPass,
        Pass,
    },
    FunctionRef,
    Value,
};

/// Prefix of the remark that is written for every optimized address.
pub const REMARK_PREFIX: &str = "Optimized redundant memory load for: ";

const CACHED_LOAD_SYMBOL: &str = "cached";

pub struct RedundantLoadElimPass {
    remarks: Box<dyn Write>,
}

impl Default for RedundantLoadElimPass {
    fn default() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }
}

impl RedundantLoadElimPass {
    pub fn new(remarks: Box<dyn Write>) -> Self {
        Self { remarks }
    }

    fn run_on_basic_block(
        &mut self,
        cfg: &mut Cfg,
        bb: BasicBlockRef,
        cached_loads: &mut FxHashSet<InstrRef>,
    ) -> bool {
        let mut changed = false;
        let mut cursor = 0;
        while let Some(instr_ref) = cfg.basic_block(bb).instruction_at(cursor) {
            cursor += 1;
            let InstrKind::Load(load) = &cfg.instr(instr_ref).kind else {
                continue;
            };
            let Some(address) = load.source.referenced_value() else {
                continue;
            };
            if num_uses(cfg, address, cached_loads) < 2 {
                continue;
            }
            let cached = self.cache_load(cfg, instr_ref, address);
            cached_loads.insert(cached);
            // The cached load is inserted at or before the current one.
            cursor += 1;
            changed = true;
        }
        changed
    }

    /// Inserts a copy of `load` and rewires every other user of `address` to it.
    fn cache_load(&mut self, cfg: &mut Cfg, load: InstrRef, address: Value) -> InstrRef {
        let bb = cfg.instr(load).defined_in;
        let ty = cfg.instr(load).ty;
        let consumers = cfg
            .uses(address)
            .filter(|use_| use_.user != User::Instr(load))
            .collect_vec();
        let insert_before =
            earliest_consumer_before(cfg, bb, load, consumers.iter().map(|use_| use_.user));
        let symbol = cfg.fresh_symbol(CACHED_LOAD_SYMBOL);
        let cached = cfg.insert_instruction_before(
            insert_before,
            ty,
            InstrKind::Load(LoadInstr {
                source: Op::Value(address),
            }),
            symbol,
        );
        debug!(
            "Caching `{}` in `{}`",
            cfg.instr(load).display(cfg),
            cfg.instr(cached).display(cfg)
        );
        for use_ in consumers {
            debug!("Rewiring {}", use_.user.display(cfg));
            cfg.replace_use(use_, cached.into());
        }
        self.report(cfg, address);
        cached
    }

    fn report(&mut self, cfg: &Cfg, address: Value) {
        if let Err(error) = writeln!(
            self.remarks,
            "{REMARK_PREFIX}{}",
            address.display_definition(cfg)
        ) {
            warn!("Failed to write optimization remark: {error}");
        }
    }
}

/// Number of uses of `address`, counting a cached load as a user of its own result.
fn num_uses(cfg: &Cfg, address: Value, cached_loads: &FxHashSet<InstrRef>) -> usize {
    let self_use = match address {
        Value::Instr(instr_ref) => usize::from(cached_loads.contains(&instr_ref)),
        Value::BBArg(_) => 0,
    };
    cfg.num_uses(address) + self_use
}

/// Returns the instruction the cached load has to be inserted in front of so that it is
/// defined before every consumer in the same basic block.
fn earliest_consumer_before(
    cfg: &Cfg,
    bb: BasicBlockRef,
    load: InstrRef,
    consumers: impl Iterator<Item = User>,
) -> InstrRef {
    let basic_block = cfg.basic_block(bb);
    let load_position = basic_block.position_of(load);
    consumers
        .filter_map(|user| match user {
            User::Instr(instr_ref) if cfg.instr(instr_ref).defined_in == bb => {
                basic_block.position_of(instr_ref)
            }
            _ => None,
        })
        .filter(|position| Some(*position) < load_position)
        .min()
        .and_then(|position| basic_block.instruction_at(position))
        .unwrap_or(load)
}

impl Pass for RedundantLoadElimPass {
    fn name(&self) -> &'static str {
        "redundant-load-elim"
    }

    fn description(&self) -> &'static str {
        "Redundant memory load elimination"
    }
}

impl FunctionPass for RedundantLoadElimPass {
    fn run_on_function(&mut self, module: &mut Module, function: FunctionRef) -> bool {
        let cfg = &mut module.functions[function].cfg;
        let mut cached_loads = FxHashSet::default();
        let mut changed = false;
        for bb in cfg.basic_block_ids().collect_vec() {
            changed |= self.run_on_basic_block(cfg, bb, &mut cached_loads);
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        optimization::{
            PipelineConfig,
            RemarkSink,
            Remarks,
        },
        test::{
            assert_module_is_equal_to_src,
            create_test_module_from_source,
        },
        Verifier,
        VerifyError,
    };

    fn optimize(module: &mut Module) -> (bool, Vec<String>) {
        let remarks = Remarks::default();
        let changed = module.optimize(
            PipelineConfig::redundant_load_elim_only().remarks(RemarkSink::Capture(remarks.clone())),
        );
        (changed, remarks.lines())
    }

    #[test]
    #[traced_test]
    fn should_not_change_function_without_loads() {
        let source = "
            fun i32 @test(ptr) {
            bb0(ptr %p):
                i32 %x = 1i32;
                store %x, %p;
                store %x, %p;
                i64 %a = ptrtoint %p;
                ret %x;
            }
            ";
        let mut module = create_test_module_from_source(source);
        let (changed, remarks) = optimize(&mut module);
        assert!(!changed);
        assert!(remarks.is_empty());
        assert_module_is_equal_to_src(&module, source);
    }

    #[test]
    #[traced_test]
    fn should_not_cache_address_with_single_use() {
        let source = "
            fun void @test(ptr, ptr) {
            bb0(ptr %p, ptr %q):
                i32 %v1 = load %p;
                i32 %v2 = add %v1, %v1;
                store %v1, %q;
                ret;
            }
            ";
        let mut module = create_test_module_from_source(source);
        let (changed, remarks) = optimize(&mut module);
        assert!(!changed);
        assert!(remarks.is_empty());
        assert_module_is_equal_to_src(&module, source);
    }

    #[test]
    #[traced_test]
    fn should_rewire_non_load_user_to_cached_load() {
        let mut module = create_test_module_from_source(
            "
            fun void @test(ptr, ptr) {
            bb0(ptr %p, ptr %q):
                i32 %v1 = load %p;
                i32 %v2 = add %v1, %v1;
                store %v1, %q;
                i64 %v4 = ptrtoint %p;
                ret;
            }
            ",
        );
        let (changed, remarks) = optimize(&mut module);
        assert!(changed);
        assert_module_is_equal_to_src(
            &module,
            "
            fun void @test(ptr, ptr) {
            bb0(ptr %p, ptr %q):
                i32 %cached = load %p;
                i32 %v1 = load %p;
                i32 %v2 = add %v1, %v1;
                store %v1, %q;
                i64 %v4 = ptrtoint %cached;
                ret;
            }
            ",
        );
        assert_eq!(
            remarks,
            vec!["Optimized redundant memory load for: ptr %p".to_string()]
        );
    }

    #[test]
    #[traced_test]
    fn should_expose_pointer_type_mismatch_to_verifier() {
        let mut module = create_test_module_from_source(
            "
            fun void @test(ptr) {
            bb0(ptr %p):
                i32 %v1 = load %p;
                i64 %v4 = ptrtoint %p;
                ret;
            }
            ",
        );
        optimize(&mut module);
        let function = module.find_function_by_name("test").unwrap();
        let v4 = function
            .cfg
            .basic_block(function.cfg.entry_block_ref())
            .instruction_at(2)
            .unwrap();
        assert_eq!(
            Verifier::new(function).verify(),
            vec![VerifyError::ExpectedPointer {
                actual: crate::Type::I32,
                location: User::Instr(v4),
            }]
        );
    }

    #[test]
    #[traced_test]
    fn should_insert_one_cached_load_per_qualifying_load() {
        let mut module = create_test_module_from_source(
            "
            fun i32 @test(ptr) {
            bb0(ptr %p):
                i32 %v1 = load %p;
                i32 %v2 = load %p;
                ret %v2;
            }
            ",
        );
        let (changed, remarks) = optimize(&mut module);
        assert!(changed);
        assert_module_is_equal_to_src(
            &module,
            "
            fun i32 @test(ptr) {
            bb0(ptr %p):
                i32 %cached = load %p;
                i32 %v1 = load %p;
                i32 %cached1 = load %cached;
                i32 %v2 = load %cached;
                ret %v2;
            }
            ",
        );
        let function = module.find_function_by_name("test").unwrap();
        let inserted = function
            .cfg
            .basic_block(function.cfg.entry_block_ref())
            .instructions()
            .filter(|instr_ref| function.cfg.instr(*instr_ref).symbol.starts_with("cached"))
            .count();
        assert_eq!(inserted, 2);
        assert_eq!(
            remarks,
            vec![
                "Optimized redundant memory load for: ptr %p".to_string(),
                "Optimized redundant memory load for: i32 %cached = load %p".to_string(),
            ]
        );

        let mut module = create_test_module_from_source(
            "
            fun i32 @test(ptr) {
            bb0(ptr %p):
                i32 %v1 = load %p;
                i32 %v2 = load %p;
                i32 %v3 = load %p;
                ret %v3;
            }
            ",
        );
        let (changed, remarks) = optimize(&mut module);
        assert!(changed);
        assert_module_is_equal_to_src(
            &module,
            "
            fun i32 @test(ptr) {
            bb0(ptr %p):
                i32 %cached = load %p;
                i32 %v1 = load %p;
                i32 %cached1 = load %cached;
                i32 %v2 = load %cached;
                i32 %cached2 = load %cached1;
                i32 %v3 = load %cached1;
                ret %v3;
            }
            ",
        );
        assert_eq!(
            remarks,
            vec![
                "Optimized redundant memory load for: ptr %p".to_string(),
                "Optimized redundant memory load for: i32 %cached = load %p".to_string(),
                "Optimized redundant memory load for: i32 %cached1 = load %cached".to_string(),
            ]
        );
    }

    #[test]
    #[traced_test]
    fn should_keep_changing_function_when_run_twice() {
        let mut module = create_test_module_from_source(
            "
            fun void @test(ptr, ptr) {
            bb0(ptr %p, ptr %q):
                i32 %v1 = load %p;
                i32 %v2 = add %v1, %v1;
                store %v1, %q;
                i64 %v4 = ptrtoint %p;
                ret;
            }
            ",
        );
        assert!(optimize(&mut module).0);
        let (changed, remarks) = optimize(&mut module);
        assert!(changed);
        assert_eq!(remarks.len(), 2);
        assert_module_is_equal_to_src(
            &module,
            "
            fun void @test(ptr, ptr) {
            bb0(ptr %p, ptr %q):
                i32 %cached1 = load %p;
                i32 %cached = load %p;
                i32 %cached2 = load %cached1;
                i32 %v1 = load %cached1;
                i32 %v2 = add %v1, %v1;
                store %v1, %q;
                i64 %v4 = ptrtoint %cached;
                ret;
            }
            ",
        );
    }

    #[test]
    #[traced_test]
    fn should_insert_cached_load_before_earlier_consumer() {
        let mut module = create_test_module_from_source(
            "
            fun i32 @test(ptr) {
            bb0(ptr %p):
                i64 %a = ptrtoint %p;
                i32 %v1 = load %p;
                ret %v1;
            }
            ",
        );
        let (changed, _) = optimize(&mut module);
        assert!(changed);
        assert_module_is_equal_to_src(
            &module,
            "
            fun i32 @test(ptr) {
            bb0(ptr %p):
                i32 %cached = load %p;
                i64 %a = ptrtoint %cached;
                i32 %v1 = load %p;
                ret %v1;
            }
            ",
        );
    }

    #[test]
    #[traced_test]
    fn should_rewire_terminators_and_other_blocks() {
        let mut module = create_test_module_from_source(
            "
            fun ptr @test(ptr) {
            bb0(ptr %p):
                i32 %v1 = load %p;
                br bb1;
            bb1:
                store 1i32, %p;
                ret %p;
            }
            ",
        );
        let (changed, remarks) = optimize(&mut module);
        assert!(changed);
        assert_eq!(remarks.len(), 1);
        assert_module_is_equal_to_src(
            &module,
            "
            fun ptr @test(ptr) {
            bb0(ptr %p):
                i32 %cached = load %p;
                i32 %v1 = load %p;
                br bb1;
            bb1:
                store 1i32, %cached;
                ret %cached;
            }
            ",
        );
    }

    #[test]
    #[traced_test]
    fn should_ignore_constant_addresses() {
        let source = "
            fun i32 @test() {
            bb0:
                i32 %v1 = load 0i64;
                i32 %v2 = load 0i64;
                ret %v2;
            }
            ";
        let mut module = create_test_module_from_source(source);
        let (changed, remarks) = optimize(&mut module);
        assert!(!changed);
        assert!(remarks.is_empty());
        assert_module_is_equal_to_src(&module, source);
    }

    #[test]
    #[traced_test]
    fn should_not_merge_distinct_addresses() {
        let source = "
            fun i32 @test(ptr, ptr) {
            bb0(ptr %p, ptr %q):
                i32 %v1 = load %p;
                i32 %v2 = load %q;
                i32 %v3 = add %v1, %v2;
                ret %v3;
            }
            ";
        let mut module = create_test_module_from_source(source);
        let (changed, _) = optimize(&mut module);
        assert!(!changed);
        assert_module_is_equal_to_src(&module, source);
    }

    #[test]
    #[traced_test]
    fn should_count_uses_across_blocks() {
        let mut module = create_test_module_from_source(
            "
            fun i32 @test(ptr) {
            bb0(ptr %p):
                br bb1;
            bb1:
                i32 %v1 = load %p;
                br bb2;
            bb2:
                i32 %v2 = load %p;
                ret %v2;
            }
            ",
        );
        let (changed, _) = optimize(&mut module);
        assert!(changed);
        assert_module_is_equal_to_src(
            &module,
            "
            fun i32 @test(ptr) {
            bb0(ptr %p):
                br bb1;
            bb1:
                i32 %cached = load %p;
                i32 %v1 = load %p;
                br bb2;
            bb2:
                i32 %cached1 = load %cached;
                i32 %v2 = load %cached;
                ret %v2;
            }
            ",
        );
        assert!(logs_contain("Caching `i32 %v1 = load %p` in `i32 %cached = load %p`"));
    }

    #[test]
    fn should_keep_use_lists_consistent_after_rewrite() {
        let mut module = create_test_module_from_source(
            "
            fun i32 @test(ptr) {
            bb0(ptr %p):
                i32 %v1 = load %p;
                i32 %v2 = load %p;
                ret %v2;
            }
            ",
        );
        let function_ref = module.functions.keys().next().unwrap();
        let mut pass = RedundantLoadElimPass::new(Box::new(std::io::sink()));
        assert!(pass.run_on_function(&mut module, function_ref));
        let function = &module.functions[function_ref];
        let errors = Verifier::new(function).verify();
        assert!(
            !errors
                .iter()
                .any(|error| matches!(error, VerifyError::UseListMismatch(..))),
            "{errors:?}"
        );
        let p = function
            .cfg
            .basic_block(function.cfg.entry_block_ref())
            .arguments()
            .next()
            .unwrap();
        assert_eq!(function.cfg.num_uses(p.into()), 2);
    }

    struct ClosedRemarks;

    impl Write for ClosedRemarks {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    #[traced_test]
    fn should_keep_optimizing_when_remark_cannot_be_written() {
        let mut module = create_test_module_from_source(
            "
            fun void @test(ptr) {
            bb0(ptr %p):
                i32 %v1 = load %p;
                i64 %v4 = ptrtoint %p;
                ret;
            }
            ",
        );
        let function_ref = module.functions.keys().next().unwrap();
        let mut pass = RedundantLoadElimPass::new(Box::new(ClosedRemarks));
        assert!(pass.run_on_function(&mut module, function_ref));
        assert!(logs_contain("Failed to write optimization remark: closed"));
        assert_module_is_equal_to_src(
            &module,
            "
            fun void @test(ptr) {
            bb0(ptr %p):
                i32 %cached = load %p;
                i32 %v1 = load %p;
                i64 %v4 = ptrtoint %cached;
                ret;
            }
            ",
        );
    }
}
