//! Helper call expansion integration tests.
//!
//! Builds methods containing expansion candidates, runs one expansion kind
//! and checks the resulting block structure, trees and flow graph
//! consistency.
//!
//! Run: cargo test -p jitmorph --test helper_expansion

use jitmorph::config::{JitConfig, OptLevel};
use jitmorph::expand::{
    ClassInitFlag, ExpansionKind, ExpansionStats, HelperExpander, InitFlagKind, LookupRecipeMap,
    MockRuntime, RuntimeLookupRecipe, ThreadStaticBlocksInfo, TlsBaseKind,
};
use jitmorph::flowgraph::validate::check_flow_graph;
use jitmorph::ir::{
    BinOp, BlockId, CallArg, CallTarget, ClassHandle, EhRegionId, ExpansionCandidate,
    HandleKind, Helper, Intrinsic, JumpKind, LocalId, MethodBody, MethodBuilder, MethodHandle,
    NodeId, NodeKind, SigHandle, StringHandle, VarType,
};
use jitmorph::{Compiler, JitError, PhaseStatus};

const CLASS: ClassHandle = ClassHandle(0xC1A55);
const STATICS: u64 = 0x7f00_1000;
const SIG: SigHandle = SigHandle(0x42);
const TEXT: StringHandle = StringHandle(0x57);

fn config() -> JitConfig {
    JitConfig::builder()
        .profile_enabled(true)
        .check_flow_graph(true)
        .build_unchecked()
}

fn minopts() -> JitConfig {
    JitConfig::builder()
        .opt_level(OptLevel::MinOpts)
        .profile_enabled(true)
        .check_flow_graph(true)
        .build_unchecked()
}

fn runtime() -> MockRuntime {
    MockRuntime::new()
        .with_init_flag(
            CLASS,
            ClassInitFlag {
                address: 0x7f00_0000,
                offset: 0x10,
                kind: InitFlagKind::InitializedBit,
            },
        )
        .with_static_base(CLASS, true, STATICS)
        .with_thread_statics(ThreadStaticBlocksInfo {
            base: TlsBaseKind::ThreadPointerRegister { data_offset: 0x80 },
            offset_of_max_blocks: 0x10,
            offset_of_blocks: 0x18,
        })
}

fn recipes() -> LookupRecipeMap {
    let mut map = LookupRecipeMap::new();
    map.insert(SIG, RuntimeLookupRecipe::new(vec![0x18, 0x20]).with_size_check(0x10));
    map
}

fn expand(
    body: &mut MethodBody,
    config: &JitConfig,
    runtime: &MockRuntime,
    kind: ExpansionKind,
) -> Result<(PhaseStatus, ExpansionStats), JitError> {
    let recipes = recipes();
    let mut expander = HelperExpander::new(body, config, runtime, &recipes);
    let status = expander.run(kind)?;
    Ok((status, expander.stats()))
}

fn roots(body: &MethodBody, block: BlockId) -> Vec<NodeId> {
    body.block(block)
        .statements
        .iter()
        .map(|s| body.stmt(*s).root)
        .collect()
}

fn last_root_kind(body: &MethodBody, block: BlockId) -> NodeKind {
    let root = *roots(body, block).last().expect("block has statements");
    body.node(root).kind.clone()
}

fn cond_op(body: &MethodBody, block: BlockId) -> BinOp {
    match last_root_kind(body, block) {
        NodeKind::JTrue { cond } => match body.node(cond).kind {
            NodeKind::Binary { op, .. } => op,
            ref other => panic!("JTRUE over {:?}", other),
        },
        other => panic!("expected JTRUE, found {:?}", other),
    }
}

fn count_calls(body: &MethodBody) -> usize {
    body.layout
        .iter()
        .flat_map(|b| body.block(*b).statements.clone())
        .map(|s| body.calls_in_stmt(s).len())
        .sum()
}

// ============================================================================
// Method shapes
// ============================================================================

/// `V = CALL helper(class); return V`
fn static_base_method(helper: Helper) -> (MethodBody, LocalId, NodeId) {
    let mut builder = MethodBuilder::new(MethodHandle(1));
    let b = builder.body();
    let v = b.locals.new_local(VarType::NativeInt);
    let class = b.new_icon_handle(CLASS.0 as i64, HandleKind::Class(CLASS));
    let call = b.new_candidate_call(
        CallTarget::Helper(helper),
        vec![CallArg::regular(class)],
        VarType::NativeInt,
        ExpansionCandidate::StaticInit { class: CLASS },
    );
    let store = b.new_store_lcl_var(v, call);
    builder.add_stmt(store);
    let read = builder.body().new_lcl_var(v);
    let ret = builder.body().new_return(Some(read));
    builder.add_stmt(ret);
    (builder.finish(), v, call)
}

/// `V = CALL RUNTIMEHANDLE_METHOD(ctx, sig); return V`
fn runtime_lookup_method() -> (MethodBody, LocalId, NodeId) {
    let mut builder = MethodBuilder::new(MethodHandle(2));
    let b = builder.body();
    let ctx = b.locals.new_local(VarType::NativeInt);
    let v = b.locals.new_local(VarType::NativeInt);
    let ctx_read = b.new_lcl_var(ctx);
    let sig = b.new_icon_handle(SIG.0 as i64, HandleKind::Signature(SIG));
    let call = b.new_candidate_call(
        CallTarget::Helper(Helper::RuntimeHandleMethod),
        vec![CallArg::regular(ctx_read), CallArg::regular(sig)],
        VarType::NativeInt,
        ExpansionCandidate::RuntimeLookup,
    );
    let store = b.new_store_lcl_var(v, call);
    builder.add_stmt(store);
    let read = builder.body().new_lcl_var(v);
    let ret = builder.body().new_return(Some(read));
    builder.add_stmt(ret);
    (builder.finish(), v, call)
}

/// The thread static call node for type index `index`.
fn tls_call(body: &mut MethodBody, index: i64) -> NodeId {
    let type_index = body.new_icon(index, VarType::Int);
    body.new_candidate_call(
        CallTarget::Helper(Helper::GetThreadStaticBase),
        vec![CallArg::regular(type_index)],
        VarType::NativeInt,
        ExpansionCandidate::ThreadStatic,
    )
}

/// `n = CALL ReadUtf8(TEXT + 12, len, dst, dstLen); return n`
fn read_utf8_method(src_len: i64) -> (MethodBody, NodeId, LocalId) {
    read_utf8_method_at(12, src_len)
}

/// `n = CALL ReadUtf8(TEXT + byte_offset, len, dst, dstLen); return n`
fn read_utf8_method_at(byte_offset: i64, src_len: i64) -> (MethodBody, NodeId, LocalId) {
    let mut builder = MethodBuilder::new(MethodHandle(4));
    let b = builder.body();
    let dst = b.locals.new_local(VarType::NativeInt);
    let dst_len = b.locals.new_local(VarType::Int);
    let n = b.locals.new_local(VarType::Int);
    let src = b.new_icon_handle(0x5000, HandleKind::String(TEXT));
    let offset = b.new_icon(byte_offset, VarType::NativeInt);
    let chars = b.new_oper(BinOp::Add, VarType::NativeInt, src, offset);
    let len = b.new_icon(src_len, VarType::Int);
    let dst_read = b.new_lcl_var(dst);
    let dst_len_read = b.new_lcl_var(dst_len);
    let call = b.new_candidate_call(
        CallTarget::Intrinsic(Intrinsic::ReadUtf8),
        vec![
            CallArg::regular(chars),
            CallArg::regular(len),
            CallArg::regular(dst_read),
            CallArg::regular(dst_len_read),
        ],
        VarType::Int,
        ExpansionCandidate::ReadUtf8,
    );
    let store = b.new_store_lcl_var(n, call);
    builder.add_stmt(store);
    let read = builder.body().new_lcl_var(n);
    let ret = builder.body().new_return(Some(read));
    builder.add_stmt(ret);
    (builder.finish(), call, dst)
}

// ============================================================================
// Static init
// ============================================================================

#[test]
fn test_static_base_expands_into_init_check() {
    let (mut body, v, call) = static_base_method(Helper::GetGcStaticBase);
    let config = config();

    let (status, stats) = expand(&mut body, &config, &runtime(), ExpansionKind::StaticInit).unwrap();

    assert_eq!(status, PhaseStatus::ModifiedEverything);
    assert_eq!(stats.static_init, 1);
    assert_eq!(body.layout.len(), 4);
    let (prev, is_inited, helper_call, tail) =
        (body.layout[0], body.layout[1], body.layout[2], body.layout[3]);

    assert_eq!(body.block(prev).jump, JumpKind::Always(is_inited));
    assert_eq!(cond_op(&body, is_inited), BinOp::Eq);
    match body.block(is_inited).jump {
        JumpKind::Cond {
            taken,
            not_taken,
            taken_likelihood,
        } => {
            assert_eq!(taken, tail);
            assert_eq!(not_taken, helper_call);
            assert_eq!(taken_likelihood, 1.0);
        }
        ref other => panic!("expected cond jump, found {:?}", other),
    }

    // The helper only runs for its side effect.
    assert_eq!(roots(&body, helper_call), vec![call]);
    assert!(body.block(helper_call).is_run_rarely());
    assert!(body.node(call).as_call().unwrap().candidate.is_none());

    // The tail reads the statics base as a constant.
    let first = roots(&body, tail)[0];
    match body.node(first).kind {
        NodeKind::StoreLclVar { lcl, value } => {
            assert_eq!(lcl, v);
            assert_eq!(body.node(value).handle(), Some(HandleKind::StaticBase(CLASS)));
            assert_eq!(body.node(value).int_con(), Some(STATICS as i64));
        }
        ref other => panic!("expected store, found {:?}", other),
    }

    check_flow_graph(&body, true).unwrap();
}

#[test]
fn test_init_class_without_use_drops_statement() {
    let mut builder = MethodBuilder::new(MethodHandle(1));
    let b = builder.body();
    let class = b.new_icon_handle(CLASS.0 as i64, HandleKind::Class(CLASS));
    let call = b.new_candidate_call(
        CallTarget::Helper(Helper::InitClass),
        vec![CallArg::regular(class)],
        VarType::Void,
        ExpansionCandidate::StaticInit { class: CLASS },
    );
    builder.add_stmt(call);
    let ret = builder.body().new_return(None);
    builder.add_stmt(ret);
    let mut body = builder.finish();
    let runtime = MockRuntime::new().with_init_flag(
        CLASS,
        ClassInitFlag {
            address: 0x7f00_0000,
            offset: 0,
            kind: InitFlagKind::ZeroWhenInitialized,
        },
    );

    let (_, stats) = expand(&mut body, &config(), &runtime, ExpansionKind::StaticInit).unwrap();

    assert_eq!(stats.static_init, 1);
    let tail = *body.layout.last().unwrap();
    assert_eq!(roots(&body, tail).len(), 1);
    assert!(matches!(last_root_kind(&body, tail), NodeKind::Return { .. }));
    assert_eq!(count_calls(&body), 1);
    check_flow_graph(&body, true).unwrap();
}

#[test]
fn test_static_init_declined_without_static_base() {
    let (mut body, _, call) = static_base_method(Helper::GetNonGcStaticBase);

    let (status, stats) = expand(&mut body, &config(), &runtime(), ExpansionKind::StaticInit).unwrap();

    assert_eq!(status, PhaseStatus::ModifiedNothing);
    assert_eq!(stats.declined, 1);
    assert_eq!(stats.blocks_added, 0);
    assert_eq!(body.layout.len(), 1);
    assert!(body.node(call).as_call().unwrap().candidate.is_some());
}

#[test]
fn test_static_init_skips_rarely_run_blocks() {
    let (mut body, _, _) = static_base_method(Helper::GetGcStaticBase);
    let entry = body.layout[0];
    body.block_mut(entry).set_run_rarely();

    let (status, _) = expand(&mut body, &config(), &runtime(), ExpansionKind::StaticInit).unwrap();

    assert_eq!(status, PhaseStatus::ModifiedNothing);
    assert_eq!(body.layout.len(), 1);
}

#[test]
fn test_static_init_needs_optimizations() {
    let (mut body, _, _) = static_base_method(Helper::GetGcStaticBase);

    let (status, _) = expand(&mut body, &minopts(), &runtime(), ExpansionKind::StaticInit).unwrap();

    assert_eq!(status, PhaseStatus::ModifiedNothing);
    assert_eq!(body.layout.len(), 1);
}

#[test]
fn test_expansion_without_candidates_modifies_nothing() {
    let mut builder = MethodBuilder::new(MethodHandle(9));
    let zero = builder.body().new_icon(0, VarType::Int);
    let ret = builder.body().new_return(Some(zero));
    builder.add_stmt(ret);
    let mut body = builder.finish();

    for kind in ExpansionKind::ALL {
        let (status, stats) = expand(&mut body, &config(), &runtime(), kind).unwrap();
        assert_eq!(status, PhaseStatus::ModifiedNothing);
        assert_eq!(stats, ExpansionStats::default());
    }
    assert_eq!(body.layout.len(), 1);
}

#[test]
fn test_expansion_is_not_repeated() {
    let (mut body, _, _) = static_base_method(Helper::GetGcStaticBase);
    let config = config();
    let runtime = runtime();

    expand(&mut body, &config, &runtime, ExpansionKind::StaticInit).unwrap();
    let (status, stats) = expand(&mut body, &config, &runtime, ExpansionKind::StaticInit).unwrap();

    assert_eq!(status, PhaseStatus::ModifiedNothing);
    assert_eq!(stats.expanded(), 0);
    assert_eq!(body.layout.len(), 4);
}

#[test]
fn test_new_blocks_stay_in_eh_region_and_loop() {
    let (mut body, _, _) = static_base_method(Helper::GetGcStaticBase);
    let entry = body.layout[0];
    body.block_mut(entry).eh_region = Some(EhRegionId(3));
    body.block_mut(entry).loop_num = Some(jitmorph::ir::LoopId(1));

    expand(&mut body, &config(), &runtime(), ExpansionKind::StaticInit).unwrap();

    assert_eq!(body.layout.len(), 4);
    for &block in &body.layout {
        assert_eq!(body.block(block).eh_region, Some(EhRegionId(3)));
        assert_eq!(body.block(block).loop_num, Some(jitmorph::ir::LoopId(1)));
    }
}

// ============================================================================
// Runtime lookup
// ============================================================================

#[test]
fn test_runtime_lookup_with_size_check() {
    let (mut body, v, call) = runtime_lookup_method();

    let (_, stats) = expand(&mut body, &config(), &runtime(), ExpansionKind::RuntimeLookup).unwrap();

    assert_eq!(stats.runtime_lookup, 1);
    assert_eq!(body.layout.len(), 6);
    let [_, size_check, null_check, fast_path, fallback, tail] = body.layout[..] else {
        panic!("unexpected layout");
    };

    assert_eq!(cond_op(&body, size_check), BinOp::Le);
    assert_eq!(cond_op(&body, null_check), BinOp::Eq);
    assert_eq!(body.block(fast_path).jump, JumpKind::Always(tail));
    assert_eq!(body.block(fallback).jump, JumpKind::Always(tail));

    match last_root_kind(&body, fallback) {
        NodeKind::StoreLclVar { value, .. } => assert_eq!(value, call),
        other => panic!("expected fallback store, found {:?}", other),
    }

    // The original store now copies the lookup result.
    match body.node(roots(&body, tail)[0]).kind {
        NodeKind::StoreLclVar { lcl, value } => {
            assert_eq!(lcl, v);
            assert!(matches!(body.node(value).kind, NodeKind::LclVar { .. }));
        }
        ref other => panic!("expected store, found {:?}", other),
    }

    // 80% pass the size check, 80% of those hit a filled slot.
    let weight = |b: BlockId| body.block(b).weight.0;
    assert!((weight(null_check) - 80.0).abs() < 1e-6);
    assert!((weight(fast_path) - 64.0).abs() < 1e-6);
    assert!((weight(fallback) - 36.0).abs() < 1e-6);
    check_flow_graph(&body, true).unwrap();
}

#[test]
fn test_runtime_lookup_at_minopts_writes_destination_directly() {
    let (mut body, v, _) = runtime_lookup_method();

    let (status, _) = expand(&mut body, &minopts(), &runtime(), ExpansionKind::RuntimeLookup).unwrap();

    assert!(status.is_modified());
    let fast_path = body.layout[3];
    let tail = body.layout[5];
    match last_root_kind(&body, fast_path) {
        NodeKind::StoreLclVar { lcl, .. } => assert_eq!(lcl, v),
        other => panic!("expected store, found {:?}", other),
    }
    assert_eq!(roots(&body, tail).len(), 1);
    assert!(matches!(last_root_kind(&body, tail), NodeKind::Return { .. }));
    check_flow_graph(&body, true).unwrap();
}

#[test]
fn test_runtime_lookup_without_size_check() {
    let (mut body, _, _) = runtime_lookup_method();
    let config = config();
    let runtime = runtime();
    let mut recipes = LookupRecipeMap::new();
    recipes.insert(SIG, RuntimeLookupRecipe::new(vec![0x18]));

    let mut expander = HelperExpander::new(&mut body, &config, &runtime, &recipes);
    expander.run(ExpansionKind::RuntimeLookup).unwrap();

    assert_eq!(body.layout.len(), 5);
    check_flow_graph(&body, true).unwrap();
}

#[test]
fn test_runtime_lookup_without_recipe_fails() {
    let (mut body, _, _) = runtime_lookup_method();
    let config = config();
    let runtime = runtime();
    let recipes = LookupRecipeMap::new();

    let mut expander = HelperExpander::new(&mut body, &config, &runtime, &recipes);
    let err = expander.run(ExpansionKind::RuntimeLookup).unwrap_err();

    assert_eq!(err, JitError::MissingLookupRecipe { signature: SIG.0 });
}

// ============================================================================
// Thread statics
// ============================================================================

#[test]
fn test_thread_static_access_expands() {
    let mut builder = MethodBuilder::new(MethodHandle(3));
    let call = tls_call(builder.body(), 3);
    let ret = builder.body().new_return(Some(call));
    builder.add_stmt(ret);
    let mut body = builder.finish();

    let (_, stats) = expand(&mut body, &config(), &runtime(), ExpansionKind::ThreadLocal).unwrap();

    assert_eq!(stats.thread_local, 1);
    assert_eq!(body.layout.len(), 6);
    let [_, max_cond, null_cond, fast_path, fallback, tail] = body.layout[..] else {
        panic!("unexpected layout");
    };
    assert_eq!(cond_op(&body, max_cond), BinOp::Le);
    assert_eq!(cond_op(&body, null_cond), BinOp::Eq);
    assert_eq!(body.block(fast_path).jump, JumpKind::Always(tail));
    assert!(body.block(fallback).is_run_rarely());

    match last_root_kind(&body, tail) {
        NodeKind::Return { value: Some(value) } => {
            assert!(matches!(body.node(value).kind, NodeKind::LclVar { .. }));
        }
        other => panic!("expected return, found {:?}", other),
    }
    check_flow_graph(&body, true).unwrap();
}

#[test]
fn test_thread_static_operand_spills_earlier_siblings() {
    let mut builder = MethodBuilder::new(MethodHandle(3));
    let b = builder.body();
    let before = b.new_call(CallTarget::User(MethodHandle(0x77)), Vec::new(), VarType::NativeInt);
    let call = tls_call(b, 1);
    let sum = b.new_oper(BinOp::Add, VarType::NativeInt, before, call);
    let ret = b.new_return(Some(sum));
    builder.add_stmt(ret);
    let mut body = builder.finish();

    expand(&mut body, &config(), &runtime(), ExpansionKind::ThreadLocal).unwrap();

    let prev = body.layout[0];
    let spilled = roots(&body, prev);
    assert_eq!(spilled.len(), 1);
    match body.node(spilled[0]).kind {
        NodeKind::StoreLclVar { value, .. } => assert_eq!(value, before),
        ref other => panic!("expected spill, found {:?}", other),
    }
    check_flow_graph(&body, true).unwrap();
}

#[test]
fn test_two_thread_static_accesses_in_one_block() {
    let mut builder = MethodBuilder::new(MethodHandle(3));
    let a = builder.body().locals.new_local(VarType::NativeInt);
    let first = tls_call(builder.body(), 1);
    let store = builder.body().new_store_lcl_var(a, first);
    builder.add_stmt(store);
    let second = tls_call(builder.body(), 2);
    let ret = builder.body().new_return(Some(second));
    builder.add_stmt(ret);
    let mut body = builder.finish();

    let (_, stats) = expand(&mut body, &config(), &runtime(), ExpansionKind::ThreadLocal).unwrap();

    assert_eq!(stats.thread_local, 2);
    assert_eq!(stats.blocks_added, 10);
    assert_eq!(body.layout.len(), 11);
    check_flow_graph(&body, true).unwrap();
}

#[test]
fn test_thread_static_declined_without_layout() {
    let mut builder = MethodBuilder::new(MethodHandle(3));
    let call = tls_call(builder.body(), 3);
    let ret = builder.body().new_return(Some(call));
    builder.add_stmt(ret);
    let mut body = builder.finish();

    let (status, stats) =
        expand(&mut body, &config(), &MockRuntime::new(), ExpansionKind::ThreadLocal).unwrap();

    assert_eq!(status, PhaseStatus::ModifiedNothing);
    assert_eq!(stats.declined, 1);
}

// ============================================================================
// UTF-8 literal reads
// ============================================================================

#[test]
fn test_short_literal_read_is_unrolled() {
    let (mut body, _, dst) = read_utf8_method(13);
    let runtime = MockRuntime::new().with_string(TEXT, "Hello, World!");

    let (_, stats) = expand(&mut body, &config(), &runtime, ExpansionKind::ReadUtf8).unwrap();

    assert_eq!(stats.read_utf8, 1);
    assert_eq!(body.layout.len(), 4);
    let [_, length_check, fast_path, tail] = body.layout[..] else {
        panic!("unexpected layout");
    };
    assert_eq!(cond_op(&body, length_check), BinOp::Lt);
    match body.block(length_check).jump {
        JumpKind::Cond { taken, not_taken, .. } => {
            assert_eq!(taken, tail);
            assert_eq!(not_taken, fast_path);
        }
        ref other => panic!("expected cond jump, found {:?}", other),
    }

    // The result starts out as -1.
    let checks = roots(&body, length_check);
    let NodeKind::StoreLclVar { lcl: result, value } = body.node(checks[0]).kind else {
        panic!("expected result init, found {:?}", body.node(checks[0]).kind);
    };
    assert_eq!(body.node(value).int_con(), Some(-1));

    // Two overlapping 8-byte stores at 0 and 5, then the byte count.
    let stores = roots(&body, fast_path);
    assert_eq!(stores.len(), 3);
    let expected = [(0, *b"Hello, W"), (5, *b", World!")];
    for (&root, (offset, bytes)) in stores.iter().zip(expected) {
        let node = body.node(root);
        assert_eq!(node.ty, VarType::Long);
        let NodeKind::StoreInd { addr, value } = node.kind else {
            panic!("expected STOREIND, found {:?}", node.kind);
        };
        assert_eq!(body.node(value).int_con(), Some(i64::from_le_bytes(bytes)));
        match body.node(addr).kind {
            NodeKind::LclVar { lcl } => {
                assert_eq!(lcl, dst);
                assert_eq!(offset, 0);
            }
            NodeKind::Binary { op1, op2, .. } => {
                assert_eq!(body.node(op1).kind, NodeKind::LclVar { lcl: dst });
                assert_eq!(body.node(op2).int_con(), Some(offset));
            }
            ref other => panic!("unexpected address {:?}", other),
        }
    }
    match body.node(stores[2]).kind {
        NodeKind::StoreLclVar { lcl, value } => {
            assert_eq!(lcl, result);
            assert_eq!(body.node(value).int_con(), Some(13));
        }
        ref other => panic!("expected result store, found {:?}", other),
    }

    // The intrinsic is gone.
    assert_eq!(count_calls(&body), 0);
    check_flow_graph(&body, true).unwrap();
}

#[test]
fn test_literal_read_from_inner_character() {
    // Four bytes past the first character: "llo, World!".
    let (mut body, _, _) = read_utf8_method_at(16, 11);
    let runtime = MockRuntime::new().with_string(TEXT, "Hello, World!");

    let (_, stats) = expand(&mut body, &config(), &runtime, ExpansionKind::ReadUtf8).unwrap();

    assert_eq!(stats.read_utf8, 1);
    let stores = roots(&body, body.layout[2]);
    let values: Vec<Option<i64>> = stores[..2]
        .iter()
        .map(|&root| match body.node(root).kind {
            NodeKind::StoreInd { value, .. } => body.node(value).int_con(),
            ref other => panic!("expected STOREIND, found {:?}", other),
        })
        .collect();
    assert_eq!(
        values,
        vec![
            Some(i64::from_le_bytes(*b"llo, Wor")),
            Some(i64::from_le_bytes(*b", World!")),
        ]
    );
}

#[test]
fn test_literal_read_outside_characters_is_declined() {
    let runtime = MockRuntime::new().with_string(TEXT, "Hello, World!");
    // Inside the object header, between two characters, and past the end.
    for (byte_offset, len) in [(8, 4), (13, 4), (20, 13)] {
        let (mut body, call, _) = read_utf8_method_at(byte_offset, len);

        let (status, stats) =
            expand(&mut body, &config(), &runtime, ExpansionKind::ReadUtf8).unwrap();

        assert_eq!(status, PhaseStatus::ModifiedNothing, "offset {}", byte_offset);
        assert_eq!(stats.declined, 1);
        assert!(body.node(call).as_call().unwrap().candidate.is_some());
    }
}

#[test]
fn test_long_literal_read_is_declined() {
    let text = "x".repeat(300);
    let (mut body, call, _) = read_utf8_method(300);
    let runtime = MockRuntime::new().with_string(TEXT, &text);

    let (status, stats) = expand(&mut body, &config(), &runtime, ExpansionKind::ReadUtf8).unwrap();

    assert_eq!(status, PhaseStatus::ModifiedNothing);
    assert_eq!(stats.declined, 1);
    assert_eq!(body.layout.len(), 1);
    assert!(body.node(call).as_call().unwrap().candidate.is_some());
}

#[test]
fn test_literal_over_unroll_limit_is_declined() {
    let text = "\u{00e9}".repeat(100);
    let (mut body, _, _) = read_utf8_method(100);
    let runtime = MockRuntime::new().with_string(TEXT, &text);

    // 100 characters, 200 UTF-8 bytes.
    let (status, stats) = expand(&mut body, &config(), &runtime, ExpansionKind::ReadUtf8).unwrap();

    assert_eq!(status, PhaseStatus::ModifiedNothing);
    assert_eq!(stats.declined, 1);
}

#[test]
fn test_unpaired_surrogate_is_declined() {
    let (mut body, _, _) = read_utf8_method(2);
    let runtime = MockRuntime::new().with_utf16(TEXT, vec![0x0041, 0xD800]);

    let (status, stats) = expand(&mut body, &config(), &runtime, ExpansionKind::ReadUtf8).unwrap();

    assert_eq!(status, PhaseStatus::ModifiedNothing);
    assert_eq!(stats.declined, 1);
    assert_eq!(body.layout.len(), 1);
}

#[test]
fn test_wide_literal_uses_vector_stores() {
    let text = "abcdefghijklmnopqrstuvwxyz0123456789";
    let (mut body, _, _) = read_utf8_method(text.len() as i64);
    let runtime = MockRuntime::new().with_string(TEXT, text);

    expand(&mut body, &config(), &runtime, ExpansionKind::ReadUtf8).unwrap();

    let fast_path = body.layout[2];
    let stores = roots(&body, fast_path);
    // 36 bytes with 16-byte stores at 0, 16 and 20.
    assert_eq!(stores.len(), 4);
    for &root in &stores[..3] {
        assert_eq!(body.node(root).ty, VarType::Simd16);
    }
}

// ============================================================================
// Whole pipeline
// ============================================================================

#[test]
fn test_compiler_runs_all_phases() {
    let mut builder = MethodBuilder::new(MethodHandle(5));
    let b = builder.body();
    let v = b.locals.new_local(VarType::NativeInt);
    let addr = b.new_lcl_addr(v, 0);
    let call = tls_call(b, 4);
    let store = b.new_store_ind(VarType::NativeInt, addr, call);
    builder.add_stmt(store);
    let read = builder.body().new_lcl_var(v);
    let ret = builder.body().new_return(Some(read));
    builder.add_stmt(ret);
    let body = builder.finish();

    let mut compiler = Compiler::new(body, config(), Box::new(runtime()));
    let status = compiler.compile().unwrap();

    assert!(status.is_modified());
    let stats = compiler.stats();
    assert_eq!(stats.local_morph.eliminated_indirs, 1);
    assert_eq!(stats.expansion.thread_local, 1);
    assert!(!compiler.body().locals.get(v).is_address_exposed());
    assert_eq!(compiler.body().layout.len(), 6);
}
