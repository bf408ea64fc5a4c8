//! Property tests over randomly built methods.
//!
//! Run: cargo test -p jitmorph --test property_tests

use proptest::prelude::*;

use jitmorph::config::{JitConfig, LocalMorphConfig};
use jitmorph::expand::{
    ClassInitFlag, InitFlagKind, LookupRecipeMap, MockRuntime, RuntimeLookupRecipe,
    ThreadStaticBlocksInfo, TlsBaseKind,
};
use jitmorph::flowgraph::validate::{check_flow_graph, check_profile};
use jitmorph::ir::{
    BinOp, CallArg, CallTarget, ClassHandle, ClassLayout, ExpansionCandidate, HandleKind, Helper,
    Intrinsic, JumpKind, LocalId, MethodBody, MethodBuilder, MethodHandle, NodeId, SigHandle,
    StringHandle, VarType,
};
use jitmorph::{local_address_phase, Compiler};

// ============================================================================
// Local address analysis
// ============================================================================

/// Slots of the generated methods: int, long, double, 16-byte struct.
const SLOT_COUNT: usize = 4;

#[derive(Debug, Clone)]
enum Access {
    Load { slot: usize, ty: VarType, offset: u32 },
    Store { slot: usize, ty: VarType, offset: u32 },
    Escape { slot: usize },
    Read { slot: usize },
}

fn access_type() -> impl Strategy<Value = VarType> {
    prop_oneof![
        Just(VarType::Int),
        Just(VarType::Long),
        Just(VarType::UByte),
        Just(VarType::Float),
    ]
}

fn access_strategy() -> impl Strategy<Value = Access> {
    prop_oneof![
        (0..SLOT_COUNT, access_type(), 0u32..20)
            .prop_map(|(slot, ty, offset)| Access::Load { slot, ty, offset }),
        (0..SLOT_COUNT, access_type(), 0u32..20)
            .prop_map(|(slot, ty, offset)| Access::Store { slot, ty, offset }),
        (0..SLOT_COUNT).prop_map(|slot| Access::Escape { slot }),
        (0..SLOT_COUNT).prop_map(|slot| Access::Read { slot }),
    ]
}

fn sink(body: &mut MethodBody, arg: NodeId) -> NodeId {
    body.new_call(
        CallTarget::User(MethodHandle(0x51)),
        vec![CallArg::regular(arg)],
        VarType::Void,
    )
}

fn slot_addr(body: &mut MethodBody, lcl: LocalId, offset: u32) -> NodeId {
    let base = body.new_lcl_addr(lcl, 0);
    if offset == 0 {
        base
    } else {
        body.new_field_addr(base, offset)
    }
}

fn build_accesses(accesses: &[Access]) -> (MethodBody, Vec<LocalId>) {
    let mut builder = MethodBuilder::new(MethodHandle(0x10));
    let b = builder.body();
    let layout = b.add_layout(ClassLayout::new("Pair", 16));
    let slots = vec![
        b.locals.new_local(VarType::Int),
        b.locals.new_local(VarType::Long),
        b.locals.new_local(VarType::Double),
        b.new_struct_local(layout),
    ];

    for access in accesses {
        let b = builder.body();
        let root = match *access {
            Access::Load { slot, ty, offset } => {
                let addr = slot_addr(b, slots[slot], offset);
                let load = b.new_ind(ty, addr);
                sink(b, load)
            }
            Access::Store { slot, ty, offset } => {
                let addr = slot_addr(b, slots[slot], offset);
                let zero = b.new_icon(0, VarType::Int);
                b.new_store_ind(ty, addr, zero)
            }
            Access::Escape { slot } => {
                let addr = b.new_lcl_addr(slots[slot], 0);
                sink(b, addr)
            }
            Access::Read { slot } => {
                let read = b.new_lcl_var(slots[slot]);
                sink(b, read)
            }
        };
        builder.add_stmt(root);
    }
    (builder.finish(), slots)
}

/// Whether some access forces `slot` (of `size` bytes) into memory.
fn must_expose(accesses: &[Access], slot: usize, size: u32) -> bool {
    accesses.iter().any(|a| match *a {
        Access::Escape { slot: s } => s == slot,
        Access::Load { slot: s, ty, offset } | Access::Store { slot: s, ty, offset } => {
            s == slot && offset + ty.size().unwrap_or(0) > size
        }
        Access::Read { .. } => false,
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_exposure_is_monotonic_and_exact(
        accesses in prop::collection::vec(access_strategy(), 0..12),
        pre_exposed in prop::collection::vec(any::<bool>(), SLOT_COUNT),
    ) {
        let (mut body, slots) = build_accesses(&accesses);
        for (i, &lcl) in slots.iter().enumerate() {
            if pre_exposed[i] {
                body.locals.set_address_exposed(lcl);
            }
        }

        let config = LocalMorphConfig::default();
        local_address_phase(&mut body, &config).unwrap();

        for (i, &lcl) in slots.iter().enumerate() {
            let size = body.locals.get(lcl).size;
            let expected = pre_exposed[i] || must_expose(&accesses, i, size);
            prop_assert_eq!(body.locals.get(lcl).is_address_exposed(), expected);
        }

        // A second run finds nothing new to expose.
        let (_, stats) = local_address_phase(&mut body, &config).unwrap();
        prop_assert_eq!(stats.exposed_locals, 0);
    }
}

// ============================================================================
// Helper expansion
// ============================================================================

const CLASS: ClassHandle = ClassHandle(0xC1);
const SIG: SigHandle = SigHandle(0x5);
const TEXT: StringHandle = StringHandle(0x7);

#[derive(Debug, Clone, Copy)]
enum Candidate {
    StaticInit,
    RuntimeLookup,
    ThreadLocal,
    ReadUtf8,
    Plain,
}

fn candidate_strategy() -> impl Strategy<Value = (Candidate, bool)> {
    let kind = prop_oneof![
        Just(Candidate::StaticInit),
        Just(Candidate::RuntimeLookup),
        Just(Candidate::ThreadLocal),
        Just(Candidate::ReadUtf8),
        Just(Candidate::Plain),
    ];
    (kind, any::<bool>())
}

fn candidate_call(body: &mut MethodBody, candidate: Candidate) -> NodeId {
    match candidate {
        Candidate::StaticInit => {
            let class = body.new_icon_handle(CLASS.0 as i64, HandleKind::Class(CLASS));
            body.new_candidate_call(
                CallTarget::Helper(Helper::GetNonGcStaticBase),
                vec![CallArg::regular(class)],
                VarType::NativeInt,
                ExpansionCandidate::StaticInit { class: CLASS },
            )
        }
        Candidate::RuntimeLookup => {
            let ctx = body.locals.new_local(VarType::NativeInt);
            let ctx_read = body.new_lcl_var(ctx);
            let sig = body.new_icon_handle(SIG.0 as i64, HandleKind::Signature(SIG));
            body.new_candidate_call(
                CallTarget::Helper(Helper::RuntimeHandleClass),
                vec![CallArg::regular(ctx_read), CallArg::regular(sig)],
                VarType::NativeInt,
                ExpansionCandidate::RuntimeLookup,
            )
        }
        Candidate::ThreadLocal => {
            let index = body.new_icon(2, VarType::Int);
            body.new_candidate_call(
                CallTarget::Helper(Helper::GetThreadStaticBaseGc),
                vec![CallArg::regular(index)],
                VarType::NativeInt,
                ExpansionCandidate::ThreadStatic,
            )
        }
        Candidate::ReadUtf8 => {
            let dst = body.locals.new_local(VarType::NativeInt);
            let dst_len = body.locals.new_local(VarType::Int);
            let src = body.new_icon_handle(0x9000, HandleKind::String(TEXT));
            let len = body.new_icon(5, VarType::Int);
            let dst_read = body.new_lcl_var(dst);
            let dst_len_read = body.new_lcl_var(dst_len);
            body.new_candidate_call(
                CallTarget::Intrinsic(Intrinsic::ReadUtf8),
                vec![
                    CallArg::regular(src),
                    CallArg::regular(len),
                    CallArg::regular(dst_read),
                    CallArg::regular(dst_len_read),
                ],
                VarType::Int,
                ExpansionCandidate::ReadUtf8,
            )
        }
        Candidate::Plain => body.new_call(
            CallTarget::User(MethodHandle(0x99)),
            Vec::new(),
            VarType::NativeInt,
        ),
    }
}

fn build_candidates(blocks: &[Vec<(Candidate, bool)>]) -> MethodBody {
    let mut builder = MethodBuilder::new(MethodHandle(0x20));
    let mut ids = vec![builder.entry()];
    for _ in 1..blocks.len() {
        ids.push(builder.new_block());
    }

    for (i, stmts) in blocks.iter().enumerate() {
        builder.switch_to(ids[i]);
        for &(candidate, nested) in stmts {
            let b = builder.body();
            let dest = b.locals.new_local(VarType::NativeInt);
            let call = candidate_call(b, candidate);
            let value = if nested {
                let first = b.new_call(
                    CallTarget::User(MethodHandle(0x98)),
                    Vec::new(),
                    VarType::NativeInt,
                );
                b.new_oper(BinOp::Add, VarType::NativeInt, first, call)
            } else {
                call
            };
            let store = b.new_store_lcl_var(dest, value);
            builder.add_stmt(store);
        }
        if let Some(&next) = ids.get(i + 1) {
            builder.set_jump(ids[i], JumpKind::Always(next));
        }
    }
    builder.finish()
}

fn expansion_runtime() -> MockRuntime {
    MockRuntime::new()
        .with_init_flag(
            CLASS,
            ClassInitFlag {
                address: 0x1000,
                offset: 8,
                kind: InitFlagKind::InitializedBit,
            },
        )
        .with_static_base(CLASS, false, 0x2000)
        .with_thread_statics(ThreadStaticBlocksInfo {
            base: TlsBaseKind::SegmentOffset {
                tls_array_offset: 0x58,
                tls_index: 3,
                data_offset: 0x10,
            },
            offset_of_max_blocks: 0x20,
            offset_of_blocks: 0x28,
        })
        .with_string(TEXT, "hello")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_expansion_keeps_flow_graph_consistent(
        blocks in prop::collection::vec(
            prop::collection::vec(candidate_strategy(), 0..4),
            1..4,
        ),
        profile in any::<bool>(),
    ) {
        let body = build_candidates(&blocks);
        let expected = blocks
            .iter()
            .flatten()
            .filter(|(c, _)| !matches!(c, Candidate::Plain))
            .count();

        let config = JitConfig::builder()
            .profile_enabled(profile)
            .check_flow_graph(true)
            .build_unchecked();
        let mut recipes = LookupRecipeMap::new();
        recipes.insert(SIG, RuntimeLookupRecipe::new(vec![0x10, 0x18, 0x8]).with_size_check(0x4));

        let mut compiler = Compiler::new(body, config, Box::new(expansion_runtime()))
            .with_lookup_recipes(recipes);
        compiler.compile().unwrap();

        prop_assert_eq!(compiler.stats().expansion.expanded(), expected);
        prop_assert!(check_flow_graph(compiler.body(), profile).is_ok());
        // Expansions hand out weights that balance even without profile data.
        prop_assert!(check_profile(compiler.body()).is_empty());
    }
}
