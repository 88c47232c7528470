//! End-to-end invocation tests: guest modules assembled with
//! natwasm-guestgen, run through the Module Invoker on wasmi.

use natwasm_guestgen::{
    compile, linked_limb_library, linked_limb_library_exporting, GuestOp, GuestProgram,
    GuestReturn, Operand,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use natwasm_host::{
    invoke, invoke_chained, params, EntryResult, InvokeError, InvokeOptions, Invoker,
    Naming, ParamValue,
};
use natwasm_types::surface::Operation;
use natwasm_types::{
    Addr, BridgeResult, FormatError, ImportSurface, LimbArena, LinkError, Natural,
    Representation, ValueCodec,
};

const BOTH: [Representation; 2] = [Representation::LinkedLimb, Representation::OpaqueHandle];

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

fn wasm(program: &GuestProgram) -> Vec<u8> {
    compile(program).unwrap_or_else(|e| panic!("guest generation failed: {e}"))
}

/// A linked-limb host library that counts every value it allocates.
struct CountingSurface {
    inner: LimbArena,
    allocations: Arc<AtomicUsize>,
    withheld: Option<Operation>,
}

impl CountingSurface {
    fn new() -> (Self, Arc<AtomicUsize>) {
        let allocations = Arc::new(AtomicUsize::new(0));
        let surface = Self {
            inner: LimbArena::new(),
            allocations: Arc::clone(&allocations),
            withheld: None,
        };
        (surface, allocations)
    }

    fn count(&self) {
        self.allocations.fetch_add(1, Ordering::SeqCst);
    }
}

impl ValueCodec for CountingSurface {
    fn representation(&self) -> Representation {
        self.inner.representation()
    }

    fn encode(&mut self, value: &Natural) -> BridgeResult<Addr> {
        self.count();
        self.inner.encode(value)
    }

    fn decode(&mut self, addr: Addr) -> BridgeResult<Natural> {
        self.inner.decode(addr)
    }

    fn is_live(&mut self, addr: Addr) -> bool {
        self.inner.is_live(addr)
    }
}

impl ImportSurface for CountingSurface {
    fn operations(&self) -> Vec<Operation> {
        let mut ops = self.inner.operations();
        ops.retain(|op| Some(*op) != self.withheld);
        ops
    }

    fn load(&mut self, addr: Addr) -> BridgeResult<Natural> {
        self.inner.load(addr)
    }

    fn store(&mut self, addr: Addr, value: &Natural) -> BridgeResult<()> {
        self.inner.store(addr, value)
    }

    fn new_zero(&mut self) -> BridgeResult<Addr> {
        self.count();
        self.inner.new_zero()
    }

    fn append_limb(&mut self, addr: Addr, limb: u32) -> BridgeResult<()> {
        self.inner.append_limb(addr, limb)
    }

    fn trace(&mut self) -> &mut Vec<Natural> {
        self.inner.trace()
    }

    fn dispatch_native(&mut self, op: Operation, args: &[i32]) -> BridgeResult<Option<i32>> {
        if matches!(op, Operation::Allocate | Operation::CreateChunk) {
            self.count();
        }
        self.inner.dispatch_native(op, args)
    }
}

fn run(repr: Representation, program: &GuestProgram, args: &[(&str, i64)]) -> natwasm_host::Invocation {
    invoke(
        repr,
        InvokeOptions::default(),
        &wasm(program),
        &params(args.iter().copied()),
    )
    .unwrap_or_else(|e| panic!("invocation failed for {repr}: {e}"))
}

fn run_err(repr: Representation, program: &GuestProgram, args: &[(&str, i64)]) -> InvokeError {
    invoke(
        repr,
        InvokeOptions::default(),
        &wasm(program),
        &params(args.iter().copied()),
    )
    .expect_err("invocation should fail")
}

fn value(n: u64) -> EntryResult {
    EntryResult::Value(Natural::from(n))
}

/// Prints every parameter, returns the one at `ret`.
fn print_all(repr: Representation, arity: u32, ret: u32) -> GuestProgram {
    let mut program = GuestProgram::new(repr, arity);
    for i in 0..arity {
        program = program.op(GuestOp::Print(Operand::Param(i)));
    }
    program.returns(GuestReturn::Value(Operand::Param(ret)))
}

// ══════════════════════════════════════════════════════════════════════════════
// Host-backed invocation
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn adder_adds_in_both_representations() {
    for repr in BOTH {
        let inv = run(repr, &GuestProgram::adder(repr), &[("n1", 2), ("n2", 40)]);
        assert_eq!(inv.result, value(42), "{repr}");
        assert_eq!(inv.arity, 2);
        assert_eq!(inv.preview, "P_2(n1=2, n2=40)");
    }
}

#[test]
fn loop_program_multiplies_by_repeated_addition() {
    for repr in BOTH {
        let inv = run(repr, &GuestProgram::multiply_by_addition(repr), &[("n1", 6), ("n2", 7)]);
        assert_eq!(inv.result, value(42), "{repr}");
    }
}

#[test]
fn large_values_cross_the_boundary_intact() {
    let a = Natural::from(u128::MAX);
    let b = Natural::from(1u32) << 200u32;
    for repr in BOTH {
        let inv = invoke(
            repr,
            InvokeOptions::default(),
            &wasm(&GuestProgram::adder(repr)),
            &params([("n1", a.clone()), ("n2", b.clone())]),
        )
        .unwrap();
        assert_eq!(inv.result, EntryResult::Value(&a + &b), "{repr}");
    }
}

#[test]
fn unset_slots_are_zero_filled() {
    for repr in BOTH {
        let inv = run(repr, &print_all(repr, 3, 1), &[("n2", 5)]);
        assert_eq!(inv.result, value(5));
        assert_eq!(
            inv.trace,
            vec![Natural::from(0u32), Natural::from(5u32), Natural::from(0u32)],
            "{repr}"
        );
    }
}

#[test]
fn out_of_range_index_aborts_the_call() {
    for repr in BOTH {
        let err = run_err(repr, &GuestProgram::adder(repr), &[("n1", 1), ("n3", 5)]);
        let InvokeError::Range(range) = &err else {
            panic!("expected range error, got {err}");
        };
        assert_eq!(range.index, 3);
        assert_eq!(range.max, Some(2));
    }
}

#[test]
fn negative_value_aborts_the_call() {
    for repr in BOTH {
        let err = run_err(repr, &GuestProgram::adder(repr), &[("n1", 3), ("n2", -5)]);
        let InvokeError::Domain(domain) = &err else {
            panic!("expected domain error, got {err}");
        };
        assert_eq!(domain.key.as_deref(), Some("n2"));
        assert_eq!(domain.value, "-5");
    }
}

#[test]
fn rejected_parameters_allocate_nothing() {
    let program = wasm(&GuestProgram::adder(Representation::LinkedLimb));
    let (surface, allocations) = CountingSurface::new();
    let err = Invoker::new(InvokeOptions::default())
        .invoke(Box::new(surface), &program, &params([("n1", 3i64), ("n2", -1)]))
        .unwrap_err();
    assert!(matches!(err, InvokeError::Domain(_)), "{err}");
    assert_eq!(allocations.load(Ordering::SeqCst), 0);

    let (surface, allocations) = CountingSurface::new();
    let inv = Invoker::new(InvokeOptions::default())
        .invoke(Box::new(surface), &program, &params([("n1", 3i64), ("n2", 4)]))
        .unwrap();
    assert_eq!(inv.result, value(7));
    assert!(allocations.load(Ordering::SeqCst) >= 2);
}

#[test]
fn host_library_without_a_codec_capability_is_rejected() {
    let (mut surface, _) = CountingSurface::new();
    surface.withheld = Some(Operation::GetNext);
    let err = Invoker::new(InvokeOptions::default())
        .invoke(
            Box::new(surface),
            &wasm(&GuestProgram::adder(Representation::LinkedLimb)),
            &[],
        )
        .unwrap_err();
    assert_eq!(
        err,
        InvokeError::Link(LinkError::MissingOperation {
            operation: "get_next".into(),
            provider: "host library".into(),
        })
    );
}

#[test]
fn malformed_keys_warn_and_are_skipped() {
    let inv = invoke(
        Representation::OpaqueHandle,
        InvokeOptions::default(),
        &wasm(&GuestProgram::adder(Representation::OpaqueHandle)),
        &params([("n1", 4i64), ("nx", 9), ("count", 1), ("n2", 5)]),
    )
    .unwrap();
    assert_eq!(inv.result, value(9));
    let keys: Vec<&str> = inv.warnings.iter().map(|w| w.key.as_str()).collect();
    assert_eq!(keys, vec!["nx", "count"]);
}

#[test]
fn zero_based_naming_addresses_slot_zero() {
    let options = InvokeOptions {
        naming: Naming::ZeroBased,
        ..InvokeOptions::default()
    };
    let repr = Representation::LinkedLimb;
    let inv = invoke(
        repr,
        options,
        &wasm(&print_all(repr, 2, 0)),
        &params([("x0", 11i64), ("x1", 12)]),
    )
    .unwrap();
    assert_eq!(inv.result, value(11));
    assert_eq!(inv.preview, "P_2(x0=11, x1=12)");
}

#[test]
fn text_parameters_are_decimal() {
    let repr = Representation::OpaqueHandle;
    let image = wasm(&GuestProgram::echo(repr, 1));
    let big = "340282366920938463463374607431768211456";
    let inv = invoke(repr, InvokeOptions::default(), &image, &[("n1".into(), ParamValue::from(big))])
        .unwrap();
    assert_eq!(inv.result.value().map(ToString::to_string).as_deref(), Some(big));

    let err = invoke(
        repr,
        InvokeOptions::default(),
        &image,
        &[("n1".into(), ParamValue::from("twelve"))],
    )
    .unwrap_err();
    assert!(matches!(err, InvokeError::Domain(_)));
}

#[test]
fn scalar_and_unit_results() {
    for repr in BOTH {
        let scalar = GuestProgram::new(repr, 0).returns(GuestReturn::Scalar(-1));
        assert_eq!(run(repr, &scalar, &[]).result, EntryResult::Scalar(-1));

        let unit = GuestProgram::new(repr, 1).op(GuestOp::Print(Operand::Param(0)));
        let inv = run(repr, &unit, &[("n1", 3)]);
        assert_eq!(inv.result, EntryResult::Unit);
        assert_eq!(inv.trace, vec![Natural::from(3u32)]);
    }
}

#[test]
fn scalar_that_is_not_a_live_value_is_kept_raw() {
    let repr = Representation::LinkedLimb;
    // One argument allocates one node at address 8; 4 is misaligned.
    let program = GuestProgram::new(repr, 1).returns(GuestReturn::Scalar(4));
    assert_eq!(run(repr, &program, &[("n1", 1)]).result, EntryResult::Scalar(4));
}

#[test]
fn handles_can_be_released_by_the_guest() {
    let repr = Representation::OpaqueHandle;
    let program = GuestProgram::new(repr, 2)
        .op(GuestOp::Free(Operand::Param(0)))
        .returns(GuestReturn::Value(Operand::Param(1)));
    let inv = run(repr, &program, &[("n1", 1), ("n2", 2)]);
    assert_eq!(inv.result, value(2));
}

#[test]
fn guest_trap_is_reported() {
    for repr in BOTH {
        let program = GuestProgram::new(repr, 0).op(GuestOp::Trap).returns(GuestReturn::Scalar(0));
        assert!(matches!(run_err(repr, &program, &[]), InvokeError::Trap(_)));
    }
}

#[test]
fn host_failure_keeps_its_kind() {
    // Local 0 is never initialized, so `add` gets the null address.
    let repr = Representation::LinkedLimb;
    let program = GuestProgram::new(repr, 1).locals(1).op(GuestOp::Arith {
        op: natwasm_guestgen::ArithOp::Add,
        dst: Operand::Local(0),
        lhs: Operand::Param(0),
        rhs: Operand::Param(0),
    });
    let err = run_err(repr, &program, &[("n1", 1)]);
    assert_eq!(err, InvokeError::Format(FormatError::NullAddress));
}

#[test]
fn invalid_image_is_a_format_error() {
    let err = invoke(
        Representation::OpaqueHandle,
        InvokeOptions::default(),
        b"\0asm\x02\0\0\0garbage",
        &[],
    )
    .unwrap_err();
    assert!(matches!(err, InvokeError::Format(FormatError::InvalidModule(_))));
}

#[test]
fn missing_entry_point_is_a_link_error() {
    let repr = Representation::OpaqueHandle;
    let program = GuestProgram::echo(repr, 1).entry("run");
    let err = run_err(repr, &program, &[]);
    assert_eq!(err, InvokeError::Link(LinkError::MissingEntryPoint("main".into())));

    let options = InvokeOptions {
        entry: "run".into(),
        ..InvokeOptions::default()
    };
    let inv = invoke(repr, options, &wasm(&program), &params([("n1", 8i64)])).unwrap();
    assert_eq!(inv.result, value(8));
}

#[test]
fn unknown_import_is_a_link_error() {
    let repr = Representation::LinkedLimb;
    let program = GuestProgram::echo(repr, 1).with_extra_import("fib");
    let err = run_err(repr, &program, &[]);
    assert_eq!(
        err,
        InvokeError::Link(LinkError::UnresolvedImport {
            module: "env".into(),
            name: "fib".into(),
        })
    );
}

#[test]
fn program_for_the_other_representation_does_not_link() {
    let program = GuestProgram::adder(Representation::LinkedLimb);
    let err = run_err(Representation::OpaqueHandle, &program, &[]);
    assert!(matches!(
        err,
        InvokeError::Link(LinkError::UnresolvedImport { ref name, .. }) if name == "allocate"
    ));
}

#[test]
fn memory_import_is_served_by_the_host() {
    let repr = Representation::OpaqueHandle;
    let program = GuestProgram::echo(repr, 1).with_memory_import();
    assert_eq!(run(repr, &program, &[("n1", 5)]).result, value(5));
}

// ══════════════════════════════════════════════════════════════════════════════
// Chained invocation
// ══════════════════════════════════════════════════════════════════════════════

fn run_chained(program: &GuestProgram, args: &[(&str, i64)]) -> Result<natwasm_host::Invocation, InvokeError> {
    invoke_chained(
        &linked_limb_library().unwrap(),
        Representation::LinkedLimb,
        InvokeOptions::default(),
        &wasm(program),
        &params(args.iter().copied()),
    )
}

#[test]
fn chained_program_keeps_values_in_the_library() {
    let repr = Representation::LinkedLimb;
    let inv = run_chained(&GuestProgram::adder(repr), &[("n1", 2), ("n2", 40)]).unwrap();
    assert_eq!(inv.result, value(42));

    let inv = run_chained(&GuestProgram::multiply_by_addition(repr), &[("n1", 1 << 40), ("n2", 3)])
        .unwrap();
    assert_eq!(inv.result, value(3 << 40));
}

#[test]
fn chained_printf_decodes_through_the_library() {
    let repr = Representation::LinkedLimb;
    let program = print_all(repr, 2, 1).with_memory_import();
    let inv = run_chained(&program, &[("n1", 1 << 33), ("n2", 9)]).unwrap();
    assert_eq!(inv.trace, vec![Natural::from(1u64 << 33), Natural::from(9u32)]);
    assert_eq!(inv.result, value(9));
}

#[test]
fn library_without_a_codec_capability_is_rejected() {
    let library = linked_limb_library_exporting(&[
        Operation::Allocate,
        Operation::CreateChunk,
        Operation::GetValue,
        Operation::SetNext,
    ])
    .unwrap();
    let program = wasm(&GuestProgram::adder(Representation::LinkedLimb));
    let err = invoke_chained(
        &library,
        Representation::LinkedLimb,
        InvokeOptions::default(),
        &program,
        &[],
    )
    .unwrap_err();
    let InvokeError::Link(LinkError::MissingOperation { operation, .. }) = &err else {
        panic!("expected missing operation, got {err}");
    };
    assert_eq!(operation, "get_next");
}

#[test]
fn linked_library_cannot_back_handle_programs() {
    let program = wasm(&GuestProgram::adder(Representation::OpaqueHandle));
    let err = invoke_chained(
        &linked_limb_library().unwrap(),
        Representation::OpaqueHandle,
        InvokeOptions::default(),
        &program,
        &[],
    )
    .unwrap_err();
    assert!(matches!(
        err,
        InvokeError::Link(LinkError::MissingOperation { ref operation, .. }) if operation == "create_bigint"
    ));
}

#[test]
fn library_import_not_exported_is_unresolved() {
    let library = linked_limb_library_exporting(&[
        Operation::Allocate,
        Operation::CreateChunk,
        Operation::GetValue,
        Operation::GetNext,
        Operation::SetNext,
    ])
    .unwrap();
    let program = wasm(&GuestProgram::adder(Representation::LinkedLimb));
    let err = invoke_chained(
        &library,
        Representation::LinkedLimb,
        InvokeOptions::default(),
        &program,
        &[],
    )
    .unwrap_err();
    assert_eq!(
        err,
        InvokeError::Link(LinkError::UnresolvedImport {
            module: "env".into(),
            name: "set_value".into(),
        })
    );
}
