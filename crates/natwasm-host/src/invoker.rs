//! Module Invoker.
//!
//! 1. Parse the image with wasmi (a parse failure is a format error)
//! 2. Bind every import: host surface operations, host memories, or (when
//!    chained) a library instance's exports
//! 3. Introspect the entry point to get its arity
//! 4. Marshal and encode the arguments, call, extract the result

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use wasmi::core::ValType;
use wasmi::{
    AsContextMut, Caller, Engine, ExternType, Func, FuncType, Instance, Linker, Memory, Module,
    Store, Val,
};

use natwasm_types::surface::ARITHMETIC_OPERATIONS;
use natwasm_types::{
    verify_operations, Addr, BridgeError, BridgeResult, FormatError, HandleTable, ImportSurface,
    KeyWarning, LimbArena, LinkError, Natural, Operation, Representation, ValueCodec,
};

use crate::error::{InvokeError, InvokeResult};
use crate::library::{LibraryCodec, LibraryFuncs};
use crate::marshal::{marshal, Marshalled, Naming, ParamValue};

/// Import namespace for everything the host supplies.
pub const ENV_MODULE: &str = "env";

const HOST_PROVIDER: &str = "host library";

/// Default entry point name.
pub const DEFAULT_ENTRY: &str = "main";

/// The host-side library backing `repr`.
pub fn surface_for(repr: Representation) -> Box<dyn ImportSurface> {
    match repr {
        Representation::LinkedLimb => Box::new(LimbArena::new()),
        Representation::OpaqueHandle => Box::new(HandleTable::new()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeOptions {
    pub entry: String,
    pub naming: Naming,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            entry: DEFAULT_ENTRY.to_string(),
            naming: Naming::OneBased,
        }
    }
}

/// What the entry point returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryResult {
    /// A value, decoded from the returned address or handle.
    Value(Natural),
    /// A raw scalar that did not decode as a value.
    Scalar(i64),
    /// The entry point returns nothing.
    Unit,
}

impl EntryResult {
    pub fn value(&self) -> Option<&Natural> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for EntryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{v}"),
            Self::Scalar(s) => write!(f, "{s}"),
            Self::Unit => f.write_str("()"),
        }
    }
}

/// The record of one completed invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub result: EntryResult,
    /// Values passed to `printf`, oldest first.
    pub trace: Vec<Natural>,
    /// `P_n(n1=…, …)`
    pub preview: String,
    pub warnings: Vec<KeyWarning>,
    pub arity: usize,
    /// Wall-clock time of the entry point call alone.
    pub elapsed: Duration,
}

/// Host state held by the wasmi Store.
pub struct HostState {
    /// Backing library when the host owns the values.
    surface: Option<Box<dyn ImportSurface>>,
    /// Exports of a chained library instance.
    library: Option<Arc<LibraryFuncs>>,
    /// `printf` output when values live in a chained library.
    trace: Vec<Natural>,
    /// First host-side failure of the current call.
    failure: Option<BridgeError>,
}

impl HostState {
    fn with_surface(surface: Box<dyn ImportSurface>) -> Self {
        Self {
            surface: Some(surface),
            library: None,
            trace: Vec::new(),
            failure: None,
        }
    }

    fn chained() -> Self {
        Self {
            surface: None,
            library: None,
            trace: Vec::new(),
            failure: None,
        }
    }

    /// Record `err` and turn it into an engine error that unwinds the guest.
    fn fail(&mut self, err: BridgeError) -> wasmi::Error {
        let message = err.to_string();
        self.failure.get_or_insert(err);
        wasmi::Error::new(message)
    }

    fn take_trace(&mut self) -> Vec<Natural> {
        let mut trace = std::mem::take(&mut self.trace);
        if let Some(surface) = self.surface.as_mut() {
            trace.append(surface.trace());
        }
        trace
    }
}

/// Loads and runs guest modules.
#[derive(Debug, Clone, Default)]
pub struct Invoker {
    engine: Engine,
    options: InvokeOptions,
}

impl Invoker {
    pub fn new(options: InvokeOptions) -> Self {
        Self {
            engine: Engine::default(),
            options,
        }
    }

    pub fn options(&self) -> &InvokeOptions {
        &self.options
    }

    /// Run `image` against a host-side library.
    pub fn invoke(
        &self,
        surface: Box<dyn ImportSurface>,
        image: &[u8],
        params: &[(String, ParamValue)],
    ) -> InvokeResult<Invocation> {
        let module = self.load(image)?;
        let operations = surface.operations();
        verify_operations(
            operations.iter().map(|op| op.name()),
            Operation::codec_capabilities(surface.representation()),
            HOST_PROVIDER,
        )?;
        let mut store = Store::new(&self.engine, HostState::with_surface(surface));
        let mut linker = <Linker<HostState>>::new(&self.engine);

        for import in module.imports() {
            let (namespace, name) = (import.module(), import.name());
            match import.ty() {
                ExternType::Func(ty) if namespace == ENV_MODULE => {
                    let op = Operation::from_name(name)
                        .filter(|op| operations.contains(op))
                        .ok_or_else(|| unresolved(namespace, name))?;
                    check_signature(op, ty)?;
                    link_surface_op(&mut linker, op, ty.clone())?;
                }
                ExternType::Memory(ty) if namespace == ENV_MODULE => {
                    let memory = Memory::new(&mut store, *ty).map_err(link_failed)?;
                    linker.define(namespace, name, memory).map_err(link_failed)?;
                }
                _ => return Err(unresolved(namespace, name).into()),
            }
        }

        let instance = instantiate(&linker, &mut store, &module)?;
        let entry = self.entry_point(&store, &instance)?;
        let marshalled = marshal(entry.arity, params, self.options.naming)?;

        let args = {
            let surface = surface_mut(&mut store)?;
            marshalled.encode(&mut **surface)?
        };
        let (raw, elapsed) = call_entry(&mut store, &entry, &args)?;

        let result = match raw {
            Some(raw) => {
                let surface = surface_mut(&mut store)?;
                extract(raw, |addr| {
                    if surface.is_live(addr) {
                        surface.decode(addr)
                    } else {
                        Err(FormatError::DanglingAddress(addr).into())
                    }
                })
            }
            None => EntryResult::Unit,
        };
        Ok(finish(&mut store, marshalled, result, elapsed))
    }

    /// Run `image` with its imports served by a library module instantiated
    /// in the same store. Values live in the library; the host only
    /// supplies `printf`, and arithmetic the library does not export.
    pub fn invoke_chained(
        &self,
        library_image: &[u8],
        repr: Representation,
        image: &[u8],
        params: &[(String, ParamValue)],
    ) -> InvokeResult<Invocation> {
        let library_module = self.load(library_image)?;
        let module = self.load(image)?;
        let mut store = Store::new(&self.engine, HostState::chained());

        let library = self.instantiate_library(&mut store, &library_module)?;
        let funcs = Arc::new(LibraryFuncs::resolve(&store, &library, repr)?);
        store.data_mut().library = Some(Arc::clone(&funcs));
        tracing::debug!(representation = %repr, exports = funcs.operations().len(), "library linked");

        let mut linker = <Linker<HostState>>::new(&self.engine);
        for import in module.imports() {
            let (namespace, name) = (import.module(), import.name());
            match import.ty() {
                ExternType::Func(ty) if namespace == ENV_MODULE => {
                    let op = Operation::from_name(name).ok_or_else(|| unresolved(namespace, name))?;
                    check_signature(op, ty)?;
                    match funcs.get(op) {
                        Some(func) if op != Operation::Printf => {
                            linker.define(namespace, name, func).map_err(link_failed)?;
                        }
                        _ if host_serves_for_library(op, &funcs) => {
                            link_library_op(&mut linker, op, ty.clone())?;
                        }
                        _ => return Err(unresolved(namespace, name).into()),
                    }
                }
                ExternType::Memory(ty) if namespace == ENV_MODULE => {
                    let memory = match library.get_memory(&store, "memory") {
                        Some(memory) => memory,
                        None => Memory::new(&mut store, *ty).map_err(link_failed)?,
                    };
                    linker.define(namespace, name, memory).map_err(link_failed)?;
                }
                _ => return Err(unresolved(namespace, name).into()),
            }
        }

        let instance = instantiate(&linker, &mut store, &module)?;
        let entry = self.entry_point(&store, &instance)?;
        let marshalled = marshal(entry.arity, params, self.options.naming)?;

        let args = marshalled.encode(&mut LibraryCodec::new(&mut store, &funcs))?;
        let (raw, elapsed) = call_entry(&mut store, &entry, &args)?;

        let result = match raw {
            Some(raw) => {
                let mut codec = LibraryCodec::new(&mut store, &funcs);
                extract(raw, |addr| codec.decode(addr))
            }
            None => EntryResult::Unit,
        };
        Ok(finish(&mut store, marshalled, result, elapsed))
    }

    fn load(&self, image: &[u8]) -> InvokeResult<Module> {
        Module::new(&self.engine, image)
            .map_err(|e| FormatError::InvalidModule(e.to_string()).into())
    }

    /// Instantiate a library. Its own `env.memory` and `env.printjs`
    /// imports are served by the host.
    fn instantiate_library(
        &self,
        store: &mut Store<HostState>,
        module: &Module,
    ) -> InvokeResult<Instance> {
        let mut linker = <Linker<HostState>>::new(&self.engine);
        for import in module.imports() {
            let (namespace, name) = (import.module(), import.name());
            match import.ty() {
                ExternType::Memory(ty) if namespace == ENV_MODULE => {
                    let memory = Memory::new(&mut *store, *ty).map_err(link_failed)?;
                    linker.define(namespace, name, memory).map_err(link_failed)?;
                }
                ExternType::Func(ty)
                    if namespace == ENV_MODULE && name == "printjs" && ty.results().is_empty() =>
                {
                    linker
                        .func_new(namespace, name, ty.clone(), |_: Caller<'_, HostState>, params, _| {
                            let words: Vec<i32> = params.iter().filter_map(Val::i32).collect();
                            tracing::debug!(?words, "[library printjs]");
                            Ok(())
                        })
                        .map_err(link_failed)?;
                }
                _ => return Err(unresolved(namespace, name).into()),
            }
        }
        instantiate(&linker, store, module)
    }

    fn entry_point(&self, store: &Store<HostState>, instance: &Instance) -> InvokeResult<EntryPoint> {
        let name = &self.options.entry;
        let func = instance
            .get_export(store, name)
            .and_then(|e| e.into_func())
            .ok_or_else(|| LinkError::MissingEntryPoint(name.clone()))?;
        let ty = func.ty(store);
        let incompatible = |reason: String| LinkError::IncompatibleEntryPoint {
            name: name.clone(),
            reason,
        };
        if let Some(bad) = ty.params().iter().find(|t| **t != ValType::I32) {
            return Err(incompatible(format!("parameter of type {bad:?}")).into());
        }
        let returns = match ty.results() {
            [] => false,
            [ValType::I32] => true,
            other => return Err(incompatible(format!("results {other:?}")).into()),
        };
        tracing::debug!(entry = %name, arity = ty.params().len(), "entry point resolved");
        Ok(EntryPoint {
            func,
            arity: ty.params().len(),
            returns,
        })
    }
}

struct EntryPoint {
    func: Func,
    arity: usize,
    returns: bool,
}

/// Run `image` against a fresh host library for `repr`.
pub fn invoke(
    repr: Representation,
    options: InvokeOptions,
    image: &[u8],
    params: &[(String, ParamValue)],
) -> InvokeResult<Invocation> {
    Invoker::new(options).invoke(surface_for(repr), image, params)
}

/// Run `image` chained to `library_image`.
pub fn invoke_chained(
    library_image: &[u8],
    repr: Representation,
    options: InvokeOptions,
    image: &[u8],
    params: &[(String, ParamValue)],
) -> InvokeResult<Invocation> {
    Invoker::new(options).invoke_chained(library_image, repr, image, params)
}

// ── Linking ──────────────────────────────────────────────────────────────────

fn unresolved(module: &str, name: &str) -> LinkError {
    LinkError::UnresolvedImport {
        module: module.to_string(),
        name: name.to_string(),
    }
}

fn link_failed(err: impl fmt::Display) -> LinkError {
    LinkError::IncompatibleImport(err.to_string())
}

fn expected_type(op: Operation) -> FuncType {
    let results: &[ValType] = if op.returns_value() { &[ValType::I32] } else { &[] };
    FuncType::new(vec![ValType::I32; op.arity()], results.iter().copied())
}

fn check_signature(op: Operation, ty: &FuncType) -> Result<(), LinkError> {
    if *ty != expected_type(op) {
        return Err(LinkError::IncompatibleImport(format!(
            "`{ENV_MODULE}.{op}` declared as {ty:?}, host provides {:?}",
            expected_type(op)
        )));
    }
    Ok(())
}

/// `printf` always, plus arithmetic the library lacks when the host can
/// rewrite its values in place.
fn host_serves_for_library(op: Operation, funcs: &LibraryFuncs) -> bool {
    op == Operation::Printf
        || (ARITHMETIC_OPERATIONS.contains(&op)
            && funcs.representation() == Representation::LinkedLimb
            && funcs.provides(Operation::SetValue))
}

fn words(params: &[Val]) -> Vec<i32> {
    params.iter().map(|v| v.i32().unwrap_or(0)).collect()
}

fn link_surface_op(linker: &mut Linker<HostState>, op: Operation, ty: FuncType) -> InvokeResult<()> {
    linker
        .func_new(
            ENV_MODULE,
            op.name(),
            ty,
            move |mut caller: Caller<'_, HostState>, params: &[Val], results: &mut [Val]| {
                let state = caller.data_mut();
                let outcome = match state.surface.as_mut() {
                    Some(surface) => surface.dispatch(op, &words(params)),
                    None => Err(unresolved(ENV_MODULE, op.name()).into()),
                };
                deliver(state, outcome, results)
            },
        )
        .map_err(link_failed)?;
    Ok(())
}

fn link_library_op(linker: &mut Linker<HostState>, op: Operation, ty: FuncType) -> InvokeResult<()> {
    linker
        .func_new(
            ENV_MODULE,
            op.name(),
            ty,
            move |mut caller: Caller<'_, HostState>, params: &[Val], results: &mut [Val]| {
                let Some(funcs) = caller.data().library.clone() else {
                    let err = unresolved(ENV_MODULE, op.name()).into();
                    return Err(caller.data_mut().fail(err));
                };
                let (outcome, trace) = {
                    let mut codec = LibraryCodec::new(&mut caller, &funcs);
                    let outcome = codec.dispatch(op, &words(params));
                    (outcome, codec.take_trace())
                };
                let state = caller.data_mut();
                state.trace.extend(trace);
                deliver(state, outcome, results)
            },
        )
        .map_err(link_failed)?;
    Ok(())
}

fn deliver(
    state: &mut HostState,
    outcome: BridgeResult<Option<i32>>,
    results: &mut [Val],
) -> Result<(), wasmi::Error> {
    match outcome {
        Ok(value) => {
            if let (Some(slot), Some(value)) = (results.first_mut(), value) {
                *slot = Val::I32(value);
            }
            Ok(())
        }
        Err(err) => Err(state.fail(err)),
    }
}

fn instantiate(
    linker: &Linker<HostState>,
    mut store: impl AsContextMut<Data = HostState>,
    module: &Module,
) -> InvokeResult<Instance> {
    let pre = linker
        .instantiate(&mut store, module)
        .map_err(|e| LinkError::IncompatibleImport(e.to_string()))?;
    pre.start(&mut store)
        .map_err(|e| InvokeError::Trap(format!("start function: {e}")))
}

// ── Calling ──────────────────────────────────────────────────────────────────

fn surface_mut(store: &mut Store<HostState>) -> InvokeResult<&mut Box<dyn ImportSurface>> {
    store
        .data_mut()
        .surface
        .as_mut()
        .ok_or_else(|| InvokeError::Trap("no host library bound".to_string()))
}

fn call_entry(
    store: &mut Store<HostState>,
    entry: &EntryPoint,
    args: &[Addr],
) -> InvokeResult<(Option<i32>, Duration)> {
    let params: Vec<Val> = args.iter().map(|a| Val::I32(*a as i32)).collect();
    let mut results = [Val::I32(0)];
    let returns = usize::from(entry.returns);

    let start = Instant::now();
    let outcome = entry.func.call(&mut *store, &params, &mut results[..returns]);
    let elapsed = start.elapsed();

    if let Err(err) = outcome {
        return Err(match store.data_mut().failure.take() {
            Some(host) => host.into(),
            None => InvokeError::Trap(err.to_string()),
        });
    }
    tracing::debug!(elapsed_ms = elapsed.as_secs_f64() * 1e3, "entry point returned");
    Ok((if entry.returns { results[0].i32() } else { None }, elapsed))
}

/// Interpret a returned word: decode it when it looks like a value,
/// otherwise keep the raw scalar.
fn extract(raw: i32, decode: impl FnOnce(Addr) -> BridgeResult<Natural>) -> EntryResult {
    if raw <= 0 {
        return EntryResult::Scalar(i64::from(raw));
    }
    match decode(raw as Addr) {
        Ok(value) => EntryResult::Value(value),
        Err(err) => {
            tracing::debug!(raw, %err, "result is not a value, keeping scalar");
            EntryResult::Scalar(i64::from(raw))
        }
    }
}

fn finish(
    store: &mut Store<HostState>,
    marshalled: Marshalled,
    result: EntryResult,
    elapsed: Duration,
) -> Invocation {
    Invocation {
        preview: marshalled.preview(),
        arity: marshalled.arity(),
        warnings: marshalled.warnings,
        trace: store.data_mut().take_trace(),
        result,
        elapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_positive_words_stay_scalars() {
        assert_eq!(extract(0, |_| Ok(Natural::from(1u32))), EntryResult::Scalar(0));
        assert_eq!(extract(-7, |_| Ok(Natural::from(1u32))), EntryResult::Scalar(-7));
    }

    #[test]
    fn decode_failure_falls_back_to_scalar() {
        let result = extract(12, |addr| Err(FormatError::DanglingAddress(addr).into()));
        assert_eq!(result, EntryResult::Scalar(12));
    }

    #[test]
    fn expected_types_follow_the_surface() {
        let add = expected_type(Operation::Add);
        assert_eq!(add.params(), &[ValType::I32; 3]);
        assert!(add.results().is_empty());
        assert_eq!(expected_type(Operation::Printf).results(), &[ValType::I32]);
    }
}
