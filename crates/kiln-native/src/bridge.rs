//! Call bridge backed by Cranelift-generated trampolines.
//!
//! Two kinds of stubs are generated lazily, one per signature shape:
//!
//! * a static-call trampoline `extern "C" fn(fun, args, ret)` which loads
//!   one word per argument from `args`, calls `fun` with the native
//!   signature, and stores the result word at `ret`;
//! * a wrapper shim with native signature `(wrapper, args...) -> ret`
//!   which spills its arguments to the stack and hands them to
//!   [`kiln_wrapper_entry`].

use std::sync::Arc;

use cranelift_codegen::ir::{types, AbiParam, InstBuilder, MemFlags, Signature, StackSlotData, StackSlotKind};
use cranelift_codegen::isa::CallConv;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{default_libcall_names, Module};
use kiln_code::{FunSig, TypeKind};
use kiln_layout::clif_type;
use kiln_rt::{kiln_wrapper_entry, raise, set_call_bridge, CallBridge, VmError, WrapperEntryFn, MAX_ARGS};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::translator::helpers::{build_isa, iconst, native_signature};
use crate::NativeError;

const WORD: u32 = 8;

type ShapeKey = (Vec<TypeKind>, TypeKind);
type TrampolineFn = unsafe extern "C" fn(usize, *const u64, *mut u64);

struct BridgeState {
    module: JITModule,
    fctx: FunctionBuilderContext,
    trampolines: FxHashMap<ShapeKey, usize>,
    shims: FxHashMap<ShapeKey, usize>,
}

// Generated code is only reached through the addresses handed out; the
// module itself is only touched under the mutex.
unsafe impl Send for BridgeState {}

pub struct CraneliftBridge {
    state: Mutex<BridgeState>,
}

impl CraneliftBridge {
    pub fn new() -> Result<Self, NativeError> {
        let isa = build_isa(false)?;
        let builder = JITBuilder::with_isa(isa, default_libcall_names());
        let module = JITModule::new(builder);
        Ok(Self {
            state: Mutex::new(BridgeState {
                module,
                fctx: FunctionBuilderContext::new(),
                trampolines: FxHashMap::default(),
                shims: FxHashMap::default(),
            }),
        })
    }

    /// Creates a bridge and installs it as the process-wide call bridge.
    pub fn install() -> Result<Arc<Self>, NativeError> {
        let bridge = Arc::new(Self::new()?);
        set_call_bridge(bridge.clone());
        Ok(bridge)
    }

    /// Address of the static-call trampoline for `sig`.
    pub fn trampoline(&self, sig: &FunSig) -> Result<usize, NativeError> {
        let key = (sig.args().to_vec(), sig.ret());
        let mut state = self.state.lock();
        if let Some(addr) = state.trampolines.get(&key) {
            return Ok(*addr);
        }
        let addr = state.build(|b, ptr, call_conv| emit_trampoline(b, sig, ptr, call_conv), trampoline_signature)?;
        log::debug!("static-call trampoline for {} at {:#x}", sig, addr);
        state.trampolines.insert(key, addr);
        Ok(addr)
    }

    /// Address of the wrapper shim for `sig`.
    pub fn shim(&self, sig: &FunSig) -> Result<usize, NativeError> {
        let key = (sig.args().to_vec(), sig.ret());
        let mut state = self.state.lock();
        if let Some(addr) = state.shims.get(&key) {
            return Ok(*addr);
        }
        let addr = state.build(
            |b, ptr, call_conv| emit_shim(b, sig, ptr, call_conv),
            |ptr, call_conv| native_signature(sig, true, ptr, call_conv),
        )?;
        log::debug!("wrapper shim for {} at {:#x}", sig, addr);
        state.shims.insert(key, addr);
        Ok(addr)
    }
}

impl BridgeState {
    fn build(
        &mut self,
        emit: impl FnOnce(&mut FunctionBuilder, types::Type, CallConv),
        signature: impl FnOnce(types::Type, CallConv) -> Signature,
    ) -> Result<usize, NativeError> {
        let pointer_type = self.module.target_config().pointer_type();
        let call_conv = self.module.isa().default_call_conv();
        let mut ctx = self.module.make_context();
        ctx.func.signature = signature(pointer_type, call_conv);
        {
            let mut builder = FunctionBuilder::new(&mut ctx.func, &mut self.fctx);
            emit(&mut builder, pointer_type, call_conv);
            builder.finalize();
        }
        let id = self.module.declare_anonymous_function(&ctx.func.signature)?;
        self.module.define_function(id, &mut ctx)?;
        self.module.clear_context(&mut ctx);
        self.module.finalize_definitions()?;
        Ok(self.module.get_finalized_function(id) as usize)
    }
}

fn trampoline_signature(pointer_type: types::Type, call_conv: CallConv) -> Signature {
    let mut sig = Signature::new(call_conv);
    sig.params.push(AbiParam::new(pointer_type)); // fun
    sig.params.push(AbiParam::new(pointer_type)); // args: *const u64
    sig.params.push(AbiParam::new(pointer_type)); // ret: *mut u64
    sig
}

fn emit_trampoline(builder: &mut FunctionBuilder, sig: &FunSig, pointer_type: types::Type, call_conv: CallConv) {
    let block = builder.create_block();
    builder.append_block_params_for_function_params(block);
    builder.switch_to_block(block);
    builder.seal_block(block);
    let params = builder.block_params(block).to_vec();
    let (fun, args_ptr, ret_ptr) = (params[0], params[1], params[2]);

    let mut args = Vec::with_capacity(sig.nargs());
    for (i, kind) in sig.args().iter().enumerate() {
        if let Some(ty) = clif_type(*kind, pointer_type) {
            args.push(builder.ins().load(ty, MemFlags::trusted(), args_ptr, (i as u32 * WORD) as i32));
        }
    }
    let sig_ref = builder.import_signature(native_signature(sig, false, pointer_type, call_conv));
    let call = builder.ins().call_indirect(sig_ref, fun, &args);
    if let Some(result) = builder.inst_results(call).first().copied() {
        builder.ins().store(MemFlags::trusted(), result, ret_ptr, 0);
    }
    builder.ins().return_(&[]);
}

fn emit_shim(builder: &mut FunctionBuilder, sig: &FunSig, pointer_type: types::Type, call_conv: CallConv) {
    let block = builder.create_block();
    builder.append_block_params_for_function_params(block);
    builder.switch_to_block(block);
    builder.seal_block(block);
    let params = builder.block_params(block).to_vec();
    let wrapper = params[0];

    // One word per declared argument followed by the result word.
    let ret_offset = sig.nargs() as u32 * WORD;
    let slot = builder.create_sized_stack_slot(StackSlotData::new(StackSlotKind::ExplicitSlot, ret_offset + WORD, 3));
    let zero = builder.ins().iconst(types::I64, 0);
    for i in 0..=sig.nargs() as u32 {
        builder.ins().stack_store(zero, slot, (i * WORD) as i32);
    }
    let mut incoming = params[1..].iter();
    for (i, kind) in sig.args().iter().enumerate() {
        if clif_type(*kind, pointer_type).is_some() {
            if let Some(v) = incoming.next() {
                builder.ins().stack_store(*v, slot, (i as u32 * WORD) as i32);
            }
        }
    }

    let args_addr = builder.ins().stack_addr(pointer_type, slot, 0);
    let ret_addr = builder.ins().stack_addr(pointer_type, slot, ret_offset as i32);
    let mut entry_sig = Signature::new(call_conv);
    entry_sig.params.extend([AbiParam::new(pointer_type); 3]);
    let sig_ref = builder.import_signature(entry_sig);
    let entry = iconst(builder, pointer_type, kiln_wrapper_entry as WrapperEntryFn as usize as i64);
    builder.ins().call_indirect(sig_ref, entry, &[wrapper, args_addr, ret_addr]);

    match clif_type(sig.ret(), pointer_type) {
        Some(ty) => {
            let result = builder.ins().stack_load(ty, slot, ret_offset as i32);
            builder.ins().return_(&[result]);
        }
        None => {
            builder.ins().return_(&[]);
        }
    }
}

impl CallBridge for CraneliftBridge {
    unsafe fn static_call(&self, fun: usize, sig: &FunSig, args: &[u64]) -> u64 {
        if sig.nargs() > MAX_ARGS + 1 {
            raise(VmError::TooManyArguments);
            return 0;
        }
        let trampoline = match self.trampoline(sig) {
            Ok(addr) => addr,
            Err(err) => {
                raise(VmError::Bridge(err.to_string()));
                return 0;
            }
        };
        let mut words = [0u64; MAX_ARGS + 1];
        let n = args.len().min(words.len());
        words[..n].copy_from_slice(&args[..n]);
        let mut ret = 0u64;
        let call: TrampolineFn = std::mem::transmute::<usize, TrampolineFn>(trampoline);
        call(fun, words.as_ptr(), &mut ret);
        ret
    }

    fn wrapper_entry(&self, sig: &FunSig) -> Option<usize> {
        if sig.nargs() > MAX_ARGS {
            return None;
        }
        match self.shim(sig) {
            Ok(addr) => Some(addr),
            Err(err) => {
                log::warn!("no wrapper shim for {}: {}", sig, err);
                None
            }
        }
    }
}
