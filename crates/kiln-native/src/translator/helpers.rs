// Shared helpers for building Cranelift signatures and constants.

use cranelift_codegen::ir::{types, AbiParam, InstBuilder, Signature, Type, Value};
use cranelift_codegen::isa::{CallConv, OwnedTargetIsa};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_frontend::FunctionBuilder;
use kiln_code::{FunSig, TypeKind};
use kiln_layout::clif_type;

use crate::NativeError;

/// Builds an ISA for the host with frame pointers preserved and
/// optimizations off.
pub fn build_isa(pic: bool) -> Result<OwnedTargetIsa, NativeError> {
    let mut flag_builder = settings::builder();
    if pic {
        flag_builder.enable("is_pic")?;
    }
    // Stack capture follows frame records.
    flag_builder.set("preserve_frame_pointers", "true")?;
    flag_builder.set("opt_level", "none")?;
    // Enable verifier passes in debug builds
    #[cfg(debug_assertions)]
    flag_builder.set("enable_verifier", "true")?;

    let isa_builder = cranelift_native::builder()
        .map_err(|e| NativeError::IsaSetupError(format!("Host target lookup failed: {}", e)))?;
    isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(|e| NativeError::IsaSetupError(format!("ISA construction failed: {}", e)))
}

/// Native signature of a function of kind-level signature `sig`. `Void`
/// arguments take no register. With `receiver`, a pointer-sized argument
/// is prepended.
pub fn native_signature(sig: &FunSig, receiver: bool, pointer_type: Type, call_conv: CallConv) -> Signature {
    let mut signature = Signature::new(call_conv);
    if receiver {
        signature.params.push(AbiParam::new(pointer_type));
    }
    for kind in sig.args() {
        if let Some(ty) = clif_type(*kind, pointer_type) {
            signature.params.push(abi_param(*kind, ty));
        }
    }
    if let Some(ty) = clif_type(sig.ret(), pointer_type) {
        signature.returns.push(abi_param(sig.ret(), ty));
    }
    signature
}

// Sub-word integers are zero-extended at call boundaries, as C compilers expect.
fn abi_param(kind: TypeKind, ty: Type) -> AbiParam {
    match kind {
        TypeKind::U8 | TypeKind::U16 | TypeKind::Bool => AbiParam::new(ty).uext(),
        _ => AbiParam::new(ty),
    }
}

/// `iconst` with the immediate masked to the width of `ty`.
pub fn iconst(builder: &mut FunctionBuilder, ty: Type, value: i64) -> Value {
    let bits = ty.bits();
    let masked = if bits >= 64 { value } else { value & ((1i64 << bits) - 1) };
    builder.ins().iconst(ty, masked)
}

pub fn zero(builder: &mut FunctionBuilder, ty: Type) -> Value {
    match ty {
        types::F32 => builder.ins().f32const(0.0),
        types::F64 => builder.ins().f64const(0.0),
        _ => builder.ins().iconst(ty, 0),
    }
}
