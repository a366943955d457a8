mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::*;
use kiln_code::{FunSig, Opcode, TypeKind};
use kiln_gc::{Closure, Dynamic};
use kiln_native::JitBackend;
use kiln_rt::{call_method, make_fun_wrapper, CallBridge};

#[test]
fn test_compiled_arithmetic_and_calls() {
    init_logging();
    let bridge = bridge();
    let mut image = Image::new(arithmetic_code(add));
    image.compile_all();

    assert_eq!(image.call(&bridge, 0, &[2, 3]) as u32, 5);
    assert_eq!(image.call(&bridge, 0, &[(-7i32) as u32 as u64, 3]) as u32 as i32, -4);
    // (x + 10) * 2 through the slot of fun$0
    assert_eq!(image.call(&bridge, 1, &[1]) as u32, 22);
}

#[test]
fn test_globals_are_read_and_written_in_place() {
    init_logging();
    let bridge = bridge();
    let mut image = Image::new(arithmetic_code(add));
    image.compile_all();

    image.globals[0] = 41;
    assert_eq!(image.call(&bridge, 2, &[]) as u32, 42);
    assert_eq!(image.globals[0] as u32, 42);
}

#[test]
fn test_failed_translation_leaves_backend_usable() {
    init_logging();
    let bridge = bridge();
    let mut code = arithmetic_code(add);
    code.floats.push(1.5);
    let mut broken = code.functions[1].clone();
    broken.ops[0] = Opcode::Float { dst: 1, index: (code.floats.len() - 1) as u32 };
    let mut image = Image::new(code);

    let target = image.link_target();
    image.backend.init(target).unwrap();
    assert!(image.backend.compile_function(&image.code, &broken).is_err());
    let offset = image.backend.compile_function(&image.code, &image.code.functions[0]).unwrap();
    let blob = image.backend.finalize().unwrap();
    image.slots[0].store(blob.address_of(offset), Ordering::SeqCst);
    image.blobs.push(blob);
    assert_eq!(image.call(&bridge, 0, &[2, 3]) as u32, 5);
}

#[test]
fn test_functions_are_aligned_and_padded() {
    init_logging();
    let mut image = Image::new(arithmetic_code(add));
    image.compile_all();
    let patch_len = image.backend.patch_len();
    let blob = &image.blobs[0];

    let mut end = 0;
    for f in blob.functions() {
        assert_eq!(f.offset % 16, 0);
        assert!(f.offset >= end);
        assert!(f.size >= patch_len);
        end = f.offset + f.size;
        assert!(blob.contains(blob.address_of(f.offset)));
    }
    assert!(end <= blob.size());
}

#[test]
fn test_debug_offsets_are_monotonic() {
    init_logging();
    let mut image = Image::new(arithmetic_code(add));
    image.compile_all();
    let f = &image.blobs[0].functions()[1];
    assert_eq!(f.debug.len(), 5);
    let offsets: Vec<u32> = (0..5).map(|i| f.debug.get(i).unwrap()).collect();
    assert!(offsets.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(f.debug.op_at(offsets[4]), Some(4));
    // Anything past the last opcode start belongs to it, padding included.
    assert_eq!(f.debug.op_at(f.size as u32 - 1), Some(4));
}

#[test]
fn test_patched_body_jumps_to_new_code() {
    init_logging();
    let bridge = bridge();
    let mut image = Image::new(arithmetic_code(add));
    image.compile_all();
    let old_add = image.address(0);

    // Recompile fun$0 as a subtraction, linked against the same slots.
    let patched = arithmetic_code(sub);
    let target = image.link_target();
    image.backend.reset(target).unwrap();
    let offset = image.backend.compile_function(&patched, &patched.functions[0]).unwrap();
    let blob = image.backend.finalize().unwrap();
    let new_add = blob.address_of(offset);

    unsafe { image.backend.patch_method(old_add, &image.slots[0] as *const _ as usize).unwrap() };
    image.slots[0].store(new_add, Ordering::SeqCst);
    image.blobs.push(blob);

    let sig = Arc::new(FunSig::new(vec![TypeKind::I32, TypeKind::I32], TypeKind::I32));
    // Old entry point, new behaviour.
    assert_eq!(unsafe { bridge.static_call(old_add, &sig, &[10, 3]) } as u32, 7);
    // Callers going through the slot see it too.
    assert_eq!(image.call(&bridge, 1, &[5]) as u32 as i32, -10);
}

#[test]
fn test_wrapper_shim_round_trip() {
    init_logging();
    let bridge = bridge();
    let mut image = Image::new(arithmetic_code(add));
    image.compile_all();

    let sig = image.code.fun_sig(image.code.functions[0].ty).unwrap();
    let target = Closure::bare(sig, image.address(0));
    let dyn_sig = Arc::new(FunSig::new(vec![TypeKind::Dyn, TypeKind::Dyn], TypeKind::Dyn));
    let wrapper = make_fun_wrapper(&target, dyn_sig).unwrap();

    for v in [0, 1, -1, i32::MAX, i32::MIN] {
        let a = Dynamic::I32(v).to_raw(TypeKind::Dyn).unwrap();
        let zero = Dynamic::I32(0).to_raw(TypeKind::Dyn).unwrap();
        let this = Arc::as_ptr(&wrapper) as u64;
        let bits = unsafe { bridge.static_call(wrapper.fun(), &wrapper.call_sig(), &[this, a, zero]) };
        let ret = Dynamic::from_raw(bits, TypeKind::Dyn);
        assert!(ret.same_value(&Dynamic::I32(v)), "shim round trip of {}", v);

        let ret = call_method(&wrapper, &[Dynamic::I32(v), Dynamic::Null]).unwrap();
        assert!(ret.same_value(&Dynamic::I32(v)), "reflective round trip of {}", v);
    }
}

#[test]
fn test_trampolines_are_cached_per_shape() {
    init_logging();
    let bridge = bridge();
    let a = FunSig::new(vec![TypeKind::F64, TypeKind::I32], TypeKind::F64);
    let b = FunSig::new(vec![TypeKind::F64, TypeKind::I32], TypeKind::F64);
    assert_eq!(bridge.trampoline(&a).unwrap(), bridge.trampoline(&b).unwrap());
    assert_ne!(bridge.shim(&a).unwrap(), bridge.trampoline(&a).unwrap());
}
