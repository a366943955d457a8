mod common;

use std::ffi::{c_char, CStr};
use std::sync::Arc;

use common::*;
use kiln_code::{CodeBuilder, Function, ObjField, ObjType, Opcode, Type, TypeKind};
use kiln_gc::{is_global_root, Dynamic};
use kiln_layout::type_size;
use kiln_rt::VmError;
use kiln_vm::{registry, LoadError, LoadOptions, Module};

#[test]
fn test_load_links_every_function() {
    init_logging();
    register_natives();
    let program = program(1, "builtin");
    let module = Module::load(program.code, &LoadOptions::default()).unwrap();

    for fid in 0..module.function_count() as u32 {
        assert_ne!(module.function_ptr(fid), Some(0), "fun${} is not linked", fid);
    }
    assert_eq!(module.call(0, &[Dynamic::I32(5)]).unwrap().to_i32().unwrap(), 6);
    assert_eq!(module.call(1, &[Dynamic::I32(5)]).unwrap().to_i32().unwrap(), 12);
    assert_eq!(module.call(2, &[Dynamic::I32(7)]).unwrap().to_i32().unwrap(), 21);
    assert_eq!(module.call(3, &[Dynamic::I32(-2)]).unwrap().to_i32().unwrap(), -6);

    let main = module.obj_meta(program.main).unwrap();
    assert_eq!(main.dispatch_entry(0), module.function_ptr(0));
    assert_eq!(main.dispatch_entry(1), module.function_ptr(1));
    assert_eq!(main.method("h"), Some(2));
}

#[test]
fn test_missing_arguments_reported() {
    register_natives();
    let module = Module::load(program(1, "builtin").code, &LoadOptions::default()).unwrap();
    assert_eq!(
        module.call(1, &[]).unwrap_err().to_string(),
        "Missing arguments : 1 expected but 0 passed"
    );
}

#[test]
fn test_loaded_module_is_published() {
    register_natives();
    let code = Arc::new(program(1, "builtin").code);
    let module = Module::load(code.clone(), &LoadOptions::default()).unwrap();
    assert!(registry::modules().iter().any(|m| Arc::ptr_eq(m.code(), &code)));
    let (start, end) = module.code_bounds();
    let found = registry::find_module(start).unwrap();
    assert!(Arc::ptr_eq(&found, &module));
    assert!(registry::find_module(end).map_or(true, |m| !Arc::ptr_eq(&m, &module)));
}

#[test]
fn test_failed_load_publishes_nothing() {
    let code = Arc::new(program(1, "nosuchlib").code);
    let err = Module::load(code.clone(), &LoadOptions::default()).unwrap_err();
    assert!(matches!(err, LoadError::LibraryNotFound { .. }));
    assert!(!registry::modules().iter().any(|m| Arc::ptr_eq(m.code(), &code)));
}

#[test]
fn test_globals_are_aligned_and_rooted() {
    let mut b = CodeBuilder::new();
    let kinds = [TypeKind::U8, TypeKind::F64, TypeKind::Bool, TypeKind::I32, TypeKind::Dyn, TypeKind::U16];
    for kind in kinds {
        let ty = b.prim(kind);
        b.global(ty);
    }
    let module = Module::load(b.build(), &LoadOptions::default()).unwrap();

    let mut previous_end = None;
    for (g, kind) in kinds.iter().enumerate() {
        let addr = module.global_addr(g as u32).unwrap();
        assert_eq!(addr % type_size(*kind), 0);
        if let Some(end) = previous_end {
            assert!(addr >= end);
        }
        previous_end = Some(addr + type_size(*kind));
        assert_eq!(module.global_bits(g as u32), Some(0));
        assert_eq!(is_global_root(addr as *const u8), kind.is_ptr());
    }
}

#[test]
fn test_function_global_starts_null() {
    let mut b = CodeBuilder::new();
    let void = b.prim(TypeKind::Void);
    let fun = b.fun_type(&[], void);
    b.global(fun);
    let module = Module::load(b.build(), &LoadOptions::default()).unwrap();

    let Some(Dynamic::Closure(closure)) = module.global_value(0) else {
        panic!("function global does not hold a closure");
    };
    assert_eq!(kiln_rt::call_method(&closure, &[]).unwrap_err(), VmError::NullFunction);
}

#[test]
fn test_stored_arguments_outlive_the_call() {
    let mut b = CodeBuilder::new();
    let void = b.prim(TypeKind::Void);
    let dynamic = b.prim(TypeKind::Dyn);
    let callback = b.fun_type(&[], void);
    let store_dyn = b.fun_type(&[dynamic], void);
    let store_fun = b.fun_type(&[callback], void);
    let file = b.debug_file("store.kl");
    let slot = b.global(dynamic);
    let handler = b.global(callback);
    b.function(Function::new(
        0,
        store_dyn,
        vec![dynamic, void],
        vec![Opcode::SetGlobal { global: slot, src: 0 }, Opcode::Ret { src: 1 }],
        file,
    ));
    b.function(Function::new(
        1,
        store_fun,
        vec![callback, void],
        vec![Opcode::SetGlobal { global: handler, src: 0 }, Opcode::Ret { src: 1 }],
        file,
    ));
    let module = Module::load(b.build(), &LoadOptions::default()).unwrap();

    module.call(0, &[Dynamic::I64(0x1111_2222_3333)]).unwrap();
    let callback = module.closure(0).unwrap();
    let fun = callback.fun();
    module.call(1, &[Dynamic::Closure(callback)]).unwrap();

    // Reuse freed memory, if any was freed.
    let filler: Vec<_> = (0..64).map(|i| Arc::new(Dynamic::I32(i))).collect();
    let stored = module.global_value(slot).unwrap();
    assert!(stored.same_value(&Dynamic::I64(0x1111_2222_3333)), "global holds {:?}", stored);
    let Some(Dynamic::Closure(stored)) = module.global_value(handler) else {
        panic!("function global does not hold a closure");
    };
    assert_eq!(stored.fun(), fun);
    drop(filler);
}

#[test]
fn test_module_debug_output() {
    register_natives();
    let module = Module::load(program(1, "builtin").code, &LoadOptions::default()).unwrap();
    let text = format!("{:?}", module);
    assert!(text.starts_with("Module {"));
    assert!(text.contains("functions: 4"));
}

#[test]
fn test_constants_are_materialized() {
    let mut b = CodeBuilder::new();
    let int = b.prim(TypeKind::I32);
    let boolean = b.prim(TypeKind::Bool);
    let float = b.prim(TypeKind::F64);
    let bytes = b.prim(TypeKind::Bytes);
    let ty = b.prim(TypeKind::Type);
    let dynamic = b.prim(TypeKind::Dyn);
    let mut point = ObjType::new("Point");
    for (name, t) in [("x", int), ("visible", boolean), ("scale", float), ("label", bytes), ("kind", ty), ("extra", dynamic)] {
        point.fields.push(ObjField { name: name.into(), ty: t });
    }
    let point = b.add_type(Type::Obj(point));
    let origin = b.global(point);
    let other = b.global(dynamic);
    let x = b.int(-4);
    let scale = b.float(1.5);
    let label = b.string("origin");
    b.constant(origin, vec![x, 1, scale, label, float.0, other]);
    let code = Arc::new(b.build());
    let module = Module::load(code.clone(), &LoadOptions::default()).unwrap();

    let meta = module.obj_meta(point).unwrap();
    let obj = module.global_bits(origin).unwrap() as usize;
    assert_ne!(obj, 0);
    let field = |i: usize| obj + meta.layout.offsets[i];
    unsafe {
        assert_eq!(*(obj as *const usize), meta.header());
        assert_eq!(*(field(0) as *const i32), -4);
        assert_eq!(*(field(1) as *const u8), 1);
        assert_eq!(*(field(2) as *const f64), 1.5);
        assert_eq!(CStr::from_ptr(*(field(3) as *const *const c_char)).to_str().unwrap(), "origin");
        assert_eq!(*(field(4) as *const usize), &code.types[float.index()] as *const Type as usize);
        assert_eq!(*(field(5) as *const usize), 0);
    }
    assert!(!is_global_root(module.global_addr(origin).unwrap() as *const u8));
    assert!(is_global_root(module.global_addr(other).unwrap() as *const u8));
}

#[test]
fn test_constant_on_scalar_global_fails() {
    let mut b = CodeBuilder::new();
    let int = b.prim(TypeKind::I32);
    let g = b.global(int);
    b.constant(g, vec![]);
    let err = Module::load(b.build(), &LoadOptions::default()).unwrap_err();
    assert!(matches!(err, LoadError::ConstantNotObject { global: 0 }));
}

#[test]
fn test_type_dump_lists_loaded_types() {
    let program = program(1, "builtin");
    register_natives();
    let module = Module::load(program.code, &LoadOptions::default()).unwrap();

    let mut out = Vec::new();
    kiln_vm::registry::dump_types(&mut |bytes| out.extend_from_slice(bytes));
    let word = std::mem::size_of::<usize>();
    let ntypes = u32::from_ne_bytes(out[0..4].try_into().unwrap()) as usize;
    let addrs: Vec<usize> = out[4..4 + ntypes * word]
        .chunks(word)
        .map(|c| usize::from_ne_bytes(c.try_into().unwrap()))
        .collect();
    for ty in &module.code().types {
        assert!(addrs.contains(&(ty as *const Type as usize)));
    }
    let rest = &out[4 + ntypes * word..];
    let nfun = u32::from_ne_bytes(rest[0..4].try_into().unwrap()) as usize;
    assert_eq!(rest.len(), 4 + nfun * word);
    let closure_types: Vec<usize> = rest[4..].chunks(word).map(|c| usize::from_ne_bytes(c.try_into().unwrap())).collect();
    for addr in module.closure_type_addrs() {
        assert!(closure_types.contains(&addr));
    }
}
