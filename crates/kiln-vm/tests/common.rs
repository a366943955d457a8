// Shared fixtures for module loading tests
#![allow(dead_code)]

use std::ffi::{c_char, c_void};

use kiln_code::{Code, CodeBuilder, Function, ObjProto, ObjType, Opcode, Type, TypeId, TypeKind};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

extern "C" fn triple(x: i32) -> i32 {
    x.wrapping_mul(3)
}

/// Entry point for a native `(i32) -> i32`.
pub unsafe extern "C" fn triple_entry(sig: *mut *const c_char) -> *const c_void {
    *sig = b"Pi_i\0".as_ptr() as *const c_char;
    triple as *const c_void
}

/// Reports a signature that does not match any `(i32) -> i32` declaration.
pub unsafe extern "C" fn float_entry(sig: *mut *const c_char) -> *const c_void {
    *sig = b"Pd_d\0".as_ptr() as *const c_char;
    triple as *const c_void
}

pub fn register_natives() {
    kiln_vm::register_builtin("triple", triple_entry);
    kiln_vm::register_builtin("float_only", float_entry);
}

pub struct Program {
    pub code: Code,
    pub main: TypeId,
}

/// `Main.f(x) = x + step`, `Main.g(x) = f(x) * 2`, `Main.h(x) = triple(x)`,
/// with `triple` bound as function id 3 from `lib`.
pub fn program(step: i32, lib: &str) -> Program {
    let mut b = CodeBuilder::new();
    let int = b.prim(TypeKind::I32);
    let unary = b.fun_type(&[int], int);
    let file = b.debug_file("main.kl");
    let step = b.int(step);
    let two = b.int(2);

    let mut main = ObjType::new("Main");
    main.proto.push(ObjProto { name: "f".into(), findex: 0, pindex: Some(0) });
    main.proto.push(ObjProto { name: "g".into(), findex: 1, pindex: Some(1) });
    main.proto.push(ObjProto { name: "h".into(), findex: 2, pindex: None });
    let main = b.add_type(Type::Obj(main));

    b.function(Function::new(
        0,
        unary,
        vec![int, int],
        vec![Opcode::Int { dst: 1, index: step }, Opcode::Add { dst: 0, a: 0, b: 1 }, Opcode::Ret { src: 0 }],
        file,
    ));
    b.function(Function::new(
        1,
        unary,
        vec![int, int, int],
        vec![
            Opcode::Call { dst: 1, fid: 0, args: vec![0] },
            Opcode::Int { dst: 2, index: two },
            Opcode::Mul { dst: 1, a: 1, b: 2 },
            Opcode::Ret { src: 1 },
        ],
        file,
    ));
    b.function(Function::new(
        2,
        unary,
        vec![int, int],
        vec![Opcode::Call { dst: 1, fid: 3, args: vec![0] }, Opcode::Ret { src: 1 }],
        file,
    ));
    b.native(lib, "triple", unary, 3);
    Program { code: b.build(), main }
}

/// A unit with one native `name` from `lib` as function id 0, of type
/// `(i32) -> i32`, and no compiled code.
pub fn single_native(lib: &str, name: &str) -> Code {
    let mut b = CodeBuilder::new();
    let int = b.prim(TypeKind::I32);
    let unary = b.fun_type(&[int], int);
    b.native(lib, name, unary, 0);
    b.build()
}
