// Common helpers for code generation tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use kiln_code::{Code, CodeBuilder, Function, Opcode, TypeKind};
use kiln_native::{CodeBlob, CraneliftBackend, CraneliftBridge, JitBackend, LinkTarget};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A tiny linked image: function slots and a global block owned by the
/// test, plus the blob compiled against them.
pub struct Image {
    pub code: Code,
    pub slots: Box<[AtomicUsize]>,
    pub globals: Box<[u64]>,
    pub backend: CraneliftBackend,
    pub blobs: Vec<CodeBlob>,
}

impl Image {
    pub fn new(code: Code) -> Self {
        let slots = (0..code.function_count()).map(|_| AtomicUsize::new(0)).collect();
        let globals = vec![0u64; code.globals.len().max(1)].into_boxed_slice();
        Self { code, slots, globals, backend: CraneliftBackend::new().unwrap(), blobs: Vec::new() }
    }

    pub fn link_target(&self) -> LinkTarget {
        let mut signatures = vec![None; self.code.function_count()];
        for f in &self.code.functions {
            signatures[f.findex as usize] = Some(self.code.fun_sig(f.ty).unwrap());
        }
        LinkTarget {
            globals_base: self.globals.as_ptr() as usize,
            // One word per global keeps the test layout trivial.
            global_offsets: (0..self.code.globals.len()).map(|g| g * 8).collect(),
            slots: self.slots.iter().map(|s| s as *const AtomicUsize as usize).collect(),
            signatures: signatures.into_iter().map(|s| s.unwrap()).collect(),
        }
    }

    /// Compiles every function and points the slots at the new code.
    pub fn compile_all(&mut self) {
        let target = self.link_target();
        self.backend.init(target).unwrap();
        let mut placed = Vec::new();
        for f in &self.code.functions {
            placed.push((f.findex, self.backend.compile_function(&self.code, f).unwrap()));
        }
        let blob = self.backend.finalize().unwrap();
        for (findex, offset) in placed {
            self.slots[findex as usize].store(blob.address_of(offset), Ordering::SeqCst);
        }
        self.blobs.push(blob);
    }

    pub fn address(&self, findex: u32) -> usize {
        self.slots[findex as usize].load(Ordering::SeqCst)
    }

    pub fn call(&self, bridge: &CraneliftBridge, findex: u32, args: &[u64]) -> u64 {
        use kiln_rt::CallBridge;
        let f = self.code.functions.iter().find(|f| f.findex == findex).unwrap();
        let sig = self.code.fun_sig(f.ty).unwrap();
        unsafe { bridge.static_call(self.address(findex), &sig, args) }
    }
}

/// The process-wide bridge, installed once for every test of this binary.
pub fn bridge() -> Arc<CraneliftBridge> {
    static BRIDGE: OnceLock<Arc<CraneliftBridge>> = OnceLock::new();
    BRIDGE.get_or_init(|| CraneliftBridge::install().unwrap()).clone()
}

/// fun$0 (a, b) = a + b, fun$1 (x) = fun$0(x, 10) * 2, fun$2 () = g0 + 1
/// storing the result back into g0.
pub fn arithmetic_code(op: fn(u32, u32, u32) -> Opcode) -> Code {
    let mut b = CodeBuilder::new();
    let int = b.prim(TypeKind::I32);
    let binary = b.fun_type(&[int, int], int);
    let unary = b.fun_type(&[int], int);
    let nullary = b.fun_type(&[], int);
    let file = b.debug_file("arith.kl");
    let ten = b.int(10);
    let two = b.int(2);
    let one = b.int(1);
    b.global(int);

    b.function(Function::new(0, binary, vec![int, int, int], vec![op(2, 0, 1), Opcode::Ret { src: 2 }], file));
    b.function(Function::new(
        1,
        unary,
        vec![int, int, int, int],
        vec![
            Opcode::Int { dst: 1, index: ten },
            Opcode::Call { dst: 2, fid: 0, args: vec![0, 1] },
            Opcode::Int { dst: 3, index: two },
            Opcode::Mul { dst: 2, a: 2, b: 3 },
            Opcode::Ret { src: 2 },
        ],
        file,
    ));
    b.function(Function::new(
        2,
        nullary,
        vec![int, int],
        vec![
            Opcode::GetGlobal { dst: 0, global: 0 },
            Opcode::Int { dst: 1, index: one },
            Opcode::Add { dst: 0, a: 0, b: 1 },
            Opcode::SetGlobal { global: 0, src: 0 },
            Opcode::Ret { src: 0 },
        ],
        file,
    ));
    b.build()
}

pub fn add(dst: u32, a: u32, b: u32) -> Opcode {
    Opcode::Add { dst, a, b }
}

pub fn sub(dst: u32, a: u32, b: u32) -> Opcode {
    Opcode::Sub { dst, a, b }
}
