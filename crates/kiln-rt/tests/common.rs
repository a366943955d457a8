// Shared fixtures for reflective-call tests.
#![allow(dead_code)]

use std::sync::Arc;

use kiln_code::{FunSig, TypeKind};
use kiln_gc::{Closure, Dynamic};
use kiln_rt::{kiln_wrapper_entry, set_call_bridge, CallBridge};

/// A bridge for functions whose parameters and result are all plain words.
pub struct WordBridge;

impl CallBridge for WordBridge {
    unsafe fn static_call(&self, fun: usize, sig: &FunSig, args: &[u64]) -> u64 {
        match sig.nargs() {
            0 => std::mem::transmute::<usize, extern "C" fn() -> u64>(fun)(),
            1 => std::mem::transmute::<usize, extern "C" fn(u64) -> u64>(fun)(args[0]),
            2 => std::mem::transmute::<usize, extern "C" fn(u64, u64) -> u64>(fun)(args[0], args[1]),
            3 => std::mem::transmute::<usize, extern "C" fn(u64, u64, u64) -> u64>(fun)(args[0], args[1], args[2]),
            n => panic!("WordBridge: unsupported arity {}", n),
        }
    }

    fn wrapper_entry(&self, sig: &FunSig) -> Option<usize> {
        match sig.nargs() {
            0 => Some(shim0 as usize),
            1 => Some(shim1 as usize),
            2 => Some(shim2 as usize),
            _ => None,
        }
    }
}

extern "C" fn shim0(wrapper: u64) -> u64 {
    let mut ret = 0;
    unsafe { kiln_wrapper_entry(wrapper as usize as *const Closure, std::ptr::null(), &mut ret) };
    ret
}

extern "C" fn shim1(wrapper: u64, a: u64) -> u64 {
    let mut ret = 0;
    let args = [a];
    unsafe { kiln_wrapper_entry(wrapper as usize as *const Closure, args.as_ptr(), &mut ret) };
    ret
}

extern "C" fn shim2(wrapper: u64, a: u64, b: u64) -> u64 {
    let mut ret = 0;
    let args = [a, b];
    unsafe { kiln_wrapper_entry(wrapper as usize as *const Closure, args.as_ptr(), &mut ret) };
    ret
}

pub fn setup() {
    let _ = env_logger::builder().is_test(true).try_init();
    set_call_bridge(Arc::new(WordBridge));
}

pub fn sig(args: &[TypeKind], ret: TypeKind) -> Arc<FunSig> {
    Arc::new(FunSig::new(args.to_vec(), ret))
}

pub extern "C" fn add_i32(a: u64, b: u64) -> u64 {
    (a as u32 as i32).wrapping_add(b as u32 as i32) as u32 as u64
}

pub extern "C" fn identity(a: u64) -> u64 {
    a
}

/// `(Array) -> I32`: the length of the packed argument list.
pub extern "C" fn count_args(list: u64) -> u64 {
    let list = unsafe { &*(list as usize as *const Vec<Dynamic>) };
    list.len() as u64
}

/// `(Array) -> I32`: the sum of the packed arguments.
pub extern "C" fn sum_args(list: u64) -> u64 {
    let list = unsafe { &*(list as usize as *const Vec<Dynamic>) };
    list.iter().map(|v| v.to_i32().unwrap_or(0)).sum::<i32>() as u32 as u64
}

pub fn add_closure() -> Arc<Closure> {
    Closure::bare(sig(&[TypeKind::I32, TypeKind::I32], TypeKind::I32), add_i32 as usize)
}
