//! Return-address symbolication and native stack capture.

use std::sync::Arc;

use kiln_code::Code;
use kiln_native::CodeBlob;

use crate::linker::{Binding, FunctionIndex};
use crate::registry;

/// One finalized blob together with the unit its functions came from.
///
/// A module has one image for its initial compilation plus one per applied
/// hot-reload patch.
pub struct CodeImage {
    pub blob: CodeBlob,
    pub code: Arc<Code>,
    pub index: FunctionIndex,
    pub owners: Vec<Option<Binding>>,
}

impl CodeImage {
    pub fn contains(&self, addr: usize) -> bool {
        self.blob.contains(addr)
    }

    /// The address range holding function bodies. Whatever the blob holds
    /// before its first function is trampoline code.
    pub fn code_range(&self) -> Option<(usize, usize)> {
        let first = self.blob.functions().first()?;
        Some((self.blob.address_of(first.offset), self.blob.base() + self.blob.size()))
    }

    /// Position in `code.functions` and opcode index of the code at `addr`.
    pub fn resolve_pos(&self, addr: usize) -> Option<(usize, usize)> {
        if !self.contains(addr) {
            return None;
        }
        let offset = addr - self.blob.base();
        let functions = self.blob.functions();
        let after = functions.partition_point(|f| f.offset <= offset);
        if after == 0 {
            return None;
        }
        let f = &functions[after - 1];
        let op = f.debug.op_at((offset - f.offset) as u32)?;
        Some((self.index.compiled_position(f.findex)?, op))
    }

    /// `Type.field(file:line)` or `fun$id(file:line)`.
    pub fn symbol(&self, addr: usize) -> Option<String> {
        let (pos, op) = self.resolve_pos(addr)?;
        let function = self.code.functions.get(pos)?;
        let (file, line) = function.debug.get(op).copied()?;
        let name = match self.owners.get(pos).and_then(Option::as_ref) {
            Some(b) => format!("{}.{}", b.type_name, b.field),
            None => format!("fun${}", function.findex),
        };
        Some(format!("{}({}:{})", name, self.code.debug_file(file), line))
    }
}

/// Resolver installed into the exception facility.
pub fn resolve_symbol(addr: usize) -> Option<String> {
    registry::find_module(addr)?.resolve_symbol(addr)
}

/// Stack capture installed into the exception facility. Collects return
/// addresses of managed frames between this frame and the stack top the
/// current thread registered; threads without one capture nothing.
pub fn capture_stack(out: &mut [usize]) -> usize {
    let Some(top) = kiln_rt::stack_top() else { return 0 };
    let marker = 0usize;
    let bottom = std::hint::black_box(&marker) as *const usize as usize;
    if bottom >= top {
        return 0;
    }
    let ranges = registry::code_ranges();
    let word = std::mem::size_of::<usize>();
    let words = (bottom..top)
        .step_by(word)
        .map(|addr| unsafe { std::ptr::read_volatile(addr as *const usize) });
    scan_stack(words, bottom, top, &ranges, out)
}

/// Walks stack words looking for `(saved frame pointer, return address)`
/// pairs: a word pointing into the stack followed by one inside managed
/// code. Stops once `out` is full.
pub fn scan_stack(
    words: impl IntoIterator<Item = usize>,
    bottom: usize,
    top: usize,
    ranges: &[(usize, usize)],
    out: &mut [usize],
) -> usize {
    let mut count = 0;
    let mut previous = None;
    for word in words {
        if count == out.len() {
            break;
        }
        if let Some(frame) = previous {
            if frame > bottom && frame < top && ranges.iter().any(|(start, end)| word >= *start && word < *end) {
                out[count] = word;
                count += 1;
            }
        }
        previous = Some(word);
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_keeps_framed_code_addresses() {
        let (bottom, top) = (0x1000, 0x2000);
        let ranges = [(0x5000, 0x6000)];
        let words = [0x1100, 0x5010, 0x7, 0x5020, 0x1200, 0x4fff, 0x1300, 0x5fff];
        let mut out = [0; 8];
        let n = scan_stack(words, bottom, top, &ranges, &mut out);
        // 0x5020 follows a word outside the stack, 0x4fff is not code.
        assert_eq!(&out[..n], &[0x5010, 0x5fff]);
    }

    #[test]
    fn test_scan_respects_capacity() {
        let words = [0x1100, 0x5010, 0x1100, 0x5020, 0x1100, 0x5030];
        let mut out = [0; 2];
        assert_eq!(scan_stack(words, 0x1000, 0x2000, &[(0x5000, 0x6000)], &mut out), 2);
        assert_eq!(out, [0x5010, 0x5020]);
        assert_eq!(scan_stack(words, 0x1000, 0x2000, &[(0x5000, 0x6000)], &mut []), 0);
    }

    #[test]
    fn test_capture_without_stack_top() {
        let mut out = [0; 4];
        assert_eq!(capture_stack(&mut out), 0);
    }
}
