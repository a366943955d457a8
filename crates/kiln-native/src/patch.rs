//! Entry-point patches that divert an old function body to the current
//! content of its function-table slot.

use target_lexicon::Architecture;

use crate::error::NativeError;
use crate::memory::write_code;

/// Instruction sequence used to divert a function entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchKind {
    /// `mov rax, imm64` followed by `jmp [rax]`.
    X86_64,
    /// `ldr x16, #16; ldr x16, [x16]; br x16; nop` followed by the literal.
    Aarch64,
}

impl PatchKind {
    pub fn host() -> Result<Self, NativeError> {
        Self::for_architecture(target_lexicon::HOST.architecture)
    }

    pub fn for_architecture(arch: Architecture) -> Result<Self, NativeError> {
        match arch {
            Architecture::X86_64 => Ok(PatchKind::X86_64),
            Architecture::Aarch64(_) => Ok(PatchKind::Aarch64),
            _ => Err(NativeError::UnsupportedHost),
        }
    }

    pub fn len(self) -> usize {
        match self {
            PatchKind::X86_64 => 12,
            PatchKind::Aarch64 => 24,
        }
    }

    /// Machine code jumping to the address stored at `slot`.
    pub fn encode(self, slot: usize) -> Vec<u8> {
        let slot = slot as u64;
        let mut bytes = Vec::with_capacity(self.len());
        match self {
            PatchKind::X86_64 => {
                bytes.extend_from_slice(&[0x48, 0xB8]);
                bytes.extend_from_slice(&slot.to_le_bytes());
                bytes.extend_from_slice(&[0xFF, 0x20]);
            }
            PatchKind::Aarch64 => {
                for insn in [0x5800_0090u32, 0xF940_0210, 0xD61F_0200, 0xD503_201F] {
                    bytes.extend_from_slice(&insn.to_le_bytes());
                }
                bytes.extend_from_slice(&slot.to_le_bytes());
            }
        }
        bytes
    }
}

/// Overwrites the entry of `old_fun` with a jump through `slot`.
///
/// # Safety
/// `old_fun` must point to at least `kind.len()` bytes of executable code
/// that no thread is currently executing.
pub unsafe fn patch_method(kind: PatchKind, old_fun: usize, slot: usize) -> Result<(), NativeError> {
    log::debug!("patching {:#x} to jump through slot {:#x}", old_fun, slot);
    write_code(old_fun, &kind.encode(slot))
}
