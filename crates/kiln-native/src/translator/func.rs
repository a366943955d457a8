//! Translation of bytecode functions into Cranelift IR.
//!
//! Registers are plain SSA values: the instruction set has no branches, so
//! every register read sees the last write in program order. Each opcode
//! gets its index as source location, which is how per-opcode code offsets
//! are recovered after compilation.

use cranelift_codegen::ir::{Function as ClifFunction, InstBuilder, MemFlags, SourceLoc, Type, UserFuncName, Value};
use cranelift_codegen::isa::TargetIsa;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use kiln_code::{Code, Function, Opcode, Reg, TypeKind};
use kiln_layout::clif_type;

use crate::backend::LinkTarget;
use crate::translator::helpers::{iconst, native_signature, zero};
use crate::NativeError;

/// Translates the body of `function` into Cranelift IR.
pub fn translate_function(
    code: &Code,
    function: &Function,
    target: &LinkTarget,
    isa: &dyn TargetIsa,
    fctx: &mut FunctionBuilderContext,
) -> Result<ClifFunction, NativeError> {
    let findex = function.findex;
    let sig = code.fun_sig(function.ty)?;
    let pointer_type = isa.pointer_type();
    let signature = native_signature(&sig, false, pointer_type, isa.default_call_conv());

    let kinds = function
        .regs
        .iter()
        .map(|ty| code.kind_of(*ty))
        .collect::<Result<Vec<_>, _>>()?;
    if kinds.len() < sig.nargs() {
        return Err(NativeError::translation(findex, "fewer registers than arguments"));
    }

    let mut func = ClifFunction::with_name_signature(UserFuncName::user(0, findex), signature);
    let mut builder = FunctionBuilder::new(&mut func, fctx);
    let entry_block = builder.create_block();
    builder.append_block_params_for_function_params(entry_block);
    builder.switch_to_block(entry_block);
    builder.seal_block(entry_block);

    let mut regs: Vec<Option<Value>> = vec![None; kinds.len()];
    let mut params = builder.block_params(entry_block).to_vec().into_iter();
    for (reg, kind) in sig.args().iter().enumerate() {
        if *kind != TypeKind::Void {
            regs[reg] = params.next();
        }
    }

    let mut translator = FunctionTranslator { builder, code, target, findex, kinds, regs, pointer_type, ret: sig.ret() };
    let mut terminated = false;
    for (i, op) in function.ops.iter().enumerate() {
        translator.builder.set_srcloc(SourceLoc::new(i as u32));
        if translator.translate_op(op)? {
            terminated = true;
            break;
        }
    }
    if !terminated {
        translator.return_zero();
    }
    translator.builder.finalize();
    Ok(func)
}

struct FunctionTranslator<'a, 'b> {
    builder: FunctionBuilder<'b>,
    code: &'a Code,
    target: &'a LinkTarget,
    findex: u32,
    kinds: Vec<TypeKind>,
    regs: Vec<Option<Value>>,
    pointer_type: Type,
    ret: TypeKind,
}

impl FunctionTranslator<'_, '_> {
    fn error(&self, message: impl Into<String>) -> NativeError {
        NativeError::translation(self.findex, message)
    }

    fn kind(&self, reg: Reg) -> Result<TypeKind, NativeError> {
        self.kinds.get(reg as usize).copied().ok_or_else(|| self.error(format!("register r{} out of range", reg)))
    }

    fn clif(&self, reg: Reg) -> Result<Option<Type>, NativeError> {
        Ok(clif_type(self.kind(reg)?, self.pointer_type))
    }

    fn value_type(&self, reg: Reg) -> Result<Type, NativeError> {
        self.clif(reg)?.ok_or_else(|| self.error(format!("register r{} is void", reg)))
    }

    /// Current value of `reg`. Registers never written read as zero.
    fn get(&mut self, reg: Reg) -> Result<Value, NativeError> {
        let ty = self.value_type(reg)?;
        match self.regs[reg as usize] {
            Some(v) => Ok(v),
            None => Ok(zero(&mut self.builder, ty)),
        }
    }

    fn set(&mut self, reg: Reg, value: Value) -> Result<(), NativeError> {
        let expected = self.value_type(reg)?;
        let actual = self.builder.func.dfg.value_type(value);
        if expected != actual {
            return Err(self.error(format!("r{} holds {} but receives {}", reg, expected, actual)));
        }
        self.regs[reg as usize] = Some(value);
        Ok(())
    }

    fn global_addr(&mut self, global: u32) -> Result<Value, NativeError> {
        let addr = self.target.global_addr(global).ok_or_else(|| self.error(format!("unknown global {}", global)))?;
        Ok(self.builder.ins().iconst(self.pointer_type, addr as i64))
    }

    /// Returns true once the block has been terminated.
    fn translate_op(&mut self, op: &Opcode) -> Result<bool, NativeError> {
        match op {
            Opcode::Mov { dst, src } => {
                if self.clif(*dst)?.is_none() {
                    return Ok(false);
                }
                let v = self.get(*src)?;
                self.set(*dst, v)?;
            }
            Opcode::Int { dst, index } => {
                let value = *self.code.ints.get(*index as usize).ok_or_else(|| self.error(format!("int #{} out of range", index)))?;
                let kind = self.kind(*dst)?;
                let ty = self.value_type(*dst)?;
                let v = match kind {
                    TypeKind::F32 => self.builder.ins().f32const(value as f32),
                    TypeKind::F64 => self.builder.ins().f64const(value as f64),
                    _ => iconst(&mut self.builder, ty, value as i64),
                };
                self.set(*dst, v)?;
            }
            Opcode::Float { dst, index } => {
                let value = *self.code.floats.get(*index as usize).ok_or_else(|| self.error(format!("float #{} out of range", index)))?;
                let v = match self.kind(*dst)? {
                    TypeKind::F32 => self.builder.ins().f32const(value as f32),
                    TypeKind::F64 => self.builder.ins().f64const(value),
                    other => return Err(self.error(format!("float literal into {:?} register", other))),
                };
                self.set(*dst, v)?;
            }
            Opcode::Bool { dst, value } => {
                let ty = self.value_type(*dst)?;
                let v = iconst(&mut self.builder, ty, *value as i64);
                self.set(*dst, v)?;
            }
            Opcode::Null { dst } => {
                let kind = self.kind(*dst)?;
                if !kind.is_ptr() {
                    return Err(self.error(format!("null into {:?} register", kind)));
                }
                let v = self.builder.ins().iconst(self.pointer_type, 0);
                self.set(*dst, v)?;
            }
            Opcode::Add { dst, a, b } | Opcode::Sub { dst, a, b } | Opcode::Mul { dst, a, b } => {
                let kind = self.kind(*dst)?;
                if !kind.is_integer() && !kind.is_float() {
                    return Err(self.error(format!("arithmetic on {:?}", kind)));
                }
                let x = self.get(*a)?;
                let y = self.get(*b)?;
                let ins = self.builder.ins();
                let v = match (op, kind.is_float()) {
                    (Opcode::Add { .. }, false) => ins.iadd(x, y),
                    (Opcode::Sub { .. }, false) => ins.isub(x, y),
                    (Opcode::Mul { .. }, false) => ins.imul(x, y),
                    (Opcode::Add { .. }, true) => ins.fadd(x, y),
                    (Opcode::Sub { .. }, true) => ins.fsub(x, y),
                    (_, true) => ins.fmul(x, y),
                    (_, false) => ins.imul(x, y),
                };
                self.set(*dst, v)?;
            }
            Opcode::Call { dst, fid, args } => self.translate_call(*dst, *fid, args)?,
            Opcode::GetGlobal { dst, global } => {
                if let Some(ty) = self.clif(*dst)? {
                    let addr = self.global_addr(*global)?;
                    let v = self.builder.ins().load(ty, MemFlags::trusted(), addr, 0);
                    self.set(*dst, v)?;
                }
            }
            Opcode::SetGlobal { global, src } => {
                if self.clif(*src)?.is_some() {
                    let v = self.get(*src)?;
                    let addr = self.global_addr(*global)?;
                    self.builder.ins().store(MemFlags::trusted(), v, addr, 0);
                }
            }
            Opcode::Ret { src } => {
                if clif_type(self.ret, self.pointer_type).is_none() {
                    self.builder.ins().return_(&[]);
                } else {
                    let v = self.get(*src)?;
                    self.builder.ins().return_(&[v]);
                }
                return Ok(true);
            }
        }
        Ok(false)
    }

    // --- Calls go through the callee's function-table slot --- //
    fn translate_call(&mut self, dst: Reg, fid: u32, args: &[Reg]) -> Result<(), NativeError> {
        let slot = self.target.slot(fid).ok_or(NativeError::UnknownFunction(fid))?;
        let callee_sig = self.target.signatures.get(fid as usize).cloned().ok_or(NativeError::UnknownFunction(fid))?;
        if callee_sig.nargs() != args.len() {
            return Err(self.error(format!("fun${} takes {} arguments, {} given", fid, callee_sig.nargs(), args.len())));
        }

        let mut values = Vec::with_capacity(args.len());
        for (kind, reg) in callee_sig.args().iter().zip(args) {
            if *kind != TypeKind::Void {
                values.push(self.get(*reg)?);
            }
        }

        let signature = native_signature(&callee_sig, false, self.pointer_type, self.builder.func.signature.call_conv);
        let sig_ref = self.builder.import_signature(signature);
        let slot_addr = self.builder.ins().iconst(self.pointer_type, slot as i64);
        let callee = self.builder.ins().load(self.pointer_type, MemFlags::trusted(), slot_addr, 0);
        let call = self.builder.ins().call_indirect(sig_ref, callee, &values);
        let result = self.builder.inst_results(call).first().copied();

        match (result, self.clif(dst)?) {
            (Some(v), Some(_)) => self.set(dst, v)?,
            (None, Some(ty)) => {
                let v = zero(&mut self.builder, ty);
                self.set(dst, v)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn return_zero(&mut self) {
        match clif_type(self.ret, self.pointer_type) {
            Some(ty) => {
                let v = zero(&mut self.builder, ty);
                self.builder.ins().return_(&[v]);
            }
            None => {
                self.builder.ins().return_(&[]);
            }
        }
    }
}
