use std::alloc::Layout;
use std::fmt;
use std::sync::Arc;

use bumpalo::Bump;
use kiln_code::{Code, Type, TypeId, TypeKind};
use kiln_gc::{manage_closure, register_global_root, set_dump_types, unregister_global_root, Closure, Dynamic};
use kiln_layout::pointer_size;
use kiln_native::CompiledFunction;
use kiln_rt::{call_method, null_closure, setup_exception, VmError};
use libloading::Library;
use parking_lot::{Mutex, RwLock};

use crate::config::LoadOptions;
use crate::error::LoadError;
use crate::globals::GlobalStorage;
use crate::hash::hash_all;
use crate::jit::{self, BoxedBackend};
use crate::linker::{bind_owners, function_signatures, EnumMeta, FunctionIndex, ModuleContext, ObjMeta, TypeTable, VirtualMeta};
use crate::natives::NativeResolver;
use crate::registry;
use crate::symbols::{self, CodeImage};

/// State kept for modules loaded with hot reload enabled.
pub(crate) struct HotState {
    pub(crate) backend: BoxedBackend,
    /// Content hash of each compiled function, by position.
    pub(crate) hashes: Vec<u64>,
    /// Used to resolve natives a patch adds.
    pub(crate) options: LoadOptions,
}

/// Code compiled by a hot reload. Old bodies jump into it, so it lives as
/// long as the module.
pub(crate) struct PatchImage {
    pub(crate) image: CodeImage,
    /// Slots of functions the old module has no counterpart for.
    pub(crate) _slots: Arc<ModuleContext>,
    pub(crate) _libraries: Vec<Arc<Library>>,
}

/// A loaded, linked and compiled bytecode unit.
pub struct Module {
    pub(crate) code: Arc<Code>,
    pub(crate) storage: GlobalStorage,
    pub(crate) ctx: Arc<ModuleContext>,
    pub(crate) types: TypeTable,
    pub(crate) image: CodeImage,
    pub(crate) patches: RwLock<Vec<PatchImage>>,
    pub(crate) hot: Mutex<Option<HotState>>,
    _constants: Mutex<Bump>,
    _libraries: Vec<Arc<Library>>,
}

impl Module {
    /// Loads `code` with the Cranelift backend and publishes the module.
    pub fn load(code: impl Into<Arc<Code>>, options: &LoadOptions) -> Result<Arc<Module>, LoadError> {
        jit::ensure_call_bridge()?;
        Self::load_with(code, options, jit::default_backend()?)
    }

    /// Loads `code` with the given backend. On error nothing is published
    /// and every GC root registered so far is released.
    pub fn load_with(code: impl Into<Arc<Code>>, options: &LoadOptions, mut backend: BoxedBackend) -> Result<Arc<Module>, LoadError> {
        let code = code.into();
        log::info!(
            "loading module: {} functions, {} natives, {} globals",
            code.functions.len(),
            code.natives.len(),
            code.globals.len()
        );

        // --- Globals --- //
        let storage = GlobalStorage::allocate(code.global_kinds()?)?;
        let mut roots = RootGuard::default();
        for g in 0..storage.len() as u32 {
            let (Some(kind), Some(addr)) = (storage.kind(g), storage.addr(g)) else { continue };
            if kind == TypeKind::Fun {
                unsafe { storage.write_word(g, manage_closure(null_closure())) };
            }
            if kind.is_ptr() {
                roots.register(addr);
            }
        }

        // --- Function tables --- //
        let index = FunctionIndex::build(&code)?;
        let ctx = Arc::new(ModuleContext::new(function_signatures(&code, &index)?));

        // --- Natives --- //
        let mut resolver = NativeResolver::new(options);
        for native in &code.natives {
            ctx.set(native.findex, resolver.resolve(&code, native)?);
        }
        let libraries = resolver.into_libraries();

        // --- Types --- //
        let types = TypeTable::link(&code, &storage, &ctx)?;
        let owners = bind_owners(&code, &index)?;

        // --- Compile --- //
        let target = jit::link_target(&storage, &ctx, ctx.slot_addrs());
        let (blob, placed) = jit::compile_all(&mut *backend, &code, target)?;
        for (findex, offset) in placed {
            ctx.set(findex, blob.address_of(offset));
        }
        types.flush_all();

        // --- Constants --- //
        let arena = Bump::new();
        materialize_constants(&code, &storage, &types, &arena, &mut roots)?;

        let hot = if options.hot_reload {
            let hashes = hash_all(&code, &index, &owners)?;
            Some(HotState { backend, hashes, options: options.clone() })
        } else {
            None
        };

        roots.disarm();
        let module = Arc::new(Module {
            image: CodeImage { blob, code: code.clone(), index, owners },
            code,
            storage,
            ctx,
            types,
            patches: RwLock::new(Vec::new()),
            hot: Mutex::new(hot),
            _constants: Mutex::new(arena),
            _libraries: libraries,
        });

        // --- Publish --- //
        registry::publish(module.clone());
        setup_exception(symbols::resolve_symbol, symbols::capture_stack);
        set_dump_types(registry::dump_types);
        log::info!("module loaded, code at {:#x} ({} bytes)", module.image.blob.base(), module.image.blob.size());
        Ok(module)
    }

    pub fn code(&self) -> &Arc<Code> {
        &self.code
    }

    pub fn hot_reload_enabled(&self) -> bool {
        self.hot.lock().is_some()
    }

    pub fn function_count(&self) -> usize {
        self.ctx.len()
    }

    /// Current entry address of function id `fid`.
    pub fn function_ptr(&self, fid: u32) -> Option<usize> {
        self.ctx.get(fid)
    }

    /// A bare closure over the current entry of `fid`.
    pub fn closure(&self, fid: u32) -> Option<Arc<Closure>> {
        let sig = self.ctx.signature(fid)?.clone();
        Some(Closure::bare(sig, self.ctx.get(fid)?))
    }

    /// Calls function id `fid` reflectively.
    pub fn call(&self, fid: u32, args: &[Dynamic]) -> Result<Dynamic, VmError> {
        let closure = self.closure(fid).ok_or(VmError::NullFunction)?;
        call_method(&closure, args)
    }

    pub fn global_addr(&self, global: u32) -> Option<usize> {
        self.storage.addr(global)
    }

    /// Raw bits of a global, zero-extended.
    pub fn global_bits(&self, global: u32) -> Option<u64> {
        self.storage.read(global)
    }

    /// The value of a global, boxed by its kind. Pointers that do not
    /// address a managed value come back raw.
    pub fn global_value(&self, global: u32) -> Option<Dynamic> {
        let kind = self.storage.kind(global)?;
        let bits = self.storage.read(global)?;
        Some(Dynamic::from_raw(bits, kind))
    }

    pub fn obj_meta(&self, ty: TypeId) -> Option<&Arc<ObjMeta>> {
        self.types.obj(ty)
    }

    pub fn enum_meta(&self, ty: TypeId) -> Option<&Arc<EnumMeta>> {
        self.types.enum_meta(ty)
    }

    pub fn virtual_meta(&self, ty: TypeId) -> Option<&Arc<VirtualMeta>> {
        self.types.virtual_meta(ty)
    }

    /// Content hash of the compiled function at `position`, when hot
    /// reload is enabled.
    pub fn function_hash(&self, position: usize) -> Option<u64> {
        self.hot.lock().as_ref()?.hashes.get(position).copied()
    }

    /// Start and end of the initial code blob.
    pub fn code_bounds(&self) -> (usize, usize) {
        let blob = &self.image.blob;
        (blob.base(), blob.base() + blob.size())
    }

    /// Placement of the code `fid` currently runs, in whichever image
    /// holds it.
    pub fn compiled_function(&self, fid: u32) -> Option<CompiledFunction> {
        let addr = self.ctx.get(fid)?;
        let find = |image: &CodeImage| {
            let offset = addr.checked_sub(image.blob.base())?;
            image.blob.functions().iter().find(|f| f.offset == offset).cloned()
        };
        if self.image.contains(addr) {
            return find(&self.image);
        }
        self.patches.read().iter().find(|p| p.image.contains(addr)).and_then(|p| find(&p.image))
    }

    pub fn contains_code(&self, addr: usize) -> bool {
        self.image.contains(addr) || self.patches.read().iter().any(|p| p.image.contains(addr))
    }

    pub fn code_ranges(&self) -> Vec<(usize, usize)> {
        let mut ranges: Vec<_> = self.image.code_range().into_iter().collect();
        ranges.extend(self.patches.read().iter().filter_map(|p| p.image.code_range()));
        ranges
    }

    pub fn resolve_symbol(&self, addr: usize) -> Option<String> {
        if self.image.contains(addr) {
            return self.image.symbol(addr);
        }
        self.patches.read().iter().find(|p| p.image.contains(addr)).and_then(|p| p.image.symbol(addr))
    }

    /// Closure-type identity of every function type of the unit.
    pub fn closure_type_addrs(&self) -> Vec<usize> {
        (0..self.code.types.len() as u32)
            .filter(|t| matches!(self.code.types[*t as usize], Type::Fun(_)))
            .filter_map(|t| self.code.fun_sig(TypeId(t)).ok())
            .map(|sig| sig.closure_type_addr())
            .collect()
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (start, end) = self.code_bounds();
        f.debug_struct("Module")
            .field("functions", &self.function_count())
            .field("globals", &self.storage.len())
            .field("code", &format_args!("{:#x}..{:#x}", start, end))
            .field("patches", &self.patches.read().len())
            .finish()
    }
}

/// GC roots registered during a load, released again if the load fails.
#[derive(Default)]
struct RootGuard {
    roots: Vec<usize>,
    armed: bool,
}

impl RootGuard {
    fn register(&mut self, addr: usize) {
        register_global_root(addr as *mut u8);
        self.roots.push(addr);
        self.armed = true;
    }

    fn release(&mut self, addr: usize) {
        unregister_global_root(addr as *mut u8);
        self.roots.retain(|r| *r != addr);
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RootGuard {
    fn drop(&mut self) {
        if self.armed {
            for addr in self.roots.drain(..) {
                unregister_global_root(addr as *mut u8);
            }
        }
    }
}

/// Builds every constant object and stores it into its global. Objects
/// and their strings live in `arena`.
fn materialize_constants(
    code: &Code,
    storage: &GlobalStorage,
    types: &TypeTable,
    arena: &Bump,
    roots: &mut RootGuard,
) -> Result<(), LoadError> {
    let word = pointer_size();
    for constant in &code.constants {
        let global = constant.global;
        let not_object = || LoadError::ConstantNotObject { global };
        let ty = *code.globals.get(global as usize).ok_or_else(not_object)?;
        let meta = types.obj(ty).ok_or_else(not_object)?;
        let fields = code.obj_all_fields(ty)?;

        let layout = Layout::from_size_align(meta.layout.size.max(word), meta.layout.align.max(word))
            .map_err(|_| LoadError::Allocation { what: "constant" })?;
        let obj = arena.alloc_layout(layout).as_ptr();
        unsafe {
            std::ptr::write_bytes(obj, 0, layout.size());
            std::ptr::write(obj as *mut usize, meta.header());
        }

        for (i, (field, literal)) in fields.iter().zip(&constant.fields).enumerate() {
            let missing = || LoadError::ConstantLiteral { global, field: i, index: *literal };
            let at = unsafe { obj.add(meta.layout.offsets[i]) };
            let kind = code.kind_of(field.ty)?;
            let lit = *literal as usize;
            unsafe {
                match kind {
                    TypeKind::I32 => std::ptr::write(at as *mut i32, *code.ints.get(lit).ok_or_else(missing)?),
                    TypeKind::Bool => std::ptr::write(at, (*literal != 0) as u8),
                    TypeKind::F64 => std::ptr::write(at as *mut f64, *code.floats.get(lit).ok_or_else(missing)?),
                    TypeKind::Bytes => {
                        let s = code.strings.get(lit).ok_or_else(missing)?;
                        let bytes = arena.alloc_slice_fill_copy(s.len() + 1, 0u8);
                        bytes[..s.len()].copy_from_slice(s.as_bytes());
                        std::ptr::write(at as *mut usize, bytes.as_ptr() as usize);
                    }
                    TypeKind::Type => {
                        let t = code.types.get(lit).ok_or_else(missing)?;
                        std::ptr::write(at as *mut usize, t as *const Type as usize);
                    }
                    k if k.is_ptr() => {
                        let value = storage.read(*literal).ok_or_else(missing)?;
                        std::ptr::write(at as *mut usize, value as usize);
                    }
                    k => return Err(LoadError::ConstantField { ty: meta.name.clone(), field: i, kind: k }),
                }
            }
        }

        unsafe { storage.write_word(global, obj as usize) };
        if let Some(addr) = storage.addr(global) {
            roots.release(addr);
        }
        log::debug!("constant {} materialized for global {}", meta.name, global);
    }
    Ok(())
}
