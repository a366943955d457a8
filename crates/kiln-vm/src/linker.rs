//! Type linkage: the flat function-id space and the runtime metadata of
//! object, enum and virtual types.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use kiln_code::{Code, FunSig, Type, TypeId, TypeKind};
use kiln_layout::{LayoutComputer, RecordLayout};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::LoadError;
use crate::globals::GlobalStorage;

/// Where a function id is implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionRef {
    /// Position in `Code::functions`.
    Compiled(usize),
    /// Position in `Code::natives`.
    Native(usize),
}

/// Function id → implementation, dense over every compiled function and
/// native of a unit.
#[derive(Debug, Clone)]
pub struct FunctionIndex {
    refs: Vec<FunctionRef>,
}

impl FunctionIndex {
    pub fn build(code: &Code) -> Result<Self, LoadError> {
        let count = code.function_count();
        let mut refs: Vec<Option<FunctionRef>> = vec![None; count];
        let mut place = |fid: u32, r: FunctionRef| -> Result<(), LoadError> {
            let slot = refs.get_mut(fid as usize).ok_or(LoadError::FunctionOutOfRange { fid, count })?;
            if slot.is_some() {
                return Err(LoadError::DuplicateFunction { fid });
            }
            *slot = Some(r);
            Ok(())
        };
        for (i, f) in code.functions.iter().enumerate() {
            place(f.findex, FunctionRef::Compiled(i))?;
        }
        for (i, n) in code.natives.iter().enumerate() {
            place(n.findex, FunctionRef::Native(i))?;
        }
        // Ids are unique and in range, so every entry has been filled.
        let refs = refs
            .into_iter()
            .enumerate()
            .map(|(fid, r)| r.ok_or(LoadError::FunctionOutOfRange { fid: fid as u32, count }))
            .collect::<Result<_, _>>()?;
        Ok(Self { refs })
    }

    pub fn get(&self, fid: u32) -> Option<FunctionRef> {
        self.refs.get(fid as usize).copied()
    }

    pub fn compiled_position(&self, fid: u32) -> Option<usize> {
        match self.get(fid)? {
            FunctionRef::Compiled(pos) => Some(pos),
            FunctionRef::Native(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

/// Kind-level signature of every function id.
pub fn function_signatures(code: &Code, index: &FunctionIndex) -> Result<Vec<Arc<FunSig>>, LoadError> {
    (0..index.len() as u32)
        .map(|fid| {
            let ty = match index.get(fid) {
                Some(FunctionRef::Compiled(i)) => code.functions[i].ty,
                Some(FunctionRef::Native(i)) => code.natives[i].ty,
                None => return Err(LoadError::FunctionOutOfRange { fid, count: index.len() }),
            };
            Ok(code.fun_sig(ty)?)
        })
        .collect()
}

/// The linkage context shared by a module and the metadata of its types:
/// one atomic function-pointer slot per function id.
#[derive(Debug)]
pub struct ModuleContext {
    functions: Box<[AtomicUsize]>,
    signatures: Vec<Arc<FunSig>>,
}

impl ModuleContext {
    pub fn new(signatures: Vec<Arc<FunSig>>) -> Self {
        let functions = signatures.iter().map(|_| AtomicUsize::new(0)).collect();
        Self { functions, signatures }
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn get(&self, fid: u32) -> Option<usize> {
        self.functions.get(fid as usize).map(|s| s.load(Ordering::Acquire))
    }

    pub fn set(&self, fid: u32, addr: usize) {
        if let Some(slot) = self.functions.get(fid as usize) {
            slot.store(addr, Ordering::Release);
        }
    }

    /// Address of the slot itself, as linked into generated code.
    pub fn slot_addr(&self, fid: u32) -> Option<usize> {
        self.functions.get(fid as usize).map(|s| s as *const AtomicUsize as usize)
    }

    pub fn slot_addrs(&self) -> Vec<usize> {
        self.functions.iter().map(|s| s as *const AtomicUsize as usize).collect()
    }

    pub fn signature(&self, fid: u32) -> Option<&Arc<FunSig>> {
        self.signatures.get(fid as usize)
    }

    pub fn signatures(&self) -> &[Arc<FunSig>] {
        &self.signatures
    }
}

/// The object field a compiled function implements.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Binding {
    pub type_name: String,
    pub field: String,
}

/// Owner binding of each compiled function, by position in
/// `Code::functions`. Prototype entries and method bindings whose field
/// holds a function or a dynamic value both count.
pub fn bind_owners(code: &Code, index: &FunctionIndex) -> Result<Vec<Option<Binding>>, LoadError> {
    let mut owners = vec![None; code.functions.len()];
    for (t, ty) in code.types.iter().enumerate() {
        let Type::Obj(obj) = ty else { continue };
        for proto in &obj.proto {
            if let Some(pos) = index.compiled_position(proto.findex) {
                owners[pos] = Some(Binding { type_name: obj.name.clone(), field: proto.name.clone() });
            }
        }
        for (field_id, fid) in &obj.bindings {
            let field = code.obj_field(TypeId(t as u32), *field_id)?;
            let kind = code.kind_of(field.ty)?;
            if !matches!(kind, TypeKind::Fun | TypeKind::Dyn) {
                continue;
            }
            if let Some(pos) = index.compiled_position(*fid) {
                owners[pos] = Some(Binding { type_name: obj.name.clone(), field: field.name.clone() });
            }
        }
    }
    Ok(owners)
}

/// Runtime view of an object type.
#[derive(Debug)]
pub struct ObjMeta {
    pub ty: TypeId,
    pub name: String,
    /// One header word followed by every field, inherited ones first.
    pub layout: RecordLayout,
    /// Address of the global holding the canonical instance.
    pub global: Option<usize>,
    /// `(prototype slot, function id)`, super types first so overrides win.
    virtuals: Vec<(u32, u32)>,
    methods: FxHashMap<String, u32>,
    dispatch: RwLock<Vec<usize>>,
    ctx: Arc<ModuleContext>,
}

impl ObjMeta {
    pub fn method(&self, name: &str) -> Option<u32> {
        self.methods.get(name).copied()
    }

    /// Current entry of prototype slot `pindex`.
    pub fn dispatch_entry(&self, pindex: u32) -> Option<usize> {
        self.dispatch.read().get(pindex as usize).copied()
    }

    pub fn dispatch_table(&self) -> Vec<usize> {
        self.dispatch.read().clone()
    }

    /// Rebuilds the dispatch table from the current function table.
    pub fn flush(&self) {
        let len = self.virtuals.iter().map(|(p, _)| *p as usize + 1).max().unwrap_or(0);
        let mut table = vec![0; len];
        for (pindex, fid) in &self.virtuals {
            table[*pindex as usize] = self.ctx.get(*fid).unwrap_or(0);
        }
        *self.dispatch.write() = table;
    }

    /// Address a constant instance stores in its header word.
    pub fn header(&self) -> usize {
        self as *const ObjMeta as usize
    }
}

#[derive(Debug)]
pub struct EnumMeta {
    pub ty: TypeId,
    pub name: String,
    /// Per constructor: a tag word followed by the parameters.
    pub constructs: Vec<(String, RecordLayout)>,
    pub global: Option<usize>,
}

impl EnumMeta {
    pub fn construct(&self, name: &str) -> Option<usize> {
        self.constructs.iter().position(|(n, _)| n == name)
    }
}

#[derive(Debug)]
pub struct VirtualMeta {
    pub ty: TypeId,
    /// Three header words (type, backing value, next) followed by the fields.
    pub layout: RecordLayout,
    lookup: FxHashMap<String, usize>,
}

impl VirtualMeta {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.lookup.get(name).copied()
    }

    pub fn field_offset(&self, name: &str) -> Option<usize> {
        self.field_index(name).and_then(|i| self.layout.offsets.get(i).copied())
    }
}

#[derive(Debug, Clone)]
pub enum TypeMeta {
    Obj(Arc<ObjMeta>),
    Enum(Arc<EnumMeta>),
    Virtual(Arc<VirtualMeta>),
}

/// Metadata of every object, enum and virtual type of a unit, indexed by
/// type id.
#[derive(Debug, Default)]
pub struct TypeTable {
    metas: Vec<Option<TypeMeta>>,
}

impl TypeTable {
    pub fn link(code: &Code, storage: &GlobalStorage, ctx: &Arc<ModuleContext>) -> Result<Self, LoadError> {
        let computer = LayoutComputer::new()?;
        let mut metas = Vec::with_capacity(code.types.len());
        for (t, ty) in code.types.iter().enumerate() {
            let id = TypeId(t as u32);
            let meta = match ty {
                Type::Obj(obj) => {
                    let kinds = code
                        .obj_all_fields(id)?
                        .iter()
                        .map(|f| code.kind_of(f.ty))
                        .collect::<Result<Vec<_>, _>>()?;
                    let meta = ObjMeta {
                        ty: id,
                        name: obj.name.clone(),
                        layout: computer.record(1, &kinds)?,
                        global: obj.global.and_then(|g| storage.addr(g)),
                        virtuals: virtual_entries(code, id)?,
                        methods: method_names(code, id)?,
                        dispatch: RwLock::new(Vec::new()),
                        ctx: ctx.clone(),
                    };
                    Some(TypeMeta::Obj(Arc::new(meta)))
                }
                Type::Enum(e) => {
                    let mut constructs = Vec::with_capacity(e.constructs.len());
                    for c in &e.constructs {
                        let mut kinds = vec![TypeKind::I32];
                        for p in &c.params {
                            kinds.push(code.kind_of(*p)?);
                        }
                        constructs.push((c.name.clone(), computer.record(0, &kinds)?));
                    }
                    let global = e.global.and_then(|g| storage.addr(g));
                    Some(TypeMeta::Enum(Arc::new(EnumMeta { ty: id, name: e.name.clone(), constructs, global })))
                }
                Type::Virtual(v) => {
                    let kinds = v.fields.iter().map(|f| code.kind_of(f.ty)).collect::<Result<Vec<_>, _>>()?;
                    let lookup = v.fields.iter().enumerate().map(|(i, f)| (f.name.clone(), i)).collect();
                    Some(TypeMeta::Virtual(Arc::new(VirtualMeta { ty: id, layout: computer.record(3, &kinds)?, lookup })))
                }
                _ => None,
            };
            metas.push(meta);
        }
        Ok(Self { metas })
    }

    pub fn get(&self, ty: TypeId) -> Option<&TypeMeta> {
        self.metas.get(ty.index()).and_then(Option::as_ref)
    }

    pub fn obj(&self, ty: TypeId) -> Option<&Arc<ObjMeta>> {
        match self.get(ty)? {
            TypeMeta::Obj(o) => Some(o),
            _ => None,
        }
    }

    pub fn enum_meta(&self, ty: TypeId) -> Option<&Arc<EnumMeta>> {
        match self.get(ty)? {
            TypeMeta::Enum(e) => Some(e),
            _ => None,
        }
    }

    pub fn virtual_meta(&self, ty: TypeId) -> Option<&Arc<VirtualMeta>> {
        match self.get(ty)? {
            TypeMeta::Virtual(v) => Some(v),
            _ => None,
        }
    }

    pub fn objects(&self) -> impl Iterator<Item = &Arc<ObjMeta>> {
        self.metas.iter().filter_map(|m| match m {
            Some(TypeMeta::Obj(o)) => Some(o),
            _ => None,
        })
    }

    pub fn flush_all(&self) {
        for obj in self.objects() {
            obj.flush();
        }
    }
}

fn virtual_entries(code: &Code, id: TypeId) -> Result<Vec<(u32, u32)>, LoadError> {
    let obj = code.obj(id)?;
    let mut entries = match obj.super_type {
        Some(sup) => virtual_entries(code, sup)?,
        None => Vec::new(),
    };
    entries.extend(obj.proto.iter().filter_map(|p| p.pindex.map(|pindex| (pindex, p.findex))));
    Ok(entries)
}

fn method_names(code: &Code, id: TypeId) -> Result<FxHashMap<String, u32>, LoadError> {
    let obj = code.obj(id)?;
    let mut methods = match obj.super_type {
        Some(sup) => method_names(code, sup)?,
        None => FxHashMap::default(),
    };
    for p in &obj.proto {
        methods.insert(p.name.clone(), p.findex);
    }
    Ok(methods)
}
