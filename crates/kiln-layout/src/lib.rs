use kiln_code::TypeKind;
use repc::layout::{BuiltinType, Record, RecordField, RecordKind, Type, TypeVariant};
use repc::Target;
use thiserror::Error;

pub mod helpers;

pub use helpers::{clif_type, pointer_size};

/// Errors that can occur during layout computation.
#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("Layout computation failed: {0}")]
    RepcError(#[from] repc::Error),

    #[error("The host target is not supported by the layout engine")]
    UnsupportedHost,

    #[error("Other layout error: {0}")]
    Other(String),
}

/// Size in bytes of a value of `kind` when stored in a global or a field.
pub fn type_size(kind: TypeKind) -> usize {
    match kind {
        TypeKind::Void => 0,
        TypeKind::U8 | TypeKind::Bool => 1,
        TypeKind::U16 => 2,
        TypeKind::I32 | TypeKind::F32 => 4,
        TypeKind::I64 | TypeKind::F64 => 8,
        _ => pointer_size(),
    }
}

/// Padding needed to bring `pos` up to the alignment of `kind`.
/// Scalars are aligned on their own size.
pub fn pad_size(pos: usize, kind: TypeKind) -> usize {
    let sz = type_size(kind);
    if sz == 0 {
        return 0;
    }
    (sz - pos % sz) % sz
}

/// Immutable byte offsets of a module's globals.
///
/// Offsets are computed once, in declaration order, and never change; a
/// global is addressed by its index, never by pointer arithmetic outside
/// this table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalLayout {
    offsets: Box<[usize]>,
    size: usize,
    align: usize,
}

impl GlobalLayout {
    pub fn compute(globals: &[TypeKind]) -> Self {
        let mut offsets = Vec::with_capacity(globals.len());
        let mut size = 0;
        let mut align = 1;
        for kind in globals {
            size += pad_size(size, *kind);
            offsets.push(size);
            size += type_size(*kind);
            align = align.max(type_size(*kind));
        }
        Self { offsets: offsets.into_boxed_slice(), size, align }
    }

    pub fn offset(&self, global: usize) -> Option<usize> {
        self.offsets.get(global).copied()
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Total size of the storage block in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Alignment the storage block itself must satisfy.
    pub fn align(&self) -> usize {
        self.align
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// C-compatible layout of a record: total size, alignment and one byte
/// offset per field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout {
    pub size: usize,
    pub align: usize,
    pub offsets: Box<[usize]>,
}

/// Computes record layouts for the host target using repc.
pub struct LayoutComputer {
    target: Target,
}

impl LayoutComputer {
    pub fn new() -> Result<Self, LayoutError> {
        let target = repc::HOST_TARGET.ok_or(LayoutError::UnsupportedHost)?;
        Ok(Self { target })
    }

    /// Lays out `header_words` pointer-sized header slots followed by
    /// `fields`. The returned offsets cover `fields` only.
    ///
    /// Void fields occupy no storage; they are given the offset of the
    /// next stored field, or the record size when none follows.
    pub fn record(&self, header_words: usize, fields: &[TypeKind]) -> Result<RecordLayout, LayoutError> {
        let mut record_fields = Vec::with_capacity(header_words + fields.len());
        for _ in 0..header_words {
            record_fields.push(field(BuiltinType::Pointer));
        }
        for kind in fields.iter().filter(|k| **k != TypeKind::Void) {
            record_fields.push(field(builtin_for(*kind)));
        }

        let record_type = Type {
            layout: (),
            annotations: vec![],
            variant: TypeVariant::Record(Record { kind: RecordKind::Struct, fields: record_fields }),
        };
        let computed = repc::compute_layout(self.target, &record_type)?;
        let size = (computed.layout.size_bits / 8) as usize;
        let align = (computed.layout.required_alignment_bits / 8) as usize;
        let record = match computed.variant {
            TypeVariant::Record(record) => record,
            _ => return Err(LayoutError::Other("Expected record type".to_string())),
        };

        let mut stored = Vec::with_capacity(record.fields.len());
        for f in record.fields.iter().skip(header_words) {
            let layout = f.layout.as_ref().ok_or_else(|| LayoutError::Other("Field layout missing".to_string()))?;
            stored.push((layout.offset_bits / 8) as usize);
        }

        let mut offsets = vec![size; fields.len()];
        let mut next = stored.into_iter();
        for (i, kind) in fields.iter().enumerate() {
            if *kind != TypeKind::Void {
                offsets[i] = next.next().unwrap_or(size);
            }
        }
        // Void fields take the offset of the next stored field.
        for i in (0..fields.len()).rev() {
            if fields[i] == TypeKind::Void && i + 1 < fields.len() {
                offsets[i] = offsets[i + 1];
            }
        }
        Ok(RecordLayout { size, align, offsets: offsets.into_boxed_slice() })
    }
}

fn field(builtin: BuiltinType) -> RecordField<()> {
    RecordField {
        layout: None,
        annotations: vec![],
        named: true,
        bit_width: None,
        ty: Type { layout: (), annotations: vec![], variant: TypeVariant::Builtin(builtin) },
    }
}

fn builtin_for(kind: TypeKind) -> BuiltinType {
    match kind {
        TypeKind::U8 | TypeKind::Bool => BuiltinType::UnsignedChar,
        TypeKind::U16 => BuiltinType::UnsignedShort,
        TypeKind::I32 => BuiltinType::Int,
        TypeKind::I64 => BuiltinType::LongLong,
        TypeKind::F32 => BuiltinType::Float,
        TypeKind::F64 => BuiltinType::Double,
        _ => BuiltinType::Pointer,
    }
}
