//! Compact textual encoding of types used as the load-time contract between
//! a module and a native library.
//!
//! Every kind is one character. Function types append their arguments,
//! `_`, then the return type. Object types append their fields (inherited
//! first) followed by `_`. References and nullables append their parameter
//! type. Abstract types append their name followed by `_`.

use crate::code::Code;
use crate::error::CodeError;
use crate::types::{Type, TypeId, TypeKind};

const ALPHABET: &[u8; 20] = b"vcsilfdbBDPOATRVYXEN";

/// Encoding character of a kind.
pub fn kind_char(kind: TypeKind) -> char {
    ALPHABET[kind as usize] as char
}

/// Kind of an encoding character.
pub fn char_kind(c: u8) -> Option<TypeKind> {
    ALPHABET.iter().position(|&a| a == c).map(|i| TypeKind::ALL[i])
}

/// Encodes `ty` into the signature grammar.
pub fn encode(code: &Code, ty: TypeId) -> Result<String, CodeError> {
    let mut out = String::new();
    let mut visiting = Vec::new();
    append_type(code, ty, &mut out, &mut visiting)?;
    Ok(out)
}

fn append_type(code: &Code, ty: TypeId, out: &mut String, visiting: &mut Vec<TypeId>) -> Result<(), CodeError> {
    let t = code.get_type(ty)?;
    out.push(kind_char(t.kind()));
    match t {
        Type::Fun(f) => {
            for arg in &f.args {
                append_type(code, *arg, out, visiting)?;
            }
            out.push('_');
            append_type(code, f.ret, out, visiting)?;
        }
        Type::Ref(inner) | Type::Null(inner) => append_type(code, *inner, out, visiting)?,
        Type::Obj(_) => {
            // A recursive object reference encodes as an empty field list.
            if !visiting.contains(&ty) {
                visiting.push(ty);
                for field in code.obj_all_fields(ty)? {
                    append_type(code, field.ty, out, visiting)?;
                }
                visiting.pop();
            }
            out.push('_');
        }
        Type::Abstract(name) => {
            out.push_str(name);
            out.push('_');
        }
        _ => {}
    }
    Ok(())
}

/// Structural shape of an encoded function type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureShape {
    pub args: Vec<TypeKind>,
    pub ret: TypeKind,
}

/// Recovers the arity, argument kinds and return kind of an encoded
/// function type.
pub fn decode_shape(sig: &str) -> Result<SignatureShape, CodeError> {
    let mut parser = Parser { sig, pos: 0 };
    if parser.peek() != Some(b'P') {
        return Err(parser.error("expected a function type"));
    }
    parser.pos += 1;
    let mut args = Vec::new();
    while parser.peek() != Some(b'_') {
        args.push(parser.parse_type()?);
    }
    parser.pos += 1;
    let ret = parser.parse_type()?;
    if parser.pos != sig.len() {
        return Err(parser.error("trailing characters"));
    }
    Ok(SignatureShape { args, ret })
}

struct Parser<'a> {
    sig: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.sig.as_bytes().get(self.pos).copied()
    }

    fn error(&self, reason: &'static str) -> CodeError {
        CodeError::InvalidSignature { sig: self.sig.to_string(), pos: self.pos, reason }
    }

    fn parse_type(&mut self) -> Result<TypeKind, CodeError> {
        let c = self.peek().ok_or_else(|| self.error("unexpected end"))?;
        let kind = char_kind(c).ok_or_else(|| self.error("unknown kind character"))?;
        self.pos += 1;
        match kind {
            TypeKind::Fun => {
                while self.peek() != Some(b'_') {
                    self.parse_type()?;
                }
                self.pos += 1;
                self.parse_type()?;
            }
            TypeKind::Obj => {
                while self.peek() != Some(b'_') {
                    self.parse_type()?;
                }
                self.pos += 1;
            }
            TypeKind::Ref | TypeKind::Null => {
                self.parse_type()?;
            }
            TypeKind::Abstract => {
                let rest = &self.sig[self.pos..];
                let end = rest.find('_').ok_or_else(|| self.error("unterminated abstract name"))?;
                self.pos += end + 1;
            }
            _ => {}
        }
        Ok(kind)
    }
}
