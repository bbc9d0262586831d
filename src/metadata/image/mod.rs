//! `DPCI` metadata images.
//!
//! A compact, self-contained serialization of a [`CilAssembly`], used for fixtures and for
//! assemblies built in memory. [`ImageStore`] reads and writes it:
//!
//! ```text
//! magic u32 = 0x49435044 ("DPCI"), major u16, minor u16
//! name, version (4 x u16)
//! assembly refs: count x { name, version, public key token (count + bytes) }
//! user strings:  count x string                                   token table 0x70
//! type refs:     count x { scope (0 = local, n = assembly ref n), full name }   0x01
//! member refs:   count x { kind u8, parent type ref row, name, signature }      0x0A
//! types:         count x { full name, flags u32, fields, methods }
//! ```
//!
//! Counts and lengths use the ECMA-335 compressed integer encoding, strings are
//! length-prefixed UTF-8, everything else is little-endian. Method bodies are stored as
//! plain CIL whose tokens index the reference tables.
//!
//! Loading memory-maps the file, decodes everything into owned data and drops the mapping.
//! Saving writes the full image to a temporary file next to the destination and renames it
//! into place, so the destination never holds a partial image.

mod reader;
mod writer;

use std::path::Path;

use crate::{
    file::{File, Output},
    metadata::{CilAssembly, MetadataStore},
    Result,
};

/// `"DPCI"` in little-endian byte order.
pub const IMAGE_MAGIC: u32 = 0x4943_5044;
/// Image format major version this library reads and writes.
pub const IMAGE_MAJOR: u16 = 1;
/// Image format minor version this library writes.
pub const IMAGE_MINOR: u16 = 0;

pub(crate) const MEMBER_KIND_FIELD: u8 = 0;
pub(crate) const MEMBER_KIND_METHOD: u8 = 1;

/// The `DPCI` metadata image format.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageStore;

impl ImageStore {
    /// Returns `true` if `data` starts with the image signature.
    ///
    /// Only the signature is checked; [`ImageStore::from_bytes`] can still reject the data.
    #[must_use]
    pub fn is_image(data: &[u8]) -> bool {
        reader::is_image(data)
    }

    /// Decode an image held in memory.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] for foreign data and
    /// [`crate::Error::Malformed`] or [`crate::Error::OutOfBounds`] for corrupt images.
    pub fn from_bytes(data: &[u8]) -> Result<CilAssembly> {
        reader::read_image(data)
    }

    /// Encode `assembly` into an in-memory image.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a body cannot be encoded, e.g. because a
    /// branch targets a removed instruction or an operand refers to a removed assembly
    /// reference.
    pub fn to_bytes(assembly: &CilAssembly) -> Result<Vec<u8>> {
        writer::write_image(assembly)
    }
}

impl MetadataStore for ImageStore {
    fn load(&self, path: &Path) -> Result<CilAssembly> {
        let file = File::from_path(path)?;
        Self::from_bytes(file.data())
    }

    fn save(&self, assembly: &CilAssembly, path: &Path) -> Result<()> {
        let image = Self::to_bytes(assembly)?;

        let mut output = Output::create(path, image.len() as u64)?;
        output.write_at(0, &image)?;
        output.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{decode_stream, Instruction, OpCode, Operand, RawTokens},
        metadata::{
            AssemblyRef, AssemblyVersion, ExceptionHandler, ExceptionHandlerFlags,
            MethodAttributes, MethodBody, MethodDef, TypeAttributes, TypeDef, TypeRef,
        },
        test::celeste_assembly,
        Error, Parser,
    };

    #[test]
    fn round_trip_preserves_model() {
        let assembly = celeste_assembly();

        let image = ImageStore::to_bytes(&assembly).unwrap();
        let loaded = ImageStore::from_bytes(&image).unwrap();

        assert_eq!(loaded.name, assembly.name);
        assert_eq!(loaded.version, assembly.version);
        assert_eq!(loaded.refs, assembly.refs);
        assert_eq!(loaded.types.len(), assembly.types.len());
        for (read, built) in loaded.types.iter().zip(&assembly.types) {
            assert_eq!(read.full_name, built.full_name);
            assert_eq!(read.fields, built.fields);
            assert_eq!(read.methods.len(), built.methods.len());
            for (m_read, m_built) in read.methods.iter().zip(&built.methods) {
                assert_eq!(m_read.name, m_built.name);
                let read_ops: Vec<_> = m_read
                    .body
                    .iter()
                    .flat_map(|b| b.instructions().iter().map(|i| (i.opcode, i.operand.clone())))
                    .collect();
                let built_ops: Vec<_> = m_built
                    .body
                    .iter()
                    .flat_map(|b| b.instructions().iter().map(|i| (i.opcode, i.operand.clone())))
                    .collect();
                assert_eq!(read_ops, built_ops, "{}::{}", built.full_name, m_built.name);
            }
        }

        // A decoded image re-encodes to the same bytes
        assert_eq!(ImageStore::to_bytes(&loaded).unwrap(), image);
    }

    #[test]
    fn sniffing() {
        assert!(ImageStore::is_image(&ImageStore::to_bytes(&celeste_assembly()).unwrap()));
        assert!(!ImageStore::is_image(b"MZ\x90\x00"));
        assert!(!ImageStore::is_image(b"DPC"));
    }

    #[test]
    fn foreign_data_is_not_supported() {
        assert!(matches!(
            ImageStore::from_bytes(b"MZ\x90\x00\x03\x00\x00\x00"),
            Err(Error::NotSupported)
        ));
        assert!(matches!(ImageStore::from_bytes(b"DP"), Err(Error::NotSupported)));

        let mut future = Vec::new();
        future.extend_from_slice(&IMAGE_MAGIC.to_le_bytes());
        future.extend_from_slice(&2u16.to_le_bytes());
        future.extend_from_slice(&0u16.to_le_bytes());
        assert!(matches!(ImageStore::from_bytes(&future), Err(Error::NotSupported)));
    }

    #[test]
    fn truncated_image_fails() {
        let image = ImageStore::to_bytes(&celeste_assembly()).unwrap();

        for len in [8, image.len() / 2, image.len() - 1] {
            assert!(
                ImageStore::from_bytes(&image[..len]).is_err(),
                "truncated to {len} bytes"
            );
        }
    }

    #[test]
    fn trailing_data_fails() {
        let mut image = ImageStore::to_bytes(&celeste_assembly()).unwrap();
        image.push(0);

        assert!(matches!(
            ImageStore::from_bytes(&image),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn unused_references_are_dropped() {
        let mut assembly = celeste_assembly();
        for ty in &mut assembly.types {
            for method in &mut ty.methods {
                method.body = Some(MethodBody::new(1, vec![Instruction::ret()]));
            }
        }
        assembly.remove_external_reference("Steamworks.NET");

        let image = ImageStore::to_bytes(&assembly).unwrap();
        let loaded = ImageStore::from_bytes(&image).unwrap();
        assert_eq!(loaded.refs, assembly.refs);
        assert_eq!(loaded.method_count(), assembly.method_count());
        assert!(!image.windows(b"SteamAPI".len()).any(|w| w == b"SteamAPI"));
    }

    #[test]
    fn operand_scoped_to_removed_reference_fails() {
        let mut assembly = celeste_assembly();
        assembly.remove_external_reference("Steamworks.NET");

        assert!(matches!(
            ImageStore::to_bytes(&assembly),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn exception_handlers_follow_instructions() {
        let mut assembly = CilAssembly::new("Handlers", AssemblyVersion::new(1, 0, 0, 0));
        assembly
            .refs
            .push(AssemblyRef::new("mscorlib", AssemblyVersion::new(4, 0, 0, 0)));

        // nop; nop; leave.s +3; pop; leave.s +0; ret  (try: 1..4, catch: 4..7)
        let code = [0x00, 0x00, 0xDE, 0x03, 0x26, 0xDE, 0x00, 0x2A];
        let handler = ExceptionHandler {
            flags: ExceptionHandlerFlags::EXCEPTION,
            try_offset: 1,
            try_length: 3,
            handler_offset: 4,
            handler_length: 3,
            class: Some(TypeRef::external("mscorlib", "System.Exception")),
            filter_offset: 0,
        };

        let mut ty = TypeDef::new("Handlers.Program", TypeAttributes::empty());
        let instructions = decode_stream(&mut Parser::new(&code), &RawTokens).unwrap();
        let mut body = MethodBody::decoded(1, false, None, instructions, vec![handler], 8);
        body.instructions_mut().remove(0);
        ty.methods.push(MethodDef::new(
            "Run",
            MethodAttributes::STATIC,
            "void()",
            Some(body),
        ));
        assembly.types.push(ty);

        let loaded = ImageStore::from_bytes(&ImageStore::to_bytes(&assembly).unwrap()).unwrap();
        let body = loaded.types[0].methods[0].body.as_ref().unwrap();

        assert_eq!(body.instructions().len(), 5);
        assert_eq!(body.instructions()[1].operand, Operand::Target(6));
        assert_eq!(body.instructions()[4].opcode, OpCode::RET);

        let handler = &body.handlers[0];
        assert_eq!((handler.try_offset, handler.try_length), (0, 3));
        assert_eq!((handler.handler_offset, handler.handler_length), (3, 3));
        assert_eq!(
            handler.class,
            Some(TypeRef::external("mscorlib", "System.Exception"))
        );
    }
}
