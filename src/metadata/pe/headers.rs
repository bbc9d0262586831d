//! PE/COFF headers of a managed image: where things are, and how to add a section.
//!
//! `goblin` validates the image and provides the section table and the CLR directory. The
//! header fields a save rewrites are located by offset, since they are patched in the raw
//! bytes: `NumberOfSections`, `SizeOfCode`, `SizeOfImage` and `CheckSum`.

use goblin::pe::PE;

use crate::{
    file::io::{read_le_at, write_le_at},
    Error, Result,
};

/// Size of one section header.
const SECTION_HEADER_SIZE: usize = 40;
/// Characteristics of the overflow section: code, execute, read.
const OVERFLOW_CHARACTERISTICS: u32 = 0x6000_0020;
/// Name of the overflow section.
pub(crate) const OVERFLOW_NAME: &[u8; 8] = b".dpatch\0";

/// One entry of the section table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Section {
    pub name: [u8; 8],
    pub virtual_address: u32,
    pub virtual_size: u32,
    pub raw_offset: u32,
    pub raw_size: u32,
}

/// Header geometry of a managed PE image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Headers {
    /// Offset of the COFF file header
    pub coff: usize,
    /// Offset of the optional header
    pub optional: usize,
    /// Offset of the section table
    pub section_table: usize,
    pub file_alignment: u32,
    pub section_alignment: u32,
    pub size_of_headers: u32,
    pub checksum: u32,
    pub sections: Vec<Section>,
    /// RVA of the CLR runtime header
    pub clr_rva: u32,
}

impl Headers {
    /// Parse the headers of `data`.
    ///
    /// # Errors
    /// Returns [`Error::GoblinErr`] if `data` is not a PE file and [`Error::NotSupported`] if
    /// it has no CLR runtime header.
    pub(crate) fn parse(data: &[u8]) -> Result<Headers> {
        let pe = PE::parse(data)?;
        let Some(optional_header) = pe.header.optional_header else {
            return Err(Error::NotSupported);
        };
        let clr_rva = match optional_header.data_directories.get_clr_runtime_header() {
            Some(clr) if clr.virtual_address != 0 => clr.virtual_address,
            _ => return Err(Error::NotSupported),
        };

        let mut offset = 0x3C;
        let pe_signature = read_le_at::<u32>(data, &mut offset)? as usize;
        let coff = pe_signature + 4;
        let mut offset = coff + 16;
        let optional_size = usize::from(read_le_at::<u16>(data, &mut offset)?);
        let optional = coff + 20;

        let mut offset = optional + 60;
        let size_of_headers = read_le_at::<u32>(data, &mut offset)?;
        let checksum = read_le_at::<u32>(data, &mut offset)?;

        let sections = pe
            .sections
            .iter()
            .map(|section| Section {
                name: section.name,
                virtual_address: section.virtual_address,
                virtual_size: section.virtual_size,
                raw_offset: section.pointer_to_raw_data,
                raw_size: section.size_of_raw_data,
            })
            .collect();

        Ok(Headers {
            coff,
            optional,
            section_table: optional + optional_size,
            file_alignment: optional_header.windows_fields.file_alignment,
            section_alignment: optional_header.windows_fields.section_alignment,
            size_of_headers,
            checksum,
            sections,
            clr_rva,
        })
    }

    /// File offset of `rva`.
    pub(crate) fn rva_to_offset(&self, rva: u32) -> Result<usize> {
        self.sections
            .iter()
            .find_map(|section| {
                let delta = rva.checked_sub(section.virtual_address)?;
                (delta < section.raw_size).then(|| section.raw_offset as usize + delta as usize)
            })
            .ok_or_else(|| malformed_error!("RVA 0x{:08x} is not backed by a section", rva))
    }

    /// Append a section holding `content` to `data` and return its RVA.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if the headers have no room for another section header.
    pub(crate) fn add_section(&mut self, data: &mut Vec<u8>, content: &[u8]) -> Result<u32> {
        let header = self.section_table + self.sections.len() * SECTION_HEADER_SIZE;
        if header + SECTION_HEADER_SIZE > self.size_of_headers as usize {
            return Err(malformed_error!("No room for another section header"));
        }
        let first_raw = self
            .sections
            .iter()
            .map(|section| section.raw_offset)
            .filter(|&offset| offset != 0)
            .min()
            .unwrap_or(self.size_of_headers);
        let slot = data.get(header..header + SECTION_HEADER_SIZE).ok_or(Error::OutOfBounds)?;
        if header + SECTION_HEADER_SIZE > first_raw as usize || slot.iter().any(|&byte| byte != 0) {
            return Err(malformed_error!("No room for another section header"));
        }

        let image_end = self
            .sections
            .iter()
            .map(|section| section.virtual_address + section.virtual_size.max(section.raw_size))
            .max()
            .unwrap_or(self.size_of_headers);
        let virtual_address = align(image_end, self.section_alignment);
        let raw_offset = align(u32::try_from(data.len()).map_err(|_| Error::OutOfBounds)?, self.file_alignment);
        let virtual_size = u32::try_from(content.len()).map_err(|_| Error::OutOfBounds)?;
        let raw_size = align(virtual_size, self.file_alignment);

        data.resize(raw_offset as usize, 0);
        data.extend_from_slice(content);
        data.resize((raw_offset + raw_size) as usize, 0);

        let section = Section {
            name: *OVERFLOW_NAME,
            virtual_address,
            virtual_size,
            raw_offset,
            raw_size,
        };

        let mut offset = header;
        data[offset..offset + 8].copy_from_slice(&section.name);
        offset += 8;
        for value in [virtual_size, virtual_address, raw_size, raw_offset, 0, 0] {
            write_le_at(data, &mut offset, value)?;
        }
        write_le_at(data, &mut offset, 0u16)?;
        write_le_at(data, &mut offset, 0u16)?;
        write_le_at(data, &mut offset, OVERFLOW_CHARACTERISTICS)?;
        self.sections.push(section);

        let mut offset = self.coff + 2;
        let count = u16::try_from(self.sections.len())
            .map_err(|_| malformed_error!("Too many sections"))?;
        write_le_at(data, &mut offset, count)?;

        let mut offset = self.optional + 4;
        let size_of_code = read_le_at::<u32>(data, &mut offset)?;
        let mut offset = self.optional + 4;
        write_le_at(data, &mut offset, size_of_code.saturating_add(raw_size))?;

        let mut offset = self.optional + 56;
        let size_of_image = align(virtual_address + virtual_size, self.section_alignment);
        write_le_at(data, &mut offset, size_of_image)?;

        Ok(virtual_address)
    }

    /// Recompute `CheckSum` if the image had one.
    pub(crate) fn update_checksum(&self, data: &mut [u8]) -> Result<()> {
        if self.checksum == 0 {
            return Ok(());
        }
        let field = self.optional + 64;
        let mut offset = field;
        write_le_at(data, &mut offset, 0u32)?;

        let mut sum: u64 = 0;
        for word in data.chunks(2) {
            let low = u64::from(word[0]);
            let high = word.get(1).map_or(0, |&byte| u64::from(byte));
            sum += low | (high << 8);
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
        sum = (sum & 0xFFFF) + (sum >> 16);
        let checksum = (sum as u32).wrapping_add(data.len() as u32);

        let mut offset = field;
        write_le_at(data, &mut offset, checksum)
    }
}

fn align(value: u32, alignment: u32) -> u32 {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::pe::PeBuilder;

    #[test]
    fn managed_headers() {
        let data = PeBuilder::new().build();
        let headers = Headers::parse(&data).unwrap();

        assert_eq!(headers.coff, 0x84);
        assert_eq!(headers.optional, 0x98);
        assert_eq!(headers.sections.len(), 1);
        assert_eq!(headers.rva_to_offset(0x2000).unwrap(), 0x200);
        assert!(headers.rva_to_offset(0x9000).is_err());
    }

    #[test]
    fn not_a_pe_file() {
        assert!(matches!(Headers::parse(b"MZ\0\0"), Err(Error::GoblinErr(_))));
        assert!(Headers::parse(b"").is_err());
    }

    #[test]
    fn native_image_is_not_supported() {
        let data = PeBuilder::new().without_clr().build();
        assert!(matches!(Headers::parse(&data), Err(Error::NotSupported)));
    }

    #[test]
    fn added_section_is_mapped() {
        let mut data = PeBuilder::new().build();
        let mut headers = Headers::parse(&data).unwrap();

        let rva = headers.add_section(&mut data, &[0x2A; 5]).unwrap();
        let reparsed = Headers::parse(&data).unwrap();

        assert_eq!(reparsed.sections.len(), 2);
        assert_eq!(&reparsed.sections[1].name, OVERFLOW_NAME);
        let offset = reparsed.rva_to_offset(rva).unwrap();
        assert_eq!(&data[offset..offset + 5], &[0x2A; 5]);
        assert_eq!(data.len() % 0x200, 0);
    }

    #[test]
    fn checksum_is_only_kept_up_to_date() {
        let mut data = PeBuilder::new().build();
        let headers = Headers::parse(&data).unwrap();
        let before = data.clone();
        headers.update_checksum(&mut data).unwrap();
        assert_eq!(data, before);

        let mut data = PeBuilder::new().with_checksum(1).build();
        let headers = Headers::parse(&data).unwrap();
        headers.update_checksum(&mut data).unwrap();
        let mut offset = headers.optional + 64;
        let checksum = read_le_at::<u32>(&data, &mut offset).unwrap();
        assert_ne!(checksum, 1);
        assert!(checksum > data.len() as u32);
    }
}
