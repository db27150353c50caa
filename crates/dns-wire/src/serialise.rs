//! Serialisation of DNS messages to the wire format.  See the `types`
//! module for details of the format.

use bytes::{BufMut, BytesMut};
use std::collections::HashMap;

use crate::types::*;

/// Octet mask for the QR flag being set (response).
pub(crate) const HEADER_MASK_QR: u8 = 0b1000_0000;

/// Octet mask and offset for the opcode field.
pub(crate) const HEADER_MASK_OPCODE: u8 = 0b0111_1000;
pub(crate) const HEADER_OFFSET_OPCODE: usize = 3;

/// Octet mask for the AA flag being set (authoritative).
pub(crate) const HEADER_MASK_AA: u8 = 0b0000_0100;

/// Octet mask for the TC flag being set (truncated).
pub(crate) const HEADER_MASK_TC: u8 = 0b0000_0010;

/// Octet mask for the RD flag being set (recursion desired).
pub(crate) const HEADER_MASK_RD: u8 = 0b0000_0001;

/// Octet mask for the RA flag being set (recursion available).
pub(crate) const HEADER_MASK_RA: u8 = 0b1000_0000;

/// Octet mask for the rcode field.
pub(crate) const HEADER_MASK_RCODE: u8 = 0b0000_1111;

impl Message {
    /// Encode a whole message.
    ///
    /// # Errors
    ///
    /// If a section or an RDATA is too long for its 16-bit count.
    pub fn to_octets(&self) -> Result<BytesMut, EncodeError> {
        let mut buffer = WritableBuffer::default();
        self.serialise(&mut buffer)?;
        Ok(buffer.octets)
    }

    pub fn serialise(&self, buffer: &mut WritableBuffer) -> Result<(), EncodeError> {
        self.header.serialise(buffer);
        buffer.write_u16(section_count(self.questions.len())?);
        buffer.write_u16(section_count(self.answers.len())?);
        buffer.write_u16(section_count(self.authority.len())?);
        buffer.write_u16(section_count(self.additional.len())?);

        for question in &self.questions {
            question.serialise(buffer);
        }
        for rr in &self.answers {
            rr.serialise(buffer)?;
        }
        for rr in &self.authority {
            rr.serialise(buffer)?;
        }
        for rr in &self.additional {
            rr.serialise(buffer)?;
        }

        Ok(())
    }
}

impl Header {
    pub fn serialise(&self, buffer: &mut WritableBuffer) {
        let mut flags1 = HEADER_MASK_OPCODE & (u8::from(self.opcode) << HEADER_OFFSET_OPCODE);
        if !self.is_query {
            flags1 |= HEADER_MASK_QR;
        }
        if self.is_authoritative {
            flags1 |= HEADER_MASK_AA;
        }
        if self.is_truncated {
            flags1 |= HEADER_MASK_TC;
        }
        if self.recursion_desired {
            flags1 |= HEADER_MASK_RD;
        }

        let mut flags2 = HEADER_MASK_RCODE & u8::from(self.rcode);
        if self.recursion_available {
            flags2 |= HEADER_MASK_RA;
        }

        buffer.write_u16(self.id);
        buffer.write_u8(flags1);
        buffer.write_u8(flags2);
    }
}

impl Question {
    pub fn serialise(&self, buffer: &mut WritableBuffer) {
        self.name.serialise(buffer, true);
        buffer.write_u16(self.qtype.into());
        buffer.write_u16(self.qclass.into());
    }
}

impl ResourceRecord {
    /// # Errors
    ///
    /// If the RDATA is too long.
    pub fn serialise(&self, buffer: &mut WritableBuffer) -> Result<(), EncodeError> {
        self.name.serialise(buffer, true);
        buffer.write_u16(self.rtype().into());
        buffer.write_u16(self.rclass.into());
        buffer.write_u32(self.ttl);

        // backpatched once the RDATA is written
        let rdlength_index = buffer.index();
        buffer.write_u16(0);

        match &self.rdata {
            Rdata::A { address } => buffer.write_octets(&address.octets()),
            Rdata::AAAA { address } => buffer.write_octets(&address.octets()),
            Rdata::NS { nsdname } => nsdname.serialise(buffer, false),
            Rdata::CNAME { canonical } => canonical.serialise(buffer, false),
            Rdata::SOA {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => {
                mname.serialise(buffer, false);
                rname.serialise(buffer, false);
                buffer.write_u32(*serial);
                buffer.write_u32(*refresh);
                buffer.write_u32(*retry);
                buffer.write_u32(*expire);
                buffer.write_u32(*minimum);
            }
            Rdata::PTR { ptrdname } => ptrdname.serialise(buffer, false),
            Rdata::MX {
                preference,
                exchange,
            } => {
                buffer.write_u16(*preference);
                exchange.serialise(buffer, false);
            }
            Rdata::TXT { octets } | Rdata::Unknown { octets, .. } => buffer.write_octets(octets),
        }

        // -2 so the two RDLENGTH octets are not counted
        let rdlength = buffer.index() - rdlength_index - 2;
        let patch: u16 = rdlength
            .try_into()
            .map_err(|_| EncodeError::RdataTooLong { len: rdlength })?;
        let [hi, lo] = patch.to_be_bytes();
        buffer.octets[rdlength_index] = hi;
        buffer.octets[rdlength_index + 1] = lo;

        Ok(())
    }
}

impl DomainName {
    /// Encode a name, using a compression pointer if this buffer has
    /// already written the same name.  Compression is only attempted
    /// for section-level names, not names inside RDATA.
    pub fn serialise(&self, buffer: &mut WritableBuffer, compress: bool) {
        if compress {
            if let Some(ptr) = buffer.name_pointer(self) {
                buffer.write_u16(ptr);
                return;
            }
        }

        buffer.memoise_name(self);
        for label in &self.labels {
            buffer.write_u8(label.len());
            buffer.write_octets(label.octets());
        }
    }
}

fn section_count(len: usize) -> Result<u16, EncodeError> {
    len.try_into()
        .map_err(|_| EncodeError::SectionTooLarge { len })
}

/// Errors encountered when serialising a message.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum EncodeError {
    /// A section has more entries than fit in a 16-bit count.
    SectionTooLarge { len: usize },
    /// An RDATA is longer than a 16-bit length can describe.
    RdataTooLong { len: usize },
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            EncodeError::SectionTooLarge { len } => {
                write!(f, "section of {len} entries does not fit in a u16 count")
            }
            EncodeError::RdataTooLong { len } => {
                write!(f, "rdata of {len} octets does not fit in a u16 length")
            }
        }
    }
}

impl std::error::Error for EncodeError {}

/// A buffer which can be written to, for serialisation purposes.
pub struct WritableBuffer {
    pub octets: BytesMut,
    name_pointers: HashMap<DomainName, u16>,
}

impl Default for WritableBuffer {
    fn default() -> Self {
        Self {
            octets: BytesMut::with_capacity(512),
            name_pointers: HashMap::new(),
        }
    }
}

impl WritableBuffer {
    pub fn index(&self) -> usize {
        self.octets.len()
    }

    pub fn write_u8(&mut self, octet: u8) {
        self.octets.put_u8(octet);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.octets.put_u16(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.octets.put_u32(value);
    }

    pub fn write_octets(&mut self, octets: &[u8]) {
        self.octets.put_slice(octets);
    }

    /// Remember that the name is about to be written at the current
    /// index, if a compression pointer could reach it.
    fn memoise_name(&mut self, name: &DomainName) {
        let index = self.octets.len();
        if index <= 0b0011_1111_1111_1111 && !self.name_pointers.contains_key(name) {
            #[allow(clippy::cast_possible_truncation)]
            self.name_pointers.insert(name.clone(), index as u16);
        }
    }

    /// A compression pointer to a previous occurrence of the name, if
    /// there is one.
    fn name_pointer(&self, name: &DomainName) -> Option<u16> {
        self.name_pointers
            .get(name)
            .map(|index| 0b1100_0000_0000_0000 | index)
    }
}
