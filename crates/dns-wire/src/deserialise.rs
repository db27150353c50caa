//! Deserialisation of DNS messages from the network.  See the `types`
//! module for details of the format.

use bytes::Bytes;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::serialise::{
    HEADER_MASK_AA, HEADER_MASK_OPCODE, HEADER_MASK_QR, HEADER_MASK_RA, HEADER_MASK_RCODE,
    HEADER_MASK_RD, HEADER_MASK_TC, HEADER_OFFSET_OPCODE,
};
use crate::types::*;

/// How many compression pointers a single name may follow before the
/// decoder gives up on it as a loop.
const MAX_POINTER_JUMPS: usize = 63;

impl Message {
    /// Decode a whole message.
    ///
    /// # Errors
    ///
    /// If the message cannot be parsed.
    pub fn from_octets(octets: &[u8]) -> Result<Self, DecodeError> {
        Self::deserialise(&mut ConsumableBuffer::new(octets))
    }

    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, DecodeError> {
        let (header, qdcount, ancount, nscount, arcount) = Header::deserialise(buffer)?;

        let mut questions = Vec::with_capacity(qdcount.into());
        let mut answers = Vec::with_capacity(ancount.into());
        let mut authority = Vec::with_capacity(nscount.into());
        let mut additional = Vec::with_capacity(arcount.into());

        for _ in 0..qdcount {
            questions.push(Question::deserialise(buffer)?);
        }
        for _ in 0..ancount {
            answers.push(ResourceRecord::deserialise(buffer)?);
        }
        for _ in 0..nscount {
            authority.push(ResourceRecord::deserialise(buffer)?);
        }
        for _ in 0..arcount {
            additional.push(ResourceRecord::deserialise(buffer)?);
        }

        Ok(Self {
            header,
            questions,
            answers,
            authority,
            additional,
        })
    }
}

impl Header {
    /// Decode the header, returning it along with the four section
    /// counts.
    ///
    /// # Errors
    ///
    /// If the header is too short.
    #[allow(clippy::type_complexity)]
    pub fn deserialise(
        buffer: &mut ConsumableBuffer,
    ) -> Result<(Self, u16, u16, u16, u16), DecodeError> {
        let id = buffer.next_u16()?;
        let flags1 = buffer.next_u8()?;
        let flags2 = buffer.next_u8()?;
        let qdcount = buffer.next_u16()?;
        let ancount = buffer.next_u16()?;
        let nscount = buffer.next_u16()?;
        let arcount = buffer.next_u16()?;

        let header = Self {
            id,
            is_query: flags1 & HEADER_MASK_QR == 0,
            opcode: Opcode::from((flags1 & HEADER_MASK_OPCODE) >> HEADER_OFFSET_OPCODE),
            is_authoritative: flags1 & HEADER_MASK_AA != 0,
            is_truncated: flags1 & HEADER_MASK_TC != 0,
            recursion_desired: flags1 & HEADER_MASK_RD != 0,
            recursion_available: flags2 & HEADER_MASK_RA != 0,
            rcode: Rcode::from(flags2 & HEADER_MASK_RCODE),
        };

        Ok((header, qdcount, ancount, nscount, arcount))
    }
}

impl Question {
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, DecodeError> {
        let name = DomainName::deserialise(buffer)?;
        let qtype = QueryType::from(buffer.next_u16()?);
        let qclass = QueryClass::from(buffer.next_u16()?);

        Ok(Self {
            name,
            qtype,
            qclass,
        })
    }
}

impl ResourceRecord {
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, DecodeError> {
        let name = DomainName::deserialise(buffer)?;
        let rtype = RecordType::from(buffer.next_u16()?);
        let rclass = RecordClass::from(buffer.next_u16()?);
        let ttl = buffer.next_u32()?;
        let rdlength = buffer.next_u16()?;

        let rdata = match rtype {
            RecordType::A => {
                if rdlength != 4 {
                    return Err(DecodeError::BadRdataLength {
                        rtype: rtype.into(),
                        length: rdlength,
                    });
                }
                let octets = buffer.next_slice(4)?;
                Rdata::A {
                    address: Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]),
                }
            }
            RecordType::AAAA => {
                if rdlength != 16 {
                    return Err(DecodeError::BadRdataLength {
                        rtype: rtype.into(),
                        length: rdlength,
                    });
                }
                let octets: [u8; 16] = buffer.next_slice(16)?.try_into().unwrap();
                Rdata::AAAA {
                    address: Ipv6Addr::from(octets),
                }
            }
            RecordType::NS => Rdata::NS {
                nsdname: DomainName::deserialise(buffer)?,
            },
            RecordType::CNAME => Rdata::CNAME {
                canonical: DomainName::deserialise(buffer)?,
            },
            RecordType::SOA => Rdata::SOA {
                mname: DomainName::deserialise(buffer)?,
                rname: DomainName::deserialise(buffer)?,
                serial: buffer.next_u32()?,
                refresh: buffer.next_u32()?,
                retry: buffer.next_u32()?,
                expire: buffer.next_u32()?,
                minimum: buffer.next_u32()?,
            },
            RecordType::PTR => Rdata::PTR {
                ptrdname: DomainName::deserialise(buffer)?,
            },
            RecordType::MX => Rdata::MX {
                preference: buffer.next_u16()?,
                exchange: DomainName::deserialise(buffer)?,
            },
            RecordType::TXT => Rdata::TXT {
                octets: Bytes::copy_from_slice(buffer.next_slice(rdlength.into())?),
            },
            RecordType::Unknown(tag) => Rdata::Unknown {
                tag,
                octets: Bytes::copy_from_slice(buffer.next_slice(rdlength.into())?),
            },
        };

        Ok(Self {
            name,
            rdata,
            rclass,
            ttl,
        })
    }
}

impl DomainName {
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, DecodeError> {
        let mut labels = Vec::with_capacity(5);
        let mut len = 0;
        let mut jumps = 0;

        // `None` while reading from the live buffer position; `Some`
        // after the first compression pointer moves the read elsewhere.
        let mut detached: Option<usize> = None;

        loop {
            let size = next_name_octet(buffer, &mut detached)?;

            if size & 0b1100_0000 == 0b1100_0000 {
                let lo = next_name_octet(buffer, &mut detached)?;
                jumps += 1;
                if jumps > MAX_POINTER_JUMPS {
                    return Err(DecodeError::TooManyPointers);
                }
                detached = Some((usize::from(size & 0b0011_1111) << 8) | usize::from(lo));
            } else if size & 0b1100_0000 != 0 {
                return Err(DecodeError::BadLabelLength { length: size });
            } else if size == 0 {
                labels.push(Label::new());
                len += 1;
                if len > DOMAINNAME_MAX_LEN {
                    return Err(DecodeError::NameTooLong);
                }
                break;
            } else {
                let octets = match detached {
                    None => buffer.next_slice(size.into())?,
                    Some(position) => {
                        let end = position + usize::from(size);
                        let octets = buffer
                            .octets
                            .get(position..end)
                            .ok_or(DecodeError::UnexpectedEndOfInput)?;
                        detached = Some(end);
                        octets
                    }
                };
                // safe: size <= 63 after the flag-bit checks above
                labels.push(Label::try_from(octets).unwrap());
                len += 1 + usize::from(size);
            }

            if len > DOMAINNAME_MAX_LEN {
                return Err(DecodeError::NameTooLong);
            }
        }

        Ok(Self { labels, len })
    }
}

/// Read the next octet of a name, either from the live buffer or from
/// a detached position a compression pointer jumped to.
fn next_name_octet(
    buffer: &mut ConsumableBuffer,
    detached: &mut Option<usize>,
) -> Result<u8, DecodeError> {
    match detached {
        None => buffer.next_u8(),
        Some(position) => {
            let octet = buffer
                .octets
                .get(*position)
                .copied()
                .ok_or(DecodeError::UnexpectedEndOfInput)?;
            *detached = Some(*position + 1);
            Ok(octet)
        }
    }
}

/// Errors encountered when deserialising a message.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DecodeError {
    /// The input ran out before the message did.
    UnexpectedEndOfInput,
    /// A label length octet uses the reserved flag bits.
    BadLabelLength { length: u8 },
    /// A name followed so many compression pointers it must be a loop.
    TooManyPointers,
    /// A name exceeds 255 octets.
    NameTooLong,
    /// A fixed-size RDATA has the wrong length.
    BadRdataLength { rtype: u16, length: u16 },
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DecodeError::UnexpectedEndOfInput => write!(f, "unexpected end of input"),
            DecodeError::BadLabelLength { length } => {
                write!(f, "label length octet {length:#010b} uses reserved bits")
            }
            DecodeError::TooManyPointers => write!(f, "compression pointer loop"),
            DecodeError::NameTooLong => {
                write!(f, "domain name exceeds {DOMAINNAME_MAX_LEN} octets")
            }
            DecodeError::BadRdataLength { rtype, length } => {
                write!(f, "rdata length {length} is wrong for record type {rtype}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// A buffer which can be read from, for deserialisation purposes.
pub struct ConsumableBuffer<'a> {
    octets: &'a [u8],
    position: usize,
}

impl<'a> ConsumableBuffer<'a> {
    pub fn new(octets: &'a [u8]) -> Self {
        Self { octets, position: 0 }
    }

    fn next_u8(&mut self) -> Result<u8, DecodeError> {
        let octet = self
            .octets
            .get(self.position)
            .copied()
            .ok_or(DecodeError::UnexpectedEndOfInput)?;
        self.position += 1;
        Ok(octet)
    }

    fn next_u16(&mut self) -> Result<u16, DecodeError> {
        let hi = self.next_u8()?;
        let lo = self.next_u8()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    fn next_u32(&mut self) -> Result<u32, DecodeError> {
        let hi = self.next_u16()?;
        let lo = self.next_u16()?;
        Ok((u32::from(hi) << 16) | u32::from(lo))
    }

    fn next_slice(&mut self, length: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.position + length;
        let slice = self
            .octets
            .get(self.position..end)
            .ok_or(DecodeError::UnexpectedEndOfInput)?;
        self.position = end;
        Ok(slice)
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::types::test_util::*;

    #[test]
    fn roundtrip_message() {
        for _ in 0..100 {
            let original = Message {
                header: arbitrary_header(),
                questions: (0..3).map(|_| arbitrary_question()).collect(),
                answers: (0..3).map(|_| arbitrary_resourcerecord()).collect(),
                authority: (0..2).map(|_| arbitrary_resourcerecord()).collect(),
                additional: (0..2).map(|_| arbitrary_resourcerecord()).collect(),
            };

            let octets = original.to_octets().unwrap();
            assert_eq!(Ok(original), Message::from_octets(&octets));
        }
    }

    #[test]
    fn roundtrip_resourcerecord() {
        for _ in 0..100 {
            let original = arbitrary_resourcerecord();

            let mut buffer = crate::serialise::WritableBuffer::default();
            original.serialise(&mut buffer).unwrap();
            let deserialised =
                ResourceRecord::deserialise(&mut ConsumableBuffer::new(&buffer.octets));

            assert_eq!(Ok(original), deserialised);
        }
    }

    #[test]
    fn roundtrip_domainname() {
        for _ in 0..100 {
            let original = arbitrary_domainname();

            let mut buffer = crate::serialise::WritableBuffer::default();
            original.serialise(&mut buffer, true);
            let deserialised = DomainName::deserialise(&mut ConsumableBuffer::new(&buffer.octets));

            assert_eq!(Ok(original), deserialised);
        }
    }

    #[test]
    fn compressed_names_decode() {
        // one query and one answer for the same name: the answer's
        // owner is written as a pointer back into the question section
        let question = a_question("www.example.com.");
        let mut message = Message::query(1234, vec![question]);
        message.answers = vec![a_record("www.example.com.", Ipv4Addr::new(1, 1, 1, 1))];

        let octets = message.to_octets().unwrap();
        let uncompressed_len = 12 + (17 + 4) + (17 + 10 + 4);
        assert!(octets.len() < uncompressed_len);
        assert_eq!(Ok(message), Message::from_octets(&octets));
    }

    #[test]
    fn pointer_loop_is_an_error() {
        // a name which is a pointer to itself
        let octets = [0b1100_0000, 0];
        assert_eq!(
            Err(DecodeError::TooManyPointers),
            DomainName::deserialise(&mut ConsumableBuffer::new(&octets))
        );
    }

    #[test]
    fn truncated_input_is_an_error() {
        let message = Message::query(1, vec![a_question("host.example.com.")]);
        let octets = message.to_octets().unwrap();
        assert_eq!(
            Err(DecodeError::UnexpectedEndOfInput),
            Message::from_octets(&octets[..octets.len() - 1])
        );
    }
}
