use bytes::Bytes;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Maximum encoded length of a domain name: the number of labels plus
/// the sum of the lengths of the labels.
pub const DOMAINNAME_MAX_LEN: usize = 255;

/// Maximum length of a single label in a domain name.
pub const LABEL_MAX_LEN: usize = 63;

/// A DNS message, used for both queries and responses: a header
/// followed by the question, answer, authority, and additional
/// sections.
///
/// See section 4.1 of RFC 1035.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub authority: Vec<ResourceRecord>,
    pub additional: Vec<ResourceRecord>,
}

impl Message {
    /// Build a query message carrying the given questions.
    pub fn query(id: u16, questions: Vec<Question>) -> Self {
        Self {
            header: Header {
                id,
                is_query: true,
                opcode: Opcode::Standard,
                is_authoritative: false,
                is_truncated: false,
                recursion_desired: false,
                recursion_available: false,
                rcode: Rcode::NoError,
            },
            questions,
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }

    /// Build an empty response to this message, copying the id and
    /// questions.
    pub fn response(&self) -> Self {
        Self {
            header: Header {
                id: self.header.id,
                is_query: false,
                opcode: self.header.opcode,
                is_authoritative: false,
                is_truncated: false,
                recursion_desired: self.header.recursion_desired,
                recursion_available: true,
                rcode: Rcode::NoError,
            },
            questions: self.questions.clone(),
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }
}

/// Common header type for all messages.
///
/// ```text
///                                     1  1  1  1  1  1
///       0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                      ID                       |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |QR|   Opcode  |AA|TC|RD|RA|   Z    |   RCODE   |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    QDCOUNT                    |
///     |                    ANCOUNT                    |
///     |                    NSCOUNT                    |
///     |                    ARCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// ```
///
/// The four counts are omitted: they are derived from the section
/// vectors during encoding and decoding.
///
/// See section 4.1.1 of RFC 1035.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub struct Header {
    /// Identifier assigned by the program that generates the query,
    /// copied into the reply so the requester can match responses to
    /// outstanding queries.
    pub id: u16,

    /// Whether this message is a query (QR clear) or a response (QR
    /// set).
    pub is_query: bool,

    /// The kind of query.
    pub opcode: Opcode,

    /// In responses: whether the responding nameserver is an authority
    /// for the name in question.
    pub is_authoritative: bool,

    /// Whether the message was cut off by the transmission channel.
    pub is_truncated: bool,

    /// Set in a query to direct the nameserver to pursue the query
    /// recursively; copied into the response.
    pub recursion_desired: bool,

    /// In responses: whether the nameserver supports recursive query.
    pub recursion_available: bool,

    /// Response code.
    pub rcode: Rcode,
}

/// A single entry of the question section.
///
/// See section 4.1.2 of RFC 1035.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub struct Question {
    /// The domain name being asked about.
    pub name: DomainName,

    /// The type of the query, a superset of record types.
    pub qtype: QueryType,

    /// The class of the query: IN for the Internet.
    pub qclass: QueryClass,
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.name.to_dotted_string(),
            self.qclass,
            self.qtype
        )
    }
}

/// A single resource record, as found in the answer, authority, and
/// additional sections.
///
/// See section 4.1.3 of RFC 1035.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ResourceRecord {
    /// The domain name this record pertains to (its "owner").
    pub name: DomainName,

    /// The record data, tagged by record type.  The RDLENGTH field of
    /// the wire format is derived during encoding.
    pub rdata: Rdata,

    /// The class of the record data.
    pub rclass: RecordClass,

    /// How long, in seconds, the record may be cached.  A zero TTL
    /// means the record is only valid for the transaction in progress.
    pub ttl: u32,
}

impl ResourceRecord {
    pub fn rtype(&self) -> RecordType {
        self.rdata.rtype()
    }

    pub fn is_unknown(&self) -> bool {
        self.rdata.is_unknown() || self.rclass.is_unknown()
    }

    /// Whether this record can answer the given question, ignoring the
    /// owner name.
    pub fn matches(&self, question: &Question) -> bool {
        self.rdata.matches(question.qtype) && self.rclass.matches(question.qclass)
    }
}

/// Record data, tagged by record type, so that a record's data always
/// agrees with its type.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Rdata {
    /// A 32-bit Internet address.
    A { address: Ipv4Addr },

    /// A 128-bit Internet address.  See RFC 3596.
    AAAA { address: Ipv6Addr },

    /// The host name of an authoritative nameserver for the owner
    /// domain.
    NS { nsdname: DomainName },

    /// The canonical name for an alias.
    CNAME { canonical: DomainName },

    /// Marks the start of a zone of authority.
    SOA {
        mname: DomainName,
        rname: DomainName,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    },

    /// A pointer to another part of the domain name space.
    PTR { ptrdname: DomainName },

    /// A host willing to act as a mail exchange for the owner domain.
    MX {
        preference: u16,
        exchange: DomainName,
    },

    /// One or more character strings; carried verbatim.
    TXT { octets: Bytes },

    /// A record type this codec does not interpret; the RDATA is
    /// carried verbatim.
    Unknown { tag: u16, octets: Bytes },
}

impl Rdata {
    pub fn rtype(&self) -> RecordType {
        match self {
            Rdata::A { .. } => RecordType::A,
            Rdata::AAAA { .. } => RecordType::AAAA,
            Rdata::NS { .. } => RecordType::NS,
            Rdata::CNAME { .. } => RecordType::CNAME,
            Rdata::SOA { .. } => RecordType::SOA,
            Rdata::PTR { .. } => RecordType::PTR,
            Rdata::MX { .. } => RecordType::MX,
            Rdata::TXT { .. } => RecordType::TXT,
            Rdata::Unknown { tag, .. } => RecordType::Unknown(*tag),
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Rdata::Unknown { .. })
    }

    pub fn matches(&self, qtype: QueryType) -> bool {
        self.rtype().matches(qtype)
    }
}

/// What a nameserver is being asked to do.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Opcode {
    Standard,
    Inverse,
    Status,
    Reserved(u8),
}

impl From<u8> for Opcode {
    fn from(octet: u8) -> Self {
        match octet & 0b0000_1111 {
            0 => Opcode::Standard,
            1 => Opcode::Inverse,
            2 => Opcode::Status,
            other => Opcode::Reserved(other),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(opcode: Opcode) -> Self {
        match opcode {
            Opcode::Standard => 0,
            Opcode::Inverse => 1,
            Opcode::Status => 2,
            Opcode::Reserved(octet) => octet,
        }
    }
}

/// The outcome of a query, from the responding nameserver's point of
/// view.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Rcode {
    NoError,
    FormatError,
    ServerFailure,
    NameError,
    NotImplemented,
    Refused,
    Reserved(u8),
}

impl fmt::Display for Rcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Rcode::NoError => write!(f, "no-error"),
            Rcode::FormatError => write!(f, "format-error"),
            Rcode::ServerFailure => write!(f, "server-failure"),
            Rcode::NameError => write!(f, "name-error"),
            Rcode::NotImplemented => write!(f, "not-implemented"),
            Rcode::Refused => write!(f, "refused"),
            Rcode::Reserved(octet) => write!(f, "reserved-{octet}"),
        }
    }
}

impl From<u8> for Rcode {
    fn from(octet: u8) -> Self {
        match octet & 0b0000_1111 {
            0 => Rcode::NoError,
            1 => Rcode::FormatError,
            2 => Rcode::ServerFailure,
            3 => Rcode::NameError,
            4 => Rcode::NotImplemented,
            5 => Rcode::Refused,
            other => Rcode::Reserved(other),
        }
    }
}

impl From<Rcode> for u8 {
    fn from(rcode: Rcode) -> Self {
        match rcode {
            Rcode::NoError => 0,
            Rcode::FormatError => 1,
            Rcode::ServerFailure => 2,
            Rcode::NameError => 3,
            Rcode::NotImplemented => 4,
            Rcode::Refused => 5,
            Rcode::Reserved(octet) => octet,
        }
    }
}

/// A domain name: a sequence of labels, each at most 63 octets, ending
/// with the empty root label.  Comparison is case-insensitive because
/// labels are lowercased on construction.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DomainName {
    pub labels: Vec<Label>,
    // INVARIANT: len == len(labels) + sum(map(len, labels))
    pub len: usize,
}

impl DomainName {
    pub fn root() -> Self {
        DomainName {
            labels: vec![Label::new()],
            len: 1,
        }
    }

    pub fn is_root(&self) -> bool {
        self.len == 1 && self.labels[0].is_empty()
    }

    /// Whether this name equals `other` or sits somewhere below it in
    /// the namespace.
    pub fn is_subdomain_of(&self, other: &DomainName) -> bool {
        self.labels.ends_with(&other.labels)
    }

    /// The name with the leftmost label removed; `None` for the root.
    pub fn parent(&self) -> Option<DomainName> {
        if self.is_root() {
            None
        } else {
            DomainName::from_labels(self.labels[1..].to_vec())
        }
    }

    pub fn to_dotted_string(&self) -> String {
        if self.is_root() {
            return ".".to_string();
        }

        let mut out = String::with_capacity(self.len);
        let mut first = true;
        for label in &self.labels {
            if first {
                first = false;
            } else {
                out.push('.');
            }
            for octet in label.octets() {
                out.push(*octet as char);
            }
        }

        out
    }

    /// Parse a dotted string, which must be absolute (end with a `.`).
    pub fn from_dotted_string(s: &str) -> Option<Self> {
        if s == "." {
            return Some(Self::root());
        }

        let chunks = s.split('.').collect::<Vec<_>>();
        let mut labels = Vec::with_capacity(chunks.len());

        for (i, chunk) in chunks.iter().enumerate() {
            if chunk.is_empty() && i != chunks.len() - 1 {
                return None;
            }

            match chunk.as_bytes().try_into() {
                Ok(label) => labels.push(label),
                Err(_) => return None,
            }
        }

        Self::from_labels(labels)
    }

    /// Build a name from labels.  The final label must be the root
    /// label, no other label may be empty, and the whole name must fit
    /// in 255 octets.
    pub fn from_labels(labels: Vec<Label>) -> Option<Self> {
        if labels.is_empty() {
            return None;
        }

        let mut len = labels.len();
        let mut saw_root = false;

        for label in &labels {
            if saw_root {
                return None;
            }

            saw_root |= label.is_empty();
            len += label.len() as usize;
        }

        if saw_root && len <= DOMAINNAME_MAX_LEN {
            Some(Self { labels, len })
        } else {
            None
        }
    }
}

impl fmt::Debug for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainName")
            .field("to_dotted_string()", &self.to_dotted_string())
            .finish()
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", &self.to_dotted_string())
    }
}

impl FromStr for DomainName {
    type Err = DomainNameFromStr;

    /// Accepts both absolute (`"example.com."`) and relative
    /// (`"example.com"`) spellings; a relative name is taken as a
    /// child of the root.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = if s.ends_with('.') {
            DomainName::from_dotted_string(s)
        } else {
            DomainName::from_dotted_string(&format!("{s}."))
        };
        parsed.ok_or(DomainNameFromStr::NoParse)
    }
}

/// Errors that can arise when converting a `&str` into a `DomainName`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DomainNameFromStr {
    NoParse,
}

impl fmt::Display for DomainNameFromStr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "could not parse string to domain name")
    }
}

impl std::error::Error for DomainNameFromStr {}

/// One dot-separated chunk of a domain name.  Compared
/// case-insensitively by lowercasing on construction; at most 63
/// octets.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Label {
    // private so an oversized or mixed-case `Label` cannot be built
    octets: Bytes,
}

impl Label {
    /// The empty (root) label.
    pub fn new() -> Self {
        Self {
            octets: Bytes::new(),
        }
    }

    #[allow(clippy::missing_panics_doc)]
    pub fn len(&self) -> u8 {
        // safe as the `TryFrom` ensures a label is <= 63 octets
        self.octets.len().try_into().unwrap()
    }

    pub fn is_empty(&self) -> bool {
        self.octets.is_empty()
    }

    pub fn octets(&self) -> &Bytes {
        &self.octets
    }
}

impl Default for Label {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<&[u8]> for Label {
    type Error = LabelTooLong;

    fn try_from(mixed_case_octets: &[u8]) -> Result<Self, Self::Error> {
        if mixed_case_octets.len() > LABEL_MAX_LEN {
            return Err(LabelTooLong);
        }

        Ok(Self {
            octets: Bytes::from(mixed_case_octets.to_ascii_lowercase()),
        })
    }
}

/// Error when converting a `[u8]` into a `Label`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct LabelTooLong;

impl fmt::Display for LabelTooLong {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "label exceeds {LABEL_MAX_LEN} octets")
    }
}

impl std::error::Error for LabelTooLong {}

/// Query types are a superset of record types.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum QueryType {
    Record(RecordType),
    Wildcard,
}

impl QueryType {
    pub fn is_unknown(&self) -> bool {
        match self {
            QueryType::Record(rtype) => rtype.is_unknown(),
            QueryType::Wildcard => false,
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueryType::Record(rtype) => rtype.fmt(f),
            QueryType::Wildcard => write!(f, "ANY"),
        }
    }
}

impl FromStr for QueryType {
    type Err = RecordTypeFromStr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ANY" | "*" => Ok(QueryType::Wildcard),
            _ => RecordType::from_str(s).map(QueryType::Record),
        }
    }
}

impl From<u16> for QueryType {
    fn from(value: u16) -> Self {
        match value {
            255 => QueryType::Wildcard,
            _ => QueryType::Record(RecordType::from(value)),
        }
    }
}

impl From<QueryType> for u16 {
    fn from(value: QueryType) -> Self {
        match value {
            QueryType::Wildcard => 255,
            QueryType::Record(rtype) => rtype.into(),
        }
    }
}

/// Query classes are a superset of record classes.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum QueryClass {
    Record(RecordClass),
    Wildcard,
}

impl QueryClass {
    pub fn is_unknown(&self) -> bool {
        match self {
            QueryClass::Record(rclass) => rclass.is_unknown(),
            QueryClass::Wildcard => false,
        }
    }
}

impl fmt::Display for QueryClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueryClass::Record(rclass) => rclass.fmt(f),
            QueryClass::Wildcard => write!(f, "*"),
        }
    }
}

impl From<u16> for QueryClass {
    fn from(value: u16) -> Self {
        match value {
            255 => QueryClass::Wildcard,
            _ => QueryClass::Record(RecordClass::from(value)),
        }
    }
}

impl From<QueryClass> for u16 {
    fn from(value: QueryClass) -> Self {
        match value {
            QueryClass::Wildcard => 255,
            QueryClass::Record(rclass) => rclass.into(),
        }
    }
}

/// The record types this resolver interprets.  Anything else is
/// carried as `Unknown` with its RDATA untouched.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum RecordType {
    A,
    NS,
    CNAME,
    SOA,
    PTR,
    MX,
    TXT,
    AAAA,
    Unknown(u16),
}

impl RecordType {
    pub fn is_unknown(&self) -> bool {
        matches!(self, RecordType::Unknown(_))
    }

    pub fn matches(&self, qtype: QueryType) -> bool {
        match qtype {
            QueryType::Wildcard => true,
            QueryType::Record(rtype) => rtype == *self,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RecordType::A => write!(f, "A"),
            RecordType::NS => write!(f, "NS"),
            RecordType::CNAME => write!(f, "CNAME"),
            RecordType::SOA => write!(f, "SOA"),
            RecordType::PTR => write!(f, "PTR"),
            RecordType::MX => write!(f, "MX"),
            RecordType::TXT => write!(f, "TXT"),
            RecordType::AAAA => write!(f, "AAAA"),
            RecordType::Unknown(tag) => write!(f, "TYPE{tag}"),
        }
    }
}

impl FromStr for RecordType {
    type Err = RecordTypeFromStr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(RecordType::A),
            "NS" => Ok(RecordType::NS),
            "CNAME" => Ok(RecordType::CNAME),
            "SOA" => Ok(RecordType::SOA),
            "PTR" => Ok(RecordType::PTR),
            "MX" => Ok(RecordType::MX),
            "TXT" => Ok(RecordType::TXT),
            "AAAA" => Ok(RecordType::AAAA),
            _ => Err(RecordTypeFromStr),
        }
    }
}

/// Error when parsing a `RecordType` (or `QueryType`) from a string.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RecordTypeFromStr;

impl fmt::Display for RecordTypeFromStr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unrecognised record type name")
    }
}

impl std::error::Error for RecordTypeFromStr {}

impl From<u16> for RecordType {
    fn from(value: u16) -> Self {
        match value {
            1 => RecordType::A,
            2 => RecordType::NS,
            5 => RecordType::CNAME,
            6 => RecordType::SOA,
            12 => RecordType::PTR,
            15 => RecordType::MX,
            16 => RecordType::TXT,
            28 => RecordType::AAAA,
            other => RecordType::Unknown(other),
        }
    }
}

impl From<RecordType> for u16 {
    fn from(value: RecordType) -> Self {
        match value {
            RecordType::A => 1,
            RecordType::NS => 2,
            RecordType::CNAME => 5,
            RecordType::SOA => 6,
            RecordType::PTR => 12,
            RecordType::MX => 15,
            RecordType::TXT => 16,
            RecordType::AAAA => 28,
            RecordType::Unknown(tag) => tag,
        }
    }
}

/// Record classes.  Only IN is interpreted.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum RecordClass {
    IN,
    Unknown(u16),
}

impl RecordClass {
    pub fn is_unknown(&self) -> bool {
        matches!(self, RecordClass::Unknown(_))
    }

    pub fn matches(&self, qclass: QueryClass) -> bool {
        match qclass {
            QueryClass::Wildcard => true,
            QueryClass::Record(rclass) => rclass == *self,
        }
    }
}

impl fmt::Display for RecordClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RecordClass::IN => write!(f, "IN"),
            RecordClass::Unknown(tag) => write!(f, "CLASS{tag}"),
        }
    }
}

impl From<u16> for RecordClass {
    fn from(value: u16) -> Self {
        match value {
            1 => RecordClass::IN,
            other => RecordClass::Unknown(other),
        }
    }
}

impl From<RecordClass> for u16 {
    fn from(value: RecordClass) -> Self {
        match value {
            RecordClass::IN => 1,
            RecordClass::Unknown(tag) => tag,
        }
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for Opcode {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self::from(u.arbitrary::<u8>()?))
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for Rcode {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self::from(u.arbitrary::<u8>()?))
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for QueryType {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self::from(u.arbitrary::<u16>()?))
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for QueryClass {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self::from(u.arbitrary::<u16>()?))
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for RecordClass {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self::from(u.arbitrary::<u16>()?))
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for Label {
    // only generates non-empty labels
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Label> {
        let label_len = u.int_in_range::<u8>(1..=20)?;
        let mut octets = Vec::with_capacity(label_len.into());
        for b in u.bytes(label_len.into())? {
            let ascii_byte = if b.is_ascii() { *b } else { *b % 128 };
            octets.push(
                if ascii_byte == b'.' || (ascii_byte as char).is_whitespace() {
                    b'x'
                } else {
                    ascii_byte.to_ascii_lowercase()
                },
            );
        }
        Ok(Self {
            octets: Bytes::from(octets),
        })
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for DomainName {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        let num_labels = u.int_in_range::<usize>(0..=7)?;
        let mut labels = Vec::with_capacity(num_labels + 1);
        for _ in 0..num_labels {
            labels.push(u.arbitrary()?);
        }
        labels.push(Label::new());
        Ok(DomainName::from_labels(labels).unwrap())
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for Rdata {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(match u.int_in_range::<u8>(0..=8)? {
            0 => Rdata::A {
                address: Ipv4Addr::from(u.arbitrary::<u32>()?),
            },
            1 => Rdata::AAAA {
                address: Ipv6Addr::from(u.arbitrary::<u128>()?),
            },
            2 => Rdata::NS {
                nsdname: u.arbitrary()?,
            },
            3 => Rdata::CNAME {
                canonical: u.arbitrary()?,
            },
            4 => Rdata::SOA {
                mname: u.arbitrary()?,
                rname: u.arbitrary()?,
                serial: u.arbitrary()?,
                refresh: u.arbitrary()?,
                retry: u.arbitrary()?,
                expire: u.arbitrary()?,
                minimum: u.arbitrary()?,
            },
            5 => Rdata::PTR {
                ptrdname: u.arbitrary()?,
            },
            6 => Rdata::MX {
                preference: u.arbitrary()?,
                exchange: u.arbitrary()?,
            },
            7 => {
                let len = u.int_in_range(0..=48)?;
                Rdata::TXT {
                    octets: Bytes::from(u.bytes(len)?.to_vec()),
                }
            }
            _ => {
                // known record types all sit below 29; 255 is the
                // wildcard query type, not a record type
                let tag = u.int_in_range(29..=u16::MAX)?;
                let len = u.int_in_range(0..=48)?;
                Rdata::Unknown {
                    tag,
                    octets: Bytes::from(u.bytes(len)?.to_vec()),
                }
            }
        })
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for ResourceRecord {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self {
            name: u.arbitrary()?,
            rdata: u.arbitrary()?,
            rclass: u.arbitrary()?,
            ttl: u.arbitrary()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domainname_root_is_root() {
        assert!(DomainName::root().is_root());
        assert_eq!(".", DomainName::root().to_dotted_string());
    }

    #[test]
    fn domainname_from_dotted_string_requires_trailing_dot() {
        assert_eq!(None, DomainName::from_dotted_string("www.example.com"));
        assert!(DomainName::from_dotted_string("www.example.com.").is_some());
    }

    #[test]
    fn domainname_from_str_accepts_relative() {
        let absolute = DomainName::from_str("www.example.com.").unwrap();
        let relative = DomainName::from_str("www.example.com").unwrap();
        assert_eq!(absolute, relative);
    }

    #[test]
    fn domainname_lowercases() {
        assert_eq!(
            DomainName::from_dotted_string("WWW.EXAMPLE.COM."),
            DomainName::from_dotted_string("www.example.com.")
        );
    }

    #[test]
    fn domainname_rejects_interior_empty_label() {
        assert_eq!(None, DomainName::from_dotted_string("www..com."));
    }

    #[test]
    fn domainname_subdomain_check() {
        let www = DomainName::from_dotted_string("www.example.com.").unwrap();
        let apex = DomainName::from_dotted_string("example.com.").unwrap();
        let other = DomainName::from_dotted_string("example.net.").unwrap();

        assert!(www.is_subdomain_of(&apex));
        assert!(www.is_subdomain_of(&www));
        assert!(www.is_subdomain_of(&DomainName::root()));
        assert!(!www.is_subdomain_of(&other));
        assert!(!apex.is_subdomain_of(&www));
    }

    #[test]
    fn domainname_parent() {
        let www = DomainName::from_dotted_string("www.example.com.").unwrap();
        let apex = DomainName::from_dotted_string("example.com.").unwrap();

        assert_eq!(Some(apex), www.parent());
        assert_eq!(None, DomainName::root().parent());
    }

    #[test]
    fn domainname_len_invariant() {
        for _ in 0..100 {
            let name = test_util::arbitrary_domainname();
            let expected =
                name.labels.len() + name.labels.iter().map(|l| l.len() as usize).sum::<usize>();
            assert_eq!(expected, name.len);
        }
    }

    #[test]
    fn recordtype_u16_conversions_agree() {
        for value in [1u16, 2, 5, 6, 12, 15, 16, 28, 99] {
            assert_eq!(value, u16::from(RecordType::from(value)));
        }
    }

    #[test]
    fn rdata_rtype_matches_wildcard() {
        let rdata = Rdata::A {
            address: std::net::Ipv4Addr::LOCALHOST,
        };
        assert!(rdata.matches(QueryType::Wildcard));
        assert!(rdata.matches(QueryType::Record(RecordType::A)));
        assert!(!rdata.matches(QueryType::Record(RecordType::NS)));
    }
}

#[cfg(any(feature = "test-util", test))]
#[allow(clippy::missing_panics_doc)]
pub mod test_util {
    use super::*;

    use arbitrary::{Arbitrary, Unstructured};
    use rand::Rng;

    fn arbitrary_with_entropy<T: for<'a> Arbitrary<'a>>() -> T {
        let mut rng = rand::thread_rng();
        for size in [128, 256, 512, 1024, 2048, 4096] {
            let mut buf = vec![0u8; size];
            rng.fill(&mut buf[..]);

            if let Ok(value) = T::arbitrary(&mut Unstructured::new(&buf)) {
                return value;
            }
        }

        panic!("could not generate arbitrary value!");
    }

    pub fn arbitrary_resourcerecord() -> ResourceRecord {
        arbitrary_with_entropy()
    }

    pub fn arbitrary_domainname() -> DomainName {
        arbitrary_with_entropy()
    }

    pub fn arbitrary_header() -> Header {
        arbitrary_with_entropy()
    }

    pub fn arbitrary_question() -> Question {
        arbitrary_with_entropy()
    }

    pub fn domain(name: &str) -> DomainName {
        DomainName::from_dotted_string(name).unwrap()
    }

    pub fn a_record(name: &str, address: Ipv4Addr) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rdata: Rdata::A { address },
            rclass: RecordClass::IN,
            ttl: 300,
        }
    }

    pub fn aaaa_record(name: &str, address: Ipv6Addr) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rdata: Rdata::AAAA { address },
            rclass: RecordClass::IN,
            ttl: 300,
        }
    }

    pub fn cname_record(name: &str, target_name: &str) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rdata: Rdata::CNAME {
                canonical: domain(target_name),
            },
            rclass: RecordClass::IN,
            ttl: 300,
        }
    }

    pub fn ns_record(superdomain_name: &str, nameserver_name: &str) -> ResourceRecord {
        ResourceRecord {
            name: domain(superdomain_name),
            rdata: Rdata::NS {
                nsdname: domain(nameserver_name),
            },
            rclass: RecordClass::IN,
            ttl: 300,
        }
    }

    pub fn soa_record(name: &str, minimum: u32) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rdata: Rdata::SOA {
                mname: domain("mname."),
                rname: domain("rname."),
                serial: 0,
                refresh: 0,
                retry: 0,
                expire: 0,
                minimum,
            },
            rclass: RecordClass::IN,
            ttl: 300,
        }
    }

    pub fn unknown_record(name: &str, octets: &[u8]) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rdata: Rdata::Unknown {
                tag: 100,
                octets: Bytes::copy_from_slice(octets),
            },
            rclass: RecordClass::IN,
            ttl: 300,
        }
    }

    pub fn a_question(name: &str) -> Question {
        Question {
            name: domain(name),
            qtype: QueryType::Record(RecordType::A),
            qclass: QueryClass::Record(RecordClass::IN),
        }
    }
}
