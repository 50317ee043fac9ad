//! Wire constants of the object serialization stream.

/// First two bytes of every stream.
pub const STREAM_MAGIC: u16 = 0xACED;
/// Protocol version following the magic.
pub const STREAM_VERSION: u16 = 5;

pub const TC_BASE: u8 = 0x70;
pub const TC_NULL: u8 = 0x70;
pub const TC_REFERENCE: u8 = 0x71;
pub const TC_CLASSDESC: u8 = 0x72;
pub const TC_OBJECT: u8 = 0x73;
pub const TC_STRING: u8 = 0x74;
pub const TC_ARRAY: u8 = 0x75;
pub const TC_CLASS: u8 = 0x76;
pub const TC_BLOCKDATA: u8 = 0x77;
pub const TC_ENDBLOCKDATA: u8 = 0x78;
pub const TC_RESET: u8 = 0x79;
pub const TC_BLOCKDATALONG: u8 = 0x7A;
pub const TC_EXCEPTION: u8 = 0x7B;
pub const TC_LONGSTRING: u8 = 0x7C;
pub const TC_PROXYCLASSDESC: u8 = 0x7D;
pub const TC_ENUM: u8 = 0x7E;
pub const TC_MAX: u8 = 0x7E;

/// First handle assigned in a stream (and after each reset).
pub const BASE_WIRE_HANDLE: u32 = 0x7E_0000;

// Class descriptor flag bits.
pub const SC_WRITE_METHOD: u8 = 0x01;
pub const SC_SERIALIZABLE: u8 = 0x02;
pub const SC_EXTERNALIZABLE: u8 = 0x04;
pub const SC_BLOCK_DATA: u8 = 0x08;
pub const SC_ENUM: u8 = 0x10;

/// Externalizable data written unframed.
pub const PROTOCOL_VERSION_1: u8 = 1;
/// Externalizable data wrapped in block data (default).
pub const PROTOCOL_VERSION_2: u8 = 2;

/// Largest payload of one block-data record emitted by the writer.
pub const MAX_BLOCK_SIZE: usize = 1024;

/// Token tags as a closed enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    Null = TC_NULL,
    Reference = TC_REFERENCE,
    ClassDesc = TC_CLASSDESC,
    Object = TC_OBJECT,
    String = TC_STRING,
    Array = TC_ARRAY,
    Class = TC_CLASS,
    BlockData = TC_BLOCKDATA,
    EndBlockData = TC_ENDBLOCKDATA,
    Reset = TC_RESET,
    BlockDataLong = TC_BLOCKDATALONG,
    Exception = TC_EXCEPTION,
    LongString = TC_LONGSTRING,
    ProxyClassDesc = TC_PROXYCLASSDESC,
    Enum = TC_ENUM,
}

impl Tag {
    pub const ALL: [Tag; 15] = [
        Tag::Null,
        Tag::Reference,
        Tag::ClassDesc,
        Tag::Object,
        Tag::String,
        Tag::Array,
        Tag::Class,
        Tag::BlockData,
        Tag::EndBlockData,
        Tag::Reset,
        Tag::BlockDataLong,
        Tag::Exception,
        Tag::LongString,
        Tag::ProxyClassDesc,
        Tag::Enum,
    ];

    #[must_use]
    pub const fn byte(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Tag::Null => "TC_NULL",
            Tag::Reference => "TC_REFERENCE",
            Tag::ClassDesc => "TC_CLASSDESC",
            Tag::Object => "TC_OBJECT",
            Tag::String => "TC_STRING",
            Tag::Array => "TC_ARRAY",
            Tag::Class => "TC_CLASS",
            Tag::BlockData => "TC_BLOCKDATA",
            Tag::EndBlockData => "TC_ENDBLOCKDATA",
            Tag::Reset => "TC_RESET",
            Tag::BlockDataLong => "TC_BLOCKDATALONG",
            Tag::Exception => "TC_EXCEPTION",
            Tag::LongString => "TC_LONGSTRING",
            Tag::ProxyClassDesc => "TC_PROXYCLASSDESC",
            Tag::Enum => "TC_ENUM",
        }
    }
}

impl TryFrom<u8> for Tag {
    type Error = u8;

    fn try_from(b: u8) -> Result<Self, Self::Error> {
        if (TC_BASE..=TC_MAX).contains(&b) {
            Ok(Tag::ALL[(b - TC_BASE) as usize])
        } else {
            Err(b)
        }
    }
}
