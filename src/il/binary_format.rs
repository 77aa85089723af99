use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Result;

/// Utility trait for writing encoded method bodies
///
/// Everything in a method body is little-endian and fixed width, so this is a thin layer over
/// `byteorder` that keeps the encoding of each piece next to its type.
pub trait Serialize {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()>;
}

impl Serialize for u8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(*self)
    }
}

impl Serialize for i8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_i8(*self)
    }
}

impl Serialize for u16 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u16::<LittleEndian>(*self)
    }
}

impl Serialize for i32 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_i32::<LittleEndian>(*self)
    }
}

impl Serialize for u32 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(*self)
    }
}

/// Metadata token: table tag in the high byte and a 1-based row in the low three bytes
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Token(pub u32);

impl Token {
    pub const STRING: u8 = 0x70;
    pub const TYPE_SPEC: u8 = 0x1B;
    pub const METHOD_DEF: u8 = 0x06;
    pub const MEMBER_REF: u8 = 0x0A;
    pub const FIELD_DEF: u8 = 0x04;

    pub fn new(table: u8, row: usize) -> Token {
        Token(((table as u32) << 24) | (row as u32 & 0x00FF_FFFF))
    }

    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }
}

impl Serialize for Token {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.0.serialize(writer)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tokens() -> Result<()> {
        let token = Token::new(Token::STRING, 3);
        assert_eq!(token.table(), Token::STRING);
        assert_eq!(token.row(), 3);

        let mut bytes = vec![];
        token.serialize(&mut bytes)?;
        (-2i32).serialize(&mut bytes)?;
        assert_eq!(bytes, vec![0x03, 0x00, 0x00, 0x70, 0xFE, 0xFF, 0xFF, 0xFF]);
        Ok(())
    }
}
