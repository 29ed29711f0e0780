use crate::error::{Error, MsgPackError, Result};

/// Signedness requirement for an integer read. A mismatch between the
/// request and the stored value is an error, not a wrap-around.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Signedness {
    Both,
    Unsigned,
    Signed,
}

fn err(kind: MsgPackError) -> Error {
    Error::MsgPackError(kind)
}

/// Cursor over one MsgPack byte stream. Each `parse_*` call consumes
/// exactly one object or fails without a defined position.
pub struct StreamParser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> StreamParser<'a> {
    pub fn new(bytes: &'a [u8]) -> StreamParser<'a> {
        StreamParser { bytes, pos: 0 }
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek_u8(&self) -> Result<u8> {
        self.bytes
            .get(self.pos)
            .copied()
            .ok_or_else(|| err(MsgPackError::Truncated))
    }

    fn read_u8(&mut self) -> Result<u8> {
        let v = self.peek_u8()?;
        self.pos += 1;
        Ok(v)
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.bytes.len() {
            return Err(err(MsgPackError::Truncated));
        }
        let r = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(r)
    }

    fn read_be(&mut self, len: usize) -> Result<u64> {
        Ok(self
            .read_slice(len)?
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | *b as u64))
    }

    pub fn parse_nil(&mut self) -> Result<()> {
        if self.read_u8()? != 0xc0 {
            return Err(err(MsgPackError::BadTag));
        }
        Ok(())
    }

    pub fn parse_bool(&mut self) -> Result<bool> {
        match self.read_u8()? {
            0xc2 => Ok(false),
            0xc3 => Ok(true),
            _ => Err(err(MsgPackError::BadTag)),
        }
    }

    /// Integers of every width. Codes `0xd0..=0xd3` sign-extend from
    /// the stored width; the signedness request is then checked against
    /// the decoded value.
    pub fn parse_integer(&mut self, sign: Signedness) -> Result<u64> {
        let c = self.read_u8()?;
        let (value, from_signed) = if c < 0x80 {
            (c as u64, false)
        } else if c >= 0xe0 {
            (c as i8 as i64 as u64, true)
        } else {
            match c {
                0xc2 | 0xc3 => ((c - 0xc2) as u64, false),
                0xcc..=0xcf => {
                    let len = 1usize << (c - 0xcc);
                    (self.read_be(len)?, false)
                }
                0xd0..=0xd3 => {
                    let len = 1usize << (c - 0xd0);
                    let raw = self.read_be(len)?;
                    let shift = 64 - len as u32 * 8;
                    (((raw << shift) as i64 >> shift) as u64, true)
                }
                _ => return Err(err(MsgPackError::BadTag)),
            }
        };
        if sign == Signedness::Unsigned && from_signed && value >= 1 << 63 {
            return Err(err(MsgPackError::NegativeForUnsigned));
        }
        if sign == Signedness::Signed && !from_signed && value >= 1 << 63 {
            return Err(err(MsgPackError::PositiveOutOfRange));
        }
        Ok(value)
    }

    pub fn parse_float(&mut self) -> Result<f64> {
        match self.read_u8()? {
            0xca => Ok(f32::from_bits(self.read_be(4)? as u32) as f64),
            0xcb => Ok(f64::from_bits(self.read_be(8)?)),
            _ => Err(err(MsgPackError::BadTag)),
        }
    }

    pub fn parse_string(&mut self) -> Result<&'a str> {
        let c = self.read_u8()?;
        let len = match c {
            0xa0..=0xbf => (c & 0x1f) as usize,
            0xd9 => self.read_be(1)? as usize,
            0xda => self.read_be(2)? as usize,
            0xdb => self.read_be(4)? as usize,
            _ => return Err(err(MsgPackError::BadTag)),
        };
        let slice = self.read_slice(len)?;
        std::str::from_utf8(slice).map_err(|_| err(MsgPackError::WrongValueKind))
    }

    pub fn parse_bin(&mut self) -> Result<&'a [u8]> {
        let c = self.read_u8()?;
        let len = match c {
            0xc4 => self.read_be(1)? as usize,
            0xc5 => self.read_be(2)? as usize,
            0xc6 => self.read_be(4)? as usize,
            _ => return Err(err(MsgPackError::BadTag)),
        };
        self.read_slice(len)
    }

    pub fn parse_array(&mut self) -> Result<ArrayParser> {
        let c = self.read_u8()?;
        let count = match c {
            0x90..=0x9f => (c & 0xf) as usize,
            0xdc => self.read_be(2)? as usize,
            0xdd => self.read_be(4)? as usize,
            _ => return Err(err(MsgPackError::BadTag)),
        };
        Ok(ArrayParser { count })
    }

    pub fn parse_map(&mut self) -> Result<MapParser> {
        let c = self.read_u8()?;
        let count = match c {
            0x80..=0x8f => (c & 0xf) as usize,
            0xde => self.read_be(2)? as usize,
            0xdf => self.read_be(4)? as usize,
            _ => return Err(err(MsgPackError::BadTag)),
        };
        Ok(MapParser {
            count,
            key_parsed: false,
        })
    }

    /// Skip one well-formed object of any shape, including nested
    /// collections.
    pub fn skip_object(&mut self) -> Result<()> {
        let c = self.peek_u8()?;
        match c {
            0x00..=0x7f | 0xe0..=0xff | 0xc0 | 0xc2 | 0xc3 => {
                self.pos += 1;
                Ok(())
            }
            0xcc..=0xcf => {
                self.pos += 1;
                self.read_slice(1 << (c - 0xcc) as usize).map(|_| ())
            }
            0xd0..=0xd3 => {
                self.pos += 1;
                self.read_slice(1 << (c - 0xd0) as usize).map(|_| ())
            }
            0xca => {
                self.pos += 1;
                self.read_slice(4).map(|_| ())
            }
            0xcb => {
                self.pos += 1;
                self.read_slice(8).map(|_| ())
            }
            0xa0..=0xbf | 0xd9..=0xdb => self.parse_string().map(|_| ()),
            0xc4..=0xc6 => self.parse_bin().map(|_| ()),
            0x90..=0x9f | 0xdc | 0xdd => {
                let arr = self.parse_array()?;
                for _ in 0..arr.count {
                    self.skip_object()?;
                }
                Ok(())
            }
            0x80..=0x8f | 0xde | 0xdf => {
                let map = self.parse_map()?;
                for _ in 0..map.count * 2 {
                    self.skip_object()?;
                }
                Ok(())
            }
            _ => Err(err(MsgPackError::BadTag)),
        }
    }
}

/// Element-count token for an array. The caller threads the same
/// `StreamParser` through every element read.
pub struct ArrayParser {
    count: usize,
}

impl ArrayParser {
    pub fn have_elements(&self) -> bool {
        self.count > 0
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn advance(&mut self) -> Result<()> {
        if self.count == 0 {
            return Err(err(MsgPackError::Truncated));
        }
        self.count -= 1;
        Ok(())
    }

    pub fn parse_integer(&mut self, p: &mut StreamParser, sign: Signedness) -> Result<u64> {
        self.advance()?;
        p.parse_integer(sign)
    }

    pub fn parse_string<'a>(&mut self, p: &mut StreamParser<'a>) -> Result<&'a str> {
        self.advance()?;
        p.parse_string()
    }

    pub fn parse_map(&mut self, p: &mut StreamParser) -> Result<MapParser> {
        self.advance()?;
        p.parse_map()
    }

    pub fn skip_element(&mut self, p: &mut StreamParser) -> Result<()> {
        self.advance()?;
        p.skip_object()
    }

    /// Consume one element through a caller-supplied parser.
    pub fn parse_element_with<'a, F>(&mut self, p: &mut StreamParser<'a>, f: F) -> Result<()>
    where
        F: FnOnce(&mut StreamParser<'a>) -> Result<()>,
    {
        self.advance()?;
        f(p)
    }

    pub fn end(mut self, p: &mut StreamParser) -> Result<()> {
        while self.count > 0 {
            self.skip_element(p)?;
        }
        Ok(())
    }
}

/// Map cursor enforcing key/value alternation: a key must be parsed
/// before its value, and the value must be parsed or skipped before the
/// next key.
pub struct MapParser {
    count: usize,
    key_parsed: bool,
}

impl MapParser {
    pub fn have_elements(&self) -> bool {
        self.count > 0
    }

    fn start_key(&mut self) -> Result<()> {
        if self.key_parsed {
            return Err(err(MsgPackError::WrongValueKind));
        }
        if self.count == 0 {
            return Err(err(MsgPackError::Truncated));
        }
        self.key_parsed = true;
        Ok(())
    }

    fn start_value(&mut self) -> Result<()> {
        if !self.key_parsed {
            return Err(err(MsgPackError::WrongValueKind));
        }
        self.key_parsed = false;
        self.count -= 1;
        Ok(())
    }

    pub fn parse_key_string<'a>(&mut self, p: &mut StreamParser<'a>) -> Result<&'a str> {
        self.start_key()?;
        p.parse_string()
    }

    pub fn parse_value_integer(&mut self, p: &mut StreamParser, sign: Signedness) -> Result<u64> {
        self.start_value()?;
        p.parse_integer(sign)
    }

    pub fn parse_value_bool(&mut self, p: &mut StreamParser) -> Result<bool> {
        self.start_value()?;
        p.parse_bool()
    }

    pub fn parse_value_string<'a>(&mut self, p: &mut StreamParser<'a>) -> Result<&'a str> {
        self.start_value()?;
        p.parse_string()
    }

    pub fn parse_value_array(&mut self, p: &mut StreamParser) -> Result<ArrayParser> {
        self.start_value()?;
        p.parse_array()
    }

    pub fn parse_value_map(&mut self, p: &mut StreamParser) -> Result<MapParser> {
        self.start_value()?;
        p.parse_map()
    }

    pub fn skip_value(&mut self, p: &mut StreamParser) -> Result<()> {
        self.start_value()?;
        p.skip_object()
    }

    pub fn end(mut self, p: &mut StreamParser) -> Result<()> {
        if self.key_parsed {
            p.skip_object()?;
            self.key_parsed = false;
            self.count -= 1;
        }
        while self.count > 0 {
            p.skip_object()?;
            p.skip_object()?;
            self.count -= 1;
        }
        Ok(())
    }
}

pub fn write_nil(out: &mut Vec<u8>) {
    out.push(0xc0);
}

pub fn write_bool(out: &mut Vec<u8>, v: bool) {
    out.push(if v { 0xc3 } else { 0xc2 });
}

pub fn write_uint(out: &mut Vec<u8>, v: u64) {
    if v < 128 {
        out.push(v as u8);
    } else if v < 256 {
        out.push(0xcc);
        out.push(v as u8);
    } else if v < 0x10000 {
        out.push(0xcd);
        out.extend_from_slice(&(v as u16).to_be_bytes());
    } else if v < 0x1_0000_0000 {
        out.push(0xce);
        out.extend_from_slice(&(v as u32).to_be_bytes());
    } else {
        out.push(0xcf);
        out.extend_from_slice(&v.to_be_bytes());
    }
}

pub fn write_int(out: &mut Vec<u8>, v: i64) {
    if v >= 0 {
        return write_uint(out, v as u64);
    }
    if v >= -32 {
        out.push(v as u8);
    } else if v >= i8::MIN as i64 {
        out.push(0xd0);
        out.push(v as u8);
    } else if v >= i16::MIN as i64 {
        out.push(0xd1);
        out.extend_from_slice(&(v as i16).to_be_bytes());
    } else if v >= i32::MIN as i64 {
        out.push(0xd2);
        out.extend_from_slice(&(v as i32).to_be_bytes());
    } else {
        out.push(0xd3);
        out.extend_from_slice(&v.to_be_bytes());
    }
}

pub fn write_string(out: &mut Vec<u8>, s: &str) {
    let len = s.len();
    if len < 32 {
        out.push(0xa0 + len as u8);
    } else if len < 256 {
        out.push(0xd9);
        out.push(len as u8);
    } else if len < 0x10000 {
        out.push(0xda);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(0xdb);
        out.extend_from_slice(&(len as u32).to_be_bytes());
    }
    out.extend_from_slice(s.as_bytes());
}

pub fn write_bin(out: &mut Vec<u8>, data: &[u8]) {
    let len = data.len();
    if len < 256 {
        out.push(0xc4);
        out.push(len as u8);
    } else if len < 0x10000 {
        out.push(0xc5);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(0xc6);
        out.extend_from_slice(&(len as u32).to_be_bytes());
    }
    out.extend_from_slice(data);
}

/// Array of pre-serialized objects.
pub fn write_array_of_raw(out: &mut Vec<u8>, items: Vec<Vec<u8>>) {
    write_array_header(out, items.len());
    for item in items {
        out.extend_from_slice(&item);
    }
}

fn write_array_header(out: &mut Vec<u8>, count: usize) {
    if count < 16 {
        out.push(0x90 + count as u8);
    } else if count < 0x10000 {
        out.push(0xdc);
        out.extend_from_slice(&(count as u16).to_be_bytes());
    } else {
        out.push(0xdd);
        out.extend_from_slice(&(count as u32).to_be_bytes());
    }
}

fn write_map_header(out: &mut Vec<u8>, count: usize) {
    if count < 16 {
        out.push(0x80 + count as u8);
    } else if count < 0x10000 {
        out.push(0xde);
        out.extend_from_slice(&(count as u16).to_be_bytes());
    } else {
        out.push(0xdf);
        out.extend_from_slice(&(count as u32).to_be_bytes());
    }
}

/// Writes a fixed-length array; refuses extra elements.
pub struct ArrayWriter<'a> {
    out: &'a mut Vec<u8>,
    remaining: usize,
}

impl<'a> ArrayWriter<'a> {
    pub fn new(count: usize, out: &'a mut Vec<u8>) -> ArrayWriter<'a> {
        write_array_header(out, count);
        ArrayWriter {
            out,
            remaining: count,
        }
    }

    fn advance(&mut self) -> Result<()> {
        if self.remaining == 0 {
            return Err(err(MsgPackError::WrongValueKind));
        }
        self.remaining -= 1;
        Ok(())
    }

    pub fn put_uint(&mut self, v: u64) -> Result<()> {
        self.advance()?;
        write_uint(self.out, v);
        Ok(())
    }

    pub fn put_string(&mut self, s: &str) -> Result<()> {
        self.advance()?;
        write_string(self.out, s);
        Ok(())
    }

    pub fn put_map(&mut self) -> Result<MapWriter> {
        self.advance()?;
        Ok(MapWriter::new())
    }

    pub fn flush_map(&mut self, map: MapWriter) {
        map.flush(self.out);
    }
}

/// Buffers key/value pairs because the element count is only known at
/// flush time. Enforces the same alternation discipline as the parser.
pub struct MapWriter {
    elems: usize,
    in_key: bool,
    temp: Vec<u8>,
}

impl Default for MapWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl MapWriter {
    pub fn new() -> MapWriter {
        MapWriter {
            elems: 0,
            in_key: true,
            temp: Vec::new(),
        }
    }

    pub fn put_key_string(&mut self, key: &str) -> Result<()> {
        if !self.in_key {
            return Err(err(MsgPackError::WrongValueKind));
        }
        self.in_key = false;
        self.elems += 1;
        write_string(&mut self.temp, key);
        Ok(())
    }

    fn value_slot(&mut self) -> Result<&mut Vec<u8>> {
        if self.in_key {
            return Err(err(MsgPackError::WrongValueKind));
        }
        self.in_key = true;
        Ok(&mut self.temp)
    }

    pub fn put_value_uint(&mut self, v: u64) -> Result<()> {
        let out = self.value_slot()?;
        write_uint(out, v);
        Ok(())
    }

    pub fn put_value_int(&mut self, v: i64) -> Result<()> {
        let out = self.value_slot()?;
        write_int(out, v);
        Ok(())
    }

    pub fn put_value_bool(&mut self, v: bool) -> Result<()> {
        let out = self.value_slot()?;
        write_bool(out, v);
        Ok(())
    }

    pub fn put_value_string(&mut self, s: &str) -> Result<()> {
        let out = self.value_slot()?;
        write_string(out, s);
        Ok(())
    }

    pub fn put_value_array(&mut self, count: usize) -> Result<ArrayWriter<'_>> {
        let out = self.value_slot()?;
        Ok(ArrayWriter::new(count, out))
    }

    pub fn put_value_raw(&mut self, bytes: &[u8]) -> Result<()> {
        let out = self.value_slot()?;
        out.extend_from_slice(bytes);
        Ok(())
    }

    pub fn flush(self, out: &mut Vec<u8>) {
        write_map_header(out, self.elems);
        out.extend_from_slice(&self.temp);
    }

    /// Serialize into a fresh buffer (nested-map helper).
    pub fn into_bytes(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.temp.len() + 5);
        self.flush(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uint_round_trip() {
        for v in [0u64, 1, 127, 128, 255, 256, 0xffff, 0x10000, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            write_uint(&mut buf, v);
            let mut p = StreamParser::new(&buf);
            assert_eq!(p.parse_integer(Signedness::Unsigned).unwrap(), v);
            assert!(p.at_end());
        }
    }

    #[test]
    fn test_int_round_trip() {
        for v in [0i64, -1, -32, -33, -128, -129, -0x8000, -0x8001, i32::MIN as i64, i64::MIN] {
            let mut buf = Vec::new();
            write_int(&mut buf, v);
            let mut p = StreamParser::new(&buf);
            assert_eq!(p.parse_integer(Signedness::Signed).unwrap() as i64, v);
        }
    }

    #[test]
    fn test_signedness_violations() {
        // -1 as int8
        let buf = [0xd0u8, 0xff];
        let mut p = StreamParser::new(&buf);
        assert!(matches!(
            p.parse_integer(Signedness::Unsigned),
            Err(Error::MsgPackError(MsgPackError::NegativeForUnsigned))
        ));
        // u64 with bit 63 set read as signed
        let mut buf = Vec::new();
        write_uint(&mut buf, 1 << 63);
        let mut p = StreamParser::new(&buf);
        assert!(matches!(
            p.parse_integer(Signedness::Signed),
            Err(Error::MsgPackError(MsgPackError::PositiveOutOfRange))
        ));
        // a positive value stored in a signed code is fine either way
        let buf = [0xd1u8, 0x12, 0x34];
        let mut p = StreamParser::new(&buf);
        assert_eq!(p.parse_integer(Signedness::Unsigned).unwrap(), 0x1234);
    }

    #[test]
    fn test_string_round_trip() {
        for s in ["", "k", "a".repeat(31).as_str(), "b".repeat(300).as_str()] {
            let mut buf = Vec::new();
            write_string(&mut buf, s);
            let mut p = StreamParser::new(&buf);
            assert_eq!(p.parse_string().unwrap(), s);
        }
    }

    #[test]
    fn test_float_round_trip() {
        let mut buf = vec![0xcb];
        buf.extend_from_slice(&0.15915494309189535f64.to_bits().to_be_bytes());
        let mut p = StreamParser::new(&buf);
        assert_eq!(p.parse_float().unwrap(), 0.15915494309189535);
    }

    #[test]
    fn test_map_alternation_enforced() {
        let mut w = MapWriter::new();
        w.put_key_string("a").unwrap();
        // second key before the value is rejected
        assert!(w.put_key_string("b").is_err());
        w.put_value_uint(1).unwrap();
        // value without a key is rejected
        assert!(w.put_value_uint(2).is_err());
        let bytes = w.into_bytes();

        let mut p = StreamParser::new(&bytes);
        let mut m = p.parse_map().unwrap();
        assert!(m.have_elements());
        // value before key is rejected
        assert!(m.parse_value_integer(&mut p, Signedness::Both).is_err());
        assert_eq!(m.parse_key_string(&mut p).unwrap(), "a");
        // key before value is rejected
        assert!(m.parse_key_string(&mut p).is_err());
        assert_eq!(m.parse_value_integer(&mut p, Signedness::Both).unwrap(), 1);
        assert!(!m.have_elements());
    }

    #[test]
    fn test_skip_nested_collections() {
        let mut inner = MapWriter::new();
        inner.put_key_string("xs").unwrap();
        {
            let mut arr = inner.put_value_array(3).unwrap();
            arr.put_uint(1).unwrap();
            arr.put_uint(2).unwrap();
            arr.put_string("three").unwrap();
            assert!(arr.put_uint(4).is_err(), "declared length is enforced");
        }
        let mut outer = MapWriter::new();
        outer.put_key_string("skipme").unwrap();
        outer.put_value_raw(&inner.into_bytes()).unwrap();
        outer.put_key_string("keep").unwrap();
        outer.put_value_uint(7).unwrap();
        let bytes = outer.into_bytes();

        let mut p = StreamParser::new(&bytes);
        let mut m = p.parse_map().unwrap();
        let mut kept = None;
        while m.have_elements() {
            let key = m.parse_key_string(&mut p).unwrap();
            if key == "keep" {
                kept = Some(m.parse_value_integer(&mut p, Signedness::Unsigned).unwrap());
            } else {
                m.skip_value(&mut p).unwrap();
            }
        }
        assert_eq!(kept, Some(7));
        assert!(p.at_end());
    }

    #[test]
    fn test_truncated_inputs() {
        let cases: &[&[u8]] = &[
            &[0xcc],
            &[0xcd, 0x01],
            &[0xa5, b'a', b'b'],
            &[0xd9],
            &[0xca, 0x3f, 0x00],
        ];
        for c in cases {
            let mut p = StreamParser::new(c);
            assert!(p.skip_object().is_err(), "case {:x?}", c);
        }
    }

    #[test]
    fn test_bin_round_trip() {
        let data = [0u8, 1, 2, 0xff];
        let mut buf = Vec::new();
        write_bin(&mut buf, &data);
        let mut p = StreamParser::new(&buf);
        assert_eq!(p.parse_bin().unwrap(), &data);
    }
}
