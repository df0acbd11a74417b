//! Tagged value cells and the fixed-arity list they are serialized in.
//!
//! A cell holds exactly one typed value. Reading a cell that was never set does not fail:
//! the read initialises the cell to the zero value of the requested type, and callers
//! rely on that.

use crate::WireError;

/// Number of cells in a [`VariantList`]
pub const MAX_VARIANT_SLOTS: usize = 7;

/// Type tags as they appear on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VariantType {
    Unused = 0,
    Float = 1,
    String = 2,
    Vector2 = 3,
    Vector3 = 4,
    UInt32 = 5,
    Int32 = 9,
}

impl VariantType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Unused),
            1 => Some(Self::Float),
            2 => Some(Self::String),
            3 => Some(Self::Vector2),
            4 => Some(Self::Vector3),
            5 => Some(Self::UInt32),
            9 => Some(Self::Int32),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Variant {
    #[default]
    Unused,
    Float(f32),
    String(String),
    Vector2(f32, f32),
    Vector3(f32, f32, f32),
    UInt32(u32),
    Int32(i32),
}

impl Variant {
    pub fn variant_type(&self) -> VariantType {
        match self {
            Variant::Unused => VariantType::Unused,
            Variant::Float(_) => VariantType::Float,
            Variant::String(_) => VariantType::String,
            Variant::Vector2(..) => VariantType::Vector2,
            Variant::Vector3(..) => VariantType::Vector3,
            Variant::UInt32(_) => VariantType::UInt32,
            Variant::Int32(_) => VariantType::Int32,
        }
    }

    pub fn is_unused(&self) -> bool {
        matches!(self, Variant::Unused)
    }

    /// Overwrites both the type and the payload
    pub fn set(&mut self, value: impl Into<Variant>) {
        *self = value.into();
    }

    pub fn get_float(&mut self) -> Option<f32> {
        if self.is_unused() {
            *self = Variant::Float(0.0);
        }
        match self {
            Variant::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_uint32(&mut self) -> Option<u32> {
        if self.is_unused() {
            *self = Variant::UInt32(0);
        }
        match self {
            Variant::UInt32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_int32(&mut self) -> Option<i32> {
        if self.is_unused() {
            *self = Variant::Int32(0);
        }
        match self {
            Variant::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_string(&mut self) -> Option<&str> {
        if self.is_unused() {
            *self = Variant::String(String::new());
        }
        match self {
            Variant::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn get_vector2(&mut self) -> Option<(f32, f32)> {
        if self.is_unused() {
            *self = Variant::Vector2(0.0, 0.0);
        }
        match self {
            Variant::Vector2(x, y) => Some((*x, *y)),
            _ => None,
        }
    }

    pub fn get_vector3(&mut self) -> Option<(f32, f32, f32)> {
        if self.is_unused() {
            *self = Variant::Vector3(0.0, 0.0, 0.0);
        }
        match self {
            Variant::Vector3(x, y, z) => Some((*x, *y, *z)),
            _ => None,
        }
    }

    /// Read-only view of a string cell, without the zero-initialising side effect
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Read-only view of an int32 cell
    pub fn as_int32(&self) -> Option<i32> {
        match self {
            Variant::Int32(v) => Some(*v),
            _ => None,
        }
    }

    /// Bytes the payload occupies on the wire, excluding the index and tag bytes
    pub fn payload_len(&self) -> usize {
        match self {
            Variant::Unused => 0,
            Variant::Float(_) | Variant::UInt32(_) | Variant::Int32(_) => 4,
            Variant::Vector2(..) => 8,
            Variant::Vector3(..) => 12,
            Variant::String(s) => 4 + s.len(),
        }
    }

    /// Appends the little-endian payload to `buf`
    pub fn write_payload(&self, buf: &mut Vec<u8>) {
        match self {
            Variant::Unused => {}
            Variant::Float(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Variant::UInt32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Variant::Int32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Variant::Vector2(x, y) => {
                buf.extend_from_slice(&x.to_le_bytes());
                buf.extend_from_slice(&y.to_le_bytes());
            }
            Variant::Vector3(x, y, z) => {
                buf.extend_from_slice(&x.to_le_bytes());
                buf.extend_from_slice(&y.to_le_bytes());
                buf.extend_from_slice(&z.to_le_bytes());
            }
            Variant::String(s) => {
                buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
        }
    }

    /// Reads one payload of type `ty` from the front of `data`.
    ///
    /// Returns the value and the number of bytes consumed.
    pub fn read_payload(ty: VariantType, data: &[u8]) -> Result<(Variant, usize), WireError> {
        let mut reader = Reader { data, pos: 0 };
        let value = match ty {
            VariantType::Unused => Variant::Unused,
            VariantType::Float => Variant::Float(reader.f32()?),
            VariantType::UInt32 => Variant::UInt32(reader.u32()?),
            VariantType::Int32 => Variant::Int32(reader.u32()? as i32),
            VariantType::Vector2 => Variant::Vector2(reader.f32()?, reader.f32()?),
            VariantType::Vector3 => Variant::Vector3(reader.f32()?, reader.f32()?, reader.f32()?),
            VariantType::String => {
                let len = reader.u32()? as usize;
                let bytes = reader.take(len)?;
                let text = std::str::from_utf8(bytes).map_err(|_| WireError::InvalidUtf8)?;
                Variant::String(text.to_string())
            }
        };
        Ok((value, reader.pos))
    }
}

impl From<f32> for Variant {
    fn from(value: f32) -> Self {
        Variant::Float(value)
    }
}

impl From<u32> for Variant {
    fn from(value: u32) -> Self {
        Variant::UInt32(value)
    }
}

impl From<i32> for Variant {
    fn from(value: i32) -> Self {
        Variant::Int32(value)
    }
}

impl From<String> for Variant {
    fn from(value: String) -> Self {
        Variant::String(value)
    }
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Variant::String(value.to_string())
    }
}

impl From<&String> for Variant {
    fn from(value: &String) -> Self {
        Variant::String(value.clone())
    }
}

impl From<(f32, f32)> for Variant {
    fn from((x, y): (f32, f32)) -> Self {
        Variant::Vector2(x, y)
    }
}

impl From<(f32, f32, f32)> for Variant {
    fn from((x, y, z): (f32, f32, f32)) -> Self {
        Variant::Vector3(x, y, z)
    }
}

/// Bounds-checked little-endian cursor
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let end = self.pos + len;
        if end > self.data.len() {
            return Err(WireError::Truncated {
                needed: end,
                got: self.data.len(),
            });
        }
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn f32(&mut self) -> Result<f32, WireError> {
        Ok(f32::from_bits(self.u32()?))
    }
}

/// Seven tagged cells, serialized as a populated-count byte followed by
/// `{slot, tag, payload}` for every populated cell
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VariantList {
    cells: [Variant; MAX_VARIANT_SLOTS],
}

impl VariantList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a list from values placed in consecutive slots starting at 0.
    /// Values beyond the last slot are dropped.
    pub fn from_values<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Variant>,
    {
        let mut list = Self::new();
        for (cell, value) in list.cells.iter_mut().zip(values) {
            *cell = value.into();
        }
        list
    }

    pub fn get(&self, slot: usize) -> Option<&Variant> {
        self.cells.get(slot)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Variant> {
        self.cells.get_mut(slot)
    }

    pub fn set(&mut self, slot: usize, value: impl Into<Variant>) -> Result<(), WireError> {
        let cell = self
            .cells
            .get_mut(slot)
            .ok_or(WireError::SlotOutOfRange(slot))?;
        cell.set(value);
        Ok(())
    }

    pub fn populated_count(&self) -> usize {
        self.cells.iter().filter(|cell| !cell.is_unused()).count()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let payload: usize = self
            .cells
            .iter()
            .filter(|cell| !cell.is_unused())
            .map(|cell| 2 + cell.payload_len())
            .sum();

        let mut buf = Vec::with_capacity(1 + payload);
        buf.push(self.populated_count() as u8);

        for (slot, cell) in self.cells.iter().enumerate() {
            if cell.is_unused() {
                continue;
            }
            buf.push(slot as u8);
            buf.push(cell.variant_type().tag());
            cell.write_payload(&mut buf);
        }

        buf
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, WireError> {
        let (&count, mut rest) = data.split_first().ok_or(WireError::Truncated {
            needed: 1,
            got: 0,
        })?;

        let mut list = Self::new();
        for _ in 0..count {
            if rest.len() < 2 {
                return Err(WireError::Truncated {
                    needed: 2,
                    got: rest.len(),
                });
            }
            let slot = rest[0] as usize;
            let ty = VariantType::from_tag(rest[1]).ok_or(WireError::UnknownTag(rest[1]))?;
            let (value, used) = Variant::read_payload(ty, &rest[2..])?;
            list.set(slot, value)?;
            rest = &rest[2 + used..];
        }

        Ok(list)
    }
}
