//! String table for node names, key fragments and notes

use std::collections::HashMap;
use std::io::Write;

use crate::error::{GeocodeError, Result};

/// All strings in one blob, each entry length-prefixed (u32 LE).
/// Interning deduplicates repeated notations such as "一丁目".
pub struct StringTable {
    data: Vec<u8>,
    index: HashMap<String, u32>,
}

impl StringTable {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Add a string, returning its offset in the blob.
    pub fn intern(&mut self, s: &str) -> u32 {
        if let Some(&offset) = self.index.get(s) {
            return offset;
        }

        let offset = self.data.len() as u32;
        self.data.extend_from_slice(&(s.len() as u32).to_le_bytes());
        self.data.extend_from_slice(s.as_bytes());
        self.index.insert(s.to_string(), offset);
        offset
    }

    /// Get the string at an offset.
    pub fn get(&self, offset: u32) -> Option<&str> {
        let start = offset as usize;
        if start + 4 > self.data.len() {
            return None;
        }
        let len = u32::from_le_bytes(self.data[start..start + 4].try_into().unwrap()) as usize;
        let end = start + 4 + len;
        if end > self.data.len() {
            return None;
        }
        std::str::from_utf8(&self.data[start + 4..end]).ok()
    }

    /// Write to a writer (for embedding at the end of a segment).
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&(self.data.len() as u64).to_le_bytes())?;
        writer.write_all(&self.data)?;
        Ok(())
    }

    /// Load from a slice (a sub-range of an mmap).
    pub fn load_from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() < 8 {
            return Err(GeocodeError::InvalidFormat("String table too small".into()));
        }

        let data_len = u64::from_le_bytes(
            slice[0..8]
                .try_into()
                .map_err(|_| GeocodeError::InvalidFormat("Invalid data length".into()))?,
        ) as usize;

        if 8 + data_len > slice.len() {
            return Err(GeocodeError::InvalidFormat("Invalid data length".into()));
        }

        let data = slice[8..8 + data_len].to_vec();

        // Rebuild the intern index by scanning the entries
        let mut index = HashMap::new();
        let mut offset = 0usize;
        while offset + 4 <= data.len() {
            let len =
                u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap()) as usize;
            let end = offset + 4 + len;
            if end > data.len() {
                return Err(GeocodeError::InvalidFormat(
                    "String table entry out of range".into(),
                ));
            }
            if let Ok(s) = std::str::from_utf8(&data[offset + 4..end]) {
                index.insert(s.to_string(), offset as u32);
            }
            offset = end;
        }

        Ok(Self { data, index })
    }
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_and_get() {
        let mut table = StringTable::new();
        let a = table.intern("東京都");
        let b = table.intern("新宿区");
        let a2 = table.intern("東京都");

        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(table.get(a), Some("東京都"));
        assert_eq!(table.get(b), Some("新宿区"));
    }

    #[test]
    fn test_roundtrip() {
        let mut table = StringTable::new();
        let a = table.intern("");
        let b = table.intern("西新宿2.丁目");

        let mut buf = Vec::new();
        table.write_to(&mut buf).unwrap();

        let loaded = StringTable::load_from_slice(&buf).unwrap();
        assert_eq!(loaded.get(a), Some(""));
        assert_eq!(loaded.get(b), Some("西新宿2.丁目"));
    }

    #[test]
    fn test_truncated_table() {
        assert!(StringTable::load_from_slice(&[0u8; 4]).is_err());
    }
}
