//! Bucket-ordered property hash tables
//!
//! Several composite messages embed hash tables whose on-wire entry order
//! mirrors the reference implementation's in-memory bucket layout: entries
//! appear sorted by `key % bucket_count`, ties broken by key. The header
//! carries the entry count and the bucket count as two 16-bit words.
//!
//! Tables this core originates derive their bucket count from the entry
//! count; tables decoded off the wire keep the transmitted value, so a
//! decode/re-encode cycle is byte-identical.

use crate::codec::buffer::{WireReader, WireWriter};
use crate::error::CodecError;

/// Load factor the bucket-count derivation targets
const LOAD_FACTOR: f64 = 0.7;

/// Value types a property table can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Int,
    Int64,
    Bool,
    Float,
    Double,
    String,
    DataId,
    InstanceId,
}

/// A single table value
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Int(i32),
    Int64(i64),
    Bool(bool),
    Float(f32),
    Double(f64),
    String(String),
    DataId(u32),
    InstanceId(u32),
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::Int(_) => PropertyKind::Int,
            PropertyValue::Int64(_) => PropertyKind::Int64,
            PropertyValue::Bool(_) => PropertyKind::Bool,
            PropertyValue::Float(_) => PropertyKind::Float,
            PropertyValue::Double(_) => PropertyKind::Double,
            PropertyValue::String(_) => PropertyKind::String,
            PropertyValue::DataId(_) => PropertyKind::DataId,
            PropertyValue::InstanceId(_) => PropertyKind::InstanceId,
        }
    }

    fn read(r: &mut WireReader<'_>, kind: PropertyKind) -> Result<Self, CodecError> {
        Ok(match kind {
            PropertyKind::Int => PropertyValue::Int(r.read_i32("table.value")?),
            PropertyKind::Int64 => PropertyValue::Int64(r.read_i64("table.value")?),
            PropertyKind::Bool => PropertyValue::Bool(r.read_u32("table.value")? != 0),
            PropertyKind::Float => PropertyValue::Float(r.read_f32("table.value")?),
            PropertyKind::Double => PropertyValue::Double(r.read_f64("table.value")?),
            // String entries pad to a 4-byte boundary like any top-level
            // string; the padding is skipped here.
            PropertyKind::String => PropertyValue::String(r.read_pad_str16("table.value")?),
            PropertyKind::DataId => PropertyValue::DataId(r.read_var_dword("table.value")?),
            PropertyKind::InstanceId => PropertyValue::InstanceId(r.read_u32("table.value")?),
        })
    }

    fn write(&self, w: &mut WireWriter) {
        match self {
            PropertyValue::Int(v) => w.write_i32(*v),
            PropertyValue::Int64(v) => w.write_i64(*v),
            PropertyValue::Bool(v) => w.write_u32(u32::from(*v)),
            PropertyValue::Float(v) => w.write_f32(*v),
            PropertyValue::Double(v) => w.write_f64(*v),
            PropertyValue::String(v) => w.write_pad_str16(v),
            PropertyValue::DataId(v) => w.write_var_dword(*v),
            PropertyValue::InstanceId(v) => w.write_u32(*v),
        }
    }
}

/// Smallest power of two whose load stays under the target factor, floor 4.
pub fn derive_bucket_count(entry_count: usize) -> u16 {
    let needed = (entry_count as f64 / LOAD_FACTOR).ceil() as usize;
    needed.next_power_of_two().max(4) as u16
}

/// Sort entries into the on-wire order: primary `key % buckets`, then key.
pub fn bucket_sort<V>(entries: &mut [(u32, V)], buckets: u32) {
    entries.sort_by(|a, b| {
        (a.0 % buckets, a.0).cmp(&(b.0 % buckets, b.0))
    });
}

/// A decoded property hash table
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyTable {
    /// Bucket count carried by (or derived for) the wire form
    pub buckets: u16,
    /// Entries in on-wire order
    pub entries: Vec<(u32, PropertyValue)>,
}

impl Default for PropertyTable {
    fn default() -> Self {
        Self {
            buckets: derive_bucket_count(0),
            entries: Vec::new(),
        }
    }
}

impl PropertyTable {
    /// Build a table from unordered entries, deriving the bucket count and
    /// applying the canonical sort.
    pub fn from_entries(mut entries: Vec<(u32, PropertyValue)>) -> Self {
        let buckets = derive_bucket_count(entries.len());
        bucket_sort(&mut entries, buckets as u32);
        Self { buckets, entries }
    }

    /// Look up a value by key
    pub fn get(&self, key: u32) -> Option<&PropertyValue> {
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decode a table whose values are all of `kind`.
    pub fn read(
        r: &mut WireReader<'_>,
        field: &'static str,
        kind: PropertyKind,
    ) -> Result<Self, CodecError> {
        let count = r.read_u16(field)? as usize;
        let buckets = r.read_u16(field)?;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let key = r.read_u32(field)?;
            let value = PropertyValue::read(r, kind)?;
            entries.push((key, value));
        }
        Ok(Self { buckets, entries })
    }

    /// Encode the table, enforcing the bucket sort.
    pub fn write(&self, w: &mut WireWriter) {
        w.write_u16(self.entries.len() as u16);
        w.write_u16(self.buckets);
        let mut ordered: Vec<&(u32, PropertyValue)> = self.entries.iter().collect();
        let buckets = u32::from(self.buckets.max(1));
        ordered.sort_by(|a, b| (a.0 % buckets, a.0).cmp(&(b.0 % buckets, b.0)));
        for (key, value) in ordered {
            w.write_u32(*key);
            value.write(w);
        }
    }
}
