//! Handle tables.
//!
//! Each referenceable value gets the next handle, counted from
//! [`BASE_WIRE_HANDLE`], in the order the writer meets it; the reader
//! assigns handles in exactly the same order. A reset clears both sides.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{IoError, Result};
use crate::serial::constants::BASE_WIRE_HANDLE;
use crate::serial::value::{Identity, Value};

/// Writer side: identity to handle.
#[derive(Debug, Default)]
pub struct WriteHandles {
    next: u32,
    by_identity: HashMap<Identity, u32>,
    /// Field signatures are also shared by content.
    by_text: HashMap<Arc<str>, u32>,
    /// Keeps every recorded value alive so its address is not reused.
    pinned: Vec<Value>,
}

impl WriteHandles {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles assigned since the last clear.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.next
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.next == 0
    }

    /// Wire handle of a value written earlier.
    #[must_use]
    pub fn lookup(&self, v: &Value) -> Option<u32> {
        let id = v.identity()?;
        self.by_identity.get(&id).map(|h| h + BASE_WIRE_HANDLE)
    }

    /// Assign the next handle; `None` consumes a handle without recording
    /// a value (unshared writes).
    pub fn assign(&mut self, v: Option<&Value>) -> u32 {
        let h = self.next;
        self.next += 1;
        if let Some(v) = v {
            if let Some(id) = v.identity() {
                self.by_identity.insert(id, h);
                self.pinned.push(v.clone());
            }
        }
        h + BASE_WIRE_HANDLE
    }

    /// Handle for a type signature: the same string value written earlier,
    /// or an earlier signature with the same text.
    #[must_use]
    pub fn lookup_text(&self, s: &Arc<str>) -> Option<u32> {
        self.lookup(&Value::String(Arc::clone(s)))
            .or_else(|| self.by_text.get(&**s).map(|h| h + BASE_WIRE_HANDLE))
    }

    /// Assign the next handle to a type signature. The string is recorded
    /// by identity too, so a value that is the same string reuses it.
    pub fn assign_text(&mut self, s: &Arc<str>) -> u32 {
        let wire = self.assign(Some(&Value::String(Arc::clone(s))));
        self.by_text.insert(Arc::clone(s), wire - BASE_WIRE_HANDLE);
        wire
    }

    pub fn clear(&mut self) {
        self.next = 0;
        self.by_identity.clear();
        self.by_text.clear();
        self.pinned.clear();
    }
}

#[derive(Debug, Clone)]
enum Entry {
    /// Handle reserved; the value is still being read.
    Pending,
    Unshared,
    Value(Value),
}

/// Reader side: handle to value.
#[derive(Debug, Default)]
pub struct ReadHandles {
    entries: Vec<Entry>,
}

impl ReadHandles {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a value under the next handle; returns its index.
    pub fn assign(&mut self, v: Value, unshared: bool) -> usize {
        self.entries.push(if unshared {
            Entry::Unshared
        } else {
            Entry::Value(v)
        });
        self.entries.len() - 1
    }

    /// Reserve the next handle for a value not yet complete.
    pub fn reserve(&mut self, unshared: bool) -> usize {
        self.entries.push(if unshared {
            Entry::Unshared
        } else {
            Entry::Pending
        });
        self.entries.len() - 1
    }

    /// Complete a reserved handle. Unshared reservations stay unshared.
    pub fn finish(&mut self, index: usize, v: Value) {
        if let Some(e @ Entry::Pending) = self.entries.get_mut(index) {
            *e = Entry::Value(v);
        }
    }

    /// Resolve a wire handle read after `TC_REFERENCE`.
    pub fn lookup(&self, wire: i32) -> Result<Value> {
        let index = (wire as u32).wrapping_sub(BASE_WIRE_HANDLE) as usize;
        match self.entries.get(index) {
            None => Err(IoError::StreamCorrupted(format!(
                "invalid handle value: {:08X}",
                wire as u32
            ))),
            Some(Entry::Unshared) => Err(IoError::InvalidObject(
                "cannot read back reference to unshared object".into(),
            )),
            Some(Entry::Pending) => Err(IoError::StreamCorrupted(format!(
                "forward reference to incomplete handle {:08X}",
                wire as u32
            ))),
            Some(Entry::Value(v)) => Ok(v.clone()),
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_numbers_from_base() {
        let mut h = WriteHandles::new();
        let s = Value::string("a");
        assert_eq!(h.lookup(&s), None);
        assert_eq!(h.assign(Some(&s)), 0x7E_0000);
        assert_eq!(h.assign(None), 0x7E_0001);
        assert_eq!(h.lookup(&s), Some(0x7E_0000));
        // Same text, different allocation.
        assert_eq!(h.lookup(&Value::string("a")), None);
        let sig: Arc<str> = Arc::from("Ljava/lang/String;");
        assert_eq!(h.assign_text(&sig), 0x7E_0002);
        assert_eq!(h.lookup_text(&Arc::from("Ljava/lang/String;")), Some(0x7E_0002));
        h.clear();
        assert!(h.is_empty());
        assert_eq!(h.lookup(&s), None);
    }

    #[test]
    fn signatures_and_values_share_handles() {
        let mut h = WriteHandles::new();
        let sig: Arc<str> = Arc::from("Ldemo/Node;");
        assert_eq!(h.assign_text(&sig), 0x7E_0000);
        assert_eq!(h.lookup(&Value::String(Arc::clone(&sig))), Some(0x7E_0000));

        let value = Value::string("Ljava/lang/Object;");
        let Value::String(text) = &value else {
            unreachable!()
        };
        assert_eq!(h.assign(Some(&value)), 0x7E_0001);
        assert_eq!(h.lookup_text(text), Some(0x7E_0001));
        // A value string is never shared by text alone.
        assert_eq!(h.lookup_text(&Arc::from("Ljava/lang/Object;")), None);
    }

    #[test]
    fn primitives_have_no_identity() {
        let mut h = WriteHandles::new();
        h.assign(Some(&Value::Int(1)));
        assert_eq!(h.lookup(&Value::Int(1)), None);
    }

    #[test]
    fn reader_errors() {
        let mut h = ReadHandles::new();
        h.assign(Value::string("x"), false);
        h.assign(Value::string("y"), true);
        let pending = h.reserve(false);
        assert_eq!(h.lookup(0x7E_0000).unwrap().as_str(), Some("x"));

        let err = h.lookup(0x7E_000A).unwrap_err();
        assert_eq!(err.to_string(), "stream corrupted: invalid handle value: 007E000A");
        let err = h.lookup(0x10).unwrap_err();
        assert_eq!(err.to_string(), "stream corrupted: invalid handle value: 00000010");
        let err = h.lookup(0x7E_0001).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid object: cannot read back reference to unshared object"
        );
        assert!(h.lookup(0x7E_0002).is_err());
        h.finish(pending, Value::Int(5));
        assert_eq!(h.lookup(0x7E_0002).unwrap(), Value::Int(5));
    }
}
