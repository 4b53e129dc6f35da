//! Segment allocator for the managed heap.
//!
//! The heap is a sparse vector of segments indexed by segment id. Each
//! segment pairs a [`MemoryDescriptor`] with a zeroed payload of word-sized
//! member slots. Freed ids go onto a free list and are reused by later
//! allocations. Segment id 0 is reserved as the null sentinel and is never
//! allocated; a zero word on the stack or in a member slot always means
//! "no reference".

use crate::vm::InternalType;
use spyre_core::SpyreMap;
use tracing::debug;

/// Descriptor stored with every heap segment: what was allocated, plus the
/// mark bit flipped during collection.
#[derive(Debug, Clone)]
pub struct MemoryDescriptor {
    pub type_name: String,
    pub arrdim: usize,
    pub arrs: Vec<usize>,
    pub ptrdim: usize,
    pub mark: bool,
}

impl MemoryDescriptor {
    pub fn for_type(type_name: &str) -> Self {
        MemoryDescriptor {
            type_name: type_name.to_string(),
            arrdim: 0,
            arrs: Vec::new(),
            ptrdim: 0,
            mark: false,
        }
    }
}

/// One live heap segment: descriptor plus payload bytes.
#[derive(Debug)]
pub struct Segment {
    pub desc: MemoryDescriptor,
    pub payload: Vec<u8>,
}

/// The heap proper, plus the GC root list of stack-slot addresses.
#[derive(Debug)]
pub struct MemoryMap {
    allocs: Vec<Option<Segment>>,
    /// Next fresh segment id; starts at 1, id 0 is the null sentinel.
    next_index: usize,
    /// Reclaimed segment ids available for reuse.
    avail: Vec<usize>,
    /// GC roots: absolute stack byte addresses of tagged local slots.
    pub localtags: Vec<usize>,
}

impl MemoryMap {
    pub fn new(capacity: usize) -> Self {
        let mut allocs = Vec::with_capacity(capacity.max(2));
        allocs.resize_with(capacity.max(2), || None);
        MemoryMap {
            allocs,
            next_index: 1,
            avail: Vec::new(),
            localtags: Vec::new(),
        }
    }

    /// Allocate a segment for `desc`, sized from the registered type
    /// (`max(nmembers, 1)` word slots), zero-filled, with the mark bit
    /// clear. Returns the new segment id.
    pub fn alloc(
        &mut self,
        types: &SpyreMap<InternalType>,
        mut desc: MemoryDescriptor,
    ) -> Result<usize, String> {
        let type_info = types
            .get(&desc.type_name)
            .ok_or_else(|| format!("invalid typename '{}' at ALLOC", desc.type_name))?;

        let total = type_info.members.len().max(1) * 8;
        debug!(bytes = total, type_name = %desc.type_name, "allocating segment");

        desc.mark = false;
        let segment = Segment {
            desc,
            payload: vec![0u8; total],
        };

        let id = match self.avail.pop() {
            Some(id) => id,
            None => {
                let id = self.next_index;
                self.next_index += 1;
                id
            }
        };
        if id >= self.allocs.len() {
            let new_len = (self.allocs.len() * 2 + 2).max(id + 1);
            self.allocs.resize_with(new_len, || None);
        }
        self.allocs[id] = Some(segment);
        Ok(id)
    }

    /// Free a segment and recycle its id.
    pub fn free(&mut self, seg_id: usize) -> Result<(), String> {
        if seg_id == 0 || seg_id >= self.allocs.len() || self.allocs[seg_id].is_none() {
            return Err(format!("invalid free of segment {}", seg_id));
        }
        self.allocs[seg_id] = None;
        self.avail.push(seg_id);
        Ok(())
    }

    pub fn segment(&self, seg_id: usize) -> Option<&Segment> {
        self.allocs.get(seg_id).and_then(|s| s.as_ref())
    }

    pub fn segment_mut(&mut self, seg_id: usize) -> Option<&mut Segment> {
        self.allocs.get_mut(seg_id).and_then(|s| s.as_mut())
    }

    /// Read one 64-bit word from a segment payload.
    pub fn read_payload_word(&self, seg_id: usize, offset: usize) -> Result<u64, String> {
        let segment = self
            .segment(seg_id)
            .ok_or_else(|| format!("access to invalid segment {}", seg_id))?;
        let bytes = segment
            .payload
            .get(offset..offset + 8)
            .ok_or_else(|| format!("member access out of bounds in segment {}", seg_id))?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    /// Write one 64-bit word into a segment payload.
    pub fn write_payload_word(
        &mut self,
        seg_id: usize,
        offset: usize,
        value: u64,
    ) -> Result<(), String> {
        let segment = self
            .segment_mut(seg_id)
            .ok_or_else(|| format!("access to invalid segment {}", seg_id))?;
        let bytes = segment
            .payload
            .get_mut(offset..offset + 8)
            .ok_or_else(|| format!("member access out of bounds in segment {}", seg_id))?;
        bytes.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Number of live segments.
    pub fn live_count(&self) -> usize {
        self.allocs.iter().filter(|s| s.is_some()).count()
    }

    /// Ids of all live segments, low to high.
    pub fn live_ids(&self) -> Vec<usize> {
        (0..self.allocs.len())
            .filter(|id| self.allocs[*id].is_some())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::InternalType;

    fn test_types() -> SpyreMap<InternalType> {
        let mut types = SpyreMap::new();
        types.insert("int", InternalType::primitive("int"));
        types.insert(
            "Pair",
            InternalType::record("Pair", vec![("int".into(), 0), ("int".into(), 8)]),
        );
        types
    }

    #[test]
    fn test_alloc_starts_at_one() {
        let types = test_types();
        let mut memory = MemoryMap::new(8);
        let id = memory.alloc(&types, MemoryDescriptor::for_type("Pair")).unwrap();
        assert_eq!(id, 1);
    }

    #[test]
    fn test_alloc_sizes_from_member_count() {
        let types = test_types();
        let mut memory = MemoryMap::new(8);
        let pair = memory.alloc(&types, MemoryDescriptor::for_type("Pair")).unwrap();
        assert_eq!(memory.segment(pair).unwrap().payload.len(), 16);

        // Memberless types still get one word.
        let int = memory.alloc(&types, MemoryDescriptor::for_type("int")).unwrap();
        assert_eq!(memory.segment(int).unwrap().payload.len(), 8);
    }

    #[test]
    fn test_unknown_type_is_error() {
        let types = test_types();
        let mut memory = MemoryMap::new(8);
        let err = memory
            .alloc(&types, MemoryDescriptor::for_type("Mystery"))
            .unwrap_err();
        assert!(err.contains("invalid typename"));
    }

    #[test]
    fn test_free_and_reuse() {
        let types = test_types();
        let mut memory = MemoryMap::new(8);
        let a = memory.alloc(&types, MemoryDescriptor::for_type("Pair")).unwrap();
        let b = memory.alloc(&types, MemoryDescriptor::for_type("Pair")).unwrap();
        assert_ne!(a, b);

        memory.free(a).unwrap();
        assert_eq!(memory.live_count(), 1);

        // The freed id comes back for the next allocation.
        let c = memory.alloc(&types, MemoryDescriptor::for_type("Pair")).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn test_double_free_is_error() {
        let types = test_types();
        let mut memory = MemoryMap::new(8);
        let id = memory.alloc(&types, MemoryDescriptor::for_type("Pair")).unwrap();
        memory.free(id).unwrap();
        assert!(memory.free(id).is_err());
    }

    #[test]
    fn test_null_segment_never_freed() {
        let mut memory = MemoryMap::new(8);
        assert!(memory.free(0).is_err());
    }

    #[test]
    fn test_payload_words() {
        let types = test_types();
        let mut memory = MemoryMap::new(8);
        let id = memory.alloc(&types, MemoryDescriptor::for_type("Pair")).unwrap();

        assert_eq!(memory.read_payload_word(id, 0).unwrap(), 0);
        memory.write_payload_word(id, 8, 42).unwrap();
        assert_eq!(memory.read_payload_word(id, 8).unwrap(), 42);
        assert!(memory.read_payload_word(id, 16).is_err());
    }

    #[test]
    fn test_heap_grows_past_initial_capacity() {
        let types = test_types();
        let mut memory = MemoryMap::new(2);
        let mut last = 0;
        for _ in 0..20 {
            last = memory.alloc(&types, MemoryDescriptor::for_type("int")).unwrap();
        }
        assert_eq!(last, 20);
        assert_eq!(memory.live_count(), 20);
    }
}
