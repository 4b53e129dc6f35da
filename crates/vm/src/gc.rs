//! Stop-the-world mark-and-sweep garbage collection.
//!
//! Roots are stack-slot addresses registered by `TAGL` and released by
//! `UNTAGL`/`UNTAGLS`. A collection runs three strictly ordered phases:
//!
//! 1. **Unmark**: clear the mark bit of every live segment.
//! 2. **Mark**: for every root, read the segment id stored in that stack
//!    slot and mark it; record-typed members are followed recursively.
//!    Marking is idempotent, so cyclic heaps terminate.
//! 3. **Sweep**: free every live segment whose mark bit is still clear.

use crate::memory::MemoryMap;
use crate::vm::{InternalType, Spyre};
use spyre_core::SpyreMap;
use tracing::debug;

/// Register `bp + local_index*8` as a GC root.
pub fn track_local(vm: &mut Spyre, local_index: usize) {
    let addr = vm.bp() + local_index * 8;
    vm.memory.localtags.push(addr);
}

/// Remove the most recently added root whose address is `bp +
/// local_index*8`.
pub fn untrack_local(vm: &mut Spyre, local_index: usize) {
    let addr = vm.bp() + local_index * 8;
    if let Some(pos) = vm.memory.localtags.iter().rposition(|a| *a == addr) {
        vm.memory.localtags.remove(pos);
    }
}

/// Pop the `count` most recently added roots.
pub fn untrack_locals(vm: &mut Spyre, count: usize) -> Result<(), String> {
    let len = vm.memory.localtags.len();
    if count > len {
        return Err("garbage collection mismatch: root underflow".to_string());
    }
    vm.memory.localtags.truncate(len - count);
    Ok(())
}

/// Run a full collection. Returns the number of segments freed.
pub fn collect(vm: &mut Spyre) -> usize {
    unmark(&mut vm.memory);

    // Mark from every root. A slot holding zero is the null segment and is
    // ignored.
    let roots = vm.memory.localtags.clone();
    for addr in roots {
        let seg_id = vm.stack_word_at(addr).unwrap_or(0) as usize;
        if seg_id != 0 {
            mark_segment(&mut vm.memory, &vm.internal_types, seg_id);
        }
    }

    sweep(&mut vm.memory)
}

fn unmark(memory: &mut MemoryMap) {
    for id in memory.live_ids() {
        if let Some(segment) = memory.segment_mut(id) {
            segment.desc.mark = false;
        }
    }
}

fn mark_segment(memory: &mut MemoryMap, types: &SpyreMap<InternalType>, seg_id: usize) {
    let Some(segment) = memory.segment_mut(seg_id) else {
        return;
    };
    if segment.desc.mark {
        return;
    }
    segment.desc.mark = true;
    debug!(seg_id, "marked segment");

    let type_name = segment.desc.type_name.clone();
    let Some(type_info) = types.get(&type_name) else {
        return;
    };

    // Only record-typed members hold segment ids worth following.
    for member in &type_info.members {
        let member_is_record = types
            .get(&member.type_name)
            .is_some_and(|t| !t.members.is_empty());
        if !member_is_record {
            continue;
        }
        let word = memory
            .read_payload_word(seg_id, member.byte_offset)
            .unwrap_or(0);
        if word != 0 {
            mark_segment(memory, types, word as usize);
        }
    }
}

fn sweep(memory: &mut MemoryMap) -> usize {
    let mut freed = 0;
    for id in memory.live_ids() {
        let marked = memory.segment(id).map(|s| s.desc.mark).unwrap_or(true);
        if !marked && memory.free(id).is_ok() {
            debug!(seg_id = id, "freed segment");
            freed += 1;
        }
    }
    freed
}
