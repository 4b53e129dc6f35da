//! The Spyre virtual machine core.
//!
//! A byte-addressable stack machine. All pushes and pops move 8-byte
//! little-endian words; `sp` addresses the next free byte, `bp` the current
//! frame base, `ip` the next opcode. Locals live above `bp` at slot
//! offsets; arguments live below the frame descriptor that `CALL` pushes.
//!
//! Calling convention: the caller pushes arguments left to right, then
//! `CALL addr nargs` pushes the frame descriptor (nargs, saved bp, return
//! ip) and sets `bp := sp`. The callee reserves locals with `RESL` and
//! copies arguments in with `ARG`/`SVL`. `RET`/`IRET` tear the frame down
//! symmetrically, dropping the arguments; `IRET` re-pushes the saved
//! return value.

use crate::config::VmConfig;
use crate::gc;
use crate::memory::{MemoryDescriptor, MemoryMap};
use spyre_core::opcodes as ins;
use spyre_core::SpyreMap;
use std::io::Write;

/// One member of a runtime type: the member's type name and its byte
/// offset inside the segment payload.
#[derive(Debug, Clone)]
pub struct InternalMember {
    pub type_name: String,
    pub byte_offset: usize,
}

/// A type the allocator and collector know about. Primitives have no
/// members; record types list them in layout order.
#[derive(Debug, Clone)]
pub struct InternalType {
    pub type_name: String,
    pub members: Vec<InternalMember>,
}

impl InternalType {
    pub fn primitive(name: &str) -> Self {
        InternalType {
            type_name: name.to_string(),
            members: Vec::new(),
        }
    }

    pub fn record(name: &str, members: Vec<(String, usize)>) -> Self {
        InternalType {
            type_name: name.to_string(),
            members: members
                .into_iter()
                .map(|(type_name, byte_offset)| InternalMember {
                    type_name,
                    byte_offset,
                })
                .collect(),
        }
    }
}

pub struct Spyre {
    pub(crate) memory: MemoryMap,
    pub(crate) internal_types: SpyreMap<InternalType>,
    pub(crate) cfuncs: SpyreMap<crate::bindings::NativeFn>,
    stack: Vec<u8>,
    code: Vec<u8>,
    sp: usize,
    bp: usize,
    ip: usize,
    // Condition flags.
    fz: bool,
    feq: bool,
    fgt: bool,
    fge: bool,
    out: Box<dyn Write>,
}

impl Spyre {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        let mut internal_types = SpyreMap::new();
        for name in ["int", "float", "char", "bool"] {
            internal_types.insert(name, InternalType::primitive(name));
        }
        Spyre {
            memory: MemoryMap::new(config.heap_capacity),
            internal_types,
            cfuncs: SpyreMap::new(),
            stack: vec![0u8; config.stack_capacity],
            code: Vec::new(),
            sp: 0,
            bp: 0,
            ip: 0,
            fz: false,
            feq: false,
            fgt: false,
            fge: false,
            out: Box::new(std::io::stdout()),
        }
    }

    /// Register a record type so `ALLOC` can size segments of it and the
    /// collector can trace its members. `members` pairs each member's type
    /// name with its byte offset.
    pub fn register_record_type(&mut self, name: &str, members: Vec<(String, usize)>) {
        self.internal_types
            .insert(name, InternalType::record(name, members));
    }

    /// Redirect `IPRINT` and the `print` binding (stdout by default).
    pub fn set_output(&mut self, out: Box<dyn Write>) {
        self.out = out;
    }

    pub fn sp(&self) -> usize {
        self.sp
    }

    pub fn bp(&self) -> usize {
        self.bp
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    /// The integer on top of the stack, if any. This is the observable of
    /// a program whose `main` returned into the entry frame.
    pub fn stack_top_int(&self) -> Option<i64> {
        if self.sp < 8 {
            return None;
        }
        self.stack_word_at(self.sp - 8).map(|w| w as i64)
    }

    /// Number of live heap segments.
    pub fn live_segments(&self) -> usize {
        self.memory.live_count()
    }

    /// Number of registered GC roots.
    pub fn root_count(&self) -> usize {
        self.memory.localtags.len()
    }

    /// Run a full mark-sweep collection; returns segments freed.
    pub fn collect(&mut self) -> usize {
        gc::collect(self)
    }

    // ===== stack primitives =====

    fn ensure_stack(&mut self, needed: usize) {
        if needed > self.stack.len() {
            let new_len = needed.max(self.stack.len() * 2);
            self.stack.resize(new_len, 0);
        }
    }

    pub(crate) fn stack_word_at(&self, addr: usize) -> Option<u64> {
        let bytes = self.stack.get(addr..addr + 8)?;
        Some(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn write_stack_word(&mut self, addr: usize, value: u64) {
        self.ensure_stack(addr + 8);
        self.stack[addr..addr + 8].copy_from_slice(&value.to_le_bytes());
    }

    fn read_stack_word(&mut self, addr: usize) -> u64 {
        self.ensure_stack(addr + 8);
        u64::from_le_bytes(self.stack[addr..addr + 8].try_into().unwrap())
    }

    pub fn push_word(&mut self, word: u64) {
        self.ensure_stack(self.sp + 8);
        self.stack[self.sp..self.sp + 8].copy_from_slice(&word.to_le_bytes());
        self.sp += 8;
    }

    pub fn push_int(&mut self, value: i64) {
        self.push_word(value as u64);
    }

    pub fn pop_word(&mut self) -> Result<u64, String> {
        if self.sp < 8 {
            return Err("stack underflow".to_string());
        }
        self.sp -= 8;
        Ok(self.stack_word_at(self.sp).unwrap())
    }

    pub fn pop_int(&mut self) -> Result<i64, String> {
        self.pop_word().map(|w| w as i64)
    }

    pub(crate) fn write_int_line(&mut self, value: i64) -> Result<(), String> {
        writeln!(self.out, "{}", value).map_err(|e| format!("write failed: {}", e))
    }

    // ===== code reads =====

    fn read_operand(&mut self) -> Result<u64, String> {
        let bytes = self
            .code
            .get(self.ip..self.ip + 8)
            .ok_or_else(|| "unexpected end of bytecode".to_string())?;
        self.ip += 8;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    /// Read the null-terminated string a `db` directive placed at `offset`
    /// in the code image (used by ALLOC and CCALL operands).
    fn string_operand(&self, offset: usize) -> Result<String, String> {
        let tail = self
            .code
            .get(offset..)
            .ok_or_else(|| format!("string operand out of bounds at {}", offset))?;
        let end = tail
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| format!("unterminated string operand at {}", offset))?;
        String::from_utf8(tail[..end].to_vec())
            .map_err(|_| format!("malformed string operand at {}", offset))
    }

    // ===== execution =====

    /// Execute a bytecode image from its first byte. Dispatch stops on
    /// `HALT` or at the end of the buffer.
    pub fn execute(&mut self, code: Vec<u8>) -> Result<(), String> {
        self.code = code;
        self.ip = 0;

        while self.ip < self.code.len() {
            let opcode = self.code[self.ip];
            self.ip += 1;
            match opcode {
                ins::HALT => break,

                ins::IPUSH => {
                    let value = self.read_operand()? as i64;
                    self.push_int(value);
                }
                ins::IPOP => {
                    self.pop_int()?;
                }
                ins::IADD => {
                    let rhs = self.pop_int()?;
                    let lhs = self.pop_int()?;
                    self.push_int(lhs.wrapping_add(rhs));
                }
                ins::ISUB => {
                    let rhs = self.pop_int()?;
                    let lhs = self.pop_int()?;
                    self.push_int(lhs.wrapping_sub(rhs));
                }
                ins::IMUL => {
                    let rhs = self.pop_int()?;
                    let lhs = self.pop_int()?;
                    self.push_int(lhs.wrapping_mul(rhs));
                }
                ins::IDIV => {
                    let rhs = self.pop_int()?;
                    let lhs = self.pop_int()?;
                    if rhs == 0 {
                        return Err("integer division by zero".to_string());
                    }
                    self.push_int(lhs.wrapping_div(rhs));
                }

                ins::DUP => {
                    let top = self.pop_word()?;
                    self.push_word(top);
                    self.push_word(top);
                }

                ins::FEQ => self.push_int(self.feq as i64),
                ins::FLE => self.push_int(!self.fgt as i64),
                ins::FGE => self.push_int(self.fge as i64),
                ins::FLT => self.push_int(!self.fge as i64),
                ins::FGT => self.push_int(self.fgt as i64),

                ins::LDL => {
                    let slot = self.read_operand()? as usize;
                    let addr = self.bp + slot * 8;
                    let word = self.read_stack_word(addr);
                    self.push_word(word);
                }
                ins::SVL => {
                    let slot = self.read_operand()? as usize;
                    let value = self.pop_word()?;
                    let addr = self.bp + slot * 8;
                    self.write_stack_word(addr, value);
                }
                ins::RESL => {
                    let slots = self.read_operand()? as usize;
                    let bytes = slots * 8;
                    self.ensure_stack(self.sp + bytes);
                    // Zero the reserved area so untouched root slots read
                    // as the null segment.
                    self.stack[self.sp..self.sp + bytes].fill(0);
                    self.sp += bytes;
                }
                ins::LDMBR => {
                    let member = self.read_operand()? as usize;
                    let seg_id = self.pop_int()? as usize;
                    let word = self.memory.read_payload_word(seg_id, member * 8)?;
                    self.push_word(word);
                }
                ins::SVMBR => {
                    let member = self.read_operand()? as usize;
                    let value = self.pop_word()?;
                    let seg_id = self.pop_int()? as usize;
                    self.memory.write_payload_word(seg_id, member * 8, value)?;
                }
                ins::ARG => {
                    let index = self.read_operand()? as usize;
                    let descriptor_base = self
                        .bp
                        .checked_sub(24)
                        .ok_or_else(|| "argument access outside of a call frame".to_string())?;
                    let nargs = self.read_stack_word(descriptor_base) as usize;
                    if index >= nargs {
                        return Err(format!(
                            "argument index {} out of range (frame has {})",
                            index, nargs
                        ));
                    }
                    let addr = descriptor_base
                        .checked_sub((nargs - index) * 8)
                        .ok_or_else(|| "argument access outside of a call frame".to_string())?;
                    let word = self.read_stack_word(addr);
                    self.push_word(word);
                }
                ins::SVLS => {
                    let value = self.pop_word()?;
                    let slot = self.pop_int()? as usize;
                    let addr = self.bp + slot * 8;
                    self.write_stack_word(addr, value);
                }

                ins::IPRINT => {
                    let value = self.pop_int()?;
                    self.write_int_line(value)?;
                }
                ins::FLAGS => {
                    let line = format!(
                        "fz: {} feq: {} fgt: {} fge: {}",
                        self.fz as u8, self.feq as u8, self.fgt as u8, self.fge as u8
                    );
                    writeln!(self.out, "{}", line).map_err(|e| format!("write failed: {}", e))?;
                }

                ins::ALLOC => {
                    let offset = self.read_operand()? as usize;
                    let type_name = self.string_operand(offset)?;
                    let desc = MemoryDescriptor::for_type(&type_name);
                    let seg_id = self.memory.alloc(&self.internal_types, desc)?;
                    self.push_word(seg_id as u64);
                }
                ins::FREE => {
                    let seg_id = self.pop_int()? as usize;
                    self.memory.free(seg_id)?;
                }
                ins::TAGL => {
                    let slot = self.read_operand()? as usize;
                    gc::track_local(self, slot);
                }
                ins::UNTAGL => {
                    let slot = self.read_operand()? as usize;
                    gc::untrack_local(self, slot);
                }
                ins::UNTAGLS => {
                    let count = self.read_operand()? as usize;
                    gc::untrack_locals(self, count)?;
                }

                ins::ITEST => {
                    let value = self.pop_int()?;
                    self.fz = value == 0;
                }
                ins::ICMP => {
                    let rhs = self.pop_int()?;
                    let lhs = self.pop_int()?;
                    self.feq = lhs == rhs;
                    self.fgt = lhs > rhs;
                    self.fge = lhs >= rhs;
                }
                ins::JMP => {
                    let addr = self.read_operand()? as usize;
                    self.ip = addr;
                }
                ins::JZ => self.branch_if(self.fz)?,
                ins::JNZ => self.branch_if(!self.fz)?,
                ins::JGT => self.branch_if(self.fgt)?,
                ins::JGE => self.branch_if(self.fge)?,
                ins::JLT => self.branch_if(!self.fge)?,
                ins::JLE => self.branch_if(!self.fgt)?,
                ins::JEQ => self.branch_if(self.feq)?,
                ins::JNEQ => self.branch_if(!self.feq)?,

                ins::CALL => {
                    let addr = self.read_operand()? as usize;
                    let nargs = self.read_operand()?;
                    self.push_word(nargs);
                    self.push_word(self.bp as u64);
                    self.push_word(self.ip as u64);
                    self.bp = self.sp;
                    self.ip = addr;
                }
                ins::CCALL => {
                    let offset = self.read_operand()? as usize;
                    let _nargs = self.read_operand()?;
                    let name = self.string_operand(offset)?;
                    self.call_cfunc(&name)?;
                }
                ins::IRET => {
                    let value = self.pop_word()?;
                    self.teardown_frame()?;
                    self.push_word(value);
                }
                ins::RET => {
                    self.teardown_frame()?;
                }

                other => {
                    return Err(match ins::by_opcode(other) {
                        Some(def) => format!("unimplemented instruction '{}'", def.mnemonic),
                        None => format!("unknown opcode 0x{:02X}", other),
                    });
                }
            }
        }
        Ok(())
    }

    fn branch_if(&mut self, cond: bool) -> Result<(), String> {
        let addr = self.read_operand()? as usize;
        if cond {
            self.ip = addr;
        }
        Ok(())
    }

    /// Unwind the frame descriptor `CALL` pushed: restore sp, ip, and bp,
    /// then drop the caller-pushed arguments.
    fn teardown_frame(&mut self) -> Result<(), String> {
        self.sp = self.bp;
        let return_ip = self.pop_word()? as usize;
        let saved_bp = self.pop_word()? as usize;
        let nargs = self.pop_word()? as usize;
        let arg_bytes = nargs * 8;
        if self.sp < arg_bytes {
            return Err("call frame corrupted".to_string());
        }
        self.sp -= arg_bytes;
        self.ip = return_ip;
        self.bp = saved_bp;
        Ok(())
    }
}

impl Default for Spyre {
    fn default() -> Self {
        Self::new()
    }
}
