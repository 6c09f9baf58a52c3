//! Text and data segment arenas.
//!
//! Both are append-mostly buffers the code generator owns while compiling.
//! The text segment additionally supports the two in-place edits the
//! single-pass design depends on: patching a reserved branch-operand slot
//! once the target is known, and rewriting the just-emitted load when an
//! expression turns out to be an lvalue.

use microc_vm::{Opcode, WORD_SIZE};

/// The instruction stream under construction. Opcodes and their inline
/// operands occupy consecutive word slots; branch and call targets are slot
/// indices, never raw addresses.
pub struct TextSegment {
    words: Vec<i64>,
    /// What the last slot holds, when it holds an opcode. Operand words
    /// clear this, so a literal that happens to share a load's encoding can
    /// never be mistaken for one.
    last_op: Option<Opcode>,
}

impl TextSegment {
    pub fn new() -> Self {
        Self {
            words: Vec::new(),
            last_op: None,
        }
    }

    /// Next slot to be written; the address of whatever is emitted next.
    pub fn pos(&self) -> i64 {
        self.words.len() as i64
    }

    pub fn emit(&mut self, op: Opcode) {
        self.words.push(op as i64);
        self.last_op = Some(op);
    }

    pub fn emit_operand(&mut self, word: i64) {
        self.words.push(word);
        self.last_op = None;
    }

    /// Reserve an operand slot for a forward branch and return its id.
    pub fn reserve(&mut self) -> usize {
        self.words.push(0);
        self.last_op = None;
        self.words.len() - 1
    }

    /// Back-patch a reserved slot with the now-known target.
    pub fn patch(&mut self, slot: usize, target: i64) {
        self.words[slot] = target;
    }

    /// Convert the trailing rvalue load into an address push.
    ///
    /// When the last emitted instruction is `LC` or `LI`, the address it
    /// loads from is still in AX just before it runs; rewriting it to `PUSH`
    /// preserves that address on the stack and hands back which load it was
    /// so the caller can re-emit it (increments) or replace it with a store
    /// (assignment). Returns `None` when the expression was not an lvalue.
    pub fn make_lvalue(&mut self) -> Option<Opcode> {
        match self.last_op {
            Some(load @ (Opcode::LC | Opcode::LI)) => {
                *self.words.last_mut().expect("last_op implies a slot") = Opcode::PUSH as i64;
                self.last_op = Some(Opcode::PUSH);
                Some(load)
            }
            _ => None,
        }
    }

    /// Drop the trailing load entirely, leaving the address in AX. This is
    /// how `&x` undoes the load that `x` just emitted.
    pub fn pop_last_load(&mut self) -> bool {
        match self.last_op {
            Some(Opcode::LC | Opcode::LI) => {
                self.words.pop();
                self.last_op = None;
                true
            }
            _ => false,
        }
    }

    pub fn words(&self) -> &[i64] {
        &self.words
    }

    pub fn into_words(self) -> Vec<i64> {
        self.words
    }
}

impl Default for TextSegment {
    fn default() -> Self {
        Self::new()
    }
}

/// String literal bodies and global variable cells. The first word is
/// reserved so that no live object sits at address zero.
pub struct DataSegment {
    bytes: Vec<u8>,
}

impl DataSegment {
    pub fn new() -> Self {
        Self {
            bytes: vec![0; WORD_SIZE],
        }
    }

    /// Current allocation cursor, which is the address of the next byte.
    pub fn cursor(&self) -> i64 {
        self.bytes.len() as i64
    }

    pub fn push_byte(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    /// Round the cursor up to the next word boundary, always advancing by at
    /// least one zero byte. String literals rely on the advance for their
    /// NUL terminator, and the cells allocated afterwards rely on the
    /// alignment.
    pub fn align_up(&mut self) {
        let len = (self.bytes.len() + WORD_SIZE) & !(WORD_SIZE - 1);
        self.bytes.resize(len, 0);
    }

    /// Reserve a zeroed word cell for a global variable and return its
    /// address.
    pub fn alloc_word(&mut self) -> i64 {
        let addr = self.bytes.len() as i64;
        self.bytes.resize(self.bytes.len() + WORD_SIZE, 0);
        addr
    }

    #[cfg(test)]
    pub fn bytes_at(&self, addr: i64, len: usize) -> &[u8] {
        &self.bytes[addr as usize..addr as usize + len]
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl Default for DataSegment {
    fn default() -> Self {
        Self::new()
    }
}
