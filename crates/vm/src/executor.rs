//! VM execution loop.
//!
//! Four registers: PC is a slot index into the text segment, SP and BP are
//! byte addresses into the stack region, and AX is the accumulator every
//! operation leaves its result in. Binary operators pop their left operand
//! off the stack and combine it with AX.

use crate::host::{render_printf, Host};
use crate::memory::{Memory, WORD_SIZE};
use crate::opcodes::Opcode;
use crate::tracer::{TraceStep, Tracer};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("unknown instruction: {0}")]
    UnknownOpcode(i64),

    #[error("program counter out of range: {0}")]
    BadProgramCounter(i64),

    #[error("invalid memory address: {0}")]
    BadAddress(i64),

    #[error("stack overflow")]
    StackOverflow,

    #[error("stack underflow")]
    StackUnderflow,

    #[error("division by zero")]
    DivisionByZero,

    #[error("out of memory")]
    OutOfMemory,

    #[error("data segment too large: {0} bytes")]
    DataTooLarge(usize),
}

pub type Result<T> = std::result::Result<T, VmError>;

/// A compiled program: the contract between the code generator and the VM.
///
/// `text` holds opcode words and their inline operands in consecutive slots;
/// every branch and call target is a slot index into it. `entry` is `main`'s
/// first instruction. `exit_stub` addresses a `PUSH; EXIT` pair the startup
/// frame returns into when `main` leaves, turning `main`'s return value into
/// the program status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub text: Vec<i64>,
    pub data: Vec<u8>,
    pub entry: i64,
    pub exit_stub: i64,
}

/// The virtual machine state.
pub struct Vm<H: Host> {
    text: Vec<i64>,
    memory: Memory,
    pc: usize,
    sp: usize,
    bp: usize,
    ax: i64,
    cycle: u64,
    host: H,
    tracer: Tracer,
}

impl<H: Host> Vm<H> {
    /// Build a VM over a compiled image and lay out the startup frame.
    ///
    /// `args` become the compiled program's `argc`/`argv`: each string is
    /// copied into the heap, an argv array of their addresses follows, and
    /// the frame is arranged so `main`'s `LEV` returns into the exit stub.
    pub fn new(image: &Image, host: H, args: &[String]) -> Result<Self> {
        let mut memory = Memory::new(&image.data)?;

        let mut arg_ptrs = Vec::with_capacity(args.len());
        for arg in args {
            let addr = memory.alloc(arg.len() as i64 + 1)?;
            memory.write_bytes(addr, arg.as_bytes())?;
            arg_ptrs.push(addr);
        }
        let argv = memory.alloc((args.len() * WORD_SIZE) as i64)?;
        for (i, ptr) in arg_ptrs.iter().enumerate() {
            memory.store_word(argv + (i * WORD_SIZE) as i64, *ptr)?;
        }

        let mut vm = Self {
            text: image.text.clone(),
            memory,
            pc: 0,
            sp: 0,
            bp: 0,
            ax: 0,
            cycle: 0,
            host,
            tracer: Tracer::new(false),
        };
        vm.sp = vm.memory.stack_top();
        vm.pc = vm.text_index(image.entry)?;

        vm.push(args.len() as i64)?; // argc
        vm.push(argv)?; // argv
        vm.push(image.exit_stub)?; // return address for main's LEV
        vm.bp = vm.sp;
        Ok(vm)
    }

    /// Record every step in the tracer from now on.
    pub fn enable_tracing(&mut self) {
        self.tracer = Tracer::new(true);
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn ax(&self) -> i64 {
        self.ax
    }

    pub fn sp(&self) -> usize {
        self.sp
    }

    pub fn bp(&self) -> usize {
        self.bp
    }

    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn into_host(self) -> H {
        self.host
    }

    /// Run until EXIT, returning the program status.
    pub fn run(&mut self) -> Result<i64> {
        loop {
            if let Some(status) = self.step()? {
                tracing::debug!(cycles = self.cycle, status, "execution finished");
                return Ok(status);
            }
        }
    }

    /// Execute one instruction. `Some(status)` when EXIT fires.
    pub fn step(&mut self) -> Result<Option<i64>> {
        let at = self.pc;
        let word = self.fetch()?;
        let op = Opcode::from_word(word).ok_or(VmError::UnknownOpcode(word))?;
        self.cycle += 1;
        self.tracer.record(TraceStep {
            cycle: self.cycle,
            pc: at,
            opcode: op,
            ax: self.ax,
            sp: self.sp,
            bp: self.bp,
        });

        match op {
            Opcode::IMM => self.ax = self.operand()?,
            Opcode::LC => self.ax = self.memory.load_byte(self.ax)?,
            Opcode::LI => self.ax = self.memory.load_word(self.ax)?,
            Opcode::SC => {
                let addr = self.pop()?;
                self.memory.store_byte(addr, self.ax)?;
            }
            Opcode::SI => {
                let addr = self.pop()?;
                self.memory.store_word(addr, self.ax)?;
            }
            Opcode::PUSH => self.push(self.ax)?,

            Opcode::JMP => {
                let target = self.operand()?;
                self.pc = self.text_index(target)?;
            }
            Opcode::JZ => {
                let target = self.operand()?;
                if self.ax == 0 {
                    self.pc = self.text_index(target)?;
                }
            }
            Opcode::JNZ => {
                let target = self.operand()?;
                if self.ax != 0 {
                    self.pc = self.text_index(target)?;
                }
            }
            Opcode::CALL => {
                let target = self.operand()?;
                self.push(self.pc as i64)?;
                self.pc = self.text_index(target)?;
            }
            Opcode::ENT => {
                let locals = self.operand()?;
                if locals < 0 {
                    return Err(VmError::StackOverflow);
                }
                self.push(self.bp as i64)?;
                self.bp = self.sp;
                let frame = (locals as usize)
                    .checked_mul(WORD_SIZE)
                    .ok_or(VmError::StackOverflow)?;
                if self.sp < self.memory.stack_limit().saturating_add(frame) {
                    return Err(VmError::StackOverflow);
                }
                self.sp -= frame;
            }
            Opcode::ADJ => {
                let count = self.operand()?;
                if count < 0 {
                    return Err(VmError::StackUnderflow);
                }
                let bytes = (count as usize)
                    .checked_mul(WORD_SIZE)
                    .ok_or(VmError::StackUnderflow)?;
                if self.sp.saturating_add(bytes) > self.memory.stack_top() {
                    return Err(VmError::StackUnderflow);
                }
                self.sp += bytes;
            }
            Opcode::LEV => {
                self.sp = self.bp;
                self.bp = self.pop()? as usize;
                let ret = self.pop()?;
                self.pc = self.text_index(ret)?;
            }
            Opcode::LEA => {
                let offset = self.operand()?;
                self.ax = (self.bp as i64).wrapping_add(offset.wrapping_mul(WORD_SIZE as i64));
            }

            Opcode::OR => self.binary(op)?,
            Opcode::XOR => self.binary(op)?,
            Opcode::AND => self.binary(op)?,
            Opcode::EQ => self.binary(op)?,
            Opcode::NE => self.binary(op)?,
            Opcode::LT => self.binary(op)?,
            Opcode::GT => self.binary(op)?,
            Opcode::LE => self.binary(op)?,
            Opcode::GE => self.binary(op)?,
            Opcode::SHL => self.binary(op)?,
            Opcode::SHR => self.binary(op)?,
            Opcode::ADD => self.binary(op)?,
            Opcode::SUB => self.binary(op)?,
            Opcode::MUL => self.binary(op)?,
            Opcode::DIV => self.binary(op)?,
            Opcode::MOD => self.binary(op)?,

            Opcode::EXIT => return Ok(Some(self.arg(0)?)),
            Opcode::OPEN => {
                let path = self.memory.read_cstr(self.arg(1)?)?;
                let flags = self.arg(0)?;
                self.ax = self.host.open(&path, flags);
            }
            Opcode::CLOS => {
                let fd = self.arg(0)?;
                self.ax = self.host.close(fd);
            }
            Opcode::READ => {
                let fd = self.arg(2)?;
                let buf = self.arg(1)?;
                let count = self.arg(0)?;
                let slice = self.memory.slice_mut(buf, count)?;
                self.ax = self.host.read(fd, slice);
            }
            Opcode::PRTF => {
                // The ADJ that follows tells us how many words the caller
                // pushed; the first of them is the format string.
                let adj_operand = self.pc + 1;
                if adj_operand >= self.text.len() {
                    return Err(VmError::BadProgramCounter(adj_operand as i64));
                }
                let pushed = self.text[adj_operand];
                let out = self.render_args(pushed)?;
                self.ax = self.host.write(&out);
            }
            Opcode::MALC => {
                let size = self.arg(0)?;
                self.ax = self.memory.alloc(size)?;
            }
            Opcode::MSET => {
                let addr = self.arg(2)?;
                let value = self.arg(1)?;
                let count = self.arg(0)?;
                self.ax = self.memory.memset(addr, value, count)?;
            }
            Opcode::MCMP => {
                let a = self.arg(2)?;
                let b = self.arg(1)?;
                let count = self.arg(0)?;
                self.ax = self.memory.memcmp(a, b, count)?;
            }
        }
        Ok(None)
    }

    fn binary(&mut self, op: Opcode) -> Result<()> {
        let left = self.pop()?;
        let right = self.ax;
        self.ax = match op {
            Opcode::OR => left | right,
            Opcode::XOR => left ^ right,
            Opcode::AND => left & right,
            Opcode::EQ => (left == right) as i64,
            Opcode::NE => (left != right) as i64,
            Opcode::LT => (left < right) as i64,
            Opcode::GT => (left > right) as i64,
            Opcode::LE => (left <= right) as i64,
            Opcode::GE => (left >= right) as i64,
            Opcode::SHL => left.wrapping_shl((right & 0x3F) as u32),
            Opcode::SHR => left.wrapping_shr((right & 0x3F) as u32),
            Opcode::ADD => left.wrapping_add(right),
            Opcode::SUB => left.wrapping_sub(right),
            Opcode::MUL => left.wrapping_mul(right),
            Opcode::DIV => {
                if right == 0 {
                    return Err(VmError::DivisionByZero);
                }
                left.wrapping_div(right)
            }
            Opcode::MOD => {
                if right == 0 {
                    return Err(VmError::DivisionByZero);
                }
                left.wrapping_rem(right)
            }
            _ => unreachable!("non-binary opcode routed to binary()"),
        };
        Ok(())
    }

    /// Collect PRTF output for `pushed` caller words (format + up to five
    /// variadic arguments, read below the top of the argument block).
    fn render_args(&self, pushed: i64) -> Result<Vec<u8>> {
        if pushed < 1 {
            return Err(VmError::StackUnderflow);
        }
        let base = (self.sp as i64).wrapping_add(pushed.wrapping_mul(WORD_SIZE as i64));
        let format = self.memory.load_word(base - WORD_SIZE as i64)?;
        let mut args = Vec::new();
        for i in 0..(pushed - 1).min(5) {
            args.push(self.memory.load_word(base - (i + 2) * WORD_SIZE as i64)?);
        }
        render_printf(&self.memory, format, &args)
    }

    /// Intrinsic argument `index` words above SP, without popping. The
    /// caller's ADJ unwinds them afterwards.
    fn arg(&self, index: usize) -> Result<i64> {
        self.memory
            .load_word(self.sp as i64 + (index * WORD_SIZE) as i64)
    }

    fn fetch(&mut self) -> Result<i64> {
        let word = *self
            .text
            .get(self.pc)
            .ok_or(VmError::BadProgramCounter(self.pc as i64))?;
        self.pc += 1;
        Ok(word)
    }

    fn operand(&mut self) -> Result<i64> {
        self.fetch()
    }

    fn text_index(&self, target: i64) -> Result<usize> {
        if target < 0 || target as usize >= self.text.len() {
            return Err(VmError::BadProgramCounter(target));
        }
        Ok(target as usize)
    }

    fn push(&mut self, value: i64) -> Result<()> {
        if self.sp < self.memory.stack_limit() + WORD_SIZE {
            return Err(VmError::StackOverflow);
        }
        self.sp -= WORD_SIZE;
        self.memory.store_word(self.sp as i64, value)
    }

    fn pop(&mut self) -> Result<i64> {
        if self.sp + WORD_SIZE > self.memory.stack_top() {
            return Err(VmError::StackUnderflow);
        }
        let value = self.memory.load_word(self.sp as i64)?;
        self.sp += WORD_SIZE;
        Ok(value)
    }
}
