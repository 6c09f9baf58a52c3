//! Opcode definitions for the VM.

/// All VM opcodes.
///
/// The discriminants are the wire encoding: the code generator writes them as
/// words into the text segment and the interpreter decodes them back with
/// [`Opcode::from_word`]. The `OPEN..=EXIT` tail doubles as the intrinsic
/// range used when seeding built-in names, so the order is load-bearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i64)]
pub enum Opcode {
    // Addressing and control flow (0-8)
    LEA = 0,
    IMM = 1,
    JMP = 2,
    CALL = 3,
    JZ = 4,
    JNZ = 5,
    ENT = 6,
    ADJ = 7,
    LEV = 8,

    // Loads, stores, push (9-13)
    LI = 9,
    LC = 10,
    SI = 11,
    SC = 12,
    PUSH = 13,

    // Binary operators (14-29)
    OR = 14,
    XOR = 15,
    AND = 16,
    EQ = 17,
    NE = 18,
    LT = 19,
    GT = 20,
    LE = 21,
    GE = 22,
    SHL = 23,
    SHR = 24,
    ADD = 25,
    SUB = 26,
    MUL = 27,
    DIV = 28,
    MOD = 29,

    // Host intrinsics (30-36)
    OPEN = 30,
    READ = 31,
    CLOS = 32,
    PRTF = 33,
    MALC = 34,
    MSET = 35,
    MCMP = 36,
    EXIT = 37,
}

impl Opcode {
    /// Decode a text-segment word as an opcode.
    pub fn from_word(word: i64) -> Option<Self> {
        match word {
            0 => Some(Opcode::LEA),
            1 => Some(Opcode::IMM),
            2 => Some(Opcode::JMP),
            3 => Some(Opcode::CALL),
            4 => Some(Opcode::JZ),
            5 => Some(Opcode::JNZ),
            6 => Some(Opcode::ENT),
            7 => Some(Opcode::ADJ),
            8 => Some(Opcode::LEV),
            9 => Some(Opcode::LI),
            10 => Some(Opcode::LC),
            11 => Some(Opcode::SI),
            12 => Some(Opcode::SC),
            13 => Some(Opcode::PUSH),
            14 => Some(Opcode::OR),
            15 => Some(Opcode::XOR),
            16 => Some(Opcode::AND),
            17 => Some(Opcode::EQ),
            18 => Some(Opcode::NE),
            19 => Some(Opcode::LT),
            20 => Some(Opcode::GT),
            21 => Some(Opcode::LE),
            22 => Some(Opcode::GE),
            23 => Some(Opcode::SHL),
            24 => Some(Opcode::SHR),
            25 => Some(Opcode::ADD),
            26 => Some(Opcode::SUB),
            27 => Some(Opcode::MUL),
            28 => Some(Opcode::DIV),
            29 => Some(Opcode::MOD),
            30 => Some(Opcode::OPEN),
            31 => Some(Opcode::READ),
            32 => Some(Opcode::CLOS),
            33 => Some(Opcode::PRTF),
            34 => Some(Opcode::MALC),
            35 => Some(Opcode::MSET),
            36 => Some(Opcode::MCMP),
            37 => Some(Opcode::EXIT),
            _ => None,
        }
    }

    /// Whether the opcode is followed by one inline operand word.
    pub fn has_operand(&self) -> bool {
        matches!(
            self,
            Opcode::LEA
                | Opcode::IMM
                | Opcode::JMP
                | Opcode::CALL
                | Opcode::JZ
                | Opcode::JNZ
                | Opcode::ENT
                | Opcode::ADJ
        )
    }

    /// Whether the opcode trampolines to a built-in (the `OPEN..=EXIT` range).
    pub fn is_intrinsic(&self) -> bool {
        (*self as i64) >= (Opcode::OPEN as i64) && (*self as i64) <= (Opcode::EXIT as i64)
    }
}
