//! Single-pass code generator.
//!
//! A recursive-descent parser that emits VM words directly during descent:
//! there is no AST. Declarations update the symbol table, statements emit
//! straight-line code with back-patched forward branches, and expressions
//! are parsed by precedence climbing on the numeric ordering of the operator
//! token kinds. Whether an expression is an lvalue is decided after the
//! fact, by rewriting the load it just emitted; see
//! [`TextSegment::make_lvalue`].

use crate::lexer::{Lexer, Token};
use crate::segments::{DataSegment, TextSegment};
use crate::symbols::{hash_name, Class, SymbolTable, Type};
use microc_vm::{Image, Opcode, WORD_SIZE};
use thiserror::Error;

/// Compile-time diagnostics. The first error is fatal; there is no recovery
/// pass, so every variant carries the line the cursor was on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("line {line}: expected {expected}, found {found}")]
    UnexpectedToken {
        expected: String,
        found: String,
        line: usize,
    },

    #[error("line {line}: bad enum identifier")]
    BadEnumIdentifier { line: usize },

    #[error("line {line}: bad enum initializer")]
    BadEnumInitializer { line: usize },

    #[error("line {line}: bad parameter declaration")]
    BadParameter { line: usize },

    #[error("line {line}: duplicate parameter '{name}'")]
    DuplicateParameter { name: String, line: usize },

    #[error("line {line}: bad local declaration")]
    BadLocal { line: usize },

    #[error("line {line}: duplicate local '{name}'")]
    DuplicateLocal { name: String, line: usize },

    #[error("line {line}: bad global declaration")]
    BadGlobal { line: usize },

    #[error("line {line}: duplicate global '{name}'")]
    DuplicateGlobal { name: String, line: usize },

    #[error("line {line}: bad function call")]
    BadFunctionCall { line: usize },

    #[error("line {line}: undefined variable '{name}'")]
    UndefinedVariable { name: String, line: usize },

    #[error("line {line}: bad dereference")]
    BadDereference { line: usize },

    #[error("line {line}: bad address-of")]
    BadAddressOf { line: usize },

    #[error("line {line}: bad lvalue in assignment")]
    BadLvalue { line: usize },

    #[error("line {line}: bad lvalue in increment/decrement")]
    BadIncrementTarget { line: usize },

    #[error("line {line}: pointer type expected")]
    PointerExpected { line: usize },

    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("line {line}: internal error, token {token}")]
    Internal { token: String, line: usize },

    #[error("main is not defined")]
    MissingMain,
}

pub type Result<T> = std::result::Result<T, CompileError>;

const KEYWORDS: &[(&str, Token)] = &[
    ("char", Token::Char),
    ("else", Token::Else),
    ("enum", Token::Enum),
    ("if", Token::If),
    ("int", Token::Int),
    ("return", Token::Return),
    ("sizeof", Token::Sizeof),
    ("while", Token::While),
];

const INTRINSICS: &[(&str, Opcode)] = &[
    ("open", Opcode::OPEN),
    ("read", Opcode::READ),
    ("close", Opcode::CLOS),
    ("printf", Opcode::PRTF),
    ("malloc", Opcode::MALC),
    ("memset", Opcode::MSET),
    ("memcmp", Opcode::MCMP),
    ("exit", Opcode::EXIT),
];

pub struct CodeGen<'a> {
    lexer: Lexer<'a>,
    symbols: SymbolTable,
    text: TextSegment,
    data: DataSegment,
    /// Type of the expression most recently compiled; drives load width and
    /// pointer-arithmetic scaling.
    expr_type: Type,
    /// Parameter count + 1 for the function being compiled: the stack slot
    /// offset such that `LEA (index_of_bp - value)` addresses local or
    /// parameter number `value`.
    index_of_bp: i64,
}

impl<'a> CodeGen<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut symbols = SymbolTable::new();
        for (name, token) in KEYWORDS {
            let id = symbols.lookup_or_insert(name.as_bytes(), hash_name(name.as_bytes()));
            symbols.get_mut(id).token = *token;
        }
        for (name, op) in INTRINSICS {
            let id = symbols.lookup_or_insert(name.as_bytes(), hash_name(name.as_bytes()));
            let sym = symbols.get_mut(id);
            sym.class = Class::Sys;
            sym.ty = Type::INT;
            sym.value = *op as i64;
        }
        // `void` in a declaration behaves as `char`.
        let id = symbols.lookup_or_insert(b"void", hash_name(b"void"));
        symbols.get_mut(id).token = Token::Char;

        Self {
            lexer: Lexer::new(source),
            symbols,
            text: TextSegment::new(),
            data: DataSegment::new(),
            expr_type: Type::INT,
            index_of_bp: 0,
        }
    }

    /// Compile the whole translation unit into an executable image.
    pub fn compile(mut self) -> Result<Image> {
        self.parse_program()?;
        let main = self
            .symbols
            .find_function("main")
            .ok_or(CompileError::MissingMain)?;
        let entry = main.value;
        tracing::debug!(
            text_words = self.text.pos(),
            data_bytes = self.data.cursor(),
            "compilation finished"
        );
        Ok(Image {
            text: self.text.into_words(),
            data: self.data.into_bytes(),
            entry,
            exit_stub: 0,
        })
    }

    fn parse_program(&mut self) -> Result<()> {
        // Exit stub: main's LEV returns here, turning its return value into
        // the program status.
        self.text.emit(Opcode::PUSH);
        self.text.emit(Opcode::EXIT);

        self.advance();
        while self.lexer.token != Token::Eof {
            self.global_declaration()?;
        }
        Ok(())
    }

    fn advance(&mut self) {
        self.lexer.next(&mut self.data, &mut self.symbols);
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        if self.lexer.token == token {
            self.advance();
            Ok(())
        } else {
            Err(CompileError::UnexpectedToken {
                expected: format!("{:?}", token),
                found: format!("{:?}", self.lexer.token),
                line: self.lexer.line,
            })
        }
    }

    fn name_of(&self, id: usize) -> String {
        self.symbols.get(id).name.clone()
    }

    /// Emit the load matching a value's width and record its type.
    fn load(&mut self, ty: Type) {
        self.text.emit(if ty == Type::CHAR {
            Opcode::LC
        } else {
            Opcode::LI
        });
        self.expr_type = ty;
    }

    /// Emit the store matching a value's width.
    fn store(&mut self, ty: Type) {
        self.text.emit(if ty == Type::CHAR {
            Opcode::SC
        } else {
            Opcode::SI
        });
    }

    // ----- declarations ---------------------------------------------------

    /// `enum {...};`, `type name;` globals, or `type name(params) {body}`.
    fn global_declaration(&mut self) -> Result<()> {
        if self.lexer.token == Token::Enum {
            self.advance();
            if self.lexer.token != Token::Lbrace {
                self.expect(Token::Id)?; // optional tag, unused
            }
            if self.lexer.token == Token::Lbrace {
                self.advance();
                self.enum_declaration()?;
                self.expect(Token::Rbrace)?;
            }
            self.expect(Token::Semicolon)?;
            return Ok(());
        }

        let mut base = Type::INT;
        if self.lexer.token == Token::Int {
            self.advance();
        } else if self.lexer.token == Token::Char {
            self.advance();
            base = Type::CHAR;
        }

        while self.lexer.token != Token::Semicolon && self.lexer.token != Token::Rbrace {
            if self.lexer.token == Token::Eof {
                return Err(CompileError::UnexpectedEof);
            }
            let mut ty = base;
            while self.lexer.token == Token::Mul {
                self.advance();
                ty = ty.ptr_to();
            }
            if self.lexer.token != Token::Id {
                return Err(CompileError::BadGlobal {
                    line: self.lexer.line,
                });
            }
            let id = self.lexer.cur_id;
            if self.symbols.get(id).class != Class::None {
                return Err(CompileError::DuplicateGlobal {
                    name: self.name_of(id),
                    line: self.lexer.line,
                });
            }
            self.advance();
            self.symbols.get_mut(id).ty = ty;

            if self.lexer.token == Token::Lparen {
                let address = self.text.pos();
                let sym = self.symbols.get_mut(id);
                sym.class = Class::Fun;
                sym.value = address;
                self.function_declaration()?;
            } else {
                let address = self.data.alloc_word();
                let sym = self.symbols.get_mut(id);
                sym.class = Class::Glo;
                sym.value = address;
            }

            if self.lexer.token == Token::Comma {
                self.advance();
            }
        }
        self.advance(); // past ';', or past the '}' that closed a body
        Ok(())
    }

    /// Enum members: sequential values from zero unless reassigned.
    fn enum_declaration(&mut self) -> Result<()> {
        let mut value = 0i64;
        while self.lexer.token != Token::Rbrace {
            if self.lexer.token != Token::Id {
                return Err(CompileError::BadEnumIdentifier {
                    line: self.lexer.line,
                });
            }
            let id = self.lexer.cur_id;
            self.advance();

            if self.lexer.token == Token::Assign {
                self.advance();
                if self.lexer.token != Token::Num {
                    return Err(CompileError::BadEnumInitializer {
                        line: self.lexer.line,
                    });
                }
                value = self.lexer.token_val;
                self.advance();
            }

            let sym = self.symbols.get_mut(id);
            sym.class = Class::Num;
            sym.ty = Type::INT;
            sym.value = value;
            value += 1;

            if self.lexer.token == Token::Comma {
                self.advance();
            }
        }
        Ok(())
    }

    fn function_declaration(&mut self) -> Result<()> {
        self.expect(Token::Lparen)?;
        self.function_parameter()?;
        self.expect(Token::Rparen)?;
        self.expect(Token::Lbrace)?;
        self.function_body()?;
        // Uncover whatever the locals were shadowing. The closing '}' is
        // left for global_declaration to consume.
        self.symbols.restore_locals();
        Ok(())
    }

    /// Parameters are numbered 0..P-1 in declaration order.
    fn function_parameter(&mut self) -> Result<()> {
        let mut params = 0i64;
        while self.lexer.token != Token::Rparen {
            if self.lexer.token == Token::Eof {
                return Err(CompileError::UnexpectedEof);
            }
            let mut ty = Type::INT;
            if self.lexer.token == Token::Int {
                self.advance();
            } else if self.lexer.token == Token::Char {
                self.advance();
                ty = Type::CHAR;
            }
            while self.lexer.token == Token::Mul {
                self.advance();
                ty = ty.ptr_to();
            }
            if self.lexer.token != Token::Id {
                return Err(CompileError::BadParameter {
                    line: self.lexer.line,
                });
            }
            let id = self.lexer.cur_id;
            if self.symbols.get(id).class == Class::Loc {
                return Err(CompileError::DuplicateParameter {
                    name: self.name_of(id),
                    line: self.lexer.line,
                });
            }
            self.advance();
            self.symbols.enter_local(id, ty, params);
            params += 1;

            if self.lexer.token == Token::Comma {
                self.advance();
            }
        }
        self.index_of_bp = params + 1;
        Ok(())
    }

    /// Local declarations first, then statements. Locals are numbered from
    /// `index_of_bp + 1` so `index_of_bp - value` is their negative frame
    /// offset.
    fn function_body(&mut self) -> Result<()> {
        let mut pos_local = self.index_of_bp;

        while self.lexer.token == Token::Int || self.lexer.token == Token::Char {
            let base = if self.lexer.token == Token::Int {
                Type::INT
            } else {
                Type::CHAR
            };
            self.advance();
            while self.lexer.token != Token::Semicolon {
                if self.lexer.token == Token::Eof {
                    return Err(CompileError::UnexpectedEof);
                }
                let mut ty = base;
                while self.lexer.token == Token::Mul {
                    self.advance();
                    ty = ty.ptr_to();
                }
                if self.lexer.token != Token::Id {
                    return Err(CompileError::BadLocal {
                        line: self.lexer.line,
                    });
                }
                let id = self.lexer.cur_id;
                if self.symbols.get(id).class == Class::Loc {
                    return Err(CompileError::DuplicateLocal {
                        name: self.name_of(id),
                        line: self.lexer.line,
                    });
                }
                self.advance();
                pos_local += 1;
                self.symbols.enter_local(id, ty, pos_local);

                if self.lexer.token == Token::Comma {
                    self.advance();
                }
            }
            self.expect(Token::Semicolon)?;
        }

        self.text.emit(Opcode::ENT);
        self.text.emit_operand(pos_local - self.index_of_bp);

        while self.lexer.token != Token::Rbrace {
            if self.lexer.token == Token::Eof {
                return Err(CompileError::UnexpectedEof);
            }
            self.statement()?;
        }
        self.text.emit(Opcode::LEV);
        Ok(())
    }

    // ----- statements -----------------------------------------------------

    fn statement(&mut self) -> Result<()> {
        match self.lexer.token {
            Token::If => {
                self.advance();
                self.expect(Token::Lparen)?;
                self.expression(Token::Assign)?;
                self.expect(Token::Rparen)?;

                self.text.emit(Opcode::JZ);
                let no_branch = self.text.reserve();
                self.statement()?;
                if self.lexer.token == Token::Else {
                    self.advance();
                    self.text.emit(Opcode::JMP);
                    let end = self.text.reserve();
                    self.text.patch(no_branch, self.text.pos());
                    self.statement()?;
                    self.text.patch(end, self.text.pos());
                } else {
                    self.text.patch(no_branch, self.text.pos());
                }
                Ok(())
            }
            Token::While => {
                self.advance();
                let entry = self.text.pos();
                self.expect(Token::Lparen)?;
                self.expression(Token::Assign)?;
                self.expect(Token::Rparen)?;

                self.text.emit(Opcode::JZ);
                let exit = self.text.reserve();
                self.statement()?;
                self.text.emit(Opcode::JMP);
                self.text.emit_operand(entry);
                self.text.patch(exit, self.text.pos());
                Ok(())
            }
            Token::Return => {
                self.advance();
                if self.lexer.token != Token::Semicolon {
                    self.expression(Token::Assign)?;
                }
                self.expect(Token::Semicolon)?;
                self.text.emit(Opcode::LEV);
                Ok(())
            }
            Token::Lbrace => {
                self.advance();
                while self.lexer.token != Token::Rbrace {
                    if self.lexer.token == Token::Eof {
                        return Err(CompileError::UnexpectedEof);
                    }
                    self.statement()?;
                }
                self.advance();
                Ok(())
            }
            Token::Semicolon => {
                self.advance();
                Ok(())
            }
            _ => {
                self.expression(Token::Assign)?;
                self.expect(Token::Semicolon)
            }
        }
    }

    // ----- expressions ----------------------------------------------------

    /// Compile one expression: a unary unit, then every binary or postfix
    /// operator whose token kind is at least `level`.
    fn expression(&mut self, level: Token) -> Result<()> {
        self.unit_unary()?;
        self.climb(level)
    }

    fn unit_unary(&mut self) -> Result<()> {
        let line = self.lexer.line;
        match self.lexer.token {
            Token::Eof => Err(CompileError::UnexpectedEof),
            Token::Num => {
                self.text.emit(Opcode::IMM);
                self.text.emit_operand(self.lexer.token_val);
                self.advance();
                self.expr_type = Type::INT;
                Ok(())
            }
            Token::Str => {
                // The lexer already copied the body into the data segment;
                // adjacent literals appended to the same run of bytes, so
                // consuming them here is all the concatenation there is.
                self.text.emit(Opcode::IMM);
                self.text.emit_operand(self.lexer.token_val);
                self.advance();
                while self.lexer.token == Token::Str {
                    self.advance();
                }
                self.data.align_up();
                self.expr_type = Type::CHAR.ptr_to();
                Ok(())
            }
            Token::Sizeof => {
                self.advance();
                self.expect(Token::Lparen)?;
                let mut ty = Type::INT;
                if self.lexer.token == Token::Int {
                    self.advance();
                } else if self.lexer.token == Token::Char {
                    self.advance();
                    ty = Type::CHAR;
                }
                while self.lexer.token == Token::Mul {
                    self.advance();
                    ty = ty.ptr_to();
                }
                self.expect(Token::Rparen)?;
                self.text.emit(Opcode::IMM);
                self.text.emit_operand(ty.size());
                self.expr_type = Type::INT;
                Ok(())
            }
            Token::Id => {
                let id = self.lexer.cur_id;
                self.advance();
                if self.lexer.token == Token::Lparen {
                    self.advance();
                    self.function_call(id, line)
                } else {
                    self.variable_access(id, line)
                }
            }
            Token::Lparen => {
                self.advance();
                if self.lexer.token == Token::Int || self.lexer.token == Token::Char {
                    // C-style cast.
                    let mut ty = if self.lexer.token == Token::Int {
                        Type::INT
                    } else {
                        Type::CHAR
                    };
                    self.advance();
                    while self.lexer.token == Token::Mul {
                        self.advance();
                        ty = ty.ptr_to();
                    }
                    self.expect(Token::Rparen)?;
                    self.expression(Token::Inc)?;
                    self.expr_type = ty;
                } else {
                    self.expression(Token::Assign)?;
                    self.expect(Token::Rparen)?;
                }
                Ok(())
            }
            Token::Mul => {
                // Dereference: drop one level of indirection and load.
                self.advance();
                self.expression(Token::Inc)?;
                let ty = self
                    .expr_type
                    .pointee()
                    .ok_or(CompileError::BadDereference { line })?;
                self.load(ty);
                Ok(())
            }
            Token::And => {
                // Address-of: undo the load the operand just emitted.
                self.advance();
                self.expression(Token::Inc)?;
                if !self.text.pop_last_load() {
                    return Err(CompileError::BadAddressOf { line });
                }
                self.expr_type = self.expr_type.ptr_to();
                Ok(())
            }
            Token::Not => {
                self.advance();
                self.expression(Token::Inc)?;
                self.text.emit(Opcode::PUSH);
                self.text.emit(Opcode::IMM);
                self.text.emit_operand(0);
                self.text.emit(Opcode::EQ);
                self.expr_type = Type::INT;
                Ok(())
            }
            Token::Tilde => {
                self.advance();
                self.expression(Token::Inc)?;
                self.text.emit(Opcode::PUSH);
                self.text.emit(Opcode::IMM);
                self.text.emit_operand(-1);
                self.text.emit(Opcode::XOR);
                self.expr_type = Type::INT;
                Ok(())
            }
            Token::Add => {
                self.advance();
                self.expression(Token::Inc)?;
                self.expr_type = Type::INT;
                Ok(())
            }
            Token::Sub => {
                self.advance();
                if self.lexer.token == Token::Num {
                    self.text.emit(Opcode::IMM);
                    self.text.emit_operand(self.lexer.token_val.wrapping_neg());
                    self.advance();
                } else {
                    self.text.emit(Opcode::IMM);
                    self.text.emit_operand(-1);
                    self.text.emit(Opcode::PUSH);
                    self.expression(Token::Inc)?;
                    self.text.emit(Opcode::MUL);
                }
                self.expr_type = Type::INT;
                Ok(())
            }
            Token::Inc | Token::Dec => {
                let op = self.lexer.token;
                self.advance();
                self.expression(Token::Inc)?;
                let load = self
                    .text
                    .make_lvalue()
                    .ok_or(CompileError::BadIncrementTarget { line })?;
                self.text.emit(load);
                self.text.emit(Opcode::PUSH);
                self.text.emit(Opcode::IMM);
                self.text.emit_operand(self.expr_type.step());
                self.text.emit(if op == Token::Inc {
                    Opcode::ADD
                } else {
                    Opcode::SUB
                });
                self.store(self.expr_type);
                Ok(())
            }
            other => Err(CompileError::Internal {
                token: format!("{:?}", other),
                line,
            }),
        }
    }

    /// Arguments are pushed left to right; the callee addresses them from
    /// the frame base, and the caller's ADJ unwinds them.
    fn function_call(&mut self, id: usize, line: usize) -> Result<()> {
        let mut argc = 0i64;
        while self.lexer.token != Token::Rparen {
            if self.lexer.token == Token::Eof {
                return Err(CompileError::UnexpectedEof);
            }
            self.expression(Token::Assign)?;
            self.text.emit(Opcode::PUSH);
            argc += 1;
            if self.lexer.token == Token::Comma {
                self.advance();
            }
        }
        self.advance(); // ')'

        let sym = self.symbols.get(id);
        let (class, value, ty) = (sym.class, sym.value, sym.ty);
        match class {
            Class::Sys => {
                let op = Opcode::from_word(value).ok_or_else(|| CompileError::Internal {
                    token: format!("intrinsic {}", value),
                    line,
                })?;
                self.text.emit(op);
            }
            Class::Fun => {
                self.text.emit(Opcode::CALL);
                self.text.emit_operand(value);
            }
            _ => return Err(CompileError::BadFunctionCall { line }),
        }
        if argc > 0 {
            self.text.emit(Opcode::ADJ);
            self.text.emit_operand(argc);
        }
        self.expr_type = ty;
        Ok(())
    }

    fn variable_access(&mut self, id: usize, line: usize) -> Result<()> {
        let sym = self.symbols.get(id);
        let (class, value, ty) = (sym.class, sym.value, sym.ty);
        match class {
            Class::Num => {
                // Enum constant.
                self.text.emit(Opcode::IMM);
                self.text.emit_operand(value);
                self.expr_type = Type::INT;
                Ok(())
            }
            Class::Loc => {
                self.text.emit(Opcode::LEA);
                self.text.emit_operand(self.index_of_bp - value);
                self.load(ty);
                Ok(())
            }
            Class::Glo => {
                self.text.emit(Opcode::IMM);
                self.text.emit_operand(value);
                self.load(ty);
                Ok(())
            }
            _ => Err(CompileError::UndefinedVariable {
                name: self.name_of(id),
                line,
            }),
        }
    }

    /// Consume binary and postfix operators of at least `level` precedence.
    /// The token kind ordering from `Assign` upward is the precedence table.
    fn climb(&mut self, level: Token) -> Result<()> {
        while self.lexer.token >= level {
            let left = self.expr_type;
            let line = self.lexer.line;
            match self.lexer.token {
                Token::Assign => {
                    self.advance();
                    if self.text.make_lvalue().is_none() {
                        return Err(CompileError::BadLvalue { line });
                    }
                    self.expression(Token::Assign)?;
                    self.expr_type = left;
                    self.store(left);
                }
                Token::Cond => {
                    self.advance();
                    self.text.emit(Opcode::JZ);
                    let no_branch = self.text.reserve();
                    self.expression(Token::Assign)?;
                    self.expect(Token::Colon)?;
                    self.text.emit(Opcode::JMP);
                    let end = self.text.reserve();
                    self.text.patch(no_branch, self.text.pos());
                    self.expression(Token::Cond)?;
                    self.text.patch(end, self.text.pos());
                }
                Token::Lor => {
                    // Short-circuit: skip the right side when already true.
                    self.advance();
                    self.text.emit(Opcode::JNZ);
                    let end = self.text.reserve();
                    self.expression(Token::Lan)?;
                    self.text.patch(end, self.text.pos());
                    self.expr_type = Type::INT;
                }
                Token::Lan => {
                    self.advance();
                    self.text.emit(Opcode::JZ);
                    let end = self.text.reserve();
                    self.expression(Token::Or)?;
                    self.text.patch(end, self.text.pos());
                    self.expr_type = Type::INT;
                }
                Token::Or => self.binary_op(Opcode::OR, Token::Xor)?,
                Token::Xor => self.binary_op(Opcode::XOR, Token::And)?,
                Token::And => self.binary_op(Opcode::AND, Token::Eq)?,
                Token::Eq => self.binary_op(Opcode::EQ, Token::Lt)?,
                Token::Ne => self.binary_op(Opcode::NE, Token::Lt)?,
                Token::Lt => self.binary_op(Opcode::LT, Token::Shl)?,
                Token::Gt => self.binary_op(Opcode::GT, Token::Shl)?,
                Token::Le => self.binary_op(Opcode::LE, Token::Shl)?,
                Token::Ge => self.binary_op(Opcode::GE, Token::Shl)?,
                Token::Shl => self.binary_op(Opcode::SHL, Token::Add)?,
                Token::Shr => self.binary_op(Opcode::SHR, Token::Add)?,
                Token::Add => {
                    self.advance();
                    self.text.emit(Opcode::PUSH);
                    self.expression(Token::Mul)?;
                    if left.step() > 1 {
                        // Pointer arithmetic: scale the integer side up to
                        // the element width before adding.
                        self.text.emit(Opcode::PUSH);
                        self.text.emit(Opcode::IMM);
                        self.text.emit_operand(WORD_SIZE as i64);
                        self.text.emit(Opcode::MUL);
                    }
                    self.text.emit(Opcode::ADD);
                    self.expr_type = left;
                }
                Token::Sub => {
                    self.advance();
                    self.text.emit(Opcode::PUSH);
                    self.expression(Token::Mul)?;
                    if left.step() > 1 && self.expr_type == left {
                        // Pointer difference: subtract, then divide back
                        // down to an element count.
                        self.text.emit(Opcode::SUB);
                        self.text.emit(Opcode::PUSH);
                        self.text.emit(Opcode::IMM);
                        self.text.emit_operand(WORD_SIZE as i64);
                        self.text.emit(Opcode::DIV);
                        self.expr_type = Type::INT;
                    } else if left.step() > 1 {
                        self.text.emit(Opcode::PUSH);
                        self.text.emit(Opcode::IMM);
                        self.text.emit_operand(WORD_SIZE as i64);
                        self.text.emit(Opcode::MUL);
                        self.text.emit(Opcode::SUB);
                        self.expr_type = left;
                    } else {
                        self.text.emit(Opcode::SUB);
                        self.expr_type = left;
                    }
                }
                Token::Mul => self.binary_op(Opcode::MUL, Token::Inc)?,
                Token::Div => self.binary_op(Opcode::DIV, Token::Inc)?,
                Token::Mod => self.binary_op(Opcode::MOD, Token::Inc)?,
                Token::Inc | Token::Dec => {
                    // Postfix: store value +- step, then recover the old
                    // value in AX.
                    let op = self.lexer.token;
                    let load = self
                        .text
                        .make_lvalue()
                        .ok_or(CompileError::BadIncrementTarget { line })?;
                    self.text.emit(load);
                    self.text.emit(Opcode::PUSH);
                    self.text.emit(Opcode::IMM);
                    self.text.emit_operand(self.expr_type.step());
                    self.text.emit(if op == Token::Inc {
                        Opcode::ADD
                    } else {
                        Opcode::SUB
                    });
                    self.store(self.expr_type);
                    self.text.emit(Opcode::PUSH);
                    self.text.emit(Opcode::IMM);
                    self.text.emit_operand(self.expr_type.step());
                    self.text.emit(if op == Token::Inc {
                        Opcode::SUB
                    } else {
                        Opcode::ADD
                    });
                    self.advance();
                }
                Token::Brak => {
                    self.advance();
                    self.text.emit(Opcode::PUSH);
                    self.expression(Token::Assign)?;
                    self.expect(Token::Rbracket)?;
                    let element = left
                        .pointee()
                        .ok_or(CompileError::PointerExpected { line })?;
                    if left.step() > 1 {
                        self.text.emit(Opcode::PUSH);
                        self.text.emit(Opcode::IMM);
                        self.text.emit_operand(WORD_SIZE as i64);
                        self.text.emit(Opcode::MUL);
                    }
                    self.text.emit(Opcode::ADD);
                    self.load(element);
                }
                other => {
                    return Err(CompileError::Internal {
                        token: format!("{:?}", other),
                        line,
                    })
                }
            }
        }
        Ok(())
    }

    /// `PUSH; <right side at next level>; <op>`, yielding an int.
    fn binary_op(&mut self, op: Opcode, right_level: Token) -> Result<()> {
        self.advance();
        self.text.emit(Opcode::PUSH);
        self.expression(right_level)?;
        self.text.emit(op);
        self.expr_type = Type::INT;
        Ok(())
    }
}
