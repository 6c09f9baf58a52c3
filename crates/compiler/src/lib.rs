//! Single-pass C-subset compiler for the microc VM.
//!
//! Compiles a restricted C dialect (int/char, pointers, enums, functions,
//! if/while, the full expression operator set) straight into a VM image in
//! one pass: the recursive-descent parser emits opcode words while it
//! descends, with no intermediate AST.
//!
//! # Example
//!
//! ```
//! use microc_compiler::compile;
//!
//! let image = compile("int main() { return 10 + 20; }").expect("failed to compile");
//! assert!(!image.text.is_empty());
//! ```
//!
//! # Pipeline
//!
//! 1. **Lexer** - classifies one token per call, interning identifiers into
//!    the symbol table and copying string literals into the data segment as
//!    it goes
//! 2. **Code generator** - recursive descent with precedence climbing,
//!    emitting into the text segment and back-patching forward branches
//!
//! The output [`Image`](microc_vm::Image) is ready for `microc_vm::Vm` to
//! execute.

pub mod codegen;
pub mod lexer;
pub mod segments;
pub mod symbols;

pub use codegen::{CodeGen, CompileError};
pub use lexer::{Lexer, Token};
pub use symbols::{Class, Symbol, SymbolTable, Type};

use microc_vm::Image;

pub type Result<T> = std::result::Result<T, CompileError>;

/// Compile a source file into an executable image.
///
/// This is the main entry point. It seeds the keyword and intrinsic names,
/// parses every global declaration, and fails on the first diagnostic.
///
/// # Errors
///
/// Returns an error if:
/// - A declaration, statement or expression is malformed
/// - A name is declared twice in one scope, or used undeclared
/// - No `main` function is defined
pub fn compile(source: &str) -> Result<Image> {
    CodeGen::new(source).compile()
}
