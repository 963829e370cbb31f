// Purpose: Frontend module hub that wires lexer/parser/printer/diagnostics together.
// Inputs/Outputs: Exposes gs source handling used by the loader and the rewriter.
// Invariants: Public frontend API should remain a thin composition over specialized modules.
// Gotchas: The parser is structural: declaration bodies stay raw source, so the printer
// must never be asked to reformat below the declaration level.

pub mod ast;
pub mod diagnostic;
pub mod lexer;
pub mod parser;
pub mod printer;
