// Purpose: Define crate-level module surface for the busybox builder and tooling components.
// Inputs/Outputs: Re-exports internal modules for the binary, tests, and library consumers.
// Invariants: Public module boundaries should remain stable for internal callers.
// Gotchas: Keep module wiring consistent with the src/main.rs entry path.

pub mod bb;
pub mod cli;
pub mod frontend;
pub mod pkg;
