// Purpose: Package/module model root: manifests, checksum files, and the loader.
// Inputs/Outputs: Re-exports package workflow components used by the busybox core.
// Invariants: Public pkg API should keep loading and manifest boundaries explicit.
// Gotchas: Avoid cyclic dependencies with the bb module when extending this surface.

pub mod load;
pub mod modfile;
pub mod suggest;
pub mod sumfile;
