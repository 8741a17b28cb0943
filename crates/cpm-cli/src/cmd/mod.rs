pub mod context;
pub mod init;
pub mod install;
pub mod publish;
pub mod run;
pub mod search;
pub mod tree;

use cpm_core::Rejection;

/// Process exit status for a failed command: the taxonomy code when the
/// failure came from the core, 1 otherwise.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<Rejection>())
        .and_then(|r| u8::try_from(r.exit_code()).ok())
        .unwrap_or(1)
}
