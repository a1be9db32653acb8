//! Small filesystem helpers shared by the binary.

use std::fs::DirBuilder;
use std::io::ErrorKind;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;

use anyhow::{bail, Error};

/// Create the dump output directory with owner-only permissions. An already
/// existing directory is fine; anything else is a startup failure.
pub fn create_output_dir(path: &Path) -> Result<(), Error> {
    match DirBuilder::new().mode(0o700).create(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(err) => bail!("unable to create `{}': {}", path.display(), err),
    }
}
