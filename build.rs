//! Renders `orion-ops.1` from the clap definitions into `OUT_DIR`.

use std::env;
use std::io::Write;

use camino::Utf8PathBuf;
use cap_std::{ambient_authority, fs_utf8::Dir};
use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut cargo = std::io::stdout().lock();
    for watched in ["build.rs", "src/cli/mod.rs"] {
        writeln!(cargo, "cargo:rerun-if-changed={watched}")?;
    }

    let out_dir = env::var("OUT_DIR").map(Utf8PathBuf::from).map_err(|err| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("OUT_DIR was not usable: {err}"),
        )
    })?;

    let mut page = Vec::new();
    Man::new(Cli::command()).render(&mut page)?;

    let dir = Dir::open_ambient_dir(&out_dir, ambient_authority())?;
    dir.write("orion-ops.1", &page)?;

    Ok(())
}
