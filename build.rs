//! Generates man pages for `mct` into the build output directory: `mct.1`
//! for the top-level command and `mct-<subcommand>.1` for each subcommand.

use std::env;
use std::io::{self, Write};

use camino::Utf8PathBuf;
use cap_std::{ambient_authority, fs_utf8::Dir};
use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = io::stdout();
    for watched in ["build.rs", "src/cli/mod.rs"] {
        writeln!(stdout, "cargo:rerun-if-changed={watched}")?;
    }

    let out_dir = env::var("OUT_DIR")
        .map(Utf8PathBuf::from)
        .map_err(|err| io::Error::new(io::ErrorKind::NotFound, format!("OUT_DIR: {err}")))?;
    let pages = Dir::open_ambient_dir(&out_dir, ambient_authority())?;

    let command = Cli::command();
    pages.write("mct.1", render(Man::new(command.clone()))?)?;
    for subcommand in command.get_subcommands() {
        let title = format!("mct-{}", subcommand.get_name());
        let page = render(Man::new(subcommand.clone()).title(title.clone()))?;
        pages.write(format!("{title}.1"), page)?;
    }

    Ok(())
}

fn render(man: Man) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    man.render(&mut buffer)?;
    Ok(buffer)
}
