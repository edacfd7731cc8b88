use anyhow::Result;

use pcsc_uid_logger::cli::commands::run_cli;

fn main() -> Result<()> {
    run_cli()
}
