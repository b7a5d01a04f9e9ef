//! The `unistore` command line tool.

fn main() -> anyhow::Result<()> {
    unistore_cli::cli::execute()
}
