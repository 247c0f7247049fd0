use anyhow::Result;

fn main() -> Result<()> {
    codejudge::cli::run()
}
