use clap::Parser;

fn main() -> anyhow::Result<()> {
    let cli = pyctx::cli::Cli::parse();
    pyctx::init(cli.verbose);
    pyctx::cli::run(cli)
}
