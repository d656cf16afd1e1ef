use clap::Parser;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = palaver::cli::Args::parse();
    palaver::cli::run(args).await
}
