use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = bi_api::Args::parse();

	bi_api::run(args).await
}
