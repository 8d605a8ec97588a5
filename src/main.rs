use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    reportweave::cli::run().await
}
