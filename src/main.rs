use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match opsmend::cli::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(opsmend::errors::get_exit_code(&e))
        }
    }
}
