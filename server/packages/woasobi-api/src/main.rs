fn main() {
    if let Err(err) = woasobi_api::cli::run_woasobi_api() {
        tracing::error!(error = %err, "woasobi-api failed");
        std::process::exit(1);
    }
}
