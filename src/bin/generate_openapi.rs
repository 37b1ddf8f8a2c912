//! Writes the history API's OpenAPI document.
//!
//! Usage:
//!   cargo run --bin generate_openapi > openapi.json
//!   cargo run --bin generate_openapi -- --output openapi.json

use std::{env, fs, io::Write, path::PathBuf, process::ExitCode};

use irrigation_service::api::handlers::ApiDoc;
use utoipa::OpenApi;

fn main() -> ExitCode {
    let json = match ApiDoc::openapi().to_pretty_json() {
        Ok(json) => json,
        Err(e) => {
            eprintln!("Failed to serialise OpenAPI document: {e}");
            return ExitCode::FAILURE;
        }
    };

    let output: Option<PathBuf> = env::args()
        .skip_while(|arg| arg != "--output")
        .nth(1)
        .map(PathBuf::from);

    let written = match &output {
        Some(path) => fs::write(path, &json).map(|()| {
            eprintln!("OpenAPI document written to {}", path.display());
        }),
        None => std::io::stdout().write_all(json.as_bytes()),
    };

    if let Err(e) = written {
        let target = output.map_or_else(|| "stdout".to_owned(), |p| p.display().to_string());
        eprintln!("Error writing to {target}: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
