//! services/api/src/bin/openapi.rs
//!
//! Writes the OpenAPI 3.0 document of the ledger API to disk.
//!
//! Usage: `openapi [OUTPUT]`, defaulting to `openapi.json`.

use api_lib::web::ApiDoc;
use utoipa::OpenApi;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "openapi.json".to_string());

    let api_doc = ApiDoc::openapi();
    let operations = api_doc.paths.paths.len();
    std::fs::write(&path, api_doc.to_pretty_json()?)?;
    println!("Wrote {} paths to {}", operations, path);
    Ok(())
}
