use sprechen_gateway::router::ApiDoc;
use utoipa::OpenApi;

/// Writes the gateway's OpenAPI document to `path`.
fn write_document(api_doc: utoipa::openapi::OpenApi, path: &str) -> anyhow::Result<()> {
    std::fs::write(path, api_doc.to_pretty_json()?)?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "openapi.json".to_string());
    write_document(ApiDoc::openapi(), &path)?;
    println!("OpenAPI document written to {path}");
    Ok(())
}
