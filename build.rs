/// Build script
/// - Injects app metadata from tauri.conf.json into Rust code
/// - Runs tauri-build for the desktop shell (resources, capabilities, context)
use std::fs;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=tauri.conf.json");

    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let conf = fs::read_to_string(manifest_dir.join("tauri.conf.json")).unwrap_or_default();

    let name = extract_json_field(&conf, "productName")
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
    let version = env!("CARGO_PKG_VERSION");

    // Normalize name for file system use (lowercase, alphanumeric + hyphens only)
    let app_id = name
        .to_lowercase()
        .replace(' ', "-")
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-')
        .collect::<String>();

    println!("cargo:rustc-env=APP_NAME={}", name);
    println!("cargo:rustc-env=APP_VERSION={}", version);
    println!("cargo:rustc-env=APP_ID={}", app_id);

    #[cfg(feature = "desktop")]
    tauri_build::build();
}

// Simple JSON field extractor (avoids serde dependency in build script)
fn extract_json_field(json: &str, field: &str) -> Option<String> {
    let pattern = format!(r#""{}""#, field);
    let start = json.find(&pattern)?;
    let colon_pos = json[start..].find(':')?;
    let after_colon = json[start + colon_pos + 1..].trim_start();
    if !after_colon.starts_with('"') {
        return None;
    }
    let end_quote = after_colon[1..].find('"')?;
    Some(after_colon[1..end_quote + 1].to_string())
}
