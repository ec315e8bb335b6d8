fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Prefer a system protoc, fall back to the vendored binary.
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    println!("cargo:rerun-if-changed=proto/geodb.proto");

    tonic_prost_build::configure()
        .build_client(true)
        .build_server(true)
        .type_attribute(".api", "#[derive(serde::Serialize, serde::Deserialize)]")
        .compile_protos(&["proto/geodb.proto"], &["proto"])?;

    Ok(())
}
