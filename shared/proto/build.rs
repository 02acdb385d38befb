fn main() -> Result<(), Box<dyn std::error::Error>> {
    // use the vendored protoc unless the environment already provides one
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_protos(&["proto/sessionoffload.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/sessionoffload.proto");
    Ok(())
}
