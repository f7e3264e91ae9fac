/// Builds the gRPC client and server code for `ordermgt.proto` using
/// `tonic-prost-build`.
///
/// The descriptor set is written next to the generated code so the server can
/// register it with the reflection service.
///
/// # Files and Paths
///
/// - Proto file: `proto/ordermgt.proto`
/// - Includes: `proto/`
/// - Descriptor: `$OUT_DIR/ordermgt_descriptor.bin`
///
/// # Panics
///
/// Panics if code generation fails, which aborts the build with the protoc
/// diagnostics.
use std::env;
use std::path::PathBuf;
fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("ordermgt_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/ordermgt.proto"], &["proto"])
        .unwrap();
}
