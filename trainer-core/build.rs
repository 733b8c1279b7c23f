fn main() {
    let proto_file = "../proto/trainer.proto";
    let proto_dir = "../proto";

    // Rerun if proto file changes
    println!("cargo:rerun-if-changed={}", proto_file);

    // Use the vendored protoc so the build does not depend on a system install.
    std::env::set_var(
        "PROTOC",
        protoc_bin_vendored::protoc_bin_path().expect("no vendored protoc for this platform"),
    );

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&[proto_file], &[proto_dir])
        .expect("Failed to compile trainer.proto");
}
