fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &[
                "proto/tencentcloud/gse/grpcsdk/game_server_grpc_sdk.proto",
                "proto/tencentcloud/gse/grpcsdk/gse_grpc_sdk.proto",
            ],
            &["proto"],
        )?;

    println!("cargo:rerun-if-changed=proto/tencentcloud/gse/grpcsdk/game_server_grpc_sdk.proto");
    println!("cargo:rerun-if-changed=proto/tencentcloud/gse/grpcsdk/gse_grpc_sdk.proto");
    println!("cargo:rerun-if-changed=proto");

    Ok(())
}
