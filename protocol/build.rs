fn main() {
    protobuf_codegen::Codegen::new()
        .pure()
        .cargo_out_dir("generated")
        .input("src/protos/telemetry.proto")
        .include("src/protos")
        .run_from_script();
}
