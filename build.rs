//! Build script for generating the Fabric gateway client from Protocol Buffer definitions.

const PROTOS: &[&str] = &[
    "proto/common/common.proto",
    "proto/msp/identities.proto",
    "proto/peer/chaincode.proto",
    "proto/peer/proposal.proto",
    "proto/peer/proposal_response.proto",
    "proto/peer/transaction.proto",
    "proto/gateway/gateway.proto",
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Tell Cargo to re-run if proto files change
    println!("cargo:rerun-if-changed=proto");

    tonic_build::configure()
        .build_server(false)
        .compile_protos(PROTOS, &["proto"])?;

    Ok(())
}
