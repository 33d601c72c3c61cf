//! Fabric gateway protocol messages, generated from the vendored `proto/`
//! subset of `fabric-protos` by the build script.

pub mod common {
    tonic::include_proto!("common");
}

pub mod msp {
    tonic::include_proto!("msp");
}

/// Peer messages; the upstream protobuf package is `protos`.
pub mod peer {
    tonic::include_proto!("protos");
}

pub mod gateway {
    tonic::include_proto!("gateway");
}

// Generated gateway code names the peer package by its protobuf name.
use peer as protos;
