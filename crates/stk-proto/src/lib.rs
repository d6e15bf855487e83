// Re-export compiled gRPC protos.
//
// Both directions of the GSE contract live in one package: the agent-facing
// SDK service the sidecar calls, and the callback service the agent calls.

pub mod tencentcloud {
    pub mod gse {
        pub mod grpcsdk {
            tonic::include_proto!("tencentcloud.gse.grpcsdk");
        }
    }
}

pub use tencentcloud::gse::grpcsdk;
