//! Generated gRPC message and service bindings for the judge ingest RPC
//! surface, compiled from `proto/judge.proto` by `tonic_build` in
//! `build.rs`.

tonic::include_proto!("judge");
