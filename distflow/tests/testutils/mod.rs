//! Test utilities for distflow integration tests
//!
//! - TestCluster: several flow servers in one process, connected through the
//!   in-process transport
//! - plan helpers: small processor specs and setup requests

#![allow(dead_code)]

pub mod test_cluster;
