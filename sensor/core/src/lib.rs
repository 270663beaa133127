//! Value types shared by the sensor's entity index and its callers.
//!
//! Everything here is plain data with structural equality so that it can be
//! used as a map key and copied out of the index without sharing references.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod container;
mod endpoint;
mod id;
mod lookup;

pub use self::{
    container::ContainerMetadata,
    endpoint::{Endpoint, ParseEndpointError, ParseProtocolError, Protocol, TargetInfo},
    id::{ContainerId, DeploymentId},
    lookup::{Entity, LookupResult},
};
pub use std::net::IpAddr;
