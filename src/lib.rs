/*!
Core plumbing for an EC2 Query-API client.

Three pieces do the real work here:

- parameter encoding: heterogeneous call arguments become the flat,
  dot-indexed key/value pairs the Query wire format wants (`ImageId.1`,
  `Filter.2.Value.1`, `IpPermissions.1.IpRanges.1.CidrIp`);
- a registry of per-action decode strategies that turns raw responses into
  booleans, scalars, single records, or record lists;
- an eventual-consistency poller that bridges the gap between a creation
  call returning an id and the resource becoming visible to describes.

HTTP and request signing live behind the [`Transport`] trait so any signed
request stack can plug in, and so tests can mock the wire at the level of
what is sent and received instead of mocking an HTTP client.
!*/

#![deny(rust_2018_idioms)]

mod client;
mod error;
mod params;
mod poll;
mod registry;
mod types;

pub use crate::client::{
    AssociateAddressRequest, CopyImageRequest, CreateImageRequest, CreateSecurityGroupRequest,
    DescribeImagesRequest, DescribeReservedInstancesRequest, DescribeRouteTablesRequest,
    DescribeSecurityGroupsRequest, Ec2Client, SecurityGroupRuleRequest,
};
pub use crate::error::{Error, Result};
pub use crate::params::{
    AliasTable, ArgValue, ArgumentSet, BlockDeviceMapping, DhcpConfiguration, EbsBlockDevice,
    Filter, IpPermission, NetworkAclEntry, ParamList, Parameter, QueryFragment, NO_ALIASES,
    SECURITY_GROUP_ALIASES,
};
pub use crate::poll::{spawn_wait, wait_for, PollConfig, PollHandle, PollOutcome};
pub use crate::registry::{ActionRegistry, BoxFuture, CustomDecode, DecodeStrategy, Outcome};
pub use crate::types::{
    Address, DhcpOptions, Image, IpPermissionView, IpRange, ReservedInstances, Resource,
    ResourceKind, Route, RouteTable, SecurityGroup, Tag,
};

use async_trait::async_trait;
use serde_json::Value;

/// Issues signed calls against a Query endpoint.
///
/// The implementation owns HTTP and signature details; this crate only
/// hands it an action name with encoded parameters and expects the decoded
/// (post-XML) response body back. Failures surface as
/// [`Error::Transport`] and are forwarded to callers unchanged.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, action: &str, params: &[Parameter]) -> Result<Value>;
}
