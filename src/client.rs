//! The client surface: one method per API action.
//!
//! Each method assembles wire parameters, issues the call through the
//! [`Transport`], and decodes the response through the [`ActionRegistry`]
//! built at construction time. Creation calls whose results lag behind
//! read-after-write visibility get poller-backed `wait_for_*` companions.

use crate::error::{self, Result};
use crate::params::{
    ArgumentSet, BlockDeviceMapping, DhcpConfiguration, Filter, IpPermission,
    NetworkAclEntry, ParamList, Parameter, SECURITY_GROUP_ALIASES,
};
use crate::poll::{self, PollConfig, PollHandle};
use crate::registry::{ActionRegistry, BoxFuture, DecodeStrategy, Outcome};
use crate::types::{
    self, Address, DhcpOptions, Image, ReservedInstances, Resource, ResourceKind, RouteTable,
    SecurityGroup,
};
use crate::Transport;
use serde_json::Value;
use std::sync::Arc;

/// Client over an EC2 Query endpoint.
///
/// Cloning is cheap; clones share the transport and the registry.
#[derive(Clone)]
pub struct Ec2Client {
    transport: Arc<dyn Transport>,
    registry: Arc<ActionRegistry>,
    poll_config: PollConfig,
}

impl Ec2Client {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_poll_config(transport, PollConfig::default())
    }

    pub fn with_poll_config(transport: Arc<dyn Transport>, poll_config: PollConfig) -> Self {
        Ec2Client {
            transport,
            registry: Arc::new(build_registry()),
            poll_config,
        }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    async fn call(&self, action: &'static str, params: ParamList) -> Result<Outcome> {
        let raw = self.transport.call(action, params.as_slice()).await?;
        self.registry
            .dispatch(action, &raw, self.transport.as_ref())
            .await
    }

    // ---- images ----

    pub async fn describe_images(&self, req: DescribeImagesRequest) -> Result<Vec<Image>> {
        let mut args = ArgumentSet::new();
        args.list("ImageId", req.image_ids);
        args.list("Owner", req.owners);
        args.list("ExecutableBy", req.executable_by);
        args.filters(req.filters);
        let params = args.encode("DescribeImages", &[])?;
        let outcome = self.call("DescribeImages", params).await?;
        collect(outcome, "DescribeImages", "images", Resource::into_image)
    }

    /// Registers a new image from a running instance and returns its id.
    /// The image is not necessarily visible to describe calls yet; see
    /// [`Ec2Client::wait_for_image`].
    pub async fn create_image(&self, req: CreateImageRequest) -> Result<String> {
        let mut args = ArgumentSet::new();
        args.scalar("InstanceId", req.instance_id);
        args.scalar("Name", req.name);
        if let Some(description) = req.description {
            args.scalar("Description", description);
        }
        if let Some(no_reboot) = req.no_reboot {
            args.boolean("NoReboot", no_reboot);
        }
        let mut params = ParamList::new();
        args.encode_into("CreateImage", &["InstanceId", "Name"], &mut params)?;
        params.fragment_list("BlockDeviceMapping", &req.block_device_mappings);
        let outcome = self.call("CreateImage", params).await?;
        require_field(outcome, "CreateImage", "an imageId")
    }

    pub async fn copy_image(&self, req: CopyImageRequest) -> Result<String> {
        let mut args = ArgumentSet::new();
        args.scalar("SourceRegion", req.source_region);
        args.scalar("SourceImageId", req.source_image_id);
        if let Some(name) = req.name {
            args.scalar("Name", name);
        }
        if let Some(description) = req.description {
            args.scalar("Description", description);
        }
        let params = args.encode("CopyImage", &["SourceRegion", "SourceImageId"])?;
        let outcome = self.call("CopyImage", params).await?;
        require_field(outcome, "CopyImage", "an imageId")
    }

    pub async fn deregister_image(&self, image_id: &str) -> Result<bool> {
        let mut args = ArgumentSet::new();
        args.scalar("ImageId", image_id);
        let params = args.encode("DeregisterImage", &["ImageId"])?;
        self.call("DeregisterImage", params)
            .await?
            .flag("DeregisterImage")
    }

    async fn find_image(&self, image_id: &str) -> Result<Option<Image>> {
        let images = self
            .describe_images(DescribeImagesRequest {
                image_ids: vec![image_id.to_string()],
                ..DescribeImagesRequest::default()
            })
            .await?;
        Ok(images.into_iter().next())
    }

    /// Blocks until a just-created image is visible to describe calls, or
    /// the consistency deadline elapses.
    pub async fn wait_for_image(&self, image_id: &str) -> Result<Image> {
        let client = self.clone();
        let id = image_id.to_string();
        poll::wait_for(image_id, &self.poll_config, move || {
            let client = client.clone();
            let id = id.clone();
            async move { client.find_image(&id).await }
        })
        .await
    }

    /// Polls for a just-created image on a background task. The returned
    /// handle can be awaited later or cancelled.
    pub fn spawn_wait_for_image(&self, image_id: &str) -> PollHandle<Image> {
        let client = self.clone();
        let id = image_id.to_string();
        poll::spawn_wait(image_id, self.poll_config.clone(), move || {
            let client = client.clone();
            let id = id.clone();
            async move { client.find_image(&id).await }
        })
    }

    // ---- addresses ----

    pub async fn describe_addresses(&self, filters: Vec<Filter>) -> Result<Vec<Address>> {
        let mut args = ArgumentSet::new();
        args.filters(filters);
        let params = args.encode("DescribeAddresses", &[])?;
        let outcome = self.call("DescribeAddresses", params).await?;
        collect(
            outcome,
            "DescribeAddresses",
            "addresses",
            Resource::into_address,
        )
    }

    /// Acquires an elastic IP and returns its public address.
    pub async fn allocate_address(&self, domain: Option<String>) -> Result<String> {
        let mut args = ArgumentSet::new();
        if let Some(domain) = domain {
            args.scalar("Domain", domain);
        }
        let params = args.encode("AllocateAddress", &[])?;
        let outcome = self.call("AllocateAddress", params).await?;
        require_field(outcome, "AllocateAddress", "a publicIp")
    }

    /// Associates an address with an instance. VPC associations return an
    /// association id; classic ones return nothing.
    pub async fn associate_address(
        &self,
        req: AssociateAddressRequest,
    ) -> Result<Option<String>> {
        let mut args = ArgumentSet::new();
        args.scalar("InstanceId", req.instance_id);
        if let Some(public_ip) = req.public_ip {
            args.scalar("PublicIp", public_ip);
        }
        if let Some(allocation_id) = req.allocation_id {
            args.scalar("AllocationId", allocation_id);
        }
        let params = args.encode("AssociateAddress", &["InstanceId"])?;
        self.call("AssociateAddress", params)
            .await?
            .field("AssociateAddress")
    }

    pub async fn release_address(
        &self,
        public_ip: Option<String>,
        allocation_id: Option<String>,
    ) -> Result<bool> {
        let mut args = ArgumentSet::new();
        match (public_ip, allocation_id) {
            (None, None) => {
                return error::MissingArgument {
                    option: "PublicIp",
                    operation: "ReleaseAddress",
                }
                .fail()
            }
            (public_ip, allocation_id) => {
                if let Some(public_ip) = public_ip {
                    args.scalar("PublicIp", public_ip);
                }
                if let Some(allocation_id) = allocation_id {
                    args.scalar("AllocationId", allocation_id);
                }
            }
        }
        let params = args.encode("ReleaseAddress", &[])?;
        self.call("ReleaseAddress", params)
            .await?
            .flag("ReleaseAddress")
    }

    // ---- security groups ----

    pub async fn describe_security_groups(
        &self,
        req: DescribeSecurityGroupsRequest,
    ) -> Result<Vec<SecurityGroup>> {
        let mut args = ArgumentSet::new();
        args.list("GroupId", req.group_ids);
        args.list("GroupName", req.group_names);
        args.filters(req.filters);
        let params = args.encode("DescribeSecurityGroups", &[])?;
        let outcome = self.call("DescribeSecurityGroups", params).await?;
        collect(
            outcome,
            "DescribeSecurityGroups",
            "security groups",
            Resource::into_security_group,
        )
    }

    /// Creates a security group and returns its id. Like images, a fresh
    /// group may lag read-after-write; see
    /// [`Ec2Client::wait_for_security_group`].
    pub async fn create_security_group(
        &self,
        req: CreateSecurityGroupRequest,
    ) -> Result<String> {
        let mut args = ArgumentSet::with_aliases(SECURITY_GROUP_ALIASES);
        args.scalar("GroupName", req.group_name);
        args.scalar("GroupDescription", req.description);
        if let Some(vpc_id) = req.vpc_id {
            args.scalar("VpcId", vpc_id);
        }
        let params = args.encode(
            "CreateSecurityGroup",
            &["GroupName", "GroupDescription"],
        )?;
        let outcome = self.call("CreateSecurityGroup", params).await?;
        require_field(outcome, "CreateSecurityGroup", "a groupId")
    }

    pub async fn delete_security_group(&self, group_id: &str) -> Result<bool> {
        let mut args = ArgumentSet::new();
        args.scalar("GroupId", group_id);
        let params = args.encode("DeleteSecurityGroup", &["GroupId"])?;
        self.call("DeleteSecurityGroup", params)
            .await?
            .flag("DeleteSecurityGroup")
    }

    async fn find_security_group(&self, group_id: &str) -> Result<Option<SecurityGroup>> {
        let groups = self
            .describe_security_groups(DescribeSecurityGroupsRequest {
                group_ids: vec![group_id.to_string()],
                ..DescribeSecurityGroupsRequest::default()
            })
            .await?;
        Ok(groups.into_iter().next())
    }

    /// Blocks until a just-created security group is visible.
    pub async fn wait_for_security_group(&self, group_id: &str) -> Result<SecurityGroup> {
        let client = self.clone();
        let id = group_id.to_string();
        poll::wait_for(group_id, &self.poll_config, move || {
            let client = client.clone();
            let id = id.clone();
            async move { client.find_security_group(&id).await }
        })
        .await
    }

    pub async fn authorize_security_group_ingress(
        &self,
        req: SecurityGroupRuleRequest,
    ) -> Result<bool> {
        let params = encode_rule_change("AuthorizeSecurityGroupIngress", req)?;
        self.call("AuthorizeSecurityGroupIngress", params)
            .await?
            .flag("AuthorizeSecurityGroupIngress")
    }

    pub async fn revoke_security_group_ingress(
        &self,
        req: SecurityGroupRuleRequest,
    ) -> Result<bool> {
        let params = encode_rule_change("RevokeSecurityGroupIngress", req)?;
        self.call("RevokeSecurityGroupIngress", params)
            .await?
            .flag("RevokeSecurityGroupIngress")
    }

    // ---- route tables ----

    pub async fn describe_route_tables(
        &self,
        req: DescribeRouteTablesRequest,
    ) -> Result<Vec<RouteTable>> {
        let mut args = ArgumentSet::new();
        args.list("RouteTableId", req.route_table_ids);
        args.filters(req.filters);
        let params = args.encode("DescribeRouteTables", &[])?;
        let outcome = self.call("DescribeRouteTables", params).await?;
        collect(
            outcome,
            "DescribeRouteTables",
            "route tables",
            Resource::into_route_table,
        )
    }

    pub async fn create_route_table(&self, vpc_id: &str) -> Result<RouteTable> {
        let mut args = ArgumentSet::new();
        args.scalar("VpcId", vpc_id);
        let params = args.encode("CreateRouteTable", &["VpcId"])?;
        let outcome = self.call("CreateRouteTable", params).await?;
        require_one(
            outcome,
            "CreateRouteTable",
            "a routeTable record",
            Resource::into_route_table,
        )
    }

    // ---- network ACLs ----

    pub async fn create_network_acl_entry(
        &self,
        network_acl_id: &str,
        entry: NetworkAclEntry,
    ) -> Result<bool> {
        let mut args = ArgumentSet::new();
        args.scalar("NetworkAclId", network_acl_id);
        let mut params = ParamList::new();
        args.encode_into("CreateNetworkAclEntry", &["NetworkAclId"], &mut params)?;
        // ACL rule fields ride at the top level, not under a list prefix
        params.fragment("", &entry);
        self.call("CreateNetworkAclEntry", params)
            .await?
            .flag("CreateNetworkAclEntry")
    }

    // ---- DHCP options ----

    pub async fn create_dhcp_options(
        &self,
        configurations: Vec<DhcpConfiguration>,
    ) -> Result<DhcpOptions> {
        if configurations.is_empty() {
            return error::MissingArgument {
                option: "DhcpConfiguration",
                operation: "CreateDhcpOptions",
            }
            .fail();
        }
        let mut params = ParamList::new();
        params.fragment_list("DhcpConfiguration", &configurations);
        let outcome = self.call("CreateDhcpOptions", params).await?;
        require_one(
            outcome,
            "CreateDhcpOptions",
            "a dhcpOptions record",
            Resource::into_dhcp_options,
        )
    }

    // ---- reserved instances ----

    pub async fn describe_reserved_instances(
        &self,
        req: DescribeReservedInstancesRequest,
    ) -> Result<Vec<ReservedInstances>> {
        let mut args = ArgumentSet::new();
        args.list("ReservedInstancesId", req.reserved_instances_ids);
        args.filters(req.filters);
        let params = args.encode("DescribeReservedInstances", &[])?;
        let outcome = self.call("DescribeReservedInstances", params).await?;
        collect(
            outcome,
            "DescribeReservedInstances",
            "reserved instances",
            Resource::into_reserved_instances,
        )
    }

    /// Purchases a reserved instances offering and resolves the purchase
    /// into the full record with one follow-up describe call.
    pub async fn purchase_reserved_instances_offering(
        &self,
        offering_id: &str,
        instance_count: i64,
    ) -> Result<Option<ReservedInstances>> {
        let mut args = ArgumentSet::new();
        args.scalar("ReservedInstancesOfferingId", offering_id);
        args.scalar("InstanceCount", instance_count.to_string());
        let params = args.encode(
            "PurchaseReservedInstancesOffering",
            &["ReservedInstancesOfferingId"],
        )?;
        let outcome = self
            .call("PurchaseReservedInstancesOffering", params)
            .await?;
        match outcome.one("PurchaseReservedInstancesOffering")? {
            Some(record) => match record.into_reserved_instances() {
                Some(reserved) => Ok(Some(reserved)),
                None => error::UnexpectedResponse {
                    action: "PurchaseReservedInstancesOffering",
                    expected: "a reserved instances record",
                }
                .fail(),
            },
            None => Ok(None),
        }
    }
}

fn encode_rule_change(
    operation: &'static str,
    req: SecurityGroupRuleRequest,
) -> Result<ParamList> {
    if req.permissions.is_empty() {
        return error::MissingArgument {
            option: "IpPermissions",
            operation,
        }
        .fail();
    }
    let mut args = ArgumentSet::new();
    args.scalar("GroupId", req.group_id);
    let mut params = ParamList::new();
    args.encode_into(operation, &["GroupId"], &mut params)?;
    params.fragment_list("IpPermissions", &req.permissions);
    Ok(params)
}

/// Unwraps a `Many` outcome into a concrete record list.
fn collect<T>(
    outcome: Outcome,
    action: &'static str,
    expected: &'static str,
    convert: fn(Resource) -> Option<T>,
) -> Result<Vec<T>> {
    let records = outcome.many(action)?;
    let mut out = Vec::with_capacity(records.len());
    for record in records {
        match convert(record) {
            Some(typed) => out.push(typed),
            None => return error::UnexpectedResponse { action, expected }.fail(),
        }
    }
    Ok(out)
}

/// Unwraps a `Field` outcome that a creation call must carry.
fn require_field(outcome: Outcome, action: &'static str, expected: &'static str) -> Result<String> {
    match outcome.field(action)? {
        Some(value) => Ok(value),
        None => error::UnexpectedResponse { action, expected }.fail(),
    }
}

/// Unwraps a `One` outcome that a creation call must carry.
fn require_one<T>(
    outcome: Outcome,
    action: &'static str,
    expected: &'static str,
    convert: fn(Resource) -> Option<T>,
) -> Result<T> {
    match outcome.one(action)?.and_then(convert) {
        Some(typed) => Ok(typed),
        None => error::UnexpectedResponse { action, expected }.fail(),
    }
}

/// Binds every supported action to its decode strategy. Later bindings for
/// the same action would replace earlier ones, loudly.
fn build_registry() -> ActionRegistry {
    let mut registry = ActionRegistry::new();

    // images
    registry.register(
        "DescribeImages",
        DecodeStrategy::FetchItems {
            list_key: "imagesSet",
            target: ResourceKind::Image,
        },
    );
    registry.register("CreateImage", DecodeStrategy::FieldExtract("imageId"));
    registry.register("CopyImage", DecodeStrategy::FieldExtract("imageId"));
    registry.register("DeregisterImage", DecodeStrategy::Boolean);

    // addresses
    registry.register(
        "DescribeAddresses",
        DecodeStrategy::FetchItems {
            list_key: "addressesSet",
            target: ResourceKind::Address,
        },
    );
    registry.register("AllocateAddress", DecodeStrategy::FieldExtract("publicIp"));
    registry.register(
        "AssociateAddress",
        DecodeStrategy::FieldExtract("associationId"),
    );
    registry.register("ReleaseAddress", DecodeStrategy::Boolean);

    // security groups
    registry.register(
        "DescribeSecurityGroups",
        DecodeStrategy::FetchItems {
            list_key: "securityGroupInfo",
            target: ResourceKind::SecurityGroup,
        },
    );
    registry.register(
        "CreateSecurityGroup",
        DecodeStrategy::FieldExtract("groupId"),
    );
    registry.register("DeleteSecurityGroup", DecodeStrategy::Boolean);
    registry.register("AuthorizeSecurityGroupIngress", DecodeStrategy::Boolean);
    registry.register("RevokeSecurityGroupIngress", DecodeStrategy::Boolean);

    // route tables
    registry.register(
        "DescribeRouteTables",
        DecodeStrategy::FetchItems {
            list_key: "routeTableSet",
            target: ResourceKind::RouteTable,
        },
    );
    registry.register(
        "CreateRouteTable",
        DecodeStrategy::FetchOne {
            object_key: "routeTable",
            target: ResourceKind::RouteTable,
        },
    );

    // network ACLs
    registry.register("CreateNetworkAclEntry", DecodeStrategy::Boolean);

    // DHCP options
    registry.register(
        "CreateDhcpOptions",
        DecodeStrategy::FetchOne {
            object_key: "dhcpOptions",
            target: ResourceKind::DhcpOptions,
        },
    );

    // reserved instances
    registry.register(
        "DescribeReservedInstances",
        DecodeStrategy::FetchItems {
            list_key: "reservedInstancesSet",
            target: ResourceKind::ReservedInstances,
        },
    );
    registry.register(
        "PurchaseReservedInstancesOffering",
        DecodeStrategy::Custom(decode_purchase),
    );

    registry
}

/// Resolves a purchase response into the full reserved-instances record
/// with a single follow-up describe call.
fn decode_purchase<'a>(
    raw: &'a Value,
    transport: &'a dyn Transport,
) -> BoxFuture<'a, Result<Outcome>> {
    Box::pin(async move {
        let id = match raw.get("reservedInstancesId").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                return error::UnexpectedResponse {
                    action: "PurchaseReservedInstancesOffering",
                    expected: "a reservedInstancesId",
                }
                .fail()
            }
        };
        let resp = transport
            .call(
                "DescribeReservedInstances",
                &[Parameter::new("ReservedInstancesId.1", id)],
            )
            .await?;
        let items = types::item_values(resp.get("reservedInstancesSet"));
        match items.first() {
            Some(item) => Ok(Outcome::One(Some(
                ResourceKind::ReservedInstances.decode(item)?,
            ))),
            None => Ok(Outcome::One(None)),
        }
    })
}

/// Arguments for [`Ec2Client::describe_images`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescribeImagesRequest {
    pub image_ids: Vec<String>,
    pub owners: Vec<String>,
    pub executable_by: Vec<String>,
    pub filters: Vec<Filter>,
}

/// Arguments for [`Ec2Client::create_image`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateImageRequest {
    pub instance_id: String,
    pub name: String,
    pub description: Option<String>,
    pub no_reboot: Option<bool>,
    pub block_device_mappings: Vec<BlockDeviceMapping>,
}

/// Arguments for [`Ec2Client::copy_image`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyImageRequest {
    pub source_region: String,
    pub source_image_id: String,
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Arguments for [`Ec2Client::associate_address`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssociateAddressRequest {
    pub instance_id: String,
    pub public_ip: Option<String>,
    pub allocation_id: Option<String>,
}

/// Arguments for [`Ec2Client::describe_security_groups`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescribeSecurityGroupsRequest {
    pub group_ids: Vec<String>,
    pub group_names: Vec<String>,
    pub filters: Vec<Filter>,
}

/// Arguments for [`Ec2Client::create_security_group`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateSecurityGroupRequest {
    pub group_name: String,
    pub description: String,
    pub vpc_id: Option<String>,
}

/// Arguments for the ingress authorize/revoke pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityGroupRuleRequest {
    pub group_id: String,
    pub permissions: Vec<IpPermission>,
}

/// Arguments for [`Ec2Client::describe_route_tables`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescribeRouteTablesRequest {
    pub route_table_ids: Vec<String>,
    pub filters: Vec<Filter>,
}

/// Arguments for [`Ec2Client::describe_reserved_instances`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescribeReservedInstancesRequest {
    pub reserved_instances_ids: Vec<String>,
    pub filters: Vec<Filter>,
}
