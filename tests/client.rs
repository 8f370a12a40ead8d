
use async_trait::async_trait;
use ec2_query::{
    CreateImageRequest, CreateSecurityGroupRequest, DescribeImagesRequest,
    DescribeSecurityGroupsRequest, Ec2Client, Error, Filter, IpPermission, Parameter, PollConfig,
    Result, SecurityGroupRuleRequest, Transport,
};
use mocks::MockTransport;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn p(key: &str, value: &str) -> Parameter {
    Parameter::new(key, value)
}

fn client(transport: MockTransport) -> Ec2Client {
    Ec2Client::new(Arc::new(transport))
}

fn quick_poll() -> PollConfig {
    PollConfig {
        initial_delay: Duration::from_millis(1),
        interval: Duration::from_millis(5),
        deadline: Duration::from_millis(100),
    }
}

#[tokio::test]
async fn describe_images_decodes_typed_records() {
    let transport = MockTransport::new();
    transport
        .call
        .given((
            "DescribeImages".to_string(),
            vec![
                p("ImageId.1", "ami-1"),
                p("ImageId.2", "ami-2"),
                p("Owner.1", "self"),
            ],
        ))
        .will_return(Ok(json!({
            "imagesSet": { "item": [
                { "imageId": "ami-1", "imageState": "available", "isPublic": "false" },
                { "imageId": "ami-2", "imageState": "pending" }
            ]}
        })));

    let images = client(transport)
        .describe_images(DescribeImagesRequest {
            image_ids: vec!["ami-1".into(), "ami-2".into()],
            owners: vec!["self".into()],
            ..DescribeImagesRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(images.len(), 2);
    assert_eq!(images[0].image_id.as_deref(), Some("ami-1"));
    assert_eq!(images[0].is_public, Some(false));
    assert_eq!(images[1].image_state.as_deref(), Some("pending"));
}

#[tokio::test]
async fn describe_images_with_absent_set_returns_empty() {
    let transport = MockTransport::new();
    transport
        .call
        .given(("DescribeImages".to_string(), vec![p("ImageId.1", "ami-x")]))
        .will_return(Ok(json!({ "requestId": "r-1" })));

    let images = client(transport)
        .describe_images(DescribeImagesRequest {
            image_ids: vec!["ami-x".into()],
            ..DescribeImagesRequest::default()
        })
        .await
        .unwrap();
    assert!(images.is_empty());
}

#[tokio::test]
async fn deregister_image_reads_the_return_flag() {
    let transport = MockTransport::new();
    transport
        .call
        .given((
            "DeregisterImage".to_string(),
            vec![p("ImageId", "ami-old")],
        ))
        .will_return(Ok(json!({ "return": "true" })));
    assert!(client(transport).deregister_image("ami-old").await.unwrap());
}

#[tokio::test]
async fn authorize_ingress_encodes_the_permission_block() {
    let transport = MockTransport::new();
    transport
        .call
        .given((
            "AuthorizeSecurityGroupIngress".to_string(),
            vec![
                p("GroupId", "sg-1"),
                p("IpPermissions.1.IpProtocol", "tcp"),
                p("IpPermissions.1.FromPort", "22"),
                p("IpPermissions.1.ToPort", "23"),
                p("IpPermissions.1.IpRanges.1.CidrIp", "0.0.0.0/0"),
            ],
        ))
        .will_return(Ok(json!({ "return": "true" })));

    let granted = client(transport)
        .authorize_security_group_ingress(SecurityGroupRuleRequest {
            group_id: "sg-1".into(),
            permissions: vec![IpPermission {
                ip_protocol: "tcp".into(),
                from_port: Some(22),
                to_port: Some(23),
                ip_ranges: vec!["0.0.0.0/0".into()],
                group_ids: vec![],
            }],
        })
        .await
        .unwrap();
    assert!(granted);
}

#[tokio::test]
async fn missing_required_argument_never_reaches_the_wire() {
    // the mock would answer any call with a transport error; getting
    // MissingArgument back proves validation fired first
    let err = client(MockTransport::new())
        .create_image(CreateImageRequest {
            instance_id: String::new(),
            name: "my-image".into(),
            ..CreateImageRequest::default()
        })
        .await
        .unwrap_err();
    match err {
        Error::MissingArgument { option, operation } => {
            assert_eq!(option, "InstanceId");
            assert_eq!(operation, "CreateImage");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn create_security_group_returns_the_group_id() {
    let transport = MockTransport::new();
    transport
        .call
        .given((
            "CreateSecurityGroup".to_string(),
            vec![
                p("GroupName", "web"),
                p("GroupDescription", "front-end hosts"),
                p("VpcId", "vpc-1"),
            ],
        ))
        .will_return(Ok(json!({ "return": "true", "groupId": "sg-9" })));

    let group_id = client(transport)
        .create_security_group(CreateSecurityGroupRequest {
            group_name: "web".into(),
            description: "front-end hosts".into(),
            vpc_id: Some("vpc-1".into()),
        })
        .await
        .unwrap();
    assert_eq!(group_id, "sg-9");
}

#[tokio::test]
async fn create_route_table_decodes_the_single_record() {
    let transport = MockTransport::new();
    transport
        .call
        .given(("CreateRouteTable".to_string(), vec![p("VpcId", "vpc-1")]))
        .will_return(Ok(json!({
            "routeTable": {
                "routeTableId": "rtb-1",
                "vpcId": "vpc-1",
                "routeSet": { "item": {
                    "destinationCidrBlock": "10.0.0.0/16",
                    "gatewayId": "local",
                    "state": "active"
                }}
            }
        })));

    let table = client(transport).create_route_table("vpc-1").await.unwrap();
    assert_eq!(table.route_table_id.as_deref(), Some("rtb-1"));
    assert_eq!(table.routes.len(), 1);
    assert_eq!(table.routes[0].gateway_id.as_deref(), Some("local"));
}

#[tokio::test]
async fn purchase_resolves_into_the_full_record() {
    let transport = MockTransport::new();
    transport
        .call
        .given((
            "PurchaseReservedInstancesOffering".to_string(),
            vec![
                p("ReservedInstancesOfferingId", "off-1"),
                p("InstanceCount", "2"),
            ],
        ))
        .will_return(Ok(json!({ "reservedInstancesId": "ri-1" })));
    // the follow-up round trip the custom strategy is allowed
    transport
        .call
        .given((
            "DescribeReservedInstances".to_string(),
            vec![p("ReservedInstancesId.1", "ri-1")],
        ))
        .will_return(Ok(json!({
            "reservedInstancesSet": { "item": {
                "reservedInstancesId": "ri-1",
                "instanceType": "m1.large",
                "instanceCount": "2",
                "state": "active"
            }}
        })));

    let reserved = client(transport)
        .purchase_reserved_instances_offering("off-1", 2)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reserved.reserved_instances_id.as_deref(), Some("ri-1"));
    assert_eq!(reserved.instance_count, Some(2));
    assert_eq!(reserved.state.as_deref(), Some("active"));
}

#[tokio::test]
async fn transport_errors_are_forwarded_unchanged() {
    // no `given` scripted: every call fails at the mock transport
    let err = client(MockTransport::new())
        .describe_security_groups(DescribeSecurityGroupsRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport { .. }));
}

/// A transport whose describe responses stay empty for the first few calls,
/// mimicking read-after-write lag on a freshly created resource.
struct LaggingTransport {
    image_id: String,
    visible_after: usize,
    describes: AtomicUsize,
}

#[async_trait]
impl Transport for LaggingTransport {
    async fn call(&self, action: &str, _params: &[Parameter]) -> Result<Value> {
        match action {
            "CreateImage" => Ok(json!({ "imageId": self.image_id.clone() })),
            "DescribeImages" => {
                let n = self.describes.fetch_add(1, Ordering::SeqCst) + 1;
                if n >= self.visible_after {
                    Ok(json!({
                        "imagesSet": { "item": {
                            "imageId": self.image_id.clone(),
                            "imageState": "available"
                        }}
                    }))
                } else {
                    Ok(json!({ "requestId": "r-1" }))
                }
            }
            other => Ok(json!({ "unexpectedAction": other })),
        }
    }
}

#[tokio::test]
async fn create_image_then_wait_until_visible() {
    let transport = Arc::new(LaggingTransport {
        image_id: "ami-9".into(),
        visible_after: 3,
        describes: AtomicUsize::new(0),
    });
    let client = Ec2Client::with_poll_config(transport.clone(), quick_poll());

    let image_id = client
        .create_image(CreateImageRequest {
            instance_id: "i-1".into(),
            name: "nightly".into(),
            ..CreateImageRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(image_id, "ami-9");

    let image = client.wait_for_image(&image_id).await.unwrap();
    assert_eq!(image.image_id.as_deref(), Some("ami-9"));
    assert_eq!(transport.describes.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn spawned_wait_matches_the_blocking_result() {
    let transport = Arc::new(LaggingTransport {
        image_id: "ami-9".into(),
        visible_after: 2,
        describes: AtomicUsize::new(0),
    });
    let client = Ec2Client::with_poll_config(transport, quick_poll());

    let handle = client.spawn_wait_for_image("ami-9");
    let outcome = handle.wait().await.unwrap();
    match outcome {
        ec2_query::PollOutcome::Found(image) => {
            assert_eq!(image.image_id.as_deref(), Some("ami-9"))
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn wait_for_image_times_out_on_an_invisible_resource() {
    let transport = Arc::new(LaggingTransport {
        image_id: "ami-9".into(),
        visible_after: usize::MAX,
        describes: AtomicUsize::new(0),
    });
    let client = Ec2Client::with_poll_config(transport, quick_poll());

    let err = client.wait_for_image("ami-9").await.unwrap_err();
    match err {
        Error::Timeout { resource_id, .. } => assert_eq!(resource_id, "ami-9"),
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn release_address_requires_some_identifier() {
    let err = client(MockTransport::new())
        .release_address(None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MissingArgument { .. }));
}

#[tokio::test]
async fn acl_entry_fields_ride_at_the_top_level() {
    let transport = MockTransport::new();
    transport
        .call
        .given((
            "CreateNetworkAclEntry".to_string(),
            vec![
                p("NetworkAclId", "acl-1"),
                p("RuleNumber", "100"),
                p("Protocol", "6"),
                p("RuleAction", "allow"),
                p("Egress", "false"),
                p("CidrBlock", "0.0.0.0/0"),
                p("PortRange.From", "443"),
                p("PortRange.To", "443"),
            ],
        ))
        .will_return(Ok(json!({ "return": "true" })));

    let created = client(transport)
        .create_network_acl_entry(
            "acl-1",
            ec2_query::NetworkAclEntry {
                rule_number: 100,
                protocol: "6".into(),
                rule_action: "allow".into(),
                egress: false,
                cidr_block: "0.0.0.0/0".into(),
                port_from: Some(443),
                port_to: Some(443),
            },
        )
        .await
        .unwrap();
    assert!(created);
}

#[tokio::test]
async fn filters_ride_alongside_other_arguments() {
    let transport = MockTransport::new();
    transport
        .call
        .given((
            "DescribeSecurityGroups".to_string(),
            vec![
                p("GroupId.1", "sg-1"),
                p("Filter.1.Name", "vpc-id"),
                p("Filter.1.Value.1", "vpc-1"),
            ],
        ))
        .will_return(Ok(json!({
            "securityGroupInfo": { "item": { "groupId": "sg-1", "groupName": "web" } }
        })));

    let groups = client(transport)
        .describe_security_groups(DescribeSecurityGroupsRequest {
            group_ids: vec!["sg-1".into()],
            filters: vec![Filter::new("vpc-id", vec!["vpc-1".into()])],
            ..DescribeSecurityGroupsRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].group_name.as_deref(), Some("web"));
}
