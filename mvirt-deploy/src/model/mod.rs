//! Resource model shared by every task kind.
//!
//! A task is identified by its [`TaskKey`] (kind plus logical name). Tasks
//! reference each other through [`Link`]s, which hold the referenced key and,
//! once the referenced task has run, its provider-assigned ID.

pub mod diff;
pub mod inventory;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Tags are a mapping from string to string with unique keys.
pub type Tags = BTreeMap<String, String>;

/// The provider's display-name tag.
pub const NAME_TAG: &str = "Name";

macro_rules! kinds {
    ($($kind:ident => $hcl:literal, $cfn:literal;)*) => {
        /// Every resource kind the reconciler knows about.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum Kind {
            $($kind,)*
        }

        impl Kind {
            pub const ALL: &'static [Kind] = &[$(Kind::$kind,)*];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Kind::$kind => stringify!($kind),)*
                }
            }

            /// Resource type used in the HCL manifest.
            pub fn hcl_type(&self) -> &'static str {
                match self {
                    $(Kind::$kind => $hcl,)*
                }
            }

            /// Resource type used in the JSON stack template.
            pub fn cfn_type(&self) -> &'static str {
                match self {
                    $(Kind::$kind => $cfn,)*
                }
            }
        }

        impl FromStr for Kind {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $(stringify!($kind) => Ok(Kind::$kind),)*
                    other => Err(format!("unknown resource kind: {}", other)),
                }
            }
        }
    };
}

kinds! {
    Vpc => "aws_vpc", "AWS::EC2::VPC";
    DhcpOptions => "aws_vpc_dhcp_options", "AWS::EC2::DHCPOptions";
    VpcDhcpOptionsAssociation => "aws_vpc_dhcp_options_association", "AWS::EC2::VPCDHCPOptionsAssociation";
    Subnet => "aws_subnet", "AWS::EC2::Subnet";
    InternetGateway => "aws_internet_gateway", "AWS::EC2::InternetGateway";
    EgressOnlyInternetGateway => "aws_egress_only_internet_gateway", "AWS::EC2::EgressOnlyInternetGateway";
    ElasticIp => "aws_eip", "AWS::EC2::EIP";
    NatGateway => "aws_nat_gateway", "AWS::EC2::NatGateway";
    RouteTable => "aws_route_table", "AWS::EC2::RouteTable";
    RouteTableAssociation => "aws_route_table_association", "AWS::EC2::SubnetRouteTableAssociation";
    Route => "aws_route", "AWS::EC2::Route";
    SecurityGroup => "aws_security_group", "AWS::EC2::SecurityGroup";
    SecurityGroupRule => "aws_security_group_rule", "AWS::EC2::SecurityGroupIngress";
    SshKey => "aws_key_pair", "AWS::EC2::KeyPair";
    EbsVolume => "aws_ebs_volume", "AWS::EC2::Volume";
    Instance => "aws_instance", "AWS::EC2::Instance";
    VolumeAttachment => "aws_volume_attachment", "AWS::EC2::VolumeAttachment";
    LaunchConfiguration => "aws_launch_configuration", "AWS::AutoScaling::LaunchConfiguration";
    LaunchTemplate => "aws_launch_template", "AWS::EC2::LaunchTemplate";
    AutoscalingGroup => "aws_autoscaling_group", "AWS::AutoScaling::AutoScalingGroup";
    AutoscalingLifecycleHook => "aws_autoscaling_lifecycle_hook", "AWS::AutoScaling::LifecycleHook";
    ClassicLoadBalancer => "aws_elb", "AWS::ElasticLoadBalancing::LoadBalancer";
    NetworkLoadBalancer => "aws_lb", "AWS::ElasticLoadBalancingV2::LoadBalancer";
    TargetGroup => "aws_lb_target_group", "AWS::ElasticLoadBalancingV2::TargetGroup";
    IamRole => "aws_iam_role", "AWS::IAM::Role";
    IamRolePolicy => "aws_iam_role_policy", "AWS::IAM::Policy";
    IamInstanceProfile => "aws_iam_instance_profile", "AWS::IAM::InstanceProfile";
    IamInstanceProfileRole => "aws_iam_instance_profile_role", "AWS::IAM::InstanceProfileRole";
    IamOidcProvider => "aws_iam_openid_connect_provider", "AWS::IAM::OIDCProvider";
    DnsZone => "aws_route53_zone", "AWS::Route53::HostedZone";
    DnsName => "aws_route53_record", "AWS::Route53::RecordSet";
    SqsQueue => "aws_sqs_queue", "AWS::SQS::Queue";
    EventBridgeRule => "aws_cloudwatch_event_rule", "AWS::Events::Rule";
    EventBridgeTarget => "aws_cloudwatch_event_target", "AWS::Events::Target";
}

impl Kind {
    /// Kinds whose updates are modelled as new, timestamp-named versions.
    pub fn is_versioned(&self) -> bool {
        matches!(self, Kind::LaunchConfiguration | Kind::LaunchTemplate)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique identity of a task within a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey {
    pub kind: Kind,
    pub name: String,
}

impl TaskKey {
    pub fn new(kind: Kind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

impl FromStr for TaskKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, name) = s
            .split_once('/')
            .ok_or_else(|| format!("expected Kind/name, got {:?}", s))?;
        if name.is_empty() {
            return Err(format!("empty name in reference {:?}", s));
        }
        Ok(TaskKey::new(kind.parse()?, name))
    }
}

/// Reference from one task to another.
///
/// In an inventory document a link is written as `"Kind/name"`. The ID is
/// filled in by the reconciler once the referenced task has run, or by a
/// finder when it maps a provider ID back to a reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Link {
    pub kind: Kind,
    pub name: String,
    pub id: Option<String>,
}

impl Link {
    pub fn new(kind: Kind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            id: None,
        }
    }

    /// A link observed on the provider side, known only by ID.
    pub fn found(kind: Kind, id: impl Into<String>) -> Self {
        Self {
            kind,
            name: String::new(),
            id: Some(id.into()),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.kind, self.name.clone())
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

impl TryFrom<String> for Link {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let key: TaskKey = s.parse()?;
        Ok(Link::new(key.kind, key.name))
    }
}

impl From<Link> for String {
    fn from(link: Link) -> Self {
        link.key().to_string()
    }
}

/// How the reconciler treats a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Lifecycle {
    /// Create or update the resource to match the desired record.
    #[default]
    Sync,
    /// Skip the task entirely.
    Ignore,
    /// Require the resource to exist; never modify it.
    ExistsOnly,
    /// Managed outside this run; verify presence and read its ID only.
    Shared,
}

impl Lifecycle {
    /// Whether the reconciler may create or modify the resource.
    pub fn is_managed(&self) -> bool {
        matches!(self, Lifecycle::Sync)
    }
}

/// Identity and lifecycle carried by every task record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// Logical name, unique per kind within the run.
    pub name: String,
    /// Provider-assigned ID; set by the finder or after creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub lifecycle: Lifecycle,
}

impl Meta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn shared(name: impl Into<String>, id: Option<String>) -> Self {
        Self {
            name: name.into(),
            id,
            lifecycle: Lifecycle::Shared,
        }
    }
}

/// Attributes a task publishes to its dependents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attr {
    Id,
    Arn,
    Name,
    DnsName,
    HostedZoneId,
    PublicIp,
    Url,
}

impl Attr {
    /// Attribute name in the HCL manifest.
    pub fn hcl_name(&self) -> &'static str {
        match self {
            Attr::Id => "id",
            Attr::Arn => "arn",
            Attr::Name => "name",
            Attr::DnsName => "dns_name",
            Attr::HostedZoneId => "zone_id",
            Attr::PublicIp => "public_ip",
            Attr::Url => "url",
        }
    }

    /// Attribute name for `Fn::GetAtt` in the JSON stack, `None` for `Ref`.
    pub fn cfn_name(&self) -> Option<&'static str> {
        match self {
            Attr::Id => None,
            Attr::Arn => Some("Arn"),
            Attr::Name => Some("Name"),
            Attr::DnsName => Some("DNSName"),
            Attr::HostedZoneId => Some("CanonicalHostedZoneID"),
            Attr::PublicIp => Some("PublicIp"),
            Attr::Url => Some("QueueUrl"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.hcl_name()
    }
}
