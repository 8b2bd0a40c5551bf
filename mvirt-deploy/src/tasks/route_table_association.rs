//! Explicit association of a subnet with a route table.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{check_required, found_meta, link_id, opt_link_id, properties, single};
use crate::cloud::{Cloud, Filter};
use crate::error::Result;
use crate::impl_diff;
use crate::model::{Attr, Kind, Link, Meta};
use crate::reconciler::{Resource, RunContext};
use crate::target::{ApiTarget, HclBlock, HclTarget, JsonTarget};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteTableAssociation {
    #[serde(flatten)]
    pub meta: Meta,
    pub route_table: Option<Link>,
    pub subnet: Option<Link>,
}

impl_diff!(RouteTableAssociation { route_table, subnet });

#[async_trait]
impl Resource for RouteTableAssociation {
    const KIND: Kind = Kind::RouteTableAssociation;

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    fn links(&self) -> Vec<&Link> {
        self.route_table.iter().chain(self.subnet.iter()).collect()
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        self.route_table
            .iter_mut()
            .chain(self.subnet.iter_mut())
            .collect()
    }

    /// A subnet has at most one explicit association, so the subnet
    /// identifies it.
    async fn find(&self, _ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Option<Self>> {
        let Some(subnet_id) = opt_link_id(&self.subnet) else {
            return Ok(None);
        };
        let tables = cloud
            .compute()
            .describe_route_tables(&Filter::default())
            .await?;
        let associations: Vec<_> = tables
            .into_iter()
            .flat_map(|t| t.associations)
            .filter(|a| a.subnet_id == subnet_id)
            .collect();
        let Some(association) = single(&self.task_key(), associations)? else {
            return Ok(None);
        };
        Ok(Some(RouteTableAssociation {
            meta: found_meta(&self.meta, &association.id),
            route_table: Some(Link::found(Kind::RouteTable, association.route_table_id)),
            subnet: Some(Link::found(Kind::Subnet, association.subnet_id)),
        }))
    }

    fn check_changes(_actual: Option<&Self>, desired: &Self, _changes: &Self) -> Result<()> {
        check_required(
            &desired.task_key(),
            &[
                ("RouteTable", desired.route_table.is_some()),
                ("Subnet", desired.subnet.is_some()),
            ],
        )
    }

    async fn render_api(
        target: &ApiTarget,
        _ctx: &RunContext<'_>,
        _actual: Option<&Self>,
        desired: &mut Self,
        _changes: &Self,
    ) -> Result<()> {
        let key = desired.task_key();
        let table_id = link_id(&key, "RouteTable", &desired.route_table)?;
        let subnet_id = link_id(&key, "Subnet", &desired.subnet)?;
        let id = target
            .cloud()
            .compute()
            .associate_route_table(&table_id, &subnet_id)
            .await?;
        desired.meta.id = Some(id);
        Ok(())
    }

    async fn render_hcl(target: &HclTarget, ctx: &RunContext<'_>, desired: &Self) -> Result<()> {
        let body = HclBlock::new()
            .set_opt(
                "route_table_id",
                desired.route_table.as_ref().map(|l| ctx.hcl_ref(l, Attr::Id)),
            )
            .set_opt("subnet_id", desired.subnet.as_ref().map(|l| ctx.hcl_ref(l, Attr::Id)));
        target
            .render_resource(Self::KIND, &desired.meta.name, body)
            .await
    }

    async fn render_json(
        target: &JsonTarget,
        ctx: &RunContext<'_>,
        desired: &Self,
    ) -> Result<()> {
        let props = properties(json!({
            "RouteTableId": desired.route_table.as_ref().map(|l| ctx.json_ref(l, Attr::Id)),
            "SubnetId": desired.subnet.as_ref().map(|l| ctx.json_ref(l, Attr::Id)),
        }));
        target
            .render_resource(Self::KIND, &desired.meta.name, props)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cloud::MemoryCloud;
    use crate::reconciler::TaskSet;
    use crate::tasks::testing::apply;
    use crate::tasks::{RouteTable, Subnet, Vpc};

    fn tasks(table: &str) -> TaskSet {
        let mut tasks = TaskSet::new();
        tasks
            .add(Vpc {
                meta: Meta::new("main"),
                cidr: Some("10.0.0.0/16".into()),
                ..Vpc::default()
            })
            .unwrap();
        tasks
            .add(Subnet {
                meta: Meta::new("a"),
                vpc: Some(Link::new(Kind::Vpc, "main")),
                cidr: Some("10.0.1.0/24".into()),
                ..Subnet::default()
            })
            .unwrap();
        for name in ["public", "private"] {
            tasks
                .add(RouteTable {
                    meta: Meta::new(name),
                    vpc: Some(Link::new(Kind::Vpc, "main")),
                    ..RouteTable::default()
                })
                .unwrap();
        }
        tasks
            .add(RouteTableAssociation {
                meta: Meta::new("a"),
                route_table: Some(Link::new(Kind::RouteTable, table)),
                subnet: Some(Link::new(Kind::Subnet, "a")),
            })
            .unwrap();
        tasks
    }

    #[tokio::test]
    async fn test_reassociates_on_table_change() {
        let cloud = Arc::new(MemoryCloud::new());
        apply(&cloud, &mut tasks("public")).await.unwrap();
        assert!(apply(&cloud, &mut tasks("public")).await.unwrap().is_unchanged());

        let mut moved = tasks("private");
        apply(&cloud, &mut moved).await.unwrap();
        let private_id = moved
            .id_of(&crate::model::TaskKey::new(Kind::RouteTable, "private"))
            .unwrap();
        let tables = cloud
            .compute()
            .describe_route_tables(&Filter::default())
            .await
            .unwrap();
        for table in tables {
            let expected = usize::from(table.id == private_id);
            assert_eq!(table.associations.len(), expected);
        }
    }
}
