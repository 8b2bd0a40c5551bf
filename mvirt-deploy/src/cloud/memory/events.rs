use async_trait::async_trait;

use super::{not_found, MemoryCloud};
use crate::cloud::events::{EventTargetInfo, Events, RuleInfo};
use crate::cloud::{CloudResult, TagScope};

#[async_trait]
impl Events for MemoryCloud {
    async fn describe_rule(&self, name: &str) -> CloudResult<Option<RuleInfo>> {
        let state = self.state().await;
        Ok(state.rules.get(name).map(|r| RuleInfo {
            tags: state.tags_of(TagScope::Events, &r.arn),
            ..r.clone()
        }))
    }

    async fn put_rule(&self, request: &RuleInfo) -> CloudResult<String> {
        let mut state = self.state().await;
        state.record(format!("PutRule {}", request.name));
        let arn = state.arn("events", &format!("rule/{}", request.name));
        let existed = state.rules.contains_key(&request.name);
        state.rules.insert(
            request.name.clone(),
            RuleInfo {
                arn: arn.clone(),
                ..request.clone()
            },
        );
        if !existed {
            state.set_tags(TagScope::Events, &arn, &request.tags);
        }
        Ok(arn)
    }

    async fn list_targets_by_rule(&self, rule: &str) -> CloudResult<Vec<EventTargetInfo>> {
        let state = self.state().await;
        if !state.rules.contains_key(rule) {
            return Err(not_found("ResourceNotFoundException", rule));
        }
        Ok(state.rule_targets.get(rule).cloned().unwrap_or_default())
    }

    async fn put_targets(&self, rule: &str, targets: &[EventTargetInfo]) -> CloudResult<()> {
        let mut state = self.state().await;
        if !state.rules.contains_key(rule) {
            return Err(not_found("ResourceNotFoundException", rule));
        }
        state.record(format!("PutTargets {}", rule));
        let existing = state.rule_targets.entry(rule.to_string()).or_default();
        for target in targets {
            existing.retain(|t| t.id != target.id);
            existing.push(target.clone());
        }
        Ok(())
    }
}
