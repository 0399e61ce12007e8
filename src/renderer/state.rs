//! 资源状态跟踪
//!
//! 屏障由调用方声明 before/after，核心不会自动推断状态。调试构建中，
//! `ResourceStateTracker` 维护“资源 → 最后已知状态”的影子表：
//! - 每个转换声明的 before 必须与跟踪到的状态一致
//! - Pass 作用域结束时，作用域内转换过的资源必须回到进入时的状态
//!
//! 发布构建默认关闭校验，所有操作退化为空操作。

use std::collections::HashMap;

use tracing::warn;

use crate::core::error::{GraphicsError, Result};
use crate::gfx::types::{RawResourceId, ResourceState};

#[derive(Debug)]
struct TrackedResource {
    label: String,
    state: ResourceState,
}

#[derive(Debug)]
struct PassScope {
    name: String,
    /// 作用域内第一次转换前的状态
    entry: HashMap<RawResourceId, ResourceState>,
}

/// 资源状态影子表
#[derive(Debug)]
pub struct ResourceStateTracker {
    enabled: bool,
    resources: HashMap<RawResourceId, TrackedResource>,
    scopes: Vec<PassScope>,
}

impl ResourceStateTracker {
    /// 调试构建启用校验
    pub fn new() -> Self {
        Self::with_validation(cfg!(debug_assertions))
    }

    pub fn with_validation(enabled: bool) -> Self {
        Self {
            enabled,
            resources: HashMap::new(),
            scopes: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 登记新资源及其初始状态
    pub fn register(&mut self, resource: RawResourceId, label: &str, state: ResourceState) {
        if !self.enabled {
            return;
        }
        self.resources.insert(resource, TrackedResource { label: label.to_string(), state });
    }

    /// 资源销毁后移除
    pub fn forget(&mut self, resource: RawResourceId) {
        if !self.enabled {
            return;
        }
        self.resources.remove(&resource);
        for scope in &mut self.scopes {
            scope.entry.remove(&resource);
        }
    }

    /// 跟踪到的状态
    pub fn state(&self, resource: RawResourceId) -> Option<ResourceState> {
        self.resources.get(&resource).map(|r| r.state)
    }

    /// 校验并应用一次转换
    pub fn transition(
        &mut self,
        resource: RawResourceId,
        before: ResourceState,
        after: ResourceState,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let Some(tracked) = self.resources.get_mut(&resource) else {
            return Err(GraphicsError::InvalidTransition {
                resource: resource.to_string(),
                declared: before.name().to_string(),
                tracked: "untracked".to_string(),
            }
            .into());
        };

        if tracked.state != before {
            warn!(
                resource = %tracked.label,
                declared = before.name(),
                tracked = tracked.state.name(),
                "Transition does not match tracked state"
            );
            return Err(GraphicsError::InvalidTransition {
                resource: tracked.label.clone(),
                declared: before.name().to_string(),
                tracked: tracked.state.name().to_string(),
            }
            .into());
        }

        tracked.state = after;
        if let Some(scope) = self.scopes.last_mut() {
            scope.entry.entry(resource).or_insert(before);
        }
        Ok(())
    }

    /// 进入一个 Pass 作用域
    pub fn begin_scope(&mut self, name: &str) {
        if !self.enabled {
            return;
        }
        self.scopes.push(PassScope { name: name.to_string(), entry: HashMap::new() });
    }

    /// 离开 Pass 作用域，检查转换是否成对
    pub fn end_scope(&mut self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let Some(scope) = self.scopes.pop() else {
            return Ok(());
        };

        let mut unbalanced: Vec<String> = scope
            .entry
            .iter()
            .filter_map(|(id, entry_state)| {
                let tracked = self.resources.get(id)?;
                (tracked.state != *entry_state).then(|| {
                    format!("{} ({} -> {})", tracked.label, entry_state.name(), tracked.state.name())
                })
            })
            .collect();

        if unbalanced.is_empty() {
            return Ok(());
        }

        unbalanced.sort();
        Err(GraphicsError::UnbalancedTransitions { pass: scope.name, resources: unbalanced }.into())
    }

    pub fn tracked_count(&self) -> usize {
        self.resources.len()
    }
}

impl Default for ResourceStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::RenderError;

    const A: RawResourceId = RawResourceId(1);
    const B: RawResourceId = RawResourceId(2);

    fn tracker() -> ResourceStateTracker {
        let mut tracker = ResourceStateTracker::with_validation(true);
        tracker.register(A, "albedo", ResourceState::PixelShaderResource);
        tracker.register(B, "normal", ResourceState::PixelShaderResource);
        tracker
    }

    #[test]
    fn test_matching_transition() {
        let mut tracker = tracker();
        tracker
            .transition(A, ResourceState::PixelShaderResource, ResourceState::RenderTarget)
            .unwrap();
        assert_eq!(tracker.state(A), Some(ResourceState::RenderTarget));
    }

    #[test]
    fn test_mismatched_before_state() {
        let mut tracker = tracker();
        let err = tracker
            .transition(A, ResourceState::RenderTarget, ResourceState::PixelShaderResource)
            .unwrap_err();
        match err {
            RenderError::Graphics(GraphicsError::InvalidTransition { resource, declared, tracked }) => {
                assert_eq!(resource, "albedo");
                assert_eq!(declared, "RenderTarget");
                assert_eq!(tracked, "PixelShaderResource");
            }
            other => panic!("unexpected error: {other}"),
        }
        // 失败的转换不改变状态
        assert_eq!(tracker.state(A), Some(ResourceState::PixelShaderResource));
    }

    #[test]
    fn test_untracked_resource() {
        let mut tracker = tracker();
        assert!(tracker
            .transition(RawResourceId(99), ResourceState::Common, ResourceState::CopyDest)
            .is_err());
    }

    #[test]
    fn test_balanced_scope() {
        let mut tracker = tracker();
        tracker.begin_scope("GBuffer");
        for id in [A, B] {
            tracker.transition(id, ResourceState::PixelShaderResource, ResourceState::RenderTarget).unwrap();
        }
        for id in [A, B] {
            tracker.transition(id, ResourceState::RenderTarget, ResourceState::PixelShaderResource).unwrap();
        }
        tracker.end_scope().unwrap();
    }

    #[test]
    fn test_unbalanced_scope() {
        let mut tracker = tracker();
        tracker.begin_scope("Light");
        tracker.transition(A, ResourceState::PixelShaderResource, ResourceState::RenderTarget).unwrap();
        tracker.transition(B, ResourceState::PixelShaderResource, ResourceState::RenderTarget).unwrap();
        tracker.transition(B, ResourceState::RenderTarget, ResourceState::PixelShaderResource).unwrap();

        match tracker.end_scope().unwrap_err() {
            RenderError::Graphics(GraphicsError::UnbalancedTransitions { pass, resources }) => {
                assert_eq!(pass, "Light");
                assert_eq!(resources.len(), 1);
                assert!(resources[0].starts_with("albedo"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_disabled_tracker_accepts_everything() {
        let mut tracker = ResourceStateTracker::with_validation(false);
        tracker.begin_scope("Sky");
        tracker.transition(A, ResourceState::Common, ResourceState::RenderTarget).unwrap();
        tracker.end_scope().unwrap();
        assert_eq!(tracker.tracked_count(), 0);
    }
}
