//! 资源竞技场
//!
//! 资源包装对象存放在 `Arena<K, T>` 中，外部只持有带版本的 slotmap 键。
//! 槽位被回收后版本递增，旧句柄的访问会得到 `StaleHandle` 错误，而不是悬空引用。

use slotmap::{new_key_type, Key, SlotMap};

use crate::core::error::{GraphicsError, Result};

new_key_type! {
    /// 顶点、索引与结构化缓冲区句柄
    pub struct BufferHandle;

    /// 每帧常量缓冲区句柄
    pub struct ConstantBufferHandle;

    /// 采样纹理句柄
    pub struct TextureHandle;

    pub struct DepthBufferHandle;

    /// 渲染目标句柄
    pub struct RenderTextureHandle;
}

/// 带类型键的竞技场
pub struct Arena<K: Key, T> {
    kind: &'static str,
    slots: SlotMap<K, T>,
}

impl<K: Key, T> Arena<K, T> {
    /// `kind` 用于错误信息
    pub fn new(kind: &'static str) -> Self {
        Self { kind, slots: SlotMap::with_key() }
    }

    pub fn insert(&mut self, value: T) -> K {
        self.slots.insert(value)
    }

    fn stale(&self) -> GraphicsError {
        GraphicsError::StaleHandle { kind: self.kind }
    }

    pub fn get(&self, handle: K) -> Result<&T> {
        self.slots.get(handle).ok_or_else(|| self.stale().into())
    }

    pub fn get_mut(&mut self, handle: K) -> Result<&mut T> {
        let stale = self.stale();
        self.slots.get_mut(handle).ok_or_else(|| stale.into())
    }

    /// 取出值并使句柄失效
    pub fn remove(&mut self, handle: K) -> Result<T> {
        let stale = self.stale();
        self.slots.remove(handle).ok_or_else(|| stale.into())
    }

    pub fn contains(&self, handle: K) -> bool {
        self.slots.contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// 取出所有值（关闭时使用）
    pub fn drain(&mut self) -> Vec<T> {
        self.slots.drain().map(|(_, value)| value).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut arena: Arena<TextureHandle, _> = Arena::new("texture");
        let a = arena.insert("albedo");
        let b = arena.insert("normal");
        assert_eq!(*arena.get(a).unwrap(), "albedo");
        assert_eq!(*arena.get(b).unwrap(), "normal");
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_stale_handle_detected() {
        let mut arena: Arena<BufferHandle, _> = Arena::new("buffer");
        let old = arena.insert(1u32);
        assert_eq!(arena.remove(old).unwrap(), 1);

        // 槽位被复用，版本不同
        let new = arena.insert(2u32);
        assert_ne!(new, old);

        let err = arena.get(old).unwrap_err();
        assert_eq!(err.to_string(), "Graphics error: Stale buffer handle");
        assert!(arena.remove(old).is_err());
        assert!(arena.get_mut(old).is_err());
        assert_eq!(*arena.get(new).unwrap(), 2);
    }

    #[test]
    fn test_null_handle_is_stale() {
        let arena: Arena<DepthBufferHandle, u32> = Arena::new("depth buffer");
        assert!(!arena.contains(DepthBufferHandle::null()));
        assert!(arena.get(DepthBufferHandle::default()).is_err());
    }

    #[test]
    fn test_drain_invalidates_everything() {
        let mut arena: Arena<RenderTextureHandle, _> = Arena::new("render texture");
        let handles: Vec<_> = (0..3).map(|i| arena.insert(i)).collect();
        let mut drained = arena.drain();
        drained.sort();
        assert_eq!(drained, vec![0, 1, 2]);
        assert!(arena.is_empty());
        assert!(handles.iter().all(|h| !arena.contains(*h)));
    }
}
