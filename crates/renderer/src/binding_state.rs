//! Resource bindings staged on a command recorder.
//!
//! Bindings are keyed by `(set, binding, array element)`. A binding stays
//! dirty until a descriptor flush consumes its set; a set is dirty while any
//! of its bindings is.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use ash::vk;
use lumen_rhi::buffer::Buffer;
use lumen_rhi::image::ImageView;
use lumen_rhi::sampler::Sampler;

/// One bound resource: a buffer range, or an image view with an optional
/// sampler.
#[derive(Clone, Default)]
pub struct ResourceInfo {
    pub dirty: bool,
    pub buffer: Option<Arc<Buffer>>,
    pub offset: vk::DeviceSize,
    pub range: vk::DeviceSize,
    pub image_view: Option<Arc<ImageView>>,
    pub sampler: Option<Arc<Sampler>>,
}

impl ResourceInfo {
    pub fn is_buffer(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn is_image(&self) -> bool {
        self.image_view.is_some() || self.sampler.is_some()
    }
}

/// Bindings of one descriptor set.
#[derive(Clone, Default)]
pub struct ResourceSet {
    dirty: bool,
    bindings: BTreeMap<u32, BTreeMap<u32, ResourceInfo>>,
}

impl ResourceSet {
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn bindings(&self) -> &BTreeMap<u32, BTreeMap<u32, ResourceInfo>> {
        &self.bindings
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
        for info in self.bindings.values_mut().flat_map(|e| e.values_mut()) {
            info.dirty = false;
        }
    }

    fn entry(&mut self, binding: u32, array_element: u32) -> &mut ResourceInfo {
        self.dirty = true;
        self.bindings
            .entry(binding)
            .or_default()
            .entry(array_element)
            .or_default()
    }
}

/// All staged bindings of a recorder.
#[derive(Clone, Default)]
pub struct ResourceBindingState {
    dirty: bool,
    sets: BTreeMap<u32, ResourceSet>,
}

impl ResourceBindingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.dirty = false;
        self.sets.clear();
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clears the global flag; per-set flags are cleared by [`clear_dirty_set`](Self::clear_dirty_set).
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn clear_dirty_set(&mut self, set: u32) {
        if let Some(resource_set) = self.sets.get_mut(&set) {
            resource_set.clear_dirty();
        }
    }

    pub fn sets(&self) -> &BTreeMap<u32, ResourceSet> {
        &self.sets
    }

    pub fn set(&self, set: u32) -> Option<&ResourceSet> {
        self.sets.get(&set)
    }

    fn entry(&mut self, set: u32, binding: u32, array_element: u32) -> &mut ResourceInfo {
        self.dirty = true;
        let info = self
            .sets
            .entry(set)
            .or_default()
            .entry(binding, array_element);
        info.dirty = true;
        info
    }

    pub fn bind_buffer(
        &mut self,
        buffer: Arc<Buffer>,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
        set: u32,
        binding: u32,
        array_element: u32,
    ) {
        let info = self.entry(set, binding, array_element);
        info.buffer = Some(buffer);
        info.offset = offset;
        info.range = range;
        info.image_view = None;
        info.sampler = None;
    }

    /// Binds a view, a sampler, or both (combined image sampler).
    pub fn bind_image(
        &mut self,
        image_view: Option<Arc<ImageView>>,
        sampler: Option<Arc<Sampler>>,
        set: u32,
        binding: u32,
        array_element: u32,
    ) {
        let info = self.entry(set, binding, array_element);
        info.buffer = None;
        info.offset = 0;
        info.range = 0;
        info.image_view = image_view;
        info.sampler = sampler;
    }

    /// Binds a view read as a subpass input.
    pub fn bind_input(&mut self, image_view: Arc<ImageView>, set: u32, binding: u32, array_element: u32) {
        self.bind_image(Some(image_view), None, set, binding, array_element);
    }
}

/// Descriptor set layouts last bound per set index.
///
/// A layout counts as bound only once its set was bound on the command
/// buffer, so a failed descriptor request leaves the set pending.
#[derive(Clone, Debug, Default)]
pub struct SetLayoutBindings {
    layouts: BTreeMap<u32, vk::DescriptorSetLayout>,
}

impl SetLayoutBindings {
    pub fn clear(&mut self) {
        self.layouts.clear();
    }

    /// Forgets sets missing from `layouts` and returns the sets whose
    /// layout differs from the one last bound.
    pub fn changed_sets(
        &mut self,
        layouts: impl IntoIterator<Item = (u32, vk::DescriptorSetLayout)>,
    ) -> BTreeSet<u32> {
        let current: BTreeMap<u32, vk::DescriptorSetLayout> = layouts.into_iter().collect();
        self.layouts.retain(|set, _| current.contains_key(set));
        current
            .iter()
            .filter(|(set, layout)| self.layouts.get(set) != Some(layout))
            .map(|(set, _)| *set)
            .collect()
    }

    pub fn mark_bound(&mut self, set: u32, layout: vk::DescriptorSetLayout) {
        self.layouts.insert(set, layout);
    }

    pub fn bound_layout(&self, set: u32) -> Option<vk::DescriptorSetLayout> {
        self.layouts.get(&set).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_marks_set_and_state_dirty() {
        let mut state = ResourceBindingState::new();
        assert!(!state.is_dirty());

        state.bind_image(None, None, 1, 3, 0);
        assert!(state.is_dirty());
        let set = state.set(1).unwrap();
        assert!(set.is_dirty());
        assert!(set.bindings()[&3][&0].dirty);
        assert!(state.set(0).is_none());
    }

    #[test]
    fn test_clear_dirty_set_only_touches_that_set() {
        let mut state = ResourceBindingState::new();
        state.bind_image(None, None, 0, 0, 0);
        state.bind_image(None, None, 1, 0, 0);

        state.clear_dirty_set(0);
        assert!(!state.set(0).unwrap().is_dirty());
        assert!(!state.set(0).unwrap().bindings()[&0][&0].dirty);
        assert!(state.set(1).unwrap().is_dirty());

        // The set is dirty again once anything in it is rebound.
        state.bind_image(None, None, 0, 0, 0);
        assert!(state.set(0).unwrap().is_dirty());
    }

    #[test]
    fn test_array_elements_are_separate() {
        let mut state = ResourceBindingState::new();
        state.bind_image(None, None, 0, 2, 0);
        state.bind_image(None, None, 0, 2, 3);
        let elements = &state.set(0).unwrap().bindings()[&2];
        assert_eq!(elements.keys().copied().collect::<Vec<_>>(), vec![0, 3]);
    }

    #[test]
    fn test_reset_drops_everything() {
        let mut state = ResourceBindingState::new();
        state.bind_image(None, None, 0, 0, 0);
        state.reset();
        assert!(!state.is_dirty());
        assert!(state.sets().is_empty());
    }

    fn layout(raw: u64) -> vk::DescriptorSetLayout {
        use ash::vk::Handle;
        vk::DescriptorSetLayout::from_raw(raw)
    }

    #[test]
    fn test_set_stays_pending_until_bound() {
        let mut bindings = SetLayoutBindings::default();
        let layouts = [(0, layout(1)), (1, layout(2))];

        assert_eq!(bindings.changed_sets(layouts), BTreeSet::from([0, 1]));
        // Set 1's descriptor request failed: only set 0 was bound.
        bindings.mark_bound(0, layout(1));
        assert_eq!(bindings.changed_sets(layouts), BTreeSet::from([1]));

        bindings.mark_bound(1, layout(2));
        assert!(bindings.changed_sets(layouts).is_empty());
    }

    #[test]
    fn test_layout_change_and_removed_sets() {
        let mut bindings = SetLayoutBindings::default();
        bindings.mark_bound(0, layout(1));
        bindings.mark_bound(2, layout(3));

        assert_eq!(bindings.changed_sets([(0, layout(4))]), BTreeSet::from([0]));
        assert_eq!(bindings.bound_layout(0), Some(layout(1)));
        assert_eq!(bindings.bound_layout(2), None);

        bindings.clear();
        assert_eq!(bindings.bound_layout(0), None);
    }
}
