//! Insertion-ordered map of live textures keyed by [`TextureId`].
//!
//! Every mutating call states a precondition (id absent for `append`, id present
//! for `replace` / `remove`). Breaking one is a bug in the caller and panics.

use frame_protocol::TextureId;
use slotmap::SecondaryMap;

#[derive(Debug, Clone)]
pub struct TextureRegistry<T> {
    textures: SecondaryMap<TextureId, T>,
    order: Vec<TextureId>,
}

impl<T> TextureRegistry<T> {
    pub fn new() -> Self {
        Self {
            textures: SecondaryMap::new(),
            order: Vec::new(),
        }
    }

    pub fn append(&mut self, id: TextureId, texture: T) {
        if self.textures.contains_key(id) {
            panic!("texture registry append: id {id:?} is already registered");
        }
        self.textures.insert(id, texture);
        self.order.push(id);
    }

    /// Swaps the stored texture in place and returns the previous one.
    pub fn replace(&mut self, id: TextureId, texture: T) -> T {
        let Some(slot) = self.textures.get_mut(id) else {
            panic!("texture registry replace: id {id:?} is not registered");
        };
        std::mem::replace(slot, texture)
    }

    pub fn remove(&mut self, id: TextureId) -> T {
        let Some(texture) = self.textures.remove(id) else {
            panic!("texture registry remove: id {id:?} is not registered");
        };
        let Some(position) = self.order.iter().position(|candidate| *candidate == id) else {
            panic!("texture registry remove: id {id:?} missing from order list");
        };
        self.order.remove(position);
        texture
    }

    pub fn size(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: TextureId) -> bool {
        self.textures.contains_key(id)
    }

    pub fn texture_for(&self, id: TextureId) -> &T {
        match self.textures.get(id) {
            Some(texture) => texture,
            None => panic!("texture registry lookup: id {id:?} is not registered"),
        }
    }

    pub fn id_at(&self, index: usize) -> TextureId {
        match self.order.get(index) {
            Some(id) => *id,
            None => panic!(
                "texture registry id_at: index {index} out of range for size {}",
                self.order.len()
            ),
        }
    }

    pub fn get(&self, id: TextureId) -> Option<&T> {
        self.textures.get(id)
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (TextureId, &T)> + '_ {
        self.order.iter().map(|id| {
            let texture = match self.textures.get(*id) {
                Some(texture) => texture,
                None => panic!("texture registry iter: id {id:?} missing from map"),
            };
            (*id, texture)
        })
    }

    /// Keeps entries for which `keep` returns true, visiting them in order.
    /// Removed textures are handed to `on_removed`.
    pub fn retain(
        &mut self,
        mut keep: impl FnMut(TextureId, &T) -> bool,
        mut on_removed: impl FnMut(TextureId, T),
    ) {
        let textures = &mut self.textures;
        self.order.retain(|id| {
            let Some(texture) = textures.get(*id) else {
                return false;
            };
            if keep(*id, texture) {
                return true;
            }
            if let Some(removed) = textures.remove(*id) {
                on_removed(*id, removed);
            }
            false
        });
    }
}

impl<T> Default for TextureRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use slotmap::SlotMap;

    use super::*;

    fn ids(count: usize) -> Vec<TextureId> {
        let mut keys = SlotMap::<TextureId, ()>::with_key();
        (0..count).map(|_| keys.insert(())).collect()
    }

    #[test]
    fn replace_keeps_position_and_remove_then_append_moves_to_tail() {
        let all = ids(3);
        let (a, b, c) = (all[0], all[1], all[2]);
        let mut registry = TextureRegistry::new();
        registry.append(a, "t1");
        registry.append(b, "t2");
        registry.append(c, "t3");

        assert_eq!(registry.replace(b, "t2b"), "t2");
        assert_eq!(registry.id_at(1), b);
        assert_eq!(*registry.texture_for(b), "t2b");

        registry.remove(a);
        registry.append(a, "t4");
        let order: Vec<_> = registry.iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec![b, c, a]);
        assert_eq!(registry.size(), 3);
    }

    #[test]
    fn stale_generation_is_absent() {
        let mut keys = SlotMap::<TextureId, ()>::with_key();
        let old = keys.insert(());
        keys.remove(old);
        let reused = keys.insert(());

        let mut registry = TextureRegistry::new();
        registry.append(reused, 1u32);

        assert!(registry.contains(reused));
        assert!(!registry.contains(old));
        assert_eq!(registry.get(old), None);
    }

    #[test]
    fn retain_hands_back_removed_textures_in_order() {
        let all = ids(4);
        let mut registry = TextureRegistry::new();
        for (value, id) in all.iter().enumerate() {
            registry.append(*id, value);
        }

        let mut removed = Vec::new();
        registry.retain(|_, value| value % 2 == 0, |_, value| removed.push(value));

        assert_eq!(removed, vec![1, 3]);
        assert_eq!(registry.size(), 2);
        assert_eq!(registry.id_at(0), all[0]);
        assert_eq!(registry.id_at(1), all[2]);
        assert!(!registry.contains(all[1]));
    }

    #[test]
    #[should_panic(expected = "is already registered")]
    fn duplicate_append_panics() {
        let id = ids(1)[0];
        let mut registry = TextureRegistry::new();
        registry.append(id, ());
        registry.append(id, ());
    }

    #[test]
    #[should_panic(expected = "replace: id")]
    fn replace_of_absent_id_panics() {
        let id = ids(1)[0];
        let mut registry = TextureRegistry::<()>::new();
        registry.replace(id, ());
    }

    #[test]
    #[should_panic(expected = "remove: id")]
    fn remove_of_absent_id_panics() {
        let id = ids(1)[0];
        let mut registry = TextureRegistry::<()>::new();
        registry.remove(id);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn id_at_past_end_panics() {
        let registry = TextureRegistry::<()>::new();
        registry.id_at(0);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Append(usize),
        Replace(usize),
        Remove(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..8).prop_map(Op::Append),
            (0usize..8).prop_map(Op::Replace),
            (0usize..8).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn order_and_membership_stay_consistent(ops in proptest::collection::vec(op_strategy(), 0..96)) {
            let pool = ids(8);
            let mut registry = TextureRegistry::new();
            let mut appended = 0usize;
            let mut removed = 0usize;
            let mut stamp = 0u32;

            for op in ops {
                stamp += 1;
                match op {
                    Op::Append(slot) if !registry.contains(pool[slot]) => {
                        registry.append(pool[slot], stamp);
                        appended += 1;
                    }
                    Op::Replace(slot) if registry.contains(pool[slot]) => {
                        let before: Vec<_> = (0..registry.size()).map(|k| registry.id_at(k)).collect();
                        registry.replace(pool[slot], stamp);
                        let after: Vec<_> = (0..registry.size()).map(|k| registry.id_at(k)).collect();
                        prop_assert_eq!(before, after);
                        prop_assert_eq!(*registry.texture_for(pool[slot]), stamp);
                    }
                    Op::Remove(slot) if registry.contains(pool[slot]) => {
                        registry.remove(pool[slot]);
                        removed += 1;
                    }
                    _ => {}
                }

                prop_assert_eq!(registry.size(), appended - removed);
                let listed: Vec<_> = registry.iter().map(|(id, _)| id).collect();
                let mut unique = listed.clone();
                unique.sort();
                unique.dedup();
                prop_assert_eq!(unique.len(), listed.len());
                for id in &pool {
                    prop_assert_eq!(registry.contains(*id), listed.contains(id));
                }
            }
        }
    }
}
