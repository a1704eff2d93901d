//! Storage capability for the items a pager holds

use std::collections::VecDeque;

/// Ordered, mutable storage for the materialized part of a list
///
/// A [`Pager`](super::Pager) owns one of these and only ever grows or
/// shrinks it at the edges.
pub trait MutableSequence<T>: Send + 'static {
    fn len(&self) -> usize;

    fn get(&self, index: usize) -> Option<&T>;

    /// Append `items` after the last element
    fn extend_back(&mut self, items: Vec<T>);

    /// Insert `items` before the first element, keeping their order
    fn extend_front(&mut self, items: Vec<T>);

    /// Remove up to `count` elements from the front
    fn truncate_front(&mut self, count: usize);

    /// Remove up to `count` elements from the back
    fn truncate_back(&mut self, count: usize);

    fn clear(&mut self);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        (0..self.len()).filter_map(|i| self.get(i).cloned()).collect()
    }
}

impl<T: Send + 'static> MutableSequence<T> for VecDeque<T> {
    fn len(&self) -> usize {
        VecDeque::len(self)
    }

    fn get(&self, index: usize) -> Option<&T> {
        VecDeque::get(self, index)
    }

    fn extend_back(&mut self, items: Vec<T>) {
        self.extend(items);
    }

    fn extend_front(&mut self, items: Vec<T>) {
        for item in items.into_iter().rev() {
            self.push_front(item);
        }
    }

    fn truncate_front(&mut self, count: usize) {
        let count = count.min(VecDeque::len(self));
        self.drain(..count);
    }

    fn truncate_back(&mut self, count: usize) {
        let keep = VecDeque::len(self).saturating_sub(count);
        self.truncate(keep);
    }

    fn clear(&mut self) {
        VecDeque::clear(self);
    }

    fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.iter().cloned().collect()
    }
}

impl<T: Send + 'static> MutableSequence<T> for Vec<T> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn get(&self, index: usize) -> Option<&T> {
        self.as_slice().get(index)
    }

    fn extend_back(&mut self, items: Vec<T>) {
        self.extend(items);
    }

    fn extend_front(&mut self, items: Vec<T>) {
        self.splice(0..0, items);
    }

    fn truncate_front(&mut self, count: usize) {
        let count = count.min(Vec::len(self));
        self.drain(..count);
    }

    fn truncate_back(&mut self, count: usize) {
        let keep = Vec::len(self).saturating_sub(count);
        self.truncate(keep);
    }

    fn clear(&mut self) {
        Vec::clear(self);
    }

    fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise<S: MutableSequence<u32>>(mut seq: S) {
        seq.extend_back(vec![3, 4]);
        seq.extend_front(vec![1, 2]);
        assert_eq!(seq.to_vec(), vec![1, 2, 3, 4]);

        seq.truncate_front(1);
        seq.truncate_back(1);
        assert_eq!(seq.to_vec(), vec![2, 3]);
        assert_eq!(seq.get(1), Some(&3));

        seq.truncate_front(10);
        assert!(seq.is_empty());
    }

    #[test]
    fn test_vec_deque() {
        exercise(VecDeque::new());
    }

    #[test]
    fn test_vec() {
        exercise(Vec::new());
    }
}
