use std::slice;

/// A windowed view over a shared output vector. `saved()` produces a view
/// whose offset starts at the current end, so a nested decomposition only
/// ever sees (and rewrites) the fragments it produced itself, while still
/// appending to the same underlying vector.
pub struct List<'a, T> {
    items: &'a mut Vec<T>,
    offset: usize,
}

impl<'a, T> List<'a, T> {
    pub fn new(items: &'a mut Vec<T>) -> Self {
        Self { items, offset: 0 }
    }

    pub fn len(&self) -> usize {
        self.items.len() - self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item)
    }

    pub fn saved(&'_ mut self) -> List<'_, T> {
        let offset = self.items.len();
        List {
            items: self.items,
            offset,
        }
    }
}

impl<'a, T> IntoIterator for &'a List<'_, T> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> slice::Iter<'a, T> {
        self.items[self.offset..].iter()
    }
}

impl<'a, T> IntoIterator for &'a mut List<'_, T> {
    type Item = &'a mut T;
    type IntoIter = slice::IterMut<'a, T>;

    fn into_iter(self) -> slice::IterMut<'a, T> {
        self.items[self.offset..].iter_mut()
    }
}
