use std::cmp::Ordering;

/// Bounded max-heap that retains the `capacity` smallest values inserted.
///
/// Used to find the boundary key for Take/Skip across partitions.
#[derive(Debug)]
pub struct FixedMaxHeap<T, F> {
    items: Vec<T>,
    capacity: usize,
    compare: F,
}

impl<T, F> FixedMaxHeap<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    pub fn new(capacity: usize, compare: F) -> Self {
        FixedMaxHeap {
            // Capacity is a caller provided count, don't trust it for the
            // allocation.
            items: Vec::with_capacity(capacity.min(1024)),
            capacity,
            compare,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest retained value.
    pub fn max(&self) -> Option<&T> {
        self.items.first()
    }

    /// Insert a value.
    ///
    /// Returns false if the heap is full and the value isn't smaller than the
    /// current max, meaning the value isn't among the smallest `capacity`
    /// values seen so far.
    pub fn insert(&mut self, value: T) -> bool {
        if self.capacity == 0 {
            return false;
        }

        if self.items.len() < self.capacity {
            self.items.push(value);
            self.sift_up(self.items.len() - 1);
            return true;
        }

        if (self.compare)(&value, &self.items[0]) == Ordering::Less {
            self.items[0] = value;
            self.sift_down(0);
            return true;
        }

        false
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if (self.compare)(&self.items[idx], &self.items[parent]) == Ordering::Greater {
                self.items.swap(idx, parent);
                idx = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.items.len();
        loop {
            let left = 2 * idx + 1;
            let right = left + 1;
            let mut largest = idx;

            if left < len && (self.compare)(&self.items[left], &self.items[largest]) == Ordering::Greater {
                largest = left;
            }
            if right < len && (self.compare)(&self.items[right], &self.items[largest]) == Ordering::Greater
            {
                largest = right;
            }
            if largest == idx {
                break;
            }
            self.items.swap(idx, largest);
            idx = largest;
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::seq::SliceRandom;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    fn heap(capacity: usize) -> FixedMaxHeap<i32, fn(&i32, &i32) -> Ordering> {
        FixedMaxHeap::new(capacity, i32::cmp as fn(&i32, &i32) -> Ordering)
    }

    #[test]
    fn keeps_smallest() {
        let mut h = heap(3);
        for v in [5, 3, 8, 1, 9, 2] {
            h.insert(v);
        }
        assert!(h.is_full());
        assert_eq!(Some(&3), h.max());
    }

    #[test]
    fn insert_reports_rejection() {
        let mut h = heap(2);
        assert!(h.insert(4));
        assert!(h.insert(6));
        assert!(!h.insert(7));
        assert!(!h.insert(6));
        assert!(h.insert(1));
        assert_eq!(Some(&4), h.max());
    }

    #[test]
    fn zero_capacity_rejects_everything() {
        let mut h = heap(0);
        assert!(!h.insert(1));
        assert!(h.is_empty());
        assert_eq!(None, h.max());
    }

    #[test]
    fn max_matches_sorted_kth() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut values: Vec<i32> = (0..500).collect();
        values.shuffle(&mut rng);

        let mut h = heap(37);
        for &v in &values {
            h.insert(v);
        }
        assert_eq!(37, h.len());
        assert_eq!(Some(&36), h.max());
    }
}
