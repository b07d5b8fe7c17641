//! Engine port allocation.

use crate::directory::Directory;

/// Picks engine ports from the half-open range `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortAllocator {
    min: u16,
    max: u16,
}

impl PortAllocator {
    pub fn new(min: u16, max: u16) -> Self {
        PortAllocator { min, max }
    }

    pub fn min(&self) -> u16 {
        self.min
    }

    pub fn max(&self) -> u16 {
        self.max
    }

    /// Number of ports in the range.
    pub fn capacity(&self) -> usize {
        usize::from(self.max.saturating_sub(self.min))
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.min && port < self.max
    }

    /// Lowest free port, or `None` when every port in range is held by a
    /// live session or a reservation.
    pub fn allocate(&self, directory: &Directory) -> Option<u16> {
        let in_use = directory.ports_in_use();
        (self.min..self.max).find(|port| !in_use.contains(port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionKey;

    #[test]
    fn picks_lowest_free_port() {
        let alloc = PortAllocator::new(7000, 7005);
        let mut dir = Directory::new();
        assert_eq!(alloc.allocate(&dir), Some(7000));

        dir.create(SessionKey::from("A"), 7000, "x").unwrap();
        dir.reserve(SessionKey::from("B"), 7001).unwrap();
        assert_eq!(alloc.allocate(&dir), Some(7002));

        dir.remove(&SessionKey::from("A"));
        assert_eq!(alloc.allocate(&dir), Some(7000));
    }

    #[test]
    fn exhausted_range_yields_none() {
        let alloc = PortAllocator::new(7000, 7002);
        let mut dir = Directory::new();
        dir.create(SessionKey::from("A"), 7000, "x").unwrap();
        dir.create(SessionKey::from("B"), 7001, "y").unwrap();
        assert_eq!(alloc.allocate(&dir), None);
    }

    #[test]
    fn empty_range_yields_none() {
        let alloc = PortAllocator::new(7000, 7000);
        assert_eq!(alloc.capacity(), 0);
        assert_eq!(alloc.allocate(&Directory::new()), None);
    }

    #[test]
    fn never_hands_out_an_assigned_port() {
        let alloc = PortAllocator::new(7000, 7010);
        let mut dir = Directory::new();

        // Deterministic create/remove interleaving across the whole range.
        for round in 0u32..200 {
            let k = SessionKey::new(format!("k{}", round % 13));
            if dir.get(&k).is_some() {
                dir.remove(&k);
                continue;
            }
            match alloc.allocate(&dir) {
                Some(port) => {
                    assert!(!dir.snapshot().ports().contains(&port));
                    dir.create(k, port, "p").unwrap();
                }
                None => assert_eq!(dir.len(), alloc.capacity()),
            }

            let snap = dir.snapshot();
            assert_eq!(snap.ports().len(), snap.len(), "two sessions share a port");
        }
    }
}
