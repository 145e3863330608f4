use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt;

use super::connection::Connection;
use super::error::ConnectionError;

/// Identifier of one connection in a [`ConnectionTable`].
///
/// Handles are small and reused: a new connection gets the lowest value not
/// currently in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(u16);

impl Handle {
    #[must_use]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Live connections keyed by handle. Iteration is in ascending handle order.
pub struct ConnectionTable<H> {
    entries: BTreeMap<Handle, Connection<H>>,
}

impl<H> Default for ConnectionTable<H> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<H> ConnectionTable<H> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, handle: Handle) -> bool {
        self.entries.contains_key(&handle)
    }

    /// Lowest handle not in use.
    #[must_use]
    pub fn next_free(&self) -> Option<Handle> {
        let mut candidate: u32 = 0;
        for handle in self.entries.keys() {
            if u32::from(handle.0) != candidate {
                break;
            }
            candidate += 1;
        }
        u16::try_from(candidate).ok().map(Handle)
    }

    /// Inserts under the lowest free handle.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::TableFull`] when every handle is taken.
    pub fn insert(&mut self, connection: Connection<H>) -> Result<Handle, ConnectionError> {
        let handle = self.next_free().ok_or(ConnectionError::TableFull)?;
        self.entries.insert(handle, connection);
        Ok(handle)
    }

    pub fn remove(&mut self, handle: Handle) -> Option<Connection<H>> {
        self.entries.remove(&handle)
    }

    #[must_use]
    pub fn get(&self, handle: Handle) -> Option<&Connection<H>> {
        self.entries.get(&handle)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut Connection<H>> {
        self.entries.get_mut(&handle)
    }

    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.entries.keys().copied()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, Handle, Connection<H>> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    fn conn() -> Connection<()> {
        let (a, _b) = UnixStream::pair().unwrap();
        Connection::new(Box::new(a), (), "test", true)
    }

    #[test]
    fn assigns_lowest_unused_handle() {
        let mut table = ConnectionTable::default();
        assert_eq!(table.insert(conn()).unwrap(), Handle(0));
        assert_eq!(table.insert(conn()).unwrap(), Handle(1));
        assert_eq!(table.insert(conn()).unwrap(), Handle(2));

        table.remove(Handle(1));
        assert_eq!(table.next_free(), Some(Handle(1)));
        assert_eq!(table.insert(conn()).unwrap(), Handle(1));
        assert_eq!(table.insert(conn()).unwrap(), Handle(3));
    }

    #[test]
    fn iterates_in_ascending_order() {
        let mut table = ConnectionTable::default();
        for _ in 0..4 {
            table.insert(conn()).unwrap();
        }
        table.remove(Handle(0));
        table.remove(Handle(2));
        let order: Vec<_> = table.handles().map(Handle::as_u16).collect();
        assert_eq!(order, vec![1, 3]);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut table = ConnectionTable::default();
        let h = table.insert(conn()).unwrap();
        assert!(table.remove(h).is_some());
        assert!(table.remove(h).is_none());
        assert!(table.is_empty());
    }
}
