//! Streams attached to a session.

use crate::error::ConnectionError;

/// Who produced a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOrigin {
    /// Captured locally by an upstream session
    Local,
    /// Announced by the engine or attached by the application
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    pub id: String,
    pub origin: StreamOrigin,
}

impl Stream {
    pub fn new(id: impl Into<String>, origin: StreamOrigin) -> Self {
        Self {
            id: id.into(),
            origin,
        }
    }
}

/// Ordered set of streams keyed by id.
#[derive(Debug, Clone, Default)]
pub struct StreamSet {
    streams: Vec<Stream>,
}

impl StreamSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a stream. Ids are unique within the set.
    pub fn insert(&mut self, stream: Stream) -> Result<(), ConnectionError> {
        if self.contains(&stream.id) {
            return Err(ConnectionError::DuplicateStream(stream.id));
        }
        self.streams.push(stream);
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Option<Stream> {
        let index = self.streams.iter().position(|s| s.id == id)?;
        Some(self.streams.remove(index))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.streams.iter().any(|s| s.id == id)
    }

    /// Detach everything, in attach order.
    pub fn drain(&mut self) -> Vec<Stream> {
        std::mem::take(&mut self.streams)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn to_vec(&self) -> Vec<Stream> {
        self.streams.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut set = StreamSet::new();
        set.insert(Stream::new("a", StreamOrigin::Local)).unwrap();
        let err = set.insert(Stream::new("a", StreamOrigin::Remote)).unwrap_err();
        assert_eq!(err, ConnectionError::DuplicateStream("a".to_string()));
        assert_eq!(set.len(), 1);
        assert_eq!(set.to_vec()[0].origin, StreamOrigin::Local);
    }

    #[test]
    fn remove_unknown_is_noop() {
        let mut set = StreamSet::new();
        set.insert(Stream::new("a", StreamOrigin::Remote)).unwrap();
        assert!(set.remove("b").is_none());
        assert_eq!(set.len(), 1);
        assert_eq!(set.remove("a").map(|s| s.id), Some("a".to_string()));
        assert!(set.is_empty());
    }

    #[test]
    fn drain_keeps_attach_order() {
        let mut set = StreamSet::new();
        for id in ["c", "a", "b"] {
            set.insert(Stream::new(id, StreamOrigin::Remote)).unwrap();
        }
        let ids: Vec<_> = set.drain().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert!(set.is_empty());
    }
}
