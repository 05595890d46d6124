//! Request identity and the request envelope.
//!
//! A [`RequestId`] names one logical stream: it is unique within an in-flight
//! batch and stable across repeated calls for the same stream, which is what
//! lets the session cache give a stateless pipeline per-request memory.

use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Identifier of a logical request stream.
///
/// Backed by a shared string so clones are cheap enough to hand to every
/// worker that touches the batch. Transports that do not supply their own
/// identifiers can mint one with [`RequestId::random`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(Arc<str>);

impl RequestId {
    /// Wraps an externally supplied identifier.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Mints a fresh UUIDv4-backed identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string().into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// One inbound item of a batch: an identifier plus an opaque payload.
///
/// The payload type is generic; deployments serve text or bytes without the
/// aggregator caring which.
#[derive(Debug, Clone)]
pub struct Request<T> {
    id: RequestId,
    payload: T,
}

impl<T> Request<T> {
    /// Creates a request envelope.
    pub fn new(id: impl Into<RequestId>, payload: T) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }

    /// Returns the request's identifier.
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Returns a reference to the payload.
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Consumes the envelope, returning the payload.
    pub fn into_payload(self) -> T {
        self.payload
    }

    /// Consumes the envelope, returning both halves.
    pub fn into_parts(self) -> (RequestId, T) {
        (self.id, self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_are_unique() {
        let a = RequestId::random();
        let b = RequestId::random();
        assert_ne!(a, b);
    }

    #[test]
    fn id_round_trips_through_display() {
        let id = RequestId::new("req-7");
        assert_eq!(id.to_string(), "req-7");
        assert_eq!(id.as_str(), "req-7");
    }

    #[test]
    fn request_splits_into_parts() {
        let request = Request::new("req-0", "payload".to_string());
        let (id, payload) = request.into_parts();
        assert_eq!(id, RequestId::new("req-0"));
        assert_eq!(payload, "payload");
    }
}
