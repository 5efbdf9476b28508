#[cfg(test)]
use arbitrary::{Arbitrary, Unstructured};
use bytes::Bytes;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct EntryId {
    pub index: u64,
    pub term: u64,
}

impl EntryId {
    pub fn new(index: u64, term: u64) -> Self {
        Self { index, term }
    }
}

/// A single slot in the replicated log. `payload` holds a serialized
/// `chat_common::Command`; the consensus layer never looks inside it, it
/// only needs to replicate and durably store the bytes in index order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub index: u64,
    pub term: u64,
    pub payload: Bytes,
}

#[cfg(test)]
impl<'a> Arbitrary<'a> for Entry {
    fn arbitrary(u: &mut Unstructured<'a>) -> arbitrary::Result<Self> {
        let size = u.arbitrary_len::<u8>()?;
        let mut payload = Vec::<u8>::with_capacity(size);

        for _ in 0..size {
            payload.push(u.arbitrary()?);
        }

        Ok(Entry {
            index: u.arbitrary()?,
            term: u.arbitrary()?,
            payload: payload.into(),
        })
    }
}
