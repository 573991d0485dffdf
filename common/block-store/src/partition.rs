//! Keyed partitions and the element codec seam.

use floe_common::{Result, RuntimeError};

/// Encodes and decodes single user elements.
///
/// The concrete on-disk format is an external concern; the runtime only
/// requires that `decode` consumes exactly the bytes `encode` produced so
/// that partition payloads can be concatenated and re-split.
pub trait Codec<E>: Send + Sync {
    /// Append the encoding of `element` to `out`.
    fn encode(&self, element: &E, out: &mut Vec<u8>) -> Result<()>;

    /// Decode one element from the front of `bytes`, returning the element
    /// and the number of bytes consumed.
    fn decode(&self, bytes: &[u8]) -> Result<(E, usize)>;
}

/// Default codec backed by bincode's standard configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl<E> Codec<E> for BincodeCodec
where
    E: bincode::Encode + bincode::Decode<()> + Send + Sync,
{
    fn encode(&self, element: &E, out: &mut Vec<u8>) -> Result<()> {
        let bytes = bincode::encode_to_vec(element, bincode::config::standard())
            .map_err(|e| RuntimeError::block_write_with_source("element encoding failed", e))?;
        out.extend_from_slice(&bytes);
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<(E, usize)> {
        bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| RuntimeError::block_fetch_with_source("element decoding failed", e))
    }
}

/// A partition whose elements are still in memory as values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonSerializedPartition<K, E> {
    key: K,
    elements: Vec<E>,
}

impl<K, E> NonSerializedPartition<K, E> {
    pub fn new(key: K, elements: Vec<E>) -> Self {
        Self { key, elements }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn elements(&self) -> &[E] {
        &self.elements
    }

    pub fn into_elements(self) -> Vec<E> {
        self.elements
    }

    /// Serialize all elements with `codec`, preserving element order.
    pub fn serialize(&self, codec: &dyn Codec<E>) -> Result<SerializedPartition<K>>
    where
        K: Clone,
    {
        let mut bytes = Vec::new();
        for element in &self.elements {
            codec.encode(element, &mut bytes)?;
        }
        Ok(SerializedPartition::new(
            self.key.clone(),
            bytes,
            self.elements.len() as u32,
        ))
    }
}

/// A partition as stored on disk: the concatenated encodings of its elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedPartition<K> {
    key: K,
    bytes: Vec<u8>,
    element_count: u32,
}

impl<K> SerializedPartition<K> {
    pub fn new(key: K, bytes: Vec<u8>, element_count: u32) -> Self {
        Self {
            key,
            bytes,
            element_count,
        }
    }

    /// An empty partition ready to buffer writes for `key`.
    pub fn empty(key: K) -> Self {
        Self::new(key, Vec::new(), 0)
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn length(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn element_count(&self) -> u32 {
        self.element_count
    }

    /// Buffer one more element into this partition.
    pub fn append<E>(&mut self, codec: &dyn Codec<E>, element: &E) -> Result<()> {
        codec.encode(element, &mut self.bytes)?;
        self.element_count += 1;
        Ok(())
    }

    /// Decode the payload back into elements, checking that exactly the
    /// recorded number of elements is recovered from exactly the recorded
    /// bytes.
    pub fn deserialize<E>(&self, codec: &dyn Codec<E>) -> Result<NonSerializedPartition<K, E>>
    where
        K: Clone,
    {
        let mut elements = Vec::with_capacity(self.element_count as usize);
        let mut offset = 0;
        while offset < self.bytes.len() {
            let (element, consumed) = codec.decode(&self.bytes[offset..])?;
            if consumed == 0 {
                return Err(RuntimeError::block_fetch(
                    "element decoding consumed no bytes",
                ));
            }
            elements.push(element);
            offset += consumed;
        }
        if elements.len() as u32 != self.element_count {
            return Err(RuntimeError::block_fetch(format!(
                "partition payload held {} elements but metadata recorded {}",
                elements.len(),
                self.element_count
            )));
        }
        Ok(NonSerializedPartition::new(self.key.clone(), elements))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_deserialize_round_trip() {
        let codec = BincodeCodec;
        let partition =
            NonSerializedPartition::new(7u32, vec!["a".to_string(), "bb".to_string(), "ccc".to_string()]);
        let serialized = partition.serialize(&codec).unwrap();
        assert_eq!(serialized.element_count(), 3);

        let recovered = serialized.deserialize::<String>(&codec).unwrap();
        assert_eq!(recovered, partition);
    }

    #[test]
    fn test_append_tracks_element_count() {
        let codec = BincodeCodec;
        let mut partition = SerializedPartition::empty("key".to_string());
        partition.append(&codec, &1i64).unwrap();
        partition.append(&codec, &2i64).unwrap();
        assert_eq!(partition.element_count(), 2);

        let recovered = partition.deserialize::<i64>(&codec).unwrap();
        assert_eq!(recovered.elements(), &[1, 2]);
    }

    #[test]
    fn test_deserialize_rejects_count_mismatch() {
        let codec = BincodeCodec;
        let mut bytes = Vec::new();
        Codec::<i64>::encode(&codec, &42, &mut bytes).unwrap();
        let lying = SerializedPartition::new(0u32, bytes, 2);
        let err = lying.deserialize::<i64>(&codec).unwrap_err();
        assert!(matches!(err, RuntimeError::BlockFetch { .. }));
    }
}
